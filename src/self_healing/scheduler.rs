//! Recovery scheduler.
//!
//! Alerts become prioritized, de-duplicated, rate-limited recovery actions.
//! The queue is a min-heap on (priority, enqueue sequence), so equal
//! priorities drain in FIFO order.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::actions::{actions_for_alert, ActionContext, ActionRegistry};
use super::monitor::AlertKind;
use crate::clock::SharedClock;
use crate::errors::RecoveryError;

/// Recovery executions kept for `executions()`.
const EXECUTION_HISTORY_CAP: usize = 100;

/// Per-action statistics. Never deleted; attempts only grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttemptRecord {
    pub attempts: u64,
    pub successes: u64,
    pub consecutive_failures: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct ScheduledAction {
    priority: u8,
    seq: u64,
    unique_key: String,
    action_name: String,
    context: ActionContext,
}

impl ScheduledAction {
    fn key(&self) -> Reverse<(u8, u64)> {
        Reverse((self.priority, self.seq))
    }
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

/// What `enqueue` did with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ScheduleDecision {
    Queued { action: String },
    CoolingDown { action: String, remaining_secs: i64 },
    AlreadyPending { action: String },
    Exhausted { action: String },
    UnknownAction { action: String },
    Disabled,
}

/// One executed recovery action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryExecution {
    pub action: String,
    pub trigger: Option<AlertKind>,
    pub manual: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub decisions: Vec<ScheduleDecision>,
    pub executions: Vec<RecoveryExecution>,
}

pub struct RecoveryScheduler {
    registry: Arc<ActionRegistry>,
    clock: SharedClock,
    autonomy: AtomicBool,
    queue: Mutex<BinaryHeap<ScheduledAction>>,
    seq: AtomicU64,
    records: Mutex<BTreeMap<String, RecoveryAttemptRecord>>,
    executions: Mutex<VecDeque<RecoveryExecution>>,
    drain_lock: Mutex<()>,
}

impl RecoveryScheduler {
    pub fn new(registry: Arc<ActionRegistry>, clock: SharedClock, autonomy_enabled: bool) -> Self {
        Self {
            registry,
            clock,
            autonomy: AtomicBool::new(autonomy_enabled),
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            records: Mutex::new(BTreeMap::new()),
            executions: Mutex::new(VecDeque::with_capacity(EXECUTION_HISTORY_CAP)),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn enable(&self) {
        self.autonomy.store(true, Ordering::SeqCst);
        info!("Autonomous recovery enabled");
    }

    pub fn disable(&self) {
        self.autonomy.store(false, Ordering::SeqCst);
        info!("Autonomous recovery disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.autonomy.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Map an alert to its recovery actions, enqueue them and drain.
    pub fn schedule(&self, kind: AlertKind, context: ActionContext) -> ScheduleReport {
        if !self.is_enabled() {
            debug!(alert = %kind, "Autonomy disabled, alert not scheduled");
            return ScheduleReport {
                decisions: vec![ScheduleDecision::Disabled],
                executions: Vec::new(),
            };
        }

        let decisions: Vec<_> = actions_for_alert(kind)
            .iter()
            .map(|name| self.enqueue(name, context.clone()))
            .collect();
        let executions = self.drain();
        ScheduleReport {
            decisions,
            executions,
        }
    }

    /// Queue `action_name` unless it is cooling down, exhausted or already pending.
    pub fn enqueue(&self, action_name: &str, context: ActionContext) -> ScheduleDecision {
        let Some(spec) = self.registry.get(action_name) else {
            warn!(action = action_name, "Unknown recovery action");
            return ScheduleDecision::UnknownAction {
                action: action_name.to_string(),
            };
        };

        let now = self.clock.now();
        if let Some(record) = self.records.lock().get(action_name) {
            if record.consecutive_failures >= spec.max_attempts {
                debug!(action = action_name, "Recovery action exhausted");
                return ScheduleDecision::Exhausted {
                    action: action_name.to_string(),
                };
            }
            if let Some(last) = record.last_attempt {
                let elapsed = now - last;
                let cooldown = chrono::Duration::from_std(spec.cooldown)
                    .unwrap_or_else(|_| chrono::Duration::MAX);
                if elapsed < cooldown {
                    let remaining_secs = (cooldown - elapsed).num_seconds();
                    debug!(action = action_name, remaining_secs, "Recovery action cooling down");
                    return ScheduleDecision::CoolingDown {
                        action: action_name.to_string(),
                        remaining_secs,
                    };
                }
            }
        }

        let mut queue = self.queue.lock();
        if queue.iter().any(|item| item.unique_key == action_name) {
            return ScheduleDecision::AlreadyPending {
                action: action_name.to_string(),
            };
        }
        queue.push(ScheduledAction {
            priority: spec.priority,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            unique_key: action_name.to_string(),
            action_name: action_name.to_string(),
            context,
        });
        debug!(action = action_name, priority = spec.priority, "Recovery action queued");
        ScheduleDecision::Queued {
            action: action_name.to_string(),
        }
    }

    /// Run queued actions until the queue is empty.
    pub fn drain(&self) -> Vec<RecoveryExecution> {
        let _guard = self.drain_lock.lock();
        let mut executions = Vec::new();
        loop {
            let next = self.queue.lock().pop();
            let Some(item) = next else {
                break;
            };
            if let Some(execution) = self.run(&item.action_name, &item.context) {
                executions.push(execution);
            }
        }
        executions
    }

    /// Run an action immediately, ignoring cooldown, exhaustion and autonomy.
    /// The attempt is still recorded.
    pub fn run_now(
        &self,
        action_name: &str,
        context: ActionContext,
    ) -> Result<RecoveryExecution, RecoveryError> {
        let _guard = self.drain_lock.lock();
        self.run(action_name, &context)
            .ok_or_else(|| RecoveryError::UnknownAction(action_name.to_string()))
    }

    fn run(&self, action_name: &str, context: &ActionContext) -> Option<RecoveryExecution> {
        let spec = self.registry.get(action_name)?;
        let started_at = self.clock.now();

        // The attempt counts even if the executor never returns normally.
        {
            let mut records = self.records.lock();
            let record = records.entry(action_name.to_string()).or_default();
            record.attempts += 1;
            record.last_attempt = Some(started_at);
        }

        let result = catch_unwind(AssertUnwindSafe(|| spec.executor.execute(context)));
        let (success, message, details) = match result {
            Ok(Ok(outcome)) => (outcome.success, outcome.message, outcome.details),
            Ok(Err(e)) => {
                warn!(action = action_name, error = %e, "Recovery action failed");
                (false, e.to_string(), Map::new())
            }
            Err(panic) => {
                let message = crate::errors::panic_message(panic.as_ref());
                error!(action = action_name, panic = %message, "Recovery action panicked");
                (
                    false,
                    RecoveryError::ExecutorPanicked {
                        action: action_name.to_string(),
                        message,
                    }
                    .to_string(),
                    Map::new(),
                )
            }
        };

        let completed_at = self.clock.now();
        {
            let mut records = self.records.lock();
            let record = records.entry(action_name.to_string()).or_default();
            if success {
                record.successes += 1;
                record.consecutive_failures = 0;
                record.last_success = Some(completed_at);
            } else {
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            }
        }

        if success {
            info!(action = action_name, message = %message, "Recovery action succeeded");
        } else {
            warn!(action = action_name, message = %message, "Recovery action did not succeed");
        }

        let execution = RecoveryExecution {
            action: action_name.to_string(),
            trigger: context.trigger,
            manual: context.manual,
            started_at,
            completed_at,
            success,
            message,
            details,
        };
        let mut history = self.executions.lock();
        history.push_back(execution.clone());
        while history.len() > EXECUTION_HISTORY_CAP {
            history.pop_front();
        }
        Some(execution)
    }

    pub fn pending_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn records(&self) -> BTreeMap<String, RecoveryAttemptRecord> {
        self.records.lock().clone()
    }

    pub fn record(&self, action_name: &str) -> Option<RecoveryAttemptRecord> {
        self.records.lock().get(action_name).cloned()
    }

    pub fn executions(&self) -> Vec<RecoveryExecution> {
        self.executions.lock().iter().cloned().collect()
    }

    pub fn available_actions(&self) -> Vec<String> {
        self.registry.names()
    }
}
