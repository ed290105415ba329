//! External capabilities consumed by agents.
//!
//! The dispatcher only depends on these traits. The built-in analyzer and
//! generator are deliberately small line-oriented implementations; richer
//! backends (ML classifiers, paraphrasers, AST analyzers) plug in through the
//! same interfaces.

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

pub use crate::self_healing::metrics::{MetricsSample, SysinfoMetrics, SystemMetricsProvider};

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub score: f64,
}

#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> anyhow::Result<Classification>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParaphraseOptions {
    #[serde(default = "default_variants")]
    pub variants: usize,
    #[serde(default)]
    pub max_length: Option<usize>,
}

fn default_variants() -> usize {
    1
}

impl Default for ParaphraseOptions {
    fn default() -> Self {
        Self {
            variants: default_variants(),
            max_length: None,
        }
    }
}

#[async_trait]
pub trait TextParaphraser: Send + Sync {
    async fn paraphrase(&self, text: &str, options: &ParaphraseOptions)
        -> anyhow::Result<Vec<String>>;
}

/// Result of analyzing one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub path: PathBuf,
    pub total_lines: usize,
    pub code_lines: usize,
    pub comment_lines: usize,
    pub blank_lines: usize,
    pub functions: usize,
    pub types: usize,
    pub issues: Vec<String>,
    /// 0..=100, higher is better
    pub quality_score: f64,
}

#[async_trait]
pub trait CodeAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> anyhow::Result<AnalysisReport>;
}

/// What to generate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// "function", "type" or "test"
    pub kind: String,
    pub name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_language() -> String {
    "rust".to_string()
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String>;
}

/// Line-scanning analyzer.
#[derive(Debug, Clone)]
pub struct LineScanAnalyzer {
    pub max_line_length: usize,
}

impl Default for LineScanAnalyzer {
    fn default() -> Self {
        Self {
            max_line_length: 120,
        }
    }
}

fn function_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(pub(\([^)]*\))?\s+)?(async\s+)?(fn|def|function)\s+\w+")
            .expect("invalid function regex")
    })
}

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(pub(\([^)]*\))?\s+)?(struct|enum|trait|class|interface)\s+\w+")
            .expect("invalid type regex")
    })
}

impl LineScanAnalyzer {
    pub fn analyze_source(&self, path: &Path, source: &str) -> AnalysisReport {
        let mut report = AnalysisReport {
            path: path.to_path_buf(),
            ..Default::default()
        };

        for (idx, line) in source.lines().enumerate() {
            report.total_lines += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                report.blank_lines += 1;
                continue;
            }
            if trimmed.starts_with("//") || trimmed.starts_with('#') {
                report.comment_lines += 1;
            } else {
                report.code_lines += 1;
            }
            if function_pattern().is_match(line) {
                report.functions += 1;
            }
            if type_pattern().is_match(line) {
                report.types += 1;
            }
            if line.chars().count() > self.max_line_length {
                report.issues.push(format!(
                    "line {} exceeds {} characters",
                    idx + 1,
                    self.max_line_length
                ));
            }
            if trimmed.contains("TODO") || trimmed.contains("FIXME") {
                report.issues.push(format!("line {} has an open marker", idx + 1));
            }
        }

        let mut score = 100.0 - 2.0 * report.issues.len() as f64;
        if report.code_lines > 0 && report.comment_lines == 0 {
            score -= 10.0;
        }
        report.quality_score = score.clamp(0.0, 100.0);
        report
    }
}

#[async_trait]
impl CodeAnalyzer for LineScanAnalyzer {
    async fn analyze(&self, path: &Path) -> anyhow::Result<AnalysisReport> {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(self.analyze_source(path, &source))
    }
}

/// Skeleton generator for Rust and Python.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

#[async_trait]
impl CodeGenerator for TemplateGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        let doc = request
            .description
            .clone()
            .unwrap_or_else(|| format!("{} generated by botkeeper", request.name));
        let name = &request.name;

        let code = match (request.language.as_str(), request.kind.as_str()) {
            ("rust", "function") => format!("/// {doc}\npub fn {name}() {{\n    todo!()\n}}\n"),
            ("rust", "type") => format!(
                "/// {doc}\n#[derive(Debug, Default)]\npub struct {name} {{}}\n\nimpl {name} {{\n    pub fn new() -> Self {{\n        Self::default()\n    }}\n}}\n"
            ),
            ("rust", "test") => format!(
                "#[cfg(test)]\nmod tests {{\n    use super::*;\n\n    #[test]\n    fn test_{}() {{\n        // {doc}\n    }}\n}}\n",
                name.to_lowercase()
            ),
            ("python", "function") => format!("def {name}():\n    \"\"\"{doc}\"\"\"\n    pass\n"),
            ("python", "type") => format!(
                "class {name}:\n    \"\"\"{doc}\"\"\"\n\n    def __init__(self):\n        pass\n"
            ),
            ("python", "test") => format!(
                "import unittest\n\n\nclass Test{name}(unittest.TestCase):\n    def test_{}(self):\n        \"\"\"{doc}\"\"\"\n        pass\n",
                name.to_lowercase()
            ),
            (lang, kind) => anyhow::bail!("No template for {kind} in {lang}"),
        };
        Ok(code)
    }
}

/// The capability set handed to every agent.
#[derive(Clone)]
pub struct Capabilities {
    pub metrics: Arc<dyn SystemMetricsProvider>,
    pub analyzer: Arc<dyn CodeAnalyzer>,
    pub generator: Arc<dyn CodeGenerator>,
    pub classifier: Option<Arc<dyn TextClassifier>>,
    pub paraphraser: Option<Arc<dyn TextParaphraser>>,
}

impl Capabilities {
    /// Built-in analyzer and generator on top of the given metrics provider.
    pub fn builtin(metrics: Arc<dyn SystemMetricsProvider>) -> Self {
        Self {
            metrics,
            analyzer: Arc::new(LineScanAnalyzer::default()),
            generator: Arc::new(TemplateGenerator),
            classifier: None,
            paraphraser: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TextClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_paraphraser(mut self, paraphraser: Arc<dyn TextParaphraser>) -> Self {
        self.paraphraser = Some(paraphraser);
        self
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("classifier", &self.classifier.is_some())
            .field("paraphraser", &self.paraphraser.is_some())
            .finish_non_exhaustive()
    }
}
