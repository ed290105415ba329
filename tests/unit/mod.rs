//! Unit tests for botkeeper modules
//!
//! These tests exercise components across module boundaries without network I/O.

mod test_config;
mod test_dispatch;
mod test_runtime;
mod test_self_healing;
