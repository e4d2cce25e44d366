//! # StratoVM Common
//!
//! Shared utilities for StratoVM components.
//!
//! ## Logging
//!
//! Tracing subscriber initialization shared by every binary and test harness:
//!
//! ```rust
//! stratovm_common::init_logging("info").unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
