//! Captive child processes.
//!
//! A captive child is a line-oriented program whose stdin and stdout are
//! both owned by the parent. Nothing else is shared: the child's stderr is
//! inherited unchanged.
//!
//! # Architecture
//!
//! ```text
//!   ┌────────────┐  stdin pipe   ┌──────────────┐  stdout pipe  ┌────────────┐
//!   │   feeder   │ ────────────▶ │ captive child│ ────────────▶ │   reader   │
//!   └────────────┘               └──────────────┘               └────────────┘
//!                    status pipe (close-on-exec) reports exec failure
//! ```

mod ipc;
mod launch;
mod signals;

pub use ipc::{ChildReader, ChildWriter, PipeFd};
pub use launch::ChildProcess;
pub use signals::{ABNORMAL_EXIT_CODE, TerminationReason, analyze_wait_status};
