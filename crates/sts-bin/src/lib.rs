//! `il-sts`
//!
//! Command line front end of the insertion-loss swept test.
//!
//! - [`workflow`]: the interactive [`Session`]
//! - [`console`]: operator dialogue on the terminal
//! - [`telemetry`]: tracing subscriber setup

pub mod console;
pub mod telemetry;
pub mod workflow;

pub use console::{Console, ConsoleOperator, StdinConsole};
pub use workflow::{Session, SessionReport};
