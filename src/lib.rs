pub mod commands;
pub mod config;
pub mod control;
pub mod error;
pub mod installer;
pub mod orchestrator;
pub mod process;
pub mod session;
pub mod terminator;

pub use error::{Result, UpgradeError};
pub use orchestrator::{Upgrade, UpgradePhase, UpgradeReport};
pub use session::{Session, ShellKind};
