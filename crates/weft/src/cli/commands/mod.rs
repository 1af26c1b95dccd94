//! CLI commands

mod init;
mod plan;
mod run;
mod validate;

pub use init::InitCommand;
pub use plan::PlanCommand;
pub use run::RunCommand;
pub use validate::ValidateCommand;
