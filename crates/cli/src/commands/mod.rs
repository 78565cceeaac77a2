//! CLI command implementations

mod config;
mod run;

pub use config::{cmd_config_check, cmd_config_template};
pub use run::cmd_run;
