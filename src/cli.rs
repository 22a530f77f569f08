//! CLI domain: parse, route and output only.
//! The route table dispatches to the engine, simulator and config loader.

mod output;
mod parse;
mod route;

pub use output::{format_metrics_json, format_metrics_text, format_simulation_text, map_error};
pub use parse::{Cli, Commands, ConfigCommands, OutputFormat, SimulateArgs};
pub use route::RunContext;
