//! CLI route: single route table and run context.

use crate::cli::output::format_simulation_text;
use crate::cli::parse::{Commands, ConfigCommands, OutputFormat, SimulateArgs};
use crate::config::{validation_failure, ConfigLoader, SluiceConfig};
use crate::engine::StreamEngine;
use crate::error::StreamError;
use crate::simulation::{run_workload, Workload};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Runtime context for CLI execution: workspace, config path and the
/// loaded configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config_path: Option<PathBuf>,
    config: SluiceConfig,
}

impl RunContext {
    /// Load configuration from `config_path` if given, otherwise from the
    /// workspace layers.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, StreamError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            workspace_root,
            config_path,
            config,
        })
    }

    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> Result<String, StreamError> {
        match command {
            Commands::Simulate(args) => self.simulate(args),
            Commands::Config { command } => match command {
                ConfigCommands::Show => self.config_show(),
                ConfigCommands::Validate { format } => self.config_validate(*format),
            },
        }
    }

    fn simulate(&self, args: &SimulateArgs) -> Result<String, StreamError> {
        let mut engine_config = self.config.engine.clone();
        if let Some(max) = args.max_concurrent {
            engine_config.max_concurrent_streams = max;
        }
        if let Some(strategy) = args.strategy {
            engine_config.backpressure = strategy;
        }
        let workload = Workload {
            boundaries: args.boundaries,
            chunks_per_boundary: args.chunks,
            chunk_size: args.chunk_size,
            chunk_interval: Duration::from_millis(args.interval_ms),
            delivery_interval: Duration::from_millis(args.deliver_every_ms.max(1)),
            transient_failure_every: args.fail_every,
            corrupt_boundaries: args.corrupt,
            checksums: !args.no_checksums,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(StreamError::unknown)?;
        let report = runtime.block_on(async {
            let engine = StreamEngine::new(engine_config)?;
            let report = run_workload(&engine, &workload).await;
            engine.dispose();
            report
        })?;
        info!(
            completed = report.metrics.completed_streams,
            failed = report.metrics.failed_streams,
            "Simulation report ready"
        );

        match args.format {
            OutputFormat::Text => Ok(format_simulation_text(&report)),
            OutputFormat::Json => {
                serde_json::to_string_pretty(&report).map_err(StreamError::unknown)
            }
        }
    }

    fn config_show(&self) -> Result<String, StreamError> {
        toml::to_string_pretty(&self.config).map_err(StreamError::unknown)
    }

    fn config_validate(&self, format: OutputFormat) -> Result<String, StreamError> {
        let source = match self.config_path {
            Some(ref path) => path.display().to_string(),
            None => self.workspace_root.display().to_string(),
        };
        let errors = match self.config.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };
        match format {
            OutputFormat::Json => {
                let output = json!({
                    "source": source,
                    "valid": errors.is_empty(),
                    "errors": errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                });
                serde_json::to_string_pretty(&output).map_err(StreamError::unknown)
            }
            OutputFormat::Text if errors.is_empty() => {
                Ok(format!("Configuration is valid ({})", source))
            }
            OutputFormat::Text => Err(validation_failure(&errors)),
        }
    }
}
