//! Environment source: `SLUICE__SECTION__KEY=value`.
//!
//! Double underscores separate path segments so single underscores in key
//! names (`max_concurrent_streams`) survive. Logging shortcuts such as
//! `SLUICE_LOG` are read by the logging module, not here.

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment};

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("SLUICE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    )
}
