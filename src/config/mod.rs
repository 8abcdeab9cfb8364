//! Configuration loading.
//!
//! Settings come from `config/default.{toml,yaml,json}` (optional), an
//! explicitly named file, and `MSGDISPATCH_`-prefixed environment variables
//! with `__` between section and key, e.g. `MSGDISPATCH_SERVER__PORT=9000`.
//! Whatever is missing keeps its default.

mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{
    BacklogKind, BrokerSettings, DispatchSettings, LoggingSettings, ServerSettings, Settings,
};

const ENV_PREFIX: &str = "MSGDISPATCH";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Like [`load_config`], with `path` layered over the default file. Unlike
/// the default file, an explicitly named file must exist.
pub fn load_config_from(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    let builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
