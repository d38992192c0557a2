use std::path::PathBuf;

use thiserror::Error;

/// Configuration failures. `Missing` is the only error in the system that is
/// allowed to abort the process, and only at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration key `{key}` (set it in the config file or export {env})")]
    Missing { key: String, env: String },

    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for `{key}`: {value}")]
    Invalid { key: String, value: String },
}
