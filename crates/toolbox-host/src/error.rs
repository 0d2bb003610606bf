use std::path::PathBuf;

use crate::descriptor::DescriptorKind;

/// Error raised while loading one category of descriptors
///
/// Any of these fails the whole category and rolls the registry back.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{file} is not a valid {kind} descriptor: {reason}")]
    Invalid {
        file: String,
        kind: DescriptorKind,
        reason: String,
    },

    #[error("{file} references unknown {what} `{name}`")]
    UnknownHandler {
        file: String,
        what: &'static str,
        name: String,
    },

    #[error("{file} has a duplicate {what} `{name}`")]
    Duplicate {
        file: String,
        what: &'static str,
        name: String,
    },

    #[error("{file}: data builder `{name}` failed: {reason}")]
    Builder {
        file: String,
        name: String,
        reason: String,
    },

    #[error("{file}: {source}")]
    Schedule {
        file: String,
        #[source]
        source: ScheduleError,
    },
}

/// Error raised when a service schedule cannot be parsed
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression `{expression}`: {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: cron::error::Error,
    },
}
