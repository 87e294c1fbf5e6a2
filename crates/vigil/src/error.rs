//! Daemon error types with miette diagnostics.
//!
//! Wraps `ConfigError` and `CoreError` into operator-facing errors with
//! actionable help text and a distinct exit code per failure class.

use miette::Diagnostic;
use thiserror::Error;

use vigil_config::ConfigError;
use vigil_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const TOPOLOGY: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum DaemonError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration in {path}")]
    #[diagnostic(
        code(vigil::config),
        help(
            "Check the file and any VIGIL_* environment overrides.\n\
             Nested keys use a double underscore: VIGIL_ENGINE__INGEST_WORKERS=8\n\
             Inspect the merged result with: vigild print-config"
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Topology rejected")]
    #[diagnostic(
        code(vigil::topology),
        help(
            "Definitions are applied in order: processes, equipment, sub_equipment, tags, alarms.\n\
             Each parent must be declared before its children and every id must be unique."
        )
    )]
    Topology {
        #[source]
        source: ConfigError,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(vigil::engine))]
    Engine(#[from] CoreError),

    #[error("Could not install the shutdown signal handler")]
    #[diagnostic(code(vigil::signal))]
    Signal(#[source] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(vigil::config))]
    Render(ConfigError),
}

impl DaemonError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::Render(_) => exit_code::CONFIG,
            Self::Topology { .. } => exit_code::TOPOLOGY,
            Self::Engine(CoreError::Config { .. } | CoreError::ValidationFailed { .. }) => {
                exit_code::USAGE
            }
            Self::Engine(_) | Self::Signal(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_failure_class() {
        let config = DaemonError::Config {
            path: "vigil.toml".into(),
            source: ConfigError::Validation {
                field: "engine.ingest_workers".into(),
                reason: "must be at least 1".into(),
            },
        };
        assert_eq!(config.exit_code(), exit_code::CONFIG);

        let topology = DaemonError::Topology {
            source: ConfigError::Topology {
                entity: "tag 1".into(),
                source: CoreError::validation("process 9 does not exist"),
            },
        };
        assert_eq!(topology.exit_code(), exit_code::TOPOLOGY);

        assert_eq!(DaemonError::Engine(CoreError::ShutDown).exit_code(), exit_code::GENERAL);
    }
}
