//! Configuration for the vigil daemon.
//!
//! TOML file + `VIGIL_*` environment, layered over built-in defaults via
//! figment, validated into `vigil_core::EngineConfig`. The optional static
//! topology (`[[processes]]`, `[[equipment]]`, ...) is carried as the
//! engine's own definition types and applied with [`Config::apply_topology`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vigil_core::{
    AlarmDef, BufferConfig, CoreError, Engine, EngineConfig, EquipmentDef, OscillationConfig,
    ProcessDef, SubEquipmentDef, TagDef,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to apply {entity}: {source}")]
    Topology {
        entity: String,
        #[source]
        source: CoreError,
    },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub oscillation: OscillationSection,

    #[serde(default)]
    pub logging: LoggingSection,

    // ── Static topology ──
    #[serde(default)]
    pub processes: Vec<ProcessDef>,

    #[serde(default)]
    pub equipment: Vec<EquipmentDef>,

    #[serde(default)]
    pub sub_equipment: Vec<SubEquipmentDef>,

    #[serde(default)]
    pub tags: Vec<TagDef>,

    #[serde(default)]
    pub alarms: Vec<AlarmDef>,
}

/// `[engine]`: task cadences, worker pool and channel sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    pub sweep_interval_ms: u64,
    pub oscillation_check_interval_ms: u64,
    pub ingest_workers: usize,
    pub ingest_queue_capacity: usize,
    pub event_channel_capacity: usize,
    /// Batch size for buffered subscribers.
    pub buffer_capacity: usize,
    pub buffer_flush_interval_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            sweep_interval_ms: millis(engine.sweep_interval),
            oscillation_check_interval_ms: millis(engine.oscillation_check_interval),
            ingest_workers: engine.ingest_workers,
            ingest_queue_capacity: engine.ingest_queue_capacity,
            event_channel_capacity: engine.event_channel_capacity,
            buffer_capacity: engine.buffer.capacity,
            buffer_flush_interval_ms: millis(engine.buffer.flush_interval),
        }
    }
}

/// `[oscillation]`: flapping thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OscillationSection {
    pub osc_numbers: u32,
    pub time_range_secs: u64,
    pub time_oscillation_alive_secs: u64,
}

impl Default for OscillationSection {
    fn default() -> Self {
        let osc = OscillationConfig::default();
        Self {
            osc_numbers: osc.osc_numbers,
            time_range_secs: osc.time_range.as_secs(),
            time_oscillation_alive_secs: osc.time_oscillation_alive.as_secs(),
        }
    }
}

impl OscillationSection {
    pub fn to_oscillation_config(&self) -> Result<OscillationConfig, ConfigError> {
        if self.osc_numbers < 2 {
            return Err(invalid("oscillation.osc_numbers", "must be at least 2"));
        }
        if self.time_range_secs == 0 {
            return Err(invalid("oscillation.time_range_secs", "must be positive"));
        }
        Ok(OscillationConfig {
            osc_numbers: self.osc_numbers,
            time_range: Duration::from_secs(self.time_range_secs),
            time_oscillation_alive: Duration::from_secs(self.time_oscillation_alive_secs),
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `[logging]`: default filter and output format. `RUST_LOG` and the
/// daemon's `-v` flags take precedence over `level`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

// ── Translation and validation ──────────────────────────────────────

impl Config {
    /// Validate every section without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_config()?;
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(invalid(
                "logging.level",
                format!(
                    "expected one of {}, got '{}'",
                    LOG_LEVELS.join(", "),
                    self.logging.level
                ),
            ));
        }
        Ok(())
    }

    /// Build the runtime engine configuration.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let e = &self.engine;
        if e.sweep_interval_ms == 0 {
            return Err(invalid("engine.sweep_interval_ms", "must be positive"));
        }
        if e.oscillation_check_interval_ms == 0 {
            return Err(invalid("engine.oscillation_check_interval_ms", "must be positive"));
        }
        if e.ingest_workers == 0 {
            return Err(invalid("engine.ingest_workers", "must be at least 1"));
        }

        let config = EngineConfig {
            sweep_interval: Duration::from_millis(e.sweep_interval_ms),
            oscillation_check_interval: Duration::from_millis(e.oscillation_check_interval_ms),
            ingest_workers: e.ingest_workers,
            ingest_queue_capacity: e.ingest_queue_capacity,
            event_channel_capacity: e.event_channel_capacity,
            oscillation: self.oscillation.to_oscillation_config()?,
            buffer: BufferConfig {
                capacity: e.buffer_capacity,
                flush_interval: Duration::from_millis(e.buffer_flush_interval_ms),
            },
        };
        config
            .validate()
            .map_err(|err| invalid("engine", err.to_string()))?;
        Ok(config)
    }

    /// Number of topology definitions in the file.
    pub fn topology_len(&self) -> usize {
        self.processes.len()
            + self.equipment.len()
            + self.sub_equipment.len()
            + self.tags.len()
            + self.alarms.len()
    }

    /// Configure the static topology on `engine`, parents before children.
    /// Stops at the first definition the engine rejects.
    pub fn apply_topology(&self, engine: &Engine) -> Result<usize, ConfigError> {
        for def in &self.processes {
            engine
                .configure_process(def)
                .map_err(rejected(format!("process {} ({})", def.id, def.name)))?;
        }
        for def in &self.equipment {
            engine
                .configure_equipment(def)
                .map_err(rejected(format!("equipment {} ({})", def.id, def.name)))?;
        }
        for def in &self.sub_equipment {
            engine
                .configure_sub_equipment(def)
                .map_err(rejected(format!("sub-equipment {} ({})", def.id, def.name)))?;
        }
        for def in &self.tags {
            engine
                .configure_tag(def)
                .map_err(rejected(format!("tag {} ({})", def.id, def.name)))?;
        }
        for def in &self.alarms {
            engine
                .configure_alarm(def)
                .map_err(rejected(format!("alarm {}", def.id)))?;
        }
        Ok(self.topology_len())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn rejected(entity: String) -> impl FnOnce(CoreError) -> ConfigError {
    move |source| ConfigError::Topology { entity, source }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "vigil", "vigil").map_or_else(
        || PathBuf::from("vigil.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Layered sources: defaults, then the TOML file at `path`, then
/// `VIGIL_*` variables (`VIGIL_ENGINE__INGEST_WORKERS=8`).
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VIGIL_").split("__"))
}

/// Load and validate the config from `path`, or from [`config_path`].
/// A missing file is not an error; defaults and environment still apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    load_from(&figment(&path))
}

/// Extract and validate a config from an already layered figment.
pub fn load_from(figment: &Figment) -> Result<Config, ConfigError> {
    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, cfg.to_toml_string()?)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use vigil_core::{EntityId, SupervisedKind, TagOwner};

    use super::*;

    const SAMPLE: &str = r#"
[engine]
sweep_interval_ms = 1000
ingest_workers = 2

[oscillation]
osc_numbers = 4
time_range_secs = 30

[logging]
level = "debug"
format = "json"

[[processes]]
id = 1
name = "P_BOILER"
alive_id = 100
alive_interval_ms = 30000

[[equipment]]
id = 10
name = "E_BURNER"
process_id = 1
alive_id = 110
alive_interval_ms = 10000
comm_fault = { tag_id = 1099, fault_value = false }

[[tags]]
id = 1000
name = "T_FLAME"
owner = { kind = "EQUIPMENT", id = 10 }

[[tags]]
id = 1099
name = "T_BURNER_COMM"
owner = { kind = "EQUIPMENT", id = 10 }

[[alarms]]
id = 5000
tag_id = 1000
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn file_only(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
    }

    #[test]
    fn defaults_translate_to_default_engine_config() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.engine_config().unwrap(), EngineConfig::default());
        assert_eq!(config.topology_len(), 0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&file_only(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(SAMPLE);
        let config = load_from(&file_only(file.path())).unwrap();

        assert_eq!(config.engine.sweep_interval_ms, 1000);
        assert_eq!(config.engine.ingest_workers, 2);
        assert_eq!(config.engine.ingest_queue_capacity, 1024);
        assert_eq!(config.oscillation.osc_numbers, 4);
        assert_eq!(config.oscillation.time_oscillation_alive_secs, 180);
        assert_eq!(config.logging.format, LogFormat::Json);

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.sweep_interval, Duration::from_secs(1));
        assert_eq!(engine.oscillation.time_range, Duration::from_secs(30));
    }

    #[test]
    fn later_provider_wins() {
        let file = write_config(SAMPLE);
        let figment = file_only(file.path()).merge(Serialized::default("engine.ingest_workers", 8));
        let config = load_from(&figment).unwrap();
        assert_eq!(config.engine.ingest_workers, 8);
        assert_eq!(config.engine.sweep_interval_ms, 1000);
    }

    #[test]
    fn topology_is_parsed() {
        let file = write_config(SAMPLE);
        let config = load_from(&file_only(file.path())).unwrap();

        assert_eq!(config.topology_len(), 5);
        assert_eq!(config.processes[0].name, "P_BOILER");
        let comm = config.equipment[0].comm_fault.unwrap();
        assert_eq!(comm.tag_id, EntityId::new(1099));
        assert!(!comm.fault_value);
        assert_eq!(config.tags[0].owner, TagOwner::Equipment(EntityId::new(10)));
    }

    #[test]
    fn zero_workers_rejected() {
        let file = write_config("[engine]\ningest_workers = 0\n");
        let err = load_from(&file_only(file.path())).unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "engine.ingest_workers")
        );
    }

    #[test]
    fn unknown_log_level_rejected() {
        let file = write_config("[logging]\nlevel = \"loud\"\n");
        let err = load_from(&file_only(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "logging.level"));
    }

    #[test]
    fn malformed_toml_is_a_figment_error() {
        let file = write_config("[engine\n");
        let err = load_from(&file_only(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)));
    }

    #[test]
    fn save_then_load_keeps_topology() {
        let file = write_config(SAMPLE);
        let config = load_from(&file_only(file.path())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        save_config(&config, &path).unwrap();
        let reloaded = load_from(&file_only(&path)).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn apply_topology_configures_engine() {
        let file = write_config(SAMPLE);
        let config = load_from(&file_only(file.path())).unwrap();
        let engine = Engine::new(config.engine_config().unwrap()).unwrap();

        assert_eq!(config.apply_topology(&engine).unwrap(), 5);
        let burner = engine
            .supervised(SupervisedKind::Equipment, EntityId::new(10))
            .unwrap();
        assert_eq!(burner.tag_ids.len(), 2);
        assert!(engine.alarm(EntityId::new(5000)).is_ok());
    }

    #[test]
    fn apply_topology_reports_rejected_definition() {
        let file = write_config(
            r#"
[[equipment]]
id = 10
name = "E_ORPHAN"
process_id = 99
alive_id = 110
alive_interval_ms = 10000
"#,
        );
        let config = load_from(&file_only(file.path())).unwrap();
        let engine = Engine::new(config.engine_config().unwrap()).unwrap();

        let err = config.apply_topology(&engine).unwrap_err();
        assert!(matches!(err, ConfigError::Topology { ref entity, .. } if entity.contains("E_ORPHAN")));
    }
}
