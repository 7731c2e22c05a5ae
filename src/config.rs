//! A1 — configuration layer.
//!
//! A single JSON file enumerates everything the engine shell needs to
//! construct: exchanges/symbols, CPU pinning, risk thresholds, journal
//! and IPC settings. Loaded once at startup; `update_config` afterwards
//! only ever touches `risk.*` thresholds and the log level, applied
//! through an `ArcSwap` so readers (the risk manager, the log filter)
//! never block on the writer.

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::engine::{CpuAllocation, EngineSettings};
use crate::ingress::{IngressConfig, BINANCE_BOOK_TICKER};
use crate::ipc::IpcConfig;
use crate::oems::OemsConfig;
use crate::risk::RiskConfig;
use crate::snapshot::SnapshotConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    pub dir: String,
    pub page_size: u64,
    pub sync_on_rotate: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: "/var/lib/trading-core/journal".to_string(),
            page_size: crate::journal::DEFAULT_PAGE_SIZE,
            sync_on_rotate: true,
        }
    }
}

/// Top-level config file shape, matching `spec.md` §6:
/// `{ exchanges, symbols, cpu_pinning, realtime, numa_node, risk, journal,
/// ipc }`, plus the ambient additions (`oems`, `ui_snapshot`, `log_level`)
/// this repo's ambient stack needs and a config file otherwise has no
/// other way to carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchanges: Vec<String>,
    pub symbols: Vec<String>,
    pub cpu_pinning: bool,
    pub realtime: bool,
    pub numa_node: Option<u32>,
    pub risk: RiskConfig,
    pub journal: JournalConfig,
    pub ipc: IpcConfig,
    #[serde(default)]
    pub oems: OemsConfig,
    #[serde(default)]
    pub ui_snapshot: SnapshotConfig,
    #[serde(default)]
    pub cpu: CpuAllocation,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub ingress: Vec<IngressSettings>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One configured market-data feed. A thin JSON-facing mirror of
/// [`crate::ingress::IngressConfig`] — kept separate so the config file's
/// shape doesn't have to track the runtime struct's non-serializable
/// pieces (`pin_core`/`realtime` are filled in by the engine shell, not
/// the config file, since they come from `cpu_pinning`/`realtime` above).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressSettings {
    pub exchange_name: String,
    pub ws_url: String,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub subscribe_payload: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchanges: Vec::new(),
            symbols: Vec::new(),
            cpu_pinning: true,
            realtime: false,
            numa_node: None,
            risk: RiskConfig::default(),
            journal: JournalConfig::default(),
            ipc: IpcConfig::default(),
            oems: OemsConfig::default(),
            ui_snapshot: SnapshotConfig::default(),
            cpu: CpuAllocation::default(),
            log_level: default_log_level(),
            ingress: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: String, source: std::io::Error },
    Parse { path: String, source: serde_json::Error },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "failed to read config file {path}: {source}"),
            Self::Parse { path, source } => write!(f, "failed to parse config file {path}: {source}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

impl Config {
    /// Loads and validates a config file. Any failure here is surfaced by
    /// `main` as exit code 2, per `spec.md` §6.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();
        let content = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_str.clone(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.journal.page_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "journal.page_size must be a power of two, got {}",
                self.journal.page_size
            )));
        }
        if self.journal.page_size == 0 {
            return Err(ConfigError::Invalid("journal.page_size must be non-zero".to_string()));
        }
        for feed in &self.ingress {
            let exchange_known = self.exchanges.iter().any(|e| e == &feed.exchange_name);
            if !exchange_known {
                return Err(ConfigError::Invalid(format!(
                    "ingress feed references exchange '{}' not present in exchanges[]",
                    feed.exchange_name
                )));
            }
        }
        if self.risk.max_drawdown_pct <= 0.0 || self.risk.max_drawdown_pct > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "risk.max_drawdown_pct must be in (0, 1], got {}",
                self.risk.max_drawdown_pct
            )));
        }
        Ok(())
    }

    /// Builds the engine shell's settings struct from this config. The
    /// bus capacities are not part of the file's public shape — they're
    /// operational tuning, defaulted by `EngineSettings` and left at
    /// their defaults here.
    pub fn to_engine_settings(&self, prefix: &str) -> EngineSettings {
        EngineSettings {
            prefix: prefix.to_string(),
            exchanges: self.exchanges.clone(),
            symbols: self.symbols.clone(),
            journal_dir: self.journal.dir.clone(),
            journal_page_size: self.journal.page_size,
            journal_sync_on_rotate: self.journal.sync_on_rotate,
            risk: self.risk.clone(),
            oems: self.oems.clone(),
            ipc: IpcConfig {
                prefix: prefix.to_string(),
                ..self.ipc.clone()
            },
            ui_snapshot: self.ui_snapshot.clone(),
            enable_cpu_pinning: self.cpu_pinning,
            enable_realtime: self.realtime,
            cpu: self.cpu.clone(),
            ..EngineSettings::default()
        }
    }

    /// Builds the `IngressConfig`s the engine shell's MD thread consumes.
    /// `exchange_id` is the index of the feed's exchange name in
    /// `exchanges[]` — the same order `SymbolTable::build` assigns dense
    /// ids in, so this matches what the engine shell interns without
    /// needing the table built yet.
    ///
    /// Field-name knowledge per exchange is data, not code (`TickerFieldMap`
    /// in `crate::ingress`); only Binance's book-ticker shape is wired up
    /// today; a newly-added exchange with a different wire shape needs its
    /// own `TickerFieldMap` constant before it can be configured here.
    pub fn to_ingress_configs(&self) -> Vec<IngressConfig> {
        self.ingress
            .iter()
            .filter_map(|feed| {
                let exchange_id = self.exchanges.iter().position(|e| e == &feed.exchange_name)? as u16;
                Some(IngressConfig {
                    exchange_id,
                    exchange_name: feed.exchange_name.clone(),
                    ws_url: feed.ws_url.clone(),
                    symbols: feed.symbols.clone(),
                    fields: BINANCE_BOOK_TICKER,
                    subscribe_payload: feed.subscribe_payload.clone(),
                    pin_core: None,
                    realtime: false,
                    heartbeat_interval: std::time::Duration::from_secs(15),
                    pong_timeout: std::time::Duration::from_secs(30),
                })
            })
            .collect()
    }
}

/// Hot-reloadable handle shared by every component that reads
/// `risk.*`/`log_level` at runtime. `update_config` replaces the whole
/// snapshot; callers that only care about one field read through
/// `.load()` each time rather than caching a stale copy.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: std::sync::Arc<ArcSwap<Config>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: std::sync::Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    pub fn load(&self) -> std::sync::Arc<Config> {
        self.inner.load_full()
    }

    /// Applies an update restricted to `risk.*` and `log_level`, per
    /// `spec.md` §6 ("runtime updates via `update_config` are allowed
    /// only for risk thresholds and log level"). Other fields in `patch`
    /// are ignored rather than rejected, since the IPC command surface
    /// only ever constructs a full `Config` by cloning the current one.
    pub fn update_config(&self, risk: RiskConfig, log_level: String) -> Result<(), ConfigError> {
        let current = self.inner.load();
        let mut next = (**current).clone();
        next.risk = risk;
        next.log_level = log_level;
        next.validate()?;
        self.inner.store(std::sync::Arc::new(next));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_page_size() {
        let mut config = Config::default();
        config.journal.page_size = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_ingress_referencing_unknown_exchange() {
        let mut config = Config::default();
        config.exchanges = vec!["binance".to_string()];
        config.ingress.push(IngressSettings {
            exchange_name: "okx".to_string(),
            ws_url: "wss://example".to_string(),
            symbols: vec![],
            subscribe_payload: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_handle_rejects_invalid_update() {
        let handle = ConfigHandle::new(Config::default());
        let mut bad_risk = RiskConfig::default();
        bad_risk.max_drawdown_pct = 0.0;
        assert!(handle.update_config(bad_risk, "debug".to_string()).is_err());
        assert_eq!(handle.load().log_level, "info");
    }

    #[test]
    fn config_handle_applies_valid_update() {
        let handle = ConfigHandle::new(Config::default());
        let mut risk = RiskConfig::default();
        risk.max_open_orders = 10;
        handle.update_config(risk, "debug".to_string()).unwrap();
        assert_eq!(handle.load().risk.max_open_orders, 10);
        assert_eq!(handle.load().log_level, "debug");
    }

    #[test]
    fn load_from_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string(&Config::default()).unwrap()).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.log_level, "info");
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/path/config.json").is_err());
    }
}
