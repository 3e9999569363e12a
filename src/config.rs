//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a missing file or section falls back to the
//! stock configuration. A handful of knobs can be overridden from the
//! environment (see [`AppConfig::apply_env_overrides`]). Secrets (the
//! Telegram bot token) are referenced by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::types::{MorphError, Source};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub ledger: LedgerConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub dashboard: DashboardConfig,
    pub alerts: AlertsConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { name: "MORPH".to_string() }
    }
}

/// Limits and tuning used by the ledger and its engines.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Smallest accepted stake.
    pub min_stake: Decimal,
    /// Largest accepted stake.
    pub max_stake: Decimal,
    /// Minimum rate improvement (percentage points) before a position moves.
    pub reallocation_threshold: Decimal,
    /// Lowest rate a source can drift to.
    pub rate_floor: Decimal,
    /// Highest rate a source can drift to.
    pub rate_ceiling: Decimal,
    /// Largest per-cycle rate change in either direction.
    pub drift_step: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_stake: dec!(0.1),
            max_stake: dec!(1000),
            reallocation_threshold: dec!(2),
            rate_floor: dec!(5),
            rate_ceiling: dec!(20),
            drift_step: dec!(0.25),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub compound_interval_secs: u64,
    pub notify_interval_secs: u64,
    /// Users with `total_earned` above this receive the periodic update.
    pub notify_earnings_threshold: Decimal,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            compound_interval_secs: 3600,
            notify_interval_secs: 86_400,
            notify_earnings_threshold: dec!(0.001),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: "data".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: false, port: 8080 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
}

/// One configured yield source.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub rate: Decimal,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl From<&SourceConfig> for Source {
    fn from(cfg: &SourceConfig) -> Self {
        let mut source = Source::new(&cfg.id, &cfg.name, cfg.rate);
        source.active = cfg.active;
        source
    }
}

/// The stock source set, used when neither config nor storage provides one.
pub fn default_sources() -> Vec<Source> {
    vec![
        Source::new("marinade", "Marinade Finance", dec!(6.8)),
        Source::new("raydium", "Raydium", dec!(12.5)),
        Source::new("orca", "Orca", dec!(10.2)),
        Source::new("kamino", "Kamino", dec!(15.3)),
        Source::new("drift", "Drift Protocol", dec!(8.9)),
    ]
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults. Environment
    /// overrides are applied and the result validated either way.
    pub fn load_or_default(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides.
    ///
    /// `AUTO_COMPOUND_INTERVAL` is in milliseconds; the rest are decimals.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let decimal = |key: &str| -> Result<Option<Decimal>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<Decimal>()
                    .map(Some)
                    .with_context(|| format!("Invalid decimal in {key}: {raw}")),
                None => Ok(None),
            }
        };

        if let Some(v) = decimal("MIN_STAKE_AMOUNT")? {
            self.ledger.min_stake = v;
        }
        if let Some(v) = decimal("MAX_STAKE_AMOUNT")? {
            self.ledger.max_stake = v;
        }
        if let Some(v) = decimal("REALLOCATION_THRESHOLD")? {
            self.ledger.reallocation_threshold = v;
        }
        if let Some(v) = decimal("NOTIFY_EARNINGS_THRESHOLD")? {
            self.scheduler.notify_earnings_threshold = v;
        }
        if let Some(raw) = lookup("AUTO_COMPOUND_INTERVAL") {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid AUTO_COMPOUND_INTERVAL: {raw}"))?;
            self.scheduler.compound_interval_secs = (millis / 1000).max(1);
        }
        Ok(())
    }

    /// Reject configurations the ledger cannot run with.
    pub fn validate(&self) -> Result<(), MorphError> {
        let l = &self.ledger;
        if l.min_stake <= Decimal::ZERO || l.min_stake > l.max_stake {
            return Err(MorphError::Config(format!(
                "stake bounds must satisfy 0 < min <= max (got {} / {})",
                l.min_stake, l.max_stake
            )));
        }
        if l.rate_floor > l.rate_ceiling {
            return Err(MorphError::Config(format!(
                "rate floor {} above ceiling {}",
                l.rate_floor, l.rate_ceiling
            )));
        }
        if l.reallocation_threshold < Decimal::ZERO || l.drift_step < Decimal::ZERO {
            return Err(MorphError::Config("threshold and drift step must be non-negative".into()));
        }
        if self.scheduler.compound_interval_secs == 0 || self.scheduler.notify_interval_secs == 0 {
            return Err(MorphError::Config("scheduler intervals must be positive".into()));
        }
        let mut seen = HashSet::new();
        for s in &self.sources {
            if !seen.insert(s.id.as_str()) {
                return Err(MorphError::Config(format!("duplicate source id: {}", s.id)));
            }
            if s.rate < l.rate_floor || s.rate > l.rate_ceiling {
                return Err(MorphError::Config(format!(
                    "source {} rate {} outside [{}, {}]",
                    s.id, s.rate, l.rate_floor, l.rate_ceiling
                )));
            }
        }
        Ok(())
    }

    /// Configured sources, or the stock set when none are configured.
    pub fn initial_sources(&self) -> Vec<Source> {
        if self.sources.is_empty() {
            default_sources()
        } else {
            self.sources.iter().map(Source::from).collect()
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
