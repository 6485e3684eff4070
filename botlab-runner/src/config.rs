//! Serializable batch configuration, loaded from TOML.
//!
//! ```toml
//! [batch]
//! start = "2024-01-01T00:00:00Z"
//! end = "2024-02-01T00:00:00Z"
//! timeframe = "1h"
//!
//! [account]
//! starting_balance = 10000.0
//!
//! [data]
//! source = "synthetic"
//!
//! [[instances]]
//! name = "btc-sma"
//! symbol = "BTCUSDT"
//! bot = { type = "sma_cross", fast = 10, slow = 40, quantity = 0.5 }
//!
//! [[grids]]
//! name = "sma"
//! symbols = ["BTCUSDT", "ETHUSDT"]
//! bot = "sma_cross"
//! params = { fast = [5, 10], slow = [20, 50], quantity = [1.0] }
//! ```
//!
//! Every instance runs on the batch timeframe, and a batch holds one bot
//! type; the controller rejects anything else at setup.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use botlab_core::account::{AccountConfig, PositionMode};
use botlab_core::bot::{BotBlueprint, BotParams, InstanceSpec};
use botlab_core::domain::{Precision, TimeFrame};
use botlab_core::input::MarketRef;
use botlab_core::loader::ChunkGranularity;
use botlab_core::window::GapFill;

/// Unique identifier for a batch (content-addressable hash).
pub type BatchId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionKind {
    #[default]
    F64,
    Decimal,
}

/// What happens to open positions when the clock reaches the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeMode {
    /// Close everything at the last mark.
    #[default]
    Liquidate,
    /// Leave positions open; they count as unknown trades.
    MarkToMarket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSection {
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
    pub timeframe: TimeFrame,
    #[serde(default)]
    pub precision: PrecisionKind,
    #[serde(default)]
    pub gap_fill: GapFill,
    #[serde(default)]
    pub chunk: ChunkGranularity,
    #[serde(default)]
    pub finalize: FinalizeMode,
    /// Publish progress every this many bars.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

fn default_progress_every() -> u64 {
    100
}

/// Account settings shared by every instance of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSection {
    pub starting_balance: f64,
    pub currency: String,
    pub max_balance_drawdown: Option<f64>,
    pub max_equity_drawdown: Option<f64>,
    pub position_mode: PositionMode,
    pub can_position_change_directions: bool,
}

impl Default for AccountSection {
    fn default() -> Self {
        Self {
            starting_balance: 10_000.0,
            currency: "USD".into(),
            max_balance_drawdown: None,
            max_equity_drawdown: None,
            position_mode: PositionMode::Netting,
            can_position_change_directions: false,
        }
    }
}

impl AccountSection {
    pub fn to_account_config<P: Precision>(&self) -> Result<AccountConfig<P>, ConfigError> {
        let convert = |name: &str, v: f64| {
            P::from_f64(v).ok_or_else(|| ConfigError::Invalid(format!("account.{name} = {v} is not representable")))
        };
        let fraction = |name: &str, v: Option<f64>| -> Result<Option<P>, ConfigError> {
            match v {
                None => Ok(None),
                Some(v) if v > 0.0 && v <= 1.0 => convert(name, v).map(Some),
                Some(v) => Err(ConfigError::Invalid(format!("account.{name} must be in (0, 1], got {v}"))),
            }
        };
        if !(self.starting_balance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "account.starting_balance must be positive, got {}",
                self.starting_balance
            )));
        }
        Ok(AccountConfig {
            starting_balance: convert("starting_balance", self.starting_balance)?,
            currency: self.currency.clone(),
            max_balance_drawdown: fraction("max_balance_drawdown", self.max_balance_drawdown)?,
            max_equity_drawdown: fraction("max_equity_drawdown", self.max_equity_drawdown)?,
            position_mode: self.position_mode,
            can_position_change_directions: self.can_position_change_directions,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// `{dir}/{exchange}/{area}/{symbol}/{timeframe}.csv`
    Csv,
    /// Deterministic random walk.
    #[default]
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub source: DataSource,
    pub dir: PathBuf,
    pub seed: u64,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            source: DataSource::Synthetic,
            dir: PathBuf::from("data"),
            seed: 0,
        }
    }
}

fn default_exchange() -> String {
    "sim".into()
}

fn default_area() -> String {
    "spot".into()
}

/// One explicitly configured instance. Instances always run on the batch
/// timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_area")]
    pub area: String,
    pub symbol: String,
    pub bot: BotParams,
}

/// Cartesian product of bot parameters × symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamGrid {
    pub name: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_area")]
    pub area: String,
    pub symbols: Vec<String>,
    /// Bot type tag, e.g. `sma_cross`.
    pub bot: String,
    /// Parameter name → candidate values.
    pub params: BTreeMap<String, Vec<Value>>,
}

impl ParamGrid {
    /// Number of parameter combinations × symbols, before validation.
    pub fn size(&self) -> usize {
        self.params.values().map(Vec::len).product::<usize>() * self.symbols.len()
    }

    /// All valid instances of this grid. Combinations the bot rejects (e.g.
    /// `fast >= slow`) are skipped.
    pub fn expand(&self, batch_timeframe: TimeFrame) -> Result<Vec<InstanceSpec>, ConfigError> {
        let mut combos: Vec<Vec<(&str, &Value)>> = vec![Vec::new()];
        for (name, values) in &self.params {
            if values.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "grid '{}': parameter '{name}' has no values",
                    self.name
                )));
            }
            combos = combos
                .into_iter()
                .flat_map(|combo| {
                    values.iter().map(move |v| {
                        let mut next = combo.clone();
                        next.push((name.as_str(), v));
                        next
                    })
                })
                .collect();
        }

        let mut out = Vec::new();
        for combo in &combos {
            let mut object = serde_json::Map::new();
            object.insert("type".into(), Value::String(self.bot.clone()));
            for (name, value) in combo {
                object.insert((*name).to_string(), (*value).clone());
            }
            let params: BotParams = serde_json::from_value(Value::Object(object))
                .map_err(|e| ConfigError::Invalid(format!("grid '{}': {e}", self.name)))?;
            if BotBlueprint::<f64>::validate(&params).is_err() {
                continue;
            }
            let label: Vec<String> = combo.iter().map(|(k, v)| format!("{k}={v}")).collect();
            for symbol in &self.symbols {
                out.push(InstanceSpec::new(
                    format!("{}:{}:{}", self.name, symbol, label.join(",")),
                    MarketRef::new(&self.exchange, &self.area, symbol, batch_timeframe),
                    params.clone(),
                ));
            }
        }
        Ok(out)
    }
}

/// Complete batch description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub batch: BatchSection,
    #[serde(default)]
    pub account: AccountSection,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    #[serde(default)]
    pub grids: Vec<ParamGrid>,
}

impl BatchConfig {
    /// Load a batch config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a batch config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Deterministic hash of the whole configuration: identical configs give
    /// identical ids.
    pub fn batch_id(&self) -> BatchId {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.batch;
        if b.start >= b.end {
            return Err(ConfigError::Invalid(format!(
                "batch.start {} must be before batch.end {}",
                b.start, b.end
            )));
        }
        for (name, t) in [("start", b.start), ("end", b.end)] {
            if !b.timeframe.is_aligned(t) {
                return Err(ConfigError::Invalid(format!(
                    "batch.{name} {t} is not aligned to the {} timeframe",
                    b.timeframe
                )));
            }
        }
        if b.progress_every == 0 {
            return Err(ConfigError::Invalid("batch.progress_every must be at least 1".into()));
        }
        if self.instances.is_empty() && self.grids.is_empty() {
            return Err(ConfigError::Invalid("no [[instances]] or [[grids]] configured".into()));
        }
        Ok(())
    }

    /// Explicit instances followed by every grid expansion, with unique names.
    pub fn instance_specs(&self) -> Result<Vec<InstanceSpec>, ConfigError> {
        let tf = self.batch.timeframe;
        let mut specs: Vec<InstanceSpec> = self
            .instances
            .iter()
            .map(|i| {
                InstanceSpec::new(
                    i.name.clone(),
                    MarketRef::new(&i.exchange, &i.area, &i.symbol, tf),
                    i.bot.clone(),
                )
            })
            .collect();
        for grid in &self.grids {
            specs.extend(grid.expand(tf)?);
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate instance name '{}'", spec.name)));
            }
        }
        if specs.is_empty() {
            return Err(ConfigError::Invalid("grids expanded to zero valid instances".into()));
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"
[batch]
start = "2024-01-01T00:00:00Z"
end = "2024-01-03T00:00:00Z"
timeframe = "1h"
precision = "decimal"
chunk = { hours = 6 }

[account]
starting_balance = 5000.0
max_equity_drawdown = 0.3

[data]
source = "csv"
dir = "fixtures"

[[instances]]
name = "base"
symbol = "BTC"
bot = { type = "sma_cross", fast = 10, slow = 40, quantity = 1.0 }

[[grids]]
name = "sma"
symbols = ["BTC", "ETH"]
bot = "sma_cross"
params = { fast = [5, 20], slow = [20, 50], quantity = [1.0] }
"#;

    #[test]
    fn parses_every_section() {
        let config = BatchConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.batch.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(config.batch.timeframe, TimeFrame::HOUR);
        assert_eq!(config.batch.precision, PrecisionKind::Decimal);
        assert_eq!(config.batch.chunk, ChunkGranularity::Hours(6));
        assert_eq!(config.batch.finalize, FinalizeMode::Liquidate);
        assert_eq!(config.batch.progress_every, 100);
        assert_eq!(config.account.currency, "USD");
        assert_eq!(config.data.source, DataSource::Csv);
        assert_eq!(config.instances[0].exchange, "sim");
    }

    #[test]
    fn grid_skips_invalid_combinations() {
        let config = BatchConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.grids[0].size(), 8);
        let specs = config.instance_specs().unwrap();
        // (5,20) (5,50) (20,50) × 2 symbols + 1 explicit; (20,20) is dropped.
        assert_eq!(specs.len(), 7);
        assert_eq!(specs[0].name, "base");
        assert!(specs.iter().all(|s| s.market.timeframe == TimeFrame::HOUR));
        assert!(specs
            .iter()
            .all(|s| !matches!(s.params, BotParams::SmaCross { fast, slow, .. } if fast >= slow)));
    }

    #[test]
    fn batch_id_is_deterministic_and_sensitive() {
        let a = BatchConfig::from_toml(SAMPLE).unwrap();
        let mut b = a.clone();
        assert_eq!(a.batch_id(), b.batch_id());
        b.account.starting_balance = 6000.0;
        assert_ne!(a.batch_id(), b.batch_id());
    }

    #[test]
    fn rejects_misaligned_range() {
        let bad = SAMPLE.replace("2024-01-03T00:00:00Z", "2024-01-03T00:30:00Z");
        let err = BatchConfig::from_toml(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("not aligned")));
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut config = BatchConfig::from_toml(SAMPLE).unwrap();
        let mut twin = config.instances[0].clone();
        twin.symbol = "ETH".into();
        config.instances.push(twin);
        let err = config.instance_specs().unwrap_err();
        assert!(err.to_string().contains("duplicate instance name 'base'"));
    }

    #[test]
    fn instance_timeframe_override_is_rejected() {
        let bad = SAMPLE.replace(
            "name = \"base\"\nsymbol = \"BTC\"",
            "name = \"base\"\nsymbol = \"BTC\"\ntimeframe = \"1d\"",
        );
        assert_ne!(bad, SAMPLE);
        let err = BatchConfig::from_toml(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
        assert!(err.to_string().contains("timeframe"), "{err}");
    }

    #[test]
    fn account_section_converts_to_decimal() {
        let config = BatchConfig::from_toml(SAMPLE).unwrap();
        let account = config.account.to_account_config::<rust_decimal::Decimal>().unwrap();
        assert_eq!(account.starting_balance, rust_decimal::Decimal::from(5000));
        assert!(account.max_equity_drawdown.is_some());

        let mut bad = config.account.clone();
        bad.max_balance_drawdown = Some(1.5);
        assert!(bad.to_account_config::<f64>().is_err());
    }
}
