// 7.0 config.rs: all engine settings in one place. oracle, funding, options, liquidation, audit.
// 7.1 presets per environment, plus json loading for deployments.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::funding::FundingParams;
use crate::mark_price::OracleParams;
use crate::options::OptionParams;
use crate::types::Hbar;

/** 7.2: insurance fund settings. the fund absorbs bad debt from liquidations */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidationConfig {
    // Balance the insurance fund starts with
    pub insurance_fund_seed: Hbar,
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            insurance_fund_seed: Hbar::zero(),
        }
    }
}

// Ledger audit delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    // Topic the outbox publishes to
    pub topic_id: String,
    // Deliveries attempted before a message is dropped
    pub max_attempts: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            topic_id: "0.0.0".to_string(),
            max_attempts: 3,
        }
    }
}

// The complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub oracle: OracleParams,
    pub funding: FundingParams,
    pub options: OptionParams,
    pub liquidation: LiquidationConfig,
    pub audit: AuditConfig,
    // Events kept in memory before the oldest are dropped
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            oracle: OracleParams::default(),
            funding: FundingParams::default(),
            options: OptionParams::default(),
            liquidation: LiquidationConfig::default(),
            audit: AuditConfig::default(),
            max_events: 10_000,
        }
    }
}

impl EngineConfig {
    // Testnet: seeded insurance fund, shorter history for quick resets
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.liquidation.insurance_fund_seed = Hbar::new(dec!(1_000));
        config.audit.topic_id = "0.0.4500000".to_string();
        config.max_events = 1_000;
        config
    }

    // Mainnet: slower ema and more delivery retries
    pub fn mainnet_conservative() -> Self {
        let mut config = Self::default();
        config.oracle.ema_half_life_ms = 300_000;
        config.liquidation.insurance_fund_seed = Hbar::new(dec!(10_000));
        config.audit.max_attempts = 10;
        config
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        // oracle checks
        if self.oracle.ema_half_life_ms <= 0 {
            return Err(ConfigError::InvalidOracle {
                reason: "EMA half-life must be positive".to_string(),
            });
        }
        if self.oracle.price_floor <= Decimal::ZERO
            || self.oracle.price_ceiling >= Decimal::ONE
            || self.oracle.price_floor >= self.oracle.price_ceiling
        {
            return Err(ConfigError::InvalidOracle {
                reason: "Price bounds must satisfy 0 < floor < ceiling < 1".to_string(),
            });
        }

        // funding checks
        if self.funding.max_hourly_rate <= Decimal::ZERO || self.funding.interest_clamp < Decimal::ZERO {
            return Err(ConfigError::InvalidFunding {
                reason: "Rate caps must be positive".to_string(),
            });
        }
        if self.funding.interval_ms <= 0 || self.funding.history_cap == 0 {
            return Err(ConfigError::InvalidFunding {
                reason: "Interval and history cap must be positive".to_string(),
            });
        }

        // options checks
        if !(self.options.default_volatility.is_finite() && self.options.default_volatility > 0.0) {
            return Err(ConfigError::InvalidOptions {
                reason: "Default volatility must be positive".to_string(),
            });
        }
        if !(self.options.days_per_year.is_finite() && self.options.days_per_year > 0.0) {
            return Err(ConfigError::InvalidOptions {
                reason: "Days per year must be positive".to_string(),
            });
        }

        if self.liquidation.insurance_fund_seed.is_negative() {
            return Err(ConfigError::InvalidLiquidation {
                reason: "Insurance seed cannot be negative".to_string(),
            });
        }

        if self.audit.topic_id.trim().is_empty() || self.audit.max_attempts == 0 {
            return Err(ConfigError::InvalidAudit {
                reason: "Audit needs a topic and at least one attempt".to_string(),
            });
        }

        if self.max_events == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "Event log needs capacity".to_string(),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid oracle config: {reason}")]
    InvalidOracle { reason: String },
    #[error("Invalid funding config: {reason}")]
    InvalidFunding { reason: String },
    #[error("Invalid options config: {reason}")]
    InvalidOptions { reason: String },
    #[error("Invalid liquidation config: {reason}")]
    InvalidLiquidation { reason: String },
    #[error("Invalid audit config: {reason}")]
    InvalidAudit { reason: String },
    #[error("Invalid engine config: {reason}")]
    InvalidEngine { reason: String },
    #[error("Config parse error: {0}")]
    Parse(String),
    #[error("Cannot read config {path}: {reason}")]
    Io { path: String, reason: String },
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> EngineConfig {
        match self {
            Environment::Development => EngineConfig::default(),
            Environment::Testnet => EngineConfig::testnet(),
            Environment::Mainnet => EngineConfig::mainnet_conservative(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.oracle.ema_half_life_ms, 150_000);
        assert_eq!(config.funding.history_cap, 168);
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Testnet.config().validate().is_ok());
        assert!(Environment::Mainnet.config().validate().is_ok());
        assert_eq!(Environment::Testnet.config().liquidation.insurance_fund_seed.value(), dec!(1000));
    }

    #[test]
    fn test_invalid_price_bounds() {
        let mut config = EngineConfig::default();
        config.oracle.price_floor = dec!(0.6);
        config.oracle.price_ceiling = dec!(0.4);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOracle { .. })));
    }

    #[test]
    fn test_invalid_volatility() {
        let mut config = EngineConfig::default();
        config.options.default_volatility = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOptions { .. })));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{"max_events": 50}"#).unwrap();
        assert_eq!(config.max_events, 50);
        assert_eq!(config.funding, FundingParams::default());
    }

    #[test]
    fn test_partial_nested_json_uses_defaults() {
        let raw = r#"{"oracle": {"ema_half_life_ms": 60000}, "funding": {"history_cap": 24}, "options": {}, "audit": {"max_attempts": 5}}"#;
        let config = EngineConfig::from_json_str(raw).unwrap();
        assert_eq!(config.oracle.ema_half_life_ms, 60_000);
        assert_eq!(config.oracle.price_floor, dec!(0.001));
        assert_eq!(config.funding.history_cap, 24);
        assert_eq!(config.funding.max_hourly_rate, FundingParams::default().max_hourly_rate);
        assert_eq!(config.options, OptionParams::default());
        assert_eq!(config.audit.max_attempts, 5);
        assert_eq!(config.audit.topic_id, AuditConfig::default().topic_id);
    }

    #[test]
    fn test_json_validation_runs() {
        let result = EngineConfig::from_json_str(r#"{"max_events": 0}"#);
        assert!(matches!(result, Err(ConfigError::InvalidEngine { .. })));
        assert!(matches!(EngineConfig::from_json_str("not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::mainnet_conservative();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
