// 7.0 config.rs: every threshold in one validated tree. immutable once the process is up.
// 7.1 load() layers defaults, an optional TOML file, then RISK_* env vars (nested with __).

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::ReconcileParams;
use crate::execution::ExecutionParams;
use crate::kill_switch::KillSwitchParams;
use crate::position::PerpParams;
use crate::risk::RiskLimits;
use crate::sizing::SizingParams;
use crate::types::Leverage;

pub const ENV_PREFIX: &str = "RISK_";
/// Older deployments set the staleness window under this bare name.
pub const LEGACY_STALE_TIMEOUT_ENV: &str = "DATA_STALE_TIMEOUT_SEC";
pub const STALE_TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 10..=120;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub limits: RiskLimits,
    pub sizing: SizingParams,
    pub perps: PerpParams,
    pub execution: ExecutionParams,
    pub reconcile: ReconcileParams,
    pub kill_switch: KillSwitchParams,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid risk limits: {reason}")]
    InvalidLimits { reason: String },

    #[error("invalid sizing settings: {reason}")]
    InvalidSizing { reason: String },

    #[error("invalid perpetuals settings: {reason}")]
    InvalidPerps { reason: String },

    #[error("invalid execution settings: {reason}")]
    InvalidExecution { reason: String },

    #[error("invalid reconciliation settings: {reason}")]
    InvalidReconcile { reason: String },

    #[error("invalid kill switch settings: {reason}")]
    InvalidKillSwitch { reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

fn in_unit_interval(value: Decimal) -> bool {
    value > Decimal::ZERO && value <= Decimal::ONE
}

impl RiskConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RiskConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&[LEGACY_STALE_TIMEOUT_ENV])
                    .map(|_| "limits.data_stale_timeout_secs".into()),
            )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: RiskConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    // 7.2: conservative preset. lower leverage, tighter loss stops
    pub fn conservative() -> Self {
        let mut config = Self::default();
        config.limits.max_position_pct = dec!(0.05);
        config.limits.max_total_exposure_pct = dec!(0.20);
        config.limits.max_daily_drawdown_pct = dec!(0.03);
        config.limits.circuit_breaker_pct = dec!(0.06);
        config.perps.leverage = Leverage::new_unchecked(dec!(3));
        config.perps.min_liquidation_distance = dec!(0.25);
        config.execution.max_slippage_bps = dec!(50);
        config
    }

    // 7.3: aggressive preset. 10x with a lower liquidation floor
    pub fn aggressive() -> Self {
        let mut config = Self::default();
        config.limits.max_position_pct = dec!(0.20);
        config.limits.max_total_exposure_pct = dec!(0.50);
        config.perps.leverage = Leverage::new_unchecked(dec!(10));
        config.perps.min_liquidation_distance = dec!(0.08);
        config.execution.max_slippage_bps = dec!(150);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_limits()?;
        self.validate_sizing()?;
        self.validate_perps()?;
        self.validate_execution()?;
        self.validate_reconcile()?;

        if self.kill_switch.state_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidKillSwitch {
                reason: "state path must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate_limits(&self) -> Result<(), ConfigError> {
        let l = &self.limits;
        let fail = |reason: &str| Err(ConfigError::InvalidLimits { reason: reason.to_string() });

        if l.account_equity <= Decimal::ZERO {
            return fail("account equity must be positive");
        }
        if !in_unit_interval(l.max_position_pct) {
            return fail("max position pct must be in (0, 1]");
        }
        if l.max_total_exposure_pct <= Decimal::ZERO || l.max_total_exposure_pct > dec!(10) {
            return fail("max total exposure pct must be in (0, 10]");
        }
        if l.max_position_pct > l.max_total_exposure_pct {
            return fail("max position pct cannot exceed max total exposure pct");
        }
        if !in_unit_interval(l.max_daily_drawdown_pct) || !in_unit_interval(l.circuit_breaker_pct) {
            return fail("drawdown and circuit breaker pct must be in (0, 1]");
        }
        // breaker is the harder stop
        if l.circuit_breaker_pct < l.max_daily_drawdown_pct {
            return fail("circuit breaker pct must be >= max daily drawdown pct");
        }
        if l.stop_loss_pct <= Decimal::ZERO || l.stop_loss_pct >= Decimal::ONE {
            return fail("stop loss pct must be in (0, 1)");
        }
        if !STALE_TIMEOUT_RANGE_SECS.contains(&l.data_stale_timeout_secs) {
            return fail("data stale timeout must be between 10 and 120 seconds");
        }
        Ok(())
    }

    fn validate_sizing(&self) -> Result<(), ConfigError> {
        let s = &self.sizing;
        let fail = |reason: &str| Err(ConfigError::InvalidSizing { reason: reason.to_string() });

        if !in_unit_interval(s.risk_per_trade) {
            return fail("risk per trade must be in (0, 1]");
        }
        if s.target_volatility <= Decimal::ZERO {
            return fail("target volatility must be positive");
        }
        if !in_unit_interval(s.kelly_fraction) {
            return fail("kelly fraction must be in (0, 1]");
        }
        if s.atr_multiplier <= Decimal::ZERO {
            return fail("ATR multiplier must be positive");
        }
        Ok(())
    }

    fn validate_perps(&self) -> Result<(), ConfigError> {
        let p = &self.perps;
        let fail = |reason: String| Err(ConfigError::InvalidPerps { reason });

        let max_rate = p.leverage.initial_margin_fraction();
        if p.maintenance_margin_rate < Decimal::ZERO || p.maintenance_margin_rate >= max_rate {
            return fail(format!(
                "maintenance margin rate {} must be in [0, {}) at {}",
                p.maintenance_margin_rate, max_rate, p.leverage
            ));
        }
        if p.min_liquidation_distance < Decimal::ZERO || p.min_liquidation_distance >= Decimal::ONE {
            return fail("min liquidation distance must be in [0, 1)".to_string());
        }
        if p.funding_period_hours <= Decimal::ZERO {
            return fail("funding period must be positive".to_string());
        }
        Ok(())
    }

    fn validate_execution(&self) -> Result<(), ConfigError> {
        let e = &self.execution;
        let fail = |reason: &str| Err(ConfigError::InvalidExecution { reason: reason.to_string() });

        if e.maker_fee < Decimal::ZERO || e.taker_fee < Decimal::ZERO {
            return fail("fees must be non-negative");
        }
        if e.base_slippage_bps < Decimal::ZERO
            || e.depth_impact_factor < Decimal::ZERO
            || e.volatility_multiplier < Decimal::ZERO
        {
            return fail("slippage model coefficients must be non-negative");
        }
        if !in_unit_interval(e.fill_threshold) {
            return fail("fill threshold must be in (0, 1]");
        }
        if e.max_slippage_bps <= Decimal::ZERO {
            return fail("max slippage must be positive");
        }
        Ok(())
    }

    fn validate_reconcile(&self) -> Result<(), ConfigError> {
        let r = &self.reconcile;
        let fail = |reason: &str| Err(ConfigError::InvalidReconcile { reason: reason.to_string() });

        if r.interval_secs == 0 {
            return fail("interval must be at least one second");
        }
        if r.store_timeout_ms == 0 {
            return fail("store timeout must be positive");
        }
        if r.drift_tolerance <= Decimal::ZERO {
            return fail("drift tolerance must be positive");
        }
        Ok(())
    }
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Paper,
    Live,
}

impl Environment {
    pub fn config(&self) -> RiskConfig {
        match self {
            Environment::Development => RiskConfig::default(),
            Environment::Paper => RiskConfig::default(),
            Environment::Live => RiskConfig::conservative(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_valid() {
        assert!(RiskConfig::default().validate().is_ok());
    }

    #[test]
    fn test_presets_valid() {
        assert!(RiskConfig::conservative().validate().is_ok());
        assert!(RiskConfig::aggressive().validate().is_ok());
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Paper.config().validate().is_ok());
        assert!(Environment::Live.config().validate().is_ok());
    }

    #[test]
    fn test_breaker_below_drawdown_rejected() {
        let mut config = RiskConfig::default();
        config.limits.circuit_breaker_pct = dec!(0.03);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimits { .. })));
    }

    #[test]
    fn test_stale_timeout_range() {
        let mut config = RiskConfig::default();
        config.limits.data_stale_timeout_secs = 5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimits { .. })));
        config.limits.data_stale_timeout_secs = 120;
        assert!(config.validate().is_ok());
        config.limits.data_stale_timeout_secs = 121;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_maintenance_rate_must_sit_below_margin() {
        let mut config = RiskConfig::default();
        // 125x posts 0.8%; 1% MM would liquidate on entry
        config.perps.leverage = Leverage::new_unchecked(dec!(125));
        config.perps.maintenance_margin_rate = dec!(0.01);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPerps { .. })));
    }

    #[test]
    fn test_negative_fee_rejected() {
        let mut config = RiskConfig::default();
        config.execution.taker_fee = dec!(-0.0001);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidExecution { .. })));
    }

    #[test]
    fn test_zero_drift_tolerance_rejected() {
        let mut config = RiskConfig::default();
        config.reconcile.drift_tolerance = Decimal::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidReconcile { .. })));
    }

    #[test]
    fn test_load_layers_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "risk.toml",
                r#"
                [limits]
                max_position_pct = "0.05"

                [perps]
                leverage = "3"
                "#,
            )?;
            jail.set_env("RISK_EXECUTION__MAX_SLIPPAGE_BPS", "80");
            jail.set_env("DATA_STALE_TIMEOUT_SEC", "30");

            let config = RiskConfig::load(Some(Path::new("risk.toml"))).expect("config loads");
            assert_eq!(config.limits.max_position_pct, dec!(0.05));
            assert_eq!(config.perps.leverage.value(), dec!(3));
            assert_eq!(config.execution.max_slippage_bps, dec!(80));
            assert_eq!(config.limits.data_stale_timeout_secs, 30);
            // untouched fields keep defaults
            assert_eq!(config.limits.circuit_breaker_pct, dec!(0.10));
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.set_env("RISK_LIMITS__DATA_STALE_TIMEOUT_SECS", "500");
            let result = RiskConfig::load(None);
            assert!(matches!(result, Err(ConfigError::InvalidLimits { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_config_serialization() {
        let config = RiskConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RiskConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.limits.max_position_pct, config.limits.max_position_pct);
        assert_eq!(back.perps.leverage, config.perps.leverage);
    }
}
