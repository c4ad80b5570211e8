use crate::error::BacktestError;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment keys read by [`BacktestConfig::from_settings_map`].
pub const SETTING_KEYS: [&str; 10] = [
    "INITIAL_BALANCE",
    "RISK_PER_TRADE",
    "STOP_LOSS_PCT",
    "EMA_FAST",
    "EMA_SLOW",
    "RSI_PERIOD",
    "VOLUME_MULTIPLIER",
    "ATR_PERIOD",
    "MIN_ATR_RATIO",
    "EQUITY_RULE",
];

/// How a closed position feeds back into equity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquityRule {
    /// Equity becomes the liquidated proceeds, `quantity * exit`.
    ReplaceWithProceeds,
    /// Equity moves by the realized profit only.
    AccumulateProfit,
}

impl EquityRule {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "replace_with_proceeds" | "proceeds" => Ok(Self::ReplaceWithProceeds),
            "accumulate_profit" | "profit" => Ok(Self::AccumulateProfit),
            other => Err(anyhow!(
                "EQUITY_RULE must be replace_with_proceeds or accumulate_profit (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ReplaceWithProceeds => "replace_with_proceeds",
            Self::AccumulateProfit => "accumulate_profit",
        }
    }
}

/// Scalar inputs of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_balance: f64,
    pub risk_per_trade: f64,
    pub stop_loss_pct: f64,
    pub ema_fast_span: usize,
    pub ema_slow_span: usize,
    pub rsi_period: usize,
    pub volume_multiplier: f64,
    pub atr_period: usize,
    /// Minimum ATR / close ratio for entries; zero disables the filter.
    pub min_atr_ratio: f64,
    pub equity_rule: EquityRule,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10.0,
            risk_per_trade: 0.02,
            stop_loss_pct: 0.01,
            ema_fast_span: 8,
            ema_slow_span: 21,
            rsi_period: 14,
            volume_multiplier: 1.0,
            atr_period: 14,
            min_atr_ratio: 0.0,
            equity_rule: EquityRule::ReplaceWithProceeds,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), BacktestError> {
        if !self.initial_balance.is_finite() || self.initial_balance <= 0.0 {
            return Err(BacktestError::config(
                "initial_balance",
                format!("must be a positive number (value: {})", self.initial_balance),
            ));
        }
        if !self.risk_per_trade.is_finite() || self.risk_per_trade <= 0.0 {
            return Err(BacktestError::config(
                "risk_per_trade",
                format!("must be a positive number (value: {})", self.risk_per_trade),
            ));
        }
        if !self.stop_loss_pct.is_finite() || !(0.0..1.0).contains(&self.stop_loss_pct) {
            return Err(BacktestError::config(
                "stop_loss_pct",
                format!("must be within [0, 1) (value: {})", self.stop_loss_pct),
            ));
        }
        if self.ema_fast_span == 0 {
            return Err(BacktestError::config(
                "ema_fast_span",
                "must be greater than zero",
            ));
        }
        if self.ema_slow_span == 0 {
            return Err(BacktestError::config(
                "ema_slow_span",
                "must be greater than zero",
            ));
        }
        if self.rsi_period == 0 {
            return Err(BacktestError::config("rsi_period", "must be greater than zero"));
        }
        if self.atr_period == 0 {
            return Err(BacktestError::config("atr_period", "must be greater than zero"));
        }
        if !self.volume_multiplier.is_finite() || self.volume_multiplier < 0.0 {
            return Err(BacktestError::config(
                "volume_multiplier",
                format!("must be non-negative (value: {})", self.volume_multiplier),
            ));
        }
        if !self.min_atr_ratio.is_finite() || self.min_atr_ratio < 0.0 {
            return Err(BacktestError::config(
                "min_atr_ratio",
                format!("must be non-negative (value: {})", self.min_atr_ratio),
            ));
        }
        Ok(())
    }

    /// Reads the run configuration from environment-style settings. Absent or
    /// blank keys keep their defaults. Values are parsed but not range-checked,
    /// so later overrides can still repair them; call [`Self::validate`] once
    /// the configuration is final.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            initial_balance: optional_setting_f64(
                settings,
                "INITIAL_BALANCE",
                defaults.initial_balance,
            )?,
            risk_per_trade: optional_setting_f64(
                settings,
                "RISK_PER_TRADE",
                defaults.risk_per_trade,
            )?,
            stop_loss_pct: optional_setting_f64(settings, "STOP_LOSS_PCT", defaults.stop_loss_pct)?,
            ema_fast_span: optional_setting_usize(settings, "EMA_FAST", defaults.ema_fast_span)?,
            ema_slow_span: optional_setting_usize(settings, "EMA_SLOW", defaults.ema_slow_span)?,
            rsi_period: optional_setting_usize(settings, "RSI_PERIOD", defaults.rsi_period)?,
            volume_multiplier: optional_setting_f64(
                settings,
                "VOLUME_MULTIPLIER",
                defaults.volume_multiplier,
            )?,
            atr_period: optional_setting_usize(settings, "ATR_PERIOD", defaults.atr_period)?,
            min_atr_ratio: optional_setting_f64(settings, "MIN_ATR_RATIO", defaults.min_atr_ratio)?,
            equity_rule: match setting(settings, "EQUITY_RULE") {
                Some(raw) => EquityRule::parse(raw)?,
                None => defaults.equity_rule,
            },
        })
    }

    /// Overlays numeric sweep parameters on top of this configuration.
    pub fn with_parameters(&self, parameters: &HashMap<String, f64>) -> Self {
        use crate::param_utils::*;

        Self {
            initial_balance: get_param_f64(parameters, "initialBalance", self.initial_balance),
            risk_per_trade: get_param_f64(parameters, "riskPerTrade", self.risk_per_trade),
            stop_loss_pct: get_param_f64(parameters, "stopLossPct", self.stop_loss_pct),
            ema_fast_span: get_param_usize(parameters, "emaFast", self.ema_fast_span),
            ema_slow_span: get_param_usize(parameters, "emaSlow", self.ema_slow_span),
            rsi_period: get_param_usize(parameters, "rsiPeriod", self.rsi_period),
            volume_multiplier: get_param_f64(
                parameters,
                "volumeMultiplier",
                self.volume_multiplier,
            ),
            atr_period: get_param_usize(parameters, "atrPeriod", self.atr_period),
            min_atr_ratio: get_param_f64(parameters, "minAtrRatio", self.min_atr_ratio),
            equity_rule: self.equity_rule,
        }
    }
}

fn setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
) -> Result<f64> {
    let Some(raw) = setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    Ok(value)
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize> {
    let Some(raw) = setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!(
            "Setting {} must be a non-negative number (value: {})",
            key,
            raw
        ));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_settings_yield_defaults() {
        let config = BacktestConfig::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(config, BacktestConfig::default());
    }

    #[test]
    fn settings_override_defaults() {
        let config = BacktestConfig::from_settings_map(&settings(&[
            ("EMA_FAST", "5"),
            ("EMA_SLOW", " 34 "),
            ("RISK_PER_TRADE", "0.01"),
            ("STOP_LOSS_PCT", ""),
            ("EQUITY_RULE", "accumulate_profit"),
        ]))
        .unwrap();
        assert_eq!(config.ema_fast_span, 5);
        assert_eq!(config.ema_slow_span, 34);
        assert_eq!(config.risk_per_trade, 0.01);
        assert_eq!(config.stop_loss_pct, 0.01);
        assert_eq!(config.equity_rule, EquityRule::AccumulateProfit);
    }

    #[test]
    fn malformed_settings_are_rejected() {
        assert!(BacktestConfig::from_settings_map(&settings(&[("EMA_FAST", "fast")])).is_err());
        assert!(BacktestConfig::from_settings_map(&settings(&[("EMA_FAST", "2.5")])).is_err());
        assert!(BacktestConfig::from_settings_map(&settings(&[("EQUITY_RULE", "x")])).is_err());
        assert!(BacktestConfig::from_settings_map(&settings(&[("STOP_LOSS_PCT", "inf")])).is_err());
    }

    #[test]
    fn out_of_range_settings_are_left_for_validation() {
        let mut config = BacktestConfig::from_settings_map(&settings(&[
            ("EMA_FAST", "0"),
            ("INITIAL_BALANCE", "-1"),
        ]))
        .unwrap();
        assert_eq!(config.ema_fast_span, 0);
        assert!(config.validate().is_err());

        config.ema_fast_span = 5;
        config.initial_balance = 25.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_flags_the_offending_field() {
        let config = BacktestConfig {
            initial_balance: 0.0,
            ..BacktestConfig::default()
        };
        match config.validate() {
            Err(BacktestError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "initial_balance")
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let config = BacktestConfig {
            stop_loss_pct: 1.0,
            ..BacktestConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BacktestConfig {
            stop_loss_pct: 0.0,
            ..BacktestConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn with_parameters_overlays_only_present_keys() {
        let base = BacktestConfig::default();
        let mut parameters = HashMap::new();
        parameters.insert("emaFast".to_string(), 5.0);
        parameters.insert("stopLossPct".to_string(), 0.02);
        let config = base.with_parameters(&parameters);
        assert_eq!(config.ema_fast_span, 5);
        assert_eq!(config.stop_loss_pct, 0.02);
        assert_eq!(config.ema_slow_span, base.ema_slow_span);
        assert_eq!(config.initial_balance, base.initial_balance);
    }
}
