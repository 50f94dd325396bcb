// =============================================================================
// Rule model — one firm/program's compliance contract, plus breach records
// =============================================================================
//
// A `Rules` value is immutable once resolved for an account. Limit fields are
// optional: `None` means the firm does not enforce that rule kind. Margin
// levels and the warning buffer always have values (serde defaults), so the
// evaluator never needs to guess.
//
// Unknown JSON fields are rejected. A typo'd limit name in a config file or a
// stored rule row must fail loudly, not silently monitor nothing.
// =============================================================================

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::types::{BreachCode, BreachLevel};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_margin_warn_level_pct() -> f64 {
    100.0
}

fn default_margin_critical_level_pct() -> f64 {
    50.0
}

fn default_warn_buffer_pct() -> f64 {
    0.8
}

// =============================================================================
// Rules
// =============================================================================

/// Full compliance contract for one firm/program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rules {
    /// Human-readable label, e.g. "FundedNext Stellar 1-Step".
    pub name: String,

    /// Canonical program identifier within the firm's taxonomy.
    #[serde(default)]
    pub program_id: Option<String>,

    // --- Drawdown -----------------------------------------------------------
    /// Maximum daily drawdown as a percentage of the day-start anchor.
    #[serde(default)]
    pub max_daily_drawdown_pct: Option<f64>,

    /// Maximum total drawdown as a percentage of the starting balance.
    #[serde(default)]
    pub max_total_drawdown_pct: Option<f64>,

    // --- Exposure -----------------------------------------------------------
    /// Maximum notional risk of a single position as a percentage of equity.
    #[serde(default)]
    pub max_risk_per_trade_pct: Option<f64>,

    /// Maximum total open volume across all positions, in lots.
    #[serde(default)]
    pub max_open_lots: Option<f64>,

    /// Maximum number of simultaneously open positions.
    #[serde(default)]
    pub max_positions: Option<u32>,

    // --- Margin -------------------------------------------------------------
    /// Margin level below which a WARN is emitted.
    #[serde(default = "default_margin_warn_level_pct")]
    pub margin_warn_level_pct: f64,

    /// Margin level at or below which a HARD breach is emitted.
    #[serde(default = "default_margin_critical_level_pct")]
    pub margin_critical_level_pct: f64,

    // --- Behaviour flags ----------------------------------------------------
    /// Count daily drawdown on weekdays only (broker calendar).
    #[serde(default)]
    pub trading_days_only: bool,

    /// Every open position must carry a stop loss.
    #[serde(default)]
    pub require_stop_loss: bool,

    /// Maximum account leverage, if the firm caps it.
    #[serde(default)]
    pub max_leverage: Option<f64>,

    // --- Warning shaping ----------------------------------------------------
    /// Warnings fire at `warn_buffer_pct × limit`. Must be in (0, 1].
    #[serde(default = "default_warn_buffer_pct")]
    pub warn_buffer_pct: f64,
}

impl Rules {
    /// Validate the invariants: percentages non-negative, warning buffer in
    /// (0, 1], critical margin level not above the warn level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pct_fields = [
            ("max_daily_drawdown_pct", self.max_daily_drawdown_pct),
            ("max_total_drawdown_pct", self.max_total_drawdown_pct),
            ("max_risk_per_trade_pct", self.max_risk_per_trade_pct),
            ("max_open_lots", self.max_open_lots),
            ("max_leverage", self.max_leverage),
            ("margin_warn_level_pct", Some(self.margin_warn_level_pct)),
            (
                "margin_critical_level_pct",
                Some(self.margin_critical_level_pct),
            ),
        ];
        for (field, value) in pct_fields {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ConfigError::InvalidRules {
                        name: self.name.clone(),
                        reason: format!("{field} must be a non-negative number, got {v}"),
                    });
                }
            }
        }

        if !(self.warn_buffer_pct > 0.0 && self.warn_buffer_pct <= 1.0) {
            return Err(ConfigError::InvalidRules {
                name: self.name.clone(),
                reason: format!(
                    "warn_buffer_pct must be in (0, 1], got {}",
                    self.warn_buffer_pct
                ),
            });
        }

        if self.margin_critical_level_pct > self.margin_warn_level_pct {
            return Err(ConfigError::InvalidRules {
                name: self.name.clone(),
                reason: format!(
                    "margin_critical_level_pct ({}) exceeds margin_warn_level_pct ({})",
                    self.margin_critical_level_pct, self.margin_warn_level_pct
                ),
            });
        }

        Ok(())
    }
}

// =============================================================================
// RuleBreach
// =============================================================================

/// One evaluator finding: a rule that is breached or close to being breached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBreach {
    pub code: BreachCode,
    pub level: BreachLevel,
    pub message: String,
    /// The observed quantity. Absent for advisory findings that make no
    /// numeric claim (e.g. notional unavailable).
    pub value: Option<f64>,
    /// The limit the observation is measured against.
    pub threshold: Option<f64>,
    pub account_id: String,
    /// Broker-local timestamp of the snapshot that produced this finding.
    pub observed_at: DateTime<FixedOffset>,
}

impl RuleBreach {
    pub fn is_hard(&self) -> bool {
        self.level == BreachLevel::Hard
    }
}
