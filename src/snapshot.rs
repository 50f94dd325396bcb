// =============================================================================
// Account snapshot — uniform read-only view of one trading account
// =============================================================================
//
// Produced by a platform adapter, then enriched with day-start fields by the
// anchor tracker before evaluation. Monetary values are in account currency as
// normal decimal units; volumes in lots; `observed_at_server` in broker-local
// time, everything else UTC.
// =============================================================================

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Platform, Side};

// =============================================================================
// Position
// =============================================================================

/// A single open position as reported by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Platform-assigned ticket/deal identifier.
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub volume_lots: f64,
    pub open_price: f64,
    pub current_price: f64,
    #[serde(default)]
    pub stop_loss_price: Option<f64>,
    #[serde(default)]
    pub take_profit_price: Option<f64>,
    pub unrealized_pl: f64,
    pub open_time: DateTime<Utc>,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub swap: f64,
    /// Units of the base instrument per lot. Symbol metadata supplied by the
    /// adapter; absent when the platform did not report it.
    #[serde(default)]
    pub contract_size: Option<f64>,
}

impl Position {
    /// Notional value in account currency, when the contract size is known.
    pub fn notional(&self) -> Option<f64> {
        self.contract_size
            .map(|cs| self.volume_lots.abs() * cs * self.current_price)
    }

    pub fn has_stop_loss(&self) -> bool {
        self.stop_loss_price.is_some()
    }
}

// =============================================================================
// AccountSnapshot
// =============================================================================

/// Instantaneous observation of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    // --- Identity -----------------------------------------------------------
    pub account_id: String,
    pub platform: Platform,
    pub currency: String,

    // --- Money --------------------------------------------------------------
    /// Realized balance only.
    pub balance: f64,
    /// Balance plus unrealized floating P/L.
    pub equity: f64,
    pub margin_used: f64,
    pub margin_free: f64,

    // --- Day-start fields (filled by the anchor tracker) --------------------
    #[serde(default)]
    pub day_start_balance: Option<f64>,
    #[serde(default)]
    pub day_start_equity: Option<f64>,

    // --- Account leverage, when the platform exposes it ---------------------
    #[serde(default)]
    pub leverage: Option<f64>,

    pub positions: Vec<Position>,

    // --- Timing -------------------------------------------------------------
    /// Broker-local observation time.
    pub observed_at_server: DateTime<FixedOffset>,
    /// Our wall clock at observation time.
    pub observed_at_wall: DateTime<Utc>,
}

impl AccountSnapshot {
    /// Margin level as a percentage (`100 × equity / margin_used`).
    ///
    /// `None` when no margin is in use — the level is infinite and margin
    /// checks do not apply.
    pub fn margin_level_pct(&self) -> Option<f64> {
        if self.margin_used > 0.0 {
            Some(100.0 * self.equity / self.margin_used)
        } else {
            None
        }
    }

    /// The per-day drawdown reference: the higher of day-start balance and
    /// day-start equity. `None` until the anchor tracker has run.
    pub fn day_start_anchor(&self) -> Option<f64> {
        match (self.day_start_balance, self.day_start_equity) {
            (Some(b), Some(e)) => Some(b.max(e)),
            _ => None,
        }
    }

    /// Sum of unrealized P/L across open positions.
    pub fn unrealized_total(&self) -> f64 {
        self.positions.iter().map(|p| p.unrealized_pl).sum()
    }

    /// Total open volume in lots.
    pub fn total_open_lots(&self) -> f64 {
        self.positions.iter().map(|p| p.volume_lots.abs()).sum()
    }
}
