// =============================================================================
// Shared types used across the propwatch monitoring engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trading platform a monitored account lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mt5,
    Ctrader,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mt5 => write!(f, "mt5"),
            Self::Ctrader => write!(f, "ctrader"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mt5" | "metatrader5" => Ok(Self::Mt5),
            "ctrader" => Ok(Self::Ctrader),
            other => Err(format!("unknown platform '{other}' (use 'mt5' or 'ctrader')")),
        }
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// The closed set of rule kinds the evaluator can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreachCode {
    #[serde(rename = "DAILY_DD")]
    DailyDd,
    #[serde(rename = "TOTAL_DD")]
    TotalDd,
    #[serde(rename = "RISK_PER_TRADE")]
    RiskPerTrade,
    #[serde(rename = "MAX_LOTS")]
    MaxLots,
    #[serde(rename = "MAX_POSITIONS")]
    MaxPositions,
    #[serde(rename = "MARGIN_LEVEL")]
    MarginLevel,
    #[serde(rename = "MISSING_STOP_LOSS")]
    MissingStopLoss,
    #[serde(rename = "LEVERAGE")]
    Leverage,
}

impl std::fmt::Display for BreachCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DailyDd => "DAILY_DD",
            Self::TotalDd => "TOTAL_DD",
            Self::RiskPerTrade => "RISK_PER_TRADE",
            Self::MaxLots => "MAX_LOTS",
            Self::MaxPositions => "MAX_POSITIONS",
            Self::MarginLevel => "MARGIN_LEVEL",
            Self::MissingStopLoss => "MISSING_STOP_LOSS",
            Self::Leverage => "LEVERAGE",
        };
        write!(f, "{s}")
    }
}

/// Severity of a breach: HARD means a limit was met or exceeded, WARN means
/// the proximity threshold was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreachLevel {
    Warn,
    Hard,
}

impl std::fmt::Display for BreachLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warn => write!(f, "WARN"),
            Self::Hard => write!(f, "HARD"),
        }
    }
}
