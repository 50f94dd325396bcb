// =============================================================================
// Preset registry — compiled-in Rules for well-known prop firms
// =============================================================================
//
// The registry is assembled once in `main` and shared immutably. Lookup is
// case-insensitive on the normalized firm name (lowercase, trimmed, internal
// whitespace collapsed), and every preset may register aliases under which the
// firm is observed in the wild.
// =============================================================================

use std::collections::HashMap;

use crate::rules::Rules;

/// Normalize a firm name for registry lookup: lowercase, trim, collapse runs
/// of whitespace to a single space.
pub fn normalize_firm(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Immutable map of firm name/alias → preset Rules.
pub struct PresetRegistry {
    by_name: HashMap<String, Rules>,
}

impl PresetRegistry {
    /// Empty registry. Mostly useful in tests.
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    /// Register a preset under its canonical name plus any aliases.
    pub fn register(&mut self, name: &str, aliases: &[&str], rules: Rules) {
        self.by_name.insert(normalize_firm(name), rules.clone());
        for alias in aliases {
            self.by_name.insert(normalize_firm(alias), rules.clone());
        }
    }

    /// Look up a preset by firm name or alias.
    pub fn get(&self, firm: &str) -> Option<&Rules> {
        self.by_name.get(&normalize_firm(firm))
    }

    /// Canonical names and aliases currently registered, sorted.
    pub fn known_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The built-in preset set for firms whose published rules are stable
    /// enough to compile in. Database rows take precedence over these at
    /// resolution time.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            "FTMO",
            &[],
            Rules {
                name: "FTMO Challenge".to_string(),
                program_id: Some("two_step".to_string()),
                max_daily_drawdown_pct: Some(5.0),
                max_total_drawdown_pct: Some(10.0),
                max_risk_per_trade_pct: None,
                max_open_lots: None,
                max_positions: None,
                margin_warn_level_pct: 100.0,
                margin_critical_level_pct: 50.0,
                trading_days_only: false,
                require_stop_loss: false,
                max_leverage: Some(100.0),
                warn_buffer_pct: 0.8,
            },
        );

        registry.register(
            "FundedNext",
            &["funded next"],
            Rules {
                name: "FundedNext Stellar 2-Step".to_string(),
                program_id: Some("stellar_2step".to_string()),
                max_daily_drawdown_pct: Some(5.0),
                max_total_drawdown_pct: Some(10.0),
                max_risk_per_trade_pct: None,
                max_open_lots: None,
                max_positions: None,
                margin_warn_level_pct: 100.0,
                margin_critical_level_pct: 50.0,
                trading_days_only: false,
                require_stop_loss: false,
                max_leverage: Some(100.0),
                warn_buffer_pct: 0.8,
            },
        );

        registry.register(
            "The5ers",
            &["the 5%ers", "the five percenters"],
            Rules {
                name: "The5ers High Stakes".to_string(),
                program_id: Some("high_stakes".to_string()),
                max_daily_drawdown_pct: Some(5.0),
                max_total_drawdown_pct: Some(10.0),
                max_risk_per_trade_pct: Some(2.0),
                max_open_lots: None,
                max_positions: None,
                margin_warn_level_pct: 100.0,
                margin_critical_level_pct: 50.0,
                trading_days_only: false,
                require_stop_loss: true,
                max_leverage: Some(100.0),
                warn_buffer_pct: 0.8,
            },
        );

        registry.register(
            "Funding Pips",
            &["fundingpips"],
            Rules {
                name: "Funding Pips 2-Step".to_string(),
                program_id: Some("two_step".to_string()),
                max_daily_drawdown_pct: Some(5.0),
                max_total_drawdown_pct: Some(10.0),
                max_risk_per_trade_pct: None,
                max_open_lots: None,
                max_positions: None,
                margin_warn_level_pct: 100.0,
                margin_critical_level_pct: 50.0,
                trading_days_only: false,
                require_stop_loss: false,
                max_leverage: Some(100.0),
                warn_buffer_pct: 0.8,
            },
        );

        registry.register(
            "E8 Markets",
            &["e8", "e8 funding"],
            Rules {
                name: "E8 Markets Classic".to_string(),
                program_id: Some("classic".to_string()),
                max_daily_drawdown_pct: Some(5.0),
                max_total_drawdown_pct: Some(8.0),
                max_risk_per_trade_pct: None,
                max_open_lots: None,
                max_positions: None,
                margin_warn_level_pct: 100.0,
                margin_critical_level_pct: 50.0,
                trading_days_only: false,
                require_stop_loss: false,
                max_leverage: Some(100.0),
                warn_buffer_pct: 0.8,
            },
        );

        registry
    }
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        assert_eq!(normalize_firm("  Funded   Next "), "funded next");
        assert_eq!(normalize_firm("FTMO"), "ftmo");
    }

    #[test]
    fn builtin_lookup_by_name_and_alias() {
        let registry = PresetRegistry::builtin();
        assert!(registry.get("FundedNext").is_some());
        assert!(registry.get("funded NEXT").is_some());
        assert!(registry.get("the 5%ers").is_some());
        assert!(registry.get("Unknown Capital").is_none());
    }

    #[test]
    fn builtin_presets_validate() {
        let registry = PresetRegistry::builtin();
        for name in registry.known_names() {
            registry.get(name).unwrap().validate().unwrap();
        }
    }

    #[test]
    fn alias_and_canonical_resolve_to_same_rules() {
        let registry = PresetRegistry::builtin();
        let a = registry.get("e8").unwrap();
        let b = registry.get("E8 Markets").unwrap();
        assert_eq!(a.name, b.name);
    }
}
