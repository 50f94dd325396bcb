// =============================================================================
// Program taxonomy — canonical program ids per firm, with observed aliases
// =============================================================================
//
// An alias is any externally observed string that maps to a canonical program
// id ("Stellar 1 Step" → "stellar_1step"). Only the resolver and the review
// path consult the taxonomy; the monitor engine always sees resolved Rules.
// =============================================================================

use std::collections::HashMap;

use crate::presets::normalize_firm;

/// Program catalogue for one firm.
#[derive(Debug, Clone, Default)]
pub struct FirmPrograms {
    /// Canonical id → display name.
    pub official_programs: HashMap<String, String>,
    /// Normalized observed alias → canonical id.
    pub aliases: HashMap<String, String>,
}

/// Firm → program catalogue. Immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct ProgramTaxonomy {
    firms: HashMap<String, FirmPrograms>,
}

impl ProgramTaxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_program(&mut self, firm: &str, id: &str, display_name: &str) {
        self.firms
            .entry(normalize_firm(firm))
            .or_default()
            .official_programs
            .insert(id.to_string(), display_name.to_string());
    }

    pub fn add_alias(&mut self, firm: &str, alias: &str, id: &str) {
        self.firms
            .entry(normalize_firm(firm))
            .or_default()
            .aliases
            .insert(normalize_firm(alias), id.to_string());
    }

    /// Map an observed program string to its canonical id for `firm`.
    ///
    /// An exact official id passes through unchanged; a known alias maps to
    /// its id; anything else is returned as observed (the rule store may know
    /// programs the compiled taxonomy does not).
    pub fn canonical_program_id(&self, firm: &str, observed: &str) -> String {
        let Some(programs) = self.firms.get(&normalize_firm(firm)) else {
            return observed.to_string();
        };
        if programs.official_programs.contains_key(observed) {
            return observed.to_string();
        }
        programs
            .aliases
            .get(&normalize_firm(observed))
            .cloned()
            .unwrap_or_else(|| observed.to_string())
    }

    /// Display name for a canonical program id, when known.
    pub fn display_name(&self, firm: &str, id: &str) -> Option<&str> {
        self.firms
            .get(&normalize_firm(firm))?
            .official_programs
            .get(id)
            .map(String::as_str)
    }

    /// Built-in taxonomy for the compiled presets.
    pub fn builtin() -> Self {
        let mut tax = Self::new();

        tax.add_program("FundedNext", "stellar_1step", "Stellar 1-Step");
        tax.add_program("FundedNext", "stellar_2step", "Stellar 2-Step");
        tax.add_program("FundedNext", "stellar_lite", "Stellar Lite");
        tax.add_alias("FundedNext", "Stellar 1 Step", "stellar_1step");
        tax.add_alias("FundedNext", "stellar one step", "stellar_1step");
        tax.add_alias("FundedNext", "Stellar 2 Step", "stellar_2step");

        tax.add_program("FTMO", "two_step", "FTMO Challenge");
        tax.add_program("FTMO", "swing", "FTMO Swing");
        tax.add_alias("FTMO", "challenge", "two_step");

        tax.add_program("The5ers", "high_stakes", "High Stakes");
        tax.add_program("The5ers", "bootcamp", "Bootcamp");

        tax.add_program("Funding Pips", "two_step", "2-Step Evaluation");
        tax.add_program("E8 Markets", "classic", "E8 Classic");

        tax
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn official_id_passes_through() {
        let tax = ProgramTaxonomy::builtin();
        assert_eq!(
            tax.canonical_program_id("FundedNext", "stellar_1step"),
            "stellar_1step"
        );
    }

    #[test]
    fn alias_maps_to_canonical_id() {
        let tax = ProgramTaxonomy::builtin();
        assert_eq!(
            tax.canonical_program_id("fundednext", "Stellar 1 Step"),
            "stellar_1step"
        );
        assert_eq!(tax.canonical_program_id("FTMO", "Challenge"), "two_step");
    }

    #[test]
    fn unknown_program_returned_as_observed() {
        let tax = ProgramTaxonomy::builtin();
        assert_eq!(
            tax.canonical_program_id("FundedNext", "galaxy_3step"),
            "galaxy_3step"
        );
        assert_eq!(tax.canonical_program_id("Nobody Capital", "x"), "x");
    }

    #[test]
    fn display_names() {
        let tax = ProgramTaxonomy::builtin();
        assert_eq!(
            tax.display_name("FundedNext", "stellar_1step"),
            Some("Stellar 1-Step")
        );
        assert!(tax.display_name("FundedNext", "nope").is_none());
    }
}
