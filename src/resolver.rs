// =============================================================================
// Rule-source resolver — database → preset → custom, strict order
// =============================================================================
//
// A Rules value always comes from exactly one tier; there is no field-by-field
// merging. The database tier is fail-soft: "not found" and store errors both
// count as a tier miss (with a warning for the latter), so a flaky store can
// never take monitoring down as long as a preset or custom fallback exists.
// The winning tier is recorded as a source tag for operator audit.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{ResolveError, StoreError};
use crate::presets::{normalize_firm, PresetRegistry};
use crate::rules::Rules;
use crate::taxonomy::ProgramTaxonomy;

/// Read-only view of the extracted-rules store.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Rules row for `(firm, program_id)`, if one exists.
    async fn lookup_rules(&self, firm: &str, program_id: &str)
        -> Result<Option<Rules>, StoreError>;

    /// Advisory guidance strings for the review path. Firm-wide rows are
    /// returned alongside program-specific ones.
    async fn soft_rules(
        &self,
        firm: &str,
        program_id: Option<&str>,
    ) -> Result<Vec<String>, StoreError>;
}

/// Which tier produced a resolved Rules value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Db,
    Preset,
    Custom,
}

impl std::fmt::Display for RuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db => write!(f, "db"),
            Self::Preset => write!(f, "preset"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Three-tier rule resolution over an optional store, the preset registry,
/// and a caller-supplied custom Rules value.
pub struct Resolver {
    store: Option<Arc<dyn RuleStore>>,
    presets: Arc<PresetRegistry>,
    taxonomy: Arc<ProgramTaxonomy>,
}

impl Resolver {
    pub fn new(
        store: Option<Arc<dyn RuleStore>>,
        presets: Arc<PresetRegistry>,
        taxonomy: Arc<ProgramTaxonomy>,
    ) -> Self {
        Self {
            store,
            presets,
            taxonomy,
        }
    }

    /// Resolve the Rules for `(firm, program_id)`, falling back through the
    /// tiers in strict order. The first tier that produces a value wins.
    pub async fn resolve(
        &self,
        firm: &str,
        program_id: Option<&str>,
        custom: Option<&Rules>,
    ) -> Result<(Rules, RuleSource), ResolveError> {
        self.resolve_with_preset(firm, program_id, None, custom).await
    }

    /// Like [`resolve`](Self::resolve), but with an explicit preset
    /// reference. The database tier and program canonicalization stay keyed
    /// by the account's real `firm`; only the preset tier consults
    /// `preset_name` instead.
    pub async fn resolve_with_preset(
        &self,
        firm: &str,
        program_id: Option<&str>,
        preset_name: Option<&str>,
        custom: Option<&Rules>,
    ) -> Result<(Rules, RuleSource), ResolveError> {
        // Tier 1: database, only when a program id is known.
        if let (Some(store), Some(program)) = (self.store.as_ref(), program_id) {
            let canonical = self.taxonomy.canonical_program_id(firm, program);
            match store.lookup_rules(&normalize_firm(firm), &canonical).await {
                Ok(Some(rules)) => match rules.validate() {
                    Ok(()) => {
                        debug!(firm, program = %canonical, "rules resolved from store");
                        return Ok((rules, RuleSource::Db));
                    }
                    Err(e) => {
                        warn!(firm, program = %canonical, error = %e,
                              "stored rules failed validation, treating as miss");
                    }
                },
                Ok(None) => {
                    debug!(firm, program = %canonical, "no stored rules, trying presets");
                }
                Err(e) => {
                    warn!(firm, program = %canonical, error = %e,
                          "rule store lookup failed, treating as miss");
                }
            }
        }

        // Tier 2: compiled-in preset, looked up under the explicit reference
        // when one was configured, otherwise under the firm name or alias.
        let preset_key = preset_name.unwrap_or(firm);
        if let Some(rules) = self.presets.get(preset_key) {
            debug!(firm, preset = %rules.name, "rules resolved from preset registry");
            return Ok((rules.clone(), RuleSource::Preset));
        }

        // Tier 3: explicit custom rules, used verbatim.
        if let Some(rules) = custom {
            debug!(firm, rules = %rules.name, "using caller-supplied custom rules");
            return Ok((rules.clone(), RuleSource::Custom));
        }

        Err(ResolveError::RuleSourceUnavailable {
            firm: firm.to_string(),
            program_id: program_id.map(str::to_string),
        })
    }

    /// Soft-rule guidance for the review path. Fail-soft: store errors reduce
    /// to an empty list with a warning.
    pub async fn soft_rules(&self, firm: &str, program_id: Option<&str>) -> Vec<String> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        let canonical = program_id.map(|p| self.taxonomy.canonical_program_id(firm, p));
        match store
            .soft_rules(&normalize_firm(firm), canonical.as_deref())
            .await
        {
            Ok(rules) => rules,
            Err(e) => {
                warn!(firm, error = %e, "soft-rule lookup failed");
                Vec::new()
            }
        }
    }
}
