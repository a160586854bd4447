//! Client-supplied model identifier → upstream model identifier.
//!
//! Upstream endpoints use opaque identifiers; operators provide both exact
//! and family rules in `[models] mapping`. Dated suffixes on Claude model
//! names (e.g. `claude-sonnet-4-5-20250929`) must degrade gracefully to the
//! family rule when no exact or substring match exists.

use std::collections::HashMap;

/// A parsed `[models] mapping` table, plus the family-fallback rule.
///
/// Built once at startup from the `"source=target"` pairs in config and
/// shared (read-only) across requests.
pub struct ModelMapper {
    mapping: HashMap<String, String>,
}

/// Family keywords checked in order of specificity — haiku and opus are
/// checked before sonnet because "sonnet" is the most common family and
/// would otherwise shadow substring matches against more specific keys.
const FAMILIES: &[&str] = &["haiku", "opus", "sonnet"];

impl ModelMapper {
    /// Parse `"source=target"` pairs. Malformed entries (no `=`) are skipped
    /// and logged — a typo in one mapping rule shouldn't prevent the proxy
    /// from starting.
    pub fn new(pairs: &[String]) -> Self {
        let mut mapping = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            match pair.split_once('=') {
                Some((source, target)) => {
                    mapping.insert(source.trim().to_string(), target.trim().to_string());
                }
                None => tracing::warn!(entry = %pair, "ignoring malformed model mapping entry"),
            }
        }
        Self { mapping }
    }

    /// Resolve `model` to its upstream identifier. First match wins:
    /// exact key, then normalized substring, then family fallback, then the
    /// input unchanged.
    pub fn resolve(&self, model: &str) -> String {
        if let Some(mapped) = self.mapping.get(model) {
            return mapped.clone();
        }

        let normalized = normalize(model);
        for (key, value) in &self.mapping {
            let normalized_key = normalize(key);
            if normalized.contains(&normalized_key) || normalized_key.contains(&normalized) {
                return value.clone();
            }
        }

        let lower = model.to_lowercase();
        for family in FAMILIES {
            if lower.contains(family) {
                if let Some(mapped) = self.mapping.get(*family) {
                    return mapped.clone();
                }
                if let Some((_, value)) = self
                    .mapping
                    .iter()
                    .find(|(k, v)| k.to_lowercase().contains(family) || v.to_lowercase().contains(family))
                {
                    return value.clone();
                }
            }
        }

        tracing::warn!(model, "no mapping rule matched; passing model name through unchanged");
        model.to_string()
    }
}

/// Lowercase and replace `.` with `-`, so `"Claude.3.5"` and `"claude-3-5"`
/// compare equal.
fn normalize(s: &str) -> String {
    s.to_lowercase().replace('.', "-")
}
