// Manager identity normalization against the closed roster.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{ConfigError, RosterConfig};
use crate::model::ManagerId;

/// The closed set of managers plus every known alias.
///
/// Built once from configuration and passed by reference to whatever needs
/// to resolve names; tests build smaller rosters directly.
#[derive(Debug, Clone)]
pub struct Roster {
    members: BTreeSet<String>,
    /// Normalized alias -> canonical member token.
    aliases: BTreeMap<String, String>,
    /// Canonical member token -> aliases as written in config (trimmed).
    spellings: BTreeMap<String, BTreeSet<String>>,
}

/// Uppercase, trim, and collapse internal whitespace.
fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn first_alphabetic_token(normalized: &str) -> Option<&str> {
    normalized
        .split(|c: char| !c.is_alphabetic())
        .find(|token| !token.is_empty())
}

impl Roster {
    /// Build a roster, rejecting duplicate members, members that are not a
    /// single alphabetic token, and aliases that point outside the roster.
    pub fn new<I, S>(members: I, aliases: &BTreeMap<String, String>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for member in members {
            let token = normalize(member.as_ref());
            if token.is_empty() || !token.chars().all(char::is_alphabetic) {
                return Err(ConfigError::ValidationError {
                    field: "roster.members".into(),
                    message: format!("`{}` is not a single alphabetic token", member.as_ref()),
                });
            }
            if !set.insert(token.clone()) {
                return Err(ConfigError::ValidationError {
                    field: "roster.members".into(),
                    message: format!("duplicate member `{token}`"),
                });
            }
        }
        if set.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "roster.members".into(),
                message: "must list at least one manager".into(),
            });
        }

        let mut table = BTreeMap::new();
        let mut spellings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (alias, target) in aliases {
            let alias_key = normalize(alias);
            let target_key = normalize(target);
            if !set.contains(&target_key) {
                return Err(ConfigError::ValidationError {
                    field: format!("roster.aliases.{alias}"),
                    message: format!("target `{target}` is not a roster member"),
                });
            }
            if set.contains(&alias_key) && alias_key != target_key {
                return Err(ConfigError::ValidationError {
                    field: format!("roster.aliases.{alias}"),
                    message: "alias shadows another roster member".into(),
                });
            }
            if let Some(previous) = table.insert(alias_key, target_key.clone()) {
                if previous != target_key {
                    return Err(ConfigError::ValidationError {
                        field: format!("roster.aliases.{alias}"),
                        message: format!("maps to both `{previous}` and `{target_key}`"),
                    });
                }
            }
            spellings
                .entry(target_key)
                .or_default()
                .insert(alias.trim().to_string());
        }

        Ok(Roster {
            members: set,
            aliases: table,
            spellings,
        })
    }

    pub fn from_config(config: &RosterConfig) -> Result<Self, ConfigError> {
        Roster::new(&config.members, &config.aliases)
    }

    /// Resolve a free-form name to a canonical manager.
    ///
    /// Order: exact alias, exact member, then the first alphabetic token
    /// (again alias first, then member). Returns `None` for anything else.
    pub fn canonicalize(&self, raw: &str) -> Option<ManagerId> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        if let Some(id) = self.lookup(&normalized) {
            return Some(id);
        }
        first_alphabetic_token(&normalized).and_then(|token| self.lookup(token))
    }

    fn lookup(&self, key: &str) -> Option<ManagerId> {
        if let Some(target) = self.aliases.get(key) {
            return Some(ManagerId::new(target.clone()));
        }
        self.members.get(key).map(|m| ManagerId::new(m.clone()))
    }

    /// Every alias that resolves to `id`, spelled as configured, plus the
    /// canonical token itself. Sorted.
    pub fn variants_of(&self, id: &ManagerId) -> Vec<String> {
        if !self.members.contains(id.as_str()) {
            return Vec::new();
        }
        let mut variants = self.spellings.get(id.as_str()).cloned().unwrap_or_default();
        variants.insert(id.as_str().to_string());
        variants.into_iter().collect()
    }

    /// All managers in canonical order.
    pub fn managers(&self) -> Vec<ManagerId> {
        self.members.iter().map(|m| ManagerId::new(m.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Re-admit a token read back from the store. Only tokens that are
    /// still roster members are accepted.
    pub(crate) fn member(&self, token: &str) -> Option<ManagerId> {
        self.members.get(token).map(|m| ManagerId::new(m.clone()))
    }
}
