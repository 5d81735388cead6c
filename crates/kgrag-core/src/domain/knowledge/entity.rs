//! Extracted entities

use serde::Serialize;

use crate::domain::ontology::EntityType;

/// A named entity typed by the active ontology profile.
///
/// Entities are ephemeral: they only become graph nodes once persisted by
/// the [`GraphWriter`](super::GraphWriter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Entity {
    /// Cleaned entity name (the node's natural key)
    pub name: String,
    /// Label from the profile's closed label set
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

impl Entity {
    /// Create a new entity
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.entity_type)
    }
}

/// Leading characters treated as bullets or stray punctuation
const BULLETS: &[char] = &[
    '-', '*', '•', '·', '#', '>', '+', '–', '—', '.', ',', ';', ':', '!', '?', '|', '~', '=',
];

/// Strip list markers, bullets and surrounding whitespace from a model-provided name.
///
/// Removes, repeatedly, leading numbering (`1.`, `2)`) and bullet or
/// punctuation characters. Returns an empty string when nothing is left.
pub fn clean_entity_name(raw: &str) -> String {
    let mut rest = raw.trim();

    loop {
        if let Some(stripped) = strip_numbering(rest) {
            rest = stripped.trim_start();
        } else if let Some(stripped) = rest.strip_prefix(BULLETS) {
            rest = stripped.trim_start();
        } else {
            break;
        }
    }

    rest.trim_end().to_string()
}

/// Strip `12.` or `3)` when followed by whitespace or the end of the string
fn strip_numbering(s: &str) -> Option<&str> {
    let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }

    let after = s[digits..].strip_prefix(['.', ')'])?;
    if after.is_empty() || after.starts_with(char::is_whitespace) {
        Some(after)
    } else {
        None
    }
}
