//! Raw-identifier to display-name mapping.
//!
//! Loaded once at startup from a `raw=display,raw=display` string and never
//! mutated afterwards, so the table can be shared by reference across the
//! pipeline. Lookups are total: an unmapped identifier resolves to itself.

use hashbrown::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("mapping string is empty")]
    Empty,

    #[error("mapping entry {index} is missing an '=' separator: {entry:?}")]
    MissingSeparator { index: usize, entry: String },

    #[error("mapping entry {index} has an empty identifier or name: {entry:?}")]
    EmptyField { index: usize, entry: String },

    #[error("duplicate identifier in mapping: {key:?}")]
    DuplicateKey { key: String },
}

/// Immutable identifier → display-name table.
#[derive(Debug, Clone, Default)]
pub struct UserMapping {
    entries: HashMap<String, String>,
}

impl UserMapping {
    /// Parse a `raw=display,raw=display` string.
    ///
    /// Whitespace around entries and around either side of `=` is trimmed.
    /// Duplicate identifiers are an error rather than a silent overwrite.
    pub fn parse(raw: &str) -> Result<Self, MappingError> {
        if raw.trim().is_empty() {
            return Err(MappingError::Empty);
        }

        let mut entries = HashMap::new();
        for (index, entry) in raw.split(',').enumerate() {
            let entry = entry.trim();
            if entry.is_empty() {
                continue; // tolerate trailing commas
            }

            let Some((key, name)) = entry.split_once('=') else {
                return Err(MappingError::MissingSeparator {
                    index,
                    entry: entry.to_string(),
                });
            };

            let key = key.trim();
            let name = name.trim();
            if key.is_empty() || name.is_empty() {
                return Err(MappingError::EmptyField {
                    index,
                    entry: entry.to_string(),
                });
            }

            if entries
                .insert(key.to_string(), name.to_string())
                .is_some()
            {
                return Err(MappingError::DuplicateKey {
                    key: key.to_string(),
                });
            }
        }

        if entries.is_empty() {
            return Err(MappingError::Empty);
        }

        Ok(Self { entries })
    }

    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Resolve a raw identifier to its display name, falling back to the
    /// identifier itself. Never fails.
    pub fn resolve<'a>(&'a self, raw_id: &'a str) -> &'a str {
        self.entries.get(raw_id).map(String::as_str).unwrap_or(raw_id)
    }

    /// Raw identifiers in the table, for startup logging.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mask a raw identifier for log output, keeping the last four characters.
pub fn mask_id(id: &str) -> String {
    if id.chars().count() <= 4 {
        return "****".to_string();
    }
    let tail: String = id.chars().skip(id.chars().count() - 4).collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs() {
        let mapping = UserMapping::parse("u123=Alice, u456 = Bob,").unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.resolve("u123"), "Alice");
        assert_eq!(mapping.resolve("u456"), "Bob");
    }

    #[test]
    fn unmapped_falls_back_to_raw() {
        let mapping = UserMapping::parse("u123=Alice").unwrap();
        assert_eq!(mapping.resolve("u999"), "u999");
    }

    #[test]
    fn missing_separator_is_an_error() {
        let err = UserMapping::parse("u123=Alice,bogus").unwrap_err();
        assert!(matches!(err, MappingError::MissingSeparator { index: 1, .. }));
    }

    #[test]
    fn duplicate_key_is_an_error() {
        let err = UserMapping::parse("u1=A,u1=B").unwrap_err();
        assert!(matches!(err, MappingError::DuplicateKey { key } if key == "u1"));
    }

    #[test]
    fn empty_string_is_an_error() {
        assert!(matches!(UserMapping::parse("  "), Err(MappingError::Empty)));
        assert!(matches!(UserMapping::parse(",,"), Err(MappingError::Empty)));
    }

    #[test]
    fn empty_side_is_an_error() {
        let err = UserMapping::parse("=Alice").unwrap_err();
        assert!(matches!(err, MappingError::EmptyField { .. }));
    }

    #[test]
    fn masks_identifiers() {
        assert_eq!(mask_id("690129185314118"), "****4118");
        assert_eq!(mask_id("ab"), "****");
        assert_eq!(mask_id("abcd"), "****");
    }
}
