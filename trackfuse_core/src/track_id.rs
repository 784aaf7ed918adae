//! Composite track identifiers.
//!
//! A [`TrackId`] names a track by the platform (or sensor) that owns it plus a
//! per-owner sequence number. The canonical text form is `"<owner>.<number>"`,
//! parsed by splitting at the last `.` so owners may themselves contain dots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifier of a raw or local track.
///
/// Ordering is owner-lexicographic, then by number, which makes the type
/// usable as a `BTreeMap` key with stable iteration for consumers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackId {
    owner: String,
    number: u32,
}

impl TrackId {
    /// Creates a track id for the given owner and sequence number.
    pub fn new(owner: impl Into<String>, number: u32) -> Self {
        Self {
            owner: owner.into(),
            number,
        }
    }

    /// The null sentinel (empty owner).
    pub fn null() -> Self {
        Self::new(String::new(), 0)
    }

    /// True iff the owner is unset.
    pub fn is_null(&self) -> bool {
        self.owner.is_empty()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Parses the `"<owner>.<number>"` form.
    pub fn parse(text: &str) -> Result<Self, TrackIdParseError> {
        let (owner, number) = text
            .rsplit_once('.')
            .ok_or_else(|| TrackIdParseError::MissingSeparator(text.to_string()))?;

        let number = number
            .parse::<u32>()
            .map_err(|source| TrackIdParseError::InvalidNumber {
                text: text.to_string(),
                source,
            })?;

        Ok(Self::new(owner, number))
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.number)
    }
}

impl FromStr for TrackId {
    type Err = TrackIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Failure to parse a track id from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackIdParseError {
    #[error("track id '{0}' has no '.' separator")]
    MissingSeparator(String),

    #[error("track id '{text}' has an invalid number: {source}")]
    InvalidNumber {
        text: String,
        #[source]
        source: ParseIntError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display_format() {
        assert_eq!(TrackId::new("S1", 4).to_string(), "S1.4");
    }

    #[test]
    fn test_parse_splits_on_last_dot() {
        let id = TrackId::parse("blue.awacs.17").unwrap();
        assert_eq!(id.owner(), "blue.awacs");
        assert_eq!(id.number(), 17);
    }

    #[test]
    fn test_null_round_trip() {
        let null = TrackId::null();
        assert!(null.is_null());
        assert_eq!(null.to_string(), ".0");

        let parsed: TrackId = ".0".parse().unwrap();
        assert_eq!(parsed, null);
        assert!(parsed.is_null());
    }

    #[test]
    fn test_parse_errors_are_recoverable() {
        assert_eq!(
            TrackId::parse("no-separator"),
            Err(TrackIdParseError::MissingSeparator("no-separator".to_string()))
        );
        assert!(matches!(
            TrackId::parse("S1.four"),
            Err(TrackIdParseError::InvalidNumber { .. })
        ));
        assert!(matches!(
            TrackId::parse("S1.-4"),
            Err(TrackIdParseError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_ordering_owner_then_number() {
        let mut ids = vec![
            TrackId::new("b", 1),
            TrackId::new("a", 9),
            TrackId::new("a", 2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![TrackId::new("a", 2), TrackId::new("a", 9), TrackId::new("b", 1)]
        );
    }

    proptest! {
        #[test]
        fn test_text_round_trip(owner in ".*", number in any::<u32>()) {
            let id = TrackId::new(owner, number);
            let parsed = TrackId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
