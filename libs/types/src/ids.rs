//! Key types for the two aggregation keyspaces
//!
//! `CandidateId` is an opaque upstream identifier and is compared verbatim.
//! `RegionKey` is only constructible through normalization, so two spellings
//! of the same region ("Andhra Pradesh", " ANDHRA  PRADESH") always collapse
//! to one key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a candidate as reported by the upstream tally stream.
///
/// Ordering is lexicographic and is the leaderboard tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    /// Create a new CandidateId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Try to create a CandidateId, returning None if blank
    pub fn try_new(id: impl Into<String>) -> Option<Self> {
        let s = id.into();
        if s.trim().is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Get the identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CandidateId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Normalized region (state) name.
///
/// Normalization trims the name, collapses internal whitespace runs to a
/// single space and lowercases it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct RegionKey(String);

impl RegionKey {
    /// Normalize a raw region name into a key.
    ///
    /// A blank name normalizes to the empty key; use [`RegionKey::try_new`]
    /// when blank names must be rejected.
    pub fn normalize(raw: &str) -> Self {
        let folded = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Self(folded)
    }

    /// Normalize, returning None if nothing but whitespace remains
    pub fn try_new(raw: &str) -> Option<Self> {
        let key = Self::normalize(raw);
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Get the normalized name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RegionKey {
    fn from(s: String) -> Self {
        Self::normalize(&s)
    }
}

impl From<&str> for RegionKey {
    fn from(s: &str) -> Self {
        Self::normalize(s)
    }
}

impl From<RegionKey> for String {
    fn from(key: RegionKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_id_ordering() {
        let mut ids = vec![CandidateId::new("c2"), CandidateId::new("c10"), CandidateId::new("c1")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "c1");
        assert_eq!(ids[1].as_str(), "c10");
        assert_eq!(ids[2].as_str(), "c2");
    }

    #[test]
    fn test_candidate_id_rejects_blank() {
        assert!(CandidateId::try_new("   ").is_none());
        assert!(CandidateId::try_new("").is_none());
        assert_eq!(CandidateId::try_new("c1").unwrap().as_str(), "c1");
    }

    #[test]
    fn test_candidate_id_serialization() {
        let id = CandidateId::new("c-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"c-42\"");
    }

    #[test]
    fn test_region_key_case_and_whitespace() {
        assert_eq!(RegionKey::normalize("Andhra Pradesh"), RegionKey::normalize("ANDHRA PRADESH"));
        assert_eq!(RegionKey::normalize("andhra pradesh "), RegionKey::normalize("Andhra Pradesh"));
        assert_eq!(RegionKey::normalize("  Andhra\t  Pradesh").as_str(), "andhra pradesh");
    }

    #[test]
    fn test_region_key_blank() {
        assert!(RegionKey::try_new(" \n ").is_none());
        assert!(RegionKey::normalize("").is_empty());
        assert_eq!(RegionKey::try_new("Goa").unwrap().as_str(), "goa");
    }

    #[test]
    fn test_region_key_deserialize_normalizes() {
        let key: RegionKey = serde_json::from_str("\" GOA \"").unwrap();
        assert_eq!(key.as_str(), "goa");

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"goa\"");
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalize_is_idempotent(raw in "[ a-zA-Z\t]{0,24}") {
                let once = RegionKey::normalize(&raw);
                let twice = RegionKey::normalize(once.as_str());
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn normalize_ignores_ascii_case_and_padding(raw in "[a-z]{1,8}( [a-z]{1,8}){0,2}") {
                let shouted = format!("  {}\t", raw.to_uppercase());
                prop_assert_eq!(RegionKey::normalize(&shouted), RegionKey::normalize(&raw));
            }
        }
    }
}
