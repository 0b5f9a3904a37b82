//! Room key generation, validation and normalisation.
//!
//! Keys look like `XXX-XXX-XXX`, drawn from a 27-symbol alphabet chosen to
//! avoid characters that are easily confused when read aloud or typed:
//! `0, 1, 5, 8, O, I, L, S, B` are excluded from the full alphanumeric set.

use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The 27-symbol alphabet keys are drawn from.
pub const ALPHABET: &[u8] = b"ACDEFGHJKMNPQRTUVWXYZ234679";

const SEGMENT_LEN: usize = 3;
const SEGMENT_COUNT: usize = 3;

static PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[ACDEFGHJKMNPQRTUVWXYZ234679]{3}-[ACDEFGHJKMNPQRTUVWXYZ234679]{3}-[ACDEFGHJKMNPQRTUVWXYZ234679]{3}$")
        .expect("room key pattern is valid")
});

/// A validated, normalised room identifier: `XXX-XXX-XXX` over [`ALPHABET`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    /// Generate a new random room key using a cryptographic RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let mut segments = [[0u8; SEGMENT_LEN]; SEGMENT_COUNT];
        for segment in &mut segments {
            for ch in segment.iter_mut() {
                let idx = rng.gen_range(0..ALPHABET.len());
                *ch = ALPHABET[idx];
            }
        }

        let key = segments
            .iter()
            .map(|seg| std::str::from_utf8(seg).expect("alphabet is ASCII").to_string())
            .collect::<Vec<_>>()
            .join("-");

        Self(key)
    }

    /// Parse and validate a user-supplied string, normalising it first.
    pub fn parse(raw: &str) -> Result<Self, InvalidRoomKey> {
        let normalised = normalise(raw);
        if is_valid(&normalised) {
            Ok(Self(normalised))
        } else {
            Err(InvalidRoomKey(raw.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a candidate string is not a valid room key.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid room key: {0:?}")]
pub struct InvalidRoomKey(pub String);

/// Trim whitespace and upper-case, without validating the format.
#[must_use]
pub fn normalise(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Case-insensitively check whether a string matches the room key pattern.
///
/// `isValid(normalise(k)) == isValid(k)` for all `k`: the pattern is matched
/// case-insensitively, so normalising first never changes the verdict.
#[must_use]
pub fn is_valid(raw: &str) -> bool {
    PATTERN.is_match(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_keys_match_format() {
        for _ in 0..200 {
            let key = RoomKey::generate();
            assert!(is_valid(key.as_str()), "{key} did not validate");
            assert_eq!(key.as_str().len(), 11);
            for excluded in ['0', '1', '5', '8', 'O', 'I', 'L', 'S', 'B'] {
                assert!(!key.as_str().contains(excluded));
            }
        }
    }

    #[test]
    fn generation_is_highly_unique() {
        let keys: HashSet<String> = (0..1000).map(|_| RoomKey::generate().0).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn validator_is_idempotent_under_normalisation() {
        for candidate in ["abc-def-ghj", " ACD-EFG-HJK ", "not-a-key", "ACD-EFG-HJ"] {
            let normalised = normalise(candidate);
            assert_eq!(is_valid(&normalised), is_valid(candidate));
        }
    }

    #[test]
    fn rejects_excluded_characters() {
        assert!(!is_valid("AB0-CDE-FGH"));
        assert!(!is_valid("AB1-CDE-FGH"));
        assert!(!is_valid("ABO-CDE-FGH"));
    }

    #[test]
    fn parse_normalises_case_and_whitespace() {
        let key = RoomKey::parse("  acd-efg-hjk  ").expect("valid key");
        assert_eq!(key.as_str(), "ACD-EFG-HJK");
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(RoomKey::parse("ZZZ-ZZZ").is_err());
        assert!(RoomKey::parse("").is_err());
    }
}
