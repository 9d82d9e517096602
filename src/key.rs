use std::fmt;

use crate::error::KeyError;

const SEPARATOR: char = '+';

/// Storage key for a single title: `"<source>+<id>"`.
///
/// Only the first `+` separates source from id, so ids that contain `+` survive
/// a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn encode(source: &str, id: &str) -> Result<Self, KeyError> {
        if source.is_empty() {
            return Err(KeyError::Malformed {
                key: format!("{source}{SEPARATOR}{id}"),
            });
        }
        Ok(Self(format!("{source}{SEPARATOR}{id}")))
    }

    pub fn source(&self) -> &str {
        self.split().0
    }

    pub fn id(&self) -> &str {
        self.split().1
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, &str) {
        // Construction guarantees a separator with a non-empty source.
        self.0.split_once(SEPARATOR).unwrap_or((self.0.as_str(), ""))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn encode(source: &str, id: &str) -> Result<String, KeyError> {
    RecordKey::encode(source, id).map(|key| key.0)
}

pub fn decode(raw: &str) -> Result<(&str, &str), KeyError> {
    match raw.split_once(SEPARATOR) {
        Some((source, id)) if !source.is_empty() => Ok((source, id)),
        _ => Err(KeyError::Malformed {
            key: raw.to_string(),
        }),
    }
}
