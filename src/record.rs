use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::key::RecordKey;

/// The two independently lifecycled record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Favorites,
    PlayProgress,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Favorites, RecordKind::PlayProgress];

    /// Stable name used by backends (table discriminator, URL path segment).
    pub fn storage_name(self) -> &'static str {
        match self {
            Self::Favorites => "favorites",
            Self::PlayProgress => "playrecords",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Favorites => f.write_str("favorites"),
            Self::PlayProgress => f.write_str("play progress"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FavoriteRecord {
    pub source: String,
    pub id: String,
    pub title: String,
    #[serde(rename = "poster")]
    pub poster_url: String,
    pub total_episodes: u32,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_title: Option<String>,
    /// Epoch milliseconds.
    pub saved_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlayProgressRecord {
    pub source: String,
    pub id: String,
    pub episode_index: u32,
    pub saved_at: i64,
}

/// Display metadata supplied when a title is favorited. Identity and
/// `saved_at` are filled in by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FavoriteFields {
    pub title: String,
    pub poster_url: String,
    pub total_episodes: u32,
    pub source_name: String,
    pub year: Option<String>,
    pub search_title: Option<String>,
}

impl FavoriteFields {
    pub fn into_record(self, key: &RecordKey, saved_at: i64) -> FavoriteRecord {
        FavoriteRecord {
            source: key.source().to_string(),
            id: key.id().to_string(),
            title: self.title,
            poster_url: self.poster_url,
            total_episodes: self.total_episodes,
            source_name: self.source_name,
            year: self.year,
            search_title: self.search_title,
            saved_at,
        }
    }
}

/// Full mapping of keys to records for one kind.
pub type Snapshot<R> = BTreeMap<String, R>;
pub type FavoriteSnapshot = Snapshot<FavoriteRecord>;
pub type ProgressSnapshot = Snapshot<PlayProgressRecord>;

/// A record type that lives in exactly one collection.
pub trait StoredRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn saved_at(&self) -> i64;

    /// The `(source, id)` pair the record claims; must match its key.
    fn identity(&self) -> (&str, &str);

    /// Reject payloads the schema cannot express through types alone.
    fn validate(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

impl StoredRecord for FavoriteRecord {
    const KIND: RecordKind = RecordKind::Favorites;

    fn saved_at(&self) -> i64 {
        self.saved_at
    }

    fn identity(&self) -> (&str, &str) {
        (&self.source, &self.id)
    }

    fn validate(&self, key: &str) -> Result<(), StoreError> {
        if self.total_episodes < 1 {
            return Err(StoreError::InvalidRecord {
                kind: Self::KIND,
                key: key.to_string(),
                reason: "totalEpisodes must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl StoredRecord for PlayProgressRecord {
    const KIND: RecordKind = RecordKind::PlayProgress;

    fn saved_at(&self) -> i64 {
        self.saved_at
    }

    fn identity(&self) -> (&str, &str) {
        (&self.source, &self.id)
    }
}
