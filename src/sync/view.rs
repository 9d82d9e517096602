use std::cmp::Ordering;

use serde::Serialize;

use crate::error::KeyError;
use crate::key;
use crate::record::{FavoriteSnapshot, ProgressSnapshot};

/// A favorite joined with its play-progress record, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteView {
    pub source: String,
    pub id: String,
    pub title: String,
    #[serde(rename = "poster")]
    pub poster_url: String,
    pub total_episodes: u32,
    pub source_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_title: Option<String>,
    pub saved_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_episode: Option<u32>,
}

impl FavoriteView {
    pub fn key(&self) -> String {
        format!("{}+{}", self.source, self.id)
    }

    pub fn is_series(&self) -> bool {
        self.total_episodes > 1
    }
}

/// Most recently saved first; equal timestamps fall back to key order.
pub fn join_favorites(
    favorites: &FavoriteSnapshot,
    progress: &ProgressSnapshot,
) -> Result<Vec<FavoriteView>, KeyError> {
    let mut entries = favorites
        .iter()
        .map(|(raw_key, favorite)| -> Result<_, KeyError> {
            let (source, id) = key::decode(raw_key)?;
            Ok((
                raw_key.as_str(),
                FavoriteView {
                    source: source.to_string(),
                    id: id.to_string(),
                    title: favorite.title.clone(),
                    poster_url: favorite.poster_url.clone(),
                    total_episodes: favorite.total_episodes,
                    source_name: favorite.source_name.clone(),
                    year: favorite.year.clone(),
                    search_title: favorite.search_title.clone(),
                    saved_at: favorite.saved_at,
                    current_episode: progress.get(raw_key).map(|record| record.episode_index),
                },
            ))
        })
        .collect::<Result<Vec<_>, KeyError>>()?;

    entries.sort_by(|(left_key, left), (right_key, right)| {
        match right.saved_at.cmp(&left.saved_at) {
            Ordering::Equal => left_key.cmp(right_key),
            other => other,
        }
    });
    Ok(entries.into_iter().map(|(_, view)| view).collect())
}
