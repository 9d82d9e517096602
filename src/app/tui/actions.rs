use anyhow::Result;
use ratatui::widgets::TableState;
use tracing::warn;

use crate::bus::ChangeEvent;
use crate::record::RecordKind;
use crate::sync::{FavoriteView, SyncCoordinator};

use super::super::display::{
    format_episode_progress_text, next_episode, previous_episode, truncate,
};
use super::PendingConfirm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    Next,
    Previous,
}

/// Rebuilds the joined rows for a change received from the bus.
pub(super) fn apply_change(
    coordinator: &SyncCoordinator,
    change: &ChangeEvent,
) -> Result<Vec<FavoriteView>> {
    let items = match change {
        ChangeEvent::Favorites(snapshot) => coordinator.join_with_progress(snapshot)?,
        ChangeEvent::PlayProgress(_) => coordinator.load_favorites_with_progress()?,
    };
    Ok(items)
}

pub(super) fn refresh_items(
    items: &mut Vec<FavoriteView>,
    table_state: &mut TableState,
    updated: Vec<FavoriteView>,
    preferred_key: Option<&str>,
) {
    *items = updated;
    if items.is_empty() {
        table_state.select(None);
        return;
    }

    if let Some(key) = preferred_key
        && let Some(idx) = items.iter().position(|item| item.key() == key)
    {
        table_state.select(Some(idx));
        return;
    }

    match table_state.selected() {
        Some(selected) => table_state.select(Some(selected.min(items.len() - 1))),
        None => table_state.select(Some(0)),
    }
}

pub(super) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(super) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}

pub(super) fn step_progress(coordinator: &SyncCoordinator, item: &FavoriteView, step: Step) -> String {
    let target = match step {
        Step::Next => next_episode(item.current_episode, item.total_episodes),
        Step::Previous => previous_episode(item.current_episode),
    };
    let title = truncate(&item.title, 40);
    let Some(episode) = target else {
        return match step {
            Step::Next => status_info(&format!("No more episodes for {title}.")),
            Step::Previous => status_info(&format!("{title} has no earlier episode.")),
        };
    };

    match coordinator.record_progress(&item.source, &item.id, episode) {
        Ok(_) => status_info(&format!(
            "Updated progress: {title} -> episode {}",
            format_episode_progress_text(Some(episode), item.total_episodes)
        )),
        Err(err) => {
            warn!(key = %item.key(), error = %err, "progress update failed");
            status_error(&format!("Progress not saved: {err}"))
        }
    }
}

pub(super) fn run_confirmed(coordinator: &SyncCoordinator, confirm: &PendingConfirm) -> String {
    match confirm {
        PendingConfirm::Remove { source, id, title } => {
            match coordinator.remove_favorite(source, id) {
                Ok(()) => status_info(&format!("Removed favorite: {}", truncate(title, 48))),
                Err(err) => status_error(&format!("Remove failed: {err}")),
            }
        }
        PendingConfirm::ClearAll { count } => match coordinator.clear_all_favorites() {
            Ok(()) => status_info(&format!(
                "Cleared {count} favorite(s). Play progress was kept."
            )),
            Err(err) => status_error(&format!("Clear failed, favorites unchanged: {err}")),
        },
    }
}

/// Re-reads both collections so writes from other processes show up.
pub(super) fn refresh_all(coordinator: &SyncCoordinator) -> String {
    for kind in RecordKind::ALL {
        if let Err(err) = coordinator.refresh(kind) {
            return status_error(&format!("Refresh of {kind} failed: {err}"));
        }
    }
    status_info("Reloaded from store.")
}
