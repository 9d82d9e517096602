use chrono::{Local, TimeZone};

use crate::sync::FavoriteView;

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

fn format_epoch_ms(ms: i64, pattern: &str) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format(pattern).to_string())
        .unwrap_or_else(|| ms.to_string())
}

pub(crate) fn format_saved_at(ms: i64) -> String {
    format_epoch_ms(ms, "%Y-%m-%d %H:%M %:z")
}

pub(crate) fn format_saved_at_tui(ms: i64) -> String {
    format_epoch_ms(ms, "%Y-%m-%d %H:%M")
}

pub(crate) fn media_label(item: &FavoriteView) -> &'static str {
    if item.is_series() { "TV" } else { "Movie" }
}

pub(crate) fn format_episode_progress_text(current: Option<u32>, total_episodes: u32) -> String {
    match current {
        Some(episode) if episode > total_episodes => {
            format!("{episode} of {total_episodes} (past listed total)")
        }
        Some(episode) => format!("{episode} of {total_episodes}"),
        None => format!("not started, {total_episodes} episode(s)"),
    }
}

pub(crate) fn build_progress_gauge(
    current: Option<u32>,
    total_episodes: u32,
) -> Option<(f64, String)> {
    if total_episodes == 0 {
        return None;
    }
    let shown = current?.min(total_episodes);
    let ratio = (shown as f64 / total_episodes as f64).clamp(0.0, 1.0);
    Some((ratio, format!("{shown}/{total_episodes}")))
}

pub(crate) fn next_episode(current: Option<u32>, total_episodes: u32) -> Option<u32> {
    let next = current.map_or(1, |episode| episode.saturating_add(1));
    (next <= total_episodes).then_some(next)
}

pub(crate) fn previous_episode(current: Option<u32>) -> Option<u32> {
    current.and_then(|episode| episode.checked_sub(1))
}
