mod actions;
mod render;
mod session;

use std::io;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::TableState;
use tracing::debug;

use crate::bus::{ChangeEvent, Topic};
use crate::sync::{FavoriteView, SyncCoordinator};

use self::actions::{
    Step, apply_change, refresh_all, refresh_items, run_confirmed, status_error, status_info,
    step_progress,
};
use self::render::draw_tui;
use self::session::TuiSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum PendingConfirm {
    Remove {
        source: String,
        id: String,
        title: String,
    },
    ClearAll {
        count: usize,
    },
}

pub(crate) fn run_tui(coordinator: &SyncCoordinator) -> Result<()> {
    let (change_tx, change_rx) = mpsc::channel::<ChangeEvent>();
    let tokens = [Topic::FavoritesChanged, Topic::PlayProgressChanged].map(|topic| {
        let tx = change_tx.clone();
        coordinator.subscribe(topic, move |event| {
            tx.send(event.clone())
                .map_err(|_| anyhow!("favorites view is gone"))
        })
    });

    let result = event_loop(coordinator, &change_rx);
    for token in tokens {
        coordinator.unsubscribe(token);
    }
    result
}

fn selected_key(items: &[FavoriteView], table_state: &TableState) -> Option<String> {
    table_state
        .selected()
        .and_then(|idx| items.get(idx))
        .map(FavoriteView::key)
}

fn event_loop(coordinator: &SyncCoordinator, changes: &mpsc::Receiver<ChangeEvent>) -> Result<()> {
    let mut session = TuiSession::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("failed to initialize terminal backend")?;
    terminal.clear()?;

    let mut items = coordinator.load_favorites_with_progress()?;
    let mut table_state = TableState::default();
    table_state.select((!items.is_empty()).then_some(0));
    let mut pending = None::<PendingConfirm>;
    let mut status = if items.is_empty() {
        status_info("No favorites yet. Add one with `watchstate add <source> <id> --title <title>`.")
    } else {
        status_info("Ready.")
    };

    loop {
        while let Ok(change) = changes.try_recv() {
            debug!(topic = %change.topic(), records = change.len(), "view received change");
            match apply_change(coordinator, &change) {
                Ok(updated) => {
                    let preferred = selected_key(&items, &table_state);
                    refresh_items(&mut items, &mut table_state, updated, preferred.as_deref());
                }
                Err(err) => status = status_error(&format!("Refresh failed: {err}")),
            }
        }

        terminal.draw(|frame| {
            draw_tui(
                frame,
                &items,
                &mut table_state,
                &status,
                pending.as_ref(),
            )
        })?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if let Some(confirm) = pending.take() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    status = run_confirmed(coordinator, &confirm);
                }
                KeyCode::Esc | KeyCode::Char('n') => status = status_info("Canceled."),
                _ => pending = Some(confirm),
            }
            continue;
        }

        let selected = table_state.selected().and_then(|idx| items.get(idx)).cloned();
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Up => {
                if let Some(idx) = table_state.selected() {
                    table_state.select(Some(idx.saturating_sub(1)));
                }
            }
            KeyCode::Down => {
                if let Some(idx) = table_state.selected()
                    && !items.is_empty()
                {
                    table_state.select(Some((idx + 1).min(items.len() - 1)));
                }
            }
            KeyCode::Right | KeyCode::Char('+') => {
                status = match selected {
                    Some(item) => step_progress(coordinator, &item, Step::Next),
                    None => status_error("No favorite selected."),
                };
            }
            KeyCode::Left | KeyCode::Char('-') => {
                status = match selected {
                    Some(item) => step_progress(coordinator, &item, Step::Previous),
                    None => status_error("No favorite selected."),
                };
            }
            KeyCode::Char('d') => match selected {
                Some(item) => {
                    pending = Some(PendingConfirm::Remove {
                        source: item.source,
                        id: item.id,
                        title: item.title,
                    });
                    status = status_info("Confirm removal: y/Enter to remove, n/Esc to cancel.");
                }
                None => status = status_error("Remove failed: no favorite selected."),
            },
            KeyCode::Char('c') => {
                if items.is_empty() {
                    status = status_info("Nothing to clear.");
                } else {
                    pending = Some(PendingConfirm::ClearAll { count: items.len() });
                    status = status_info("Confirm clear: y/Enter to clear, n/Esc to cancel.");
                }
            }
            KeyCode::Char('r') => status = refresh_all(coordinator),
            _ => {}
        }
    }

    session.leave()?;
    Ok(())
}
