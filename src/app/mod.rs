mod display;
mod tui;


use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::bus::ChangeBus;
use crate::cli::{AddArgs, Cli, Command};
use crate::config::Settings;
use crate::logging;
use crate::paths::log_file_path;
use crate::record::FavoriteFields;
use crate::sync::SyncCoordinator;

use self::display::{format_episode_progress_text, format_saved_at, media_label, truncate};

pub fn run(cli: Cli) -> Result<()> {
    let interactive = matches!(cli.command, Some(Command::Tui) | None);
    if interactive {
        logging::init_file(&log_file_path()?, cli.verbose)?;
    } else {
        logging::init_stderr(cli.verbose);
    }

    let settings = Settings::from_args(&cli.store)?;
    let store = settings.open_store()?;
    info!(backend = store.backend_name(), "store opened");

    let bus = ChangeBus::new();
    let coordinator = SyncCoordinator::new(store, bus.clone());

    let result = match cli.command {
        Some(Command::Add(args)) => run_add(&coordinator, args),
        Some(Command::Remove { source, id }) => run_remove(&coordinator, &source, &id),
        Some(Command::Clear { yes }) => run_clear(&coordinator, yes),
        Some(Command::Progress {
            source,
            id,
            episode,
        }) => run_progress(&coordinator, &source, &id, episode),
        Some(Command::Forget { source, id }) => run_forget(&coordinator, &source, &id),
        Some(Command::List { json }) => run_list(&coordinator, json),
        Some(Command::Tui) | None => tui::run_tui(&coordinator),
    };

    bus.teardown();
    result
}

pub(crate) fn fields_from_args(args: AddArgs) -> FavoriteFields {
    FavoriteFields {
        title: args.title,
        poster_url: args.poster,
        total_episodes: args.episodes,
        source_name: args.source_name.unwrap_or_else(|| args.source.clone()),
        year: args.year,
        search_title: args.search_title,
    }
}

fn run_add(coordinator: &SyncCoordinator, args: AddArgs) -> Result<()> {
    let source = args.source.clone();
    let id = args.id.clone();
    let record = coordinator
        .upsert_favorite(&source, &id, fields_from_args(args))
        .with_context(|| format!("failed to save favorite {source}+{id}"))?;
    println!(
        "Saved favorite: {} [{}] ({} episode(s))",
        record.title, record.source_name, record.total_episodes
    );
    Ok(())
}

fn run_remove(coordinator: &SyncCoordinator, source: &str, id: &str) -> Result<()> {
    let Some(existing) = coordinator.get_favorite(source, id)? else {
        println!("No favorite stored for {source}+{id}.");
        return Ok(());
    };
    coordinator
        .remove_favorite(source, id)
        .with_context(|| format!("failed to remove favorite {source}+{id}"))?;
    println!("Removed favorite: {}", existing.title);
    Ok(())
}

fn run_clear(coordinator: &SyncCoordinator, yes: bool) -> Result<()> {
    let count = coordinator.favorites_snapshot()?.len();
    if count == 0 {
        println!("No favorites to clear.");
        return Ok(());
    }

    if !yes {
        print!("Clear all {count} favorite(s)? This cannot be undone. [y/N] ");
        io::stdout().flush()?;
        if !confirm(io::stdin().lock())? {
            println!("Clear canceled.");
            return Ok(());
        }
    }

    coordinator
        .clear_all_favorites()
        .context("failed to clear favorites; nothing was changed")?;
    println!("Cleared {count} favorite(s). Play progress was kept.");
    Ok(())
}

pub(crate) fn confirm(mut input: impl BufRead) -> Result<bool> {
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn run_progress(coordinator: &SyncCoordinator, source: &str, id: &str, episode: u32) -> Result<()> {
    let record = coordinator
        .record_progress(source, id, episode)
        .with_context(|| format!("failed to record progress for {source}+{id}"))?;
    match coordinator.get_favorite(source, id)? {
        Some(favorite) => println!(
            "Updated progress: {} -> episode {}",
            favorite.title,
            format_episode_progress_text(Some(record.episode_index), favorite.total_episodes)
        ),
        None => println!(
            "Updated progress: {source}+{id} -> episode {}",
            record.episode_index
        ),
    }
    Ok(())
}

fn run_forget(coordinator: &SyncCoordinator, source: &str, id: &str) -> Result<()> {
    if coordinator.get_progress(source, id)?.is_none() {
        println!("No progress stored for {source}+{id}.");
        return Ok(());
    }
    coordinator
        .remove_progress(source, id)
        .with_context(|| format!("failed to remove progress for {source}+{id}"))?;
    println!("Forgot progress for {source}+{id}.");
    Ok(())
}

fn run_list(coordinator: &SyncCoordinator, json: bool) -> Result<()> {
    let items = coordinator.load_favorites_with_progress()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No favorites yet. Run `watchstate add <source> <id> --title <title>` first.");
        return Ok(());
    }

    println!(
        "{:<24} {:<36} {:<6} {:<12} {:<28}",
        "KEY", "TITLE", "TYPE", "EP", "SAVED"
    );
    for item in items {
        let episode = match item.current_episode {
            Some(current) => format!("{current}/{}", item.total_episodes),
            None => format!("-/{}", item.total_episodes),
        };
        println!(
            "{:<24} {:<36} {:<6} {:<12} {:<28}",
            truncate(&item.key(), 24),
            truncate(&item.title, 36),
            media_label(&item),
            episode,
            format_saved_at(item.saved_at)
        );
    }
    Ok(())
}
