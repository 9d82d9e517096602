use std::path::PathBuf;

use anyhow::{Context, Result};

fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("watchstate"))
}

pub fn database_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("watchstate.db"))
}

pub fn log_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("watchstate.log"))
}
