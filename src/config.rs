use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::cli::{BackendKind, StoreArgs};
use crate::paths::database_file_path;
use crate::store::{MemoryBackend, RecordStore, RemoteBackend, RemoteOptions, SqliteBackend};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendSettings {
    Sqlite { path: PathBuf },
    Remote { base_url: String, timeout: Duration, attempts: usize },
    Memory,
}

/// Resolved store configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backend: BackendSettings,
}

impl Settings {
    pub fn from_args(args: &StoreArgs) -> Result<Self> {
        let backend = match args.backend {
            BackendKind::Sqlite => BackendSettings::Sqlite {
                path: match &args.db {
                    Some(path) => path.clone(),
                    None => database_file_path()?,
                },
            },
            BackendKind::Remote => {
                let Some(base_url) = args.remote_url.as_deref().map(str::trim) else {
                    bail!("the remote backend needs --remote-url or WATCHSTATE_REMOTE_URL");
                };
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                    bail!("remote url must start with http:// or https://, got '{base_url}'");
                }
                if args.attempts == 0 {
                    bail!("--attempts must be at least 1");
                }
                BackendSettings::Remote {
                    base_url: base_url.to_string(),
                    timeout: Duration::from_millis(args.timeout_ms.max(1)),
                    attempts: args.attempts,
                }
            }
            BackendKind::Memory => BackendSettings::Memory,
        };
        Ok(Self { backend })
    }

    pub fn open_store(&self) -> Result<RecordStore> {
        let store = match &self.backend {
            BackendSettings::Sqlite { path } => RecordStore::new(
                SqliteBackend::open(path)
                    .with_context(|| format!("failed to open store at {}", path.display()))?,
            ),
            BackendSettings::Remote {
                base_url,
                timeout,
                attempts,
            } => RecordStore::new(RemoteBackend::new(RemoteOptions {
                base_url: base_url.clone(),
                timeout: *timeout,
                attempts: *attempts,
            })),
            BackendSettings::Memory => RecordStore::new(MemoryBackend::default()),
        };
        Ok(store)
    }
}
