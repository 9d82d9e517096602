use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::http::{RetryPolicy, send_with_retries};
use crate::record::RecordKind;

use super::StoreBackend;

const BACKEND: &str = "remote";

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub attempts: usize,
}

/// Record store served by an HTTP service.
///
/// Each kind is a collection under `{base}/api/{favorites|playrecords}`:
/// `GET` returns the full `{key: record}` object, `GET ?key=` a single record
/// (404 when absent), `POST {key, record}` upserts, `DELETE ?key=` removes one
/// record and a bare `DELETE` clears the collection.
pub struct RemoteBackend {
    base_url: String,
    policy: RetryPolicy,
}

impl RemoteBackend {
    pub fn new(options: RemoteOptions) -> Self {
        Self {
            base_url: options.base_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy {
                connect_timeout: options.timeout,
                read_timeout: options.timeout,
                attempts: options.attempts,
                retry_delay: Duration::from_millis(250),
            },
        }
    }

    fn endpoint(&self, kind: RecordKind) -> String {
        format!("{}/api/{}", self.base_url, kind.storage_name())
    }

    fn send(
        &self,
        method: &str,
        kind: RecordKind,
        key: Option<&str>,
        body: Option<&str>,
    ) -> StoreResult<Option<String>> {
        let query = key
            .map(|key| vec![("key".to_string(), key.to_string())])
            .unwrap_or_default();
        send_with_retries(method, &self.endpoint(kind), &query, body, &self.policy)
            .map_err(|reason| StoreError::unavailable(BACKEND, reason))
    }
}

impl StoreBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get_all(&self, kind: RecordKind) -> StoreResult<BTreeMap<String, String>> {
        let Some(body) = self.send("GET", kind, None, None)? else {
            return Err(StoreError::unavailable(
                BACKEND,
                format!("{} collection not found", kind.storage_name()),
            ));
        };
        let parsed: BTreeMap<String, Value> = serde_json::from_str(&body).map_err(|err| {
            StoreError::unavailable(BACKEND, format!("malformed {kind} snapshot: {err}"))
        })?;
        Ok(parsed
            .into_iter()
            .map(|(key, record)| (key, record.to_string()))
            .collect())
    }

    fn get(&self, kind: RecordKind, key: &str) -> StoreResult<Option<String>> {
        let Some(body) = self.send("GET", kind, Some(key), None)? else {
            return Ok(None);
        };
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }

    fn put(&self, kind: RecordKind, key: &str, payload: &str) -> StoreResult<()> {
        let record: Value = serde_json::from_str(payload).map_err(|err| StoreError::Codec {
            kind,
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        let body = json!({ "key": key, "record": record }).to_string();
        self.send("POST", kind, None, Some(&body))?;
        Ok(())
    }

    fn delete(&self, kind: RecordKind, key: &str) -> StoreResult<()> {
        self.send("DELETE", kind, Some(key), None)?;
        Ok(())
    }

    fn clear(&self, kind: RecordKind) -> StoreResult<()> {
        self.send("DELETE", kind, None, None)?;
        let remaining = self.get_all(kind)?.len();
        if remaining > 0 {
            warn!(%kind, remaining, "remote clear left records behind");
            return Err(StoreError::PartialClear { kind, remaining });
        }
        Ok(())
    }
}
