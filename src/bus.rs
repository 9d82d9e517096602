//! In-process change notifications.
//!
//! A [`ChangeBus`] is an explicit registry handle: whoever boots the
//! application creates it and passes clones to every component that publishes
//! or subscribes. Delivery is synchronous and in registration order within a
//! topic; nothing crosses process boundaries.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::record::{FavoriteSnapshot, ProgressSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    FavoritesChanged,
    PlayProgressChanged,
}

impl Topic {
    pub fn name(self) -> &'static str {
        match self {
            Self::FavoritesChanged => "favoritesChanged",
            Self::PlayProgressChanged => "playProgressChanged",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Full snapshot delivered to subscribers of one topic.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Favorites(Arc<FavoriteSnapshot>),
    PlayProgress(Arc<ProgressSnapshot>),
}

impl ChangeEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::Favorites(_) => Topic::FavoritesChanged,
            Self::PlayProgress(_) => Topic::PlayProgressChanged,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Favorites(snapshot) => snapshot.len(),
            Self::PlayProgress(snapshot) => snapshot.len(),
        }
    }
}

type Handler = Arc<dyn Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    id: u64,
    topic: Topic,
}

impl SubscriptionToken {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<Topic, Vec<(u64, Handler)>>,
}

#[derive(Clone, Default)]
pub struct ChangeBus {
    registry: Arc<Mutex<Registry>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> SubscriptionToken {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(%topic, id, "subscribed");
        SubscriptionToken { id, topic }
    }

    /// Returns whether the token was still registered.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut registry = self.registry.lock();
        let Some(handlers) = registry.handlers.get_mut(&token.topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != token.id);
        before != handlers.len()
    }

    /// Invokes every handler registered for the event's topic at the time of
    /// the call. A handler that errors or panics is logged and skipped.
    pub fn publish(&self, event: &ChangeEvent) -> PublishReport {
        let topic = event.topic();
        let handlers: Vec<(u64, Handler)> = self
            .registry
            .lock()
            .handlers
            .get(&topic)
            .cloned()
            .unwrap_or_default();

        let mut report = PublishReport::default();
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    warn!(%topic, id, error = %err, "subscriber failed");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(%topic, id, "subscriber panicked");
                    report.failed += 1;
                }
            }
        }
        debug!(%topic, records = event.len(), delivered = report.delivered, failed = report.failed, "published");
        report
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry
            .lock()
            .handlers
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Drops every registration on every topic.
    pub fn teardown(&self) {
        self.registry.lock().handlers.clear();
    }
}
