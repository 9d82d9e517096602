//! The only entry point views call to read or change watch state.
//!
//! Every mutation follows the same sequence per record kind: write through the
//! store, read the full snapshot back, publish it on the bus. Each mutation
//! draws a sequence number while holding the kind's write lock, and a
//! read-back whose number is not newer than the last published one is
//! dropped, so a slow read-back can never overwrite a later write's publish.
//! Favorites and progress have separate locks and never wait on each other.
//! Delivery to subscribers happens after the snapshot lock is released, so
//! handlers may read either kind back through the coordinator.

mod clock;
mod view;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info, warn};

use crate::bus::{ChangeBus, ChangeEvent, SubscriptionToken, Topic};
use crate::error::{StoreResult, SyncResult};
use crate::key::RecordKey;
use crate::record::{
    FavoriteFields, FavoriteRecord, FavoriteSnapshot, PlayProgressRecord, ProgressSnapshot,
    RecordKind, Snapshot, StoredRecord,
};
use crate::store::RecordStore;

pub use self::clock::{Clock, SystemClock};
pub use self::view::{FavoriteView, join_favorites};

#[cfg(test)]
pub use self::clock::ManualClock;

trait Publishable: StoredRecord {
    fn event(snapshot: Arc<Snapshot<Self>>) -> ChangeEvent;
}

impl Publishable for FavoriteRecord {
    fn event(snapshot: Arc<Snapshot<Self>>) -> ChangeEvent {
        ChangeEvent::Favorites(snapshot)
    }
}

impl Publishable for PlayProgressRecord {
    fn event(snapshot: Arc<Snapshot<Self>>) -> ChangeEvent {
        ChangeEvent::PlayProgress(snapshot)
    }
}

struct Published<R> {
    seq: u64,
    cache: Option<Arc<Snapshot<R>>>,
}

/// Serialization state for one record kind.
struct Lane<R> {
    /// Last issued sequence number. Held for the duration of a store write.
    issued: Mutex<u64>,
    /// Last published sequence number and the snapshot it carried.
    published: Mutex<Published<R>>,
    /// Held while handlers run so deliveries reach them in sequence order.
    delivery: ReentrantMutex<()>,
}

impl<R> Default for Lane<R> {
    fn default() -> Self {
        Self {
            issued: Mutex::new(0),
            published: Mutex::new(Published {
                seq: 0,
                cache: None,
            }),
            delivery: ReentrantMutex::new(()),
        }
    }
}

pub struct SyncCoordinator {
    store: RecordStore,
    bus: ChangeBus,
    clock: Arc<dyn Clock>,
    favorites: Lane<FavoriteRecord>,
    progress: Lane<PlayProgressRecord>,
}

impl SyncCoordinator {
    pub fn new(store: RecordStore, bus: ChangeBus) -> Self {
        Self::with_clock(store, bus, Arc::new(SystemClock))
    }

    pub fn with_clock(store: RecordStore, bus: ChangeBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bus,
            clock,
            favorites: Lane::default(),
            progress: Lane::default(),
        }
    }

    /// Handlers run synchronously on the mutating thread. They may read any
    /// kind through this coordinator; mutations should be handed off to
    /// another thread, since a nested publish reaches later handlers before
    /// the outer one does.
    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.bus.subscribe(topic, handler)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.bus.unsubscribe(token)
    }

    pub fn upsert_favorite(
        &self,
        source: &str,
        id: &str,
        fields: FavoriteFields,
    ) -> SyncResult<FavoriteRecord> {
        let key = RecordKey::encode(source, id)?;
        let record = fields.into_record(&key, self.clock.now_ms());
        self.mutate(&self.favorites, |store| store.put(&key, &record))?;
        info!(%key, title = %record.title, "favorite saved");
        Ok(record)
    }

    pub fn remove_favorite(&self, source: &str, id: &str) -> SyncResult<()> {
        let key = RecordKey::encode(source, id)?;
        self.mutate(&self.favorites, |store| {
            store.delete(RecordKind::Favorites, &key)
        })?;
        info!(%key, "favorite removed");
        Ok(())
    }

    /// Removes every favorite and publishes an empty snapshot. On failure
    /// nothing is published and the cached snapshot is left as it was.
    /// Progress records are untouched.
    pub fn clear_all_favorites(&self) -> SyncResult<()> {
        let seq = self.write(&self.favorites, |store| store.clear(RecordKind::Favorites))?;
        self.publish(&self.favorites, seq, Arc::new(FavoriteSnapshot::new()));
        info!("all favorites cleared");
        Ok(())
    }

    pub fn record_progress(
        &self,
        source: &str,
        id: &str,
        episode_index: u32,
    ) -> SyncResult<PlayProgressRecord> {
        let key = RecordKey::encode(source, id)?;
        let record = PlayProgressRecord {
            source: key.source().to_string(),
            id: key.id().to_string(),
            episode_index,
            saved_at: self.clock.now_ms(),
        };
        self.mutate(&self.progress, |store| store.put(&key, &record))?;
        info!(%key, episode_index, "progress recorded");
        Ok(record)
    }

    pub fn remove_progress(&self, source: &str, id: &str) -> SyncResult<()> {
        let key = RecordKey::encode(source, id)?;
        self.mutate(&self.progress, |store| {
            store.delete(RecordKind::PlayProgress, &key)
        })?;
        info!(%key, "progress removed");
        Ok(())
    }

    pub fn get_favorite(&self, source: &str, id: &str) -> SyncResult<Option<FavoriteRecord>> {
        let key = RecordKey::encode(source, id)?;
        Ok(self.store.get(&key)?)
    }

    pub fn is_favorited(&self, source: &str, id: &str) -> SyncResult<bool> {
        Ok(self.get_favorite(source, id)?.is_some())
    }

    pub fn get_progress(&self, source: &str, id: &str) -> SyncResult<Option<PlayProgressRecord>> {
        let key = RecordKey::encode(source, id)?;
        Ok(self.store.get(&key)?)
    }

    /// Last published favorites, reading through the store when nothing has
    /// been published yet.
    pub fn favorites_snapshot(&self) -> SyncResult<Arc<FavoriteSnapshot>> {
        self.cached(&self.favorites)
    }

    pub fn progress_snapshot(&self) -> SyncResult<Arc<ProgressSnapshot>> {
        self.cached(&self.progress)
    }

    /// Re-reads one kind from the store and publishes it, picking up writes
    /// made by other processes sharing the backend.
    pub fn refresh(&self, kind: RecordKind) -> SyncResult<()> {
        match kind {
            RecordKind::Favorites => {
                self.mutate(&self.favorites, |_| Ok(()))?;
            }
            RecordKind::PlayProgress => {
                self.mutate(&self.progress, |_| Ok(()))?;
            }
        }
        debug!(%kind, "refreshed from store");
        Ok(())
    }

    pub fn load_favorites_with_progress(&self) -> SyncResult<Vec<FavoriteView>> {
        let favorites = self.favorites_snapshot()?;
        self.join_with_progress(&favorites)
    }

    /// Joins a favorites snapshot (typically one received from the bus) with
    /// the current progress snapshot.
    pub fn join_with_progress(&self, favorites: &FavoriteSnapshot) -> SyncResult<Vec<FavoriteView>> {
        let progress = self.progress_snapshot()?;
        Ok(join_favorites(favorites, &progress)?)
    }

    fn mutate<R: Publishable>(
        &self,
        lane: &Lane<R>,
        op: impl FnOnce(&RecordStore) -> StoreResult<()>,
    ) -> SyncResult<Arc<Snapshot<R>>> {
        let seq = self.write(lane, op)?;
        let snapshot = match self.store.get_all::<R>() {
            Ok(records) => Arc::new(records),
            Err(err) => {
                // The write landed, so the cached snapshot no longer matches the store.
                let kind = R::KIND;
                lane.published.lock().cache = None;
                warn!(%kind, seq, error = %err, "read-back failed, cache dropped");
                return Err(err.into());
            }
        };
        self.publish(lane, seq, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn write<R>(
        &self,
        lane: &Lane<R>,
        op: impl FnOnce(&RecordStore) -> StoreResult<()>,
    ) -> SyncResult<u64> {
        let mut issued = lane.issued.lock();
        *issued += 1;
        let seq = *issued;
        op(&self.store)?;
        Ok(seq)
    }

    fn publish<R: Publishable>(&self, lane: &Lane<R>, seq: u64, snapshot: Arc<Snapshot<R>>) -> bool {
        let kind = R::KIND;
        let _delivery = lane.delivery.lock();
        {
            let mut published = lane.published.lock();
            if seq <= published.seq {
                debug!(%kind, seq, latest = published.seq, "dropping stale read-back");
                return false;
            }
            published.seq = seq;
            published.cache = Some(Arc::clone(&snapshot));
        }
        self.bus.publish(&R::event(snapshot));
        true
    }

    fn cached<R: Publishable>(&self, lane: &Lane<R>) -> SyncResult<Arc<Snapshot<R>>> {
        if let Some(snapshot) = lane.published.lock().cache.clone() {
            return Ok(snapshot);
        }

        let snapshot = Arc::new(self.store.get_all::<R>()?);
        let mut published = lane.published.lock();
        // A publish that landed during the read wins over this cold read.
        match &published.cache {
            Some(newer) => Ok(Arc::clone(newer)),
            None => {
                published.cache = Some(Arc::clone(&snapshot));
                Ok(snapshot)
            }
        }
    }
}
