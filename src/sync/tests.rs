use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;

use super::*;
use crate::error::{StoreError, SyncError};
use crate::store::{MemoryBackend, StoreBackend};

/// Memory backend with switchable failures and an optional pause inside the
/// next favorites snapshot read.
#[derive(Default)]
struct FaultyBackend {
    inner: MemoryBackend,
    fail_puts: AtomicBool,
    partial_clear: AtomicBool,
    unavailable_clear: AtomicBool,
    backend_calls: AtomicUsize,
    failing_favorites_reads: AtomicUsize,
    pause_next_snapshot: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl FaultyBackend {
    /// Returns (reached, release): `reached` fires once the next favorites
    /// snapshot read starts; the read then blocks until `release` is sent.
    fn pause_next_favorites_read(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.pause_next_snapshot.lock() = Some((reached_tx, release_rx));
        (reached_rx, release_tx)
    }
}

impl StoreBackend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn get_all(&self, kind: RecordKind) -> StoreResult<BTreeMap<String, String>> {
        self.backend_calls.fetch_add(1, Ordering::SeqCst);
        if kind == RecordKind::Favorites {
            let failing = self.failing_favorites_reads.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_favorites_reads.store(failing - 1, Ordering::SeqCst);
                return Err(StoreError::unavailable("faulty", "connection reset"));
            }
            let pause = self.pause_next_snapshot.lock().take();
            if let Some((reached, release)) = pause {
                let snapshot = self.inner.get_all(kind);
                let _ = reached.send(());
                let _ = release.recv();
                return snapshot;
            }
        }
        self.inner.get_all(kind)
    }

    fn get(&self, kind: RecordKind, key: &str) -> StoreResult<Option<String>> {
        self.backend_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(kind, key)
    }

    fn put(&self, kind: RecordKind, key: &str, payload: &str) -> StoreResult<()> {
        self.backend_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("faulty", "quota exceeded"));
        }
        self.inner.put(kind, key, payload)
    }

    fn delete(&self, kind: RecordKind, key: &str) -> StoreResult<()> {
        self.backend_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(kind, key)
    }

    fn clear(&self, kind: RecordKind) -> StoreResult<()> {
        self.backend_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable_clear.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("faulty", "permission denied"));
        }
        if self.partial_clear.load(Ordering::SeqCst) {
            return Err(StoreError::PartialClear {
                kind,
                remaining: self.inner.get_all(kind)?.len(),
            });
        }
        self.inner.clear(kind)
    }
}

struct Harness {
    backend: Arc<FaultyBackend>,
    clock: Arc<ManualClock>,
    coordinator: SyncCoordinator,
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl Harness {
    fn new() -> Self {
        let backend = Arc::new(FaultyBackend::default());
        let shared: Arc<dyn StoreBackend> = backend.clone();
        let clock = Arc::new(ManualClock::at(1));
        let coordinator =
            SyncCoordinator::with_clock(RecordStore::from_shared(shared), ChangeBus::new(), clock.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        for topic in [Topic::FavoritesChanged, Topic::PlayProgressChanged] {
            let events = Arc::clone(&events);
            coordinator.subscribe(topic, move |event| {
                events.lock().push(event.clone());
                Ok(())
            });
        }

        Self {
            backend,
            clock,
            coordinator,
            events,
        }
    }

    fn favorite_at(&self, id: &str, saved_at: i64) {
        self.clock.set(saved_at);
        self.coordinator
            .upsert_favorite("src", id, fields(&format!("title-{id}"), 1))
            .expect("upsert favorite");
    }

    fn favorite_events(&self) -> Vec<Arc<FavoriteSnapshot>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ChangeEvent::Favorites(snapshot) => Some(Arc::clone(snapshot)),
                ChangeEvent::PlayProgress(_) => None,
            })
            .collect()
    }

    fn progress_events(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.topic() == Topic::PlayProgressChanged)
            .count()
    }

    fn clear_events(&self) {
        self.events.lock().clear();
    }
}

fn fields(title: &str, total_episodes: u32) -> FavoriteFields {
    FavoriteFields {
        title: title.to_string(),
        poster_url: "https://img.test/p.jpg".to_string(),
        total_episodes,
        source_name: "Source".to_string(),
        year: Some("2024".to_string()),
        search_title: None,
    }
}

#[test]
fn favorite_joined_with_progress() {
    let harness = Harness::new();
    harness.clock.set(100);
    harness
        .coordinator
        .upsert_favorite("doubei", "42", fields("X", 12))
        .expect("upsert favorite");
    harness.clock.set(150);
    harness
        .coordinator
        .record_progress("doubei", "42", 3)
        .expect("record progress");

    let items = harness
        .coordinator
        .load_favorites_with_progress()
        .expect("load");

    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.source, "doubei");
    assert_eq!(item.id, "42");
    assert_eq!(item.title, "X");
    assert_eq!(item.total_episodes, 12);
    assert_eq!(item.current_episode, Some(3));
    assert_eq!(item.saved_at, 100);
}

#[test]
fn load_orders_most_recent_first() {
    let harness = Harness::new();
    harness.favorite_at("a", 100);
    harness.favorite_at("b", 300);
    harness.favorite_at("c", 200);

    let items = harness
        .coordinator
        .load_favorites_with_progress()
        .expect("load");

    let order: Vec<i64> = items.iter().map(|item| item.saved_at).collect();
    assert_eq!(order, vec![300, 200, 100]);
}

#[test]
fn upsert_publishes_full_read_back_snapshot() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    harness.favorite_at("b", 20);

    let published = harness.favorite_events();
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].keys().collect::<Vec<_>>(), vec!["src+a", "src+b"]);
    assert_eq!(harness.progress_events(), 0);
}

#[test]
fn re_favorite_overwrites_metadata_at_same_key() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    harness.clock.set(99);
    harness
        .coordinator
        .upsert_favorite("src", "a", fields("Renamed", 24))
        .expect("upsert favorite");

    let snapshot = harness.coordinator.favorites_snapshot().expect("snapshot");
    assert_eq!(snapshot.len(), 1);
    let record = &snapshot["src+a"];
    assert_eq!(record.title, "Renamed");
    assert_eq!(record.total_episodes, 24);
    assert_eq!(record.saved_at, 99);
}

#[test]
fn clear_all_leaves_progress_untouched() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    harness.favorite_at("b", 20);
    harness
        .coordinator
        .record_progress("src", "a", 5)
        .expect("record progress");
    let progress_before = harness.coordinator.progress_snapshot().expect("snapshot");
    harness.clear_events();

    harness.coordinator.clear_all_favorites().expect("clear");

    let store = RecordStore::from_shared(harness.backend.clone());
    assert!(store.get_all::<FavoriteRecord>().expect("favorites").is_empty());
    assert_eq!(
        store.get_all::<PlayProgressRecord>().expect("progress"),
        *progress_before
    );
    let published = harness.favorite_events();
    assert_eq!(published.len(), 1);
    assert!(published[0].is_empty());
    assert_eq!(harness.progress_events(), 0);
}

#[test]
fn failed_clear_publishes_nothing_and_keeps_snapshot() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    harness.favorite_at("b", 20);
    let before = harness.coordinator.favorites_snapshot().expect("snapshot");
    harness.clear_events();
    harness.backend.partial_clear.store(true, Ordering::SeqCst);

    let err = harness
        .coordinator
        .clear_all_favorites()
        .expect_err("clear must fail");

    assert!(matches!(
        err,
        SyncError::Store(StoreError::PartialClear { remaining: 2, .. })
    ));
    assert!(harness.favorite_events().is_empty());
    let store = RecordStore::from_shared(harness.backend.clone());
    assert_eq!(store.get_all::<FavoriteRecord>().expect("favorites"), *before);
    assert_eq!(
        harness.coordinator.favorites_snapshot().expect("snapshot"),
        before
    );
}

#[test]
fn unavailable_clear_is_surfaced_and_silent() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    harness.clear_events();
    harness.backend.unavailable_clear.store(true, Ordering::SeqCst);

    let err = harness
        .coordinator
        .clear_all_favorites()
        .expect_err("clear must fail");

    assert!(matches!(err, SyncError::Store(StoreError::Unavailable { .. })));
    assert!(harness.favorite_events().is_empty());

    harness.backend.unavailable_clear.store(false, Ordering::SeqCst);
    harness.favorite_at("b", 20);
    assert_eq!(harness.favorite_events().len(), 1);
}

#[test]
fn failed_write_publishes_nothing() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    harness.clear_events();
    harness.backend.fail_puts.store(true, Ordering::SeqCst);

    let err = harness
        .coordinator
        .record_progress("src", "a", 2)
        .expect_err("put must fail");

    assert!(matches!(err, SyncError::Store(StoreError::Unavailable { .. })));
    assert!(harness.events.lock().is_empty());
}

#[test]
fn malformed_key_fails_before_any_store_call() {
    let harness = Harness::new();
    let calls_before = harness.backend.backend_calls.load(Ordering::SeqCst);

    let err = harness
        .coordinator
        .upsert_favorite("", "42", fields("X", 1))
        .expect_err("empty source");

    assert!(matches!(err, SyncError::Key(_)));
    assert_eq!(
        harness.backend.backend_calls.load(Ordering::SeqCst),
        calls_before
    );
    assert!(harness.events.lock().is_empty());
}

#[test]
fn invalid_episode_count_is_rejected() {
    let harness = Harness::new();

    let err = harness
        .coordinator
        .upsert_favorite("src", "1", fields("X", 0))
        .expect_err("zero episodes");

    assert!(matches!(err, SyncError::Store(StoreError::InvalidRecord { .. })));
    assert!(harness.events.lock().is_empty());
}

#[test]
fn throwing_subscriber_does_not_starve_later_ones() {
    let harness = Harness::new();
    let fresh = ChangeBus::new();
    let shared: Arc<dyn StoreBackend> = harness.backend.clone();
    let coordinator = SyncCoordinator::with_clock(
        RecordStore::from_shared(shared),
        fresh,
        harness.clock.clone(),
    );
    coordinator.subscribe(Topic::FavoritesChanged, |_| Err(anyhow!("view crashed")));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    coordinator.subscribe(Topic::FavoritesChanged, move |event| {
        counter.fetch_add(event.len(), Ordering::SeqCst);
        Ok(())
    });

    coordinator
        .upsert_favorite("src", "1", fields("X", 1))
        .expect("upsert favorite");

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn remove_favorite_publishes_snapshot_without_key() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    harness.favorite_at("b", 20);

    harness
        .coordinator
        .remove_favorite("src", "a")
        .expect("remove");
    harness
        .coordinator
        .remove_favorite("src", "a")
        .expect("remove twice");

    let published = harness.favorite_events();
    let last = published.last().expect("published");
    assert_eq!(last.keys().collect::<Vec<_>>(), vec!["src+b"]);
    assert!(!harness.coordinator.is_favorited("src", "a").expect("lookup"));
    assert!(harness.coordinator.is_favorited("src", "b").expect("lookup"));
}

#[test]
fn progress_operations_publish_on_progress_topic() {
    let harness = Harness::new();
    harness.clock.set(40);
    let record = harness
        .coordinator
        .record_progress("src", "x+y", 7)
        .expect("record progress");
    assert_eq!(record.id, "x+y");
    assert_eq!(record.saved_at, 40);
    assert_eq!(
        harness
            .coordinator
            .get_progress("src", "x+y")
            .expect("lookup")
            .map(|record| record.episode_index),
        Some(7)
    );

    harness
        .coordinator
        .remove_progress("src", "x+y")
        .expect("remove progress");

    assert_eq!(harness.progress_events(), 2);
    assert!(harness.favorite_events().is_empty());
    assert!(harness.coordinator.progress_snapshot().expect("snapshot").is_empty());
}

#[test]
fn stale_read_back_is_not_published_over_newer_write() {
    let harness = Harness::new();
    let (reached, release) = harness.backend.pause_next_favorites_read();

    std::thread::scope(|scope| {
        let slow = scope.spawn(|| {
            harness
                .coordinator
                .upsert_favorite("src", "1", fields("first", 1))
        });

        reached.recv().expect("slow read-back started");
        harness.favorite_at("1", 2);
        let newer = harness.favorite_events();
        release.send(()).expect("release slow read-back");
        slow.join().expect("join").expect("slow upsert");

        assert_eq!(newer.len(), 1);
    });

    let published = harness.favorite_events();
    assert_eq!(published.len(), 1, "older read-back must be dropped");
    assert_eq!(published[0]["src+1"].title, "title-1");
    assert_eq!(
        harness.coordinator.favorites_snapshot().expect("snapshot")["src+1"].title,
        "title-1"
    );
}

#[test]
fn progress_writes_do_not_wait_on_a_stuck_favorites_read() {
    let harness = Harness::new();
    let (reached, release) = harness.backend.pause_next_favorites_read();

    std::thread::scope(|scope| {
        let slow = scope.spawn(|| {
            harness
                .coordinator
                .upsert_favorite("src", "1", fields("X", 1))
        });
        reached.recv().expect("favorites read-back started");

        harness
            .coordinator
            .record_progress("src", "1", 3)
            .expect("progress write proceeds");
        assert_eq!(harness.progress_events(), 1);

        release.send(()).expect("release");
        slow.join().expect("join").expect("favorite upsert");
    });

    assert_eq!(harness.favorite_events().len(), 1);
}

#[test]
fn refresh_publishes_writes_made_behind_the_coordinator() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    let stale = harness.coordinator.favorites_snapshot().expect("snapshot");
    assert_eq!(stale.len(), 1);

    let other_instance = RecordStore::from_shared(harness.backend.clone());
    let key = RecordKey::encode("src", "b").expect("valid key");
    other_instance
        .put(&key, &fields("B", 2).into_record(&key, 50))
        .expect("external write");
    assert_eq!(
        harness.coordinator.favorites_snapshot().expect("cached").len(),
        1
    );

    harness
        .coordinator
        .refresh(RecordKind::Favorites)
        .expect("refresh");

    assert_eq!(
        harness.coordinator.favorites_snapshot().expect("snapshot").len(),
        2
    );
    assert_eq!(harness.favorite_events().len(), 2);
}

#[test]
fn join_with_progress_uses_bus_snapshot() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    harness
        .coordinator
        .record_progress("src", "a", 9)
        .expect("record progress");
    let snapshot = harness.favorite_events().pop().expect("published");

    let items = harness
        .coordinator
        .join_with_progress(&snapshot)
        .expect("join");

    assert_eq!(items[0].current_episode, Some(9));
}

#[test]
fn failed_read_back_drops_the_cached_snapshot() {
    let harness = Harness::new();
    harness.favorite_at("a", 10);
    assert_eq!(harness.coordinator.favorites_snapshot().expect("snapshot").len(), 1);
    harness.backend.failing_favorites_reads.store(1, Ordering::SeqCst);

    harness.clock.set(20);
    let err = harness
        .coordinator
        .upsert_favorite("src", "b", fields("B", 1))
        .expect_err("read-back fails");

    assert!(matches!(err, SyncError::Store(StoreError::Unavailable { .. })));
    assert_eq!(harness.favorite_events().len(), 1);
    assert_eq!(
        harness.coordinator.favorites_snapshot().expect("read through").len(),
        2
    );
    let items = harness
        .coordinator
        .load_favorites_with_progress()
        .expect("load");
    assert_eq!(items[0].key(), "src+b");
}

fn shared_coordinator() -> Arc<SyncCoordinator> {
    Arc::new(SyncCoordinator::with_clock(
        RecordStore::new(MemoryBackend::default()),
        ChangeBus::new(),
        Arc::new(ManualClock::at(5)),
    ))
}

/// Every handler joins the current favorites with progress, like a list view does.
fn subscribe_joining_views(coordinator: &Arc<SyncCoordinator>) -> Arc<Mutex<Vec<Option<u32>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for topic in [Topic::FavoritesChanged, Topic::PlayProgressChanged] {
        let weak = Arc::downgrade(coordinator);
        let seen = Arc::clone(&seen);
        coordinator.subscribe(topic, move |_| {
            let coordinator = weak.upgrade().ok_or_else(|| anyhow!("coordinator dropped"))?;
            let items = coordinator.load_favorites_with_progress()?;
            seen.lock().push(items.first().and_then(|item| item.current_episode));
            Ok(())
        });
    }
    seen
}

#[test]
fn handlers_can_read_back_through_the_coordinator() {
    let coordinator = shared_coordinator();
    coordinator
        .upsert_favorite("src", "1", fields("X", 12))
        .expect("upsert");
    let seen = subscribe_joining_views(&coordinator);

    let (done_tx, done_rx) = mpsc::channel();
    let worker = Arc::clone(&coordinator);
    std::thread::spawn(move || {
        let progress = worker.record_progress("src", "1", 4);
        let favorite = worker.upsert_favorite("src", "1", fields("X2", 12));
        let _ = done_tx.send(progress.is_ok() && favorite.is_ok());
    });

    let succeeded = done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("mutations return while handlers read back");
    assert!(succeeded);
    assert_eq!(*seen.lock(), vec![Some(4), Some(4)]);
}

#[test]
fn cross_kind_reads_from_handlers_do_not_lock_up_concurrent_writers() {
    let coordinator = shared_coordinator();
    coordinator
        .upsert_favorite("src", "1", fields("X", 100))
        .expect("upsert");
    let seen = subscribe_joining_views(&coordinator);

    let (done_tx, done_rx) = mpsc::channel();
    for writer in 0..2 {
        let worker = Arc::clone(&coordinator);
        let done_tx = done_tx.clone();
        std::thread::spawn(move || {
            let ok = (0..50).all(|round| match writer {
                0 => worker.record_progress("src", "1", round).is_ok(),
                _ => worker.upsert_favorite("src", "1", fields("X", 100)).is_ok(),
            });
            let _ = done_tx.send(ok);
        });
    }

    for _ in 0..2 {
        let ok = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("writer finished");
        assert!(ok);
    }
    assert_eq!(seen.lock().len(), 100);
}
