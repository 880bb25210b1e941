//! Actor snapshot cache
//!
//! Filtering passes run off the host's main thread, where the live actor API
//! must not be touched. This cache keeps a snapshot of the data those passes
//! need (display name, world, tracked permissions), repopulated on a fixed
//! cadence by a refresher that runs on the privileged context.
//!
//! Readers get the most recent snapshot and never wait on a refresh in
//! progress: the whole mapping lives behind an [`ArcSwap`] and the refresher
//! publishes each cycle's updates with a single pointer swap. Lookups for
//! actors the cache has not seen resolve to "unknown", and permission checks
//! against unknown actors fail closed.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::{HostBridge, HostDirectory};
use crate::config::EngineSettings;

/// Opaque identifier for a message author. Minted by the host; the engine
/// never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorRef(Uuid);

impl ActorRef {
    /// Mint a fresh reference. Hosts typically derive these from their own
    /// entity ids; tests mint them directly.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActorRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Point-in-time copy of one actor's host-owned attributes.
///
/// Written only by the refresher; read-only everywhere else.
#[derive(Debug, Clone)]
pub struct ActorSnapshot {
    pub display_name: String,
    pub world_name: String,
    pub granted_permissions: BTreeSet<String>,
    /// Refresh generation that produced this snapshot.
    pub refreshed_at_cycle: u64,
}

impl ActorSnapshot {
    pub fn has_permission(&self, perm: &str) -> bool {
        self.granted_permissions.contains(perm)
    }
}

type SnapshotMap = HashMap<ActorRef, Arc<ActorSnapshot>>;

/// Thread-safe store of per-actor snapshots.
///
/// Exactly one instance per process, constructed at startup and passed
/// explicitly to the components that read it. `start`/`stop` control the
/// periodic refresh; both are idempotent.
pub struct ActorSnapshotCache {
    snapshots: ArcSwap<SnapshotMap>,
    tracked_perms: Mutex<BTreeSet<String>>,
    // Mutated only from the privileged context (refresh cycles); the lock is
    // shared with dump_state.
    queue: Mutex<VecDeque<ActorRef>>,
    generation: AtomicU64,
    batch_size: usize,
    running: AtomicBool,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ActorSnapshotCache {
    fn default() -> Self {
        Self::with_batch_size(EngineSettings::default().refresh_batch_size)
    }
}

impl ActorSnapshotCache {
    pub fn new(settings: &EngineSettings) -> Self {
        Self::with_batch_size(settings.refresh_batch_size)
    }

    fn with_batch_size(batch_size: usize) -> Self {
        Self {
            snapshots: ArcSwap::from_pointee(SnapshotMap::new()),
            tracked_perms: Mutex::new(BTreeSet::new()),
            queue: Mutex::new(VecDeque::new()),
            generation: AtomicU64::new(0),
            batch_size: batch_size.max(1),
            running: AtomicBool::new(false),
            refresher: Mutex::new(None),
        }
    }

    /// Most recent snapshot for `actor`, or `None` if the cache has not seen
    /// it yet. Never blocks on a refresh in progress.
    pub fn lookup(&self, actor: &ActorRef) -> Option<Arc<ActorSnapshot>> {
        self.snapshots.load().get(actor).cloned()
    }

    /// Whether `actor` held `perm` as of the last refresh. Unknown actors
    /// fail closed.
    pub fn has_permission(&self, actor: &ActorRef, perm: &str) -> bool {
        self.lookup(actor).is_some_and(|s| s.has_permission(perm))
    }

    /// Track `perm` in future refresh cycles. Already-cached snapshots pick
    /// it up on their next refresh, not retroactively.
    pub fn register_permission(&self, perm: &str) {
        self.tracked_perms.lock().insert(perm.to_string());
    }

    /// Bulk form of [`register_permission`](Self::register_permission).
    pub fn register_permissions<I, S>(&self, perms: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tracked = self.tracked_perms.lock();
        tracked.extend(perms.into_iter().map(Into::into));
    }

    /// Number of cached actors.
    pub fn len(&self) -> usize {
        self.snapshots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.load().is_empty()
    }

    /// Completed refresh cycle count.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Run one refresh cycle. Must only be called from the privileged
    /// context; everything else goes through [`start`](Self::start).
    ///
    /// Processes at most `batch_size` queued actors. When the queue drains,
    /// the cycle repopulates it from the current online list and evicts
    /// snapshots for actors no longer online. One actor's lookup failure is
    /// logged and skipped; the cycle continues with the rest of the batch.
    pub fn refresh_cycle(&self, directory: &mut dyn HostDirectory) {
        let cycle = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut next: SnapshotMap = (**self.snapshots.load()).clone();

        let batch: Vec<ActorRef> = {
            let mut queue = self.queue.lock();
            if queue.is_empty() {
                match directory.online_actors() {
                    Ok(online) => {
                        queue.extend(online.iter().copied());
                        let online: std::collections::HashSet<_> = online.into_iter().collect();
                        next.retain(|actor, _| online.contains(actor));
                    }
                    Err(e) => {
                        warn!("online-actor listing failed, keeping stale cache: {e:#}");
                    }
                }
            }
            let take = self.batch_size.min(queue.len());
            queue.drain(..take).collect()
        };

        let perms: Vec<String> = self.tracked_perms.lock().iter().cloned().collect();

        for actor in batch {
            match self.snapshot_actor(directory, &actor, &perms, cycle) {
                Ok(snapshot) => {
                    next.insert(actor, Arc::new(snapshot));
                }
                Err(e) => {
                    warn!(%actor, "skipping actor this cycle: {e:#}");
                }
            }
        }

        self.snapshots.store(Arc::new(next));
    }

    fn snapshot_actor(
        &self,
        directory: &mut dyn HostDirectory,
        actor: &ActorRef,
        perms: &[String],
        cycle: u64,
    ) -> anyhow::Result<ActorSnapshot> {
        let display_name = directory.actor_name(actor)?;
        let world_name = directory.actor_world(actor)?;
        let mut granted_permissions = BTreeSet::new();
        for perm in perms {
            if directory.has_live_permission(actor, perm)? {
                granted_permissions.insert(perm.clone());
            }
        }
        Ok(ActorSnapshot {
            display_name,
            world_name,
            granted_permissions,
            refreshed_at_cycle: cycle,
        })
    }

    /// Begin scheduling refresh cycles onto the privileged context, every
    /// `tick_ms * refresh_interval_ticks` milliseconds. No-op if already
    /// started.
    pub fn start(self: &Arc<Self>, settings: &EngineSettings, bridge: &HostBridge) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let period = Duration::from_millis(settings.tick_ms * settings.refresh_interval_ticks);
        let bridge = bridge.clone();
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let cache = Arc::clone(&cache);
                let scheduled = bridge.run(Box::new(move |directory| {
                    // stop() may have raced the tick; a stopped cache runs no
                    // further cycles.
                    if cache.running.load(Ordering::SeqCst) {
                        cache.refresh_cycle(directory);
                    }
                }));
                if !scheduled {
                    debug!("privileged bridge gone, refresher exiting");
                    break;
                }
            }
        });
        *self.refresher.lock() = Some(handle);
        debug!(period_ms = period.as_millis() as u64, "snapshot refresher started");
    }

    /// Cancel the periodic refresh. Idempotent; a no-op when not started.
    /// After this returns, no further cycles run (a cycle already executing
    /// on the privileged context is allowed to finish).
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.refresher.lock().take() {
            handle.abort();
        }
        debug!("snapshot refresher stopped");
    }

    /// Render a human-readable snapshot of cache contents for operational
    /// inspection (size, queue length, tracked permissions, per-actor
    /// attributes).
    pub fn dump_state(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let snapshots = self.snapshots.load();
        writeln!(out, "snapshot cache: {} actors cached", snapshots.len())?;
        writeln!(out, "refresh generation: {}", self.generation())?;
        writeln!(out, "queued for refresh: {}", self.queue.lock().len())?;

        let tracked = self.tracked_perms.lock();
        writeln!(out, "tracked permissions ({}):", tracked.len())?;
        for perm in tracked.iter() {
            writeln!(out, "  {perm}")?;
        }
        drop(tracked);

        writeln!(out, "----- actor snapshots -----")?;
        let mut entries: Vec<_> = snapshots.iter().collect();
        entries.sort_by_key(|(actor, _)| **actor);
        for (actor, snapshot) in entries {
            writeln!(
                out,
                "  {actor} name={} world={} perms=[{}] cycle={}",
                snapshot.display_name,
                snapshot.world_name,
                snapshot
                    .granted_permissions
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
                snapshot.refreshed_at_cycle,
            )?;
        }
        Ok(())
    }
}

impl Drop for ActorSnapshotCache {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::StubDirectory;

    #[test]
    fn test_unknown_actor_fails_closed() {
        let cache = ActorSnapshotCache::default();
        let stranger = ActorRef::new();
        assert!(cache.lookup(&stranger).is_none());
        assert!(!cache.has_permission(&stranger, "chat.bypass"));
    }

    #[test]
    fn test_refresh_populates_and_evicts() {
        let cache = ActorSnapshotCache::default();
        let mut directory = StubDirectory::new();
        let alice = directory.add_actor("Alice", "overworld", &["chat.color"]);
        let bob = directory.add_actor("Bob", "nether", &[]);
        cache.register_permission("chat.color");

        // Cycle 1 queues everyone, cycle work fits in one batch.
        cache.refresh_cycle(&mut directory);
        let snap = cache.lookup(&alice).unwrap();
        assert_eq!(snap.display_name, "Alice");
        assert_eq!(snap.world_name, "overworld");
        assert!(cache.has_permission(&alice, "chat.color"));
        assert!(!cache.has_permission(&bob, "chat.color"));

        // Bob logs off; next drained cycle evicts him.
        directory.remove_actor(&bob);
        cache.refresh_cycle(&mut directory);
        assert!(cache.lookup(&bob).is_none());
        assert!(cache.lookup(&alice).is_some());
    }

    #[test]
    fn test_registration_applies_next_cycle() {
        let cache = ActorSnapshotCache::default();
        let mut directory = StubDirectory::new();
        let alice = directory.add_actor("Alice", "overworld", &["chat.bypass"]);

        cache.refresh_cycle(&mut directory);
        assert!(!cache.has_permission(&alice, "chat.bypass"));

        cache.register_permission("chat.bypass");
        // Not retroactive: still closed until Alice's snapshot refreshes.
        assert!(!cache.has_permission(&alice, "chat.bypass"));
        cache.refresh_cycle(&mut directory);
        assert!(cache.has_permission(&alice, "chat.bypass"));
    }

    #[test]
    fn test_batch_is_bounded_per_cycle() {
        let settings = EngineSettings {
            refresh_batch_size: 2,
            ..EngineSettings::default()
        };
        let cache = ActorSnapshotCache::new(&settings);
        let mut directory = StubDirectory::new();
        for i in 0..5 {
            directory.add_actor(&format!("actor{i}"), "overworld", &[]);
        }

        cache.refresh_cycle(&mut directory);
        assert_eq!(cache.len(), 2);
        cache.refresh_cycle(&mut directory);
        assert_eq!(cache.len(), 4);
        cache.refresh_cycle(&mut directory);
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_single_actor_failure_does_not_abort_cycle() {
        let cache = ActorSnapshotCache::default();
        let mut directory = StubDirectory::new();
        let broken = directory.add_actor("Broken", "overworld", &[]);
        let alice = directory.add_actor("Alice", "overworld", &[]);
        directory.fail_lookups_for(&broken);

        cache.refresh_cycle(&mut directory);
        assert!(cache.lookup(&broken).is_none());
        assert_eq!(cache.lookup(&alice).unwrap().display_name, "Alice");
    }

    #[test]
    fn test_dump_state_lists_actors() {
        let cache = ActorSnapshotCache::default();
        let mut directory = StubDirectory::new();
        directory.add_actor("Alice", "overworld", &[]);
        cache.refresh_cycle(&mut directory);

        let mut dump = String::new();
        cache.dump_state(&mut dump).unwrap();
        assert!(dump.contains("1 actors cached"));
        assert!(dump.contains("name=Alice"));
        assert!(dump.contains("world=overworld"));
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let cache = ActorSnapshotCache::default();
        cache.stop();
        cache.stop();
    }
}
