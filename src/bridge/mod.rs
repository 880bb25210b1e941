//! Host bridge
//!
//! Two execution contexts exist: the host's privileged single-threaded
//! context (the only place allowed to query live actor state or deliver
//! messages) and any number of concurrent filtering passes. This module owns
//! the boundary: a [`HostDirectory`] trait the embedding host implements, and
//! a [`HostBridge`] that marshals work onto a single task owning that
//! directory. Filtering passes hand the bridge delivery requests
//! fire-and-forget; nothing off the privileged task ever touches the
//! directory directly.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::ActorRef;
use crate::filter::DeliveryRequest;

/// Live actor state and message delivery, as provided by the embedding host.
///
/// Every method is only ever invoked from the privileged task; implementors
/// do not need internal synchronization.
pub trait HostDirectory: Send {
    /// Actors currently online.
    fn online_actors(&mut self) -> Result<Vec<ActorRef>>;

    /// Current display name of an actor.
    fn actor_name(&mut self, actor: &ActorRef) -> Result<String>;

    /// Name of the world the actor is in.
    fn actor_world(&mut self, actor: &ActorRef) -> Result<String>;

    /// Live permission check.
    fn has_live_permission(&mut self, actor: &ActorRef, perm: &str) -> Result<bool>;

    /// Deliver a text message to an actor.
    fn deliver(&mut self, actor: &ActorRef, text: &str) -> Result<()>;
}

/// A unit of work to run on the privileged context.
pub type PrivilegedJob = Box<dyn FnOnce(&mut dyn HostDirectory) + Send>;

/// Handle for scheduling work onto the privileged context.
///
/// Cheap to clone; all clones feed the same single-task loop.
#[derive(Clone)]
pub struct HostBridge {
    tx: mpsc::UnboundedSender<PrivilegedJob>,
}

impl HostBridge {
    /// Start the privileged loop. The directory moves into a dedicated task
    /// and is never shared, which is what upholds the host's threading
    /// contract.
    pub fn spawn(mut directory: Box<dyn HostDirectory>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PrivilegedJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job(directory.as_mut());
            }
            debug!("privileged loop exited");
        });
        Self { tx }
    }

    /// Schedule a job onto the privileged context, fire-and-forget. Returns
    /// false when the loop has shut down.
    pub fn run(&self, job: PrivilegedJob) -> bool {
        self.tx.send(job).is_ok()
    }

    /// Dispatch pipeline delivery requests. Each request becomes one
    /// privileged `deliver` call; no caller waits for confirmation, and a
    /// failed delivery is logged and dropped.
    pub fn deliver_all(&self, requests: Vec<DeliveryRequest>) {
        for request in requests {
            self.run(Box::new(move |directory| {
                if let Err(e) = directory.deliver(&request.actor, &request.text) {
                    warn!(actor = %request.actor, "delivery failed: {e:#}");
                }
            }));
        }
    }
}

pub mod testing {
    //! In-memory host stub, shared by unit and integration tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use anyhow::{Result, anyhow};
    use parking_lot::Mutex;

    use super::HostDirectory;
    use crate::cache::ActorRef;

    #[derive(Default)]
    struct Inner {
        order: Vec<ActorRef>,
        names: HashMap<ActorRef, String>,
        worlds: HashMap<ActorRef, String>,
        perms: HashMap<ActorRef, HashSet<String>>,
        failing: HashSet<ActorRef>,
        delivered: Vec<(ActorRef, String)>,
        list_calls: usize,
    }

    /// Scriptable [`HostDirectory`]. Clones share state, so a test can keep
    /// one handle while the bridge owns another.
    #[derive(Clone, Default)]
    pub struct StubDirectory {
        inner: Arc<Mutex<Inner>>,
    }

    impl StubDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_actor(&mut self, name: &str, world: &str, perms: &[&str]) -> ActorRef {
            let actor = ActorRef::new();
            let mut inner = self.inner.lock();
            inner.order.push(actor);
            inner.names.insert(actor, name.to_string());
            inner.worlds.insert(actor, world.to_string());
            inner
                .perms
                .insert(actor, perms.iter().map(|p| p.to_string()).collect());
            actor
        }

        pub fn remove_actor(&mut self, actor: &ActorRef) {
            let mut inner = self.inner.lock();
            inner.order.retain(|a| a != actor);
            inner.names.remove(actor);
            inner.worlds.remove(actor);
            inner.perms.remove(actor);
        }

        /// Make every per-actor lookup for `actor` fail.
        pub fn fail_lookups_for(&mut self, actor: &ActorRef) {
            self.inner.lock().failing.insert(*actor);
        }

        pub fn grant(&mut self, actor: &ActorRef, perm: &str) {
            self.inner
                .lock()
                .perms
                .entry(*actor)
                .or_default()
                .insert(perm.to_string());
        }

        /// Messages delivered so far, in order.
        pub fn delivered(&self) -> Vec<(ActorRef, String)> {
            self.inner.lock().delivered.clone()
        }

        /// How many times `online_actors` was queried. Each drained refresh
        /// cycle queries once, so this counts cycles in cadence tests.
        pub fn list_calls(&self) -> usize {
            self.inner.lock().list_calls
        }
    }

    impl HostDirectory for StubDirectory {
        fn online_actors(&mut self) -> Result<Vec<ActorRef>> {
            let mut inner = self.inner.lock();
            inner.list_calls += 1;
            Ok(inner.order.clone())
        }

        fn actor_name(&mut self, actor: &ActorRef) -> Result<String> {
            let inner = self.inner.lock();
            if inner.failing.contains(actor) {
                return Err(anyhow!("lookup failure injected for {actor}"));
            }
            inner
                .names
                .get(actor)
                .cloned()
                .ok_or_else(|| anyhow!("no such actor {actor}"))
        }

        fn actor_world(&mut self, actor: &ActorRef) -> Result<String> {
            let inner = self.inner.lock();
            if inner.failing.contains(actor) {
                return Err(anyhow!("lookup failure injected for {actor}"));
            }
            inner
                .worlds
                .get(actor)
                .cloned()
                .ok_or_else(|| anyhow!("no such actor {actor}"))
        }

        fn has_live_permission(&mut self, actor: &ActorRef, perm: &str) -> Result<bool> {
            let inner = self.inner.lock();
            Ok(inner.perms.get(actor).is_some_and(|p| p.contains(perm)))
        }

        fn deliver(&mut self, actor: &ActorRef, text: &str) -> Result<()> {
            self.inner.lock().delivered.push((*actor, text.to_string()));
            Ok(())
        }
    }
}
