//! ==============================================================================
//! registry.rs - at most one poller per user
//! ==============================================================================
//!
//! purpose:
//!     owns the map user id -> PollerHandle. request handlers hold a clone of
//!     the registry (it is injected through AppState, never global).
//!
//! invariants:
//!     - at most one live worker per user id. a handle stays in the map until
//!       its worker has finished, including while it is stopping.
//!     - a start that finds a stopping handle queues a successor that only
//!       begins polling once the old worker is gone.
//!     - a terminated poller always leaves the map, so a later start works.
//!     - a supervisor only removes its own handle, never a newer one.
//!     - the map lock is never held across an await.
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::poller::{run_poller, PollerContext, PollerState};

struct PollerHandle {
    /// distinguishes successive pollers of the same user
    generation: u64,
    /// cancelled means stopping
    cancel: CancellationToken,
    state: watch::Receiver<PollerState>,
}

type HandleMap = Arc<Mutex<HashMap<i64, PollerHandle>>>;

#[derive(Clone)]
pub struct PollerRegistry {
    ctx: Arc<PollerContext>,
    handles: HandleMap,
    generations: Arc<AtomicU64>,
}

impl PollerRegistry {
    pub fn new(ctx: PollerContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            handles: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(1)),
        }
    }

    fn lock(handles: &HandleMap) -> MutexGuard<'_, HashMap<i64, PollerHandle>> {
        handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// start a poller for `user_id` unless one is already live
    ///
    /// returns whether a new poller was spawned. if the previous poller is
    /// still stopping, the new one waits for it before its first read. must
    /// be called from within a tokio runtime.
    pub fn start(&self, user_id: i64) -> bool {
        let mut handles = Self::lock(&self.handles);
        let predecessor = match handles.get(&user_id) {
            Some(handle) if !handle.cancel.is_cancelled() => {
                tracing::info!(user_id, "Poller already running");
                return false;
            }
            Some(handle) => Some(handle.state.clone()),
            None => None,
        };

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);

        // the supervisor needs the map lock to deregister, so it cannot
        // finish before the insert below
        tokio::spawn(supervise(
            Arc::clone(&self.ctx),
            Arc::clone(&self.handles),
            user_id,
            generation,
            cancel.clone(),
            state_tx,
            predecessor,
        ));

        handles.insert(user_id, PollerHandle { generation, cancel, state: state_rx });
        tracing::info!(user_id, generation, "Started new poller");
        true
    }

    /// cancel the user's poller and wait for it to finish
    ///
    /// returns whether a poller was registered. the handle stays visible as
    /// `Stopping` until the worker is done.
    pub async fn stop(&self, user_id: i64) -> bool {
        let state = Self::lock(&self.handles).get(&user_id).map(|handle| {
            handle.cancel.cancel();
            handle.state.clone()
        });
        match state {
            Some(state) => {
                wait_stopped(state).await;
                true
            }
            None => false,
        }
    }

    /// cancel every poller and wait for all of them
    pub async fn stop_all(&self) {
        let pending: Vec<watch::Receiver<PollerState>> = Self::lock(&self.handles)
            .values()
            .map(|handle| {
                handle.cancel.cancel();
                handle.state.clone()
            })
            .collect();
        for state in pending {
            wait_stopped(state).await;
        }
    }

    /// whether the user has a registered poller, running or stopping
    pub fn is_running(&self, user_id: i64) -> bool {
        Self::lock(&self.handles).contains_key(&user_id)
    }

    pub fn active_count(&self) -> usize {
        Self::lock(&self.handles).len()
    }

    /// lifecycle state of the user's registered poller, if any
    pub fn state(&self, user_id: i64) -> Option<PollerState> {
        Self::lock(&self.handles).get(&user_id).map(|handle| {
            let state = *handle.state.borrow();
            if handle.cancel.is_cancelled() && state != PollerState::Stopped {
                PollerState::Stopping
            } else {
                state
            }
        })
    }
}

/// resolves once the poller behind `state` has stopped
async fn wait_stopped(mut state: watch::Receiver<PollerState>) {
    // a closed channel means the supervisor is gone
    let _ = state.wait_for(|s| *s == PollerState::Stopped).await;
}

/// run one poller, catch how it ended, then deregister it
async fn supervise(
    ctx: Arc<PollerContext>,
    handles: HandleMap,
    user_id: i64,
    generation: u64,
    cancel: CancellationToken,
    state: watch::Sender<PollerState>,
    predecessor: Option<watch::Receiver<PollerState>>,
) {
    if let Some(previous) = predecessor {
        tracing::info!(user_id, generation, "Waiting for previous poller to stop");
        wait_stopped(previous).await;
    }

    state.send_replace(PollerState::Running);
    tracing::info!(user_id, "Starting sensor loop");

    // a separate task so a panic in the loop surfaces as a JoinError here
    let worker = tokio::spawn(run_poller(ctx, user_id, cancel));
    match worker.await {
        Ok(Ok(())) => tracing::info!(user_id, "Sensor loop cancelled"),
        Ok(Err(e)) => tracing::error!(user_id, error = %e, "Poller crashed"),
        Err(e) if e.is_panic() => tracing::error!(user_id, "Poller panicked"),
        Err(e) => tracing::error!(user_id, error = %e, "Poller task aborted"),
    }

    // deregister before announcing Stopped, so a returned stop() never
    // observes its own handle
    {
        let mut map = PollerRegistry::lock(&handles);
        if map.get(&user_id).map(|h| h.generation) == Some(generation) {
            map.remove(&user_id);
        }
    }
    state.send_replace(PollerState::Stopped);
    tracing::info!(user_id, generation, "Poller stopped");
}
