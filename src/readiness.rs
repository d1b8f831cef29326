//! Readiness gate: aggregates "splits arrived" and "segments arrived" signals into SDK-wide
//! readiness events.
//!
//! A [`ReadinessManager`] owns a segments sub-gate and joins a splits sub-gate. Managers created
//! with [`ReadinessManager::shared`] join the same splits sub-gate but own an independent segments
//! sub-gate (one per key in multi-key clients). Splits signals are broadcast to every joined
//! manager, segments signals only reach their own manager.
//!
//! Events are delivered through a typed [`tokio::sync::broadcast`] channel. Destroying a manager
//! closes its channel, so subscribers observe the end of the stream and no event is emitted
//! afterwards.
use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{Error, Result};

/// Events emitted by a [`ReadinessManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkEvent {
    /// Both splits and segments arrived. Emitted exactly once.
    Ready,
    /// The splits cache holds data from a previous run. Emitted at most once, and only before
    /// [`SdkEvent::Ready`].
    ReadyFromCache,
    /// A splits or segments signal arrived after readiness.
    Update,
    /// The ready timeout elapsed before readiness. Readiness can still be reached afterwards.
    TimedOut,
}

const EVENTS_CAPACITY: usize = 64;

#[derive(Default)]
struct SplitsState {
    arrived: bool,
    cache_loaded: bool,
    gates: Vec<Weak<Gate>>,
}

/// Splits sub-gate, shared by a manager and all managers derived with `shared()`.
#[derive(Default)]
struct SplitsGate {
    state: Mutex<SplitsState>,
}

impl SplitsGate {
    fn lock(&self) -> MutexGuard<'_, SplitsState> {
        self.state
            .lock()
            .expect("thread holding readiness lock should not panic")
    }

    /// Live gates joined to this sub-gate. Returned as strong references so callers can notify
    /// them without holding the splits lock.
    fn gates(state: &mut SplitsState) -> Vec<Arc<Gate>> {
        state.gates.retain(|gate| gate.strong_count() > 0);
        state.gates.iter().filter_map(Weak::upgrade).collect()
    }
}

struct GateState {
    segments_arrived: bool,
    is_ready: bool,
    is_ready_from_cache: bool,
    has_timed_out: bool,
    is_destroyed: bool,
    last_update: Option<DateTime<Utc>>,
    /// `None` once destroyed.
    events: Option<broadcast::Sender<SdkEvent>>,
    timeout: Option<JoinHandle<()>>,
}

impl GateState {
    fn emit(&self, event: SdkEvent) {
        if let Some(events) = &self.events {
            // Error means there are no subscribers, which is fine.
            let _ = events.send(event);
        }
    }

    fn cancel_timeout(&mut self) {
        if let Some(timeout) = self.timeout.take() {
            timeout.abort();
        }
    }
}

/// Per-manager state: the segments sub-gate and the derived readiness flags.
struct Gate {
    state: Mutex<GateState>,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .expect("thread holding readiness lock should not panic")
    }

    fn check_ready_or_update(&self, splits_arrived: bool) {
        let mut state = self.lock();
        if state.is_destroyed {
            return;
        }

        if state.is_ready {
            state.last_update = Some(Utc::now());
            state.emit(SdkEvent::Update);
        } else if splits_arrived && state.segments_arrived {
            state.cancel_timeout();
            state.is_ready = true;
            state.last_update = Some(Utc::now());
            log::info!(target: "splitio", "SDK is ready");
            state.emit(SdkEvent::Ready);
        }
    }

    fn ready_from_cache(&self) {
        let mut state = self.lock();
        if state.is_destroyed || state.is_ready_from_cache {
            return;
        }

        state.is_ready_from_cache = true;
        if !state.is_ready {
            log::info!(target: "splitio", "SDK is ready from cache");
            state.emit(SdkEvent::ReadyFromCache);
        }
    }

    fn time_out(&self, timeout: Duration) {
        let mut state = self.lock();
        state.timeout = None;
        if state.is_destroyed || state.is_ready {
            return;
        }

        state.has_timed_out = true;
        log::warn!(target: "splitio", "SDK was not ready within {:?}", timeout);
        state.emit(SdkEvent::TimedOut);
    }
}

/// Handle used by split synchronization to feed the splits sub-gate.
#[derive(Clone)]
pub struct SplitsReadiness {
    gate: Arc<SplitsGate>,
}

impl SplitsReadiness {
    /// Signal that split definitions arrived (or changed).
    pub fn splits_arrived(&self) {
        let gates = {
            let mut state = self.gate.lock();
            state.arrived = true;
            SplitsGate::gates(&mut state)
        };
        for gate in gates {
            gate.check_ready_or_update(true);
        }
    }

    /// Signal that the splits cache holds data from a previous run. Only the first call has an
    /// effect.
    pub fn splits_cache_loaded(&self) {
        let gates = {
            let mut state = self.gate.lock();
            if state.cache_loaded {
                return;
            }
            state.cache_loaded = true;
            SplitsGate::gates(&mut state)
        };
        for gate in gates {
            gate.ready_from_cache();
        }
    }

    /// Whether splits arrived at least once.
    pub fn has_arrived(&self) -> bool {
        self.gate.lock().arrived
    }
}

/// Handle used by segment synchronization to feed one manager's segments sub-gate.
#[derive(Clone)]
pub struct SegmentsReadiness {
    gate: Arc<Gate>,
    splits: Arc<SplitsGate>,
}

impl SegmentsReadiness {
    /// Signal that segment memberships arrived (or changed).
    pub fn segments_arrived(&self) {
        // Own flag first, then the splits flag: `splits_arrived` writes and reads in the same
        // order, so at least one of two racing signals observes both.
        self.gate.lock().segments_arrived = true;
        let splits_arrived = self.splits.lock().arrived;
        self.gate.check_ready_or_update(splits_arrived);
    }

    /// Whether segments arrived at least once.
    pub fn has_arrived(&self) -> bool {
        self.gate.lock().segments_arrived
    }
}

/// Readiness state machine of one SDK client.
pub struct ReadinessManager {
    splits: Arc<SplitsGate>,
    gate: Arc<Gate>,
    ready_timeout: Option<Duration>,
}

impl ReadinessManager {
    /// Create a new manager with its own splits sub-gate.
    ///
    /// If `ready_timeout` is set, a timer is armed on the current Tokio runtime.
    pub fn new(ready_timeout: Option<Duration>) -> ReadinessManager {
        ReadinessManager::join(Arc::new(SplitsGate::default()), ready_timeout)
    }

    /// Create a manager that shares the splits sub-gate of `self` and owns an independent segments
    /// sub-gate. The new manager arms its own ready timeout.
    pub fn shared(&self) -> ReadinessManager {
        ReadinessManager::join(self.splits.clone(), self.ready_timeout)
    }

    fn join(splits: Arc<SplitsGate>, ready_timeout: Option<Duration>) -> ReadinessManager {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        let gate = Arc::new(Gate {
            state: Mutex::new(GateState {
                segments_arrived: false,
                is_ready: false,
                is_ready_from_cache: false,
                has_timed_out: false,
                is_destroyed: false,
                last_update: None,
                events: Some(events),
                timeout: None,
            }),
        });

        if let Some(timeout) = ready_timeout {
            gate.lock().timeout = arm_timeout(Arc::downgrade(&gate), timeout);
        }

        splits.lock().gates.push(Arc::downgrade(&gate));

        ReadinessManager {
            splits,
            gate,
            ready_timeout,
        }
    }

    /// Handle to feed the splits sub-gate.
    pub fn splits(&self) -> SplitsReadiness {
        SplitsReadiness {
            gate: self.splits.clone(),
        }
    }

    /// Handle to feed this manager's segments sub-gate.
    pub fn segments(&self) -> SegmentsReadiness {
        SegmentsReadiness {
            gate: self.gate.clone(),
            splits: self.splits.clone(),
        }
    }

    /// Subscribe to events emitted from now on. After [`ReadinessManager::destroy`], the returned
    /// receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        match &self.gate.lock().events {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    #[allow(missing_docs)]
    pub fn is_ready(&self) -> bool {
        self.gate.lock().is_ready
    }

    #[allow(missing_docs)]
    pub fn is_ready_from_cache(&self) -> bool {
        self.gate.lock().is_ready_from_cache
    }

    #[allow(missing_docs)]
    pub fn has_timed_out(&self) -> bool {
        self.gate.lock().has_timed_out
    }

    #[allow(missing_docs)]
    pub fn is_destroyed(&self) -> bool {
        self.gate.lock().is_destroyed
    }

    /// Whether evaluation data can be trusted: ready (from the network or from cache) and not
    /// destroyed.
    pub fn is_operational(&self) -> bool {
        let state = self.gate.lock();
        (state.is_ready || state.is_ready_from_cache) && !state.is_destroyed
    }

    /// Time of the last `READY` or `UPDATE` transition.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.gate.lock().last_update
    }

    /// Wait until the manager is ready.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadyTimedOut`] if the ready timeout elapsed first.
    /// - [`Error::Destroyed`] if the manager was destroyed.
    pub async fn when_ready(&self) -> Result<()> {
        let mut events = {
            let state = self.gate.lock();
            if state.is_ready {
                return Ok(());
            }
            match &state.events {
                None => return Err(Error::Destroyed),
                Some(_) if state.has_timed_out => return Err(Error::ReadyTimedOut),
                Some(events) => events.subscribe(),
            }
        };

        loop {
            match events.recv().await {
                Ok(SdkEvent::Ready) => return Ok(()),
                Ok(SdkEvent::TimedOut) => return Err(Error::ReadyTimedOut),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.is_ready() {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::Destroyed),
            }
        }
    }

    /// Detach all subscribers and cancel the ready timeout. Idempotent.
    pub fn destroy(&self) {
        {
            let mut state = self.gate.lock();
            if state.is_destroyed {
                return;
            }
            state.is_destroyed = true;
            state.events = None;
            state.cancel_timeout();
        }

        let gate = Arc::downgrade(&self.gate);
        self.splits
            .lock()
            .gates
            .retain(|other| !Weak::ptr_eq(other, &gate));
    }
}

fn arm_timeout(gate: Weak<Gate>, timeout: Duration) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::warn!(target: "splitio", "no Tokio runtime available, ready timeout is disabled");
        return None;
    };

    Some(runtime.spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(gate) = gate.upgrade() {
            gate.time_out(timeout);
        }
    }))
}
