//! Resolution orchestrator: one state machine per UI surface.
//!
//! Idle ──start──▶ Resolved                    (cache hit, no location request)
//! Idle ──start──▶ AwaitingManualInput         (no provider)
//! Idle ──start──▶ AttemptingGeolocation ──▶ Resolved | AwaitingManualInput
//! AwaitingManualInput ──pincode──▶ Resolved | AwaitingManualInput (invalid)
//!
//! Leaving `AttemptingGeolocation` is a race between the position request
//! (bounded by `geolocation_timeout`) and the fallback timer. The first to
//! settle applies; every later arrival holds a stale [`Ticket`] and is
//! dropped.
//!
//! All surfaces built from one [`DeliveryEngine`] share one outcome: the
//! persisted cache plus a channel carrying the current result. A
//! started surface follows it, so when a sibling resolves it moves to
//! `Resolved` with the same result, and when a sibling clears it drops
//! back to `Idle`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::ResolutionCache;
use super::providers::{GeolocationError, GeolocationProvider, PositionOptions};
use super::race::{first_settled, Epoch, Settled, Ticket};
use super::resolver::PostalCodeResolver;
use super::types::{
    FallbackReason, OrchestratorState, ResolutionResult, ResolutionSource, ResolveError, Snapshot,
};
use crate::geo::GeoCoordinate;

/// Wait budgets for the automatic and manual paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Upper bound on a single position request.
    pub geolocation_timeout: Duration,
    /// Hand over to manual entry if nothing settled by then.
    pub fallback_after: Duration,
    /// Simulated lookup latency before a pincode is resolved.
    pub manual_lookup_delay: Duration,
    /// Age of a provider-held fix that may be reused.
    pub position_max_age: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            geolocation_timeout: Duration::from_millis(5000),
            fallback_after: Duration::from_millis(2000),
            manual_lookup_delay: Duration::from_millis(500),
            position_max_age: Duration::from_secs(300),
        }
    }
}

// ─── Shared outcome ─────────────────────────────────────────────

type Current = Option<Arc<ResolutionResult>>;

/// The engine-wide outcome: persisted cache and live channel, always
/// updated together.
struct Outcome {
    cache: ResolutionCache,
    current: watch::Sender<Current>,
}

impl Outcome {
    fn new(cache: ResolutionCache) -> Self {
        let (current, _) = watch::channel(None);
        Self { cache, current }
    }

    /// Persist and announce. The channel lock is held across the write, so
    /// a concurrent [`Outcome::retract`] lands either wholly before or
    /// wholly after it.
    fn announce(&self, result: &Arc<ResolutionResult>) {
        self.current.send_modify(|current| {
            self.cache.store(result);
            *current = Some(result.clone());
        });
    }

    fn retract(&self) {
        self.current.send_modify(|current| {
            self.cache.clear();
            *current = None;
        });
    }

    fn latest(&self) -> Current {
        self.current.borrow().clone()
    }
}

fn same_outcome(a: &Current, b: &Current) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

// ─── Engine ─────────────────────────────────────────────────────

/// Dependencies shared by every surface. Cheap to clone; clones share the
/// same outcome.
#[derive(Clone)]
pub struct DeliveryEngine {
    resolver: Arc<PostalCodeResolver>,
    outcome: Arc<Outcome>,
    provider: Option<Arc<dyn GeolocationProvider>>,
    timings: Timings,
}

impl DeliveryEngine {
    /// An engine with no geolocation provider and default timings.
    pub fn new(resolver: PostalCodeResolver, cache: ResolutionCache) -> Self {
        Self {
            resolver: Arc::new(resolver),
            outcome: Arc::new(Outcome::new(cache)),
            provider: None,
            timings: Timings::default(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn GeolocationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn resolver(&self) -> &PostalCodeResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.outcome.cache
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    /// A fresh orchestrator for one surface.
    pub fn orchestrator(&self) -> Orchestrator {
        let (updates, _) = watch::channel(Snapshot::idle());
        let cancel = CancellationToken::new();
        Orchestrator {
            shared: Arc::new(Shared {
                resolver: self.resolver.clone(),
                outcome: self.outcome.clone(),
                provider: self.provider.clone(),
                timings: self.timings,
                machine: Mutex::new(Machine::default()),
                updates,
                cancel: cancel.clone(),
            }),
            _teardown: Arc::new(Teardown(cancel)),
        }
    }
}

// ─── State ──────────────────────────────────────────────────────

struct Machine {
    state: OrchestratorState,
    epoch: Epoch,
    revision: u64,
    result: Option<Arc<ResolutionResult>>,
    error: Option<String>,
    fallback: Option<FallbackReason>,
    attempt: Option<CancellationToken>,
    following: bool,
    shut_down: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            state: OrchestratorState::Idle,
            epoch: Epoch::default(),
            revision: 0,
            result: None,
            error: None,
            fallback: None,
            attempt: None,
            following: false,
            shut_down: false,
        }
    }
}

impl Machine {
    fn enter(&mut self, state: OrchestratorState) {
        debug!(from = %self.state, to = %state, "transition");
        self.state = state;
        self.revision += 1;
    }

    fn stop_attempt(&mut self) {
        if let Some(token) = self.attempt.take() {
            token.cancel();
        }
    }

    /// Drop the outcome and everything pending, back to `Idle`.
    fn reset(&mut self) {
        self.epoch.advance();
        self.stop_attempt();
        self.result = None;
        self.error = None;
        self.fallback = None;
        self.enter(OrchestratorState::Idle);
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            result: self.result.clone(),
            error: self.error.clone(),
            fallback: self.fallback,
            revision: self.revision,
        }
    }
}

struct Shared {
    resolver: Arc<PostalCodeResolver>,
    outcome: Arc<Outcome>,
    provider: Option<Arc<dyn GeolocationProvider>>,
    timings: Timings,
    machine: Mutex<Machine>,
    updates: watch::Sender<Snapshot>,
    cancel: CancellationToken,
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, machine: &Machine) {
        self.updates.send_replace(machine.snapshot());
    }

    /// Move `expected → Resolved` if `ticket` is still current.
    ///
    /// The outcome is persisted before the machine lock is released, so a
    /// `clear` on this surface can never be overtaken by the write.
    fn settle_resolved(
        &self,
        ticket: Ticket,
        expected: OrchestratorState,
        result: Arc<ResolutionResult>,
    ) -> bool {
        let mut m = self.machine();
        if m.shut_down || !m.epoch.is_current(ticket) || m.state != expected {
            debug!(state = %m.state, "ignoring late resolution");
            return false;
        }
        m.epoch.advance();
        m.stop_attempt();
        m.result = Some(result.clone());
        m.error = None;
        m.enter(OrchestratorState::Resolved);
        self.outcome.announce(&result);
        self.publish(&m);
        info!(zone = %result.zone.id, source = %result.source, "delivery zone resolved");
        true
    }

    /// Move `AttemptingGeolocation → AwaitingManualInput` if `ticket` is
    /// still current.
    fn settle_manual(&self, ticket: Ticket, reason: FallbackReason) -> bool {
        let mut m = self.machine();
        if m.shut_down || !m.epoch.is_current(ticket) || m.state != OrchestratorState::AttemptingGeolocation {
            debug!(?reason, state = %m.state, "ignoring late fallback");
            return false;
        }
        m.epoch.advance();
        m.stop_attempt();
        m.fallback = Some(reason);
        m.enter(OrchestratorState::AwaitingManualInput);
        info!(?reason, "awaiting pincode entry");
        self.publish(&m);
        true
    }

    fn settle_position(&self, ticket: Ticket, coordinate: GeoCoordinate) -> bool {
        match self.resolver.resolve_by_position(coordinate, ResolutionSource::Geolocation) {
            Ok(result) => self.settle_resolved(ticket, OrchestratorState::AttemptingGeolocation, Arc::new(result)),
            Err(e) => {
                warn!(error = %e, "device reported an unusable position");
                self.settle_manual(ticket, FallbackReason::PositionUnavailable)
            }
        }
    }

    /// Apply an outcome change made by any surface of the engine.
    ///
    /// `seen` must still be the engine's current outcome; otherwise a newer
    /// change is queued and this one is skipped. Returns whether the
    /// machine moved.
    fn follow(&self, seen: Current) -> bool {
        let mut m = self.machine();
        if m.shut_down || !same_outcome(&seen, &self.outcome.latest()) {
            return false;
        }
        match seen {
            Some(result) => {
                if same_outcome(&m.result, &Some(result.clone())) {
                    return false;
                }
                m.epoch.advance();
                m.stop_attempt();
                m.result = Some(result);
                m.error = None;
                m.enter(OrchestratorState::Resolved);
                debug!("adopted resolution from another surface");
            }
            None => {
                if m.state != OrchestratorState::Resolved {
                    return false;
                }
                m.reset();
                debug!("delivery location cleared by another surface");
            }
        }
        self.publish(&m);
        true
    }
}

async fn run_attempt(
    shared: Arc<Shared>,
    provider: Arc<dyn GeolocationProvider>,
    ticket: Ticket,
    stop: CancellationToken,
) {
    let options = PositionOptions {
        timeout: shared.timings.geolocation_timeout,
        maximum_age: shared.timings.position_max_age,
    };
    let lookup = async move {
        tokio::time::timeout(options.timeout, provider.request_position(options))
            .await
            .unwrap_or(Err(GeolocationError::Timeout))
    };
    let fallback = tokio::time::sleep(shared.timings.fallback_after);

    let outcome = tokio::select! {
        _ = stop.cancelled() => {
            debug!("geolocation attempt cancelled");
            return;
        }
        outcome = first_settled(lookup, fallback) => outcome,
    };

    match outcome {
        Settled::Left(Ok(coordinate)) => {
            shared.settle_position(ticket, coordinate);
        }
        Settled::Left(Err(e)) => {
            debug!(error = %e, "geolocation failed");
            shared.settle_manual(ticket, FallbackReason::from(&e));
        }
        Settled::Right(()) => {
            shared.settle_manual(ticket, FallbackReason::FallbackTimer);
        }
    }
}

/// Track the engine-wide outcome until this surface is torn down.
async fn run_follower(shared: Arc<Shared>, mut outcomes: watch::Receiver<Current>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            changed = outcomes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let seen = outcomes.borrow_and_update().clone();
        shared.follow(seen);
    }
}

/// Cancels pending work when the last handle goes away.
struct Teardown(CancellationToken);

impl Drop for Teardown {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// ─── Orchestrator ───────────────────────────────────────────────

/// Handle to one orchestrator instance. Clones share the same instance;
/// dropping the last clone tears it down.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    _teardown: Arc<Teardown>,
}

impl Orchestrator {
    pub fn state(&self) -> OrchestratorState {
        self.shared.machine().state
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.machine().snapshot()
    }

    pub fn result(&self) -> Option<Arc<ResolutionResult>> {
        self.shared.machine().result.clone()
    }

    /// Receive a [`Snapshot`] after every transition.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.updates.subscribe()
    }

    /// Leave `Idle`. A no-op in any other state or after shutdown.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> OrchestratorState {
        let shared = &self.shared;
        {
            let m = shared.machine();
            if m.shut_down || m.state != OrchestratorState::Idle {
                return m.state;
            }
        }

        // Subscribe before reading, so a sibling settling in between is
        // still seen by the follower.
        let outcomes = shared.outcome.current.subscribe();
        let cached = match shared.outcome.latest() {
            Some(current) => Some(current),
            None => shared.outcome.cache.load().map(Arc::new),
        };

        let mut m = shared.machine();
        if m.shut_down || m.state != OrchestratorState::Idle {
            return m.state;
        }
        m.epoch.advance();

        if !m.following {
            m.following = true;
            tokio::spawn(run_follower(shared.clone(), outcomes));
        }

        if let Some(result) = cached {
            debug!(zone = %result.zone.id, "using cached resolution");
            m.result = Some(result);
            m.enter(OrchestratorState::Resolved);
            shared.publish(&m);
            return m.state;
        }

        let Some(provider) = shared.provider.clone() else {
            info!("geolocation unsupported, awaiting pincode entry");
            m.fallback = Some(FallbackReason::Unsupported);
            m.enter(OrchestratorState::AwaitingManualInput);
            shared.publish(&m);
            return m.state;
        };

        let ticket = m.epoch.ticket();
        let stop = shared.cancel.child_token();
        m.attempt = Some(stop.clone());
        m.enter(OrchestratorState::AttemptingGeolocation);
        shared.publish(&m);
        drop(m);

        tokio::spawn(run_attempt(shared.clone(), provider, ticket, stop));
        OrchestratorState::AttemptingGeolocation
    }

    /// Start if needed, then wait for a result. Waits through manual entry
    /// for as long as it takes.
    pub async fn resolve(&self) -> Result<Arc<ResolutionResult>, ResolveError> {
        let mut updates = self.subscribe();
        self.start();

        tokio::select! {
            _ = self.shared.cancel.cancelled() => Err(ResolveError::ShutDown),
            snapshot = updates.wait_for(|s| s.result.is_some()) => snapshot
                .ok()
                .and_then(|s| s.result.clone())
                .ok_or(ResolveError::ShutDown),
        }
    }

    /// Resolve a user-entered pincode. Only valid while awaiting input.
    ///
    /// An invalid pincode leaves the state untouched and is recorded in
    /// [`Snapshot::error`]. If another settlement wins during the lookup
    /// delay, the winning result is returned; if the entry was abandoned
    /// instead, [`ResolveError::Superseded`].
    pub async fn submit_postal_code(&self, code: &str) -> Result<Arc<ResolutionResult>, ResolveError> {
        let ticket = {
            let m = self.shared.machine();
            if m.shut_down {
                return Err(ResolveError::ShutDown);
            }
            if m.state != OrchestratorState::AwaitingManualInput {
                return Err(ResolveError::NotAwaitingInput { state: m.state });
            }
            m.epoch.ticket()
        };

        tokio::select! {
            _ = self.shared.cancel.cancelled() => return Err(ResolveError::ShutDown),
            _ = tokio::time::sleep(self.shared.timings.manual_lookup_delay) => {}
        }

        match self.shared.resolver.resolve_by_postal_code(code) {
            Ok(result) => {
                let result = Arc::new(result);
                if self
                    .shared
                    .settle_resolved(ticket, OrchestratorState::AwaitingManualInput, result.clone())
                {
                    return Ok(result);
                }
                let m = self.shared.machine();
                if m.shut_down {
                    return Err(ResolveError::ShutDown);
                }
                let winner = m.result.clone();
                winner.ok_or(ResolveError::Superseded)
            }
            Err(e) => {
                let mut m = self.shared.machine();
                if m.epoch.is_current(ticket) && m.state == OrchestratorState::AwaitingManualInput {
                    debug!(error = %e, "pincode rejected");
                    m.error = Some(e.to_string());
                    m.revision += 1;
                    self.shared.publish(&m);
                }
                Err(e)
            }
        }
    }

    /// Forget the outcome and return to `Idle`, on this surface and every
    /// started sibling. Pending work is abandoned. A no-op after shutdown.
    pub fn clear(&self) {
        let mut m = self.shared.machine();
        if m.shut_down {
            return;
        }
        m.reset();
        self.shared.outcome.retract();
        self.shared.publish(&m);
        info!("delivery location cleared");
    }

    /// "Change location": forget the outcome and open pincode entry
    /// directly, without another geolocation attempt.
    pub fn change_location(&self) -> OrchestratorState {
        self.clear();
        let mut m = self.shared.machine();
        if m.shut_down || m.state != OrchestratorState::Idle {
            return m.state;
        }
        m.epoch.advance();
        m.enter(OrchestratorState::AwaitingManualInput);
        self.shared.publish(&m);
        m.state
    }

    /// Tear down: cancel timers and ignore every later settlement.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
        let mut m = self.shared.machine();
        m.shut_down = true;
        m.epoch.advance();
        m.stop_attempt();
        debug!(state = %m.state, "orchestrator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}
