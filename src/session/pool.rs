//! Bounded rendering session pool
//!
//! Sessions live in a fixed arena of slots, one per unit of capacity. A semaphore with
//! `capacity` permits bounds the number of outstanding leases; a slot-level mutex
//! (never held across an await) tracks which slot is free, leased or empty.
//!
//! Every hand-out bumps the slot generation and the lease remembers it. A release whose
//! generation no longer matches the slot (because `invalidate_all` ran in between) is
//! stale and its session is destroyed instead of being returned.

use crate::config::PoolConfig;
use crate::session::{IdentityProfile, RenderEngine, RenderSession};
use crate::{PoolError, SessionError};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pool limits, resolved from `[pool]` configuration
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub capacity: usize,
    pub acquire_timeout: Duration,
    pub max_uses: u32,
    pub max_failures: u32,
    pub max_idle: Duration,
    pub creation_retries: u32,
    pub creation_backoff: Duration,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            capacity: config.capacity,
            acquire_timeout: config.acquire_timeout(),
            max_uses: config.max_session_uses,
            max_failures: config.max_session_failures,
            max_idle: config.max_idle(),
            creation_retries: config.creation_retries,
            creation_backoff: config.creation_backoff(),
        }
    }
}

/// Identifies one hand-out of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken {
    pub slot: usize,
    pub generation: u64,
}

struct PooledSession {
    id: u64,
    session: Box<dyn RenderSession>,
    identity: IdentityProfile,
    created_at: Instant,
    last_used: Instant,
    uses: u32,
    failures: u32,
}

enum SlotState {
    Empty,
    Free(PooledSession),
    Leased,
}

struct Slot {
    generation: u64,
    state: SlotState,
}

struct Slots {
    slots: Vec<Slot>,
    /// Indexes of `Free` slots, oldest release first
    free: VecDeque<usize>,
}

/// Pool counters
#[derive(Debug, Default)]
pub struct PoolStats {
    created: AtomicU64,
    destroyed: AtomicU64,
    leases: AtomicU64,
    healthy_releases: AtomicU64,
    unhealthy_releases: AtomicU64,
    exhausted: AtomicU64,
    creation_failures: AtomicU64,
    stale_releases: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatsSnapshot {
    pub created: u64,
    pub destroyed: u64,
    pub leases: u64,
    pub healthy_releases: u64,
    pub unhealthy_releases: u64,
    pub exhausted: u64,
    pub creation_failures: u64,
    pub stale_releases: u64,
}

impl PoolStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            leases: self.leases.load(Ordering::Relaxed),
            healthy_releases: self.healthy_releases.load(Ordering::Relaxed),
            unhealthy_releases: self.unhealthy_releases.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            stale_releases: self.stale_releases.load(Ordering::Relaxed),
        }
    }
}

struct PoolShared {
    engine: Arc<dyn RenderEngine>,
    settings: PoolSettings,
    slots: Mutex<Slots>,
    permits: Arc<Semaphore>,
    stats: PoolStats,
    fatal: OnceLock<String>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_usable(&self) -> Result<(), PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        if let Some(reason) = self.fatal.get() {
            return Err(PoolError::Unavailable(reason.clone()));
        }
        Ok(())
    }

    /// Returns an abandoned slot to `Empty` and destroys its session in the background
    fn abandon(&self, token: LeaseToken, session: Option<PooledSession>) {
        {
            let mut slots = self.lock();
            if let Some(slot) = slots.slots.get_mut(token.slot) {
                if slot.generation == token.generation && matches!(slot.state, SlotState::Leased) {
                    slot.state = SlotState::Empty;
                }
            }
        }

        if let Some(pooled) = session {
            tracing::debug!("Destroying session {} from an abandoned lease", pooled.id);
            PoolStats::bump(&self.stats.destroyed);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(pooled.session.close());
                }
                Err(_) => drop(pooled),
            }
        }
    }

    async fn destroy(&self, pooled: PooledSession, reason: &str) {
        tracing::debug!(
            "Destroying session {} ({}; uses={}, failures={}, age={:?})",
            pooled.id,
            reason,
            pooled.uses,
            pooled.failures,
            pooled.created_at.elapsed()
        );
        PoolStats::bump(&self.stats.destroyed);
        pooled.session.close().await;
    }

    async fn create(&self) -> Result<PooledSession, PoolError> {
        let attempts = self.settings.creation_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let identity = IdentityProfile::randomized();

            match self.engine.launch(&identity).await {
                Ok(session) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    PoolStats::bump(&self.stats.created);
                    tracing::debug!("Created session {} ({})", id, identity.user_agent);
                    let now = Instant::now();
                    return Ok(PooledSession {
                        id,
                        session,
                        identity,
                        created_at: now,
                        last_used: now,
                        uses: 0,
                        failures: 0,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Session creation attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.creation_backoff * attempt).await;
                    }
                }
            }
        }

        PoolStats::bump(&self.stats.creation_failures);
        let reason = format!(
            "session creation failed {} times in a row: {}",
            attempts, last_error
        );
        tracing::error!("Session pool is dead: {}", reason);
        let _ = self.fatal.set(reason);
        self.permits.close();

        Err(PoolError::CreationFailed {
            attempts,
            message: last_error,
        })
    }
}

/// A bounded, lazily filled pool of rendering sessions
///
/// Cloning is cheap; clones share the same sessions.
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("settings", &self.shared.settings)
            .field("stats", &self.shared.stats)
            .finish()
    }
}

enum Claim {
    Reuse(PooledSession),
    Create,
}

impl SessionPool {
    pub fn new(engine: Arc<dyn RenderEngine>, settings: PoolSettings) -> Self {
        let capacity = settings.capacity.max(1);
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                state: SlotState::Empty,
            })
            .collect();

        Self {
            shared: Arc::new(PoolShared {
                engine,
                settings: PoolSettings {
                    capacity,
                    ..settings
                },
                slots: Mutex::new(Slots {
                    slots,
                    free: VecDeque::new(),
                }),
                permits: Arc::new(Semaphore::new(capacity)),
                stats: PoolStats::default(),
                fatal: OnceLock::new(),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Builds a pool from `[pool]` configuration
    pub fn from_config(engine: Arc<dyn RenderEngine>, config: &PoolConfig) -> Self {
        Self::new(engine, PoolSettings::from(config))
    }

    pub fn capacity(&self) -> usize {
        self.shared.settings.capacity
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.shared.settings
    }

    /// Returns true once session creation has failed for good
    pub fn is_dead(&self) -> bool {
        self.shared.fatal.get().is_some()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of sessions currently leased out
    pub fn in_use(&self) -> usize {
        self.shared.settings.capacity - self.shared.permits.available_permits()
    }

    /// Acquires an exclusive lease, waiting up to `timeout` for a free slot
    ///
    /// # Errors
    ///
    /// * `PoolError::Exhausted` - every session stayed leased for the whole wait
    /// * `PoolError::CreationFailed` - a new session could not be launched; the pool is
    ///   dead from now on
    /// * `PoolError::Unavailable` - the pool died earlier
    /// * `PoolError::Closed` - the pool was shut down
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease, PoolError> {
        let shared = &self.shared;
        shared.check_usable()?;

        let permit = match tokio::time::timeout(timeout, shared.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                shared.check_usable()?;
                return Err(PoolError::Closed);
            }
            Err(_) => {
                PoolStats::bump(&shared.stats.exhausted);
                tracing::debug!("No session became free within {:?}", timeout);
                return Err(PoolError::Exhausted { waited: timeout });
            }
        };

        shared.check_usable()?;

        // A held permit guarantees at least one slot that is free or empty
        let (token, claim) = {
            let mut slots = shared.lock();
            let reuse = slots.free.pop_front();
            let index = match reuse {
                Some(index) => index,
                None => slots
                    .slots
                    .iter()
                    .position(|s| matches!(s.state, SlotState::Empty))
                    .ok_or_else(|| PoolError::Unavailable("slot accounting lost".to_string()))?,
            };

            let slot = &mut slots.slots[index];
            slot.generation += 1;
            let previous = std::mem::replace(&mut slot.state, SlotState::Leased);
            let token = LeaseToken {
                slot: index,
                generation: slot.generation,
            };

            match previous {
                SlotState::Free(pooled) => (token, Claim::Reuse(pooled)),
                _ => (token, Claim::Create),
            }
        };

        let mut lease = Lease {
            shared: Arc::clone(shared),
            token,
            session: None,
            _permit: permit,
            released: false,
        };

        if let Claim::Reuse(pooled) = claim {
            if pooled.last_used.elapsed() > shared.settings.max_idle {
                shared.destroy(pooled, "idle too long").await;
            } else if !pooled.session.is_alive().await {
                shared.destroy(pooled, "failed health check").await;
            } else {
                lease.session = Some(pooled);
            }
        }

        if lease.session.is_none() {
            // On failure the lease drops here and the slot goes back to Empty
            lease.session = Some(shared.create().await?);
        }

        PoolStats::bump(&shared.stats.leases);
        Ok(lease)
    }

    /// Acquires with the configured default timeout
    pub async fn acquire_default(&self) -> Result<Lease, PoolError> {
        self.acquire(self.shared.settings.acquire_timeout).await
    }

    /// Returns a lease to the pool
    ///
    /// The session is destroyed instead of reused when `healthy` is false, when it has
    /// reached its use or failure budget, when the lease is stale, when the pool is
    /// closed, or when resetting it fails.
    pub async fn release(&self, mut lease: Lease, healthy: bool) {
        let shared = &self.shared;
        let token = lease.token;

        let mut reason: Option<&'static str> = None;

        if let Some(pooled) = lease.session.as_mut() {
            pooled.uses += 1;
            pooled.last_used = Instant::now();
            if !healthy {
                pooled.failures += 1;
                reason = Some("released unhealthy");
            } else if pooled.failures >= shared.settings.max_failures {
                reason = Some("failure budget spent");
            } else if pooled.uses >= shared.settings.max_uses {
                reason = Some("use budget spent");
            }
        }

        if healthy {
            PoolStats::bump(&shared.stats.healthy_releases);
        } else {
            PoolStats::bump(&shared.stats.unhealthy_releases);
        }

        if shared.closed.load(Ordering::Acquire) {
            reason = reason.or(Some("pool closed"));
        }

        let current = {
            let slots = shared.lock();
            slots
                .slots
                .get(token.slot)
                .map(|s| s.generation == token.generation)
                .unwrap_or(false)
        };
        if !current {
            PoolStats::bump(&shared.stats.stale_releases);
            reason = Some("stale lease");
        }

        if reason.is_none() {
            if let Some(pooled) = lease.session.as_ref() {
                if let Err(e) = pooled.session.reset().await {
                    tracing::warn!("Failed to reset session {}: {}", pooled.id, e);
                    reason = Some("reset failed");
                }
            }
        }

        let Some(pooled) = lease.session.take() else {
            return;
        };

        let leftover = {
            let mut slots = shared.lock();
            let slots = &mut *slots;
            match slots.slots.get_mut(token.slot) {
                Some(slot) if slot.generation == token.generation => {
                    lease.released = true;
                    if reason.is_some() {
                        slot.state = SlotState::Empty;
                        Some(pooled)
                    } else {
                        slot.state = SlotState::Free(pooled);
                        slots.free.push_back(token.slot);
                        None
                    }
                }
                _ => {
                    // Slot was revoked while the reset ran
                    lease.released = true;
                    reason = reason.or(Some("stale lease"));
                    Some(pooled)
                }
            }
        };

        if let Some(pooled) = leftover {
            shared
                .destroy(pooled, reason.unwrap_or("released"))
                .await;
        }
    }

    /// Destroys every free session and revokes every outstanding lease
    ///
    /// Revoked leases are destroyed when they come back.
    pub async fn invalidate_all(&self) {
        let doomed: Vec<PooledSession> = {
            let mut slots = self.shared.lock();
            slots.free.clear();
            slots
                .slots
                .iter_mut()
                .filter_map(|slot| {
                    slot.generation += 1;
                    match std::mem::replace(&mut slot.state, SlotState::Empty) {
                        SlotState::Free(pooled) => Some(pooled),
                        _ => None,
                    }
                })
                .collect()
        };

        tracing::debug!("Invalidated pool, destroying {} free sessions", doomed.len());
        for pooled in doomed {
            self.shared.destroy(pooled, "invalidated").await;
        }
    }

    /// Closes every free session and refuses new leases
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.permits.close();

        let doomed: Vec<PooledSession> = {
            let mut slots = self.shared.lock();
            slots.free.clear();
            slots
                .slots
                .iter_mut()
                .filter_map(|slot| match std::mem::replace(&mut slot.state, SlotState::Empty) {
                    SlotState::Free(pooled) => Some(pooled),
                    SlotState::Leased => {
                        slot.state = SlotState::Leased;
                        None
                    }
                    SlotState::Empty => None,
                })
                .collect()
        };

        tracing::info!("Shutting down session pool ({} idle sessions)", doomed.len());
        for pooled in doomed {
            self.shared.destroy(pooled, "shutdown").await;
        }
    }
}

/// Exclusive use of one pooled session
///
/// Hand it back with [`SessionPool::release`]. A lease dropped without release
/// (cancelled future, panic) destroys its session.
pub struct Lease {
    shared: Arc<PoolShared>,
    token: LeaseToken,
    session: Option<PooledSession>,
    _permit: OwnedSemaphorePermit,
    released: bool,
}

impl Lease {
    /// The leased session
    pub fn session(&self) -> Result<&dyn RenderSession, SessionError> {
        self.session
            .as_ref()
            .map(|p| p.session.as_ref())
            .ok_or(SessionError::Closed)
    }

    pub fn token(&self) -> LeaseToken {
        self.token
    }

    /// Pool-wide session id, stable across leases of the same session
    pub fn id(&self) -> Option<u64> {
        self.session.as_ref().map(|p| p.id)
    }

    pub fn identity(&self) -> Option<&IdentityProfile> {
        self.session.as_ref().map(|p| &p.identity)
    }

    /// Counts a page-level failure against the session without marking it corrupt
    pub fn record_failure(&mut self) {
        if let Some(pooled) = self.session.as_mut() {
            pooled.failures += 1;
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("token", &self.token)
            .field("session", &self.id())
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            self.shared.abandon(self.token, self.session.take());
        }
    }
}
