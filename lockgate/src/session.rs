//! Verification sessions.
//!
//! A session evaluates a requirement set for one identity and tracks
//! per-requirement progress for the UI. Single requirements can be retried.
//!
//! Each requirement is evaluated on its own tokio task and writes only its
//! own slot. Slot writes happen under a short lock that is never held
//! across an `.await`. Every write publishes a fresh [`Progress`] snapshot
//! on a watch channel, which is how the UI learns about changes.

use crate::aggregate::aggregate;
use crate::error::GateError;
use crate::eval::{validate_requirements, RequirementEvaluator};
use crate::types::*;
use chrono::Utc;
use ethers_core::types::Address;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Settled,
}

/// Snapshot of a session, as published to subscribers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Progress {
    pub results: Vec<RequirementResult>,
    pub overall_percent: u8,
    pub state: SessionState,
    pub verdict: VerificationVerdict,
    pub stale: bool,
}

struct Slot {
    result: RequirementResult,
    /// Bumped on every dispatch; results from older dispatches are dropped.
    generation: u64,
}

struct Inner {
    slots: Vec<Slot>,
    state: SessionState,
}

struct Shared {
    identity: Address,
    requirements: Vec<Requirement>,
    policy: FulfillmentPolicy,
    evaluator: Arc<RequirementEvaluator>,
    inner: Mutex<Inner>,
    stale: AtomicBool,
    progress: watch::Sender<Progress>,
    /// Never written; receivers wake when the session is dropped.
    dropped: watch::Sender<()>,
}

/// A verification run for one (identity, requirement set) pair.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct VerificationSession {
    shared: Arc<Shared>,
}

impl VerificationSession {
    /// Create an idle session. Malformed requirement sets are rejected here,
    /// before any evaluation starts.
    pub fn new(
        identity: Address,
        requirements: Vec<Requirement>,
        policy: FulfillmentPolicy,
        evaluator: Arc<RequirementEvaluator>,
    ) -> Result<Self, GateError> {
        validate_requirements(&requirements)?;

        let slots: Vec<Slot> = requirements
            .iter()
            .map(|r| Slot {
                result: RequirementResult::pending(r),
                generation: 0,
            })
            .collect();
        let inner = Inner {
            slots,
            state: SessionState::Idle,
        };
        let (progress, _rx) = watch::channel(snapshot(&inner, policy, false));

        Ok(Self {
            shared: Arc::new(Shared {
                identity,
                requirements,
                policy,
                evaluator,
                inner: Mutex::new(inner),
                stale: AtomicBool::new(false),
                progress,
                dropped: watch::Sender::new(()),
            }),
        })
    }

    pub fn identity(&self) -> Address {
        self.shared.identity
    }

    pub fn policy(&self) -> FulfillmentPolicy {
        self.shared.policy
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.shared.requirements
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Dispatch every requirement concurrently. No-op unless idle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let shared = &self.shared;
        if shared.stale.load(Ordering::SeqCst) {
            return;
        }
        let dispatched: Vec<(usize, u64)> = {
            let mut inner = shared.inner.lock();
            if inner.state != SessionState::Idle {
                return;
            }
            inner.state = SessionState::Running;
            let dispatched = inner
                .slots
                .iter_mut()
                .enumerate()
                .map(|(index, slot)| {
                    slot.generation += 1;
                    slot.result = RequirementResult::in_progress(&shared.requirements[index]);
                    (index, slot.generation)
                })
                .collect();
            shared.settle(&mut inner);
            shared.publish(&inner);
            dispatched
        };

        tracing::info!(
            identity = ?shared.identity,
            requirements = shared.requirements.len(),
            policy = ?shared.policy,
            "Verification session started"
        );

        for (index, generation) in dispatched {
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                let result = shared
                    .evaluator
                    .evaluate(&shared.requirements[index], shared.identity)
                    .await;
                shared.complete(index, generation, result);
            });
        }
    }

    /// Wait until the session settles and return its verdict.
    ///
    /// Fails with `StaleSession` if the session is invalidated first.
    pub async fn wait_settled(&self) -> Result<VerificationVerdict, GateError> {
        let mut rx = self.shared.progress.subscribe();
        let progress = {
            let settled = rx
                .wait_for(|p| p.state == SessionState::Settled || p.stale)
                .await
                .map_err(|_| GateError::StaleSession)?;
            Progress::clone(&settled)
        };
        if progress.stale {
            return Err(GateError::StaleSession);
        }
        Ok(progress.verdict)
    }

    /// Start (if idle) and wait for the verdict.
    pub async fn run(&self) -> Result<VerificationVerdict, GateError> {
        self.start();
        self.wait_settled().await
    }

    /// Re-evaluate one requirement, leaving every other result untouched.
    ///
    /// The evaluation runs on the caller's task; spawn the returned future
    /// to avoid waiting on it.
    pub async fn retry(&self, requirement_id: &str) -> Result<RequirementResult, GateError> {
        let shared = Arc::clone(&self.shared);
        if shared.stale.load(Ordering::SeqCst) {
            return Err(GateError::StaleSession);
        }
        let index = shared
            .requirements
            .iter()
            .position(|r| r.id == requirement_id)
            .ok_or_else(|| GateError::UnknownRequirement(requirement_id.to_string()))?;

        let generation = {
            let mut inner = shared.inner.lock();
            if inner.state == SessionState::Idle {
                return Err(GateError::SessionNotStarted);
            }
            let slot = &mut inner.slots[index];
            slot.generation += 1;
            slot.result = RequirementResult::in_progress(&shared.requirements[index]);
            let generation = slot.generation;
            shared.settle(&mut inner);
            shared.publish(&inner);
            generation
        };
        tracing::info!(
            requirement = %requirement_id,
            identity = ?shared.identity,
            "Retrying requirement"
        );

        let result = shared
            .evaluator
            .evaluate(&shared.requirements[index], shared.identity)
            .await;
        if !shared.complete(index, generation, result.clone())
            && shared.stale.load(Ordering::SeqCst)
        {
            return Err(GateError::StaleSession);
        }
        Ok(result)
    }

    /// Current snapshot.
    pub fn progress(&self) -> Progress {
        self.shared.progress.borrow().clone()
    }

    /// Current verdict (provisional until the session settles).
    pub fn verdict(&self) -> VerificationVerdict {
        self.shared.progress.borrow().verdict.clone()
    }

    /// Receive a new snapshot whenever any result, the state or the verdict
    /// changes. Do not hold a borrow of the receiver while calling back
    /// into the session.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.shared.progress.subscribe()
    }

    /// Mark the session stale. In-flight evaluations run to completion but
    /// their results are discarded; no further snapshots are published.
    pub fn invalidate(&self) {
        self.shared.invalidate();
    }

    pub fn is_stale(&self) -> bool {
        self.shared.stale.load(Ordering::SeqCst)
    }

    /// Invalidate the session as soon as the connected account stops being
    /// the session identity.
    ///
    /// The watcher exits when the account changes, when the wallet channel
    /// closes, or when the last handle to the session is dropped.
    pub fn watch_wallet(&self, mut accounts: watch::Receiver<Option<Address>>) -> JoinHandle<()> {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let mut dropped = self.shared.dropped.subscribe();
        let identity = self.shared.identity;
        tokio::spawn(async move {
            loop {
                let current = *accounts.borrow_and_update();
                if current != Some(identity) {
                    if let Some(shared) = weak.upgrade() {
                        tracing::info!(
                            identity = ?identity,
                            now = ?current,
                            "Wallet account changed, session is stale"
                        );
                        shared.invalidate();
                    }
                    return;
                }
                tokio::select! {
                    changed = accounts.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = dropped.changed() => {
                        tracing::debug!(
                            identity = ?identity,
                            "Session dropped, wallet watcher exiting"
                        );
                        return;
                    }
                }
            }
        })
    }
}

impl Shared {
    /// Store a finished evaluation. Returns false if it was discarded.
    fn complete(&self, index: usize, generation: u64, result: RequirementResult) -> bool {
        let mut inner = self.inner.lock();
        if self.stale.load(Ordering::SeqCst) {
            tracing::debug!(
                requirement = %result.requirement_id,
                "Discarding result for stale session"
            );
            return false;
        }
        if inner.slots[index].generation != generation {
            tracing::debug!(requirement = %result.requirement_id, "Discarding superseded result");
            return false;
        }
        inner.slots[index].result = RequirementResult {
            updated_at: Utc::now(),
            ..result
        };
        let was = inner.state;
        self.settle(&mut inner);
        let progress = self.publish(&inner);
        if was != SessionState::Settled && inner.state == SessionState::Settled {
            tracing::info!(
                identity = ?self.identity,
                authorized = progress.verdict.is_authorized,
                "Verification session settled"
            );
        }
        true
    }

    /// Recompute the session state from the slots.
    fn settle(&self, inner: &mut Inner) {
        if inner.state == SessionState::Idle {
            return;
        }
        let all_terminal = inner.slots.iter().all(|s| s.result.is_terminal());
        let early = self.policy == FulfillmentPolicy::Any
            && inner.slots.iter().any(|s| s.result.is_satisfied());
        inner.state = if all_terminal || early {
            SessionState::Settled
        } else {
            SessionState::Running
        };
    }

    fn publish(&self, inner: &Inner) -> Progress {
        let progress = snapshot(inner, self.policy, self.stale.load(Ordering::SeqCst));
        self.progress.send_replace(progress.clone());
        progress
    }

    fn invalidate(&self) {
        let inner = self.inner.lock();
        if self.stale.swap(true, Ordering::SeqCst) {
            return;
        }
        // Final snapshot so waiters observe the stale flag.
        self.publish(&inner);
    }
}

fn snapshot(inner: &Inner, policy: FulfillmentPolicy, stale: bool) -> Progress {
    let results: Vec<RequirementResult> = inner.slots.iter().map(|s| s.result.clone()).collect();
    let verdict = aggregate(&results, policy);
    Progress {
        overall_percent: overall_percent(&results, policy),
        state: inner.state,
        verdict,
        results,
        stale,
    }
}

/// Share of satisfied requirements; 100 under `any` once one is satisfied.
pub fn overall_percent(results: &[RequirementResult], policy: FulfillmentPolicy) -> u8 {
    let satisfied = results.iter().filter(|r| r.is_satisfied()).count();
    if results.is_empty() {
        return match policy {
            FulfillmentPolicy::All => 100,
            FulfillmentPolicy::Any => 0,
        };
    }
    match policy {
        FulfillmentPolicy::Any if satisfied > 0 => 100,
        _ => (satisfied * 100 / results.len()) as u8,
    }
}
