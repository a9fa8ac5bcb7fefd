//! Scan scheduler and CV planner.
//!
//! The scheduler sits between two independent callers:
//!
//! - the ingress pipeline's dispatch stage, which calls [`ScanScheduler::enqueue`],
//!   [`ScanScheduler::record_feedback`] and [`ScanScheduler::report_empty`];
//! - the host polling loop, which calls [`ScanScheduler::dequeue`] at a fixed
//!   cadence and must always get a scan back.
//!
//! # Planning Cycle
//!
//! ```text
//! DISCOVERY ──> UNPLANNED(0..5) ──> ALLOCATING(cond = N-1 .. 0) ──(wrap)──> DISCOVERY
//!      ^               │
//!      └── 5 attempts ─┘
//! ```
//!
//! Discovery issues one survey per CV and waits for candidate counts. Once all
//! counts are in, the per-cycle budget is split across CVs in proportion to
//! their counts and the allocator spends it, moving from the last CV towards
//! the first. When it wraps past the first CV the conditions are re-sorted so
//! the busiest CV is visited last in the next cycle, and discovery starts again.
//!
//! # Thread Safety
//!
//! Planner state lives in one struct behind a `parking_lot::Mutex`. The pending
//! queue is a lock-free `SegQueue`, so the common `dequeue` path (queue not
//! empty) pops without taking the lock. Issue counters are atomics.

pub mod allocation;
mod state;

pub use state::ConditionState;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AcquisitionConfig;
use crate::error::{ScanFactoryError, SchedulerError};
use crate::factory::ScanFactory;
use crate::scan::{cv_matches, ScanKind, ScanRequest};
use state::PlannerState;

/// Unplanned survey attempts before discovery is restarted.
pub const MAX_UNPLANNED_ATTEMPTS: u32 = 5;

/// Why an enqueue was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// The request's CV is no longer the active condition.
    StaleCondition,
    /// The pending queue is above the in-flight ceiling.
    QueueSaturated,
}

/// Result of [`ScanScheduler::enqueue`].
///
/// On `Rejected` the caller owns the cleanup: any reservation made for the
/// request (such as an oracle suppression entry) must be released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum EnqueueOutcome {
    /// Accepted.
    ///
    /// `position` is the pending queue length seen just before the push. A
    /// concurrent `dequeue` may pop through the lock-free fast path in between,
    /// so under contention it is an upper bound on the request's index, not
    /// its exact place.
    Queued {
        /// Pending requests ahead of this one when it was checked
        position: usize,
    },
    /// Held back until the allocator next visits the request's CV.
    Shelved,
    /// Refused.
    Rejected(RejectReason),
}

impl EnqueueOutcome {
    /// True if the request was queued or shelved.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected(_))
    }
}

/// Result of [`ScanScheduler::record_feedback`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// Count stored; other conditions are still outstanding.
    Recorded,
    /// Count stored and it was the last one; budgets are now set.
    PlanningComplete,
    /// This condition already reported during the current phase.
    Ignored,
    /// CV is not configured, or cycling is disabled.
    UnknownCondition,
}

/// Where the planner is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SchedulerPhase {
    /// Cycling disabled: survey/AGC pairs without CVs.
    Fixed,
    /// Next refill starts a discovery round.
    Discovery,
    /// Discovery scans issued, waiting for counts.
    Unplanned {
        /// Extra surveys issued while waiting
        attempts: u32,
    },
    /// Spending the per-CV budget.
    Allocating {
        /// Index of the active condition
        condition: usize,
    },
}

/// Snapshot of scheduler state and counters.
#[derive(Clone, Debug, Serialize)]
pub struct SchedulerStats {
    /// Planner phase
    pub phase: SchedulerPhase,
    /// Active CV, when cycling
    pub current_cv: Option<f64>,
    /// Per-condition bookkeeping in visiting order
    pub conditions: Vec<ConditionState>,
    /// Requests waiting in the pending queue
    pub pending: usize,
    /// AGC scans handed to the host
    pub issued_agc: u64,
    /// Survey scans handed to the host
    pub issued_survey: u64,
    /// Targeted scans handed to the host
    pub issued_targeted: u64,
    /// Targeted scans handed out since the last survey
    pub targeted_since_survey: u64,
    /// Default scans substituted after an internal fault
    pub fallbacks: u64,
    /// Enqueues refused for a stale CV
    pub rejected_stale: u64,
    /// Enqueues refused for a saturated queue
    pub rejected_saturated: u64,
    /// Requests shelved for a later visit
    pub shelved: u64,
    /// Shelved requests dropped at a discovery restart
    pub discarded: u64,
    /// Discovery rounds started
    pub discovery_rounds: u64,
    /// Allocation cycles run to completion
    pub cycles_completed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    agc: AtomicU64,
    survey: AtomicU64,
    targeted: AtomicU64,
    targeted_since_survey: AtomicU64,
    fallbacks: AtomicU64,
    rejected_stale: AtomicU64,
    rejected_saturated: AtomicU64,
    shelved: AtomicU64,
    discarded: AtomicU64,
}

/// Thread-shared scan scheduler.
pub struct ScanScheduler {
    config: AcquisitionConfig,
    cycling: bool,
    factory: Arc<dyn ScanFactory>,
    pending: SegQueue<ScanRequest>,
    discarded: SegQueue<ScanRequest>,
    planner: Mutex<PlannerState>,
    counters: Counters,
}

impl std::fmt::Debug for ScanScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanScheduler")
            .field("cycling", &self.cycling)
            .field("pending", &self.pending.len())
            .field("factory", &"Arc<dyn ScanFactory>")
            .finish()
    }
}

impl ScanScheduler {
    /// Create a scheduler for one acquisition.
    ///
    /// Cycling is treated as disabled when the CV list is empty.
    pub fn new(config: &AcquisitionConfig, factory: Arc<dyn ScanFactory>) -> Self {
        let cycling = config.cycling_enabled && !config.cv_values.is_empty();
        info!(
            cycling,
            conditions = config.cv_values.len(),
            budget = config.cycle_budget,
            top_n = config.top_n,
            "Scan scheduler created"
        );
        Self {
            config: config.clone(),
            cycling,
            factory,
            pending: SegQueue::new(),
            discarded: SegQueue::new(),
            planner: Mutex::new(PlannerState::new(&config.cv_values)),
            counters: Counters::default(),
        }
    }

    /// Offer a request to the pending queue.
    pub fn enqueue(&self, request: ScanRequest) -> EnqueueOutcome {
        let mut planner = self.planner.lock();

        if self.cycling {
            if let (Some(cv), Some(current)) = (request.cv(), planner.current_cv()) {
                if !cv_matches(cv, current) {
                    if self.config.shelve_stale_targets && request.kind() == ScanKind::Targeted {
                        if let Some(index) = planner.index_of(cv) {
                            planner.shelved[index].push(request);
                            self.counters.shelved.fetch_add(1, Ordering::Relaxed);
                            debug!(cv, current, "Shelved targeted request for inactive CV");
                            return EnqueueOutcome::Shelved;
                        }
                    }
                    self.counters.rejected_stale.fetch_add(1, Ordering::Relaxed);
                    debug!(cv, current, kind = %request.kind(), "Rejected request for stale CV");
                    return EnqueueOutcome::Rejected(RejectReason::StaleCondition);
                }
            }
        }

        let position = self.pending.len();
        if position > self.config.max_targeted_per_survey {
            self.counters
                .rejected_saturated
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                pending = position,
                ceiling = self.config.max_targeted_per_survey,
                "Rejected request, pending queue saturated"
            );
            return EnqueueOutcome::Rejected(RejectReason::QueueSaturated);
        }

        self.pending.push(request);
        EnqueueOutcome::Queued { position }
    }

    /// Record the candidate count observed for `cv` during discovery.
    ///
    /// Only the first report per condition and phase counts. The report that
    /// completes the set triggers the budget split.
    pub fn record_feedback(&self, cv: f64, candidate_count: usize) -> FeedbackOutcome {
        if !self.cycling {
            return FeedbackOutcome::UnknownCondition;
        }
        let mut planner = self.planner.lock();
        let Some(index) = planner.index_of(cv) else {
            debug!(cv, "Feedback for unknown CV ignored");
            return FeedbackOutcome::UnknownCondition;
        };
        if !planner.record(index, candidate_count, self.config.top_n) {
            return FeedbackOutcome::Ignored;
        }
        debug!(cv, candidate_count, "Discovery feedback recorded");

        if !planner.all_planned() {
            return FeedbackOutcome::Recorded;
        }
        planner.allocate(self.config.cycle_budget);
        info!(
            budget = self.config.cycle_budget,
            allocation = ?planner
                .conditions
                .iter()
                .map(|c| (c.cv, c.max_allowed.unwrap_or(0)))
                .collect::<Vec<_>>(),
            "CV planning complete"
        );
        FeedbackOutcome::PlanningComplete
    }

    /// Mark `cv` as run dry if it is the active condition.
    ///
    /// Its budget is cleared so the allocator moves on at its next visit.
    /// Returns true if the report applied.
    pub fn report_empty(&self, cv: f64) -> bool {
        if !self.cycling {
            return false;
        }
        let mut planner = self.planner.lock();
        match planner.index_of(cv) {
            Some(index) if index == planner.current => {
                planner.conditions[index].max_allowed = None;
                debug!(cv, "Active CV reported empty, budget cleared");
                true
            }
            _ => false,
        }
    }

    /// Next scan for the host. Never blocks on planning and never fails.
    pub fn dequeue(&self) -> ScanRequest {
        if let Some(request) = self.pending.pop() {
            self.note_issued(&request);
            return request;
        }

        let result = {
            let mut planner = self.planner.lock();
            match self.pending.pop() {
                Some(request) => Ok(request),
                None => self.refill(&mut planner).and_then(|()| {
                    self.pending.pop().ok_or(SchedulerError::QueueUnderrun)
                }),
            }
        };

        let request = match result {
            Ok(request) => request,
            Err(err) => {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Scheduling fault, issuing default scan");
                self.factory.default_scan()
            }
        };
        self.note_issued(&request);
        request
    }

    /// Shelved requests dropped when discovery restarted. The caller releases
    /// their oracle reservations.
    pub fn take_discarded(&self) -> Vec<ScanRequest> {
        std::iter::from_fn(|| self.discarded.pop()).collect()
    }

    /// Requests currently queued.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Current planner phase.
    pub fn phase(&self) -> SchedulerPhase {
        let planner = self.planner.lock();
        self.phase_of(&planner)
    }

    /// Copy of the per-condition bookkeeping.
    pub fn conditions(&self) -> Vec<ConditionState> {
        self.planner.lock().conditions.clone()
    }

    /// Snapshot of state and counters.
    pub fn stats(&self) -> SchedulerStats {
        let planner = self.planner.lock();
        SchedulerStats {
            phase: self.phase_of(&planner),
            current_cv: if self.cycling {
                planner.current_cv()
            } else {
                None
            },
            conditions: planner.conditions.clone(),
            pending: self.pending.len(),
            issued_agc: self.counters.agc.load(Ordering::Relaxed),
            issued_survey: self.counters.survey.load(Ordering::Relaxed),
            issued_targeted: self.counters.targeted.load(Ordering::Relaxed),
            targeted_since_survey: self.counters.targeted_since_survey.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            rejected_stale: self.counters.rejected_stale.load(Ordering::Relaxed),
            rejected_saturated: self.counters.rejected_saturated.load(Ordering::Relaxed),
            shelved: self.counters.shelved.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            discovery_rounds: planner.discovery_rounds,
            cycles_completed: planner.cycles_completed,
        }
    }

    fn phase_of(&self, planner: &PlannerState) -> SchedulerPhase {
        if !self.cycling {
            SchedulerPhase::Fixed
        } else if planner.plan_mode {
            SchedulerPhase::Discovery
        } else if !planner.all_planned() {
            SchedulerPhase::Unplanned {
                attempts: planner.unplanned_attempts,
            }
        } else {
            SchedulerPhase::Allocating {
                condition: planner.current,
            }
        }
    }

    fn note_issued(&self, request: &ScanRequest) {
        match request.kind() {
            ScanKind::Agc => {
                self.counters.agc.fetch_add(1, Ordering::Relaxed);
            }
            ScanKind::Survey => {
                self.counters.survey.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .targeted_since_survey
                    .store(0, Ordering::Relaxed);
            }
            ScanKind::Targeted => {
                self.counters.targeted.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .targeted_since_survey
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// AGC (when enabled) followed by its survey.
    fn survey_batch(&self, cv: Option<f64>) -> Result<Vec<ScanRequest>, ScanFactoryError> {
        let mut batch = Vec::with_capacity(2);
        if self.config.agc_enabled {
            batch.push(self.factory.create_agc_scan(cv)?);
        }
        batch.push(self.factory.create_survey_scan(cv)?);
        Ok(batch)
    }

    fn push_all(&self, batch: Vec<ScanRequest>) {
        for request in batch {
            self.pending.push(request);
        }
    }

    /// Put at least one request on the pending queue.
    ///
    /// Bounded loop: each pass either produces work or moves the planner one
    /// step closer to doing so (next condition, or a discovery restart).
    fn refill(&self, planner: &mut PlannerState) -> Result<(), SchedulerError> {
        if !self.cycling {
            let batch = self.survey_batch(None)?;
            self.push_all(batch);
            return Ok(());
        }

        let max_passes = 2 * planner.len() + 4;
        for _ in 0..max_passes {
            if planner.plan_mode {
                let mut batch = Vec::with_capacity(2 * planner.len());
                for condition in &planner.conditions {
                    batch.extend(self.survey_batch(Some(condition.cv))?);
                }
                let stale = planner.begin_discovery();
                if !stale.is_empty() {
                    self.counters
                        .discarded
                        .fetch_add(stale.len() as u64, Ordering::Relaxed);
                    for request in stale {
                        self.discarded.push(request);
                    }
                }
                info!(
                    round = planner.discovery_rounds,
                    conditions = planner.len(),
                    "CV discovery started"
                );
                self.push_all(batch);
                return Ok(());
            }

            if !planner.all_planned() {
                if planner.unplanned_attempts >= MAX_UNPLANNED_ATTEMPTS {
                    warn!(
                        attempts = planner.unplanned_attempts,
                        missing = planner.conditions.iter().filter(|c| !c.planned).count(),
                        "Discovery feedback incomplete, restarting discovery"
                    );
                    planner.plan_mode = true;
                    continue;
                }
                let cv = planner.conditions[planner.current].cv;
                let batch = self.survey_batch(Some(cv))?;
                planner.unplanned_attempts += 1;
                debug!(cv, attempt = planner.unplanned_attempts, "Unplanned survey issued");
                self.push_all(batch);
                return Ok(());
            }

            let current = planner.current;
            let quota_reached = self.config.switch_interval > 0
                && planner.visit_issued >= self.config.switch_interval;
            if !planner.conditions[current].is_exhausted() && !quota_reached {
                let cv = planner.conditions[current].cv;
                let batch = self.survey_batch(Some(cv))?;
                planner.conditions[current].issued += 1;
                planner.visit_issued += 1;
                self.push_all(batch);

                let shelved = std::mem::take(&mut planner.shelved[current]);
                if !shelved.is_empty() {
                    debug!(cv, released = shelved.len(), "Releasing shelved requests");
                    self.push_all(shelved);
                }
                return Ok(());
            }

            let wrap = self.config.switch_interval > 0;
            match planner.next_condition(current, self.config.step_constrained, wrap) {
                Some(next) => {
                    debug!(
                        from = planner.conditions[current].cv,
                        to = planner.conditions[next].cv,
                        "Switching CV"
                    );
                    planner.current = next;
                    planner.visit_issued = 0;
                }
                None => {
                    planner.cycles_completed += 1;
                    planner.resort_by_precursor_count();
                    planner.plan_mode = true;
                    info!(
                        cycle = planner.cycles_completed,
                        "Allocation cycle complete, restarting discovery"
                    );
                }
            }
        }

        Err(SchedulerError::NoProgress(max_passes))
    }
}

#[cfg(test)]
mod tests;
