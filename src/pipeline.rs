//! Ingress pipeline.
//!
//! Three tokio tasks joined by bounded channels:
//!
//! ```text
//! submit ──> [intake] ──> [transform] ──> [dispatch] ──> ScanScheduler
//!                          (blocking pool)     │
//!                                              └─ release ──> oracle
//! ```
//!
//! - **intake** buffers spectra in arrival order.
//! - **transform** runs the processor for one spectrum at a time on the
//!   blocking pool, so spectra leave it in the order they arrived.
//! - **dispatch** applies planner feedback, then offers every candidate to the
//!   scheduler. Refused candidates are released back to the oracle exactly
//!   once. All outputs of a spectrum are dispatched before the next one.
//!
//! `shutdown` closes intake and waits for every buffered spectrum to pass
//! through transform and dispatch.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::processor::{Feedback, ProcessedSpectrum, SpectrumProcessor};
use crate::scheduler::{EnqueueOutcome, ScanScheduler};
use crate::spectrum::Spectrum;

/// Counters reported by [`IngressPipeline::shutdown`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Spectra that went through dispatch
    pub spectra: u64,
    /// Candidates accepted into the pending queue
    pub enqueued: u64,
    /// Candidates refused by the scheduler
    pub rejected: u64,
    /// Candidates shelved for a later CV visit
    pub shelved: u64,
    /// `None` placeholders dropped
    pub placeholders_dropped: u64,
    /// Feedback records applied
    pub feedback_recorded: u64,
    /// Candidates released back to the oracle
    pub released: u64,
}

#[derive(Debug, Default)]
struct Counters {
    spectra: AtomicU64,
    enqueued: AtomicU64,
    rejected: AtomicU64,
    shelved: AtomicU64,
    placeholders_dropped: AtomicU64,
    feedback_recorded: AtomicU64,
    released: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            spectra: self.spectra.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            shelved: self.shelved.load(Ordering::Relaxed),
            placeholders_dropped: self.placeholders_dropped.load(Ordering::Relaxed),
            feedback_recorded: self.feedback_recorded.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the running pipeline.
#[derive(Debug)]
pub struct IngressPipeline {
    intake_tx: Mutex<Option<mpsc::Sender<Spectrum>>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    counters: Arc<Counters>,
}

impl IngressPipeline {
    /// Start the three stages on the current tokio runtime.
    pub fn spawn(
        processor: Arc<SpectrumProcessor>,
        scheduler: Arc<ScanScheduler>,
        config: &PipelineConfig,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity);
        let (transform_tx, transform_rx) = mpsc::channel(config.intake_capacity);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_capacity);
        let counters = Arc::new(Counters::default());

        let intake = tokio::spawn(run_intake(intake_rx, transform_tx));
        let transform = tokio::spawn(run_transform(
            Arc::clone(&processor),
            transform_rx,
            dispatch_tx,
        ));
        let dispatch = tokio::spawn(run_dispatch(
            Arc::clone(&processor),
            scheduler,
            dispatch_rx,
            Arc::clone(&counters),
        ));

        info!(
            processor = processor.name(),
            intake_capacity = config.intake_capacity,
            dispatch_capacity = config.dispatch_capacity,
            "Ingress pipeline started"
        );

        Self {
            intake_tx: Mutex::new(Some(intake_tx)),
            tasks: vec![
                ("intake", intake),
                ("transform", transform),
                ("dispatch", dispatch),
            ],
            counters,
        }
    }

    /// Hand one spectrum to the pipeline.
    ///
    /// Waits while the intake buffer is full. Fails once `close` was called,
    /// including when `close` happens while this call is waiting for room.
    pub async fn submit(&self, spectrum: Spectrum) -> Result<(), PipelineError> {
        let tx = self
            .intake_tx
            .lock()
            .as_ref()
            .cloned()
            .ok_or(PipelineError::Closed)?;
        let permit = tx.reserve().await.map_err(|_| PipelineError::Closed)?;

        // Hold the lock so `close` cannot slip in between the check and the send.
        let open = self.intake_tx.lock();
        if open.is_none() {
            return Err(PipelineError::Closed);
        }
        permit.send(spectrum);
        Ok(())
    }

    /// Stop accepting spectra. Buffered spectra are still processed.
    pub fn close(&self) {
        if self.intake_tx.lock().take().is_some() {
            debug!("Ingress pipeline intake closed");
        }
    }

    /// True once `close` was called.
    pub fn is_closed(&self) -> bool {
        self.intake_tx.lock().is_none()
    }

    /// Counters so far.
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Close intake and wait until every buffered spectrum is dispatched.
    pub async fn shutdown(self) -> Result<PipelineStats, PipelineError> {
        self.close();
        for (stage, task) in self.tasks {
            task.await.map_err(|e| PipelineError::StageFailed {
                stage,
                reason: e.to_string(),
            })?;
        }
        let stats = self.counters.snapshot();
        info!(
            spectra = stats.spectra,
            enqueued = stats.enqueued,
            rejected = stats.rejected,
            released = stats.released,
            "Ingress pipeline drained"
        );
        Ok(stats)
    }
}

async fn run_intake(mut rx: mpsc::Receiver<Spectrum>, tx: mpsc::Sender<Spectrum>) {
    while let Some(spectrum) = rx.recv().await {
        trace!(scan = ?spectrum.scan_number(), "Spectrum received");
        if tx.send(spectrum).await.is_err() {
            error!("Transform stage gone, intake stopping");
            break;
        }
    }
}

async fn run_transform(
    processor: Arc<SpectrumProcessor>,
    mut rx: mpsc::Receiver<Spectrum>,
    tx: mpsc::Sender<ProcessedSpectrum>,
) {
    while let Some(spectrum) = rx.recv().await {
        let scan = spectrum.scan_number();
        let worker = Arc::clone(&processor);
        let processed = match tokio::task::spawn_blocking(move || worker.process(&spectrum)).await
        {
            Ok(processed) => processed,
            Err(e) => {
                error!(scan = ?scan, error = %e, "Spectrum processing task failed");
                continue;
            }
        };
        if tx.send(processed).await.is_err() {
            error!("Dispatch stage gone, transform stopping");
            break;
        }
    }
}

async fn run_dispatch(
    processor: Arc<SpectrumProcessor>,
    scheduler: Arc<ScanScheduler>,
    mut rx: mpsc::Receiver<ProcessedSpectrum>,
    counters: Arc<Counters>,
) {
    while let Some(processed) = rx.recv().await {
        dispatch_one(&processor, &scheduler, processed, &counters);
    }
}

fn dispatch_one(
    processor: &SpectrumProcessor,
    scheduler: &ScanScheduler,
    mut processed: ProcessedSpectrum,
    counters: &Counters,
) {
    for feedback in std::mem::take(&mut processed.feedback) {
        match feedback {
            Feedback::Count { cv, count } => {
                let outcome = scheduler.record_feedback(cv, count);
                trace!(cv, count, ?outcome, "Feedback applied");
            }
            Feedback::Empty { cv } => {
                scheduler.report_empty(cv);
            }
        }
        counters.feedback_recorded.fetch_add(1, Ordering::Relaxed);
    }

    let scan = processed.scan_number;
    for item in processed {
        let Some(request) = item else {
            counters
                .placeholders_dropped
                .fetch_add(1, Ordering::Relaxed);
            continue;
        };
        let candidate = request.candidate();
        match scheduler.enqueue(request) {
            EnqueueOutcome::Queued { .. } => {
                counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            EnqueueOutcome::Shelved => {
                counters.shelved.fetch_add(1, Ordering::Relaxed);
            }
            EnqueueOutcome::Rejected(reason) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(scan = ?scan, ?reason, "Candidate refused");
                if let Some(id) = candidate {
                    processor.release_candidate(id);
                    counters.released.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    for request in scheduler.take_discarded() {
        if let Some(id) = request.candidate() {
            processor.release_candidate(id);
            counters.released.fetch_add(1, Ordering::Relaxed);
        }
    }
    counters.spectra.fetch_add(1, Ordering::Relaxed);
}
