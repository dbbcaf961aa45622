//! Background evaluation of one validation request

use super::lifecycle::{ThreadLifecycleManager, WorkerRegistration};
use super::slots::SlotPool;
use super::stats::ValidationStats;
use crate::data::{
    AttributeCodec, AttributePayload, AuxiliaryLookup, DocumentData, EvaluationContext,
    StatusEvaluation,
};
use crate::document::{CompositionSnapshot, DocumentId};
use crate::error::{ComposeError, Result};
use crossbeam_channel::Sender;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Identifies one dispatched validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    pub document: DocumentId,
    pub generation: u64,
    pub serial: u64,
}

/// Entry in the pending set
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingEntry {
    pub serial: u64,
    /// Document generation the request saw
    pub generation: u64,
    /// Another request arrived while this one was pending
    pub rerequested: bool,
}

/// State shared between the coordinator and its workers
pub(crate) struct Shared {
    pending: Mutex<HashMap<DocumentId, PendingEntry>>,
    pub lifecycle: Arc<ThreadLifecycleManager>,
    pub slots: SlotPool,
    pub stats: ValidationStats,
    pub codec: Arc<dyn AttributeCodec>,
    pub lookup: Arc<dyn AuxiliaryLookup>,
}

impl Shared {
    pub fn new(
        max_concurrency: usize,
        codec: Arc<dyn AttributeCodec>,
        lookup: Arc<dyn AuxiliaryLookup>,
    ) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            lifecycle: Arc::new(ThreadLifecycleManager::new()),
            slots: SlotPool::new(max_concurrency),
            stats: ValidationStats::new(),
            codec,
            lookup,
        }
    }

    pub fn pending(&self) -> MutexGuard<'_, HashMap<DocumentId, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The ticket is still the one pending for its document and we are not stopping
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        !self.lifecycle.is_stopping()
            && self
                .pending()
                .get(&ticket.document)
                .is_some_and(|entry| entry.serial == ticket.serial)
    }

    /// Remove the pending entry for `ticket`, if it is still the current one
    pub fn take_pending(&self, ticket: &Ticket) -> Option<PendingEntry> {
        let mut pending = self.pending();
        let current = pending
            .get(&ticket.document)
            .is_some_and(|entry| entry.serial == ticket.serial);
        if current {
            pending.remove(&ticket.document)
        } else {
            None
        }
    }

    /// Forget whatever is pending for `document`
    pub fn invalidate(&self, document: DocumentId) -> bool {
        let removed = self.pending().remove(&document).is_some();
        if removed {
            debug!(%document, "pending validation invalidated");
        }
        removed
    }
}

/// Work handed to a worker thread; owns everything it reads
pub(crate) struct ValidationJob {
    pub ticket: Ticket,
    pub payload: AttributePayload,
    pub composition: CompositionSnapshot,
}

/// Worker result marshaled back to the completion context
pub(crate) enum CompletionResult {
    Evaluated(StatusEvaluation),
    Failed(String),
    /// Stale before evaluation started
    Aborted,
}

/// Message carried to the completion context.
///
/// Holds the worker registration so shutdown keeps waiting until the
/// completion has actually been handled.
pub(crate) struct Completion {
    pub ticket: Ticket,
    pub result: CompletionResult,
    pub registration: WorkerRegistration,
}

/// Worker thread body
pub(crate) fn run_worker(
    shared: Arc<Shared>,
    job: ValidationJob,
    registration: WorkerRegistration,
    completions: Sender<Completion>,
) {
    let ticket = job.ticket;

    if !shared.is_current(&ticket) {
        debug!(document = %ticket.document, serial = ticket.serial, "stale before start");
        finish(&completions, ticket, CompletionResult::Aborted, registration);
        return;
    }

    trace!(document = %ticket.document, serial = ticket.serial, "waiting for evaluation slot");
    let Some(permit) = shared.slots.acquire(&shared.lifecycle.shutdown_signal()) else {
        debug!(document = %ticket.document, "shutdown while waiting for slot");
        return;
    };

    if !shared.is_current(&ticket) {
        drop(permit);
        debug!(document = %ticket.document, serial = ticket.serial, "stale after slot wait");
        finish(&completions, ticket, CompletionResult::Aborted, registration);
        return;
    }

    shared.stats.start_evaluation();
    let result = evaluate_job(&shared, &job);
    shared.stats.end_evaluation();
    drop(permit);

    let result = match result {
        Ok(evaluation) => CompletionResult::Evaluated(evaluation),
        Err(e) => {
            warn!(document = %ticket.document, error = %e, "validation failed");
            CompletionResult::Failed(e.to_string())
        }
    };
    finish(&completions, ticket, result, registration);
}

fn finish(
    completions: &Sender<Completion>,
    ticket: Ticket,
    result: CompletionResult,
    registration: WorkerRegistration,
) {
    if registration.is_stopping() {
        return;
    }
    // A closed channel means the coordinator is gone; the registration drops here
    let _ = completions.send(Completion {
        ticket,
        result,
        registration,
    });
}

/// Reconstruct an isolated copy of the data and evaluate it
fn evaluate_job(shared: &Shared, job: &ValidationJob) -> Result<StatusEvaluation> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let data = DocumentData::reconstruct(shared.codec.as_ref(), &job.payload)?;
        let context = EvaluationContext {
            composition: &job.composition,
            lookup: shared.lookup.as_ref(),
        };
        data.evaluate(&context)
    }));

    match outcome {
        Ok(result) => result,
        Err(panic) => Err(ComposeError::ValidationFailure(format!(
            "evaluation panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
