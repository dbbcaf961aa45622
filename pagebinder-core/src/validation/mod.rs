//! Background status validation
//!
//! [`StatusValidationCoordinator`] recomputes [`DataStatus`](crate::data::DataStatus)
//! off the interactive thread. A request copies the document's attribute
//! payload and composition, then hands them to a worker thread:
//!
//! 1. **Dedup.** At most one validation per document is pending. A request
//!    for a document that already has one is dropped.
//! 2. **Throttle.** Workers wait for one of `max_concurrency` evaluation
//!    slots before evaluating.
//! 3. **Isolate.** The worker rebuilds its own copy of the data from the
//!    payload; the live document is never touched off-thread.
//! 4. **Publish if still relevant.** Results come back over a channel and are
//!    applied by [`process_completions`](StatusValidationCoordinator::process_completions)
//!    only if the request is still the pending one and the document still has
//!    the generation the request saw.
//!
//! Workers check for staleness and shutdown before waiting for a slot and
//! again after getting one. A pending request goes stale when the document is
//! discarded, written out or reloaded: the observer installed by
//! [`attach`](StatusValidationCoordinator::attach) drops it at once, otherwise
//! the completion context drops it the next time it runs. Shutdown goes
//! through the [`ThreadLifecycleManager`], which keeps a worker registered
//! until its completion has been handled or dropped.
//!
//! # Example
//!
//! ```rust
//! use pagebinder::data::{FieldCodec, NoLookup};
//! use pagebinder::validation::{CoordinatorOptions, StatusValidationCoordinator};
//! use pagebinder::Workspace;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> pagebinder::Result<()> {
//! let mut workspace = Workspace::default();
//! let doc = workspace.open_source("scan.pdf", 3)?;
//!
//! let coordinator = StatusValidationCoordinator::new(
//!     CoordinatorOptions::default().with_max_concurrency(2),
//!     Arc::new(FieldCodec),
//!     Arc::new(NoLookup),
//! );
//! coordinator.attach(&mut workspace);
//!
//! coordinator.request_validation(&workspace, doc)?;
//! coordinator.wait_for_completions(&mut workspace, Duration::from_secs(5));
//!
//! let status = workspace.document(doc).unwrap().data().status();
//! assert!(status.initialized);
//! assert_eq!(status.summary, "3 pages");
//! # Ok(())
//! # }
//! ```

pub mod lifecycle;
mod result;
pub mod slots;
mod stats;
mod worker;

pub use lifecycle::{ThreadLifecycleManager, WorkerRegistration};
pub use result::{RequestState, ValidationOutcome};
pub use slots::{SlotPermit, SlotPool};
pub use stats::{StatsInfo, ValidationStats};

use crate::data::{AttributeCodec, AuxiliaryLookup};
use crate::document::DocumentId;
use crate::error::Result;
use crate::events::{DocumentEvent, DocumentObserver};
use crate::workspace::Workspace;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use worker::{Completion, CompletionResult, PendingEntry, Shared, Ticket, ValidationJob};

/// Upper bound for the default concurrency
pub const DEFAULT_MAX_CONCURRENCY_CAP: usize = 3;

/// One less than the CPU count, between 1 and [`DEFAULT_MAX_CONCURRENCY_CAP`]
pub fn default_max_concurrency() -> usize {
    num_cpus::get()
        .saturating_sub(1)
        .clamp(1, DEFAULT_MAX_CONCURRENCY_CAP)
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Evaluations allowed to run at the same time
    pub max_concurrency: usize,
    /// Re-request validation when a request was dropped while one was pending
    pub revalidate_on_completion: bool,
    /// Worker threads are named `<prefix>-<serial>`
    pub thread_name_prefix: String,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            revalidate_on_completion: false,
            thread_name_prefix: "pagebinder-validate".to_string(),
        }
    }
}

impl CoordinatorOptions {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_revalidate_on_completion(mut self, enabled: bool) -> Self {
        self.revalidate_on_completion = enabled;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Deduplicating, throttled background validator
pub struct StatusValidationCoordinator {
    options: CoordinatorOptions,
    shared: Arc<Shared>,
    completion_tx: Sender<Completion>,
    completion_rx: Arc<Receiver<Completion>>,
    next_serial: AtomicU64,
}

impl std::fmt::Debug for StatusValidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusValidationCoordinator")
            .field("options", &self.options)
            .field("pending", &self.pending_count())
            .field("active_workers", &self.shared.lifecycle.active_workers())
            .finish()
    }
}

impl StatusValidationCoordinator {
    pub fn new(
        options: CoordinatorOptions,
        codec: Arc<dyn AttributeCodec>,
        lookup: Arc<dyn AuxiliaryLookup>,
    ) -> Self {
        let options = CoordinatorOptions {
            max_concurrency: options.max_concurrency.max(1),
            ..options
        };
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let completion_rx = Arc::new(completion_rx);
        let shared = Arc::new(Shared::new(options.max_concurrency, codec, lookup));

        // Whoever triggers shutdown, completions nobody will handle give their
        // registrations back
        let undelivered = Arc::downgrade(&completion_rx);
        let weak_shared = Arc::downgrade(&shared);
        shared.lifecycle.on_shutdown(move || {
            if let (Some(completions), Some(shared)) =
                (undelivered.upgrade(), weak_shared.upgrade())
            {
                drain_undelivered(&completions, &shared.stats);
            }
        });

        Self {
            shared,
            options,
            completion_tx,
            completion_rx,
            next_serial: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// Register an observer that forgets pending requests for documents
    /// that are discarded, reloaded or written out
    pub fn attach(&self, workspace: &mut Workspace) {
        workspace.add_document_observer(Arc::new(PendingInvalidator {
            shared: Arc::downgrade(&self.shared),
        }));
    }

    /// Start validating `document` in the background
    ///
    /// Returns as soon as the worker is started. Fails only if the document
    /// does not exist or its data cannot be serialized.
    pub fn request_validation(
        &self,
        workspace: &Workspace,
        document: DocumentId,
    ) -> Result<RequestState> {
        self.shared.stats.record_request();
        if self.shared.lifecycle.is_stopping() {
            debug!(%document, "validation rejected, shutting down");
            return Ok(RequestState::Rejected);
        }

        let generation = workspace.require_document(document)?.generation();
        if let Some(entry) = self.shared.pending().get_mut(&document) {
            if entry.generation == generation {
                entry.rerequested = true;
                self.shared.stats.record_deduplicated();
                debug!(%document, "validation already pending");
                return Ok(RequestState::AlreadyPending);
            }
            debug!(%document, stale = entry.generation, generation, "pending validation superseded");
        }

        let snapshot = workspace.validation_snapshot(document)?;
        let ticket = Ticket {
            document,
            generation: snapshot.generation,
            serial: self.next_serial.fetch_add(1, Ordering::SeqCst),
        };

        self.shared.pending().insert(
            document,
            PendingEntry {
                serial: ticket.serial,
                generation: ticket.generation,
                rerequested: false,
            },
        );

        let Some(registration) = self.shared.lifecycle.try_register() else {
            self.shared.take_pending(&ticket);
            debug!(%document, "worker registration rejected");
            return Ok(RequestState::Rejected);
        };

        let job = ValidationJob {
            ticket,
            payload: snapshot.payload,
            composition: snapshot.composition,
        };
        let shared = Arc::clone(&self.shared);
        let completions = self.completion_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.options.thread_name_prefix, ticket.serial))
            .spawn(move || worker::run_worker(shared, job, registration, completions));

        if let Err(e) = spawned {
            self.shared.take_pending(&ticket);
            return Err(e.into());
        }

        self.shared.stats.record_dispatched();
        debug!(
            %document,
            generation = ticket.generation,
            serial = ticket.serial,
            "validation dispatched"
        );
        Ok(RequestState::Dispatched)
    }

    /// Request validation for every document in the workspace
    pub fn request_all(&self, workspace: &Workspace) -> Result<Vec<(DocumentId, RequestState)>> {
        workspace
            .document_ids()
            .into_iter()
            .map(|id| Ok((id, self.request_validation(workspace, id)?)))
            .collect()
    }

    /// Forget the pending request for `document`; its result will be discarded
    pub fn invalidate(&self, document: DocumentId) -> bool {
        self.shared.invalidate(document)
    }

    pub fn is_pending(&self, document: DocumentId) -> bool {
        self.shared.pending().contains_key(&document)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// Handle every completion that has arrived, without blocking
    pub fn process_completions(&self, workspace: &mut Workspace) -> Vec<ValidationOutcome> {
        self.forget_stale(workspace);
        let completions: Vec<_> = self.completion_rx.try_iter().collect();
        completions
            .into_iter()
            .filter_map(|completion| self.complete(workspace, completion))
            .collect()
    }

    /// Handle completions until nothing is pending or `timeout` passes
    pub fn wait_for_completions(
        &self,
        workspace: &mut Workspace,
        timeout: Duration,
    ) -> Vec<ValidationOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcomes = self.process_completions(workspace);

        while self.pending_count() > 0 && !self.shared.lifecycle.is_stopping() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completion_rx.recv_timeout(remaining) {
                Ok(completion) => outcomes.extend(self.complete(workspace, completion)),
                Err(RecvTimeoutError::Timeout) => {
                    debug!(pending = self.pending_count(), "timed out waiting for validations");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
            outcomes.extend(self.process_completions(workspace));
        }
        outcomes
    }

    /// Wait up to `timeout` for the next completion and handle it
    ///
    /// Returns `None` on timeout, or when the completion arrived after shutdown.
    pub fn process_next(
        &self,
        workspace: &mut Workspace,
        timeout: Duration,
    ) -> Option<ValidationOutcome> {
        self.forget_stale(workspace);
        let completion = self.completion_rx.recv_timeout(timeout).ok()?;
        self.complete(workspace, completion)
    }

    /// Stop accepting requests and wait up to `timeout` for workers to end
    ///
    /// Completions that arrive meanwhile are dropped without publishing.
    /// Returns whether every worker ended in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let idle = self.shared.lifecycle.request_shutdown(timeout);
        self.shared.pending().clear();
        if idle {
            info!(stats = %self.stats().format_stats(), "validation shutdown complete");
        }
        idle
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.lifecycle.is_stopping()
    }

    pub fn stats(&self) -> StatsInfo {
        self.shared.stats.get_info()
    }

    pub fn lifecycle(&self) -> &Arc<ThreadLifecycleManager> {
        &self.shared.lifecycle
    }

    /// Drop pending entries for documents that are gone or were reloaded
    fn forget_stale(&self, workspace: &Workspace) {
        self.shared.pending().retain(|document, entry| {
            let current = workspace
                .document(*document)
                .is_some_and(|doc| doc.generation() == entry.generation);
            if !current {
                debug!(%document, "pending validation no longer current");
            }
            current
        });
    }

    /// Publish step, run on the completion context
    fn complete(
        &self,
        workspace: &mut Workspace,
        completion: Completion,
    ) -> Option<ValidationOutcome> {
        let Completion {
            ticket,
            result,
            registration,
        } = completion;
        let document = ticket.document;

        if self.shared.lifecycle.is_stopping() {
            self.shared.stats.record_discarded();
            return None;
        }

        let Some(entry) = self.shared.take_pending(&ticket) else {
            self.shared.stats.record_discarded();
            debug!(%document, serial = ticket.serial, "stale validation result discarded");
            return Some(ValidationOutcome::Discarded(document));
        };

        let outcome = match result {
            CompletionResult::Evaluated(evaluation) => {
                if workspace.publish_status(document, ticket.generation, evaluation) {
                    self.shared.stats.record_published();
                    debug!(%document, "validation published");
                    ValidationOutcome::Published(document)
                } else {
                    self.shared.stats.record_discarded();
                    debug!(%document, "document changed, validation result discarded");
                    ValidationOutcome::Discarded(document)
                }
            }
            CompletionResult::Failed(error) => {
                self.shared.stats.record_failed();
                ValidationOutcome::Failed(document, error)
            }
            CompletionResult::Aborted => {
                self.shared.stats.record_discarded();
                ValidationOutcome::Discarded(document)
            }
        };
        drop(registration);

        if self.options.revalidate_on_completion
            && entry.rerequested
            && workspace.contains_document(document)
        {
            debug!(%document, "re-requesting validation dropped while pending");
            if let Err(e) = self.request_validation(workspace, document) {
                warn!(%document, error = %e, "re-validation request failed");
            }
        }
        Some(outcome)
    }
}

impl Drop for StatusValidationCoordinator {
    fn drop(&mut self) {
        if !self.shared.lifecycle.is_stopping() {
            self.shutdown(Duration::ZERO);
        }
    }
}

fn drain_undelivered(completions: &Receiver<Completion>, stats: &ValidationStats) {
    for completion in completions.try_iter() {
        stats.record_discarded();
        debug!(document = %completion.ticket.document, "completion dropped during shutdown");
    }
}

/// Drops pending requests for documents that stop being current
struct PendingInvalidator {
    shared: Weak<Shared>,
}

impl DocumentObserver for PendingInvalidator {
    fn on_state_changed(&self, document: DocumentId, event: &DocumentEvent) {
        if matches!(
            event,
            DocumentEvent::Discarded | DocumentEvent::Reloaded | DocumentEvent::OutputComplete
        ) {
            if let Some(shared) = self.shared.upgrade() {
                shared.invalidate(document);
            }
        }
    }
}
