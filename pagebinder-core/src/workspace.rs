//! Composition workspace
//!
//! The [`Workspace`] owns the page arena and every output document, and is the
//! single place where composition changes happen. Each operation keeps both
//! directions of the page/document link in step and raises the matching
//! document and page events.
//!
//! Pages of an opened source stay referenced by that source
//! ([`OwnerId::Source`]) until [`Workspace::close_source`], so a page removed
//! from every document can still be put back while its source is open. A
//! document whose last page goes away is discarded.

use crate::data::{AttributePayload, DocumentData, FieldAttributes, StatusEvaluation};
use crate::document::{CompositionSnapshot, DocumentId, OutputDocument};
use crate::error::{ComposeError, Result};
use crate::events::{DocumentEvent, DocumentObserver, ObserverList, PageEvent, PageObserver};
use crate::output::{OutputRequest, OutputSink};
use crate::page::{Orientation, OwnerId, Page, PageKey};
use crate::page_store::{PageId, PageStore, Release};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Creates the data bound to a new document, given its file name
pub type DataFactory = Box<dyn Fn(&str) -> DocumentData + Send>;

#[derive(Debug)]
struct SourceEntry {
    owner: u32,
    pages: Vec<PageId>,
}

/// Everything the coordinator copies out of a document before dispatch
pub(crate) struct ValidationSnapshot {
    pub generation: u64,
    pub payload: AttributePayload,
    pub composition: CompositionSnapshot,
}

/// Owner of all pages and output documents
pub struct Workspace {
    store: PageStore,
    documents: BTreeMap<DocumentId, OutputDocument>,
    sources: BTreeMap<String, SourceEntry>,
    observers: ObserverList,
    next_document: u64,
    next_source: u32,
    data_factory: DataFactory,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(|_| DocumentData::new(Box::new(FieldAttributes::new())))
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("documents", &self.documents.len())
            .field("sources", &self.sources.len())
            .field("live_pages", &self.store.live_count())
            .field("observers", &self.observers)
            .finish()
    }
}

impl Workspace {
    pub fn new(data_factory: impl Fn(&str) -> DocumentData + Send + 'static) -> Self {
        Self {
            store: PageStore::new(),
            documents: BTreeMap::new(),
            sources: BTreeMap::new(),
            observers: ObserverList::new(),
            next_document: 1,
            next_source: 1,
            data_factory: Box::new(data_factory),
        }
    }

    pub fn add_document_observer(&mut self, observer: Arc<dyn DocumentObserver>) {
        self.observers.add_document_observer(observer);
    }

    pub fn add_page_observer(&mut self, observer: Arc<dyn PageObserver>) {
        self.observers.add_page_observer(observer);
    }

    /// Open a source with `page_count` pages as one document in original form
    pub fn open_source(&mut self, name: &str, page_count: u32) -> Result<DocumentId> {
        if name.is_empty() {
            return Err(ComposeError::InvalidArgument(
                "source name must not be empty".to_string(),
            ));
        }
        if page_count == 0 {
            return Err(ComposeError::InvalidArgument(format!(
                "source '{name}' has no pages"
            )));
        }
        if self.sources.contains_key(name) {
            return Err(ComposeError::InvalidArgument(format!(
                "source '{name}' is already open"
            )));
        }

        let owner = self.next_source;
        self.next_source += 1;

        let mut pages = Vec::with_capacity(page_count as usize);
        for number in 1..=page_count {
            let id = self.store.insert(Page::new(PageKey::new(name, number)));
            self.store.add_reference(id, OwnerId::Source(owner))?;
            pages.push(id);
        }

        let id = self.allocate_document_id();
        let mut document = OutputDocument::new(id, name, (self.data_factory)(name));
        for page in &pages {
            document.push_page(&mut self.store, *page)?;
        }
        document.mark_original_form();

        self.sources
            .insert(name.to_string(), SourceEntry { owner, pages });
        self.documents.insert(id, document);
        info!(source = name, page_count, document = %id, "source opened");
        self.observers.notify_document(id, DocumentEvent::PagesChanged);
        Ok(id)
    }

    /// Drop the source's references; pages no document holds are disposed
    pub fn close_source(&mut self, name: &str) -> Result<()> {
        let entry = self.sources.remove(name).ok_or_else(|| {
            ComposeError::InvalidArgument(format!("source '{name}' is not open"))
        })?;

        let mut disposed = 0;
        for page in entry.pages {
            let release = self
                .store
                .remove_reference(page, OwnerId::Source(entry.owner));
            if release == Release::Disposed {
                disposed += 1;
            }
            self.notify_release(page, release);
        }
        debug!(source = name, disposed, "source closed");
        Ok(())
    }

    /// Names of the open sources
    pub fn sources(&self) -> impl Iterator<Item = &str> + '_ {
        self.sources.keys().map(String::as_str)
    }

    /// Pages loaded from an open source, in source order
    pub fn source_pages(&self, name: &str) -> Option<&[PageId]> {
        self.sources.get(name).map(|entry| entry.pages.as_slice())
    }

    pub fn document(&self, id: DocumentId) -> Option<&OutputDocument> {
        self.documents.get(&id)
    }

    /// Direct access for flag and data edits
    pub fn document_mut(&mut self, id: DocumentId) -> Option<&mut OutputDocument> {
        self.documents.get_mut(&id)
    }

    pub fn require_document(&self, id: DocumentId) -> Result<&OutputDocument> {
        self.documents
            .get(&id)
            .ok_or(ComposeError::UnknownDocument(id))
    }

    fn require_document_mut(&mut self, id: DocumentId) -> Result<&mut OutputDocument> {
        self.documents
            .get_mut(&id)
            .ok_or(ComposeError::UnknownDocument(id))
    }

    pub fn documents(&self) -> impl Iterator<Item = &OutputDocument> + '_ {
        self.documents.values()
    }

    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.keys().copied().collect()
    }

    pub fn contains_document(&self, id: DocumentId) -> bool {
        self.documents.contains_key(&id)
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.store.get(id)
    }

    /// The page arena
    pub fn pages(&self) -> &PageStore {
        &self.store
    }

    /// More than one live document holds `page`
    pub fn multiple_copies_exist(&self, page: PageId) -> bool {
        self.store.multiple_copies_exist(page, |owner| match owner {
            OwnerId::Document(id) => self.documents.contains_key(&id),
            OwnerId::Source(_) => false,
        })
    }

    /// Documents whose page sequence contains `page`
    pub fn documents_containing(&self, page: PageId) -> Vec<DocumentId> {
        self.store
            .get(page)
            .map(|p| {
                p.owners()
                    .filter_map(|owner| match owner {
                        OwnerId::Document(id) if self.documents.contains_key(&id) => Some(id),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Insert `page` into `document` at 1-based `position`
    pub fn insert_page(
        &mut self,
        document: DocumentId,
        page: PageId,
        position: usize,
    ) -> Result<()> {
        let doc = self
            .documents
            .get_mut(&document)
            .ok_or(ComposeError::UnknownDocument(document))?;
        doc.insert_page(&mut self.store, page, position)?;
        self.notify_pages_changed(document);
        self.observers.notify_page(page, PageEvent::ReferencesChanged);
        Ok(())
    }

    /// Remove `page` from `document`; an emptied document is discarded
    pub fn remove_page(&mut self, document: DocumentId, page: PageId) -> Result<Release> {
        let doc = self
            .documents
            .get_mut(&document)
            .ok_or(ComposeError::UnknownDocument(document))?;
        let release = doc.remove_page(&mut self.store, page)?;
        let emptied = doc.is_empty();

        self.notify_release(page, release);
        if emptied {
            self.discard_document(document)?;
        } else {
            self.notify_pages_changed(document);
        }
        Ok(release)
    }

    /// Move `page` within `document` to 1-based `position`
    pub fn move_page(
        &mut self,
        document: DocumentId,
        page: PageId,
        position: usize,
    ) -> Result<()> {
        let doc = self.require_document_mut(document)?;
        let moved = doc.position_of(page) != Some(position);
        doc.move_page(page, position)?;
        if moved {
            self.notify_pages_changed(document);
        }
        Ok(())
    }

    /// Move `page` from one document into another at `position`
    ///
    /// The target reference is taken before the source one is dropped, so the
    /// page is never left unreferenced in between.
    pub fn transfer_page(
        &mut self,
        page: PageId,
        from: DocumentId,
        to: DocumentId,
        position: usize,
    ) -> Result<()> {
        if from == to {
            return self.move_page(from, page, position);
        }
        if !self.require_document(from)?.contains(page) {
            return Err(ComposeError::InvalidArgument(format!(
                "{page} is not in {from}"
            )));
        }
        self.insert_page(to, page, position)?;
        self.remove_page(from, page)?;
        Ok(())
    }

    /// Split `document` so pages from `at_position` on form a new document
    pub fn split_document(
        &mut self,
        document: DocumentId,
        at_position: usize,
    ) -> Result<DocumentId> {
        let count = self.require_document(document)?.page_count();
        if at_position < 2 || at_position > count {
            return Err(ComposeError::InvalidArgument(format!(
                "split position {at_position} out of range 2..={count} for {document}"
            )));
        }

        let id = self.allocate_document_id();
        let (file_name, moved) = {
            let doc = self.require_document(document)?;
            (
                split_file_name(doc.file_name(), id),
                doc.pages()[at_position - 1..].to_vec(),
            )
        };

        let data = (self.data_factory)(&file_name);
        let mut split = OutputDocument::new(id, file_name.as_str(), data);
        for page in &moved {
            split.push_page(&mut self.store, *page)?;
        }
        self.documents.insert(id, split);

        let doc = self
            .documents
            .get_mut(&document)
            .ok_or(ComposeError::UnknownDocument(document))?;
        for page in &moved {
            doc.remove_page(&mut self.store, *page)?;
        }

        debug!(%document, new_document = %id, at_position, "document split");
        self.notify_pages_changed(document);
        self.notify_pages_changed(id);
        for page in moved {
            self.observers.notify_page(page, PageEvent::ReferencesChanged);
        }
        Ok(id)
    }

    /// Append the pages of `source` to `target` and discard `source`
    ///
    /// Pages already present in `target` are not added twice.
    pub fn merge_documents(&mut self, target: DocumentId, source: DocumentId) -> Result<()> {
        if target == source {
            return Err(ComposeError::InvalidArgument(format!(
                "cannot merge {target} into itself"
            )));
        }
        let pages = self.require_document(source)?.pages().to_vec();
        let target_doc = self
            .documents
            .get_mut(&target)
            .ok_or(ComposeError::UnknownDocument(target))?;

        for page in pages {
            if !target_doc.contains(page) {
                target_doc.push_page(&mut self.store, page)?;
            }
        }

        debug!(%target, %source, "documents merged");
        self.notify_pages_changed(target);
        self.discard_document(source)
    }

    /// Reference `page` from another document as well
    pub fn duplicate_page(
        &mut self,
        page: PageId,
        target: DocumentId,
        position: usize,
    ) -> Result<()> {
        self.insert_page(target, page, position)
    }

    /// Remove `page` from every document that holds it
    pub fn delete_page(&mut self, page: PageId) -> Result<Vec<DocumentId>> {
        if self.store.is_disposed(page) {
            return Err(ComposeError::PageDisposed(page));
        }
        let holders = self.documents_containing(page);
        for document in &holders {
            self.remove_page(*document, page)?;
        }
        Ok(holders)
    }

    /// Rotate `page` by `by` relative to its current orientation
    ///
    /// Every document holding a rotated page loses its original form.
    pub fn rotate_page(&mut self, page: PageId, by: Orientation) -> Result<Orientation> {
        let orientation = self.store.require(page)?.orientation().combine(by);
        if !self.store.set_orientation(page, orientation)? {
            return Ok(orientation);
        }

        self.observers
            .notify_page(page, PageEvent::OrientationChanged(orientation));
        for document in self.documents_containing(page) {
            if let Some(doc) = self.documents.get_mut(&document) {
                doc.mark_structure_changed();
            }
            self.notify_pages_changed(document);
        }
        Ok(orientation)
    }

    /// Drop `document` and release its pages
    pub fn discard_document(&mut self, document: DocumentId) -> Result<()> {
        let mut doc = self
            .documents
            .remove(&document)
            .ok_or(ComposeError::UnknownDocument(document))?;

        for (page, release) in doc.release_pages(&mut self.store) {
            self.notify_release(page, release);
        }
        debug!(%document, "document discarded");
        self.observers
            .notify_document(document, DocumentEvent::Discarded);
        Ok(())
    }

    /// Start the document over: new generation, status reset
    pub fn reload_document(&mut self, document: DocumentId) -> Result<u64> {
        let doc = self.require_document_mut(document)?;
        doc.reload();
        let generation = doc.generation();
        debug!(%document, generation, "document reloaded");
        self.observers
            .notify_document(document, DocumentEvent::Reloaded);
        Ok(generation)
    }

    /// Write `document` through `sink`
    ///
    /// Observers may veto the output first. A write failure leaves the
    /// document untouched; on success the document is removed and its pages
    /// are released.
    pub fn output_document(
        &mut self,
        document: DocumentId,
        sink: &dyn OutputSink,
    ) -> Result<PathBuf> {
        let doc = self.require_document(document)?;
        if !self.observers.allow_output(document) {
            debug!(%document, "output cancelled by observer");
            return Err(ComposeError::OutputCancelled);
        }
        self.observers
            .notify_document(document, DocumentEvent::AboutToOutput);

        let snapshot = doc.snapshot(&self.store)?;
        let request = OutputRequest::from_snapshot(
            snapshot,
            doc.data().status().summary.clone(),
            doc.data().send_for_reprocessing(),
        );
        let path = sink.write(&request)?;

        if let Some(mut doc) = self.documents.remove(&document) {
            for (page, release) in doc.release_pages(&mut self.store) {
                self.notify_release(page, release);
            }
        }
        info!(%document, path = %path.display(), "document written");
        self.observers
            .notify_document(document, DocumentEvent::OutputComplete);
        Ok(path)
    }

    /// Copy what a validation worker needs
    pub(crate) fn validation_snapshot(&self, document: DocumentId) -> Result<ValidationSnapshot> {
        let doc = self.require_document(document)?;
        Ok(ValidationSnapshot {
            generation: doc.generation(),
            payload: doc.data().serialize()?,
            composition: doc.snapshot(&self.store)?,
        })
    }

    /// Apply a finished evaluation if the document still has `generation`
    pub(crate) fn publish_status(
        &mut self,
        document: DocumentId,
        generation: u64,
        evaluation: StatusEvaluation,
    ) -> bool {
        match self.documents.get_mut(&document) {
            Some(doc) if doc.generation() == generation => {
                doc.data_mut().apply(evaluation);
            }
            _ => return false,
        }
        self.observers
            .notify_document(document, DocumentEvent::StateChanged);
        true
    }

    fn allocate_document_id(&mut self) -> DocumentId {
        let id = DocumentId(self.next_document);
        self.next_document += 1;
        id
    }

    fn notify_pages_changed(&self, document: DocumentId) {
        self.observers
            .notify_document(document, DocumentEvent::PagesChanged);
    }

    fn notify_release(&self, page: PageId, release: Release) {
        match release {
            Release::NotReferenced => {}
            Release::Released => self.observers.notify_page(page, PageEvent::ReferencesChanged),
            Release::Disposed => self.observers.notify_page(page, PageEvent::Disposed),
        }
    }
}

/// `scan.pdf` split off as document 4 becomes `scan-4.pdf`
fn split_file_name(file_name: &str, id: DocumentId) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{}.{ext}", id.0),
        None => format!("{stem}-{}", id.0),
    }
}
