//! Candidate output documents
//!
//! An [`OutputDocument`] is an ordered sequence of page handles that will be
//! written as one output file. Every page in the sequence carries a reference
//! back to the document ([`OwnerId::Document`]), so the page store always knows
//! which documents hold a page.

use crate::data::DocumentData;
use crate::error::{ComposeError, Result};
use crate::page::{Orientation, OwnerId, PageKey};
use crate::page_store::{PageId, PageStore, Release};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an output document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Page as seen by a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPage {
    pub key: PageKey,
    pub orientation: Orientation,
}

/// Immutable copy of a document's composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionSnapshot {
    pub document: DocumentId,
    pub generation: u64,
    pub file_name: String,
    pub pages: Vec<SnapshotPage>,
    pub in_original_form: bool,
}

/// Ordered composition of pages forming one output file
#[derive(Debug)]
pub struct OutputDocument {
    id: DocumentId,
    generation: u64,
    file_name: String,
    pages: Vec<PageId>,
    in_original_form: bool,
    selected: bool,
    collapsed: bool,
    structure_changed: bool,
    form_changed: bool,
    data: DocumentData,
}

impl OutputDocument {
    /// Create an empty document
    pub fn new(id: DocumentId, file_name: impl Into<String>, data: DocumentData) -> Self {
        Self {
            id,
            generation: 0,
            file_name: file_name.into(),
            pages: Vec::new(),
            in_original_form: false,
            selected: false,
            collapsed: false,
            structure_changed: false,
            form_changed: false,
            data,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// Bumped every time the document is reloaded
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn owner(&self) -> OwnerId {
        OwnerId::Document(self.id)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn set_file_name(&mut self, file_name: impl Into<String>) {
        self.file_name = file_name.into();
    }

    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page: PageId) -> bool {
        self.pages.contains(&page)
    }

    /// 1-based position of a page
    pub fn position_of(&self, page: PageId) -> Option<usize> {
        self.pages.iter().position(|p| *p == page).map(|i| i + 1)
    }

    /// Whether the page sequence is exactly the source's, untouched
    pub fn in_original_form(&self) -> bool {
        self.in_original_form
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Queue or unqueue the document for commit
    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn set_collapsed(&mut self, collapsed: bool) {
        self.collapsed = collapsed;
    }

    pub fn structure_changed(&self) -> bool {
        self.structure_changed
    }

    pub fn form_changed(&self) -> bool {
        self.form_changed
    }

    pub fn clear_change_flags(&mut self) {
        self.structure_changed = false;
        self.form_changed = false;
    }

    pub fn data(&self) -> &DocumentData {
        &self.data
    }

    /// Mutable access for user edits; marks the form as changed
    pub fn edit_data(&mut self) -> &mut DocumentData {
        self.form_changed = true;
        &mut self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut DocumentData {
        &mut self.data
    }

    /// Insert `page` at 1-based `position` (`1..=count+1`) and reference it
    pub fn insert_page(
        &mut self,
        store: &mut PageStore,
        page: PageId,
        position: usize,
    ) -> Result<()> {
        if position == 0 || position > self.pages.len() + 1 {
            return Err(ComposeError::InvalidArgument(format!(
                "position {position} out of range 1..={} for {}",
                self.pages.len() + 1,
                self.id
            )));
        }
        if self.contains(page) {
            return Err(ComposeError::InvalidArgument(format!(
                "{page} is already in {}",
                self.id
            )));
        }

        store.add_reference(page, self.owner())?;
        self.pages.insert(position - 1, page);
        self.mark_structure_changed();
        Ok(())
    }

    /// Append `page` at the end
    pub fn push_page(&mut self, store: &mut PageStore, page: PageId) -> Result<()> {
        let position = self.pages.len() + 1;
        self.insert_page(store, page, position)
    }

    /// Remove `page` and drop this document's reference to it
    pub fn remove_page(&mut self, store: &mut PageStore, page: PageId) -> Result<Release> {
        let index = self.pages.iter().position(|p| *p == page).ok_or_else(|| {
            ComposeError::InvalidArgument(format!("{page} is not in {}", self.id))
        })?;

        self.pages.remove(index);
        self.mark_structure_changed();
        Ok(store.remove_reference(page, self.owner()))
    }

    /// Move `page` to 1-based `position` (`1..=count`)
    pub fn move_page(&mut self, page: PageId, position: usize) -> Result<()> {
        let index = self.pages.iter().position(|p| *p == page).ok_or_else(|| {
            ComposeError::InvalidArgument(format!("{page} is not in {}", self.id))
        })?;
        if position == 0 || position > self.pages.len() {
            return Err(ComposeError::InvalidArgument(format!(
                "position {position} out of range 1..={} for {}",
                self.pages.len(),
                self.id
            )));
        }

        if index + 1 != position {
            let page = self.pages.remove(index);
            self.pages.insert(position - 1, page);
            self.mark_structure_changed();
        }
        Ok(())
    }

    /// Copy the composition for a worker
    pub fn snapshot(&self, store: &PageStore) -> Result<CompositionSnapshot> {
        let pages = self
            .pages
            .iter()
            .map(|id| {
                store.require(*id).map(|page| SnapshotPage {
                    key: page.key().clone(),
                    orientation: page.orientation(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompositionSnapshot {
            document: self.id,
            generation: self.generation,
            file_name: self.file_name.clone(),
            pages,
            in_original_form: self.in_original_form,
        })
    }

    /// Once broken, original form is never re-derived
    pub(crate) fn mark_structure_changed(&mut self) {
        self.in_original_form = false;
        self.structure_changed = true;
    }

    pub(crate) fn mark_original_form(&mut self) {
        self.in_original_form = true;
        self.structure_changed = false;
    }

    /// Bump the generation and forget applied status
    pub(crate) fn reload(&mut self) {
        self.generation += 1;
        self.data.reset_status();
        self.clear_change_flags();
    }

    /// Drop every page reference; used when the document goes away
    pub(crate) fn release_pages(&mut self, store: &mut PageStore) -> Vec<(PageId, Release)> {
        let owner = self.owner();
        self.pages
            .drain(..)
            .map(|page| (page, store.remove_reference(page, owner)))
            .collect()
    }
}
