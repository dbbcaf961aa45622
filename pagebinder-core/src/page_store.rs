//! Slab storage for pages
//!
//! Pages are stored by index with a per-slot generation. When the last owner
//! releases a page the page is disposed, the slot generation is bumped and the
//! slot goes back on the free list, so any [`PageId`] still held elsewhere
//! stops resolving instead of pointing at a recycled page.

use crate::error::{ComposeError, Result};
use crate::page::{Orientation, OwnerId, Page};
use std::fmt;

/// Handle to a page in a [`PageStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    index: u32,
    generation: u32,
}

impl PageId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}.{}", self.index, self.generation)
    }
}

/// Result of releasing a page reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The owner did not hold a reference (or the page is already gone)
    NotReferenced,
    /// The reference was dropped; other owners remain
    Released,
    /// The last reference was dropped and the page was disposed
    Disposed,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    page: Option<Page>,
}

/// Arena of pages with reference counting
#[derive(Debug, Default)]
pub struct PageStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a page and return its handle
    pub fn insert(&mut self, page: Page) -> PageId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.page = Some(page);
            return PageId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            page: Some(page),
        });
        PageId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: PageId) -> Option<&Page> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.page.as_ref())
    }

    pub fn get_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.page.as_mut())
    }

    /// Resolve a handle or fail with [`ComposeError::PageDisposed`]
    pub fn require(&self, id: PageId) -> Result<&Page> {
        self.get(id).ok_or(ComposeError::PageDisposed(id))
    }

    pub fn is_disposed(&self, id: PageId) -> bool {
        self.get(id).is_none()
    }

    /// Number of pages currently alive
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PageId, &Page)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.page.as_ref().map(|page| {
                (
                    PageId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    page,
                )
            })
        })
    }

    /// Record that `owner` references the page
    pub fn add_reference(&mut self, id: PageId, owner: OwnerId) -> Result<bool> {
        let page = self.get_mut(id).ok_or(ComposeError::PageDisposed(id))?;
        Ok(page.add_reference(owner))
    }

    /// Drop `owner`'s reference, disposing the page when none remain
    pub fn remove_reference(&mut self, id: PageId, owner: OwnerId) -> Release {
        let Some(page) = self.get_mut(id) else {
            return Release::NotReferenced;
        };

        if !page.remove_reference(owner) {
            return Release::NotReferenced;
        }

        if page.reference_count() > 0 {
            return Release::Released;
        }

        page.dispose();
        let slot = &mut self.slots[id.index as usize];
        slot.page = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Release::Disposed
    }

    /// See [`Page::multiple_copies_exist`]. A disposed page has no copies.
    pub fn multiple_copies_exist(&self, id: PageId, is_live: impl Fn(OwnerId) -> bool) -> bool {
        self.get(id)
            .map(|page| page.multiple_copies_exist(is_live))
            .unwrap_or(false)
    }

    pub fn set_orientation(&mut self, id: PageId, orientation: Orientation) -> Result<bool> {
        let page = self.get_mut(id).ok_or(ComposeError::PageDisposed(id))?;
        Ok(page.set_orientation(orientation))
    }
}
