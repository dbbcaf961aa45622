//! Source pages and their reference bookkeeping
//!
//! A [`Page`] is one page of one source document. The same page can be placed
//! in more than one output document at a time, so each page keeps the set of
//! owners that currently reference it. Pages live in a
//! [`PageStore`](crate::page_store::PageStore) and are addressed by
//! [`PageId`](crate::page_store::PageId).

use crate::document::DocumentId;
use crate::error::{ComposeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identity of a source page: source document name plus 1-based page number.
///
/// Orientation is deliberately not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageKey {
    /// Name of the source document
    pub source: String,
    /// Original page number in the source (1-based)
    pub page_number: u32,
}

impl PageKey {
    /// Create a new page key
    pub fn new(source: impl Into<String>, page_number: u32) -> Self {
        Self {
            source: source.into(),
            page_number,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} p{}", self.source, self.page_number)
    }
}

/// Page orientation relative to the original source page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Orientation {
    /// As in the source (0 degrees)
    #[default]
    Upright,
    /// 90 degrees clockwise
    Clockwise90,
    /// 180 degrees
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Clockwise270,
}

impl Orientation {
    /// Create from degrees
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Orientation::Upright),
            90 => Ok(Orientation::Clockwise90),
            180 => Ok(Orientation::Rotate180),
            270 => Ok(Orientation::Clockwise270),
            _ => Err(ComposeError::InvalidArgument(format!(
                "invalid orientation {degrees} (must be a multiple of 90)"
            ))),
        }
    }

    /// Convert to degrees
    pub fn to_degrees(self) -> i32 {
        match self {
            Orientation::Upright => 0,
            Orientation::Clockwise90 => 90,
            Orientation::Rotate180 => 180,
            Orientation::Clockwise270 => 270,
        }
    }

    /// Combine two rotations
    pub fn combine(self, other: Orientation) -> Orientation {
        match (self.to_degrees() + other.to_degrees()) % 360 {
            90 => Orientation::Clockwise90,
            180 => Orientation::Rotate180,
            270 => Orientation::Clockwise270,
            _ => Orientation::Upright,
        }
    }

    /// Whether going from `self` to `other` swaps width and height
    pub fn is_quarter_turn_from(self, other: Orientation) -> bool {
        (self.to_degrees() - other.to_degrees()).rem_euclid(180) == 90
    }
}

impl TryFrom<i32> for Orientation {
    type Error = ComposeError;

    fn try_from(degrees: i32) -> Result<Self> {
        Orientation::from_degrees(degrees)
    }
}

impl From<Orientation> for i32 {
    fn from(orientation: Orientation) -> Self {
        orientation.to_degrees()
    }
}

/// Something that holds a reference to a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerId {
    /// An output document whose page sequence contains the page
    Document(DocumentId),
    /// The opened source file the page was loaded from; held until the source closes
    Source(u32),
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerId::Document(id) => write!(f, "{id}"),
            OwnerId::Source(id) => write!(f, "source#{id}"),
        }
    }
}

/// Cached rendering of a page.
///
/// Rendering itself happens elsewhere; the cache only has to follow the page
/// orientation so a rotated page never shows a stale thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thumbnail {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// One page of one source document
#[derive(Debug, Clone)]
pub struct Page {
    key: PageKey,
    orientation: Orientation,
    owners: BTreeSet<OwnerId>,
    thumbnail: Option<Thumbnail>,
    disposed: bool,
}

impl Page {
    /// Create an unreferenced page in its original orientation
    pub fn new(key: PageKey) -> Self {
        Self {
            key,
            orientation: Orientation::Upright,
            owners: BTreeSet::new(),
            thumbnail: None,
            disposed: false,
        }
    }

    pub fn key(&self) -> &PageKey {
        &self.key
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn thumbnail(&self) -> Option<Thumbnail> {
        self.thumbnail
    }

    /// Attach a cached rendering made at the current orientation
    pub fn set_thumbnail(&mut self, thumbnail: Thumbnail) {
        if !self.disposed {
            self.thumbnail = Some(thumbnail);
        }
    }

    /// Add an owner. Returns `false` if it was already present.
    pub fn add_reference(&mut self, owner: OwnerId) -> bool {
        self.owners.insert(owner)
    }

    /// Remove an owner. Returns `false` if it was not present.
    pub fn remove_reference(&mut self, owner: OwnerId) -> bool {
        self.owners.remove(&owner)
    }

    pub fn is_referenced_by(&self, owner: OwnerId) -> bool {
        self.owners.contains(&owner)
    }

    pub fn owners(&self) -> impl Iterator<Item = OwnerId> + '_ {
        self.owners.iter().copied()
    }

    pub fn reference_count(&self) -> usize {
        self.owners.len()
    }

    /// Whether more than one live owner references this page.
    ///
    /// `is_live` filters out owners that have been marked deleted but not yet
    /// released their reference. Never cached.
    pub fn multiple_copies_exist(&self, is_live: impl Fn(OwnerId) -> bool) -> bool {
        self.owners.iter().filter(|owner| is_live(**owner)).take(2).count() > 1
    }

    /// Change the orientation. Returns `false` if nothing changed.
    pub fn set_orientation(&mut self, orientation: Orientation) -> bool {
        if orientation == self.orientation {
            return false;
        }

        if orientation.is_quarter_turn_from(self.orientation) {
            if let Some(thumbnail) = self.thumbnail.as_mut() {
                std::mem::swap(&mut thumbnail.width, &mut thumbnail.height);
            }
        }

        self.orientation = orientation;
        true
    }

    /// Release cached resources. Calling it twice is harmless.
    pub fn dispose(&mut self) {
        self.thumbnail = None;
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(id: u64) -> OwnerId {
        OwnerId::Document(DocumentId(id))
    }

    #[test]
    fn test_orientation_from_degrees() {
        assert_eq!(Orientation::from_degrees(0).unwrap(), Orientation::Upright);
        assert_eq!(
            Orientation::from_degrees(450).unwrap(),
            Orientation::Clockwise90
        );
        assert_eq!(
            Orientation::from_degrees(-90).unwrap(),
            Orientation::Clockwise270
        );
        assert!(Orientation::from_degrees(45).is_err());
    }

    #[test]
    fn test_orientation_combine() {
        let rotated = Orientation::Clockwise270.combine(Orientation::Rotate180);
        assert_eq!(rotated, Orientation::Clockwise90);
        assert_eq!(
            Orientation::Clockwise90.combine(Orientation::Clockwise270),
            Orientation::Upright
        );
    }

    #[test]
    fn test_orientation_serde_as_degrees() {
        let json = serde_json::to_string(&Orientation::Rotate180).unwrap();
        assert_eq!(json, "180");
        let parsed: Orientation = serde_json::from_str("270").unwrap();
        assert_eq!(parsed, Orientation::Clockwise270);
        assert!(serde_json::from_str::<Orientation>("30").is_err());
    }

    #[test]
    fn test_references_are_idempotent() {
        let mut page = Page::new(PageKey::new("scan.pdf", 1));

        assert!(page.add_reference(owner(1)));
        assert!(!page.add_reference(owner(1)));
        assert_eq!(page.reference_count(), 1);

        assert!(page.remove_reference(owner(1)));
        assert!(!page.remove_reference(owner(1)));
        assert_eq!(page.reference_count(), 0);
    }

    #[test]
    fn test_multiple_copies_ignores_dead_owners() {
        let mut page = Page::new(PageKey::new("scan.pdf", 2));
        page.add_reference(owner(1));
        assert!(!page.multiple_copies_exist(|_| true));

        page.add_reference(owner(2));
        assert!(page.multiple_copies_exist(|_| true));
        assert!(!page.multiple_copies_exist(|o| o != owner(2)));
    }

    #[test]
    fn test_set_orientation_rotates_thumbnail() {
        let mut page = Page::new(PageKey::new("scan.pdf", 3));
        page.set_thumbnail(Thumbnail {
            width: 80,
            height: 100,
        });

        assert!(!page.set_orientation(Orientation::Upright));
        assert!(page.set_orientation(Orientation::Clockwise90));
        assert_eq!(
            page.thumbnail(),
            Some(Thumbnail {
                width: 100,
                height: 80
            })
        );

        assert!(page.set_orientation(Orientation::Clockwise270));
        assert_eq!(page.thumbnail().map(|t| t.width), Some(100));
    }

    #[test]
    fn test_dispose_twice() {
        let mut page = Page::new(PageKey::new("scan.pdf", 4));
        page.set_thumbnail(Thumbnail {
            width: 1,
            height: 1,
        });
        page.dispose();
        page.dispose();
        assert!(page.is_disposed());
        assert!(page.thumbnail().is_none());
    }
}
