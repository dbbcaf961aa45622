//! # pagebinder
//!
//! Page composition and background status validation for document
//! separation tools.
//!
//! Source files are opened into a [`Workspace`] as pages. Pages are shared,
//! reference-counted handles that candidate output documents arrange into
//! ordered sequences. Users split, merge, reorder, rotate and duplicate pages
//! across documents, and every document carries extracted [`data`] whose
//! status (modified, error, summary) is recomputed in the background by a
//! [`StatusValidationCoordinator`](validation::StatusValidationCoordinator).
//!
//! ## Features
//!
//! - **Arena-backed pages**: pages live in a [`PageStore`] slab and are
//!   addressed by generation-checked [`PageId`]s, so a handle to a disposed
//!   page never resolves to a recycled one
//! - **Two-way references**: every page knows which documents hold it, which
//!   is what "multiple copies exist" is derived from
//! - **Observable changes**: document and page events, with a veto point
//!   before output
//! - **Background validation**: deduplicated per document, throttled to a
//!   fixed number of concurrent evaluations, isolated through a serialized
//!   payload and published only while still relevant
//! - **Orderly shutdown**: a lifecycle manager tracks every worker so
//!   teardown can wait for them with a timeout
//!
//! ## Quick Start
//!
//! ```rust
//! use pagebinder::{Orientation, Workspace};
//!
//! # fn main() -> pagebinder::Result<()> {
//! let mut workspace = Workspace::default();
//! let scan = workspace.open_source("scan.pdf", 4)?;
//!
//! // Pages 3 and 4 become their own document
//! let invoice = workspace.split_document(scan, 3)?;
//!
//! let first = workspace.document(invoice).unwrap().pages()[0];
//! workspace.rotate_page(first, Orientation::Clockwise90)?;
//!
//! assert_eq!(workspace.document(scan).unwrap().page_count(), 2);
//! assert!(!workspace.document(invoice).unwrap().in_original_form());
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod document;
pub mod error;
pub mod events;
pub mod output;
pub mod page;
pub mod page_store;
pub mod validation;
pub mod workspace;

pub use data::{DataStatus, DocumentData, StatusEvaluation};
pub use document::{CompositionSnapshot, DocumentId, OutputDocument};
pub use error::{ComposeError, Result};
pub use events::{DocumentEvent, DocumentObserver, PageEvent, PageObserver};
pub use output::{ManifestSink, OutputRequest, OutputSink};
pub use page::{Orientation, OwnerId, Page, PageKey};
pub use page_store::{PageId, PageStore, Release};
pub use validation::{CoordinatorOptions, StatusValidationCoordinator, ValidationOutcome};
pub use workspace::Workspace;

/// Current version of pagebinder
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
