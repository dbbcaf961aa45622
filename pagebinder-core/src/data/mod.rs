//! Extracted data bound to an output document
//!
//! [`DocumentData`] pairs the status a user interface shows for a document
//! (modified, error, summary, reprocess flag) with an [`AttributeSet`]
//! supplied by the embedding application. The status is only ever recomputed
//! from a serialized [`AttributePayload`]: the live attribute set is
//! serialized on the interactive thread, the payload crosses to a worker, and
//! the worker rebuilds an independent copy through an [`AttributeCodec`]
//! before calling [`AttributeSet::evaluate`].
//!
//! # Example
//!
//! ```rust
//! use pagebinder::data::{DocumentData, FieldAttributes, FieldCodec};
//!
//! # fn main() -> pagebinder::Result<()> {
//! let data = DocumentData::new(Box::new(
//!     FieldAttributes::new().with_field("invoice_number", "INV-1"),
//! ));
//!
//! let payload = data.serialize()?;
//! let copy = DocumentData::reconstruct(&FieldCodec, &payload)?;
//! assert!(!copy.status().initialized);
//! # Ok(())
//! # }
//! ```

pub mod fields;

pub use fields::{Field, FieldAttributes, FieldCodec, FieldRule};

use crate::document::CompositionSnapshot;
use crate::error::{ComposeError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Status fields observers read from a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataStatus {
    /// The data differs from what was loaded
    pub modified: bool,
    /// The data failed a validation rule
    pub data_error: bool,
    /// Message for the first failing rule
    pub error_message: Option<String>,
    /// Human-readable one-line summary
    pub summary: String,
    /// Evaluated reprocessing flag (see [`DocumentData::send_for_reprocessing`])
    pub send_for_reprocessing: Option<bool>,
    /// At least one validation pass has been applied.
    ///
    /// Until this is set the other fields are not authoritative.
    pub initialized: bool,
}

/// Output of one [`AttributeSet::evaluate`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusEvaluation {
    pub modified: bool,
    pub data_error: bool,
    pub error_message: Option<String>,
    pub summary: String,
    pub send_for_reprocessing: Option<bool>,
}

/// Immutable serialized attribute data.
///
/// Cloning shares the bytes; nothing can mutate them.
#[derive(Clone, PartialEq, Eq)]
pub struct AttributePayload {
    bytes: Arc<[u8]>,
}

impl AttributePayload {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
        }
    }

    /// Serialize a value as JSON
    pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::from_bytes(serde_json::to_vec(value)?))
    }

    /// Deserialize a JSON payload
    pub fn from_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for AttributePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributePayload")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Read-only auxiliary data consulted during evaluation
pub trait AuxiliaryLookup: Send + Sync {
    /// Whether `key` exists in `table`
    fn contains(&self, table: &str, key: &str) -> Result<bool>;
}

/// Lookup used when no auxiliary source is configured; every query fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl AuxiliaryLookup for NoLookup {
    fn contains(&self, table: &str, _key: &str) -> Result<bool> {
        Err(ComposeError::ValidationFailure(format!(
            "no auxiliary data source for table '{table}'"
        )))
    }
}

/// In-memory lookup tables
#[derive(Debug, Clone, Default)]
pub struct MemoryLookup {
    tables: HashMap<String, HashSet<String>>,
}

impl MemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add entries to a table, creating it if needed
    pub fn with_entries<I, S>(mut self, table: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .entry(table.into())
            .or_default()
            .extend(entries.into_iter().map(Into::into));
        self
    }
}

impl AuxiliaryLookup for MemoryLookup {
    fn contains(&self, table: &str, key: &str) -> Result<bool> {
        match self.tables.get(table) {
            Some(entries) => Ok(entries.contains(key)),
            None => Err(ComposeError::ValidationFailure(format!(
                "unknown lookup table '{table}'"
            ))),
        }
    }
}

/// Everything an evaluation may read
pub struct EvaluationContext<'a> {
    /// Page composition of the document at snapshot time
    pub composition: &'a CompositionSnapshot,
    /// Auxiliary read-only data
    pub lookup: &'a dyn AuxiliaryLookup,
}

/// Attribute content supplied by a data-entry implementation
pub trait AttributeSet: Send + fmt::Debug {
    /// Produce a payload that fully describes this attribute set
    fn serialize(&self) -> Result<AttributePayload>;

    /// Compute the status fields from the current content.
    ///
    /// Runs on a worker against a reconstructed copy; must not have side
    /// effects visible outside that copy.
    fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<StatusEvaluation>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Rebuilds attribute sets from payloads
pub trait AttributeCodec: Send + Sync {
    /// Inverse of [`AttributeSet::serialize`]; deterministic for a given payload
    fn reconstruct(&self, payload: &AttributePayload) -> Result<Box<dyn AttributeSet>>;
}

/// Attribute data plus status for one output document
#[derive(Debug)]
pub struct DocumentData {
    status: DataStatus,
    reprocess_override: Option<bool>,
    attributes: Box<dyn AttributeSet>,
}

impl DocumentData {
    pub fn new(attributes: Box<dyn AttributeSet>) -> Self {
        Self {
            status: DataStatus::default(),
            reprocess_override: None,
            attributes,
        }
    }

    /// Build an independent instance from a payload
    pub fn reconstruct(codec: &dyn AttributeCodec, payload: &AttributePayload) -> Result<Self> {
        Ok(Self::new(codec.reconstruct(payload)?))
    }

    pub fn serialize(&self) -> Result<AttributePayload> {
        self.attributes.serialize()
    }

    pub fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<StatusEvaluation> {
        self.attributes.evaluate(context)
    }

    pub fn status(&self) -> &DataStatus {
        &self.status
    }

    pub fn is_initialized(&self) -> bool {
        self.status.initialized
    }

    /// Apply an evaluation. `initialized` is set last.
    pub fn apply(&mut self, evaluation: StatusEvaluation) {
        self.status.modified = evaluation.modified;
        self.status.data_error = evaluation.data_error;
        self.status.error_message = evaluation.error_message;
        self.status.summary = evaluation.summary;
        self.status.send_for_reprocessing = evaluation.send_for_reprocessing;
        self.status.initialized = true;
    }

    /// Forget any applied evaluation
    pub fn reset_status(&mut self) {
        self.status = DataStatus::default();
    }

    /// User override for the reprocessing flag; `None` defers to evaluation
    pub fn set_reprocess_override(&mut self, value: Option<bool>) {
        self.reprocess_override = value;
    }

    pub fn reprocess_override(&self) -> Option<bool> {
        self.reprocess_override
    }

    /// Effective reprocessing flag: the override wins over the evaluated value
    pub fn send_for_reprocessing(&self) -> Option<bool> {
        self.reprocess_override.or(self.status.send_for_reprocessing)
    }

    pub fn attributes(&self) -> &dyn AttributeSet {
        self.attributes.as_ref()
    }

    pub fn attributes_mut(&mut self) -> &mut dyn AttributeSet {
        self.attributes.as_mut()
    }

    /// Downcast the attribute set
    pub fn attributes_as<T: AttributeSet + 'static>(&self) -> Option<&T> {
        self.attributes.as_any().downcast_ref::<T>()
    }

    /// Downcast the attribute set mutably
    pub fn attributes_as_mut<T: AttributeSet + 'static>(&mut self) -> Option<&mut T> {
        self.attributes.as_any_mut().downcast_mut::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_sets_initialized() {
        let mut data = DocumentData::new(Box::new(FieldAttributes::new()));
        assert!(!data.is_initialized());

        data.apply(StatusEvaluation {
            modified: true,
            data_error: false,
            error_message: None,
            summary: "2 pages".to_string(),
            send_for_reprocessing: Some(true),
        });

        let status = data.status();
        assert!(status.initialized);
        assert!(status.modified);
        assert_eq!(status.summary, "2 pages");

        data.reset_status();
        assert_eq!(data.status(), &DataStatus::default());
    }

    #[test]
    fn test_reprocess_override_wins() {
        let mut data = DocumentData::new(Box::new(FieldAttributes::new()));
        data.apply(StatusEvaluation {
            send_for_reprocessing: Some(true),
            ..Default::default()
        });
        assert_eq!(data.send_for_reprocessing(), Some(true));

        data.set_reprocess_override(Some(false));
        assert_eq!(data.send_for_reprocessing(), Some(false));

        data.set_reprocess_override(None);
        assert_eq!(data.send_for_reprocessing(), Some(true));
    }

    #[test]
    fn test_payload_is_independent_of_source() {
        let mut data = DocumentData::new(Box::new(
            FieldAttributes::new().with_field("vendor", "Acme"),
        ));
        let payload = data.serialize().unwrap();

        data.attributes_as_mut::<FieldAttributes>()
            .unwrap()
            .set("vendor", "Globex")
            .unwrap();

        let copy = DocumentData::reconstruct(&FieldCodec, &payload).unwrap();
        let fields = copy.attributes_as::<FieldAttributes>().unwrap();
        assert_eq!(fields.get("vendor"), Some("Acme"));
    }

    #[test]
    fn test_memory_lookup() {
        let lookup = MemoryLookup::new().with_entries("vendors", ["Acme", "Globex"]);
        assert!(lookup.contains("vendors", "Acme").unwrap());
        assert!(!lookup.contains("vendors", "Initech").unwrap());
        assert!(lookup.contains("customers", "Acme").is_err());
        assert!(NoLookup.contains("vendors", "Acme").is_err());
    }

    #[test]
    fn test_payload_debug_hides_bytes() {
        let payload = AttributePayload::from_bytes(vec![1, 2, 3]);
        assert_eq!(format!("{payload:?}"), "AttributePayload { len: 3 }");
        assert_eq!(payload.len(), 3);
        assert!(!payload.is_empty());
    }
}
