//! Named-field attribute sets
//!
//! A small data-entry model: each field remembers the value it was loaded with
//! and its current value, and a list of rules decides whether the data has an
//! error. Serialized as JSON.

use super::{
    AttributeCodec, AttributePayload, AttributeSet, EvaluationContext, StatusEvaluation,
};
use crate::error::{ComposeError, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// One named value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Value as loaded
    pub original: String,
    /// Value as currently edited
    pub value: String,
}

impl Field {
    pub fn is_modified(&self) -> bool {
        self.original != self.value
    }
}

/// Validation rule over a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FieldRule {
    /// The field must not be blank
    Required { field: String },
    /// A non-blank value must exist in an auxiliary lookup table
    InTable { field: String, table: String },
}

/// Ordered named fields plus validation rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAttributes {
    fields: Vec<Field>,
    #[serde(default)]
    rules: Vec<FieldRule>,
    #[serde(default)]
    summary_field: Option<String>,
}

impl FieldAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field loaded with `value`
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        self.fields.push(Field {
            name: name.into(),
            original: value.clone(),
            value,
        });
        self
    }

    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Use this field's value as the summary prefix
    pub fn with_summary_field(mut self, name: impl Into<String>) -> Self {
        self.summary_field = Some(name.into());
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.field(name).map(|field| field.value.as_str())
    }

    /// Edit a field value
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let field = self
            .fields
            .iter_mut()
            .find(|field| field.name == name)
            .ok_or_else(|| ComposeError::InvalidArgument(format!("unknown field '{name}'")))?;
        field.value = value.into();
        Ok(())
    }

    /// Whether any field differs from its loaded value
    pub fn is_modified(&self) -> bool {
        self.fields.iter().any(Field::is_modified)
    }

    /// Restore every field to its loaded value
    pub fn revert(&mut self) {
        for field in &mut self.fields {
            field.value = field.original.clone();
        }
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    fn value_of(&self, name: &str) -> &str {
        self.get(name).unwrap_or("").trim()
    }

    /// First failing rule, as an error message
    fn first_violation(&self, context: &EvaluationContext<'_>) -> Result<Option<String>> {
        for rule in &self.rules {
            match rule {
                FieldRule::Required { field } => {
                    if self.value_of(field).is_empty() {
                        return Ok(Some(format!("Field '{field}' is required")));
                    }
                }
                FieldRule::InTable { field, table } => {
                    let value = self.value_of(field);
                    if !value.is_empty() && !context.lookup.contains(table, value)? {
                        return Ok(Some(format!("'{value}' is not a valid {field}")));
                    }
                }
            }
        }
        Ok(None)
    }
}

fn page_count_text(count: usize) -> String {
    if count == 1 {
        "1 page".to_string()
    } else {
        format!("{count} pages")
    }
}

impl AttributeSet for FieldAttributes {
    fn serialize(&self) -> Result<AttributePayload> {
        AttributePayload::to_json(self)
    }

    fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<StatusEvaluation> {
        let modified = self.is_modified() || !context.composition.in_original_form;
        let error_message = self.first_violation(context)?;
        let data_error = error_message.is_some();

        let pages = page_count_text(context.composition.pages.len());
        let summary = match self.summary_field.as_deref().map(|name| self.value_of(name)) {
            Some(value) if !value.is_empty() => format!("{value} ({pages})"),
            _ => pages,
        };

        Ok(StatusEvaluation {
            modified,
            data_error,
            error_message,
            summary,
            send_for_reprocessing: (modified && !data_error).then_some(true),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Codec for [`FieldAttributes`] payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldCodec;

impl AttributeCodec for FieldCodec {
    fn reconstruct(&self, payload: &AttributePayload) -> Result<Box<dyn AttributeSet>> {
        let attributes: FieldAttributes = payload.from_json()?;
        Ok(Box::new(attributes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemoryLookup, NoLookup};
    use crate::document::{CompositionSnapshot, DocumentId, SnapshotPage};
    use crate::page::{Orientation, PageKey};

    fn composition(pages: u32, in_original_form: bool) -> CompositionSnapshot {
        CompositionSnapshot {
            document: DocumentId(1),
            generation: 0,
            file_name: "out.pdf".to_string(),
            pages: (1..=pages)
                .map(|n| SnapshotPage {
                    key: PageKey::new("in.pdf", n),
                    orientation: Orientation::Upright,
                })
                .collect(),
            in_original_form,
        }
    }

    fn evaluate(attributes: &FieldAttributes, composition: &CompositionSnapshot) -> StatusEvaluation {
        let lookup = MemoryLookup::new().with_entries("vendors", ["Acme"]);
        let context = EvaluationContext {
            composition,
            lookup: &lookup,
        };
        attributes.evaluate(&context).unwrap()
    }

    #[test]
    fn test_unmodified_original_document() {
        let attributes = FieldAttributes::new().with_field("vendor", "Acme");
        let status = evaluate(&attributes, &composition(3, true));

        assert!(!status.modified);
        assert!(!status.data_error);
        assert_eq!(status.summary, "3 pages");
        assert_eq!(status.send_for_reprocessing, None);
    }

    #[test]
    fn test_restructured_document_is_modified() {
        let attributes = FieldAttributes::new();
        let status = evaluate(&attributes, &composition(1, false));

        assert!(status.modified);
        assert_eq!(status.summary, "1 page");
        assert_eq!(status.send_for_reprocessing, Some(true));
    }

    #[test]
    fn test_required_rule() {
        let mut attributes = FieldAttributes::new()
            .with_field("invoice", "INV-7")
            .with_rule(FieldRule::Required {
                field: "invoice".to_string(),
            });
        attributes.set("invoice", "  ").unwrap();

        let status = evaluate(&attributes, &composition(2, true));
        assert!(status.modified);
        assert!(status.data_error);
        assert_eq!(
            status.error_message.as_deref(),
            Some("Field 'invoice' is required")
        );
        assert_eq!(status.send_for_reprocessing, None);
    }

    #[test]
    fn test_in_table_rule() {
        let mut attributes = FieldAttributes::new()
            .with_field("vendor", "Acme")
            .with_rule(FieldRule::InTable {
                field: "vendor".to_string(),
                table: "vendors".to_string(),
            });
        assert!(!evaluate(&attributes, &composition(1, true)).data_error);

        attributes.set("vendor", "Initech").unwrap();
        let status = evaluate(&attributes, &composition(1, true));
        assert!(status.data_error);
        assert_eq!(
            status.error_message.as_deref(),
            Some("'Initech' is not a valid vendor")
        );
    }

    #[test]
    fn test_lookup_failure_propagates() {
        let attributes = FieldAttributes::new()
            .with_field("vendor", "Acme")
            .with_rule(FieldRule::InTable {
                field: "vendor".to_string(),
                table: "vendors".to_string(),
            });
        let snapshot = composition(1, true);
        let context = EvaluationContext {
            composition: &snapshot,
            lookup: &NoLookup,
        };
        assert!(matches!(
            attributes.evaluate(&context),
            Err(ComposeError::ValidationFailure(_))
        ));
    }

    #[test]
    fn test_summary_field() {
        let attributes = FieldAttributes::new()
            .with_field("vendor", "Acme")
            .with_summary_field("vendor");
        let status = evaluate(&attributes, &composition(2, true));
        assert_eq!(status.summary, "Acme (2 pages)");
    }

    #[test]
    fn test_set_unknown_field() {
        let mut attributes = FieldAttributes::new();
        assert!(matches!(
            attributes.set("missing", "x"),
            Err(ComposeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_revert() {
        let mut attributes = FieldAttributes::new().with_field("vendor", "Acme");
        attributes.set("vendor", "Globex").unwrap();
        assert!(attributes.is_modified());
        attributes.revert();
        assert!(!attributes.is_modified());
    }

    #[test]
    fn test_codec_reconstructs_equal_attributes() {
        let attributes = FieldAttributes::new()
            .with_field("vendor", "Acme")
            .with_rule(FieldRule::Required {
                field: "vendor".to_string(),
            })
            .with_summary_field("vendor");

        let payload = AttributeSet::serialize(&attributes).unwrap();
        let rebuilt = FieldCodec.reconstruct(&payload).unwrap();
        let rebuilt = rebuilt.as_any().downcast_ref::<FieldAttributes>().unwrap();
        assert_eq!(rebuilt, &attributes);
    }

    #[test]
    fn test_codec_rejects_garbage() {
        let payload = AttributePayload::from_bytes(b"{not json".to_vec());
        assert!(matches!(
            FieldCodec.reconstruct(&payload),
            Err(ComposeError::Payload(_))
        ));
    }
}
