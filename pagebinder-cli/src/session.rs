//! Session files: sources to open, field setup and operations to replay

use anyhow::{anyhow, bail, Context, Result};
use pagebinder::data::{FieldAttributes, FieldRule, MemoryLookup};
use pagebinder::{DocumentData, DocumentId, Orientation, PageId, Workspace};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One source file to open
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSource {
    pub name: String,
    pub pages: u32,
    /// Field values for this source's document, overriding the defaults
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Rules added to the default rules for this source's document
    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

/// A page addressed by source name and 1-based page number
#[derive(Debug, Clone, Deserialize)]
pub struct PageRef {
    pub source: String,
    pub page: u32,
}

/// Composition step, documents addressed by file name
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Move {
        document: String,
        page: PageRef,
        position: usize,
    },
    Split {
        document: String,
        at: usize,
    },
    Merge {
        target: String,
        source: String,
    },
    Rotate {
        page: PageRef,
        degrees: i32,
    },
    Delete {
        page: PageRef,
    },
    Duplicate {
        page: PageRef,
        document: String,
        position: usize,
    },
    SetField {
        document: String,
        field: String,
        value: String,
    },
    Discard {
        document: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Session {
    pub sources: Vec<SessionSource>,
    /// Fields every document starts with
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Rules every document is checked against
    #[serde(default)]
    pub rules: Vec<FieldRule>,
    #[serde(default)]
    pub summary_field: Option<String>,
    /// Lookup tables for `in_table` rules
    #[serde(default)]
    pub lookup: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl Session {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid session file {}", path.display()))
    }

    /// Attribute set for a new document called `file_name`
    pub fn attributes_for(&self, file_name: &str) -> FieldAttributes {
        let source = self.sources.iter().find(|s| s.name == file_name);

        let mut values = self.fields.clone();
        if let Some(source) = source {
            values.extend(source.fields.clone());
        }

        let mut attributes = values
            .into_iter()
            .fold(FieldAttributes::new(), |attributes, (name, value)| {
                attributes.with_field(name, value)
            });
        let source_rules = source.map(|s| s.rules.as_slice()).unwrap_or_default();
        for rule in self.rules.iter().chain(source_rules) {
            attributes = attributes.with_rule(rule.clone());
        }
        if let Some(summary_field) = &self.summary_field {
            attributes = attributes.with_summary_field(summary_field.clone());
        }
        attributes
    }

    pub fn lookup(&self) -> MemoryLookup {
        self.lookup
            .iter()
            .fold(MemoryLookup::new(), |lookup, (table, entries)| {
                lookup.with_entries(table.clone(), entries.iter().cloned())
            })
    }

    /// Workspace whose documents get this session's fields
    pub fn workspace(&self) -> Workspace {
        let session = self.clone();
        Workspace::new(move |file_name| {
            DocumentData::new(Box::new(session.attributes_for(file_name)))
        })
    }

    /// Open every source
    pub fn open_sources(&self, workspace: &mut Workspace) -> Result<Vec<DocumentId>> {
        self.sources
            .iter()
            .map(|source| {
                workspace
                    .open_source(&source.name, source.pages)
                    .with_context(|| format!("Failed to open source '{}'", source.name))
            })
            .collect()
    }
}

/// Find a document by file name
pub fn find_document(workspace: &Workspace, file_name: &str) -> Result<DocumentId> {
    workspace
        .documents()
        .find(|doc| doc.file_name() == file_name)
        .map(|doc| doc.id())
        .ok_or_else(|| anyhow!("No document named '{file_name}'"))
}

fn resolve_page(workspace: &Workspace, page: &PageRef) -> Result<PageId> {
    let pages = workspace
        .source_pages(&page.source)
        .ok_or_else(|| anyhow!("Source '{}' is not open", page.source))?;
    if page.page == 0 {
        bail!("Page numbers start at 1");
    }
    pages
        .get(page.page as usize - 1)
        .copied()
        .ok_or_else(|| anyhow!("Source '{}' has no page {}", page.source, page.page))
}

/// Apply one operation; returns the documents whose status should be revalidated
pub fn apply(workspace: &mut Workspace, operation: &Operation) -> Result<Vec<DocumentId>> {
    let touched = match operation {
        Operation::Move {
            document,
            page,
            position,
        } => {
            let doc = find_document(workspace, document)?;
            let page = resolve_page(workspace, page)?;
            workspace.move_page(doc, page, *position)?;
            vec![doc]
        }
        Operation::Split { document, at } => {
            let doc = find_document(workspace, document)?;
            let split = workspace.split_document(doc, *at)?;
            vec![doc, split]
        }
        Operation::Merge { target, source } => {
            let target = find_document(workspace, target)?;
            let source = find_document(workspace, source)?;
            workspace.merge_documents(target, source)?;
            vec![target]
        }
        Operation::Rotate { page, degrees } => {
            let page = resolve_page(workspace, page)?;
            workspace.rotate_page(page, Orientation::from_degrees(*degrees)?)?;
            workspace.documents_containing(page)
        }
        Operation::Delete { page } => {
            let page = resolve_page(workspace, page)?;
            workspace.delete_page(page)?
        }
        Operation::Duplicate {
            page,
            document,
            position,
        } => {
            let doc = find_document(workspace, document)?;
            let page = resolve_page(workspace, page)?;
            workspace.duplicate_page(page, doc, *position)?;
            vec![doc]
        }
        Operation::SetField {
            document,
            field,
            value,
        } => {
            let doc = find_document(workspace, document)?;
            let attributes = workspace
                .document_mut(doc)
                .and_then(|d| d.edit_data().attributes_as_mut::<FieldAttributes>())
                .ok_or_else(|| anyhow!("Document '{document}' has no editable fields"))?;
            attributes.set(field, value.clone())?;
            vec![doc]
        }
        Operation::Discard { document } => {
            let doc = find_document(workspace, document)?;
            workspace.discard_document(doc)?;
            Vec::new()
        }
    };

    Ok(touched
        .into_iter()
        .filter(|doc| workspace.contains_document(*doc))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SESSION: &str = r#"{
        "sources": [
            { "name": "scan.pdf", "pages": 4, "fields": { "vendor": "Acme" } }
        ],
        "fields": { "vendor": "", "total": "0" },
        "rules": [ { "rule": "required", "field": "vendor" } ],
        "summary_field": "vendor",
        "lookup": { "vendors": ["Acme"] },
        "operations": [
            { "op": "split", "document": "scan.pdf", "at": 3 },
            { "op": "rotate", "page": { "source": "scan.pdf", "page": 1 }, "degrees": -90 },
            { "op": "set_field", "document": "scan-2.pdf", "field": "vendor", "value": "Globex" }
        ]
    }"#;

    #[test]
    fn test_parse_session() {
        let session: Session = serde_json::from_str(SESSION).unwrap();
        assert_eq!(session.sources.len(), 1);
        assert_eq!(session.operations.len(), 3);
        assert!(matches!(
            session.operations[0],
            Operation::Split { at: 3, .. }
        ));
    }

    #[test]
    fn test_attributes_merge_defaults() {
        let session: Session = serde_json::from_str(SESSION).unwrap();

        let source = session.attributes_for("scan.pdf");
        assert_eq!(source.get("vendor"), Some("Acme"));
        assert_eq!(source.get("total"), Some("0"));
        assert_eq!(source.rules().len(), 1);

        let split = session.attributes_for("scan-2.pdf");
        assert_eq!(split.get("vendor"), Some(""));
    }

    #[test]
    fn test_apply_operations() {
        let session: Session = serde_json::from_str(SESSION).unwrap();
        let mut workspace = session.workspace();
        session.open_sources(&mut workspace).unwrap();

        let touched: Vec<_> = session
            .operations
            .iter()
            .map(|op| apply(&mut workspace, op).unwrap())
            .collect();

        let scan = find_document(&workspace, "scan.pdf").unwrap();
        let split = find_document(&workspace, "scan-2.pdf").unwrap();
        assert_eq!(touched[0], vec![scan, split]);
        assert_eq!(touched[1], vec![scan]);
        assert_eq!(touched[2], vec![split]);

        let fields = workspace
            .document(split)
            .unwrap()
            .data()
            .attributes_as::<FieldAttributes>()
            .unwrap();
        assert_eq!(fields.get("vendor"), Some("Globex"));
        assert_eq!(workspace.document(scan).unwrap().page_count(), 2);
    }

    #[test]
    fn test_unknown_references() {
        let session: Session = serde_json::from_str(SESSION).unwrap();
        let mut workspace = session.workspace();
        session.open_sources(&mut workspace).unwrap();

        let missing_doc = Operation::Discard {
            document: "nope.pdf".to_string(),
        };
        assert!(apply(&mut workspace, &missing_doc).is_err());

        let missing_page = Operation::Delete {
            page: PageRef {
                source: "scan.pdf".to_string(),
                page: 9,
            },
        };
        assert!(apply(&mut workspace, &missing_page).is_err());
    }
}
