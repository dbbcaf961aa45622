//! Integration tests for page composition and output

use pagebinder::output::OutputManifest;
use pagebinder::page::Thumbnail;
use pagebinder::{
    ComposeError, DocumentEvent, DocumentId, DocumentObserver, ManifestSink, Orientation,
    OwnerId, PageEvent, PageId, Release, Workspace,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type DocumentLog = Arc<Mutex<Vec<(DocumentId, DocumentEvent)>>>;
type PageLog = Arc<Mutex<Vec<(PageId, PageEvent)>>>;

fn observe(workspace: &mut Workspace) -> (DocumentLog, PageLog) {
    let documents = DocumentLog::default();
    let pages = PageLog::default();

    let log = Arc::clone(&documents);
    workspace.add_document_observer(Arc::new(move |id: DocumentId, event: &DocumentEvent| {
        log.lock().unwrap().push((id, event.clone()));
    }));
    let log = Arc::clone(&pages);
    workspace.add_page_observer(Arc::new(move |id: PageId, event: &PageEvent| {
        log.lock().unwrap().push((id, event.clone()));
    }));

    (documents, pages)
}

struct Veto;

impl DocumentObserver for Veto {
    fn on_state_changed(&self, _document: DocumentId, _event: &DocumentEvent) {}

    fn before_output(&self, _document: DocumentId) -> bool {
        false
    }
}

#[test]
fn test_reorder_keeps_back_references() {
    let mut workspace = Workspace::default();
    let doc = workspace.open_source("scan.pdf", 3).unwrap();
    let pages = workspace.document(doc).unwrap().pages().to_vec();

    workspace.move_page(doc, pages[1], 1).unwrap();

    let document = workspace.document(doc).unwrap();
    assert_eq!(document.pages(), &[pages[1], pages[0], pages[2]]);
    assert!(!document.in_original_form());
    assert!(document.structure_changed());
    for page in document.pages() {
        assert!(workspace
            .page(*page)
            .unwrap()
            .is_referenced_by(OwnerId::Document(doc)));
    }
}

#[test]
fn test_original_form_is_never_rederived() {
    let mut workspace = Workspace::default();
    let doc = workspace.open_source("scan.pdf", 3).unwrap();
    let pages = workspace.document(doc).unwrap().pages().to_vec();

    workspace.move_page(doc, pages[2], 1).unwrap();
    workspace.move_page(doc, pages[2], 3).unwrap();

    let document = workspace.document(doc).unwrap();
    assert_eq!(document.pages(), pages.as_slice());
    assert!(!document.in_original_form());
}

#[test]
fn test_invalid_positions() {
    let mut workspace = Workspace::default();
    let doc = workspace.open_source("a.pdf", 2).unwrap();
    let other = workspace.open_source("b.pdf", 1).unwrap();
    let page = workspace.document(other).unwrap().pages()[0];
    let own = workspace.document(doc).unwrap().pages()[0];

    assert!(matches!(
        workspace.insert_page(doc, page, 0),
        Err(ComposeError::InvalidArgument(_))
    ));
    assert!(matches!(
        workspace.insert_page(doc, page, 4),
        Err(ComposeError::InvalidArgument(_))
    ));
    assert!(matches!(
        workspace.move_page(doc, own, 3),
        Err(ComposeError::InvalidArgument(_))
    ));
    assert!(matches!(
        workspace.remove_page(doc, page),
        Err(ComposeError::InvalidArgument(_))
    ));

    // Failed operations change nothing
    assert_eq!(workspace.document(doc).unwrap().page_count(), 2);
    assert!(workspace.document(doc).unwrap().in_original_form());
    assert!(!workspace.page(page).unwrap().is_referenced_by(OwnerId::Document(doc)));
}

#[test]
fn test_page_disposed_when_last_reference_goes() {
    let mut workspace = Workspace::default();
    let doc = workspace.open_source("scan.pdf", 2).unwrap();
    let (_, page_events) = observe(&mut workspace);
    let page = workspace.document(doc).unwrap().pages()[0];

    workspace.close_source("scan.pdf").unwrap();
    assert!(!workspace.pages().is_disposed(page));

    assert_eq!(workspace.remove_page(doc, page).unwrap(), Release::Disposed);
    assert!(workspace.pages().is_disposed(page));
    assert!(workspace.page(page).is_none());
    assert!(matches!(
        workspace.rotate_page(page, Orientation::Clockwise90),
        Err(ComposeError::PageDisposed(_))
    ));
    assert!(page_events
        .lock()
        .unwrap()
        .contains(&(page, PageEvent::Disposed)));
}

#[test]
fn test_rotation_events() {
    let mut workspace = Workspace::default();
    let doc = workspace.open_source("scan.pdf", 1).unwrap();
    let (_, page_events) = observe(&mut workspace);
    let page = workspace.document(doc).unwrap().pages()[0];

    workspace.rotate_page(page, Orientation::Rotate180).unwrap();
    workspace.rotate_page(page, Orientation::Clockwise90).unwrap();
    assert_eq!(
        workspace.page(page).unwrap().orientation(),
        Orientation::Clockwise270
    );
    assert_eq!(
        *page_events.lock().unwrap(),
        vec![
            (page, PageEvent::OrientationChanged(Orientation::Rotate180)),
            (page, PageEvent::OrientationChanged(Orientation::Clockwise270)),
        ]
    );
}

#[test]
fn test_thumbnail_follows_quarter_turns() {
    let mut page = pagebinder::Page::new(pagebinder::PageKey::new("scan.pdf", 1));
    page.set_thumbnail(Thumbnail {
        width: 80,
        height: 120,
    });

    assert!(page.set_orientation(Orientation::Clockwise90));
    assert_eq!(
        page.thumbnail(),
        Some(Thumbnail {
            width: 120,
            height: 80
        })
    );
    assert!(!page.set_orientation(Orientation::Clockwise90));
    assert!(page.set_orientation(Orientation::Clockwise270));
    assert_eq!(page.thumbnail().unwrap().width, 120);
}

#[test]
fn test_multiple_copies_across_documents() {
    let mut workspace = Workspace::default();
    let first = workspace.open_source("a.pdf", 2).unwrap();
    let second = workspace.split_document(first, 2).unwrap();
    let page = workspace.document(first).unwrap().pages()[0];

    workspace.duplicate_page(page, second, 1).unwrap();
    assert!(workspace.multiple_copies_exist(page));
    assert_eq!(workspace.documents_containing(page), vec![first, second]);

    workspace.remove_page(second, page).unwrap();
    assert!(!workspace.multiple_copies_exist(page));
}

#[test]
fn test_output_writes_manifest_and_releases_pages() {
    let temp_dir = TempDir::new().unwrap();
    let sink = ManifestSink::new(temp_dir.path().join("out"));

    let mut workspace = Workspace::default();
    let doc = workspace.open_source("scan.pdf", 2).unwrap();
    let (document_events, _) = observe(&mut workspace);
    let pages = workspace.document(doc).unwrap().pages().to_vec();
    workspace.close_source("scan.pdf").unwrap();

    let path = workspace.output_document(doc, &sink).unwrap();
    assert_eq!(path, temp_dir.path().join("out").join("scan.pdf.json"));

    let manifest: OutputManifest =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(manifest.file_name, "scan.pdf");
    assert!(manifest.fast_copy);
    assert_eq!(manifest.pages.len(), 2);

    assert!(!workspace.contains_document(doc));
    for page in pages {
        assert!(workspace.pages().is_disposed(page));
    }
    assert_eq!(
        *document_events.lock().unwrap(),
        vec![
            (doc, DocumentEvent::AboutToOutput),
            (doc, DocumentEvent::OutputComplete)
        ]
    );
}

#[test]
fn test_output_veto() {
    let temp_dir = TempDir::new().unwrap();
    let sink = ManifestSink::new(temp_dir.path());

    let mut workspace = Workspace::default();
    let doc = workspace.open_source("scan.pdf", 1).unwrap();
    workspace.add_document_observer(Arc::new(Veto));

    assert!(matches!(
        workspace.output_document(doc, &sink),
        Err(ComposeError::OutputCancelled)
    ));
    assert!(workspace.contains_document(doc));
    assert!(fs::read_dir(temp_dir.path()).unwrap().next().is_none());
}

#[test]
fn test_output_io_failure_leaves_document_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("not-a-dir");
    fs::write(&blocker, b"file").unwrap();
    let sink = ManifestSink::new(&blocker);

    let mut workspace = Workspace::default();
    let doc = workspace.open_source("scan.pdf", 3).unwrap();
    let pages = workspace.document(doc).unwrap().pages().to_vec();

    assert!(matches!(
        workspace.output_document(doc, &sink),
        Err(ComposeError::Io(_))
    ));
    let document = workspace.document(doc).unwrap();
    assert_eq!(document.pages(), pages.as_slice());
    assert!(document.in_original_form());
}

#[test]
fn test_merge_emits_events() {
    let mut workspace = Workspace::default();
    let first = workspace.open_source("a.pdf", 1).unwrap();
    let second = workspace.open_source("b.pdf", 2).unwrap();
    let (document_events, _) = observe(&mut workspace);

    workspace.merge_documents(first, second).unwrap();
    assert_eq!(workspace.document(first).unwrap().page_count(), 3);
    assert_eq!(
        *document_events.lock().unwrap(),
        vec![
            (first, DocumentEvent::PagesChanged),
            (second, DocumentEvent::Discarded)
        ]
    );
    assert!(matches!(
        workspace.merge_documents(first, second),
        Err(ComposeError::UnknownDocument(_))
    ));
}
