//! Change notifications for documents and pages

use crate::document::DocumentId;
use crate::page::Orientation;
use crate::page_store::PageId;
use std::sync::Arc;

/// Something happened to an output document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// Status fields were published by a validation pass
    StateChanged,
    /// The page sequence changed
    PagesChanged,
    /// Output is about to start
    AboutToOutput,
    /// Output finished; the document no longer exists in the workspace
    OutputComplete,
    /// The document was discarded
    Discarded,
    /// The document was reloaded and its status reset
    Reloaded,
}

/// Something happened to a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    OrientationChanged(Orientation),
    ReferencesChanged,
    Disposed,
}

/// Observer for document events
pub trait DocumentObserver: Send + Sync {
    fn on_state_changed(&self, document: DocumentId, event: &DocumentEvent);

    /// Veto point before output. Returning `false` cancels the output.
    fn before_output(&self, _document: DocumentId) -> bool {
        true
    }
}

impl<F> DocumentObserver for F
where
    F: Fn(DocumentId, &DocumentEvent) + Send + Sync,
{
    fn on_state_changed(&self, document: DocumentId, event: &DocumentEvent) {
        self(document, event)
    }
}

/// Observer for page events
pub trait PageObserver: Send + Sync {
    fn on_page_state_changed(&self, page: PageId, event: &PageEvent);
}

impl<F> PageObserver for F
where
    F: Fn(PageId, &PageEvent) + Send + Sync,
{
    fn on_page_state_changed(&self, page: PageId, event: &PageEvent) {
        self(page, event)
    }
}

/// Registered observers
#[derive(Default, Clone)]
pub struct ObserverList {
    documents: Vec<Arc<dyn DocumentObserver>>,
    pages: Vec<Arc<dyn PageObserver>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document_observer(&mut self, observer: Arc<dyn DocumentObserver>) {
        self.documents.push(observer);
    }

    pub fn add_page_observer(&mut self, observer: Arc<dyn PageObserver>) {
        self.pages.push(observer);
    }

    pub fn notify_document(&self, document: DocumentId, event: DocumentEvent) {
        for observer in &self.documents {
            observer.on_state_changed(document, &event);
        }
    }

    pub fn notify_page(&self, page: PageId, event: PageEvent) {
        for observer in &self.pages {
            observer.on_page_state_changed(page, &event);
        }
    }

    /// Ask every observer; all must agree for output to proceed
    pub fn allow_output(&self, document: DocumentId) -> bool {
        self.documents
            .iter()
            .all(|observer| observer.before_output(document))
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("documents", &self.documents.len())
            .field("pages", &self.pages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Veto;

    impl DocumentObserver for Veto {
        fn on_state_changed(&self, _document: DocumentId, _event: &DocumentEvent) {}

        fn before_output(&self, _document: DocumentId) -> bool {
            false
        }
    }

    #[test]
    fn test_closure_observers_receive_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let mut observers = ObserverList::new();
        observers.add_document_observer(Arc::new(move |id: DocumentId, event: &DocumentEvent| {
            seen_clone.lock().unwrap().push((id, event.clone()));
        }));

        observers.notify_document(DocumentId(3), DocumentEvent::PagesChanged);
        observers.notify_document(DocumentId(3), DocumentEvent::StateChanged);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (DocumentId(3), DocumentEvent::PagesChanged),
                (DocumentId(3), DocumentEvent::StateChanged),
            ]
        );
    }

    #[test]
    fn test_allow_output() {
        let mut observers = ObserverList::new();
        observers.add_document_observer(Arc::new(|_: DocumentId, _: &DocumentEvent| {}));
        assert!(observers.allow_output(DocumentId(1)));

        observers.add_document_observer(Arc::new(Veto));
        assert!(!observers.allow_output(DocumentId(1)));
    }
}
