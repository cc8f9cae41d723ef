//! Dedup-aware document persistence.

use chrono::Utc;
use seine_types::{CrawlError, CrawlEvent, DocumentDraft, DocumentStore, EventSink, StoredDocument};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Saves extracted content keyed by source URL.
///
/// A draft whose source id already exists updates the stored document in
/// place; only genuinely new documents produce a `document_saved` event.
pub struct DocumentPersister {
    store: Arc<dyn DocumentStore>,
    events: Arc<dyn EventSink>,
}

impl DocumentPersister {
    pub fn new(store: Arc<dyn DocumentStore>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    /// Persist a draft. Returns whether a new document was created.
    pub async fn persist(&self, draft: DocumentDraft) -> Result<bool, CrawlError> {
        let existing = self
            .store
            .get_document_by_source(draft.source_type, &draft.source_id)
            .await?;
        let now = Utc::now();

        match existing {
            Some(current) => {
                let updated = StoredDocument {
                    id: current.id,
                    job_id: draft.job_id,
                    parent_job_id: draft.parent_job_id,
                    source_type: draft.source_type,
                    source_id: draft.source_id,
                    title: draft.title,
                    markdown: draft.markdown,
                    detail: draft.detail,
                    meta: draft.meta,
                    created_at: current.created_at,
                    updated_at: now,
                };
                self.store.update_document(&updated).await?;
                debug!(document_id = %current.id, source_id = %updated.source_id, "document updated");
                Ok(false)
            }
            None => {
                let document = StoredDocument {
                    id: Uuid::new_v4(),
                    job_id: draft.job_id,
                    parent_job_id: draft.parent_job_id,
                    source_type: draft.source_type,
                    source_id: draft.source_id,
                    title: draft.title,
                    markdown: draft.markdown,
                    detail: draft.detail,
                    meta: draft.meta,
                    created_at: now,
                    updated_at: now,
                };
                self.store.save_document(&document).await?;
                self.events
                    .publish(CrawlEvent::DocumentSaved {
                        job_id: document.job_id,
                        document_id: document.id,
                        source_id: document.source_id.clone(),
                        saved_at: now,
                    })
                    .await?;
                debug!(document_id = %document.id, source_id = %document.source_id, "document saved");
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BroadcastEventBus, InMemoryDocumentStore};
    use seine_types::{DetailLevel, EventSink as _, SourceKind};

    fn draft(source_id: &str, markdown: &str) -> DocumentDraft {
        DocumentDraft {
            job_id: Uuid::new_v4(),
            parent_job_id: None,
            source_type: SourceKind::Web,
            source_id: source_id.into(),
            title: "T".into(),
            markdown: markdown.into(),
            detail: DetailLevel::Full,
            meta: Default::default(),
        }
    }

    #[tokio::test]
    async fn first_save_is_new_and_emits_event() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let bus = Arc::new(BroadcastEventBus::default());
        let mut receiver = bus.subscribe();
        let persister = DocumentPersister::new(store.clone(), bus);

        let created = persister.persist(draft("https://a/x", "one")).await.unwrap();
        assert!(created);
        assert_eq!(store.len(), 1);
        assert_eq!(receiver.recv().await.unwrap().event_type(), "document_saved");
    }

    #[tokio::test]
    async fn second_save_updates_without_event() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let bus = Arc::new(BroadcastEventBus::default());
        let persister = DocumentPersister::new(store.clone(), bus.clone());

        persister.persist(draft("https://a/x", "one")).await.unwrap();
        let mut receiver = bus.subscribe();
        let created = persister.persist(draft("https://a/x", "two")).await.unwrap();
        assert!(!created);
        assert_eq!(store.len(), 1);

        let stored = store
            .get_document_by_source(SourceKind::Web, "https://a/x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.markdown, "two");
        assert!(receiver.try_recv().is_err(), "update must not emit document_saved");
    }
}
