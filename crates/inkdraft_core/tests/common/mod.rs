//! Shared test collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use inkdraft_core::{
    BackendError, BackendResult, ContentBackend, ContentBlock, ContentRefiner, Document,
    DocumentBody, RefinementKind, RefinementProposal, SaveReceipt,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

pub fn paragraph_body(texts: &[&str]) -> DocumentBody {
    DocumentBody::new(
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| ContentBlock::paragraph(format!("p{index}"), *text))
            .collect(),
    )
}

pub fn document(id: &str, texts: &[&str]) -> Document {
    Document::new(id, format!("Post {id}"), paragraph_body(texts))
}

#[derive(Default)]
struct BackendState {
    documents: HashMap<String, Document>,
    load_delays: HashMap<String, Duration>,
    save_delay: Option<Duration>,
    sync_delay: Option<Duration>,
    save_failures: VecDeque<BackendError>,
    sync_failures: VecDeque<BackendError>,
    reject_saves: bool,
    saved: Vec<(String, DocumentBody)>,
    synced: Vec<(String, DocumentBody)>,
    next_version: u64,
}

/// In-memory content backend with scripted failures and delays.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let backend = Self::default();
        for document in documents {
            backend.insert(document);
        }
        backend
    }

    pub fn insert(&self, document: Document) {
        self.state
            .lock()
            .documents
            .insert(document.id.clone(), document);
    }

    pub fn delay_load(&self, id: &str, delay: Duration) {
        self.state.lock().load_delays.insert(id.to_string(), delay);
    }

    pub fn delay_save(&self, delay: Duration) {
        self.state.lock().save_delay = Some(delay);
    }

    pub fn delay_sync(&self, delay: Duration) {
        self.state.lock().sync_delay = Some(delay);
    }

    pub fn fail_next_save(&self, err: BackendError) {
        self.state.lock().save_failures.push_back(err);
    }

    pub fn fail_next_sync(&self, err: BackendError) {
        self.state.lock().sync_failures.push_back(err);
    }

    pub fn reject_saves(&self) {
        self.state.lock().reject_saves = true;
    }

    pub fn saved(&self) -> Vec<(String, DocumentBody)> {
        self.state.lock().saved.clone()
    }

    pub fn synced(&self) -> Vec<(String, DocumentBody)> {
        self.state.lock().synced.clone()
    }

    pub fn stored_body(&self, id: &str) -> Option<DocumentBody> {
        self.state
            .lock()
            .documents
            .get(id)
            .map(|document| document.body.clone())
    }
}

#[async_trait]
impl ContentBackend for MockBackend {
    async fn get_document(&self, id: &str) -> BackendResult<Document> {
        let delay = self.state.lock().load_delays.get(id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn save_document(&self, id: &str, body: &DocumentBody) -> BackendResult<SaveReceipt> {
        let delay = self.state.lock().save_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        if let Some(err) = state.save_failures.pop_front() {
            return Err(err);
        }
        if state.reject_saves {
            return Ok(SaveReceipt {
                ok: false,
                version: 0,
            });
        }
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        document.body = body.clone();
        state.saved.push((id.to_string(), body.clone()));
        state.next_version += 1;
        Ok(SaveReceipt {
            ok: true,
            version: state.next_version,
        })
    }

    async fn sync_rollback(&self, id: &str, body: &DocumentBody) -> BackendResult<()> {
        let delay = self.state.lock().sync_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        if let Some(err) = state.sync_failures.pop_front() {
            return Err(err);
        }
        if let Some(document) = state.documents.get_mut(id) {
            document.body = body.clone();
        }
        state.synced.push((id.to_string(), body.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineCall {
    pub document_id: String,
    pub prompt: String,
    pub kind: RefinementKind,
}

#[derive(Default)]
struct RefinerState {
    scripted: VecDeque<BackendResult<RefinementProposal>>,
    delay: Option<Duration>,
    calls: Vec<RefineCall>,
}

/// Refiner that replays scripted results, then appends the prompt as a
/// new paragraph.
#[derive(Default)]
pub struct MockRefiner {
    state: Mutex<RefinerState>,
}

impl MockRefiner {
    pub fn push_result(&self, result: BackendResult<RefinementProposal>) {
        self.state.lock().scripted.push_back(result);
    }

    pub fn push_error(&self, err: BackendError) {
        self.push_result(Err(err));
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<RefineCall> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl ContentRefiner for MockRefiner {
    async fn refine(
        &self,
        id: &str,
        prompt: &str,
        kind: RefinementKind,
    ) -> BackendResult<RefinementProposal> {
        let (scripted, delay) = {
            let mut state = self.state.lock();
            state.calls.push(RefineCall {
                document_id: id.to_string(),
                prompt: prompt.to_string(),
                kind,
            });
            (state.scripted.pop_front(), state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        scripted.unwrap_or_else(|| {
            Ok(RefinementProposal {
                updated_body: paragraph_body(&[prompt]),
                message: format!("Applied {kind}."),
            })
        })
    }
}
