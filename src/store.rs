//! Storage abstraction for the pipeline.
//!
//! The [`Store`] trait defines the read/write contract the pipeline
//! needs from the (external) document and session store. Persistence
//! correctness is the store's concern; the pipeline treats every call
//! as a consistent snapshot and propagates store failures unchanged.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChatMessage, Deadline, DocumentMeta, Finding, TextChunk};

/// Abstract document/session store consumed by the pipeline.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_chunks`](Store::get_chunks) | All text chunks for a case |
/// | [`get_documents`](Store::get_documents) | Document metadata for a case |
/// | [`get_findings`](Store::get_findings) | Analysis findings for a case |
/// | [`get_norm_references`](Store::get_norm_references) | Legal norms cited in case documents |
/// | [`get_deadlines`](Store::get_deadlines) | Deadlines for a case |
/// | [`get_chat_messages`](Store::get_chat_messages) | Session history, oldest first |
/// | [`append_message`](Store::append_message) | Persist a new message |
/// | [`update_message`](Store::update_message) | Republish a message after a stage mutation |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_chunks(&self, case_id: &str) -> Result<Vec<TextChunk>>;

    async fn get_documents(&self, case_id: &str) -> Result<Vec<DocumentMeta>>;

    async fn get_findings(&self, case_id: &str) -> Result<Vec<Finding>>;

    /// Ordered, deduplicated norm references appearing in the case's
    /// source documents (e.g. `"§ 823 BGB"`).
    async fn get_norm_references(&self, case_id: &str) -> Result<Vec<String>>;

    async fn get_deadlines(&self, case_id: &str) -> Result<Vec<Deadline>>;

    async fn get_chat_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    async fn append_message(&self, message: &ChatMessage) -> Result<()>;

    /// Replace the stored message with the same id. Called after every
    /// pipeline stage so polling consumers see live progress; each
    /// republished message is monotonically more complete.
    async fn update_message(&self, message: &ChatMessage) -> Result<()>;
}

/// In-memory [`Store`] for tests and embedding hosts.
///
/// `HashMap`s behind `std::sync::RwLock`; guards are held only for the
/// duration of a copy, never across an await point.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<HashMap<String, Vec<TextChunk>>>,
    documents: RwLock<HashMap<String, Vec<DocumentMeta>>>,
    findings: RwLock<HashMap<String, Vec<Finding>>>,
    norms: RwLock<HashMap<String, Vec<String>>>,
    deadlines: RwLock<HashMap<String, Vec<Deadline>>>,
    messages: RwLock<Vec<ChatMessage>>,
    publish_log: RwLock<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_chunks(&self, case_id: &str, chunks: Vec<TextChunk>) {
        self.chunks.write().unwrap().insert(case_id.to_string(), chunks);
    }

    pub fn seed_documents(&self, case_id: &str, docs: Vec<DocumentMeta>) {
        self.documents.write().unwrap().insert(case_id.to_string(), docs);
    }

    pub fn seed_findings(&self, case_id: &str, findings: Vec<Finding>) {
        self.findings.write().unwrap().insert(case_id.to_string(), findings);
    }

    pub fn seed_norms(&self, case_id: &str, norms: Vec<String>) {
        self.norms.write().unwrap().insert(case_id.to_string(), norms);
    }

    pub fn seed_deadlines(&self, case_id: &str, deadlines: Vec<Deadline>) {
        self.deadlines.write().unwrap().insert(case_id.to_string(), deadlines);
    }

    /// Number of times a message with this id has been (re)published.
    /// Lets tests assert the publish-per-stage contract.
    pub fn publish_count(&self, message_id: &str) -> usize {
        self.publish_log
            .read()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == message_id)
            .count()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_chunks(&self, case_id: &str) -> Result<Vec<TextChunk>> {
        Ok(self.chunks.read().unwrap().get(case_id).cloned().unwrap_or_default())
    }

    async fn get_documents(&self, case_id: &str) -> Result<Vec<DocumentMeta>> {
        Ok(self.documents.read().unwrap().get(case_id).cloned().unwrap_or_default())
    }

    async fn get_findings(&self, case_id: &str) -> Result<Vec<Finding>> {
        Ok(self.findings.read().unwrap().get(case_id).cloned().unwrap_or_default())
    }

    async fn get_norm_references(&self, case_id: &str) -> Result<Vec<String>> {
        Ok(self.norms.read().unwrap().get(case_id).cloned().unwrap_or_default())
    }

    async fn get_deadlines(&self, case_id: &str) -> Result<Vec<Deadline>> {
        Ok(self.deadlines.read().unwrap().get(case_id).cloned().unwrap_or_default())
    }

    async fn get_chat_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .messages
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages.write().unwrap().push(message.clone());
        self.publish_log.write().unwrap().push(message.id.clone());
        Ok(())
    }

    async fn update_message(&self, message: &ChatMessage) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        if let Some(slot) = messages.iter_mut().find(|m| m.id == message.id) {
            *slot = message.clone();
        } else {
            messages.push(message.clone());
        }
        self.publish_log.write().unwrap().push(message.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageStatus, Role};

    #[tokio::test]
    async fn update_replaces_by_id_and_logs_publish() {
        let store = InMemoryStore::new();
        let mut message = ChatMessage::new("s1", Role::Assistant, "");
        store.append_message(&message).await.unwrap();

        message.content = "partial".to_string();
        message.status = MessageStatus::Streaming;
        store.update_message(&message).await.unwrap();
        message.content = "partial and then complete".to_string();
        message.status = MessageStatus::Complete;
        store.update_message(&message).await.unwrap();

        let stored = store.get_chat_messages("s1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "partial and then complete");
        assert_eq!(store.publish_count(&message.id), 3);
    }
}
