//! In-process fakes for the collaborator ports, used across module
//! tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use crate::{
    domain::{ChatId, MappingId, MessageId, SeenMessage, TrackedMessage},
    ports::{
        DeletionNotifier, FetchOutcome, MarkOutcome, MessageLedger, UpstreamClient, UpstreamEvent,
    },
    Error, Result,
};

#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<HashMap<i32, TrackedMessage>>,
    fail_marks: AtomicU32,
    fail_records: AtomicU32,
}

impl MemoryLedger {
    /// Make the next `n` `mark_deleted` calls fail with a storage error.
    pub fn fail_next_marks(&self, n: u32) {
        self.fail_marks.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` `record_seen` calls fail with a storage error.
    pub fn fail_next_records(&self, n: u32) {
        self.fail_records.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageLedger for MemoryLedger {
    async fn record_seen(&self, msg: &SeenMessage) -> Result<()> {
        let remaining = self.fail_records.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_records.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Storage("simulated outage".to_string()));
        }

        let mut rows = self.rows.lock().await;
        rows.entry(msg.message_id.0).or_insert_with(|| TrackedMessage {
            message_id: msg.message_id,
            chat_id: msg.chat_id,
            mapping_id: None,
            preview: msg.preview.clone(),
            is_deleted: false,
            created_at: Utc::now(),
            deleted_at: None,
        });
        Ok(())
    }

    async fn attach_mapping(&self, id: MessageId, mapping: &MappingId) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.get_mut(&id.0) {
            if row.mapping_id.is_none() {
                row.mapping_id = Some(mapping.clone());
            }
        }
        Ok(())
    }

    async fn mark_deleted(&self, id: MessageId) -> Result<MarkOutcome> {
        let remaining = self.fail_marks.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_marks.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Storage("simulated outage".to_string()));
        }

        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&id.0) else {
            return Ok(MarkOutcome::NotTracked);
        };
        if row.is_deleted {
            return Ok(MarkOutcome::AlreadyDeleted);
        }
        row.is_deleted = true;
        row.deleted_at = Some(Utc::now());
        Ok(MarkOutcome::Marked {
            mapping_id: row.mapping_id.clone(),
        })
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<TrackedMessage>> {
        Ok(self.rows.lock().await.get(&id.0).cloned())
    }

    async fn find_by_mapping(&self, mapping: &MappingId) -> Result<Option<TrackedMessage>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .find(|r| r.mapping_id.as_ref() == Some(mapping))
            .cloned())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(i32, String)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<(i32, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl DeletionNotifier for RecordingNotifier {
    async fn notify(&self, message_id: MessageId, mapping_id: &MappingId) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::NotifyFailed("simulated webhook failure".to_string()));
        }
        self.calls
            .lock()
            .await
            .push((message_id.0, mapping_id.0.clone()));
        Ok(())
    }
}

/// Scripted fetch behavior for one message id.
#[derive(Clone, Copy, Debug)]
pub enum FetchScript {
    Present,
    Missing,
    Transient,
    Auth,
}

#[derive(Default)]
pub struct ScriptedUpstream {
    scripts: Mutex<HashMap<i32, VecDeque<FetchScript>>>,
    events: Mutex<Vec<UpstreamEvent>>,
}

impl ScriptedUpstream {
    pub async fn script(&self, id: i32, steps: &[FetchScript]) {
        self.scripts
            .lock()
            .await
            .insert(id, steps.iter().copied().collect());
    }

    pub async fn push_event(&self, ev: UpstreamEvent) {
        self.events.lock().await.push(ev);
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn listen(&self, tx: mpsc::Sender<UpstreamEvent>) -> Result<()> {
        let events = std::mem::take(&mut *self.events.lock().await);
        for ev in events {
            if tx.send(ev).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn fetch_message(&self, _chat_id: ChatId, id: MessageId) -> Result<FetchOutcome> {
        let step = {
            let mut scripts = self.scripts.lock().await;
            scripts.get_mut(&id.0).and_then(|q| q.pop_front())
        };
        match step.unwrap_or(FetchScript::Present) {
            FetchScript::Present => Ok(FetchOutcome::Present),
            FetchScript::Missing => Ok(FetchOutcome::Missing),
            FetchScript::Transient => {
                Err(Error::UpstreamTransient("simulated network error".to_string()))
            }
            FetchScript::Auth => Err(Error::UpstreamAuth("simulated auth failure".to_string())),
        }
    }
}
