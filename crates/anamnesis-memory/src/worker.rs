// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background worker that persists completed turns and feeds consolidation.
//!
//! The chat path hands a finished turn to [`MemoryWorker::submit`] and
//! moves on; a single spawned task drains the queue. The worker runs on
//! its own storage connection and never shares a transactional context
//! with a request path. Nothing it does is reported back to the
//! submitter, so a slow oracle or a flaky embedding server can never
//! stall a chat response.

use std::sync::Arc;
use std::time::Duration;

use anamnesis_config::model::WorkerConfig;
use anamnesis_core::types::{ChatRole, Conversation, EmbeddingInput, MessageRecord};
use anamnesis_core::{EmbeddingAdapter, StorageAdapter};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consolidator::Consolidator;
use crate::types::{message_projection, AssistantReply};

/// One completed conversation turn, queued for persistence and extraction.
#[derive(Debug, Clone)]
pub struct TurnJob {
    pub user_id: String,
    pub conversation_id: String,
    pub user_message: String,
    pub assistant_reply: AssistantReply,
}

/// Cheap cloneable handle for submitting turns to the worker task.
#[derive(Clone)]
pub struct MemoryWorker {
    tx: mpsc::Sender<TurnJob>,
}

impl MemoryWorker {
    /// Spawns the worker task and returns a submission handle plus the
    /// task's join handle.
    ///
    /// `store` must be the worker's own adapter instance; request paths
    /// keep their own. When `consolidator` is `None` turns are stored
    /// but no extraction occurs.
    pub fn spawn(
        config: &WorkerConfig,
        store: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn EmbeddingAdapter>,
        consolidator: Option<Arc<Consolidator>>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let grace = Duration::from_secs(config.shutdown_grace_secs);
        let handle = tokio::spawn(run_worker(rx, store, embedder, consolidator, cancel, grace));
        (Self { tx }, handle)
    }

    /// Queues a turn without blocking. A full queue drops the turn; the
    /// chat path never waits on memory.
    pub fn submit(&self, job: TurnJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                warn!(user_id = %job.user_id, "memory queue full, dropping turn");
            }
            Err(TrySendError::Closed(job)) => {
                warn!(user_id = %job.user_id, "memory worker stopped, dropping turn");
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<TurnJob>,
    store: Arc<dyn StorageAdapter>,
    embedder: Arc<dyn EmbeddingAdapter>,
    consolidator: Option<Arc<Consolidator>>,
    cancel: CancellationToken,
    grace: Duration,
) {
    info!("memory worker running");

    loop {
        tokio::select! {
            job = rx.recv() => {
                match job {
                    Some(job) => {
                        process_turn(&store, &embedder, consolidator.as_deref(), job).await;
                    }
                    None => break,
                }
            }
            _ = cancel.cancelled() => {
                info!("shutdown signal received, draining memory queue");
                drain(&mut rx, &store, &embedder, consolidator.as_deref(), grace).await;
                break;
            }
        }
    }

    if let Err(e) = store.close().await {
        warn!("Failed to close worker storage: {e}");
    }
    info!("memory worker stopped");
}

/// Processes already-queued jobs until the queue is empty or the grace
/// period runs out. A job is never interrupted once started; the
/// deadline is only checked between jobs.
async fn drain(
    rx: &mut mpsc::Receiver<TurnJob>,
    store: &Arc<dyn StorageAdapter>,
    embedder: &Arc<dyn EmbeddingAdapter>,
    consolidator: Option<&Consolidator>,
    grace: Duration,
) {
    rx.close();
    let deadline = Instant::now() + grace;
    let mut drained = 0;

    while let Ok(job) = rx.try_recv() {
        if Instant::now() >= deadline {
            let mut remaining = 1;
            while rx.try_recv().is_ok() {
                remaining += 1;
            }
            warn!(drained, remaining, "grace period elapsed, dropping queued turns");
            return;
        }
        process_turn(store, embedder, consolidator, job).await;
        drained += 1;
    }

    if drained > 0 {
        info!(count = drained, "queued turns drained");
    }
}

/// Persists both sides of the turn, then runs consolidation.
///
/// Each step is best-effort: a failed insert or embedding is logged
/// and the remaining steps still run.
async fn process_turn(
    store: &Arc<dyn StorageAdapter>,
    embedder: &Arc<dyn EmbeddingAdapter>,
    consolidator: Option<&Consolidator>,
    job: TurnJob,
) {
    debug!(
        user_id = %job.user_id,
        conversation_id = %job.conversation_id,
        "processing turn"
    );

    ensure_conversation(store, &job).await;

    let mut user_message = MessageRecord::new(
        job.conversation_id.clone(),
        ChatRole::User,
        job.user_message.clone(),
    );
    user_message.embedding = embed_message(embedder, &user_message).await;
    if let Err(e) = store.insert_message(&user_message).await {
        warn!(user_id = %job.user_id, "Failed to persist user message: {e}");
    }

    let mut assistant_message = MessageRecord::new(
        job.conversation_id.clone(),
        ChatRole::Assistant,
        job.assistant_reply.content.clone(),
    );
    assistant_message.citations = job.assistant_reply.citations.clone();
    assistant_message.search_results = job.assistant_reply.search_results.clone();
    assistant_message.model = job.assistant_reply.model.clone();
    assistant_message.embedding = embed_message(embedder, &assistant_message).await;
    if let Err(e) = store.insert_message(&assistant_message).await {
        warn!(user_id = %job.user_id, "Failed to persist assistant message: {e}");
    }

    if let Some(consolidator) = consolidator {
        let created = consolidator
            .consolidate(
                &job.user_id,
                &job.conversation_id,
                &job.user_message,
                &job.assistant_reply.content,
            )
            .await;
        if created > 0 {
            debug!(user_id = %job.user_id, created, "turn produced new entities");
        }
    }
}

/// Creates the conversation row when the turn references a new id.
async fn ensure_conversation(store: &Arc<dyn StorageAdapter>, job: &TurnJob) {
    match store.get_conversation(&job.conversation_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            let mut conversation = Conversation::new(job.user_id.clone(), "");
            conversation.id = job.conversation_id.clone();
            if let Err(e) = store.create_conversation(&conversation).await {
                warn!(
                    conversation_id = %job.conversation_id,
                    "Failed to create conversation: {e}"
                );
            }
        }
        Err(e) => {
            warn!(
                conversation_id = %job.conversation_id,
                "Conversation lookup failed: {e}"
            );
        }
    }
}

async fn embed_message(
    embedder: &Arc<dyn EmbeddingAdapter>,
    message: &MessageRecord,
) -> Option<Vec<f32>> {
    let text = message_projection(message);
    match embedder.embed(EmbeddingInput { texts: vec![text] }).await {
        Ok(output) => output.embeddings.into_iter().next(),
        Err(e) => {
            warn!("Failed to embed message, storing without vector: {e}");
            None
        }
    }
}
