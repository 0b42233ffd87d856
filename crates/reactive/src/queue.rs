// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable job queue with broker semantics: blocking get with an atomic
//! claim, ack, and reject with or without requeue.
//!
//! Backed by sqlite so multiple consumer processes can compete for
//! messages; the claim is a single UPDATE, and WAL journal mode keeps
//! concurrent consumers from serializing on reads.

use async_trait::async_trait;
use rand::distr::Alphanumeric;
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Poll interval while waiting for a message.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors when communicating with the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("queue misconfigured: {0}")]
    Config(String),
}

/// A claimed message. The process count reflects this claim: a message
/// claimed for the first time reports 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub payload: String,
    pub process_count: u32,
}

/// Broker-style queue operations.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Block until a message can be claimed. Claiming increments the
    /// message's process count.
    async fn get(&self) -> Result<Message, QueueError>;

    /// Acknowledge a claimed message, removing it permanently.
    async fn ack(&self, message: &Message) -> Result<(), QueueError>;

    /// Reject a claimed message. With `requeue` it becomes claimable again
    /// (keeping its process count); without, it is dead.
    async fn reject(&self, message: &Message, requeue: bool) -> Result<(), QueueError>;

    /// Publish a payload.
    async fn push(&self, payload: &str) -> Result<(), QueueError>;

    /// Number of claimable messages.
    async fn size(&self) -> Result<u64, QueueError>;
}

/// The sqlite-backed queue.
pub struct SqliteQueue {
    pool: SqlitePool,
    queue_name: String,
    consumer_tag: String,
}

impl SqliteQueue {
    /// Open (and if needed create) the queue at `uri`, which is either a
    /// `sqlite:` URI or a bare filesystem path.
    pub async fn connect(uri: &str, queue_name: &str) -> Result<Self, QueueError> {
        let options = if uri.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(uri)
                .map_err(|err| QueueError::Config(err.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(uri)
        }
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

        // One connection per queue handle: claims serialize through it, and
        // an in-memory database stays alive for the handle's lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                payload TEXT NOT NULL,
                process_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL DEFAULT 'ready',
                claimed_by TEXT,
                claimed_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&pool)
        .await?;

        // A consumer killed mid-claim (SIGTERM inside the critical section)
        // leaves its message claimed; return long-stale claims to the queue.
        sqlx::query(
            "UPDATE messages SET state = 'ready', claimed_by = NULL
             WHERE state = 'claimed' AND claimed_at < datetime('now', '-30 minutes')",
        )
        .execute(&pool)
        .await?;

        let consumer_tag: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        Ok(Self {
            pool,
            queue_name: queue_name.to_string(),
            consumer_tag,
        })
    }

    /// Claim the oldest ready message, if any.
    async fn try_claim(&self) -> Result<Option<Message>, QueueError> {
        let claimed = sqlx::query(
            "UPDATE messages
             SET state = 'claimed', process_count = process_count + 1,
                 claimed_by = ?, claimed_at = datetime('now')
             WHERE id = (
                 SELECT id FROM messages WHERE queue = ? AND state = 'ready'
                 ORDER BY id LIMIT 1
             )",
        )
        .bind(&self.consumer_tag)
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT id, payload, process_count FROM messages
             WHERE queue = ? AND state = 'claimed' AND claimed_by = ?
             ORDER BY id LIMIT 1",
        )
        .bind(&self.queue_name)
        .bind(&self.consumer_tag)
        .fetch_one(&self.pool)
        .await?;
        Ok(Some(Message {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            process_count: row.try_get::<i64, _>("process_count")? as u32,
        }))
    }
}

#[async_trait]
impl JobQueue for SqliteQueue {
    async fn get(&self) -> Result<Message, QueueError> {
        loop {
            if let Some(message) = self.try_claim().await? {
                return Ok(message);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, message: &Message) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reject(&self, message: &Message, requeue: bool) -> Result<(), QueueError> {
        let state = if requeue { "ready" } else { "dead" };
        sqlx::query("UPDATE messages SET state = ?, claimed_by = NULL WHERE id = ?")
            .bind(state)
            .bind(message.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn push(&self, payload: &str) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO messages (queue, payload) VALUES (?, ?)")
            .bind(&self.queue_name)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn size(&self) -> Result<u64, QueueError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS ready FROM messages WHERE queue = ? AND state = 'ready'",
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("ready")? as u64)
    }
}

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use in_memory::InMemoryQueue;

#[cfg(any(test, feature = "test-support"))]
mod in_memory {
    use super::{JobQueue, Message, QueueError, POLL_INTERVAL};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SlotState {
        Ready,
        Claimed,
        Dead,
    }

    #[derive(Debug, Clone)]
    struct Slot {
        message: Message,
        state: SlotState,
    }

    /// In-memory queue with the same claim semantics as the sqlite one.
    #[derive(Clone, Default)]
    pub struct InMemoryQueue {
        slots: Arc<Mutex<VecDeque<Slot>>>,
        next_id: Arc<Mutex<i64>>,
    }

    impl InMemoryQueue {
        pub fn new() -> Self {
            Self::default()
        }

        /// Push a payload with a pre-existing process count, as a requeued
        /// broker message would carry.
        pub fn push_with_count(&self, payload: &str, process_count: u32) {
            let mut next_id = self.next_id.lock();
            *next_id += 1;
            self.slots.lock().push_back(Slot {
                message: Message {
                    id: *next_id,
                    payload: payload.to_string(),
                    process_count,
                },
                state: SlotState::Ready,
            });
        }

        /// Payloads currently claimable, in order.
        pub fn ready_payloads(&self) -> Vec<String> {
            self.slots
                .lock()
                .iter()
                .filter(|slot| slot.state == SlotState::Ready)
                .map(|slot| slot.message.payload.clone())
                .collect()
        }

        /// Payloads rejected without requeue.
        pub fn dead_payloads(&self) -> Vec<String> {
            self.slots
                .lock()
                .iter()
                .filter(|slot| slot.state == SlotState::Dead)
                .map(|slot| slot.message.payload.clone())
                .collect()
        }
    }

    #[async_trait]
    impl JobQueue for InMemoryQueue {
        async fn get(&self) -> Result<Message, QueueError> {
            loop {
                {
                    let mut slots = self.slots.lock();
                    if let Some(slot) = slots
                        .iter_mut()
                        .find(|slot| slot.state == SlotState::Ready)
                    {
                        slot.state = SlotState::Claimed;
                        slot.message.process_count += 1;
                        return Ok(slot.message.clone());
                    }
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        async fn ack(&self, message: &Message) -> Result<(), QueueError> {
            self.slots.lock().retain(|slot| slot.message.id != message.id);
            Ok(())
        }

        async fn reject(&self, message: &Message, requeue: bool) -> Result<(), QueueError> {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots
                .iter_mut()
                .find(|slot| slot.message.id == message.id)
            {
                slot.state = if requeue {
                    SlotState::Ready
                } else {
                    SlotState::Dead
                };
            }
            Ok(())
        }

        async fn push(&self, payload: &str) -> Result<(), QueueError> {
            self.push_with_count(payload, 0);
            Ok(())
        }

        async fn size(&self) -> Result<u64, QueueError> {
            Ok(self.ready_payloads().len() as u64)
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
