//! Device session tracking
//!
//! One session per terminal serial number, created implicitly on first
//! contact and never dropped automatically (terminals reappear after
//! arbitrarily long absences). The tracker map is read-mostly; all queue
//! state sits behind one async mutex per session so operations on
//! different devices never contend.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::dispatch::command::{Command, CommandId};
use crate::dispatch::fsm::CommandState;
use crate::dispatch::policy::DispatchPolicy;
use crate::dispatch::queue::{AckOutcome, CommandQueue, SweepStats};
use crate::protocol::codec::ReplyRecord;
use crate::protocol::commands::CmdType;

/// Mutable per-device state
#[derive(Debug)]
struct SessionInner {
    last_seen: DateTime<Utc>,
    last_addr: Option<SocketAddr>,
    queue: CommandQueue,
}

/// Read-only view of one session for operator queries
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub sn: String,
    pub last_seen: DateTime<Utc>,
    pub last_addr: Option<SocketAddr>,
    pub online: bool,
    pub pending_commands: usize,
    pub inflight_commands: usize,
    pub tracked_commands: usize,
}

/// Durable form of one session for checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub sn: String,
    pub last_seen: DateTime<Utc>,
    pub last_addr: Option<SocketAddr>,
    pub commands: Vec<Command>,
    pub sequence: CommandId,
}

/// Server-side state for one terminal
#[derive(Debug)]
pub struct DeviceSession {
    sn: String,
    inner: Mutex<SessionInner>,
}

impl DeviceSession {
    fn new(sn: String, now: DateTime<Utc>, retain_done: usize) -> Self {
        Self {
            sn,
            inner: Mutex::new(SessionInner {
                last_seen: now,
                last_addr: None,
                queue: CommandQueue::new(retain_done),
            }),
        }
    }

    fn from_snapshot(snapshot: SessionSnapshot, retain_done: usize) -> Self {
        Self {
            sn: snapshot.sn,
            inner: Mutex::new(SessionInner {
                last_seen: snapshot.last_seen,
                last_addr: snapshot.last_addr,
                queue: CommandQueue::from_parts(
                    snapshot.commands,
                    snapshot.sequence,
                    retain_done,
                ),
            }),
        }
    }

    /// Device serial number
    pub fn sn(&self) -> &str {
        &self.sn
    }

    /// Record a liveness signal
    pub async fn touch(&self, now: DateTime<Utc>, addr: Option<SocketAddr>) {
        let mut inner = self.inner.lock().await;
        inner.last_seen = now;
        if addr.is_some() {
            inner.last_addr = addr;
        }
    }

    /// Queue a new command
    pub async fn enqueue(
        &self,
        cmd_type: CmdType,
        payload: String,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> CommandId {
        let mut inner = self.inner.lock().await;
        inner.queue.enqueue(cmd_type, payload, ttl, now)
    }

    /// Drain due commands for a poll response
    ///
    /// Runs a lazy policy pass first so re-offers become visible on the
    /// poll that follows their window, not just on the next sweeper tick.
    pub async fn poll(&self, now: DateTime<Utc>, policy: &DispatchPolicy) -> Vec<Command> {
        let mut inner = self.inner.lock().await;
        inner.queue.sweep(now, policy);
        inner.queue.take_due(now)
    }

    /// Apply one reply record
    pub async fn ack(&self, record: &ReplyRecord) -> AckOutcome {
        let mut inner = self.inner.lock().await;
        inner.queue.ack(record)
    }

    /// Run a retry/expiry pass
    pub async fn sweep(&self, now: DateTime<Utc>, policy: &DispatchPolicy) -> SweepStats {
        let mut inner = self.inner.lock().await;
        inner.queue.sweep(now, policy)
    }

    /// Lifecycle state and result code for one command
    pub async fn command_status(&self, id: CommandId) -> Option<(CommandState, Option<i64>)> {
        let inner = self.inner.lock().await;
        inner.queue.get(id).map(|c| (c.state, c.result_code))
    }

    /// Operator-facing summary
    pub async fn summary(&self, now: DateTime<Utc>, offline_after: Duration) -> SessionSummary {
        let inner = self.inner.lock().await;
        SessionSummary {
            sn: self.sn.clone(),
            last_seen: inner.last_seen,
            last_addr: inner.last_addr,
            online: now.signed_duration_since(inner.last_seen) < offline_after,
            pending_commands: inner.queue.pending(),
            inflight_commands: inner.queue.in_flight(),
            tracked_commands: inner.queue.commands().len(),
        }
    }

    /// Durable snapshot of this session
    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            sn: self.sn.clone(),
            last_seen: inner.last_seen,
            last_addr: inner.last_addr,
            commands: inner.queue.commands().to_vec(),
            sequence: inner.queue.sequence(),
        }
    }
}

/// Registry of sessions keyed by serial number
pub struct SessionTracker {
    sessions: RwLock<HashMap<String, Arc<DeviceSession>>>,
    retain_done: usize,
}

impl SessionTracker {
    /// Create an empty tracker
    pub fn new(retain_done: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            retain_done,
        }
    }

    /// Get the session for a serial number, creating it on first contact
    pub async fn session(&self, sn: &str, now: DateTime<Utc>) -> Arc<DeviceSession> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(sn) {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        // Re-check under the write lock; another request may have won
        sessions
            .entry(sn.to_string())
            .or_insert_with(|| {
                Arc::new(DeviceSession::new(sn.to_string(), now, self.retain_done))
            })
            .clone()
    }

    /// Look up a session without creating it
    pub async fn get(&self, sn: &str) -> Option<Arc<DeviceSession>> {
        let sessions = self.sessions.read().await;
        sessions.get(sn).cloned()
    }

    /// Restore a session from a checkpoint
    pub async fn restore(&self, snapshot: SessionSnapshot) {
        let session = Arc::new(DeviceSession::from_snapshot(snapshot, self.retain_done));
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.sn().to_string(), session);
    }

    /// Snapshot of all sessions, for sweeps and checkpoints
    ///
    /// Returns clones so the map lock is released before any per-session
    /// lock is taken.
    pub async fn all(&self) -> Vec<Arc<DeviceSession>> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    /// Number of known devices
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Check if any device has made contact
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
