//! Dispatch engine
//!
//! Service facade over the session tracker: command enqueueing, poll
//! draining, reply correlation, status queries, and the retry/expiry
//! sweep. Protocol-level soft failures (malformed lines, unknown ids,
//! duplicate replies) are logged and counted here, never propagated —
//! terminals have no error-recovery path beyond re-polling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dispatch::command::CommandId;
use crate::dispatch::fsm::CommandState;
use crate::dispatch::policy::DispatchPolicy;
use crate::dispatch::queue::{AckOutcome, SweepStats};
use crate::dispatch::session::{SessionSnapshot, SessionSummary, SessionTracker};
use crate::events::{self, ReplyEvent};
use crate::protocol::codec;
use crate::protocol::commands::CmdType;

/// Engine construction options
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Deadline and retry policy
    pub policy: DispatchPolicy,

    /// A device with no poll inside this window counts as offline
    pub offline_after: StdDuration,

    /// Completed commands retained per device for status queries
    pub retain_done: usize,

    /// Reply event channel capacity
    pub event_capacity: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            policy: DispatchPolicy::default(),
            offline_after: StdDuration::from_secs(300),
            retain_done: 100,
            event_capacity: 256,
        }
    }
}

/// Counters from one reply submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplySummary {
    pub applied: usize,
    pub duplicates: usize,
    pub unknown: usize,
    pub awaiting_redelivery: usize,
    pub malformed: usize,
}

impl ReplySummary {
    pub fn total(&self) -> usize {
        self.applied + self.duplicates + self.unknown + self.awaiting_redelivery + self.malformed
    }
}

/// Durable form of the whole engine for checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub sessions: Vec<SessionSnapshot>,
}

/// Command dispatch and reply-correlation engine
pub struct DispatchEngine {
    sessions: SessionTracker,
    policy: DispatchPolicy,
    clock: Arc<dyn Clock>,
    offline_after: Duration,
    replies_tx: broadcast::Sender<ReplyEvent>,
}

impl DispatchEngine {
    /// Create a new engine
    pub fn new(options: DispatchOptions, clock: Arc<dyn Clock>) -> Self {
        let (replies_tx, _) = events::channel(options.event_capacity);
        Self {
            sessions: SessionTracker::new(options.retain_done),
            policy: options.policy,
            clock,
            offline_after: Duration::from_std(options.offline_after).unwrap_or(Duration::MAX),
            replies_tx,
        }
    }

    /// The injected clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Queue a command for a device and return its id
    ///
    /// The session is created implicitly; devices are never
    /// pre-registered, so commands may be queued before first contact.
    pub async fn enqueue_command(
        &self,
        sn: &str,
        cmd_type: CmdType,
        payload: String,
        ttl: Option<StdDuration>,
    ) -> CommandId {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or_else(|| self.policy.ttl_for(&cmd_type));
        let ttl = Duration::from_std(ttl).unwrap_or(Duration::MAX);

        let session = self.sessions.session(sn, now).await;
        let id = session.enqueue(cmd_type.clone(), payload, ttl, now).await;

        info!("Queued command for {}: C:{}:{}", sn, id, cmd_type);
        id
    }

    /// Handle a poll: drain due commands and encode the response body
    ///
    /// Records the poll as a liveness signal. An empty queue yields an
    /// empty body, which the handler still serves with status 200.
    pub async fn poll(&self, sn: &str, addr: Option<SocketAddr>) -> String {
        let now = self.clock.now();
        let session = self.sessions.session(sn, now).await;
        session.touch(now, addr).await;

        let batch = session.poll(now, &self.policy).await;
        if batch.is_empty() {
            debug!("Device {} polled, no pending commands", sn);
        } else {
            info!("Delivering {} command(s) to device {}", batch.len(), sn);
        }

        codec::encode_commands(&batch)
    }

    /// Handle a reply submission body
    ///
    /// Each line is decoded and applied independently; one bad line never
    /// aborts the batch, and every accepted record is published to the
    /// reply event stream.
    pub async fn submit_replies(&self, sn: &str, body: &str) -> ReplySummary {
        let now = self.clock.now();
        let session = self.sessions.session(sn, now).await;
        session.touch(now, None).await;

        let mut summary = ReplySummary::default();
        for decoded in codec::decode_replies(body) {
            let record = match decoded {
                Ok(record) => record,
                Err(e) => {
                    warn!("Device {}: {}", sn, e);
                    summary.malformed += 1;
                    continue;
                }
            };

            match session.ack(&record).await {
                AckOutcome::Applied(state) => {
                    debug!(
                        "Device {} reply for C:{} -> {:?} (Return={:?})",
                        sn, record.id, state, record.return_code
                    );
                    summary.applied += 1;
                    let _ = self.replies_tx.send(ReplyEvent {
                        device_sn: sn.to_string(),
                        record,
                    });
                }
                AckOutcome::Duplicate(state) => {
                    debug!(
                        "Device {} repeated reply for C:{} already {:?} (Return={:?})",
                        sn, record.id, state, record.return_code
                    );
                    summary.duplicates += 1;
                }
                AckOutcome::UnknownId => {
                    warn!("Device {} replied to unknown command id {}", sn, record.id);
                    summary.unknown += 1;
                }
                AckOutcome::AwaitingRedelivery => {
                    debug!(
                        "Device {} reply for C:{} raced a re-offer, awaiting re-delivery",
                        sn, record.id
                    );
                    summary.awaiting_redelivery += 1;
                }
            }
        }

        summary
    }

    /// Lifecycle state and result code for one command
    pub async fn command_status(
        &self,
        sn: &str,
        id: CommandId,
    ) -> Option<(CommandState, Option<i64>)> {
        let session = self.sessions.get(sn).await?;
        session.command_status(id).await
    }

    /// Subscribe to accepted reply events
    pub fn subscribe_replies(&self) -> broadcast::Receiver<ReplyEvent> {
        self.replies_tx.subscribe()
    }

    /// Run one retry/expiry pass over every session
    ///
    /// Sessions are snapshotted first so only one device's lock is held
    /// at a time and poll/ack traffic on other devices never blocks.
    pub async fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let mut stats = SweepStats::default();

        for session in self.sessions.all().await {
            let session_stats = session.sweep(now, &self.policy).await;
            if !session_stats.is_empty() {
                debug!(
                    "Sweep for {}: {} re-offered, {} timed out, {} abandoned",
                    session.sn(),
                    session_stats.reoffered,
                    session_stats.timed_out,
                    session_stats.abandoned
                );
            }
            stats.merge(session_stats);
        }

        stats
    }

    /// Operator-facing summaries of all sessions
    pub async fn device_summaries(&self) -> Vec<SessionSummary> {
        let now = self.clock.now();
        let mut summaries = Vec::new();
        for session in self.sessions.all().await {
            summaries.push(session.summary(now, self.offline_after).await);
        }
        summaries.sort_by(|a, b| a.sn.cmp(&b.sn));
        summaries
    }

    /// Durable snapshot for the persistence collaborator
    pub async fn snapshot(&self) -> EngineSnapshot {
        let mut sessions = Vec::new();
        for session in self.sessions.all().await {
            sessions.push(session.snapshot().await);
        }
        sessions.sort_by(|a, b| a.sn.cmp(&b.sn));

        EngineSnapshot {
            taken_at: self.clock.now(),
            sessions,
        }
    }

    /// Restore sessions from a checkpoint
    pub async fn restore(&self, snapshot: EngineSnapshot) {
        let count = snapshot.sessions.len();
        for session in snapshot.sessions {
            self.sessions.restore(session).await;
        }
        if count > 0 {
            info!("Restored {} device session(s) from checkpoint", count);
        }
    }
}
