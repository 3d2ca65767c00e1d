//! Per-device command queue

use chrono::{DateTime, Duration, Utc};

use crate::dispatch::command::{Command, CommandId};
use crate::dispatch::fsm::{CommandEvent, CommandState};
use crate::dispatch::policy::DispatchPolicy;
use crate::protocol::codec::ReplyRecord;
use crate::protocol::commands::CmdType;

/// Outcome of applying one reply record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Reply matched a `Sent` command and drove a transition
    Applied(CommandState),

    /// Reply referenced a command already in a terminal state
    Duplicate(CommandState),

    /// Reply referenced an id this queue does not track
    UnknownId,

    /// Reply raced a re-offer; the command will be delivered again
    AwaitingRedelivery,
}

/// Counters from one retry/expiry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub reoffered: usize,
    pub timed_out: usize,
    pub abandoned: usize,
}

impl SweepStats {
    pub fn is_empty(&self) -> bool {
        self.reoffered == 0 && self.timed_out == 0 && self.abandoned == 0
    }

    pub fn merge(&mut self, other: SweepStats) {
        self.reoffered += other.reoffered;
        self.timed_out += other.timed_out;
        self.abandoned += other.abandoned;
    }
}

/// Ordered collection of commands for one device
///
/// Ids are allocated from a per-queue sequence and never reused; the
/// backing vector stays ordered by id, which is creation order, so FIFO
/// delivery falls out of plain iteration.
#[derive(Debug)]
pub struct CommandQueue {
    commands: Vec<Command>,
    sequence: CommandId,
    retain_done: usize,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new(retain_done: usize) -> Self {
        Self {
            commands: Vec::new(),
            sequence: 0,
            retain_done,
        }
    }

    /// Rebuild a queue from a snapshot
    pub fn from_parts(commands: Vec<Command>, sequence: CommandId, retain_done: usize) -> Self {
        Self {
            commands,
            sequence,
            retain_done,
        }
    }

    fn next_sequence(&mut self) -> CommandId {
        self.sequence += 1;
        self.sequence
    }

    /// Add a new command in `Created` state and return its id
    pub fn enqueue(
        &mut self,
        cmd_type: CmdType,
        payload: String,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> CommandId {
        let id = self.next_sequence();
        let deadline = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.commands
            .push(Command::new(id, cmd_type, payload, now, deadline));
        id
    }

    /// Drain due commands for delivery
    ///
    /// Every `Created` command still inside its deadline transitions to
    /// `Sent` with delivery metadata stamped; snapshots are returned for
    /// encoding. Expired `Created` commands are left for the sweep.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Command> {
        let mut batch = Vec::new();
        for cmd in &mut self.commands {
            if cmd.state != CommandState::Created || now >= cmd.deadline {
                continue;
            }
            if cmd.mark_sent(now).is_ok() {
                batch.push(cmd.clone());
            }
        }
        batch
    }

    /// Apply one decoded reply record
    pub fn ack(&mut self, record: &ReplyRecord) -> AckOutcome {
        let Ok(id) = record.id.parse::<CommandId>() else {
            return AckOutcome::UnknownId;
        };
        let Some(cmd) = self.commands.iter_mut().find(|c| c.id == id) else {
            return AckOutcome::UnknownId;
        };

        if cmd.state.is_terminal() {
            return AckOutcome::Duplicate(cmd.state);
        }

        match cmd.state {
            CommandState::Sent => {
                if cmd.record_reply(record.return_code).is_ok() {
                    AckOutcome::Applied(cmd.state)
                } else {
                    AckOutcome::AwaitingRedelivery
                }
            }
            _ => AckOutcome::AwaitingRedelivery,
        }
    }

    /// Apply the retry/expiry policy
    ///
    /// For each in-flight command: past its deadline it times out;
    /// past its re-offer window it goes back to `Created` while attempts
    /// remain, otherwise it is abandoned. Queued commands past their
    /// deadline time out without ever being delivered.
    pub fn sweep(&mut self, now: DateTime<Utc>, policy: &DispatchPolicy) -> SweepStats {
        let mut stats = SweepStats::default();

        for cmd in &mut self.commands {
            match cmd.state {
                CommandState::Created => {
                    if now >= cmd.deadline && cmd.apply(CommandEvent::Expire).is_ok() {
                        stats.timed_out += 1;
                    }
                }
                CommandState::Sent => {
                    if now >= cmd.deadline {
                        if cmd.apply(CommandEvent::Expire).is_ok() {
                            stats.timed_out += 1;
                        }
                        continue;
                    }

                    let Some(sent_at) = cmd.sent_at else { continue };
                    let reoffer = Duration::from_std(policy.reoffer_for(&cmd.cmd_type))
                        .unwrap_or(Duration::MAX);
                    let reoffer_at = sent_at
                        .checked_add_signed(reoffer)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    if now < reoffer_at {
                        continue;
                    }

                    if cmd.attempts < policy.max_attempts_for(&cmd.cmd_type) {
                        if cmd.apply(CommandEvent::ReOffer).is_ok() {
                            stats.reoffered += 1;
                        }
                    } else if cmd.apply(CommandEvent::GiveUp).is_ok() {
                        stats.abandoned += 1;
                    }
                }
                _ => {}
            }
        }

        self.prune();
        stats
    }

    /// Drop the oldest completed commands beyond the retention cap
    fn prune(&mut self) {
        let done = self
            .commands
            .iter()
            .filter(|c| c.state.is_terminal())
            .count();
        if done <= self.retain_done {
            return;
        }

        let mut to_drop = done - self.retain_done;
        self.commands.retain(|c| {
            if to_drop > 0 && c.state.is_terminal() {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }

    /// Look up a command by id
    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.commands.iter().find(|c| c.id == id)
    }

    /// Number of commands awaiting delivery
    pub fn pending(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| c.state == CommandState::Created)
            .count()
    }

    /// Number of commands awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| c.state == CommandState::Sent)
            .count()
    }

    /// All tracked commands in id order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Last issued id
    pub fn sequence(&self) -> CommandId {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> CommandQueue {
        CommandQueue::new(100)
    }

    fn enqueue_one(q: &mut CommandQueue, now: DateTime<Utc>) -> CommandId {
        q.enqueue(CmdType::Data, String::new(), Duration::seconds(600), now)
    }

    fn reply(id: CommandId, code: Option<i64>) -> ReplyRecord {
        ReplyRecord {
            id: id.to_string(),
            return_code: code,
            cmd: "DATA".to_string(),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let mut q = queue();
        let now = Utc::now();
        let ids: Vec<CommandId> = (0..5).map(|_| enqueue_one(&mut q, now)).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_take_due_delivers_once() {
        let mut q = queue();
        let now = Utc::now();
        let id = enqueue_one(&mut q, now);

        let batch = q.take_due(now);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].state, CommandState::Sent);
        assert_eq!(batch[0].attempts, 1);

        // Already in flight, nothing left to deliver
        assert!(q.take_due(now).is_empty());
    }

    #[test]
    fn test_take_due_skips_expired_commands() {
        let mut q = queue();
        let now = Utc::now();
        q.enqueue(CmdType::Data, String::new(), Duration::seconds(10), now);

        let later = now + Duration::seconds(11);
        assert!(q.take_due(later).is_empty());
    }

    #[test]
    fn test_ack_unknown_and_duplicate() {
        let mut q = queue();
        let now = Utc::now();
        let id = enqueue_one(&mut q, now);
        q.take_due(now);

        assert_eq!(q.ack(&reply(99, Some(0))), AckOutcome::UnknownId);

        assert_eq!(
            q.ack(&reply(id, Some(0))),
            AckOutcome::Applied(CommandState::Acknowledged)
        );
        assert_eq!(
            q.ack(&reply(id, Some(0))),
            AckOutcome::Duplicate(CommandState::Acknowledged)
        );
    }

    #[test]
    fn test_ack_nonzero_return_marks_device_error() {
        let mut q = queue();
        let now = Utc::now();
        let id = enqueue_one(&mut q, now);
        q.take_due(now);

        assert_eq!(
            q.ack(&reply(id, Some(-1021))),
            AckOutcome::Applied(CommandState::DeviceReportedError)
        );
        assert_eq!(q.get(id).unwrap().result_code, Some(-1021));
    }

    #[test]
    fn test_sweep_reoffers_then_abandons() {
        let policy = DispatchPolicy::default();
        let mut q = queue();
        let mut now = Utc::now();
        let id = q.enqueue(
            CmdType::Data,
            String::new(),
            Duration::seconds(600),
            now,
        );

        // Exhaust the three attempts through re-offers
        for attempt in 1..=3 {
            q.take_due(now);
            assert_eq!(q.get(id).unwrap().attempts, attempt);
            now += Duration::seconds(91);
            let stats = q.sweep(now, &policy);
            if attempt < 3 {
                assert_eq!(stats.reoffered, 1);
                assert_eq!(q.get(id).unwrap().state, CommandState::Created);
            } else {
                assert_eq!(stats.abandoned, 1);
                assert_eq!(q.get(id).unwrap().state, CommandState::Abandoned);
            }
        }

        // Never re-offered after abandonment
        assert!(q.take_due(now).is_empty());
    }

    #[test]
    fn test_sweep_times_out_past_deadline() {
        let policy = DispatchPolicy::default();
        let mut q = queue();
        let now = Utc::now();
        let id = q.enqueue(CmdType::Data, String::new(), Duration::seconds(60), now);
        q.take_due(now);

        let stats = q.sweep(now + Duration::seconds(61), &policy);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(q.get(id).unwrap().state, CommandState::TimedOut);
    }

    #[test]
    fn test_sweep_times_out_undelivered_commands() {
        let policy = DispatchPolicy::default();
        let mut q = queue();
        let now = Utc::now();
        let id = q.enqueue(CmdType::Data, String::new(), Duration::seconds(60), now);

        let stats = q.sweep(now + Duration::seconds(61), &policy);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(q.get(id).unwrap().state, CommandState::TimedOut);
    }

    #[test]
    fn test_prune_keeps_newest_done_commands() {
        let policy = DispatchPolicy::default();
        let mut q = CommandQueue::new(2);
        let now = Utc::now();

        for _ in 0..4 {
            let id = enqueue_one(&mut q, now);
            q.take_due(now);
            q.ack(&reply(id, Some(0)));
        }
        let live = enqueue_one(&mut q, now);

        q.sweep(now, &policy);

        // Two oldest acknowledged commands were dropped, the live one stays
        assert_eq!(q.commands().len(), 3);
        assert!(q.get(1).is_none());
        assert!(q.get(2).is_none());
        assert!(q.get(live).is_some());
        // The sequence keeps climbing; dropped ids are never reused
        assert_eq!(q.sequence(), 5);
    }
}
