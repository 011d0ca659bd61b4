//! Deferred commands: pushed by hosts at any time, applied on the heartbeat
//! and ahead of a non-merging id change or a user details update.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::Tracker;
use crate::record::EventInput;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    AddEvent(EventInput),
    BeginSession,
    EndSession,
    ChangeId { device_id: String, merge: bool },
    RecordError { message: String, nonfatal: bool },
    UserDetails(Value),
    OptOut,
    /// Never applied while the global tracker is opted out, since opted-out
    /// ticks skip the queue. Call [`Tracker::opt_in`] directly instead.
    OptIn,
}

/// A command for the tracker of `target`, or for the global tracker when
/// `target` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub target: Option<String>,
    pub action: CommandAction,
}

impl Command {
    #[must_use]
    pub fn global(action: CommandAction) -> Self {
        Self { target: None, action }
    }

    #[must_use]
    pub fn targeted(app_key: impl Into<String>, action: CommandAction) -> Self {
        Self {
            target: Some(app_key.into()),
            action,
        }
    }
}

/// FIFO of pending commands.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) {
        self.commands.lock().push_back(command);
    }

    /// Take every queued command.
    pub fn drain(&self) -> Vec<Command> {
        self.commands.lock().drain(..).collect()
    }

    /// Put commands back at the front, in their original order.
    pub fn requeue(&self, commands: Vec<Command>) {
        let mut queue = self.commands.lock();
        for command in commands.into_iter().rev() {
            queue.push_front(command);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}

impl Tracker {
    /// Apply queued registry commands. Only the global tracker drains.
    pub(crate) async fn drain_commands(&self) -> usize {
        let Some(registry) = self.inner.registry.upgrade() else {
            return 0;
        };
        if !registry.is_global(self.app_key()) {
            return 0;
        }

        let queue = registry.command_queue();
        let commands = queue.drain();
        if commands.is_empty() {
            return 0;
        }

        let mut applied = 0;
        let mut unresolved = Vec::new();
        for command in commands {
            let target = match command.target.as_deref() {
                None => Some(self.clone()),
                Some(key) if key == self.app_key() => Some(self.clone()),
                Some(key) => registry.get(key),
            };
            match target {
                Some(tracker) => {
                    tracker.apply_command(command.action).await;
                    applied += 1;
                }
                None => unresolved.push(command),
            }
        }

        if !unresolved.is_empty() {
            debug!(count = unresolved.len(), "commands for unknown trackers requeued");
            queue.requeue(unresolved);
        }
        applied
    }

    // Boxed: applying a command may drain the queue again (change_id, user_details).
    fn apply_command(&self, action: CommandAction) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match action {
                CommandAction::AddEvent(event) => {
                    self.enqueue_event(event).await;
                }
                CommandAction::BeginSession => self.begin_session(false).await,
                CommandAction::EndSession => self.end_session(None, false).await,
                CommandAction::ChangeId { device_id, merge } => self.change_id(&device_id, merge).await,
                CommandAction::RecordError { message, nonfatal } => {
                    self.record_error(&message, nonfatal, None).await;
                }
                CommandAction::UserDetails(details) => {
                    self.user_details(details).await;
                }
                CommandAction::OptOut => self.opt_out().await,
                CommandAction::OptIn => self.opt_in().await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: &str) -> Command {
        Command::global(CommandAction::AddEvent(EventInput::new(key)))
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = CommandQueue::new();
        queue.push(event("a"));
        queue.push(event("b"));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(drained, vec![event("a"), event("b")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_goes_to_front_in_order() {
        let queue = CommandQueue::new();
        queue.push(event("c"));
        queue.requeue(vec![event("a"), event("b")]);
        assert_eq!(queue.drain(), vec![event("a"), event("b"), event("c")]);
    }

    #[test]
    fn test_targeted_command() {
        let command = Command::targeted("other", CommandAction::OptOut);
        assert_eq!(command.target.as_deref(), Some("other"));
        assert_eq!(command.action, CommandAction::OptOut);
    }
}
