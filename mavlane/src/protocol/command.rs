//! # Command protocol
//!
//! Sends `COMMAND_LONG` / `COMMAND_INT` and waits for the matching `COMMAND_ACK`. A command that
//! is not acknowledged in time is sent again until its attempts run out. Commands to one remote
//! are executed one at a time in the order they were queued.
//!
//! An `IN_PROGRESS` acknowledgement keeps the command pending: progress goes to the progress
//! callback and the deadline is extended to cover the remaining attempts.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::time::Duration;

use mavio::dialects::common::messages::{
    CommandAck, CommandInt as CommandIntMessage, CommandLong as CommandLongMessage,
};
use mavio::dialects::Common;
use mavio::protocol::{ComponentId, SystemId, V2};
use mavio::Frame;

use crate::protocol::messages::{ids, mav_cmd, mav_frame, mav_result};
use crate::protocol::{Completion, ProgressCallback};
use crate::sync::scheduling::TimeoutCookie;
use crate::sync::utils::WorkQueue;
use crate::system::{Autopilot, OwnerToken, SystemContext};

/// Outcome of a command.
pub type CommandResult = std::result::Result<(), CommandError>;

/// Reasons a command did not succeed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The command could not be sent.
    #[error("connection error")]
    ConnectionError,
    /// The remote refused the command.
    #[error("command denied")]
    Denied,
    /// The remote does not know the command.
    #[error("command unsupported")]
    Unsupported,
    /// The remote can't execute the command right now.
    #[error("command temporarily rejected")]
    TemporarilyRejected,
    /// The remote failed executing the command.
    #[error("command failed")]
    Failed,
    /// The remote cancelled the command.
    #[error("command cancelled")]
    Cancelled,
    /// No acknowledgement after all attempts.
    #[error("command timed out")]
    Timeout,
    /// The command can't be encoded.
    #[error("command can't be encoded")]
    Encoding,
}

/// Optional command parameters, `None` is sent as a reserved value.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandParams {
    /// Parameter 1.
    pub param1: Option<f32>,
    /// Parameter 2.
    pub param2: Option<f32>,
    /// Parameter 3.
    pub param3: Option<f32>,
    /// Parameter 4.
    pub param4: Option<f32>,
    /// Parameter 5.
    pub param5: Option<f32>,
    /// Parameter 6.
    pub param6: Option<f32>,
    /// Parameter 7.
    pub param7: Option<f32>,
}

/// Command sent as `COMMAND_LONG`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct CommandLong {
    /// Target component, `0` for all.
    pub target_component_id: ComponentId,
    /// `MAV_CMD` code.
    pub command: u16,
    /// Parameters.
    pub params: CommandParams,
}

/// Command sent as `COMMAND_INT`, with integer-encoded position.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct CommandInt {
    /// Target component, `0` for all.
    pub target_component_id: ComponentId,
    /// `MAV_CMD` code.
    pub command: u16,
    /// `MAV_FRAME` of the position.
    pub frame: u8,
    /// Parameters 1 to 4, the rest are ignored.
    pub params: CommandParams,
    /// Latitude or local X, scaled.
    pub x: i32,
    /// Longitude or local Y, scaled.
    pub y: i32,
    /// Altitude or local Z.
    pub z: Option<f32>,
}

/// A command to a remote system.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// `COMMAND_LONG`.
    Long(CommandLong),
    /// `COMMAND_INT`.
    Int(CommandInt),
}

impl Command {
    /// `MAV_CMD` code.
    pub fn code(&self) -> u16 {
        match self {
            Command::Long(command) => command.command,
            Command::Int(command) => command.command,
        }
    }

    /// Target component.
    pub fn target_component_id(&self) -> ComponentId {
        match self {
            Command::Long(command) => command.target_component_id,
            Command::Int(command) => command.target_component_id,
        }
    }
}

impl From<CommandLong> for Command {
    fn from(value: CommandLong) -> Self {
        Command::Long(value)
    }
}

impl From<CommandInt> for Command {
    fn from(value: CommandInt) -> Self {
        Command::Int(value)
    }
}

/// Callback receiving the result of a command.
pub type CommandCallback = Completion<CommandResult>;

struct CommandWork {
    id: u64,
    command: Command,
    attempts_left: usize,
    timeout: Duration,
    already_sent: bool,
    timeout_cookie: Option<TimeoutCookie>,
    callback: Option<CommandCallback>,
    progress: Option<ProgressCallback>,
}

impl CommandWork {
    fn complete(mut self, result: CommandResult) {
        if let Some(callback) = self.callback.take() {
            callback.complete(result);
        }
    }
}

/// Command protocol of one remote system.
pub struct CommandSender {
    context: Arc<SystemContext>,
    this: Weak<CommandSender>,
    queue: WorkQueue<CommandWork>,
    owner: OwnerToken,
    next_id: AtomicU64,
}

impl CommandSender {
    pub(crate) fn new(context: Arc<SystemContext>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<CommandSender>| {
            let owner = OwnerToken::new();
            let handler = this.clone();
            context.handlers().register(
                ids::COMMAND_ACK,
                Arc::new(move |frame| {
                    if let Some(sender) = handler.upgrade() {
                        sender.process_command_ack(frame);
                    }
                }),
                owner,
            );

            Self {
                context,
                this: this.clone(),
                queue: WorkQueue::new(),
                owner,
                next_id: AtomicU64::new(0),
            }
        })
    }

    /// Queues a command.
    ///
    /// The callback receives the result exactly once. A command queued without a callback is
    /// dropped if an identical command is already queued.
    pub fn send_command_async(
        &self,
        command: Command,
        callback: Option<CommandCallback>,
        progress: Option<ProgressCallback>,
    ) {
        let mut guard = self.queue.guard();

        if callback.is_none() && guard.iter().any(|work| work.command == command) {
            log::debug!(
                "[#{}] dropping duplicate command {}",
                self.context.system_id(),
                command.code()
            );
            return;
        }

        guard.push_back(CommandWork {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            command,
            attempts_left: self.context.conf().command_retries().max(1),
            timeout: self.context.timeout(),
            already_sent: false,
            timeout_cookie: None,
            callback,
            progress,
        });
    }

    /// Sends a command and blocks until it completes.
    ///
    /// Must not be called from a message handler or timeout callback, as those run on the
    /// threads that complete commands.
    pub fn send_command(&self, command: Command) -> CommandResult {
        let (tx, rx) = mpsc::channel();
        self.send_command_async(
            command,
            Some(Completion::new(move |result| {
                let _ = tx.send(result);
            })),
            None,
        );
        rx.recv().unwrap_or(Err(CommandError::ConnectionError))
    }

    /// Number of queued commands, including the one in flight.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Sends the front command if it was not sent yet.
    pub(crate) fn do_work(&self) {
        let failed = {
            let mut guard = self.queue.guard();
            let work = match guard.front_mut() {
                Some(work) if !work.already_sent => work,
                _ => return,
            };

            match self.transmit(&work.command) {
                Ok(()) => {
                    work.already_sent = true;
                    work.attempts_left -= 1;
                    work.timeout_cookie = Some(self.add_timeout(work.id, work.timeout));
                    None
                }
                Err(err) => guard.pop_front().map(|work| (work, err)),
            }
        };

        if let Some((work, err)) = failed {
            log::warn!(
                "[#{}] command {} not sent: {err}",
                self.context.system_id(),
                work.command.code()
            );
            work.complete(Err(err));
        }
    }

    fn process_command_ack(&self, frame: &Frame<V2>) {
        let ack: CommandAck = match frame.decode::<Common>() {
            Ok(Common::CommandAck(ack)) => ack,
            _ => return,
        };
        let code = ack.command as u16;
        let result = ack.result as u8;

        if !self.addressed_to_us(ack.target_system, ack.target_component) {
            return;
        }

        let mut completed = None;
        let mut progress = None;
        {
            let mut guard = self.queue.guard();
            let work = match guard.front_mut() {
                Some(work)
                    if work.already_sent
                        && work.command.code() == code
                        && matches_sender(
                            self.context.system_id(),
                            work.command.target_component_id(),
                            frame.system_id(),
                            frame.component_id(),
                        ) =>
                {
                    work
                }
                _ => {
                    log::debug!(
                        "[#{}] ignoring unexpected ack for command {code}",
                        self.context.system_id()
                    );
                    return;
                }
            };

            if let Some(cookie) = work.timeout_cookie.take() {
                self.context.timeouts().remove(cookie);
            }

            if result == mav_result::IN_PROGRESS {
                let extended = work.timeout * (work.attempts_left as u32 + 1);
                work.timeout_cookie = Some(self.add_timeout(work.id, extended));
                let value = if ack.progress <= 100 {
                    ack.progress as f32 / 100.0
                } else {
                    f32::NAN
                };
                progress = work.progress.clone().map(|callback| (callback, value));
            } else {
                completed = guard
                    .pop_front()
                    .map(|work| (work, result_from_mav_result(result)));
            }
        }

        if let Some((callback, value)) = progress {
            callback(value);
        }
        if let Some((work, result)) = completed {
            log::debug!(
                "[#{}] command {} completed: {result:?}",
                self.context.system_id(),
                work.command.code()
            );
            work.complete(result);
        }
    }

    fn receive_timeout(&self, work_id: u64) {
        let completed = {
            let mut guard = self.queue.guard();
            let work = match guard.front_mut() {
                Some(work) if work.id == work_id && work.already_sent => work,
                _ => return,
            };
            work.timeout_cookie = None;

            if work.attempts_left > 0 {
                log::debug!(
                    "[#{}] retrying command {} ({} attempts left)",
                    self.context.system_id(),
                    work.command.code(),
                    work.attempts_left
                );
                match self.transmit(&work.command) {
                    Ok(()) => {
                        work.attempts_left -= 1;
                        work.timeout_cookie = Some(self.add_timeout(work.id, work.timeout));
                        None
                    }
                    Err(err) => guard.pop_front().map(|work| (work, Err(err))),
                }
            } else {
                guard
                    .pop_front()
                    .map(|work| (work, Err(CommandError::Timeout)))
            }
        };

        if let Some((work, result)) = completed {
            log::debug!(
                "[#{}] command {} completed: {result:?}",
                self.context.system_id(),
                work.command.code()
            );
            work.complete(result);
        }
    }

    fn add_timeout(&self, work_id: u64, duration: Duration) -> TimeoutCookie {
        let this = self.this.clone();
        self.context.timeouts().add(
            move || {
                if let Some(sender) = this.upgrade() {
                    sender.receive_timeout(work_id);
                }
            },
            duration,
        )
    }

    fn addressed_to_us(&self, target_system: SystemId, target_component: ComponentId) -> bool {
        (target_system == 0 || target_system == self.context.own_system_id())
            && (target_component == 0 || target_component == self.context.own_component_id())
    }

    fn transmit(&self, command: &Command) -> std::result::Result<(), CommandError> {
        let reserved = match self.context.autopilot() {
            Autopilot::ArduPilot => 0.0,
            _ => f32::NAN,
        };
        let target_system = self.context.system_id();
        let code = mav_cmd(command.code()).map_err(|_| CommandError::Encoding)?;

        let sent = match command {
            Command::Long(command) => {
                let params = &command.params;
                self.context.send_message(&CommandLongMessage {
                    target_system,
                    target_component: command.target_component_id,
                    command: code,
                    confirmation: 0,
                    param1: params.param1.unwrap_or(reserved),
                    param2: params.param2.unwrap_or(reserved),
                    param3: params.param3.unwrap_or(reserved),
                    param4: params.param4.unwrap_or(reserved),
                    param5: params.param5.unwrap_or(reserved),
                    param6: params.param6.unwrap_or(reserved),
                    param7: params.param7.unwrap_or(reserved),
                })
            }
            Command::Int(command) => {
                let params = &command.params;
                let frame = mav_frame(command.frame).map_err(|_| CommandError::Encoding)?;
                self.context.send_message(&CommandIntMessage {
                    target_system,
                    target_component: command.target_component_id,
                    frame,
                    command: code,
                    current: 0,
                    autocontinue: 0,
                    param1: params.param1.unwrap_or(reserved),
                    param2: params.param2.unwrap_or(reserved),
                    param3: params.param3.unwrap_or(reserved),
                    param4: params.param4.unwrap_or(reserved),
                    x: command.x,
                    y: command.y,
                    z: command.z.unwrap_or(reserved),
                })
            }
        };

        if sent {
            Ok(())
        } else {
            Err(CommandError::ConnectionError)
        }
    }
}

fn matches_sender(
    system_id: SystemId,
    target_component_id: ComponentId,
    sender_system_id: SystemId,
    sender_component_id: ComponentId,
) -> bool {
    sender_system_id == system_id
        && (target_component_id == 0 || target_component_id == sender_component_id)
}

fn result_from_mav_result(result: u8) -> CommandResult {
    match result {
        mav_result::ACCEPTED => Ok(()),
        mav_result::TEMPORARILY_REJECTED => Err(CommandError::TemporarilyRejected),
        mav_result::DENIED => Err(CommandError::Denied),
        mav_result::UNSUPPORTED => Err(CommandError::Unsupported),
        mav_result::CANCELLED => Err(CommandError::Cancelled),
        _ => Err(CommandError::Failed),
    }
}

impl Drop for CommandSender {
    fn drop(&mut self) {
        self.context.handlers().unregister_all(self.owner);
        let pending: Vec<CommandWork> = self.queue.guard().drain_matching(|_| true);
        for work in pending {
            if let Some(cookie) = work.timeout_cookie {
                self.context.timeouts().remove(cookie);
            }
            work.complete(Err(CommandError::ConnectionError));
        }
    }
}

impl Debug for CommandSender {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("system_id", &self.context.system_id())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::test_utils::{command_ack_frame, Harness};

    const ARM: u16 = 400;
    const TAKEOFF: u16 = 22;

    fn arm() -> Command {
        Command::Long(CommandLong {
            target_component_id: 1,
            command: ARM,
            params: CommandParams {
                param1: Some(1.0),
                ..Default::default()
            },
        })
    }

    fn results() -> (
        Arc<Mutex<Vec<CommandResult>>>,
        impl Fn() -> Option<CommandCallback>,
    ) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        (results, move || {
            let sink = sink.clone();
            Some(Completion::new(move |result| sink.lock().unwrap().push(result)))
        })
    }

    #[test]
    fn accepted_ack_completes_command() {
        let harness = Harness::new();
        let sender = CommandSender::new(harness.context());
        let (results, callback) = results();

        sender.send_command_async(arm(), callback(), None);
        sender.do_work();
        assert_eq!(harness.sent_of(ids::COMMAND_LONG).len(), 1);

        harness.deliver(&command_ack_frame(1, 1, ARM, mav_result::ACCEPTED, 0));
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);
        assert_eq!(sender.pending(), 0);
        assert!(harness.context().timeouts().is_empty());
    }

    #[test]
    fn unanswered_command_is_sent_exactly_retries_times() {
        let harness = Harness::new();
        let sender = CommandSender::new(harness.context());
        let (results, callback) = results();
        let attempts = harness.context().conf().command_retries();

        sender.send_command_async(arm(), callback(), None);
        for _ in 0..20 {
            sender.do_work();
            harness.advance(harness.context().timeout() + Duration::from_millis(1));
        }

        assert_eq!(harness.sent_of(ids::COMMAND_LONG).len(), attempts);
        assert_eq!(*results.lock().unwrap(), vec![Err(CommandError::Timeout)]);
    }

    #[test]
    fn terminal_results_are_mapped() {
        for (result, expected) in [
            (mav_result::DENIED, CommandError::Denied),
            (mav_result::UNSUPPORTED, CommandError::Unsupported),
            (mav_result::TEMPORARILY_REJECTED, CommandError::TemporarilyRejected),
            (mav_result::FAILED, CommandError::Failed),
            (mav_result::CANCELLED, CommandError::Cancelled),
        ] {
            let harness = Harness::new();
            let sender = CommandSender::new(harness.context());
            let (results, callback) = results();

            sender.send_command_async(arm(), callback(), None);
            sender.do_work();
            harness.deliver(&command_ack_frame(1, 1, ARM, result, 0));

            assert_eq!(*results.lock().unwrap(), vec![Err(expected)]);
            // Denied commands are not retried.
            harness.advance(Duration::from_secs(10));
            assert_eq!(harness.sent_of(ids::COMMAND_LONG).len(), 1);
        }
    }

    #[test]
    fn in_progress_extends_deadline_and_reports_progress() {
        let harness = Harness::new();
        let sender = CommandSender::new(harness.context());
        let (results, callback) = results();
        let progress = Arc::new(Mutex::new(Vec::new()));
        let progress_sink = progress.clone();

        sender.send_command_async(
            arm(),
            callback(),
            Some(Arc::new(move |value| progress_sink.lock().unwrap().push(value))),
        );
        sender.do_work();
        harness.deliver(&command_ack_frame(1, 1, ARM, mav_result::IN_PROGRESS, 40));

        // Longer than a single attempt, shorter than the remaining budget.
        harness.advance(harness.context().timeout() * 2);
        assert!(results.lock().unwrap().is_empty());
        assert_eq!(harness.sent_of(ids::COMMAND_LONG).len(), 1);

        harness.deliver(&command_ack_frame(1, 1, ARM, mav_result::ACCEPTED, 100));
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);
        assert_eq!(*progress.lock().unwrap(), vec![0.4]);
    }

    #[test]
    fn mismatched_acks_are_ignored() {
        let harness = Harness::new();
        let sender = CommandSender::new(harness.context());
        let (results, callback) = results();

        sender.send_command_async(arm(), callback(), None);
        sender.do_work();

        harness.deliver(&command_ack_frame(1, 1, TAKEOFF, mav_result::ACCEPTED, 0));
        harness.deliver(&command_ack_frame(1, 100, ARM, mav_result::ACCEPTED, 0));
        harness.deliver(&command_ack_frame(9, 1, ARM, mav_result::ACCEPTED, 0));
        assert!(results.lock().unwrap().is_empty());
        assert_eq!(sender.pending(), 1);

        harness.deliver(&command_ack_frame(1, 1, ARM, mav_result::ACCEPTED, 0));
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);
    }

    #[test]
    fn commands_run_one_at_a_time() {
        let harness = Harness::new();
        let sender = CommandSender::new(harness.context());
        let (results, callback) = results();
        let takeoff = Command::Long(CommandLong {
            target_component_id: 1,
            command: TAKEOFF,
            params: Default::default(),
        });

        sender.send_command_async(arm(), callback(), None);
        sender.send_command_async(takeoff, callback(), None);
        sender.do_work();
        sender.do_work();
        assert_eq!(harness.sent_of(ids::COMMAND_LONG).len(), 1);

        harness.deliver(&command_ack_frame(1, 1, ARM, mav_result::ACCEPTED, 0));
        sender.do_work();
        assert_eq!(harness.sent_of(ids::COMMAND_LONG).len(), 2);

        harness.deliver(&command_ack_frame(1, 1, TAKEOFF, mav_result::DENIED, 0));
        assert_eq!(
            *results.lock().unwrap(),
            vec![Ok(()), Err(CommandError::Denied)]
        );
    }

    #[test]
    fn send_failure_is_connection_error() {
        let harness = Harness::new();
        harness.set_link_up(false);
        let sender = CommandSender::new(harness.context());
        let (results, callback) = results();

        sender.send_command_async(arm(), callback(), None);
        sender.do_work();

        assert_eq!(
            *results.lock().unwrap(),
            vec![Err(CommandError::ConnectionError)]
        );
        assert_eq!(sender.pending(), 0);
    }

    #[test]
    fn duplicate_fire_and_forget_is_dropped() {
        let harness = Harness::new();
        let sender = CommandSender::new(harness.context());

        sender.send_command_async(arm(), None, None);
        sender.send_command_async(arm(), None, None);
        assert_eq!(sender.pending(), 1);
    }

    #[test]
    fn callback_may_queue_another_command() {
        let harness = Harness::new();
        let sender = CommandSender::new(harness.context());
        let (results, callback) = results();

        let chained = sender.clone();
        let next = callback();
        sender.send_command_async(
            arm(),
            Some(Completion::new(move |_| {
                chained.send_command_async(arm(), next, None);
            })),
            None,
        );
        sender.do_work();
        harness.deliver(&command_ack_frame(1, 1, ARM, mav_result::ACCEPTED, 0));

        sender.do_work();
        harness.deliver(&command_ack_frame(1, 1, ARM, mav_result::ACCEPTED, 0));
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);
    }
}
