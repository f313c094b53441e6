use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use mavio::dialects::common::messages::MissionAck;
use mavio::protocol::{ComponentId, MessageId, SystemId, V2};
use mavio::Frame;

use crate::consts::AUTOPILOT_COMPONENT_ID;
use crate::protocol::messages::{mav_mission_result, mav_mission_type};
use crate::protocol::{Completion, ProgressCallback};
use crate::sync::scheduling::TimeoutCookie;
use crate::system::{OwnerToken, SystemContext};

/// Queued mission transfer.
///
/// Lifecycle is `NotStarted -> Running -> Done`. An item registers its message handlers when it
/// starts and unregisters them when dropped.
pub(crate) trait TransferWork: Send + Sync {
    /// Registers handlers and sends the first frame. Does nothing unless not started.
    fn start(self: Arc<Self>);

    /// Cancels the transfer, does nothing once done.
    fn cancel(&self);

    /// Finishes a transfer that will never run with [`MissionError::ConnectionError`].
    ///
    /// [`MissionError::ConnectionError`]: crate::protocol::mission::MissionError::ConnectionError
    fn abort(&self);

    fn has_started(&self) -> bool;

    fn is_done(&self) -> bool;
}

/// State shared by every kind of transfer.
pub(crate) struct TransferEnv {
    context: Arc<SystemContext>,
    owner: OwnerToken,
    retries: usize,
    mission_type: u8,
    started: AtomicBool,
    done: AtomicBool,
}

impl TransferEnv {
    pub(crate) fn new(context: Arc<SystemContext>, mission_type: u8) -> Self {
        let retries = context.conf().transfer_retries();
        Self {
            context,
            owner: OwnerToken::new(),
            retries,
            mission_type,
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    pub(crate) fn context(&self) -> &Arc<SystemContext> {
        &self.context
    }

    pub(crate) fn retries(&self) -> usize {
        self.retries
    }

    pub(crate) fn mission_type(&self) -> u8 {
        self.mission_type
    }

    pub(crate) fn system_id(&self) -> SystemId {
        self.context.system_id()
    }

    pub(crate) fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Routes frames with `message_id` to `handler` for as long as the work item lives.
    pub(crate) fn register<T>(
        &self,
        message_id: MessageId,
        this: &Weak<T>,
        handler: fn(&T, &Frame<V2>),
    ) where
        T: Send + Sync + 'static,
    {
        let this = this.clone();
        self.context.handlers().register(
            message_id,
            Arc::new(move |frame| {
                if let Some(work) = this.upgrade() {
                    handler(&work, frame);
                }
            }),
            self.owner,
        );
    }

    pub(crate) fn add_timeout<T>(&self, this: &Weak<T>, handler: fn(&T)) -> TimeoutCookie
    where
        T: Send + Sync + 'static,
    {
        let this = this.clone();
        self.context.timeouts().add(
            move || {
                if let Some(work) = this.upgrade() {
                    handler(&work);
                }
            },
            self.context.timeout(),
        )
    }

    pub(crate) fn refresh_timeout(&self, cookie: Option<TimeoutCookie>) {
        if let Some(cookie) = cookie {
            self.context.timeouts().refresh(cookie);
        }
    }

    pub(crate) fn remove_timeout(&self, cookie: &mut Option<TimeoutCookie>) {
        if let Some(cookie) = cookie.take() {
            self.context.timeouts().remove(cookie);
        }
    }

    /// Returns `true` if the message targets us or everyone.
    pub(crate) fn addressed_to_us(
        &self,
        target_system: SystemId,
        target_component: ComponentId,
    ) -> bool {
        (target_system == 0 || target_system == self.context.own_system_id())
            && (target_component == 0 || target_component == self.context.own_component_id())
    }

    /// Sends `MISSION_ACK` to the autopilot.
    pub(crate) fn send_ack(&self, result: u8) -> bool {
        self.send_ack_to(self.context.system_id(), AUTOPILOT_COMPONENT_ID, result)
    }

    pub(crate) fn send_ack_to(
        &self,
        target_system: SystemId,
        target_component: ComponentId,
        result: u8,
    ) -> bool {
        let (type_, mission_type) = match (
            mav_mission_result(result),
            mav_mission_type(self.mission_type),
        ) {
            (Ok(type_), Ok(mission_type)) => (type_, mission_type),
            _ => return false,
        };

        self.context.send_message(&MissionAck {
            target_system,
            target_component,
            type_,
            mission_type,
            ..Default::default()
        })
    }
}

impl Drop for TransferEnv {
    fn drop(&mut self) {
        self.context.handlers().unregister_all(self.owner);
    }
}

/// Side effects collected under the state lock and applied after it is released.
pub(crate) struct Effects<R> {
    progress: Vec<f32>,
    finished: Option<(Completion<R>, R)>,
}

impl<R> Effects<R> {
    pub(crate) fn new() -> Self {
        Self {
            progress: Vec::new(),
            finished: None,
        }
    }

    pub(crate) fn progress(&mut self, value: f32) {
        self.progress.push(value);
    }

    /// Records the terminal result.
    ///
    /// The callback is taken out of the work item, so a second terminal result finds nothing to
    /// deliver.
    pub(crate) fn finish(
        &mut self,
        env: &TransferEnv,
        callback: &mut Option<Completion<R>>,
        result: R,
    ) {
        env.mark_done();
        if let Some(callback) = callback.take() {
            self.finished = Some((callback, result));
        }
    }

    pub(crate) fn apply(self, progress: Option<&ProgressCallback>) {
        if let Some(progress) = progress {
            for value in self.progress {
                progress(value);
            }
        }
        if let Some((callback, result)) = self.finished {
            callback.complete(result);
        }
    }
}
