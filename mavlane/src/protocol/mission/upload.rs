use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mavio::dialects::common::messages::{
    MissionAck, MissionCount, MissionItemInt, MissionRequest, MissionRequestInt,
};
use mavio::dialects::Common;
use mavio::protocol::V2;
use mavio::Frame;

use crate::consts::AUTOPILOT_COMPONENT_ID;
use crate::protocol::messages::{ids, mav_mission_type, mission_result};
use crate::protocol::mission::result::result_from_ack;
use crate::protocol::mission::work::{Effects, TransferEnv, TransferWork};
use crate::protocol::mission::{MissionError, MissionResult};
use crate::protocol::{Completion, ProgressCallback};
use crate::sync::scheduling::TimeoutCookie;
use crate::system::{Autopilot, SystemContext};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    SendCount,
    SendItems,
}

struct UploadState {
    step: Step,
    next_sequence: usize,
    retries_done: usize,
    cookie: Option<TimeoutCookie>,
    callback: Option<Completion<MissionResult<()>>>,
}

/// Upload: `MISSION_COUNT`, then one `MISSION_ITEM_INT` per request, then the final ack.
pub(crate) struct UploadWork {
    env: TransferEnv,
    this: Weak<UploadWork>,
    items: Vec<MissionItemInt>,
    progress: Option<ProgressCallback>,
    state: Mutex<UploadState>,
}

impl UploadWork {
    /// Creates an upload of validated items.
    pub(crate) fn new(
        context: Arc<SystemContext>,
        mission_type: u8,
        items: Vec<MissionItemInt>,
        callback: Completion<MissionResult<()>>,
        progress: Option<ProgressCallback>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            env: TransferEnv::new(context, mission_type),
            this: this.clone(),
            items,
            progress,
            state: Mutex::new(UploadState {
                step: Step::SendCount,
                next_sequence: 0,
                retries_done: 0,
                cookie: None,
                callback: Some(callback),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, UploadState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn finish(
        &self,
        state: &mut UploadState,
        effects: &mut Effects<MissionResult<()>>,
        result: MissionResult<()>,
    ) {
        self.env.remove_timeout(&mut state.cookie);
        log::debug!("[#{}] mission upload finished: {result:?}", self.env.system_id());
        effects.finish(&self.env, &mut state.callback, result);
    }

    fn send_count(&self, state: &mut UploadState, effects: &mut Effects<MissionResult<()>>) {
        let mission_type = match mav_mission_type(self.env.mission_type()) {
            Ok(mission_type) => mission_type,
            Err(_) => return self.finish(state, effects, Err(MissionError::ProtocolError)),
        };

        let Ok(count) = u16::try_from(self.items.len()) else {
            return self.finish(state, effects, Err(MissionError::TooManyMissionItems));
        };

        let sent = self.env.context().send_message(&MissionCount {
            target_system: self.env.system_id(),
            target_component: AUTOPILOT_COMPONENT_ID,
            count,
            mission_type,
            ..Default::default()
        });
        if !sent {
            return self.finish(state, effects, Err(MissionError::ConnectionError));
        }

        log::trace!(
            "[#{}] sent mission count {}, retries: {}",
            self.env.system_id(),
            self.items.len(),
            state.retries_done
        );
        state.retries_done += 1;
    }

    fn send_mission_item(&self, state: &mut UploadState, effects: &mut Effects<MissionResult<()>>) {
        let item = match self.items.get(state.next_sequence) {
            Some(item) => item,
            None => {
                log::warn!("[#{}] mission item sequence out of bounds", self.env.system_id());
                return;
            }
        };

        if !self.env.context().send_message(item) {
            return self.finish(state, effects, Err(MissionError::ConnectionError));
        }

        state.next_sequence += 1;
        state.retries_done += 1;
    }

    fn process_mission_request_int(&self, frame: &Frame<V2>) {
        let request: MissionRequestInt = match frame.decode::<Common>() {
            Ok(Common::MissionRequestInt(request)) => request,
            _ => return,
        };
        if !self.env.addressed_to_us(request.target_system, request.target_component) {
            return;
        }
        self.handle_request(request.seq);
    }

    fn process_mission_request(&self, frame: &Frame<V2>) {
        let request: MissionRequest = match frame.decode::<Common>() {
            Ok(Common::MissionRequest(request)) => request,
            _ => return,
        };
        if !self.env.addressed_to_us(request.target_system, request.target_component) {
            return;
        }

        // ArduPilot asks with the legacy message but accepts int items in reply.
        if self.env.context().autopilot() == Autopilot::ArduPilot {
            self.handle_request(request.seq);
            return;
        }

        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.is_done() {
                return;
            }
            let sent = self.env.send_ack_to(
                frame.system_id(),
                frame.component_id(),
                mission_result::UNSUPPORTED,
            );
            if sent {
                self.env.refresh_timeout(state.cookie);
            } else {
                self.finish(&mut state, &mut effects, Err(MissionError::ConnectionError));
            }
        }
        effects.apply(self.progress.as_ref());
    }

    fn handle_request(&self, seq: u16) {
        let seq = seq as usize;
        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.is_done() {
                return;
            }

            state.step = Step::SendItems;

            if seq == state.next_sequence {
                state.retries_done = 0;
            } else if seq + 1 == state.next_sequence {
                if state.retries_done >= self.env.retries() {
                    log::warn!(
                        "[#{}] mission item {seq} requested too often",
                        self.env.system_id()
                    );
                    self.finish(&mut state, &mut effects, Err(MissionError::Timeout));
                    drop(state);
                    effects.apply(self.progress.as_ref());
                    return;
                }
            } else {
                log::warn!(
                    "[#{}] ignoring request for mission item {seq}, expected {}",
                    self.env.system_id(),
                    state.next_sequence
                );
                return;
            }

            self.env.refresh_timeout(state.cookie);
            state.next_sequence = seq;
            // The final ack counts as one more step.
            effects.progress((seq + 1) as f32 / (self.items.len() + 1) as f32);
            self.send_mission_item(&mut state, &mut effects);
        }
        effects.apply(self.progress.as_ref());
    }

    fn process_mission_ack(&self, frame: &Frame<V2>) {
        let ack: MissionAck = match frame.decode::<Common>() {
            Ok(Common::MissionAck(ack)) => ack,
            _ => return,
        };
        if !self.env.addressed_to_us(ack.target_system, ack.target_component) {
            return;
        }

        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.is_done() {
                return;
            }

            let result = match result_from_ack(ack.type_ as u8) {
                Ok(()) if state.next_sequence == self.items.len() => {
                    effects.progress(1.0);
                    Ok(())
                }
                Ok(()) => {
                    log::warn!(
                        "[#{}] mission accepted after {} of {} items",
                        self.env.system_id(),
                        state.next_sequence,
                        self.items.len()
                    );
                    Err(MissionError::ProtocolError)
                }
                Err(err) => Err(err),
            };
            self.finish(&mut state, &mut effects, result);
        }
        effects.apply(self.progress.as_ref());
    }

    fn process_timeout(&self) {
        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            state.cookie = None;
            if self.env.is_done() {
                return;
            }

            if state.retries_done >= self.env.retries() {
                log::warn!("[#{}] mission upload: retries exceeded", self.env.system_id());
                self.finish(&mut state, &mut effects, Err(MissionError::Timeout));
            } else {
                state.cookie = Some(self.env.add_timeout(&self.this, Self::process_timeout));
                match state.step {
                    Step::SendCount => self.send_count(&mut state, &mut effects),
                    // Waiting for the remote to request items, give it more time.
                    Step::SendItems => state.retries_done += 1,
                }
            }
        }
        effects.apply(self.progress.as_ref());
    }
}

impl TransferWork for UploadWork {
    fn start(self: Arc<Self>) {
        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.has_started() || self.env.is_done() {
                return;
            }
            self.env.mark_started();

            self.env.register(ids::MISSION_REQUEST, &self.this, Self::process_mission_request);
            self.env.register(
                ids::MISSION_REQUEST_INT,
                &self.this,
                Self::process_mission_request_int,
            );
            self.env.register(ids::MISSION_ACK, &self.this, Self::process_mission_ack);

            effects.progress(0.0);
            state.retries_done = 0;
            state.step = Step::SendCount;
            state.next_sequence = 0;
            state.cookie = Some(self.env.add_timeout(&self.this, Self::process_timeout));
            self.send_count(&mut state, &mut effects);
        }
        effects.apply(self.progress.as_ref());
    }

    fn cancel(&self) {
        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.is_done() {
                return;
            }
            self.env.remove_timeout(&mut state.cookie);

            let result = if !self.env.has_started()
                || self.env.send_ack(mission_result::OPERATION_CANCELLED)
            {
                Err(MissionError::Cancelled)
            } else {
                Err(MissionError::ConnectionError)
            };
            self.finish(&mut state, &mut effects, result);
        }
        effects.apply(self.progress.as_ref());
    }

    fn abort(&self) {
        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.is_done() {
                return;
            }
            self.finish(&mut state, &mut effects, Err(MissionError::ConnectionError));
        }
        effects.apply(self.progress.as_ref());
    }

    fn has_started(&self) -> bool {
        self.env.has_started()
    }

    fn is_done(&self) -> bool {
        self.env.is_done()
    }
}

impl Drop for UploadWork {
    fn drop(&mut self) {
        let mut state = self.lock();
        self.env.remove_timeout(&mut state.cookie);
    }
}
