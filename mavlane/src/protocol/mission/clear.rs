use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mavio::dialects::common::messages::{MissionAck, MissionClearAll};
use mavio::dialects::Common;
use mavio::protocol::V2;
use mavio::Frame;

use crate::consts::AUTOPILOT_COMPONENT_ID;
use crate::protocol::messages::{ids, mav_mission_type, mission_result};
use crate::protocol::mission::result::result_from_ack;
use crate::protocol::mission::work::{Effects, TransferEnv, TransferWork};
use crate::protocol::mission::{MissionError, MissionResult};
use crate::protocol::Completion;
use crate::sync::scheduling::TimeoutCookie;
use crate::system::SystemContext;

struct ClearState {
    retries_done: usize,
    cookie: Option<TimeoutCookie>,
    callback: Option<Completion<MissionResult<()>>>,
}

/// Clear: `MISSION_CLEAR_ALL` until acknowledged.
pub(crate) struct ClearWork {
    env: TransferEnv,
    this: Weak<ClearWork>,
    state: Mutex<ClearState>,
}

impl ClearWork {
    pub(crate) fn new(
        context: Arc<SystemContext>,
        mission_type: u8,
        callback: Completion<MissionResult<()>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            env: TransferEnv::new(context, mission_type),
            this: this.clone(),
            state: Mutex::new(ClearState {
                retries_done: 0,
                cookie: None,
                callback: Some(callback),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ClearState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn finish(
        &self,
        state: &mut ClearState,
        effects: &mut Effects<MissionResult<()>>,
        result: MissionResult<()>,
    ) {
        self.env.remove_timeout(&mut state.cookie);
        log::debug!("[#{}] mission clear finished: {result:?}", self.env.system_id());
        effects.finish(&self.env, &mut state.callback, result);
    }

    fn send_clear(&self, state: &mut ClearState, effects: &mut Effects<MissionResult<()>>) {
        let sent = match mav_mission_type(self.env.mission_type()) {
            Ok(mission_type) => self.env.context().send_message(&MissionClearAll {
                target_system: self.env.system_id(),
                target_component: AUTOPILOT_COMPONENT_ID,
                mission_type,
            }),
            Err(_) => false,
        };
        if !sent {
            return self.finish(state, effects, Err(MissionError::ConnectionError));
        }
        state.retries_done += 1;
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
            self.finish(&mut state, &mut effects, result_from_ack(ack.type_ as u8));
        }
        effects.apply(None);
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
                log::warn!("[#{}] mission clear: retries exceeded", self.env.system_id());
                self.finish(&mut state, &mut effects, Err(MissionError::Timeout));
            } else {
                state.cookie = Some(self.env.add_timeout(&self.this, Self::process_timeout));
                self.send_clear(&mut state, &mut effects);
            }
        }
        effects.apply(None);
    }
}

impl TransferWork for ClearWork {
    fn start(self: Arc<Self>) {
        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.has_started() || self.env.is_done() {
                return;
            }
            self.env.mark_started();

            self.env.register(ids::MISSION_ACK, &self.this, Self::process_mission_ack);

            state.retries_done = 0;
            state.cookie = Some(self.env.add_timeout(&self.this, Self::process_timeout));
            self.send_clear(&mut state, &mut effects);
        }
        effects.apply(None);
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
        effects.apply(None);
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
        effects.apply(None);
    }

    fn has_started(&self) -> bool {
        self.env.has_started()
    }

    fn is_done(&self) -> bool {
        self.env.is_done()
    }
}

impl Drop for ClearWork {
    fn drop(&mut self) {
        let mut state = self.lock();
        self.env.remove_timeout(&mut state.cookie);
    }
}
