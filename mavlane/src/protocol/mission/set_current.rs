use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mavio::dialects::common::messages::{MissionCurrent, MissionSetCurrent};
use mavio::dialects::Common;
use mavio::protocol::V2;
use mavio::Frame;

use crate::consts::AUTOPILOT_COMPONENT_ID;
use crate::protocol::messages::{ids, mission_result, mission_type};
use crate::protocol::mission::work::{Effects, TransferEnv, TransferWork};
use crate::protocol::mission::{MissionError, MissionResult};
use crate::protocol::Completion;
use crate::sync::scheduling::TimeoutCookie;
use crate::system::SystemContext;

struct SetCurrentState {
    retries_done: usize,
    cookie: Option<TimeoutCookie>,
    callback: Option<Completion<MissionResult<()>>>,
}

/// Set current: `MISSION_SET_CURRENT` until `MISSION_CURRENT` reports the requested index.
pub(crate) struct SetCurrentWork {
    env: TransferEnv,
    this: Weak<SetCurrentWork>,
    current: u16,
    state: Mutex<SetCurrentState>,
}

impl SetCurrentWork {
    pub(crate) fn new(
        context: Arc<SystemContext>,
        current: u16,
        callback: Completion<MissionResult<()>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            env: TransferEnv::new(context, mission_type::MISSION),
            this: this.clone(),
            current,
            state: Mutex::new(SetCurrentState {
                retries_done: 0,
                cookie: None,
                callback: Some(callback),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SetCurrentState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn finish(
        &self,
        state: &mut SetCurrentState,
        effects: &mut Effects<MissionResult<()>>,
        result: MissionResult<()>,
    ) {
        self.env.remove_timeout(&mut state.cookie);
        log::debug!("[#{}] set current item finished: {result:?}", self.env.system_id());
        effects.finish(&self.env, &mut state.callback, result);
    }

    fn send_set_current(
        &self,
        state: &mut SetCurrentState,
        effects: &mut Effects<MissionResult<()>>,
    ) {
        let sent = self.env.context().send_message(&MissionSetCurrent {
            target_system: self.env.system_id(),
            target_component: AUTOPILOT_COMPONENT_ID,
            seq: self.current,
        });
        if !sent {
            return self.finish(state, effects, Err(MissionError::ConnectionError));
        }
        state.retries_done += 1;
    }

    fn process_mission_current(&self, frame: &Frame<V2>) {
        let current: MissionCurrent = match frame.decode::<Common>() {
            Ok(Common::MissionCurrent(current)) => current,
            _ => return,
        };

        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.is_done() {
                return;
            }

            if current.seq == self.current {
                self.finish(&mut state, &mut effects, Ok(()));
            } else if state.retries_done >= self.env.retries() {
                log::warn!(
                    "[#{}] current item is {}, gave up setting {}",
                    self.env.system_id(),
                    current.seq,
                    self.current
                );
                self.finish(&mut state, &mut effects, Err(MissionError::Timeout));
            } else {
                self.env.refresh_timeout(state.cookie);
                self.send_set_current(&mut state, &mut effects);
            }
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
                log::warn!("[#{}] set current item: retries exceeded", self.env.system_id());
                self.finish(&mut state, &mut effects, Err(MissionError::Timeout));
            } else {
                state.cookie = Some(self.env.add_timeout(&self.this, Self::process_timeout));
                self.send_set_current(&mut state, &mut effects);
            }
        }
        effects.apply(None);
    }
}

impl TransferWork for SetCurrentWork {
    fn start(self: Arc<Self>) {
        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.has_started() || self.env.is_done() {
                return;
            }
            self.env.mark_started();

            self.env.register(ids::MISSION_CURRENT, &self.this, Self::process_mission_current);

            state.retries_done = 0;
            state.cookie = Some(self.env.add_timeout(&self.this, Self::process_timeout));
            self.send_set_current(&mut state, &mut effects);
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

impl Drop for SetCurrentWork {
    fn drop(&mut self) {
        let mut state = self.lock();
        self.env.remove_timeout(&mut state.cookie);
    }
}
