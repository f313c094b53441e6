use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mavio::dialects::common::messages::{
    MissionCount, MissionItemInt, MissionRequestInt, MissionRequestList,
};
use mavio::dialects::Common;
use mavio::protocol::V2;
use mavio::Frame;

use crate::consts::AUTOPILOT_COMPONENT_ID;
use crate::protocol::messages::{ids, mav_mission_type, mission_result};
use crate::protocol::mission::work::{Effects, TransferEnv, TransferWork};
use crate::protocol::mission::{MissionError, MissionItem, MissionResult};
use crate::protocol::{Completion, ProgressCallback};
use crate::sync::scheduling::TimeoutCookie;
use crate::system::SystemContext;

type DownloadResult = MissionResult<Vec<MissionItem>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    RequestList,
    RequestItem,
}

struct DownloadState {
    step: Step,
    next_sequence: u16,
    expected_count: u16,
    retries_done: usize,
    items: Vec<MissionItem>,
    cookie: Option<TimeoutCookie>,
    callback: Option<Completion<DownloadResult>>,
}

/// Download: `MISSION_REQUEST_LIST`, then one `MISSION_REQUEST_INT` per item, then the ack.
pub(crate) struct DownloadWork {
    env: TransferEnv,
    this: Weak<DownloadWork>,
    progress: Option<ProgressCallback>,
    state: Mutex<DownloadState>,
}

impl DownloadWork {
    pub(crate) fn new(
        context: Arc<SystemContext>,
        mission_type: u8,
        callback: Completion<DownloadResult>,
        progress: Option<ProgressCallback>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            env: TransferEnv::new(context, mission_type),
            this: this.clone(),
            progress,
            state: Mutex::new(DownloadState {
                step: Step::RequestList,
                next_sequence: 0,
                expected_count: 0,
                retries_done: 0,
                items: Vec::new(),
                cookie: None,
                callback: Some(callback),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DownloadState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn finish(
        &self,
        state: &mut DownloadState,
        effects: &mut Effects<DownloadResult>,
        result: DownloadResult,
    ) {
        self.env.remove_timeout(&mut state.cookie);
        log::debug!(
            "[#{}] mission download finished: {:?}",
            self.env.system_id(),
            result.as_ref().map(Vec::len)
        );
        effects.finish(&self.env, &mut state.callback, result);
    }

    fn request_list(&self, state: &mut DownloadState, effects: &mut Effects<DownloadResult>) {
        let sent = match mav_mission_type(self.env.mission_type()) {
            Ok(mission_type) => self.env.context().send_message(&MissionRequestList {
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

    fn request_item(&self, state: &mut DownloadState, effects: &mut Effects<DownloadResult>) {
        let sent = match mav_mission_type(self.env.mission_type()) {
            Ok(mission_type) => self.env.context().send_message(&MissionRequestInt {
                target_system: self.env.system_id(),
                target_component: AUTOPILOT_COMPONENT_ID,
                seq: state.next_sequence,
                mission_type,
            }),
            Err(_) => false,
        };
        if !sent {
            return self.finish(state, effects, Err(MissionError::ConnectionError));
        }
        state.retries_done += 1;
    }

    fn send_ack_and_finish(
        &self,
        state: &mut DownloadState,
        effects: &mut Effects<DownloadResult>,
    ) {
        let result = if self.env.send_ack(mission_result::ACCEPTED) {
            Ok(std::mem::take(&mut state.items))
        } else {
            Err(MissionError::ConnectionError)
        };
        self.finish(state, effects, result);
    }

    fn process_mission_count(&self, frame: &Frame<V2>) {
        let count: MissionCount = match frame.decode::<Common>() {
            Ok(Common::MissionCount(count)) => count,
            _ => return,
        };
        if !self.env.addressed_to_us(count.target_system, count.target_component) {
            return;
        }

        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.is_done() || state.step != Step::RequestList {
                return;
            }

            if count.count == 0 {
                self.send_ack_and_finish(&mut state, &mut effects);
            } else {
                self.env.refresh_timeout(state.cookie);
                state.step = Step::RequestItem;
                state.next_sequence = 0;
                state.retries_done = 0;
                state.expected_count = count.count;
                self.request_item(&mut state, &mut effects);
            }
        }
        effects.apply(self.progress.as_ref());
    }

    fn process_mission_item_int(&self, frame: &Frame<V2>) {
        let item: MissionItemInt = match frame.decode::<Common>() {
            Ok(Common::MissionItemInt(item)) => item,
            _ => return,
        };
        if !self.env.addressed_to_us(item.target_system, item.target_component) {
            return;
        }

        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.is_done() || state.step != Step::RequestItem {
                return;
            }
            self.env.refresh_timeout(state.cookie);

            if item.seq != state.next_sequence {
                log::debug!(
                    "[#{}] ignoring mission item {}, expected {}",
                    self.env.system_id(),
                    item.seq,
                    state.next_sequence
                );
                return;
            }

            state.items.push(MissionItem::from_message(&item));

            if state.next_sequence + 1 == state.expected_count {
                effects.progress(1.0);
                self.send_ack_and_finish(&mut state, &mut effects);
            } else {
                state.next_sequence += 1;
                state.retries_done = 0;
                effects.progress(state.next_sequence as f32 / state.expected_count as f32);
                self.request_item(&mut state, &mut effects);
            }
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
                log::warn!("[#{}] mission download: retries exceeded", self.env.system_id());
                self.finish(&mut state, &mut effects, Err(MissionError::Timeout));
            } else {
                state.cookie = Some(self.env.add_timeout(&self.this, Self::process_timeout));
                match state.step {
                    Step::RequestList => self.request_list(&mut state, &mut effects),
                    Step::RequestItem => self.request_item(&mut state, &mut effects),
                }
            }
        }
        effects.apply(self.progress.as_ref());
    }
}

impl TransferWork for DownloadWork {
    fn start(self: Arc<Self>) {
        let mut effects = Effects::new();
        {
            let mut state = self.lock();
            if self.env.has_started() || self.env.is_done() {
                return;
            }
            self.env.mark_started();

            self.env.register(ids::MISSION_COUNT, &self.this, Self::process_mission_count);
            self.env.register(ids::MISSION_ITEM_INT, &self.this, Self::process_mission_item_int);

            effects.progress(0.0);
            state.items.clear();
            state.retries_done = 0;
            state.cookie = Some(self.env.add_timeout(&self.this, Self::process_timeout));
            self.request_list(&mut state, &mut effects);
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

impl Drop for DownloadWork {
    fn drop(&mut self) {
        let mut state = self.lock();
        self.env.remove_timeout(&mut state.cookie);
    }
}
