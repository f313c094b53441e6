use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, Weak};

use mavio::dialects::common::messages::{
    ParamExtAck, ParamExtRequestRead, ParamExtSet, ParamExtValue, ParamRequestList,
    ParamRequestRead, ParamSet, ParamValue as ParamValueMessage,
};
use mavio::dialects::Common;
use mavio::protocol::V2;
use mavio::Frame;

use crate::consts::{AUTOPILOT_COMPONENT_ID, CAMERA_COMPONENT_ID, PARAM_ID_LEN};
use crate::protocol::messages::{
    ids, mav_param_ext_type, mav_param_type, param_ack, param_id_matches, param_id_to_bytes,
    param_id_to_string,
};
use crate::protocol::params::{ParamError, ParamResult, ParamType, ParamValue};
use crate::protocol::Completion;
use crate::sync::scheduling::TimeoutCookie;
use crate::sync::utils::WorkQueue;
use crate::system::{OwnerToken, SystemContext};

/// Receives every new value of a subscribed parameter.
pub type ParamChangedCallback = Arc<dyn Fn(ParamValue) + Send + Sync>;

/// All parameters of a remote, by name.
pub type ParamList = BTreeMap<String, ParamValue>;

type CacheKey = (bool, String);

enum ParamRequest {
    Get {
        expected: Option<ParamType>,
        callback: Option<Completion<ParamResult<ParamValue>>>,
    },
    Set {
        value: ParamValue,
        callback: Option<Completion<ParamResult<()>>>,
    },
}

struct ParamWork {
    id: u64,
    name: String,
    extended: bool,
    request: ParamRequest,
    owner: Option<OwnerToken>,
    attempts_left: usize,
    already_sent: bool,
    timeout_cookie: Option<TimeoutCookie>,
}

struct ParamListRequest {
    values: ParamList,
    callback: Completion<ParamResult<ParamList>>,
    timeout_cookie: Option<TimeoutCookie>,
}

struct ParamSubscription {
    name: String,
    expected: Option<ParamType>,
    owner: OwnerToken,
    callback: ParamChangedCallback,
}

enum Outcome {
    Got(ParamValue),
    Set,
    Failed(ParamError),
}

impl ParamWork {
    fn is_pending_get(&self) -> bool {
        matches!(self.request, ParamRequest::Get { .. }) && !self.already_sent
    }

    fn finish(self, outcome: Outcome) {
        match (self.request, outcome) {
            (ParamRequest::Get { callback, .. }, Outcome::Got(value)) => {
                if let Some(callback) = callback {
                    callback.complete(Ok(value));
                }
            }
            (ParamRequest::Set { callback, .. }, Outcome::Set) => {
                if let Some(callback) = callback {
                    callback.complete(Ok(()));
                }
            }
            (ParamRequest::Get { callback, .. }, outcome) => {
                if let Some(callback) = callback {
                    callback.complete(Err(outcome.error()));
                }
            }
            (ParamRequest::Set { callback, .. }, outcome) => {
                if let Some(callback) = callback {
                    callback.complete(Err(outcome.error()));
                }
            }
        }
    }
}

impl Outcome {
    fn error(&self) -> ParamError {
        match self {
            Outcome::Failed(err) => *err,
            _ => ParamError::Failed,
        }
    }
}

/// Parameter protocol of one remote system.
///
/// One request is in flight at a time. Sets jump ahead of gets that were not sent yet. Every get
/// goes to the remote. Values from successful gets, sets and parameter lists are recorded per
/// protocol and can be read back with [`ParamSender::cached_param`].
///
/// A parameter list request (`PARAM_REQUEST_LIST`) runs alongside the queue, and at most one of
/// them is active at a time.
pub struct ParamSender {
    context: Arc<SystemContext>,
    this: Weak<ParamSender>,
    queue: WorkQueue<ParamWork>,
    cache: Mutex<HashMap<CacheKey, ParamValue>>,
    list_request: Mutex<Option<ParamListRequest>>,
    subscriptions: Mutex<Vec<ParamSubscription>>,
    owner: OwnerToken,
    next_id: AtomicU64,
}

impl ParamSender {
    pub(crate) fn new(context: Arc<SystemContext>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<ParamSender>| {
            let owner = OwnerToken::new();

            let handler = this.clone();
            context.handlers().register(
                ids::PARAM_VALUE,
                Arc::new(move |frame| {
                    if let Some(sender) = handler.upgrade() {
                        sender.process_param_value(frame);
                    }
                }),
                owner,
            );
            let handler = this.clone();
            context.handlers().register(
                ids::PARAM_EXT_VALUE,
                Arc::new(move |frame| {
                    if let Some(sender) = handler.upgrade() {
                        sender.process_param_ext_value(frame);
                    }
                }),
                owner,
            );
            let handler = this.clone();
            context.handlers().register(
                ids::PARAM_EXT_ACK,
                Arc::new(move |frame| {
                    if let Some(sender) = handler.upgrade() {
                        sender.process_param_ext_ack(frame);
                    }
                }),
                owner,
            );

            Self {
                context,
                this: this.clone(),
                queue: WorkQueue::new(),
                cache: Mutex::new(HashMap::new()),
                list_request: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                owner,
                next_id: AtomicU64::new(0),
            }
        })
    }

    /// Requests a parameter.
    ///
    /// When `expected` is set, a value of another type fails with [`ParamError::WrongType`].
    /// Requests queued with an `owner` can be dropped with [`ParamSender::cancel_all_param`].
    pub fn get_param_async(
        &self,
        name: &str,
        expected: Option<ParamType>,
        extended: bool,
        owner: Option<OwnerToken>,
        callback: Completion<ParamResult<ParamValue>>,
    ) {
        if name.len() > PARAM_ID_LEN {
            log::warn!("[#{}] parameter name too long: {name}", self.context.system_id());
            callback.complete(Err(ParamError::NameTooLong));
            return;
        }

        self.queue.push_back(ParamWork {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            extended,
            request: ParamRequest::Get {
                expected,
                callback: Some(callback),
            },
            owner,
            attempts_left: self.context.conf().param_retries().max(1),
            already_sent: false,
            timeout_cookie: None,
        });
    }

    /// Sets a parameter.
    ///
    /// The standard protocol only carries values up to four bytes wide, others fail with
    /// [`ParamError::ValueUnsupported`].
    pub fn set_param_async(
        &self,
        name: &str,
        value: ParamValue,
        extended: bool,
        owner: Option<OwnerToken>,
        callback: Completion<ParamResult<()>>,
    ) {
        if name.len() > PARAM_ID_LEN {
            log::warn!("[#{}] parameter name too long: {name}", self.context.system_id());
            callback.complete(Err(ParamError::NameTooLong));
            return;
        }

        let encodable = if extended {
            value.to_ext().is_some()
        } else {
            value.to_standard().is_some()
        };
        if !encodable {
            callback.complete(Err(ParamError::ValueUnsupported));
            return;
        }

        let work = ParamWork {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            extended,
            request: ParamRequest::Set {
                value,
                callback: Some(callback),
            },
            owner,
            attempts_left: self.context.conf().param_retries().max(1),
            already_sent: false,
            timeout_cookie: None,
        };

        let mut guard = self.queue.guard();
        match guard.position(ParamWork::is_pending_get) {
            Some(index) => guard.insert(index, work),
            None => guard.push_back(work),
        }
    }

    /// Requests a parameter and blocks until the result arrives.
    pub fn get_param(
        &self,
        name: &str,
        expected: Option<ParamType>,
        extended: bool,
    ) -> ParamResult<ParamValue> {
        let (tx, rx) = mpsc::channel();
        self.get_param_async(
            name,
            expected,
            extended,
            None,
            Completion::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.recv().unwrap_or(Err(ParamError::ConnectionError))
    }

    /// Sets a parameter and blocks until the result arrives.
    pub fn set_param(&self, name: &str, value: ParamValue, extended: bool) -> ParamResult<()> {
        let (tx, rx) = mpsc::channel();
        self.set_param_async(
            name,
            value,
            extended,
            None,
            Completion::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.recv().unwrap_or(Err(ParamError::ConnectionError))
    }

    /// Requests the whole parameter list of the autopilot.
    ///
    /// Completes with every value received once the remote sends the last entry of the list, or
    /// with [`ParamError::Timeout`] when the remote pauses for longer than the request timeout.
    /// Fails with [`ParamError::Busy`] while another list request is active.
    pub fn get_all_params_async(&self, callback: Completion<ParamResult<ParamList>>) {
        let mut list_request = self.list_request();
        if list_request.is_some() {
            drop(list_request);
            callback.complete(Err(ParamError::Busy));
            return;
        }

        let sent = self.context.send_message(&ParamRequestList {
            target_system: self.context.system_id(),
            target_component: AUTOPILOT_COMPONENT_ID,
        });
        if !sent {
            drop(list_request);
            log::warn!("[#{}] parameter list request not sent", self.context.system_id());
            callback.complete(Err(ParamError::ConnectionError));
            return;
        }

        *list_request = Some(ParamListRequest {
            values: ParamList::new(),
            callback,
            timeout_cookie: Some(self.add_list_timeout()),
        });
    }

    /// Requests the whole parameter list and blocks until it is collected.
    pub fn get_all_params(&self) -> ParamResult<ParamList> {
        let (tx, rx) = mpsc::channel();
        self.get_all_params_async(Completion::new(move |result| {
            let _ = tx.send(result);
        }));
        rx.recv().unwrap_or(Err(ParamError::ConnectionError))
    }

    /// Drops every request queued by `owner`, including one in flight.
    ///
    /// Dropped requests don't call their callbacks. Returns the number of dropped requests.
    pub fn cancel_all_param(&self, owner: OwnerToken) -> usize {
        let cancelled = self
            .queue
            .guard()
            .drain_matching(|work| work.owner == Some(owner));

        for work in &cancelled {
            if let Some(cookie) = work.timeout_cookie {
                self.context.timeouts().remove(cookie);
            }
        }
        if !cancelled.is_empty() {
            log::debug!(
                "[#{}] cancelled {} parameter requests",
                self.context.system_id(),
                cancelled.len()
            );
        }
        cancelled.len()
    }

    /// Calls `callback` with every `PARAM_VALUE` received for `name`.
    ///
    /// When `expected` is set, values of another type are skipped.
    pub fn subscribe_param_changed<F>(
        &self,
        name: &str,
        expected: Option<ParamType>,
        owner: OwnerToken,
        callback: F,
    ) where
        F: Fn(ParamValue) + Send + Sync + 'static,
    {
        self.subscriptions().push(ParamSubscription {
            name: name.to_string(),
            expected,
            owner,
            callback: Arc::new(callback),
        });
    }

    /// Removes subscriptions of `owner` to `name`.
    pub fn unsubscribe_param_changed(&self, name: &str, owner: OwnerToken) {
        self.subscriptions()
            .retain(|subscription| subscription.name != name || subscription.owner != owner);
    }

    /// Last value seen for a parameter through the standard or the extended protocol.
    pub fn cached_param(&self, name: &str, extended: bool) -> Option<ParamValue> {
        self.cache().get(&(extended, name.to_string())).cloned()
    }

    /// Forgets every cached value.
    pub fn reset_param_cache(&self) {
        self.cache().clear();
    }

    /// Number of queued requests, including the one in flight.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Sends the front request if it was not sent yet.
    pub(crate) fn do_work(&self) {
        let failed = {
            let mut guard = self.queue.guard();
            let work = match guard.front_mut() {
                Some(work) if !work.already_sent => work,
                _ => return,
            };

            if self.transmit(work) {
                work.already_sent = true;
                work.attempts_left -= 1;
                work.timeout_cookie = Some(self.add_timeout(work.id));
                None
            } else {
                guard.pop_front()
            }
        };

        if let Some(work) = failed {
            log::warn!("[#{}] parameter {} request not sent", self.context.system_id(), work.name);
            work.finish(Outcome::Failed(ParamError::ConnectionError));
        }
    }

    fn process_param_value(&self, frame: &Frame<V2>) {
        let message: ParamValueMessage = match frame.decode::<Common>() {
            Ok(Common::ParamValue(message)) => message,
            _ => return,
        };
        let param_type = ParamType::from_mav(message.param_type as u8);
        let value = param_type.and_then(|t| ParamValue::from_standard(message.param_value, t));

        if let Some(value) = &value {
            let name = param_id_to_string(&message.param_id);
            self.collect_list_entry(&name, value, message.param_index, message.param_count);
            self.notify_param_changed(&name, value);
        }

        self.finish_front(&message.param_id, false, |work| match &work.request {
            ParamRequest::Get { expected, .. } => {
                Some(match value.clone() {
                    Some(value) => check_type(*expected, value),
                    None => Outcome::Failed(ParamError::ValueUnsupported),
                })
            }
            ParamRequest::Set { .. } => Some(Outcome::Set),
        });
    }

    fn process_param_ext_value(&self, frame: &Frame<V2>) {
        let message: ParamExtValue = match frame.decode::<Common>() {
            Ok(Common::ParamExtValue(message)) => message,
            _ => return,
        };
        let param_type = ParamType::from_mav(message.param_type as u8);
        let system_id = self.context.system_id();

        self.finish_front(&message.param_id, true, |work| match &work.request {
            ParamRequest::Get { expected, .. } => Some(match param_type {
                Some(param_type) => {
                    check_type(*expected, ParamValue::from_ext(&message.param_value, param_type))
                }
                None => Outcome::Failed(ParamError::ValueUnsupported),
            }),
            ParamRequest::Set { .. } => {
                log::warn!("[#{system_id}] unexpected PARAM_EXT_VALUE for {}", work.name);
                None
            }
        });
    }

    fn process_param_ext_ack(&self, frame: &Frame<V2>) {
        let message: ParamExtAck = match frame.decode::<Common>() {
            Ok(Common::ParamExtAck(message)) => message,
            _ => return,
        };
        let result = message.param_result as u8;
        let system_id = self.context.system_id();
        let timeouts = self.context.timeouts();

        self.finish_front(&message.param_id, true, |work| match &work.request {
            ParamRequest::Get { .. } => {
                log::warn!("[#{system_id}] unexpected PARAM_EXT_ACK for {}", work.name);
                None
            }
            ParamRequest::Set { .. } => match result {
                param_ack::ACCEPTED => Some(Outcome::Set),
                param_ack::IN_PROGRESS => {
                    if let Some(cookie) = work.timeout_cookie {
                        timeouts.refresh(cookie);
                    }
                    None
                }
                param_ack::VALUE_UNSUPPORTED => Some(Outcome::Failed(ParamError::ValueUnsupported)),
                _ => Some(Outcome::Failed(ParamError::Failed)),
            },
        });
    }

    /// Matches a response against the front request and completes it if `decide` says so.
    fn finish_front<F>(&self, param_id: &[u8; PARAM_ID_LEN], extended: bool, decide: F)
    where
        F: FnOnce(&ParamWork) -> Option<Outcome>,
    {
        let finished = {
            let mut guard = self.queue.guard();
            let outcome = match guard.front() {
                Some(work)
                    if work.already_sent
                        && work.extended == extended
                        && param_id_matches(param_id, &work.name) =>
                {
                    match decide(work) {
                        Some(outcome) => outcome,
                        None => return,
                    }
                }
                _ => return,
            };

            match guard.pop_front() {
                Some(work) => (work, outcome),
                None => return,
            }
        };

        let (work, outcome) = finished;
        if let Some(cookie) = work.timeout_cookie {
            self.context.timeouts().remove(cookie);
        }

        match (&work.request, &outcome) {
            (_, Outcome::Got(value)) => {
                self.cache()
                    .insert((work.extended, work.name.clone()), value.clone());
            }
            (ParamRequest::Set { value, .. }, Outcome::Set) => {
                self.cache()
                    .insert((work.extended, work.name.clone()), value.clone());
            }
            _ => {}
        }

        log::debug!(
            "[#{}] parameter {} request finished",
            self.context.system_id(),
            work.name
        );
        work.finish(outcome);
    }

    fn collect_list_entry(&self, name: &str, value: &ParamValue, index: u16, count: u16) {
        let finished = {
            let mut list_request = self.list_request();
            let request = match list_request.as_mut() {
                Some(request) => request,
                None => return,
            };
            request.values.insert(name.to_string(), value.clone());
            self.cache().insert((false, name.to_string()), value.clone());

            if u32::from(index) + 1 == u32::from(count) {
                list_request.take()
            } else {
                if let Some(cookie) = request.timeout_cookie {
                    self.context.timeouts().refresh(cookie);
                }
                None
            }
        };

        if let Some(request) = finished {
            if let Some(cookie) = request.timeout_cookie {
                self.context.timeouts().remove(cookie);
            }
            log::debug!(
                "[#{}] received {} parameters",
                self.context.system_id(),
                request.values.len()
            );
            request.callback.complete(Ok(request.values));
        }
    }

    fn notify_param_changed(&self, name: &str, value: &ParamValue) {
        let system_id = self.context.system_id();
        let callbacks: Vec<ParamChangedCallback> = self
            .subscriptions()
            .iter()
            .filter(|subscription| subscription.name == name)
            .filter(|subscription| match subscription.expected {
                Some(param_type) if param_type != value.param_type() => {
                    log::warn!("[#{system_id}] parameter {name} has unexpected type");
                    false
                }
                _ => true,
            })
            .map(|subscription| subscription.callback.clone())
            .collect();

        for callback in callbacks {
            callback(value.clone());
        }
    }

    fn receive_list_timeout(&self) {
        let request = self.list_request().take();
        if let Some(request) = request {
            log::warn!(
                "[#{}] parameter list timed out after {} values",
                self.context.system_id(),
                request.values.len()
            );
            request.callback.complete(Err(ParamError::Timeout));
        }
    }

    fn add_list_timeout(&self) -> TimeoutCookie {
        let this = self.this.clone();
        self.context.timeouts().add(
            move || {
                if let Some(sender) = this.upgrade() {
                    sender.receive_list_timeout();
                }
            },
            self.context.timeout(),
        )
    }

    fn receive_timeout(&self, work_id: u64) {
        let failed = {
            let mut guard = self.queue.guard();
            let work = match guard.front_mut() {
                Some(work) if work.id == work_id && work.already_sent => work,
                _ => return,
            };
            work.timeout_cookie = None;

            if work.attempts_left > 0 {
                log::debug!(
                    "[#{}] retrying parameter {} request",
                    self.context.system_id(),
                    work.name
                );
                if self.transmit(work) {
                    work.attempts_left -= 1;
                    work.timeout_cookie = Some(self.add_timeout(work.id));
                    None
                } else {
                    guard
                        .pop_front()
                        .map(|work| (work, ParamError::ConnectionError))
                }
            } else {
                guard.pop_front().map(|work| (work, ParamError::Timeout))
            }
        };

        if let Some((work, err)) = failed {
            log::warn!(
                "[#{}] parameter {} request failed: {err}",
                self.context.system_id(),
                work.name
            );
            work.finish(Outcome::Failed(err));
        }
    }

    fn add_timeout(&self, work_id: u64) -> TimeoutCookie {
        let this = self.this.clone();
        self.context.timeouts().add(
            move || {
                if let Some(sender) = this.upgrade() {
                    sender.receive_timeout(work_id);
                }
            },
            self.context.timeout(),
        )
    }

    fn transmit(&self, work: &ParamWork) -> bool {
        let target_system = self.context.system_id();
        let param_id = param_id_to_bytes(&work.name);

        match (&work.request, work.extended) {
            (ParamRequest::Get { .. }, false) => self.context.send_message(&ParamRequestRead {
                target_system,
                target_component: AUTOPILOT_COMPONENT_ID,
                param_id,
                param_index: -1,
            }),
            (ParamRequest::Get { .. }, true) => self.context.send_message(&ParamExtRequestRead {
                target_system,
                target_component: CAMERA_COMPONENT_ID,
                param_id,
                param_index: -1,
            }),
            (ParamRequest::Set { value, .. }, false) => {
                let (param_value, param_type) = match (
                    value.to_standard(),
                    mav_param_type(value.param_type().to_mav()),
                ) {
                    (Some(param_value), Ok(param_type)) => (param_value, param_type),
                    _ => return false,
                };
                self.context.send_message(&ParamSet {
                    target_system,
                    target_component: AUTOPILOT_COMPONENT_ID,
                    param_id,
                    param_value,
                    param_type,
                })
            }
            (ParamRequest::Set { value, .. }, true) => {
                let (param_value, param_type) = match (
                    value.to_ext(),
                    mav_param_ext_type(value.param_type().to_mav()),
                ) {
                    (Some(param_value), Ok(param_type)) => (param_value, param_type),
                    _ => return false,
                };
                self.context.send_message(&ParamExtSet {
                    target_system,
                    target_component: CAMERA_COMPONENT_ID,
                    param_id,
                    param_value,
                    param_type,
                })
            }
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<CacheKey, ParamValue>> {
        self.cache.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn list_request(&self) -> MutexGuard<'_, Option<ParamListRequest>> {
        self.list_request
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<ParamSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }
}

fn check_type(expected: Option<ParamType>, value: ParamValue) -> Outcome {
    match expected {
        Some(param_type) if param_type != value.param_type() => {
            Outcome::Failed(ParamError::WrongType)
        }
        _ => Outcome::Got(value),
    }
}

impl Drop for ParamSender {
    fn drop(&mut self) {
        self.context.handlers().unregister_all(self.owner);
        let pending: Vec<ParamWork> = self.queue.guard().drain_matching(|_| true);
        for work in pending {
            if let Some(cookie) = work.timeout_cookie {
                self.context.timeouts().remove(cookie);
            }
            work.finish(Outcome::Failed(ParamError::ConnectionError));
        }

        let list_request = self.list_request().take();
        if let Some(request) = list_request {
            if let Some(cookie) = request.timeout_cookie {
                self.context.timeouts().remove(cookie);
            }
            request.callback.complete(Err(ParamError::ConnectionError));
        }
    }
}

impl Debug for ParamSender {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamSender")
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
    use std::time::Duration;

    use crate::protocol::messages::param_ack as ack;
    use crate::test_utils::{
        param_ext_ack_frame, param_ext_value_frame, param_list_entry_frame, param_value_frame,
        Harness,
    };

    type Slot<T> = Arc<Mutex<Option<T>>>;

    fn slot<T: Send + 'static>() -> (Slot<T>, Completion<T>) {
        let slot = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        (slot, Completion::new(move |value| *sink.lock().unwrap() = Some(value)))
    }

    #[test]
    fn get_matches_response_by_name() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();

        params.get_param_async("MIS_TAKEOFF_ALT", Some(ParamType::F32), false, None, callback);
        params.do_work();
        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_READ).len(), 1);

        harness.deliver(&param_value_frame(1, 1, "MIS_TAKEOFF", &ParamValue::F32(1.0)));
        assert!(result.lock().unwrap().is_none());

        harness.deliver(&param_value_frame(1, 1, "MIS_TAKEOFF_ALT", &ParamValue::F32(2.5)));
        assert_eq!(*result.lock().unwrap(), Some(Ok(ParamValue::F32(2.5))));
        assert_eq!(params.cached_param("MIS_TAKEOFF_ALT", false), Some(ParamValue::F32(2.5)));
    }

    #[test]
    fn full_width_name_is_matched() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();

        params.get_param_async("SYSID_MYGCS_LONG", None, false, None, callback);
        params.do_work();
        harness.deliver(&param_value_frame(1, 1, "SYSID_MYGCS_LONG", &ParamValue::I32(255)));

        assert_eq!(*result.lock().unwrap(), Some(Ok(ParamValue::I32(255))));
    }

    #[test]
    fn name_too_long_is_rejected_synchronously() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();

        params.set_param_async("A_NAME_LONGER_THAN_16", ParamValue::I32(1), false, None, callback);
        assert_eq!(*result.lock().unwrap(), Some(Err(ParamError::NameTooLong)));
        assert_eq!(params.pending(), 0);
    }

    #[test]
    fn wrong_type() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();

        params.get_param_async("COM_RC_LOSS_T", Some(ParamType::F32), false, None, callback);
        params.do_work();
        harness.deliver(&param_value_frame(1, 1, "COM_RC_LOSS_T", &ParamValue::I32(3)));

        assert_eq!(*result.lock().unwrap(), Some(Err(ParamError::WrongType)));
    }

    #[test]
    fn sets_jump_ahead_of_queued_gets() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (first, first_callback) = slot();
        let (second, second_callback) = slot();
        let (set, set_callback) = slot();

        params.get_param_async("FIRST", None, false, None, first_callback);
        params.do_work();
        params.get_param_async("SECOND", None, false, None, second_callback);
        params.set_param_async("THIRD", ParamValue::U8(4), false, None, set_callback);

        harness.deliver(&param_value_frame(1, 1, "FIRST", &ParamValue::U8(1)));
        params.do_work();
        let sets = harness.sent_of(ids::PARAM_SET);
        assert_eq!(sets.len(), 1);
        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_READ).len(), 1);

        harness.deliver(&param_value_frame(1, 1, "THIRD", &ParamValue::U8(4)));
        params.do_work();
        harness.deliver(&param_value_frame(1, 1, "SECOND", &ParamValue::U8(2)));

        assert_eq!(*first.lock().unwrap(), Some(Ok(ParamValue::U8(1))));
        assert_eq!(*set.lock().unwrap(), Some(Ok(())));
        assert_eq!(*second.lock().unwrap(), Some(Ok(ParamValue::U8(2))));
    }

    #[test]
    fn retries_then_times_out() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();
        let attempts = harness.context().conf().param_retries();

        params.get_param_async("BAT_CAPACITY", None, false, None, callback);
        for _ in 0..10 {
            params.do_work();
            harness.advance(harness.context().timeout() + Duration::from_millis(1));
        }

        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_READ).len(), attempts);
        assert_eq!(*result.lock().unwrap(), Some(Err(ParamError::Timeout)));
    }

    #[test]
    fn wide_value_needs_extended_protocol() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();

        params.set_param_async("CAM_EV", ParamValue::F64(0.5), false, None, callback);
        assert_eq!(*result.lock().unwrap(), Some(Err(ParamError::ValueUnsupported)));
    }

    #[test]
    fn extended_set_three_way_ack() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();
        let value = ParamValue::Custom("AUTO".into());

        params.set_param_async("CAM_WBMODE", value.clone(), true, None, callback);
        params.do_work();
        let sent = harness.sent_of(ids::PARAM_EXT_SET);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].system_id(), harness.context().own_system_id());

        // In progress keeps the request alive past the original deadline.
        harness.advance(harness.context().timeout() / 2);
        harness.deliver(&param_ext_ack_frame(1, 100, "CAM_WBMODE", &value, ack::IN_PROGRESS));
        harness.advance(harness.context().timeout() * 3 / 4);
        assert_eq!(harness.sent_of(ids::PARAM_EXT_SET).len(), 1);
        assert!(result.lock().unwrap().is_none());

        harness.deliver(&param_ext_ack_frame(1, 100, "CAM_WBMODE", &value, ack::ACCEPTED));
        assert_eq!(*result.lock().unwrap(), Some(Ok(())));
        assert_eq!(params.cached_param("CAM_WBMODE", true), Some(value));
    }

    #[test]
    fn extended_set_rejected() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();
        let value = ParamValue::U32(7);

        params.set_param_async("CAM_MODE", value.clone(), true, None, callback);
        params.do_work();
        harness.deliver(&param_ext_ack_frame(1, 100, "CAM_MODE", &value, ack::FAILED));

        assert_eq!(*result.lock().unwrap(), Some(Err(ParamError::Failed)));
    }

    #[test]
    fn extended_get() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();

        params.get_param_async("CAM_ISO", Some(ParamType::U32), true, None, callback);
        params.do_work();
        assert_eq!(harness.sent_of(ids::PARAM_EXT_REQUEST_READ).len(), 1);

        // Standard responses don't complete extended requests.
        harness.deliver(&param_value_frame(1, 1, "CAM_ISO", &ParamValue::U32(100)));
        assert!(result.lock().unwrap().is_none());

        harness.deliver(&param_ext_value_frame(1, 100, "CAM_ISO", &ParamValue::U32(400)));
        assert_eq!(*result.lock().unwrap(), Some(Ok(ParamValue::U32(400))));
    }

    #[test]
    fn every_get_asks_the_remote() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (set, callback) = slot();

        params.set_param_async("RTL_RETURN_ALT", ParamValue::F32(30.0), false, None, callback);
        params.do_work();
        harness.deliver(&param_value_frame(1, 1, "RTL_RETURN_ALT", &ParamValue::F32(30.0)));
        assert_eq!(*set.lock().unwrap(), Some(Ok(())));
        assert_eq!(
            params.cached_param("RTL_RETURN_ALT", false),
            Some(ParamValue::F32(30.0))
        );

        let (get, callback) = slot();
        params.get_param_async("RTL_RETURN_ALT", None, false, None, callback);
        assert!(get.lock().unwrap().is_none());
        params.do_work();
        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_READ).len(), 1);

        // The remote changed the value in the meantime.
        harness.deliver(&param_value_frame(1, 1, "RTL_RETURN_ALT", &ParamValue::F32(45.0)));
        assert_eq!(*get.lock().unwrap(), Some(Ok(ParamValue::F32(45.0))));
        assert_eq!(
            params.cached_param("RTL_RETURN_ALT", false),
            Some(ParamValue::F32(45.0))
        );

        params.reset_param_cache();
        assert_eq!(params.cached_param("RTL_RETURN_ALT", false), None);
    }

    #[test]
    fn standard_and_extended_values_are_kept_apart() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (standard, callback) = slot();

        params.get_param_async("CAM_ISO", None, false, None, callback);
        params.do_work();
        harness.deliver(&param_value_frame(1, 1, "CAM_ISO", &ParamValue::I32(7)));
        assert_eq!(*standard.lock().unwrap(), Some(Ok(ParamValue::I32(7))));

        let (extended, callback) = slot();
        params.get_param_async("CAM_ISO", None, true, None, callback);
        params.do_work();
        assert_eq!(harness.sent_of(ids::PARAM_EXT_REQUEST_READ).len(), 1);
        assert!(extended.lock().unwrap().is_none());

        harness.deliver(&param_ext_value_frame(1, 100, "CAM_ISO", &ParamValue::U32(400)));
        assert_eq!(*extended.lock().unwrap(), Some(Ok(ParamValue::U32(400))));
        assert_eq!(params.cached_param("CAM_ISO", false), Some(ParamValue::I32(7)));
        assert_eq!(params.cached_param("CAM_ISO", true), Some(ParamValue::U32(400)));
    }

    #[test]
    fn collects_parameter_list() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();

        params.get_all_params_async(callback);
        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_LIST).len(), 1);

        let (busy, busy_callback) = slot();
        params.get_all_params_async(busy_callback);
        assert_eq!(*busy.lock().unwrap(), Some(Err(ParamError::Busy)));
        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_LIST).len(), 1);

        let entries = [
            ("BAT_CAPACITY", ParamValue::F32(5000.0)),
            ("COM_RC_LOSS_T", ParamValue::F32(0.5)),
            ("SYS_AUTOSTART", ParamValue::I32(4001)),
        ];
        for (index, (name, value)) in entries.iter().enumerate() {
            // Gaps between entries shorter than the timeout keep the request alive.
            harness.advance(harness.context().timeout() * 3 / 4);
            assert!(result.lock().unwrap().is_none());
            harness.deliver(&param_list_entry_frame(1, 1, name, value, index as u16, 3));
        }

        let expected: ParamList = entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        assert_eq!(*result.lock().unwrap(), Some(Ok(expected)));
        assert_eq!(
            params.cached_param("SYS_AUTOSTART", false),
            Some(ParamValue::I32(4001))
        );
    }

    #[test]
    fn parameter_list_times_out() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let (result, callback) = slot();

        params.get_all_params_async(callback);
        harness.deliver(&param_list_entry_frame(1, 1, "FIRST", &ParamValue::U8(1), 0, 2));
        harness.advance(harness.context().timeout() + Duration::from_millis(1));

        assert_eq!(*result.lock().unwrap(), Some(Err(ParamError::Timeout)));

        // A new list request can start afterwards.
        let (again, callback) = slot();
        params.get_all_params_async(callback);
        assert!(again.lock().unwrap().is_none());
        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_LIST).len(), 2);
    }

    #[test]
    fn cancelled_requests_never_complete() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let plugin = OwnerToken::new();
        let (in_flight, in_flight_callback) = slot();
        let (queued, queued_callback) = slot();
        let (other, other_callback) = slot();

        params.get_param_async("FIRST", None, false, Some(plugin), in_flight_callback);
        params.do_work();
        params.set_param_async("SECOND", ParamValue::U8(2), false, Some(plugin), queued_callback);
        params.get_param_async("THIRD", None, false, None, other_callback);

        assert_eq!(params.cancel_all_param(plugin), 2);
        assert_eq!(params.pending(), 1);

        // Neither the reply nor the old deadline revive the cancelled request.
        harness.deliver(&param_value_frame(1, 1, "FIRST", &ParamValue::U8(1)));
        harness.advance(harness.context().timeout() + Duration::from_millis(1));
        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_READ).len(), 1);

        params.do_work();
        assert_eq!(harness.sent_of(ids::PARAM_REQUEST_READ).len(), 2);
        assert!(harness.sent_of(ids::PARAM_SET).is_empty());

        harness.deliver(&param_value_frame(1, 1, "THIRD", &ParamValue::U8(3)));
        assert!(in_flight.lock().unwrap().is_none());
        assert!(queued.lock().unwrap().is_none());
        assert_eq!(*other.lock().unwrap(), Some(Ok(ParamValue::U8(3))));
    }

    #[test]
    fn subscribers_see_new_values() {
        let harness = Harness::new();
        let params = ParamSender::new(harness.context());
        let plugin = OwnerToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        params.subscribe_param_changed("MPC_XY_VEL_MAX", None, plugin, move |value| {
            sink.lock().unwrap().push(value)
        });
        let sink = seen.clone();
        params.subscribe_param_changed(
            "MPC_XY_VEL_MAX",
            Some(ParamType::I32),
            OwnerToken::new(),
            move |value| sink.lock().unwrap().push(value),
        );

        harness.deliver(&param_value_frame(1, 1, "MPC_XY_VEL_MAX", &ParamValue::F32(12.0)));
        harness.deliver(&param_value_frame(1, 1, "MPC_Z_VEL_MAX", &ParamValue::F32(3.0)));
        assert_eq!(*seen.lock().unwrap(), vec![ParamValue::F32(12.0)]);

        params.unsubscribe_param_changed("MPC_XY_VEL_MAX", plugin);
        harness.deliver(&param_value_frame(1, 1, "MPC_XY_VEL_MAX", &ParamValue::F32(8.0)));
        assert_eq!(*seen.lock().unwrap(), vec![ParamValue::F32(12.0)]);
    }
}
