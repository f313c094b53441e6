use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Weak};

use crate::protocol::mission::clear::ClearWork;
use crate::protocol::mission::download::DownloadWork;
use crate::protocol::mission::item::validate_upload;
use crate::protocol::mission::set_current::SetCurrentWork;
use crate::protocol::mission::upload::UploadWork;
use crate::protocol::mission::work::TransferWork;
use crate::protocol::mission::{MissionError, MissionItem, MissionResult};
use crate::protocol::{Completion, ProgressCallback};
use crate::sync::utils::WorkQueue;
use crate::system::SystemContext;

/// Handle to a queued or running transfer.
///
/// Does not keep the transfer alive. Cancelling a finished transfer does nothing.
#[derive(Clone)]
pub struct TransferHandle {
    work: Weak<dyn TransferWork>,
}

impl TransferHandle {
    fn new(work: Arc<dyn TransferWork>) -> Self {
        Self {
            work: Arc::downgrade(&work),
        }
    }

    /// Cancels the transfer.
    ///
    /// A running transfer tells the remote with `MISSION_ACK(OPERATION_CANCELLED)`, a queued
    /// one is dropped without touching the wire. Either way the transfer finishes with
    /// [`MissionError::Cancelled`].
    pub fn cancel(&self) {
        if let Some(work) = self.work.upgrade() {
            work.cancel();
        }
    }

    /// Returns `true` once the transfer produced its result or was discarded.
    pub fn is_done(&self) -> bool {
        self.work.upgrade().map_or(true, |work| work.is_done())
    }
}

impl Debug for TransferHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("is_done", &self.is_done())
            .finish()
    }
}

/// Mission transfer protocol of one remote system.
///
/// Transfers run one at a time in the order they were queued. Arguments are checked when a
/// transfer is queued: invalid input is reported to the callback right away and no handle is
/// returned.
pub struct MissionTransferClient {
    context: Arc<SystemContext>,
    queue: WorkQueue<Arc<dyn TransferWork>>,
    int_messages_supported: AtomicBool,
}

impl MissionTransferClient {
    pub(crate) fn new(context: Arc<SystemContext>) -> Arc<Self> {
        Arc::new(Self {
            context,
            queue: WorkQueue::new(),
            int_messages_supported: AtomicBool::new(true),
        })
    }

    /// Declares whether the remote supports `MISSION_ITEM_INT`.
    ///
    /// Uploads and downloads fail with [`MissionError::IntMessagesNotSupported`] while unsupported.
    pub fn set_int_messages_supported(&self, supported: bool) {
        self.int_messages_supported.store(supported, Ordering::Release);
    }

    /// Returns `true` unless the remote declared no `MISSION_ITEM_INT` support.
    pub fn int_messages_supported(&self) -> bool {
        self.int_messages_supported.load(Ordering::Acquire)
    }

    /// Returns `true` if no transfer is queued or running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queues an upload.
    ///
    /// Items must be numbered `0..N`, exactly one must be current, and all must have
    /// `mission_type`. Progress reaches `1.0` only when the remote accepts the list.
    pub fn upload_items_async(
        &self,
        mission_type: u8,
        items: Vec<MissionItem>,
        callback: Completion<MissionResult<()>>,
        progress: Option<ProgressCallback>,
    ) -> Option<TransferHandle> {
        if !self.int_messages_supported() {
            log::warn!("[#{}] int mission messages not supported", self.context.system_id());
            callback.complete(Err(MissionError::IntMessagesNotSupported));
            return None;
        }

        if let Err(err) = validate_upload(&items, mission_type) {
            log::warn!("[#{}] mission rejected: {err}", self.context.system_id());
            callback.complete(Err(err));
            return None;
        }

        let messages: Result<Vec<_>, _> = items
            .iter()
            .map(|item| {
                item.to_message(
                    self.context.system_id(),
                    crate::consts::AUTOPILOT_COMPONENT_ID,
                )
            })
            .collect();
        let messages = match messages {
            Ok(messages) => messages,
            Err(err) => {
                log::warn!("[#{}] mission can't be encoded: {err}", self.context.system_id());
                callback.complete(Err(MissionError::Unsupported));
                return None;
            }
        };

        let work =
            UploadWork::new(self.context.clone(), mission_type, messages, callback, progress);
        Some(self.enqueue(work))
    }

    /// Queues a download.
    pub fn download_items_async(
        &self,
        mission_type: u8,
        callback: Completion<MissionResult<Vec<MissionItem>>>,
        progress: Option<ProgressCallback>,
    ) -> Option<TransferHandle> {
        if !self.int_messages_supported() {
            log::warn!("[#{}] int mission messages not supported", self.context.system_id());
            callback.complete(Err(MissionError::IntMessagesNotSupported));
            return None;
        }

        let work = DownloadWork::new(self.context.clone(), mission_type, callback, progress);
        Some(self.enqueue(work))
    }

    /// Queues removal of every item of `mission_type` on the remote.
    pub fn clear_items_async(
        &self,
        mission_type: u8,
        callback: Completion<MissionResult<()>>,
    ) -> TransferHandle {
        let work = ClearWork::new(self.context.clone(), mission_type, callback);
        self.enqueue(work)
    }

    /// Queues a change of the current mission item.
    ///
    /// A negative or out of range index fails with [`MissionError::CurrentInvalid`].
    pub fn set_current_item_async(
        &self,
        current: i32,
        callback: Completion<MissionResult<()>>,
    ) -> Option<TransferHandle> {
        let current = match u16::try_from(current) {
            Ok(current) => current,
            Err(_) => {
                callback.complete(Err(MissionError::CurrentInvalid));
                return None;
            }
        };

        let work = SetCurrentWork::new(self.context.clone(), current, callback);
        Some(self.enqueue(work))
    }

    /// Uploads items and blocks until the transfer finishes.
    pub fn upload_items(&self, mission_type: u8, items: Vec<MissionItem>) -> MissionResult<()> {
        let (tx, rx) = mpsc::channel();
        self.upload_items_async(
            mission_type,
            items,
            Completion::new(move |result| {
                let _ = tx.send(result);
            }),
            None,
        );
        rx.recv().unwrap_or(Err(MissionError::ConnectionError))
    }

    /// Downloads items and blocks until the transfer finishes.
    pub fn download_items(&self, mission_type: u8) -> MissionResult<Vec<MissionItem>> {
        let (tx, rx) = mpsc::channel();
        self.download_items_async(
            mission_type,
            Completion::new(move |result| {
                let _ = tx.send(result);
            }),
            None,
        );
        rx.recv().unwrap_or(Err(MissionError::ConnectionError))
    }

    /// Clears items and blocks until the remote acknowledges.
    pub fn clear_items(&self, mission_type: u8) -> MissionResult<()> {
        let (tx, rx) = mpsc::channel();
        self.clear_items_async(
            mission_type,
            Completion::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.recv().unwrap_or(Err(MissionError::ConnectionError))
    }

    /// Sets the current item and blocks until the remote confirms it.
    pub fn set_current_item(&self, current: i32) -> MissionResult<()> {
        let (tx, rx) = mpsc::channel();
        self.set_current_item_async(
            current,
            Completion::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.recv().unwrap_or(Err(MissionError::ConnectionError))
    }

    /// Starts the front transfer and removes finished ones.
    pub(crate) fn do_work(&self) {
        loop {
            let front = match self.queue.guard().front() {
                Some(work) => work.clone(),
                None => return,
            };

            if !front.has_started() && !front.is_done() {
                front.clone().start();
            }
            if !front.is_done() {
                return;
            }

            let mut guard = self.queue.guard();
            if guard
                .front()
                .map_or(false, |work| Arc::ptr_eq(work, &front))
            {
                guard.pop_front();
            }
        }
    }

    fn enqueue(&self, work: Arc<dyn TransferWork>) -> TransferHandle {
        let handle = TransferHandle::new(work.clone());
        self.queue.push_back(work);
        handle
    }
}

impl Drop for MissionTransferClient {
    fn drop(&mut self) {
        let pending = self.queue.guard().drain_matching(|_| true);
        for work in pending {
            work.abort();
        }
    }
}

impl Debug for MissionTransferClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissionTransferClient")
            .field("system_id", &self.context.system_id())
            .field("queued", &self.queue.len())
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
    use std::time::Duration;

    use mavio::dialects::common::messages::{MissionAck, MissionItemInt, MissionRequestInt};
    use mavio::dialects::Common;

    use crate::protocol::messages::{ids, mission_result, mission_type};
    use crate::system::Autopilot;
    use crate::test_utils::{
        mission_ack_frame, mission_count_frame, mission_current_frame, mission_item_int_frame,
        mission_request_frame, mission_request_int_frame, Harness,
    };

    type Results<T> = Arc<Mutex<Vec<T>>>;

    fn collect<T: Send + 'static>() -> (Results<T>, impl Fn() -> Completion<T>) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        (results, move || {
            let sink = sink.clone();
            Completion::new(move |result| sink.lock().unwrap().push(result))
        })
    }

    fn progress_log() -> (Arc<Mutex<Vec<f32>>>, ProgressCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, Arc::new(move |value| sink.lock().unwrap().push(value)))
    }

    fn item(seq: u16, current: u8) -> MissionItem {
        MissionItem {
            seq,
            frame: 6,
            command: 16,
            current,
            autocontinue: 1,
            x: 473_977_418 + seq as i32,
            y: 85_455_939,
            z: 10.0,
            mission_type: mission_type::MISSION,
            ..Default::default()
        }
    }

    fn sent_item_seqs(harness: &Harness) -> Vec<u16> {
        harness
            .sent_of(ids::MISSION_ITEM_INT)
            .iter()
            .filter_map(|frame| match frame.decode::<Common>() {
                Ok(Common::MissionItemInt(MissionItemInt { seq, .. })) => Some(seq),
                _ => None,
            })
            .collect()
    }

    fn sent_request_seqs(harness: &Harness) -> Vec<u16> {
        harness
            .sent_of(ids::MISSION_REQUEST_INT)
            .iter()
            .filter_map(|frame| match frame.decode::<Common>() {
                Ok(Common::MissionRequestInt(MissionRequestInt { seq, .. })) => Some(seq),
                _ => None,
            })
            .collect()
    }

    fn sent_ack_results(harness: &Harness) -> Vec<u8> {
        harness
            .sent_of(ids::MISSION_ACK)
            .iter()
            .filter_map(|frame| match frame.decode::<Common>() {
                Ok(Common::MissionAck(MissionAck { type_, .. })) => Some(type_ as u8),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_upload_fails_without_traffic() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        let handle = client.upload_items_async(mission_type::MISSION, vec![], callback(), None);
        client.do_work();

        assert!(handle.is_none());
        assert_eq!(*results.lock().unwrap(), vec![Err(MissionError::NoMissionAvailable)]);
        assert!(harness.sent().is_empty());
    }

    #[test]
    fn upload_with_sequence_gap_fails() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        client.upload_items_async(
            mission_type::MISSION,
            vec![item(0, 1), item(2, 0)],
            callback(),
            None,
        );

        assert_eq!(*results.lock().unwrap(), vec![Err(MissionError::InvalidSequence)]);
        assert!(harness.sent().is_empty());
    }

    #[test]
    fn upload_larger_than_count_field_fails() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        let items: Vec<MissionItem> = (0..=u16::MAX as usize + 1)
            .map(|index| item(index as u16, u8::from(index == 0)))
            .collect();
        let handle = client.upload_items_async(mission_type::MISSION, items, callback(), None);
        client.do_work();

        assert!(handle.is_none());
        assert_eq!(*results.lock().unwrap(), vec![Err(MissionError::TooManyMissionItems)]);
        assert!(harness.sent_of(ids::MISSION_COUNT).is_empty());
    }

    #[test]
    fn upload_resends_repeated_request() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();
        let (progress, progress_callback) = progress_log();

        client.upload_items_async(
            mission_type::MISSION,
            vec![item(0, 1), item(1, 0)],
            callback(),
            Some(progress_callback),
        );
        client.do_work();
        assert_eq!(harness.sent_of(ids::MISSION_COUNT).len(), 1);

        harness.deliver(&mission_request_int_frame(1, 1, 0, mission_type::MISSION));
        harness.deliver(&mission_request_int_frame(1, 1, 0, mission_type::MISSION));
        harness.deliver(&mission_request_int_frame(1, 1, 1, mission_type::MISSION));
        harness.deliver(&mission_ack_frame(1, 1, mission_result::ACCEPTED, mission_type::MISSION));

        assert_eq!(sent_item_seqs(&harness), vec![0, 0, 1]);
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);

        let progress = progress.lock().unwrap();
        assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(progress.last(), Some(&1.0));

        client.do_work();
        assert!(client.is_idle());
    }

    #[test]
    fn upload_ignores_out_of_order_requests() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        client.upload_items_async(
            mission_type::MISSION,
            vec![item(0, 1), item(1, 0), item(2, 0)],
            callback(),
            None,
        );
        client.do_work();

        harness.deliver(&mission_request_int_frame(1, 1, 2, mission_type::MISSION));
        assert!(sent_item_seqs(&harness).is_empty());

        harness.deliver(&mission_request_int_frame(1, 1, 0, mission_type::MISSION));
        harness.deliver(&mission_request_int_frame(1, 1, 1, mission_type::MISSION));
        // Accepting before the last item was requested is a protocol violation.
        harness.deliver(&mission_ack_frame(1, 1, mission_result::ACCEPTED, mission_type::MISSION));

        assert_eq!(sent_item_seqs(&harness), vec![0, 1]);
        assert_eq!(*results.lock().unwrap(), vec![Err(MissionError::ProtocolError)]);
    }

    #[test]
    fn upload_rejected_by_remote() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        client.upload_items_async(mission_type::MISSION, vec![item(0, 1)], callback(), None);
        client.do_work();
        harness.deliver(&mission_ack_frame(1, 1, mission_result::NO_SPACE, mission_type::MISSION));

        assert_eq!(*results.lock().unwrap(), vec![Err(MissionError::TooManyMissionItems)]);
    }

    #[test]
    fn legacy_request_is_refused_unless_ardupilot() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (_, callback) = collect::<MissionResult<()>>();

        client.upload_items_async(mission_type::MISSION, vec![item(0, 1)], callback(), None);
        client.do_work();
        harness.deliver(&mission_request_frame(1, 1, 0, mission_type::MISSION));

        assert_eq!(sent_ack_results(&harness), vec![mission_result::UNSUPPORTED]);
        assert!(sent_item_seqs(&harness).is_empty());

        let harness = Harness::new();
        harness.context().set_autopilot(Autopilot::ArduPilot);
        let client = MissionTransferClient::new(harness.context());

        client.upload_items_async(mission_type::MISSION, vec![item(0, 1)], callback(), None);
        client.do_work();
        harness.deliver(&mission_request_frame(1, 1, 0, mission_type::MISSION));

        assert!(sent_ack_results(&harness).is_empty());
        assert_eq!(sent_item_seqs(&harness), vec![0]);
    }

    #[test]
    fn upload_times_out_after_retries() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();
        let retries = harness.context().conf().transfer_retries();

        client.upload_items_async(mission_type::MISSION, vec![item(0, 1)], callback(), None);
        client.do_work();
        for _ in 0..retries + 3 {
            harness.advance(harness.context().timeout() + Duration::from_millis(1));
        }

        assert_eq!(harness.sent_of(ids::MISSION_COUNT).len(), retries);
        assert_eq!(*results.lock().unwrap(), vec![Err(MissionError::Timeout)]);
    }

    #[test]
    fn int_messages_not_supported() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (uploads, upload_callback) = collect();
        let (downloads, download_callback) = collect();

        client.set_int_messages_supported(false);
        client.upload_items_async(mission_type::MISSION, vec![item(0, 1)], upload_callback(), None);
        client.download_items_async(mission_type::MISSION, download_callback(), None);

        assert_eq!(
            *uploads.lock().unwrap(),
            vec![Err(MissionError::IntMessagesNotSupported)]
        );
        assert_eq!(
            *downloads.lock().unwrap(),
            vec![Err(MissionError::IntMessagesNotSupported)]
        );
        assert!(client.is_idle());
    }

    #[test]
    fn download_of_empty_mission() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        client.download_items_async(mission_type::MISSION, callback(), None);
        client.do_work();
        assert_eq!(harness.sent_of(ids::MISSION_REQUEST_LIST).len(), 1);

        harness.deliver(&mission_count_frame(1, 1, 0, mission_type::MISSION));

        assert_eq!(*results.lock().unwrap(), vec![Ok(vec![])]);
        assert_eq!(sent_ack_results(&harness), vec![mission_result::ACCEPTED]);
        assert!(sent_request_seqs(&harness).is_empty());
    }

    #[test]
    fn download_ignores_duplicate_items() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();
        let (progress, progress_callback) = progress_log();
        let items = vec![item(0, 1), item(1, 0), item(2, 0)];

        client.download_items_async(mission_type::MISSION, callback(), Some(progress_callback));
        client.do_work();
        harness.deliver(&mission_count_frame(1, 1, 3, mission_type::MISSION));
        harness.deliver(&mission_item_int_frame(1, 1, &items[0]));
        harness.deliver(&mission_item_int_frame(1, 1, &items[1]));
        harness.deliver(&mission_item_int_frame(1, 1, &items[1]));

        assert_eq!(sent_request_seqs(&harness), vec![0, 1, 2]);

        harness.deliver(&mission_item_int_frame(1, 1, &items[2]));
        assert_eq!(*results.lock().unwrap(), vec![Ok(items)]);
        assert_eq!(sent_ack_results(&harness), vec![mission_result::ACCEPTED]);
        assert_eq!(progress.lock().unwrap().last(), Some(&1.0));
    }

    #[test]
    fn download_rerequests_on_timeout() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        client.download_items_async(mission_type::MISSION, callback(), None);
        client.do_work();
        harness.deliver(&mission_count_frame(1, 1, 1, mission_type::MISSION));
        harness.advance(harness.context().timeout() + Duration::from_millis(1));

        assert_eq!(sent_request_seqs(&harness), vec![0, 0]);

        harness.deliver(&mission_item_int_frame(1, 1, &item(0, 1)));
        assert_eq!(*results.lock().unwrap(), vec![Ok(vec![item(0, 1)])]);
    }

    #[test]
    fn clear_retries_until_acknowledged() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        client.clear_items_async(mission_type::FENCE, callback());
        client.do_work();
        harness.advance(harness.context().timeout() + Duration::from_millis(1));
        assert_eq!(harness.sent_of(ids::MISSION_CLEAR_ALL).len(), 2);

        harness.deliver(&mission_ack_frame(1, 1, mission_result::ACCEPTED, mission_type::FENCE));
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);
    }

    #[test]
    fn set_current_waits_for_requested_index() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        client.set_current_item_async(3, callback());
        client.do_work();
        assert_eq!(harness.sent_of(ids::MISSION_SET_CURRENT).len(), 1);

        harness.deliver(&mission_current_frame(1, 1, 1));
        assert!(results.lock().unwrap().is_empty());
        assert_eq!(harness.sent_of(ids::MISSION_SET_CURRENT).len(), 2);

        harness.deliver(&mission_current_frame(1, 1, 3));
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);
    }

    #[test]
    fn negative_current_index_fails_synchronously() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        assert!(client.set_current_item_async(-1, callback()).is_none());
        assert_eq!(*results.lock().unwrap(), vec![Err(MissionError::CurrentInvalid)]);
        assert!(client.is_idle());
    }

    #[test]
    fn cancelling_running_transfers() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (uploads, upload_callback) = collect();
        let (downloads, download_callback) = collect();
        let (clears, clear_callback) = collect();
        let (currents, current_callback) = collect();

        let mut handles = Vec::new();
        handles.push(
            client
                .upload_items_async(
                    mission_type::MISSION,
                    vec![item(0, 1)],
                    upload_callback(),
                    None,
                )
                .unwrap(),
        );
        handles.push(
            client
                .download_items_async(mission_type::MISSION, download_callback(), None)
                .unwrap(),
        );
        handles.push(client.clear_items_async(mission_type::MISSION, clear_callback()));
        handles.push(client.set_current_item_async(0, current_callback()).unwrap());

        for handle in handles.iter() {
            client.do_work();
            handle.cancel();
            handle.cancel();
        }
        client.do_work();

        for _ in 0..10 {
            harness.advance(harness.context().timeout() * 2);
        }

        assert_eq!(*uploads.lock().unwrap(), vec![Err(MissionError::Cancelled)]);
        assert_eq!(*downloads.lock().unwrap(), vec![Err(MissionError::Cancelled)]);
        assert_eq!(*clears.lock().unwrap(), vec![Err(MissionError::Cancelled)]);
        assert_eq!(*currents.lock().unwrap(), vec![Err(MissionError::Cancelled)]);
        assert_eq!(
            sent_ack_results(&harness),
            vec![mission_result::OPERATION_CANCELLED; 4]
        );

        // One frame per transfer before cancelling, nothing after.
        assert_eq!(harness.sent_of(ids::MISSION_COUNT).len(), 1);
        assert_eq!(harness.sent_of(ids::MISSION_REQUEST_LIST).len(), 1);
        assert_eq!(harness.sent_of(ids::MISSION_CLEAR_ALL).len(), 1);
        assert_eq!(harness.sent_of(ids::MISSION_SET_CURRENT).len(), 1);
        assert!(handles.iter().all(TransferHandle::is_done));
        assert!(client.is_idle());
    }

    #[test]
    fn cancelling_queued_transfer_sends_nothing() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (first, first_callback) = collect();
        let (second, second_callback) = collect();

        client.clear_items_async(mission_type::MISSION, first_callback());
        let queued = client.clear_items_async(mission_type::FENCE, second_callback());
        client.do_work();

        queued.cancel();
        assert_eq!(*second.lock().unwrap(), vec![Err(MissionError::Cancelled)]);
        assert!(sent_ack_results(&harness).is_empty());

        harness.deliver(&mission_ack_frame(1, 1, mission_result::ACCEPTED, mission_type::MISSION));
        client.do_work();

        assert_eq!(*first.lock().unwrap(), vec![Ok(())]);
        assert_eq!(harness.sent_of(ids::MISSION_CLEAR_ALL).len(), 1);
        assert!(client.is_idle());
    }

    #[test]
    fn callback_may_queue_next_transfer() {
        let harness = Harness::new();
        let client = MissionTransferClient::new(harness.context());
        let (results, callback) = collect();

        let chained = client.clone();
        let next = callback();
        client.clear_items_async(
            mission_type::MISSION,
            Completion::new(move |_| {
                chained.clear_items_async(mission_type::FENCE, next);
            }),
        );
        client.do_work();
        harness.deliver(&mission_ack_frame(1, 1, mission_result::ACCEPTED, mission_type::MISSION));

        client.do_work();
        assert_eq!(harness.sent_of(ids::MISSION_CLEAR_ALL).len(), 2);
        harness.deliver(&mission_ack_frame(1, 1, mission_result::ACCEPTED, mission_type::FENCE));
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);
    }
}
