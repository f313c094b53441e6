use std::fmt::{Debug, Formatter};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mavio::protocol::{ComponentId, MessageId, V2};
use mavio::Frame;

use crate::core::utils::UniqueId;

/// Handler of incoming frames of a particular message type.
pub type MessageCallback = Arc<dyn Fn(&Frame<V2>) + Send + Sync>;

/// Identifies whoever registered a message handler.
///
/// All handlers of an owner can be removed at once with
/// [`MessageHandlers::unregister_all`].
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct OwnerToken(UniqueId);

impl OwnerToken {
    /// Creates a fresh token.
    pub fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

struct HandlerEntry {
    message_id: MessageId,
    component_id: Option<ComponentId>,
    owner: OwnerToken,
    callback: MessageCallback,
}

/// Registry that demultiplexes incoming frames by message `ID`.
///
/// A frame is passed to every handler registered for its message `ID` in registration order.
/// Handlers are called without the registry lock held, so a handler may register or unregister
/// handlers.
#[derive(Default)]
pub struct MessageHandlers {
    entries: RwLock<Vec<HandlerEntry>>,
}

impl MessageHandlers {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for every frame with `message_id`.
    pub fn register(&self, message_id: MessageId, callback: MessageCallback, owner: OwnerToken) {
        self.write().push(HandlerEntry {
            message_id,
            component_id: None,
            owner,
            callback,
        });
    }

    /// Registers a handler for frames with `message_id` sent by a particular component.
    pub fn register_for_component(
        &self,
        message_id: MessageId,
        component_id: ComponentId,
        callback: MessageCallback,
        owner: OwnerToken,
    ) {
        self.write().push(HandlerEntry {
            message_id,
            component_id: Some(component_id),
            owner,
            callback,
        });
    }

    /// Removes handlers of `owner` for `message_id`.
    pub fn unregister(&self, message_id: MessageId, owner: OwnerToken) {
        self.write()
            .retain(|entry| !(entry.message_id == message_id && entry.owner == owner));
    }

    /// Removes every handler of `owner`.
    pub fn unregister_all(&self, owner: OwnerToken) {
        self.write().retain(|entry| entry.owner != owner);
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Dispatches a frame, returns the number of handlers called.
    pub fn process(&self, frame: &Frame<V2>) -> usize {
        let message_id = frame.message_id();
        let component_id = frame.component_id();

        let callbacks: Vec<MessageCallback> = self
            .read()
            .iter()
            .filter(|entry| entry.message_id == message_id)
            .filter(|entry| entry.component_id.map_or(true, |id| id == component_id))
            .map(|entry| entry.callback.clone())
            .collect();

        for callback in callbacks.iter() {
            callback(frame);
        }
        callbacks.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<HandlerEntry>> {
        self.entries.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<HandlerEntry>> {
        self.entries.write().unwrap_or_else(|err| err.into_inner())
    }
}

impl Debug for MessageHandlers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandlers")
            .field("handlers", &self.len())
            .finish()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::protocol::messages::ids;
    use crate::test_utils::heartbeat_frame;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> MessageCallback {
        let log = log.clone();
        Arc::new(move |_| log.lock().unwrap().push(name))
    }

    #[test]
    fn dispatches_in_registration_order() {
        let handlers = MessageHandlers::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let owner = OwnerToken::new();

        handlers.register(ids::HEARTBEAT, recorder(&log, "first"), owner);
        handlers.register(ids::COMMAND_ACK, recorder(&log, "other"), owner);
        handlers.register(ids::HEARTBEAT, recorder(&log, "second"), owner);

        assert_eq!(handlers.process(&heartbeat_frame(1, 1, 0)), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn component_filter() {
        let handlers = MessageHandlers::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let owner = OwnerToken::new();

        handlers.register_for_component(ids::HEARTBEAT, 100, recorder(&log, "camera"), owner);

        handlers.process(&heartbeat_frame(1, 1, 0));
        handlers.process(&heartbeat_frame(1, 100, 0));
        assert_eq!(*log.lock().unwrap(), vec!["camera"]);
    }

    #[test]
    fn unregister_all_by_owner() {
        let handlers = MessageHandlers::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let plugin = OwnerToken::new();
        let other = OwnerToken::new();

        handlers.register(ids::HEARTBEAT, recorder(&log, "plugin"), plugin);
        handlers.register(ids::COMMAND_ACK, recorder(&log, "plugin"), plugin);
        handlers.register(ids::HEARTBEAT, recorder(&log, "other"), other);

        handlers.unregister_all(plugin);
        assert_eq!(handlers.len(), 1);

        handlers.process(&heartbeat_frame(1, 1, 0));
        assert_eq!(*log.lock().unwrap(), vec!["other"]);
    }

    #[test]
    fn handler_may_unregister_itself() {
        let handlers = Arc::new(MessageHandlers::new());
        let owner = OwnerToken::new();

        let inner = handlers.clone();
        handlers.register(
            ids::HEARTBEAT,
            Arc::new(move |_| inner.unregister_all(owner)),
            owner,
        );

        assert_eq!(handlers.process(&heartbeat_frame(1, 1, 0)), 1);
        assert!(handlers.is_empty());
    }
}
