//! # Parser channels
//!
//! Each [`FrameParser`](crate::core::parser::FrameParser) owns a [`Channel`] obtained from a
//! shared [`ChannelAllocator`]. Channel `ID`s are small integers handed out lowest-free-first, so
//! allocation is deterministic.

use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use crate::prelude::*;

/// A pool of parser channels with fixed capacity.
///
/// The allocator is constructed explicitly and shared through [`Arc`] by all connections of a
/// [`Hub`](crate::system::Hub).
///
/// ```rust
/// use std::sync::Arc;
/// use mavlane::core::ChannelAllocator;
///
/// let allocator = Arc::new(ChannelAllocator::new(2));
///
/// let first = allocator.checkout().unwrap();
/// let second = allocator.checkout().unwrap();
/// assert_eq!((first.id(), second.id()), (0, 1));
/// assert!(allocator.checkout().is_err());
///
/// drop(first);
/// assert_eq!(allocator.checkout().unwrap().id(), 0);
/// ```
pub struct ChannelAllocator {
    used: Mutex<Vec<bool>>,
}

/// A channel checked out from a [`ChannelAllocator`].
///
/// The channel returns to the pool when dropped.
pub struct Channel {
    id: u8,
    allocator: Arc<ChannelAllocator>,
}

impl ChannelAllocator {
    /// Creates a pool with the given number of channels.
    pub fn new(capacity: u8) -> Self {
        Self {
            used: Mutex::new(vec![false; capacity as usize]),
        }
    }

    /// Pool capacity.
    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    /// Number of channels currently checked out.
    pub fn in_use(&self) -> usize {
        self.lock().iter().filter(|used| **used).count()
    }

    /// Takes the free channel with the lowest `ID`.
    ///
    /// Returns [`Error::ChannelsExhausted`] when every channel is in use. A failed checkout leaves
    /// the pool untouched.
    pub fn checkout(self: &Arc<Self>) -> Result<Channel> {
        let mut used = self.lock();
        let id = used
            .iter()
            .position(|used| !*used)
            .ok_or(Error::ChannelsExhausted)?;
        used[id] = true;

        log::trace!("channel #{id} checked out");
        Ok(Channel {
            id: id as u8,
            allocator: self.clone(),
        })
    }

    /// Returns a channel to the pool.
    ///
    /// Equivalent to dropping the channel.
    pub fn checkin(&self, channel: Channel) {
        drop(channel)
    }

    /// Marks the channel with the given `ID` as free.
    ///
    /// Releasing a channel that is already free, or is out of range, does nothing.
    pub(crate) fn release(&self, id: u8) {
        let mut used = self.lock();
        if let Some(slot) = used.get_mut(id as usize) {
            if *slot {
                log::trace!("channel #{id} released");
            }
            *slot = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<bool>> {
        self.used.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Debug for ChannelAllocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAllocator")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl Channel {
    /// Channel `ID`.
    pub fn id(&self) -> u8 {
        self.id
    }
}

impl Debug for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Channel").field(&self.id).finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.allocator.release(self.id);
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////
