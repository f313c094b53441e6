//! # Frame parser
//!
//! Turns a stream of raw byte chunks into decoded MAVLink 2 frames. Frames are checked against
//! the `common` dialect checksums, frames of unknown messages are discarded.

use mavio::dialects::Common;
use mavio::protocol::V2;
use mavio::{Frame, Receiver};

use crate::core::channels::Channel;

/// MAVLink 2 start-of-frame marker.
pub const STX_V2: u8 = 0xFD;
/// MAVLink 1 start-of-frame marker, such frames are skipped.
pub const STX_V1: u8 = 0xFE;

const HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// Incremental parser of MAVLink 2 frames bound to a [`Channel`].
///
/// Bytes are added with [`FrameParser::push`], complete frames are taken one by one with
/// [`FrameParser::next_frame`]. On garbage or a corrupted frame the parser drops bytes until it
/// finds the next plausible start of frame.
///
/// The channel is returned to its allocator when the parser is dropped.
#[derive(Debug)]
pub struct FrameParser {
    channel: Channel,
    buffer: Vec<u8>,
    dropped: usize,
}

impl FrameParser {
    /// Creates a parser that owns the given channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            buffer: Vec::new(),
            dropped: 0,
        }
    }

    /// Channel of this parser.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Number of bytes discarded so far while resynchronising.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }

    /// Appends a chunk of raw bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame<V2>> {
        loop {
            let start = match self.buffer.iter().position(|b| *b == STX_V2) {
                Some(start) => start,
                None => {
                    self.discard(self.buffer.len());
                    return None;
                }
            };
            self.discard(start);

            if self.buffer.len() < HEADER_LEN {
                return None;
            }

            let payload_len = self.buffer[1] as usize;
            let signed = self.buffer[2] & INCOMPAT_FLAG_SIGNED != 0;
            let frame_len = HEADER_LEN
                + payload_len
                + CHECKSUM_LEN
                + if signed { SIGNATURE_LEN } else { 0 };

            if self.buffer.len() < frame_len {
                return None;
            }

            let mut bytes = &self.buffer[..frame_len];
            let result = Receiver::new::<V2>(mavio::io::StdIoReader::new(&mut bytes))
                .recv()
                .map_err(|err| format!("{err:?}"))
                .and_then(|frame| match frame.validate_checksum::<Common>() {
                    Ok(_) => Ok(frame),
                    Err(err) => Err(format!("{err:?}")),
                });

            match result {
                Ok(frame) => {
                    self.buffer.drain(..frame_len);
                    return Some(frame);
                }
                Err(err) => {
                    log::trace!(
                        "[channel #{}] dropping corrupted frame start: {err:?}",
                        self.channel.id()
                    );
                    self.discard(1);
                }
            }
        }
    }

    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.dropped += count;
        self.buffer.drain(..count);
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::channels::ChannelAllocator;
    use crate::test_utils::{encode_frame, heartbeat_frame};

    fn parser(allocator: &Arc<ChannelAllocator>) -> FrameParser {
        FrameParser::new(allocator.checkout().unwrap())
    }

    #[test]
    fn parses_frame_split_into_chunks() {
        let allocator = Arc::new(ChannelAllocator::new(4));
        let mut parser = parser(&allocator);
        let bytes = encode_frame(&heartbeat_frame(1, 1, 7));

        let (head, tail) = bytes.split_at(5);
        parser.push(head);
        assert!(parser.next_frame().is_none());

        parser.push(tail);
        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.system_id(), 1);
        assert_eq!(frame.sequence(), 7);
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn emits_frames_one_at_a_time() {
        let allocator = Arc::new(ChannelAllocator::new(4));
        let mut parser = parser(&allocator);

        let mut bytes = encode_frame(&heartbeat_frame(1, 1, 0));
        bytes.extend(encode_frame(&heartbeat_frame(2, 1, 1)));
        parser.push(&bytes);

        assert_eq!(parser.next_frame().unwrap().system_id(), 1);
        assert_eq!(parser.next_frame().unwrap().system_id(), 2);
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn resynchronises_after_garbage_and_corruption() {
        let allocator = Arc::new(ChannelAllocator::new(4));
        let mut parser = parser(&allocator);

        let mut corrupted = encode_frame(&heartbeat_frame(3, 1, 0));
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut bytes = vec![0x00, 0x42, STX_V1, 0x13];
        bytes.extend(corrupted);
        bytes.extend(encode_frame(&heartbeat_frame(4, 1, 0)));
        parser.push(&bytes);

        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.system_id(), 4);
        assert!(parser.dropped_bytes() > 4);
    }

    #[test]
    fn channel_is_released_on_drop() {
        let allocator = Arc::new(ChannelAllocator::new(1));
        let parser = parser(&allocator);
        assert_eq!(allocator.in_use(), 1);

        drop(parser);
        assert_eq!(allocator.in_use(), 0);
    }
}
