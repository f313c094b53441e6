use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serialport::{FlowControl, SerialPort};

use crate::consts::{RECEIVE_BUFFER_SIZE, RECEIVE_POLL_INTERVAL, RECONNECT_INTERVAL};
use crate::core::channels::ChannelAllocator;
use crate::core::io::{ConnectionDetails, ConnectionInfo, OutgoingFrame};
use crate::core::parser::FrameParser;
use crate::core::utils::net::is_timeout;
use crate::core::utils::Closable;
use crate::sync::io::{encode_frame, Connection, FrameCallback, ReceiveTask};

use crate::prelude::*;

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Serial port connection.
pub struct SerialConnection {
    info: ConnectionInfo,
    path: String,
    baud_rate: u32,
    flow_control: bool,
    channels: Arc<ChannelAllocator>,
    callback: FrameCallback,
    writer: SharedPort,
    task: Option<ReceiveTask>,
}

impl SerialConnection {
    /// Creates a connection to the serial device at `path`.
    pub fn new(
        path: &str,
        baud_rate: u32,
        flow_control: bool,
        channels: Arc<ChannelAllocator>,
        callback: FrameCallback,
    ) -> Self {
        Self {
            info: ConnectionInfo::new(ConnectionDetails::Serial {
                path: path.to_string(),
                baud_rate,
                flow_control,
            }),
            path: path.to_string(),
            baud_rate,
            flow_control,
            channels,
            callback,
            writer: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    fn receive_loop(
        info: ConnectionInfo,
        mut reader: Box<dyn SerialPort>,
        mut parser: FrameParser,
        callback: FrameCallback,
        closable: Closable,
    ) {
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];

        while !closable.is_closed() {
            match reader.read(buf.as_mut_slice()) {
                Ok(0) => continue,
                Ok(bytes_read) => {
                    parser.push(&buf[..bytes_read]);
                    while let Some(frame) = parser.next_frame() {
                        callback(frame);
                    }
                }
                Err(err) if is_timeout(&err) => continue,
                Err(err) => {
                    if closable.is_closed() {
                        break;
                    }
                    log::warn!("[{info:?}] receive error: {err:?}");
                    thread::sleep(RECONNECT_INTERVAL);
                }
            }
        }

        log::trace!("[{info:?}] receive loop stopped");
    }
}

fn lock_port(port: &SharedPort) -> MutexGuard<'_, Option<Box<dyn SerialPort>>> {
    port.lock().unwrap_or_else(|err| err.into_inner())
}

impl Connection for SerialConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        let flow_control = if self.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(RECEIVE_POLL_INTERVAL)
            .flow_control(flow_control)
            .open()?;
        let reader = port.try_clone()?;
        let parser = FrameParser::new(self.channels.checkout()?);
        *lock_port(&self.writer) = Some(port);

        let info = self.info.clone();
        let callback = self.callback.clone();
        let task = ReceiveTask::spawn(&self.info, move |closable| {
            Self::receive_loop(info, reader, parser, callback, closable)
        });
        let task = match task {
            Ok(task) => task,
            Err(err) => {
                lock_port(&self.writer).take();
                return Err(err);
            }
        };

        log::info!("[{:?}] opened", self.info);
        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.signal();
            lock_port(&self.writer).take();
            task.join(&self.info);
            log::info!("[{:?}] closed", self.info);
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }

    fn send(&self, frame: &OutgoingFrame) -> bool {
        let bytes = match encode_frame(frame.frame()) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("[{:?}] can't encode frame: {err:?}", self.info);
                return false;
            }
        };

        match lock_port(&self.writer).as_mut() {
            Some(port) => match port.write_all(&bytes) {
                Ok(_) => true,
                Err(err) => {
                    log::warn!("[{:?}] send failed: {err:?}", self.info);
                    false
                }
            },
            None => false,
        }
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.stop();
    }
}
