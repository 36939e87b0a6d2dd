// SPDX-License-Identifier: Apache-2.0

//! Byte source abstraction for the radar data UART.
//!
//! The reader thread consumes bytes through the [`RadarSource`] trait,
//! enabling:
//!
//! - **Live operation**: reading from the radar's data serial port
//! - **Testing**: replaying scripted byte streams
//!
//! A read that times out returns `Ok(0)`; the reader treats it as "no data
//! yet" and keeps polling, which also gives it a chance to observe shutdown.

use crate::radar::Error;
use std::{collections::VecDeque, io::Read as _, thread::sleep, time::Duration};
use tracing::{error, info};

/// Serial read timeout. The radar streams continuously; the timeout only
/// bounds how long the reader can be blind to a shutdown request.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Delay before the single reconnection attempt after a failed port open.
const RETRY_DELAY: Duration = Duration::from_secs(20);

/// Internal read chunk; the framing loop consumes one byte at a time, so
/// port reads are amortized through a small buffer.
const CHUNK_SIZE: usize = 256;

/// Trait for radar byte sources.
pub trait RadarSource: Send {
    /// Read up to `buf.len()` bytes.
    ///
    /// # Returns
    /// - `Ok(n)` - number of bytes read; 0 indicates a timeout
    /// - `Err` - unrecoverable source error
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

/// Serial port source for live sensor operation.
///
/// The data UART runs 8-N-1 at the configured baud rate. Reads are buffered
/// internally so the byte-at-a-time framing loop does not pay one syscall
/// per byte.
pub struct SerialSource {
    port: Box<dyn serialport::SerialPort>,
    buffer: VecDeque<u8>,
}

impl SerialSource {
    /// Open the data serial port, retrying once after 20 seconds.
    ///
    /// The radar may still be enumerating when the process starts, so a
    /// single delayed retry is attempted before giving up. A second failure
    /// is fatal to the pipeline.
    pub fn connect(path: &str, baud: u32) -> Result<Self, Error> {
        let port = match Self::open(path, baud) {
            Ok(port) => port,
            Err(err) => {
                log::warn!(
                    "Failed to open data serial port: {}, retrying in {} seconds",
                    err,
                    RETRY_DELAY.as_secs()
                );
                sleep(RETRY_DELAY);
                match Self::open(path, baud) {
                    Ok(port) => port,
                    Err(err) => {
                        error!(path, baud, "Could not open data serial port: {}", err);
                        return Err(err.into());
                    }
                }
            }
        };

        info!(path, baud, "Data serial port is open");
        Ok(Self {
            port,
            buffer: VecDeque::with_capacity(CHUNK_SIZE),
        })
    }

    fn open(path: &str, baud: u32) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
        serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()
    }
}

impl RadarSource for SerialSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.buffer.is_empty() {
            let mut chunk = [0u8; CHUNK_SIZE];
            match self.port.read(&mut chunk) {
                Ok(n) => self.buffer.extend(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }

        let mut count = 0;
        while count < buf.len()
            && let Some(byte) = self.buffer.pop_front()
        {
            buf[count] = byte;
            count += 1;
        }
        Ok(count)
    }
}

/// Scripted byte source for unit and integration testing.
///
/// Yields the scripted bytes in configurable chunks, then behaves like a
/// silent serial port: every further read times out after a short pause.
pub struct TestSource {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl TestSource {
    /// Create a test source over the given byte stream.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            chunk: CHUNK_SIZE,
        }
    }

    /// Limit how many bytes each read returns, to exercise partial reads.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl RadarSource for TestSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.pos >= self.data.len() {
            // Stream exhausted; emulate a quiet port.
            sleep(Duration::from_millis(1));
            return Ok(0);
        }

        let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
