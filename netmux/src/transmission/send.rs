use crate::frame;

use bytes::Bytes;
use std::io::{self, Write};

/// A framed message addressed to one connection.
///
/// The buffer always holds a complete frame (header included). Once the
/// selector has written the last byte the same value is handed back
/// through [`Selector::completed_sends`](crate::Selector::completed_sends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSend {
    connection_id: String,
    frame: Bytes,
}

impl NetworkSend {
    /// Frames `payload` for `connection_id`.
    pub fn new(connection_id: impl Into<String>, payload: impl AsRef<[u8]>) -> Self {
        Self {
            connection_id: connection_id.into(),
            frame: frame::encode(payload.as_ref()),
        }
    }

    /// Wraps a buffer that is already a complete frame.
    ///
    /// The header is sent as-is; a peer decoding it is the one that
    /// rejects a malformed size.
    pub fn from_frame(connection_id: impl Into<String>, frame: Bytes) -> Self {
        Self {
            connection_id: connection_id.into(),
            frame,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The full frame, header included.
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    /// The payload without its header.
    pub fn payload(&self) -> Bytes {
        self.frame.slice(frame::HEADER_SIZE.min(self.frame.len())..)
    }
}

/// Progress of one write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteProgress {
    pub(crate) bytes: usize,
    pub(crate) complete: bool,
}

/// The in-flight send of one connection: a frame plus a write cursor.
///
/// Invariant: `written <= send.frame.len()`.
#[derive(Debug)]
pub(crate) struct OutboundState {
    send: NetworkSend,
    written: usize,
}

impl OutboundState {
    pub(crate) fn new(send: NetworkSend) -> Self {
        Self { send, written: 0 }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.written == self.send.frame.len()
    }

    /// Writes as much of the remaining frame as `sink` accepts.
    ///
    /// Stops when the frame is fully written or the sink would block.
    /// A sink that accepts zero bytes is reported as `WriteZero`.
    pub(crate) fn write_to<W: Write>(&mut self, sink: &mut W) -> io::Result<WriteProgress> {
        let mut bytes = 0;

        while !self.is_complete() {
            match sink.write(&self.send.frame[self.written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ));
                }
                Ok(n) => {
                    self.written += n;
                    bytes += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(WriteProgress {
            bytes,
            complete: self.is_complete(),
        })
    }

    pub(crate) fn into_send(self) -> NetworkSend {
        self.send
    }
}
