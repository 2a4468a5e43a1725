use crate::frame::{self, FrameError, HEADER_SIZE};

use bytes::Bytes;
use std::io::{self, Read};
use thiserror::Error;

/// A complete message received from one connection.
///
/// `payload` is exactly the frame body (the header is stripped) and is
/// owned by the caller once reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkReceive {
    connection_id: String,
    payload: Bytes,
}

impl NetworkReceive {
    pub(crate) fn new(connection_id: String, payload: Bytes) -> Self {
        Self {
            connection_id,
            payload,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The received payload, starting at its first byte.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Splits the receive into its connection id and payload.
    pub fn into_parts(self) -> (String, Bytes) {
        (self.connection_id, self.payload)
    }
}

/// Why an inbound stream can make no further progress.
#[derive(Debug, Error)]
pub(crate) enum ReceiveError {
    #[error("connection closed by peer")]
    Closed,

    #[error("framing violation: {0}")]
    Frame(#[from] FrameError),

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Progress of one read attempt.
#[derive(Debug, Default)]
pub(crate) struct ReadProgress {
    pub(crate) bytes: usize,
    pub(crate) frame: Option<Bytes>,
}

/// The partial receive of one connection.
///
/// `Empty` sits between frames. Bytes of a new frame first fill the
/// fixed header; once it decodes, a payload buffer of the announced
/// size is filled. A header announcing an empty payload completes
/// without entering the payload phase.
#[derive(Debug, Default)]
pub(crate) enum InboundState {
    #[default]
    Empty,
    Header {
        buf: [u8; HEADER_SIZE],
        filled: usize,
    },
    Payload {
        buf: Vec<u8>,
        filled: usize,
    },
}

impl InboundState {
    /// True while a frame is partially received.
    pub(crate) fn is_partial(&self) -> bool {
        !matches!(self, InboundState::Empty)
    }

    /// Reads from `source` until one frame completes or the source
    /// would block.
    ///
    /// At most one frame is returned per call; bytes of the next frame
    /// are left unread. End-of-stream at any point, including between
    /// frames, is [`ReceiveError::Closed`].
    pub(crate) fn read_from<R: Read>(
        &mut self,
        source: &mut R,
        max_frame_size: usize,
    ) -> Result<ReadProgress, ReceiveError> {
        let mut progress = ReadProgress::default();

        loop {
            let result = match self {
                InboundState::Empty => {
                    *self = InboundState::Header {
                        buf: [0; HEADER_SIZE],
                        filled: 0,
                    };
                    continue;
                }
                InboundState::Header { buf, filled } => source.read(&mut buf[*filled..]),
                InboundState::Payload { buf, filled } => source.read(&mut buf[*filled..]),
            };

            let n = match result {
                Ok(0) => return Err(ReceiveError::Closed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.settle();
                    return Ok(progress);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            progress.bytes += n;

            if let Some(payload) = self.advance(n, max_frame_size)? {
                progress.frame = Some(payload);
                return Ok(progress);
            }
        }
    }

    /// Moves the cursor of the current phase by `n` bytes and performs
    /// any phase transition that follows.
    fn advance(&mut self, n: usize, max_frame_size: usize) -> Result<Option<Bytes>, FrameError> {
        match self {
            InboundState::Empty => Ok(None),
            InboundState::Header { buf, filled } => {
                *filled += n;
                if *filled < HEADER_SIZE {
                    return Ok(None);
                }

                let size = frame::decode_size(*buf, max_frame_size)?;
                if size == 0 {
                    *self = InboundState::Empty;
                    return Ok(Some(Bytes::new()));
                }

                *self = InboundState::Payload {
                    buf: vec![0; size],
                    filled: 0,
                };
                Ok(None)
            }
            InboundState::Payload { buf, filled } => {
                *filled += n;
                if *filled < buf.len() {
                    return Ok(None);
                }

                let payload = std::mem::take(buf);
                *self = InboundState::Empty;
                Ok(Some(Bytes::from(payload)))
            }
        }
    }

    /// A header that has not received a single byte is not a partial frame.
    fn settle(&mut self) {
        if let InboundState::Header { filled: 0, .. } = self {
            *self = InboundState::Empty;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serves `data` in chunks of at most `chunk` bytes, then blocks.
    struct Chunked {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        eof: bool,
    }

    impl Chunked {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data,
                pos: 0,
                chunk,
                eof: false,
            }
        }
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.data.len() {
                if self.eof {
                    return Ok(0);
                }
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_reassembles_fragmented_frame() {
        let mut source = Chunked::new(frame::encode(b"fragmented payload").to_vec(), 3);
        let mut state = InboundState::default();

        let progress = state.read_from(&mut source, 1024).unwrap();
        assert_eq!(progress.frame.as_deref(), Some(&b"fragmented payload"[..]));
        assert_eq!(progress.bytes, 26);
        assert!(!state.is_partial());
    }

    #[test]
    fn test_header_split_across_reads() {
        let wire = frame::encode(b"abc").to_vec();
        let mut source = Chunked::new(wire[..5].to_vec(), 64);
        let mut state = InboundState::default();

        let progress = state.read_from(&mut source, 1024).unwrap();
        assert!(progress.frame.is_none());
        assert!(state.is_partial());

        source.data.extend_from_slice(&wire[5..]);
        let progress = state.read_from(&mut source, 1024).unwrap();
        assert_eq!(progress.frame.as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_header_only_frame_is_an_empty_payload() {
        let mut source = Chunked::new(8u64.to_be_bytes().to_vec(), 64);
        let mut state = InboundState::default();

        let progress = state.read_from(&mut source, 1024).unwrap();
        assert_eq!(progress.frame, Some(Bytes::new()));
        assert!(!state.is_partial());
    }

    #[test]
    fn test_one_frame_per_call() {
        let mut wire = frame::encode(b"first").to_vec();
        wire.extend_from_slice(&frame::encode(b"second"));
        let mut source = Chunked::new(wire, 4096);
        let mut state = InboundState::default();

        let first = state.read_from(&mut source, 1024).unwrap().frame;
        let second = state.read_from(&mut source, 1024).unwrap().frame;
        let third = state.read_from(&mut source, 1024).unwrap().frame;

        assert_eq!(first.as_deref(), Some(&b"first"[..]));
        assert_eq!(second.as_deref(), Some(&b"second"[..]));
        assert!(third.is_none());
        assert!(!state.is_partial());
    }

    #[test]
    fn test_undersized_header_is_a_framing_violation() {
        let mut source = Chunked::new(7u64.to_be_bytes().to_vec(), 64);
        let mut state = InboundState::default();

        let err = state.read_from(&mut source, 1024).unwrap_err();
        assert!(matches!(err, ReceiveError::Frame(FrameError::TooShort(7))));
    }

    #[test]
    fn test_oversized_header_is_a_framing_violation() {
        let mut source = Chunked::new(4096u64.to_be_bytes().to_vec(), 64);
        let mut state = InboundState::default();

        let err = state.read_from(&mut source, 1024).unwrap_err();
        assert!(matches!(err, ReceiveError::Frame(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_eof_mid_payload_is_closed() {
        let wire = frame::encode(b"truncated").to_vec();
        let mut source = Chunked::new(wire[..12].to_vec(), 64);
        source.eof = true;
        let mut state = InboundState::default();

        let err = state.read_from(&mut source, 1024).unwrap_err();
        assert!(matches!(err, ReceiveError::Closed));
    }
}
