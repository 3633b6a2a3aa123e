//! Wire framing
// (c) 2024 Ross Younger

use std::fmt::Display;

use strum::{Display as StrumDisplay, FromRepr};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

/// Size of the fixed frame header (operation byte + length)
pub const HEADER_LEN: usize = 5;

/// Largest payload a frame can describe
#[allow(clippy::cast_possible_truncation)] // usize is at least 32 bits on supported targets
pub const MAX_PAYLOAD: usize = u32::MAX as usize;

/// Operation codes understood by this protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, FromRepr)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Operation {
    /// Requests a listing of stored files
    List = 1,
    /// Uploads one file
    Put = 2,
    /// Ends the session
    Quit = 3,
    /// Reports a failure (responses only)
    Error = 255,
}

impl From<Operation> for u8 {
    fn from(value: Operation) -> Self {
        value as u8
    }
}

/// Phase of frame I/O, used to label transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Writing the operation byte and length together
    Header,
    /// Reading or writing the operation byte
    Operation,
    /// Reading or writing the payload length
    Length,
    /// Reading or writing the payload
    Payload,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Header => "frame header",
            Phase::Operation => "operation",
            Phase::Length => "payload length",
            Phase::Payload => "payload",
        })
    }
}

/// Errors arising from framing
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream failed (or was closed by the peer) before a frame was complete
    #[error("transport failure on {phase}: {source}")]
    Transport {
        /// What we were doing at the time
        phase: Phase,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },
    /// The frame arrived intact but its contents are inconsistent
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The payload cannot be described by a 32-bit length
    #[error("payload of {size} bytes exceeds the maximum frame size")]
    TooLarge {
        /// Attempted payload size
        size: u64,
    },
    /// The operation code is not one we know
    #[error("unknown operation code {0}")]
    UnknownOperation(u8),
}

impl FrameError {
    fn transport(phase: Phase) -> impl FnOnce(std::io::Error) -> Self {
        move |source| FrameError::Transport { phase, source }
    }

    /// Is this a transport failure (as opposed to bad content)?
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, FrameError::Transport { .. })
    }
}

/// One protocol message.
///
/// The operation is held as the raw code byte, so frames carrying codes we do not
/// understand can still be read off the wire in full and rejected by the dispatcher.
/// The payload length is always the length of `payload`; the constructors refuse
/// payloads that a 32-bit length cannot describe.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    code: u8,
    payload: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("code", &self.code)
            .field("payload length", &self.payload.len())
            .finish()
    }
}

impl Frame {
    /// Creates a frame with an arbitrary operation code
    pub fn with_code(code: u8, payload: Vec<u8>) -> Result<Self, FrameError> {
        check_payload_len(payload.len())?;
        Ok(Self { code, payload })
    }

    /// Creates a frame for a known operation
    pub fn new(op: Operation, payload: Vec<u8>) -> Result<Self, FrameError> {
        Self::with_code(op.into(), payload)
    }

    /// Creates a frame with no payload
    #[must_use]
    pub fn empty(op: Operation) -> Self {
        Self {
            code: op.into(),
            payload: Vec::new(),
        }
    }

    /// Creates a frame carrying a text message
    pub fn text(op: Operation, message: &str) -> Result<Self, FrameError> {
        Self::new(op, message.as_bytes().to_vec())
    }

    /// Creates an ERROR frame.
    ///
    /// An error is always sendable: a message longer than [`MAX_PAYLOAD`] is cut to fit.
    #[must_use]
    pub fn error(message: &str) -> Self {
        let mut payload = message.as_bytes().to_vec();
        payload.truncate(MAX_PAYLOAD);
        Self {
            code: Operation::Error.into(),
            payload,
        }
    }

    /// The raw operation code
    #[must_use]
    pub fn code(&self) -> u8 {
        self.code
    }

    /// The operation, if the code is one we recognise
    pub fn operation(&self) -> Result<Operation, FrameError> {
        Operation::from_repr(self.code).ok_or(FrameError::UnknownOperation(self.code))
    }

    /// Payload length as it appears on the wire
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // checked at construction
    pub fn payload_len(&self) -> u32 {
        self.payload.len() as u32
    }

    /// The payload
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame, returning its payload
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// The payload, interpreted as text
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Total size of this frame on the wire
    #[must_use]
    pub fn wire_len(&self) -> u64 {
        (HEADER_LEN + self.payload.len()) as u64
    }
}

fn check_payload_len(len: usize) -> Result<(), FrameError> {
    if len > MAX_PAYLOAD {
        return Err(FrameError::TooLarge { size: len as u64 });
    }
    Ok(())
}

/// Serializes a frame onto a stream: operation, big-endian length, payload.
pub async fn write_frame<W>(stream: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    header[0] = frame.code;
    header[1..].copy_from_slice(&frame.payload_len().to_be_bytes());
    stream
        .write_all(&header)
        .await
        .map_err(FrameError::transport(Phase::Header))?;
    if !frame.payload.is_empty() {
        stream
            .write_all(&frame.payload)
            .await
            .map_err(FrameError::transport(Phase::Payload))?;
    }
    stream
        .flush()
        .await
        .map_err(FrameError::transport(Phase::Payload))
}

/// Reads exactly one frame from a stream.
///
/// A short read at any point is a [`FrameError::Transport`]; there is no partial result.
pub async fn read_frame<R>(stream: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let code = stream
        .read_u8()
        .await
        .map_err(FrameError::transport(Phase::Operation))?;
    let len = stream
        .read_u32()
        .await
        .map_err(FrameError::transport(Phase::Length))?;
    let mut payload = vec![0u8; len as usize];
    let _ = stream
        .read_exact(&mut payload)
        .await
        .map_err(FrameError::transport(Phase::Payload))?;
    Ok(Frame { code, payload })
}

#[cfg(test)]
mod test {
    use super::{
        check_payload_len, read_frame, write_frame, Frame, FrameError, Operation, Phase,
        MAX_PAYLOAD,
    };
    use std::io::ErrorKind;

    async fn round_trip(frame: &Frame) -> Vec<u8> {
        let mut buf = Vec::new();
        write_frame(&mut buf, frame).await.unwrap();
        let decoded = read_frame(&mut buf.as_slice()).await.unwrap();
        assert_eq!(&decoded, frame);
        buf
    }

    #[tokio::test]
    async fn wire_layout() {
        let frame = Frame::new(Operation::Put, b"abc".to_vec()).unwrap();
        let wire = round_trip(&frame).await;
        assert_eq!(wire, [2, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn empty_payloads() {
        for op in [Operation::List, Operation::Quit, Operation::Put] {
            let wire = round_trip(&Frame::empty(op)).await;
            assert_eq!(wire.len(), 5);
            assert_eq!(wire[0], u8::from(op));
        }
    }

    #[tokio::test]
    async fn large_payload() {
        let data: Vec<u8> = (0..300_000u32)
            .map(|i| u8::try_from(i % 251).unwrap())
            .collect();
        let wire = round_trip(&Frame::new(Operation::Put, data).unwrap()).await;
        assert_eq!(&wire[1..5], &300_000u32.to_be_bytes());
    }

    #[tokio::test]
    async fn unknown_code_is_carried() {
        let frame = Frame::with_code(99, b"?".to_vec()).unwrap();
        let _ = round_trip(&frame).await;
        assert!(matches!(
            frame.operation(),
            Err(FrameError::UnknownOperation(99))
        ));
    }

    #[tokio::test]
    async fn truncation_is_transport_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &Frame::text(Operation::List, "hello").unwrap())
            .await
            .unwrap();

        for (cut, expected) in [
            (0, Phase::Operation),
            (3, Phase::Length),
            (7, Phase::Payload),
        ] {
            let err = read_frame(&mut &wire[..cut]).await.unwrap_err();
            match err {
                FrameError::Transport { phase, source } => {
                    assert_eq!(phase, expected);
                    assert_eq!(source.kind(), ErrorKind::UnexpectedEof);
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn operation_names() {
        assert_eq!(Operation::List.to_string(), "LIST");
        assert_eq!(Operation::from_repr(255), Some(Operation::Error));
        assert_eq!(Operation::from_repr(4), None);
    }

    #[test]
    fn payload_limit() {
        assert!(check_payload_len(0).is_ok());
        assert!(check_payload_len(MAX_PAYLOAD).is_ok());
        assert_eq!(u64::try_from(MAX_PAYLOAD).unwrap(), u64::from(u32::MAX));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_payload_is_refused() {
        let err = check_payload_len(MAX_PAYLOAD + 1).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { size } if size == 1 << 32));
    }

    #[test]
    fn text_and_error_frames() {
        let frame = Frame::text(Operation::List, "a (1 bytes)").unwrap();
        assert_eq!(frame.operation().unwrap(), Operation::List);
        assert_eq!(frame.payload_text(), "a (1 bytes)");

        let frame = Frame::error("nope");
        assert_eq!(frame.operation().unwrap(), Operation::Error);
        assert_eq!(frame.payload_len(), 4);
    }
}
