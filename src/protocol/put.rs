//! PUT payload sub-format
// (c) 2024 Ross Younger
//!
//! A PUT frame's payload is:
//!
//! ```text
//! [name_length: u32][name: name_length bytes][file data: the rest]
//! ```
//!
//! The name is carried exactly as the client supplied it. Sanitizing it
//! (reducing to a final path component) is the storage layer's business.

use super::frame::{Frame, FrameError, Operation};

const NAME_LENGTH_LEN: usize = 4;

/// A parsed PUT payload, borrowing from the frame it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutRequest<'a> {
    /// The file name, raw
    pub name: &'a [u8],
    /// The file contents
    pub data: &'a [u8],
}

impl PutRequest<'_> {
    /// The name as text (lossy)
    #[must_use]
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name).into_owned()
    }
}

/// Checks that a PUT of the given dimensions fits in one frame.
///
/// On success, returns the payload length.
pub fn check_put_size(name_len: u64, data_len: u64) -> Result<u32, FrameError> {
    let size = (NAME_LENGTH_LEN as u64)
        .checked_add(name_len)
        .and_then(|n| n.checked_add(data_len))
        .unwrap_or(u64::MAX);
    u32::try_from(size).map_err(|_| FrameError::TooLarge { size })
}

/// Builds a PUT frame.
///
/// Fails with [`FrameError::TooLarge`] if the encoded payload would not fit in a
/// 32-bit length. Nothing is allocated in that case.
pub fn build_put_frame(name: &[u8], data: &[u8]) -> Result<Frame, FrameError> {
    let payload_len = check_put_size(name.len() as u64, data.len() as u64)?;
    #[allow(clippy::cast_possible_truncation)] // name is shorter than payload_len
    let name_len = name.len() as u32;

    let mut payload = Vec::with_capacity(payload_len as usize);
    payload.extend_from_slice(&name_len.to_be_bytes());
    payload.extend_from_slice(name);
    payload.extend_from_slice(data);
    Frame::new(Operation::Put, payload)
}

/// Parses a PUT frame into its name and data
pub fn parse_put_frame(frame: &Frame) -> Result<PutRequest<'_>, FrameError> {
    if frame.code() != u8::from(Operation::Put) {
        return Err(FrameError::Malformed(format!(
            "expected a PUT frame, got operation code {}",
            frame.code()
        )));
    }
    let payload = frame.payload();
    let Some((len_bytes, rest)) = payload.split_first_chunk::<NAME_LENGTH_LEN>() else {
        return Err(FrameError::Malformed(format!(
            "PUT payload of {} bytes is too short to hold a name length",
            payload.len()
        )));
    };
    let name_len = u32::from_be_bytes(*len_bytes) as usize;
    if name_len > rest.len() {
        return Err(FrameError::Malformed(format!(
            "PUT name length {name_len} exceeds the {} bytes available",
            rest.len()
        )));
    }
    let (name, data) = rest.split_at(name_len);
    Ok(PutRequest { name, data })
}
