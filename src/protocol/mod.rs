// (c) 2024 Ross Younger

//! Protocol definitions
//!
#![allow(clippy::doc_markdown)]
//! # The tcpbench protocol
//!
//! tcpbench moves files from a client to a server over a single TCP connection.
//! The connection carries a sequence of request/response pairs; each message is one [frame].
//!
//! ## Framing
//!
//! Every message on the wire looks like this (network byte order):
//!
//! ```text
//! [operation: 1 byte][payload_length: u32][payload: payload_length bytes]
//! ```
//!
//! There is no padding, no magic number and no version field. The operation codes are:
//!
//! | Code | Operation | Request payload | Response payload |
//! |------|-----------|-----------------|------------------|
//! | 1    | LIST      | empty           | newline-separated `name (N bytes)` entries |
//! | 2    | PUT       | see [put]       | human-readable confirmation |
//! | 3    | QUIT      | empty           | empty; the server closes the connection afterwards |
//! | 255  | ERROR     | (never sent by clients) | human-readable error message |
//!
//! Any other code is invalid. The server answers it with an ERROR frame and keeps the
//! connection open.
//!
//! ## Flow
//!
//! 1. The client connects.
//! 1. The client sends a request frame and waits for exactly one response frame.
//! 1. Repeat as desired. Closing the connection, or sending QUIT, ends the session.
//!
//! There are no timeouts. A peer that never answers blocks the other side indefinitely.
//!
//! ## Why TCP?
//!
//! The point of this tool is to observe the kernel's congestion control at work
//! (see [`crate::telemetry`]). Each PUT goes out as one frame in one `write`, so the
//! kernel sees a single large burst and we can watch `cwnd` and `ssthresh` respond.
//!
//! [frame]: self::frame::Frame
//! [put]: self::put

pub mod frame;
pub mod put;

pub use frame::{read_frame, write_frame, Frame, FrameError, Operation};
pub use put::{build_put_frame, check_put_size, parse_put_frame, PutRequest};
