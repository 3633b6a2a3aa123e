//! Per-connection operation dispatcher
// (c) 2024 Ross Younger

use std::{net::SocketAddr, sync::Arc};

use tokio::{net::TcpStream, sync::watch};
use tracing::{debug, info, trace, warn};

use super::ServerContext;
use crate::protocol::{parse_put_frame, read_frame, write_frame, Frame, Operation};
use crate::storage::Storage;
use crate::telemetry::{deliver, PendingRecord, TransportSampler};

/// Payload of a LIST response when there is nothing to list
pub const NO_FILES: &str = "No files found";
/// Payload of the ERROR response to an operation we don't handle
pub const UNKNOWN_OPERATION: &str = "unknown operation";

/// What the dispatcher decided to do about one request
#[derive(Debug)]
pub struct Reply {
    /// Label for the connection record
    pub label: &'static str,
    /// Response to send
    pub frame: Frame,
    /// Close the connection after responding?
    pub close: bool,
}

impl Reply {
    fn new(label: &'static str, frame: Frame) -> Self {
        Self {
            label,
            frame,
            close: false,
        }
    }
}

/// Works out the response to one request frame
pub async fn dispatch(request: Frame, storage: &Arc<dyn Storage>) -> Reply {
    match request.operation() {
        Ok(Operation::List) => Reply::new("LIST", list(storage.clone()).await),
        Ok(Operation::Put) => Reply::new("PUT", put(request, storage.clone()).await),
        Ok(Operation::Quit) => Reply {
            close: true,
            ..Reply::new("QUIT", Frame::empty(Operation::Quit))
        },
        Ok(Operation::Error) | Err(_) => {
            debug!("rejecting operation code {}", request.code());
            Reply::new("UNKNOWN", Frame::error(UNKNOWN_OPERATION))
        }
    }
}

async fn list(storage: Arc<dyn Storage>) -> Frame {
    let listing = tokio::task::spawn_blocking(move || storage.list())
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r);
    match listing {
        Ok(items) if items.is_empty() => text_reply(Operation::List, NO_FILES),
        Ok(items) => {
            let lines: Vec<String> = items
                .iter()
                .map(|item| format!("{} ({} bytes)", item.name, item.size))
                .collect();
            text_reply(Operation::List, &lines.join("\n"))
        }
        Err(e) => Frame::error(&format!("Failed to list files: {e}")),
    }
}

/// A text response, or an ERROR if the text won't fit in a frame
fn text_reply(op: Operation, message: &str) -> Frame {
    Frame::text(op, message).unwrap_or_else(|e| Frame::error(&e.to_string()))
}

async fn put(request: Frame, storage: Arc<dyn Storage>) -> Frame {
    tokio::task::spawn_blocking(move || store(&request, storage.as_ref()))
        .await
        .unwrap_or_else(|e| Frame::error(&format!("Failed to save file: {e}")))
}

fn store(request: &Frame, storage: &dyn Storage) -> Frame {
    let put = match parse_put_frame(request) {
        Ok(p) => p,
        Err(e) => return Frame::error(&format!("Invalid PUT request: {e}")),
    };
    match storage.create(&put.name_lossy(), put.data) {
        Ok(name) => {
            info!("File saved: {name} ({} bytes)", put.data.len());
            text_reply(
                Operation::Put,
                &format!("File {name} uploaded successfully ({} bytes)", put.data.len()),
            )
        }
        Err(e) => {
            debug!("PUT refused: {e}");
            Frame::error(&e.to_string())
        }
    }
}

/// Connection states
#[derive(Debug)]
enum State {
    AwaitingFrame,
    Processing(Frame),
    Responding(Reply),
    Closed,
}

/// Runs one connection until the peer quits, hangs up or fails, or `closing` becomes true.
///
/// `closing` is only observed between requests.
/// The connection record is handed to the context's sink exactly once, at the end.
pub(crate) async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ServerContext>,
    mut closing: watch::Receiver<bool>,
) {
    debug!("New connection from {peer}");
    let mut record = PendingRecord::new(peer.to_string(), "CONNECT", context.labels.clone());
    let sampler = TransportSampler::for_socket(&stream);
    let _ = sampler.sample_once();

    let mut state = State::AwaitingFrame;
    loop {
        state = match state {
            State::AwaitingFrame => tokio::select! {
                read = read_frame(&mut stream) => match read {
                    Ok(frame) => {
                        trace!("received {frame:?}");
                        record.add_received(frame.wire_len());
                        State::Processing(frame)
                    }
                    Err(e) => {
                        debug!("Connection {peer} closed: {e}");
                        State::Closed
                    }
                },
                _ = closing.wait_for(|c| *c) => {
                    debug!("Closing connection {peer} for shutdown");
                    State::Closed
                }
            },
            State::Processing(request) => {
                let reply = dispatch(request, &context.storage).await;
                record.set_operation(reply.label);
                State::Responding(reply)
            }
            State::Responding(reply) => match write_frame(&mut stream, &reply.frame).await {
                Ok(()) => {
                    record.add_sent(reply.frame.wire_len());
                    if reply.close {
                        debug!("Client {peer} requested quit");
                        State::Closed
                    } else {
                        State::AwaitingFrame
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to send response to {peer}: {e} (after {} bytes sent, {} received)",
                        record.bytes_sent(),
                        record.bytes_received()
                    );
                    State::Closed
                }
            },
            State::Closed => break,
        };
    }

    let _ = sampler.sample_once();
    deliver(&context.sink, record.finish(sampler.take_samples())).await;
}
