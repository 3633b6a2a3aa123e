//! Client side of one connection
// (c) 2024 Ross Younger

use std::path::{Path, PathBuf};

use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::protocol::{
    build_put_frame, check_put_size, read_frame, write_frame, Frame, FrameError, Operation,
};
use crate::telemetry::{
    deliver, ConnectionRecord, PendingRecord, SamplingPolicy, TransportSampler,
};

use super::ClientContext;

/// Things that can go wrong on the client side
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not connect to the server
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// The address we tried
        addr: String,
        /// What went wrong
        #[source]
        source: std::io::Error,
    },
    /// Sending a request failed
    #[error("send failed: {0}")]
    Send(#[source] FrameError),
    /// Receiving a response failed
    #[error("receive failed: {0}")]
    Receive(#[source] FrameError),
    /// A frame could not be built or understood
    #[error(transparent)]
    Protocol(FrameError),
    /// The server answered with a different operation than the one we asked for
    #[error("unexpected response (operation code {code}) to {expected}")]
    UnexpectedResponse {
        /// What we asked for
        expected: Operation,
        /// What we got
        code: u8,
    },
    /// The server sent an ERROR response; this is its text, unchanged
    #[error("{0}")]
    Server(String),
    /// Reading the local file failed
    #[error("{}: {source}", path.display())]
    File {
        /// The local file
        path: PathBuf,
        /// What went wrong
        #[source]
        source: std::io::Error,
    },
    /// The session has already quit
    #[error("session is closed")]
    Closed,
}

/// One client connection, with its record and sampler.
///
/// The record is produced by [`finish`](Self::finish), whichever way the session went.
#[derive(Debug)]
pub struct Session {
    stream: TcpStream,
    record: PendingRecord,
    sampler: TransportSampler,
    policy: SamplingPolicy,
    closed: bool,
}

impl Session {
    /// Connects to a server
    pub async fn connect(addr: &str, labels: crate::telemetry::Labels) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let remote = stream
            .peer_addr()
            .map_or_else(|_| addr.to_string(), |a| a.to_string());
        debug!("Connected to {remote}");
        let sampler = TransportSampler::for_socket(&stream);
        Ok(Self {
            stream,
            record: PendingRecord::new(remote, "CONNECT", labels),
            sampler,
            policy: SamplingPolicy::default(),
            closed: false,
        })
    }

    /// Sets the sampling policy for subsequent transfers
    #[must_use]
    pub fn with_policy(mut self, policy: SamplingPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn send(&mut self, request: &Frame) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        write_frame(&mut self.stream, request)
            .await
            .map_err(ClientError::Send)?;
        self.record.add_sent(request.wire_len());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Frame, ClientError> {
        let response = read_frame(&mut self.stream).await.map_err(|e| {
            if e.is_transport() {
                ClientError::Receive(e)
            } else {
                ClientError::Protocol(e)
            }
        })?;
        self.record.add_received(response.wire_len());
        trace!("received {response:?}");
        Ok(response)
    }

    /// Sends any frame and returns the response, whatever it is
    pub async fn exchange(&mut self, request: &Frame) -> Result<Frame, ClientError> {
        self.send(request).await?;
        self.receive().await
    }

    /// Asks the server what it has
    pub async fn list(&mut self) -> Result<String, ClientError> {
        self.record.set_operation("LIST");
        let response = self.exchange(&Frame::empty(Operation::List)).await?;
        Ok(expect(response, Operation::List)?.payload_text())
    }

    /// Uploads a file, sampling the transport as it goes.
    ///
    /// Returns the server's confirmation message.
    pub async fn put(&mut self, name: &str, data: &[u8]) -> Result<String, ClientError> {
        let request = build_put_frame(name.as_bytes(), data).map_err(ClientError::Protocol)?;
        self.record.set_operation(format!("PUT {name}"));

        let _ = self.sampler.sample_once();
        if self.policy.wants_periodic(data.len() as u64) {
            self.sampler.start_periodic(self.policy.interval);
        }
        let sent = self.send(&request).await;
        let _ = self.sampler.sample_once();
        let response = match sent {
            Ok(()) => self.receive().await,
            Err(e) => Err(e),
        };
        self.sampler.stop().await;
        let _ = self.sampler.sample_once();

        Ok(expect(response?, Operation::Put)?.payload_text())
    }

    /// Tells the server we're done
    pub async fn quit(&mut self) -> Result<(), ClientError> {
        let response = self.exchange(&Frame::empty(Operation::Quit)).await?;
        self.closed = true;
        let _ = expect(response, Operation::Quit)?;
        Ok(())
    }

    /// Samples collected so far
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.sampler.len()
    }

    /// Closes the session, producing its record
    #[must_use]
    pub fn finish(self) -> ConnectionRecord {
        let samples = self.sampler.take_samples();
        self.record.finish(samples)
    }
}

fn expect(response: Frame, wanted: Operation) -> Result<Frame, ClientError> {
    match response.operation() {
        Ok(op) if op == wanted => Ok(response),
        Ok(Operation::Error) => Err(ClientError::Server(response.payload_text())),
        _ => Err(ClientError::UnexpectedResponse {
            expected: wanted,
            code: response.code(),
        }),
    }
}

/// A single operation for [`one_shot`]
#[derive(Debug, Clone, Copy)]
enum Request<'a> {
    List,
    Put { name: &'a str, data: &'a [u8] },
}

/// Runs a single operation on a fresh connection, then quits.
///
/// A record always reaches the sink, even if we never managed to connect.
async fn one_shot(ctx: &ClientContext, request: Request<'_>) -> Result<String, ClientError> {
    let label = match request {
        Request::List => "LIST".to_string(),
        Request::Put { name, .. } => format!("PUT {name}"),
    };
    let mut session = match Session::connect(&ctx.server, ctx.labels.clone()).await {
        Ok(s) => s.with_policy(ctx.policy),
        Err(e) => {
            let record =
                PendingRecord::new(ctx.server.clone(), label, ctx.labels.clone()).finish(Vec::new());
            deliver(&ctx.sink, record).await;
            return Err(e);
        }
    };
    let result = match request {
        Request::List => session.list().await,
        Request::Put { name, data } => session.put(name, data).await,
    };
    if result.is_ok() {
        let _ = session
            .quit()
            .await
            .inspect_err(|e| debug!("quit failed: {e}"));
    }
    deliver(&ctx.sink, session.finish()).await;
    result
}

/// One-shot LIST
pub async fn list_files(ctx: &ClientContext) -> Result<String, ClientError> {
    one_shot(ctx, Request::List).await
}

/// One-shot PUT of a local file.
///
/// The file is size-checked from its metadata before it is read, and read before we connect.
pub async fn put_file(ctx: &ClientContext, path: &Path) -> Result<String, ClientError> {
    let (name, data) = read_upload(path).await?;
    one_shot(
        ctx,
        Request::Put {
            name: &name,
            data: &data,
        },
    )
    .await
}

/// Reads a file to upload, checking its size first
pub(crate) async fn read_upload(path: &Path) -> Result<(String, Vec<u8>), ClientError> {
    let file_error = |source| ClientError::File {
        path: path.to_path_buf(),
        source,
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| file_error(std::io::ErrorKind::InvalidInput.into()))?;
    let meta = tokio::fs::metadata(path).await.map_err(file_error)?;
    let _ = check_put_size(name.len() as u64, meta.len()).map_err(ClientError::Protocol)?;
    let data = tokio::fs::read(path).await.map_err(file_error)?;
    Ok((name, data))
}
