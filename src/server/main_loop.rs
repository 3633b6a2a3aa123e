//! Server accept loop
// (c) 2024 Ross Younger

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use tokio::{net::TcpListener, sync::watch, task::JoinSet};
use tracing::{debug, info, trace, trace_span, warn, Instrument as _};

use super::{dispatch::serve_connection, ServerContext};

/// A bound listener with its shared context
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl Server {
    /// Binds the listening socket
    pub async fn bind(addr: &str, context: ServerContext) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self {
            listener,
            context: Arc::new(context),
        })
    }

    /// The address we are actually listening on
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes, then closes live connections.
    ///
    /// Each connection runs in its own task. A failed accept is logged and does not stop the server.
    /// At shutdown, a connection waiting for its next request is closed at once;
    /// one in the middle of a request finishes it first. Either way its record is written.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        let (closing, _) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            warn!("accept failed: {e}");
                            continue;
                        }
                    };
                    let context = self.context.clone();
                    let _ = tasks.spawn(
                        serve_connection(stream, peer, context, closing.subscribe())
                            .instrument(trace_span!("CONN", peer = %peer)),
                    );
                }
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = done {
                        warn!("connection task failed: {e}");
                    }
                }
            }
        }

        let _ = closing.send_replace(true);
        trace!("closing {} connection(s)", tasks.len());
        while let Some(done) = tasks.join_next().await {
            if let Err(e) = done {
                warn!("connection task failed: {e}");
            }
        }
        debug!("server stopped");
        Ok(())
    }
}

/// Completes on SIGINT, or on SIGTERM where there is such a thing
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => (),
                    _ = term.recv() => (),
                }
            }
            Err(e) => {
                warn!("unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;
}

/// Server main loop: listens on `addr` until interrupted
pub async fn server_main(addr: &str, context: ServerContext) -> anyhow::Result<()> {
    let server = Server::bind(addr, context).await?;
    info!("Server listening on {}", server.local_addr()?);
    server.run_until(shutdown_signal()).await
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpStream,
        sync::oneshot,
        task::JoinHandle,
    };

    use super::Server;
    use crate::protocol::{build_put_frame, read_frame, write_frame, Frame, Operation};
    use crate::server::{ServerContext, NO_FILES, UNKNOWN_OPERATION};
    use crate::storage::DirectoryStorage;
    use crate::telemetry::{Labels, MemorySink};

    struct Harness {
        addr: std::net::SocketAddr,
        sink: MemorySink,
        dir: tempfile::TempDir,
        stop: Option<oneshot::Sender<()>>,
        task: Option<JoinHandle<anyhow::Result<()>>>,
    }

    impl Harness {
        async fn start() -> Self {
            crate::util::tracing::setup_tracing_for_tests();
            let dir = tempfile::tempdir().unwrap();
            let sink = MemorySink::new();
            let context = ServerContext {
                storage: Arc::new(DirectoryStorage::new(dir.path()).unwrap()),
                sink: Arc::new(sink.clone()),
                labels: Labels {
                    scenario: Some("test".into()),
                    container_name: Some("server".into()),
                },
            };
            let server = Server::bind("127.0.0.1:0", context).await.unwrap();
            let addr = server.local_addr().unwrap();
            let (tx, rx) = oneshot::channel::<()>();
            let task = tokio::spawn(server.run_until(async {
                let _ = rx.await;
            }));
            Self {
                addr,
                sink,
                dir,
                stop: Some(tx),
                task: Some(task),
            }
        }

        async fn connect(&self) -> TcpStream {
            TcpStream::connect(self.addr).await.unwrap()
        }

        /// Stops the server and waits for every connection to be recorded
        async fn stop(mut self) -> Self {
            let _ = self.stop.take().unwrap().send(());
            self.task.take().unwrap().await.unwrap().unwrap();
            self
        }
    }

    /// Closes our side and waits until the server has closed its side
    async fn hang_up(mut stream: TcpStream) {
        stream.shutdown().await.unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await.unwrap();
    }

    async fn exchange(stream: &mut TcpStream, request: &Frame) -> Frame {
        write_frame(stream, request).await.unwrap();
        read_frame(stream).await.unwrap()
    }

    #[tokio::test]
    async fn list_on_empty_server() {
        let harness = Harness::start().await;
        let mut stream = harness.connect().await;
        let reply = exchange(&mut stream, &Frame::empty(Operation::List)).await;
        assert_eq!(reply.operation().unwrap(), Operation::List);
        assert_eq!(reply.payload_text(), NO_FILES);

        let reply = exchange(&mut stream, &Frame::empty(Operation::Quit)).await;
        assert_eq!(reply, Frame::empty(Operation::Quit));
        hang_up(stream).await;

        let harness = harness.stop().await;
        let records = harness.sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.operation, "QUIT");
        assert_eq!(record.bytes_received, 10);
        assert_eq!(record.bytes_sent, 5 + NO_FILES.len() as u64 + 5);
        assert_eq!(record.labels.scenario.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn put_and_collide() {
        let harness = Harness::start().await;
        let mut stream = harness.connect().await;
        let put = build_put_frame(b"a.txt", b"0123456789").unwrap();

        let reply = exchange(&mut stream, &put).await;
        assert_eq!(reply.operation().unwrap(), Operation::Put);
        assert!(reply.payload_text().contains("(10 bytes)"));

        let reply = exchange(&mut stream, &put).await;
        assert_eq!(reply.operation().unwrap(), Operation::Error);
        assert!(reply.payload_text().contains("already exists"));

        let reply = exchange(&mut stream, &Frame::empty(Operation::List)).await;
        assert_eq!(reply.payload_text(), "a.txt (10 bytes)");
        hang_up(stream).await;

        let harness = harness.stop().await;
        assert_eq!(
            std::fs::read(harness.dir.path().join("a.txt")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn unknown_operation_keeps_connection() {
        let harness = Harness::start().await;
        let mut stream = harness.connect().await;
        let reply = exchange(&mut stream, &Frame::with_code(99, Vec::new()).unwrap()).await;
        assert_eq!(reply.operation().unwrap(), Operation::Error);
        assert_eq!(reply.payload_text(), UNKNOWN_OPERATION);

        let reply = exchange(&mut stream, &Frame::empty(Operation::List)).await;
        assert_eq!(reply.operation().unwrap(), Operation::List);
        hang_up(stream).await;
        let harness = harness.stop().await;
        assert_eq!(harness.sink.records()[0].operation, "LIST");
    }

    #[tokio::test]
    async fn truncated_frame_ends_connection() {
        let harness = Harness::start().await;
        let mut stream = harness.connect().await;
        stream.write_all(&[2, 0, 0]).await.unwrap();
        hang_up(stream).await;

        let harness = harness.stop().await;
        let records = harness.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, "CONNECT");
        assert_eq!(records[0].bytes_received, 0);
    }

    #[tokio::test]
    async fn racing_uploads_have_one_winner() {
        let harness = Harness::start().await;
        let mut a = harness.connect().await;
        let mut b = harness.connect().await;
        let put_a = build_put_frame(b"same", b"from a").unwrap();
        let put_b = build_put_frame(b"same", b"from b").unwrap();
        let (ra, rb) = tokio::join!(exchange(&mut a, &put_a), exchange(&mut b, &put_b));
        let wins = [&ra, &rb]
            .iter()
            .filter(|r| r.operation().unwrap() == Operation::Put)
            .count();
        assert_eq!(wins, 1);
        let _ = tokio::join!(hang_up(a), hang_up(b));
        let harness = harness.stop().await;
        assert_eq!(harness.sink.records().len(), 2);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn server_samples_each_connection() {
        let harness = Harness::start().await;
        let mut stream = harness.connect().await;
        let data = vec![7u8; 2 * 1024 * 1024];
        let reply = exchange(&mut stream, &build_put_frame(b"big", &data).unwrap()).await;
        assert_eq!(reply.operation().unwrap(), Operation::Put);
        hang_up(stream).await;

        let harness = harness.stop().await;
        let record = &harness.sink.records()[0];
        assert_eq!(record.operation, "PUT");
        assert!(record.samples.len() >= 2);
        assert!(record
            .samples
            .windows(2)
            .all(|w| w[0].retransmit_count <= w[1].retransmit_count));
    }

    #[tokio::test]
    async fn shutdown_with_idle_server() {
        let harness = Harness::start().await;
        let harness = tokio::time::timeout(Duration::from_secs(5), harness.stop())
            .await
            .unwrap();
        assert!(harness.sink.records().is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connections() {
        let harness = Harness::start().await;
        let mut stream = harness.connect().await;
        let reply = exchange(&mut stream, &Frame::empty(Operation::List)).await;
        assert_eq!(reply.operation().unwrap(), Operation::List);

        // the client stays connected and says nothing more
        let harness = tokio::time::timeout(Duration::from_secs(5), harness.stop())
            .await
            .unwrap();
        let records = harness.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, "LIST");
        assert_eq!(records[0].bytes_received, 5);

        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_abandons_partial_frame() {
        let harness = Harness::start().await;
        let mut stream = harness.connect().await;
        let _ = exchange(&mut stream, &Frame::empty(Operation::List)).await;
        // a PUT header promising more than we send
        stream.write_all(&[2, 0, 0, 1, 0, b'x']).await.unwrap();

        let harness = tokio::time::timeout(Duration::from_secs(5), harness.stop())
            .await
            .unwrap();
        let records = harness.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].bytes_received, 5);
        assert_eq!(records[0].operation, "LIST");
        assert!(std::fs::read_dir(harness.dir.path()).unwrap().next().is_none());
    }
}
