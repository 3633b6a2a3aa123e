// tcpbench client entrypoints: one-shot commands and the interactive shell
// (c) 2024 Ross Younger

use std::{path::PathBuf, str::FromStr};

use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader};
use tracing::{debug, error, trace_span, Instrument as _};

use super::session::{read_upload, ClientError, Session};
use super::{list_files, put_file, ClientContext};
use crate::telemetry::deliver;

const HELP: &str = "\
Commands:
  list          list files on the server
  put <file>    upload a local file
  quit          disconnect and exit
  help          show this message";

/// A client command, as typed at the shell or given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the server's files
    List,
    /// Upload a file
    Put(PathBuf),
    /// Disconnect
    Quit,
    /// Print the command summary
    Help,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(v, r)| (v, r.trim()));
        match (verb.to_ascii_lowercase().as_str(), rest) {
            ("list", "") => Ok(Self::List),
            ("put", "") => Err("usage: put <file>".into()),
            ("put", file) => Ok(Self::Put(PathBuf::from(file))),
            ("quit" | "exit", "") => Ok(Self::Quit),
            ("help" | "?", "") => Ok(Self::Help),
            _ => Err(format!("unknown command: {line} (try \"help\")")),
        }
    }
}

/// Runs an interactive session over one connection, until `quit` or end of input.
///
/// Command results go to `output`.
/// The session always comes back, even when `input` or `output` fails, so the caller
/// can finish its record.
pub async fn run_shell<R, W>(
    mut session: Session,
    input: R,
    output: &mut W,
) -> (Session, anyhow::Result<()>)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = shell_loop(&mut session, input, output).await;
    let _ = session
        .quit()
        .await
        .inspect_err(|e| debug!("quit failed: {e}"));
    (session, result)
}

async fn shell_loop<R, W>(session: &mut Session, input: R, output: &mut W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(c) => c,
            Err(msg) => {
                output.write_all(format!("{msg}\n").as_bytes()).await?;
                continue;
            }
        };
        let result = match command {
            Command::Quit => return Ok(()),
            Command::Help => Ok(HELP.to_string()),
            Command::List => session.list().await,
            Command::Put(path) => match read_upload(&path).await {
                Ok((name, data)) => session.put(&name, &data).await,
                Err(e) => Err(e),
            },
        };
        match result {
            Ok(text) => output.write_all(format!("{text}\n").as_bytes()).await?,
            Err(e) => {
                output.write_all(format!("Error: {e}\n").as_bytes()).await?;
                if matches!(
                    e,
                    ClientError::Send(_) | ClientError::Receive(_) | ClientError::Closed
                ) {
                    return Ok(());
                }
            }
        }
    }
}

/// Client entrypoint.
///
/// With no command, runs the interactive shell on stdin/stdout.
/// Returns whether everything succeeded.
pub async fn client_main(ctx: ClientContext, command: &[String]) -> anyhow::Result<bool> {
    let span = trace_span!("CLIENT", server = %ctx.server);
    async move {
        if command.is_empty() {
            return interactive(&ctx).await;
        }
        let result = match command.join(" ").parse::<Command>() {
            Ok(Command::List) => list_files(&ctx).await,
            Ok(Command::Put(path)) => put_file(&ctx, &path).await,
            Ok(Command::Help) => Ok(HELP.to_string()),
            Ok(Command::Quit) => return Ok(true),
            Err(msg) => anyhow::bail!(msg),
        };
        match result {
            Ok(text) => {
                println!("{text}");
                Ok(true)
            }
            Err(e) => {
                error!("{e}");
                Ok(false)
            }
        }
    }
    .instrument(span)
    .await
}

async fn interactive(ctx: &ClientContext) -> anyhow::Result<bool> {
    let session = match Session::connect(&ctx.server, ctx.labels.clone()).await {
        Ok(s) => s.with_policy(ctx.policy),
        Err(e) => {
            error!("{e}");
            return Ok(false);
        }
    };
    println!("Connected to {}. Type \"help\" for commands.", ctx.server);
    let mut stdout = tokio::io::stdout();
    let (session, result) =
        run_shell(session, BufReader::new(tokio::io::stdin()), &mut stdout).await;
    deliver(&ctx.sink, session.finish()).await;
    result.map(|()| true)
}

#[cfg(test)]
mod test {
    use std::{path::PathBuf, sync::Arc};

    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use tokio::io::AsyncWrite;

    use super::{run_shell, Command};
    use crate::client::Session;
    use crate::server::{Server, ServerContext};
    use crate::storage::DirectoryStorage;
    use crate::telemetry::{Labels, MemorySink};

    #[test]
    fn parse_commands() {
        assert_eq!("list".parse::<Command>(), Ok(Command::List));
        assert_eq!("  LIST ".parse::<Command>(), Ok(Command::List));
        assert_eq!(
            "put my file.txt".parse::<Command>(),
            Ok(Command::Put(PathBuf::from("my file.txt")))
        );
        assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
        assert_eq!("?".parse::<Command>(), Ok(Command::Help));
        assert!("put".parse::<Command>().is_err());
        assert!("list extra".parse::<Command>().is_err());
        assert!("get x".parse::<Command>().is_err());
    }

    #[tokio::test]
    async fn scripted_shell() -> anyhow::Result<()> {
        let files = tempfile::tempdir()?;
        let context = ServerContext {
            storage: Arc::new(DirectoryStorage::new(files.path())?),
            sink: Arc::new(MemorySink::new()),
            labels: Labels::default(),
        };
        let server = Server::bind("127.0.0.1:0", context).await?;
        let addr = server.local_addr()?.to_string();
        let _ = tokio::spawn(server.run_until(std::future::pending()));

        let local = tempfile::tempdir()?;
        let upload = local.path().join("data.bin");
        std::fs::write(&upload, [1u8; 100])?;
        let script = format!(
            "help\nlist\nput {path}\nput {path}\nbogus\n\nlist\nquit\nlist\n",
            path = upload.display()
        );

        let session = Session::connect(&addr, Labels::default()).await?;
        let mut output = Vec::new();
        let (session, result) = run_shell(session, script.as_bytes(), &mut output).await;
        result?;
        let output = String::from_utf8(output)?;

        assert!(output.contains("Commands:"));
        assert!(output.contains("No files found"));
        assert!(output.contains("File data.bin uploaded successfully (100 bytes)"));
        assert!(output.contains("Error: File data.bin already exists"));
        assert!(output.contains("unknown command: bogus"));
        assert!(output.contains("data.bin (100 bytes)"));
        // nothing after quit is run
        assert_eq!(output.matches("data.bin (100 bytes)").count(), 1);

        let record = session.finish();
        assert_eq!(record.operation, "LIST");
        Ok(())
    }

    /// An output that refuses every write
    struct Unwritable;

    impl AsyncWrite for Unwritable {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn broken_output_still_returns_session() -> anyhow::Result<()> {
        let files = tempfile::tempdir()?;
        let context = ServerContext {
            storage: Arc::new(DirectoryStorage::new(files.path())?),
            sink: Arc::new(MemorySink::new()),
            labels: Labels::default(),
        };
        let server = Server::bind("127.0.0.1:0", context).await?;
        let addr = server.local_addr()?.to_string();
        let _ = tokio::spawn(server.run_until(std::future::pending()));

        let session = Session::connect(&addr, Labels::default()).await?;
        let (session, result) = run_shell(session, "list\n".as_bytes(), &mut Unwritable).await;
        assert!(result.is_err());

        // the prompt failed, so only the QUIT frame went out
        let record = session.finish();
        assert_eq!(record.operation, "CONNECT");
        assert_eq!(record.bytes_sent, 5);
        Ok(())
    }
}
