//! Loopback file broker serving one sandboxed run.
//!
//! Wire format (one request per connection):
//!
//! ```text
//! request:  <nonce>\n<cwd>\n<path>\n
//! response: OK <len>\n<len bytes>   |   MISS\n   |   DENY\n
//! ```
//!
//! The broker listens on `127.0.0.1` on an ephemeral port and answers only
//! requests carrying its per-run nonce. Dropping it stops the listener and
//! aborts every connection still being served.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use grader_remote::RepositoryFileAccessor;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::error::Result;
use crate::vfs::VirtualFileSet;

/// Longest request line accepted, in bytes.
const MAX_LINE: u64 = 8 * 1024;
/// How long a child may take to send its request.
const REQUEST_DEADLINE: Duration = Duration::from_secs(5);

/// What the broker answers from: staged files, then lazy remote fetches.
#[derive(Debug)]
pub struct Overlay {
    files: VirtualFileSet,
    remote: Option<Arc<RepositoryFileAccessor>>,
}

impl Overlay {
    pub fn new(files: VirtualFileSet, remote: Option<Arc<RepositoryFileAccessor>>) -> Self {
        Self { files, remote }
    }

    pub fn files(&self) -> &VirtualFileSet {
        &self.files
    }

    pub async fn resolve(&self, path: &str, cwd: &std::path::Path) -> Option<Vec<u8>> {
        self.files.resolve(path, cwd, self.remote.as_deref()).await
    }
}

pub struct FileBroker {
    addr: SocketAddr,
    nonce: String,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for FileBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBroker")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl FileBroker {
    /// Bind an ephemeral loopback port and start serving `overlay`.
    pub async fn start(overlay: Arc<Overlay>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let nonce = uuid::Uuid::new_v4().simple().to_string();

        let expected = nonce.clone();
        let task = tokio::spawn(async move {
            // dropped with the accept loop, aborting connections still in flight
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let stream = match accepted {
                            Ok((stream, _)) => stream,
                            Err(e) => {
                                warn!(error = %e, "file broker accept failed");
                                continue;
                            }
                        };
                        let overlay = overlay.clone();
                        let expected = expected.clone();
                        connections.spawn(async move {
                            if let Err(e) = serve(stream, &overlay, &expected).await {
                                debug!(error = %e, "file broker connection ended with an error");
                            }
                        });
                    }
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }
        });

        debug!(addr = %addr, "file broker listening");
        Ok(Self { addr, nonce, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Value for the child's broker environment variable.
    pub fn child_config(&self, timeout: Duration) -> String {
        format!(
            "{}:{}:{}:{}",
            self.addr.ip(),
            self.addr.port(),
            self.nonce,
            timeout.as_secs_f64()
        )
    }
}

impl Drop for FileBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> anyhow::Result<String> {
    let mut line = Vec::new();
    let mut limited = reader.take(MAX_LINE);
    limited.read_until(b'\n', &mut line).await?;
    anyhow::ensure!(line.last() == Some(&b'\n'), "request line truncated");
    line.pop();
    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn serve(stream: TcpStream, overlay: &Overlay, expected_nonce: &str) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = tokio::time::timeout(REQUEST_DEADLINE, async {
        let nonce = read_line(&mut reader).await?;
        let cwd = read_line(&mut reader).await?;
        let path = read_line(&mut reader).await?;
        anyhow::Ok((nonce, cwd, path))
    })
    .await
    .context("request deadline exceeded")??;

    let (nonce, cwd, path) = request;
    if nonce != expected_nonce {
        warn!("file broker rejected a request with a wrong nonce");
        write_half.write_all(b"DENY\n").await?;
        return Ok(());
    }

    match overlay.resolve(&path, &PathBuf::from(&cwd)).await {
        Some(bytes) => {
            debug!(path = %path, bytes = bytes.len(), "virtual file served");
            write_half
                .write_all(format!("OK {}\n", bytes.len()).as_bytes())
                .await?;
            write_half.write_all(&bytes).await?;
        }
        None => {
            write_half.write_all(b"MISS\n").await?;
        }
    }
    write_half.shutdown().await?;
    Ok(())
}
