//! Helper to capture child process stdout/stderr into a log file
//!
//! Output is pumped chunk by chunk into a [`LogSink`], a channel feeding a
//! single writer task that owns the file. Closing the sink lets the writer
//! drain and exit; lines written after that go straight to the file.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configure stdio for a node process: output piped, no stdin
pub fn configure_child_stdio(cmd: &mut tokio::process::Command) {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());
}

/// Shared, closable handle onto the log writer task
#[derive(Clone, Default)]
pub struct LogSink {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl LogSink {
    /// A sink that discards everything written to it
    pub fn closed() -> Self {
        Self::default()
    }

    /// Open (append) the log file and start its writer task
    pub async fn open(path: &Path) -> std::io::Result<(Self, JoinHandle<()>)> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_chunks(file, rx));
        Ok((
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            writer,
        ))
    }

    /// Queue a chunk; returns false if the sink is closed
    pub async fn write(&self, chunk: Vec<u8>) -> bool {
        match self.sender.lock().await.as_ref() {
            Some(tx) => tx.send(chunk).is_ok(),
            None => false,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.sender.lock().await.is_some()
    }

    /// Close the sink; queued chunks are still written. Returns whether it was open.
    pub async fn close(&self) -> bool {
        self.sender.lock().await.take().is_some()
    }

    /// Non-blocking close for synchronous contexts such as `Drop`
    pub fn try_close(&self) {
        if let Ok(mut sender) = self.sender.try_lock() {
            sender.take();
        }
    }

    /// Write a final line and close the sink.
    ///
    /// Goes through the sink while it is open; otherwise waits for the writer
    /// to finish and appends to `path` directly so the line is never dropped.
    pub async fn finish(&self, line: &str, path: Option<&Path>, writer: Option<JoinHandle<()>>) -> std::io::Result<()> {
        let mut bytes = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            bytes.push(b'\n');
        }

        let sender = self.sender.lock().await.take();
        let delivered = match sender {
            Some(tx) => tx.send(bytes.clone()).is_ok(),
            None => false,
        };

        if let Some(writer) = writer {
            let _ = writer.await;
        }

        match (delivered, path) {
            (false, Some(path)) => append_bytes(path, &bytes).await,
            _ => Ok(()),
        }
    }
}

/// Spawn one pump task per piped output stream of `child`
pub fn spawn_output_pumps(child: &mut Child, sink: &LogSink) -> Vec<JoinHandle<()>> {
    let mut pumps = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, sink.clone())));
    }

    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, sink.clone())));
    }

    pumps
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(bytes).await?;
    file.flush().await
}

/// Forward every chunk as it arrives; keeps draining after the sink closes so
/// the child never blocks on a full pipe
async fn pump<R>(mut reader: R, sink: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                sink.write(buf[..n].to_vec()).await;
            }
        }
    }
}

async fn write_chunks(mut file: File, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = file.write_all(&chunk).await {
            tracing::warn!("⚠️ Log sink write failed: {}", e);
            break;
        }
    }
    let _ = file.flush().await;
}
