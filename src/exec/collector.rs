//! Bounded capture of one output stream.
//!
//! Each captured stream has exactly one collector task that owns its buffer
//! and byte count. Bytes past the limit are read and dropped so the writer
//! never blocks on a full pipe.

use std::os::fd::OwnedFd;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const READ_CHUNK_SIZE: usize = 8192;
const INITIAL_CAPACITY: usize = 8 * 1024;

/// What one collector kept, and how much it threw away.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
    /// Stopped before EOF; the stream may have had more to say.
    pub cut_short: bool,
}

impl Captured {
    pub fn is_incomplete(&self) -> bool {
        self.dropped > 0 || self.cut_short
    }
}

/// Read `reader` to EOF, keeping at most `limit` bytes. Returns early with
/// what it has once `stop` fires.
pub async fn collect<R: AsyncRead + Unpin>(mut reader: R, limit: usize, stop: CancellationToken) -> Captured {
    let mut captured = Captured {
        bytes: Vec::with_capacity(limit.min(INITIAL_CAPACITY)),
        ..Captured::default()
    };
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            biased;
            () = stop.cancelled() => {
                captured.cut_short = true;
                break;
            }
            read = reader.read(&mut chunk) => read,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("output read error: {e}");
                captured.cut_short = true;
                break;
            }
        };
        let room = limit.saturating_sub(captured.bytes.len());
        let keep = room.min(n);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }

    captured
}

/// A running collector task and the token that ends it early.
pub struct Collector {
    task: JoinHandle<Captured>,
    stop: CancellationToken,
}

impl Collector {
    /// Start a collector task on the read end of an OS pipe.
    pub fn spawn(read_end: impl Into<OwnedFd>, limit: usize) -> std::io::Result<Self> {
        let receiver = pipe::Receiver::from_owned_fd(read_end.into())?;
        let stop = CancellationToken::new();
        let task = tokio::spawn(collect(receiver, limit, stop.clone()));
        Ok(Self { task, stop })
    }

    /// Wait up to `wait` for EOF, then stop reading and keep what arrived.
    /// A stray grandchild can hold the write end open indefinitely.
    pub async fn finish(mut self, wait: Duration) -> Captured {
        let joined = match tokio::time::timeout(wait, &mut self.task).await {
            Ok(joined) => joined,
            Err(_) => {
                log::warn!("output still open after {wait:?}, keeping what was read");
                self.stop.cancel();
                self.task.await
            }
        };
        joined.unwrap_or_else(|e| {
            log::warn!("output collector failed: {e}");
            Captured {
                cut_short: true,
                ..Captured::default()
            }
        })
    }

    /// Drop the task without waiting; used when the pipeline never started.
    pub fn abort(self) {
        self.task.abort();
    }
}
