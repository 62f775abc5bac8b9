use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const READ_CHUNK_SIZE: usize = 8192;

/// Bytes captured from one output channel
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedStream {
    /// Kept bytes, verbatim
    pub bytes: Vec<u8>,
    /// Total bytes read, including the discarded ones
    pub total: usize,
    pub truncated: bool,
}

impl CapturedStream {
    /// Appends a chunk, keeping at most `limit` bytes overall
    fn push(&mut self, chunk: &[u8], limit: usize) {
        self.total += chunk.len();
        let room = limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedStreams {
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

/// Drains stdout and stderr of one instance on two independent tasks
///
/// Both readers start as soon as the instance is spawned, so the program can never
/// block on a full pipe while we wait for it. Past `limit` bytes a reader keeps
/// draining but discards what it reads.
pub struct StreamAggregator {
    stdout: JoinHandle<CapturedStream>,
    stderr: JoinHandle<CapturedStream>,
    token: CancellationToken,
}

impl StreamAggregator {
    pub fn start<O, E>(stdout: O, stderr: E, limit: usize) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let token = CancellationToken::new();
        Self {
            stdout: tokio::spawn(drain(stdout, limit, token.clone())),
            stderr: tokio::spawn(drain(stderr, limit, token.clone())),
            token,
        }
    }

    /// Waits for both channels to reach end-of-file
    ///
    /// A process that exits can leave descendants holding the pipes open. Readers still
    /// running at `close_by` are cancelled and return what they captured so far.
    pub async fn finish(self, close_by: Instant) -> CapturedStreams {
        let token = self.token.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep_until(close_by).await;
            if !token.is_cancelled() {
                log::warn!("Output channels still open after the grace period, closing them");
                token.cancel();
            }
        });

        let (stdout, stderr) = tokio::join!(self.stdout, self.stderr);
        watchdog.abort();

        CapturedStreams {
            stdout: stdout.unwrap_or_else(|e| {
                log::error!("stdout reader task failed: {e}");
                CapturedStream::default()
            }),
            stderr: stderr.unwrap_or_else(|e| {
                log::error!("stderr reader task failed: {e}");
                CapturedStream::default()
            }),
        }
    }
}

async fn drain<R>(mut reader: R, limit: usize, token: CancellationToken) -> CapturedStream
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedStream::default();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => captured.push(&chunk[..n], limit),
            Err(e) => {
                log::warn!("Failed to read instance output: {e}");
                break;
            }
        }
    }

    if captured.truncated {
        log::info!(
            "Output truncated: kept {} of {} bytes",
            captured.bytes.len(),
            captured.total
        );
    }
    captured
}
