//! Bidirectional forwarding between the tunnel and local standard streams
//!
//! Two tasks run independently, one per direction. Each copies one chunk at
//! a time and stops at end-of-stream or on the first I/O error, then closes
//! its destination. The relay finishes when both have stopped.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;

/// Bytes moved per read. Tuning only; it does not change what the peer sees.
pub const CHUNK_SIZE: usize = 4096;

/// Which way a copy task moves data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Tunnel to local output
    Inbound,
    /// Local input to tunnel
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("tunnel -> stdout"),
            Direction::Outbound => f.write_str("stdin -> tunnel"),
        }
    }
}

/// Why a copy task stopped
#[derive(Debug)]
pub enum CopyEnd {
    /// The source returned a zero-length read
    Eof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    /// The task panicked or was cancelled
    Aborted(String),
}

impl CopyEnd {
    pub fn is_eof(&self) -> bool {
        matches!(self, CopyEnd::Eof)
    }
}

/// Result of one direction of the relay
#[derive(Debug)]
pub struct CopyOutcome {
    pub direction: Direction,
    /// Bytes fully written to the destination
    pub bytes: u64,
    pub end: CopyEnd,
}

/// Both directions, after both have finished
#[derive(Debug)]
pub struct RelayReport {
    pub inbound: CopyOutcome,
    pub outbound: CopyOutcome,
}

impl RelayReport {
    /// Whether both directions reached end-of-stream without an I/O error
    pub fn is_clean(&self) -> bool {
        self.inbound.end.is_eof() && self.outbound.end.is_eof()
    }
}

/// Shut down a writer, ignoring failures.
///
/// Both directions may try to close the tunnel during teardown, so an
/// already-closed writer is expected here and only logged.
pub async fn close_quietly<W>(writer: &mut W, what: &str)
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Closing {}: {} (ignored)", what, e);
    }
}

async fn copy_chunks<R, W>(direction: Direction, mut src: R, mut dst: W) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;

    let end = loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break CopyEnd::Eof,
            Ok(n) => n,
            Err(e) => break CopyEnd::ReadFailed(e),
        };

        // Flush per chunk so nothing lingers in a userspace buffer.
        if let Err(e) = dst.write_all(&buf[..n]).await {
            break CopyEnd::WriteFailed(e);
        }
        if let Err(e) = dst.flush().await {
            break CopyEnd::WriteFailed(e);
        }
        bytes += n as u64;
    };

    match &end {
        CopyEnd::Eof => tracing::debug!("{}: end of stream after {} bytes", direction, bytes),
        CopyEnd::ReadFailed(e) => tracing::warn!("{}: read failed: {}", direction, e),
        CopyEnd::WriteFailed(e) => tracing::warn!("{}: write failed: {}", direction, e),
        CopyEnd::Aborted(_) => {}
    }

    let dst_name = match direction {
        Direction::Inbound => "local output",
        Direction::Outbound => "tunnel",
    };
    close_quietly(&mut dst, dst_name).await;
    drop(dst);
    drop(src);

    CopyOutcome {
        direction,
        bytes,
        end,
    }
}

fn joined(direction: Direction, result: Result<CopyOutcome, JoinError>) -> CopyOutcome {
    result.unwrap_or_else(|e| {
        tracing::error!("{}: copy task aborted: {}", direction, e);
        CopyOutcome {
            direction,
            bytes: 0,
            end: CopyEnd::Aborted(e.to_string()),
        }
    })
}

/// Relay between `tunnel` and a local input/output pair until both
/// directions have stopped.
///
/// The outbound side reaching end-of-stream half-closes the tunnel but does
/// not stop the inbound side, which keeps delivering until the remote end
/// closes too. There is no idle timeout.
pub async fn relay<T, R, W>(tunnel: T, local_in: R, local_out: W) -> RelayReport
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tunnel_read, tunnel_write) = tokio::io::split(tunnel);

    let inbound = tokio::spawn(copy_chunks(Direction::Inbound, tunnel_read, local_out));
    let outbound = tokio::spawn(copy_chunks(Direction::Outbound, local_in, tunnel_write));

    let (inbound, outbound) = tokio::join!(inbound, outbound);

    RelayReport {
        inbound: joined(Direction::Inbound, inbound),
        outbound: joined(Direction::Outbound, outbound),
    }
}

/// Relay between `tunnel` and this process's stdin/stdout.
///
/// The relay takes ownership of file descriptors 0 and 1: when the tunnel
/// reaches end-of-stream, stdout is really closed so the local reader sees
/// EOF even while stdin stays open.
#[cfg(unix)]
pub async fn relay_stdio<T>(tunnel: T) -> RelayReport
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (stdin, stdout) = owned_stdio();
    relay(tunnel, stdin, stdout).await
}

#[cfg(not(unix))]
pub async fn relay_stdio<T>(tunnel: T) -> RelayReport
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    relay(tunnel, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Stdin and stdout as files that close their descriptor on drop.
///
/// `tokio::io::Stdout` only flushes on shutdown and never closes fd 1.
#[cfg(unix)]
fn owned_stdio() -> (tokio::fs::File, tokio::fs::File) {
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    // SAFETY: fds 0 and 1 are open for the life of the process and, once the
    // relay starts, nothing else reads stdin or writes stdout (logs go to
    // stderr), so these become their sole owners.
    let (stdin, stdout) = unsafe {
        (
            OwnedFd::from_raw_fd(io::stdin().as_raw_fd()),
            OwnedFd::from_raw_fd(io::stdout().as_raw_fd()),
        )
    };

    (
        tokio::fs::File::from_std(std::fs::File::from(stdin)),
        tokio::fs::File::from_std(std::fs::File::from(stdout)),
    )
}
