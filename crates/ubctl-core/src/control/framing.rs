//! Response framing for the control protocol.
//!
//! Responses are read line by line. Each line is trimmed; blank lines are
//! dropped from the result. Where a response ends depends on the transport.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::trace;

use super::TransportError;

/// How the end of a response is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Two consecutive blank lines, or end-of-stream after some data.
    /// Used on the persistent stream.
    BlankLines,
    /// End-of-stream only. Used on the per-command local socket.
    UntilClose,
}

/// Read deadlines applied to one response.
#[derive(Debug, Clone, Copy)]
pub struct ReadDeadlines {
    /// Budget for the whole response.
    pub response: Duration,
    /// Budget for the one extra read after an end-of-stream with no data.
    pub retry: Duration,
}

/// Read one framed response and return its trimmed text.
///
/// On [`Framing::BlankLines`], an end-of-stream before any data gets a
/// single short retry read before [`TransportError::EmptyEof`] is
/// reported. On [`Framing::UntilClose`], an empty body is returned as an
/// empty string and left to the caller to judge.
pub async fn read_framed_response<R>(
    reader: &mut R,
    framing: Framing,
    deadlines: &ReadDeadlines,
) -> Result<String, TransportError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let deadline = Instant::now() + deadlines.response;
    let mut response = String::new();
    let mut line = String::new();
    let mut blank_run = 0usize;
    let mut retried = false;

    loop {
        line.clear();
        let read = timeout_at(deadline, reader.read_line(&mut line))
            .await
            .map_err(|_| TransportError::Timeout {
                op: "read",
                after: deadlines.response,
            })?
            .map_err(TransportError::Read)?;

        if read == 0 {
            if !response.is_empty() || framing == Framing::UntilClose {
                break;
            }
            if retried {
                return Err(TransportError::EmptyEof);
            }
            retried = true;
            trace!("end-of-stream before any data, retrying once");
            line.clear();
            match timeout(deadlines.retry, reader.read_line(&mut line)).await {
                Ok(Ok(n)) if n > 0 => {}
                _ => return Err(TransportError::EmptyEof),
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_run += 1;
            if framing == Framing::BlankLines && blank_run >= 2 {
                break;
            }
            continue;
        }

        blank_run = 0;
        response.push_str(trimmed);
        response.push('\n');
    }

    let response = response.trim().to_string();
    trace!(bytes = response.len(), "response framed");
    Ok(response)
}
