//! Control-channel transports.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use ubctl_config::ControlConfig;

use super::framing::{Framing, ReadDeadlines, read_framed_response};
use super::{Command, LOCAL_SOCKET_PREAMBLE, TransportError};
use crate::BoxFuture;

/// Something that can carry one command to the daemon and bring back the
/// framed response text.
pub trait Transport: Send + Sync {
    /// Send `command` and return the trimmed response.
    fn exchange<'a>(&'a self, command: &'a Command) -> BoxFuture<'a, Result<String, TransportError>>;

    /// Drop any open connection. Later exchanges reconnect.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Human-readable target for logs.
    fn target(&self) -> String;
}

/// Per-phase deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub write: Duration,
    pub read: ReadDeadlines,
    pub probe: Duration,
}

impl Timeouts {
    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            write: config.write_timeout(),
            read: ReadDeadlines {
                response: config.read_timeout(),
                retry: config.retry_read_timeout(),
            },
            probe: config.probe_timeout(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&ControlConfig::default())
    }
}

async fn write_command<W>(writer: &mut W, bytes: &[u8], limit: Duration) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    timeout(limit, async {
        writer.write_all(bytes).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| TransportError::Timeout {
        op: "write",
        after: limit,
    })?
    .map_err(TransportError::Write)
}

// ── Persistent stream ───────────────────────────────────────────────────

trait ControlStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ControlStream for T {}

enum Dialer {
    Plain,
    Tls {
        connector: TlsConnector,
        server_name: ServerName<'static>,
    },
    /// Hands out prepared streams in order, one per dial.
    #[cfg(test)]
    Scripted(std::sync::Mutex<std::collections::VecDeque<Box<dyn ControlStream>>>),
}

struct Connection {
    stream: BufReader<Box<dyn ControlStream>>,
    last_used: Instant,
}

impl Connection {
    /// Check that the peer has not gone away since the last exchange.
    ///
    /// A read that stays pending for the probe window means the connection
    /// is idle and usable. End-of-stream or an error means it is dead.
    /// Whitespace left over from a previous response terminator is
    /// consumed; anything else is unsolicited data and the connection is
    /// abandoned.
    async fn probe(&mut self, window: Duration) -> bool {
        loop {
            let (len, whitespace) = match timeout(window, self.stream.fill_buf()).await {
                Err(_) => return true,
                Ok(Err(e)) => {
                    debug!(error = %e, "liveness probe failed");
                    return false;
                }
                Ok(Ok(buf)) => (buf.len(), buf.iter().all(u8::is_ascii_whitespace)),
            };
            if len == 0 {
                debug!(
                    idle_ms = self.last_used.elapsed().as_millis() as u64,
                    "daemon closed the control connection"
                );
                return false;
            }
            if !whitespace {
                warn!(bytes = len, "unsolicited data on control connection, discarding it");
                return false;
            }
            self.stream.consume(len);
        }
    }
}

/// One long-lived TCP connection to the daemon, optionally over mutual TLS.
///
/// Exchanges are serialized: at most one command is in flight. Before each
/// send the connection is probed and re-dialed if dead. If the send itself
/// fails, the connection is re-dialed and the command re-sent exactly once.
/// Once a command has been written, read failures are returned as-is and
/// the command is never re-sent, since the daemon may already have acted
/// on it.
pub struct StreamTransport {
    address: String,
    dialer: Dialer,
    timeouts: Timeouts,
    connection: Mutex<Option<Connection>>,
}

impl StreamTransport {
    /// Plain TCP, no TLS.
    pub fn plain(address: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            address: address.into(),
            dialer: Dialer::Plain,
            timeouts,
            connection: Mutex::new(None),
        }
    }

    /// Mutual TLS over TCP. `server_name` is sent as SNI and, when the
    /// config verifies certificates, checked against the daemon's cert.
    pub fn tls(
        address: impl Into<String>,
        tls_config: Arc<ClientConfig>,
        server_name: &str,
        timeouts: Timeouts,
    ) -> Result<Self, TransportError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TransportError::ServerName(server_name.to_string()))?;
        Ok(Self {
            address: address.into(),
            dialer: Dialer::Tls {
                connector: TlsConnector::from(tls_config),
                server_name,
            },
            timeouts,
            connection: Mutex::new(None),
        })
    }

    /// Dial now instead of on the first command.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        Ok(())
    }

    async fn connect_tcp(&self) -> Result<TcpStream, TransportError> {
        let tcp = timeout(self.timeouts.connect, TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::Timeout {
                op: "connect",
                after: self.timeouts.connect,
            })?
            .map_err(|source| self.connect_err(source))?;
        tcp.set_nodelay(true).map_err(|source| self.connect_err(source))?;
        Ok(tcp)
    }

    fn connect_err(&self, source: std::io::Error) -> TransportError {
        TransportError::Connect {
            target: self.address.clone(),
            source,
        }
    }

    async fn dial(&self) -> Result<Connection, TransportError> {
        let stream: Box<dyn ControlStream> = match &self.dialer {
            Dialer::Plain => Box::new(self.connect_tcp().await?),
            Dialer::Tls {
                connector,
                server_name,
            } => {
                let tcp = self.connect_tcp().await?;
                let tls = timeout(
                    self.timeouts.connect,
                    connector.connect(server_name.clone(), tcp),
                )
                .await
                .map_err(|_| TransportError::Timeout {
                    op: "TLS handshake",
                    after: self.timeouts.connect,
                })?
                .map_err(|source| self.connect_err(source))?;
                Box::new(tls)
            }
            #[cfg(test)]
            Dialer::Scripted(streams) => streams
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
                .ok_or_else(|| self.connect_err(std::io::ErrorKind::ConnectionRefused.into()))?,
        };

        info!(
            target_addr = %self.address,
            tls = matches!(self.dialer, Dialer::Tls { .. }),
            "connected to daemon control port"
        );
        Ok(Connection {
            stream: BufReader::new(stream),
            last_used: Instant::now(),
        })
    }

    async fn exchange_locked(&self, command: &Command) -> Result<String, TransportError> {
        let mut guard = self.connection.lock().await;

        let mut conn = match guard.take() {
            Some(mut conn) => {
                if conn.probe(self.timeouts.probe).await {
                    conn
                } else {
                    info!("control connection lost, reconnecting");
                    self.dial().await?
                }
            }
            None => self.dial().await?,
        };

        let bytes = command.encode(None);
        if let Err(e) = write_command(&mut conn.stream, &bytes, self.timeouts.write).await {
            warn!(command = command.verb(), error = %e, "send failed, reconnecting and retrying once");
            drop(conn);
            conn = self.dial().await?;
            write_command(&mut conn.stream, &bytes, self.timeouts.write).await?;
        }

        // A failed read leaves the stream position unknown; the connection
        // is dropped so a late reply cannot be taken for the next response.
        let text = read_framed_response(&mut conn.stream, Framing::BlankLines, &self.timeouts.read).await?;
        conn.last_used = Instant::now();
        *guard = Some(conn);
        Ok(text)
    }
}

impl Transport for StreamTransport {
    fn exchange<'a>(&'a self, command: &'a Command) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(self.exchange_locked(command))
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut conn) = self.connection.lock().await.take() {
                let _ = conn.stream.get_mut().shutdown().await;
                debug!(target_addr = %self.address, "control connection closed");
            }
        })
    }

    fn target(&self) -> String {
        match self.dialer {
            Dialer::Plain => format!("tcp://{}", self.address),
            Dialer::Tls { .. } => format!("tls://{}", self.address),
            #[cfg(test)]
            Dialer::Scripted(_) => format!("scripted://{}", self.address),
        }
    }
}

// ── Local socket ────────────────────────────────────────────────────────

/// A fresh local-socket connection per command.
///
/// Each exchange writes the version token, two spaces and the command, then
/// reads until the daemon closes the connection. Nothing is shared between
/// exchanges, so commands may run concurrently.
pub struct UnixTransport {
    socket_path: PathBuf,
    timeouts: Timeouts,
}

impl UnixTransport {
    pub fn new(socket_path: impl Into<PathBuf>, timeouts: Timeouts) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeouts,
        }
    }

    async fn exchange_once(&self, command: &Command) -> Result<String, TransportError> {
        if !self.socket_path.exists() {
            return Err(TransportError::SocketMissing(self.socket_path.clone()));
        }

        let stream = timeout(self.timeouts.connect, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| TransportError::Timeout {
                op: "connect",
                after: self.timeouts.connect,
            })?
            .map_err(|source| TransportError::Connect {
                target: self.socket_path.display().to_string(),
                source,
            })?;

        let mut stream = BufReader::new(stream);
        let bytes = command.encode(Some(LOCAL_SOCKET_PREAMBLE));
        write_command(&mut stream, &bytes, self.timeouts.write).await?;
        read_framed_response(&mut stream, Framing::UntilClose, &self.timeouts.read).await
    }
}

impl Transport for UnixTransport {
    fn exchange<'a>(&'a self, command: &'a Command) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(self.exchange_once(command))
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn target(&self) -> String {
        format!("unix://{}", self.socket_path.display())
    }
}
