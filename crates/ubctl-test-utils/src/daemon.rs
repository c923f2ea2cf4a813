//! A scriptable stand-in for the resolver daemon's control interface.
//!
//! [`FakeDaemon`] listens on loopback TCP or a temporary local socket and
//! answers each command line with whatever the handler returns. It records
//! every line it receives and counts accepted connections, so tests can
//! assert on reconnects and retries.
//!
//! Wire behaviour per mode:
//!
//! - [`FakeDaemon::tcp`]: persistent connection, each reply followed by
//!   two blank lines.
//! - [`FakeDaemon::tcp_closing`]: one reply per connection, then close.
//! - [`FakeDaemon::unix`]: one command per connection, reply, then close.
//!   Received lines include the version preamble.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::{JoinHandle, JoinSet};

/// What the fake daemon does with one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send this text.
    Text(String),
    /// Send nothing and keep the connection open.
    Silent,
    /// Close the connection without replying.
    Close,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }
}

type Handler = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Persistent,
    ClosePerReply,
}

#[derive(Default)]
struct Record {
    received: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

/// Fake control daemon. Stops listening when dropped.
pub struct FakeDaemon {
    address: Option<SocketAddr>,
    socket_path: Option<PathBuf>,
    record: Arc<Record>,
    task: JoinHandle<()>,
    _temp_dir: Option<TempDir>,
}

impl FakeDaemon {
    /// Persistent TCP connections, replies terminated by two blank lines.
    pub async fn tcp<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self::spawn_tcp(Arc::new(handler), Mode::Persistent).await
    }

    /// TCP that closes the connection after every reply, without a blank-line
    /// terminator.
    pub async fn tcp_closing<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self::spawn_tcp(Arc::new(handler), Mode::ClosePerReply).await
    }

    /// Local socket in a temporary directory, one command per connection.
    pub async fn unix<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("control.sock");
        let listener = UnixListener::bind(&socket_path).expect("failed to bind fake daemon socket");
        let record = Arc::new(Record::default());
        let handler: Handler = Arc::new(handler);

        let task = {
            let record = record.clone();
            tokio::spawn(async move {
                let mut connections = JoinSet::new();
                while let Ok((stream, _)) = listener.accept().await {
                    record.connections.fetch_add(1, Ordering::SeqCst);
                    connections.spawn(serve(stream, handler.clone(), record.clone(), Mode::ClosePerReply));
                }
            })
        };

        Self {
            address: None,
            socket_path: Some(socket_path),
            record,
            task,
            _temp_dir: Some(temp_dir),
        }
    }

    async fn spawn_tcp(handler: Handler, mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake daemon");
        let address = listener.local_addr().expect("listener has no address");
        let record = Arc::new(Record::default());

        let task = {
            let record = record.clone();
            tokio::spawn(async move {
                let mut connections = JoinSet::new();
                while let Ok((stream, _)) = listener.accept().await {
                    record.connections.fetch_add(1, Ordering::SeqCst);
                    connections.spawn(serve(stream, handler.clone(), record.clone(), mode));
                }
            })
        };

        Self {
            address: Some(address),
            socket_path: None,
            record,
            task,
            _temp_dir: None,
        }
    }

    /// `host:port` of a TCP fake.
    pub fn address(&self) -> String {
        self.address
            .expect("not a TCP fake daemon")
            .to_string()
    }

    /// Socket path of a local-socket fake.
    pub fn socket_path(&self) -> &Path {
        self.socket_path
            .as_deref()
            .expect("not a local-socket fake daemon")
    }

    /// Every command line received so far, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.record.received.lock().expect("poisoned").clone()
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.record.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<S>(stream: S, handler: Handler, record: Arc<Record>, mode: Mode)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = line.trim_end_matches(['\r', '\n']).to_string();
        record.received.lock().expect("poisoned").push(command.clone());

        match handler(&command) {
            Reply::Text(text) => {
                let framed = match mode {
                    Mode::Persistent => format!("{text}\n\n\n"),
                    Mode::ClosePerReply => format!("{text}\n"),
                };
                if stream.write_all(framed.as_bytes()).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
                if mode == Mode::ClosePerReply {
                    let _ = stream.shutdown().await;
                    return;
                }
            }
            Reply::Silent => {}
            Reply::Close => return,
        }
    }
}
