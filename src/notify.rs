use anyhow::{Context, Result};
use std::{
    fs,
    io::{ErrorKind, Read, Write},
    net::Shutdown,
    os::unix::{
        fs::MetadataExt,
        net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::monitor::{EventSink, EventSource, Subscription, WorkspaceEvent};

const MAX_MESSAGE: u64 = 256;
const IO_TIMEOUT: Duration = Duration::from_millis(500);
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Inter-process notification channel. The window manager's change hook
/// (e.g. `spacesync --notify workspace_change`) connects to this socket and
/// writes an event name.
pub struct NotificationListener {
    socket_path: PathBuf,
    tool_notification: String,
}

impl NotificationListener {
    pub fn new(socket_path: impl Into<PathBuf>, tool_notification: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            tool_notification: tool_notification.into(),
        }
    }
}

impl EventSource for NotificationListener {
    fn subscribe(&self, sink: EventSink) -> Result<Subscription> {
        let listener = bind_listener(&self.socket_path)?;
        // Identifies our socket file; another instance may replace it later.
        let inode = fs::metadata(&self.socket_path)
            .with_context(|| format!("stat {}", self.socket_path.display()))?
            .ino();
        listener
            .set_nonblocking(true)
            .context("make notification listener non-blocking")?;
        let stopped = Arc::new(AtomicBool::new(false));
        let tool_notification = self.tool_notification.clone();

        let stop_flag = stopped.clone();
        let handle = thread::Builder::new()
            .name("spacesync-notify".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    let stream = match listener.accept() {
                        Ok((stream, _)) => stream,
                        Err(err) if err.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL);
                            continue;
                        }
                        Err(err) => {
                            tracing::debug!("notification accept failed: {err}");
                            thread::sleep(ACCEPT_POLL);
                            continue;
                        }
                    };
                    match read_notification(stream) {
                        Ok(name) => match WorkspaceEvent::from_wire(&name, &tool_notification) {
                            Some(event) => sink.emit(event),
                            None => tracing::debug!("ignoring notification {name:?}"),
                        },
                        Err(err) => tracing::debug!("bad notification: {err:#}"),
                    }
                }
            })
            .context("spawn notification listener")?;

        let socket_path = self.socket_path.clone();
        Ok(Subscription::new(
            format!("notifications at {}", socket_path.display()),
            move || {
                stopped.store(true, Ordering::SeqCst);
                if handle.join().is_err() {
                    tracing::warn!("notification listener panicked");
                }
                remove_own_socket(&socket_path, inode);
            },
        ))
    }
}

/// Removes the socket file only if it is still the one we bound.
fn remove_own_socket(path: &Path, inode: u64) {
    match fs::metadata(path) {
        Ok(meta) if meta.ino() == inode => {
            if let Err(err) = fs::remove_file(path) {
                tracing::debug!("failed to remove {}: {err}", path.display());
            }
        }
        Ok(_) => tracing::debug!("{} now belongs to another listener", path.display()),
        Err(_) => {}
    }
}

fn read_notification(mut stream: UnixStream) -> Result<String> {
    // Accepted sockets inherit non-blocking mode on BSD-derived systems.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    let mut text = String::new();
    (&mut stream)
        .take(MAX_MESSAGE)
        .read_to_string(&mut text)
        .context("read notification")?;
    let _ = stream.write_all(b"ok");
    Ok(text.trim().to_string())
}

fn bind_listener(path: &Path) -> Result<UnixListener> {
    if UnixStream::connect(path).is_ok() {
        return Err(anyhow::anyhow!(
            "another spacesync listener is running on {}",
            path.display()
        ));
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let _ = fs::remove_file(path);
    let listener = UnixListener::bind(path).with_context(|| format!("bind {}", path.display()))?;
    Ok(listener)
}

/// Client side: deliver one notification to a running listener.
pub fn send_notification(socket_path: &Path, name: &str) -> Result<()> {
    let mut stream = UnixStream::connect(socket_path)
        .with_context(|| format!("connect to {}", socket_path.display()))?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.write_all(name.as_bytes()).context("send notification")?;
    stream.shutdown(Shutdown::Write)?;
    let mut reply = [0u8; 8];
    let read = stream.read(&mut reply).context("read reply")?;
    if &reply[..read] != b"ok" {
        return Err(anyhow::anyhow!("unexpected reply from listener"));
    }
    Ok(())
}
