//! Subscription to one review service's event feed.
//!
//! A background task holds a `gerrit stream-events` session open, decodes
//! each line into an [`Event`] and queues it. When the session drops it is
//! re-established after a fixed delay until the ingestor is stopped.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_core::{Event, Remote};
use relay_sync::remote::ssh_args;

/// Wait between a dropped session and the next connect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub type EventStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Opens a newline-delimited event stream.
pub trait StreamConnector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = io::Result<EventStream>> + Send;
}

/// `ssh … gerrit stream-events` against one remote.
#[derive(Debug, Clone)]
pub struct SshStreamConnector {
    remote: Remote,
}

impl SshStreamConnector {
    pub fn new(remote: Remote) -> Self {
        Self { remote }
    }
}

impl StreamConnector for SshStreamConnector {
    async fn connect(&self) -> io::Result<EventStream> {
        let mut child = Command::new("ssh")
            .args(ssh_args(&self.remote, "gerrit stream-events"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(self.remote.host.clone(), stderr));
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "ssh stdout not captured"))?;
        Ok(Box::new(ChildStream {
            _child: child,
            reader: BufReader::new(stdout),
        }))
    }
}

/// Log what ssh prints on stderr (auth and host-key failures) until the
/// session closes. Returns the number of lines logged.
async fn forward_stderr<R: AsyncRead + Unpin>(host: String, stderr: R) -> usize {
    let mut lines = BufReader::new(stderr).lines();
    let mut logged = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                tracing::warn!(host = %host, line = line.trim(), "ssh stderr");
                logged += 1;
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(host = %host, error = %err, "ssh stderr unreadable");
                break;
            }
        }
    }
    logged
}

/// Keeps the ssh process alive for as long as its output is read; dropping
/// the stream kills it.
struct ChildStream {
    _child: Child,
    reader: BufReader<ChildStdout>,
}

impl AsyncRead for ChildStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncBufRead for ChildStream {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().reader).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().reader).consume(amt)
    }
}

pub struct EventIngestor {
    feed: &'static str,
    rx: mpsc::UnboundedReceiver<Event>,
    token: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl EventIngestor {
    /// Spawn the reader task for `feed`. It stops when `parent` is
    /// cancelled or [`EventIngestor::stop`] is called.
    pub fn start<C: StreamConnector>(
        feed: &'static str,
        connector: C,
        parent: &CancellationToken,
        reconnect_delay: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = parent.child_token();
        let reader = tokio::spawn(read_feed(feed, connector, tx, token.clone(), reconnect_delay));
        Self {
            feed,
            rx,
            token,
            reader: Some(reader),
        }
    }

    /// Next buffered event, without waiting.
    pub fn poll(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn feed(&self) -> &'static str {
        self.feed
    }

    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(reader) = self.reader.take() {
            if let Err(err) = reader.await {
                tracing::error!(feed = self.feed, error = %err, "event reader exited abnormally");
            }
        }
    }
}

async fn read_feed<C: StreamConnector>(
    feed: &'static str,
    connector: C,
    tx: mpsc::UnboundedSender<Event>,
    token: CancellationToken,
    reconnect_delay: Duration,
) {
    loop {
        if token.is_cancelled() {
            break;
        }
        let connected = tokio::select! {
            _ = token.cancelled() => break,
            result = connector.connect() => result,
        };
        match connected {
            Ok(stream) => {
                tracing::info!(feed, "event stream connected");
                match pump(feed, stream, &tx, &token).await {
                    Ok(Pump::Ended) => tracing::warn!(feed, "event stream ended"),
                    Ok(Pump::Stopped) => break,
                    Err(err) => tracing::warn!(feed, error = %err, "event stream failed"),
                }
            }
            Err(err) => tracing::warn!(feed, error = %err, "event stream connect failed"),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {
                tracing::info!(feed, "reconnecting event stream");
            }
        }
    }
    tracing::debug!(feed, "event reader stopped");
}

enum Pump {
    /// End of stream; reconnect.
    Ended,
    /// Cancelled, or nobody is listening any more.
    Stopped,
}

async fn pump(
    feed: &'static str,
    mut stream: EventStream,
    tx: &mpsc::UnboundedSender<Event>,
    token: &CancellationToken,
) -> io::Result<Pump> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = token.cancelled() => return Ok(Pump::Stopped),
            read = stream.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            return Ok(Pump::Ended);
        }
        let record = match std::str::from_utf8(&line) {
            Ok(text) => text.trim(),
            Err(err) => {
                tracing::error!(feed, error = %err, "dropping record that is not UTF-8");
                continue;
            }
        };
        if record.is_empty() {
            continue;
        }
        match Event::decode(record) {
            Ok(event) => {
                tracing::debug!(feed, kind = event.kind(), "event received");
                if tx.send(event).is_err() {
                    return Ok(Pump::Stopped);
                }
            }
            Err(err) => tracing::error!(feed, error = %err, record, "dropping malformed event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use relay_core::ProjectName;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;

    const COMMENT: &str = r#"{"type":"comment-added","comment":"Upstream-Ready+1","change":{"id":"X","project":"p","branch":"main"},"patchSet":{"number":"1","revision":"abc"}}"#;
    const REF: &str = r#"{"type":"ref-updated","refUpdate":{"project":"nova","refName":"master"}}"#;

    /// Serves the same canned feed on every connect.
    struct Canned {
        feed: Vec<u8>,
        connects: Arc<AtomicUsize>,
    }

    impl StreamConnector for Canned {
        async fn connect(&self) -> io::Result<EventStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Cursor::new(self.feed.clone())))
        }
    }

    /// Hands out one end of a pipe the test keeps open, then refuses.
    struct Held {
        stream: Mutex<Option<DuplexStream>>,
    }

    impl StreamConnector for Held {
        async fn connect(&self) -> io::Result<EventStream> {
            match self.stream.lock().unwrap().take() {
                Some(client) => Ok(Box::new(BufReader::new(client))),
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "used")),
            }
        }
    }

    struct Refusing {
        connects: Arc<AtomicUsize>,
    }

    impl StreamConnector for Refusing {
        async fn connect(&self) -> io::Result<EventStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    fn drain(ingestor: &mut EventIngestor) -> Vec<Event> {
        std::iter::from_fn(|| ingestor.poll()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn decodes_in_order_and_skips_bad_lines() {
        let token = CancellationToken::new();
        let connects = Arc::new(AtomicUsize::new(0));
        let connector = Canned {
            feed: format!("{COMMENT}\nnot json\n\n{REF}\n").into_bytes(),
            connects: Arc::clone(&connects),
        };
        let mut ingestor = EventIngestor::start("test", connector, &token, RECONNECT_DELAY);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let events = drain(&mut ingestor);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "comment-added");
        let Event::RefUpdated(update) = &events[1] else {
            panic!("expected ref-updated, got {:?}", events[1]);
        };
        assert_eq!(update.ref_update.project, ProjectName::from("nova"));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(ingestor.poll().is_none());

        ingestor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_delay() {
        let token = CancellationToken::new();
        let connects = Arc::new(AtomicUsize::new(0));
        let connector = Canned {
            feed: format!("{REF}\n").into_bytes(),
            connects: Arc::clone(&connects),
        };
        let mut ingestor = EventIngestor::start("test", connector, &token, RECONNECT_DELAY);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(drain(&mut ingestor).len(), 2);

        ingestor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_retry_without_backoff_growth() {
        let token = CancellationToken::new();
        let connects = Arc::new(AtomicUsize::new(0));
        let connector = Refusing {
            connects: Arc::clone(&connects),
        };
        let ingestor = EventIngestor::start("test", connector, &token, RECONNECT_DELAY);

        // Attempts at 0, 5, 10, 15 and 20 seconds.
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 5);

        token.cancel();
        ingestor.stop().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_utf8_line_is_dropped_and_the_session_continues() {
        let token = CancellationToken::new();
        let connects = Arc::new(AtomicUsize::new(0));
        let mut feed = b"{\"type\":\"change-merged\"}\n\xff\xfe garbage\n".to_vec();
        feed.extend_from_slice(format!("{REF}\n").as_bytes());
        let connector = Canned {
            feed,
            connects: Arc::clone(&connects),
        };
        let mut ingestor = EventIngestor::start("test", connector, &token, RECONNECT_DELAY);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let kinds: Vec<_> = drain(&mut ingestor).iter().map(Event::kind).collect();
        assert_eq!(kinds, ["other", "ref-updated"]);
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        ingestor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_an_open_session() {
        let token = CancellationToken::new();
        let (client, mut server) = tokio::io::duplex(1024);
        let connector = Held {
            stream: Mutex::new(Some(client)),
        };
        let mut ingestor = EventIngestor::start("test", connector, &token, RECONNECT_DELAY);

        server.write_all(format!("{REF}\n").as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut ingestor).len(), 1);

        tokio::time::timeout(Duration::from_secs(1), ingestor.stop())
            .await
            .expect("stop must not wait for the feed to close");
        drop(server);
    }

    #[tokio::test]
    async fn ssh_diagnostics_are_forwarded() {
        let stderr = Cursor::new(
            b"Permission denied (publickey).\n\nHost key verification failed.\n".to_vec(),
        );
        assert_eq!(forward_stderr("review.example.org".into(), stderr).await, 2);
    }
}
