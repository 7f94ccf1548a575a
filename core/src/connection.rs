//! Socket runtime
//!
//! [`Relay`] owns the [`Gateway`] and is the only task touching it. Every
//! link connection gets a reader task and a writer task; both talk to the
//! relay loop through channels and stop when the connection's
//! cancellation token fires.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{RecvQueue, DEFAULT_BUFFER_SIZE};
use crate::directory::LinkId;
use crate::gateway::{ConnectRequest, Gateway};
use crate::link::Outbound;
use crate::Result;

/// Seconds between reconnect sweeps
pub const CONNECT_INTERVAL: u64 = 5;

/// What connection tasks report back to the relay loop
#[derive(Debug)]
pub enum Event {
    Connected {
        link: LinkId,
        session: u64,
        stream: TcpStream,
    },
    ConnectFailed {
        link: LinkId,
        session: u64,
        reason: String,
    },
    Line {
        link: LinkId,
        session: u64,
        line: String,
    },
    Closed {
        link: LinkId,
        session: u64,
        reason: String,
    },
}

/// Event loop driving a [`Gateway`]
pub struct Relay {
    gateway: Gateway,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(gateway: Gateway) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            gateway,
            events_tx,
            events_rx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops [`Relay::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C or the shutdown token fires, then disconnect all links
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(CONNECT_INTERVAL));
        info!("Relay running, {} links configured", self.gateway.directory().link_ids().len());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for request in self.gateway.due_connects(Gateway::now()) {
                        self.spawn_connect(request);
                    }
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Cannot listen for Ctrl-C: {}", e);
                    }
                    info!("Interrupted, shutting down");
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.gateway.shutdown();
        self.shutdown.cancel();
        Ok(())
    }

    fn spawn_connect(&self, request: ConnectRequest) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let ConnectRequest {
                link,
                session,
                hostname,
                port,
            } = request;
            let event = match TcpStream::connect((hostname.as_str(), port)).await {
                Ok(stream) => Event::Connected { link, session, stream },
                Err(e) => Event::ConnectFailed {
                    link,
                    session,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected { link, session, stream } => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Cannot disable Nagle on {}: {}", link, e);
                }
                let token = self.shutdown.child_token();
                let (lines_tx, lines_rx) = mpsc::unbounded_channel();
                let (read_half, write_half) = stream.into_split();

                tokio::spawn(read_link(read_half, link, session, self.events_tx.clone(), token.clone()));
                tokio::spawn(write_link(write_half, lines_rx, token.clone()));

                if let Err(e) = self.gateway.link_established(link, Outbound::new(lines_tx, session, token)) {
                    warn!("Link {} could not be established: {}", link, e);
                }
            }
            Event::ConnectFailed { link, session, reason } => {
                self.gateway.connect_failed(link, session, &reason);
            }
            Event::Line { link, session, line } => {
                self.gateway.handle_line(link, session, &line);
            }
            Event::Closed { link, session, reason } => {
                self.gateway.link_closed(link, session, &reason);
            }
        }
    }
}

/// Read from `reader`, reporting each complete line until EOF, a framing
/// error or cancellation
pub async fn read_link<R>(
    mut reader: R,
    link: LinkId,
    session: u64,
    events: mpsc::UnboundedSender<Event>,
    token: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut queue = RecvQueue::new(DEFAULT_BUFFER_SIZE);
    let mut chunk = [0u8; DEFAULT_BUFFER_SIZE];

    let reason = 'read: loop {
        let read = tokio::select! {
            _ = token.cancelled() => return,
            read = reader.read(&mut chunk) => read,
        };
        match read {
            Ok(0) => break "Connection closed by peer".to_string(),
            Ok(n) => queue.append(&chunk[..n]),
            Err(e) => break e.to_string(),
        }

        loop {
            match queue.next_line() {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(Some(line)) => {
                    if events.send(Event::Line { link, session, line }).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => break 'read e.to_string(),
            }
        }
    };

    debug!("Reader for {} stopped: {}", link, reason);
    let _ = events.send(Event::Closed { link, session, reason });
}

/// Write queued lines to `writer`, each terminated by CRLF. On cancellation
/// lines already queued are still written.
pub async fn write_link<W>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>, token: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            biased;
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = token.cancelled() => {
                while let Ok(line) = lines.try_recv() {
                    if writer.write_all(format!("{}\r\n", line).as_bytes()).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        if let Err(e) = writer.write_all(format!("{}\r\n", line).as_bytes()).await {
            warn!("Write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::directory::Directory;
    use crate::link::Link;
    use tokio_test::io::Builder;

    fn link_id() -> LinkId {
        let config = Config::default();
        Directory::new().add_link(Link::new(&config.links[0]))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_reader_splits_lines_across_reads() {
        let mock = Builder::new()
            .read(b":alice PRIVMSG #a :hel")
            .read(b"lo\r\n\r\nPING :x\n")
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = link_id();

        read_link(mock, link, 3, tx, CancellationToken::new()).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Event::Line { line, session: 3, .. } if line == ":alice PRIVMSG #a :hello"));
        assert!(matches!(&events[1], Event::Line { line, .. } if line == "PING :x"));
        assert!(matches!(&events[2], Event::Closed { reason, .. } if reason == "Connection closed by peer"));
    }

    #[tokio::test]
    async fn test_reader_drops_oversized_line() {
        let flood = vec![b'a'; DEFAULT_BUFFER_SIZE];
        let mock = Builder::new().read(&flood).build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        read_link(mock, link_id(), 1, tx, CancellationToken::new()).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Closed { reason, .. } if reason.contains("Framing")));
    }

    #[tokio::test]
    async fn test_writer_terminates_lines() {
        let mock = Builder::new().write(b"NICK Relay\r\n").write(b"USER a b c :d\r\n").build();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("NICK Relay".to_string()).unwrap();
        tx.send("USER a b c :d".to_string()).unwrap();
        drop(tx);

        write_link(mock, rx, CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn test_writer_flushes_after_cancel() {
        let mock = Builder::new().write(b"QUIT :bye\r\n").build();
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        tx.send("QUIT :bye".to_string()).unwrap();
        token.cancel();

        write_link(mock, rx, token).await;
    }
}
