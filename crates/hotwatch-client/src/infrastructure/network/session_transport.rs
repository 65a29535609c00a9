//! WebSocket implementation of [`SessionTransport`].
//!
//! Every [`SessionTransport::open`] spawns one connection task.  The task
//! connects, then multiplexes two directions with `tokio::select!`:
//!
//! - outbound text frames queued by [`SessionTransport::send_text`]
//! - inbound frames from the server
//!
//! It reports what happens as [`TransportEvent`]s stamped with the
//! generation it was opened under.  Closing bumps the generation, so the
//! session manager can tell a late event from a closed connection apart from
//! one of the live connection.
//!
//! # Local close
//!
//! [`SessionTransport::close`] drops the outbound queue.  The task sees the
//! queue end, sends a Close frame and exits without reporting anything.  A
//! task still connecting gives up instead.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, info};
use url::Url;

use crate::application::session_manager::{SessionTransport, TransportEvent, TransportEventKind};

/// The session's WebSocket connection.
pub struct WsTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Creates an unconnected transport reporting on `events`.
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            generation: 0,
            outbound: None,
            task: None,
        }
    }
}

impl SessionTransport for WsTransport {
    fn open(&mut self, url: &Url) {
        self.close();

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Reporter {
            generation: self.generation,
            events: self.events.clone(),
        };
        debug!("opening session connection {} to {url}", self.generation);
        self.task = Some(tokio::spawn(run_connection(url.clone(), rx, reporter)));
        self.outbound = Some(tx);
    }

    fn close(&mut self) {
        if self.outbound.take().is_some() || self.task.is_some() {
            debug!("closing session connection {}", self.generation);
        }
        // The task finishes the close handshake on its own.
        self.task = None;
        self.generation += 1;
    }

    fn send_text(&mut self, frame: String) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    fn is_unconnected(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

/// Sends events for one connection attempt.
struct Reporter {
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Reporter {
    fn report(&self, kind: TransportEventKind) {
        // The event loop is gone when this fails; nothing is listening.
        let _ = self.events.send(TransportEvent {
            generation: self.generation,
            kind,
        });
    }
}

/// Drives one connection from connect to close.
async fn run_connection(url: Url, mut outbound: mpsc::UnboundedReceiver<String>, reporter: Reporter) {
    // ── Connect, buffering frames queued meanwhile ────────────────────────────
    let mut pending = Vec::new();
    let connecting = connect_async(url.as_str());
    tokio::pin!(connecting);

    let result = loop {
        tokio::select! {
            result = &mut connecting => break result,
            frame = outbound.recv() => match frame {
                Some(frame) => pending.push(frame),
                None => {
                    debug!("connection to {url} abandoned before it opened");
                    return;
                }
            },
        }
    };

    let ws_stream = match result {
        Ok((stream, _response)) => stream,
        Err(e) => {
            reporter.report(TransportEventKind::Error(format!(
                "failed to connect to {url}: {e}"
            )));
            return;
        }
    };
    info!("WebSocket connected to {url}");
    reporter.report(TransportEventKind::Connected);

    let (mut sink, mut stream) = ws_stream.split();
    for frame in pending {
        if let Err(e) = sink.send(WsMessage::Text(frame)).await {
            reporter.report(TransportEventKind::Error(e.to_string()));
            return;
        }
    }

    // ── Connected: multiplex both directions ──────────────────────────────────
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        reporter.report(TransportEventKind::Error(e.to_string()));
                        return;
                    }
                }
                None => {
                    debug!("closing WebSocket to {url}");
                    let _ = sink.close().await;
                    return;
                }
            },

            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    reporter.report(TransportEventKind::Text(text));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("server closed the session: {frame:?}");
                    reporter.report(TransportEventKind::Disconnected);
                    return;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    debug!("ignoring binary frame ({} bytes)", data.len());
                }
                // Ping, Pong and raw frames are handled by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    reporter.report(TransportEventKind::Disconnected);
                    return;
                }
                Some(Err(e)) => {
                    reporter.report(TransportEventKind::Error(e.to_string()));
                    return;
                }
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no transport event in time")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_new_transport_is_unconnected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);

        assert!(transport.is_unconnected());
        assert!(!transport.send_text("x".into()));
    }

    #[tokio::test]
    async fn test_close_bumps_generation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);
        let before = transport.generation();

        transport.close();

        assert_eq!(transport.generation(), before + 1);
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error() {
        // Arrange: grab a free port, then release it so nothing listens.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);

        // Act
        transport.open(&Url::parse(&format!("ws://{addr}/ws")).unwrap());
        let event = next_event(&mut rx).await;

        // Assert
        assert_eq!(event.generation, transport.generation());
        assert!(matches!(event.kind, TransportEventKind::Error(_)));
    }

    #[tokio::test]
    async fn test_round_trip_with_server() {
        // Arrange: a server that echoes one frame back, then closes.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let received = ws.next().await.unwrap().unwrap();
            ws.send(WsMessage::Text(r#"{"type":"connected"}"#.to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            received
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);

        // Act
        transport.open(&Url::parse(&format!("ws://{addr}/ws")).unwrap());
        let connected = next_event(&mut rx).await;
        assert!(transport.send_text(r#"{"type":"hello","client":"qt"}"#.into()));
        let text = next_event(&mut rx).await;
        let closed = next_event(&mut rx).await;

        // Assert
        assert_eq!(connected.kind, TransportEventKind::Connected);
        assert_eq!(
            text.kind,
            TransportEventKind::Text(r#"{"type":"connected"}"#.into())
        );
        assert_eq!(closed.kind, TransportEventKind::Disconnected);
        assert_eq!(
            server.await.unwrap(),
            WsMessage::Text(r#"{"type":"hello","client":"qt"}"#.into())
        );
    }

    #[tokio::test]
    async fn test_events_after_close_carry_a_stale_generation() {
        // Arrange: a server that accepts and then idles.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while ws.next().await.is_some() {}
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);
        transport.open(&Url::parse(&format!("ws://{addr}/ws")).unwrap());
        let opened_under = transport.generation();

        // Act
        let connected = next_event(&mut rx).await;
        transport.close();

        // Assert
        assert_eq!(connected.generation, opened_under);
        assert_ne!(connected.generation, transport.generation());
        assert!(transport.is_unconnected());
    }
}
