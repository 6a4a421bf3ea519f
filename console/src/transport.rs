//! Task-run WebSocket transport.
//!
//! A [`RunTransport`] owns one supervisor task that holds at most one live
//! socket and at most one pending reconnect sleep. Dropping the handle (or
//! calling [`RunTransport::shutdown`]) cancels both.
//!
//! State machine: `Connecting -> Open -> Closed -> (delay) -> Connecting`.
//! Errors close the socket and take the same reconnect path. Once the
//! [`ReconnectPolicy`] is exhausted the transport emits
//! [`TransportEvent::GaveUp`] and stops.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use shared_types::{RunUpdate, SESSION_COOKIE};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, COOKIE};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ConsoleError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the run endpoint for a task, rewriting `http -> ws` and `https -> wss`.
pub fn run_endpoint(base: &Url, task_id: &str) -> Result<Url> {
    let mut url = base.join(&format!("/api/tasks/{task_id}/run"))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConsoleError::InvalidInput(format!(
                "unsupported scheme '{other}' for a task run endpoint"
            )))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        ConsoleError::InvalidInput(format!("cannot switch {url} to scheme {scheme}"))
    })?;
    Ok(url)
}

/// Decode one inbound text frame.
pub fn decode_update(payload: &str) -> Result<RunUpdate> {
    Ok(serde_json::from_str(payload)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every attempt
    Fixed,
    /// Delay doubles per consecutive attempt, capped at `max`
    Exponential { max: Duration },
}

impl Backoff {
    pub fn from_env(value: &str) -> anyhow::Result<Self> {
        match value {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential {
                max: Duration::from_secs(60),
            }),
            other => Err(anyhow::anyhow!(
                "Invalid MAIL_CONSOLE_RECONNECT_BACKOFF '{other}'. Expected 'fixed' or 'exponential'"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub backoff: Backoff,
    /// Consecutive reconnect attempts allowed without a successful open.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Bound on one TCP/TLS/WebSocket handshake; expiry counts as a failed attempt
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(5000),
            backoff: Backoff::Fixed,
            max_attempts: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// `attempt` is 1-based and counts reconnects since the last open.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max } => {
                let shift = attempt.saturating_sub(1).min(16);
                self.delay.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    /// Supervisor exited: cancelled or reconnect policy exhausted
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Update(RunUpdate),
    Disconnected,
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Socket not open; nothing is queued
    Dropped,
}

#[derive(Debug, PartialEq, Eq)]
enum PumpExit {
    Closed,
    Cancelled,
}

pub struct RunTransport {
    outbound: mpsc::UnboundedSender<String>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RunTransport {
    /// Spawn the supervisor. Must be called from within a tokio runtime.
    pub fn connect(
        url: Url,
        token: Option<String>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            url,
            token,
            policy,
            outbound: outbound_rx,
            events: events_tx,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run());

        (
            Self {
                outbound: outbound_tx,
                state: state_rx,
                cancel,
                task: Some(task),
            },
            events_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Send a trimmed text turn if the socket is open.
    pub fn send(&self, text: &str) -> SendOutcome {
        if self.state() != ConnectionState::Open {
            warn!("run websocket not open; dropping outbound message");
            return SendOutcome::Dropped;
        }
        match self.outbound.send(text.trim().to_string()) {
            Ok(()) => SendOutcome::Sent,
            Err(_) => SendOutcome::Dropped,
        }
    }

    /// Close the socket, cancel any pending reconnect and wait for the supervisor.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RunTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Supervisor {
    url: Url,
    token: Option<String>,
    policy: ReconnectPolicy,
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = open_socket(&self.url, self.token.as_deref(), self.policy.connect_timeout) => result,
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    self.discard_stale_outbound();
                    self.state.send_replace(ConnectionState::Open);
                    info!(url = %self.url, "run websocket connection established");
                    if self.events.send(TransportEvent::Connected).is_err() {
                        break;
                    }

                    let exit = self.pump(stream).await;
                    self.state.send_replace(ConnectionState::Closed);
                    info!(url = %self.url, "run websocket connection closed");
                    if exit == PumpExit::Cancelled
                        || self.events.send(TransportEvent::Disconnected).is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    self.state.send_replace(ConnectionState::Closed);
                    warn!(url = %self.url, error = %e, "run websocket connect failed");
                }
            }

            attempt += 1;
            if !self.policy.allows(attempt) {
                warn!(attempt, "run websocket reconnect attempts exhausted");
                let _ = self.events.send(TransportEvent::GaveUp);
                break;
            }

            let delay = self.policy.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Stopped);
    }

    /// Turns queued against a connection that closed before they were written
    /// are not replayed on the next one.
    fn discard_stale_outbound(&mut self) {
        let mut discarded = 0usize;
        while self.outbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(discarded, "discarded outbound messages from previous connection");
        }
    }

    async fn pump(&mut self, stream: WsStream) -> PumpExit {
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    info!("run websocket connection closed gracefully");
                    return PumpExit::Cancelled;
                }
                outbound = self.outbound.recv() => {
                    let Some(text) = outbound else {
                        let _ = sink.close().await;
                        return PumpExit::Cancelled;
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(error = %e, "run websocket send failed");
                        return PumpExit::Closed;
                    }
                }
                inbound = source.next() => match inbound {
                    Some(Ok(Message::Text(text))) => match decode_update(&text) {
                        Ok(update) => {
                            if self.events.send(TransportEvent::Update(update)).is_err() {
                                let _ = sink.close().await;
                                return PumpExit::Cancelled;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "dropping malformed run frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "server closed run websocket");
                        return PumpExit::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "run websocket error");
                        return PumpExit::Closed;
                    }
                    None => return PumpExit::Closed,
                },
            }
        }
    }
}

async fn open_socket(url: &Url, token: Option<&str>, limit: Duration) -> Result<WsStream> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = token {
        let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}"))
            .map_err(|e| ConsoleError::InvalidInput(format!("session token: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ConsoleError::InvalidInput(format!("session token: {e}")))?;
        request.headers_mut().insert(COOKIE, cookie);
        request.headers_mut().insert(AUTHORIZATION, bearer);
    }
    let (stream, _response) = tokio::time::timeout(limit, connect_async(request))
        .await
        .map_err(|_| ConsoleError::Timeout(format!("websocket handshake with {url}")))??;
    Ok(stream)
}
