use crate::config::RelayConfig;
use crate::error::CallError;
use crate::session::PartyId;
use crate::signaling::message::SignalingMessage;
use crate::signaling::transport::{SignalEvent, SignalingTransport, TransportStatus};
use futures_util::{SinkExt, StreamExt};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `shutdown` waits for queued frames to be flushed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Websocket connection to the relay server with bounded reconnection.
///
/// Outgoing messages are queued and survive reconnects. Inbound frames and
/// status changes go to the `inbound` channel given at spawn time. Once the
/// reconnection budget is exhausted the client reports
/// [`TransportStatus::Unavailable`] and every later `send` fails.
///
/// Closing the client (explicitly or on drop) stops accepting new messages
/// but still writes out whatever was queued before the socket is closed.
pub struct RelayClient {
    outbound: Mutex<Option<mpsc::UnboundedSender<SignalingMessage>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayClient {
    pub fn spawn(
        config: RelayConfig,
        local_id: PartyId,
        inbound: mpsc::UnboundedSender<SignalEvent>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_relay(config, local_id, outbound_rx, inbound));
        Self {
            outbound: Mutex::new(Some(outbound)),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(task) => task.as_ref().is_some_and(|t| !t.is_finished()),
            Err(_) => false,
        }
    }

    /// Stops accepting messages. The relay task flushes the queue, closes
    /// the socket and exits on its own.
    pub fn close(&self) {
        match self.outbound.lock() {
            Ok(mut outbound) => {
                if outbound.take().is_some() {
                    debug!("Relay client closing");
                }
            }
            Err(_) => warn!("Relay outbound lock poisoned on close"),
        }
    }

    /// Closes the client and waits for queued frames to reach the relay.
    /// A relay that does not drain in time is cut off.
    pub async fn shutdown(&self) {
        self.close();
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        let Some(mut task) = task else {
            return;
        };
        if timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
            warn!("Relay did not drain within {SHUTDOWN_TIMEOUT:?}, aborting");
            task.abort();
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl SignalingTransport for RelayClient {
    fn send(&self, message: SignalingMessage) -> Result<(), CallError> {
        debug!("relay <- {}", message.event_name());
        let outbound = self
            .outbound
            .lock()
            .map_err(|_| CallError::SignalingUnavailable)?;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|_| CallError::SignalingUnavailable),
            None => Err(CallError::SignalingUnavailable),
        }
    }
}

enum PumpExit {
    /// The socket dropped; reconnect.
    Lost,
    /// The client or the consumer went away; stop for good.
    Shutdown,
}

async fn run_relay(
    config: RelayConfig,
    local_id: PartyId,
    mut outbound: mpsc::UnboundedReceiver<SignalingMessage>,
    inbound: mpsc::UnboundedSender<SignalEvent>,
) {
    let mut failures: u32 = 0;
    let mut unsent: Option<String> = None;
    let _ = inbound.send(SignalEvent::Status(TransportStatus::Connecting));

    loop {
        if outbound.is_closed() && outbound.is_empty() && unsent.is_none() {
            debug!("Relay client closed with nothing queued, not reconnecting");
            return;
        }

        match timeout(config.connect_timeout(), connect_async(config.url.as_str())).await {
            Ok(Ok((socket, _))) => {
                info!("Connected to relay {}", config.url);
                if inbound
                    .send(SignalEvent::Status(TransportStatus::Connected))
                    .is_err()
                {
                    return;
                }
                let opened = Instant::now();
                match pump(socket, &local_id, &mut outbound, &inbound, &mut unsent).await {
                    // a session shorter than the connect timeout counts as a failed attempt
                    PumpExit::Lost if opened.elapsed() < config.connect_timeout() => {
                        failures += 1;
                        warn!("Relay connection attempt {failures} dropped right after opening");
                    }
                    PumpExit::Lost => {
                        failures = 0;
                        warn!("Relay connection lost");
                    }
                    PumpExit::Shutdown => {
                        debug!("Relay client shutting down");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                failures += 1;
                warn!("Relay connection attempt {failures} failed: {e}");
            }
            Err(_) => {
                failures += 1;
                warn!(
                    "Relay connection attempt {failures} timed out after {:?}",
                    config.connect_timeout()
                );
            }
        }

        if failures >= config.reconnect_attempts {
            error!(
                "Relay {} unavailable after {failures} attempts, giving up",
                config.url
            );
            let _ = inbound.send(SignalEvent::Status(TransportStatus::Unavailable));
            return;
        }

        if inbound
            .send(SignalEvent::Status(TransportStatus::Reconnecting {
                attempt: failures + 1,
            }))
            .is_err()
        {
            return;
        }
        sleep(config.retry_delay()).await;
    }
}

async fn pump(
    socket: RelaySocket,
    local_id: &PartyId,
    outbound: &mut mpsc::UnboundedReceiver<SignalingMessage>,
    inbound: &mpsc::UnboundedSender<SignalEvent>,
    unsent: &mut Option<String>,
) -> PumpExit {
    let (mut sink, mut stream) = socket.split();

    let register = SignalingMessage::Register {
        email: local_id.clone(),
    };
    let mut greeting = Vec::with_capacity(2);
    match register.to_json() {
        Ok(text) => greeting.push(text),
        Err(e) => error!("Failed to encode registration: {e}"),
    }
    greeting.extend(unsent.take());
    for text in greeting {
        if let Err(e) = sink.send(Message::text(text)).await {
            warn!("Relay write failed during registration: {e}");
            return PumpExit::Lost;
        }
    }

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match SignalingMessage::from_json(text.as_str()) {
                    Ok(message) => {
                        debug!("relay -> {}", message.event_name());
                        if inbound.send(SignalEvent::Message(message)).is_err() {
                            return PumpExit::Shutdown;
                        }
                    }
                    Err(e) => warn!("Dropping malformed relay frame: {e}"),
                },
                Some(Ok(Message::Close(reason))) => {
                    debug!("Relay closed the connection: {reason:?}");
                    return PumpExit::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Relay read failed: {e}");
                    return PumpExit::Lost;
                }
                None => return PumpExit::Lost,
            },
            message = outbound.recv() => match message {
                Some(message) => {
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode {}: {e}", message.event_name());
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::text(text.clone())).await {
                        warn!("Relay write failed: {e}");
                        *unsent = Some(text);
                        return PumpExit::Lost;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return PumpExit::Shutdown;
                }
            },
        }
    }
}
