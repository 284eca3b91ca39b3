//! Stream transport
//!
//! The manager never touches a socket. It asks a [`Connector`] for a
//! [`StreamHandle`], a pair of channels to a pump task that owns the real
//! WebSocket. Dropping the handle is the close: the pump sees its outbound
//! channel end, sends a close frame and exits, and nothing it read after
//! that point can reach the manager.

use std::future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::TransportError;

/// How long a graceful close may take before the socket is just dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Close code the stream uses for a rejected access token
pub const CLOSE_CODE_UNAUTHORIZED: u16 = 4001;

/// Something read from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// The manager's end of one open stream
#[derive(Debug)]
pub struct StreamHandle {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl StreamHandle {
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Queue a text frame
    pub fn send(&self, text: &str) -> Result<(), TransportError> {
        self.outbound
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    /// Whether the other end is still there
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Next inbound item; `None` once the pump has exited
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }
}

/// Opens streams
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<StreamHandle, TransportError>>;
}

/// Host network reachability
pub trait NetworkMonitor: Send + Sync + 'static {
    fn is_online(&self) -> bool;
}

/// For hosts with no reachability signal
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeOnline;

impl NetworkMonitor for AssumeOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// WebSocket connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<StreamHandle, TransportError>> {
        let url = url.to_string();
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            let ws = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await
            {
                Err(_) => return Err(TransportError::Timeout(connect_timeout)),
                Ok(Err(tungstenite::Error::Http(response))) => {
                    let status = response.status().as_u16();
                    if status == 401 {
                        return Err(TransportError::Unauthorized { status });
                    }
                    return Err(TransportError::Open(format!("HTTP {}", status)));
                }
                Ok(Err(e)) => return Err(TransportError::Open(e.to_string())),
                Ok(Ok((ws, _response))) => ws,
            };

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws, outbound_rx, inbound_tx));

            Ok(StreamHandle::from_channels(outbound_tx, inbound_rx))
        })
    }
}

/// Shuttle frames between the socket and the handle until either side ends
async fn pump(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => {
                match out {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            let err = TransportError::Send(e.to_string());
                            let _ = inbound.send(Inbound::Error(err.to_string()));
                            break;
                        }
                    }
                    None => {
                        debug!("Stream handle dropped, closing socket");
                        let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await;
                        break;
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(Inbound::Text(text)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        let _ = inbound.send(Inbound::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {
                        // ping/pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        let _ = inbound.send(Inbound::Error(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = inbound.send(Inbound::Closed {
                            code: None,
                            reason: String::new(),
                        });
                        break;
                    }
                }
            }
        }
    }
}

/// Open a stream, give the server `grace` to reject it, and close it again
///
/// Only the socket is touched: no sync pass runs and no state is written.
/// A frame or silence within `grace` both count as a live stream.
pub async fn check_stream(
    connector: &dyn Connector,
    url: &str,
    grace: Duration,
) -> Result<(), TransportError> {
    let mut stream = connector.connect(url).await?;

    match tokio::time::timeout(grace, stream.recv()).await {
        Err(_) | Ok(Some(Inbound::Text(_))) => Ok(()),
        Ok(Some(Inbound::Closed { code, reason })) => {
            if code == Some(CLOSE_CODE_UNAUTHORIZED) {
                Err(TransportError::Open("access token rejected".to_string()))
            } else {
                Err(TransportError::Open(format!(
                    "closed by server (code {:?}) {}",
                    code, reason
                )))
            }
        }
        Ok(Some(Inbound::Error(e))) => Err(TransportError::Open(e)),
        Ok(None) => Err(TransportError::Closed),
    }
}

/// Resolve with the next inbound item of the current stream, if any
pub(crate) async fn next_inbound(stream: &mut Option<StreamHandle>) -> Option<Inbound> {
    match stream {
        Some(handle) => handle.recv().await,
        None => future::pending().await,
    }
}
