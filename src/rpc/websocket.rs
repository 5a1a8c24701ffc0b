//! WebSocket transport for `eth_subscribe("logs", ...)`.
//!
//! This module owns the wire format of the event stream and nothing else: it
//! opens the socket, sends the subscribe request, waits for the acknowledgement
//! and hands back raw text frames. Reconnect policy lives in
//! [`crate::subscription`].
//!
//! # Wire format
//!
//! Request:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"eth_subscribe",
//!  "params":["logs",{"address":"0x…","topics":[["0x<swap>","0x<mint>","0x<burn>"]]}]}
//! ```
//!
//! Acknowledgement: `{"jsonrpc":"2.0","id":1,"result":"0x<subscription id>"}`
//!
//! Notification:
//! `{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0x…","result":<log>}}`
//!
//! # Seams
//!
//! [`LogConnector`] and [`LogSession`] are the points where tests substitute a
//! scripted transport; [`WsConnector`] is the real one, built on
//! `tokio-tungstenite`.

use alloy::primitives::{Address, B256};
use eyre::WrapErr;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use super::http::redact_url;
use crate::error::{MonitorError, MonitorResult};
use crate::events::RawLog;

/// What to subscribe to: one pool and a set of selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// Pool contract address
    pub address: Address,
    /// Accepted values of `topics[0]`
    pub selectors: Vec<B256>,
}

impl LogFilter {
    /// Filter for `address` matching any of `selectors`.
    #[must_use]
    pub fn new(address: Address, selectors: impl IntoIterator<Item = B256>) -> Self {
        Self {
            address,
            selectors: selectors.into_iter().collect(),
        }
    }

    /// JSON-RPC `eth_subscribe` request for this filter.
    #[must_use]
    pub fn subscribe_request(&self, id: u64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_subscribe",
            "params": [
                "logs",
                {
                    "address": self.address,
                    "topics": [self.selectors],
                }
            ]
        })
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// `eth_subscription` notification carrying a log
    Log(Box<RawLog>),
    /// Successful response to a request
    Response {
        /// Request id
        id: Option<u64>,
        /// Result value, the subscription id for `eth_subscribe`
        result: Value,
    },
    /// Error response
    Error {
        /// Request id
        id: Option<u64>,
        /// Node-provided error text
        message: String,
    },
    /// Anything else (other notifications, unsolicited frames)
    Other,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    params: Option<NotificationParams>,
}

#[derive(Deserialize)]
struct NotificationParams {
    #[serde(default)]
    result: Option<Value>,
}

/// Parse one text frame into an [`InboundMessage`].
///
/// # Errors
///
/// Returns a decoding error if the frame is not JSON, or if it carries a
/// notification result that is not a well-formed log.
///
/// # Example
///
/// ```
/// use v3_pool_stream::rpc::websocket::{parse_envelope, InboundMessage};
///
/// let ack = parse_envelope(r#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#).unwrap();
/// assert!(matches!(ack, InboundMessage::Response { id: Some(1), .. }));
/// ```
pub fn parse_envelope(text: &str) -> MonitorResult<InboundMessage> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| MonitorError::decoding("frame is not a JSON-RPC envelope", Some(Box::new(e))))?;

    if let Some(result) = envelope.params.and_then(|p| p.result) {
        let log: RawLog = serde_json::from_value(result).map_err(|e| {
            MonitorError::decoding("notification result is not a log", Some(Box::new(e)))
        })?;
        return Ok(InboundMessage::Log(Box::new(log)));
    }
    if let Some(error) = envelope.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Ok(InboundMessage::Error {
            id: envelope.id,
            message,
        });
    }
    if let Some(result) = envelope.result {
        return Ok(InboundMessage::Response {
            id: envelope.id,
            result,
        });
    }
    Ok(InboundMessage::Other)
}

/// Opens streaming sessions to a node.
pub trait LogConnector: Send + Sync {
    /// Session type produced by [`LogConnector::connect`].
    type Session: LogSession;

    /// Open a fresh connection.
    fn connect(&self) -> impl Future<Output = MonitorResult<Self::Session>> + Send;
}

/// One live connection.
pub trait LogSession: Send {
    /// Send `eth_subscribe` for `filter` and wait for the acknowledgement.
    ///
    /// Returns the subscription id.
    fn subscribe(&mut self, filter: &LogFilter)
        -> impl Future<Output = MonitorResult<String>> + Send;

    /// Next text frame; `Ok(None)` once the remote closed the connection.
    fn next_message(&mut self) -> impl Future<Output = MonitorResult<Option<String>>> + Send;
}

/// [`LogConnector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    subscribe_timeout: Duration,
}

impl WsConnector {
    /// Connector for a `ws://` or `wss://` endpoint.
    #[must_use]
    pub const fn new(url: String, subscribe_timeout: Duration) -> Self {
        Self {
            url,
            subscribe_timeout,
        }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl LogConnector for WsConnector {
    type Session = WsSession;

    #[instrument(skip(self), fields(ws_host = redact_url(&self.url)))]
    async fn connect(&self) -> MonitorResult<WsSession> {
        let host = redact_url(&self.url);
        let start = std::time::Instant::now();

        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .wrap_err_with(|| format!("WebSocket connection to {host} failed"))?;

        info!(
            ws_host = host,
            duration_ms = start.elapsed().as_millis(),
            "WebSocket connected"
        );

        Ok(WsSession {
            socket,
            next_id: 1,
            pending: VecDeque::new(),
            subscribe_timeout: self.subscribe_timeout,
        })
    }
}

/// Live `tokio-tungstenite` connection.
pub struct WsSession {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    pending: VecDeque<String>,
    subscribe_timeout: Duration,
}

impl WsSession {
    async fn read_text(&mut self) -> eyre::Result<Option<String>> {
        while let Some(frame) = self.socket.next().await {
            match frame.wrap_err("WebSocket read failed")? {
                Message::Text(text) => return Ok(Some(text)),
                // Invalid UTF-8 is a bad message, not a bad connection: the
                // replacement characters fail envelope parsing downstream.
                Message::Binary(bytes) => {
                    let text = match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(len = e.as_bytes().len(), "Binary frame is not UTF-8");
                            String::from_utf8_lossy(e.as_bytes()).into_owned()
                        }
                    };
                    return Ok(Some(text));
                }
                Message::Close(frame) => {
                    warn!(?frame, "WebSocket closed by remote");
                    return Ok(None);
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn await_ack(&mut self, id: u64) -> MonitorResult<String> {
        loop {
            let Some(text) = self.read_text().await? else {
                return Err(MonitorError::subscription(
                    "connection closed before subscription was acknowledged",
                    None,
                ));
            };
            match parse_envelope(&text) {
                Ok(InboundMessage::Response {
                    id: Some(rid),
                    result,
                }) if rid == id => {
                    return result.as_str().map(str::to_string).ok_or_else(|| {
                        MonitorError::subscription(
                            format!("unexpected eth_subscribe result: {result}"),
                            None,
                        )
                    });
                }
                Ok(InboundMessage::Error { id: Some(rid), message }) if rid == id => {
                    return Err(MonitorError::subscription(
                        format!("node rejected eth_subscribe: {message}"),
                        None,
                    ));
                }
                _ => {
                    // Keep frames that raced ahead of the ack for the stream.
                    self.pending.push_back(text);
                }
            }
        }
    }
}

impl LogSession for WsSession {
    #[instrument(skip(self, filter), fields(pool = %filter.address))]
    async fn subscribe(&mut self, filter: &LogFilter) -> MonitorResult<String> {
        let id = self.next_id;
        self.next_id += 1;

        let request = filter.subscribe_request(id).to_string();
        debug!(%request, "Sending eth_subscribe");
        self.socket
            .send(Message::Text(request))
            .await
            .wrap_err("failed to send eth_subscribe")?;

        let timeout = self.subscribe_timeout;
        let subscription_id = tokio::time::timeout(timeout, self.await_ack(id))
            .await
            .map_err(|_| {
                MonitorError::subscription(
                    format!("no eth_subscribe acknowledgement within {timeout:?}"),
                    None,
                )
            })??;

        info!(subscription_id = %subscription_id, "Log subscription active");
        Ok(subscription_id)
    }

    async fn next_message(&mut self) -> MonitorResult<Option<String>> {
        if let Some(text) = self.pending.pop_front() {
            return Ok(Some(text));
        }
        Ok(self.read_text().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");

    #[test]
    fn test_subscribe_request_shape() {
        let swap = b256!("0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67");
        let mint = B256::repeat_byte(0x22);
        let filter = LogFilter::new(POOL, [swap, mint]);
        let request = filter.subscribe_request(7);

        assert_eq!(request["method"], "eth_subscribe");
        assert_eq!(request["id"], 7);
        assert_eq!(request["params"][0], "logs");
        assert_eq!(request["params"][1]["address"], json!(POOL));
        assert_eq!(request["params"][1]["topics"], json!([[swap, mint]]));
    }

    #[test]
    fn test_parse_notification() {
        let text = r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0x9ce5","result":{
            "address":"0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640",
            "topics":["0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67"],
            "data":"0x00"}}}"#;
        let Ok(InboundMessage::Log(log)) = parse_envelope(text) else {
            panic!("expected a log notification");
        };
        assert_eq!(log.address, POOL);
        assert_eq!(log.data.len(), 1);
    }

    #[test]
    fn test_parse_error_response() {
        let text = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"invalid params"}}"#;
        assert_eq!(
            parse_envelope(text).ok(),
            Some(InboundMessage::Error {
                id: Some(1),
                message: "invalid params".to_string()
            })
        );
    }

    #[test]
    fn test_parse_malformed_frames() {
        assert!(parse_envelope("not json").is_err());
        let bad_log = r#"{"params":{"subscription":"0x1","result":{"address":"nope"}}}"#;
        assert!(matches!(
            parse_envelope(bad_log),
            Err(MonitorError::DecodingError { .. })
        ));
        assert_eq!(parse_envelope("{}").ok(), Some(InboundMessage::Other));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let connector = WsConnector::new("ws://127.0.0.1:1".to_string(), Duration::from_secs(1));
        let result = connector.connect().await;
        assert!(matches!(result, Err(MonitorError::ConnectionError { .. })));
    }

    /// Local node that answers the first frame it receives with `replies`,
    /// then keeps the socket open until the client goes away.
    async fn loopback_node(replies: Vec<Message>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _request = ws.next().await;
            for reply in replies {
                if ws.send(reply).await.is_err() {
                    return;
                }
            }
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{addr}")
    }

    async fn session(replies: Vec<Message>, subscribe_timeout: Duration) -> WsSession {
        let url = loopback_node(replies).await;
        WsConnector::new(url, subscribe_timeout).connect().await.unwrap()
    }

    fn filter() -> LogFilter {
        LogFilter::new(POOL, crate::events::SelectorSet::default().all())
    }

    fn ack() -> Message {
        Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":"0x9ce5"}"#.to_string())
    }

    fn log_frame(data: &str) -> String {
        format!(
            r#"{{"jsonrpc":"2.0","method":"eth_subscription","params":{{"subscription":"0x9ce5","result":{{"address":"0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640","topics":[],"data":"{data}"}}}}}}"#
        )
    }

    #[tokio::test]
    async fn test_subscribe_rejected_by_node() {
        let rejection = Message::Text(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"invalid params"}}"#
                .to_string(),
        );
        let mut session = session(vec![rejection], Duration::from_secs(5)).await;

        let result = session.subscribe(&filter()).await;
        assert!(matches!(
            result,
            Err(MonitorError::SubscriptionError { ref message, .. }) if message.contains("invalid params")
        ));
    }

    #[tokio::test]
    async fn test_subscribe_times_out_without_ack() {
        let mut session = session(Vec::new(), Duration::from_millis(50)).await;

        let result = session.subscribe(&filter()).await;
        assert!(matches!(
            result,
            Err(MonitorError::SubscriptionError { ref message, .. }) if message.contains("acknowledgement")
        ));
    }

    #[tokio::test]
    async fn test_frames_before_ack_are_replayed_in_order() {
        let first = log_frame("0x01");
        let second = log_frame("0x02");
        let replies = vec![
            Message::Text(first.clone()),
            Message::Text(second.clone()),
            ack(),
            Message::Text(log_frame("0x03")),
            Message::Close(None),
        ];
        let mut session = session(replies, Duration::from_secs(5)).await;

        assert_eq!(session.subscribe(&filter()).await.unwrap(), "0x9ce5");
        assert_eq!(session.next_message().await.unwrap(), Some(first));
        assert_eq!(session.next_message().await.unwrap(), Some(second));
        assert_eq!(session.next_message().await.unwrap(), Some(log_frame("0x03")));
        assert_eq!(session.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_before_ack_is_subscription_error() {
        let mut session = session(vec![Message::Close(None)], Duration::from_secs(5)).await;

        let result = session.subscribe(&filter()).await;
        assert!(matches!(result, Err(MonitorError::SubscriptionError { .. })));
    }

    #[tokio::test]
    async fn test_invalid_utf8_binary_frame_stays_on_the_connection() {
        let replies = vec![
            ack(),
            Message::Binary(vec![0xff, 0xfe]),
            Message::Binary(log_frame("0x04").into_bytes()),
            Message::Close(None),
        ];
        let mut session = session(replies, Duration::from_secs(5)).await;
        session.subscribe(&filter()).await.unwrap();

        let garbled = session.next_message().await.unwrap().unwrap();
        assert!(matches!(
            parse_envelope(&garbled),
            Err(MonitorError::DecodingError { .. })
        ));
        assert_eq!(session.next_message().await.unwrap(), Some(log_frame("0x04")));
        assert_eq!(session.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "Requires WS_RPC_URL pointing at a streaming-capable node"]
    async fn test_live_subscription_ack() {
        let url = std::env::var("WS_RPC_URL").unwrap_or_default();
        let connector = WsConnector::new(url, Duration::from_secs(10));
        let Ok(mut session) = connector.connect().await else {
            panic!("connect failed");
        };
        let filter = LogFilter::new(POOL, crate::events::SelectorSet::default().all());
        assert!(session.subscribe(&filter).await.is_ok());
    }
}
