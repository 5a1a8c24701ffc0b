//! Subscription client driven by a scripted transport and a recording clock.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use alloy::primitives::{address, Address, Bytes, B256};
use chrono::NaiveDate;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use v3_pool_stream::error::{MonitorError, MonitorResult};
use v3_pool_stream::events::{EventDecoder, EventKind, SelectorSet};
use v3_pool_stream::rpc::{LogConnector, LogFilter, LogSession};
use v3_pool_stream::sink::RecordSink;
use v3_pool_stream::subscription::{BackoffPolicy, Phase, Sleeper, SubscriptionClient};

const POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");

/// Each connect pops one entry: `None` refuses, `Some(frames)` opens a session.
#[derive(Clone, Default)]
struct ScriptedNode {
    plan: Arc<Mutex<VecDeque<Option<Vec<String>>>>>,
    connects: Arc<Mutex<u32>>,
    hang_when_drained: bool,
}

impl ScriptedNode {
    fn connects(&self) -> u32 {
        *self.connects.lock().unwrap()
    }
}

impl LogConnector for ScriptedNode {
    type Session = ScriptedSession;

    async fn connect(&self) -> MonitorResult<ScriptedSession> {
        *self.connects.lock().unwrap() += 1;
        let step = self.plan.lock().unwrap().pop_front().flatten();
        step.map(|frames| ScriptedSession {
            frames: frames.into(),
            hang_when_drained: self.hang_when_drained,
        })
        .ok_or_else(|| MonitorError::connection("connection refused", None))
    }
}

struct ScriptedSession {
    frames: VecDeque<String>,
    hang_when_drained: bool,
}

impl LogSession for ScriptedSession {
    async fn subscribe(&mut self, filter: &LogFilter) -> MonitorResult<String> {
        assert_eq!(filter.address, POOL);
        assert_eq!(filter.selectors.len(), 3);
        Ok("0x9ce59a13059e417087c02d3236a0b1cc".to_string())
    }

    async fn next_message(&mut self) -> MonitorResult<Option<String>> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.hang_when_drained => std::future::pending().await,
            None => Ok(None),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

fn notification(topics: Vec<B256>, data: Vec<u8>) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {
            "subscription": "0x9ce59a13059e417087c02d3236a0b1cc",
            "result": {
                "address": POOL,
                "topics": topics,
                "data": Bytes::from(data),
                "blockNumber": "0x1312d00",
                "removed": false
            }
        }
    })
    .to_string()
}

fn swap_frame() -> String {
    notification(
        vec![SelectorSet::default().swap, B256::ZERO, B256::ZERO],
        vec![0u8; 160],
    )
}

fn client(
    node: &ScriptedNode,
    sink: RecordSink,
    policy: BackoffPolicy,
) -> SubscriptionClient<ScriptedNode, RecordSink, RecordingSleeper> {
    let selectors = SelectorSet::default();
    SubscriptionClient::new(
        node.clone(),
        EventDecoder::new(selectors),
        LogFilter::new(POOL, selectors.all()),
        sink,
        policy,
    )
    .with_sleeper(RecordingSleeper::default())
}

fn sink(dir: &tempfile::TempDir) -> RecordSink {
    RecordSink::open_dated(dir.path(), NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()).unwrap()
}

#[tokio::test]
async fn test_terminates_after_budget_with_exponential_delays() {
    let dir = tempfile::tempdir().unwrap();
    let node = ScriptedNode::default();
    let sleeper = RecordingSleeper::default();
    let policy = BackoffPolicy::new(4, 3).with_unit(Duration::from_millis(1));

    let mut client = client(&node, sink(&dir), policy).with_sleeper(sleeper.clone());
    let result = client.run().await;

    let Err(MonitorError::ExhaustedRetries { attempts, last_error }) = result else {
        panic!("expected ExhaustedRetries");
    };
    assert_eq!(attempts, 4);
    assert!(matches!(*last_error, MonitorError::ConnectionError { .. }));

    let delays = sleeper.0.lock().unwrap().clone();
    assert_eq!(
        delays,
        [3, 9, 27, 81].map(Duration::from_millis).to_vec()
    );
    // One initial attempt plus one per backoff, nothing after termination.
    assert_eq!(node.connects(), 5);
    assert_eq!(client.state().phase(), Phase::Terminated);
}

#[tokio::test]
async fn test_malformed_log_never_reaches_sink() {
    let dir = tempfile::tempdir().unwrap();
    let node = ScriptedNode::default();
    node.plan.lock().unwrap().push_back(Some(vec![
        // Swap selector with a 4-word body.
        notification(
            vec![SelectorSet::default().swap, B256::ZERO, B256::ZERO],
            vec![0u8; 128],
        ),
        swap_frame(),
    ]));

    let mut client = client(&node, sink(&dir), BackoffPolicy::new(0, 2));
    let _ = client.run().await;

    assert_eq!(client.stats().rejected, 1);
    assert_eq!(client.stats().swaps, 1);
    let rows = std::fs::read_to_string(client.sink().path(EventKind::Swap)).unwrap();
    assert_eq!(rows.lines().count(), 2);
}

#[tokio::test]
async fn test_stop_token_ends_streaming_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let node = ScriptedNode {
        hang_when_drained: true,
        ..ScriptedNode::default()
    };
    node.plan
        .lock()
        .unwrap()
        .push_back(Some(vec![swap_frame(), swap_frame()]));

    let stop = CancellationToken::new();
    let mut client = client(&node, sink(&dir), BackoffPolicy::default()).with_stop(stop.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();
    });

    let stats = client.run().await.unwrap();
    canceller.await.unwrap();

    assert_eq!(stats.swaps, 2);
    assert_eq!(stats.connections, 1);
    assert_eq!(node.connects(), 1);
    assert_eq!(client.state().phase(), Phase::Terminated);
}

#[tokio::test]
async fn test_garbled_binary_frame_does_not_drop_the_socket() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;
    use v3_pool_stream::events::DecodedEvent;
    use v3_pool_stream::rpc::WsConnector;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _request = ws.next().await;
        let replies = [
            Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":"0x9ce5"}"#.to_string()),
            Message::Binary(vec![0xff, 0xfe]),
            Message::Text(swap_frame()),
            Message::Close(None),
        ];
        for reply in replies {
            ws.send(reply).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    let selectors = SelectorSet::default();
    let mut client = SubscriptionClient::new(
        WsConnector::new(format!("ws://{addr}"), Duration::from_secs(5)),
        EventDecoder::new(selectors),
        LogFilter::new(POOL, selectors.all()),
        Vec::<DecodedEvent>::new(),
        BackoffPolicy::new(0, 2),
    );
    let result = client.run().await;

    // The only failure is the close at the end of the script.
    let Err(MonitorError::ExhaustedRetries { last_error, .. }) = result else {
        panic!("expected the run to end on the scripted close");
    };
    assert!(matches!(*last_error, MonitorError::ConnectionError { .. }));
    assert_eq!(client.stats().connections, 1);
    assert_eq!(client.stats().rejected, 1);
    assert_eq!(client.stats().swaps, 1);
    assert_eq!(client.sink().len(), 1);
}
