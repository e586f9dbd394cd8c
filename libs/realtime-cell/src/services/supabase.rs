use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use shared_config::AppConfig;

use crate::services::channel::{ChangeStream, PushSource};
use crate::{ChangeOperation, RawChangeEvent, RealtimeError, RealtimeSubscription};

const JOIN_REF: &str = "1";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Push source speaking the Phoenix channel protocol of Supabase Realtime.
pub struct SupabaseRealtimeSource {
    realtime_url: String,
    api_key: String,
    access_token: String,
}

impl SupabaseRealtimeSource {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            realtime_url: config.supabase_realtime_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_anon_key.clone(),
            access_token: config.bearer_token().to_string(),
        }
    }

    fn socket_url(&self) -> String {
        format!("{}/websocket?apikey={}&vsn=1.0.0", self.realtime_url, self.api_key)
    }
}

#[async_trait]
impl PushSource for SupabaseRealtimeSource {
    async fn connect(&self, subscription: &RealtimeSubscription) -> Result<ChangeStream, RealtimeError> {
        let (socket, _) = connect_async(self.socket_url())
            .await
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let topic = channel_topic(subscription);
        let join = join_frame(&topic, subscription, &self.access_token);
        sink.send(Message::Text(join.to_string().into()))
            .await
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;

        timeout(JOIN_TIMEOUT, await_join_reply(&mut stream, &topic))
            .await
            .map_err(|_| RealtimeError::Connection(format!("join of {} timed out", topic)))??;

        info!("Joined realtime channel {}", topic);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump(sink, stream, tx, topic));

        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(events))
    }
}

#[derive(Debug, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug, PartialEq)]
enum FrameOutcome {
    Change(RawChangeEvent),
    Closed(String),
    Ignore,
}

fn channel_topic(subscription: &RealtimeSubscription) -> String {
    format!("realtime:{}", subscription.channel_name)
}

fn join_frame(topic: &str, subscription: &RealtimeSubscription, access_token: &str) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": subscription.table_name,
                    "filter": subscription.filter_expression(),
                }]
            },
            "access_token": access_token,
        },
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
    })
}

fn heartbeat_frame(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

async fn await_join_reply<S>(stream: &mut S, topic: &str) -> Result<(), RealtimeError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(RealtimeError::Connection(e.to_string())),
        };

        let frame: PhoenixFrame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Skipping unparseable frame while joining: {}", e);
                continue;
            }
        };

        if frame.topic == topic && frame.event == "phx_reply" && frame.reference.as_deref() == Some(JOIN_REF) {
            return match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Ok(()),
                _ => Err(RealtimeError::JoinRejected(frame.payload["response"].to_string())),
            };
        }
    }

    Err(RealtimeError::Closed("socket closed before join reply".to_string()))
}

fn parse_frame(text: &str, topic: &str) -> FrameOutcome {
    let frame: PhoenixFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("{}", RealtimeError::MalformedEvent(e.to_string()));
            return FrameOutcome::Ignore;
        }
    };

    if frame.topic != topic {
        return FrameOutcome::Ignore;
    }

    match frame.event.as_str() {
        "postgres_changes" => {
            let data = &frame.payload["data"];
            let operation = data.get("type").and_then(Value::as_str).and_then(ChangeOperation::parse);
            let record = match data.get("record") {
                Some(Value::Object(record)) => Some(record.clone()),
                _ => None,
            };

            match (operation, record) {
                (Some(operation), Some(record)) => FrameOutcome::Change(RawChangeEvent::new(
                    data.get("table").and_then(Value::as_str).unwrap_or_default(),
                    operation,
                    record,
                )),
                _ => {
                    debug!("Dropping postgres_changes frame without type or record");
                    FrameOutcome::Ignore
                }
            }
        }
        "phx_error" => FrameOutcome::Closed(format!("channel error: {}", frame.payload)),
        "phx_close" => FrameOutcome::Closed("channel closed by server".to_string()),
        _ => FrameOutcome::Ignore,
    }
}

async fn pump<Si, St>(
    mut sink: Si,
    mut stream: St,
    tx: mpsc::Sender<Result<RawChangeEvent, RealtimeError>>,
    topic: String,
) where
    Si: Sink<Message> + Unpin + Send,
    Si::Error: Display,
    St: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut heartbeat_ref: u64 = 1;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("Change stream for {} dropped, closing socket", topic);
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = heartbeat.tick() => {
                heartbeat_ref += 1;
                let frame = heartbeat_frame(heartbeat_ref).to_string();
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    let _ = tx.send(Err(RealtimeError::Connection(format!("heartbeat failed: {}", e)))).await;
                    break;
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match parse_frame(text.as_str(), &topic) {
                    FrameOutcome::Change(change) => {
                        if tx.send(Ok(change)).await.is_err() {
                            break;
                        }
                    }
                    FrameOutcome::Closed(reason) => {
                        warn!("Realtime channel {} closed: {}", topic, reason);
                        let _ = tx.send(Err(RealtimeError::Closed(reason))).await;
                        break;
                    }
                    FrameOutcome::Ignore => {}
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = tx.send(Err(RealtimeError::Closed("socket closed".to_string()))).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = tx.send(Err(RealtimeError::Connection(e.to_string()))).await;
                    break;
                }
            }
        }
    }
}
