// ============================================================================
// KIN-SDK - Server-Sent Events
// ============================================================================
// Horizon streaming endpoints speak `text/event-stream`.
//
// `SseDecoder` turns raw body chunks into events. `subscribe` runs a reader
// task that keeps the connection alive, resuming from the last paging token
// after every disconnect, and forwards decoded records over a channel. The
// task, and its connection, end as soon as the consumer drops the stream.
// ============================================================================

use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::GatewayError;

/// Delay before reconnecting a dropped stream
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Horizon's connection bookkeeping messages
    pub fn is_control(&self) -> bool {
        matches!(self.data.trim(), "\"hello\"" | "\"byebye\"" | "hello" | "byebye")
    }
}

/// Incremental `text/event-stream` parser
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending: SseEvent,
    has_data: bool,
}

impl SseDecoder {
    /// Feed a chunk, get back every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if self.has_data {
                    events.push(std::mem::take(&mut self.pending));
                }
                self.pending = SseEvent::default();
                self.has_data = false;
                continue;
            }
            self.apply_line(&line);
        }
        events
    }

    fn apply_line(&mut self, line: &str) {
        // Comment
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_data = true;
            }
            "id" => self.pending.id = Some(value.to_string()),
            "event" => self.pending.event = Some(value.to_string()),
            _ => {}
        }
    }
}

/// Records that can resume a stream
pub trait Cursored {
    fn paging_token(&self) -> &str;
}

/// Open a reconnecting SSE subscription on `url`.
///
/// `cursor` defaults to `now`, i.e. only new records are delivered.
pub fn subscribe<T>(
    http: Client,
    url: String,
    cursor: Option<String>,
) -> BoxStream<'static, Result<T, GatewayError>>
where
    T: DeserializeOwned + Cursored + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut cursor = cursor.unwrap_or_else(|| "now".to_string());

        loop {
            if tx.is_closed() {
                break;
            }

            debug!(url = %url, cursor = %cursor, "Opening event stream");
            let response = http
                .get(&url)
                .header(ACCEPT, "text/event-stream")
                .query(&[("cursor", cursor.as_str())])
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    let mut body = response.bytes_stream();
                    let mut decoder = SseDecoder::default();

                    loop {
                        // A quiet stream must still notice a departed consumer
                        let chunk = tokio::select! {
                            _ = tx.closed() => {
                                debug!("Stream consumer gone, closing");
                                return;
                            }
                            chunk = body.next() => chunk,
                        };
                        let chunk = match chunk {
                            Some(Ok(chunk)) => chunk,
                            Some(Err(e)) => {
                                warn!(error = %e, "Event stream interrupted");
                                break;
                            }
                            None => break,
                        };

                        for event in decoder.push(&chunk) {
                            if event.is_control() {
                                continue;
                            }
                            let item = serde_json::from_str::<T>(&event.data)
                                .map_err(|e| GatewayError::Decode(e.to_string()));
                            if let Ok(record) = &item {
                                cursor = record.paging_token().to_string();
                            } else if let Some(id) = &event.id {
                                cursor = id.clone();
                            }
                            if tx.send(item).await.is_err() {
                                debug!("Stream consumer gone, closing");
                                return;
                            }
                        }
                    }
                }
                Ok(response) => {
                    warn!(status = %response.status(), "Event stream refused");
                }
                Err(e) => {
                    warn!(error = %e, "Event stream connect failed");
                }
            }

            tokio::select! {
                _ = tx.closed() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {
                    info!(cursor = %cursor, "Reconnecting event stream");
                }
            }
        }
    });

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}
