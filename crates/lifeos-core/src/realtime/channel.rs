use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::cache::QueryCache;
use crate::config::SyncClientConfig;
use crate::error::{Error, Result};
use crate::realtime::sse::{SseEvent, SseParser};
use crate::realtime::topic::RealtimeTopic;
use crate::sync::TransportError;

/// Connection state of the realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Why a single stream connection ended
enum StreamEnd {
    /// Server closed the body; reconnect
    Eof,
    /// Transport failure or 5xx; reconnect
    Failed(TransportError),
    /// The server refused the session; do not reconnect
    Rejected(TransportError),
}

/// Receive-only subscription to server change notifications.
///
/// Each recognised event invalidates the cache keys of its topic. Events
/// missed while disconnected are not replayed; after every reconnect (and
/// every `reconcile_interval`, when set) the whole cache is marked stale so
/// the next reads re-fetch authoritative state.
pub struct RealtimeChannel {
    stream_url: String,
    auth_token: String,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    reconcile_interval: Option<Duration>,
    cache: QueryCache,
}

impl RealtimeChannel {
    /// Start listening. Requires an authenticated session.
    pub fn connect(config: &SyncClientConfig, cache: QueryCache) -> Result<RealtimeHandle> {
        let auth_token = config.auth_token.clone().ok_or(Error::MissingSession)?;
        let channel = Self {
            stream_url: config.stream_url(),
            auth_token,
            connect_timeout: config.request_timeout,
            reconnect_delay: config.reconnect_delay,
            reconcile_interval: config.reconcile_interval,
            cache,
        };

        // Long-lived body: only the connect phase gets a timeout.
        let client = reqwest::Client::builder()
            .connect_timeout(channel.connect_timeout)
            .build()
            .map_err(TransportError::from)?;

        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(channel.run(client, state_tx, shutdown_rx));

        Ok(RealtimeHandle {
            state: state_rx,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    async fn run(
        self,
        client: reqwest::Client,
        state: watch::Sender<ChannelState>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut parser = SseParser::new();
        let mut reconcile = self.reconcile_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut reconnecting = false;

        loop {
            state.send_replace(ChannelState::Connecting);
            parser.reset();

            let end = tokio::select! {
                _ = &mut shutdown => break,
                end = self.stream_once(&client, &state, &mut parser, reconnecting, &mut reconcile) => end,
            };

            match end {
                StreamEnd::Eof => tracing::debug!("Realtime stream closed by server"),
                StreamEnd::Failed(error) => tracing::warn!("Realtime stream error: {}", error),
                StreamEnd::Rejected(error) => {
                    tracing::warn!("Realtime stream rejected; not reconnecting: {}", error);
                    break;
                }
            }

            reconnecting = true;
            let delay = parser.retry().unwrap_or(self.reconnect_delay);
            state.send_replace(ChannelState::Connecting);
            tokio::select! {
                _ = &mut shutdown => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        state.send_replace(ChannelState::Closed);
        tracing::debug!("Realtime channel closed");
    }

    async fn stream_once(
        &self,
        client: &reqwest::Client,
        state: &watch::Sender<ChannelState>,
        parser: &mut SseParser,
        reconnecting: bool,
        reconcile: &mut Option<Interval>,
    ) -> StreamEnd {
        let url = format!(
            "{}?token={}",
            self.stream_url,
            urlencoding::encode(&self.auth_token)
        );
        let mut request = client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .bearer_auth(&self.auth_token);
        if let Some(last_event_id) = parser.last_event_id() {
            request = request.header("Last-Event-ID", last_event_id);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return StreamEnd::Failed(error.into()),
        };

        let status = response.status();
        if !status.is_success() {
            let error = TransportError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("stream refused").to_string(),
            };
            return if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                StreamEnd::Rejected(error)
            } else {
                StreamEnd::Failed(error)
            };
        }
        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let is_event_stream = content_type
                .to_str()
                .is_ok_and(|value| value.starts_with("text/event-stream"));
            if !is_event_stream {
                tracing::warn!("Realtime stream answered with content type {:?}", content_type);
            }
        }

        state.send_replace(ChannelState::Open);
        tracing::info!("Realtime channel connected");
        if reconnecting {
            self.reconcile("reconnected");
        }

        let mut body = std::pin::pin!(response.bytes_stream());
        loop {
            tokio::select! {
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for event in parser.feed(&bytes) {
                            self.dispatch(&event);
                        }
                    }
                    Some(Err(error)) => return StreamEnd::Failed(error.into()),
                    None => return StreamEnd::Eof,
                },
                () = next_tick(reconcile) => self.reconcile("periodic reconciliation"),
            }
        }
    }

    fn dispatch(&self, event: &SseEvent) {
        match RealtimeTopic::from_event_name(&event.event) {
            Some(topic) => {
                tracing::debug!("Realtime change on {}", topic);
                self.cache.invalidate_many(&topic.invalidation_keys());
            }
            None => tracing::debug!("Ignoring realtime event '{}'", event.event),
        }
    }

    fn reconcile(&self, reason: &str) {
        let marked = self.cache.invalidate_all();
        tracing::debug!("Marked {} cached queries stale ({})", marked, reason);
    }
}

fn next_tick(interval: &mut Option<Interval>) -> impl Future<Output = ()> + '_ {
    async move {
        match interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

/// Running realtime channel. Dropping it also stops the channel.
pub struct RealtimeHandle {
    state: watch::Receiver<ChannelState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RealtimeHandle {
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop listening (teardown or logout) and wait for the task to exit.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(error) = (&mut self.task).await {
            tracing::warn!("Realtime task ended abnormally: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_requires_session() {
        let config = SyncClientConfig::new("http://localhost:3000").unwrap();
        let result = RealtimeChannel::connect(&config, QueryCache::new());
        assert!(matches!(result, Err(Error::MissingSession)));
    }
}
