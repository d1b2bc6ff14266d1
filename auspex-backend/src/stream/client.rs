use std::sync::Arc;
use std::time::Duration;

use auspex_state::Platform;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::frame::{Frame, RecentEvents, SubscribeCommand, decode_frame};
use crate::omitter::ReloginOmitter;
use crate::retry::{Attempt, ExponentialBackoff, retry_until, sleep_or_cancel};

/// Where a stream client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream endpoint: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to connect: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("failed to send subscribe command: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("failed to encode subscribe command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("read failed: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("stream closed by remote{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub endpoint: String,
    pub service_id: String,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub dedup_window: usize,
}

/// Keeps one platform's event stream open and feeds decoded events to the
/// re-login omitter.
pub struct StreamClient {
    platform: Platform,
    settings: StreamSettings,
    omitter: Arc<ReloginOmitter>,
    state: watch::Sender<ConnectionState>,
}

impl StreamClient {
    pub fn new(platform: Platform, settings: StreamSettings, omitter: Arc<ReloginOmitter>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            platform,
            settings,
            omitter,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn url(&self) -> Result<Url, StreamError> {
        Ok(Url::parse_with_params(
            &self.settings.endpoint,
            &[
                ("environment", self.platform.environment()),
                ("service-id", self.settings.service_id.as_str()),
            ],
        )?)
    }

    /// Connect, subscribe and read until `token` fires, reconnecting with
    /// backoff after every failure.
    pub async fn run(&self, token: CancellationToken) -> Result<(), StreamError> {
        let url = self.url()?;
        let mut backoff = ExponentialBackoff::new(self.settings.backoff_base, self.settings.backoff_max);

        let this = self;
        let url = &url;
        let token = &token;
        let backoff = &mut backoff;
        let result = retry_until(
            move |attempt| this.session(url, attempt, token),
            move || !token.is_cancelled(),
            move |err: &StreamError, attempt: &Attempt| {
                let delay = backoff.next_delay(attempt.healthy_for());
                this.transition(ConnectionState::Reconnecting);
                warn!(
                    platform = %this.platform,
                    attempt = attempt.number,
                    error = %err,
                    retry_in = ?delay,
                    "event stream failed"
                );
                let token = token.clone();
                async move {
                    sleep_or_cancel(delay, &token).await;
                }
            },
        )
        .await;

        self.transition(ConnectionState::Disconnected);
        if let Err(stopped) = result {
            debug!(platform = %self.platform, attempts = stopped.attempts, "event stream retries stopped");
        }
        Ok(())
    }

    /// One connect-subscribe-read cycle. Only returns `Ok` when cancelled.
    async fn session(
        &self,
        url: &Url,
        attempt: Attempt,
        token: &CancellationToken,
    ) -> Result<(), StreamError> {
        self.transition(ConnectionState::Connecting);
        debug!(platform = %self.platform, attempt = attempt.number, "connecting to event stream");

        let connected = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = connect_async(url.as_str()) => result,
        };
        let (socket, _response) = connected.map_err(StreamError::Connect)?;
        let (mut write, mut read) = socket.split();

        let subscribe = SubscribeCommand::all().to_json()?;
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = write.send(Message::Text(subscribe.into())) => result.map_err(StreamError::Send)?,
        }
        self.transition(ConnectionState::Subscribed);
        info!(platform = %self.platform, "subscribed to event stream");

        let mut recent = RecentEvents::new(self.settings.dedup_window);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Err(err) = write.close().await {
                        debug!(platform = %self.platform, error = %err, "socket close failed");
                    }
                    return Ok(());
                }
                next = read.next() => match next {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), &mut recent).await,
                    Some(Ok(Message::Close(frame))) => {
                        return Err(StreamError::Closed(frame.map(|f| f.reason.as_str().to_owned())));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(StreamError::Read(err)),
                    None => return Err(StreamError::Closed(None)),
                },
            }
        }
    }

    async fn handle_text(&self, text: &str, recent: &mut RecentEvents) {
        match decode_frame(text) {
            Ok(Frame::Event { event, fingerprint }) => {
                if recent.insert(fingerprint) {
                    self.omitter.submit(event).await;
                } else {
                    trace!(kind = %event.kind(), "duplicate event dropped");
                }
            }
            Ok(Frame::SubscriptionAck(subscription)) => {
                debug!(platform = %self.platform, %subscription, "subscription acknowledged")
            }
            Ok(Frame::ServiceStateChanged { detail, online }) => {
                debug!(platform = %self.platform, %detail, online, "service state changed")
            }
            Ok(Frame::ConnectionStateChanged { connected }) => {
                debug!(platform = %self.platform, connected, "connection state changed")
            }
            Ok(Frame::Help | Frame::Heartbeat) => {}
            Err(err) => debug!(platform = %self.platform, error = %err, "dropping undecodable frame"),
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(platform = %self.platform, from = ?previous, to = ?next, "stream state");
        }
    }
}
