use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::api::QueApi;
use crate::error::{Error, Result};
use crate::logger::SharedLogger;
use crate::protocol::{extract_status_update, parse_status, subscribe_message};
use crate::state::StateMirror;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
    /// Terminal: the retry budget is exhausted and the channel will not be
    /// reopened. The poll fallback keeps state flowing.
    GivenUp,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Reconnect if no frame of any kind arrives within this window.
    pub watchdog_window: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive open failures tolerated before giving up for good.
    pub max_consecutive_errors: u32,
    /// How often the subscription is refreshed on a healthy channel.
    pub resubscribe_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            watchdog_window: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(30),
            max_consecutive_errors: 10,
            resubscribe_interval: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Staleness check cadence.
    pub interval: Duration,
    /// Age at which the cached state is considered stale.
    pub stale_after: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            stale_after: Duration::from_secs(60),
        }
    }
}

// -- Transition machine --
//
// All lifecycle decisions live here, detached from any I/O, so the retry
// and watchdog rules can be exercised directly. Timers are owned by the
// driver and scoped to the state they belong to; an event from a state the
// machine has already left falls through without effect.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelEvent {
    Start,
    OpenSucceeded,
    OpenFailed,
    MessageReceived,
    WatchdogFired,
    ChannelClosed,
    RetryDelayElapsed,
    ResubscribeDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelAction {
    OpenChannel,
    SendSubscribe,
    ArmWatchdog,
    CloseChannel,
    ScheduleRetry,
    GiveUp,
}

pub(crate) struct ChannelMachine {
    state: ConnectionState,
    consecutive_errors: u32,
    max_consecutive_errors: u32,
}

impl ChannelMachine {
    pub fn new(max_consecutive_errors: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            consecutive_errors: 0,
            max_consecutive_errors,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn on_event(&mut self, event: ChannelEvent) -> Vec<ChannelAction> {
        use ChannelAction::*;
        use ChannelEvent::*;
        use ConnectionState::*;

        match (self.state, event) {
            (Disconnected, Start) => {
                self.state = Connecting;
                vec![OpenChannel]
            }
            (Connecting, OpenSucceeded) => {
                self.state = Subscribed;
                self.consecutive_errors = 0;
                vec![SendSubscribe, ArmWatchdog]
            }
            (Connecting, OpenFailed) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors > self.max_consecutive_errors {
                    self.state = GivenUp;
                    vec![GiveUp]
                } else {
                    self.state = Reconnecting;
                    vec![ScheduleRetry]
                }
            }
            (Subscribed, MessageReceived) => vec![ArmWatchdog],
            (Subscribed, ResubscribeDue) => vec![SendSubscribe],
            (Subscribed, WatchdogFired) => {
                self.state = Reconnecting;
                vec![CloseChannel, ScheduleRetry]
            }
            (Subscribed, ChannelClosed) => {
                self.state = Reconnecting;
                vec![ScheduleRetry]
            }
            (Reconnecting, RetryDelayElapsed) => {
                self.state = Connecting;
                vec![OpenChannel]
            }
            // Stale timer or late channel event, no longer relevant.
            _ => vec![],
        }
    }
}

// -- Driver --

/// Runs the push channel until cancellation or the retry budget runs out.
/// Publishes every state transition on `state_tx`.
pub(crate) async fn run_channel(
    api: Arc<QueApi>,
    mirror: Arc<StateMirror>,
    config: ChannelConfig,
    logger: Option<SharedLogger>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut machine = ChannelMachine::new(config.max_consecutive_errors);
    machine.on_event(ChannelEvent::Start);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let _ = state_tx.send(machine.state());

        match machine.state() {
            ConnectionState::Connecting => match open_channel(&api).await {
                Ok(mut ws) => {
                    machine.on_event(ChannelEvent::OpenSucceeded);
                    let _ = state_tx.send(machine.state());
                    info!("push channel connected");
                    log_channel(&logger, "connected", "");

                    let subscribe = subscribe_message(api.serial()).to_string();
                    if let Err(e) = ws.send(Message::text(subscribe)).await {
                        warn!(error = %e, "failed to send subscribe command");
                        machine.on_event(ChannelEvent::ChannelClosed);
                        continue;
                    }

                    let event = run_subscribed(&mut ws, &api, &mirror, &config, &logger, &cancel).await;
                    let _ = ws.close(None).await;
                    log_channel(&logger, "closed", &format!("{event:?}"));
                    machine.on_event(event);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        failures = machine.consecutive_errors() + 1,
                        "push channel open failed"
                    );
                    machine.on_event(ChannelEvent::OpenFailed);
                }
            },
            ConnectionState::Reconnecting => {
                debug!(
                    delay_secs = config.reconnect_delay.as_secs(),
                    "waiting before reconnect"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(config.reconnect_delay) => {
                        machine.on_event(ChannelEvent::RetryDelayElapsed);
                    }
                }
            }
            ConnectionState::GivenUp => {
                error!(
                    failures = machine.consecutive_errors(),
                    "push channel retry budget exhausted, relying on polling"
                );
                log_channel(
                    &logger,
                    "given_up",
                    &format!("{} consecutive failures", machine.consecutive_errors()),
                );
                break;
            }
            state => {
                debug!(?state, "push channel driver stopping in unexpected state");
                break;
            }
        }
    }
}

/// Pump frames on an open channel. Returns the lifecycle event that ends
/// the subscribed phase. All timers armed here die with this scope.
async fn run_subscribed(
    ws: &mut WsStream,
    api: &QueApi,
    mirror: &StateMirror,
    config: &ChannelConfig,
    logger: &Option<SharedLogger>,
    cancel: &CancellationToken,
) -> ChannelEvent {
    let mut watchdog = Instant::now() + config.watchdog_window;
    let mut resubscribe = time::interval_at(
        Instant::now() + config.resubscribe_interval,
        config.resubscribe_interval,
    );
    resubscribe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ChannelEvent::ChannelClosed,
            _ = time::sleep_until(watchdog) => {
                warn!(
                    window_secs = config.watchdog_window.as_secs(),
                    "no channel traffic within watchdog window"
                );
                return ChannelEvent::WatchdogFired;
            }
            _ = resubscribe.tick() => {
                debug!("refreshing channel subscription");
                let msg = subscribe_message(api.serial()).to_string();
                if let Err(e) = ws.send(Message::text(msg)).await {
                    // Not a reconnect trigger on its own; a dead channel
                    // shows up as watchdog expiry soon enough.
                    warn!(error = %e, "subscription refresh failed, skipping");
                }
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    watchdog = Instant::now() + config.watchdog_window;
                    handle_frame(text.as_str(), api.serial(), mirror, logger);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {
                    watchdog = Instant::now() + config.watchdog_window;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "channel closed by remote");
                    return ChannelEvent::ChannelClosed;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "channel read error");
                    return ChannelEvent::ChannelClosed;
                }
                None => {
                    info!("channel stream ended");
                    return ChannelEvent::ChannelClosed;
                }
            }
        }
    }
}

fn handle_frame(text: &str, serial: &str, mirror: &StateMirror, logger: &Option<SharedLogger>) {
    if text == "{}" {
        trace!("channel heartbeat");
        return;
    }
    let Some(status) = extract_status_update(text) else {
        trace!("channel frame without status update");
        return;
    };
    match parse_status(serial, &status) {
        Ok((unit, zones)) => {
            mirror.apply(unit, zones);
            debug!("applied pushed status update");
            if let Some(logger) = logger
                && let Ok(mut logger) = logger.lock()
            {
                logger.log_snapshot("push");
            }
        }
        // Keep the previous good state; the next frame or poll wins.
        Err(e) => warn!(error = %e, "dropping malformed status update"),
    }
}

async fn open_channel(api: &QueApi) -> Result<WsStream> {
    let token = api.get_token().await?;
    let (connection_token, protocol_version) = api.negotiate().await?;
    let url = format!(
        "{}?transport=webSockets&connectionToken={}&clientProtocol={}",
        api.channel_url(),
        connection_token,
        protocol_version,
    );
    debug!("opening push channel");

    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Channel(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| Error::Channel(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::Channel(e.to_string()))?;
    Ok(ws)
}

fn log_channel(logger: &Option<SharedLogger>, event: &str, detail: &str) {
    if let Some(logger) = logger
        && let Ok(mut logger) = logger.lock()
    {
        logger.log_channel(event, detail);
    }
}

// -- Poll fallback --

/// Periodically checks snapshot age and pulls a fresh one over REST when
/// the push channel has gone quiet. Harmless while pushes flow: the state
/// never looks stale, so no request is made.
pub(crate) async fn run_poll_fallback(
    api: Arc<QueApi>,
    mirror: Arc<StateMirror>,
    config: PollConfig,
    logger: Option<SharedLogger>,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let stale = mirror
            .elapsed_since_update()
            .is_none_or(|age| age >= config.stale_after);
        if !stale {
            continue;
        }

        info!("cached state is stale, pulling snapshot");
        match api.fetch_snapshot().await {
            Ok(raw) => match parse_status(api.serial(), &raw) {
                Ok((unit, zones)) => {
                    mirror.apply(unit, zones);
                    if let Some(ref logger) = logger
                        && let Ok(mut logger) = logger.lock()
                    {
                        logger.log_snapshot("poll");
                    }
                }
                Err(e) => warn!(error = %e, "poll returned malformed snapshot, keeping previous state"),
            },
            Err(e) => warn!(error = %e, "fallback snapshot fetch failed"),
        }
    }
}
