use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::QueApi;
use crate::channel::{ChannelConfig, ConnectionState, PollConfig, run_channel, run_poll_fallback};
use crate::logger::{MessageLogMode, MessageLogger, SharedLogger};
use crate::protocol;
use crate::types::*;
use crate::validate;
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://que.actronair.com.au";
pub const DEFAULT_CHANNEL_URL: &str = "wss://que.actronair.com.au/api/v0/messaging/app";

pub struct QueClientBuilder {
    refresh_token: String,
    serial: String,
    base_url: String,
    channel_url: String,
    channel_config: ChannelConfig,
    poll_config: PollConfig,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl QueClientBuilder {
    pub fn new(refresh_token: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            serial: serial.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            channel_config: ChannelConfig::default(),
            poll_config: PollConfig::default(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn channel_url(mut self, url: impl Into<String>) -> Self {
        self.channel_url = url.into();
        self
    }

    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    pub fn poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<QueClient> {
        let logger: Option<SharedLogger> = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => {
                Some(Arc::new(Mutex::new(MessageLogger::new(mode, &path)?)))
            }
            _ => None,
        };
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        Ok(QueClient {
            api: Arc::new(QueApi::new(
                self.base_url,
                self.channel_url,
                self.serial,
                self.refresh_token,
            )),
            mirror: Arc::new(crate::state::StateMirror::new()),
            logger,
            channel_config: self.channel_config,
            poll_config: self.poll_config,
            state_tx: Some(state_tx),
            channel_state: state_rx,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }
}

/// Client for one Que-connected air conditioning unit. State arrives over
/// the push channel (with polling as fallback) into a local mirror; all
/// reads are served from that mirror, and commands are validated against
/// it before anything is sent.
pub struct QueClient {
    api: Arc<QueApi>,
    mirror: Arc<crate::state::StateMirror>,
    logger: Option<SharedLogger>,
    channel_config: ChannelConfig,
    poll_config: PollConfig,
    state_tx: Option<watch::Sender<ConnectionState>>,
    channel_state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl QueClient {
    pub fn builder(
        refresh_token: impl Into<String>,
        serial: impl Into<String>,
    ) -> QueClientBuilder {
        QueClientBuilder::new(refresh_token, serial)
    }

    /// Fetch and apply the initial snapshot. Fails hard: without a first
    /// snapshot there is nothing to validate commands against.
    pub async fn connect(&self) -> Result<()> {
        let raw = self.api.fetch_snapshot().await?;
        let (unit, zones) = protocol::parse_status(self.api.serial(), &raw)?;
        info!(zones = zones.len(), name = %unit.name, "initial snapshot applied");
        self.mirror.apply(unit, zones);
        if let Some(ref logger) = self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_snapshot("startup");
        }
        Ok(())
    }

    /// Spawn the push channel and poll fallback tasks. Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let Some(state_tx) = self.state_tx.take() else {
            return Err(Error::Channel("client already started".to_string()));
        };
        self.tasks.push(tokio::spawn(run_channel(
            self.api.clone(),
            self.mirror.clone(),
            self.channel_config.clone(),
            self.logger.clone(),
            state_tx,
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(run_poll_fallback(
            self.api.clone(),
            self.mirror.clone(),
            self.poll_config.clone(),
            self.logger.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // -- State access --

    pub fn is_ready(&self) -> bool {
        self.mirror.is_ready()
    }

    pub fn unit(&self) -> Result<UnitState> {
        self.mirror.unit()
    }

    pub fn zones(&self) -> Result<Vec<ZoneState>> {
        self.mirror.zones()
    }

    pub fn zone(&self, zone_index: u8) -> Result<Option<ZoneState>> {
        self.mirror.zone(zone_index)
    }

    /// Fires once per applied update (pushed, polled, or optimistic).
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.mirror.subscribe()
    }

    pub fn channel_state(&self) -> ConnectionState {
        *self.channel_state.borrow()
    }

    pub fn watch_channel_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel_state.clone()
    }

    // -- Command methods --

    pub async fn set_power(&self, on: bool) -> Result<()> {
        let _ = self.mirror.unit()?;
        debug!(on, "set power");
        self.send_logged("set_power", None, protocol::set_power_data(on))
            .await?;
        self.mirror.note_power(on);
        Ok(())
    }

    pub async fn set_mode(&self, mode: OperationMode) -> Result<()> {
        validate::validate_target_mode(mode)?;
        let _ = self.mirror.unit()?;
        debug!(mode = mode.as_que_str(), "set mode");
        self.send_logged("set_mode", None, protocol::set_mode_data(mode))
            .await?;
        self.mirror.note_mode(mode);
        Ok(())
    }

    pub async fn set_fan_mode(&self, fan: FanSetting) -> Result<()> {
        let _ = self.mirror.unit()?;
        debug!(fan = %fan.encode(), "set fan mode");
        self.send_logged("set_fan_mode", None, protocol::set_fan_mode_data(&fan))
            .await?;
        self.mirror.note_fan_mode(fan);
        Ok(())
    }

    pub async fn set_quiet_mode(&self, on: bool) -> Result<()> {
        let _ = self.mirror.unit()?;
        debug!(on, "set quiet mode");
        self.send_logged("set_quiet_mode", None, protocol::set_quiet_mode_data(on))
            .await?;
        self.mirror.note_quiet_mode(on);
        Ok(())
    }

    pub async fn set_cool_setpoint(&self, value: f64) -> Result<()> {
        let unit = self.mirror.unit()?;
        validate::validate_master_cool_setpoint(&unit, value)?;
        debug!(value, "set cool setpoint");
        self.send_logged(
            "set_cool_setpoint",
            None,
            protocol::set_cool_setpoint_data(value),
        )
        .await?;
        self.mirror.note_cool_setpoint(value);
        Ok(())
    }

    pub async fn set_heat_setpoint(&self, value: f64) -> Result<()> {
        let unit = self.mirror.unit()?;
        validate::validate_master_heat_setpoint(&unit, value)?;
        debug!(value, "set heat setpoint");
        self.send_logged(
            "set_heat_setpoint",
            None,
            protocol::set_heat_setpoint_data(value),
        )
        .await?;
        self.mirror.note_heat_setpoint(value);
        Ok(())
    }

    /// Set a zone's target for whichever mode the unit is running: the
    /// cool setpoint under COOL, the heat setpoint under HEAT.
    pub async fn set_zone_target(&self, zone_index: u8, value: f64) -> Result<()> {
        let unit = self.mirror.unit()?;
        validate::validate_zone_setpoint(&unit, zone_index, value)?;
        let data = match unit.operation_mode {
            OperationMode::Cool => protocol::set_zone_cool_setpoint_data(zone_index, value),
            OperationMode::Heat => protocol::set_zone_heat_setpoint_data(zone_index, value),
            master => {
                return Err(validate::ValidationError::UnsupportedMode { master }.into());
            }
        };
        debug!(zone_index, value, "set zone target");
        self.send_logged("set_zone_target", Some(zone_index), data)
            .await?;
        self.mirror.note_zone_target(zone_index, value);
        Ok(())
    }

    pub async fn set_zone_cool_setpoint(&self, zone_index: u8, value: f64) -> Result<()> {
        let unit = self.mirror.unit()?;
        validate::validate_zone_cool_setpoint(&unit, zone_index, value)?;
        debug!(zone_index, value, "set zone cool setpoint");
        self.send_logged(
            "set_zone_cool_setpoint",
            Some(zone_index),
            protocol::set_zone_cool_setpoint_data(zone_index, value),
        )
        .await?;
        if unit.operation_mode == OperationMode::Cool {
            self.mirror.note_zone_target(zone_index, value);
        }
        Ok(())
    }

    pub async fn set_zone_heat_setpoint(&self, zone_index: u8, value: f64) -> Result<()> {
        let unit = self.mirror.unit()?;
        validate::validate_zone_heat_setpoint(&unit, zone_index, value)?;
        debug!(zone_index, value, "set zone heat setpoint");
        self.send_logged(
            "set_zone_heat_setpoint",
            Some(zone_index),
            protocol::set_zone_heat_setpoint_data(zone_index, value),
        )
        .await?;
        Ok(())
    }

    /// Enable a zone for the given mode. The mode must match what the
    /// unit is already running.
    pub async fn enable_zone(&self, zone_index: u8, mode: OperationMode) -> Result<()> {
        let unit = self.mirror.unit()?;
        validate::validate_zone_enable(&unit, zone_index, mode)?;
        debug!(zone_index, mode = mode.as_que_str(), "enable zone");
        self.send_logged(
            "enable_zone",
            Some(zone_index),
            protocol::set_zone_enabled_data(zone_index, true),
        )
        .await?;
        self.mirror.note_zone_enabled(zone_index, true);
        Ok(())
    }

    pub async fn disable_zone(&self, zone_index: u8) -> Result<()> {
        validate::validate_zone_index(zone_index)?;
        let _ = self.mirror.unit()?;
        debug!(zone_index, "disable zone");
        self.send_logged(
            "disable_zone",
            Some(zone_index),
            protocol::set_zone_enabled_data(zone_index, false),
        )
        .await?;
        self.mirror.note_zone_enabled(zone_index, false);
        Ok(())
    }

    /// Replace the enablement of all eight zone slots in one command.
    pub async fn set_zones_enabled(&self, enabled: [bool; 8]) -> Result<()> {
        let _ = self.mirror.unit()?;
        debug!(?enabled, "set zones enabled");
        self.send_logged(
            "set_zones_enabled",
            None,
            protocol::set_zones_enabled_data(&enabled),
        )
        .await?;
        for (index, on) in enabled.iter().enumerate() {
            self.mirror.note_zone_enabled(index as u8, *on);
        }
        Ok(())
    }

    async fn send_logged(&self, action: &str, zone: Option<u8>, data: Value) -> Result<()> {
        if let Some(ref logger) = self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_command(action, zone, &data);
        }
        self.api.send_command(data).await
    }
}

impl Drop for QueClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}
