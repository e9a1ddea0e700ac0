mod api;
mod channel;
mod client;
mod error;
mod logger;
mod protocol;
mod state;
mod types;
mod validate;

pub use channel::{ChannelConfig, ConnectionState, PollConfig};
pub use client::{DEFAULT_BASE_URL, DEFAULT_CHANNEL_URL, QueClient, QueClientBuilder};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use types::*;
pub use validate::{
    MAX_ZONE_INDEX, ValidationError, validate_master_cool_setpoint,
    validate_master_heat_setpoint, validate_setpoint_step, validate_target_mode,
    validate_zone_cool_setpoint, validate_zone_enable, validate_zone_heat_setpoint,
    validate_zone_index, validate_zone_setpoint,
};
