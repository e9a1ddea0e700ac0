//! Pre-flight checks for mutating commands. Every rule here is evaluated
//! against the cached unit state before anything is sent to the cloud API,
//! so an invalid request never leaves the process.

use std::fmt;

use crate::types::{OperationMode, UnitState};

pub const MAX_ZONE_INDEX: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    InvalidGranularity { value: f64 },
    OutOfGlobalRange { value: f64, min: f64, max: f64 },
    OutOfZoneRange { value: f64, min: f64, max: f64 },
    InvalidZoneIndex { index: u8 },
    IncompatibleMode { requested: OperationMode, master: OperationMode },
    UnsupportedMode { master: OperationMode },
    UnsupportedTargetMode,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidGranularity { value } => {
                write!(f, "setpoint {value} is not a half-degree increment")
            }
            ValidationError::OutOfGlobalRange { value, min, max } => {
                write!(f, "setpoint {value} outside unit limits {min}..{max}")
            }
            ValidationError::OutOfZoneRange { value, min, max } => {
                write!(f, "zone setpoint {value} outside allowed window {min}..{max}")
            }
            ValidationError::InvalidZoneIndex { index } => {
                write!(f, "zone index {index} out of range 0..={MAX_ZONE_INDEX}")
            }
            ValidationError::IncompatibleMode { requested, master } => write!(
                f,
                "zone requested {} while unit is in {}",
                requested.as_que_str(),
                master.as_que_str()
            ),
            ValidationError::UnsupportedMode { master } => write!(
                f,
                "no zone setpoint applies while unit is in {}",
                master.as_que_str()
            ),
            ValidationError::UnsupportedTargetMode => {
                write!(f, "requested mode is not supported as a target")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_setpoint_step(value: f64) -> Result<(), ValidationError> {
    if (value * 2.0).fract() == 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidGranularity { value })
    }
}

pub fn validate_zone_index(index: u8) -> Result<(), ValidationError> {
    if index <= MAX_ZONE_INDEX {
        Ok(())
    } else {
        Err(ValidationError::InvalidZoneIndex { index })
    }
}

/// `AUTO` cannot be commanded, only reported by the unit.
pub fn validate_target_mode(mode: OperationMode) -> Result<(), ValidationError> {
    if mode == OperationMode::Auto {
        Err(ValidationError::UnsupportedTargetMode)
    } else {
        Ok(())
    }
}

pub fn validate_master_cool_setpoint(
    unit: &UnitState,
    value: f64,
) -> Result<(), ValidationError> {
    validate_setpoint_step(value)?;
    global_range(value, unit.limits.min_cool, unit.limits.max_cool)
}

pub fn validate_master_heat_setpoint(
    unit: &UnitState,
    value: f64,
) -> Result<(), ValidationError> {
    validate_setpoint_step(value)?;
    global_range(value, unit.limits.min_heat, unit.limits.max_heat)
}

pub fn validate_zone_cool_setpoint(
    unit: &UnitState,
    index: u8,
    value: f64,
) -> Result<(), ValidationError> {
    validate_zone_index(index)?;
    validate_setpoint_step(value)?;
    global_range(value, unit.limits.min_cool, unit.limits.max_cool)?;
    zone_window(
        value,
        unit.cool_setpoint,
        unit.limits.cool_below_master(),
        unit.limits.cool_above_master(),
    )
}

pub fn validate_zone_heat_setpoint(
    unit: &UnitState,
    index: u8,
    value: f64,
) -> Result<(), ValidationError> {
    validate_zone_index(index)?;
    validate_setpoint_step(value)?;
    global_range(value, unit.limits.min_heat, unit.limits.max_heat)?;
    zone_window(
        value,
        unit.heat_setpoint,
        unit.limits.heat_below_master(),
        unit.limits.heat_above_master(),
    )
}

/// Dispatch on the unit's current mode: a zone target means the cool
/// setpoint under COOL and the heat setpoint under HEAT. There is no
/// sensible target while the unit runs AUTO or FAN.
pub fn validate_zone_setpoint(
    unit: &UnitState,
    index: u8,
    value: f64,
) -> Result<(), ValidationError> {
    match unit.operation_mode {
        OperationMode::Cool => validate_zone_cool_setpoint(unit, index, value),
        OperationMode::Heat => validate_zone_heat_setpoint(unit, index, value),
        master => Err(ValidationError::UnsupportedMode { master }),
    }
}

/// A zone may only be enabled for the mode the unit is already running.
pub fn validate_zone_enable(
    unit: &UnitState,
    index: u8,
    requested: OperationMode,
) -> Result<(), ValidationError> {
    validate_zone_index(index)?;
    match (requested, unit.operation_mode) {
        (OperationMode::Auto | OperationMode::Fan, _) => {
            Err(ValidationError::UnsupportedTargetMode)
        }
        (OperationMode::Heat, OperationMode::Cool)
        | (OperationMode::Cool, OperationMode::Heat) => Err(ValidationError::IncompatibleMode {
            requested,
            master: unit.operation_mode,
        }),
        _ => Ok(()),
    }
}

fn global_range(value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value < min || value > max {
        Err(ValidationError::OutOfGlobalRange { value, min, max })
    } else {
        Ok(())
    }
}

fn zone_window(
    value: f64,
    master: f64,
    below: f64,
    above: f64,
) -> Result<(), ValidationError> {
    let min = master - below;
    let max = master + above;
    if value < min || value > max {
        Err(ValidationError::OutOfZoneRange { value, min, max })
    } else {
        Ok(())
    }
}
