#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Auto,
    Cool,
    Fan,
    Heat,
}

impl OperationMode {
    pub fn as_que_str(&self) -> &'static str {
        match self {
            OperationMode::Auto => "AUTO",
            OperationMode::Cool => "COOL",
            OperationMode::Fan => "FAN",
            OperationMode::Heat => "HEAT",
        }
    }

    pub fn from_que_str(s: &str) -> Option<Self> {
        match s {
            "AUTO" => Some(OperationMode::Auto),
            "COOL" => Some(OperationMode::Cool),
            "FAN" => Some(OperationMode::Fan),
            "HEAT" => Some(OperationMode::Heat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressorMode {
    #[default]
    Idle,
    Cooling,
    Heating,
}

impl CompressorMode {
    pub fn from_que_str(s: &str) -> Self {
        match s {
            "COOL" => CompressorMode::Cooling,
            "HEAT" => CompressorMode::Heating,
            _ => CompressorMode::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanSpeed {
    Low,
    Medium,
    High,
    #[default]
    Auto,
}

impl FanSpeed {
    pub fn as_que_str(&self) -> &'static str {
        match self {
            FanSpeed::Low => "LOW",
            FanSpeed::Medium => "MED",
            FanSpeed::High => "HIGH",
            FanSpeed::Auto => "AUTO",
        }
    }
}

/// Fan configuration: a speed plus an optional continuous-circulation flag,
/// carried on the wire as a single token with a `+CONT` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanSetting {
    pub speed: FanSpeed,
    pub continuous: bool,
}

impl FanSetting {
    pub fn new(speed: FanSpeed, continuous: bool) -> Self {
        Self { speed, continuous }
    }

    pub fn encode(&self) -> String {
        let speed = self.speed.as_que_str();
        if self.continuous {
            format!("{speed}+CONT")
        } else {
            speed.to_string()
        }
    }

    /// Some firmware revisions report `MEDIUM` where commands expect `MED`.
    pub fn decode(s: &str) -> Option<Self> {
        let (speed, continuous) = match s.strip_suffix("+CONT") {
            Some(base) => (base, true),
            None => (s, false),
        };
        let speed = match speed {
            "LOW" => FanSpeed::Low,
            "MED" | "MEDIUM" => FanSpeed::Medium,
            "HIGH" => FanSpeed::High,
            "AUTO" => FanSpeed::Auto,
            _ => return None,
        };
        Some(Self { speed, continuous })
    }
}

/// Setpoint bounds reported by the unit. Zone variance fields are absent on
/// some firmware; accessors fall back to the documented 2.0 degree default.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Limits {
    pub min_cool: f64,
    pub max_cool: f64,
    pub min_heat: f64,
    pub max_heat: f64,
    pub zone_above_master_cool: Option<f64>,
    pub zone_below_master_cool: Option<f64>,
    pub zone_above_master_heat: Option<f64>,
    pub zone_below_master_heat: Option<f64>,
}

pub const DEFAULT_ZONE_VARIANCE: f64 = 2.0;

impl Limits {
    pub fn cool_above_master(&self) -> f64 {
        self.zone_above_master_cool.unwrap_or(DEFAULT_ZONE_VARIANCE)
    }

    pub fn cool_below_master(&self) -> f64 {
        self.zone_below_master_cool.unwrap_or(DEFAULT_ZONE_VARIANCE)
    }

    pub fn heat_above_master(&self) -> f64 {
        self.zone_above_master_heat.unwrap_or(DEFAULT_ZONE_VARIANCE)
    }

    pub fn heat_below_master(&self) -> f64 {
        self.zone_below_master_heat.unwrap_or(DEFAULT_ZONE_VARIANCE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitState {
    pub on: bool,
    pub operation_mode: OperationMode,
    pub fan_mode: FanSetting,
    pub quiet_mode: bool,
    pub cool_setpoint: f64,
    pub heat_setpoint: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub compressor_mode: CompressorMode,
    pub compressor_speed: f64,
    pub limits: Limits,
    pub name: String,
    pub model: String,
    pub serial_number: String,
    pub master_sensor_id: String,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneState {
    pub zone_index: u8,
    pub name: String,
    pub sensor_id: String,
    pub on: bool,
    pub current_temperature: f64,
    pub target_temperature: f64,
    pub humidity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_setting_encodes_cont_suffix() {
        assert_eq!(FanSetting::new(FanSpeed::Low, false).encode(), "LOW");
        assert_eq!(FanSetting::new(FanSpeed::High, true).encode(), "HIGH+CONT");
        assert_eq!(FanSetting::new(FanSpeed::Medium, true).encode(), "MED+CONT");
    }

    #[test]
    fn fan_setting_decodes_wire_tokens() {
        assert_eq!(
            FanSetting::decode("AUTO+CONT"),
            Some(FanSetting::new(FanSpeed::Auto, true))
        );
        assert_eq!(
            FanSetting::decode("LOW"),
            Some(FanSetting::new(FanSpeed::Low, false))
        );
        assert_eq!(FanSetting::decode("TURBO"), None);
    }

    #[test]
    fn fan_setting_decodes_medium_alias() {
        assert_eq!(
            FanSetting::decode("MEDIUM"),
            Some(FanSetting::new(FanSpeed::Medium, false))
        );
        assert_eq!(
            FanSetting::decode("MEDIUM+CONT"),
            Some(FanSetting::new(FanSpeed::Medium, true))
        );
        // Re-encode uses the command token, not the reported alias.
        assert_eq!(FanSetting::decode("MEDIUM").unwrap().encode(), "MED");
    }

    #[test]
    fn zone_variance_defaults_when_unreported() {
        let limits = Limits {
            min_cool: 16.0,
            max_cool: 32.0,
            zone_above_master_cool: Some(1.5),
            ..Default::default()
        };
        assert_eq!(limits.cool_above_master(), 1.5);
        assert_eq!(limits.cool_below_master(), DEFAULT_ZONE_VARIANCE);
        assert_eq!(limits.heat_above_master(), DEFAULT_ZONE_VARIANCE);
    }
}
