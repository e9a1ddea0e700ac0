use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::types::{
    CompressorMode, FanSetting, Limits, OperationMode, UnitState, ZoneState,
};

pub fn subscribe_message(serial: &str) -> Value {
    json!({
        "command": {
            "mwcSerial": serial,
            "type": "subscribe"
        }
    })
}

pub fn command_envelope(data: Value) -> Value {
    json!({ "command": data })
}

// -- Command payload builders --

pub fn set_power_data(on: bool) -> Value {
    json!({
        "UserAirconSettings.isOn": on,
        "type": "set-settings"
    })
}

pub fn set_mode_data(mode: OperationMode) -> Value {
    json!({
        "UserAirconSettings.isOn": true,
        "UserAirconSettings.Mode": mode.as_que_str(),
        "type": "set-settings"
    })
}

pub fn set_fan_mode_data(fan: &FanSetting) -> Value {
    json!({
        "UserAirconSettings.FanMode": fan.encode(),
        "type": "set-settings"
    })
}

pub fn set_quiet_mode_data(on: bool) -> Value {
    json!({
        "UserAirconSettings.QuietMode": on,
        "type": "set-settings"
    })
}

pub fn set_cool_setpoint_data(value: f64) -> Value {
    json!({
        "UserAirconSettings.TemperatureSetpoint_Cool_oC": value,
        "type": "set-settings"
    })
}

pub fn set_heat_setpoint_data(value: f64) -> Value {
    json!({
        "UserAirconSettings.TemperatureSetpoint_Heat_oC": value,
        "type": "set-settings"
    })
}

pub fn set_zone_cool_setpoint_data(zone_index: u8, value: f64) -> Value {
    json!({
        (format!("RemoteZoneInfo[{zone_index}].TemperatureSetpoint_Cool_oC")): value,
        "type": "set-settings"
    })
}

pub fn set_zone_heat_setpoint_data(zone_index: u8, value: f64) -> Value {
    json!({
        (format!("RemoteZoneInfo[{zone_index}].TemperatureSetpoint_Heat_oC")): value,
        "type": "set-settings"
    })
}

pub fn set_zone_enabled_data(zone_index: u8, on: bool) -> Value {
    json!({
        (format!("UserAirconSettings.EnabledZones[{zone_index}]")): on,
        "type": "set-settings"
    })
}

pub fn set_zones_enabled_data(enabled: &[bool; 8]) -> Value {
    json!({
        "UserAirconSettings.EnabledZones": enabled,
        "type": "set-settings"
    })
}

// -- Status parsing --

/// Pull the status object out of a raw push frame, if it carries one.
/// Heartbeats and protocol chatter come through the same channel and
/// simply lack the update path.
pub fn extract_status_update(frame: &str) -> Option<Value> {
    let parsed: Value = serde_json::from_str(frame).ok()?;
    parsed.pointer("/M/0/update/status").cloned()
}

/// Build the in-memory model from a full status document. The same shape
/// arrives from the REST snapshot endpoint and inside push frames.
pub fn parse_status(serial: &str, raw: &Value) -> Result<(UnitState, Vec<ZoneState>)> {
    let settings = raw
        .get("UserAirconSettings")
        .filter(|v| v.is_object())
        .ok_or_else(|| malformed("UserAirconSettings"))?;
    let zone_info = raw
        .get("RemoteZoneInfo")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("RemoteZoneInfo"))?;
    let master = raw
        .get("MasterInfo")
        .filter(|v| v.is_object())
        .ok_or_else(|| malformed("MasterInfo"))?;
    let setpoint_limits = raw
        .pointer("/NV_Limits/UserSetpoint_oC")
        .filter(|v| v.is_object())
        .ok_or_else(|| malformed("NV_Limits.UserSetpoint_oC"))?;

    // Zone enablement is positional over the full zone array, so the
    // index must be captured before non-operable slots are dropped.
    let enabled_zones: Vec<bool> = settings
        .get("EnabledZones")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|v| v.as_bool().unwrap_or(false))
                .collect()
        })
        .unwrap_or_default();

    let mut zones = Vec::new();
    for (index, zone) in zone_info.iter().enumerate() {
        if !zone
            .get("CanOperate")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            continue;
        }
        let sensor_id = zone
            .get("Sensors")
            .and_then(Value::as_object)
            .map(|sensors| sensors.keys().cloned().collect::<Vec<_>>().join("-"))
            .unwrap_or_default();
        zones.push(ZoneState {
            zone_index: index as u8,
            name: str_at(zone, "NV_Title"),
            sensor_id,
            on: enabled_zones.get(index).copied().unwrap_or(false),
            current_temperature: num_at(zone, "LiveTemp_oC"),
            target_temperature: num_at(zone, "TemperatureSetpoint_Cool_oC"),
            humidity: num_at(zone, "LiveHumidity_pc"),
        });
    }

    let limits = Limits {
        min_cool: num_at(setpoint_limits, "setCool_Min"),
        max_cool: num_at(setpoint_limits, "setCool_Max"),
        min_heat: num_at(setpoint_limits, "setHeat_Min"),
        max_heat: num_at(setpoint_limits, "setHeat_Max"),
        zone_above_master_cool: abs_at(setpoint_limits, "VarianceAboveMasterCool"),
        zone_below_master_cool: abs_at(setpoint_limits, "VarianceBelowMasterCool"),
        zone_above_master_heat: abs_at(setpoint_limits, "VarianceAboveMasterHeat"),
        zone_below_master_heat: abs_at(setpoint_limits, "VarianceBelowMasterHeat"),
    };
    if limits.min_cool > limits.max_cool || limits.min_heat > limits.max_heat {
        return Err(Error::MalformedSnapshot(
            "inverted setpoint limits".to_string(),
        ));
    }

    let unit = UnitState {
        on: settings.get("isOn").and_then(Value::as_bool).unwrap_or(false),
        // Unrecognized modes (including "OFF") parse as AUTO, which every
        // zone-level command path rejects anyway.
        operation_mode: settings
            .get("Mode")
            .and_then(Value::as_str)
            .and_then(OperationMode::from_que_str)
            .unwrap_or(OperationMode::Auto),
        fan_mode: settings
            .get("FanMode")
            .and_then(Value::as_str)
            .and_then(FanSetting::decode)
            .unwrap_or_default(),
        quiet_mode: settings
            .get("QuietMode")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        cool_setpoint: num_at(settings, "TemperatureSetpoint_Cool_oC"),
        heat_setpoint: num_at(settings, "TemperatureSetpoint_Heat_oC"),
        temperature: num_at(master, "LiveTemp_oC"),
        humidity: num_at(master, "LiveHumidity_pc"),
        compressor_mode: raw
            .pointer("/LiveAircon/CompressorMode")
            .and_then(Value::as_str)
            .map(CompressorMode::from_que_str)
            .unwrap_or_default(),
        compressor_speed: raw
            .pointer("/LiveAircon/CompressorCapacity")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        limits,
        name: raw
            .pointer("/NV_SystemSettings/SystemName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        model: raw
            .pointer("/AirconSystem/IndoorUnit/NV_DeviceID")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        serial_number: serial.to_string(),
        master_sensor_id: raw
            .pointer("/AirconSystem/MasterSerial")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        is_online: raw
            .get("isOnline")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    };

    Ok((unit, zones))
}

fn malformed(section: &str) -> Error {
    Error::MalformedSnapshot(format!("missing section: {section}"))
}

fn num_at(v: &Value, key: &str) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn str_at(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn abs_at(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(Value::as_f64).map(f64::abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FanSpeed;

    fn sample_status() -> Value {
        json!({
            "isOnline": true,
            "NV_SystemSettings": { "SystemName": "Upstairs" },
            "AirconSystem": {
                "MasterSerial": "22H01234",
                "IndoorUnit": { "NV_DeviceID": "NEO-12" }
            },
            "LiveAircon": {
                "CompressorMode": "COOL",
                "CompressorCapacity": 47.0
            },
            "MasterInfo": {
                "LiveTemp_oC": 24.3,
                "LiveHumidity_pc": 52.0
            },
            "UserAirconSettings": {
                "isOn": true,
                "Mode": "COOL",
                "FanMode": "MEDIUM+CONT",
                "QuietMode": false,
                "TemperatureSetpoint_Cool_oC": 22.0,
                "TemperatureSetpoint_Heat_oC": 20.0,
                "EnabledZones": [true, false, true, false, false, false, false, false]
            },
            "RemoteZoneInfo": [
                {
                    "CanOperate": true,
                    "NV_Title": "Living",
                    "LiveTemp_oC": 23.1,
                    "LiveHumidity_pc": 48.0,
                    "TemperatureSetpoint_Cool_oC": 22.0,
                    "TemperatureSetpoint_Heat_oC": 20.0,
                    "Sensors": { "SENS01": {}, "SENS02": {} }
                },
                {
                    "CanOperate": false,
                    "NV_Title": "Unused"
                },
                {
                    "CanOperate": true,
                    "NV_Title": "Bedroom",
                    "LiveTemp_oC": 22.4,
                    "LiveHumidity_pc": 50.0,
                    "TemperatureSetpoint_Cool_oC": 21.5,
                    "TemperatureSetpoint_Heat_oC": 19.0,
                    "Sensors": { "SENS03": {} }
                }
            ],
            "NV_Limits": {
                "UserSetpoint_oC": {
                    "setCool_Min": 16.0,
                    "setCool_Max": 32.0,
                    "setHeat_Min": 10.0,
                    "setHeat_Max": 26.0,
                    "VarianceAboveMasterCool": -2.0,
                    "VarianceBelowMasterCool": 2.0,
                    "VarianceAboveMasterHeat": 2.0,
                    "VarianceBelowMasterHeat": 2.0
                }
            }
        })
    }

    #[test]
    fn parses_unit_fields() {
        let (unit, _) = parse_status("22H01234", &sample_status()).unwrap();
        assert!(unit.on);
        assert_eq!(unit.operation_mode, OperationMode::Cool);
        assert_eq!(unit.fan_mode.speed, FanSpeed::Medium);
        assert!(unit.fan_mode.continuous);
        assert_eq!(unit.cool_setpoint, 22.0);
        assert_eq!(unit.temperature, 24.3);
        assert_eq!(unit.compressor_mode, CompressorMode::Cooling);
        assert_eq!(unit.compressor_speed, 47.0);
        assert_eq!(unit.name, "Upstairs");
        assert_eq!(unit.model, "NEO-12");
        assert_eq!(unit.serial_number, "22H01234");
        assert_eq!(unit.master_sensor_id, "22H01234");
        assert!(unit.is_online);
    }

    #[test]
    fn variance_limits_are_absolute_values() {
        let (unit, _) = parse_status("s", &sample_status()).unwrap();
        assert_eq!(unit.limits.zone_above_master_cool, Some(2.0));
        assert_eq!(unit.limits.cool_above_master(), 2.0);
    }

    #[test]
    fn filters_non_operable_zones_keeping_positions() {
        let (_, zones) = parse_status("s", &sample_status()).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].zone_index, 0);
        assert_eq!(zones[0].name, "Living");
        assert_eq!(zones[1].zone_index, 2);
        assert_eq!(zones[1].name, "Bedroom");
        // EnabledZones is indexed over the raw array, pre-filter.
        assert!(zones[0].on);
        assert!(zones[1].on);
    }

    #[test]
    fn zone_sensor_keys_joined() {
        let (_, zones) = parse_status("s", &sample_status()).unwrap();
        assert_eq!(zones[0].sensor_id, "SENS01-SENS02");
        assert_eq!(zones[1].sensor_id, "SENS03");
    }

    #[test]
    fn zone_target_follows_cool_setpoint() {
        let (_, zones) = parse_status("s", &sample_status()).unwrap();
        assert_eq!(zones[1].target_temperature, 21.5);
    }

    #[test]
    fn missing_section_is_malformed() {
        for section in ["UserAirconSettings", "RemoteZoneInfo", "MasterInfo", "NV_Limits"] {
            let mut raw = sample_status();
            raw.as_object_mut().unwrap().remove(section);
            let err = parse_status("s", &raw).unwrap_err();
            assert!(
                matches!(err, Error::MalformedSnapshot(_)),
                "{section}: {err}"
            );
        }
    }

    #[test]
    fn inverted_limits_are_malformed() {
        let mut raw = sample_status();
        raw["NV_Limits"]["UserSetpoint_oC"]["setCool_Min"] = json!(33.0);
        assert!(matches!(
            parse_status("s", &raw),
            Err(Error::MalformedSnapshot(_))
        ));
    }

    #[test]
    fn unknown_mode_parses_as_auto() {
        let mut raw = sample_status();
        raw["UserAirconSettings"]["Mode"] = json!("OFF");
        let (unit, _) = parse_status("s", &raw).unwrap();
        assert_eq!(unit.operation_mode, OperationMode::Auto);
    }

    #[test]
    fn extracts_status_from_push_frame() {
        let frame = json!({
            "C": "d-ABC",
            "M": [{ "update": { "status": sample_status() } }]
        })
        .to_string();
        let status = extract_status_update(&frame).unwrap();
        assert!(status.get("UserAirconSettings").is_some());
    }

    #[test]
    fn heartbeat_frame_has_no_status() {
        assert!(extract_status_update("{}").is_none());
        assert!(extract_status_update("not json").is_none());
        assert!(extract_status_update(r#"{"M":[]}"#).is_none());
    }

    #[test]
    fn subscribe_message_structure() {
        let msg = subscribe_message("22H01234");
        assert_eq!(msg["command"]["type"], "subscribe");
        assert_eq!(msg["command"]["mwcSerial"], "22H01234");
    }

    #[test]
    fn command_builders_tag_set_settings() {
        for data in [
            set_power_data(true),
            set_mode_data(OperationMode::Heat),
            set_fan_mode_data(&FanSetting::new(FanSpeed::High, true)),
            set_quiet_mode_data(true),
            set_cool_setpoint_data(22.5),
            set_heat_setpoint_data(19.0),
            set_zone_cool_setpoint_data(3, 21.0),
            set_zone_enabled_data(1, false),
            set_zones_enabled_data(&[true; 8]),
        ] {
            assert_eq!(data["type"], "set-settings");
        }
    }

    #[test]
    fn zone_builders_address_by_index() {
        let data = set_zone_cool_setpoint_data(3, 21.0);
        assert_eq!(data["RemoteZoneInfo[3].TemperatureSetpoint_Cool_oC"], 21.0);
        let data = set_zone_enabled_data(5, true);
        assert_eq!(data["UserAirconSettings.EnabledZones[5]"], true);
    }

    #[test]
    fn mode_command_also_powers_on() {
        let data = set_mode_data(OperationMode::Cool);
        assert_eq!(data["UserAirconSettings.isOn"], true);
        assert_eq!(data["UserAirconSettings.Mode"], "COOL");
    }

    #[test]
    fn envelope_wraps_command() {
        let body = command_envelope(set_power_data(false));
        assert_eq!(body["command"]["UserAirconSettings.isOn"], false);
        assert_eq!(body["command"]["type"], "set-settings");
    }
}
