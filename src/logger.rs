use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

pub enum MessageLogMode {
    /// Commands plus every applied snapshot and channel transition.
    Full,
    /// Outbound commands only.
    CommandsOnly,
}

pub(crate) type SharedLogger = Arc<Mutex<MessageLogger>>;

/// NDJSON traffic log, one entry per line, appended to a user-chosen file.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { mode, file })
    }

    pub fn log_command(&mut self, action: &str, zone: Option<u8>, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "action": action,
            "zone": zone,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_snapshot(&mut self, source: &str) {
        if matches!(self.mode, MessageLogMode::CommandsOnly) {
            return;
        }
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "state",
            "source": source,
        });
        self.write_line(&entry);
    }

    pub fn log_channel(&mut self, event: &str, detail: &str) {
        if matches!(self.mode, MessageLogMode::CommandsOnly) {
            return;
        }
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "channel",
            "event": event,
            "detail": detail,
        });
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        let mut contents = String::new();
        std::fs::File::open(path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn log_command_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_command("set_mode", None, &json!({"UserAirconSettings.Mode": "HEAT"}));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "cmd");
        assert_eq!(lines[0]["action"], "set_mode");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn log_command_captures_zone() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::CommandsOnly, path).unwrap();
        logger.log_command(
            "set_zone_target",
            Some(3),
            &json!({"RemoteZoneInfo[3].TemperatureSetpoint_Cool_oC": 21.0}),
        );

        let lines = read_lines(path);
        assert_eq!(lines[0]["zone"], 3);
    }

    #[test]
    fn commands_only_mode_skips_snapshots_and_channel() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::CommandsOnly, path).unwrap();
        logger.log_snapshot("push");
        logger.log_channel("connected", "");
        logger.log_command("set_power", None, &json!({"UserAirconSettings.isOn": true}));

        let lines = read_lines(path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["dir"], "cmd");
    }

    #[test]
    fn full_mode_logs_snapshot_source() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_snapshot("poll");
        logger.log_channel("given_up", "11 consecutive failures");

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "state");
        assert_eq!(lines[0]["source"], "poll");
        assert_eq!(lines[1]["dir"], "channel");
        assert_eq!(lines[1]["event"], "given_up");
    }
}
