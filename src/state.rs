use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{FanSetting, OperationMode, UnitState, ZoneState};

const NOTIFY_CAPACITY: usize = 64;

struct Snapshot {
    unit: UnitState,
    zones: Vec<ZoneState>,
    updated_at: Instant,
}

/// Locally cached copy of the unit's state. Snapshot applies replace the
/// whole thing; optimistic command writes patch individual fields and are
/// themselves replaced by the next apply.
pub struct StateMirror {
    inner: RwLock<Option<Snapshot>>,
    notify: broadcast::Sender<()>,
}

impl StateMirror {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: RwLock::new(None),
            notify,
        }
    }

    /// Replace the cached state wholesale and wake subscribers. Every apply
    /// notifies, even when nothing changed.
    pub fn apply(&self, unit: UnitState, zones: Vec<ZoneState>) {
        {
            let mut guard = self.inner.write().expect("state lock poisoned");
            *guard = Some(Snapshot {
                unit,
                zones,
                updated_at: Instant::now(),
            });
        }
        let _ = self.notify.send(());
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().expect("state lock poisoned").is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }

    pub fn unit(&self) -> Result<UnitState> {
        let guard = self.inner.read().expect("state lock poisoned");
        guard
            .as_ref()
            .map(|snap| snap.unit.clone())
            .ok_or(Error::NotReady)
    }

    pub fn zones(&self) -> Result<Vec<ZoneState>> {
        let guard = self.inner.read().expect("state lock poisoned");
        guard
            .as_ref()
            .map(|snap| snap.zones.clone())
            .ok_or(Error::NotReady)
    }

    pub fn zone(&self, zone_index: u8) -> Result<Option<ZoneState>> {
        let guard = self.inner.read().expect("state lock poisoned");
        let snap = guard.as_ref().ok_or(Error::NotReady)?;
        Ok(snap
            .zones
            .iter()
            .find(|z| z.zone_index == zone_index)
            .cloned())
    }

    pub fn elapsed_since_update(&self) -> Option<Duration> {
        let guard = self.inner.read().expect("state lock poisoned");
        guard.as_ref().map(|snap| snap.updated_at.elapsed())
    }

    // -- Optimistic writes after an accepted command --
    //
    // These touch only the echoed field and do not bump updated_at, so the
    // poll fallback still treats the state as stale until a real snapshot
    // confirms the change.

    pub fn note_power(&self, on: bool) {
        self.patch(|snap| snap.unit.on = on);
    }

    pub fn note_mode(&self, mode: OperationMode) {
        self.patch(|snap| {
            snap.unit.on = true;
            snap.unit.operation_mode = mode;
        });
    }

    pub fn note_fan_mode(&self, fan: FanSetting) {
        self.patch(|snap| snap.unit.fan_mode = fan);
    }

    pub fn note_quiet_mode(&self, on: bool) {
        self.patch(|snap| snap.unit.quiet_mode = on);
    }

    pub fn note_cool_setpoint(&self, value: f64) {
        self.patch(|snap| snap.unit.cool_setpoint = value);
    }

    pub fn note_heat_setpoint(&self, value: f64) {
        self.patch(|snap| snap.unit.heat_setpoint = value);
    }

    pub fn note_zone_enabled(&self, zone_index: u8, on: bool) {
        self.patch(|snap| {
            if let Some(zone) = snap.zones.iter_mut().find(|z| z.zone_index == zone_index) {
                zone.on = on;
            }
        });
    }

    pub fn note_zone_target(&self, zone_index: u8, value: f64) {
        self.patch(|snap| {
            if let Some(zone) = snap.zones.iter_mut().find(|z| z.zone_index == zone_index) {
                zone.target_temperature = value;
            }
        });
    }

    fn patch(&self, f: impl FnOnce(&mut Snapshot)) {
        {
            let mut guard = self.inner.write().expect("state lock poisoned");
            match guard.as_mut() {
                Some(snap) => f(snap),
                None => {
                    debug!("ignoring optimistic write before first snapshot");
                    return;
                }
            }
        }
        let _ = self.notify.send(());
    }
}

impl Default for StateMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Limits;

    fn unit() -> UnitState {
        UnitState {
            on: true,
            operation_mode: OperationMode::Cool,
            fan_mode: FanSetting::default(),
            quiet_mode: false,
            cool_setpoint: 22.0,
            heat_setpoint: 20.0,
            temperature: 23.0,
            humidity: 50.0,
            compressor_mode: Default::default(),
            compressor_speed: 0.0,
            limits: Limits::default(),
            name: "Home".to_string(),
            model: "NEO-12".to_string(),
            serial_number: "abc".to_string(),
            master_sensor_id: "m1".to_string(),
            is_online: true,
        }
    }

    fn zone(index: u8) -> ZoneState {
        ZoneState {
            zone_index: index,
            name: format!("Zone {index}"),
            on: true,
            target_temperature: 22.0,
            ..Default::default()
        }
    }

    #[test]
    fn reads_fail_before_first_apply() {
        let mirror = StateMirror::new();
        assert!(!mirror.is_ready());
        assert!(matches!(mirror.unit(), Err(Error::NotReady)));
        assert!(matches!(mirror.zones(), Err(Error::NotReady)));
        assert!(matches!(mirror.zone(0), Err(Error::NotReady)));
        assert!(mirror.elapsed_since_update().is_none());
    }

    #[test]
    fn apply_replaces_wholesale() {
        let mirror = StateMirror::new();
        mirror.apply(unit(), vec![zone(0), zone(1), zone(2)]);
        assert_eq!(mirror.zones().unwrap().len(), 3);

        // A later snapshot with fewer zones wins outright.
        mirror.apply(unit(), vec![zone(1)]);
        let zones = mirror.zones().unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_index, 1);
        assert!(mirror.zone(0).unwrap().is_none());
    }

    #[test]
    fn every_apply_notifies_even_without_changes() {
        let mirror = StateMirror::new();
        let mut rx = mirror.subscribe();
        mirror.apply(unit(), vec![zone(0)]);
        mirror.apply(unit(), vec![zone(0)]);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn optimistic_write_overwritten_by_next_apply() {
        let mirror = StateMirror::new();
        mirror.apply(unit(), vec![zone(0)]);
        mirror.note_cool_setpoint(25.0);
        assert_eq!(mirror.unit().unwrap().cool_setpoint, 25.0);

        mirror.apply(unit(), vec![zone(0)]);
        assert_eq!(mirror.unit().unwrap().cool_setpoint, 22.0);
    }

    #[test]
    fn optimistic_writes_notify() {
        let mirror = StateMirror::new();
        mirror.apply(unit(), vec![zone(0)]);
        let mut rx = mirror.subscribe();
        mirror.note_zone_enabled(0, false);
        assert!(rx.try_recv().is_ok());
        assert!(!mirror.zone(0).unwrap().unwrap().on);
    }

    #[test]
    fn optimistic_write_before_ready_is_ignored() {
        let mirror = StateMirror::new();
        mirror.note_power(false);
        assert!(!mirror.is_ready());
    }

    #[test]
    fn apply_stamps_update_time() {
        let mirror = StateMirror::new();
        mirror.apply(unit(), vec![]);
        assert!(mirror.elapsed_since_update().unwrap() < Duration::from_secs(1));
    }
}
