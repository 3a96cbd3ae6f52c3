//! Wallbox adapter: typed, unit-converted access to one Heidelberg Energy
//! Control.
//!
//! Composes the link manager and the register cache. Every read accessor runs
//! a refresh check first; while the link is down accessors silently serve the
//! last cached (possibly zero-initialised) values. Callers that need to
//! distinguish fresh from stale inspect [`WallboxAdapter::is_connected`].

use std::time::Duration;

use crate::link::{remote_locked, LinkManager};
use crate::registers::{
    RegisterCache, REGISTER_COUNT, REG_CHARGING_STATE, REG_CURRENT_L1, REG_CURRENT_PRESET,
    REG_DIAG_FIRST, REG_DIAG_LAST, REG_ERROR_MEM_FIRST, REG_ERROR_MEM_LAST,
    REG_LOGISTIC_FIRST, REG_LOGISTIC_LAST, REG_POWER, REG_REMOTE_LOCK, REG_SESSION_ENERGY_HI,
    REG_STANDBY_CONTROL, REG_TEMPERATURE, REG_TOTAL_ENERGY_HI, REG_VOLTAGE_L1,
    REG_WATCHDOG_TIMEOUT, LAYOUT_VERSION_STANDBY_READ,
};
use crate::status::StatusSnapshot;
use crate::transport::Transport;

/// Default cache time-to-live between register read cycles.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(3000);

/// Charging state as reported in register 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingState {
    /// 2: No vehicle plugged, wallbox doesn't allow charging.
    UnpluggedDisallowed,
    /// 3: No vehicle plugged, wallbox allows charging.
    UnpluggedAllowed,
    /// 4: Vehicle plugged, no charging request, wallbox doesn't allow charging.
    PluggedDisallowed,
    /// 5: Vehicle plugged, no charging request, wallbox allows charging.
    PluggedAllowed,
    /// 6: Vehicle plugged, charging request, wallbox doesn't allow charging.
    RequestDisallowed,
    /// 7: Vehicle plugged, charging request, wallbox allows charging.
    RequestAllowed,
    /// 8: Derating.
    Derating,
    /// 9: Error class E.
    ErrorE,
    /// 10: Error class F.
    ErrorF,
    /// 11: Generic error.
    Error,
    /// Any value outside the documented 2..=11 range.
    Unknown(u16),
}

impl ChargingState {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            2 => ChargingState::UnpluggedDisallowed,
            3 => ChargingState::UnpluggedAllowed,
            4 => ChargingState::PluggedDisallowed,
            5 => ChargingState::PluggedAllowed,
            6 => ChargingState::RequestDisallowed,
            7 => ChargingState::RequestAllowed,
            8 => ChargingState::Derating,
            9 => ChargingState::ErrorE,
            10 => ChargingState::ErrorF,
            11 => ChargingState::Error,
            other => ChargingState::Unknown(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            ChargingState::UnpluggedDisallowed => 2,
            ChargingState::UnpluggedAllowed => 3,
            ChargingState::PluggedDisallowed => 4,
            ChargingState::PluggedAllowed => 5,
            ChargingState::RequestDisallowed => 6,
            ChargingState::RequestAllowed => 7,
            ChargingState::Derating => 8,
            ChargingState::ErrorE => 9,
            ChargingState::ErrorF => 10,
            ChargingState::Error => 11,
            ChargingState::Unknown(raw) => raw,
        }
    }
}

/// Mains phase of the three-phase supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    fn offset(self) -> u16 {
        match self {
            Phase::L1 => 0,
            Phase::L2 => 1,
            Phase::L3 => 2,
        }
    }
}

/// Preset clamping policy: below the hardware minimum means "no charging",
/// above the maximum is capped. Out-of-range values are never rejected.
fn clamp_preset(amps: u16, hw_min: u16, hw_max: u16) -> u16 {
    if amps < hw_min {
        0
    } else if amps > hw_max {
        hw_max
    } else {
        amps
    }
}

fn decode_logistic(cache: &RegisterCache) -> String {
    let mut text = String::with_capacity(64);
    for address in REG_LOGISTIC_FIRST..=REG_LOGISTIC_LAST {
        let value = cache.get(address);
        text.push(char::from((value & 0xff) as u8));
        text.push(char::from((value >> 8) as u8));
    }
    text
}

/// One wallbox on the bus: link, cache and the software allow flag.
#[derive(Debug)]
pub struct WallboxAdapter<T: Transport> {
    client_id: u8,
    link: LinkManager<T>,
    cache: RegisterCache,
}

impl<T: Transport> WallboxAdapter<T> {
    /// Create the adapter for `client_id`. No I/O happens until the first
    /// accessor call observes a stale cache.
    pub fn new(session: T, client_id: u8, cache_ttl: Duration, retry_cooldown: Duration) -> Self {
        Self {
            client_id,
            link: LinkManager::new(session, client_id, retry_cooldown),
            cache: RegisterCache::new(cache_ttl),
        }
    }

    /// Modbus slave address and fleet position of this wallbox.
    pub fn client_id(&self) -> u8 {
        self.client_id
    }

    /// Current link state, without attempting I/O.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub async fn charging_state(&mut self) -> ChargingState {
        self.link.refresh(&mut self.cache, false, false).await;
        ChargingState::from_raw(self.cache.get(REG_CHARGING_STATE))
    }

    /// Internal temperature of the box in °C.
    pub async fn temperature_celsius(&mut self) -> f64 {
        self.link.refresh(&mut self.cache, false, false).await;
        f64::from(self.cache.get(REG_TEMPERATURE)) / 10.0
    }

    /// Actual voltage of a phase in volts.
    pub async fn voltage(&mut self, phase: Phase) -> u16 {
        self.link.refresh(&mut self.cache, false, false).await;
        self.cache.get(REG_VOLTAGE_L1 + phase.offset())
    }

    /// Actual current of a phase in amps.
    pub async fn current_amps(&mut self, phase: Phase) -> f64 {
        self.link.refresh(&mut self.cache, false, false).await;
        f64::from(self.cache.get(REG_CURRENT_L1 + phase.offset())) / 10.0
    }

    /// Total energy delivered over the life of the box, in kWh.
    pub async fn total_energy_kwh(&mut self) -> f64 {
        self.link.refresh(&mut self.cache, false, false).await;
        f64::from(self.cache.get_u32(REG_TOTAL_ENERGY_HI)) / 1000.0
    }

    /// Energy delivered since power-on, in kWh.
    pub async fn session_energy_kwh(&mut self) -> f64 {
        self.link.refresh(&mut self.cache, false, false).await;
        f64::from(self.cache.get_u32(REG_SESSION_ENERGY_HI)) / 1000.0
    }

    /// Power currently drawn by the car, in kW.
    pub async fn power_kw(&mut self) -> f64 {
        self.link.refresh(&mut self.cache, false, false).await;
        f64::from(self.cache.get(REG_POWER)) / 1000.0
    }

    /// Charging current preset in amps. Always re-reads the bus: a current
    /// setpoint must not be served stale.
    pub async fn current_preset_amps(&mut self) -> f64 {
        self.link.refresh(&mut self.cache, true, false).await;
        f64::from(self.cache.get(REG_CURRENT_PRESET)) / 10.0
    }

    /// Standby function status, or -1 on layouts that cannot read it.
    pub async fn standby_status(&mut self) -> i32 {
        self.link.refresh(&mut self.cache, false, false).await;
        if self.link.layout_version() <= LAYOUT_VERSION_STANDBY_READ {
            return -1;
        }
        i32::from(self.cache.get(REG_STANDBY_CONTROL))
    }

    /// Remote lock state; `true` means the box is locked.
    pub async fn locked_state(&mut self) -> bool {
        self.link.refresh(&mut self.cache, false, false).await;
        remote_locked(&self.cache)
    }

    /// The "logistic" string of the box (registers 102..=133, two characters
    /// per register, low byte first).
    pub async fn logistic_string(&mut self) -> String {
        self.link.refresh(&mut self.cache, false, false).await;
        decode_logistic(&self.cache)
    }

    /// Remote watchdog timeout in milliseconds.
    pub async fn watchdog_timeout_millis(&mut self) -> u16 {
        self.link.refresh(&mut self.cache, false, false).await;
        self.cache.get(REG_WATCHDOG_TIMEOUT)
    }

    /// Minimal charging current the hardware accepts, in amps.
    pub fn hw_min_current(&self) -> u16 {
        self.link.hw_min_current()
    }

    /// Maximal charging current the box is switched to, in amps.
    pub fn hw_max_current(&self) -> u16 {
        self.link.hw_max_current()
    }

    /// Software allow flag. Not a hardware state: see [`Self::set_allowed`].
    pub fn is_allowed(&self) -> bool {
        self.link.is_allowed()
    }

    /// Remember whether charging is meant to be allowed. Software-only; the
    /// device is never written. The flag starts out as the inverse of the
    /// lock state probed at connect time.
    pub fn set_allowed(&mut self, allowed: bool) {
        self.link.set_allowed(allowed);
    }

    /// Lock or unlock the box remotely. The register is only written when
    /// the current value differs, to keep redundant frames off the bus.
    pub async fn set_locked_state(&mut self, lock: bool) {
        let desired = if lock { 0 } else { 1 };
        let current = self
            .link
            .read_holding_single(&mut self.cache, REG_REMOTE_LOCK)
            .await;
        if current != Some(desired) {
            self.link
                .write_register(&mut self.cache, REG_REMOTE_LOCK, desired)
                .await;
        }
    }

    /// Set the charging current preset in amps.
    ///
    /// Values below the hardware minimum become 0 (no charging), values above
    /// the hardware maximum are capped; nothing is rejected. No-op while the
    /// link is down.
    pub async fn set_current_preset_amps(&mut self, amps: u16) {
        if !self.link.is_connected() {
            return;
        }
        let clamped = clamp_preset(amps, self.link.hw_min_current(), self.link.hw_max_current());
        self.link
            .write_register(&mut self.cache, REG_CURRENT_PRESET, clamped * 10)
            .await;
    }

    /// Configure the remote watchdog; 0 disables it. Returns whether the
    /// write went out.
    pub async fn set_watchdog_timeout(&mut self, millis: u16) -> bool {
        self.link.set_watchdog_timeout(&mut self.cache, millis).await
    }

    /// Diagnostic registers 300..=318, freshly read.
    pub async fn diagnostic_registers(&mut self) -> Vec<u16> {
        self.link.refresh(&mut self.cache, true, true).await;
        self.cache.range(REG_DIAG_FIRST, REG_DIAG_LAST)
    }

    /// Error memory registers 500..=819, freshly read.
    pub async fn error_memory(&mut self) -> Vec<u16> {
        self.link.refresh(&mut self.cache, true, true).await;
        self.cache.range(REG_ERROR_MEM_FIRST, REG_ERROR_MEM_LAST)
    }

    /// The raw register bank as currently cached, without a refresh.
    pub fn raw_registers(&self) -> &[u16; REGISTER_COUNT] {
        self.cache.raw()
    }

    /// Force a refresh and dump the adapter state for rendering.
    pub async fn snapshot(&mut self) -> StatusSnapshot {
        self.link.refresh(&mut self.cache, true, false).await;
        StatusSnapshot {
            client_id: self.client_id,
            layout_version: self.link.layout_version(),
            state_raw: self.cache.get(REG_CHARGING_STATE),
            allowed: self.link.is_allowed(),
            locked: remote_locked(&self.cache),
            preset_amps: f64::from(self.cache.get(REG_CURRENT_PRESET)) / 10.0,
            temperature_celsius: f64::from(self.cache.get(REG_TEMPERATURE)) / 10.0,
            session_energy_kwh: f64::from(self.cache.get_u32(REG_SESSION_ENERGY_HI)) / 1000.0,
            total_energy_kwh: f64::from(self.cache.get_u32(REG_TOTAL_ENERGY_HI)) / 1000.0,
            power_kw: f64::from(self.cache.get(REG_POWER)) / 1000.0,
            voltages: [
                self.cache.get(REG_VOLTAGE_L1),
                self.cache.get(REG_VOLTAGE_L1 + 1),
                self.cache.get(REG_VOLTAGE_L1 + 2),
            ],
            currents_raw: [
                self.cache.get(REG_CURRENT_L1),
                self.cache.get(REG_CURRENT_L1 + 1),
                self.cache.get(REG_CURRENT_L1 + 2),
            ],
            hw_min_current: self.link.hw_min_current(),
            hw_max_current: self.link.hw_max_current(),
            logistic: decode_logistic(&self.cache),
        }
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &T {
        self.link.session()
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut T {
        self.link.session_mut()
    }
}
