//! Heidelberg Energy Control register map and the per-adapter register cache.
//!
//! Addresses mirror the device's Modbus map (external interface document
//! "Modbus Register-Layouts", versions 1.0.7 / 1.0.8). All telemetry lives in
//! input registers (FC04); configuration, lock and preset registers are
//! holding registers (FC03/FC06). 32-bit quantities span two consecutive
//! registers, high word first.

use std::time::Duration;

use tokio::time::Instant;

// ============================================================================
// Register addresses
// ============================================================================

/// Size of the addressable register bank. Index 0 is unused.
pub const REGISTER_COUNT: usize = 820;

/// Slave id echo; the device answers its own bus address here.
pub const REG_SLAVE_ID_ECHO: u16 = 1;
/// Register-layout version, e.g. 0x0107 or 0x0108.
pub const REG_LAYOUT_VERSION: u16 = 4;
/// Charging state, values 2..=11.
pub const REG_CHARGING_STATE: u16 = 5;
/// Phase currents L1..L3 in 0.1 A steps.
pub const REG_CURRENT_L1: u16 = 6;
/// Internal temperature in 0.1 °C steps.
pub const REG_TEMPERATURE: u16 = 9;
/// Phase voltages L1..L3 in whole volts.
pub const REG_VOLTAGE_L1: u16 = 10;
/// Nonzero when the external lock input allows charging.
pub const REG_LOCK_CAPABLE: u16 = 13;
/// Active power in watts.
pub const REG_POWER: u16 = 14;
/// Energy since power-on, 32-bit in 0.001 kWh, high word.
pub const REG_SESSION_ENERGY_HI: u16 = 15;
/// Energy since power-on, low word.
pub const REG_SESSION_ENERGY_LO: u16 = 16;
/// Total energy, 32-bit in 0.001 kWh, high word.
pub const REG_TOTAL_ENERGY_HI: u16 = 17;
/// Total energy, low word.
pub const REG_TOTAL_ENERGY_LO: u16 = 18;
/// Maximal charging current the box is wired for, raw register value.
pub const REG_HW_MAX_CURRENT: u16 = 100;
/// Minimal charging current the box accepts, raw register value.
pub const REG_HW_MIN_CURRENT: u16 = 101;
/// First register of the logistic string block (two chars per register).
pub const REG_LOGISTIC_FIRST: u16 = 102;
/// Last register of the logistic string block, inclusive.
pub const REG_LOGISTIC_LAST: u16 = 133;
/// Watchdog timeout in milliseconds; 0 disables the watchdog.
pub const REG_WATCHDOG_TIMEOUT: u16 = 257;
/// Standby function control; 4 disables standby.
pub const REG_STANDBY_CONTROL: u16 = 258;
/// Remote lock; 0 locks the box, 1 unlocks it.
pub const REG_REMOTE_LOCK: u16 = 259;
/// Charging current preset in 0.1 A steps.
pub const REG_CURRENT_PRESET: u16 = 261;
/// First diagnostic register.
pub const REG_DIAG_FIRST: u16 = 300;
/// Last diagnostic register, inclusive.
pub const REG_DIAG_LAST: u16 = 318;
/// First register of the error memory.
pub const REG_ERROR_MEM_FIRST: u16 = 500;
/// Last register of the error memory, inclusive.
pub const REG_ERROR_MEM_LAST: u16 = 819;

/// Register-layout versions above this threshold can read the standby and
/// remote-lock registers; 1.0.7 can only write them (reads time out).
pub const LAYOUT_VERSION_STANDBY_READ: u16 = 0x107;

/// Standby control value that keeps the box permanently awake.
pub const STANDBY_DISABLED: u16 = 4;

/// Input register blocks read on every refresh: (start, count).
pub(crate) const BASE_INPUT_BLOCKS: [(u16, u16); 2] = [(1, 18), (100, 34)];

/// Additional input register blocks read on a full refresh only.
pub(crate) const FULL_INPUT_BLOCKS: [(u16, u16); 5] =
    [(300, 19), (500, 100), (600, 100), (700, 100), (800, 20)];

// ============================================================================
// Register cache
// ============================================================================

/// Fixed-size register bank with a time-to-live refresh stamp.
///
/// The cache never refreshes itself; the link manager writes into it and
/// stamps it after a fully successful read cycle. Accessors are required to
/// run a refresh check before indexing. Addresses outside `0..REGISTER_COUNT`
/// are a programming error and panic.
#[derive(Debug)]
pub struct RegisterCache {
    regs: [u16; REGISTER_COUNT],
    last_refresh: Option<Instant>,
    ttl: Duration,
}

impl RegisterCache {
    /// Create a zero-initialised cache with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
            last_refresh: None,
            ttl,
        }
    }

    /// Read one cached register value. Call only after a refresh check.
    pub fn get(&self, address: u16) -> u16 {
        self.regs[usize::from(address)]
    }

    /// Overwrite one cached register value.
    pub fn set(&mut self, address: u16, value: u16) {
        self.regs[usize::from(address)] = value;
    }

    /// Atomically overwrite a contiguous slice starting at `start`.
    pub fn refresh_range(&mut self, start: u16, values: &[u16]) {
        let start = usize::from(start);
        self.regs[start..start + values.len()].copy_from_slice(values);
    }

    /// Decode a 32-bit quantity stored high word first at `hi`/`hi + 1`.
    pub fn get_u32(&self, hi: u16) -> u32 {
        (u32::from(self.get(hi)) << 16) | u32::from(self.get(hi + 1))
    }

    /// Whether the cache is still within its time-to-live at `now`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        match self.last_refresh {
            Some(stamp) => now < stamp + self.ttl,
            None => false,
        }
    }

    /// Stamp the cache after a fully successful refresh cycle.
    pub fn mark_refreshed(&mut self, now: Instant) {
        self.last_refresh = Some(now);
    }

    /// Copy out an inclusive register range, e.g. the diagnostic block.
    pub fn range(&self, first: u16, last: u16) -> Vec<u16> {
        self.regs[usize::from(first)..=usize::from(last)].to_vec()
    }

    /// The whole bank, for the raw register endpoint.
    pub fn raw(&self) -> &[u16; REGISTER_COUNT] {
        &self.regs
    }
}
