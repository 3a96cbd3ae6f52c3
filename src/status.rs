//! go-e compatible status rendering.
//!
//! [`render`] is a pure function from an adapter snapshot to the JSON object
//! the go-e charger ecosystem (openWB and friends) expects. The schema quirks
//! are an observed external contract and are reproduced bit for bit: every
//! numeric value is a quoted string, `sse` carries a `0x`-prefixed lowercase
//! hex version, and the per-phase "apparent power" fields scale the raw
//! deci-amp register values.

use serde::Serialize;

/// Charging-state classification for the `car` field, indexed by the raw
/// state 0..=11 (only 2..=11 are populated by the device).
const CAR_BY_STATE: [u8; 12] = [0, 0, 1, 1, 3, 3, 2, 2, 0, 0, 0, 0];

/// Error classification for the `err` field, indexed like [`CAR_BY_STATE`].
const ERR_BY_STATE: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 10, 0, 0];

/// A phase counts as present when its voltage exceeds this threshold.
const PHASE_VOLTAGE_THRESHOLD: u16 = 200;

/// Everything the renderer and the HTML templates need from one wallbox,
/// captured after a forced refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub client_id: u8,
    pub layout_version: u16,
    /// Raw charging state (register 5).
    pub state_raw: u16,
    /// Software allow flag.
    pub allowed: bool,
    /// Remote lock state derived from registers 13 and 259.
    pub locked: bool,
    /// Charging current preset in amps.
    pub preset_amps: f64,
    pub temperature_celsius: f64,
    pub session_energy_kwh: f64,
    pub total_energy_kwh: f64,
    pub power_kw: f64,
    /// Phase voltages L1..L3 in volts.
    pub voltages: [u16; 3],
    /// Phase currents L1..L3 in raw deci-amps.
    pub currents_raw: [u16; 3],
    pub hw_min_current: u16,
    pub hw_max_current: u16,
    pub logistic: String,
}

/// The go-e status object. Field order is the serialization order.
#[derive(Debug, Clone, Serialize)]
pub struct GoeStatus {
    pub version: String,
    pub car: String,
    pub amp: String,
    pub amx: String,
    pub err: String,
    pub ast: String,
    pub alw: String,
    pub stp: String,
    pub cbl: String,
    pub tmp: String,
    pub dws: String,
    pub dwo: String,
    pub eto: String,
    pub uby: String,
    pub ust: String,
    pub adi: String,
    pub al1: String,
    pub al2: String,
    pub al3: String,
    pub al4: String,
    pub al5: String,
    pub fwv: String,
    pub sse: String,
    pub ama: String,
    pub pha: String,
    pub hdec_mbusid: String,
    pub nrg: [String; 16],
}

/// Phase-presence bitmask: 3 bits per phase (relay and both sensing bits),
/// accumulating 9/18/36 for L1/L2/L3 above the voltage threshold.
fn phase_mask(voltages: &[u16; 3]) -> u16 {
    let mut mask = 0;
    if voltages[0] > PHASE_VOLTAGE_THRESHOLD {
        mask += 9; // 0000 1001
    }
    if voltages[1] > PHASE_VOLTAGE_THRESHOLD {
        mask += 18; // 0001 0010
    }
    if voltages[2] > PHASE_VOLTAGE_THRESHOLD {
        mask += 36; // 0010 0100
    }
    mask
}

/// Render a snapshot into the go-e status schema.
pub fn render(snapshot: &StatusSnapshot) -> GoeStatus {
    let state = usize::from(snapshot.state_raw);
    let car = CAR_BY_STATE.get(state).copied().unwrap_or(0);
    let err = ERR_BY_STATE.get(state).copied().unwrap_or(0);
    let amp = format!("{}", snapshot.preset_amps as i64);

    let volts = |i: usize| f64::from(snapshot.voltages[i]);
    let deciamps = |i: usize| f64::from(snapshot.currents_raw[i]);
    let nrg = [
        format!("{}", snapshot.voltages[0]),
        format!("{}", snapshot.voltages[1]),
        format!("{}", snapshot.voltages[2]),
        "0".to_string(),
        format!("{:.1}", deciamps(0)),
        format!("{:.1}", deciamps(1)),
        format!("{:.1}", deciamps(2)),
        format!("{:.1}", volts(0) * deciamps(0) / 100.0),
        format!("{:.1}", volts(1) * deciamps(1) / 100.0),
        format!("{:.1}", volts(2) * deciamps(2) / 100.0),
        "0".to_string(),
        format!("{:.1}", snapshot.power_kw * 100.0),
        "1".to_string(),
        "1".to_string(),
        "1".to_string(),
        "1".to_string(),
    ];

    GoeStatus {
        version: "B".to_string(),
        car: car.to_string(),
        amx: amp.clone(),
        amp,
        err: err.to_string(),
        ast: "0".to_string(),
        alw: if snapshot.allowed { "1" } else { "0" }.to_string(),
        stp: "0".to_string(),
        cbl: "16".to_string(),
        tmp: format!("{:.1}", snapshot.temperature_celsius),
        dws: format!("{}", (snapshot.session_energy_kwh * 360_000.0) as i64),
        dwo: "0".to_string(),
        eto: format!("{:.2}", snapshot.total_energy_kwh * 10.0),
        uby: "0".to_string(),
        ust: "2".to_string(),
        adi: "0".to_string(),
        al1: "0".to_string(),
        al2: "0".to_string(),
        al3: "0".to_string(),
        al4: "0".to_string(),
        al5: "0".to_string(),
        fwv: "040".to_string(),
        sse: format!("hdec-{:#x}", snapshot.layout_version),
        ama: snapshot.hw_max_current.to_string(),
        pha: phase_mask(&snapshot.voltages).to_string(),
        hdec_mbusid: snapshot.client_id.to_string(),
        nrg,
    }
}
