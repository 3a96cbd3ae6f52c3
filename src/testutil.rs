//! Scripted transport for tests: a register bank that behaves like a
//! Heidelberg Energy Control on the far end of the bus, with switchable
//! failure modes and call counters.

use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};
use crate::registers::{LAYOUT_VERSION_STANDBY_READ, REGISTER_COUNT, REG_WATCHDOG_TIMEOUT};
use crate::transport::Transport;

pub(crate) struct FakeTransport {
    /// Device-side registers; writes are applied here so follow-up reads
    /// observe them.
    pub regs: Vec<u16>,
    pub open: bool,
    pub fail_open: bool,
    pub fail_io: bool,
    pub open_attempts: usize,
    pub read_calls: usize,
    pub writes: Vec<(u16, u16)>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            regs: vec![0; REGISTER_COUNT],
            open: false,
            fail_open: false,
            fail_io: false,
            open_attempts: 0,
            read_calls: 0,
            writes: Vec::new(),
        }
    }

    /// A healthy wallbox answering as `client_id` with the given
    /// register-layout version: plugged with charging request (state 7),
    /// 6..16 A hardware range, unlocked, 16 A preset.
    pub fn wallbox(client_id: u16, version: u16) -> Self {
        let mut fake = Self::new();
        fake.regs[1] = client_id;
        fake.regs[4] = version;
        fake.regs[5] = 7;
        fake.regs[9] = 253; // 25.3 °C
        fake.regs[13] = 1;
        fake.regs[100] = 16;
        fake.regs[101] = 6;
        fake.regs[259] = 1;
        fake.regs[261] = 160;
        fake
    }

    fn timeout() -> BridgeError {
        BridgeError::Timeout(Duration::from_millis(500))
    }

    fn read(&mut self, address: u16, count: u16) -> BridgeResult<Vec<u16>> {
        if !self.open {
            return Err(BridgeError::NotConnected);
        }
        if self.fail_io {
            return Err(Self::timeout());
        }
        self.read_calls += 1;
        let start = usize::from(address);
        Ok(self.regs[start..start + usize::from(count)].to_vec())
    }
}

impl Transport for FakeTransport {
    async fn open(&mut self) -> BridgeResult<()> {
        self.open_attempts += 1;
        if self.fail_open {
            return Err(Self::timeout());
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> BridgeResult<Vec<u16>> {
        self.read(address, count)
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> BridgeResult<Vec<u16>> {
        // Layout 1.0.7 times out when asked for the standby/lock registers.
        if address == REG_WATCHDOG_TIMEOUT
            && count > 1
            && self.regs[4] <= LAYOUT_VERSION_STANDBY_READ
        {
            return Err(Self::timeout());
        }
        self.read(address, count)
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> BridgeResult<()> {
        if !self.open {
            return Err(BridgeError::NotConnected);
        }
        if self.fail_io {
            return Err(Self::timeout());
        }
        self.writes.push((address, value));
        self.regs[usize::from(address)] = value;
        Ok(())
    }
}
