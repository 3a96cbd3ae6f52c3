//! Link manager: connection lifecycle for one wallbox.
//!
//! Owns the transport session and drives the `Disconnected`/`Connected`
//! state machine. Connecting probes the device (identity echo, layout
//! version, standby control, watchdog, hardware current range) and derives
//! the initial software allow flag from the lock registers. Transient
//! non-response is the normal cost of RS-485 polling, so failures drop the
//! link into a blanket reconnect cooldown instead of retrying per call.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::registers::{
    RegisterCache, BASE_INPUT_BLOCKS, FULL_INPUT_BLOCKS, LAYOUT_VERSION_STANDBY_READ,
    REG_CURRENT_PRESET, REG_HW_MAX_CURRENT, REG_HW_MIN_CURRENT, REG_LAYOUT_VERSION,
    REG_LOCK_CAPABLE, REG_REMOTE_LOCK, REG_SLAVE_ID_ECHO, REG_STANDBY_CONTROL,
    REG_WATCHDOG_TIMEOUT, STANDBY_DISABLED,
};
use crate::transport::Transport;

/// Default reconnect cooldown after a failed attempt or a dropped link.
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(120);

/// Remote lock state as encoded by registers 13 and 259: the box is unlocked
/// only when both are nonzero.
pub(crate) fn remote_locked(cache: &RegisterCache) -> bool {
    !(cache.get(REG_LOCK_CAPABLE) != 0 && cache.get(REG_REMOTE_LOCK) != 0)
}

/// Connection lifecycle and register refresh for one wallbox.
#[derive(Debug)]
pub struct LinkManager<T: Transport> {
    session: T,
    client_id: u8,
    cooldown: Duration,
    last_attempt: Option<Instant>,
    layout_version: u16,
    hw_min_current: u16,
    hw_max_current: u16,
    allowed: bool,
}

impl<T: Transport> LinkManager<T> {
    pub fn new(session: T, client_id: u8, cooldown: Duration) -> Self {
        Self {
            session,
            client_id,
            cooldown,
            last_attempt: None,
            layout_version: 0,
            hw_min_current: 0,
            hw_max_current: 0,
            allowed: false,
        }
    }

    /// Current connectivity, without attempting I/O.
    pub fn is_connected(&self) -> bool {
        self.session.is_open()
    }

    /// Register-layout version probed at connect time, 0 while never probed.
    pub fn layout_version(&self) -> u16 {
        self.layout_version
    }

    /// Minimal charging current the hardware accepts (registers 101).
    pub fn hw_min_current(&self) -> u16 {
        self.hw_min_current
    }

    /// Maximal charging current the hardware is wired for (register 100).
    pub fn hw_max_current(&self) -> u16 {
        self.hw_max_current
    }

    /// Software-only allow flag; never written to the device.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn set_allowed(&mut self, allowed: bool) {
        self.allowed = allowed;
    }

    /// Connect and probe if necessary, honoring the retry cooldown.
    /// Returns current connectivity.
    pub async fn ensure_connected(&mut self, cache: &mut RegisterCache) -> bool {
        if self.session.is_open() {
            return true;
        }
        let now = Instant::now();
        if let Some(last) = self.last_attempt {
            if now < last + self.cooldown {
                return false;
            }
        }
        self.last_attempt = Some(now);
        self.allowed = false;
        match self.connect_and_probe(cache).await {
            Ok(()) => {
                debug!(
                    client_id = self.client_id,
                    layout_version = self.layout_version,
                    "wallbox link established"
                );
                true
            }
            Err(err) => {
                warn!(
                    client_id = self.client_id,
                    error = %err,
                    cooldown_secs = self.cooldown.as_secs(),
                    "could not establish modbus connection; subsequent calls \
                     will silently serve cached values until the next attempt"
                );
                self.session.close();
                false
            }
        }
    }

    async fn connect_and_probe(&mut self, cache: &mut RegisterCache) -> BridgeResult<()> {
        self.session.open().await?;
        self.read_blocks(cache, false).await?;

        if cache.get(REG_SLAVE_ID_ECHO) != u16::from(self.client_id) {
            warn!(
                client_id = self.client_id,
                echoed = cache.get(REG_SLAVE_ID_ECHO),
                "device does not answer in the expected manner; this may or \
                 may not be a Heidelberg Energy Control wallbox"
            );
        }
        self.layout_version = cache.get(REG_LAYOUT_VERSION);

        if cache.get(REG_STANDBY_CONTROL) != STANDBY_DISABLED {
            self.session
                .write_single_register(REG_STANDBY_CONTROL, STANDBY_DISABLED)
                .await?;
            cache.set(REG_STANDBY_CONTROL, STANDBY_DISABLED);
        }
        // Watchdog off: a bridge outage must not drop an ongoing charge.
        self.session
            .write_single_register(REG_WATCHDOG_TIMEOUT, 0)
            .await?;
        cache.set(REG_WATCHDOG_TIMEOUT, 0);

        self.hw_max_current = cache.get(REG_HW_MAX_CURRENT);
        self.hw_min_current = cache.get(REG_HW_MIN_CURRENT);
        self.allowed = !remote_locked(cache);
        cache.mark_refreshed(Instant::now());
        Ok(())
    }

    async fn read_blocks(&mut self, cache: &mut RegisterCache, full: bool) -> BridgeResult<()> {
        for (start, count) in BASE_INPUT_BLOCKS {
            let values = self.session.read_input_registers(start, count).await?;
            cache.refresh_range(start, &values);
        }
        if full {
            for (start, count) in FULL_INPUT_BLOCKS {
                let values = self.session.read_input_registers(start, count).await?;
                cache.refresh_range(start, &values);
            }
        }
        // Standby and lock (258/259) are only readable in layouts newer than
        // 1.0.7; asking an older box for them times out.
        let standby_count = if cache.get(REG_LAYOUT_VERSION) > LAYOUT_VERSION_STANDBY_READ {
            3
        } else {
            1
        };
        let values = self
            .session
            .read_holding_registers(REG_WATCHDOG_TIMEOUT, standby_count)
            .await?;
        cache.refresh_range(REG_WATCHDOG_TIMEOUT, &values);

        let values = self
            .session
            .read_holding_registers(REG_CURRENT_PRESET, 2)
            .await?;
        cache.refresh_range(REG_CURRENT_PRESET, &values);
        Ok(())
    }

    /// Refresh the cache from the device unless it is still fresh.
    ///
    /// `force` bypasses the TTL check; `full` additionally reads the
    /// diagnostic and error-memory blocks. On any failure the link drops and
    /// the cache keeps its last successful values (stale but available);
    /// the refresh stamp only advances on a fully successful cycle.
    pub async fn refresh(&mut self, cache: &mut RegisterCache, force: bool, full: bool) -> bool {
        if !force && cache.is_fresh(Instant::now()) {
            return true;
        }
        if !self.ensure_connected(cache).await {
            return false;
        }
        match self.read_blocks(cache, full).await {
            Ok(()) => {
                cache.mark_refreshed(Instant::now());
                true
            }
            Err(err) => {
                self.drop_link(&err);
                false
            }
        }
    }

    /// Read a single holding register directly from the bus, bypassing the
    /// cache. Used where a decision must not act on a cached value.
    pub async fn read_holding_single(
        &mut self,
        cache: &mut RegisterCache,
        address: u16,
    ) -> Option<u16> {
        if !self.ensure_connected(cache).await {
            return None;
        }
        match self.session.read_holding_registers(address, 1).await {
            Ok(values) => values.first().copied(),
            Err(err) => {
                self.drop_link(&err);
                None
            }
        }
    }

    /// Write a single holding register. Returns whether the write went out;
    /// the caller decides whether the intended state change counts as
    /// applied. No retry: a failure drops the link into the cooldown.
    pub async fn write_register(
        &mut self,
        cache: &mut RegisterCache,
        address: u16,
        value: u16,
    ) -> bool {
        if !self.ensure_connected(cache).await {
            return false;
        }
        match self.session.write_single_register(address, value).await {
            Ok(()) => {
                cache.set(address, value);
                true
            }
            Err(err) => {
                warn!(
                    client_id = self.client_id,
                    register = address,
                    error = %err,
                    "error writing register"
                );
                self.drop_link(&err);
                false
            }
        }
    }

    /// Configure the remote watchdog timeout in milliseconds; 0 disables it.
    /// Used operationally and at shutdown (best-effort).
    pub async fn set_watchdog_timeout(&mut self, cache: &mut RegisterCache, millis: u16) -> bool {
        self.write_register(cache, REG_WATCHDOG_TIMEOUT, millis).await
    }

    fn drop_link(&mut self, err: &BridgeError) {
        warn!(
            client_id = self.client_id,
            error = %err,
            "transport failure, dropping link"
        );
        self.session.close();
        self.last_attempt = Some(Instant::now());
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &T {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut T {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{REG_CHARGING_STATE, REG_VOLTAGE_L1};
    use crate::testutil::FakeTransport;

    const TTL: Duration = Duration::from_millis(3000);

    fn link(fake: FakeTransport) -> (LinkManager<FakeTransport>, RegisterCache) {
        (
            LinkManager::new(fake, 1, DEFAULT_RETRY_COOLDOWN),
            RegisterCache::new(TTL),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_probes_device() {
        let (mut link, mut cache) = link(FakeTransport::wallbox(1, 0x108));

        assert!(link.refresh(&mut cache, false, false).await);
        assert!(link.is_connected());
        assert_eq!(link.layout_version(), 0x108);
        assert_eq!(link.hw_max_current(), 16);
        assert_eq!(link.hw_min_current(), 6);
        // Unlocked box at connect time means charging is allowed.
        assert!(link.is_allowed());
        // Standby control was forced to 4 and the watchdog disabled.
        let writes = &link.session().writes;
        assert!(writes.contains(&(REG_STANDBY_CONTROL, STANDBY_DISABLED)));
        assert!(writes.contains(&(REG_WATCHDOG_TIMEOUT, 0)));
        assert_eq!(cache.get(REG_CHARGING_STATE), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_suppresses_reads() {
        let (mut link, mut cache) = link(FakeTransport::wallbox(1, 0x108));

        assert!(link.refresh(&mut cache, false, false).await);
        let reads_after_first = link.session().read_calls;

        // Within the TTL no transport read happens.
        tokio::time::advance(Duration::from_millis(2999)).await;
        assert!(link.refresh(&mut cache, false, false).await);
        assert_eq!(link.session().read_calls, reads_after_first);

        // Just past the TTL exactly one read cycle (4 block reads) runs.
        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(link.refresh(&mut cache, false, false).await);
        assert_eq!(link.session().read_calls, reads_after_first + 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_bypasses_ttl() {
        let (mut link, mut cache) = link(FakeTransport::wallbox(1, 0x108));

        assert!(link.refresh(&mut cache, false, false).await);
        let reads_after_first = link.session().read_calls;
        assert!(link.refresh(&mut cache, true, false).await);
        assert!(link.session().read_calls > reads_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cooldown_window() {
        let mut fake = FakeTransport::wallbox(1, 0x108);
        fake.fail_open = true;
        let (mut link, mut cache) = link(fake);

        assert!(!link.refresh(&mut cache, false, false).await);
        assert_eq!(link.session().open_attempts, 1);

        // Within the cooldown no further attempt is made.
        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(!link.refresh(&mut cache, false, false).await);
        assert_eq!(link.session().open_attempts, 1);

        // At the cooldown boundary exactly one new attempt occurs.
        tokio::time::advance(Duration::from_secs(1)).await;
        link.session_mut().fail_open = false;
        assert!(link.refresh(&mut cache, false, false).await);
        assert_eq!(link.session().open_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_known_values() {
        let (mut link, mut cache) = link(FakeTransport::wallbox(1, 0x108));
        link.session_mut().regs[usize::from(REG_VOLTAGE_L1)] = 230;

        assert!(link.refresh(&mut cache, false, false).await);
        assert_eq!(cache.get(REG_VOLTAGE_L1), 230);

        link.session_mut().fail_io = true;
        assert!(!link.refresh(&mut cache, true, false).await);
        assert!(!link.is_connected());
        // Stale but available.
        assert_eq!(cache.get(REG_VOLTAGE_L1), 230);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_layout_reads_watchdog_only() {
        let (mut link, mut cache) = link(FakeTransport::wallbox(1, 0x107));

        // A 3-register read at 257 would time out on layout 1.0.7; the
        // version gate keeps the refresh alive.
        assert!(link.refresh(&mut cache, false, false).await);
        assert_eq!(link.layout_version(), 0x107);
        // 259 was never readable, so the box counts as locked and charging
        // starts out disallowed.
        assert!(!link.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_drops_link() {
        let (mut link, mut cache) = link(FakeTransport::wallbox(1, 0x108));
        assert!(link.refresh(&mut cache, false, false).await);

        link.session_mut().fail_io = true;
        assert!(!link.write_register(&mut cache, REG_CURRENT_PRESET, 100).await);
        assert!(!link.is_connected());

        // Still inside the cooldown: the next write is a silent no-op.
        link.session_mut().fail_io = false;
        assert!(!link.write_register(&mut cache, REG_CURRENT_PRESET, 100).await);
        assert_eq!(link.session().writes.iter().filter(|w| w.0 == REG_CURRENT_PRESET).count(), 0);
    }
}
