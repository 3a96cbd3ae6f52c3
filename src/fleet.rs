//! Fleet registry: the ordered collection of wallbox adapters behind the
//! HTTP boundary.
//!
//! An explicitly constructed object handed to the dispatcher by reference;
//! there is no process-wide wallbox state. Each adapter sits behind its own
//! async mutex, which gives the single-owner discipline the adapter requires
//! (at most one in-flight refresh or command per wallbox) while different
//! wallboxes proceed concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::BridgeConfig;
use crate::transport::{shared_port, SerialTransport, Transport};
use crate::wallbox::WallboxAdapter;

/// All configured wallboxes, addressed by 1-based client id. The id doubles
/// as the Modbus slave address and is fixed for the adapter's lifetime.
pub struct Fleet<T: Transport> {
    adapters: Vec<Mutex<WallboxAdapter<T>>>,
}

impl Fleet<SerialTransport> {
    /// Build the fleet described by the configuration: client ids
    /// `1..=instances`, all sharing one serial device. Connections are
    /// established lazily on first use.
    pub fn open(config: &BridgeConfig) -> Self {
        let bus_timeout = Duration::from_millis(config.wallbox.bus_timeout_ms);
        let cache_ttl = Duration::from_millis(config.wallbox.cache_ttl_ms);
        let cooldown = Duration::from_secs(config.wallbox.retry_cooldown_secs);
        let port = shared_port(config.wallbox.device.clone(), bus_timeout);

        let adapters = (1..=config.wallbox.instances.max(1))
            .map(|id| {
                let client_id = id as u8;
                let session = SerialTransport::new(Arc::clone(&port), client_id, bus_timeout);
                Mutex::new(WallboxAdapter::new(session, client_id, cache_ttl, cooldown))
            })
            .collect();
        Self { adapters }
    }
}

impl<T: Transport> Fleet<T> {
    /// Build a fleet from pre-constructed adapters, in client-id order
    /// starting at 1. Must not be empty.
    pub fn new(adapters: Vec<WallboxAdapter<T>>) -> Self {
        assert!(!adapters.is_empty(), "fleet needs at least one wallbox");
        Self {
            adapters: adapters.into_iter().map(Mutex::new).collect(),
        }
    }

    /// Number of wallboxes in the fleet.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// All valid client ids, in order.
    pub fn client_ids(&self) -> impl Iterator<Item = usize> {
        1..=self.adapters.len()
    }

    /// Look up a wallbox by 1-based client id. Out-of-range ids fall back to
    /// client 1, mirroring the HTTP addressing convention.
    pub fn adapter(&self, client_id: usize) -> &Mutex<WallboxAdapter<T>> {
        let index = if (1..=self.adapters.len()).contains(&client_id) {
            client_id - 1
        } else {
            0
        };
        &self.adapters[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::DEFAULT_RETRY_COOLDOWN;
    use crate::testutil::FakeTransport;
    use crate::wallbox::DEFAULT_CACHE_TTL;

    fn fleet(count: u8) -> Fleet<FakeTransport> {
        Fleet::new(
            (1..=count)
                .map(|id| {
                    WallboxAdapter::new(
                        FakeTransport::wallbox(u16::from(id), 0x108),
                        id,
                        DEFAULT_CACHE_TTL,
                        DEFAULT_RETRY_COOLDOWN,
                    )
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_lookup_by_client_id() {
        let fleet = fleet(3);
        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet.adapter(1).lock().await.client_id(), 1);
        assert_eq!(fleet.adapter(3).lock().await.client_id(), 3);
    }

    #[tokio::test]
    async fn test_out_of_range_defaults_to_first() {
        let fleet = fleet(2);
        assert_eq!(fleet.adapter(0).lock().await.client_id(), 1);
        assert_eq!(fleet.adapter(3).lock().await.client_id(), 1);
        assert_eq!(fleet.adapter(usize::MAX).lock().await.client_id(), 1);
    }

    #[test]
    fn test_client_ids_are_one_based() {
        let fleet = fleet(2);
        assert_eq!(fleet.client_ids().collect::<Vec<_>>(), vec![1, 2]);
    }
}
