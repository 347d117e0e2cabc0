// Discovery tuning knobs
// Defaults match the production timings; tests shrink them to keep runs fast

use std::env;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Namespace constant embedded in every announcement. Peers ignore
/// traffic carrying any other value, which keeps unrelated multicast
/// chatter out of the registry.
pub const SERVICE_ID: &str = "12345678-1234-5678-1234-567812345678";

/// Multicast group announcements are sent to.
pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// UDP port the discovery socket binds and announces on.
pub const DISCOVERY_PORT: u16 = 55555;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Application namespace carried in the wire envelope
    pub service_id: String,
    /// Multicast group address
    pub multicast_addr: Ipv4Addr,
    /// UDP port for bind and announcements
    pub port: u16,
    /// How often the self-announcement goes out
    pub announce_interval: Duration,
    /// How often each registry runs its heartbeat sweep
    pub sweep_interval: Duration,
    /// Quiet time after which a sighting starts missing heartbeats
    pub degrade_threshold: Duration,
    /// Quiet time after which a sighting is evicted
    pub expiry_window: Duration,
    /// Missed heartbeats before a sighting is flagged degraded
    pub degraded_after_missed: u32,
    /// Pause before the single retry of a failed announcement send
    pub send_retry_delay: Duration,
    /// How long the self-test waits before polling for its own echo
    pub self_test_wait: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_id: SERVICE_ID.to_string(),
            multicast_addr: MULTICAST_ADDR,
            port: DISCOVERY_PORT,
            announce_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(3),
            degrade_threshold: Duration::from_secs(3),
            expiry_window: Duration::from_secs(10),
            degraded_after_missed: 3,
            send_retry_delay: Duration::from_secs(5),
            self_test_wait: Duration::from_secs(3),
        }
    }
}

impl DiscoveryConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            service_id: env::var("DISCOVERY_SERVICE_ID").unwrap_or_else(|_| SERVICE_ID.to_string()),
            multicast_addr: env::var("DISCOVERY_MULTICAST_ADDR")
                .unwrap_or_else(|_| MULTICAST_ADDR.to_string())
                .parse()?,
            port: env::var("DISCOVERY_PORT")
                .unwrap_or_else(|_| DISCOVERY_PORT.to_string())
                .parse()?,
            announce_interval: millis_var("DISCOVERY_ANNOUNCE_INTERVAL_MS", 5_000)?,
            sweep_interval: millis_var("DISCOVERY_SWEEP_INTERVAL_MS", 3_000)?,
            degrade_threshold: millis_var("DISCOVERY_DEGRADE_THRESHOLD_MS", 3_000)?,
            expiry_window: millis_var("DISCOVERY_EXPIRY_WINDOW_MS", 10_000)?,
            degraded_after_missed: env::var("DISCOVERY_DEGRADED_AFTER_MISSED")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            send_retry_delay: millis_var("DISCOVERY_SEND_RETRY_DELAY_MS", 5_000)?,
            self_test_wait: millis_var("DISCOVERY_SELF_TEST_WAIT_MS", 3_000)?,
        })
    }
}

fn millis_var(name: &str, default_ms: u64) -> anyhow::Result<Duration> {
    let ms: u64 = env::var(name)
        .unwrap_or_else(|_| default_ms.to_string())
        .parse()?;
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_production_timings() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.service_id, SERVICE_ID);
        assert_eq!(config.port, 55555);
        assert_eq!(config.multicast_addr, Ipv4Addr::new(239, 255, 255, 250));
        assert_eq!(config.announce_interval, Duration::from_secs(5));
        assert_eq!(config.sweep_interval, Duration::from_secs(3));
        assert_eq!(config.degrade_threshold, Duration::from_secs(3));
        assert_eq!(config.expiry_window, Duration::from_secs(10));
        assert_eq!(config.degraded_after_missed, 3);
    }

    #[test]
    fn test_from_env_falls_back_to_defaults() {
        // No DISCOVERY_* vars set in the test environment
        let config = DiscoveryConfig::from_env().unwrap();
        assert_eq!(config.port, DiscoveryConfig::default().port);
        assert_eq!(config.service_id, DiscoveryConfig::default().service_id);
    }
}
