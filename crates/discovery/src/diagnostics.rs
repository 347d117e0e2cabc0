// Human-readable reports for the two questions support asks first:
// "do we actually have the permissions?" and "does multicast work here?"

use crate::multicast::MulticastDiscovery;
use crate::permissions::{self, PermissionProvider};
use crate::platform;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

/// Per-permission status snapshot, formatted for a log or a support
/// ticket. Check failures are folded into the matching report line
/// rather than propagated; this function never fails.
pub async fn permission_report(provider: &dyn PermissionProvider) -> String {
    let mut report = String::from("===== PERMISSION REPORT =====\n");
    report.push_str(&format!(
        "Device: {} {}\n",
        platform::os_name(),
        platform::os_version()
    ));
    report.push_str("Permissions:\n");

    for permission in permissions::required_permissions() {
        match provider.check(permission).await {
            Ok(status) => report.push_str(&format!("- {}: {}\n", permission, status)),
            Err(e) => report.push_str(&format!("- {}: ERROR: {}\n", permission, e)),
        }
    }

    report
}

/// Outcome of a multicast self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulticastVerdict {
    /// The probe went out and came back; discovery should work here
    Working,
    /// The probe went out but never came back; something on the network
    /// is filtering multicast
    Blocked,
    /// The probe could not even be sent
    SendFailed,
}

impl MulticastVerdict {
    pub fn summary(&self) -> &'static str {
        match self {
            MulticastVerdict::Working => "Multicast is working",
            MulticastVerdict::Blocked => "Multicast appears blocked",
            MulticastVerdict::SendFailed => "Could not send on the network",
        }
    }
}

/// Self-test outcome plus the explanation shown to the user.
#[derive(Debug, Clone)]
pub struct SelfTestReport {
    pub verdict: MulticastVerdict,
    pub detail: String,
}

impl SelfTestReport {
    pub fn render(&self) -> String {
        format!(
            "===== MULTICAST SELF-TEST =====\n{}\n{}\n===============================",
            self.verdict.summary(),
            self.detail
        )
    }
}

/// Probe the multicast path end to end: send a loopback probe, give the
/// network `wait` to echo it back, then poll the registry for the probe's
/// transient sighting and report one of three outcomes.
pub async fn run_multicast_self_test(
    discovery: &MulticastDiscovery,
    wait: Duration,
) -> SelfTestReport {
    let test_id = match discovery.test_multicast_connectivity().await {
        Ok(test_id) => test_id,
        Err(e) => {
            return SelfTestReport {
                verdict: MulticastVerdict::SendFailed,
                detail: format!(
                    "Sending to the discovery group failed: {}. Check that WiFi is connected and try again.",
                    e
                ),
            };
        }
    };

    sleep(wait).await;

    let report = if discovery.registry().contains(&test_id).await {
        SelfTestReport {
            verdict: MulticastVerdict::Working,
            detail: "This device sent an announcement and received it back, so \
                     multicast works here. If peers are still not visible, check \
                     the other device: it must be on the same network, running \
                     the app, and announcing the same service."
                .to_string(),
        }
    } else {
        SelfTestReport {
            verdict: MulticastVerdict::Blocked,
            detail: "The announcement was sent but never received back. The access \
                     point is most likely isolating clients or filtering multicast, \
                     which is the usual setup on guest and public WiFi. Things to try:\n\
                     1. Switch to a different WiFi network\n\
                     2. Use a phone hotspot instead\n\
                     3. Disable any active VPN"
                .to_string(),
        }
    };

    info!(
        "Multicast self-test {}: {}",
        test_id,
        report.verdict.summary()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Permission, PermissionStatus, StaticPermissions};
    use crate::platform::TransportSupport;
    use crate::DiscoveryConfig;
    use std::sync::Arc;
    use storage::{LogStore, Storage};

    #[tokio::test]
    async fn test_permission_report_lists_every_required_permission() {
        let provider = StaticPermissions::granted();
        let report = permission_report(&provider).await;

        assert!(report.starts_with("===== PERMISSION REPORT ====="));
        assert!(report.contains("Device:"));
        assert!(report.contains("Permissions:"));
        for permission in permissions::required_permissions() {
            assert!(report.contains(&format!("- {}: GRANTED", permission)));
        }
    }

    #[tokio::test]
    async fn test_permission_report_shows_denials() {
        let provider = StaticPermissions::granted();
        provider
            .set(Permission::BluetoothScan, PermissionStatus::Denied)
            .await;

        let report = permission_report(&provider).await;
        assert!(report.contains("DENIED"));
    }

    #[test]
    fn test_verdict_summaries_are_distinct() {
        let summaries = [
            MulticastVerdict::Working.summary(),
            MulticastVerdict::Blocked.summary(),
            MulticastVerdict::SendFailed.summary(),
        ];
        let unique: std::collections::HashSet<_> = summaries.iter().collect();
        assert_eq!(unique.len(), summaries.len());
    }

    #[tokio::test]
    async fn test_self_test_without_socket_reports_send_failure() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        let logs = Arc::new(LogStore::new(storage));
        let discovery = MulticastDiscovery::with_support(
            logs,
            DiscoveryConfig::default(),
            TransportSupport::Supported,
        );

        // Never started, so there is no socket to send on
        let report = run_multicast_self_test(&discovery, Duration::from_millis(0)).await;
        assert_eq!(report.verdict, MulticastVerdict::SendFailed);
        assert!(report.render().contains("MULTICAST SELF-TEST"));
    }
}
