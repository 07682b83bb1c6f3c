// Worker constants
use std::time::Duration;

/// Sleep duration when no message is claimable (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep duration after a store error before retrying (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default delivery lease (30s). A delivery not settled within the lease is
/// redelivered by lease recovery.
pub const DEFAULT_LEASE_MS: i64 = 30_000;

/// How often lease recovery scans for expired deliveries (5s)
pub const LEASE_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);
