//! Per-resource checking leases.

use crate::error::MetadataResult;
use crate::models::CheckingLease;
use async_trait::async_trait;
use std::time::Duration;
use time::OffsetDateTime;

/// TTL-based lease scoping one resource's check cycle.
///
/// A lease is granted when none is held or the held one has expired, and,
/// unless `immediate`, when the last check started at least `interval` ago.
/// A crashed holder therefore blocks checking for at most `interval`.
#[async_trait]
pub trait LeaseRepo: Send + Sync {
    /// Non-blocking probe. `None` means the lease is unavailable.
    async fn acquire_checking_lease(
        &self,
        resource_id: i64,
        interval: Duration,
        immediate: bool,
    ) -> MetadataResult<Option<CheckingLease>>;

    /// Release a lease. Returns `false` if it had already expired and been
    /// taken by someone else.
    async fn release_checking_lease(&self, lease: &CheckingLease) -> MetadataResult<bool>;
}

/// Current wall-clock time in unix milliseconds.
pub(crate) fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

pub(crate) fn interval_ms(interval: Duration) -> i64 {
    i64::try_from(interval.as_millis()).unwrap_or(i64::MAX)
}
