//! Per-identity throttle with minute, hour and day tiers.
//!
//! Minute resolution is kept as 60 buckets covering the current hour; the
//! hourly and daily counters are fixed windows reset at boundary crossings.
//!
//! The three cache entries are read and written independently, not as one
//! transaction. Concurrent bursts from the same identity can therefore be
//! slightly over- or under-counted; keep it that way rather than adding a
//! distributed lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tollgate_core::{CacheError, KeyValueCache};

use crate::RateLimits;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

const HOUR_TTL: Duration = Duration::from_secs(3600);
const DAY_TTL: Duration = Duration::from_secs(86_400);

/// Minute buckets of one hour, keyed by bucket start (epoch millis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MinuteBuckets {
    day: i64,
    slots: BTreeMap<i64, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct DailyCounter {
    day: i64,
    count: u64,
}

fn truncate(millis: i64, unit: i64) -> i64 {
    millis - millis.rem_euclid(unit)
}

/// 60 zeroed slots starting at `hour_start`.
fn hour_slots(hour_start: i64) -> BTreeMap<i64, u64> {
    (0..60).map(|k| (hour_start + k * MINUTE_MS, 0)).collect()
}

/// The hour has rolled over once the current minute has no slot.
fn is_end_of_hour(slots: &BTreeMap<i64, u64>, minute_bucket: i64) -> bool {
    !slots.contains_key(&minute_bucket)
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn KeyValueCache>,
    limits: RateLimits,
}

impl core::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimiter").field("limits", &self.limits).finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn KeyValueCache>, limits: RateLimits) -> Self {
        Self { cache, limits }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Count one request for `identity_key` at `request_time_millis`, or
    /// refuse it without counting.
    ///
    /// A cache failure lets the request through (logged); throttling is a
    /// protection, not an authentication step.
    pub fn is_allowed(&self, tenant_id: &str, identity_key: &str, request_time_millis: i64) -> bool {
        match self.check(tenant_id, identity_key, request_time_millis) {
            Ok(allowed) => {
                if !allowed {
                    tracing::debug!(tenant_id, identity_key, "rate limit reached");
                }
                allowed
            }
            Err(e) => {
                tracing::warn!(tenant_id, identity_key, error = %e, "rate limiter cache failure; allowing request");
                true
            }
        }
    }

    fn check(&self, tenant: &str, identity: &str, now_ms: i64) -> Result<bool, CacheError> {
        let minute_bucket = truncate(now_ms, MINUTE_MS);
        let hour_bucket = truncate(now_ms, HOUR_MS);
        let day_bucket = truncate(now_ms, DAY_MS);

        let minutes_key = format!("{identity}/rl-minutes");
        let hourly_key = format!("{identity}/rl-hourly");
        let daily_key = format!("{identity}/rl-daily");

        let minutes: Option<MinuteBuckets> = self.load(tenant, &minutes_key)?;
        let daily: Option<DailyCounter> = self.load(tenant, &daily_key)?;

        let end_of_day = minutes.as_ref().is_some_and(|m| m.day != day_bucket)
            || daily.is_some_and(|d| d.day != day_bucket);
        let end_of_hour = minutes
            .as_ref()
            .is_none_or(|m| is_end_of_hour(&m.slots, minute_bucket));

        if end_of_day || end_of_hour {
            let fresh = MinuteBuckets {
                day: day_bucket,
                slots: hour_slots(hour_bucket),
            };
            self.store(tenant, &minutes_key, &fresh, HOUR_TTL)?;
            self.store(tenant, &hourly_key, &0u64, HOUR_TTL)?;
            if end_of_day {
                let reset = DailyCounter { day: day_bucket, count: 0 };
                self.store(tenant, &daily_key, &reset, DAY_TTL)?;
            }
        }

        let mut minutes: MinuteBuckets = self.load(tenant, &minutes_key)?.unwrap_or_else(|| MinuteBuckets {
            day: day_bucket,
            slots: hour_slots(hour_bucket),
        });
        let hourly: u64 = self.load(tenant, &hourly_key)?.unwrap_or(0);
        let daily: DailyCounter = self
            .load(tenant, &daily_key)?
            .unwrap_or(DailyCounter { day: day_bucket, count: 0 });

        let per_minute = minutes.slots.get(&minute_bucket).copied().unwrap_or(0);
        if per_minute >= self.limits.per_minute
            || hourly >= self.limits.per_hour
            || daily.count >= self.limits.per_day
        {
            return Ok(false);
        }

        *minutes.slots.entry(minute_bucket).or_insert(0) += 1;
        self.store(tenant, &minutes_key, &minutes, HOUR_TTL)?;
        self.store(tenant, &hourly_key, &(hourly + 1), HOUR_TTL)?;
        let daily = DailyCounter {
            day: daily.day,
            count: daily.count + 1,
        };
        self.store(tenant, &daily_key, &daily, DAY_TTL)?;
        Ok(true)
    }

    /// An undecodable entry counts as absent so the next write replaces it.
    fn load<T: DeserializeOwned>(&self, tenant: &str, key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.cache.get(tenant, key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(tenant, key, error = %e, "discarding undecodable rate limit entry");
                Ok(None)
            }
        }
    }

    fn store<T: Serialize>(&self, tenant: &str, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(|e| CacheError::Decode(e.to_string()))?;
        self.cache.put(tenant, key, raw, Some(ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tollgate_core::InMemoryCache;

    /// 2024-01-01T10:00:00Z
    const T0: i64 = 1_704_103_200_000;

    fn limiter(per_minute: u64, per_hour: u64, per_day: u64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryCache::new()),
            RateLimits::new(per_minute, per_hour).with_per_day(per_day),
        )
    }

    #[test]
    fn minute_hour_and_day_boundaries() {
        let rl = limiter(2, 3, 5);
        let allowed = |t: i64| rl.is_allowed("app:acme", "u1", t);

        // same minute: 2 allowed, 3rd refused
        assert!(allowed(T0));
        assert!(allowed(T0 + 1_000));
        assert!(!allowed(T0 + 2_000));

        // next minute: minute count resets, hourly (2 of 3) persists
        assert!(allowed(T0 + MINUTE_MS));
        assert!(!allowed(T0 + MINUTE_MS + 1_000));

        // next hour: hourly resets, daily (3 of 5) persists
        assert!(allowed(T0 + HOUR_MS));
        assert!(allowed(T0 + HOUR_MS + 1_000));
        assert!(!allowed(T0 + HOUR_MS + MINUTE_MS));

        // next day: everything resets
        assert!(allowed(T0 + DAY_MS));
        assert!(allowed(T0 + DAY_MS + 1_000));
    }

    #[test]
    fn refused_requests_are_not_counted() {
        let rl = limiter(1, 100, 100);
        assert!(rl.is_allowed("t", "k", T0));
        for i in 1..10 {
            assert!(!rl.is_allowed("t", "k", T0 + i));
        }
        assert!(rl.is_allowed("t", "k", T0 + MINUTE_MS));
    }

    #[test]
    fn identities_and_tenants_are_independent() {
        let rl = limiter(1, 10, 10);
        assert!(rl.is_allowed("app:a", "u1", T0));
        assert!(!rl.is_allowed("app:a", "u1", T0));
        assert!(rl.is_allowed("app:a", "u2", T0));
        assert!(rl.is_allowed("app:b", "u1", T0));
    }

    #[test]
    fn default_limits_allow_ten_per_hour() {
        let rl = RateLimiter::new(Arc::new(InMemoryCache::new()), RateLimits::default());
        for i in 0..10 {
            assert!(rl.is_allowed("t", "k", T0 + i * MINUTE_MS));
        }
        assert!(!rl.is_allowed("t", "k", T0 + 10 * MINUTE_MS));
    }

    #[test]
    fn undecodable_counters_are_replaced() {
        for key in ["k/rl-minutes", "k/rl-hourly", "k/rl-daily"] {
            let cache = Arc::new(InMemoryCache::new());
            cache.put("t", key, "not json".to_string(), None).unwrap();
            let rl = RateLimiter::new(cache, RateLimits::new(1, 5));
            assert!(rl.is_allowed("t", "k", T0), "{key}");
            assert!(!rl.is_allowed("t", "k", T0 + 1_000), "{key} still failing open");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: "minute key absent from the stored hour's slots" is the
        /// same test as "the request's hour start differs from the stored one",
        /// for any request at or after the stored hour.
        #[test]
        fn end_of_hour_matches_hour_start_comparison(
            stored_hour in 0i64..10_000i64,
            offset in 0i64..(3 * HOUR_MS),
        ) {
            let hour_start = stored_hour * HOUR_MS;
            let now = hour_start + offset;
            let slots = hour_slots(hour_start);

            let by_absence = is_end_of_hour(&slots, truncate(now, MINUTE_MS));
            let by_hour_start = truncate(now, HOUR_MS) != hour_start;
            prop_assert_eq!(by_absence, by_hour_start);
        }

        /// Property: within one minute at most `per_minute` requests pass.
        #[test]
        fn never_exceeds_per_minute(per_minute in 1u64..10, attempts in 1usize..30) {
            let rl = limiter(per_minute, 1_000, 1_000);
            let passed = (0..attempts)
                .filter(|i| rl.is_allowed("t", "k", T0 + *i as i64))
                .count() as u64;
            prop_assert_eq!(passed, per_minute.min(attempts as u64));
        }
    }
}
