use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::traits::DataController;

/// What a subscriber receives: either a value or the error that terminated the entry's channel.
pub type Delivery<DC> = Result<<DC as DataController>::Value, Arc<CacheError<<DC as DataController>::Error>>>;

/// A value as kept by a [`DurableStore`](crate::traits::DurableStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord<V> {
    pub value:      V,
    pub max_age:    Duration,
    pub created_at: DateTime<Utc>,
}

impl<V> StoredRecord<V> {
    pub fn new(value: V, max_age: Duration, created_at: DateTime<Utc>) -> Self {
        Self {
            value,
            max_age,
            created_at,
        }
    }

    /// `None` when the expiry doesn't fit into the calendar, i.e. the record never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        TimeDelta::from_std(self.max_age)
            .ok()
            .and_then(|age| self.created_at.checked_add_signed(age))
    }

    #[inline]
    pub fn is_outdated(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now >= expires_at)
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn outdated_exactly_at_expiry() {
        let record = StoredRecord::new("v", Duration::from_millis(1000), at(0));
        assert!(!record.is_outdated(at(999)));
        assert!(record.is_outdated(at(1000)));
        assert!(record.is_outdated(at(1500)));
    }

    #[test]
    fn zero_max_age_is_immediately_outdated() {
        let record = StoredRecord::new(1u32, Duration::ZERO, at(42));
        assert!(record.is_outdated(at(42)));
    }

    #[test]
    fn huge_max_age_never_expires() {
        let record = StoredRecord::new((), Duration::MAX, at(0));
        assert_eq!(record.expires_at(), None);
        assert!(!record.is_outdated(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn record_survives_serialization() {
        let record = StoredRecord::new(String::from("payload"), Duration::from_secs(30), at(1_700_000_000_000));
        let json = serde_json::to_string(&record).unwrap();
        let back: StoredRecord<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
