use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One issued token for one logical key.
///
/// Records are immutable: a new issuance replaces the record instead of
/// editing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// 40 uppercase hex characters
    pub token: String,

    /// Issuance time
    pub created: DateTime<Utc>,

    /// Instant from which the token no longer verifies
    pub expires: DateTime<Utc>,
}

impl TokenRecord {
    /// Expiry saturates at the latest representable instant.
    pub fn new(token: String, created: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            token,
            created,
            expires: created
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Active iff `now < expires`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires
    }

    /// Active with at least `skew` of lifetime left.
    pub fn is_reusable(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now.checked_add_signed(skew)
            .is_some_and(|deadline| deadline < self.expires)
    }
}

/// All tokens of one session, keyed by logical key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMap {
    records: BTreeMap<String, TokenRecord>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&TokenRecord> {
        self.records.get(key)
    }

    /// Insert or replace the record for `key`.
    pub fn insert(&mut self, key: impl Into<String>, record: TokenRecord) -> Option<TokenRecord> {
        self.records.insert(key.into(), record)
    }

    /// The record for `key` if it may still be handed out.
    pub fn reusable(&self, key: &str, now: DateTime<Utc>, skew: Duration) -> Option<&TokenRecord> {
        self.records.get(key).filter(|r| r.is_reusable(now, skew))
    }

    /// Drop inactive records. Returns how many were removed.
    pub fn retain_active(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_active(now));
        before - self.records.len()
    }

    /// Latest expiry across all records.
    pub fn latest_expiry(&self) -> Option<DateTime<Utc>> {
        self.records.values().map(|r| r.expires).max()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub(crate) fn records(&self) -> &BTreeMap<String, TokenRecord> {
        &self.records
    }
}

impl FromIterator<(String, TokenRecord)> for TokenMap {
    fn from_iter<I: IntoIterator<Item = (String, TokenRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str, created: DateTime<Utc>, minutes: i64) -> TokenRecord {
        TokenRecord::new(token.to_string(), created, Duration::minutes(minutes))
    }

    #[test]
    fn test_activity_is_strict() {
        let now = Utc::now();
        let rec = record("A", now, 15);

        assert!(rec.is_active(now));
        assert!(rec.is_active(now + Duration::minutes(15) - Duration::milliseconds(1)));
        assert!(!rec.is_active(now + Duration::minutes(15)));
    }

    #[test]
    fn test_skew_shortens_reuse_window() {
        let now = Utc::now();
        let rec = TokenRecord::new("A".into(), now, Duration::seconds(30));

        assert!(rec.is_active(now));
        assert!(!rec.is_reusable(now, Duration::seconds(60)));
        assert!(rec.is_reusable(now, Duration::seconds(10)));
        assert!(rec.is_reusable(now, Duration::zero()));
    }

    #[test]
    fn test_expiry_saturates_near_max_instant() {
        let near_end = DateTime::<Utc>::MAX_UTC - Duration::minutes(1);
        let rec = TokenRecord::new("A".into(), near_end, Duration::days(365));

        assert_eq!(rec.expires, DateTime::<Utc>::MAX_UTC);
        assert!(rec.is_active(near_end));
        assert!(!rec.is_reusable(near_end, Duration::days(1)));
    }

    #[test]
    fn test_retain_active() {
        let now = Utc::now();
        let mut map = TokenMap::new();
        map.insert("live", record("A", now, 15));
        map.insert("dead", record("B", now - Duration::minutes(30), 15));

        assert_eq!(map.retain_active(now), 1);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["live"]);
        assert_eq!(map.retain_active(now), 0);
    }

    #[test]
    fn test_latest_expiry() {
        let now = Utc::now();
        let mut map = TokenMap::new();
        assert_eq!(map.latest_expiry(), None);

        map.insert("a", record("A", now, 5));
        map.insert("b", record("B", now, 20));
        assert_eq!(map.latest_expiry(), Some(now + Duration::minutes(20)));
    }
}
