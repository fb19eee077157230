use std::time::{SystemTime, UNIX_EPOCH};

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::BigInt;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};

/// Milliseconds since the unix epoch.
///
/// Signed so it maps straight onto the `BIGINT` columns it round-trips
/// through; on the wire it serializes as a bare number. Only the handful of
/// operations the presence engine and pagination need are provided.
#[derive(
    AsExpression,
    FromSqlRow,
    Clone,
    Copy,
    Debug,
    Default,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
)]
#[diesel(sql_type = BigInt)]
#[serde(transparent)]
pub struct UnixMillis(pub i64);

impl UnixMillis {
    /// The current wall-clock time. Saturates rather than panicking when the
    /// clock sits before the epoch or past the representable range.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    pub fn as_secs(&self) -> i64 {
        self.0 / 1000
    }

    /// Milliseconds elapsed between `earlier` and `self`, zero if the clock
    /// went backwards.
    pub fn since(&self, earlier: UnixMillis) -> i64 {
        (self.0 - earlier.0).max(0)
    }
}

impl FromSql<BigInt, Pg> for UnixMillis {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        <i64 as FromSql<BigInt, Pg>>::from_sql(value).map(Self)
    }
}

impl ToSql<BigInt, Pg> for UnixMillis {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <i64 as ToSql<BigInt, Pg>>::to_sql(&self.0, out)
    }
}

#[cfg(test)]
mod tests {
    use super::UnixMillis;

    #[test]
    fn since_saturates_on_backwards_clock() {
        let earlier = UnixMillis(10_000);
        let later = UnixMillis(12_500);
        assert_eq!(later.since(earlier), 2_500);
        assert_eq!(earlier.since(later), 0);
    }

    #[test]
    fn serde_is_transparent() {
        let ts = UnixMillis(1_700_000_000_000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1700000000000");
        let back: UnixMillis = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn seconds_truncate_toward_zero() {
        assert_eq!(UnixMillis(1_999).as_secs(), 1);
        assert_eq!(UnixMillis(0).as_secs(), 0);
    }
}
