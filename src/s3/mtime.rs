//! Modification-time metadata encoding.
//!
//! The store has no mutable modification time, so it is kept in the
//! `mtime` metadata key as decimal seconds since the epoch with nine
//! fractional digits, e.g. `1445412480.000000001`.  Times before the
//! epoch carry a leading `-` on the whole value.

use chrono::{DateTime, Utc};

/// Metadata key holding the modification time.
pub const META_MTIME: &str = "mtime";

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Encode `t` as `<secs>.<9-digit nanos>`.
pub fn encode(t: DateTime<Utc>) -> String {
    let total = t.timestamp() as i128 * NANOS_PER_SEC + t.timestamp_subsec_nanos() as i128;
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    format!(
        "{sign}{}.{:09}",
        total / NANOS_PER_SEC,
        total % NANOS_PER_SEC
    )
}

/// Decode a value written by [`encode`].
///
/// Integer seconds and fractions of any length are accepted; digits past
/// nanoseconds are dropped.
pub fn decode(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (secs, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if secs.is_empty() && frac.is_empty() {
        return None;
    }
    if !secs.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let secs: i128 = if secs.is_empty() { 0 } else { secs.parse().ok()? };
    let mut nanos_text: String = frac.chars().take(9).collect();
    while nanos_text.len() < 9 {
        nanos_text.push('0');
    }
    let nanos: i128 = nanos_text.parse().ok()?;

    let mut total = secs.checked_mul(NANOS_PER_SEC)?.checked_add(nanos)?;
    if negative {
        total = -total;
    }
    let secs = i64::try_from(total.div_euclid(NANOS_PER_SEC)).ok()?;
    let nanos = total.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encode() {
        let t = Utc.timestamp_opt(1445412480, 1).unwrap();
        assert_eq!(encode(t), "1445412480.000000001");
        let t = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(encode(t), "0.000000000");
    }

    #[test]
    fn test_encode_before_epoch() {
        // 0.5s before the epoch.
        let t = Utc.timestamp_opt(-1, 500_000_000).unwrap();
        assert_eq!(encode(t), "-0.500000000");
        assert_eq!(decode("-0.500000000"), Some(t));
    }

    #[test]
    fn test_decode_variants() {
        assert_eq!(decode("10"), Some(Utc.timestamp_opt(10, 0).unwrap()));
        assert_eq!(decode("10.5"), Some(Utc.timestamp_opt(10, 500_000_000).unwrap()));
        assert_eq!(
            decode("10.1234567891"),
            Some(Utc.timestamp_opt(10, 123_456_789).unwrap())
        );
        assert_eq!(decode(".25"), Some(Utc.timestamp_opt(0, 250_000_000).unwrap()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("."), None);
        assert_eq!(decode("abc"), None);
        assert_eq!(decode("1.2.3"), None);
        assert_eq!(decode("1e9"), None);
    }

    #[test]
    fn test_nanosecond_precision_survives() {
        let t = Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(decode(&encode(t)), Some(t));
    }
}
