//! Rotation schedule types and value generation.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use std::time::Duration;

/// Default interval between rotations of a scheduled secret
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// How often the background task looks for due rotations
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a replacement value for `key`.
///
/// The shape follows the key name: passwords get a 32-byte token, API keys
/// an `ak_` prefixed token, everything else a 48-byte token. All values are
/// URL-safe base64 without padding.
pub fn generate_secret_value(key: &str) -> String {
    let lower = key.to_ascii_lowercase();
    if lower.contains("password") {
        random_token(32)
    } else if lower.contains("api_key") || lower.contains("apikey") {
        format!("ak_{}", random_token(32))
    } else {
        random_token(48)
    }
}

/// A secret registered for periodic rotation
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledRotation {
    pub key: String,
    #[serde(with = "interval_secs")]
    pub interval: Duration,
    pub next_rotation: DateTime<Utc>,
    pub last_rotated: Option<DateTime<Utc>>,
    /// Error of the most recent failed attempt, cleared on success
    pub last_error: Option<String>,
}

impl ScheduledRotation {
    pub fn new(key: impl Into<String>, interval: Duration) -> Self {
        Self {
            key: key.into(),
            interval,
            next_rotation: advance(Utc::now(), interval),
            last_rotated: None,
            last_error: None,
        }
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.next_rotation <= now
    }

    /// Record a successful rotation.
    ///
    /// A zero interval only makes the first rotation due at once; later
    /// rotations follow [`DEFAULT_ROTATION_INTERVAL`].
    pub fn rotated_at(&mut self, now: DateTime<Utc>) {
        self.last_rotated = Some(now);
        self.next_rotation = advance(now, self.period());
        self.last_error = None;
    }

    /// Interval applied after a successful rotation
    pub fn period(&self) -> Duration {
        if self.interval.is_zero() {
            DEFAULT_ROTATION_INTERVAL
        } else {
            self.interval
        }
    }
}

fn advance(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

mod interval_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Outcome of one rotation scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct RotationReport {
    pub rotated: Vec<String>,
    /// Keys that stayed due, with the reason
    pub failed: Vec<(String, String)>,
}

impl RotationReport {
    pub fn is_empty(&self) -> bool {
        self.rotated.is_empty() && self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_shape_follows_key() {
        let password = generate_secret_value("database/password");
        assert_eq!(password.len(), 43);

        let api_key = generate_secret_value("stripe/API_KEY");
        assert!(api_key.starts_with("ak_"));

        let generic = generate_secret_value("session_secret");
        assert_eq!(generic.len(), 64);
        assert!(!generic.contains('='));
    }

    #[test]
    fn test_values_are_random() {
        assert_ne!(generate_secret_value("token"), generate_secret_value("token"));
    }

    #[test]
    fn test_schedule_advances_only_on_success() {
        let mut schedule = ScheduledRotation::new("token", Duration::from_secs(60));
        let now = Utc::now();
        assert!(!schedule.is_due_at(now));
        assert!(schedule.is_due_at(now + chrono::Duration::seconds(61)));

        let later = now + chrono::Duration::seconds(120);
        schedule.rotated_at(later);
        assert_eq!(schedule.last_rotated, Some(later));
        assert_eq!(schedule.next_rotation, later + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_zero_interval_is_due_once_then_uses_default() {
        let mut schedule = ScheduledRotation::new("token", Duration::ZERO);
        let now = Utc::now();
        assert!(schedule.is_due_at(now));

        schedule.rotated_at(now);
        assert!(!schedule.is_due_at(now));
        assert_eq!(schedule.period(), DEFAULT_ROTATION_INTERVAL);
        assert_eq!(schedule.next_rotation, now + chrono::Duration::days(30));
    }
}
