//! Configuration for the PBFT engine.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use validator::Validate;

/// Round-change backoff base; each failed round multiplies the timeout.
const TIMEOUT_RATE: f64 = 1.3;
/// Rounds beyond this share the round-10 timeout.
const MAX_ROUND_TIMEOUT: u64 = 10;

/// Configuration for the PBFT engine.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct PbftConfig {
    /// The base round-change timeout (milliseconds); grows exponentially with
    /// the round number.
    #[serde(
        deserialize_with = "deserialize_millis_to_duration",
        serialize_with = "serialize_duration_as_millis"
    )]
    pub request_timeout: Duration,
    /// The target block interval (seconds); also the tolerance for accepting
    /// proposals timestamped slightly in the future.
    #[serde(
        deserialize_with = "deserialize_seconds_to_duration",
        serialize_with = "serialize_duration_as_seconds"
    )]
    pub block_period: Duration,
    /// Whether this node speaks the light-proposal sub-protocol.
    pub light_mode: bool,
    /// Per-sender bound on buffered future messages.
    pub backlog_capacity: usize,
}

impl Default for PbftConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(10_000),
            block_period: Duration::from_secs(1),
            light_mode: false,
            backlog_capacity: 64,
        }
    }
}

impl PbftConfig {
    /// The round-change timeout for `round`:
    /// `request_timeout × 1.3^min(round, 10)`.
    pub fn round_change_timeout(&self, round: u64) -> Duration {
        let backoff = TIMEOUT_RATE.powi(i32::try_from(round.min(MAX_ROUND_TIMEOUT)).unwrap_or(0));
        self.request_timeout.mul_f64(backoff)
    }
}

fn deserialize_millis_to_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

fn serialize_duration_as_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

fn deserialize_seconds_to_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

fn serialize_duration_as_seconds<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}
