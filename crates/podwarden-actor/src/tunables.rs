//! Helpers for whitelisted tunables merges.
//!
//! Policies copy their tunables, apply every field through these helpers,
//! validate the result and only then commit it. Unknown fields and values
//! that do not parse refuse the whole update.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{TunableError, TunableResult};

/// Upper bound for any period, wait or timeout, in seconds (one day).
pub const MAX_SECS: f64 = 86_400.0;

/// Parse `value` for `field`.
pub fn parse<T>(field: &str, value: &str) -> TunableResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| TunableError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a number of seconds within `0..=MAX_SECS`.
pub fn parse_secs(field: &str, value: &str) -> TunableResult<f64> {
    let secs: f64 = parse(field, value)?;
    require_secs(field, secs)?;
    Ok(secs)
}

/// Check that `secs` lies within `0..=MAX_SECS`. Used by `validate` so that
/// values from the config file get the same bound as admin updates.
pub fn require_secs(field: &str, secs: f64) -> TunableResult<()> {
    if (0.0..=MAX_SECS).contains(&secs) {
        return Ok(());
    }
    Err(TunableError::InvalidValue {
        field: field.to_string(),
        value: secs.to_string(),
        reason: format!("must be between 0 and {MAX_SECS} seconds"),
    })
}

/// `secs` as a [`Duration`], clamped to `0..=MAX_SECS`. NaN maps to zero.
pub fn duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_SECS)).unwrap_or(Duration::ZERO)
}

/// Fail with a precondition error unless `ok`.
pub fn require(ok: bool, message: impl FnOnce() -> String) -> TunableResult<()> {
    if ok {
        Ok(())
    } else {
        Err(TunableError::Precondition(message()))
    }
}
