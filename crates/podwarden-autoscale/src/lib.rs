//! podwarden-autoscale — PID-driven cluster sizing.
//!
//! Each cycle averages a per-pod load metric (open `threads` by default)
//! over `sample_reps` one-second samples and, when the average leaves the
//! dead band around the target, feeds it through a PID law.
//!
//! # Control law
//!
//! ```text
//! avg        = mean over reps of metric_sum / running_pods
//! if |target - avg| <= band: nothing
//!
//! error      = target - avg
//! integral'  = integral + 0.5 * period * (prev_error + error)
//! derivative = (error - prev_error) / period
//! control    = k_p*error + k_i*integral' + k_d*derivative
//! pods       = ceil(control / target)
//!
//! if 1 <= pods <= limit:
//!     commit (prev_error, integral); scale <glob> -f @pods
//! ```
//!
//! A rejected decision leaves the controller memory untouched, so an
//! out-of-range control value never winds up the integral.

pub mod pid;
pub mod scaler;

pub use pid::{Gains, PidState, PidStep};
pub use scaler::{AutoscalePolicy, ScaleDecision, ScaleTunables};
