//! Autoscale policy: sampling, decision and the `scale` call.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use podwarden_actor::tunables::{duration, parse, parse_secs, require, require_secs};
use podwarden_actor::{Fields, Next, Policy, TunableError};
use podwarden_core::config::ScalerConfig;
use podwarden_core::ProcessStatus;
use podwarden_portal::{commands, RemoteBridge, ScaleReport};

use crate::pid::{Gains, PidState, PidStep};

/// Spacing between metric samples.
const SAMPLE_SPACING: Duration = Duration::from_secs(1);

/// A scaling decision for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleDecision {
    /// No successful sample this cycle.
    NoData,
    /// Average inside `[target - band, target + band]`.
    InBand,
    /// The law asked for a count outside `1..=limit`; memory untouched.
    OutOfRange(PidStep),
    /// Scale to `pods` instances; memory committed.
    ScaleTo { pods: u32, step: PidStep },
}

/// Runtime-adjustable autoscaler settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleTunables {
    pub target: f64,
    pub band: f64,
    pub k_p: f64,
    pub k_i: f64,
    pub k_d: f64,
    pub limit: u32,
    /// Seconds.
    pub period: f64,
    pub sample_reps: u32,
}

impl Default for ScaleTunables {
    fn default() -> Self {
        Self::from(&ScalerConfig::default())
    }
}

impl From<&ScalerConfig> for ScaleTunables {
    fn from(config: &ScalerConfig) -> Self {
        Self {
            target: config.target,
            band: config.band,
            k_p: config.k_p,
            k_i: config.k_i,
            k_d: config.k_d,
            limit: config.limit,
            period: config.period,
            sample_reps: config.sample_reps,
        }
    }
}

impl ScaleTunables {
    pub fn gains(&self) -> Gains {
        Gains {
            k_p: self.k_p,
            k_i: self.k_i,
            k_d: self.k_d,
        }
    }

    pub fn validate(&self) -> Result<(), TunableError> {
        require(self.target.is_finite() && self.target > 0.0, || {
            format!("target ({}) must be a positive number", self.target)
        })?;
        require(self.band.is_finite() && self.band >= 0.0, || {
            format!("band ({}) must be a non-negative number", self.band)
        })?;
        require(
            [self.k_p, self.k_i, self.k_d].iter().all(|k| k.is_finite()),
            || "gains must be finite".to_string(),
        )?;
        require_secs("period", self.period)?;
        require(self.period > f64::from(self.sample_reps), || {
            format!(
                "a period of {}s does not allow for {} one-second samples",
                self.period, self.sample_reps
            )
        })
    }

    /// Copy with `fields` applied, validated.
    pub fn merged(&self, fields: &Fields) -> Result<Self, TunableError> {
        let mut next = *self;
        for (field, value) in fields {
            match field.as_str() {
                "target" => next.target = parse(field, value)?,
                "band" => next.band = parse(field, value)?,
                "k_p" => next.k_p = parse(field, value)?,
                "k_i" => next.k_i = parse(field, value)?,
                "k_d" => next.k_d = parse(field, value)?,
                "limit" => next.limit = parse(field, value)?,
                "period" => next.period = parse_secs(field, value)?,
                "sample_reps" => next.sample_reps = parse(field, value)?,
                other => return Err(TunableError::UnknownField(other.to_string())),
            }
        }
        next.validate()?;
        Ok(next)
    }
}

/// Incremental mean over the successful samples of a cycle.
#[derive(Debug, Default, Clone, Copy)]
struct RunningMean {
    mean: f64,
    count: u32,
}

impl RunningMean {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / f64::from(self.count);
    }

    fn get(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }
}

pub struct AutoscalePolicy {
    tunables: ScaleTunables,
    metric: String,
    pid: PidState,
}

impl AutoscalePolicy {
    pub fn new(tunables: ScaleTunables, metric: impl Into<String>) -> Result<Self, TunableError> {
        tunables.validate()?;
        Ok(Self {
            tunables,
            metric: metric.into(),
            pid: PidState::default(),
        })
    }

    pub fn tunables(&self) -> ScaleTunables {
        self.tunables
    }

    pub fn pid(&self) -> PidState {
        self.pid
    }

    /// Decide on the cycle's average and commit the controller memory
    /// when the decision is accepted.
    pub fn evaluate(&mut self, average: Option<f64>) -> ScaleDecision {
        let Some(average) = average else {
            return ScaleDecision::NoData;
        };

        let t = &self.tunables;
        if (t.target - t.band..=t.target + t.band).contains(&average) {
            return ScaleDecision::InBand;
        }

        let step = self.pid.step(&t.gains(), t.target, average, t.period);
        if step.pods < 1 || step.pods > i64::from(t.limit) {
            return ScaleDecision::OutOfRange(step);
        }

        self.pid.commit(&step);
        ScaleDecision::ScaleTo {
            pods: step.pods as u32,
            step,
        }
    }

    /// Metric per running pod, or `None` when nothing runs yet.
    async fn sample(&self, cluster: &str, bridge: &dyn RemoteBridge) -> anyhow::Result<Option<f64>> {
        let status = commands::grep(bridge, cluster)
            .await
            .context("pre-scale grep")?;
        let running = status.count_in(ProcessStatus::Running);
        if running == 0 {
            return Ok(None);
        }

        let metrics = commands::poll(bridge, cluster)
            .await
            .context("metrics poll")?;
        Ok(Some(metrics.metric_sum(&self.metric) / running as f64))
    }
}

fn log_report(cluster: &str, pods: u32, report: &ScaleReport) {
    if report.failed() {
        warn!(cluster, pods, report = %report.raw, "scaling failed");
        return;
    }
    for (name, entry) in &report.clusters {
        info!(
            cluster,
            matched = %name,
            running = entry.running,
            requested = entry.requested,
            "scaled"
        );
    }
}

#[async_trait]
impl Policy for AutoscalePolicy {
    fn kind(&self) -> &'static str {
        "scaler"
    }

    fn period(&self) -> Duration {
        duration(self.tunables.period)
    }

    async fn cycle(&mut self, cluster: &str, bridge: &dyn RemoteBridge) -> anyhow::Result<Next> {
        let mut mean = RunningMean::default();
        for rep in 0..self.tunables.sample_reps {
            tokio::time::sleep(SAMPLE_SPACING).await;
            match self.sample(cluster, bridge).await {
                Ok(Some(per_pod)) => mean.push(per_pod),
                Ok(None) => warn!(cluster, rep, "no running pods yet"),
                Err(e) => warn!(cluster, rep, error = %format!("{e:#}"), "sample skipped"),
            }
        }

        let t = self.tunables;
        match self.evaluate(mean.get()) {
            ScaleDecision::NoData => warn!(cluster, "no usable sample this cycle"),
            ScaleDecision::InBand => debug!(cluster, average = mean.mean, "load within band"),
            ScaleDecision::OutOfRange(step) => debug!(
                cluster,
                average = mean.mean,
                pods = step.pods,
                limit = t.limit,
                "decision outside 1..=limit, ignored"
            ),
            ScaleDecision::ScaleTo { pods, step } => {
                info!(
                    cluster,
                    average = mean.mean,
                    error = step.error,
                    control = step.control,
                    pods,
                    "scaling"
                );
                match commands::scale(bridge, cluster, pods).await {
                    Ok(report) => log_report(cluster, pods, &report),
                    Err(e) => warn!(cluster, pods, error = %e, "scale request failed"),
                }
            }
        }

        let rest = (t.period - f64::from(t.sample_reps)).max(0.0);
        Ok(Next::SpinUntil(Instant::now() + duration(rest)))
    }

    fn update(&mut self, fields: &Fields) -> Result<(), TunableError> {
        self.tunables = self.tunables.merged(fields)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.pid = PidState::default();
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "tunables": self.tunables,
            "metric": self.metric,
            "pid": self.pid,
        })
    }
}
