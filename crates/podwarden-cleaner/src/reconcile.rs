//! The cleaner policy.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use podwarden_actor::tunables::{duration, parse_secs, require, require_secs};
use podwarden_actor::{Fields, Next, Policy, TunableError};
use podwarden_core::config::CleanerConfig;
use podwarden_core::{ClusterSnapshot, ProcessStatus};
use podwarden_portal::{commands, RemoteBridge};

/// Cleaner timing, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CleanTunables {
    pub period: f64,
    /// Pause between the two samples of a cycle.
    pub wait: f64,
}

impl Default for CleanTunables {
    fn default() -> Self {
        Self::from(&CleanerConfig::default())
    }
}

impl From<&CleanerConfig> for CleanTunables {
    fn from(config: &CleanerConfig) -> Self {
        Self {
            period: config.period,
            wait: config.wait,
        }
    }
}

impl CleanTunables {
    pub fn validate(&self) -> Result<(), TunableError> {
        require_secs("period", self.period)?;
        require_secs("wait", self.wait)?;
        require(self.period > self.wait, || {
            format!("period ({}) must exceed wait ({})", self.period, self.wait)
        })
    }

    /// Copy with `fields` applied. The copy is validated before it is
    /// returned.
    pub fn merged(&self, fields: &Fields) -> Result<Self, TunableError> {
        let mut next = *self;
        for (field, value) in fields {
            match field.as_str() {
                "period" => next.period = parse_secs(field, value)?,
                "wait" => next.wait = parse_secs(field, value)?,
                other => return Err(TunableError::UnknownField(other.to_string())),
            }
        }
        next.validate()?;
        Ok(next)
    }
}

/// Dead and stopped indices of one sample.
#[derive(Debug, Default, PartialEq)]
struct Candidates {
    dead: BTreeSet<u32>,
    stopped: BTreeSet<u32>,
}

impl Candidates {
    fn of(snapshot: &ClusterSnapshot) -> Self {
        Self {
            dead: snapshot.indices_in(ProcessStatus::Dead),
            stopped: snapshot.indices_in(ProcessStatus::Stopped),
        }
    }

    /// Keep only what `later` confirms.
    fn confirmed_by(self, later: Candidates) -> Self {
        Self {
            dead: self.dead.intersection(&later.dead).copied().collect(),
            stopped: self.stopped.intersection(&later.stopped).copied().collect(),
        }
    }
}

pub struct CleanerPolicy {
    tunables: CleanTunables,
}

impl CleanerPolicy {
    pub fn new(tunables: CleanTunables) -> Result<Self, TunableError> {
        tunables.validate()?;
        Ok(Self { tunables })
    }

    pub fn tunables(&self) -> CleanTunables {
        self.tunables
    }

    async fn sample(&self, cluster: &str, bridge: &dyn RemoteBridge, which: &str) -> anyhow::Result<Candidates> {
        let snapshot = commands::grep(bridge, cluster)
            .await
            .with_context(|| format!("{which} sample of {cluster}"))?;
        Ok(Candidates::of(&snapshot))
    }
}

#[async_trait]
impl Policy for CleanerPolicy {
    fn kind(&self) -> &'static str {
        "cleaner"
    }

    fn period(&self) -> Duration {
        duration(self.tunables.period)
    }

    async fn cycle(&mut self, cluster: &str, bridge: &dyn RemoteBridge) -> anyhow::Result<Next> {
        let first = self.sample(cluster, bridge, "first").await?;
        tokio::time::sleep(duration(self.tunables.wait)).await;
        let second = self.sample(cluster, bridge, "second").await?;

        let confirmed = first.confirmed_by(second);
        debug!(
            cluster,
            dead = ?confirmed.dead,
            stopped = ?confirmed.stopped,
            "confirmed candidates"
        );

        if !confirmed.dead.is_empty() {
            let report = commands::kill(bridge, cluster, &confirmed.dead)
                .await
                .with_context(|| format!("kill in {cluster}"))?;
            let survivors = report.survivors(&confirmed.dead);
            if survivors.is_empty() {
                info!(cluster, indices = ?confirmed.dead, "killed dead pods");
            } else {
                warn!(
                    cluster,
                    requested = ?confirmed.dead,
                    survivors = ?survivors,
                    report = %report.raw,
                    "kill left pods behind"
                );
            }
        }

        if !confirmed.stopped.is_empty() {
            let report = commands::reset(bridge, cluster, &confirmed.stopped)
                .await
                .with_context(|| format!("reset in {cluster}"))?;
            if report.ok {
                info!(cluster, indices = ?confirmed.stopped, "reset stopped pods");
            } else {
                warn!(
                    cluster,
                    indices = ?confirmed.stopped,
                    report = %report.raw,
                    "reset failed"
                );
            }
        }

        Ok(Next::Period)
    }

    fn update(&mut self, fields: &Fields) -> Result<(), TunableError> {
        self.tunables = self.tunables.merged(fields)?;
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "tunables": self.tunables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use podwarden_actor::{ActorError, spawn};
    use podwarden_portal::testing::ScriptedBridge;
    use serde_json::{json, Value};

    const GLOB: &str = "ns.web*";

    fn pods(states: &[(u32, &str)]) -> Value {
        let map: serde_json::Map<String, Value> = states
            .iter()
            .map(|(i, s)| (format!("ns.web #{i}"), json!({ "process": s })))
            .collect();
        Value::Object(map)
    }

    fn policy() -> CleanerPolicy {
        CleanerPolicy::new(CleanTunables { period: 60.0, wait: 10.0 }).unwrap()
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn kills_only_pods_dead_in_both_samples() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[(0, "running"), (1, "dead"), (2, "dead"), (3, "dead")]));
        bridge.push_ok("grep", &pods(&[(0, "dead"), (1, "dead"), (2, "running"), (3, "dead")]));
        bridge.push_ok("kill", &json!({ GLOB: { "down": [1, 3] } }));

        let next = policy().cycle(GLOB, &bridge).await.unwrap();

        assert_eq!(next, Next::Period);
        assert_eq!(bridge.commands_starting("grep").len(), 2);
        assert_eq!(
            bridge.commands_starting("kill"),
            vec!["kill ns.web* -i 1 3 -j".to_string()]
        );
        assert!(bridge.commands_starting("reset").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_pods_are_left_alone() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[(0, "dead"), (1, "stopped")]));
        bridge.push_ok("grep", &pods(&[(0, "running"), (1, "running")]));

        policy().cycle(GLOB, &bridge).await.unwrap();

        assert!(bridge.commands_starting("kill").is_empty());
        assert!(bridge.commands_starting("reset").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_samples() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[(0, "running")]));

        let started = tokio::time::Instant::now();
        policy().cycle(GLOB, &bridge).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn clean_cluster_issues_no_mutation() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[(0, "running"), (1, "running")]));

        let mut policy = policy();
        for _ in 0..3 {
            policy.cycle(GLOB, &bridge).await.unwrap();
        }

        assert_eq!(bridge.commands().len(), 6);
        assert!(bridge.commands().iter().all(|c| c.starts_with("grep")));
    }

    #[tokio::test(start_paused = true)]
    async fn resets_confirmed_stopped_pods() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[(0, "stopped"), (4, "stopped")]));
        bridge.push_ok("reset", &json!({ GLOB: { "ok": true } }));

        policy().cycle(GLOB, &bridge).await.unwrap();

        assert_eq!(
            bridge.commands_starting("reset"),
            vec!["reset ns.web* -i 0 4 -j".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sample_aborts_the_cycle() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[(1, "dead")]));
        bridge.push_failure("grep");

        let err = policy().cycle(GLOB, &bridge).await.unwrap_err();

        assert!(format!("{err:#}").contains("second sample"));
        assert!(bridge.commands_starting("kill").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_kill_skips_reset() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[(1, "dead"), (2, "stopped")]));
        bridge.push_rejected("kill");
        bridge.push_ok("reset", &json!({ GLOB: { "ok": true } }));

        assert!(policy().cycle(GLOB, &bridge).await.is_err());
        assert!(bridge.commands_starting("reset").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_kill_is_not_an_error() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[(1, "dead"), (2, "dead")]));
        bridge.push_ok("kill", &json!({ GLOB: { "down": [1] } }));

        assert!(policy().cycle(GLOB, &bridge).await.is_ok());
        assert_eq!(bridge.commands_starting("kill").len(), 1);
    }

    #[test]
    fn construction_requires_period_above_wait() {
        let err = CleanerPolicy::new(CleanTunables { period: 10.0, wait: 10.0 }).err();
        assert!(matches!(err, Some(TunableError::Precondition(_))));
    }

    #[test]
    fn update_is_all_or_nothing() {
        let mut policy = policy();

        let err = policy.update(&fields(&[("period", "5")])).unwrap_err();
        assert!(matches!(err, TunableError::Precondition(_)));
        let err = policy.update(&fields(&[("period", "90"), ("speed", "1")])).unwrap_err();
        assert!(matches!(err, TunableError::UnknownField(_)));
        assert_eq!(policy.tunables(), CleanTunables { period: 60.0, wait: 10.0 });

        policy.update(&fields(&[("period", "5"), ("wait", "2")])).unwrap();
        assert_eq!(policy.tunables(), CleanTunables { period: 5.0, wait: 2.0 });
        assert_eq!(policy.period(), Duration::from_secs(5));
    }

    #[test]
    fn out_of_range_seconds_are_rejected() {
        let err = CleanerPolicy::new(CleanTunables { period: f64::INFINITY, wait: 10.0 }).err();
        assert!(matches!(err, Some(TunableError::InvalidValue { .. })));

        let mut policy = policy();
        let err = policy.update(&fields(&[("period", "1e20")])).unwrap_err();
        assert!(matches!(err, TunableError::InvalidValue { .. }));
        assert_eq!(policy.tunables().period, 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_period_update_keeps_the_actor_alive() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.push_ok("grep", &pods(&[(0, "running")]));
        let (handle, task) = spawn(GLOB, policy(), bridge.clone());

        // Sent mid-cycle: the ask times out, the update is applied after.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let err = handle.update(fields(&[("period", "1e20")])).await.unwrap_err();
        assert!(matches!(err, ActorError::NoResponse(_)));

        tokio::time::sleep(Duration::from_secs(13)).await;
        let err = handle.update(fields(&[("period", "1e20")])).await.unwrap_err();
        assert!(matches!(
            err,
            ActorError::Rejected { source: TunableError::InvalidValue { .. }, .. }
        ));

        tokio::time::sleep(Duration::from_secs(120)).await;

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.cycles, 3);
        assert_eq!(state.failed_cycles, 0);
        assert_eq!(state.policy["tunables"]["period"], 60.0);
        assert!(!task.is_finished());
    }

    #[test]
    fn defaults_follow_config() {
        assert_eq!(CleanTunables::default(), CleanTunables { period: 60.0, wait: 10.0 });
    }
}
