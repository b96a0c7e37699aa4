//! The watcher policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};

use podwarden_actor::tunables::{duration, parse, parse_secs, require, require_secs};
use podwarden_actor::{Fields, Next, Policy, TunableError};
use podwarden_core::config::WatcherConfig;
use podwarden_portal::{commands, RemoteBridge};

use crate::alerts::{AlertBatch, AlertSink};
use crate::book::HealthBook;

/// Watcher timing. `period` and `wait` are seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WatchTunables {
    pub period: f64,
    /// Pause between samples.
    pub wait: f64,
    /// Stagnant samples tolerated before a failure is reported.
    pub checks: u32,
}

impl Default for WatchTunables {
    fn default() -> Self {
        Self::from(&WatcherConfig::default())
    }
}

impl From<&WatcherConfig> for WatchTunables {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            period: config.period,
            wait: config.wait,
            checks: config.checks,
        }
    }
}

impl WatchTunables {
    pub fn validate(&self) -> Result<(), TunableError> {
        require_secs("period", self.period)?;
        require_secs("wait", self.wait)?;
        require(self.period > f64::from(self.checks) * self.wait, || {
            format!(
                "a period of {}s does not allow for {} checks {}s apart",
                self.period, self.checks, self.wait
            )
        })
    }

    pub fn merged(&self, fields: &Fields) -> Result<Self, TunableError> {
        let mut next = *self;
        for (field, value) in fields {
            match field.as_str() {
                "period" => next.period = parse_secs(field, value)?,
                "wait" => next.wait = parse_secs(field, value)?,
                "checks" => next.checks = parse(field, value)?,
                other => return Err(TunableError::UnknownField(other.to_string())),
            }
        }
        next.validate()?;
        Ok(next)
    }
}

pub struct WatcherPolicy {
    tunables: WatchTunables,
    book: HealthBook,
    sink: Arc<dyn AlertSink>,
}

impl WatcherPolicy {
    pub fn new(tunables: WatchTunables, sink: Arc<dyn AlertSink>) -> Result<Self, TunableError> {
        tunables.validate()?;
        Ok(Self {
            tunables,
            book: HealthBook::new(tunables.checks),
            sink,
        })
    }

    pub fn book(&self) -> &HealthBook {
        &self.book
    }
}

#[async_trait]
impl Policy for WatcherPolicy {
    fn kind(&self) -> &'static str {
        "watcher"
    }

    fn period(&self) -> Duration {
        duration(self.tunables.period)
    }

    async fn cycle(&mut self, cluster: &str, bridge: &dyn RemoteBridge) -> anyhow::Result<Next> {
        let wait = duration(self.tunables.wait);
        let checks = self.tunables.checks;

        for check in 0..=checks {
            if check > 0 {
                tokio::time::sleep(wait).await;
            }
            match commands::grep(bridge, cluster).await {
                Ok(snapshot) => {
                    if snapshot.is_empty() {
                        warn!(cluster, "no pods matched");
                    }
                    self.book.observe(&snapshot);
                }
                Err(e) => warn!(cluster, check, error = %e, "sample skipped"),
            }
        }

        let alerts = self.book.close_cycle();
        if alerts.is_empty() {
            debug!(cluster, "nothing to report");
        } else {
            // Sinks may block on file I/O.
            let batch = AlertBatch::new(cluster, alerts);
            let sink = self.sink.clone();
            match tokio::task::spawn_blocking(move || sink.publish(&batch)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(cluster, error = %e, "failed to publish alerts"),
                Err(e) => error!(cluster, error = %e, "alert publisher panicked"),
            }
        }

        Ok(Next::Period)
    }

    fn update(&mut self, fields: &Fields) -> Result<(), TunableError> {
        self.tunables = self.tunables.merged(fields)?;
        self.book.set_checks(self.tunables.checks);
        Ok(())
    }

    fn reset(&mut self) {
        self.book.clear();
    }

    fn snapshot(&self) -> serde_json::Value {
        let clusters: serde_json::Map<String, serde_json::Value> = self
            .book
            .names()
            .filter_map(|name| {
                let record = self.book.record(name)?;
                Some((name.to_string(), serde_json::to_value(record).ok()?))
            })
            .collect();
        serde_json::json!({ "tunables": self.tunables, "clusters": clusters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwarden_portal::testing::ScriptedBridge;
    use serde_json::{json, Value};

    use crate::alerts::MemoryAlertSink;
    use crate::book::Activity;

    fn pods(states: &[(&str, u32, &str)]) -> Value {
        let map: serde_json::Map<String, Value> = states
            .iter()
            .map(|(name, i, s)| (format!("{name} #{i}"), json!({ "process": s })))
            .collect();
        Value::Object(map)
    }

    fn watcher(sink: &Arc<MemoryAlertSink>) -> WatcherPolicy {
        WatcherPolicy::new(
            WatchTunables {
                period: 60.0,
                wait: 10.0,
                checks: 3,
            },
            sink.clone(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn samples_checks_plus_one_times() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[("web", 0, "running")]));
        let sink = Arc::new(MemoryAlertSink::new());

        let started = tokio::time::Instant::now();
        let next = watcher(&sink).cycle("*", &bridge).await.unwrap();

        assert_eq!(next, Next::Period);
        assert_eq!(bridge.commands(), vec!["grep * -j".to_string(); 4]);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stagnant_cluster_is_published_once() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[("web", 0, "running"), ("web", 1, "dead")]));
        let sink = Arc::new(MemoryAlertSink::new());
        let mut policy = watcher(&sink);

        for _ in 0..3 {
            policy.cycle("*", &bridge).await.unwrap();
        }

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].watcher, "*");
        let health = batches[0].alerts["web"].health.as_ref().unwrap();
        assert_eq!(health.activity, Activity::Stagnant);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_samples_do_not_count() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[("web", 0, "running"), ("web", 1, "dead")]));
        bridge.push_failure("grep");
        let sink = Arc::new(MemoryAlertSink::new());
        let mut policy = watcher(&sink);

        policy.cycle("*", &bridge).await.unwrap();

        assert!(sink.batches().is_empty());
        let record = policy.book().record("web").unwrap();
        assert_eq!(record.activity, Activity::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_sample_reports_absence() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[("web", 0, "running")]));
        bridge.push_ok("grep", &pods(&[]));
        let sink = Arc::new(MemoryAlertSink::new());
        let mut policy = watcher(&sink);

        policy.cycle("*", &bridge).await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let web = &batches[0].alerts["web"];
        assert_eq!(web.lost_indices, Some(vec![0]));
        assert!(policy.book().record("web").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forgets_clusters() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[("web", 0, "running")]));
        let sink = Arc::new(MemoryAlertSink::new());
        let mut policy = watcher(&sink);

        policy.cycle("*", &bridge).await.unwrap();
        assert_eq!(policy.snapshot()["clusters"]["web"]["activity"], "stable");

        policy.reset();
        assert_eq!(policy.snapshot()["clusters"], json!({}));
    }

    /// Records the thread each batch was published from.
    #[derive(Default)]
    struct ThreadSink {
        threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl AlertSink for ThreadSink {
        fn publish(&self, _: &AlertBatch) -> Result<(), crate::alerts::SinkError> {
            if let Ok(mut threads) = self.threads.lock() {
                threads.push(std::thread::current().id());
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishing_stays_off_the_runtime_thread() {
        let bridge = ScriptedBridge::new();
        bridge.push_ok("grep", &pods(&[("web", 0, "running")]));
        bridge.push_ok("grep", &pods(&[]));
        let sink = Arc::new(ThreadSink::default());
        let mut policy = WatcherPolicy::new(WatchTunables::default(), sink.clone()).unwrap();

        policy.cycle("*", &bridge).await.unwrap();

        let threads = sink.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[test]
    fn seconds_out_of_range_are_rejected() {
        let sink: Arc<dyn AlertSink> = Arc::new(MemoryAlertSink::new());
        let huge = WatchTunables {
            period: 1e20,
            ..WatchTunables::default()
        };
        assert!(matches!(
            WatcherPolicy::new(huge, sink.clone()),
            Err(TunableError::InvalidValue { .. })
        ));

        let mut policy = WatcherPolicy::new(WatchTunables::default(), sink).unwrap();
        let mut fields = Fields::new();
        fields.insert("wait".into(), "NaN".into());
        assert!(matches!(policy.update(&fields), Err(TunableError::InvalidValue { .. })));
        assert_eq!(policy.period(), Duration::from_secs(60));
    }

    #[test]
    fn period_must_cover_the_checks() {
        let sink: Arc<dyn AlertSink> = Arc::new(MemoryAlertSink::new());
        let tight = WatchTunables {
            period: 30.0,
            wait: 10.0,
            checks: 3,
        };
        assert!(matches!(
            WatcherPolicy::new(tight, sink.clone()),
            Err(TunableError::Precondition(_))
        ));

        let mut policy = WatcherPolicy::new(WatchTunables::default(), sink).unwrap();
        let mut fields = Fields::new();
        fields.insert("checks".into(), "6".into());
        assert!(matches!(policy.update(&fields), Err(TunableError::Precondition(_))));

        fields.insert("wait".into(), "5".into());
        policy.update(&fields).unwrap();
        assert_eq!(policy.snapshot()["tunables"]["checks"], 6);
    }
}
