//! Per-cluster health records and index ledgers.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use podwarden_core::{ClusterSnapshot, ClusterTally};

use crate::alerts::{Alert, Diagnostic, HealthReport};

/// Stability class of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Active,
    Stable,
    Fluctuating,
    Stagnant,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub activity: Activity,
    pub up: u32,
    pub down: u32,
    /// Stagnant samples still tolerated this cycle. Goes negative when a
    /// cluster stays stagnant past its allowance.
    pub remaining_checks: i64,
    pub report_next_failure: bool,
    pub report_recovery: bool,
    /// Raw status of the unhealthy pods at the last sample.
    pub diagnostic: BTreeMap<String, Value>,
}

impl HealthRecord {
    fn first_sighting(checks: u32) -> Self {
        Self {
            activity: Activity::Active,
            up: 0,
            down: 0,
            remaining_checks: i64::from(checks),
            report_next_failure: true,
            report_recovery: false,
            diagnostic: BTreeMap::new(),
        }
    }

    fn report(&self, with_diagnostic: bool) -> HealthReport {
        HealthReport {
            activity: self.activity,
            up: self.up,
            down: self.down,
            diagnostic: with_diagnostic.then(|| Diagnostic::Pods(self.diagnostic.clone())),
        }
    }
}

/// Health state of every cluster name one watcher has seen.
#[derive(Debug, Clone, Default)]
pub struct HealthBook {
    checks: u32,
    records: BTreeMap<String, HealthRecord>,
    ledgers: BTreeMap<String, BTreeSet<u32>>,
    /// Alerts raised by samples since the last `close_cycle`.
    pending: BTreeMap<String, Alert>,
}

impl HealthBook {
    pub fn new(checks: u32) -> Self {
        Self {
            checks,
            ..Self::default()
        }
    }

    /// Applies from the next first sighting or cycle close.
    pub fn set_checks(&mut self, checks: u32) {
        self.checks = checks;
    }

    pub fn record(&self, name: &str) -> Option<&HealthRecord> {
        self.records.get(name)
    }

    pub fn indices(&self, name: &str) -> Option<&BTreeSet<u32>> {
        self.ledgers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Forget everything, including alerts not yet published.
    pub fn clear(&mut self) {
        self.records.clear();
        self.ledgers.clear();
        self.pending.clear();
    }

    /// Fold one sample into the book.
    pub fn observe(&mut self, snapshot: &ClusterSnapshot) {
        let tallies = snapshot.tally();

        for (name, tally) in &tallies {
            self.analyse_indices(name, &tally.indices);
            self.classify(name, tally, snapshot.unhealthy_in(name));
        }

        let gone: Vec<String> = self
            .records
            .keys()
            .filter(|name| !tallies.contains_key(*name))
            .cloned()
            .collect();
        for name in gone {
            self.drop_absent(name);
        }
    }

    fn raise(&mut self, name: &str, alert: Alert) {
        self.pending.entry(name.to_string()).or_default().merge(alert);
    }

    fn analyse_indices(&mut self, name: &str, current: &BTreeSet<u32>) {
        let Some(stored) = self.ledgers.get(name) else {
            self.ledgers.insert(name.to_string(), current.clone());
            return;
        };

        let mut alert = Alert::default();
        if let Some(&base) = stored.first() {
            if !current.contains(&base) {
                let new_base = current
                    .first()
                    .map_or_else(|| "None".to_string(), |i| format!("#{i}"));
                alert.index_changed_base = Some(format!("#{base} to {new_base}"));
            }
        }
        let lost: Vec<u32> = stored.difference(current).copied().collect();
        if !lost.is_empty() {
            alert.indices_lost = Some(lost);
        }

        self.ledgers.insert(name.to_string(), current.clone());
        if alert != Alert::default() {
            debug!(cluster = name, ?alert, "index change");
            self.raise(name, alert);
        }
    }

    fn classify(&mut self, name: &str, tally: &ClusterTally, diagnostic: BTreeMap<String, Value>) {
        let checks = i64::from(self.checks);
        let Some(record) = self.records.get_mut(name) else {
            let record = HealthRecord {
                up: tally.up,
                down: tally.down,
                diagnostic,
                ..HealthRecord::first_sighting(self.checks)
            };
            self.records.insert(name.to_string(), record);
            return;
        };

        if tally.down == 0 && tally.up == record.up {
            record.activity = Activity::Stable;
        } else if tally.down == 0 {
            record.activity = Activity::Active;
            record.remaining_checks = checks;
        } else if tally.up != record.up || tally.down != record.down {
            record.activity = Activity::Fluctuating;
        } else {
            record.remaining_checks -= 1;
            record.activity = Activity::Stagnant;
        }

        record.up = tally.up;
        record.down = tally.down;
        record.diagnostic = diagnostic;
    }

    fn drop_absent(&mut self, name: String) {
        self.records.remove(&name);
        let indices: Vec<u32> = self
            .ledgers
            .remove(&name)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        let base = indices
            .first()
            .map_or_else(|| "None".to_string(), |i| format!("#{i}"));
        let alert = Alert {
            index_changed_base: Some(format!("{base} to None")),
            lost_indices: Some(indices),
            health: Some(HealthReport {
                activity: Activity::Absent,
                up: 0,
                down: 0,
                diagnostic: Some(Diagnostic::LOST_CLUSTER),
            }),
            ..Alert::default()
        };
        debug!(cluster = %name, "cluster absent");
        self.raise(&name, alert);
    }

    /// Run the end-of-cycle alert pass and hand back every alert of the
    /// cycle, merged per name. Resets each record's check allowance.
    pub fn close_cycle(&mut self) -> BTreeMap<String, Alert> {
        let checks = i64::from(self.checks);
        let mut raised = Vec::new();

        for (name, record) in &mut self.records {
            let report = match record.activity {
                Activity::Stagnant if record.remaining_checks <= 0 && record.report_next_failure => {
                    record.report_next_failure = false;
                    record.report_recovery = true;
                    Some(record.report(true))
                }
                Activity::Fluctuating if record.report_next_failure => {
                    record.report_recovery = true;
                    Some(record.report(true))
                }
                Activity::Active | Activity::Stable if record.report_recovery => {
                    record.report_next_failure = true;
                    record.report_recovery = false;
                    Some(record.report(false))
                }
                _ => None,
            };
            if let Some(health) = report {
                raised.push((
                    name.clone(),
                    Alert {
                        health: Some(health),
                        ..Alert::default()
                    },
                ));
            }
            record.remaining_checks = checks;
        }

        for (name, alert) in raised {
            self.raise(&name, alert);
        }
        std::mem::take(&mut self.pending)
    }
}
