//! The control-loop actor and its handle.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use podwarden_portal::RemoteBridge;

use crate::error::{ActorError, ActorResult, TunableError};
use crate::policy::{Fields, Next, Policy};

/// Default bound on every admin ask.
pub const ASK_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay used when `cycle start + period` is not representable.
const FALLBACK_DELAY: Duration = Duration::from_secs(60);

/// Messages an actor accepts from the outside.
enum Command {
    Update {
        fields: Fields,
        reply: oneshot::Sender<Result<(), TunableError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Retrieve {
        reply: oneshot::Sender<ActorState>,
    },
    Shutdown,
}

/// Pending wake-up of an actor.
#[derive(Debug, Clone, Copy)]
enum Wake {
    Tick(Instant),
    Spin(Instant),
}

impl Wake {
    fn at(self) -> Instant {
        match self {
            Self::Tick(at) | Self::Spin(at) => at,
        }
    }
}

enum Event {
    Command(Option<Command>),
    Wake,
}

/// What the actor will do next, as reported by `retrieve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Schedule {
    Tick { in_ms: u64 },
    Spin { in_ms: u64 },
    Stopped,
}

/// Answer to `retrieve`.
#[derive(Debug, Clone, Serialize)]
pub struct ActorState {
    pub cluster: String,
    pub kind: &'static str,
    pub schedule: Schedule,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub policy: serde_json::Value,
}

struct ControlLoop<P: Policy> {
    cluster: String,
    policy: P,
    bridge: Arc<dyn RemoteBridge>,
    rx: mpsc::UnboundedReceiver<Command>,
    /// `None` while stopped.
    wake: Option<Wake>,
    cycles: u64,
    failed_cycles: u64,
}

/// Start an actor for `cluster`. The first cycle starts immediately.
pub fn spawn<P: Policy>(
    cluster: impl Into<String>,
    policy: P,
    bridge: Arc<dyn RemoteBridge>,
) -> (ActorHandle, JoinHandle<()>) {
    let cluster = cluster.into();
    let kind = policy.kind();
    let (tx, rx) = mpsc::unbounded_channel();

    let actor = ControlLoop {
        cluster: cluster.clone(),
        policy,
        bridge,
        rx,
        wake: Some(Wake::Tick(Instant::now())),
        cycles: 0,
        failed_cycles: 0,
    };
    let task = tokio::spawn(actor.run());

    let handle = ActorHandle {
        cluster,
        kind,
        tx,
        timeout: ASK_TIMEOUT,
    };
    (handle, task)
}

impl<P: Policy> ControlLoop<P> {
    async fn run(mut self) {
        info!(cluster = %self.cluster, kind = self.policy.kind(), "control loop started");

        loop {
            let event = match self.wake {
                Some(wake) => tokio::select! {
                    biased;
                    command = self.rx.recv() => Event::Command(command),
                    _ = tokio::time::sleep_until(wake.at()) => Event::Wake,
                },
                None => Event::Command(self.rx.recv().await),
            };

            match event {
                Event::Wake => self.tick().await,
                Event::Command(None | Some(Command::Shutdown)) => break,
                Event::Command(Some(command)) => self.handle(command),
            }
        }

        info!(cluster = %self.cluster, kind = self.policy.kind(), "control loop stopped");
    }

    async fn tick(&mut self) {
        let kind = self.policy.kind();
        let started = Instant::now();
        self.cycles += 1;

        let outcome = AssertUnwindSafe(self.policy.cycle(&self.cluster, self.bridge.as_ref()))
            .catch_unwind()
            .await;

        let next = match outcome {
            Ok(Ok(next)) => next,
            Ok(Err(e)) => {
                self.failed_cycles += 1;
                warn!(cluster = %self.cluster, kind, error = %format!("{e:#}"), "cycle aborted");
                Next::Period
            }
            Err(panic) => {
                self.failed_cycles += 1;
                error!(
                    cluster = %self.cluster,
                    kind,
                    panic = %panic_message(panic.as_ref()),
                    "cycle panicked"
                );
                Next::Period
            }
        };

        let wake = match next {
            Next::Period => Wake::Tick(self.next_tick(started)),
            Next::SpinUntil(until) => Wake::Spin(until),
        };
        self.wake = Some(wake);

        debug!(
            cluster = %self.cluster,
            kind,
            cycle = self.cycles,
            elapsed_ms = started.elapsed().as_millis() as u64,
            next_in_ms = wake.at().saturating_duration_since(Instant::now()).as_millis() as u64,
            "cycle finished"
        );
    }

    fn next_tick(&self, started: Instant) -> Instant {
        let period = self.policy.period();
        started.checked_add(period).unwrap_or_else(|| {
            warn!(
                cluster = %self.cluster,
                kind = self.policy.kind(),
                ?period,
                fallback = ?FALLBACK_DELAY,
                "period out of range"
            );
            Instant::now() + FALLBACK_DELAY
        })
    }

    fn handle(&mut self, command: Command) {
        let kind = self.policy.kind();
        match command {
            Command::Update { fields, reply } => {
                let result = self.policy.update(&fields);
                match &result {
                    Ok(()) => {
                        info!(
                            cluster = %self.cluster,
                            kind,
                            fields = ?fields.keys().collect::<Vec<_>>(),
                            "tunables updated"
                        );
                        if self.wake.is_none() {
                            info!(cluster = %self.cluster, kind, "resuming");
                            self.wake = Some(Wake::Tick(Instant::now()));
                        }
                    }
                    Err(e) => warn!(cluster = %self.cluster, kind, error = %e, "update rejected"),
                }
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                if self.wake.take().is_some() {
                    info!(cluster = %self.cluster, kind, "stopped");
                }
                let _ = reply.send(());
            }
            Command::Reset { reply } => {
                self.policy.reset();
                info!(cluster = %self.cluster, kind, "decision state reset");
                let _ = reply.send(());
            }
            Command::Retrieve { reply } => {
                let _ = reply.send(self.state());
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    fn state(&self) -> ActorState {
        let now = Instant::now();
        let in_ms = |at: Instant| at.saturating_duration_since(now).as_millis() as u64;
        let schedule = match self.wake {
            Some(Wake::Tick(at)) => Schedule::Tick { in_ms: in_ms(at) },
            Some(Wake::Spin(at)) => Schedule::Spin { in_ms: in_ms(at) },
            None => Schedule::Stopped,
        };

        ActorState {
            cluster: self.cluster.clone(),
            kind: self.policy.kind(),
            schedule,
            cycles: self.cycles,
            failed_cycles: self.failed_cycles,
            policy: self.policy.snapshot(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Handle ────────────────────────────────────────────────────────

/// Cloneable address of a running actor.
#[derive(Clone, Debug)]
pub struct ActorHandle {
    cluster: String,
    kind: &'static str,
    tx: mpsc::UnboundedSender<Command>,
    timeout: Duration,
}

impl ActorHandle {
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Override the ask timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Merge tunables; resumes a stopped actor.
    pub async fn update(&self, fields: Fields) -> ActorResult<()> {
        self.ask(|reply| Command::Update { fields, reply })
            .await?
            .map_err(|source| ActorError::Rejected {
                cluster: self.cluster.clone(),
                source,
            })
    }

    /// Stop scheduling cycles. A cycle in flight finishes first.
    pub async fn stop(&self) -> ActorResult<()> {
        self.ask(|reply| Command::Stop { reply }).await
    }

    /// Clear the policy's decision memory.
    pub async fn reset(&self) -> ActorResult<()> {
        self.ask(|reply| Command::Reset { reply }).await
    }

    pub async fn retrieve(&self) -> ActorResult<ActorState> {
        self.ask(|reply| Command::Retrieve { reply }).await
    }

    /// Ask the actor task to exit once its current cycle is over.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> ActorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| ActorError::Closed(self.cluster.clone()))?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ActorError::Closed(self.cluster.clone())),
            Err(_) => Err(ActorError::NoResponse(self.cluster.clone())),
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Update { .. } => "update",
            Self::Stop { .. } => "stop",
            Self::Reset { .. } => "reset",
            Self::Retrieve { .. } => "retrieve",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use podwarden_portal::testing::ScriptedBridge;

    use crate::tunables;

    #[derive(Clone, Copy)]
    enum Mode {
        Quick,
        Busy(Duration),
        Fail,
        Panic,
        Spin(Duration),
        Hang,
    }

    struct Counter {
        period: Duration,
        mode: Mode,
        starts: Arc<Mutex<Vec<Instant>>>,
        resets: Arc<AtomicU32>,
        value: u32,
    }

    impl Counter {
        fn new(period_secs: u64, mode: Mode) -> Self {
            Self {
                period: Duration::from_secs(period_secs),
                mode,
                starts: Arc::default(),
                resets: Arc::default(),
                value: 0,
            }
        }
    }

    #[async_trait]
    impl Policy for Counter {
        fn kind(&self) -> &'static str {
            "counter"
        }

        fn period(&self) -> Duration {
            self.period
        }

        async fn cycle(&mut self, cluster: &str, bridge: &dyn RemoteBridge) -> anyhow::Result<Next> {
            self.starts.lock().unwrap().push(Instant::now());
            match self.mode {
                Mode::Quick => Ok(Next::Period),
                Mode::Busy(d) => {
                    tokio::time::sleep(d).await;
                    Ok(Next::Period)
                }
                Mode::Fail => anyhow::bail!("portal unreachable"),
                Mode::Panic => panic!("bad arithmetic"),
                Mode::Spin(d) => Ok(Next::SpinUntil(Instant::now() + d)),
                Mode::Hang => {
                    bridge.execute(&format!("grep {cluster} -j")).await?;
                    Ok(Next::Period)
                }
            }
        }

        fn update(&mut self, fields: &Fields) -> Result<(), TunableError> {
            let mut value = self.value;
            for (field, raw) in fields {
                match field.as_str() {
                    "value" => value = tunables::parse(field, raw)?,
                    other => return Err(TunableError::UnknownField(other.to_string())),
                }
            }
            self.value = value;
            Ok(())
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn snapshot(&self) -> serde_json::Value {
            serde_json::json!({ "value": self.value })
        }
    }

    fn bridge() -> Arc<dyn RemoteBridge> {
        Arc::new(ScriptedBridge::new())
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let counter = Counter::new(10, Mode::Quick);
        let starts = counter.starts.clone();
        let (handle, _task) = spawn("a.b*", counter, bridge());

        tokio::time::sleep(Duration::from_secs(25)).await;

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.cycles, 3);
        assert_eq!(state.kind, "counter");
        assert_eq!(starts.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn period_is_measured_from_cycle_start() {
        let counter = Counter::new(10, Mode::Busy(Duration::from_secs(4)));
        let starts = counter.starts.clone();
        let (_handle, _task) = spawn("a.b*", counter, bridge());

        tokio::time::sleep(Duration::from_secs(25)).await;

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        assert_eq!(starts[1] - starts[0], Duration::from_secs(10));
        assert_eq!(starts[2] - starts[1], Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_cycle_starts_next_immediately() {
        let counter = Counter::new(10, Mode::Busy(Duration::from_secs(12)));
        let starts = counter.starts.clone();
        let (_handle, _task) = spawn("a.b*", counter, bridge());

        tokio::time::sleep(Duration::from_secs(30)).await;

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts[1] - starts[0], Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycles_keep_scheduling() {
        let (handle, _task) = spawn("a.b*", Counter::new(5, Mode::Fail), bridge());

        tokio::time::sleep(Duration::from_secs(12)).await;

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.cycles, 3);
        assert_eq!(state.failed_cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_cycles_keep_scheduling() {
        let (handle, task) = spawn("a.b*", Counter::new(5, Mode::Panic), bridge());

        tokio::time::sleep(Duration::from_secs(12)).await;

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.cycles, 3);
        assert_eq!(state.failed_cycles, 3);
        assert!(!task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn spin_overrides_period() {
        let counter = Counter::new(60, Mode::Spin(Duration::from_secs(3)));
        let starts = counter.starts.clone();
        let (handle, _task) = spawn("a.b*", counter, bridge());

        tokio::time::sleep(Duration::from_millis(7500)).await;

        let state = handle.retrieve().await.unwrap();
        assert!(matches!(state.schedule, Schedule::Spin { .. }));
        assert_eq!(starts.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_period_falls_back() {
        let mut counter = Counter::new(10, Mode::Quick);
        counter.period = Duration::MAX;
        let starts = counter.starts.clone();
        let (handle, task) = spawn("a.b*", counter, bridge());

        tokio::time::sleep(FALLBACK_DELAY + Duration::from_secs(1)).await;

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.cycles, 2);
        assert!(matches!(state.schedule, Schedule::Tick { .. }));
        assert_eq!(starts.lock().unwrap().len(), 2);
        assert!(!task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_the_running_cycle_finish() {
        let counter = Counter::new(10, Mode::Busy(Duration::from_secs(4)));
        let starts = counter.starts.clone();
        let (handle, _task) = spawn("a.b*", counter, bridge());
        let patient = handle.clone().with_timeout(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let asked = Instant::now();
        patient.stop().await.unwrap();
        // Queued behind the cycle, which ends 4s after it started.
        assert_eq!(asked.elapsed(), Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(60)).await;

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.cycles, 1);
        assert_eq!(state.failed_cycles, 0);
        assert_eq!(state.schedule, Schedule::Stopped);
        assert_eq!(starts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_suppresses_ticks_and_update_resumes() {
        let counter = Counter::new(10, Mode::Quick);
        let starts = counter.starts.clone();
        let (handle, _task) = spawn("a.b*", counter, bridge());

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.schedule, Schedule::Stopped);
        assert_eq!(starts.lock().unwrap().len(), 1);

        handle.update(fields(&[("value", "7")])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.cycles, 2);
        assert_eq!(state.policy, serde_json::json!({ "value": 7 }));
        assert!(matches!(state.schedule, Schedule::Tick { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_update_changes_nothing() {
        let (handle, _task) = spawn("a.b*", Counter::new(10, Mode::Quick), bridge());

        let err = handle
            .update(fields(&[("value", "3"), ("bogus", "1")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActorError::Rejected { source: TunableError::UnknownField(_), .. }
        ));

        let state = handle.retrieve().await.unwrap();
        assert_eq!(state.policy, serde_json::json!({ "value": 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_reaches_the_policy() {
        let counter = Counter::new(10, Mode::Quick);
        let resets = counter.resets.clone();
        let (handle, _task) = spawn("a.b*", counter, bridge());

        handle.reset().await.unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        let state = handle.retrieve().await.unwrap();
        assert!(matches!(state.schedule, Schedule::Tick { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn retrieve_against_blocked_actor_times_out() {
        let scripted = Arc::new(ScriptedBridge::new());
        scripted.hang("grep");
        let (handle, _task) = spawn("a.b*", Counter::new(10, Mode::Hang), scripted.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scripted.commands().len(), 1);

        let started = Instant::now();
        let err = handle.retrieve().await.unwrap_err();
        assert!(matches!(err, ActorError::NoResponse(_)));
        assert_eq!(started.elapsed(), ASK_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_task() {
        let (handle, task) = spawn("a.b*", Counter::new(10, Mode::Quick), bridge());

        handle.shutdown();
        task.await.unwrap();

        assert!(matches!(handle.retrieve().await, Err(ActorError::Closed(_))));
    }
}
