//! A small supervision tree.
//!
//! A [`Supervisor`] owns named units and four lists of lifecycle hooks. Running
//! it goes through these phases in order:
//!
//! ```text
//! pre-start ─► launch units ─► post-start ─► wait ─► cancel ─► pre-stop ─► join ─► post-stop
//! ```
//!
//! The wait ends when the token is cancelled or a unit fails. The first failure
//! is the one reported; anything after it is logged and dropped.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use thiserror::Error;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type UnitFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type UnitFn = Box<dyn FnOnce(CancellationToken) -> UnitFuture + Send>;
type HookFn = Box<dyn FnOnce() -> UnitFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreStart,
    PostStart,
    PreStop,
    PostStop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::PreStart => "pre-start",
            Phase::PostStart => "post-start",
            Phase::PreStop => "pre-stop",
            Phase::PostStop => "post-stop",
        })
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{phase} hook `{hook}` of `{supervisor}` failed: {source:#}")]
    HookFailed {
        supervisor: String,
        phase: Phase,
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unit `{unit}` failed: {source:#}")]
    UnitFailed {
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unit `{unit}` panicked")]
    UnitPanicked { unit: String },
}

pub struct Supervisor {
    name: String,
    units: Vec<(String, UnitFn)>,
    hooks: Vec<(Phase, String, HookFn)>,
}

impl Supervisor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit<F, Fut>(mut self, name: impl Into<String>, unit: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.units
            .push((name.into(), Box::new(move |token| -> UnitFuture { Box::pin(unit(token)) })));
        self
    }

    pub fn pre_start<F, Fut>(self, name: impl Into<String>, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(Phase::PreStart, name, hook)
    }

    pub fn post_start<F, Fut>(self, name: impl Into<String>, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(Phase::PostStart, name, hook)
    }

    pub fn pre_stop<F, Fut>(self, name: impl Into<String>, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(Phase::PreStop, name, hook)
    }

    pub fn post_stop<F, Fut>(self, name: impl Into<String>, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(Phase::PostStop, name, hook)
    }

    fn hook<F, Fut>(mut self, phase: Phase, name: impl Into<String>, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks
            .push((phase, name.into(), Box::new(move || -> UnitFuture { Box::pin(hook()) })));
        self
    }

    /// Wrap the whole tree as a unit of a parent supervisor.
    pub fn into_unit(self) -> impl FnOnce(CancellationToken) -> UnitFuture + Send + 'static {
        move |token| -> UnitFuture {
            Box::pin(async move { self.run(token).await.map_err(anyhow::Error::from) })
        }
    }

    /// Run every phase to completion. Cancelling `parent` starts an orderly
    /// shutdown; a failing unit does the same for this subtree only.
    pub async fn run(self, parent: CancellationToken) -> Result<(), SupervisorError> {
        let Supervisor { name, units, hooks } = self;
        let token = parent.child_token();
        let fatal = Fatal::default();

        let mut phases: HashMap<Phase, Vec<(String, HookFn)>> = HashMap::new();
        for (phase, hook, run) in hooks {
            phases.entry(phase).or_default().push((hook, run));
        }
        let mut take = |phase: Phase| phases.remove(&phase).unwrap_or_default();

        for (hook, run) in take(Phase::PreStart) {
            run().await.map_err(|source| SupervisorError::HookFailed {
                supervisor: name.clone(),
                phase: Phase::PreStart,
                hook,
                source,
            })?;
        }

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for (unit, run) in units {
            let handle = tasks.spawn(run(token.clone()));
            names.insert(handle.id(), unit);
        }
        info!(supervisor = %name, units = names.len(), "started");

        if run_hooks(&name, Phase::PostStart, take(Phase::PostStart), &fatal).await {
            token.cancel();
        }

        while !token.is_cancelled() {
            tokio::select! {
                _ = token.cancelled() => {}
                joined = tasks.join_next_with_id() => match joined {
                    Some(joined) => {
                        if let Some(err) = outcome(&names, joined) {
                            fatal.record(err);
                            token.cancel();
                        }
                    }
                    None => {
                        debug!(supervisor = %name, "no units left");
                        break;
                    }
                },
            }
        }

        token.cancel();
        info!(supervisor = %name, "stopping");
        run_hooks(&name, Phase::PreStop, take(Phase::PreStop), &fatal).await;

        while let Some(joined) = tasks.join_next_with_id().await {
            if let Some(err) = outcome(&names, joined) {
                fatal.record(err);
            }
        }
        run_hooks(&name, Phase::PostStop, take(Phase::PostStop), &fatal).await;

        match fatal.into_inner() {
            Some(err) => {
                error!(supervisor = %name, error = %err, "stopped with error");
                Err(err)
            }
            None => {
                info!(supervisor = %name, "stopped");
                Ok(())
            }
        }
    }
}

/// Run hooks in order. Returns true if any of them failed.
async fn run_hooks(
    supervisor: &str,
    phase: Phase,
    hooks: Vec<(String, HookFn)>,
    fatal: &Fatal,
) -> bool {
    let mut failed = false;
    for (hook, run) in hooks {
        if let Err(source) = run().await {
            failed = true;
            fatal.record(SupervisorError::HookFailed {
                supervisor: supervisor.to_string(),
                phase,
                hook,
                source,
            });
        }
    }
    failed
}

fn outcome(
    names: &HashMap<Id, String>,
    joined: Result<(Id, anyhow::Result<()>), JoinError>,
) -> Option<SupervisorError> {
    let name_of = |id: &Id| names.get(id).cloned().unwrap_or_else(|| id.to_string());
    match joined {
        Ok((id, Ok(()))) => {
            debug!(unit = %name_of(&id), "unit finished");
            None
        }
        Ok((id, Err(source))) => Some(SupervisorError::UnitFailed {
            unit: name_of(&id),
            source,
        }),
        Err(err) if err.is_panic() => Some(SupervisorError::UnitPanicked {
            unit: name_of(&err.id()),
        }),
        Err(err) => {
            debug!(unit = %name_of(&err.id()), "unit cancelled");
            None
        }
    }
}

/// Single-assignment slot for the error a supervisor reports.
#[derive(Default)]
struct Fatal(OnceLock<SupervisorError>);

impl Fatal {
    fn record(&self, err: SupervisorError) {
        if let Err(err) = self.0.set(err) {
            warn!(error = %err, "additional failure after the first, discarded");
        }
    }

    fn into_inner(self) -> Option<SupervisorError> {
        self.0.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn note(log: &Log, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    async fn fail(message: &'static str) -> anyhow::Result<()> {
        anyhow::bail!(message)
    }

    fn hook(log: &Log, entry: &'static str) -> impl FnOnce() -> UnitFuture + Send + 'static {
        let log = log.clone();
        move || -> UnitFuture {
            Box::pin(async move {
                note(&log, entry);
                anyhow::Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let log = Log::default();
        let token = CancellationToken::new();
        let supervisor = Supervisor::new("root")
            .pre_start("a", hook(&log, "pre-start"))
            .post_start("b", hook(&log, "post-start"))
            .pre_stop("c", hook(&log, "pre-stop"))
            .post_stop("d", hook(&log, "post-stop"))
            .unit("worker", {
                let log = log.clone();
                move |token: CancellationToken| async move {
                    note(&log, "unit up");
                    token.cancelled().await;
                    note(&log, "unit down");
                    anyhow::Ok(())
                }
            });

        let task = tokio::spawn(supervisor.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        task.await.unwrap().unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(log.first().map(String::as_str), Some("pre-start"));
        let pos = |entry: &str| log.iter().position(|e| e == entry).unwrap();
        assert!(pos("post-start") < pos("pre-stop"));
        assert!(pos("unit up") < pos("pre-stop"));
        assert!(pos("pre-stop") < pos("post-stop"));
        assert!(pos("unit down") < pos("post-stop"));
        assert_eq!(log.last().map(String::as_str), Some("post-stop"));
    }

    #[tokio::test]
    async fn test_pre_start_failure_aborts_start() {
        let log = Log::default();
        let supervisor = Supervisor::new("root")
            .pre_start("check", || fail("not ready"))
            .pre_start("later", hook(&log, "later hook"))
            .unit("worker", {
                let log = log.clone();
                move |_| async move {
                    note(&log, "unit ran");
                    anyhow::Ok(())
                }
            });

        let err = supervisor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::HookFailed { phase: Phase::PreStart, ref hook, .. } if hook == "check"
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_wins_and_stops_siblings() {
        let supervisor = Supervisor::new("root")
            .unit("flaky", |_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                fail("boom").await
            })
            .unit("grumpy", |token: CancellationToken| async move {
                token.cancelled().await;
                fail("failed while stopping").await
            });

        let err = supervisor.run(CancellationToken::new()).await.unwrap_err();
        match err {
            SupervisorError::UnitFailed { unit, source } => {
                assert_eq!(unit, "flaky");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_ok_keeps_siblings_running() {
        let token = CancellationToken::new();
        let stopped = Arc::new(Mutex::new(false));
        let supervisor = Supervisor::new("root")
            .unit("one-shot", |_| async { anyhow::Ok(()) })
            .unit("long-lived", {
                let stopped = stopped.clone();
                move |token: CancellationToken| async move {
                    token.cancelled().await;
                    *stopped.lock().unwrap() = true;
                    anyhow::Ok(())
                }
            });

        let task = tokio::spawn(supervisor.run(token.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!task.is_finished());

        token.cancel();
        task.await.unwrap().unwrap();
        assert!(*stopped.lock().unwrap());
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        async fn explode() -> anyhow::Result<()> {
            panic!("kaboom")
        }
        let supervisor = Supervisor::new("root").unit("fragile", |_| explode());

        let err = supervisor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnitPanicked { ref unit } if unit == "fragile"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_failure_reaches_the_root() {
        let log = Log::default();
        let child = Supervisor::new("child")
            .post_stop("cleanup", hook(&log, "child stopped"))
            .unit("broken", |_| fail("bad data"));
        let root = Supervisor::new("root")
            .unit("child", child.into_unit())
            .unit("sibling", |token: CancellationToken| async move {
                token.cancelled().await;
                anyhow::Ok(())
            });

        let err = root.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnitFailed { ref unit, .. } if unit == "child"));
        assert!(format!("{err}").contains("bad data"));
        assert_eq!(*log.lock().unwrap(), vec!["child stopped".to_string()]);
    }

    #[tokio::test]
    async fn test_post_start_failure_shuts_down() {
        let supervisor = Supervisor::new("root")
            .post_start("announce", || fail("no"))
            .unit("worker", |token: CancellationToken| async move {
                token.cancelled().await;
                anyhow::Ok(())
            });

        let err = supervisor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::HookFailed { phase: Phase::PostStart, .. }));
    }
}
