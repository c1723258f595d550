//! Bookkeeping for session tasks spawned by the daemon.
//!
//! The registry is owned by the accept loop alone, so it needs no locking.
//! Reaping only collects tasks that have already finished and never waits on
//! one that is still running. Draining, used at shutdown, waits for all of
//! them.

use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use otpdec_config::SessionConfig;

use crate::session::{Session, SessionError, SessionReport};

struct TrackedSession {
    id: u64,
    port: u16,
    handle: JoinHandle<Result<SessionReport, SessionError>>,
}

/// Counts from one reap pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub completed: usize,
    pub failed: usize,
}

impl Reaped {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

/// In-flight session tasks plus running totals.
#[derive(Default)]
pub struct SessionRegistry {
    active: Vec<TrackedSession>,
    started: u64,
    completed: u64,
    failed: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the worker for `session` and start tracking it.
    pub fn spawn(&mut self, session: Session, config: SessionConfig) {
        let id = session.id();
        let port = session.port();
        let handle = tokio::spawn(session.serve(config));
        self.track(id, port, handle);
    }

    pub fn track(
        &mut self,
        id: u64,
        port: u16,
        handle: JoinHandle<Result<SessionReport, SessionError>>,
    ) {
        self.started += 1;
        self.active.push(TrackedSession { id, port, handle });
    }

    /// Collect every finished session and log its outcome.
    pub async fn reap(&mut self) -> Reaped {
        let finished: Vec<TrackedSession> = self
            .active
            .extract_if(.., |s| s.handle.is_finished())
            .collect();

        let mut reaped = Reaped::default();
        for TrackedSession { id, port, handle } in finished {
            let outcome = handle.await;
            self.record(&mut reaped, id, port, outcome);
        }
        reaped
    }

    /// Wait for every outstanding session to finish.
    ///
    /// Sessions still running once `grace` has passed are aborted and counted
    /// as failed. With no grace period this waits as long as they take.
    pub async fn drain(&mut self, grace: Option<Duration>) -> Reaped {
        let deadline = grace.map(|grace| Instant::now() + grace);

        let mut reaped = Reaped::default();
        for TrackedSession { id, port, mut handle } in std::mem::take(&mut self.active) {
            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(session = id, port, "Session outlived shutdown grace, aborting");
                        handle.abort();
                        handle.await
                    }
                },
                None => handle.await,
            };
            self.record(&mut reaped, id, port, outcome);
        }
        reaped
    }

    fn record(
        &mut self,
        reaped: &mut Reaped,
        id: u64,
        port: u16,
        outcome: Result<Result<SessionReport, SessionError>, JoinError>,
    ) {
        match outcome {
            Ok(Ok(report)) => {
                reaped.completed += 1;
                self.completed += 1;
                debug!(
                    session = id,
                    port,
                    peer = %report.peer,
                    len = report.message_len,
                    "Session completed"
                );
            }
            Ok(Err(e)) => {
                reaped.failed += 1;
                self.failed += 1;
                warn!(session = id, port, error = %e, "Session failed");
            }
            Err(e) => {
                reaped.failed += 1;
                self.failed += 1;
                error!(session = id, port, error = %e, "Session task aborted");
            }
        }
    }

    /// Sessions spawned but not yet reaped.
    pub fn outstanding(&self) -> usize {
        self.active.len()
    }

    /// Ports held by sessions that have not been reaped.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.active.iter().map(|s| s.port)
    }

    pub fn started(&self) -> u64 {
        self.started
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::oneshot;

    fn report(id: u64, port: u16) -> SessionReport {
        SessionReport {
            id,
            port,
            peer: "127.0.0.1:40000".parse().unwrap(),
            message_len: 2,
        }
    }

    async fn settle(registry: &mut SessionRegistry, expected: usize) -> Reaped {
        let mut total = Reaped::default();
        for _ in 0..100 {
            let r = registry.reap().await;
            total.completed += r.completed;
            total.failed += r.failed;
            if total.total() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        total
    }

    #[tokio::test]
    async fn test_empty_reap() {
        let mut registry = SessionRegistry::new();
        assert_eq!(registry.reap().await, Reaped::default());
        assert_eq!(registry.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_reap_skips_running_sessions() {
        let mut registry = SessionRegistry::new();
        let (release, wait) = oneshot::channel::<()>();

        registry.track(
            1,
            50001,
            tokio::spawn(async move {
                let _ = wait.await;
                Ok(report(1, 50001))
            }),
        );
        registry.track(2, 50002, tokio::spawn(async { Ok(report(2, 50002)) }));

        let reaped = settle(&mut registry, 1).await;
        assert_eq!(reaped.completed, 1);
        assert_eq!(registry.outstanding(), 1);
        assert_eq!(registry.ports().collect::<Vec<_>>(), vec![50001]);

        release.send(()).unwrap();
        let reaped = settle(&mut registry, 1).await;
        assert_eq!(reaped.completed, 1);
        assert_eq!(registry.outstanding(), 0);
        assert_eq!(registry.started(), 2);
        assert_eq!(registry.completed(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let mut registry = SessionRegistry::new();
        registry.track(
            1,
            50001,
            tokio::spawn(async { Err(SessionError::AcceptTimeout(Duration::from_secs(1))) }),
        );
        registry.track(
            2,
            50002,
            tokio::spawn(async { panic!("worker blew up") }),
        );

        let reaped = settle(&mut registry, 2).await;
        assert_eq!(reaped.failed, 2);
        assert_eq!(registry.failed(), 2);
        assert_eq!(registry.completed(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_running_sessions() {
        let mut registry = SessionRegistry::new();
        registry.track(
            1,
            50001,
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(report(1, 50001))
            }),
        );

        let reaped = registry.drain(Some(Duration::from_secs(5))).await;
        assert_eq!(reaped.completed, 1);
        assert_eq!(registry.outstanding(), 0);
        assert_eq!(registry.completed(), 1);
    }

    #[tokio::test]
    async fn test_drain_aborts_after_grace() {
        let mut registry = SessionRegistry::new();
        let (_keep, wait) = oneshot::channel::<()>();
        registry.track(
            1,
            50001,
            tokio::spawn(async move {
                let _ = wait.await;
                Ok(report(1, 50001))
            }),
        );
        registry.track(2, 50002, tokio::spawn(async { Ok(report(2, 50002)) }));

        let reaped = registry.drain(Some(Duration::from_millis(100))).await;
        assert_eq!(reaped, Reaped { completed: 1, failed: 1 });
        assert_eq!(registry.outstanding(), 0);
    }
}
