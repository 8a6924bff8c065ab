//! Re-ranking pipeline
//!
//! `Reranker::rescore_all` runs one sequential scoring pass over the whole
//! collection and `sort_tasks` puts the result in display order.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::credential::CredentialStore;
use crate::models::{Event, Task, TaskId, FALLBACK_PRIORITY};
use crate::oracle::{OracleError, PriorityOracle};

/// Rank order: incomplete before completed, then higher priority first
fn rank_order(a: &Task, b: &Task) -> CmpOrdering {
    a.is_completed()
        .cmp(&b.is_completed())
        .then_with(|| b.priority().cmp(&a.priority()))
}

/// Sorts tasks into rank order; ties keep their input order
pub fn sort_tasks(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(rank_order);
    tasks
}

/// Whether `tasks` is already in rank order
pub fn is_sorted(tasks: &[Task]) -> bool {
    tasks
        .windows(2)
        .all(|pair| rank_order(&pair[0], &pair[1]) != CmpOrdering::Greater)
}

/// Ranking errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankingError {
    #[error("A rescoring pass is already running")]
    Busy,
}

/// A task whose score fell back because the oracle failed
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreFailure {
    pub task_id: TaskId,
    pub error: OracleError,
}

/// Outcome of one rescoring pass
#[derive(Debug, Clone)]
pub struct RescoreReport {
    /// Same tasks, same order, updated priorities
    pub tasks: Vec<Task>,
    pub failures: Vec<ScoreFailure>,
    /// Reading the credential failed at least once during the pass
    pub unreadable_credential: bool,
}

/// Lowers the busy flag and announces it when dropped
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
    events: &'a broadcast::Sender<Event>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        let _ = self.events.send(Event::Busy(false));
    }
}

/// Runs rescoring passes, one at a time
pub struct Reranker {
    oracle: PriorityOracle,
    busy: AtomicBool,
    events: broadcast::Sender<Event>,
}

impl Reranker {
    pub fn new(oracle: PriorityOracle, events: broadcast::Sender<Event>) -> Self {
        Self {
            oracle,
            busy: AtomicBool::new(false),
            events,
        }
    }

    /// Whether a pass is currently running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<BusyGuard<'_>, RankingError> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RankingError::Busy)?;
        let _ = self.events.send(Event::Busy(true));
        Ok(BusyGuard {
            flag: &self.busy,
            events: &self.events,
        })
    }

    /// Rescores every task, strictly one after another
    ///
    /// Each task is scored against all the others as they were before the
    /// pass began. The credential is read again before every oracle call; a
    /// read that fails counts as no credential. A failed score sets that task
    /// to the fallback priority and is listed in the report; the pass always
    /// runs to the end.
    pub async fn rescore_all(
        &self,
        credentials: &CredentialStore,
        tasks: Vec<Task>,
    ) -> Result<RescoreReport, RankingError> {
        let _busy = self.acquire()?;
        tracing::info!(tasks = tasks.len(), "starting rescoring pass");

        let snapshot = tasks;
        let mut rescored = snapshot.clone();
        let mut failures = Vec::new();
        let mut unreadable_credential = false;

        for (i, target) in snapshot.iter().enumerate() {
            let peers: Vec<Task> = snapshot
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, peer)| peer.clone())
                .collect();

            let credential = match credentials.get().await {
                Ok(credential) => credential,
                Err(error) => {
                    tracing::warn!(task = %target.id(), error = %error, "could not read credential");
                    unreadable_credential = true;
                    None
                }
            };

            let priority = match self.oracle.score(credential.as_ref(), target, &peers).await {
                Ok(priority) => priority,
                Err(error) => {
                    tracing::warn!(task = %target.id(), error = %error, "scoring failed, using fallback priority");
                    failures.push(ScoreFailure {
                        task_id: target.id(),
                        error,
                    });
                    FALLBACK_PRIORITY
                }
            };
            rescored[i].set_priority(priority);
        }

        tracing::info!(
            tasks = rescored.len(),
            failures = failures.len(),
            "rescoring pass finished"
        );
        Ok(RescoreReport {
            tasks: rescored,
            failures,
            unreadable_credential,
        })
    }
}
