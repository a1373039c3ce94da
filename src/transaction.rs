//! Transaction Engine
//!
//! An ordered list of steps, each a forward action with an optional
//! compensating action. `commit` runs forward actions in order and stops at
//! the first failure; `rollback` runs the compensations of the steps that
//! completed, newest first.
//!
//! Steps receive the workflow state by `&mut` reference, which is how data
//! discovered by one step (an object ID) reaches later steps and the
//! compensations. One transaction serves one logical operation and is owned
//! by the task running it.
//!
//! ```ignore
//! let mut tx = Transaction::new("create vol1");
//! tx.then("resolve pool", |w: &mut Creator| w.resolve_pool().boxed())
//!     .then_with_compensation(
//!         "create filesystem",
//!         |w: &mut Creator| w.create_filesystem().boxed(),
//!         |w: &mut Creator| w.delete_created_filesystem().boxed(),
//!     );
//! if let Err(e) = tx.commit(&mut creator).await {
//!     tx.rollback(&mut creator).await;
//!     return Err(e);
//! }
//! ```

use crate::error::Result;
use crate::metrics;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Future returned by a step action
pub type StepFuture<'s> = BoxFuture<'s, Result<()>>;

type StepFn<S> = Box<dyn for<'s> FnMut(&'s mut S) -> StepFuture<'s> + Send>;

struct Step<S> {
    name: String,
    forward: StepFn<S>,
    compensate: Option<StepFn<S>>,
}

/// A compensation that failed during rollback
#[derive(Debug, Clone, Serialize)]
pub struct CompensationFailure {
    pub step: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Outcome of a rollback. Rollback never fails; leaked objects show up here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    /// Steps whose compensation ran successfully, in execution order
    pub compensated: Vec<String>,
    pub failures: Vec<CompensationFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered forward/compensate steps for one logical operation
pub struct Transaction<S> {
    operation: String,
    steps: Vec<Step<S>>,
    cursor: usize,
}

impl<S: Send> Transaction<S> {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            steps: Vec::new(),
            cursor: 0,
        }
    }

    /// Append a step with nothing to undo
    pub fn then<F>(&mut self, name: &str, forward: F) -> &mut Self
    where
        F: for<'s> FnMut(&'s mut S) -> StepFuture<'s> + Send + 'static,
    {
        self.steps.push(Step {
            name: name.to_string(),
            forward: Box::new(forward),
            compensate: None,
        });
        self
    }

    /// Append a step and the action that undoes it
    pub fn then_with_compensation<F, C>(&mut self, name: &str, forward: F, compensate: C) -> &mut Self
    where
        F: for<'s> FnMut(&'s mut S) -> StepFuture<'s> + Send + 'static,
        C: for<'s> FnMut(&'s mut S) -> StepFuture<'s> + Send + 'static,
    {
        self.steps.push(Step {
            name: name.to_string(),
            forward: Box::new(forward),
            compensate: Some(Box::new(compensate)),
        });
        self
    }

    /// Run the remaining steps in order, stopping at the first error.
    ///
    /// The cursor is left one past the last successful step. Calling
    /// `commit` again without `rollback` resumes from there.
    pub async fn commit(&mut self, state: &mut S) -> Result<()> {
        while self.cursor < self.steps.len() {
            let step = &mut self.steps[self.cursor];
            debug!(operation = %self.operation, step = %step.name, "Running step");

            if let Err(e) = (step.forward)(state).await {
                warn!(
                    operation = %self.operation,
                    step = %step.name,
                    error = %e,
                    "Step failed"
                );
                return Err(e);
            }
            self.cursor += 1;
        }
        Ok(())
    }

    /// Compensate every completed step, newest first.
    ///
    /// A failing compensation is logged, counted and reported, and the
    /// remaining compensations still run.
    pub async fn rollback(&mut self, state: &mut S) -> RollbackReport {
        let mut report = RollbackReport::default();
        if self.cursor > 0 {
            info!(operation = %self.operation, steps = self.cursor, "Rolling back");
        }

        while self.cursor > 0 {
            self.cursor -= 1;
            let step = &mut self.steps[self.cursor];
            let Some(compensate) = step.compensate.as_mut() else {
                continue;
            };

            match compensate(state).await {
                Ok(()) => report.compensated.push(step.name.clone()),
                Err(e) => {
                    warn!(
                        operation = %self.operation,
                        step = %step.name,
                        error = %e,
                        "Compensation failed, remote object may be leaked"
                    );
                    metrics::record_compensation_failure(&self.operation, &step.name);
                    report.failures.push(CompensationFailure {
                        step: step.name.clone(),
                        error: e.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        }
        report
    }

    /// Number of steps that completed
    pub fn completed(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use futures::FutureExt;

    #[derive(Default)]
    struct Log {
        events: Vec<String>,
        fail_at: Option<usize>,
        fail_compensation_at: Option<usize>,
    }

    impl Log {
        async fn forward(&mut self, i: usize) -> Result<()> {
            if self.fail_at == Some(i) {
                self.events.push(format!("fail {}", i));
                return Err(Error::Internal(format!("step {} failed", i)));
            }
            self.events.push(format!("do {}", i));
            Ok(())
        }

        async fn undo(&mut self, i: usize) -> Result<()> {
            self.events.push(format!("undo {}", i));
            if self.fail_compensation_at == Some(i) {
                return Err(Error::Internal(format!("undo {} failed", i)));
            }
            Ok(())
        }
    }

    fn five_steps() -> Transaction<Log> {
        let mut tx: Transaction<Log> = Transaction::new("test");
        for i in 1..=5 {
            tx.then_with_compensation(
                &format!("step {}", i),
                move |log: &mut Log| log.forward(i).boxed(),
                move |log: &mut Log| log.undo(i).boxed(),
            );
        }
        tx
    }

    #[tokio::test]
    async fn test_commit_runs_in_order() {
        let mut tx = five_steps();
        let mut log = Log::default();
        tx.commit(&mut log).await.unwrap();
        assert_eq!(log.events, vec!["do 1", "do 2", "do 3", "do 4", "do 5"]);
        assert_eq!(tx.completed(), 5);
    }

    #[tokio::test]
    async fn test_rollback_symmetry() {
        for k in 1..=5 {
            let mut tx = five_steps();
            let mut log = Log {
                fail_at: Some(k),
                ..Default::default()
            };

            let err = tx.commit(&mut log).await.unwrap_err();
            assert_eq!(err.to_string(), format!("Internal error: step {} failed", k));
            assert_eq!(tx.completed(), k - 1);

            log.events.clear();
            let report = tx.rollback(&mut log).await;
            let expected: Vec<String> = (1..k).rev().map(|i| format!("undo {}", i)).collect();
            assert_eq!(log.events, expected);
            assert!(report.is_clean());
            assert_eq!(report.compensated.len(), k - 1);
        }
    }

    #[tokio::test]
    async fn test_failing_compensation_is_reported_not_raised() {
        let mut tx = five_steps();
        let mut log = Log {
            fail_at: Some(4),
            fail_compensation_at: Some(2),
            ..Default::default()
        };
        tx.commit(&mut log).await.unwrap_err();
        log.events.clear();

        let report = tx.rollback(&mut log).await;
        assert_eq!(log.events, vec!["undo 3", "undo 2", "undo 1"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "step 2");
        assert_eq!(report.compensated, vec!["step 3", "step 1"]);
    }

    #[tokio::test]
    async fn test_steps_without_compensation_are_skipped() {
        let mut tx: Transaction<Log> = Transaction::new("mixed");
        tx.then("lookup", |log: &mut Log| log.forward(1).boxed())
            .then_with_compensation(
                "create",
                |log: &mut Log| log.forward(2).boxed(),
                |log: &mut Log| log.undo(2).boxed(),
            )
            .then("fail", |log: &mut Log| log.forward(3).boxed());

        let mut log = Log {
            fail_at: Some(3),
            ..Default::default()
        };
        tx.commit(&mut log).await.unwrap_err();
        log.events.clear();
        tx.rollback(&mut log).await;
        assert_eq!(log.events, vec!["undo 2"]);
    }

    #[tokio::test]
    async fn test_commit_resumes_from_cursor() {
        let mut tx = five_steps();
        let mut log = Log {
            fail_at: Some(3),
            ..Default::default()
        };
        tx.commit(&mut log).await.unwrap_err();
        log.fail_at = None;
        log.events.clear();
        tx.commit(&mut log).await.unwrap();
        assert_eq!(log.events, vec!["do 3", "do 4", "do 5"]);
    }
}
