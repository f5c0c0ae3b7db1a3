//! Two-attempt solve: primary policy, then at most one fallback.

use std::time::{Duration, Instant};

use crate::backend::{BackendError, DirectSolver, OrderingPolicy};
use crate::csc::CscMatrixRef;

/// Which attempt is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Primary,
    Fallback,
}

/// Policies used by each attempt. `fallback: None` disables the retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    pub primary: OrderingPolicy,
    pub fallback: Option<OrderingPolicy>,
}

impl Default for RetryPlan {
    fn default() -> Self {
        Self {
            primary: OrderingPolicy::Default,
            fallback: Some(OrderingPolicy::Robust),
        }
    }
}

impl RetryPlan {
    fn policy(&self, stage: Stage) -> OrderingPolicy {
        match stage {
            Stage::Primary => self.primary,
            Stage::Fallback => self.fallback.unwrap_or(self.primary),
        }
    }

    /// Next stage after a failed attempt, or `None` when the failure is final.
    pub fn next(&self, stage: Stage, err: &BackendError) -> Option<Stage> {
        match stage {
            Stage::Primary if err.is_retryable() && self.fallback.is_some() => {
                Some(Stage::Fallback)
            }
            _ => None,
        }
    }
}

/// One backend call.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub stage: Stage,
    pub policy: OrderingPolicy,
    pub result: Result<(), BackendError>,
    pub elapsed: Duration,
}

enum State {
    Attempt(Stage),
    Done(Result<Vec<f64>, BackendError>),
}

/// Drives the backend through the plan and returns the final result.
///
/// `on_attempt` sees every attempt as it completes.
pub fn run<S: DirectSolver + ?Sized>(
    backend: &mut S,
    matrix: CscMatrixRef<'_>,
    rhs: &[f64],
    plan: &RetryPlan,
    mut on_attempt: impl FnMut(AttemptReport),
) -> Result<Vec<f64>, BackendError> {
    let mut state = State::Attempt(Stage::Primary);
    loop {
        state = match state {
            State::Attempt(stage) => {
                let policy = plan.policy(stage);
                let start = Instant::now();
                let result = backend.factor_solve(matrix, rhs, policy);
                on_attempt(AttemptReport {
                    stage,
                    policy,
                    result: result.as_ref().map(|_| ()).map_err(Clone::clone),
                    elapsed: start.elapsed(),
                });
                match result {
                    Ok(x) => State::Done(Ok(x)),
                    Err(err) => {
                        backend.release();
                        match plan.next(stage, &err) {
                            Some(next) => {
                                log::warn!(
                                    "{policy} ordering failed ({err}); retrying with {}",
                                    plan.policy(next)
                                );
                                State::Attempt(next)
                            }
                            None => State::Done(Err(err)),
                        }
                    }
                }
            }
            State::Done(result) => return result,
        };
    }
}
