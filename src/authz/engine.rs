use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::authz::errors::EvaluationError;
use crate::authz::types::AccessContext;

/// Decides one (resource type, direction) pair.
///
/// `Ok(true)` allows the operation and `Ok(false)` denies it. An `Err` is
/// treated as a denial by the pipeline.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, ctx: &AccessContext) -> Result<bool, EvaluationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allowed
        } else {
            Decision::Denied
        }
    }
}

/// Run `evaluator` once against `ctx`.
///
/// With a `timeout`, an evaluator that has not answered in time is reported
/// as [`EvaluationError::TimedOut`]. Without one, a hung evaluator keeps the
/// request pending.
pub async fn decide(
    evaluator: &dyn Evaluator,
    ctx: &AccessContext,
    timeout: Option<Duration>,
) -> Result<Decision, EvaluationError> {
    let verdict = match timeout {
        Some(limit) => tokio::time::timeout(limit, evaluator.evaluate(ctx))
            .await
            .map_err(|_| EvaluationError::TimedOut(limit))??,
        None => evaluator.evaluate(ctx).await?,
    };
    Ok(Decision::from(verdict))
}

/// Evaluator backed by an async closure.
pub struct FnEvaluator<F>(F);

/// Wrap a closure returning a future as an [`Evaluator`]. The closure
/// receives its own copy of the context.
///
/// ```ignore
/// let signed_in = evaluator_fn(|ctx: AccessContext| async move {
///     Ok(ctx.auth_token.is_some())
/// });
/// ```
pub fn evaluator_fn<F, Fut>(f: F) -> FnEvaluator<F>
where
    F: Fn(AccessContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, EvaluationError>> + Send + 'static,
{
    FnEvaluator(f)
}

#[async_trait]
impl<F, Fut> Evaluator for FnEvaluator<F>
where
    F: Fn(AccessContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, EvaluationError>> + Send + 'static,
{
    async fn evaluate(&self, ctx: &AccessContext) -> Result<bool, EvaluationError> {
        (self.0)(ctx.clone()).await
    }
}

/// Evaluator with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub bool);

#[async_trait]
impl Evaluator for Constant {
    async fn evaluate(&self, _ctx: &AccessContext) -> Result<bool, EvaluationError> {
        Ok(self.0)
    }
}
