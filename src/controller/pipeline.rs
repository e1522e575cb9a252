//! # Pipeline
//!
//! Runs an ordered list of named steps against a mutable context and stops at the
//! first failure.
//!
//! A failing step's error is wrapped as `step "<name>" failed: <cause>`. Nested
//! pipelines add their own name the same way, so an error raised three levels deep
//! reads `step "outer" failed: step "inner" failed: <cause>` when rendered with `{:#}`.
//!
//! ## Usage
//!
//! ```rust
//! use futures::future::BoxFuture;
//! use objectstore_provisioner::controller::pipeline::{Pipeline, Step, StepResult};
//!
//! #[derive(Default)]
//! struct Counter {
//!     value: u32,
//! }
//!
//! fn increment(ctx: &mut Counter) -> BoxFuture<'_, StepResult> {
//!     Box::pin(async move {
//!         ctx.value += 1;
//!         Ok(())
//!     })
//! }
//!
//! # tokio_test_block(async {
//! let pipeline = Pipeline::new().with_steps(vec![
//!     Step::new("first", increment),
//!     Step::when(|c: &Counter| c.value > 5, "skipped", increment),
//!     Step::new("second", increment),
//! ]);
//! let mut ctx = Counter::default();
//! pipeline.run(&mut ctx).await.unwrap();
//! assert_eq!(ctx.value, 2);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

use anyhow::Context;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Outcome of a single step or of a whole pipeline
pub type StepResult = anyhow::Result<()>;

/// A step body. Borrows the context for the duration of the step.
pub type StepFn<C> = for<'a> fn(&'a mut C) -> BoxFuture<'a, StepResult>;

/// Decides whether a conditional step runs
pub type Predicate<C> = fn(&C) -> bool;

/// Applied to the error of a nested pipeline before it is wrapped
pub type ErrorHandler = fn(anyhow::Error) -> StepResult;

/// Called with the step name right before a step runs
pub type BeforeHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives the outcome of a top-level run exactly once
#[async_trait]
pub trait ResultHandler<C>: Send + Sync {
    async fn handle(&self, ctx: &mut C, result: StepResult) -> StepResult;
}

enum Action<C> {
    Run(StepFn<C>),
    If {
        predicate: Predicate<C>,
        then: Box<Step<C>>,
    },
    IfOrElse {
        predicate: Predicate<C>,
        then: Box<Step<C>>,
        otherwise: Box<Step<C>>,
    },
    Nested(Pipeline<C>),
}

/// A named unit of work in a [`Pipeline`]
pub struct Step<C> {
    name: String,
    action: Action<C>,
}

impl<C> Step<C> {
    /// A step that always runs
    pub fn new(name: impl Into<String>, f: StepFn<C>) -> Self {
        Self {
            name: name.into(),
            action: Action::Run(f),
        }
    }

    /// A step that runs only when `predicate` holds
    pub fn when(predicate: Predicate<C>, name: impl Into<String>, f: StepFn<C>) -> Self {
        let name = name.into();
        Self {
            name: name.clone(),
            action: Action::If {
                predicate,
                then: Box::new(Self::new(name, f)),
            },
        }
    }

    /// Runs `step` only when `predicate` holds. The wrapped step keeps its own name.
    pub fn if_then(predicate: Predicate<C>, step: Step<C>) -> Self {
        Self {
            name: step.name.clone(),
            action: Action::If {
                predicate,
                then: Box::new(step),
            },
        }
    }

    /// Runs `then` when `predicate` holds, `otherwise` when it doesn't
    pub fn if_or_else(predicate: Predicate<C>, then: Step<C>, otherwise: Step<C>) -> Self {
        Self {
            name: format!("{} | {}", then.name, otherwise.name),
            action: Action::IfOrElse {
                predicate,
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        }
    }

    /// Runs a whole pipeline as one named step
    pub fn nested(name: impl Into<String>, pipeline: Pipeline<C>) -> Self {
        Self {
            name: name.into(),
            action: Action::Nested(pipeline),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered list of steps with optional hooks and result handling
pub struct Pipeline<C> {
    steps: Vec<Step<C>>,
    before_hooks: Vec<BeforeHook>,
    finalizer: Option<Box<dyn ResultHandler<C>>>,
    error_handler: Option<ErrorHandler>,
}

impl<C> std::fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

impl<C> std::fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.steps)
            .field("before_hooks", &self.before_hooks.len())
            .field("finalizer", &self.finalizer.is_some())
            .finish_non_exhaustive()
    }
}

impl<C> Default for Pipeline<C> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            before_hooks: Vec::new(),
            finalizer: None,
            error_handler: None,
        }
    }
}

impl<C: Send> Pipeline<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_steps(mut self, steps: Vec<Step<C>>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Hooks are inherited by nested pipelines
    #[must_use]
    pub fn with_before_hooks(mut self, hooks: Vec<BeforeHook>) -> Self {
        self.before_hooks.extend(hooks);
        self
    }

    /// Only used when this pipeline is run at the top level
    #[must_use]
    pub fn with_finalizer(mut self, handler: Box<dyn ResultHandler<C>>) -> Self {
        self.finalizer = Some(handler);
        self
    }

    /// Only used when this pipeline is nested inside another
    #[must_use]
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Run every step in order and hand the outcome to the finalizer, if any
    pub async fn run(&self, ctx: &mut C) -> StepResult {
        let result = self.run_steps(ctx, &self.before_hooks).await;
        match &self.finalizer {
            Some(finalizer) => finalizer.handle(ctx, result).await,
            None => result,
        }
    }

    fn run_steps<'a>(
        &'a self,
        ctx: &'a mut C,
        hooks: &'a [BeforeHook],
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            for step in &self.steps {
                run_step(step, ctx, hooks).await?;
            }
            Ok(())
        })
    }
}

fn run_step<'a, C: Send>(
    step: &'a Step<C>,
    ctx: &'a mut C,
    hooks: &'a [BeforeHook],
) -> BoxFuture<'a, StepResult> {
    Box::pin(async move {
        match &step.action {
            Action::Run(f) => {
                for hook in hooks {
                    hook(&step.name);
                }
                f(ctx)
                    .await
                    .with_context(|| format!("step {:?} failed", step.name))
            }
            Action::If { predicate, then } => {
                if predicate(ctx) {
                    run_step(then, ctx, hooks).await
                } else {
                    Ok(())
                }
            }
            Action::IfOrElse {
                predicate,
                then,
                otherwise,
            } => {
                if predicate(ctx) {
                    run_step(then, ctx, hooks).await
                } else {
                    run_step(otherwise, ctx, hooks).await
                }
            }
            Action::Nested(pipeline) => {
                for hook in hooks {
                    hook(&step.name);
                }
                let mut combined = hooks.to_vec();
                combined.extend(pipeline.before_hooks.iter().cloned());
                let result = pipeline.run_steps(ctx, &combined).await;
                let result = match (result, pipeline.error_handler) {
                    (Err(err), Some(handler)) => handler(err),
                    (result, _) => result,
                };
                result.with_context(|| format!("step {:?} failed", step.name))
            }
        }
    })
}

/// Turns a not-found error into success
pub fn ignore_not_found(err: anyhow::Error) -> StepResult {
    if crate::controller::store::is_not_found(&err) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Hook that logs each step at debug level
#[must_use]
pub fn debug_logger() -> BeforeHook {
    Arc::new(|name: &str| tracing::debug!(step = name, "executing step"))
}
