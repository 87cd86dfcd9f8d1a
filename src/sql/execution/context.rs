use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::catalog::r#type::ScalarValue;
use crate::config::Config;
use crate::error::Error;
use crate::error::Result;
use crate::sql::execution::compiler::ExecutionPlan;
use crate::sql::plan::plan::Plan;

/// Rewrites the optimized logical plan right before physical planning.
pub type LogicalPlanHook = Arc<dyn Fn(Plan) -> Result<Plan> + Send + Sync>;

/// Rewrites the physical plan right before execution.
pub type PhysicalPlanHook =
    Arc<dyn Fn(Arc<dyn ExecutionPlan>) -> Result<Arc<dyn ExecutionPlan>> + Send + Sync>;

/// The knobs and state of one query execution, shared by every operator of
/// the physical plan.
#[derive(Clone)]
pub struct QueryContext {
    /// Row cap of every batch an operator emits.
    batch_size: usize,
    /// Row cap of the whole result, 0 means unbounded.
    max_results: usize,
    max_optimizer_passes: usize,
    logical_plan_hook: Option<LogicalPlanHook>,
    physical_plan_hook: Option<PhysicalPlanHook>,
    profiler: Arc<Profiler>,
    /// Values of the `@name` variables a query may reference.
    variables: HashMap<String, ScalarValue>,
    cancellation: CancellationToken,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::from(&Config::default())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_max_optimizer_passes(mut self, passes: usize) -> Self {
        self.max_optimizer_passes = passes;
        self
    }

    pub fn with_logical_plan_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Plan) -> Result<Plan> + Send + Sync + 'static,
    {
        self.logical_plan_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_physical_plan_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<dyn ExecutionPlan>) -> Result<Arc<dyn ExecutionPlan>> + Send + Sync + 'static,
    {
        self.physical_plan_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        let name = name.into();
        let name = name.strip_prefix('@').map(|s| s.to_string()).unwrap_or(name);
        self.variables.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn max_optimizer_passes(&self) -> usize {
        self.max_optimizer_passes
    }

    pub fn logical_plan_hook(&self) -> Option<&LogicalPlanHook> {
        self.logical_plan_hook.as_ref()
    }

    pub fn physical_plan_hook(&self) -> Option<&PhysicalPlanHook> {
        self.physical_plan_hook.as_ref()
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    pub fn variables(&self) -> &HashMap<String, ScalarValue> {
        &self.variables
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fails with [`Error::Cancelled`] once the query has been cancelled.
    /// Operators call this at every batch boundary.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&Config> for QueryContext {
    fn from(cfg: &Config) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            max_results: cfg.max_results,
            max_optimizer_passes: cfg.max_optimizer_passes,
            logical_plan_hook: None,
            physical_plan_hook: None,
            profiler: Arc::new(Profiler::default()),
            variables: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl Debug for QueryContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("batch_size", &self.batch_size)
            .field("max_results", &self.max_results)
            .field("max_optimizer_passes", &self.max_optimizer_passes)
            .field("logical_plan_hook", &self.logical_plan_hook.is_some())
            .field("physical_plan_hook", &self.physical_plan_hook.is_some())
            .field("variables", &self.variables)
            .finish()
    }
}

/// Timings of the planning phases plus what has been delivered to the
/// caller so far.
#[derive(Debug, Default)]
pub struct Profiler {
    phases: Mutex<Vec<(String, Duration)>>,
    batches: AtomicUsize,
    rows: AtomicUsize,
}

impl Profiler {
    /// Run `f`, recording its wall time under `phase`.
    pub fn time<T>(&self, phase: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(phase, start.elapsed());
        out
    }

    pub fn record(&self, phase: &str, elapsed: Duration) {
        if let Ok(mut phases) = self.phases.lock() {
            phases.push((phase.to_string(), elapsed));
        }
    }

    pub fn phases(&self) -> Vec<(String, Duration)> {
        self.phases.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn observe_batch(&self, num_rows: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.rows.fetch_add(num_rows, Ordering::Relaxed);
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn rows(&self) -> usize {
        self.rows.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults() {
        let ctx = QueryContext::default();
        assert_eq!(2048, ctx.batch_size());
        assert_eq!(0, ctx.max_results());
        assert!(ctx.logical_plan_hook().is_none());
        assert!(ctx.check_cancelled().is_ok());

        let ctx = ctx.with_batch_size(0).with_variable("@Limit", 10i64);
        assert_eq!(1, ctx.batch_size());
        assert_eq!(Some(&ScalarValue::Int64(10)), ctx.variables().get("limit"));

        ctx.cancellation_token().cancel();
        assert_eq!(Err(Error::Cancelled), ctx.check_cancelled());
    }

    #[test]
    fn test_profiler() {
        let profiler = Profiler::default();
        let n = profiler.time("plan", || 1 + 1);
        assert_eq!(2, n);
        profiler.observe_batch(3);
        profiler.observe_batch(4);
        assert_eq!(vec!["plan".to_string()], profiler.phases().into_iter().map(|p| p.0).collect::<Vec<_>>());
        assert_eq!(2, profiler.batches());
        assert_eq!(7, profiler.rows());
    }
}
