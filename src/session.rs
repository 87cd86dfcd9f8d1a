use std::sync::Arc;

use log::debug;

use crate::catalog::catalog::Catalog;
use crate::catalog::catalog::MemoryCatalog;
use crate::catalog::table::TableProvider;
use crate::config::Config;
use crate::error::Result;
use crate::sql::execution::compiler::Compiler;
use crate::sql::execution::compiler::ExecutionPlan;
use crate::sql::execution::context::QueryContext;
use crate::sql::execution::display::DisplayableExecutionPlan;
use crate::sql::execution::query::LimitExec;
use crate::sql::execution::stream::adapt;
use crate::sql::execution::stream::SendableRecordBatchStream;
use crate::sql::optimizer::Optimizer;
use crate::sql::plan::plan::Plan;
use crate::sql::plan::planner::parse_sql;
use crate::sql::plan::planner::Planner;

/// A session owns the catalog queries are resolved against and drives a
/// query through parsing, planning, optimization and physical planning.
pub struct Session {
    catalog: Arc<dyn Catalog>,
    config: Config,
    optimizer: Optimizer,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self::with_catalog(Arc::new(MemoryCatalog::new()), config)
    }

    pub fn with_catalog(catalog: Arc<dyn Catalog>, config: Config) -> Self {
        Self { catalog, config, optimizer: Optimizer::new() }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn register_table(&self, table: Arc<dyn TableProvider>) -> Result<()> {
        if let Some(old) = self.catalog.register_table(table)? {
            debug!("Replaced table {}", old.name());
        }
        Ok(())
    }

    /// A fresh query context carrying the session's configuration.
    pub fn new_query_context(&self) -> QueryContext {
        QueryContext::from(&self.config)
    }

    /// Parse and plan `sql`, then run the optimizer and the logical plan
    /// hook over the result.
    pub fn create_logical_plan(&self, sql: &str, ctx: &QueryContext) -> Result<Plan> {
        let profiler = ctx.profiler();
        let statement = profiler.time("parse", || parse_sql(sql))?;
        let planner = Planner::new(self.catalog.clone()).with_variables(ctx.variables().clone());
        let plan = profiler.time("plan", || planner.statement_to_plan(statement))?;
        debug!("Logical plan:\n{}", plan);

        let plan =
            profiler.time("optimize", || self.optimizer.optimize(plan, ctx.max_optimizer_passes()))?;
        debug!("Optimized plan:\n{}", plan);
        match ctx.logical_plan_hook() {
            Some(hook) => hook(plan),
            None => Ok(plan),
        }
    }

    /// Compile an optimized plan, then apply the physical plan hook and the
    /// result cap.
    pub fn create_physical_plan(
        &self,
        plan: Plan,
        ctx: &QueryContext,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        let compiler = Compiler::new(ctx.variables().clone());
        let mut physical = ctx.profiler().time("compile", || compiler.build_execution_plan(plan))?;
        if let Some(hook) = ctx.physical_plan_hook() {
            physical = hook(physical)?;
        }
        if ctx.max_results() > 0 {
            physical = Arc::new(LimitExec::new(physical, 0, Some(ctx.max_results())));
        }
        debug!("Physical plan:\n{}", DisplayableExecutionPlan::new(&physical));
        Ok(physical)
    }

    /// Run `sql` and return the lazy stream of its result batches. Every
    /// delivered batch is counted by the context's profiler.
    pub fn execute_query(&self, sql: &str, ctx: QueryContext) -> Result<SendableRecordBatchStream> {
        debug!("Executing query {}", sql);
        let plan = self.create_logical_plan(sql, &ctx)?;
        let physical = self.create_physical_plan(plan, &ctx)?;

        let ctx = Arc::new(ctx);
        let schema = physical.schema();
        let mut input = physical.execute(ctx.clone())?;
        let stream = async_stream::try_stream! {
            use futures::StreamExt;
            while let Some(batch) = input.next().await {
                let batch = batch?;
                ctx.profiler().observe_batch(batch.num_rows());
                yield batch;
            }
        };
        Ok(adapt(schema, stream))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
