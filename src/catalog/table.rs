use std::any::Any;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use async_stream::try_stream;

use crate::access::batch::RecordBatch;
use crate::error::Result;
use crate::internal_err;
use crate::sql::execution::compiler::ExecutionPlan;
use crate::sql::execution::context::QueryContext;
use crate::sql::execution::stream::adapt;
use crate::sql::execution::stream::SendableRecordBatchStream;
use crate::sql::plan::schema::SchemaRef;

/// A data source the engine can query. The engine never reads source data
/// itself, it only asks the provider for a scan operator.
pub trait TableProvider: Debug + Send + Sync {
    /// Returns the table provider as [`Any`] so that it can be
    /// downcast to a specific implementation.
    fn as_any(&self) -> &dyn Any;

    /// The name the table is registered and queried under.
    fn name(&self) -> &str;

    /// The unqualified schema of the whole table.
    fn schema(&self) -> SchemaRef;

    /// An operator producing the columns at `projection`, or every column
    /// when it is `None`.
    fn scan(&self, projection: Option<&Vec<usize>>) -> Result<Arc<dyn ExecutionPlan>>;
}

/// A table held in memory as a list of batches.
#[derive(Debug)]
pub struct MemTable {
    name: String,
    schema: SchemaRef,
    batches: Arc<Vec<RecordBatch>>,
}

impl MemTable {
    pub fn try_new(name: impl Into<String>, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        let name = name.into();
        for batch in &batches {
            if batch.num_columns() != schema.len() {
                return Err(internal_err!(
                    "Table {} has {} columns, got a batch of {} columns",
                    name,
                    schema.len(),
                    batch.num_columns()
                ));
            }
        }
        let batches = batches
            .into_iter()
            .map(|b| b.with_schema(Arc::clone(&schema)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { name: name.to_lowercase(), schema, batches: Arc::new(batches) })
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

impl TableProvider for MemTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn scan(&self, projection: Option<&Vec<usize>>) -> Result<Arc<dyn ExecutionPlan>> {
        let scan = MemoryScanExec::try_new(
            self.name.clone(),
            Arc::clone(&self.schema),
            Arc::clone(&self.batches),
            projection.cloned(),
        )?;
        Ok(Arc::new(scan))
    }
}

/// Reads the batches of a [`MemTable`], re-chunked to the batch size of
/// the query.
#[derive(Debug)]
pub struct MemoryScanExec {
    table: String,
    batches: Arc<Vec<RecordBatch>>,
    projection: Option<Vec<usize>>,
    projected_schema: SchemaRef,
}

impl MemoryScanExec {
    pub fn try_new(
        table: String,
        schema: SchemaRef,
        batches: Arc<Vec<RecordBatch>>,
        projection: Option<Vec<usize>>,
    ) -> Result<Self> {
        let projected_schema = match &projection {
            Some(indices) => Arc::new(schema.project(indices)?),
            None => schema,
        };
        Ok(Self { table, batches, projection, projected_schema })
    }
}

impl ExecutionPlan for MemoryScanExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.projected_schema)
    }

    fn with_new_children(self: Arc<Self>, _children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        Ok(self)
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let batches = Arc::clone(&self.batches);
        let projection = self.projection.clone();
        let schema = self.schema();
        let batch_size = ctx.batch_size();
        let stream = try_stream! {
            for batch in batches.iter() {
                let batch = match &projection {
                    Some(indices) => batch.project(indices)?,
                    None => batch.clone(),
                };
                let batch = batch.with_schema(Arc::clone(&schema))?;
                let mut offset = 0;
                while offset < batch.num_rows() {
                    ctx.check_cancelled()?;
                    let len = batch_size.min(batch.num_rows() - offset);
                    yield batch.slice(offset, len)?;
                    offset += len;
                }
            }
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for MemoryScanExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryScanExec: {}", self.table)?;
        if self.projection.is_some() {
            let names = self.projected_schema.fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
            write!(f, " projection=[{}]", names.join(", "))?;
        }
        Ok(())
    }
}
