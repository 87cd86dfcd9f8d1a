use std::any::Any;
use std::cmp::Ordering;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;
use log::debug;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::access::array::RecordArray;
use crate::access::batch::RecordBatch;
use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::internal_err;
use crate::sql::execution::compiler::check_children;
use crate::sql::execution::compiler::ExecutionPlan;
use crate::sql::execution::context::QueryContext;
use crate::sql::execution::expr::PhysicalExpr;
use crate::sql::execution::join::chunks;
use crate::sql::execution::join::combine;
use crate::sql::execution::stream::adapt;
use crate::sql::execution::stream::empty_stream;
use crate::sql::execution::stream::AbortOnDrop;
use crate::sql::execution::stream::SendableRecordBatchStream;
use crate::sql::plan::schema::SchemaRef;

/// Take the only child out of `children`.
fn single_child(name: &str, children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
    check_children(name, &children, 1)?;
    children.into_iter().next().ok_or_else(|| internal_err!("{} expects 1 child", name))
}

fn two_children(
    name: &str,
    children: Vec<Arc<dyn ExecutionPlan>>,
) -> Result<(Arc<dyn ExecutionPlan>, Arc<dyn ExecutionPlan>)> {
    check_children(name, &children, 2)?;
    let mut children = children.into_iter();
    match (children.next(), children.next()) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(internal_err!("{} expects 2 children", name)),
    }
}

/// Evaluates one expression per output column over every input batch.
#[derive(Debug)]
pub struct ProjectionExec {
    input: Arc<dyn ExecutionPlan>,
    exprs: Vec<Arc<dyn PhysicalExpr>>,
    schema: SchemaRef,
}

impl ProjectionExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, exprs: Vec<Arc<dyn PhysicalExpr>>, schema: SchemaRef) -> Self {
        Self { input, exprs, schema }
    }
}

impl ExecutionPlan for ProjectionExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }

    fn with_new_children(self: Arc<Self>, children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        let input = single_child("ProjectionExec", children)?;
        Ok(Arc::new(ProjectionExec::new(input, self.exprs.clone(), Arc::clone(&self.schema))))
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let exprs = self.exprs.clone();
        let schema = self.schema();
        let stream = try_stream! {
            while let Some(batch) = input.next().await {
                let batch = batch?;
                ctx.check_cancelled()?;
                let mut columns = Vec::with_capacity(exprs.len());
                for (expr, field) in exprs.iter().zip(schema.fields().iter()) {
                    columns.push(expr.evaluate(&batch)?.into_array_of(&field.datatype)?);
                }
                yield RecordBatch::try_new_with_rows(Arc::clone(&schema), columns, batch.num_rows())?;
            }
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for ProjectionExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProjectionExec: ")?;
        for (i, expr) in self.exprs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{expr}")?;
        }
        Ok(())
    }
}

/// Keeps the rows the predicate evaluates to true for; false and null drop
/// the row.
#[derive(Debug)]
pub struct FilterExec {
    input: Arc<dyn ExecutionPlan>,
    predicate: Arc<dyn PhysicalExpr>,
}

impl FilterExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, predicate: Arc<dyn PhysicalExpr>) -> Self {
        Self { input, predicate }
    }

    pub fn predicate(&self) -> &Arc<dyn PhysicalExpr> {
        &self.predicate
    }
}

impl ExecutionPlan for FilterExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }

    fn with_new_children(self: Arc<Self>, children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        let input = single_child("FilterExec", children)?;
        Ok(Arc::new(FilterExec::new(input, Arc::clone(&self.predicate))))
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let predicate = Arc::clone(&self.predicate);
        let stream = try_stream! {
            while let Some(batch) = input.next().await {
                let batch = batch?;
                ctx.check_cancelled()?;
                let mask = predicate.evaluate(&batch)?.into_array()?.as_mask()?;
                let batch = batch.filter(&mask)?;
                if !batch.is_empty() {
                    yield batch;
                }
            }
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for FilterExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FilterExec: {}", self.predicate)
    }
}

/// Skips `skip` rows and then passes on at most `fetch` rows. The input is
/// dropped as soon as enough rows were produced.
#[derive(Debug)]
pub struct LimitExec {
    input: Arc<dyn ExecutionPlan>,
    skip: usize,
    fetch: Option<usize>,
}

impl LimitExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, skip: usize, fetch: Option<usize>) -> Self {
        Self { input, skip, fetch }
    }

    pub fn fetch(&self) -> Option<usize> {
        self.fetch
    }
}

impl ExecutionPlan for LimitExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }

    fn with_new_children(self: Arc<Self>, children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        let input = single_child("LimitExec", children)?;
        Ok(Arc::new(LimitExec::new(input, self.skip, self.fetch)))
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        if self.fetch == Some(0) {
            return Ok(empty_stream(self.schema()));
        }
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let mut skip = self.skip;
        let mut remaining = self.fetch.unwrap_or(usize::MAX);
        let stream = try_stream! {
            while let Some(batch) = input.next().await {
                let batch = batch?;
                ctx.check_cancelled()?;
                if skip >= batch.num_rows() {
                    skip -= batch.num_rows();
                    continue;
                }
                let len = remaining.min(batch.num_rows() - skip);
                let batch = batch.slice(skip, len)?;
                skip = 0;
                remaining -= len;
                yield batch;
                if remaining == 0 {
                    break;
                }
            }
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for LimitExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LimitExec: skip={}", self.skip)?;
        match self.fetch {
            Some(n) => write!(f, ", fetch={n}"),
            None => write!(f, ", fetch=None"),
        }
    }
}

/// One sort key of a [`SortExec`].
#[derive(Debug, Clone)]
pub struct PhysicalSortExpr {
    expr: Arc<dyn PhysicalExpr>,
    asc: bool,
    nulls_first: bool,
}

impl PhysicalSortExpr {
    pub fn new(expr: Arc<dyn PhysicalExpr>, asc: bool, nulls_first: bool) -> Self {
        Self { expr, asc, nulls_first }
    }

    /// Nulls are placed by `nulls_first` alone, the direction only flips
    /// the order of the other values.
    fn compare(&self, a: &ScalarValue, b: &ScalarValue) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if self.nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if self.nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let o = a.partial_cmp(b).unwrap_or(Ordering::Equal);
                if self.asc {
                    o
                } else {
                    o.reverse()
                }
            }
        }
    }
}

impl Display for PhysicalSortExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expr)?;
        write!(f, "{}", if self.asc { " ASC" } else { " DESC" })?;
        write!(f, "{}", if self.nulls_first { " NULLS FIRST" } else { " NULLS LAST" })
    }
}

/// Sort physical executor. It is a pipeline breaker that needs every input
/// row before emitting the first one.
/// TODO: spill to disk once the buffered input exceeds a memory limit.
#[derive(Debug)]
pub struct SortExec {
    input: Arc<dyn ExecutionPlan>,
    order: Vec<PhysicalSortExpr>,
}

impl SortExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, order: Vec<PhysicalSortExpr>) -> Self {
        Self { input, order }
    }
}

impl ExecutionPlan for SortExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }

    fn with_new_children(self: Arc<Self>, children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        let input = single_child("SortExec", children)?;
        Ok(Arc::new(SortExec::new(input, self.order.clone())))
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let order = self.order.clone();
        let schema = self.schema();
        let stream = try_stream! {
            let mut batches = vec![];
            while let Some(batch) = input.next().await {
                ctx.check_cancelled()?;
                batches.push(batch?);
            }
            let batch = RecordBatch::concat(Arc::clone(&schema), &batches)?;
            drop(batches);

            // The sort keys of every row, one value per order item.
            let keys = order.iter().map(|o| o.expr.evaluate(&batch)).collect::<Result<Vec<_>>>()?;
            let keys = (0..batch.num_rows())
                .map(|i| keys.iter().map(|k| k.value(i)).collect::<Vec<_>>())
                .collect::<Vec<_>>();

            let mut indices = (0..batch.num_rows()).collect::<Vec<_>>();
            indices.sort_by(|a, b| {
                for (o, (x, y)) in order.iter().zip(keys[*a].iter().zip(keys[*b].iter())) {
                    match o.compare(x, y) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                Ordering::Equal
            });
            debug!("Sorted {} rows", indices.len());

            let indices = indices.into_iter().map(Some).collect::<Vec<_>>();
            for chunk in indices.chunks(ctx.batch_size().max(1)) {
                ctx.check_cancelled()?;
                yield batch.take(chunk)?;
            }
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for SortExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SortExec: ")?;
        for (i, it) in self.order.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{it}")?;
        }
        Ok(())
    }
}

/// Runs every input concurrently and merges their batches as they arrive.
/// Rows of one input keep their relative order, inputs interleave.
#[derive(Debug)]
pub struct UnionExec {
    inputs: Vec<Arc<dyn ExecutionPlan>>,
    schema: SchemaRef,
}

impl UnionExec {
    pub fn new(inputs: Vec<Arc<dyn ExecutionPlan>>, schema: SchemaRef) -> Self {
        Self { inputs, schema }
    }
}

impl ExecutionPlan for UnionExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        self.inputs.iter().collect()
    }

    fn with_new_children(self: Arc<Self>, children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        check_children("UnionExec", &children, self.inputs.len())?;
        Ok(Arc::new(UnionExec::new(children, Arc::clone(&self.schema))))
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let inputs = self.inputs.iter().map(|p| p.execute(Arc::clone(&ctx))).collect::<Result<Vec<_>>>()?;
        let schema = self.schema();
        let stream = try_stream! {
            let (tx, rx) = mpsc::channel(inputs.len().max(1) * 2);
            let mut tasks = AbortOnDrop::default();
            for mut input in inputs {
                let tx = tx.clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(batch) = input.next().await {
                        let failed = batch.is_err();
                        if tx.send(batch).await.is_err() || failed {
                            break;
                        }
                    }
                }));
            }
            drop(tx);

            let mut merged = ReceiverStream::new(rx);
            while let Some(batch) = merged.next().await {
                ctx.check_cancelled()?;
                yield batch?.with_schema(Arc::clone(&schema))?;
            }
            drop(tasks);
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for UnionExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "UnionExec")
    }
}

/// Pairs every left row with every right row. The left input is
/// materialized, the right input streams.
#[derive(Debug)]
pub struct CrossJoinExec {
    left: Arc<dyn ExecutionPlan>,
    right: Arc<dyn ExecutionPlan>,
    schema: SchemaRef,
}

impl CrossJoinExec {
    pub fn new(left: Arc<dyn ExecutionPlan>, right: Arc<dyn ExecutionPlan>, schema: SchemaRef) -> Self {
        Self { left, right, schema }
    }
}

impl ExecutionPlan for CrossJoinExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.left, &self.right]
    }

    fn with_new_children(self: Arc<Self>, children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        let (left, right) = two_children("CrossJoinExec", children)?;
        Ok(Arc::new(CrossJoinExec::new(left, right, Arc::clone(&self.schema))))
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let left = Arc::clone(&self.left);
        let right = Arc::clone(&self.right);
        let schema = self.schema();
        let stream = try_stream! {
            let batch_size = ctx.batch_size().max(1);
            let mut input = left.execute(Arc::clone(&ctx))?;
            let mut batches = vec![];
            while let Some(batch) = input.next().await {
                ctx.check_cancelled()?;
                batches.push(batch?);
            }
            let left = RecordBatch::concat(left.schema(), &batches)?;
            drop(batches);

            // an empty left side never pairs, the right side is not run
            let mut input = if left.is_empty() { empty_stream(right.schema()) } else { right.execute(Arc::clone(&ctx))? };
            while let Some(batch) = input.next().await {
                let batch = batch?;
                let mut lidx = Vec::with_capacity(batch_size);
                let mut ridx = Vec::with_capacity(batch_size);
                for l in 0..left.num_rows() {
                    for r in 0..batch.num_rows() {
                        lidx.push(Some(l));
                        ridx.push(Some(r));
                        if lidx.len() == batch_size {
                            ctx.check_cancelled()?;
                            yield combine(&schema, &left, &batch, &lidx, &ridx)?;
                            lidx.clear();
                            ridx.clear();
                        }
                    }
                }
                if !lidx.is_empty() {
                    yield combine(&schema, &left, &batch, &lidx, &ridx)?;
                }
            }
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for CrossJoinExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CrossJoinExec")
    }
}

/// Produces no rows, or a single row without columns for `SELECT` without
/// `FROM`.
#[derive(Debug)]
pub struct EmptyExec {
    produce_one_row: bool,
    schema: SchemaRef,
}

impl EmptyExec {
    pub fn new(produce_one_row: bool, schema: SchemaRef) -> Self {
        Self { produce_one_row, schema }
    }
}

impl ExecutionPlan for EmptyExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn with_new_children(self: Arc<Self>, _children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        Ok(self)
    }

    fn execute(&self, _ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        if !self.produce_one_row {
            return Ok(empty_stream(self.schema()));
        }
        let schema = self.schema();
        let columns = schema.fields().iter().map(|f| RecordArray::new_null(&f.datatype, 1)).collect();
        let batch = RecordBatch::try_new_with_rows(Arc::clone(&schema), columns, 1)?;
        let stream = try_stream! {
            yield batch;
        };
        Ok(adapt(schema, stream))
    }
}

impl Display for EmptyExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EmptyExec: produce_one_row={}", self.produce_one_row)
    }
}

/// Emits the rendered `(plan_type, plan)` lines of an `EXPLAIN`.
#[derive(Debug)]
pub struct ExplainExec {
    rows: Vec<(String, String)>,
    schema: SchemaRef,
}

impl ExplainExec {
    pub fn new(rows: Vec<(String, String)>, schema: SchemaRef) -> Self {
        Self { rows, schema }
    }
}

impl ExecutionPlan for ExplainExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn with_new_children(self: Arc<Self>, _children: Vec<Arc<dyn ExecutionPlan>>) -> Result<Arc<dyn ExecutionPlan>> {
        Ok(self)
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let plan_types = self.rows.iter().map(|(t, _)| ScalarValue::Utf8(t.clone()));
        let plan_types = RecordArray::from_values(&DataType::Utf8, plan_types)?;
        let plans = RecordArray::from_values(&DataType::Utf8, self.rows.iter().map(|(_, p)| ScalarValue::Utf8(p.clone())))?;
        let batch = RecordBatch::try_new_with_rows(self.schema(), vec![plan_types, plans], self.rows.len())?;
        let batches = chunks(batch, ctx.batch_size())?;
        let stream = try_stream! {
            for batch in batches {
                yield batch;
            }
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for ExplainExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExplainExec")
    }
}
