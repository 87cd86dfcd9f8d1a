use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;
use log::debug;

use crate::access::array::RecordArray;
use crate::access::batch::RecordBatch;
use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::internal_err;
use crate::sql::execution::compiler::check_children;
use crate::sql::execution::compiler::ExecutionPlan;
use crate::sql::execution::context::QueryContext;
use crate::sql::execution::expr::ColumnExec;
use crate::sql::execution::expr::PhysicalExpr;
use crate::sql::execution::join::chunks;
use crate::sql::execution::stream::adapt;
use crate::sql::execution::stream::SendableRecordBatchStream;
use crate::sql::plan::schema::Field;
use crate::sql::plan::schema::LogicalSchema;
use crate::sql::plan::schema::SchemaRef;
use crate::sql::plan::schema::TableReference;
use crate::sql::udf::aggregate::Accumulator;
use crate::sql::udf::aggregate::AggregateUDF;

type GroupId = usize;

/// An aggregate function call with its compiled arguments.
#[derive(Debug, Clone)]
pub struct AggregateExpr {
    func: Arc<dyn AggregateUDF>,
    args: Vec<Arc<dyn PhysicalExpr>>,
    /// The name of the output column, e.g. `count(t.b)`
    name: String,
    arg_types: Vec<DataType>,
}

impl AggregateExpr {
    pub fn try_new(
        func: Arc<dyn AggregateUDF>,
        args: Vec<Arc<dyn PhysicalExpr>>,
        name: impl Into<String>,
        input_schema: &LogicalSchema,
    ) -> Result<Self> {
        let arg_types = args.iter().map(|a| a.data_type(input_schema)).collect::<Result<Vec<_>>>()?;
        // fails early on argument types the function does not take
        func.return_type(&arg_types)?;
        Ok(Self { func, args, name: name.into(), arg_types })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self) -> Result<Field> {
        Ok(Field::new(self.name.clone(), self.func.return_type(&self.arg_types)?, true))
    }

    pub fn state_fields(&self) -> Result<Vec<Field>> {
        self.func.state_fields(&self.name, &self.arg_types)
    }

    fn accumulator(&self) -> Result<Box<dyn Accumulator>> {
        self.func.accumulator(&self.arg_types)
    }
}

impl Display for AggregateExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
    /// Feed input rows to the accumulators and emit their states.
    Partial,
    /// Merge the states of a partial aggregate and emit the results.
    Final,
}

impl Display for AggregateMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateMode::Partial => write!(f, "Partial"),
            AggregateMode::Final => write!(f, "Final"),
        }
    }
}

/// The distinct group keys seen so far, in the order of their first row.
#[derive(Debug, Default)]
struct GroupValues {
    ids: HashMap<Vec<ScalarValue>, GroupId>,
    keys: Vec<Vec<ScalarValue>>,
}

impl GroupValues {
    /// The id of the group `key` belongs to, registering a new group if
    /// needed. Nulls group together.
    fn push(&mut self, key: Vec<ScalarValue>) -> (GroupId, bool) {
        if let Some(gid) = self.ids.get(&key) {
            return (*gid, false);
        }
        let gid = self.keys.len();
        self.ids.insert(key.clone(), gid);
        self.keys.push(key);
        (gid, true)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The rows of one batch grouped by group id, groups in order of first
/// appearance in the batch.
#[derive(Debug, Default)]
struct BatchGroups {
    gids: Vec<GroupId>,
    row_indices: HashMap<GroupId, Vec<usize>>,
}

impl BatchGroups {
    fn insert(&mut self, gid: GroupId, row: usize) {
        let rows = self.row_indices.entry(gid).or_insert_with(|| {
            self.gids.push(gid);
            vec![]
        });
        rows.push(row);
    }

    fn entries(&self) -> impl Iterator<Item = (GroupId, &[usize])> + '_ {
        self.gids.iter().filter_map(|gid| self.row_indices.get(gid).map(|rows| (*gid, rows.as_slice())))
    }
}

/// The state of an aggregation across batches.
#[derive(Debug)]
struct GroupedAccumulators<'a> {
    aggr_exprs: &'a [AggregateExpr],
    groups: GroupValues,
    /// One accumulator per aggregate expression for every group.
    accumulators: Vec<Vec<Box<dyn Accumulator>>>,
}

impl<'a> GroupedAccumulators<'a> {
    fn new(aggr_exprs: &'a [AggregateExpr]) -> Self {
        Self { aggr_exprs, groups: GroupValues::default(), accumulators: vec![] }
    }

    fn group_rows(&mut self, group_exprs: &[Arc<dyn PhysicalExpr>], batch: &RecordBatch) -> Result<BatchGroups> {
        let keys = group_exprs.iter().map(|e| e.evaluate(batch)).collect::<Result<Vec<_>>>()?;
        let mut groups = BatchGroups::default();
        for row in 0..batch.num_rows() {
            let key = keys.iter().map(|k| k.value(row)).collect::<Vec<_>>();
            let (gid, new) = self.groups.push(key);
            if new {
                let accumulators = self.aggr_exprs.iter().map(|a| a.accumulator()).collect::<Result<Vec<_>>>()?;
                self.accumulators.push(accumulators);
            }
            groups.insert(gid, row);
        }
        Ok(groups)
    }

    /// Feed the argument values of the rows to their group accumulators.
    fn update(&mut self, group_exprs: &[Arc<dyn PhysicalExpr>], batch: &RecordBatch) -> Result<()> {
        let groups = self.group_rows(group_exprs, batch)?;
        for (i, aggr) in self.aggr_exprs.iter().enumerate() {
            let args = aggr
                .args
                .iter()
                .map(|a| a.evaluate(batch).and_then(|v| v.into_array()))
                .collect::<Result<Vec<_>>>()?;
            for (gid, rows) in groups.entries() {
                self.accumulators[gid][i].update_batch(&args, rows)?;
            }
        }
        Ok(())
    }

    /// Merge the state columns, found from `offset` on, into their group
    /// accumulators.
    fn merge(&mut self, group_exprs: &[Arc<dyn PhysicalExpr>], batch: &RecordBatch, offset: usize) -> Result<()> {
        let groups = self.group_rows(group_exprs, batch)?;
        let mut column = offset;
        for i in 0..self.aggr_exprs.len() {
            let width = self.aggr_exprs[i].state_fields()?.len();
            let states = &batch.columns()[column..column + width];
            for (gid, rows) in groups.entries() {
                for row in rows {
                    let state = states.iter().map(|c| c.value(*row)).collect::<Vec<_>>();
                    self.accumulators[gid][i].merge(&state)?;
                }
            }
            column += width;
        }
        Ok(())
    }

    /// One row per group, the group key followed by the output of `f` for
    /// every accumulator.
    fn emit<F>(self, schema: &SchemaRef, f: F) -> Result<RecordBatch>
    where
        F: Fn(&dyn Accumulator) -> Result<Vec<ScalarValue>>,
    {
        let mut columns = schema.fields().iter().map(|f| RecordArray::new(&f.datatype)).collect::<Vec<_>>();
        let num_rows = self.groups.len();
        for (key, accumulators) in self.groups.keys.into_iter().zip(self.accumulators) {
            let mut row = key;
            for a in &accumulators {
                row.extend(f(a.as_ref())?);
            }
            if row.len() != columns.len() {
                return Err(internal_err!("Aggregate row has {} values, expect {}", row.len(), columns.len()));
            }
            for (c, v) in columns.iter_mut().zip(row) {
                c.push(v)?;
            }
        }
        RecordBatch::try_new_with_rows(Arc::clone(schema), columns, num_rows)
    }
}

/// Aggregate physical executor. It runs as a `Partial` aggregate producing
/// accumulator states per group, topped by a `Final` aggregate merging
/// them. Both are pipeline breakers.
#[derive(Debug)]
pub struct AggregateExec {
    mode: AggregateMode,
    input: Arc<dyn ExecutionPlan>,
    group_exprs: Vec<Arc<dyn PhysicalExpr>>,
    aggr_exprs: Vec<AggregateExpr>,
    schema: SchemaRef,
}

impl AggregateExec {
    /// The partial phase, whose output is the group columns followed by the
    /// state columns of every aggregate.
    pub fn try_new_partial(
        input: Arc<dyn ExecutionPlan>,
        groups: Vec<(Arc<dyn PhysicalExpr>, (Option<TableReference>, Field))>,
        aggr_exprs: Vec<AggregateExpr>,
    ) -> Result<Self> {
        let mut fields = vec![];
        let mut qualifiers = vec![];
        let mut group_exprs = vec![];
        for (expr, (qualifier, field)) in groups {
            group_exprs.push(expr);
            fields.push(field);
            qualifiers.push(qualifier);
        }
        for aggr in &aggr_exprs {
            for field in aggr.state_fields()? {
                fields.push(field);
                qualifiers.push(None);
            }
        }
        let schema = Arc::new(LogicalSchema::new(fields.into(), qualifiers)?);
        Ok(Self { mode: AggregateMode::Partial, input, group_exprs, aggr_exprs, schema })
    }

    /// The final phase over `partial`, producing `schema`.
    pub fn try_new_final(partial: Arc<AggregateExec>, schema: SchemaRef) -> Result<Self> {
        if partial.mode != AggregateMode::Partial {
            return Err(internal_err!("Final aggregate expects a partial aggregate input"));
        }
        let num_groups = partial.group_exprs.len();
        if schema.len() != num_groups + partial.aggr_exprs.len() {
            return Err(internal_err!(
                "Aggregate schema has {} columns, expect {}",
                schema.len(),
                num_groups + partial.aggr_exprs.len()
            ));
        }
        let partial_schema = partial.schema();
        let group_exprs = (0..num_groups)
            .map(|i| Arc::new(ColumnExec::new(partial_schema.field(i).name.clone(), i)) as Arc<dyn PhysicalExpr>)
            .collect();
        let aggr_exprs = partial.aggr_exprs.clone();
        Ok(Self { mode: AggregateMode::Final, input: partial, group_exprs, aggr_exprs, schema })
    }

    pub fn mode(&self) -> AggregateMode {
        self.mode
    }

    fn with_input(&self, input: Arc<dyn ExecutionPlan>) -> Self {
        Self {
            mode: self.mode,
            input,
            group_exprs: self.group_exprs.clone(),
            aggr_exprs: self.aggr_exprs.clone(),
            schema: Arc::clone(&self.schema),
        }
    }
}

impl ExecutionPlan for AggregateExec {
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
        check_children("AggregateExec", &children, 1)?;
        match children.into_iter().next() {
            Some(input) => Ok(Arc::new(self.with_input(input))),
            None => Err(internal_err!("AggregateExec expects 1 child")),
        }
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let mode = self.mode;
        let group_exprs = self.group_exprs.clone();
        let aggr_exprs = self.aggr_exprs.clone();
        let schema = self.schema();
        let stream = try_stream! {
            let mut state = GroupedAccumulators::new(&aggr_exprs);
            while let Some(batch) = input.next().await {
                let batch = batch?;
                ctx.check_cancelled()?;
                match mode {
                    AggregateMode::Partial => state.update(&group_exprs, &batch)?,
                    AggregateMode::Final => state.merge(&group_exprs, &batch, group_exprs.len())?,
                }
            }

            // Without grouping the result is one row even for an empty
            // input, e.g. `SELECT count(*) FROM empty` gives 0.
            if mode == AggregateMode::Final && group_exprs.is_empty() && state.groups.is_empty() {
                state.groups.push(vec![]);
                let accumulators = aggr_exprs.iter().map(|a| a.accumulator()).collect::<Result<Vec<_>>>()?;
                state.accumulators.push(accumulators);
            }
            debug!("{} aggregate produced {} groups", mode, state.groups.len());

            let output = match mode {
                AggregateMode::Partial => state.emit(&schema, |a| a.state())?,
                AggregateMode::Final => state.emit(&schema, |a| Ok(vec![a.evaluate()?]))?,
            };
            if !output.is_empty() {
                for chunk in chunks(output, ctx.batch_size())? {
                    yield chunk;
                }
            }
        };
        Ok(adapt(self.schema(), stream))
    }
}

impl Display for AggregateExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let group_by = self.group_exprs.iter().map(|it| it.to_string()).collect::<Vec<_>>().join(", ");
        let aggr = self.aggr_exprs.iter().map(|it| it.to_string()).collect::<Vec<_>>().join(", ");
        write!(f, "AggregateExec: mode={}, gby=[{}], aggr=[{}]", self.mode, group_by, aggr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::MemTable;
    use crate::catalog::table::TableProvider;
    use crate::sql::execution::stream::collect_batch;
    use crate::sql::udf::aggregate::avg;
    use crate::sql::udf::aggregate::count;
    use crate::sql::udf::aggregate::sum;

    fn input(rows: &[(&str, Option<i64>)]) -> Result<Arc<dyn ExecutionPlan>> {
        let schema = Arc::new(LogicalSchema::try_from_qualified(
            &TableReference::new("t"),
            vec![Field::new("k", DataType::Utf8, false), Field::new("v", DataType::Integer, true)].into(),
        )?);
        let rows = rows
            .iter()
            .map(|(k, v)| vec![ScalarValue::from(*k), v.map(ScalarValue::Int64).unwrap_or(ScalarValue::Null)])
            .collect::<Vec<_>>();
        let batch = RecordBatch::from_rows(Arc::clone(&schema), &rows)?;
        MemTable::try_new("t", schema, vec![batch])?.scan(None)
    }

    fn aggregate(input: Arc<dyn ExecutionPlan>, grouped: bool) -> Result<AggregateExec> {
        let schema = input.schema();
        let v = || Arc::new(ColumnExec::new("v", 1)) as Arc<dyn PhysicalExpr>;
        let aggrs = vec![
            AggregateExpr::try_new(count(), vec![v()], "count(t.v)", &schema)?,
            AggregateExpr::try_new(sum(), vec![v()], "sum(t.v)", &schema)?,
            AggregateExpr::try_new(avg(), vec![v()], "avg(t.v)", &schema)?,
        ];
        let mut fields = vec![];
        let mut qualifiers = vec![];
        let mut groups = vec![];
        if grouped {
            let field = Field::new("k", DataType::Utf8, false);
            groups.push((Arc::new(ColumnExec::new("k", 0)) as Arc<dyn PhysicalExpr>, (Some(TableReference::new("t")), field.clone())));
            fields.push(field);
            qualifiers.push(Some(TableReference::new("t")));
        }
        for a in &aggrs {
            fields.push(a.field()?);
            qualifiers.push(None);
        }
        let output = Arc::new(LogicalSchema::new(fields.into(), qualifiers)?);
        let partial = AggregateExec::try_new_partial(input, groups, aggrs)?;
        AggregateExec::try_new_final(Arc::new(partial), output)
    }

    fn rows(batch: &RecordBatch) -> Vec<String> {
        (0..batch.num_rows())
            .map(|i| batch.row(i).iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
            .collect()
    }

    #[tokio::test]
    async fn test_grouped() -> Result<()> {
        let plan = aggregate(input(&[("a", Some(1)), ("b", None), ("a", Some(3)), ("b", Some(4)), ("c", None)])?, true)?;
        let ctx = Arc::new(QueryContext::default().with_batch_size(2));
        let out = collect_batch(plan.execute(ctx)?).await?;
        // groups come out in order of their first row
        assert_eq!(vec!["'a',2,4,2.00", "'b',1,4,4.00", "'c',0,NULL,NULL"], rows(&out));
        Ok(())
    }

    #[tokio::test]
    async fn test_ungrouped_empty_input() -> Result<()> {
        let plan = aggregate(input(&[])?, false)?;
        let out = collect_batch(plan.execute(Arc::new(QueryContext::default()))?).await?;
        assert_eq!(vec!["0,NULL,NULL"], rows(&out));

        let plan = aggregate(input(&[])?, true)?;
        let out = collect_batch(plan.execute(Arc::new(QueryContext::default()))?).await?;
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        let plan = aggregate(input(&[])?, true)?;
        assert_eq!("AggregateExec: mode=Final, gby=[k@0], aggr=[count(t.v), sum(t.v), avg(t.v)]", plan.to_string());
        let partial = plan.children()[0].to_string();
        assert_eq!("AggregateExec: mode=Partial, gby=[k@0], aggr=[count(t.v), sum(t.v), avg(t.v)]", partial);
        Ok(())
    }
}
