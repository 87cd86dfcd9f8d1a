use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;
use log::debug;

use crate::access::batch::RecordBatch;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::internal_err;
use crate::sql::execution::compiler::check_children;
use crate::sql::execution::compiler::ExecutionPlan;
use crate::sql::execution::context::QueryContext;
use crate::sql::execution::expr::PhysicalExpr;
use crate::sql::execution::stream::adapt;
use crate::sql::execution::stream::SendableRecordBatchStream;
use crate::sql::plan::plan::JoinType;
use crate::sql::plan::schema::SchemaRef;

/// Pairs of `(left key, right key)` expressions, each evaluated against
/// its own input.
pub type JoinOn = Vec<(Arc<dyn PhysicalExpr>, Arc<dyn PhysicalExpr>)>;

/// The residual, non-equality part of a join condition. It is evaluated over
/// the left columns followed by the right columns of each candidate pair.
#[derive(Debug, Clone)]
pub struct JoinFilter {
    expr: Arc<dyn PhysicalExpr>,
}

impl JoinFilter {
    pub fn new(expr: Arc<dyn PhysicalExpr>) -> Self {
        Self { expr }
    }

    pub fn expr(&self) -> &Arc<dyn PhysicalExpr> {
        &self.expr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    fn other(self) -> JoinSide {
        match self {
            JoinSide::Left => JoinSide::Right,
            JoinSide::Right => JoinSide::Left,
        }
    }
}

/// The side whose rows all appear in the output, padded with nulls.
fn preserves(join_type: JoinType, side: JoinSide) -> bool {
    match side {
        JoinSide::Left => matches!(join_type, JoinType::Left | JoinType::Full),
        JoinSide::Right => matches!(join_type, JoinType::Right | JoinType::Full),
    }
}

/// For semi and anti joins, the side producing the output and whether rows
/// without a match are the ones kept.
fn semi_side(join_type: JoinType) -> Option<(JoinSide, bool)> {
    match join_type {
        JoinType::LeftSemi => Some((JoinSide::Left, false)),
        JoinType::LeftAnti => Some((JoinSide::Left, true)),
        JoinType::RightSemi => Some((JoinSide::Right, false)),
        JoinType::RightAnti => Some((JoinSide::Right, true)),
        _ => None,
    }
}

/// Side by side the rows of `left` and `right` at the given positions, a
/// `None` position producing nulls.
pub(crate) fn combine(
    schema: &SchemaRef,
    left: &RecordBatch,
    right: &RecordBatch,
    lidx: &[Option<usize>],
    ridx: &[Option<usize>],
) -> Result<RecordBatch> {
    let mut columns = Vec::with_capacity(left.num_columns() + right.num_columns());
    for c in left.columns() {
        columns.push(c.take(lidx)?);
    }
    for c in right.columns() {
        columns.push(c.take(ridx)?);
    }
    RecordBatch::try_new_with_rows(Arc::clone(schema), columns, lidx.len())
}

/// Cut a batch into batches of at most `size` rows.
pub(crate) fn chunks(batch: RecordBatch, size: usize) -> Result<Vec<RecordBatch>> {
    if batch.num_rows() <= size {
        return Ok(vec![batch]);
    }
    let size = size.max(1);
    (0..batch.num_rows())
        .step_by(size)
        .map(|offset| batch.slice(offset, size.min(batch.num_rows() - offset)))
        .collect()
}

/// Evaluate the key expressions row by row.
fn evaluate_keys(exprs: &[Arc<dyn PhysicalExpr>], batch: &RecordBatch) -> Result<Vec<Vec<ScalarValue>>> {
    let values = exprs.iter().map(|e| e.evaluate(batch)).collect::<Result<Vec<_>>>()?;
    Ok((0..batch.num_rows()).map(|i| values.iter().map(|v| v.value(i)).collect()).collect())
}

/// A null key only matches a null key when `null_equals_null` is set.
fn keys_equal(a: &[ScalarValue], b: &[ScalarValue], null_equals_null: bool) -> bool {
    a.iter().zip(b).all(|(a, b)| match (a.is_null(), b.is_null()) {
        (false, false) => a == b,
        (true, true) => null_equals_null,
        _ => false,
    })
}

/// The hash of a key, `None` when it can never match.
fn hash_key(key: &[ScalarValue], null_equals_null: bool) -> Option<u64> {
    if !null_equals_null && key.iter().any(|v| v.is_null()) {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    Some(hasher.finish())
}

/// The join logic shared by the hash join and the nested loop join. They
/// only differ in which build rows are candidates for a probe row.
#[derive(Debug, Clone)]
struct Joiner {
    join_type: JoinType,
    build_side: JoinSide,
    filter: Option<JoinFilter>,
    /// Left then right columns, the input of the filter.
    intermediate: SchemaRef,
    schema: SchemaRef,
}

impl Joiner {
    fn left_right<'a>(
        &self,
        build: &'a RecordBatch,
        probe: &'a RecordBatch,
    ) -> (&'a RecordBatch, &'a RecordBatch) {
        match self.build_side {
            JoinSide::Left => (build, probe),
            JoinSide::Right => (probe, build),
        }
    }

    /// Split `(build, probe)` positions into left and right positions.
    fn indices(&self, rows: &[(Option<usize>, Option<usize>)]) -> (Vec<Option<usize>>, Vec<Option<usize>>) {
        let (b, p): (Vec<_>, Vec<_>) = rows.iter().copied().unzip();
        match self.build_side {
            JoinSide::Left => (b, p),
            JoinSide::Right => (p, b),
        }
    }

    /// Drop the candidate `(build, probe)` pairs the filter rejects.
    fn apply_filter(
        &self,
        build: &RecordBatch,
        probe: &RecordBatch,
        pairs: Vec<(usize, usize)>,
        batch_size: usize,
    ) -> Result<Vec<(usize, usize)>> {
        let filter = match &self.filter {
            Some(filter) => filter,
            None => return Ok(pairs),
        };
        let (left, right) = self.left_right(build, probe);
        let mut kept = Vec::with_capacity(pairs.len());
        for chunk in pairs.chunks(batch_size.max(1)) {
            let rows = chunk.iter().map(|(b, p)| (Some(*b), Some(*p))).collect::<Vec<_>>();
            let (lidx, ridx) = self.indices(&rows);
            let batch = combine(&self.intermediate, left, right, &lidx, &ridx)?;
            let mask = filter.expr.evaluate(&batch)?.into_array()?.as_mask()?;
            kept.extend(chunk.iter().zip(mask).filter(|(_, m)| *m).map(|(pair, _)| *pair));
        }
        Ok(kept)
    }

    fn output(
        &self,
        build: &RecordBatch,
        probe: &RecordBatch,
        rows: &[(Option<usize>, Option<usize>)],
    ) -> Result<RecordBatch> {
        let (left, right) = self.left_right(build, probe);
        let (lidx, ridx) = self.indices(rows);
        match semi_side(self.join_type) {
            Some((JoinSide::Left, _)) => left.take(&lidx)?.with_schema(Arc::clone(&self.schema)),
            Some((JoinSide::Right, _)) => right.take(&ridx)?.with_schema(Arc::clone(&self.schema)),
            None => combine(&self.schema, left, right, &lidx, &ridx),
        }
    }

    /// The rows a probe batch produces right away, marking the build rows
    /// it matched.
    fn probe_output(
        &self,
        build: &RecordBatch,
        probe: &RecordBatch,
        pairs: &[(usize, usize)],
        visited: &mut [bool],
    ) -> Result<Option<RecordBatch>> {
        let probe_side = self.build_side.other();
        let mut by_probe = vec![vec![]; probe.num_rows()];
        for &(b, p) in pairs {
            visited[b] = true;
            by_probe[p].push(b);
        }

        let mut rows = vec![];
        match semi_side(self.join_type) {
            Some((side, anti)) if side == probe_side => {
                for (p, matches) in by_probe.iter().enumerate() {
                    if matches.is_empty() == anti {
                        rows.push((None, Some(p)));
                    }
                }
            }
            Some(_) => return Ok(None),
            None => {
                let keep_unmatched = preserves(self.join_type, probe_side);
                for (p, matches) in by_probe.iter().enumerate() {
                    if matches.is_empty() && keep_unmatched {
                        rows.push((None, Some(p)));
                    }
                    rows.extend(matches.iter().map(|b| (Some(*b), Some(p))));
                }
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }
        self.output(build, probe, &rows).map(Some)
    }

    /// The build rows that can only be decided once every probe row was
    /// seen.
    fn final_output(&self, build: &RecordBatch, probe: &RecordBatch, visited: &[bool]) -> Result<Option<RecordBatch>> {
        // whether a build row was visited decides if it comes out
        let emit_visited = match semi_side(self.join_type) {
            Some((side, anti)) if side == self.build_side => !anti,
            Some(_) => return Ok(None),
            None if preserves(self.join_type, self.build_side) => false,
            None => return Ok(None),
        };
        let rows = visited
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == emit_visited)
            .map(|(b, _)| (Some(b), None))
            .collect::<Vec<_>>();
        if rows.is_empty() {
            return Ok(None);
        }
        self.output(build, probe, &rows).map(Some)
    }
}

/// Run a join: materialize the build side, stream the probe side through
/// it, and flush the build rows decided at the end.
#[allow(clippy::too_many_arguments)]
fn join_stream(
    left: Arc<dyn ExecutionPlan>,
    right: Arc<dyn ExecutionPlan>,
    on: JoinOn,
    joiner: Joiner,
    hashed: bool,
    null_equals_null: bool,
    ctx: Arc<QueryContext>,
) -> SendableRecordBatchStream {
    let schema = Arc::clone(&joiner.schema);
    let stream = try_stream! {
        let (lkeys, rkeys): (Vec<_>, Vec<_>) = on.into_iter().unzip();
        let (build_plan, probe_plan, build_keys, probe_keys) = match joiner.build_side {
            JoinSide::Left => (left, right, lkeys, rkeys),
            JoinSide::Right => (right, left, rkeys, lkeys),
        };
        let batch_size = ctx.batch_size();

        let mut input = build_plan.execute(Arc::clone(&ctx))?;
        let mut batches = vec![];
        while let Some(batch) = input.next().await {
            ctx.check_cancelled()?;
            batches.push(batch?);
        }
        let build = RecordBatch::concat(build_plan.schema(), &batches)?;
        drop(batches);
        let build_values = evaluate_keys(&build_keys, &build)?;

        let mut table: HashMap<u64, Vec<usize>> = HashMap::new();
        if hashed {
            for (i, key) in build_values.iter().enumerate() {
                if let Some(h) = hash_key(key, null_equals_null) {
                    table.entry(h).or_default().push(i);
                }
            }
        }
        debug!("Join build side has {} rows", build.num_rows());

        let mut visited = vec![false; build.num_rows()];
        let mut probe_schema = probe_plan.schema();
        let mut input = probe_plan.execute(Arc::clone(&ctx))?;
        while let Some(probe) = input.next().await {
            let probe = probe?;
            ctx.check_cancelled()?;
            probe_schema = probe.schema();
            let probe_values = evaluate_keys(&probe_keys, &probe)?;

            let mut pairs = vec![];
            for (p, key) in probe_values.iter().enumerate() {
                if hashed {
                    let candidates = hash_key(key, null_equals_null).and_then(|h| table.get(&h));
                    // equal hashes do not mean equal keys
                    for &b in candidates.into_iter().flatten() {
                        if keys_equal(&build_values[b], key, null_equals_null) {
                            pairs.push((b, p));
                        }
                    }
                } else {
                    for (b, build_key) in build_values.iter().enumerate() {
                        if keys_equal(build_key, key, null_equals_null) {
                            pairs.push((b, p));
                        }
                    }
                }
            }
            let pairs = joiner.apply_filter(&build, &probe, pairs, batch_size)?;
            if let Some(out) = joiner.probe_output(&build, &probe, &pairs, &mut visited)? {
                for chunk in chunks(out, batch_size)? {
                    yield chunk;
                }
            }
        }

        let probe = RecordBatch::new_empty(probe_schema);
        if let Some(out) = joiner.final_output(&build, &probe, &visited)? {
            for chunk in chunks(out, batch_size)? {
                yield chunk;
            }
        }
    };
    adapt(schema, stream)
}

fn joiner(
    left: &Arc<dyn ExecutionPlan>,
    right: &Arc<dyn ExecutionPlan>,
    filter: Option<JoinFilter>,
    join_type: JoinType,
    build_side: JoinSide,
    schema: &SchemaRef,
) -> Result<Joiner> {
    let intermediate = Arc::new(left.schema().join(&right.schema()));
    let expect = match join_type {
        JoinType::LeftSemi | JoinType::LeftAnti => left.schema().len(),
        JoinType::RightSemi | JoinType::RightAnti => right.schema().len(),
        _ => intermediate.len(),
    };
    if schema.len() != expect {
        return Err(internal_err!("{} join expects {} output columns, got {}", join_type, expect, schema.len()));
    }
    Ok(Joiner { join_type, build_side, filter, intermediate, schema: Arc::clone(schema) })
}

fn fmt_join(
    f: &mut Formatter<'_>,
    name: &str,
    join_type: JoinType,
    on: &JoinOn,
    filter: &Option<JoinFilter>,
) -> std::fmt::Result {
    write!(f, "{}: {}", name, join_type)?;
    if !on.is_empty() {
        let keys = on.iter().map(|(l, r)| format!("({l}, {r})")).collect::<Vec<_>>();
        write!(f, ", on=[{}]", keys.join(", "))?;
    }
    if let Some(filter) = filter {
        write!(f, ", filter={}", filter.expr)?;
    }
    Ok(())
}

/// Equijoin through a hash table built over the whole left input. The right
/// input is streamed and probes the table batch by batch.
#[derive(Debug)]
pub struct HashJoinExec {
    left: Arc<dyn ExecutionPlan>,
    right: Arc<dyn ExecutionPlan>,
    on: JoinOn,
    filter: Option<JoinFilter>,
    join_type: JoinType,
    null_equals_null: bool,
    schema: SchemaRef,
}

impl HashJoinExec {
    pub fn try_new(
        left: Arc<dyn ExecutionPlan>,
        right: Arc<dyn ExecutionPlan>,
        on: JoinOn,
        filter: Option<JoinFilter>,
        join_type: JoinType,
        null_equals_null: bool,
        schema: SchemaRef,
    ) -> Result<Self> {
        if on.is_empty() {
            return Err(internal_err!("Hash join requires at least one equijoin key"));
        }
        joiner(&left, &right, None, join_type, JoinSide::Left, &schema)?;
        Ok(Self { left, right, on, filter, join_type, null_equals_null, schema })
    }

    /// The same join executed by a nested loop.
    pub fn to_nested_loop(&self) -> Result<NestedLoopJoinExec> {
        NestedLoopJoinExec::try_new(
            Arc::clone(&self.left),
            Arc::clone(&self.right),
            self.on.clone(),
            self.filter.clone(),
            self.join_type,
            self.null_equals_null,
            Arc::clone(&self.schema),
        )
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }
}

impl ExecutionPlan for HashJoinExec {
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
        check_children("HashJoinExec", &children, 2)?;
        let mut children = children.into_iter();
        let (left, right) = match (children.next(), children.next()) {
            (Some(l), Some(r)) => (l, r),
            _ => return Err(internal_err!("HashJoinExec expects 2 children")),
        };
        let join = HashJoinExec::try_new(
            left,
            right,
            self.on.clone(),
            self.filter.clone(),
            self.join_type,
            self.null_equals_null,
            Arc::clone(&self.schema),
        )?;
        Ok(Arc::new(join))
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let joiner = joiner(&self.left, &self.right, self.filter.clone(), self.join_type, JoinSide::Left, &self.schema)?;
        Ok(join_stream(
            Arc::clone(&self.left),
            Arc::clone(&self.right),
            self.on.clone(),
            joiner,
            true,
            self.null_equals_null,
            ctx,
        ))
    }
}

impl Display for HashJoinExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fmt_join(f, "HashJoinExec", self.join_type, &self.on, &self.filter)
    }
}

/// Join comparing every probe row with every row of the materialized build
/// side. Right, Full and right semi/anti joins build the left input, the
/// others build the right input so that the left rows stream.
#[derive(Debug)]
pub struct NestedLoopJoinExec {
    left: Arc<dyn ExecutionPlan>,
    right: Arc<dyn ExecutionPlan>,
    /// Equality keys, checked pair by pair.
    on: JoinOn,
    filter: Option<JoinFilter>,
    join_type: JoinType,
    null_equals_null: bool,
    schema: SchemaRef,
}

impl NestedLoopJoinExec {
    pub fn try_new(
        left: Arc<dyn ExecutionPlan>,
        right: Arc<dyn ExecutionPlan>,
        on: JoinOn,
        filter: Option<JoinFilter>,
        join_type: JoinType,
        null_equals_null: bool,
        schema: SchemaRef,
    ) -> Result<Self> {
        joiner(&left, &right, None, join_type, Self::build_side(join_type), &schema)?;
        Ok(Self { left, right, on, filter, join_type, null_equals_null, schema })
    }

    fn build_side(join_type: JoinType) -> JoinSide {
        match join_type {
            JoinType::Right | JoinType::RightSemi | JoinType::RightAnti | JoinType::Full => JoinSide::Left,
            _ => JoinSide::Right,
        }
    }
}

impl ExecutionPlan for NestedLoopJoinExec {
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
        check_children("NestedLoopJoinExec", &children, 2)?;
        let mut children = children.into_iter();
        let (left, right) = match (children.next(), children.next()) {
            (Some(l), Some(r)) => (l, r),
            _ => return Err(internal_err!("NestedLoopJoinExec expects 2 children")),
        };
        let join = NestedLoopJoinExec::try_new(
            left,
            right,
            self.on.clone(),
            self.filter.clone(),
            self.join_type,
            self.null_equals_null,
            Arc::clone(&self.schema),
        )?;
        Ok(Arc::new(join))
    }

    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream> {
        let build_side = Self::build_side(self.join_type);
        let joiner = joiner(&self.left, &self.right, self.filter.clone(), self.join_type, build_side, &self.schema)?;
        Ok(join_stream(
            Arc::clone(&self.left),
            Arc::clone(&self.right),
            self.on.clone(),
            joiner,
            false,
            self.null_equals_null,
            ctx,
        ))
    }
}

impl Display for NestedLoopJoinExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fmt_join(f, "NestedLoopJoinExec", self.join_type, &self.on, &self.filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::r#type::DataType;
    use crate::catalog::table::MemTable;
    use crate::catalog::table::TableProvider;
    use crate::sql::execution::expr::BinaryExprExec;
    use crate::sql::execution::expr::ColumnExec;
    use crate::sql::execution::stream::collect_batch;
    use crate::sql::plan::expr::Operator;
    use crate::sql::plan::plan::build_join_schema;
    use crate::sql::plan::schema::Field;
    use crate::sql::plan::schema::LogicalSchema;

    fn table(name: &str, cols: [&str; 2], rows: &[(Option<i64>, i64)]) -> Result<Arc<dyn ExecutionPlan>> {
        let schema = Arc::new(LogicalSchema::from_unqualified_fields(
            vec![Field::new(cols[0], DataType::Integer, true), Field::new(cols[1], DataType::Integer, false)].into(),
        )?);
        let rows = rows.iter().map(|(k, v)| vec![k.map(ScalarValue::Int64).unwrap_or(ScalarValue::Null), ScalarValue::Int64(*v)]).collect::<Vec<_>>();
        let batch = RecordBatch::from_rows(Arc::clone(&schema), &rows)?;
        MemTable::try_new(name, schema, vec![batch])?.scan(None)
    }

    fn inputs() -> Result<(Arc<dyn ExecutionPlan>, Arc<dyn ExecutionPlan>)> {
        let left = table("l", ["a", "b"], &[(Some(1), 10), (Some(2), 20), (None, 30), (Some(2), 40)])?;
        let right = table("r", ["c", "d"], &[(Some(2), 5), (Some(3), 6), (None, 7), (Some(2), 50)])?;
        Ok((left, right))
    }

    fn on() -> JoinOn {
        vec![(Arc::new(ColumnExec::new("a", 0)), Arc::new(ColumnExec::new("c", 0)))]
    }

    fn sorted_rows(batch: &RecordBatch) -> Vec<String> {
        let mut rows = (0..batch.num_rows())
            .map(|i| batch.row(i).iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
            .collect::<Vec<_>>();
        rows.sort();
        rows
    }

    async fn run_both(join_type: JoinType, filter: Option<JoinFilter>, nen: bool) -> Result<Vec<String>> {
        let (left, right) = inputs()?;
        let schema = Arc::new(build_join_schema(&left.schema(), &right.schema(), &join_type));
        let hash = HashJoinExec::try_new(left, right, on(), filter, join_type, nen, schema)?;
        let nested = hash.to_nested_loop()?;

        let ctx = Arc::new(QueryContext::default().with_batch_size(2));
        let h = sorted_rows(&collect_batch(hash.execute(Arc::clone(&ctx))?).await?);
        let n = sorted_rows(&collect_batch(nested.execute(ctx)?).await?);
        assert_eq!(h, n, "hash and nested loop {} join disagree", join_type);
        Ok(h)
    }

    #[tokio::test]
    async fn test_join_types() -> Result<()> {
        let rows = run_both(JoinType::Inner, None, false).await?;
        assert_eq!(vec!["2,20,2,5", "2,20,2,50", "2,40,2,5", "2,40,2,50"], rows);

        let rows = run_both(JoinType::Left, None, false).await?;
        assert_eq!(6, rows.len());
        assert!(rows.contains(&"1,10,NULL,NULL".to_string()));
        assert!(rows.contains(&"NULL,30,NULL,NULL".to_string()));

        let rows = run_both(JoinType::Right, None, false).await?;
        assert_eq!(6, rows.len());
        assert!(rows.contains(&"NULL,NULL,3,6".to_string()));

        assert_eq!(8, run_both(JoinType::Full, None, false).await?.len());
        assert_eq!(vec!["2,20", "2,40"], run_both(JoinType::LeftSemi, None, false).await?);
        assert_eq!(vec!["1,10", "NULL,30"], run_both(JoinType::LeftAnti, None, false).await?);
        assert_eq!(vec!["2,5", "2,50"], run_both(JoinType::RightSemi, None, false).await?);
        assert_eq!(vec!["3,6", "NULL,7"], run_both(JoinType::RightAnti, None, false).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_null_equals_null_and_filter() -> Result<()> {
        let rows = run_both(JoinType::LeftSemi, None, true).await?;
        assert_eq!(vec!["2,20", "2,40", "NULL,30"], rows);

        // b < d over the left ++ right columns
        let filter = JoinFilter::new(Arc::new(BinaryExprExec::try_new(
            Arc::new(ColumnExec::new("b", 1)),
            Operator::Lt,
            Arc::new(ColumnExec::new("d", 3)),
            &LogicalSchema::from_unqualified_fields(
                vec![
                    Field::new("a", DataType::Integer, true),
                    Field::new("b", DataType::Integer, false),
                    Field::new("c", DataType::Integer, true),
                    Field::new("d", DataType::Integer, false),
                ]
                .into(),
            )?,
        )?));
        let rows = run_both(JoinType::Inner, Some(filter.clone()), false).await?;
        assert_eq!(vec!["2,20,2,50", "2,40,2,50"], rows);

        // the filter decides the match, unmatched left rows still come out
        let rows = run_both(JoinType::Left, Some(filter), false).await?;
        assert_eq!(4, rows.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_build_side() -> Result<()> {
        let left = table("l", ["a", "b"], &[(Some(1), 10)])?;
        let right = table("r", ["c", "d"], &[])?;
        let schema = Arc::new(build_join_schema(&left.schema(), &right.schema(), &JoinType::Left));
        let join = HashJoinExec::try_new(left, right, on(), None, JoinType::Left, false, schema)?;
        let out = collect_batch(join.execute(Arc::new(QueryContext::default()))?).await?;
        assert_eq!(vec!["1,10,NULL,NULL"], sorted_rows(&out));
        Ok(())
    }
}
