use std::collections::BTreeSet;

use crate::error::Result;
use crate::sql::optimizer::OptimizerRule;
use crate::sql::plan::expr::Expr;
use crate::sql::plan::plan::Aggregate;
use crate::sql::plan::plan::CrossJoin;
use crate::sql::plan::plan::Distinct;
use crate::sql::plan::plan::Explain;
use crate::sql::plan::plan::Filter;
use crate::sql::plan::plan::Join;
use crate::sql::plan::plan::JoinType;
use crate::sql::plan::plan::Limit;
use crate::sql::plan::plan::Plan;
use crate::sql::plan::plan::Projection;
use crate::sql::plan::plan::Sort;
use crate::sql::plan::plan::SubqueryAlias;
use crate::sql::plan::plan::TableScan;
use crate::sql::plan::plan::Union;
use crate::sql::plan::schema::Column;
use crate::sql::plan::schema::LogicalSchema;

/// Positions of the required columns in the output of a node.
type Required = BTreeSet<usize>;

/// Push the columns actually read by the upper nodes down to the scans, so
/// that unused columns are neither read nor carried around.
///
/// A pruned node may still produce more columns than asked for, upper
/// nodes address columns by name. Only union inputs are narrowed to exactly
/// the required columns since they line up by position.
#[derive(Default)]
pub struct PushDownProjection {}

impl PushDownProjection {
    pub fn new() -> Self {
        Self {}
    }
}

impl OptimizerRule for PushDownProjection {
    fn name(&self) -> &str {
        "push_down_projection"
    }

    fn try_optimize(&self, plan: &Plan) -> Result<Option<Plan>> {
        let new = prune(plan.clone(), &all(plan.schema()))?;
        if new == *plan {
            return Ok(None);
        }
        Ok(Some(new))
    }
}

fn all(schema: &LogicalSchema) -> Required {
    (0..schema.len()).collect()
}

/// Positions in `schema` of every column `exprs` read. A column that does
/// not resolve means everything is required.
fn required_by<'a>(exprs: impl IntoIterator<Item = &'a Expr>, schema: &LogicalSchema) -> Required {
    let mut out = Required::new();
    for e in exprs {
        for c in e.column_refs() {
            match schema.maybe_index_of_column(&c) {
                Some(i) => {
                    out.insert(i);
                }
                None => return all(schema),
            }
        }
    }
    out
}

fn prune(plan: Plan, required: &Required) -> Result<Plan> {
    let plan = match plan {
        Plan::Projection(Projection { exprs, input, .. }) => {
            let exprs = if required.len() == exprs.len() {
                exprs
            } else {
                exprs
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| required.contains(i))
                    .map(|(_, e)| e)
                    .collect::<Vec<_>>()
            };
            let input_required = required_by(&exprs, input.schema());
            let input = prune(*input, &input_required)?;
            let projection = Projection::try_new(exprs, input)?;
            if projection.is_identity() {
                return Ok(*projection.input);
            }
            Plan::Projection(projection)
        }
        Plan::Filter(Filter { predicate, input }) => {
            let mut input_required = required.clone();
            input_required.extend(required_by([&predicate], input.schema()));
            let input = prune(*input, &input_required)?;
            Plan::Filter(Filter::try_new(predicate, input)?)
        }
        Plan::Sort(Sort { expr, input }) => {
            let mut input_required = required.clone();
            input_required.extend(required_by(expr.iter().map(|s| &s.expr), input.schema()));
            let input = prune(*input, &input_required)?;
            Plan::Sort(Sort::new(expr, input))
        }
        Plan::Limit(Limit { input, skip, fetch }) => Plan::Limit(Limit::new(prune(*input, required)?, skip, fetch)),
        Plan::Aggregate(Aggregate { input, group_exprs, aggr_exprs, .. }) => {
            let groups = group_exprs.len();
            let mut kept = aggr_exprs
                .iter()
                .enumerate()
                .filter(|(i, _)| required.contains(&(groups + i)))
                .map(|(_, e)| e.clone())
                .collect::<Vec<_>>();
            // Without groups the aggregate still has to produce its one row.
            if kept.is_empty() && groups == 0 {
                kept.extend(aggr_exprs.first().cloned());
            }
            let input_required = required_by(group_exprs.iter().chain(kept.iter()), input.schema());
            let input = prune(*input, &input_required)?;
            Plan::Aggregate(Aggregate::try_new(input, group_exprs, kept)?)
        }
        Plan::Join(Join { left, right, on, filter, join_type, join_constraint, null_equals_null, .. }) => {
            let (mut lreq, mut rreq) = split_required(required, left.schema().len(), &join_type);
            let mut exprs = on.iter().flat_map(|(l, r)| [l, r]).collect::<Vec<_>>();
            exprs.extend(filter.iter());
            if !add_join_columns(&exprs, left.schema(), right.schema(), &mut lreq, &mut rreq) {
                lreq = all(left.schema());
                rreq = all(right.schema());
            }
            let left = prune(*left, &lreq)?;
            let right = prune(*right, &rreq)?;
            Plan::Join(Join::try_new(left, right, on, filter, join_type, join_constraint, null_equals_null)?)
        }
        Plan::CrossJoin(CrossJoin { left, right, .. }) => {
            let (lreq, rreq) = split_required(required, left.schema().len(), &JoinType::Inner);
            let left = prune(*left, &lreq)?;
            let right = prune(*right, &rreq)?;
            Plan::CrossJoin(CrossJoin::new(left, right))
        }
        Plan::Union(Union { inputs, .. }) => {
            let inputs = inputs
                .into_iter()
                .map(|input| {
                    let wanted = required.iter().map(|i| input.schema().column(*i)).collect::<Vec<_>>();
                    let pruned = prune(input, required)?;
                    narrow(pruned, wanted)
                })
                .collect::<Result<Vec<_>>>()?;
            Plan::Union(Union::try_new(inputs)?)
        }
        Plan::Distinct(Distinct { input }) => {
            let input_required = all(input.schema());
            Plan::Distinct(Distinct::new(prune(*input, &input_required)?))
        }
        Plan::SubqueryAlias(SubqueryAlias { input, alias, .. }) => {
            Plan::SubqueryAlias(SubqueryAlias::try_new(prune(*input, required)?, alias)?)
        }
        Plan::TableScan(TableScan { relation, source, projection, .. }) => {
            let source_len = source.schema().len();
            let current = projection.clone().unwrap_or_else(|| (0..source_len).collect());
            let indices = required.iter().filter_map(|i| current.get(*i).copied()).collect::<Vec<_>>();
            let projection = if projection.is_none() && indices.len() == source_len {
                None
            } else {
                Some(indices)
            };
            Plan::TableScan(TableScan::try_new(relation, source, projection)?)
        }
        Plan::Explain(Explain { plan, .. }) => {
            let required = all(plan.schema());
            Plan::Explain(Explain::new(prune(*plan, &required)?))
        }
        p @ Plan::EmptyRelation(_) => p,
    };
    Ok(plan)
}

/// Split the required output positions of a join into positions of each
/// input.
fn split_required(required: &Required, left_len: usize, join_type: &JoinType) -> (Required, Required) {
    match join_type {
        JoinType::LeftSemi | JoinType::LeftAnti => (required.clone(), Required::new()),
        JoinType::RightSemi | JoinType::RightAnti => (Required::new(), required.clone()),
        _ => {
            let left = required.iter().filter(|i| **i < left_len).copied().collect();
            let right = required.iter().filter(|i| **i >= left_len).map(|i| i - left_len).collect();
            (left, right)
        }
    }
}

/// Add the columns of the join keys and filter to the side they come from.
/// Returns false when a column belongs to neither side.
fn add_join_columns(
    exprs: &[&Expr],
    left: &LogicalSchema,
    right: &LogicalSchema,
    lreq: &mut Required,
    rreq: &mut Required,
) -> bool {
    for e in exprs {
        for c in e.column_refs() {
            if let Some(i) = left.maybe_index_of_column(&c) {
                lreq.insert(i);
            } else if let Some(i) = right.maybe_index_of_column(&c) {
                rreq.insert(i);
            } else {
                return false;
            }
        }
    }
    true
}

/// Wrap `plan` in a projection producing exactly `columns`, unless it
/// already does.
fn narrow(plan: Plan, columns: Vec<Column>) -> Result<Plan> {
    if plan.schema().columns() == columns {
        return Ok(plan);
    }
    let exprs = columns.into_iter().map(Expr::Column).collect();
    Ok(Plan::Projection(Projection::try_new(exprs, plan)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::optimizer::test_util::scan;
    use crate::sql::plan::expr::binary_expr;
    use crate::sql::plan::expr::col;
    use crate::sql::plan::expr::lit;
    use crate::sql::plan::expr::Operator;
    use crate::sql::plan::plan::JoinConstraint;

    fn optimize(plan: Plan) -> Result<Vec<String>> {
        let new = PushDownProjection::new().try_optimize(&plan)?.unwrap_or(plan);
        Ok(new.display_lines())
    }

    #[test]
    fn test_projection_filter_scan() -> Result<()> {
        let filter = Filter::try_new(binary_expr(col("t.c"), Operator::Gt, lit(1i64)), scan("t", &["a", "b", "c"])?)?;
        let plan = Plan::Projection(Projection::try_new(vec![col("t.a")], Plan::Filter(filter))?);
        let expected =
            vec!["Projection: t.a", "  Filter: t.c > 1", "    TableScan: t projection=[a, c]"];
        assert_eq!(expected, optimize(plan)?);
        Ok(())
    }

    #[test]
    fn test_identity_projection_removed() -> Result<()> {
        let plan = Plan::Projection(Projection::try_new(vec![col("t.a"), col("t.b")], scan("t", &["a", "b"])?)?);
        assert_eq!(vec!["TableScan: t"], optimize(plan)?);

        let plan = scan("t", &["a", "b"])?;
        assert_eq!(None, PushDownProjection::new().try_optimize(&plan)?);
        Ok(())
    }

    #[test]
    fn test_join_sides() -> Result<()> {
        let join = Join::try_new(
            scan("l", &["a", "b", "c"])?,
            scan("r", &["d", "e"])?,
            vec![(col("l.a"), col("r.d"))],
            None,
            JoinType::Inner,
            JoinConstraint::On,
            false,
        )?;
        let plan = Plan::Projection(Projection::try_new(vec![col("l.b"), col("r.e")], Plan::Join(join))?);
        let expected = vec![
            "Projection: l.b, r.e",
            "  Inner Join: l.a = r.d",
            "    TableScan: l projection=[a, b]",
            "    TableScan: r",
        ];
        assert_eq!(expected, optimize(plan)?);
        Ok(())
    }

    #[test]
    fn test_union_inputs_narrowed() -> Result<()> {
        let union = Union::try_new(vec![scan("x", &["a", "b"])?, scan("y", &["c", "d"])?])?;
        let plan = Plan::Projection(Projection::try_new(vec![col("x.b")], Plan::Union(union))?);
        let expected = vec!["Union", "  TableScan: x projection=[b]", "  TableScan: y projection=[d]"];
        assert_eq!(expected, optimize(plan)?);
        Ok(())
    }

    #[test]
    fn test_unused_aggregate_pruned() -> Result<()> {
        use crate::sql::plan::expr::AggregateFunction;
        use crate::sql::udf::aggregate::max;
        use crate::sql::udf::aggregate::sum;

        let aggr = |func, c: &str| Expr::AggregateFunction(AggregateFunction { func, args: vec![col(c)] });
        let aggregate =
            Aggregate::try_new(scan("t", &["a", "b", "c"])?, vec![col("t.a")], vec![aggr(max(), "t.b"), aggr(sum(), "t.c")])?;
        let plan = Plan::Projection(Projection::try_new(vec![col("t.a")], Plan::Aggregate(aggregate))?);
        let expected = vec!["Aggregate: groupBy=[t.a], aggr=[]", "  TableScan: t projection=[a]"];
        assert_eq!(expected, optimize(plan)?);
        Ok(())
    }
}
