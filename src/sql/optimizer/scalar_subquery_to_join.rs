use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::parse_err;
use crate::sql::optimizer::ApplyOrder;
use crate::sql::optimizer::OptimizerRule;
use crate::sql::plan::expr::conjunction;
use crate::sql::plan::expr::split_conjunction;
use crate::sql::plan::expr::BinaryExpr;
use crate::sql::plan::expr::Expr;
use crate::sql::plan::expr::Operator;
use crate::sql::plan::expr::Subquery;
use crate::sql::plan::plan::Aggregate;
use crate::sql::plan::plan::CrossJoin;
use crate::sql::plan::plan::Filter;
use crate::sql::plan::plan::Join;
use crate::sql::plan::plan::JoinConstraint;
use crate::sql::plan::plan::JoinType;
use crate::sql::plan::plan::Plan;
use crate::sql::plan::plan::Projection;
use crate::sql::plan::plan::SubqueryAlias;
use crate::sql::plan::schema::Column;
use crate::sql::plan::schema::TableReference;
use crate::sql::plan::visitor::Transformed;
use crate::sql::plan::visitor::TreeNode;
use crate::sql::plan::visitor::VisitRecursion;
use crate::unimplemented_err;

const VALUE_COLUMN: &str = "__value";

/// Decorrelate the scalar subqueries of `Filter` and `Projection` nodes into
/// joins.
///
/// ```text
/// Filter: e.salary > (<subquery>)
///   Subquery:
///     Projection: avg(employees.salary)
///       Aggregate: groupBy=[], aggr=[avg(employees.salary)]
///         Filter: employees.department_id = outer_ref(e.department_id)
///           TableScan: employees
///   SubqueryAlias: e
///     TableScan: employees
/// ```
///
/// becomes
///
/// ```text
/// Projection: e.employee_id, ...
///   Filter: e.salary > __scalar_sq_1.__value
///     Left Join: Filter: __scalar_sq_1.department_id = e.department_id
///       SubqueryAlias: e
///         TableScan: employees
///       SubqueryAlias: __scalar_sq_1
///         Projection: avg(employees.salary) AS __value, employees.department_id AS department_id
///           Projection: avg(employees.salary), employees.department_id
///             Aggregate: groupBy=[employees.department_id], aggr=[avg(employees.salary)]
///               TableScan: employees
/// ```
///
/// The correlated predicates become the join filter, which the equijoin
/// extraction then turns into join keys.
#[derive(Default)]
pub struct ScalarSubqueryToJoin {
    alias_seq: AtomicUsize,
}

impl ScalarSubqueryToJoin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_alias(&self) -> TableReference {
        let n = self.alias_seq.fetch_add(1, Ordering::Relaxed) + 1;
        TableReference::from(format!("__scalar_sq_{n}"))
    }

    /// Replace every scalar subquery in `expr` by a column of a new join
    /// input, joining it to `plan`.
    fn rewrite_expr(&self, expr: Expr, plan: &mut Option<Plan>) -> Result<Transformed<Expr>> {
        expr.transform_up(|e| match e {
            Expr::ScalarSubquery(subquery) => {
                let outer = plan.take().ok_or_else(|| parse_err!("Subquery without an outer plan"))?;
                let (joined, value) = self.join_subquery(outer, &subquery)?;
                *plan = Some(joined);
                Ok(Transformed::yes(value))
            }
            e => Ok(Transformed::no(e)),
        })
    }

    fn join_subquery(&self, outer: Plan, subquery: &Subquery) -> Result<(Plan, Expr)> {
        let inner = subquery.subquery.as_ref().clone();
        if inner.schema().len() != 1 {
            return Err(parse_err!(
                "Scalar subquery should return exactly one column, got {}",
                inner.schema().len()
            ));
        }
        let value = inner.schema().column(0);
        let (inner, correlated) = pull_up_correlated(inner)?;

        // Inner columns the correlated predicates read, exposed next to the
        // value under names unique within the alias.
        let keys = correlated.iter().flat_map(|e| e.column_refs()).collect::<BTreeSet<_>>();
        let mut key_names = HashMap::new();
        let mut exprs = vec![Expr::Column(value).alias(VALUE_COLUMN)];
        for key in &keys {
            let clash = keys.iter().filter(|c| c.name == key.name).count() > 1;
            let name = if clash { key.flat_name() } else { key.name.clone() };
            exprs.push(Expr::Column(key.clone()).alias(name.clone()));
            key_names.insert(key.clone(), name);
        }

        let alias = self.next_alias();
        let projection = Plan::Projection(Projection::try_new(exprs, inner)?);
        let right = Plan::SubqueryAlias(SubqueryAlias::try_new(projection, alias.clone())?);

        let predicates = correlated
            .into_iter()
            .map(|e| {
                e.transform_up(|e| match e {
                    Expr::Column(c) => match key_names.get(&c) {
                        Some(name) => Ok(Transformed::yes(Expr::Column(Column::new(
                            Some(alias.clone()),
                            name.clone(),
                        )))),
                        None => Ok(Transformed::no(Expr::Column(c))),
                    },
                    Expr::OuterReferenceColumn(_, c) => Ok(Transformed::yes(Expr::Column(c))),
                    e => Ok(Transformed::no(e)),
                })
                .map(|t| t.data)
            })
            .collect::<Result<Vec<_>>>()?;

        let joined = match conjunction(predicates) {
            Some(filter) => Plan::Join(Join::try_new(
                outer,
                right,
                vec![],
                Some(filter),
                JoinType::Left,
                JoinConstraint::On,
                false,
            )?),
            None => Plan::CrossJoin(CrossJoin::new(outer, right)),
        };
        Ok((joined, Expr::Column(Column::new(Some(alias), VALUE_COLUMN))))
    }
}

impl OptimizerRule for ScalarSubqueryToJoin {
    fn name(&self) -> &str {
        "scalar_subquery_to_join"
    }

    fn try_optimize(&self, plan: &Plan) -> Result<Option<Plan>> {
        match plan {
            Plan::Filter(Filter { predicate, input }) if predicate.contains_scalar_subquery() => {
                let mut joined = Some(input.as_ref().clone());
                let predicate = self.rewrite_expr(predicate.clone(), &mut joined)?.data;
                let joined = joined.ok_or_else(|| parse_err!("Subquery rewrite lost its input"))?;
                let filter = Plan::Filter(Filter::try_new(predicate, joined)?);
                // Keep the output of the filter as it was.
                let columns = input.schema().columns().into_iter().map(Expr::Column).collect();
                Ok(Some(Plan::Projection(Projection::try_new(columns, filter)?)))
            }
            Plan::Projection(Projection { exprs, input, .. })
                if exprs.iter().any(|e| e.contains_scalar_subquery()) =>
            {
                let mut joined = Some(input.as_ref().clone());
                let mut new_exprs = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    let t = self.rewrite_expr(expr.clone(), &mut joined)?;
                    if t.transformed && !matches!(expr, Expr::Alias(_)) {
                        new_exprs.push(t.data.alias(expr.schema_name()));
                    } else {
                        new_exprs.push(t.data);
                    }
                }
                let joined = joined.ok_or_else(|| parse_err!("Subquery rewrite lost its input"))?;
                Ok(Some(Plan::Projection(Projection::try_new(new_exprs, joined)?)))
            }
            _ => Ok(None),
        }
    }

    fn apply_order(&self) -> Option<ApplyOrder> {
        Some(ApplyOrder::TopDown)
    }
}

/// Pull the predicates referencing the outer query out of the subquery
/// plan, returning the plan without them. Grouping and projections on the
/// way up are widened with the inner columns those predicates read so that
/// they survive to the top of the subquery.
fn pull_up_correlated(plan: Plan) -> Result<(Plan, Vec<Expr>)> {
    match plan {
        Plan::Filter(Filter { predicate, input }) => {
            let (input, mut correlated) = pull_up_correlated(*input)?;
            let mut kept = vec![];
            for conjunct in split_conjunction(&predicate) {
                if conjunct.contains_outer_reference() {
                    correlated.push(conjunct.clone());
                } else {
                    kept.push(conjunct.clone());
                }
            }
            let plan = match conjunction(kept) {
                Some(predicate) => Plan::Filter(Filter::try_new(predicate, input)?),
                None => input,
            };
            Ok((plan, correlated))
        }
        Plan::Aggregate(Aggregate { input, mut group_exprs, aggr_exprs, .. }) => {
            let (input, correlated) = pull_up_correlated(*input)?;
            // Grouping by the inner columns yields one row per outer row only
            // when the inner columns are pinned by equalities.
            if let Some(e) = correlated.iter().find(|e| !is_correlated_equality(e)) {
                return Err(unimplemented_err!(
                    "Correlated predicate {} below an aggregate is not supported, only equalities are",
                    e
                ));
            }
            for c in inner_columns(&correlated) {
                let e = Expr::Column(c);
                if !group_exprs.contains(&e) {
                    group_exprs.push(e);
                }
            }
            Ok((Plan::Aggregate(Aggregate::try_new(input, group_exprs, aggr_exprs)?), correlated))
        }
        Plan::Projection(Projection { mut exprs, input, .. }) => {
            let (input, correlated) = pull_up_correlated(*input)?;
            for c in inner_columns(&correlated) {
                let e = Expr::Column(c);
                if !exprs.contains(&e) {
                    exprs.push(e);
                }
            }
            Ok((Plan::Projection(Projection::try_new(exprs, input)?), correlated))
        }
        plan => {
            if contains_outer_reference(&plan)? {
                return Err(unimplemented_err!(
                    "Correlated column is not allowed below {}",
                    plan.display_lines().first().cloned().unwrap_or_default()
                ));
            }
            Ok((plan, vec![]))
        }
    }
}

/// `inner = outer`, one side reading only inner columns and the other only
/// outer references.
fn is_correlated_equality(expr: &Expr) -> bool {
    match expr {
        Expr::BinaryExpr(BinaryExpr { left, op: Operator::Eq, right }) => {
            let outer_only = |e: &Expr| e.contains_outer_reference() && e.column_refs().is_empty();
            let inner_only = |e: &Expr| !e.contains_outer_reference();
            let (left, right) = (left.as_ref(), right.as_ref());
            (outer_only(left) && inner_only(right)) || (inner_only(left) && outer_only(right))
        }
        _ => false,
    }
}

fn inner_columns(correlated: &[Expr]) -> BTreeSet<Column> {
    correlated.iter().flat_map(|e| e.column_refs()).collect()
}

fn contains_outer_reference(plan: &Plan) -> Result<bool> {
    let mut found = false;
    plan.walk(|p| {
        if p.expressions().iter().any(|e| e.contains_outer_reference()) {
            found = true;
            return Ok(VisitRecursion::Stop);
        }
        Ok(VisitRecursion::Continue)
    })?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::r#type::DataType;
    use crate::sql::optimizer::extract_equijoin_predicate::ExtractEquijoinPredicate;
    use crate::sql::optimizer::test_util::scan;
    use crate::sql::optimizer::Optimizer;
    use crate::sql::optimizer::OptimizerRule;
    use crate::sql::plan::expr::binary_expr;
    use crate::sql::plan::expr::col;
    use crate::sql::plan::expr::AggregateFunction;
    use crate::sql::plan::expr::Operator;
    use crate::sql::udf::aggregate::max;

    fn max_of(column: &str) -> Expr {
        Expr::AggregateFunction(AggregateFunction { func: max(), args: vec![col(column)] })
    }

    /// `SELECT max(i.v) FROM i WHERE i.k = outer_ref(o.k)`
    fn correlated_subquery() -> Result<Plan> {
        let outer_ref = Expr::OuterReferenceColumn(DataType::Integer, "o.k".into());
        let filter = Filter::try_new(col("i.k").eq(outer_ref), scan("i", &["k", "v"])?)?;
        let aggr = Aggregate::try_new(Plan::Filter(filter), vec![], vec![max_of("i.v")])?;
        let projection = Projection::try_new(vec![Expr::Column(Column::new_unqualified("max(i.v)"))], Plan::Aggregate(aggr))?;
        Ok(Plan::Projection(projection))
    }

    fn subquery(plan: Plan) -> Expr {
        Expr::ScalarSubquery(Subquery::new(plan, vec![]))
    }

    #[test]
    fn test_correlated_filter() -> Result<()> {
        let predicate = binary_expr(col("o.v"), Operator::Gt, subquery(correlated_subquery()?));
        let plan = Plan::Filter(Filter::try_new(predicate, scan("o", &["k", "v"])?)?);

        let rules: Vec<Arc<dyn OptimizerRule>> =
            vec![Arc::new(ScalarSubqueryToJoin::new()), Arc::new(ExtractEquijoinPredicate::new())];
        let plan = Optimizer::with_rules(rules).optimize(plan, 8)?;
        let expected = vec![
            "Projection: o.k, o.v",
            "  Filter: o.v > __scalar_sq_1.__value",
            "    Left Join: o.k = __scalar_sq_1.k",
            "      TableScan: o",
            "      SubqueryAlias: __scalar_sq_1",
            "        Projection: max(i.v) AS __value, i.k AS k",
            "          Projection: max(i.v), i.k",
            "            Aggregate: groupBy=[i.k], aggr=[max(i.v)]",
            "              TableScan: i",
        ];
        assert_eq!(expected, plan.display_lines());
        Ok(())
    }

    #[test]
    fn test_uncorrelated_projection() -> Result<()> {
        let aggr = Aggregate::try_new(scan("i", &["v"])?, vec![], vec![max_of("i.v")])?;
        let sq = subquery(Plan::Aggregate(aggr));
        let projection = Projection::try_new(vec![col("o.k"), sq], scan("o", &["k"])?)?;
        let plan = ScalarSubqueryToJoin::new()
            .try_optimize(&Plan::Projection(projection))?
            .ok_or_else(|| crate::error::Error::internal("expect rewrite"))?;

        let expected = vec![
            "Projection: o.k, __scalar_sq_1.__value AS (<subquery>)",
            "  CrossJoin:",
            "    TableScan: o",
            "    SubqueryAlias: __scalar_sq_1",
            "      Projection: max(i.v) AS __value",
            "        Aggregate: groupBy=[], aggr=[max(i.v)]",
            "          TableScan: i",
        ];
        assert_eq!(expected, plan.display_lines());
        assert_eq!("(<subquery>)", plan.schema().field(1).name);
        Ok(())
    }

    #[test]
    fn test_correlation_below_limit_unsupported() -> Result<()> {
        let outer_ref = Expr::OuterReferenceColumn(DataType::Integer, "o.k".into());
        let filter = Filter::try_new(col("i.k").eq(outer_ref), scan("i", &["k"])?)?;
        let limit = Plan::Limit(crate::sql::plan::plan::Limit::new(Plan::Filter(filter), 0, Some(1)));
        let predicate = binary_expr(col("o.k"), Operator::Eq, subquery(limit));
        let plan = Plan::Filter(Filter::try_new(predicate, scan("o", &["k"])?)?);
        let result = ScalarSubqueryToJoin::new().try_optimize(&plan);
        assert!(matches!(result, Err(crate::error::Error::Unimplemented(_))));
        Ok(())
    }

    #[test]
    fn test_non_equality_correlation_below_aggregate_unsupported() -> Result<()> {
        let outer_ref = || Expr::OuterReferenceColumn(DataType::Integer, "o.k".into());
        let cases = [
            binary_expr(col("i.k"), Operator::LtEq, outer_ref()),
            col("i.k").eq(outer_ref()).and(binary_expr(col("i.v"), Operator::Lt, outer_ref())),
        ];
        for predicate in cases {
            let filter = Filter::try_new(predicate, scan("i", &["k", "v"])?)?;
            let aggr = Aggregate::try_new(Plan::Filter(filter), vec![], vec![max_of("i.v")])?;
            let predicate = binary_expr(col("o.v"), Operator::Gt, subquery(Plan::Aggregate(aggr)));
            let plan = Plan::Filter(Filter::try_new(predicate, scan("o", &["k", "v"])?)?);
            let result = ScalarSubqueryToJoin::new().try_optimize(&plan);
            assert!(matches!(result, Err(crate::error::Error::Unimplemented(_))), "{result:?}");
        }
        Ok(())
    }
}
