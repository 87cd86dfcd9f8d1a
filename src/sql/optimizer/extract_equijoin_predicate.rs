use std::collections::HashSet;

use crate::error::Result;
use crate::sql::optimizer::ApplyOrder;
use crate::sql::optimizer::OptimizerRule;
use crate::sql::plan::expr::conjunction;
use crate::sql::plan::expr::split_conjunction;
use crate::sql::plan::expr::BinaryExpr;
use crate::sql::plan::expr::Expr;
use crate::sql::plan::expr::Operator;
use crate::sql::plan::plan::Join;
use crate::sql::plan::plan::Plan;
use crate::sql::plan::schema::Column;
use crate::sql::plan::schema::LogicalSchema;

/// Move the `left = right` conjuncts of a join filter into the join keys so
/// the join can be executed as a hash join.
///
/// ```text
/// Inner Join: Filter: l.a = r.a AND l.b > r.b
/// ```
///
/// becomes
///
/// ```text
/// Inner Join: l.a = r.a, Filter: l.b > r.b
/// ```
#[derive(Default)]
pub struct ExtractEquijoinPredicate {}

impl ExtractEquijoinPredicate {
    pub fn new() -> Self {
        Self {}
    }
}

impl OptimizerRule for ExtractEquijoinPredicate {
    fn name(&self) -> &str {
        "extract_equijoin_predicate"
    }

    fn try_optimize(&self, plan: &Plan) -> Result<Option<Plan>> {
        let (join, filter) = match plan {
            Plan::Join(join @ Join { filter: Some(filter), .. }) => (join, filter),
            _ => return Ok(None),
        };

        let left_schema = join.left.schema();
        let right_schema = join.right.schema();
        let mut keys = vec![];
        let mut remaining = vec![];
        for conjunct in split_conjunction(filter) {
            match split_eq(conjunct, left_schema, right_schema) {
                Some(pair) => keys.push(pair),
                None => remaining.push(conjunct.clone()),
            }
        }
        if keys.is_empty() {
            return Ok(None);
        }

        let mut on = join.on.clone();
        on.extend(keys);
        let join = Join::try_new(
            join.left.as_ref().clone(),
            join.right.as_ref().clone(),
            on,
            conjunction(remaining),
            join.join_type,
            join.join_constraint,
            join.null_equals_null,
        )?;
        Ok(Some(Plan::Join(join)))
    }

    fn apply_order(&self) -> Option<ApplyOrder> {
        Some(ApplyOrder::BottomUp)
    }
}

/// The `(left key, right key)` pair of an equality whose two sides read
/// from different inputs, in either orientation.
fn split_eq(expr: &Expr, left: &LogicalSchema, right: &LogicalSchema) -> Option<(Expr, Expr)> {
    let (l, r) = match expr {
        Expr::BinaryExpr(BinaryExpr { left, op: Operator::Eq, right }) => (left, right),
        _ => return None,
    };
    let lcols = l.column_refs();
    let rcols = r.column_refs();
    if lcols.is_empty() || rcols.is_empty() || l.contains_outer_reference() || r.contains_outer_reference()
    {
        return None;
    }
    if all_in(&lcols, left) && all_in(&rcols, right) {
        return Some((l.as_ref().clone(), r.as_ref().clone()));
    }
    if all_in(&lcols, right) && all_in(&rcols, left) {
        return Some((r.as_ref().clone(), l.as_ref().clone()));
    }
    None
}

fn all_in(columns: &HashSet<Column>, schema: &LogicalSchema) -> bool {
    columns.iter().all(|c| schema.has_column(c))
}
