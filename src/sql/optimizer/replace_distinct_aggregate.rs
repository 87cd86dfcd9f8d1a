use crate::error::Result;
use crate::sql::optimizer::ApplyOrder;
use crate::sql::optimizer::OptimizerRule;
use crate::sql::plan::expr::Expr;
use crate::sql::plan::plan::Aggregate;
use crate::sql::plan::plan::Distinct;
use crate::sql::plan::plan::Plan;

/// Rewrite `Distinct` into an `Aggregate` grouping by every input column
/// and computing nothing.
///
/// ```text
/// SELECT DISTINCT a, b FROM t
/// ```
///
/// becomes
///
/// ```text
/// SELECT a, b FROM t GROUP BY a, b
/// ```
#[derive(Default)]
pub struct ReplaceDistinctWithAggregate {}

impl ReplaceDistinctWithAggregate {
    pub fn new() -> Self {
        Self {}
    }
}

impl OptimizerRule for ReplaceDistinctWithAggregate {
    fn name(&self) -> &str {
        "replace_distinct_aggregate"
    }

    fn try_optimize(&self, plan: &Plan) -> Result<Option<Plan>> {
        match plan {
            Plan::Distinct(Distinct { input }) => {
                let group_exprs = input.schema().columns().into_iter().map(Expr::Column).collect();
                let aggregate = Aggregate::try_new(input.as_ref().clone(), group_exprs, vec![])?;
                Ok(Some(Plan::Aggregate(aggregate)))
            }
            _ => Ok(None),
        }
    }

    fn apply_order(&self) -> Option<ApplyOrder> {
        Some(ApplyOrder::BottomUp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::optimizer::test_util::scan;
    use crate::sql::optimizer::Optimizer;

    #[test]
    fn test_replace_distinct() -> Result<()> {
        let plan = Plan::Distinct(Distinct::new(scan("t", &["a", "b"])?));
        let optimizer = Optimizer::with_rules(vec![std::sync::Arc::new(ReplaceDistinctWithAggregate::new())]);
        let plan = optimizer.optimize(plan, 4)?;

        let expected = vec!["Aggregate: groupBy=[t.a, t.b], aggr=[]", "  TableScan: t"];
        assert_eq!(expected, plan.display_lines());
        assert_eq!(2, plan.schema().len());
        Ok(())
    }
}
