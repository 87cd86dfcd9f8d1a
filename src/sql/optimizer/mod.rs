use std::sync::Arc;

use log::debug;
use log::warn;

use crate::error::Result;
use crate::sql::optimizer::extract_equijoin_predicate::ExtractEquijoinPredicate;
use crate::sql::optimizer::push_down_projection::PushDownProjection;
use crate::sql::optimizer::replace_distinct_aggregate::ReplaceDistinctWithAggregate;
use crate::sql::optimizer::scalar_subquery_to_join::ScalarSubqueryToJoin;
use crate::sql::plan::plan::Plan;
use crate::sql::plan::visitor::Transformed;
use crate::sql::plan::visitor::TreeNode;

pub mod extract_equijoin_predicate;
pub mod push_down_projection;
pub mod replace_distinct_aggregate;
pub mod scalar_subquery_to_join;

/// How the optimizer walks the plan for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrder {
    /// Apply the rule to a node before its inputs.
    TopDown,
    /// Apply the rule to the inputs first.
    BottomUp,
}

/// A rewrite of the logical plan that keeps its meaning.
pub trait OptimizerRule: Send + Sync {
    fn name(&self) -> &str;

    /// Try to rewrite `plan`, `None` means the rule does not apply.
    ///
    /// With an [`ApplyOrder`] the rule only looks at the node it is given,
    /// the optimizer does the recursion. Without one it is handed the root
    /// and walks the tree itself.
    fn try_optimize(&self, plan: &Plan) -> Result<Option<Plan>>;

    fn apply_order(&self) -> Option<ApplyOrder> {
        None
    }
}

/// Runs the rules over the plan until a whole pass changes nothing.
pub struct Optimizer {
    rules: Vec<Arc<dyn OptimizerRule>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    pub fn new() -> Self {
        let rules: Vec<Arc<dyn OptimizerRule>> = vec![
            Arc::new(ReplaceDistinctWithAggregate::new()),
            Arc::new(ScalarSubqueryToJoin::new()),
            Arc::new(ExtractEquijoinPredicate::new()),
            Arc::new(PushDownProjection::new()),
        ];
        Self { rules }
    }

    pub fn with_rules(rules: Vec<Arc<dyn OptimizerRule>>) -> Self {
        Self { rules }
    }

    /// Optimize the plan, giving up after `max_passes` passes. Hitting the
    /// cap is not an error, the last plan produced is returned.
    pub fn optimize(&self, plan: Plan, max_passes: usize) -> Result<Plan> {
        let mut plan = plan;
        for pass in 0..max_passes.max(1) {
            let mut changed = false;
            for rule in &self.rules {
                let t = Self::apply_rule(rule.as_ref(), plan)?;
                if t.transformed {
                    debug!("Optimizer pass {} rule {} rewrote plan:\n{}", pass, rule.name(), t.data);
                    changed = true;
                }
                plan = t.data;
            }
            if !changed {
                debug!("Optimizer reached a fixed point after {} passes", pass + 1);
                return Ok(plan);
            }
        }
        warn!("Optimizer stopped after {} passes without reaching a fixed point", max_passes.max(1));
        Ok(plan)
    }

    fn apply_rule(rule: &dyn OptimizerRule, plan: Plan) -> Result<Transformed<Plan>> {
        let rewrite = |node: Plan| -> Result<Transformed<Plan>> {
            match rule.try_optimize(&node)? {
                Some(new) if new != node => Ok(Transformed::yes(new)),
                _ => Ok(Transformed::no(node)),
            }
        };
        match rule.apply_order() {
            Some(ApplyOrder::TopDown) => plan.transform_down(rewrite),
            Some(ApplyOrder::BottomUp) => plan.transform_up(rewrite),
            None => rewrite(plan),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use crate::catalog::r#type::DataType;
    use crate::catalog::table::MemTable;
    use crate::error::Result;
    use crate::sql::plan::plan::Plan;
    use crate::sql::plan::plan::TableScan;
    use crate::sql::plan::schema::Field;
    use crate::sql::plan::schema::Fields;
    use crate::sql::plan::schema::LogicalSchema;

    /// A scan over an empty table with integer columns `cols`.
    pub(crate) fn scan(name: &str, cols: &[&str]) -> Result<Plan> {
        let fields: Fields = cols.iter().map(|c| Field::new(*c, DataType::Integer, true)).collect();
        let schema = Arc::new(LogicalSchema::from_unqualified_fields(fields)?);
        let table = Arc::new(MemTable::try_new(name, schema, vec![])?);
        Ok(Plan::TableScan(TableScan::try_new(name, table, None)?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::sql::plan::plan::EmptyRelation;
    use crate::sql::plan::plan::Limit;

    /// Grows the limit of the root forever.
    struct GrowLimit {
        calls: AtomicUsize,
    }

    impl OptimizerRule for GrowLimit {
        fn name(&self) -> &str {
            "grow_limit"
        }

        fn try_optimize(&self, plan: &Plan) -> Result<Option<Plan>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match plan {
                Plan::Limit(Limit { input, skip, fetch }) => Ok(Some(Plan::Limit(Limit::new(
                    input.as_ref().clone(),
                    *skip + 1,
                    *fetch,
                )))),
                _ => Ok(None),
            }
        }
    }

    #[test]
    fn test_pass_cap() -> Result<()> {
        let rule = Arc::new(GrowLimit { calls: AtomicUsize::new(0) });
        let optimizer = Optimizer::with_rules(vec![rule.clone() as Arc<dyn OptimizerRule>]);
        let plan = Plan::Limit(Limit::new(Plan::EmptyRelation(EmptyRelation::new(true)), 0, None));

        let plan = optimizer.optimize(plan, 3)?;
        assert_eq!(3, rule.calls.load(Ordering::SeqCst));
        assert!(matches!(plan, Plan::Limit(Limit { skip: 3, .. })));
        Ok(())
    }

    #[test]
    fn test_fixed_point() -> Result<()> {
        let optimizer = Optimizer::new();
        let plan = Plan::EmptyRelation(EmptyRelation::new(true));
        assert_eq!(plan, optimizer.optimize(plan.clone(), 16)?);
        Ok(())
    }
}
