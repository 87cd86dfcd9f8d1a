use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;

use log::debug;

use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::internal_err;
use crate::parse_err;
use crate::sql::execution::aggregate::AggregateExec;
use crate::sql::execution::aggregate::AggregateExpr;
use crate::sql::execution::context::QueryContext;
use crate::sql::execution::display::DisplayableExecutionPlan;
use crate::sql::execution::expr::BinaryExprExec;
use crate::sql::execution::expr::CaseExec;
use crate::sql::execution::expr::CastExec;
use crate::sql::execution::expr::ColumnExec;
use crate::sql::execution::expr::InListExec;
use crate::sql::execution::expr::IsNullExec;
use crate::sql::execution::expr::LikeExec;
use crate::sql::execution::expr::NegativeExec;
use crate::sql::execution::expr::NotExec;
use crate::sql::execution::expr::PhysicalExpr;
use crate::sql::execution::expr::ScalarFunctionExec;
use crate::sql::execution::expr::ValueExec;
use crate::sql::execution::join::HashJoinExec;
use crate::sql::execution::join::JoinFilter;
use crate::sql::execution::join::NestedLoopJoinExec;
use crate::sql::execution::query::CrossJoinExec;
use crate::sql::execution::query::EmptyExec;
use crate::sql::execution::query::ExplainExec;
use crate::sql::execution::query::FilterExec;
use crate::sql::execution::query::LimitExec;
use crate::sql::execution::query::PhysicalSortExpr;
use crate::sql::execution::query::ProjectionExec;
use crate::sql::execution::query::SortExec;
use crate::sql::execution::query::UnionExec;
use crate::sql::execution::stream::SendableRecordBatchStream;
use crate::sql::plan::coercion::comparison_coercion;
use crate::sql::plan::coercion::BinaryTypeCoercer;
use crate::sql::plan::expr::binary_expr;
use crate::sql::plan::expr::AggregateFunction;
use crate::sql::plan::expr::Alias;
use crate::sql::plan::expr::Between;
use crate::sql::plan::expr::BinaryExpr;
use crate::sql::plan::expr::Case;
use crate::sql::plan::expr::Cast;
use crate::sql::plan::expr::Expr;
use crate::sql::plan::expr::InList;
use crate::sql::plan::expr::Like;
use crate::sql::plan::expr::Operator;
use crate::sql::plan::expr::ScalarFunction;
use crate::sql::plan::plan::Aggregate;
use crate::sql::plan::plan::CrossJoin;
use crate::sql::plan::plan::EmptyRelation;
use crate::sql::plan::plan::Explain;
use crate::sql::plan::plan::Filter;
use crate::sql::plan::plan::Join;
use crate::sql::plan::plan::Limit;
use crate::sql::plan::plan::Plan;
use crate::sql::plan::plan::Projection;
use crate::sql::plan::plan::Sort;
use crate::sql::plan::plan::SubqueryAlias;
use crate::sql::plan::plan::TableScan;
use crate::sql::plan::plan::Union;
use crate::sql::plan::schema::LogicalSchema;
use crate::sql::plan::schema::SchemaRef;
use crate::sql::plan::visitor::DynTreeNode;
use crate::unimplemented_err;

/// A physical executable node in the query plan.
///
/// Unlike the Volcano model, which pulls a tuple at a time, this follows a
/// **vectorized iterator model**: `execute` hands out a lazy stream yielding
/// a [`RecordBatch`](crate::access::batch::RecordBatch) at a time. Nothing
/// runs until the stream is polled.
pub trait ExecutionPlan: Debug + Display + Send + Sync {
    /// Returns the physical plan as [`Any`] so that it can be
    /// downcast to a specific implementation.
    fn as_any(&self) -> &dyn Any;

    /// Schema of every batch the plan yields.
    fn schema(&self) -> SchemaRef;

    /// Get a list of children `ExecutionPlan`s that act as inputs to this plan.
    /// The returned list will be empty for leaf nodes such as scans, will contain
    /// a single value for unary nodes, or two values for binary nodes (such as
    /// joins).
    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![]
    }

    /// Returns a new plan where all children were replaced by new plans, in
    /// the order of [`ExecutionPlan::children`].
    fn with_new_children(
        self: Arc<Self>,
        children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> Result<Arc<dyn ExecutionPlan>>;

    /// Start executing the plan, returning the stream of its output.
    fn execute(&self, ctx: Arc<QueryContext>) -> Result<SendableRecordBatchStream>;
}

impl DynTreeNode for dyn ExecutionPlan {
    fn arc_children(&self) -> Vec<&Arc<Self>> {
        self.children()
    }

    fn with_new_arc_children(self: Arc<Self>, children: Vec<Arc<Self>>) -> Result<Arc<Self>> {
        self.with_new_children(children)
    }
}

/// Fails unless a plan got exactly `n` children.
pub(crate) fn check_children(
    name: &str,
    children: &[Arc<dyn ExecutionPlan>],
    n: usize,
) -> Result<()> {
    if children.len() != n {
        return Err(internal_err!("{} expects {} children, got {}", name, n, children.len()));
    }
    Ok(())
}

/// Compiles logical plans into executable physical plans.
///
/// The Compiler picks a concrete operator for each logical node and turns
/// the name addressed logical expressions into position addressed physical
/// ones, inserting the casts the type coercion rules ask for.
///
/// This is also known as physical planning in query processing terminology.
#[derive(Debug, Default)]
pub struct Compiler {
    /// Values of the `@name` variables, keyed by lowercase name.
    variables: HashMap<String, ScalarValue>,
}

impl Compiler {
    pub fn new(variables: HashMap<String, ScalarValue>) -> Self {
        Self { variables }
    }

    #[cfg_attr(feature = "recursive-protection", recursive::recursive)]
    pub fn build_execution_plan(&self, plan: Plan) -> Result<Arc<dyn ExecutionPlan>> {
        match plan {
            Plan::TableScan(TableScan { source, projection, .. }) => source.scan(projection.as_ref()),
            Plan::Projection(Projection { exprs, input, schema }) => {
                let exprs = exprs
                    .into_iter()
                    .map(|it| self.build_physical_expr(it, input.schema()))
                    .collect::<Result<Vec<_>>>()?;
                let input = self.build_execution_plan(*input)?;
                Ok(Arc::new(ProjectionExec::new(input, exprs, schema)))
            }
            Plan::Filter(Filter { predicate, input }) => {
                let predicate = self.build_physical_expr(predicate, input.schema())?;
                let input = self.build_execution_plan(*input)?;
                Ok(Arc::new(FilterExec::new(input, predicate)))
            }
            Plan::Aggregate(Aggregate { input, group_exprs, aggr_exprs, schema }) => {
                let input_schema = input.schema().clone();
                let groups = group_exprs
                    .into_iter()
                    .map(|e| {
                        let field = e.to_field(&input_schema)?;
                        Ok((self.build_physical_expr(e, &input_schema)?, field))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let aggrs = aggr_exprs
                    .into_iter()
                    .map(|e| self.build_aggregate_expr(e, &input_schema))
                    .collect::<Result<Vec<_>>>()?;
                let input = self.build_execution_plan(*input)?;
                let partial = AggregateExec::try_new_partial(input, groups, aggrs)?;
                Ok(Arc::new(AggregateExec::try_new_final(Arc::new(partial), schema)?))
            }
            Plan::Join(Join { left, right, on, filter, join_type, schema, null_equals_null, .. }) => {
                let lschema = left.schema().clone();
                let rschema = right.schema().clone();
                let on = on
                    .into_iter()
                    .map(|(l, r)| self.build_join_keys(l, r, &lschema, &rschema))
                    .collect::<Result<Vec<_>>>()?;
                let filter = match filter {
                    Some(f) => {
                        let intermediate = lschema.join(&rschema);
                        Some(JoinFilter::new(self.build_physical_expr(f, &intermediate)?))
                    }
                    None => None,
                };
                let left = self.build_execution_plan(*left)?;
                let right = self.build_execution_plan(*right)?;
                if on.is_empty() {
                    let join = NestedLoopJoinExec::try_new(left, right, vec![], filter, join_type, false, schema)?;
                    return Ok(Arc::new(join));
                }
                let join = HashJoinExec::try_new(left, right, on, filter, join_type, null_equals_null, schema)?;
                Ok(Arc::new(join))
            }
            Plan::CrossJoin(CrossJoin { left, right, schema }) => {
                let left = self.build_execution_plan(*left)?;
                let right = self.build_execution_plan(*right)?;
                Ok(Arc::new(CrossJoinExec::new(left, right, schema)))
            }
            Plan::Sort(Sort { expr, input }) => {
                let order = expr
                    .into_iter()
                    .map(|it| {
                        let expr = self.build_physical_expr(it.expr, input.schema())?;
                        Ok(PhysicalSortExpr::new(expr, it.asc, it.nulls_first))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let input = self.build_execution_plan(*input)?;
                Ok(Arc::new(SortExec::new(input, order)))
            }
            Plan::Limit(Limit { input, skip, fetch }) => {
                let input = self.build_execution_plan(*input)?;
                Ok(Arc::new(LimitExec::new(input, skip, fetch)))
            }
            Plan::Union(Union { inputs, schema }) => {
                let inputs =
                    inputs.into_iter().map(|p| self.build_execution_plan(p)).collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(UnionExec::new(inputs, schema)))
            }
            Plan::Distinct(_) => {
                Err(internal_err!("Distinct must be rewritten into an aggregate before physical planning"))
            }
            // The alias only renames the qualifier, which the physical plan
            // does not address columns by.
            Plan::SubqueryAlias(SubqueryAlias { input, .. }) => self.build_execution_plan(*input),
            Plan::EmptyRelation(EmptyRelation { produce_one_row, schema }) => {
                Ok(Arc::new(EmptyExec::new(produce_one_row, schema)))
            }
            Plan::Explain(Explain { plan, schema }) => {
                if matches!(plan.as_ref(), Plan::Explain(_)) {
                    return Err(parse_err!("Nested EXPLAIN is not supported"));
                }
                let logical = plan.display_lines();
                let physical = self.build_execution_plan(*plan)?;
                let physical = DisplayableExecutionPlan::new(&physical).lines();
                let mut rows = logical.into_iter().map(|l| ("logical".to_string(), l)).collect::<Vec<_>>();
                rows.extend(physical.into_iter().map(|l| ("physical".to_string(), l)));
                debug!("Explain produced {} rows", rows.len());
                Ok(Arc::new(ExplainExec::new(rows, schema)))
            }
        }
    }

    pub fn build_physical_expr(
        &self,
        expr: Expr,
        input_schema: &LogicalSchema,
    ) -> Result<Arc<dyn PhysicalExpr>> {
        match expr {
            Expr::Alias(Alias { expr, .. }) => self.build_physical_expr(*expr, input_schema),
            Expr::Literal(value) => Ok(Arc::new(ValueExec::new(value))),
            Expr::Column(c) => Ok(Arc::new(ColumnExec::try_new(&c, input_schema)?)),
            Expr::ScalarVariable(_, names) => {
                let name = names.join(".");
                let key = name.trim_start_matches('@').to_lowercase();
                match self.variables.get(&key) {
                    Some(value) => Ok(Arc::new(ValueExec::new(value.clone()))),
                    None => Err(parse_err!("Unknown variable {}", name)),
                }
            }
            Expr::OuterReferenceColumn(_, c) => {
                Err(internal_err!("Outer reference {} was not decorrelated before execution", c))
            }
            Expr::Not(expr) => {
                let expr = self.build_physical_expr(*expr, input_schema)?;
                Ok(Arc::new(NotExec::new(expr)))
            }
            Expr::IsNull(expr) => {
                let expr = self.build_physical_expr(*expr, input_schema)?;
                Ok(Arc::new(IsNullExec::new(expr, false)))
            }
            Expr::IsNotNull(expr) => {
                let expr = self.build_physical_expr(*expr, input_schema)?;
                Ok(Arc::new(IsNullExec::new(expr, true)))
            }
            Expr::Negative(expr) => {
                let expr = self.build_physical_expr(*expr, input_schema)?;
                Ok(Arc::new(NegativeExec::try_new(expr, input_schema)?))
            }
            Expr::Like(Like { negated, expr, pattern, case_insensitive, escape_char }) => {
                let expr = self.build_physical_expr(*expr, input_schema)?;
                let pattern = self.build_physical_expr(*pattern, input_schema)?;
                Ok(Arc::new(LikeExec::try_new(
                    expr,
                    pattern,
                    negated,
                    case_insensitive,
                    escape_char,
                    input_schema,
                )?))
            }
            Expr::Between(Between { expr, negated, low, high }) => {
                let lower = binary_expr(expr.as_ref().clone(), Operator::GtEq, *low);
                let upper = binary_expr(*expr, Operator::LtEq, *high);
                let range = self.build_physical_expr(lower.and(upper), input_schema)?;
                if negated {
                    return Ok(Arc::new(NotExec::new(range)));
                }
                Ok(range)
            }
            Expr::InList(InList { expr, list, negated }) => {
                let mut common = expr.get_type(input_schema)?;
                for e in &list {
                    let t = e.get_type(input_schema)?;
                    common = comparison_coercion(&common, &t).ok_or_else(|| {
                        unimplemented_err!("Unsupported coercion for IN list of {} and {}", common, t)
                    })?;
                }
                let expr = self.build_physical_expr(expr.cast_to(&common, input_schema)?, input_schema)?;
                let list = list
                    .into_iter()
                    .map(|e| self.build_physical_expr(e.cast_to(&common, input_schema)?, input_schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(InListExec::new(expr, list, negated)))
            }
            Expr::Case(case) => self.build_case(case, input_schema),
            Expr::ScalarSubquery(_) => {
                Err(unimplemented_err!("Scalar subquery was not rewritten into a join"))
            }
            Expr::BinaryExpr(BinaryExpr { left, op, right }) => {
                let lt = left.get_type(input_schema)?;
                let rt = right.get_type(input_schema)?;
                let (li, ri) = BinaryTypeCoercer::new(&lt, &op, &rt).get_input_types()?;
                let left = self.build_physical_expr(left.cast_to(&li, input_schema)?, input_schema)?;
                let right = self.build_physical_expr(right.cast_to(&ri, input_schema)?, input_schema)?;
                Ok(Arc::new(BinaryExprExec::try_new(left, op, right, input_schema)?))
            }
            Expr::Cast(Cast { expr, data_type }) => {
                let expr = self.build_physical_expr(*expr, input_schema)?;
                Ok(Arc::new(CastExec::new(data_type, expr)))
            }
            Expr::ScalarFunction(ScalarFunction { func, args }) => {
                let args = args
                    .into_iter()
                    .map(|e| self.build_physical_expr(e, input_schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(ScalarFunctionExec::try_new(func, args, input_schema)?))
            }
            Expr::AggregateFunction(f) => {
                Err(internal_err!("Aggregate function {}() outside of an aggregate", f.func.name()))
            }
            // only reachable as the argument of count(*)
            Expr::Wildcard { .. } => Ok(Arc::new(ValueExec::new(ScalarValue::Boolean(true)))),
        }
    }

    /// The operand and WHEN values are compared in one common type, the
    /// branches are cast to the type of the whole expression.
    fn build_case(&self, case: Case, schema: &LogicalSchema) -> Result<Arc<dyn PhysicalExpr>> {
        let datatype = Expr::Case(case.clone()).get_type(schema)?;
        let Case { expr, when_then, else_expr } = case;

        let operand_type = match &expr {
            Some(e) => {
                let mut common = e.get_type(schema)?;
                for (w, _) in &when_then {
                    let t = w.get_type(schema)?;
                    common = comparison_coercion(&common, &t).ok_or_else(|| {
                        unimplemented_err!("Unsupported coercion for CASE of {} and {}", common, t)
                    })?;
                }
                Some(common)
            }
            None => None,
        };

        let cast = |e: Expr, t: &DataType| -> Result<Arc<dyn PhysicalExpr>> {
            self.build_physical_expr(e.cast_to(t, schema)?, schema)
        };
        let operand = match (expr, &operand_type) {
            (Some(e), Some(t)) => Some(cast(*e, t)?),
            _ => None,
        };
        let when_then = when_then
            .into_iter()
            .map(|(w, t)| {
                let w = match &operand_type {
                    Some(ot) => cast(*w, ot)?,
                    None => self.build_physical_expr(*w, schema)?,
                };
                Ok((w, cast(*t, &datatype)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let else_expr = else_expr.map(|e| cast(*e, &datatype)).transpose()?;
        Ok(Arc::new(CaseExec::new(operand, when_then, else_expr, datatype)))
    }

    fn build_join_keys(
        &self,
        left: Expr,
        right: Expr,
        lschema: &LogicalSchema,
        rschema: &LogicalSchema,
    ) -> Result<(Arc<dyn PhysicalExpr>, Arc<dyn PhysicalExpr>)> {
        let lt = left.get_type(lschema)?;
        let rt = right.get_type(rschema)?;
        let t = comparison_coercion(&lt, &rt).ok_or_else(|| {
            parse_err!("Join keys {} and {} have incompatible types {} and {}", left, right, lt, rt)
        })?;
        let left = self.build_physical_expr(left.cast_to(&t, lschema)?, lschema)?;
        let right = self.build_physical_expr(right.cast_to(&t, rschema)?, rschema)?;
        Ok((left, right))
    }

    fn build_aggregate_expr(&self, expr: Expr, schema: &LogicalSchema) -> Result<AggregateExpr> {
        let name = expr.schema_name();
        match expr.unalias() {
            Expr::AggregateFunction(AggregateFunction { func, args }) => {
                let args = args
                    .into_iter()
                    .map(|e| self.build_physical_expr(e, schema))
                    .collect::<Result<Vec<_>>>()?;
                AggregateExpr::try_new(func, args, name, schema)
            }
            e => Err(internal_err!("Expect an aggregate function, got {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::optimizer::test_util::scan;
    use crate::sql::plan::expr::col;
    use crate::sql::plan::expr::lit;
    use crate::sql::plan::plan::Distinct;
    use crate::sql::plan::plan::JoinConstraint;
    use crate::sql::plan::plan::JoinType;
    use crate::sql::plan::schema::Column;
    use crate::sql::udf::aggregate::count;

    fn physical_lines(plan: Plan) -> Result<Vec<String>> {
        let plan = Compiler::default().build_execution_plan(plan)?;
        Ok(DisplayableExecutionPlan::new(&plan).lines())
    }

    fn join(on: Vec<(Expr, Expr)>, filter: Option<Expr>) -> Result<Plan> {
        let join = Join::try_new(
            scan("l", &["a", "b"])?,
            scan("r", &["c", "d"])?,
            on,
            filter,
            JoinType::Inner,
            JoinConstraint::On,
            false,
        )?;
        Ok(Plan::Join(join))
    }

    #[test]
    fn test_join_strategy() -> Result<()> {
        let lines = physical_lines(join(vec![(col("l.a"), col("r.c"))], None)?)?;
        assert_eq!("HashJoinExec: Inner, on=[(a@0, c@0)]", lines[0]);

        let filter = binary_expr(col("l.b"), Operator::Lt, col("r.d"));
        let lines = physical_lines(join(vec![], Some(filter))?)?;
        assert_eq!("NestedLoopJoinExec: Inner, filter=b@1 < d@3", lines[0]);
        Ok(())
    }

    #[test]
    fn test_aggregate_two_phases() -> Result<()> {
        let aggr = Expr::AggregateFunction(AggregateFunction { func: count(), args: vec![col("t.b")] });
        let plan = Plan::Aggregate(Aggregate::try_new(scan("t", &["a", "b"])?, vec![col("t.a")], vec![aggr])?);
        let expected = vec![
            "AggregateExec: mode=Final, gby=[a@0], aggr=[count(t.b)]",
            "  AggregateExec: mode=Partial, gby=[a@0], aggr=[count(t.b)]",
            "    MemoryScanExec: t",
        ];
        assert_eq!(expected, physical_lines(plan)?);
        Ok(())
    }

    #[test]
    fn test_coercion_casts() -> Result<()> {
        let schema = scan("t", &["a"])?.schema().clone();
        let expr = binary_expr(col("t.a"), Operator::Plus, lit(1.5f64));
        let physical = Compiler::default().build_physical_expr(expr, &schema)?;
        assert_eq!("CAST(a@0 AS DOUBLE) + 1.50", physical.to_string());
        assert_eq!(DataType::Double, physical.data_type(&schema)?);
        Ok(())
    }

    #[test]
    fn test_variables() -> Result<()> {
        let schema = LogicalSchema::empty();
        let var = Expr::ScalarVariable(DataType::Integer, vec!["@Min".to_string()]);

        let compiler = Compiler::new(HashMap::from([("min".to_string(), ScalarValue::Int64(3))]));
        assert_eq!("3", compiler.build_physical_expr(var.clone(), &schema)?.to_string());
        assert!(Compiler::default().build_physical_expr(var, &schema).is_err());
        Ok(())
    }

    #[test]
    fn test_rejects_unplannable() -> Result<()> {
        let distinct = Plan::Distinct(Distinct::new(scan("t", &["a"])?));
        assert!(Compiler::default().build_execution_plan(distinct).is_err());

        let outer = Expr::OuterReferenceColumn(DataType::Integer, Column::from("o.a"));
        assert!(Compiler::default().build_physical_expr(outer, &LogicalSchema::empty()).is_err());
        Ok(())
    }
}
