use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use log::debug;
use sqlparser::ast::BinaryOperator;
use sqlparser::ast::DataType as SQLDataType;
use sqlparser::ast::Distinct as SQLDistinct;
use sqlparser::ast::DuplicateTreatment;
use sqlparser::ast::Expr as SQLExpr;
use sqlparser::ast::Function;
use sqlparser::ast::FunctionArg;
use sqlparser::ast::FunctionArgExpr;
use sqlparser::ast::FunctionArguments;
use sqlparser::ast::GroupByExpr;
use sqlparser::ast::Ident;
use sqlparser::ast::JoinConstraint as SQLJoinConstraint;
use sqlparser::ast::JoinOperator;
use sqlparser::ast::ObjectName;
use sqlparser::ast::Offset;
use sqlparser::ast::OrderByExpr;
use sqlparser::ast::Query;
use sqlparser::ast::Select;
use sqlparser::ast::SelectItem;
use sqlparser::ast::SetExpr;
use sqlparser::ast::SetOperator;
use sqlparser::ast::SetQuantifier;
use sqlparser::ast::Statement;
use sqlparser::ast::TableAlias;
use sqlparser::ast::TableFactor;
use sqlparser::ast::TableWithJoins;
use sqlparser::ast::UnaryOperator;
use sqlparser::ast::Value as SQLValue;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::catalog::catalog::Catalog;
use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::format_expr_vec;
use crate::internal_err;
use crate::parse_err;
use crate::sql::plan::coercion::comparison_coercion;
use crate::sql::plan::expr::expr_as_column_expr;
use crate::sql::plan::expr::find_aggregate_exprs;
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
use crate::sql::plan::expr::Subquery;
use crate::sql::plan::plan::Aggregate;
use crate::sql::plan::plan::CrossJoin;
use crate::sql::plan::plan::Distinct;
use crate::sql::plan::plan::EmptyRelation;
use crate::sql::plan::plan::Explain;
use crate::sql::plan::plan::Filter;
use crate::sql::plan::plan::Join;
use crate::sql::plan::plan::JoinConstraint;
use crate::sql::plan::plan::JoinType;
use crate::sql::plan::plan::Limit;
use crate::sql::plan::plan::Plan;
use crate::sql::plan::plan::Projection;
use crate::sql::plan::plan::Sort;
use crate::sql::plan::plan::SortExpr;
use crate::sql::plan::plan::SubqueryAlias;
use crate::sql::plan::plan::TableScan;
use crate::sql::plan::plan::Union;
use crate::sql::plan::schema::Column;
use crate::sql::plan::schema::LogicalSchema;
use crate::sql::plan::visitor::Transformed;
use crate::sql::plan::visitor::TreeNode;
use crate::sql::plan::visitor::VisitRecursion;
use crate::sql::udf::new_func_registry;
use crate::sql::udf::FuncRegistry;
use crate::unimplemented_err;

/// Qualifiers of the two inputs of `INTERSECT` and `EXCEPT`.
const SET_LEFT_ALIAS: &str = "__set_left";
const SET_RIGHT_ALIAS: &str = "__set_right";

/// Parse `sql` into its only statement. Zero or several statements are an
/// error.
pub fn parse_sql(sql: &str) -> Result<Statement> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql)?;
    if statements.len() != 1 {
        return Err(parse_err!("Expect exactly one statement, got {}", statements.len()));
    }
    statements.pop().ok_or_else(|| internal_err!("Missing statement"))
}

/// The names visible while planning one query block. A subquery gets a
/// fresh context whose `outer_query_schema` is the schema of the enclosing
/// block, so nothing has to be restored once it is planned.
#[derive(Clone, Copy, Default)]
struct PlannerContext<'a> {
    /// The schema of the enclosing query, used to resolve correlated
    /// columns into outer references.
    outer_query_schema: Option<&'a LogicalSchema>,
    /// Common table expressions in scope, by name.
    ctes: Option<&'a HashMap<String, Plan>>,
    /// Select-list aliases, visible to GROUP BY, HAVING and ORDER BY when no
    /// input column has the name.
    aliases: Option<&'a HashMap<String, Expr>>,
    /// Column pairs joined by `USING` or `NATURAL`, an unqualified reference
    /// to one of them is not ambiguous.
    using_columns: &'a [HashSet<Column>],
}

/// SQL query planner and binder
///
/// This struct is used to convert a SQL AST into a Logical plan node [`Plan`].
///
/// It performs the following tasks:
///
/// 1. Name and type resolution (called "binding" in other systems). This
///    phase looks up table and column names using the [`Catalog`].
/// 2. Mechanical translation of the AST into a Logical plan node [`Plan`].
///
/// Set operation inputs are coerced to one shared schema here, everything
/// else is left to the optimizer.
#[derive(Clone)]
pub struct Planner {
    catalog: Arc<dyn Catalog>,
    ident_normalizer: IdentNormalizer,
    func_registry: Arc<dyn FuncRegistry>,
    /// Values of the `@name` variables, keyed by lowercase name.
    variables: HashMap<String, ScalarValue>,
}

impl Planner {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        let ident_normalizer = IdentNormalizer::new(true);
        let func_registry = new_func_registry();
        Self { catalog, ident_normalizer, func_registry, variables: HashMap::new() }
    }

    pub fn with_variables(mut self, variables: HashMap<String, ScalarValue>) -> Self {
        self.variables = variables;
        self
    }

    pub fn sql_to_plan(&self, sql: &str) -> Result<Plan> {
        self.statement_to_plan(parse_sql(sql)?)
    }

    pub fn statement_to_plan(&self, statement: Statement) -> Result<Plan> {
        match statement {
            Statement::Query(query) => self.query_to_plan(&PlannerContext::default(), *query),
            Statement::Explain { statement, .. } => {
                if let Statement::Explain { .. } = statement.as_ref() {
                    return self.semantic_err("Nested EXPLAIN is not supported");
                }
                let plan = self.statement_to_plan(*statement)?;
                Ok(Plan::Explain(Explain::new(plan)))
            }
            _ => self.unimplemented_err(format!("Unsupported statement {statement}")),
        }
    }

    /// Generate a logical plan from an SQL query/subquery
    #[cfg_attr(feature = "recursive-protection", recursive::recursive)]
    fn query_to_plan(&self, ctx: &PlannerContext, query: Query) -> Result<Plan> {
        let Query { with, body, order_by, limit, offset, fetch, limit_by, .. } = query;
        if fetch.is_some() {
            return self.unimplemented_err("FETCH is not supported");
        }
        if !limit_by.is_empty() {
            return self.unimplemented_err("LIMIT BY is not supported");
        }

        // The ctes of this query shadow the ones of the enclosing queries.
        let mut ctes = ctx.ctes.cloned().unwrap_or_default();
        if let Some(with) = with {
            if with.recursive {
                return self.unimplemented_err("Recursive CTEs are not supported");
            }
            let mut defined = HashSet::new();
            for cte in with.cte_tables {
                let name = self.normalize_ident(&cte.alias.name);
                if !defined.insert(name.clone()) {
                    return self
                        .semantic_err(format!("WITH query name {name} specified more than once"));
                }
                let cte_ctx = PlannerContext { ctes: Some(&ctes), aliases: None, ..*ctx };
                let plan = self.query_to_plan(&cte_ctx, *cte.query)?;
                let plan = self.apply_table_alias(plan, Some(cte.alias))?;
                ctes.insert(name, plan);
            }
        }
        let ctx = PlannerContext { ctes: Some(&ctes), aliases: None, ..*ctx };

        let plan = match *body {
            SetExpr::Select(select) => self.select_to_plan(&ctx, *select, order_by)?,
            set_expr => {
                let plan = self.set_expr_to_plan(&ctx, set_expr)?;
                self.order_by_output(&ctx, plan, order_by)?
            }
        };
        self.limit(plan, limit, offset)
    }

    fn set_expr_to_plan(&self, ctx: &PlannerContext, set_expr: SetExpr) -> Result<Plan> {
        match set_expr {
            SetExpr::Select(select) => self.select_to_plan(ctx, *select, vec![]),
            SetExpr::Query(query) => self.query_to_plan(ctx, *query),
            SetExpr::SetOperation { op, set_quantifier, left, right, .. } => {
                let all = match set_quantifier {
                    SetQuantifier::All => true,
                    SetQuantifier::Distinct | SetQuantifier::None => false,
                    _ => {
                        return self.unimplemented_err(format!(
                            "{set_quantifier} set operations are not supported"
                        ))
                    }
                };
                let left = self.set_expr_to_plan(ctx, *left)?;
                let right = self.set_expr_to_plan(ctx, *right)?;
                self.set_operation_to_plan(op, all, left, right)
            }
            _ => self.unimplemented_err(format!("Unsupported query body {set_expr}")),
        }
    }

    /// `UNION` concatenates the coerced inputs, `INTERSECT` and `EXCEPT`
    /// become semi and anti joins on every column, where NULL matches NULL.
    fn set_operation_to_plan(
        &self,
        op: SetOperator,
        all: bool,
        left: Plan,
        right: Plan,
    ) -> Result<Plan> {
        match op {
            SetOperator::Union => {
                let mut inputs = match left {
                    Plan::Union(Union { inputs, .. }) if all => inputs,
                    left => vec![left],
                };
                inputs.push(right);
                let union = Plan::Union(Union::try_new(self.coerce_set_inputs(inputs, true)?)?);
                if all {
                    Ok(union)
                } else {
                    Ok(Plan::Distinct(Distinct::new(union)))
                }
            }
            SetOperator::Intersect | SetOperator::Except => {
                let join_type = if op == SetOperator::Intersect {
                    JoinType::LeftSemi
                } else {
                    JoinType::LeftAnti
                };
                let mut inputs = self.coerce_set_inputs(vec![left, right], false)?.into_iter();
                let (Some(left), Some(right)) = (inputs.next(), inputs.next()) else {
                    return Err(internal_err!("Set operation expects two inputs"));
                };
                // Both sides may read the same table, the join keys need
                // distinct qualifiers to tell them apart.
                let left = Plan::SubqueryAlias(SubqueryAlias::try_new(left, SET_LEFT_ALIAS)?);
                let right = Plan::SubqueryAlias(SubqueryAlias::try_new(right, SET_RIGHT_ALIAS)?);
                let left = if all { left } else { Plan::Distinct(Distinct::new(left)) };
                let on = left
                    .schema()
                    .columns()
                    .into_iter()
                    .zip(right.schema().columns())
                    .map(|(l, r)| (Expr::Column(l), Expr::Column(r)))
                    .collect::<Vec<_>>();
                let join =
                    Join::try_new(left, right, on, None, join_type, JoinConstraint::On, true)?;
                Ok(Plan::Join(join))
            }
            #[allow(unreachable_patterns)]
            _ => self.unimplemented_err(format!("Unsupported set operation {op}")),
        }
    }

    /// Cast every input column to the type shared by its position. With
    /// `rename` the columns are also named after the first input.
    fn coerce_set_inputs(&self, inputs: Vec<Plan>, rename: bool) -> Result<Vec<Plan>> {
        let first = match inputs.first() {
            Some(plan) => plan.schema().clone(),
            None => return Err(internal_err!("Set operation without inputs")),
        };
        let mut datatypes = first.datatypes();
        for input in inputs.iter().skip(1) {
            let schema = input.schema();
            if schema.len() != first.len() {
                return self.semantic_err(format!(
                    "Set operation inputs must have the same number of columns, got {} and {}",
                    first.len(),
                    schema.len()
                ));
            }
            for (i, field) in schema.fields().iter().enumerate() {
                let coerced =
                    comparison_coercion(&datatypes[i], &field.datatype).ok_or_else(|| {
                        parse_err!(
                            "Incompatible types {} and {} for column {} of set operation",
                            datatypes[i],
                            field.datatype,
                            first.field(i).name
                        )
                    })?;
                datatypes[i] = coerced;
            }
        }

        inputs
            .into_iter()
            .map(|input| {
                let schema = input.schema().clone();
                let unchanged = (0..schema.len()).all(|i| {
                    schema.field(i).datatype == datatypes[i]
                        && (!rename
                            || (schema.field(i).name == first.field(i).name
                                && schema.qualifier(i) == first.qualifier(i)))
                });
                if unchanged {
                    return Ok(input);
                }
                let exprs = schema
                    .columns()
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| {
                        let expr = Expr::Column(c).cast_to(&datatypes[i], &schema)?;
                        let named = if rename { &first } else { &schema };
                        let name = named.field(i).name.clone();
                        Ok(Expr::Alias(Alias::new(expr, named.qualifier(i).cloned(), name)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Plan::Projection(Projection::try_new(exprs, input)?))
            })
            .collect()
    }

    fn select_to_plan(
        &self,
        ctx: &PlannerContext,
        select: Select,
        order_by: Vec<OrderByExpr>,
    ) -> Result<Plan> {
        let Select { distinct, top, projection, from, selection, group_by, having, .. } = select;
        if top.is_some() {
            return self.unimplemented_err("TOP is not supported");
        }
        let distinct = match distinct {
            None => false,
            Some(SQLDistinct::Distinct) => true,
            Some(SQLDistinct::On(_)) => return self.unimplemented_err("DISTINCT ON is not supported"),
        };

        // plan table with joins
        let mut using_columns = ctx.using_columns.to_vec();
        let plan = self.plan_from_tables(ctx, from, &mut using_columns)?;
        let ctx = PlannerContext { using_columns: &using_columns, ..*ctx };

        // plan the selection
        let plan = match selection {
            Some(sqlexpr) => {
                let predicate = self.sqlexpr_to_expr(&ctx, sqlexpr, plan.schema())?;
                if !find_aggregate_exprs([&predicate]).is_empty() {
                    return self.semantic_err("Aggregate functions are not allowed in WHERE");
                }
                Plan::Filter(Filter::try_new(predicate, plan)?)
            }
            None => plan,
        };
        let input_schema = plan.schema().clone();

        // Build the select exprs from projection
        let select_exprs = projection
            .into_iter()
            .map(|it| self.parse_select_item(&ctx, &input_schema, it))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        debug!("select_exprs: {}", format_expr_vec!(select_exprs));

        let aliases = select_exprs
            .iter()
            .filter_map(|e| match e {
                Expr::Alias(Alias { expr, name, .. }) => Some((name.clone(), expr.as_ref().clone())),
                _ => None,
            })
            .collect::<HashMap<_, _>>();
        let alias_ctx = PlannerContext { aliases: Some(&aliases), ..ctx };

        let group_exprs = match group_by {
            GroupByExpr::Expressions(exprs, ..) => {
                let mut group_exprs: Vec<Expr> = vec![];
                for sqlexpr in exprs {
                    let expr = match sqlexpr {
                        SQLExpr::Value(SQLValue::Number(n, _)) => {
                            let i = self.position(&n, select_exprs.len(), "GROUP BY")?;
                            select_exprs[i].clone().unalias()
                        }
                        sqlexpr => self.sqlexpr_to_expr(&alias_ctx, sqlexpr, &input_schema)?,
                    };
                    if !find_aggregate_exprs([&expr]).is_empty() {
                        return self.semantic_err(format!(
                            "Aggregate functions are not allowed in GROUP BY, got {expr}"
                        ));
                    }
                    if !group_exprs.contains(&expr) {
                        group_exprs.push(expr);
                    }
                }
                group_exprs
            }
            GroupByExpr::All { .. } => return self.unimplemented_err("GROUP BY ALL is not supported"),
        };
        debug!("group_exprs: {}", format_expr_vec!(group_exprs));

        let having_expr = having
            .map(|sqlexpr| self.sqlexpr_to_expr(&alias_ctx, sqlexpr, &input_schema))
            .transpose()?;

        // ORDER BY is bound to the input like the select list, so that it can
        // name aggregates and columns that are not selected.
        let order_exprs = order_by
            .into_iter()
            .map(|OrderByExpr { expr, asc, nulls_first, .. }| {
                let expr = match expr {
                    SQLExpr::Value(SQLValue::Number(n, _)) => {
                        let i = self.position(&n, select_exprs.len(), "ORDER BY")?;
                        select_exprs[i].clone().unalias()
                    }
                    SQLExpr::Identifier(ident)
                        if aliases.contains_key(&self.normalize_ident(&ident)) =>
                    {
                        let name = self.normalize_ident(&ident);
                        aliases.get(&name).cloned().ok_or_else(|| internal_err!("Lost alias {name}"))?
                    }
                    sqlexpr => self.sqlexpr_to_expr(&alias_ctx, sqlexpr, &input_schema)?,
                };
                Ok((expr, asc, nulls_first))
            })
            .collect::<Result<Vec<_>>>()?;

        // Find all the aggregated exprs recursively
        let aggr_exprs = find_aggregate_exprs(
            select_exprs.iter().chain(having_expr.iter()).chain(order_exprs.iter().map(|(e, ..)| e)),
        );
        debug!("aggr_exprs: {}", format_expr_vec!(aggr_exprs));

        // Build projection node directly if no aggregate needed, otherwise
        // aggregate then projection.
        let (plan, select_exprs, order_exprs) = if group_exprs.is_empty() && aggr_exprs.is_empty() {
            if having_expr.is_some() {
                return self.semantic_err("HAVING requires GROUP BY or an aggregate function");
            }
            (plan, select_exprs, order_exprs)
        } else {
            let aggregate = Aggregate::try_new(plan, group_exprs.clone(), aggr_exprs.clone())?;
            let schema = aggregate.schema.clone();
            let rewrite = |expr: Expr| -> Result<Expr> {
                rewrite_for_aggregate(expr, &group_exprs, &aggr_exprs, &schema)
            };
            let mut plan = Plan::Aggregate(aggregate);
            if let Some(having) = having_expr {
                plan = Plan::Filter(Filter::try_new(rewrite(having)?, plan)?);
            }
            let select_exprs = select_exprs.into_iter().map(rewrite).collect::<Result<Vec<_>>>()?;
            let order_exprs = order_exprs
                .into_iter()
                .map(|(e, asc, nulls_first)| Ok((rewrite(e)?, asc, nulls_first)))
                .collect::<Result<Vec<_>>>()?;
            (plan, select_exprs, order_exprs)
        };

        // Sort on the select output where possible, otherwise carry the
        // extra sort keys through the projection and drop them after sorting.
        let num_outputs = select_exprs.len();
        let mut extra_exprs: Vec<Expr> = vec![];
        let mut sort_exprs = vec![];
        for (expr, asc, nulls_first) in order_exprs {
            let key = match select_exprs.iter().position(|s| strip_alias(s) == &expr) {
                Some(i) => expr_as_column_expr(&select_exprs[i]),
                None if distinct => {
                    return self.semantic_err(format!(
                        "For SELECT DISTINCT, ORDER BY expression {expr} must appear in select list"
                    ))
                }
                None => {
                    let key = expr_as_column_expr(&expr);
                    if !extra_exprs.contains(&expr) {
                        extra_exprs.push(expr);
                    }
                    key
                }
            };
            sort_exprs.push(SortExpr::new(key, asc, nulls_first));
        }

        let widened = !extra_exprs.is_empty();
        let mut exprs = select_exprs;
        exprs.extend(extra_exprs);
        let mut plan = Plan::Projection(Projection::try_new(exprs, plan)?);
        if distinct {
            plan = Plan::Distinct(Distinct::new(plan));
        }
        if !sort_exprs.is_empty() {
            plan = Plan::Sort(Sort::new(sort_exprs, plan));
        }
        if widened {
            let schema = plan.schema().clone();
            let exprs = (0..num_outputs).map(|i| Expr::Column(schema.column(i))).collect();
            plan = Plan::Projection(Projection::try_new(exprs, plan)?);
        }
        Ok(plan)
    }

    /// ORDER BY of a set operation, which only sees the output columns.
    fn order_by_output(
        &self,
        ctx: &PlannerContext,
        plan: Plan,
        order_by: Vec<OrderByExpr>,
    ) -> Result<Plan> {
        if order_by.is_empty() {
            return Ok(plan);
        }
        let schema = plan.schema().clone();
        let sort_exprs = order_by
            .into_iter()
            .map(|OrderByExpr { expr, asc, nulls_first, .. }| {
                let expr = match expr {
                    SQLExpr::Value(SQLValue::Number(n, _)) => {
                        Expr::Column(schema.column(self.position(&n, schema.len(), "ORDER BY")?))
                    }
                    sqlexpr => self.sqlexpr_to_expr(ctx, sqlexpr, &schema)?,
                };
                Ok(SortExpr::new(expr, asc, nulls_first))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Plan::Sort(Sort::new(sort_exprs, plan)))
    }

    fn limit(&self, plan: Plan, limit: Option<SQLExpr>, offset: Option<Offset>) -> Result<Plan> {
        let skip = match offset {
            Some(offset) => self.parse_non_negative(offset.value, "OFFSET")?,
            None => 0,
        };
        let fetch = match limit {
            None | Some(SQLExpr::Value(SQLValue::Null)) => None,
            Some(sqlexpr) => Some(self.parse_non_negative(sqlexpr, "LIMIT")?),
        };
        if skip == 0 && fetch.is_none() {
            return Ok(plan);
        }
        Ok(Plan::Limit(Limit::new(plan, skip, fetch)))
    }

    fn parse_non_negative(&self, sqlexpr: SQLExpr, clause: &str) -> Result<usize> {
        match sqlexpr {
            SQLExpr::Value(SQLValue::Number(n, _)) => match n.parse::<usize>() {
                Ok(n) => Ok(n),
                Err(_) => self.semantic_err(format!("{clause} must be a non-negative integer, got {n}")),
            },
            _ => self.semantic_err(format!(
                "{clause} must be a non-negative integer literal, got {sqlexpr}"
            )),
        }
    }

    /// The zero based index of the one based select list position `n`.
    fn position(&self, n: &str, len: usize, clause: &str) -> Result<usize> {
        match n.parse::<usize>() {
            Ok(i) if i >= 1 && i <= len => Ok(i - 1),
            _ => self.semantic_err(format!("{clause} position {n} is not in select list")),
        }
    }

    fn plan_from_tables(
        &self,
        ctx: &PlannerContext,
        from: Vec<TableWithJoins>,
        using_columns: &mut Vec<HashSet<Column>>,
    ) -> Result<Plan> {
        let mut plan: Option<Plan> = None;
        for table in from {
            let right = self.plan_table_with_joins(ctx, table, using_columns)?;
            plan = Some(match plan {
                Some(left) => Plan::CrossJoin(CrossJoin::new(left, right)),
                None => right,
            });
        }
        Ok(plan.unwrap_or_else(|| Plan::EmptyRelation(EmptyRelation::new(true))))
    }

    fn plan_table_with_joins(
        &self,
        ctx: &PlannerContext,
        table: TableWithJoins,
        using_columns: &mut Vec<HashSet<Column>>,
    ) -> Result<Plan> {
        let mut left = self.plan_table_factor(ctx, table.relation, using_columns)?;
        for join in table.joins {
            let right = self.plan_table_factor(ctx, join.relation, using_columns)?;
            left = self.parse_join(ctx, left, right, join.join_operator, using_columns)?;
        }
        Ok(left)
    }

    fn plan_table_factor(
        &self,
        ctx: &PlannerContext,
        factor: TableFactor,
        using_columns: &mut Vec<HashSet<Column>>,
    ) -> Result<Plan> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = self.object_name_to_table(name)?;
                let plan = match ctx.ctes.and_then(|ctes| ctes.get(&table)) {
                    Some(cte) => cte.clone(),
                    None => {
                        let source = self.catalog.must_get_table(&table)?;
                        Plan::TableScan(TableScan::try_new(table.as_str(), source, None)?)
                    }
                };
                self.apply_table_alias(plan, alias)
            }
            TableFactor::Derived { lateral, subquery, alias, .. } => {
                if lateral {
                    return self.unimplemented_err("LATERAL is not supported");
                }
                let sub_ctx = PlannerContext { aliases: None, ..*ctx };
                let plan = self.query_to_plan(&sub_ctx, *subquery)?;
                self.apply_table_alias(plan, alias)
            }
            TableFactor::NestedJoin { table_with_joins, alias, .. } => {
                let plan = self.plan_table_with_joins(ctx, *table_with_joins, using_columns)?;
                self.apply_table_alias(plan, alias)
            }
            _ => self.unimplemented_err(format!("Unsupported table factor {factor}")),
        }
    }

    /// Requalify `plan` with the alias name, renaming its columns first when
    /// the alias carries a column list.
    fn apply_table_alias(&self, plan: Plan, alias: Option<TableAlias>) -> Result<Plan> {
        let Some(TableAlias { name, columns, .. }) = alias else {
            return Ok(plan);
        };
        let plan = if columns.is_empty() {
            plan
        } else {
            let schema = plan.schema().clone();
            if columns.len() != schema.len() {
                return self.semantic_err(format!(
                    "Source table contains {} columns but only {} names given as column alias",
                    schema.len(),
                    columns.len()
                ));
            }
            let exprs = schema
                .columns()
                .into_iter()
                .zip(columns.iter())
                .map(|(c, ident)| Expr::Column(c).alias(self.normalize_ident(ident)))
                .collect::<Vec<_>>();
            Plan::Projection(Projection::try_new(exprs, plan)?)
        };
        let alias = self.normalize_ident(&name);
        Ok(Plan::SubqueryAlias(SubqueryAlias::try_new(plan, alias)?))
    }

    fn parse_join(
        &self,
        ctx: &PlannerContext,
        left: Plan,
        right: Plan,
        join_operator: JoinOperator,
        using_columns: &mut Vec<HashSet<Column>>,
    ) -> Result<Plan> {
        let (join_type, constraint) = match join_operator {
            JoinOperator::Inner(constraint) => (JoinType::Inner, constraint),
            JoinOperator::LeftOuter(constraint) => (JoinType::Left, constraint),
            JoinOperator::RightOuter(constraint) => (JoinType::Right, constraint),
            JoinOperator::FullOuter(constraint) => (JoinType::Full, constraint),
            JoinOperator::LeftSemi(constraint) => (JoinType::LeftSemi, constraint),
            JoinOperator::RightSemi(constraint) => (JoinType::RightSemi, constraint),
            JoinOperator::LeftAnti(constraint) => (JoinType::LeftAnti, constraint),
            JoinOperator::RightAnti(constraint) => (JoinType::RightAnti, constraint),
            JoinOperator::CrossJoin => return Ok(Plan::CrossJoin(CrossJoin::new(left, right))),
            other => return self.unimplemented_err(format!("Unsupported join operator {other:?}")),
        };

        match constraint {
            // The equality keys are pulled out of the filter by the
            // optimizer, which knows the final input schemas.
            SQLJoinConstraint::On(sqlexpr) => {
                let schema = left.schema().join(right.schema());
                let join_ctx =
                    PlannerContext { aliases: None, using_columns: using_columns.as_slice(), ..*ctx };
                let filter = self.sqlexpr_to_expr(&join_ctx, sqlexpr, &schema)?;
                let join = Join::try_new(
                    left,
                    right,
                    vec![],
                    Some(filter),
                    join_type,
                    JoinConstraint::On,
                    false,
                )?;
                Ok(Plan::Join(join))
            }
            SQLJoinConstraint::Using(idents) => {
                let names = idents.iter().map(|it| self.normalize_ident(it)).collect::<Vec<_>>();
                self.using_join(left, right, join_type, names, using_columns)
            }
            SQLJoinConstraint::Natural => {
                let right_names =
                    right.schema().fields().iter().map(|f| f.name.clone()).collect::<HashSet<_>>();
                let mut names: Vec<String> = vec![];
                for field in left.schema().fields().iter() {
                    if right_names.contains(&field.name) && !names.contains(&field.name) {
                        names.push(field.name.clone());
                    }
                }
                if names.is_empty() && join_type == JoinType::Inner {
                    return Ok(Plan::CrossJoin(CrossJoin::new(left, right)));
                }
                self.using_join(left, right, join_type, names, using_columns)
            }
            SQLJoinConstraint::None => match join_type {
                JoinType::Inner => Ok(Plan::CrossJoin(CrossJoin::new(left, right))),
                _ => self.semantic_err(format!("{join_type} join requires a join condition")),
            },
        }
    }

    fn using_join(
        &self,
        left: Plan,
        right: Plan,
        join_type: JoinType,
        names: Vec<String>,
        using_columns: &mut Vec<HashSet<Column>>,
    ) -> Result<Plan> {
        let mut on = vec![];
        for name in names {
            let l = self.using_column(left.schema(), &name, "left", using_columns)?;
            let r = self.using_column(right.schema(), &name, "right", using_columns)?;
            using_columns.push(HashSet::from([l.clone(), r.clone()]));
            on.push((Expr::Column(l), Expr::Column(r)));
        }
        let join = Join::try_new(left, right, on, None, join_type, JoinConstraint::Using, false)?;
        Ok(Plan::Join(join))
    }

    /// The column of one join input named `name`. Several candidates are
    /// fine when an earlier USING join already merged them.
    fn using_column(
        &self,
        schema: &LogicalSchema,
        name: &str,
        side: &str,
        using_columns: &[HashSet<Column>],
    ) -> Result<Column> {
        let mut columns = schema.columns_with_unqualified_name(name);
        match columns.len() {
            0 => self.semantic_err(format!("USING column {name} not found in the {side} input")),
            1 => Ok(columns.remove(0)),
            _ if using_columns.iter().any(|g| columns.iter().all(|c| g.contains(c))) => {
                Ok(columns.remove(0))
            }
            _ => self.semantic_err(format!("USING column {name} is ambiguous in the {side} input")),
        }
    }

    fn parse_select_item(
        &self,
        ctx: &PlannerContext,
        schema: &LogicalSchema,
        item: SelectItem,
    ) -> Result<Vec<Expr>> {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                let expr = self.sqlexpr_to_expr(ctx, expr, schema)?;
                Ok(vec![expr])
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let expr = self.sqlexpr_to_expr(ctx, expr, schema)?;
                Ok(vec![expr.alias(self.normalize_ident(&alias))])
            }
            SelectItem::Wildcard(_) => {
                if schema.is_empty() {
                    return self.semantic_err("SELECT * with no tables specified is not valid");
                }
                Ok(schema.columns().into_iter().map(Expr::Column).collect())
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let qualifier = self.object_name_to_table(name)?;
                let exprs = schema
                    .iter()
                    .filter(|(q, _)| q.is_some_and(|q| q.as_str() == qualifier))
                    .map(|(q, f)| Expr::Column(Column::new(q.cloned(), f.name.clone())))
                    .collect::<Vec<_>>();
                if exprs.is_empty() {
                    return self.semantic_err(format!("Invalid qualifier {qualifier}"));
                }
                Ok(exprs)
            }
        }
    }

    fn sqlexpr_to_expr(
        &self,
        ctx: &PlannerContext,
        sqlexpr: SQLExpr,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        // Long chains like `a AND b AND c ...` nest deeply on the left, so
        // binary expressions are built with an explicit post-order
        // traversal instead of recursion:
        // 1. `stack` holds the pending work, `eval_stack` the built operands.
        // 2. A binary expression is replaced by its operator, right and left
        //   operands, pushed in that order so they pop as left, right, op.
        // 3. Any other expression is converted directly onto `eval_stack`.
        // 4. An operator pops its two operands and pushes the combined
        //   expression back.
        enum StackEntry {
            SQLExpr(Box<SQLExpr>),
            BinaryOperator(BinaryOperator),
        }
        let mut stack = vec![StackEntry::SQLExpr(Box::new(sqlexpr))];
        let mut eval_stack = vec![];
        while let Some(entry) = stack.pop() {
            match entry {
                StackEntry::SQLExpr(sqlexpr) => match *sqlexpr {
                    SQLExpr::BinaryOp { left, op, right, .. } => {
                        stack.push(StackEntry::BinaryOperator(op));
                        stack.push(StackEntry::SQLExpr(right));
                        stack.push(StackEntry::SQLExpr(left));
                    }
                    _ => eval_stack.push(self.sqlexpr_to_expr_internal(ctx, *sqlexpr, schema)?),
                },
                StackEntry::BinaryOperator(op) => {
                    let op = self.parse_binary_op(op)?;
                    let right = eval_stack.pop();
                    let left = eval_stack.pop();
                    let (Some(left), Some(right)) = (left, right) else {
                        return Err(internal_err!("Missing operands for {}", op));
                    };
                    eval_stack.push(Expr::BinaryExpr(BinaryExpr::new(left, op, right)))
                }
            }
        }
        match (eval_stack.pop(), eval_stack.is_empty()) {
            (Some(expr), true) => Ok(expr),
            _ => Err(internal_err!("Unbalanced binary expression")),
        }
    }

    fn parse_binary_op(&self, op: BinaryOperator) -> Result<Operator> {
        let op = match op {
            BinaryOperator::Plus => Operator::Plus,
            BinaryOperator::Minus => Operator::Minus,
            BinaryOperator::Multiply => Operator::Multiply,
            BinaryOperator::Divide => Operator::Divide,
            BinaryOperator::Modulo => Operator::Modulo,
            BinaryOperator::Eq => Operator::Eq,
            BinaryOperator::NotEq => Operator::NotEq,
            BinaryOperator::Gt => Operator::Gt,
            BinaryOperator::GtEq => Operator::GtEq,
            BinaryOperator::Lt => Operator::Lt,
            BinaryOperator::LtEq => Operator::LtEq,
            BinaryOperator::And => Operator::And,
            BinaryOperator::Or => Operator::Or,
            BinaryOperator::BitwiseAnd => Operator::BitwiseAnd,
            BinaryOperator::BitwiseOr => Operator::BitwiseOr,
            BinaryOperator::BitwiseXor => Operator::BitwiseXor,
            BinaryOperator::PGBitwiseShiftLeft => Operator::BitwiseShiftLeft,
            BinaryOperator::PGBitwiseShiftRight => Operator::BitwiseShiftRight,
            BinaryOperator::StringConcat => Operator::StringConcat,
            _ => return self.unimplemented_err(format!("Unsupported binary operator {op}")),
        };
        Ok(op)
    }

    #[cfg_attr(feature = "recursive-protection", recursive::recursive)]
    fn sqlexpr_to_expr_internal(
        &self,
        ctx: &PlannerContext,
        sqlexpr: SQLExpr,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        match sqlexpr {
            SQLExpr::Value(SQLValue::Placeholder(name)) if name.starts_with('@') => {
                self.parse_variable(vec![name])
            }
            SQLExpr::Value(value) => Ok(Expr::Literal(self.parse_value(value)?)),
            SQLExpr::TypedString { data_type, value, .. } => {
                let datatype = self.convert_data_type(&data_type)?;
                Ok(Expr::Literal(ScalarValue::Utf8(value).cast_to(&datatype)?))
            }
            SQLExpr::Identifier(ident) => self.parse_identifier_to_expr(ctx, ident, schema),
            SQLExpr::CompoundIdentifier(idents) => {
                self.parse_compound_ident_to_expr(ctx, idents, schema)
            }
            SQLExpr::UnaryOp { op, expr, .. } => self.parse_unaryop_to_expr(ctx, op, *expr, schema),
            SQLExpr::Nested(expr) => self.sqlexpr_to_expr(ctx, *expr, schema),
            SQLExpr::IsNull(expr) => {
                Ok(Expr::IsNull(Box::new(self.sqlexpr_to_expr(ctx, *expr, schema)?)))
            }
            SQLExpr::IsNotNull(expr) => {
                Ok(Expr::IsNotNull(Box::new(self.sqlexpr_to_expr(ctx, *expr, schema)?)))
            }
            SQLExpr::Like { negated, expr, pattern, escape_char, .. } => {
                let escape_char = escape_char.map(|c| c.to_string());
                self.parse_like_to_expr(ctx, *expr, *pattern, negated, escape_char, false, schema)
            }
            SQLExpr::ILike { negated, expr, pattern, escape_char, .. } => {
                let escape_char = escape_char.map(|c| c.to_string());
                self.parse_like_to_expr(ctx, *expr, *pattern, negated, escape_char, true, schema)
            }
            SQLExpr::InList { expr, list, negated, .. } => {
                let expr = self.sqlexpr_to_expr(ctx, *expr, schema)?;
                let list = list
                    .into_iter()
                    .map(|it| self.sqlexpr_to_expr(ctx, it, schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::InList(InList::new(expr, list, negated)))
            }
            SQLExpr::Between { expr, negated, low, high, .. } => {
                let expr = self.sqlexpr_to_expr(ctx, *expr, schema)?;
                let low = self.sqlexpr_to_expr(ctx, *low, schema)?;
                let high = self.sqlexpr_to_expr(ctx, *high, schema)?;
                Ok(Expr::Between(Between::new(expr, negated, low, high)))
            }
            SQLExpr::Case { operand, conditions, results, else_result, .. } => {
                let expr = operand
                    .map(|e| self.sqlexpr_to_expr(ctx, *e, schema).map(Box::new))
                    .transpose()?;
                let when_then = conditions
                    .into_iter()
                    .zip(results)
                    .map(|(w, t)| {
                        let w = self.sqlexpr_to_expr(ctx, w, schema)?;
                        let t = self.sqlexpr_to_expr(ctx, t, schema)?;
                        Ok((Box::new(w), Box::new(t)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let else_expr = else_result
                    .map(|e| self.sqlexpr_to_expr(ctx, *e, schema).map(Box::new))
                    .transpose()?;
                Ok(Expr::Case(Case { expr, when_then, else_expr }))
            }
            SQLExpr::Cast { expr, data_type, .. } => {
                let expr = self.sqlexpr_to_expr(ctx, *expr, schema)?;
                Ok(Expr::Cast(Cast::new(expr, self.convert_data_type(&data_type)?)))
            }
            SQLExpr::Subquery(query) => self.parse_scalar_subquery_to_expr(ctx, *query, schema),
            SQLExpr::Function(f) => self.parse_function_to_expr(ctx, f, schema),
            _ => self.unimplemented_err(format!("Unsupported expression {sqlexpr}")),
        }
    }

    fn parse_function_to_expr(
        &self,
        ctx: &PlannerContext,
        func: Function,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        let Function { name, args, over, filter, .. } = func;
        let func_name = name.0.iter().map(|it| self.normalize_ident(it)).collect::<Vec<_>>().join(".");
        if over.is_some() {
            return self.unimplemented_err(format!("Window function {func_name} is not supported"));
        }
        if filter.is_some() {
            return self.unimplemented_err(format!("FILTER on {func_name} is not supported"));
        }
        let (args, distinct) = match args {
            FunctionArguments::None => (vec![], false),
            FunctionArguments::Subquery(_) => {
                return self.unimplemented_err(format!("Subquery argument of {func_name}"))
            }
            FunctionArguments::List(list) => {
                let distinct = matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct));
                (list.args, distinct)
            }
        };

        // Check scalar function first
        if let Some(udf) = self.func_registry.udf(&func_name) {
            if distinct {
                return self.semantic_err(format!("DISTINCT is not allowed in {func_name}"));
            }
            let args = args
                .into_iter()
                .map(|arg| match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                        self.sqlexpr_to_expr(ctx, e, schema)
                    }
                    _ => self.semantic_err(format!("Unsupported argument {arg} of {func_name}")),
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Expr::ScalarFunction(ScalarFunction { func: udf, args }));
        }

        // Then the aggregate function
        if let Some(udaf) = self.func_registry.udaf(&func_name) {
            if distinct {
                return self.unimplemented_err(format!("{func_name}(DISTINCT ..) is not supported"));
            }
            let mut exprs = vec![];
            for arg in args {
                match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                        exprs.push(self.sqlexpr_to_expr(ctx, e, schema)?)
                    }
                    FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
                        exprs.extend(udaf.expand_wildcard()?)
                    }
                    _ => {
                        return self
                            .semantic_err(format!("Unsupported argument {arg} of {func_name}"))
                    }
                }
            }
            if !find_aggregate_exprs(&exprs).is_empty() {
                return self.semantic_err(format!("Aggregate calls cannot be nested in {func_name}"));
            }
            return Ok(Expr::AggregateFunction(AggregateFunction { func: udaf, args: exprs }));
        }

        self.semantic_err(format!("Unknown function {func_name}"))
    }

    fn parse_scalar_subquery_to_expr(
        &self,
        ctx: &PlannerContext,
        subquery: Query,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        let sub_ctx = PlannerContext { outer_query_schema: Some(schema), aliases: None, ..*ctx };
        let subplan = self.query_to_plan(&sub_ctx, subquery)?;

        // validate the subplan produce a single column.
        let fields = subplan.schema().fields();
        if fields.len() != 1 {
            let names = fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
            return self.semantic_err(format!(
                "Too many columns: {}, select only one column in the subquery",
                names.join(", ")
            ));
        }
        let outer_ref_columns = outer_references(&subplan);
        Ok(Expr::ScalarSubquery(Subquery::new(subplan, outer_ref_columns)))
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_like_to_expr(
        &self,
        ctx: &PlannerContext,
        sqlexpr: SQLExpr,
        pattern: SQLExpr,
        negated: bool,
        escape_char: Option<String>,
        case_insensitive: bool,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        let escape_char = match escape_char {
            None => None,
            Some(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => return self.semantic_err(format!("Invalid escape character '{s}'")),
                }
            }
        };
        let pattern = self.sqlexpr_to_expr(ctx, pattern, schema)?;
        let expr = self.sqlexpr_to_expr(ctx, sqlexpr, schema)?;
        Ok(Expr::Like(Like::new(expr, pattern, negated, case_insensitive, escape_char)))
    }

    fn parse_unaryop_to_expr(
        &self,
        ctx: &PlannerContext,
        op: UnaryOperator,
        sqlexpr: SQLExpr,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        match op {
            UnaryOperator::Plus => {
                let operand = self.sqlexpr_to_expr(ctx, sqlexpr, schema)?;
                let datatype = operand.get_type(schema)?;
                match datatype {
                    DataType::Integer | DataType::Double | DataType::Null => Ok(operand),
                    _ => self.semantic_err(format!("+ cannot be used with {datatype}")),
                }
            }
            UnaryOperator::Minus => match sqlexpr {
                SQLExpr::Value(SQLValue::Number(n, _)) => {
                    // if it is a numeric value, apply the minus directly.
                    Ok(Expr::Literal(self.parse_value_number(&n, true)?))
                }
                _ => {
                    // otherwise wrap it with negative operator
                    let operand = self.sqlexpr_to_expr(ctx, sqlexpr, schema)?;
                    let datatype = operand.get_type(schema)?;
                    if !datatype.is_numeric() && datatype != DataType::Null {
                        return self.semantic_err(format!("- cannot be used with {datatype}"));
                    }
                    Ok(Expr::Negative(Box::new(operand)))
                }
            },
            UnaryOperator::Not => {
                Ok(Expr::Not(Box::new(self.sqlexpr_to_expr(ctx, sqlexpr, schema)?)))
            }
            _ => self.unimplemented_err(format!("Unsupported unary operator {op}")),
        }
    }

    fn parse_compound_ident_to_expr(
        &self,
        ctx: &PlannerContext,
        mut idents: Vec<Ident>,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        if idents.first().is_some_and(|it| it.value.starts_with('@')) {
            return self.parse_variable(idents.into_iter().map(|it| it.value).collect());
        }
        if idents.len() != 2 {
            return self.unimplemented_err(format!(
                "Compound identifier with {} parts is not supported",
                idents.len()
            ));
        }
        let table = self.ident_normalizer.normalize(idents.remove(0));
        let name = self.ident_normalizer.normalize(idents.remove(0));
        self.resolve_column(ctx, Column::new(Some(table.into()), name), schema)
    }

    fn parse_identifier_to_expr(
        &self,
        ctx: &PlannerContext,
        ident: Ident,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        if ident.value.starts_with('@') {
            return self.parse_variable(vec![ident.value]);
        }
        let name = self.ident_normalizer.normalize(ident);
        self.resolve_column(ctx, Column::new_unqualified(name), schema)
    }

    /// Resolve against the current schema, then the select-list aliases, then
    /// the enclosing query, where a match becomes an outer reference.
    fn resolve_column(
        &self,
        ctx: &PlannerContext,
        column: Column,
        schema: &LogicalSchema,
    ) -> Result<Expr> {
        if column.relation.is_none() && schema.columns_with_unqualified_name(&column.name).is_empty() {
            if let Some(expr) = ctx.aliases.and_then(|aliases| aliases.get(&column.name)) {
                return Ok(expr.clone());
            }
        }

        let mut levels = vec![vec![schema]];
        if let Some(outer) = ctx.outer_query_schema {
            levels.push(vec![outer]);
        }
        match column.resolve(&levels, ctx.using_columns)? {
            (0, column) => Ok(Expr::Column(column)),
            (_, column) => {
                let outer = ctx
                    .outer_query_schema
                    .ok_or_else(|| internal_err!("Column {} resolved without outer query", column))?;
                let field = outer.field_with_column(&column)?;
                Ok(Expr::OuterReferenceColumn(field.datatype.clone(), column))
            }
        }
    }

    fn parse_variable(&self, names: Vec<String>) -> Result<Expr> {
        let name = names.join(".");
        let key = name.trim_start_matches('@').to_lowercase();
        match self.variables.get(&key) {
            Some(value) => Ok(Expr::ScalarVariable(value.datatype(), names)),
            None => self.semantic_err(format!("Unknown variable {name}")),
        }
    }

    fn parse_value(&self, value: SQLValue) -> Result<ScalarValue> {
        match value {
            SQLValue::Number(n, _) => self.parse_value_number(&n, false),
            SQLValue::SingleQuotedString(s) | SQLValue::DoubleQuotedString(s) => {
                Ok(ScalarValue::Utf8(s))
            }
            SQLValue::Boolean(b) => Ok(ScalarValue::Boolean(b)),
            SQLValue::Null => Ok(ScalarValue::Null),
            _ => self.unimplemented_err(format!("Unsupported value {value}")),
        }
    }

    fn parse_value_number(&self, n: &str, negative: bool) -> Result<ScalarValue> {
        let num = if negative { Cow::Owned(format!("-{n}")) } else { Cow::Borrowed(n) };
        // Try to parse as i64 first, then f64
        if let Ok(n) = num.parse::<i64>() {
            return Ok(ScalarValue::Int64(n));
        }
        if let Ok(n) = num.parse::<f64>() {
            return Ok(ScalarValue::Double(n));
        }
        self.semantic_err(format!("invalid number {}", n))
    }

    fn convert_data_type(&self, sql_type: &SQLDataType) -> Result<DataType> {
        match sql_type {
            SQLDataType::Boolean | SQLDataType::Bool => Ok(DataType::Boolean),
            SQLDataType::TinyInt { .. }
            | SQLDataType::SmallInt { .. }
            | SQLDataType::Int { .. }
            | SQLDataType::Integer { .. }
            | SQLDataType::BigInt { .. } => Ok(DataType::Integer),
            SQLDataType::Float { .. }
            | SQLDataType::Real { .. }
            | SQLDataType::Double { .. }
            | SQLDataType::DoublePrecision { .. }
            | SQLDataType::Decimal { .. }
            | SQLDataType::Numeric { .. } => Ok(DataType::Double),
            SQLDataType::Char { .. }
            | SQLDataType::Varchar { .. }
            | SQLDataType::Text { .. }
            | SQLDataType::String { .. } => Ok(DataType::Utf8),
            SQLDataType::Date { .. } => Ok(DataType::Date),
            SQLDataType::Timestamp { .. } | SQLDataType::Datetime { .. } => Ok(DataType::Timestamp),
            _ => self.unimplemented_err(format!("Unsupported data type {sql_type}")),
        }
    }

    fn object_name_to_table(&self, name: ObjectName) -> Result<String> {
        let ObjectName(mut idents) = name;
        if idents.len() != 1 {
            let parts = idents.iter().map(|it| it.value.as_str()).collect::<Vec<_>>();
            return self.unimplemented_err(format!(
                "Qualified table name {} is not supported",
                parts.join(".")
            ));
        }
        Ok(self.ident_normalizer.normalize(idents.remove(0)))
    }

    fn normalize_ident(&self, ident: &Ident) -> String {
        self.ident_normalizer.normalize(ident.clone())
    }

    fn semantic_err<T, E: ToString>(&self, msg: E) -> Result<T> {
        Err(parse_err!("{}", msg.to_string()))
    }

    fn unimplemented_err<T, E: ToString>(&self, msg: E) -> Result<T> {
        Err(unimplemented_err!("{}", msg.to_string()))
    }
}

fn strip_alias(expr: &Expr) -> &Expr {
    match expr {
        Expr::Alias(Alias { expr, .. }) => expr,
        e => e,
    }
}

/// Replace the group expressions and aggregate calls inside `expr` with the
/// matching columns of the aggregate output. Any column left over is neither
/// grouped nor aggregated.
fn rewrite_for_aggregate(
    expr: Expr,
    group_exprs: &[Expr],
    aggr_exprs: &[Expr],
    schema: &LogicalSchema,
) -> Result<Expr> {
    let expr = expr
        .transform_down(|e| {
            if group_exprs.contains(&e) || aggr_exprs.contains(&e) {
                let column = expr_as_column_expr(&e);
                return Ok(Transformed::new(column, true, VisitRecursion::Jump));
            }
            Ok(Transformed::no(e))
        })?
        .data;
    for column in expr.column_refs() {
        if !schema.has_column(&column) {
            return Err(parse_err!(
                "Column {} must appear in the GROUP BY clause or be used in an aggregate function",
                column
            ));
        }
    }
    Ok(expr)
}

/// The distinct outer references used anywhere in `plan`.
fn outer_references(plan: &Plan) -> Vec<Expr> {
    let mut out: Vec<Expr> = vec![];
    let _ = plan.walk(|node| {
        for expr in node.expressions() {
            let _ = expr.walk(|e| {
                if let Expr::OuterReferenceColumn(..) = e {
                    if !out.contains(e) {
                        out.push(e.clone());
                    }
                }
                Ok(VisitRecursion::Continue)
            });
        }
        Ok(VisitRecursion::Continue)
    });
    out
}

#[derive(Clone)]
pub struct IdentNormalizer {
    normalize: bool,
}

impl Default for IdentNormalizer {
    fn default() -> Self {
        Self { normalize: true }
    }
}

impl IdentNormalizer {
    pub fn new(normalize: bool) -> Self {
        Self { normalize }
    }

    /// Unquoted identifiers are case insensitive.
    pub fn normalize(&self, ident: Ident) -> String {
        if !self.normalize || ident.quote_style.is_some() {
            return ident.value;
        }
        ident.value.to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::catalog::MemoryCatalog;
    use crate::catalog::table::MemTable;
    use crate::error::Error;
    use crate::sql::plan::schema::Field;
    use crate::sql::plan::schema::TableReference;

    fn catalog() -> Result<Arc<dyn Catalog>> {
        let catalog = MemoryCatalog::new();
        let tables = [
            (
                "employees",
                vec![
                    Field::new("employee_id", DataType::Integer, false),
                    Field::new("name", DataType::Utf8, false),
                    Field::new("salary", DataType::Double, false),
                    Field::new("department_id", DataType::Integer, true),
                ],
            ),
            (
                "departments",
                vec![
                    Field::new("department_id", DataType::Integer, false),
                    Field::new("department_name", DataType::Utf8, false),
                ],
            ),
        ];
        for (name, fields) in tables {
            let schema = Arc::new(LogicalSchema::from_unqualified_fields(fields.into())?);
            catalog.register_table(Arc::new(MemTable::try_new(name, schema, vec![])?))?;
        }
        Ok(Arc::new(catalog))
    }

    fn plan(sql: &str) -> Result<Plan> {
        Planner::new(catalog()?).sql_to_plan(sql)
    }

    fn assert_plan(sql: &str, expected: &str) -> Result<()> {
        assert_eq!(expected, plan(sql)?.to_string(), "{sql}");
        Ok(())
    }

    fn assert_parse_err(sql: &str) -> Result<()> {
        match plan(sql) {
            Err(Error::Parse(_)) => Ok(()),
            other => panic!("{sql}: expect a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_select_without_from() -> Result<()> {
        assert_plan(
            "SELECT 1 AS a, 2 AS b",
            "\
Projection: 1 AS a, 2 AS b
  EmptyRelation",
        )
    }

    #[test]
    fn test_order_by_widens_projection() -> Result<()> {
        assert_plan(
            "SELECT e.name FROM employees e WHERE e.salary > 100 ORDER BY e.salary DESC LIMIT 3 OFFSET 1",
            "\
Limit: skip=1, fetch=3
  Projection: e.name
    Sort: e.salary DESC NULLS FIRST
      Projection: e.name, e.salary
        Filter: e.salary > 100
          SubqueryAlias: e
            TableScan: employees",
        )
    }

    #[test]
    fn test_having_alias() -> Result<()> {
        assert_plan(
            "SELECT department_id, MAX(salary) AS top FROM employees GROUP BY department_id HAVING top > 10",
            "\
Projection: employees.department_id, max(employees.salary) AS top
  Filter: max(employees.salary) > 10
    Aggregate: groupBy=[employees.department_id], aggr=[max(employees.salary)]
      TableScan: employees",
        )
    }

    #[test]
    fn test_positional_group_and_order() -> Result<()> {
        assert_plan(
            "SELECT department_id, count(*) FROM employees GROUP BY 1 ORDER BY 2 DESC NULLS LAST",
            "\
Sort: count(*) DESC NULLS LAST
  Projection: employees.department_id, count(*)
    Aggregate: groupBy=[employees.department_id], aggr=[count(*)]
      TableScan: employees",
        )?;
        assert_parse_err("SELECT department_id FROM employees GROUP BY 2")?;
        assert_parse_err("SELECT name, count(*) FROM employees GROUP BY department_id")
    }

    #[test]
    fn test_set_operations() -> Result<()> {
        let union = plan("SELECT employee_id FROM employees UNION SELECT department_id FROM departments")?;
        let Plan::Distinct(Distinct { input }) = &union else { panic!("expect Distinct, got {union}") };
        assert!(matches!(input.as_ref(), Plan::Union(Union { inputs, .. }) if inputs.len() == 2));
        assert_eq!("employee_id", union.schema().field(0).name);

        let union_all = plan("SELECT 1 UNION ALL SELECT 2.5 UNION ALL SELECT NULL")?;
        let Plan::Union(Union { inputs, schema }) = &union_all else { panic!("expect Union") };
        assert_eq!(3, inputs.len());
        assert_eq!(DataType::Double, schema.field(0).datatype);

        let except = plan("SELECT department_id FROM employees EXCEPT SELECT department_id FROM departments")?;
        let Plan::Join(join) = &except else { panic!("expect Join, got {except}") };
        assert_eq!(JoinType::LeftAnti, join.join_type);
        assert!(join.null_equals_null);
        assert!(matches!(join.left.as_ref(), Plan::Distinct(_)));

        let intersect =
            plan("SELECT department_id FROM employees INTERSECT ALL SELECT department_id FROM departments")?;
        let Plan::Join(join) = &intersect else { panic!("expect Join, got {intersect}") };
        assert_eq!(JoinType::LeftSemi, join.join_type);
        assert_eq!(1, join.on.len());

        // Each side keeps its own qualifier, even when both read one table.
        let intersect = plan("SELECT department_id FROM employees INTERSECT SELECT department_id FROM employees")?;
        let Plan::Join(join) = &intersect else { panic!("expect Join, got {intersect}") };
        let keys = vec![(
            crate::sql::plan::expr::col("__set_left.department_id"),
            crate::sql::plan::expr::col("__set_right.department_id"),
        )];
        assert_eq!(keys, join.on);
        assert_eq!("department_id", intersect.schema().field(0).name);

        assert_parse_err("SELECT employee_id, name FROM employees UNION SELECT department_id FROM departments")
    }

    #[test]
    fn test_correlated_subquery() -> Result<()> {
        let plan = plan(
            "SELECT name FROM employees e WHERE salary > \
             (SELECT avg(salary) FROM employees WHERE department_id = e.department_id)",
        )?;
        let Plan::Projection(Projection { input, .. }) = &plan else { panic!("expect Projection") };
        let Plan::Filter(Filter { predicate, .. }) = input.as_ref() else { panic!("expect Filter") };
        let Expr::BinaryExpr(BinaryExpr { left, right, .. }) = predicate else {
            panic!("expect BinaryExpr, got {predicate}")
        };
        assert_eq!(Expr::Column(Column::from("e.salary")), **left);
        let Expr::ScalarSubquery(Subquery { outer_ref_columns, .. }) = right.as_ref() else {
            panic!("expect subquery, got {right}")
        };
        assert_eq!(
            vec![Expr::OuterReferenceColumn(DataType::Integer, Column::from("e.department_id"))],
            *outer_ref_columns
        );
        Ok(())
    }

    #[test]
    fn test_joins() -> Result<()> {
        let using = plan("SELECT department_id FROM employees JOIN departments USING (department_id)")?;
        let Plan::Projection(Projection { exprs, input, .. }) = &using else { panic!("expect Projection") };
        assert_eq!(vec![Expr::Column(Column::from("employees.department_id"))], *exprs);
        let Plan::Join(join) = input.as_ref() else { panic!("expect Join") };
        assert_eq!(JoinConstraint::Using, join.join_constraint);
        assert_eq!(1, join.on.len());

        let natural = plan("SELECT * FROM employees NATURAL LEFT JOIN departments")?;
        assert_eq!(6, natural.schema().len());

        assert_plan(
            "SELECT e.name, d.department_name FROM employees e, departments d WHERE e.department_id = d.department_id",
            "\
Projection: e.name, d.department_name
  Filter: e.department_id = d.department_id
    CrossJoin:
      SubqueryAlias: e
        TableScan: employees
      SubqueryAlias: d
        TableScan: departments",
        )?;
        assert_plan(
            "SELECT d.department_name FROM employees e LEFT JOIN departments d ON e.department_id = d.department_id",
            "\
Projection: d.department_name
  Left Join: Filter: e.department_id = d.department_id
    SubqueryAlias: e
      TableScan: employees
    SubqueryAlias: d
      TableScan: departments",
        )?;
        assert_parse_err("SELECT department_id FROM employees, departments")
    }

    #[test]
    fn test_ctes_and_derived_tables() -> Result<()> {
        let plan = plan(
            "WITH d(id, label) AS (SELECT department_id, department_name FROM departments) \
             SELECT label FROM d WHERE id = 1",
        )?;
        assert_eq!(Some(&TableReference::from("d")), plan.schema().qualifier(0));
        assert_eq!("label", plan.schema().field(0).name);

        let derived = self::plan("SELECT t.n FROM (SELECT name AS n FROM employees) AS t")?;
        assert_eq!("n", derived.schema().field(0).name);

        assert_parse_err("SELECT * FROM departments AS d(a, b, c)")?;
        assert_parse_err("SELECT * FROM nope")
    }

    #[test]
    fn test_literals_and_variables() -> Result<()> {
        let planner = Planner::new(catalog()?)
            .with_variables(HashMap::from([("min".to_string(), ScalarValue::Int64(5))]));
        let plan = planner.sql_to_plan("SELECT @min, -3, -2.5, DATE '2020-01-02'")?;
        let Plan::Projection(Projection { exprs, .. }) = &plan else { panic!("expect Projection") };
        assert_eq!(Expr::ScalarVariable(DataType::Integer, vec!["@min".to_string()]), exprs[0]);
        assert_eq!(Expr::Literal(ScalarValue::Int64(-3)), exprs[1]);
        assert_eq!(Expr::Literal(ScalarValue::Double(-2.5)), exprs[2]);
        assert_eq!(DataType::Date, plan.schema().field(3).datatype);

        assert!(matches!(planner.sql_to_plan("SELECT @max"), Err(Error::Parse(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_statements() -> Result<()> {
        assert_parse_err("SELECT 1; SELECT 2")?;
        assert_parse_err("SELECT 1 LIMIT -1")?;
        assert_parse_err("SELECT 1 LIMIT 1 + 1")?;
        assert_parse_err("EXPLAIN EXPLAIN SELECT 1")?;
        assert_parse_err("SELECT salary FROM employees WHERE count(*) > 1")?;
        assert_parse_err("SELECT DISTINCT name FROM employees ORDER BY salary")?;
        assert!(matches!(
            plan("SELECT count(DISTINCT name) FROM employees"),
            Err(Error::Unimplemented(_))
        ));
        assert!(matches!(plan("EXPLAIN SELECT 1")?, Plan::Explain(_)));
        Ok(())
    }
}
