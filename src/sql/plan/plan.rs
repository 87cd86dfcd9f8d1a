use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use crate::apply_each;
use crate::catalog::r#type::DataType;
use crate::catalog::table::TableProvider;
use crate::error::Error;
use crate::error::Result;
use crate::format_expr_vec;
use crate::internal_err;
use crate::parse_err;
use crate::sql::plan::expr::Expr;
use crate::sql::plan::expr::Subquery;
use crate::sql::plan::schema::Field;
use crate::sql::plan::schema::Fields;
use crate::sql::plan::schema::LogicalSchema;
use crate::sql::plan::schema::SchemaRef;
use crate::sql::plan::schema::TableReference;
use crate::sql::plan::visitor::map_until_stop;
use crate::sql::plan::visitor::Transformed;
use crate::sql::plan::visitor::TreeNode;
use crate::sql::plan::visitor::TreeNodeVisitor;
use crate::sql::plan::visitor::VisitRecursion;

/// A `Plan` is a logical node in a tree of relational operators(such as
/// Projection or Filter). Also known as `Logical Plan`
#[derive(Clone, Debug, PartialEq)]
pub enum Plan {
    /// Scan rows from a table/relation.
    TableScan(TableScan),
    /// Evaluates an arbitrary list of expressions on its input.
    Projection(Projection),
    /// Filters rows from its input that do not match an
    /// expression (essentially a WHERE clause with a predicate
    /// expression).
    ///
    /// Semantically, `<predicate>` is evaluated for each row of the
    /// input; If the value of `<predicate>` is true, the input row is
    /// passed to the output. If the value of `<predicate>` is false
    /// (or null), the row is discarded.
    Filter(Filter),
    /// Aggregates its input based on a set of grouping and aggregate
    /// expressions (e.g. SUM). This is used to implement SQL aggregates
    /// and `GROUP BY`.
    Aggregate(Aggregate),
    /// Join two logical plans on one or more join columns.
    /// This is used to implement SQL `JOIN`.
    Join(Join),
    /// Every row of the left input combined with every row of the right.
    CrossJoin(CrossJoin),
    /// Sorts its input according to a list of sort expressions. This
    /// is used to implement SQL `ORDER BY`
    Sort(Sort),
    /// Skip some number of rows, and then fetch some number of rows.
    Limit(Limit),
    /// Concatenate the rows of inputs sharing one schema.
    Union(Union),
    /// Remove duplicate rows. Rewritten into an `Aggregate` before physical
    /// planning.
    Distinct(Distinct),
    /// Aliased relation provides, or changes, the name of a relation.
    SubqueryAlias(SubqueryAlias),
    /// A relation without columns, producing one row or none.
    EmptyRelation(EmptyRelation),
    /// Produces a relation with string representations of
    /// various parts of the plan. This is used to implement SQL `EXPLAIN`.
    Explain(Explain),
}

impl Plan {
    pub fn schema(&self) -> &SchemaRef {
        match self {
            Plan::TableScan(TableScan { projected_schema, .. }) => projected_schema,
            Plan::Projection(Projection { schema, .. }) => schema,
            Plan::Filter(Filter { input, .. }) => input.schema(),
            Plan::Aggregate(Aggregate { schema, .. }) => schema,
            Plan::Join(Join { schema, .. }) => schema,
            Plan::CrossJoin(CrossJoin { schema, .. }) => schema,
            Plan::Sort(Sort { input, .. }) => input.schema(),
            Plan::Limit(Limit { input, .. }) => input.schema(),
            Plan::Union(Union { schema, .. }) => schema,
            Plan::Distinct(Distinct { input }) => input.schema(),
            Plan::SubqueryAlias(SubqueryAlias { schema, .. }) => schema,
            Plan::EmptyRelation(EmptyRelation { schema, .. }) => schema,
            Plan::Explain(Explain { schema, .. }) => schema,
        }
    }

    /// The direct inputs of this node.
    pub fn inputs(&self) -> Vec<&Plan> {
        match self {
            Plan::TableScan(_) | Plan::EmptyRelation(_) => vec![],
            Plan::Projection(Projection { input, .. })
            | Plan::Filter(Filter { input, .. })
            | Plan::Aggregate(Aggregate { input, .. })
            | Plan::Sort(Sort { input, .. })
            | Plan::Limit(Limit { input, .. })
            | Plan::Distinct(Distinct { input })
            | Plan::SubqueryAlias(SubqueryAlias { input, .. }) => vec![input.as_ref()],
            Plan::Join(Join { left, right, .. }) | Plan::CrossJoin(CrossJoin { left, right, .. }) => {
                vec![left.as_ref(), right.as_ref()]
            }
            Plan::Union(Union { inputs, .. }) => inputs.iter().collect(),
            Plan::Explain(Explain { plan, .. }) => vec![plan.as_ref()],
        }
    }

    /// The expressions evaluated by this node itself, not its inputs.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Plan::Projection(Projection { exprs, .. }) => exprs.iter().collect(),
            Plan::Filter(Filter { predicate, .. }) => vec![predicate],
            Plan::Aggregate(Aggregate { group_exprs, aggr_exprs, .. }) => {
                group_exprs.iter().chain(aggr_exprs.iter()).collect()
            }
            Plan::Join(Join { on, filter, .. }) => {
                let mut out = on.iter().flat_map(|(l, r)| [l, r]).collect::<Vec<_>>();
                out.extend(filter.iter());
                out
            }
            Plan::Sort(Sort { expr, .. }) => expr.iter().map(|it| &it.expr).collect(),
            _ => vec![],
        }
    }

    /// Rebuild the node over new inputs, in the same order as
    /// [`Plan::inputs`]. Derived schemas are recomputed.
    pub fn with_new_inputs(self, inputs: Vec<Plan>) -> Result<Plan> {
        let expected = self.inputs().len();
        if inputs.len() != expected {
            return Err(internal_err!(
                "Expect {} inputs to rebuild the plan, got {}",
                expected,
                inputs.len()
            ));
        }
        let mut inputs = inputs.into_iter();
        let mut next = || inputs.next().ok_or_else(|| Error::internal("Missing plan input"));
        let plan = match self {
            p @ (Plan::TableScan(_) | Plan::EmptyRelation(_)) => p,
            Plan::Projection(Projection { exprs, .. }) => {
                Plan::Projection(Projection::try_new(exprs, next()?)?)
            }
            Plan::Filter(Filter { predicate, .. }) => Plan::Filter(Filter::try_new(predicate, next()?)?),
            Plan::Aggregate(Aggregate { group_exprs, aggr_exprs, .. }) => {
                Plan::Aggregate(Aggregate::try_new(next()?, group_exprs, aggr_exprs)?)
            }
            Plan::Join(Join { on, filter, join_type, join_constraint, null_equals_null, .. }) => {
                let left = next()?;
                let right = next()?;
                Plan::Join(Join::try_new(
                    left,
                    right,
                    on,
                    filter,
                    join_type,
                    join_constraint,
                    null_equals_null,
                )?)
            }
            Plan::CrossJoin(_) => {
                let left = next()?;
                let right = next()?;
                Plan::CrossJoin(CrossJoin::new(left, right))
            }
            Plan::Sort(Sort { expr, .. }) => Plan::Sort(Sort::new(expr, next()?)),
            Plan::Limit(Limit { skip, fetch, .. }) => Plan::Limit(Limit::new(next()?, skip, fetch)),
            Plan::Union(_) => {
                let mut all = vec![];
                while let Ok(p) = next() {
                    all.push(p);
                }
                Plan::Union(Union::try_new(all)?)
            }
            Plan::Distinct(_) => Plan::Distinct(Distinct::new(next()?)),
            Plan::SubqueryAlias(SubqueryAlias { alias, .. }) => {
                Plan::SubqueryAlias(SubqueryAlias::try_new(next()?, alias)?)
            }
            Plan::Explain(_) => Plan::Explain(Explain::new(next()?)),
        };
        Ok(plan)
    }
}

impl TreeNode for Plan {
    /// Apply `f` to visit node's children (but **NOT** the node itself).
    ///
    /// **NB**: the plans of scalar subqueries in the node's expressions are
    /// visited as children too, before the inputs.
    fn visit_children<F>(&self, mut f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>,
    {
        let mut subqueries = vec![];
        for e in self.expressions() {
            e.walk(|expr| {
                if let Expr::ScalarSubquery(Subquery { subquery, .. }) = expr {
                    subqueries.push(Arc::clone(subquery));
                }
                Ok(VisitRecursion::Continue)
            })?;
        }
        let plans = subqueries.iter().map(|p| p.as_ref()).collect::<Vec<_>>();
        apply_each!(f; plans)?.when_sibling(|| apply_each!(f; self.inputs()))
    }

    /// Applies `f` to each input of this plan node, rewriting them.
    ///
    /// **NB**: subqueries in expr are **NOT** considered as children for rewriting.
    fn map_children<F>(self, f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        if self.inputs().is_empty() {
            return Ok(Transformed::no(self));
        }
        let inputs = self.inputs().into_iter().cloned().collect::<Vec<_>>();
        let t = map_until_stop(inputs, f)?;
        if !t.transformed {
            return Ok(Transformed::new(self, false, t.tnr));
        }
        let tnr = t.tnr;
        let plan = self.with_new_inputs(t.data)?;
        Ok(Transformed::new(plan, true, tnr))
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let with_schema = f.alternate();
        let mut visitor = IndentVisitor::new(f, with_schema);
        match self.visit(&mut visitor) {
            Ok(_) => Ok(()),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

impl Plan {
    /// One line per node, children indented by two spaces.
    pub fn display_lines(&self) -> Vec<String> {
        self.to_string().lines().map(|l| l.to_string()).collect()
    }
}

struct IndentVisitor<'a, 'b> {
    f: &'a mut Formatter<'b>,
    /// If true, includes summarized schema information
    with_schema: bool,
    /// The current indent
    indent: usize,
}

impl<'a, 'b> IndentVisitor<'a, 'b> {
    fn new(f: &'a mut Formatter<'b>, with_schema: bool) -> Self {
        Self { f, with_schema, indent: 0 }
    }

    fn display_plan<'c>(&self, node: &'c Plan) -> impl Display + 'c {
        struct Wrapper<'a>(&'a Plan);
        impl Display for Wrapper<'_> {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                match self.0 {
                    Plan::Projection(Projection { exprs, .. }) => {
                        write!(f, "Projection: {}", format_expr_vec!(exprs))
                    }
                    Plan::TableScan(TableScan { relation, source, projection, .. }) => {
                        let projection = match projection {
                            Some(indices) => {
                                let schema = source.schema();
                                let names = indices
                                    .iter()
                                    .filter(|i| **i < schema.len())
                                    .map(|i| schema.field(*i).name.as_str())
                                    .collect::<Vec<_>>();
                                format!(" projection=[{}]", names.join(", "))
                            }
                            _ => "".to_string(),
                        };
                        write!(f, "TableScan: {relation}{projection}")
                    }
                    Plan::SubqueryAlias(SubqueryAlias { alias, .. }) => {
                        write!(f, "SubqueryAlias: {alias}")
                    }
                    Plan::Join(Join { join_type, on, filter, .. }) => {
                        write!(f, "{join_type} Join: ")?;
                        let keys = on.iter().map(|(l, r)| format!("{l} = {r}")).collect::<Vec<_>>();
                        write!(f, "{}", keys.join(", "))?;
                        match filter {
                            Some(filter) if keys.is_empty() => write!(f, "Filter: {filter}"),
                            Some(filter) => write!(f, ", Filter: {filter}"),
                            None => Ok(()),
                        }
                    }
                    Plan::CrossJoin(_) => write!(f, "CrossJoin:"),
                    Plan::Filter(Filter { predicate, .. }) => {
                        write!(f, "Filter: {predicate}")
                    }
                    Plan::Aggregate(Aggregate { group_exprs, aggr_exprs, .. }) => {
                        write!(
                            f,
                            "Aggregate: groupBy=[{}], aggr=[{}]",
                            format_expr_vec!(group_exprs),
                            format_expr_vec!(aggr_exprs)
                        )
                    }
                    Plan::Sort(Sort { expr, .. }) => {
                        write!(f, "Sort: {}", format_expr_vec!(expr))
                    }
                    Plan::Limit(Limit { skip, fetch, .. }) => {
                        let fetch = match fetch {
                            None => "None".to_string(),
                            Some(n) => n.to_string(),
                        };
                        write!(f, "Limit: skip={skip}, fetch={fetch}")
                    }
                    Plan::Union(_) => write!(f, "Union"),
                    Plan::Distinct(_) => write!(f, "Distinct:"),
                    Plan::EmptyRelation(_) => write!(f, "EmptyRelation"),
                    Plan::Explain(_) => write!(f, "Explain"),
                }
            }
        }
        Wrapper(node)
    }

    fn display_schema<'c>(&self, schema: &'c LogicalSchema) -> impl Display + 'c {
        struct Wrapper<'a>(&'a LogicalSchema);
        impl Display for Wrapper<'_> {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "[")?;
                for (i, field) in self.0.fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let nullable_str = if field.nullable { ";N" } else { "" };
                    write!(f, "{}:{}{}", field.name, field.datatype, nullable_str)?;
                }
                write!(f, "]")
            }
        }
        Wrapper(schema)
    }
}

impl<'n> TreeNodeVisitor<'n> for IndentVisitor<'_, '_> {
    type Node = Plan;

    fn f_down(&mut self, node: &'n Self::Node) -> Result<VisitRecursion> {
        if self.indent > 0 {
            writeln!(self.f)?;
        }
        write!(self.f, "{:indent$}", "", indent = self.indent * 2)?;
        write!(self.f, "{}", self.display_plan(node))?;
        if self.with_schema {
            write!(self.f, " {}", self.display_schema(node.schema()))?;
        }

        self.indent += 1;
        Ok(VisitRecursion::Continue)
    }

    fn f_up(&mut self, _node: &'n Self::Node) -> Result<VisitRecursion> {
        self.indent -= 1;
        Ok(VisitRecursion::Continue)
    }
}

/// The schema of `EXPLAIN` output: `(plan_type, plan)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Explain {
    pub plan: Box<Plan>,
    pub schema: SchemaRef,
}

impl Explain {
    pub fn new(plan: Plan) -> Self {
        Self { plan: Box::new(plan), schema: explain_schema() }
    }
}

pub fn explain_schema() -> SchemaRef {
    let fields: Fields = vec![
        Field::new("plan_type", DataType::Utf8, false),
        Field::new("plan", DataType::Utf8, false),
    ]
    .into();
    Arc::new(LogicalSchema::new(fields, vec![None, None]).unwrap_or_else(|_| LogicalSchema::empty()))
}

#[derive(Clone, Debug, PartialEq)]
pub struct Limit {
    /// The incoming logical plan
    pub input: Box<Plan>,
    /// Number of rows to skip before fetch
    pub skip: usize,
    /// Maximum number of rows to fetch,
    /// None means fetching all rows
    pub fetch: Option<usize>,
}

impl Limit {
    pub fn new(input: Plan, skip: usize, fetch: Option<usize>) -> Self {
        Self { input: Box::new(input), skip, fetch }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sort {
    /// The sort expressions
    pub expr: Vec<SortExpr>,
    /// The incoming logical plan
    pub input: Box<Plan>,
}

impl Sort {
    pub fn new(expr: Vec<SortExpr>, input: Plan) -> Self {
        Self { expr, input: Box::new(input) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortExpr {
    /// The expression to sort on
    pub expr: Expr,
    /// The direction of the sort
    pub asc: bool,
    /// Whether nulls sort before every other value
    pub nulls_first: bool,
}

impl SortExpr {
    /// Nulls go last for ascending order and first for descending order
    /// unless told otherwise.
    pub fn new(expr: Expr, asc: Option<bool>, nulls_first: Option<bool>) -> Self {
        let asc = asc.unwrap_or(true);
        Self { expr, asc, nulls_first: nulls_first.unwrap_or(!asc) }
    }
}

impl Display for SortExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expr)?;
        if self.asc {
            write!(f, " ASC")?;
        } else {
            write!(f, " DESC")?;
        }
        if self.nulls_first {
            write!(f, " NULLS FIRST")
        } else {
            write!(f, " NULLS LAST")
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Aggregate {
    /// The incoming logical plan
    pub input: Box<Plan>,
    /// Grouping expressions
    pub group_exprs: Vec<Expr>,
    /// Aggregate expressions
    pub aggr_exprs: Vec<Expr>,
    /// Group columns followed by the aggregate values.
    pub schema: SchemaRef,
}

impl Aggregate {
    pub fn try_new(input: Plan, group_exprs: Vec<Expr>, aggr_exprs: Vec<Expr>) -> Result<Self> {
        let schema = input.schema();
        let mut qualified_fields =
            group_exprs.iter().map(|it| it.to_field(schema)).collect::<Result<Vec<_>>>()?;
        qualified_fields
            .extend(aggr_exprs.iter().map(|it| it.to_field(schema)).collect::<Result<Vec<_>>>()?);
        for e in &aggr_exprs {
            if !matches!(e.clone().unalias(), Expr::AggregateFunction(_)) {
                return Err(internal_err!("Expect an aggregate function, got {}", e));
            }
        }

        let (qualifiers, fields): (Vec<Option<TableReference>>, Vec<Field>) =
            qualified_fields.into_iter().unzip();
        let schema = Arc::new(LogicalSchema::new(fields.into(), qualifiers)?);
        Ok(Self { input: Box::new(input), group_exprs, aggr_exprs, schema })
    }
}

/// Filters rows from its input that do not match an
/// expression (essentially a WHERE clause with a predicate
/// expression).
///
/// Filter should not be created directly but instead use `try_new()`
/// and that these fields are only pub to support pattern matching
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    /// The predicate expression, which must have Boolean type.
    pub predicate: Expr,
    /// The incoming logical plan
    pub input: Box<Plan>,
}

impl Filter {
    pub fn try_new(predicate: Expr, input: Plan) -> Result<Self> {
        let datatype = predicate.get_type(input.schema())?;
        if !matches!(datatype, DataType::Boolean | DataType::Null) {
            return Err(parse_err!("Invalid filter result type, expect BOOLEAN, got {datatype}"));
        }
        Ok(Self { predicate, input: Box::new(input) })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// Only the pairs of rows matching the join condition.
    Inner,
    /// Every left row, with nulls on the right when nothing matches.
    Left,
    /// Every right row, with nulls on the left when nothing matches.
    Right,
    /// Every row of both sides, padded with nulls when unmatched.
    Full,
    /// Left rows with at least one match, left columns only.
    LeftSemi,
    /// Left rows without any match, left columns only.
    LeftAnti,
    /// Right rows with at least one match, right columns only.
    RightSemi,
    /// Right rows without any match, right columns only.
    RightAnti,
}

impl Display for JoinType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JoinType::Inner => "Inner",
            JoinType::Left => "Left",
            JoinType::Right => "Right",
            JoinType::Full => "Full",
            JoinType::LeftSemi => "LeftSemi",
            JoinType::LeftAnti => "LeftAnti",
            JoinType::RightSemi => "RightSemi",
            JoinType::RightAnti => "RightAnti",
        };
        write!(f, "{s}")
    }
}

/// How the join condition was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinConstraint {
    /// `ON` a predicate, also used for joins built by the planner itself
    On,
    /// `USING (columns)` or `NATURAL`
    Using,
}

/// The output schema of joining `left` and `right`.
pub fn build_join_schema(
    left: &LogicalSchema,
    right: &LogicalSchema,
    join_type: &JoinType,
) -> LogicalSchema {
    match join_type {
        JoinType::Inner => left.join(right),
        JoinType::Left => left.join(&right.to_nullable()),
        JoinType::Right => left.to_nullable().join(right),
        JoinType::Full => left.to_nullable().join(&right.to_nullable()),
        JoinType::LeftSemi | JoinType::LeftAnti => left.clone(),
        JoinType::RightSemi | JoinType::RightAnti => right.clone(),
    }
}

/// Join two logical plans on one or more join columns
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    /// Left input
    pub left: Box<Plan>,
    /// Right input
    pub right: Box<Plan>,
    /// Equijoin keys as `(left expr, right expr)` pairs
    pub on: Vec<(Expr, Expr)>,
    /// The residual predicate applied to the candidate pairs
    pub filter: Option<Expr>,
    /// Join type
    pub join_type: JoinType,
    pub join_constraint: JoinConstraint,
    /// The output schema, containing fields from the left and right inputs
    pub schema: SchemaRef,
    /// Whether a null key matches a null key
    pub null_equals_null: bool,
}

impl Join {
    pub fn try_new(
        left: Plan,
        right: Plan,
        on: Vec<(Expr, Expr)>,
        filter: Option<Expr>,
        join_type: JoinType,
        join_constraint: JoinConstraint,
        null_equals_null: bool,
    ) -> Result<Self> {
        let schema = build_join_schema(left.schema(), right.schema(), &join_type);
        if let Some(filter) = &filter {
            let full = left.schema().join(right.schema());
            let datatype = filter.get_type(&full)?;
            if !matches!(datatype, DataType::Boolean | DataType::Null) {
                return Err(parse_err!("Join filter must be BOOLEAN, got {datatype}"));
            }
        }
        for (l, r) in &on {
            l.get_type(left.schema())?;
            r.get_type(right.schema())?;
        }
        Ok(Self {
            left: Box::new(left),
            right: Box::new(right),
            on,
            filter,
            join_type,
            join_constraint,
            schema: Arc::new(schema),
            null_equals_null,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CrossJoin {
    pub left: Box<Plan>,
    pub right: Box<Plan>,
    pub schema: SchemaRef,
}

impl CrossJoin {
    pub fn new(left: Plan, right: Plan) -> Self {
        let schema = Arc::new(left.schema().join(right.schema()));
        Self { left: Box::new(left), right: Box::new(right), schema }
    }
}

/// Inputs are coerced to the same column types by the planner, the output
/// keeps the names of the first input.
#[derive(Clone, Debug, PartialEq)]
pub struct Union {
    pub inputs: Vec<Plan>,
    pub schema: SchemaRef,
}

impl Union {
    pub fn try_new(inputs: Vec<Plan>) -> Result<Self> {
        let first = inputs.first().ok_or_else(|| internal_err!("Union requires inputs"))?.schema();
        for input in inputs.iter().skip(1) {
            if input.schema().len() != first.len() {
                return Err(parse_err!(
                    "Union queries must have the same number of columns, got {} and {}",
                    first.len(),
                    input.schema().len()
                ));
            }
        }
        let fields = (0..first.len())
            .map(|i| {
                let f = first.field(i);
                let nullable = inputs.iter().any(|p| p.schema().field(i).nullable);
                Field::clone(f).with_nullable(nullable)
            })
            .collect::<Fields>();
        let qualifiers = (0..first.len()).map(|i| first.qualifier(i).cloned()).collect();
        let schema = Arc::new(LogicalSchema::new(fields, qualifiers)?);
        Ok(Self { inputs, schema })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Distinct {
    pub input: Box<Plan>,
}

impl Distinct {
    pub fn new(input: Plan) -> Self {
        Self { input: Box::new(input) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubqueryAlias {
    /// The incoming logical plan
    pub input: Box<Plan>,
    /// The alias for the input relation
    pub alias: TableReference,
    /// The schema with qualified field names
    pub schema: SchemaRef,
}

impl SubqueryAlias {
    pub fn try_new(plan: Plan, alias: impl Into<TableReference>) -> Result<Self> {
        let alias = alias.into();
        let schema = Arc::new(plan.schema().replace_qualifier(&alias)?);
        Ok(Self { input: Box::new(plan), alias, schema })
    }
}

/// A relation without columns, e.g. the input of `SELECT 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct EmptyRelation {
    pub produce_one_row: bool,
    pub schema: SchemaRef,
}

impl EmptyRelation {
    pub fn new(produce_one_row: bool) -> Self {
        Self { produce_one_row, schema: Arc::new(LogicalSchema::empty()) }
    }
}

/// Scan rows from a table/relation.
#[derive(Clone)]
pub struct TableScan {
    pub relation: TableReference,
    pub source: Arc<dyn TableProvider>,
    /// Optional column indices to use as a projection
    pub projection: Option<Vec<usize>>,
    /// The source schema, narrowed by the projection and qualified by the
    /// relation.
    pub projected_schema: SchemaRef,
}

impl TableScan {
    pub fn try_new(
        relation: impl Into<TableReference>,
        source: Arc<dyn TableProvider>,
        projection: Option<Vec<usize>>,
    ) -> Result<Self> {
        let relation = relation.into();
        let schema = source.schema();
        let fields = match &projection {
            Some(indices) => schema.project(indices)?.fields().clone(),
            None => schema.fields().clone(),
        };
        let projected_schema = Arc::new(LogicalSchema::try_from_qualified(&relation, fields)?);
        Ok(Self { relation, source, projection, projected_schema })
    }
}

impl Debug for TableScan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableScan")
            .field("relation", &self.relation)
            .field("source", &self.source.name())
            .field("projection", &self.projection)
            .field("projected_schema", &self.projected_schema)
            .finish()
    }
}

impl PartialEq for TableScan {
    fn eq(&self, other: &Self) -> bool {
        self.relation == other.relation
            && self.source.name() == other.source.name()
            && self.projection == other.projection
            && self.projected_schema == other.projected_schema
    }
}

/// Evaluates an arbitrary list of expressions on its input.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// The list of expressions
    pub exprs: Vec<Expr>,
    /// The incoming logical plan
    pub input: Box<Plan>,
    /// The schema description of the output
    pub schema: SchemaRef,
}

impl Projection {
    pub fn try_new(exprs: Vec<Expr>, input: Plan) -> Result<Self> {
        let schema = input.schema();
        let qualified_fields =
            exprs.iter().map(|it| it.to_field(schema)).collect::<Result<Vec<_>>>()?;

        let (qualifiers, fields): (Vec<Option<TableReference>>, Vec<Field>) =
            qualified_fields.into_iter().unzip();
        let schema = Arc::new(LogicalSchema::new(fields.into(), qualifiers)?);
        Ok(Self { exprs, input: Box::new(input), schema })
    }

    /// Whether the projection passes its input through unchanged.
    pub fn is_identity(&self) -> bool {
        let input = self.input.schema();
        self.exprs.len() == input.len()
            && self
                .exprs
                .iter()
                .enumerate()
                .all(|(i, e)| matches!(e, Expr::Column(c) if *c == input.column(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::MemTable;
    use crate::sql::plan::expr::binary_expr;
    use crate::sql::plan::expr::col;
    use crate::sql::plan::expr::lit;
    use crate::sql::plan::expr::Operator;

    fn table(name: &str, columns: &[&str]) -> Result<Plan> {
        let fields = columns
            .iter()
            .map(|c| Field::new(*c, DataType::Integer, false))
            .collect::<Fields>();
        let schema = Arc::new(LogicalSchema::from_unqualified_fields(fields)?);
        let source = Arc::new(MemTable::try_new(name, schema, vec![])?);
        Ok(Plan::TableScan(TableScan::try_new(name, source, None)?))
    }

    #[test]
    fn test_join_schema_sizes() -> Result<()> {
        let cases = [
            (JoinType::Inner, 5),
            (JoinType::Left, 5),
            (JoinType::Right, 5),
            (JoinType::Full, 5),
            (JoinType::LeftSemi, 3),
            (JoinType::LeftAnti, 3),
            (JoinType::RightSemi, 2),
            (JoinType::RightAnti, 2),
        ];
        for (join_type, expected) in cases {
            let left = table("l", &["a", "b", "c"])?;
            let right = table("r", &["a", "d"])?;
            let on = vec![(col("l.a"), col("r.a"))];
            let join = Join::try_new(left, right, on, None, join_type, JoinConstraint::On, false)?;
            assert_eq!(expected, join.schema.len(), "{join_type}");
        }

        let left = table("l", &["a", "b"])?;
        let join = Join::try_new(left, table("r", &["a"])?, vec![], None, JoinType::Left, JoinConstraint::On, false)?;
        assert!(!join.schema.field(0).nullable);
        assert!(join.schema.field(2).nullable);
        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        let scan = table("employees", &["id", "salary"])?;
        let filter = Filter::try_new(binary_expr(col("employees.salary"), Operator::Gt, lit(10i64)), scan)?;
        let projection = Projection::try_new(vec![col("employees.id")], Plan::Filter(filter))?;
        let plan = Plan::Limit(Limit::new(Plan::Projection(projection), 0, Some(10)));
        let expected = "Limit: skip=0, fetch=10\n  Projection: employees.id\n    Filter: employees.salary > 10\n      TableScan: employees";
        assert_eq!(expected, plan.to_string());
        assert_eq!(4, plan.display_lines().len());
        Ok(())
    }

    #[test]
    fn test_union_and_alias_schema() -> Result<()> {
        let union = Union::try_new(vec![table("a", &["x"])?, table("b", &["y"])?])?;
        assert_eq!("x", union.schema.field(0).name);
        assert!(Union::try_new(vec![table("a", &["x"])?, table("b", &["y", "z"])?]).is_err());

        let alias = SubqueryAlias::try_new(table("a", &["x"])?, "t")?;
        assert!(alias.schema.has_column(&"t.x".into()));
        assert!(!alias.schema.has_column(&"a.x".into()));
        Ok(())
    }

    #[test]
    fn test_with_new_inputs_recomputes_schema() -> Result<()> {
        let join = Plan::CrossJoin(CrossJoin::new(table("a", &["x"])?, table("b", &["y"])?));
        let rebuilt = join.with_new_inputs(vec![table("a", &["x", "z"])?, table("b", &["y"])?])?;
        assert_eq!(3, rebuilt.schema().len());
        Ok(())
    }

    #[test]
    fn test_identity_projection() -> Result<()> {
        let scan = table("a", &["x", "y"])?;
        let p = Projection::try_new(vec![col("a.x"), col("a.y")], scan.clone())?;
        assert!(p.is_identity());
        let p = Projection::try_new(vec![col("a.y"), col("a.x")], scan)?;
        assert!(!p.is_identity());
        Ok(())
    }
}
