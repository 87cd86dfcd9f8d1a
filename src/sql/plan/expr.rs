use std::collections::HashSet;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use crate::apply_each;
use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Error;
use crate::error::Result;
use crate::map_each_children;
use crate::parse_err;
use crate::sql::plan::coercion::comparison_coercion;
use crate::sql::plan::coercion::BinaryTypeCoercer;
use crate::sql::plan::plan::Plan;
use crate::sql::plan::schema::Column;
use crate::sql::plan::schema::Field;
use crate::sql::plan::schema::LogicalSchema;
use crate::sql::plan::schema::TableReference;
use crate::sql::plan::visitor::map_until_stop;
use crate::sql::plan::visitor::Transformed;
use crate::sql::plan::visitor::TreeNode;
use crate::sql::plan::visitor::VisitRecursion;
use crate::sql::udf::aggregate::AggregateUDF;
use crate::sql::udf::scalar::ScalarUDF;

/// Represents logical expressions such as `A + 1`.
///
/// For example the expression `A + 1` will be represented as
///
///```text
///  BinaryExpr {
///    left: Expr::Column(Column{None, 'A'}),
///    op: Operator::Plus,
///    right: Expr::Literal(ScalarValue::Int64(1))
/// }
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Alias(Alias),
    Literal(ScalarValue),
    Column(Column),
    /// A `@name` variable, typed after the value bound to it.
    ScalarVariable(DataType, Vec<String>),
    /// A placeholder which hold a reference to a qualified field
    /// in the outer query, used for correlated sub queries.
    OuterReferenceColumn(DataType, Column),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Negative(Box<Expr>),
    Like(Like),
    Between(Between),
    /// Returns whether the list contains the expr value.
    InList(InList),
    Case(Case),
    /// Scalar subquery, produce exactly one column and at most one row
    ScalarSubquery(Subquery),
    /// A binary expression such as "age > 21"
    BinaryExpr(BinaryExpr),
    /// Casts the expression to a given type and will return a runtime error
    /// if the expression cannot be cast.
    Cast(Cast),
    ScalarFunction(ScalarFunction),
    AggregateFunction(AggregateFunction),
    /// `*` or `t.*`. Only survives planning as the argument of `count(*)`.
    Wildcard { qualifier: Option<TableReference> },
}

pub fn col(name: &str) -> Expr {
    Expr::Column(Column::from(name))
}

pub fn lit(value: impl Into<ScalarValue>) -> Expr {
    Expr::Literal(value.into())
}

pub fn binary_expr(left: Expr, op: Operator, right: Expr) -> Expr {
    Expr::BinaryExpr(BinaryExpr::new(left, op, right))
}

impl Expr {
    pub fn alias(self, name: impl Into<String>) -> Expr {
        Expr::Alias(Alias::new(self.unalias(), None::<&str>, name))
    }

    pub fn unalias(self) -> Expr {
        match self {
            Expr::Alias(Alias { expr, .. }) => *expr,
            e => e,
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        binary_expr(self, Operator::And, other)
    }

    pub fn eq(self, other: Expr) -> Expr {
        binary_expr(self, Operator::Eq, other)
    }

    pub fn to_field(&self, schema: &LogicalSchema) -> Result<(Option<TableReference>, Field)> {
        let (relation, name) = self.qualified_name();
        let (datatype, nullable) = self.datatype_and_nullable(schema)?;
        Ok((relation, Field::new(name, datatype, nullable)))
    }

    pub fn get_type(&self, schema: &LogicalSchema) -> Result<DataType> {
        self.datatype_and_nullable(schema).map(|(t, _)| t)
    }

    /// Wrap this expr to in a `Expr::Cast` to the target `DataType`
    pub fn cast_to(self, cast_to_type: &DataType, schema: &LogicalSchema) -> Result<Expr> {
        let this_type = self.get_type(schema)?;
        if this_type == *cast_to_type {
            return Ok(self);
        }
        if !this_type.can_cast_to(cast_to_type) {
            return Err(parse_err!("Cannot automatically convert {this_type} to {cast_to_type}"));
        }
        Ok(Expr::Cast(Cast::new(self, cast_to_type.clone())))
    }

    /// The datatype and nullability the expr would produce
    pub fn datatype_and_nullable(&self, schema: &LogicalSchema) -> Result<(DataType, bool)> {
        let (datatype, nullable) = match self {
            Expr::Alias(Alias { expr, .. }) => expr.datatype_and_nullable(schema)?,
            Expr::Literal(value) => (value.datatype(), value.is_null()),
            Expr::Column(column) => {
                let f = schema.field_with_column(column)?;
                (f.datatype.clone(), f.nullable)
            }
            Expr::ScalarVariable(datatype, _) => (datatype.clone(), true),
            Expr::OuterReferenceColumn(datatype, _) => (datatype.clone(), true),
            Expr::Not(expr) => {
                let (_, nullable) = expr.datatype_and_nullable(schema)?;
                (DataType::Boolean, nullable)
            }
            Expr::IsNull(_) | Expr::IsNotNull(_) => (DataType::Boolean, false),
            Expr::Negative(expr) => expr.datatype_and_nullable(schema)?,
            Expr::Like(Like { expr, pattern, .. }) => {
                let (_, ln) = expr.datatype_and_nullable(schema)?;
                let (_, rn) = pattern.datatype_and_nullable(schema)?;
                (DataType::Boolean, ln || rn)
            }
            Expr::Between(Between { expr, low, high, .. }) => {
                let mut nullable = false;
                for e in [expr, low, high] {
                    nullable |= e.datatype_and_nullable(schema)?.1;
                }
                (DataType::Boolean, nullable)
            }
            Expr::InList(InList { expr, list, .. }) => {
                let mut nullable = expr.datatype_and_nullable(schema)?.1;
                for e in list {
                    nullable |= e.datatype_and_nullable(schema)?.1;
                }
                (DataType::Boolean, nullable)
            }
            Expr::Case(case) => case.datatype_and_nullable(schema)?,
            Expr::ScalarSubquery(Subquery { subquery, .. }) => {
                let schema = subquery.schema();
                if schema.len() != 1 {
                    return Err(parse_err!(
                        "Scalar subquery should return exactly one column, got {}",
                        schema.len()
                    ));
                }
                (schema.field(0).datatype.clone(), true)
            }
            Expr::BinaryExpr(binary_expr) => binary_expr.datatype_and_nullable(schema)?,
            Expr::Cast(Cast { expr, data_type, .. }) => {
                let (_, nullable) = expr.datatype_and_nullable(schema)?;
                (data_type.clone(), nullable)
            }
            Expr::ScalarFunction(ScalarFunction { func, args }) => {
                let arg_types = args.iter().map(|e| e.get_type(schema)).collect::<Result<Vec<_>>>()?;
                (func.return_type(&arg_types)?, true)
            }
            Expr::AggregateFunction(AggregateFunction { func, args }) => {
                let arg_types = args.iter().map(|e| e.get_type(schema)).collect::<Result<Vec<_>>>()?;
                let nullable = func.name() != "count";
                (func.return_type(&arg_types)?, nullable)
            }
            Expr::Wildcard { .. } => (DataType::Null, false),
        };
        Ok((datatype, nullable))
    }

    /// The output column name of the expr, with the qualifier for columns
    /// and qualified aliases.
    pub fn qualified_name(&self) -> (Option<TableReference>, String) {
        match self {
            Expr::Column(Column { relation, name }) => (relation.clone(), name.clone()),
            Expr::Alias(Alias { relation, name, .. }) => (relation.clone(), name.clone()),
            _ => (None, self.schema_name()),
        }
    }

    /// The name of the column this expression produces.
    pub fn schema_name(&self) -> String {
        match self {
            Expr::Alias(Alias { relation: Some(rel), name, .. }) => format!("{}.{}", rel, name),
            Expr::Alias(Alias { name, .. }) => name.clone(),
            e => e.to_string(),
        }
    }

    /// Columns this expression reads, not descending into subqueries.
    pub fn column_refs(&self) -> HashSet<Column> {
        let mut out = HashSet::new();
        let _ = self.walk(|e| {
            if let Expr::Column(c) = e {
                out.insert(c.clone());
            }
            Ok(VisitRecursion::Continue)
        });
        out
    }

    /// Columns of the enclosing query this expression or any subquery in it
    /// depends on.
    pub fn outer_column_refs(&self) -> HashSet<Column> {
        let mut out = HashSet::new();
        let _ = self.walk(|e| {
            match e {
                Expr::OuterReferenceColumn(_, c) => {
                    out.insert(c.clone());
                }
                Expr::ScalarSubquery(Subquery { outer_ref_columns, .. }) => {
                    for e in outer_ref_columns {
                        if let Expr::OuterReferenceColumn(_, c) = e {
                            out.insert(c.clone());
                        }
                    }
                }
                _ => {}
            }
            Ok(VisitRecursion::Continue)
        });
        out
    }

    pub fn contains_outer_reference(&self) -> bool {
        let mut found = false;
        let _ = self.walk(|e| {
            if let Expr::OuterReferenceColumn(..) = e {
                found = true;
                return Ok(VisitRecursion::Stop);
            }
            Ok(VisitRecursion::Continue)
        });
        found
    }

    pub fn contains_scalar_subquery(&self) -> bool {
        let mut found = false;
        let _ = self.walk(|e| {
            if let Expr::ScalarSubquery(_) = e {
                found = true;
                return Ok(VisitRecursion::Stop);
            }
            Ok(VisitRecursion::Continue)
        });
        found
    }

    /// Replace every outer reference with a plain column.
    pub fn strip_outer_reference(self) -> Result<Expr> {
        self.transform_up(|e| match e {
            Expr::OuterReferenceColumn(_, c) => Ok(Transformed::yes(Expr::Column(c))),
            e => Ok(Transformed::no(e)),
        })
        .map(|t| t.data)
    }
}

/// Split `a AND b AND c` into `[a, b, c]`.
pub fn split_conjunction(expr: &Expr) -> Vec<&Expr> {
    fn split<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
        match expr {
            Expr::BinaryExpr(BinaryExpr { left, op: Operator::And, right }) => {
                split(left, out);
                split(right, out);
            }
            Expr::Alias(Alias { expr, .. }) => split(expr, out),
            other => out.push(other),
        }
    }
    let mut out = vec![];
    split(expr, &mut out);
    out
}

/// Fold the predicates back with `AND`, `None` when there are none.
pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(|acc, e| acc.and(e))
}

/// Collect the distinct aggregate calls found in `exprs`, in first-seen order.
pub fn find_aggregate_exprs<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> Vec<Expr> {
    let mut out: Vec<Expr> = vec![];
    for expr in exprs {
        let _ = expr.walk(|e| {
            if let Expr::AggregateFunction(_) = e {
                if !out.contains(e) {
                    out.push(e.clone());
                }
                return Ok(VisitRecursion::Jump);
            }
            Ok(VisitRecursion::Continue)
        });
    }
    out
}

/// The column referencing the output of `expr` in the schema of the node
/// that computes it.
pub fn expr_as_column_expr(expr: &Expr) -> Expr {
    match expr {
        Expr::Column(c) => Expr::Column(c.clone()),
        e => {
            let (relation, name) = e.qualified_name();
            Expr::Column(Column::new(relation, name))
        }
    }
}

fn into_array<const N: usize>(children: Vec<Expr>) -> Result<[Expr; N]> {
    children
        .try_into()
        .map_err(|v: Vec<Expr>| Error::internal(format!("Expect {} children, got {}", N, v.len())))
}

impl TreeNode for Expr {
    fn visit_children<F>(&self, mut f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>,
    {
        match self {
            Expr::Alias(Alias { expr, .. })
            | Expr::Not(expr)
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::Negative(expr)
            | Expr::Cast(Cast { expr, .. }) => f(expr),
            Expr::BinaryExpr(BinaryExpr { left, right, .. }) => apply_each!(f, left, right),
            Expr::Like(Like { expr, pattern, .. }) => apply_each!(f, expr, pattern),
            Expr::Between(Between { expr, low, high, .. }) => apply_each!(f, expr, low, high),
            Expr::InList(InList { expr, list, .. }) => {
                let mut out = vec![expr.as_ref()];
                out.extend(list.iter());
                apply_each!(f; out)
            }
            Expr::Case(Case { expr, when_then, else_expr }) => {
                let mut out = vec![];
                out.extend(expr.iter().map(|e| e.as_ref()));
                for (w, t) in when_then {
                    out.push(w.as_ref());
                    out.push(t.as_ref());
                }
                out.extend(else_expr.iter().map(|e| e.as_ref()));
                apply_each!(f; out)
            }
            Expr::ScalarFunction(ScalarFunction { args, .. })
            | Expr::AggregateFunction(AggregateFunction { args, .. }) => apply_each!(f; args),
            Expr::Literal(_)
            | Expr::Column(_)
            | Expr::ScalarVariable(..)
            | Expr::OuterReferenceColumn(_, _)
            | Expr::ScalarSubquery(_)
            | Expr::Wildcard { .. } => Ok(VisitRecursion::Continue),
        }
    }

    fn map_children<F>(self, mut f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        let t = match self {
            Expr::Alias(Alias { expr, relation, name }) => f(*expr)?
                .update_data(|expr| Expr::Alias(Alias { expr: Box::new(expr), relation, name })),
            Expr::Not(expr) => f(*expr)?.update_data(|e| Expr::Not(Box::new(e))),
            Expr::IsNull(expr) => f(*expr)?.update_data(|e| Expr::IsNull(Box::new(e))),
            Expr::IsNotNull(expr) => f(*expr)?.update_data(|e| Expr::IsNotNull(Box::new(e))),
            Expr::Negative(expr) => f(*expr)?.update_data(|e| Expr::Negative(Box::new(e))),
            Expr::Cast(Cast { expr, data_type }) => {
                f(*expr)?.update_data(|e| Expr::Cast(Cast::new(e, data_type)))
            }
            Expr::BinaryExpr(BinaryExpr { left, op, right }) => {
                map_each_children!(f, *left, *right)?.map_data(|children| {
                    let [left, right] = into_array(children)?;
                    Ok(binary_expr(left, op, right))
                })?
            }
            Expr::Like(Like { negated, expr, pattern, case_insensitive, escape_char }) => {
                map_each_children!(f, *expr, *pattern)?.map_data(|children| {
                    let [expr, pattern] = into_array(children)?;
                    Ok(Expr::Like(Like {
                        negated,
                        expr: Box::new(expr),
                        pattern: Box::new(pattern),
                        case_insensitive,
                        escape_char,
                    }))
                })?
            }
            Expr::Between(Between { expr, negated, low, high }) => {
                map_each_children!(f, *expr, *low, *high)?.map_data(|children| {
                    let [expr, low, high] = into_array(children)?;
                    Ok(Expr::Between(Between::new(expr, negated, low, high)))
                })?
            }
            Expr::InList(InList { expr, list, negated }) => {
                let mut children = vec![*expr];
                children.extend(list);
                map_until_stop(children, f)?.map_data(|mut children| {
                    let list = children.split_off(1);
                    let expr = children
                        .pop()
                        .ok_or_else(|| Error::internal("InList without an expression"))?;
                    Ok(Expr::InList(InList::new(expr, list, negated)))
                })?
            }
            Expr::Case(Case { expr, when_then, else_expr }) => {
                let has_expr = expr.is_some();
                let has_else = else_expr.is_some();
                let pairs = when_then.len();
                let mut children = vec![];
                children.extend(expr.map(|e| *e));
                for (w, t) in when_then {
                    children.push(*w);
                    children.push(*t);
                }
                children.extend(else_expr.map(|e| *e));
                map_until_stop(children, f)?.map_data(|children| {
                    let mut it = children.into_iter();
                    let expr = if has_expr { it.next().map(Box::new) } else { None };
                    let mut when_then = Vec::with_capacity(pairs);
                    for _ in 0..pairs {
                        match (it.next(), it.next()) {
                            (Some(w), Some(t)) => when_then.push((Box::new(w), Box::new(t))),
                            _ => return Err(Error::internal("Malformed CASE children")),
                        }
                    }
                    let else_expr = if has_else { it.next().map(Box::new) } else { None };
                    Ok(Expr::Case(Case { expr, when_then, else_expr }))
                })?
            }
            Expr::ScalarFunction(ScalarFunction { func, args }) => map_until_stop(args, f)?
                .update_data(|args| Expr::ScalarFunction(ScalarFunction { func, args })),
            Expr::AggregateFunction(AggregateFunction { func, args }) => map_until_stop(args, f)?
                .update_data(|args| Expr::AggregateFunction(AggregateFunction { func, args })),
            e @ (Expr::Literal(_)
            | Expr::Column(_)
            | Expr::ScalarVariable(..)
            | Expr::OuterReferenceColumn(_, _)
            | Expr::ScalarSubquery(_)
            | Expr::Wildcard { .. }) => Transformed::no(e),
        };
        Ok(t)
    }
}

#[macro_export]
macro_rules! format_expr_vec {
    ( $ARRAY:expr ) => {{
        $ARRAY.iter().map(|e| format!("{e}")).collect::<Vec<String>>().join(", ")
    }};
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Alias(Alias { name, expr, .. }) => write!(f, "{expr} AS {name}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Column(c) => write!(f, "{c}"),
            Expr::ScalarVariable(_, names) => write!(f, "{}", names.join(".")),
            Expr::OuterReferenceColumn(_, c) => write!(f, "outer_ref({c})"),
            Expr::Not(expr) => write!(f, "NOT {expr}"),
            Expr::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Expr::IsNotNull(expr) => write!(f, "{expr} IS NOT NULL"),
            Expr::Negative(expr) => write!(f, "(- {expr})"),
            Expr::Like(Like { negated, expr, pattern, case_insensitive, escape_char }) => {
                write!(f, "{expr}")?;
                let op_name = if *case_insensitive { "ILIKE" } else { "LIKE" };
                if *negated {
                    write!(f, " NOT")?;
                }
                write!(f, " {op_name} {pattern}")?;
                if let Some(c) = escape_char {
                    write!(f, " ESCAPE '{c}'")?;
                }
                Ok(())
            }
            Expr::Between(Between { expr, negated, low, high }) => {
                if *negated {
                    write!(f, "{expr} NOT BETWEEN {low} AND {high}")
                } else {
                    write!(f, "{expr} BETWEEN {low} AND {high}")
                }
            }
            Expr::InList(InList { expr, list, negated }) => {
                if *negated {
                    write!(f, "{expr} NOT IN ([{}])", format_expr_vec!(list))
                } else {
                    write!(f, "{expr} IN ([{}])", format_expr_vec!(list))
                }
            }
            Expr::Case(case) => write!(f, "{case}"),
            Expr::ScalarSubquery(_) => write!(f, "(<subquery>)"),
            Expr::BinaryExpr(expr) => write!(f, "{expr}"),
            Expr::Cast(Cast { expr, data_type }) => write!(f, "CAST({expr} AS {data_type})"),
            Expr::ScalarFunction(ScalarFunction { func, args }) => {
                write!(f, "{}({})", func.name(), format_expr_vec!(args))
            }
            Expr::AggregateFunction(AggregateFunction { func, args }) => {
                write!(f, "{}({})", func.name(), format_expr_vec!(args))
            }
            Expr::Wildcard { qualifier: Some(q) } => write!(f, "{q}.*"),
            Expr::Wildcard { qualifier: None } => write!(f, "*"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cast {
    /// The expression being cast
    pub expr: Box<Expr>,
    /// The `DataType` the expression will yield
    pub data_type: DataType,
}

impl Cast {
    pub fn new(expr: Expr, data_type: DataType) -> Self {
        Self { expr: Box::new(expr), data_type }
    }
}

/// Binary expression
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryExpr {
    /// Left-hand side of the expression
    pub left: Box<Expr>,
    /// The comparison operator
    pub op: Operator,
    /// Right-hand side of the expression
    pub right: Box<Expr>,
}

impl BinaryExpr {
    pub fn new(left: Expr, op: Operator, right: Expr) -> Self {
        Self { left: Box::new(left), op, right: Box::new(right) }
    }

    pub fn datatype_and_nullable(&self, schema: &LogicalSchema) -> Result<(DataType, bool)> {
        let (ld, ln) = self.left.datatype_and_nullable(schema)?;
        let (rd, rn) = self.right.datatype_and_nullable(schema)?;
        let datatype = BinaryTypeCoercer::new(&ld, &self.op, &rd).get_result_type()?;
        Ok((datatype, ln || rn))
    }
}

impl Display for BinaryExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Put parentheses around child binary expressions so that we
        // can see the difference between `(a OR b) AND c` and `a OR (b AND c)`.
        // We only insert parentheses when needed, based on operator precedence.
        fn write_child(f: &mut Formatter<'_>, expr: &Expr, prec: u8) -> std::fmt::Result {
            match expr {
                Expr::BinaryExpr(child) => {
                    if child.op.prec_value() < prec {
                        write!(f, "({child})")
                    } else {
                        write!(f, "{child}")
                    }
                }
                _ => write!(f, "{expr}"),
            }
        }

        let prec = self.op.prec_value();
        write_child(f, self.left.as_ref(), prec)?;
        write!(f, " {} ", self.op)?;
        write_child(f, self.right.as_ref(), prec)?;
        Ok(())
    }
}

/// Logical binary operators applied to logical expressions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Plus, e.g. `a + b`
    Plus,
    /// Minus, e.g. `a - b`
    Minus,
    /// Multiply, e.g. `a * b`
    Multiply,
    /// Divide, e.g. `a / b`
    Divide,
    /// Modulo, e.g. `a % b`
    Modulo,
    /// Equal, e.g. `a = b`
    Eq,
    /// Not equal, e.g. `a != b`
    NotEq,
    /// Greater than, e.g. `a > b`
    Gt,
    /// Greater equal, e.g. `a >= b`
    GtEq,
    /// Less than, e.g. `a < b`
    Lt,
    /// Less equal, e.g. `a <= b`
    LtEq,
    /// And, e.g. `a AND b`
    And,
    /// Or, e.g. `a OR b`
    Or,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseShiftLeft,
    BitwiseShiftRight,
    /// String concat, e.g. `a || b`
    StringConcat,
}

impl Operator {
    pub(crate) fn prec_value(&self) -> u8 {
        match self {
            Operator::Multiply | Operator::Divide | Operator::Modulo => 40,
            Operator::Plus | Operator::Minus => 30,
            Operator::BitwiseAnd
            | Operator::BitwiseOr
            | Operator::BitwiseXor
            | Operator::BitwiseShiftLeft
            | Operator::BitwiseShiftRight
            | Operator::StringConcat => 25,
            Operator::Eq
            | Operator::NotEq
            | Operator::Gt
            | Operator::GtEq
            | Operator::Lt
            | Operator::LtEq => 20,
            Operator::And => 10,
            Operator::Or => 5,
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::NotEq
                | Operator::Gt
                | Operator::GtEq
                | Operator::Lt
                | Operator::LtEq
        )
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            Operator::BitwiseAnd
                | Operator::BitwiseOr
                | Operator::BitwiseXor
                | Operator::BitwiseShiftLeft
                | Operator::BitwiseShiftRight
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide | Operator::Modulo
        )
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::BitwiseAnd => "&",
            Operator::BitwiseOr => "|",
            Operator::BitwiseXor => "^",
            Operator::BitwiseShiftLeft => "<<",
            Operator::BitwiseShiftRight => ">>",
            Operator::StringConcat => "||",
        };
        write!(f, "{s}")
    }
}

/// A subquery producing a single value per outer row.
#[derive(Clone, Debug, PartialEq)]
pub struct Subquery {
    /// The subquery plan
    pub subquery: Arc<Plan>,
    /// The `OuterReferenceColumn`s the subquery plan refers to.
    pub outer_ref_columns: Vec<Expr>,
}

impl Subquery {
    pub fn new(subplan: Plan, outer_ref_columns: Vec<Expr>) -> Self {
        Self { subquery: Arc::new(subplan), outer_ref_columns }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InList {
    /// The expression to compare
    pub expr: Box<Expr>,
    /// The list of values to compare against
    pub list: Vec<Expr>,
    /// Whether the expression is negated
    pub negated: bool,
}

impl InList {
    pub fn new(expr: Expr, list: Vec<Expr>, negated: bool) -> Self {
        Self { expr: Box::new(expr), list, negated }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Between {
    pub expr: Box<Expr>,
    pub negated: bool,
    pub low: Box<Expr>,
    pub high: Box<Expr>,
}

impl Between {
    pub fn new(expr: Expr, negated: bool, low: Expr, high: Expr) -> Self {
        Self { expr: Box::new(expr), negated, low: Box::new(low), high: Box::new(high) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Like {
    pub negated: bool,
    pub expr: Box<Expr>,
    pub pattern: Box<Expr>,
    /// Whether to ignore case on comparing
    pub case_insensitive: bool,
    pub escape_char: Option<char>,
}

impl Like {
    pub fn new(
        expr: Expr,
        pattern: Expr,
        negated: bool,
        case_insensitive: bool,
        escape_char: Option<char>,
    ) -> Self {
        Self {
            negated,
            expr: Box::new(expr),
            pattern: Box::new(pattern),
            case_insensitive,
            escape_char,
        }
    }
}

/// `CASE [expr] WHEN .. THEN .. [ELSE ..] END`
#[derive(Clone, Debug, PartialEq)]
pub struct Case {
    pub expr: Option<Box<Expr>>,
    pub when_then: Vec<(Box<Expr>, Box<Expr>)>,
    pub else_expr: Option<Box<Expr>>,
}

impl Case {
    /// The THEN and ELSE branches are coerced pairwise into one type.
    fn datatype_and_nullable(&self, schema: &LogicalSchema) -> Result<(DataType, bool)> {
        let mut branches = self.when_then.iter().map(|(_, t)| t.as_ref()).collect::<Vec<_>>();
        branches.extend(self.else_expr.iter().map(|e| e.as_ref()));

        let mut datatype = DataType::Null;
        let mut nullable = self.else_expr.is_none();
        for e in branches {
            let (t, n) = e.datatype_and_nullable(schema)?;
            nullable |= n;
            datatype = comparison_coercion(&datatype, &t).ok_or_else(|| {
                parse_err!("CASE branches have incompatible types {} and {}", datatype, t)
            })?;
        }
        Ok((datatype, nullable))
    }
}

impl Display for Case {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CASE ")?;
        if let Some(e) = &self.expr {
            write!(f, "{e} ")?;
        }
        for (w, t) in &self.when_then {
            write!(f, "WHEN {w} THEN {t} ")?;
        }
        if let Some(e) = &self.else_expr {
            write!(f, "ELSE {e} ")?;
        }
        write!(f, "END")
    }
}

/// Alias expression
#[derive(Clone, Debug, PartialEq)]
pub struct Alias {
    pub expr: Box<Expr>,
    pub relation: Option<TableReference>,
    pub name: String,
}

impl Alias {
    pub fn new(
        expr: Expr,
        relation: Option<impl Into<TableReference>>,
        name: impl Into<String>,
    ) -> Self {
        Self { expr: Box::new(expr), relation: relation.map(|it| it.into()), name: name.into() }
    }
}

#[derive(Clone, Debug)]
pub struct ScalarFunction {
    pub func: Arc<dyn ScalarUDF>,
    pub args: Vec<Expr>,
}

impl PartialEq for ScalarFunction {
    fn eq(&self, other: &Self) -> bool {
        self.func.name() == other.func.name() && self.args == other.args
    }
}

#[derive(Clone, Debug)]
pub struct AggregateFunction {
    pub func: Arc<dyn AggregateUDF>,
    pub args: Vec<Expr>,
}

impl PartialEq for AggregateFunction {
    fn eq(&self, other: &Self) -> bool {
        self.func.name() == other.func.name() && self.args == other.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::plan::schema::Fields;
    use crate::sql::udf::aggregate::avg;
    use crate::sql::udf::aggregate::count;
    use crate::sql::udf::aggregate::max;
    use crate::sql::udf::aggregate::sum;

    fn schema() -> LogicalSchema {
        let fields: Fields = vec![
            Field::new("id", DataType::Integer, false),
            Field::new("salary", DataType::Double, true),
            Field::new("name", DataType::Utf8, true),
        ]
        .into();
        LogicalSchema::try_from_qualified(&"e".into(), fields).unwrap()
    }

    fn agg(func: Arc<dyn AggregateUDF>, args: Vec<Expr>) -> Expr {
        Expr::AggregateFunction(AggregateFunction { func, args })
    }

    #[test]
    fn test_aggregate_types() -> Result<()> {
        let schema = schema();
        assert_eq!(DataType::Integer, agg(sum(), vec![col("salary")]).get_type(&schema)?);
        assert_eq!(DataType::Integer, agg(count(), vec![col("name")]).get_type(&schema)?);
        assert_eq!(DataType::Double, agg(avg(), vec![col("id")]).get_type(&schema)?);
        assert_eq!(DataType::Utf8, agg(max(), vec![col("name")]).get_type(&schema)?);
        assert!(agg(max(), vec![col("name"), col("id")]).get_type(&schema).is_err());
        Ok(())
    }

    #[test]
    fn test_case_type() -> Result<()> {
        let schema = schema();
        let case = Expr::Case(Case {
            expr: None,
            when_then: vec![
                (Box::new(col("id").eq(lit(1i64))), Box::new(col("id"))),
                (Box::new(col("id").eq(lit(2i64))), Box::new(col("salary"))),
            ],
            else_expr: Some(Box::new(Expr::Literal(ScalarValue::Null))),
        });
        assert_eq!((DataType::Double, true), case.datatype_and_nullable(&schema)?);

        let bad = Expr::Case(Case {
            expr: None,
            when_then: vec![(Box::new(lit(true)), Box::new(lit(true)))],
            else_expr: Some(Box::new(col("id"))),
        });
        assert!(bad.get_type(&schema).is_err());
        Ok(())
    }

    #[test]
    fn test_names() -> Result<()> {
        let schema = schema();
        let e = binary_expr(col("e.salary"), Operator::Multiply, lit(2i64).alias("two").unalias());
        assert_eq!("e.salary * 2", e.schema_name());
        let (relation, field) = col("e.id").to_field(&schema)?;
        assert_eq!(Some("e".into()), relation);
        assert_eq!("id", field.name);
        assert_eq!("total", binary_expr(col("id"), Operator::Plus, lit(1i64)).alias("total").schema_name());
        let nested = binary_expr(
            binary_expr(col("a"), Operator::Or, col("b")),
            Operator::And,
            col("c"),
        );
        assert_eq!("(a OR b) AND c", nested.to_string());
        Ok(())
    }

    #[test]
    fn test_split_conjunction() {
        let e = col("a").eq(lit(1i64)).and(col("b").eq(lit(2i64))).and(col("c"));
        let parts = split_conjunction(&e);
        assert_eq!(3, parts.len());
        let rebuilt = conjunction(parts.into_iter().cloned());
        assert_eq!(Some(e), rebuilt);
    }

    #[test]
    fn test_find_aggregate_exprs() {
        let a = agg(max(), vec![col("salary")]);
        let exprs = vec![
            binary_expr(a.clone(), Operator::Plus, lit(1i64)),
            a.clone().alias("m"),
            agg(count(), vec![Expr::Wildcard { qualifier: None }]),
        ];
        let found = find_aggregate_exprs(&exprs);
        assert_eq!(2, found.len());
        assert_eq!(a, found[0]);
        assert_eq!("count(*)", found[1].to_string());
    }

    #[test]
    fn test_transform_columns() -> Result<()> {
        let e = binary_expr(col("a"), Operator::Plus, col("b")).alias("x");
        let t = e.transform_up(|e| match e {
            Expr::Column(c) => Ok(Transformed::yes(Expr::Column(Column::new(Some("t".into()), c.name)))),
            e => Ok(Transformed::no(e)),
        })?;
        assert!(t.transformed);
        assert_eq!("t.a + t.b AS x", t.data.to_string());
        assert_eq!(2, t.data.column_refs().len());
        Ok(())
    }
}
