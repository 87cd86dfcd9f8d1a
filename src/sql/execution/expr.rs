use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use regex::Regex;

use crate::access::array::RecordArray;
use crate::access::batch::RecordBatch;
use crate::access::value::ColumnValue;
use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::format_expr_vec;
use crate::internal_err;
use crate::parse_err;
use crate::sql::plan::coercion::BinaryTypeCoercer;
use crate::sql::plan::expr::Operator;
use crate::sql::plan::schema::Column;
use crate::sql::plan::schema::LogicalSchema;
use crate::sql::udf::scalar::ScalarUDF;
use crate::sql::udf::signature::ScalarFunctionArgs;
use crate::unimplemented_err;
use crate::value_err;

/// Physical expr executor
pub trait PhysicalExpr: Debug + Display + Send + Sync {
    /// Returns the physical expression as [`Any`] so that it can be
    /// downcast to a specific implementation.
    fn as_any(&self) -> &dyn Any;

    /// Get the data type of the expr, given the schema of the input.
    fn data_type(&self, schema: &LogicalSchema) -> Result<DataType>;

    /// Evaluate an expression against a RecordBatch, returning one value
    /// per input row.
    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue>;

    /// Get a list of child PhysicalExpr that provide the input for this expr.
    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        vec![]
    }
}

/// Evaluate `expr` over the rows of `batch` picked by `rows`.
fn evaluate_rows(
    expr: &Arc<dyn PhysicalExpr>,
    batch: &RecordBatch,
    rows: &[usize],
) -> Result<ColumnValue> {
    if rows.len() == batch.num_rows() {
        return expr.evaluate(batch);
    }
    let indices = rows.iter().map(|i| Some(*i)).collect::<Vec<_>>();
    expr.evaluate(&batch.take(&indices)?)
}

fn truth(v: &ScalarValue) -> Result<Option<bool>> {
    match v {
        ScalarValue::Null => Ok(None),
        ScalarValue::Boolean(b) => Ok(Some(*b)),
        v => Err(value_err!("Expect a BOOLEAN value, got {}", v)),
    }
}

/// Literal value physical expr
#[derive(Debug)]
pub struct ValueExec {
    value: ScalarValue,
}

impl ValueExec {
    pub fn new(value: ScalarValue) -> Self {
        ValueExec { value }
    }

    pub fn value(&self) -> &ScalarValue {
        &self.value
    }
}

impl PhysicalExpr for ValueExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(self.value.datatype())
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        Ok(ColumnValue::Scalar(self.value.clone(), batch.num_rows()))
    }
}

impl Display for ValueExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Reads one input column by its position.
#[derive(Debug)]
pub struct ColumnExec {
    /// The name of the column (used for debugging and display purposes)
    name: String,
    index: usize,
}

impl ColumnExec {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self { name: name.into(), index }
    }

    pub fn try_new(column: &Column, schema: &LogicalSchema) -> Result<Self> {
        let index = schema.index_of_column(column)?;
        Ok(Self::new(column.name.clone(), index))
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl PhysicalExpr for ColumnExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, schema: &LogicalSchema) -> Result<DataType> {
        if self.index >= schema.len() {
            return Err(internal_err!("Column index {} out of range for {}", self.index, schema));
        }
        Ok(schema.field(self.index).datatype.clone())
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        if self.index >= batch.num_columns() {
            return Err(internal_err!(
                "Column {}@{} out of range for a batch of {} columns",
                self.name,
                self.index,
                batch.num_columns()
            ));
        }
        Ok(ColumnValue::Array(batch.column(self.index).clone()))
    }
}

impl Display for ColumnExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.index)
    }
}

/// Binary physical expr. Both operands are already converted to the input
/// types of the operator.
#[derive(Debug)]
pub struct BinaryExprExec {
    left: Arc<dyn PhysicalExpr>,
    op: Operator,
    right: Arc<dyn PhysicalExpr>,
    return_type: DataType,
}

impl BinaryExprExec {
    pub fn try_new(
        left: Arc<dyn PhysicalExpr>,
        op: Operator,
        right: Arc<dyn PhysicalExpr>,
        schema: &LogicalSchema,
    ) -> Result<Self> {
        let ld = left.data_type(schema)?;
        let rd = right.data_type(schema)?;
        let return_type = BinaryTypeCoercer::new(&ld, &op, &rd).get_result_type()?;
        if op.is_bitwise() && !matches!(return_type, DataType::Integer | DataType::Null) {
            return Err(unimplemented_err!("Bitwise {} on {} and {} is not supported", op, ld, rd));
        }
        Ok(Self { left, op, right, return_type })
    }

    fn evaluate_logic(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        let n = batch.num_rows();
        let lhs = self.left.evaluate(batch)?;
        // The right side only runs on rows the left side leaves undecided.
        let short = Some(self.op == Operator::Or);
        let mut out = Vec::with_capacity(n);
        let mut pending = vec![];
        for i in 0..n {
            let l = truth(&lhs.value(i))?;
            if l == short {
                out.push(ScalarValue::from(l));
            } else {
                out.push(ScalarValue::Null);
                pending.push(i);
            }
        }
        if !pending.is_empty() {
            let rhs = evaluate_rows(&self.right, batch, &pending)?;
            for (k, &i) in pending.iter().enumerate() {
                let l = truth(&lhs.value(i))?;
                let r = truth(&rhs.value(k))?;
                out[i] = ScalarValue::from(logic_op(self.op, l, r));
            }
        }
        Ok(ColumnValue::Array(RecordArray::from_values(&DataType::Boolean, out)?))
    }
}

fn logic_op(op: Operator, l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match op {
        Operator::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        _ => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    }
}

macro_rules! checked_int_op {
    ($lhs:expr, $method:ident, $rhs:expr, $sym:literal) => {{
        $lhs.$method($rhs)
            .map(ScalarValue::Int64)
            .ok_or_else(|| value_err!("INTEGER overflow on {} {} {}", $lhs, $sym, $rhs))
    }};
}

/// Apply a non-logical binary operator to two non-null values.
pub(crate) fn binary_op(l: &ScalarValue, op: Operator, r: &ScalarValue) -> Result<ScalarValue> {
    if l.is_null() || r.is_null() {
        return Ok(ScalarValue::Null);
    }
    if op.is_comparison() {
        let ord = l
            .partial_cmp(r)
            .ok_or_else(|| value_err!("Can't compare {} and {}", l, r))?;
        let b = match op {
            Operator::Eq => ord.is_eq(),
            Operator::NotEq => ord.is_ne(),
            Operator::Gt => ord.is_gt(),
            Operator::GtEq => ord.is_ge(),
            Operator::Lt => ord.is_lt(),
            _ => ord.is_le(),
        };
        return Ok(ScalarValue::Boolean(b));
    }
    if op == Operator::StringConcat {
        let l = l.cast_to(&DataType::Utf8)?;
        let r = r.cast_to(&DataType::Utf8)?;
        return match (l, r) {
            (ScalarValue::Utf8(l), ScalarValue::Utf8(r)) => Ok(ScalarValue::Utf8(l + &r)),
            (l, r) => Err(value_err!("Can't concat {} and {}", l, r)),
        };
    }
    match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) => integer_op(a, op, b),
        _ => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(value_err!("Can't {} {} and {}", op, l, r)),
            };
            let v = match op {
                Operator::Plus => a + b,
                Operator::Minus => a - b,
                Operator::Multiply => a * b,
                Operator::Divide => a / b,
                Operator::Modulo => a % b,
                _ => return Err(value_err!("Can't {} {} and {}", op, l, r)),
            };
            Ok(ScalarValue::Double(v))
        }
    }
}

fn integer_op(a: i64, op: Operator, b: i64) -> Result<ScalarValue> {
    match op {
        Operator::Plus => checked_int_op!(a, checked_add, b, "+"),
        Operator::Minus => checked_int_op!(a, checked_sub, b, "-"),
        Operator::Multiply => checked_int_op!(a, checked_mul, b, "*"),
        Operator::Divide | Operator::Modulo if b == 0 => {
            Err(value_err!("Divide by zero on {} {} {}", a, op, b))
        }
        Operator::Divide => checked_int_op!(a, checked_div, b, "/"),
        Operator::Modulo => checked_int_op!(a, checked_rem, b, "%"),
        Operator::BitwiseAnd => Ok(ScalarValue::Int64(a & b)),
        Operator::BitwiseOr => Ok(ScalarValue::Int64(a | b)),
        Operator::BitwiseXor => Ok(ScalarValue::Int64(a ^ b)),
        Operator::BitwiseShiftLeft | Operator::BitwiseShiftRight => {
            let shift = u32::try_from(b)
                .ok()
                .filter(|s| *s < 64)
                .ok_or_else(|| value_err!("Invalid shift amount {}", b))?;
            if op == Operator::BitwiseShiftLeft {
                Ok(ScalarValue::Int64(a << shift))
            } else {
                Ok(ScalarValue::Int64(a >> shift))
            }
        }
        op => Err(internal_err!("Unexpected integer operator {}", op)),
    }
}

impl PhysicalExpr for BinaryExprExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(self.return_type.clone())
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        if self.op.is_logic() {
            return self.evaluate_logic(batch);
        }
        let lhs = self.left.evaluate(batch)?;
        let rhs = self.right.evaluate(batch)?;
        if lhs.len() != rhs.len() {
            return Err(internal_err!(
                "Cannot evaluate arrays of different length, got {} vs {}",
                lhs.len(),
                rhs.len()
            ));
        }
        if let (ColumnValue::Scalar(l, n), ColumnValue::Scalar(r, _)) = (&lhs, &rhs) {
            return Ok(ColumnValue::Scalar(binary_op(l, self.op, r)?, *n));
        }
        let mut out = RecordArray::new(&self.return_type);
        for i in 0..lhs.len() {
            out.push(binary_op(&lhs.value(i), self.op, &rhs.value(i))?)?;
        }
        Ok(ColumnValue::Array(out))
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        vec![&self.left, &self.right]
    }
}

impl Display for BinaryExprExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn write_child(
            f: &mut Formatter<'_>,
            expr: &Arc<dyn PhysicalExpr>,
            prec: u8,
        ) -> std::fmt::Result {
            if let Some(child) = expr.as_any().downcast_ref::<BinaryExprExec>() {
                if child.op.prec_value() < prec {
                    write!(f, "({child})")
                } else {
                    write!(f, "{child}")
                }
            } else {
                write!(f, "{expr}")
            }
        }

        let prec = self.op.prec_value();
        write_child(f, &self.left, prec)?;
        write!(f, " {} ", self.op)?;
        write_child(f, &self.right, prec)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct NotExec {
    expr: Arc<dyn PhysicalExpr>,
}

impl NotExec {
    pub fn new(expr: Arc<dyn PhysicalExpr>) -> Self {
        Self { expr }
    }
}

impl PhysicalExpr for NotExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(DataType::Boolean)
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        let values = self.expr.evaluate(batch)?;
        let mut out = RecordArray::new(&DataType::Boolean);
        for i in 0..values.len() {
            out.push(ScalarValue::from(truth(&values.value(i))?.map(|b| !b)))?;
        }
        Ok(ColumnValue::Array(out))
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        vec![&self.expr]
    }
}

impl Display for NotExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NOT {}", self.expr)
    }
}

/// `IS NULL`, or `IS NOT NULL` when negated. Never yields null.
#[derive(Debug)]
pub struct IsNullExec {
    expr: Arc<dyn PhysicalExpr>,
    negated: bool,
}

impl IsNullExec {
    pub fn new(expr: Arc<dyn PhysicalExpr>, negated: bool) -> Self {
        Self { expr, negated }
    }
}

impl PhysicalExpr for IsNullExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(DataType::Boolean)
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        let values = self.expr.evaluate(batch)?;
        let out = (0..values.len()).map(|i| ScalarValue::Boolean(values.value(i).is_null() != self.negated));
        Ok(ColumnValue::Array(RecordArray::from_values(&DataType::Boolean, out)?))
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        vec![&self.expr]
    }
}

impl Display for IsNullExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.negated {
            write!(f, "{} IS NOT NULL", self.expr)
        } else {
            write!(f, "{} IS NULL", self.expr)
        }
    }
}

#[derive(Debug)]
pub struct CastExec {
    datatype: DataType,
    expr: Arc<dyn PhysicalExpr>,
}

impl CastExec {
    pub fn new(datatype: DataType, expr: Arc<dyn PhysicalExpr>) -> Self {
        Self { datatype, expr }
    }
}

impl PhysicalExpr for CastExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(self.datatype.clone())
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        match self.expr.evaluate(batch)? {
            ColumnValue::Scalar(v, n) => Ok(ColumnValue::Scalar(v.cast_to(&self.datatype)?, n)),
            ColumnValue::Array(a) => {
                let mut out = RecordArray::new(&self.datatype);
                for v in a.iter() {
                    out.push(v.cast_to(&self.datatype)?)?;
                }
                Ok(ColumnValue::Array(out))
            }
        }
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        vec![&self.expr]
    }
}

impl Display for CastExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CAST({} AS {})", self.expr, self.datatype)
    }
}

/// Negative physical expr
#[derive(Debug)]
pub struct NegativeExec {
    expr: Arc<dyn PhysicalExpr>,
}

impl NegativeExec {
    pub fn try_new(expr: Arc<dyn PhysicalExpr>, schema: &LogicalSchema) -> Result<Self> {
        let datatype = expr.data_type(schema)?;
        if !datatype.is_numeric() && datatype != DataType::Null {
            return Err(parse_err!("Unexpected negative op on {} type", datatype));
        }
        Ok(Self { expr })
    }
}

impl PhysicalExpr for NegativeExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, schema: &LogicalSchema) -> Result<DataType> {
        self.expr.data_type(schema)
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        let values = self.expr.evaluate(batch)?;
        let mut out = RecordArray::new(&values.datatype());
        for i in 0..values.len() {
            let v = match values.value(i) {
                ScalarValue::Null => ScalarValue::Null,
                ScalarValue::Double(f) => ScalarValue::Double(-f),
                v => {
                    let i = v.as_i64().ok_or_else(|| value_err!("Can't negate {}", v))?;
                    i.checked_neg()
                        .map(ScalarValue::Int64)
                        .ok_or_else(|| value_err!("INTEGER overflow on -{}", i))?
                }
            };
            out.push(v)?;
        }
        Ok(ColumnValue::Array(out))
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        vec![&self.expr]
    }
}

impl Display for NegativeExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(- {})", self.expr)
    }
}

/// Translate a LIKE pattern into an anchored regex. `%` matches any
/// sequence, `_` any single char, and the escape char (backslash unless
/// given) makes the next char literal.
pub(crate) fn like_regex(pattern: &str, escape_char: Option<char>, case_insensitive: bool) -> Result<Regex> {
    let escape = escape_char.unwrap_or('\\');
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == escape {
            match chars.next() {
                Some(next) => re.push_str(&regex::escape(next.encode_utf8(&mut [0; 4]))),
                None => {
                    return Err(value_err!(
                        "LIKE pattern '{}' ends with the escape character",
                        pattern
                    ))
                }
            }
            continue;
        }
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    Ok(Regex::new(&re)?)
}

/// Like physical expr
#[derive(Debug)]
pub struct LikeExec {
    negated: bool,
    case_insensitive: bool,
    escape_char: Option<char>,
    expr: Arc<dyn PhysicalExpr>,
    pattern: Arc<dyn PhysicalExpr>,
}

impl LikeExec {
    pub fn try_new(
        expr: Arc<dyn PhysicalExpr>,
        pattern: Arc<dyn PhysicalExpr>,
        negated: bool,
        case_insensitive: bool,
        escape_char: Option<char>,
        schema: &LogicalSchema,
    ) -> Result<Self> {
        for t in [expr.data_type(schema)?, pattern.data_type(schema)?] {
            if !matches!(t, DataType::Utf8 | DataType::Null) {
                return Err(parse_err!("Like expr does not support on {} type", t));
            }
        }
        if let Some(p) = pattern.as_any().downcast_ref::<ValueExec>() {
            if let ScalarValue::Utf8(p) = p.value() {
                // fail at plan time on a malformed literal pattern
                like_regex(p, escape_char, case_insensitive)?;
            }
        }
        Ok(Self { expr, pattern, negated, case_insensitive, escape_char })
    }
}

impl PhysicalExpr for LikeExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(DataType::Boolean)
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        let text = self.expr.evaluate(batch)?;
        let pattern = self.pattern.evaluate(batch)?;
        let mut compiled: HashMap<String, Regex> = HashMap::new();
        let mut out = RecordArray::new(&DataType::Boolean);
        for i in 0..text.len() {
            let v = match (text.value(i), pattern.value(i)) {
                (ScalarValue::Utf8(t), ScalarValue::Utf8(p)) => {
                    if !compiled.contains_key(&p) {
                        let re = like_regex(&p, self.escape_char, self.case_insensitive)?;
                        compiled.insert(p.clone(), re);
                    }
                    let matched = compiled.get(&p).is_some_and(|re| re.is_match(&t));
                    ScalarValue::Boolean(matched != self.negated)
                }
                (ScalarValue::Null, _) | (_, ScalarValue::Null) => ScalarValue::Null,
                (t, p) => return Err(value_err!("Like expects string value, got {} and {}", t, p)),
            };
            out.push(v)?;
        }
        Ok(ColumnValue::Array(out))
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        vec![&self.expr, &self.pattern]
    }
}

impl Display for LikeExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op_name = match (self.negated, self.case_insensitive) {
            (false, false) => "LIKE",
            (true, false) => "NOT LIKE",
            (false, true) => "ILIKE",
            (true, true) => "NOT ILIKE",
        };
        write!(f, "{} {} {}", self.expr, op_name, self.pattern)
    }
}

/// InList physical expr, e.g., `[ NOT ] IN (val1, val2, ...)`. The list
/// items share the type of the probed expr.
#[derive(Debug)]
pub struct InListExec {
    expr: Arc<dyn PhysicalExpr>,
    list: Vec<Arc<dyn PhysicalExpr>>,
    negated: bool,
}

impl InListExec {
    pub fn new(expr: Arc<dyn PhysicalExpr>, list: Vec<Arc<dyn PhysicalExpr>>, negated: bool) -> Self {
        Self { expr, list, negated }
    }
}

impl PhysicalExpr for InListExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(DataType::Boolean)
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        let values = self.expr.evaluate(batch)?;
        let list = self.list.iter().map(|e| e.evaluate(batch)).collect::<Result<Vec<_>>>()?;
        let mut out = RecordArray::new(&DataType::Boolean);
        for i in 0..values.len() {
            let v = values.value(i);
            if v.is_null() {
                out.push_null();
                continue;
            }
            let mut saw_null = false;
            let mut found = false;
            for item in &list {
                let item = item.value(i);
                if item.is_null() {
                    saw_null = true;
                } else if item == v {
                    found = true;
                    break;
                }
            }
            let result = match (found, saw_null) {
                (true, _) => Some(!self.negated),
                (false, true) => None,
                (false, false) => Some(self.negated),
            };
            out.push(ScalarValue::from(result))?;
        }
        Ok(ColumnValue::Array(out))
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        let mut out = vec![&self.expr];
        out.extend(self.list.iter());
        out
    }
}

impl Display for InListExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op = if self.negated { "NOT IN" } else { "IN" };
        write!(f, "{} {} ([{}])", self.expr, op, format_expr_vec!(self.list))
    }
}

/// `CASE [expr] WHEN .. THEN .. [ELSE ..] END`. A branch is only evaluated
/// on the rows that reach it.
#[derive(Debug)]
pub struct CaseExec {
    expr: Option<Arc<dyn PhysicalExpr>>,
    when_then: Vec<(Arc<dyn PhysicalExpr>, Arc<dyn PhysicalExpr>)>,
    else_expr: Option<Arc<dyn PhysicalExpr>>,
    datatype: DataType,
}

impl CaseExec {
    pub fn new(
        expr: Option<Arc<dyn PhysicalExpr>>,
        when_then: Vec<(Arc<dyn PhysicalExpr>, Arc<dyn PhysicalExpr>)>,
        else_expr: Option<Arc<dyn PhysicalExpr>>,
        datatype: DataType,
    ) -> Self {
        Self { expr, when_then, else_expr, datatype }
    }
}

impl PhysicalExpr for CaseExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(self.datatype.clone())
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        let n = batch.num_rows();
        let operand = self.expr.as_ref().map(|e| e.evaluate(batch)).transpose()?;
        let mut out = vec![ScalarValue::Null; n];
        let mut remaining = (0..n).collect::<Vec<_>>();
        for (when, then) in &self.when_then {
            if remaining.is_empty() {
                break;
            }
            let conditions = evaluate_rows(when, batch, &remaining)?;
            let mut matched = vec![];
            let mut unmatched = vec![];
            for (k, &row) in remaining.iter().enumerate() {
                let hit = match &operand {
                    Some(operand) => {
                        binary_op(&operand.value(row), Operator::Eq, &conditions.value(k))?
                            == ScalarValue::Boolean(true)
                    }
                    None => truth(&conditions.value(k))? == Some(true),
                };
                if hit {
                    matched.push(row);
                } else {
                    unmatched.push(row);
                }
            }
            if !matched.is_empty() {
                let values = evaluate_rows(then, batch, &matched)?;
                for (k, &row) in matched.iter().enumerate() {
                    out[row] = values.value(k);
                }
            }
            remaining = unmatched;
        }
        if let (Some(else_expr), false) = (&self.else_expr, remaining.is_empty()) {
            let values = evaluate_rows(else_expr, batch, &remaining)?;
            for (k, &row) in remaining.iter().enumerate() {
                out[row] = values.value(k);
            }
        }
        Ok(ColumnValue::Array(RecordArray::from_values(&self.datatype, out)?))
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        let mut out = vec![];
        out.extend(self.expr.iter());
        for (w, t) in &self.when_then {
            out.push(w);
            out.push(t);
        }
        out.extend(self.else_expr.iter());
        out
    }
}

impl Display for CaseExec {
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

#[derive(Debug)]
pub struct ScalarFunctionExec {
    func: Arc<dyn ScalarUDF>,
    args: Vec<Arc<dyn PhysicalExpr>>,
    return_type: DataType,
}

impl ScalarFunctionExec {
    pub fn try_new(
        func: Arc<dyn ScalarUDF>,
        args: Vec<Arc<dyn PhysicalExpr>>,
        schema: &LogicalSchema,
    ) -> Result<Self> {
        let arg_types = args.iter().map(|a| a.data_type(schema)).collect::<Result<Vec<_>>>()?;
        let return_type = func.return_type(&arg_types)?;
        Ok(Self { func, args, return_type })
    }
}

impl PhysicalExpr for ScalarFunctionExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data_type(&self, _schema: &LogicalSchema) -> Result<DataType> {
        Ok(self.return_type.clone())
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ColumnValue> {
        let args = self.args.iter().map(|a| a.evaluate(batch)).collect::<Result<Vec<_>>>()?;
        self.func.invoke_with_args(ScalarFunctionArgs::new(args, batch.num_rows()))
    }

    fn children(&self) -> Vec<&Arc<dyn PhysicalExpr>> {
        self.args.iter().collect()
    }
}

impl Display for ScalarFunctionExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.func.name(), format_expr_vec!(self.args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::sql::plan::schema::Field;
    use crate::sql::plan::schema::SchemaRef;

    fn batch() -> Result<RecordBatch> {
        let schema: SchemaRef = Arc::new(LogicalSchema::from_unqualified_fields(
            vec![
                Field::new("a", DataType::Integer, true),
                Field::new("b", DataType::Integer, true),
                Field::new("s", DataType::Utf8, true),
            ]
            .into(),
        )?);
        let rows = vec![
            vec![ScalarValue::Int64(10), ScalarValue::Int64(2), ScalarValue::from("Steven")],
            vec![ScalarValue::Int64(7), ScalarValue::Int64(0), ScalarValue::from("neena")],
            vec![ScalarValue::Null, ScalarValue::Int64(1), ScalarValue::Null],
        ];
        RecordBatch::from_rows(schema, &rows)
    }

    fn column(name: &str, index: usize) -> Arc<dyn PhysicalExpr> {
        Arc::new(ColumnExec::new(name, index))
    }

    fn value(v: impl Into<ScalarValue>) -> Arc<dyn PhysicalExpr> {
        Arc::new(ValueExec::new(v.into()))
    }

    fn values(v: ColumnValue) -> Vec<ScalarValue> {
        (0..v.len()).map(|i| v.value(i)).collect()
    }

    #[test]
    fn test_arithmetic_and_divide_by_zero() -> Result<()> {
        let batch = batch()?;
        let schema = batch.schema();
        let plus = BinaryExprExec::try_new(column("a", 0), Operator::Plus, column("b", 1), &schema)?;
        assert_eq!(
            vec![ScalarValue::Int64(12), ScalarValue::Int64(7), ScalarValue::Null],
            values(plus.evaluate(&batch)?)
        );
        assert_eq!("a@0 + b@1", plus.to_string());

        let div = BinaryExprExec::try_new(column("a", 0), Operator::Divide, column("b", 1), &schema)?;
        assert!(matches!(div.evaluate(&batch), Err(Error::Value(_))));
        Ok(())
    }

    #[test]
    fn test_logic_short_circuits() -> Result<()> {
        let batch = batch()?;
        let schema = batch.schema();
        // b != 0 AND a / b > 1 never divides by zero
        let guard = Arc::new(BinaryExprExec::try_new(column("b", 1), Operator::NotEq, value(0i64), &schema)?);
        let div = Arc::new(BinaryExprExec::try_new(column("a", 0), Operator::Divide, column("b", 1), &schema)?);
        let gt = Arc::new(BinaryExprExec::try_new(div, Operator::Gt, value(1i64), &schema)?);
        let and = BinaryExprExec::try_new(guard, Operator::And, gt, &schema)?;
        assert_eq!(
            vec![ScalarValue::Boolean(true), ScalarValue::Boolean(false), ScalarValue::Null],
            values(and.evaluate(&batch)?)
        );
        Ok(())
    }

    #[test]
    fn test_like() -> Result<()> {
        let batch = batch()?;
        let schema = batch.schema();
        let like = LikeExec::try_new(column("s", 2), value("St%"), false, false, None, &schema)?;
        assert_eq!(
            vec![ScalarValue::Boolean(true), ScalarValue::Boolean(false), ScalarValue::Null],
            values(like.evaluate(&batch)?)
        );
        let ilike = LikeExec::try_new(column("s", 2), value("N_ENA"), false, true, None, &schema)?;
        assert_eq!(ScalarValue::Boolean(true), ilike.evaluate(&batch)?.value(1));

        assert!(like_regex("100\\%", None, false)?.is_match("100%"));
        assert!(!like_regex("100\\%", None, false)?.is_match("1000"));
        assert!(like_regex("a#_b", Some('#'), false)?.is_match("a_b"));
        assert!(LikeExec::try_new(column("s", 2), value("abc\\"), false, false, None, &schema).is_err());
        Ok(())
    }

    #[test]
    fn test_in_list_null_semantics() -> Result<()> {
        let batch = batch()?;
        let in_list = InListExec::new(column("b", 1), vec![value(2i64), value(ScalarValue::Null)], false);
        assert_eq!(
            vec![ScalarValue::Boolean(true), ScalarValue::Null, ScalarValue::Null],
            values(in_list.evaluate(&batch)?)
        );
        let not_in = InListExec::new(column("b", 1), vec![value(2i64)], true);
        assert_eq!(
            vec![ScalarValue::Boolean(false), ScalarValue::Boolean(true), ScalarValue::Boolean(true)],
            values(not_in.evaluate(&batch)?)
        );
        Ok(())
    }

    #[test]
    fn test_case_only_evaluates_reached_branches() -> Result<()> {
        let batch = batch()?;
        let schema = batch.schema();
        let is_zero = Arc::new(BinaryExprExec::try_new(column("b", 1), Operator::Eq, value(0i64), &schema)?);
        let div = Arc::new(BinaryExprExec::try_new(column("a", 0), Operator::Divide, column("b", 1), &schema)?);
        let case = CaseExec::new(None, vec![(is_zero, value(-1i64))], Some(div), DataType::Integer);
        assert_eq!(
            vec![ScalarValue::Int64(5), ScalarValue::Int64(-1), ScalarValue::Null],
            values(case.evaluate(&batch)?)
        );

        let simple = CaseExec::new(Some(column("b", 1)), vec![(value(2i64), value("two"))], None, DataType::Utf8);
        assert_eq!(
            vec![ScalarValue::from("two"), ScalarValue::Null, ScalarValue::Null],
            values(simple.evaluate(&batch)?)
        );
        Ok(())
    }

    #[test]
    fn test_is_null_not_cast() -> Result<()> {
        let batch = batch()?;
        let is_null = IsNullExec::new(column("a", 0), false);
        assert_eq!(ScalarValue::Boolean(true), is_null.evaluate(&batch)?.value(2));
        let not = NotExec::new(Arc::new(is_null));
        assert_eq!(ScalarValue::Boolean(true), not.evaluate(&batch)?.value(0));
        let cast = CastExec::new(DataType::Utf8, column("a", 0));
        assert_eq!(ScalarValue::from("10"), cast.evaluate(&batch)?.value(0));
        Ok(())
    }
}
