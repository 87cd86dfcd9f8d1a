use std::any::Any;
use std::fmt::Debug;

use crate::access::array::RecordArray;
use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::internal_err;
use crate::parse_err;
use crate::sql::plan::expr::Expr;
use crate::sql::plan::schema::Field;
use crate::sql::udf::signature::Signature;
use crate::value_err;

/// Trait for implementing user defined aggregate functions.
///
/// Aggregation runs in two phases. The partial phase feeds input rows to an
/// [`Accumulator`] and emits its [`Accumulator::state`]; the final phase
/// merges those states and evaluates the result.
pub trait AggregateUDF: Debug + Sync + Send {
    fn as_any(&self) -> &dyn Any;

    /// Returns this function's name.
    fn name(&self) -> &str;

    fn signature(&self) -> &Signature;

    /// The args `f(*)` stands for.
    fn expand_wildcard(&self) -> Result<Vec<Expr>> {
        Err(parse_err!("{}(*) is not supported", self.name()))
    }

    /// Return the datatype this function returns given the input argument types.
    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType>;

    /// The fields of the intermediate state the partial phase emits, named
    /// after the aggregate expression `name`.
    fn state_fields(&self, name: &str, arg_types: &[DataType]) -> Result<Vec<Field>>;

    /// Return an accumulator that aggregates for the udf.
    fn accumulator(&self, arg_types: &[DataType]) -> Result<Box<dyn Accumulator>>;
}

/// Accumulator track the aggregation state of one group.
pub trait Accumulator: Debug + Send {
    /// Fold the argument values of one input row into the state.
    fn update(&mut self, values: &[ScalarValue]) -> Result<()>;

    /// Fold a batch of argument columns, row by row.
    fn update_batch(&mut self, columns: &[RecordArray], rows: &[usize]) -> Result<()> {
        for &row in rows {
            let values = columns.iter().map(|c| c.value(row)).collect::<Vec<_>>();
            self.update(&values)?;
        }
        Ok(())
    }

    /// Merge a state produced by [`Accumulator::state`] of another
    /// accumulator of the same function.
    fn merge(&mut self, state: &[ScalarValue]) -> Result<()>;

    /// The intermediate state, matching [`AggregateUDF::state_fields`].
    fn state(&self) -> Result<Vec<ScalarValue>>;

    /// Returns the final aggregate value.
    fn evaluate(&self) -> Result<ScalarValue>;
}

macro_rules! make_udfa_function {
    ($UDF:ty, $NAME:ident) => {
        pub fn $NAME() -> std::sync::Arc<dyn AggregateUDF> {
            static INSTANCE: std::sync::LazyLock<std::sync::Arc<dyn AggregateUDF>> =
                std::sync::LazyLock::new(|| std::sync::Arc::new(<$UDF>::new()));
            std::sync::Arc::clone(&INSTANCE)
        }
    };
    ($UDF:ty, $NAME:ident, $($arg:expr),+) => {
        pub fn $NAME() -> std::sync::Arc<dyn AggregateUDF> {
            static INSTANCE: std::sync::LazyLock<std::sync::Arc<dyn AggregateUDF>> =
                std::sync::LazyLock::new(|| std::sync::Arc::new(<$UDF>::new($($arg),+)));
            std::sync::Arc::clone(&INSTANCE)
        }
    };
}

make_udfa_function!(Count, count);
make_udfa_function!(Sum, sum);
make_udfa_function!(Avg, avg);
make_udfa_function!(MinMax<true>, min);
make_udfa_function!(MinMax<false>, max);
make_udfa_function!(Median, median);
make_udfa_function!(Variance, stddev, VarianceKind::StdDevSample);
make_udfa_function!(Variance, stddev_pop, VarianceKind::StdDevPopulation);
make_udfa_function!(Variance, variance, VarianceKind::VarianceSample);
make_udfa_function!(Variance, var_pop, VarianceKind::VariancePopulation);
make_udfa_function!(Covariance<true>, covar_samp);
make_udfa_function!(Covariance<false>, covar_pop);

/// Every builtin aggregate with the names it is registered under.
pub fn builtin_aggregates() -> Vec<(&'static str, std::sync::Arc<dyn AggregateUDF>)> {
    vec![
        ("count", count()),
        ("sum", sum()),
        ("avg", avg()),
        ("mean", avg()),
        ("min", min()),
        ("max", max()),
        ("median", median()),
        ("stddev", stddev()),
        ("stddev_samp", stddev()),
        ("stddev_pop", stddev_pop()),
        ("variance", variance()),
        ("var_samp", variance()),
        ("var_pop", var_pop()),
        ("covar", covar_samp()),
        ("covar_samp", covar_samp()),
        ("covar_pop", covar_pop()),
    ]
}

fn numeric(name: &str, v: &ScalarValue) -> Result<f64> {
    v.as_f64().ok_or_else(|| value_err!("{} expects a number, got {}", name, v))
}

#[derive(Debug)]
pub struct Count {
    signature: Signature,
}

impl Count {
    pub fn new() -> Self {
        Self { signature: Signature::Any(1) }
    }
}

impl AggregateUDF for Count {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "count"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    /// `count(*)` counts rows, which is counting an argument that is never
    /// null.
    fn expand_wildcard(&self) -> Result<Vec<Expr>> {
        Ok(vec![Expr::Wildcard { qualifier: None }])
    }

    fn return_type(&self, _arg_types: &[DataType]) -> Result<DataType> {
        Ok(DataType::Integer)
    }

    fn state_fields(&self, name: &str, _arg_types: &[DataType]) -> Result<Vec<Field>> {
        Ok(vec![Field::new(format!("{name}[count]"), DataType::Integer, false)])
    }

    fn accumulator(&self, _arg_types: &[DataType]) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(CountAccumulator { count: 0 }))
    }
}

#[derive(Debug)]
struct CountAccumulator {
    count: i64,
}

impl Accumulator for CountAccumulator {
    fn update(&mut self, values: &[ScalarValue]) -> Result<()> {
        if values.iter().all(|v| !v.is_null()) {
            self.count += 1;
        }
        Ok(())
    }

    fn merge(&mut self, state: &[ScalarValue]) -> Result<()> {
        self.count += state.first().and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(())
    }

    fn state(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![ScalarValue::Int64(self.count)])
    }

    fn evaluate(&self) -> Result<ScalarValue> {
        Ok(ScalarValue::Int64(self.count))
    }
}

/// `sum` always reports INTEGER; sums over doubles are truncated on
/// evaluation.
#[derive(Debug)]
pub struct Sum {
    signature: Signature,
}

impl Sum {
    pub fn new() -> Self {
        Self { signature: Signature::Uniform(1, vec![DataType::Integer, DataType::Double]) }
    }
}

impl AggregateUDF for Sum {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "sum"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(DataType::Integer)
    }

    fn state_fields(&self, name: &str, arg_types: &[DataType]) -> Result<Vec<Field>> {
        let datatype = match arg_types.first() {
            Some(DataType::Double) => DataType::Double,
            _ => DataType::Integer,
        };
        Ok(vec![Field::new(format!("{name}[sum]"), datatype, true)])
    }

    fn accumulator(&self, _arg_types: &[DataType]) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(SumAccumulator { sum: None }))
    }
}

#[derive(Debug)]
struct SumAccumulator {
    sum: Option<ScalarValue>,
}

impl SumAccumulator {
    fn add(&mut self, v: &ScalarValue) -> Result<()> {
        if v.is_null() {
            return Ok(());
        }
        let next = match (&self.sum, v.as_i64()) {
            (None, Some(i)) => ScalarValue::Int64(i),
            (None, None) => ScalarValue::Double(numeric("sum", v)?),
            (Some(ScalarValue::Int64(acc)), Some(i)) => acc
                .checked_add(i)
                .map(ScalarValue::Int64)
                .ok_or_else(|| value_err!("sum overflows INTEGER"))?,
            (Some(acc), _) => ScalarValue::Double(numeric("sum", acc)? + numeric("sum", v)?),
        };
        self.sum = Some(next);
        Ok(())
    }
}

impl Accumulator for SumAccumulator {
    fn update(&mut self, values: &[ScalarValue]) -> Result<()> {
        match values.first() {
            Some(v) => self.add(v),
            None => Err(internal_err!("sum expects one argument")),
        }
    }

    fn merge(&mut self, state: &[ScalarValue]) -> Result<()> {
        self.update(state)
    }

    fn state(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![self.sum.clone().unwrap_or(ScalarValue::Null)])
    }

    fn evaluate(&self) -> Result<ScalarValue> {
        match &self.sum {
            Some(v) => v.cast_to(&DataType::Integer),
            None => Ok(ScalarValue::Null),
        }
    }
}

#[derive(Debug)]
pub struct Avg {
    signature: Signature,
}

impl Avg {
    pub fn new() -> Self {
        Self { signature: Signature::Uniform(1, vec![DataType::Integer, DataType::Double]) }
    }
}

impl AggregateUDF for Avg {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "avg"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(DataType::Double)
    }

    fn state_fields(&self, name: &str, _arg_types: &[DataType]) -> Result<Vec<Field>> {
        Ok(vec![
            Field::new(format!("{name}[count]"), DataType::Integer, false),
            Field::new(format!("{name}[sum]"), DataType::Double, true),
        ])
    }

    fn accumulator(&self, _arg_types: &[DataType]) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(AvgAccumulator { count: 0, sum: 0.0 }))
    }
}

#[derive(Debug)]
struct AvgAccumulator {
    count: i64,
    sum: f64,
}

impl Accumulator for AvgAccumulator {
    fn update(&mut self, values: &[ScalarValue]) -> Result<()> {
        let v = values.first().ok_or_else(|| internal_err!("avg expects one argument"))?;
        if !v.is_null() {
            self.count += 1;
            self.sum += numeric("avg", v)?;
        }
        Ok(())
    }

    fn merge(&mut self, state: &[ScalarValue]) -> Result<()> {
        let [count, sum] = state else {
            return Err(internal_err!("avg state expects 2 values, got {}", state.len()));
        };
        self.count += count.as_i64().unwrap_or(0);
        if !sum.is_null() {
            self.sum += numeric("avg", sum)?;
        }
        Ok(())
    }

    fn state(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![ScalarValue::Int64(self.count), ScalarValue::Double(self.sum)])
    }

    fn evaluate(&self) -> Result<ScalarValue> {
        if self.count == 0 {
            return Ok(ScalarValue::Null);
        }
        Ok(ScalarValue::Double(self.sum / self.count as f64))
    }
}

/// `min` when `MIN` is true, `max` otherwise.
#[derive(Debug)]
pub struct MinMax<const MIN: bool> {
    signature: Signature,
}

impl<const MIN: bool> MinMax<MIN> {
    pub fn new() -> Self {
        Self { signature: Signature::VariadicAny }
    }
}

impl<const MIN: bool> AggregateUDF for MinMax<MIN> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        if MIN {
            "min"
        } else {
            "max"
        }
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The input type, which must be the same for every argument.
    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        let mut distinct = arg_types.to_vec();
        distinct.dedup();
        if distinct.len() > 1 {
            return Err(parse_err!(
                "{} expects arguments of a single type, got {}",
                self.name(),
                distinct.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
            ));
        }
        Ok(arg_types[0].clone())
    }

    fn state_fields(&self, name: &str, arg_types: &[DataType]) -> Result<Vec<Field>> {
        let datatype = self.return_type(arg_types)?;
        Ok(vec![Field::new(format!("{name}[{}]", self.name()), datatype, true)])
    }

    fn accumulator(&self, _arg_types: &[DataType]) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(MinMaxAccumulator::<MIN> { value: ScalarValue::Null }))
    }
}

#[derive(Debug)]
struct MinMaxAccumulator<const MIN: bool> {
    value: ScalarValue,
}

impl<const MIN: bool> Accumulator for MinMaxAccumulator<MIN> {
    fn update(&mut self, values: &[ScalarValue]) -> Result<()> {
        for v in values.iter().filter(|v| !v.is_null()) {
            let replace = match (&self.value, MIN) {
                (ScalarValue::Null, _) => true,
                (current, true) => v < current,
                (current, false) => v > current,
            };
            if replace {
                self.value = v.clone();
            }
        }
        Ok(())
    }

    fn merge(&mut self, state: &[ScalarValue]) -> Result<()> {
        self.update(state)
    }

    fn state(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![self.value.clone()])
    }

    fn evaluate(&self) -> Result<ScalarValue> {
        Ok(self.value.clone())
    }
}

#[derive(Debug)]
pub struct Median {
    signature: Signature,
}

impl Median {
    pub fn new() -> Self {
        Self { signature: Signature::Uniform(1, vec![DataType::Integer, DataType::Double]) }
    }
}

impl AggregateUDF for Median {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "median"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(DataType::Double)
    }

    fn state_fields(&self, name: &str, _arg_types: &[DataType]) -> Result<Vec<Field>> {
        let datatype = DataType::List(Box::new(DataType::Double));
        Ok(vec![Field::new(format!("{name}[values]"), datatype, true)])
    }

    fn accumulator(&self, _arg_types: &[DataType]) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(MedianAccumulator { values: vec![] }))
    }
}

/// Keeps every value, the median needs all of them.
#[derive(Debug)]
struct MedianAccumulator {
    values: Vec<f64>,
}

impl Accumulator for MedianAccumulator {
    fn update(&mut self, values: &[ScalarValue]) -> Result<()> {
        let v = values.first().ok_or_else(|| internal_err!("median expects one argument"))?;
        if !v.is_null() {
            self.values.push(numeric("median", v)?);
        }
        Ok(())
    }

    fn merge(&mut self, state: &[ScalarValue]) -> Result<()> {
        match state.first() {
            Some(ScalarValue::List(values)) => {
                for v in values {
                    self.values.push(numeric("median", v)?);
                }
                Ok(())
            }
            Some(ScalarValue::Null) => Ok(()),
            other => Err(internal_err!("median state expects a list, got {:?}", other)),
        }
    }

    fn state(&self) -> Result<Vec<ScalarValue>> {
        let values = self.values.iter().map(|v| ScalarValue::Double(*v)).collect();
        Ok(vec![ScalarValue::List(values)])
    }

    fn evaluate(&self) -> Result<ScalarValue> {
        if self.values.is_empty() {
            return Ok(ScalarValue::Null);
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        Ok(ScalarValue::Double(median))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceKind {
    StdDevSample,
    StdDevPopulation,
    VarianceSample,
    VariancePopulation,
}

impl VarianceKind {
    fn name(&self) -> &'static str {
        match self {
            VarianceKind::StdDevSample => "stddev",
            VarianceKind::StdDevPopulation => "stddev_pop",
            VarianceKind::VarianceSample => "variance",
            VarianceKind::VariancePopulation => "var_pop",
        }
    }

    fn is_sample(&self) -> bool {
        matches!(self, VarianceKind::StdDevSample | VarianceKind::VarianceSample)
    }

    fn is_stddev(&self) -> bool {
        matches!(self, VarianceKind::StdDevSample | VarianceKind::StdDevPopulation)
    }
}

/// Variance and standard deviation, sample or population.
#[derive(Debug)]
pub struct Variance {
    kind: VarianceKind,
    signature: Signature,
}

impl Variance {
    pub fn new(kind: VarianceKind) -> Self {
        Self { kind, signature: Signature::Uniform(1, vec![DataType::Integer, DataType::Double]) }
    }
}

impl AggregateUDF for Variance {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        self.kind.name()
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(DataType::Double)
    }

    fn state_fields(&self, name: &str, _arg_types: &[DataType]) -> Result<Vec<Field>> {
        Ok(vec![
            Field::new(format!("{name}[count]"), DataType::Integer, false),
            Field::new(format!("{name}[mean]"), DataType::Double, false),
            Field::new(format!("{name}[m2]"), DataType::Double, false),
        ])
    }

    fn accumulator(&self, _arg_types: &[DataType]) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(VarianceAccumulator { kind: self.kind, count: 0, mean: 0.0, m2: 0.0 }))
    }
}

/// Welford's online algorithm, partial states are combined with Chan's
/// parallel formula.
#[derive(Debug)]
struct VarianceAccumulator {
    kind: VarianceKind,
    count: i64,
    mean: f64,
    m2: f64,
}

impl Accumulator for VarianceAccumulator {
    fn update(&mut self, values: &[ScalarValue]) -> Result<()> {
        let v = values.first().ok_or_else(|| internal_err!("{} expects one argument", self.kind.name()))?;
        if v.is_null() {
            return Ok(());
        }
        let x = numeric(self.kind.name(), v)?;
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        Ok(())
    }

    fn merge(&mut self, state: &[ScalarValue]) -> Result<()> {
        let [count, mean, m2] = state else {
            return Err(internal_err!("variance state expects 3 values, got {}", state.len()));
        };
        let count = count.as_i64().unwrap_or(0);
        if count == 0 {
            return Ok(());
        }
        let (mean, m2) = (numeric("variance", mean)?, numeric("variance", m2)?);
        let total = self.count + count;
        let delta = mean - self.mean;
        self.m2 += m2 + delta * delta * (self.count as f64) * (count as f64) / total as f64;
        self.mean += delta * count as f64 / total as f64;
        self.count = total;
        Ok(())
    }

    fn state(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![
            ScalarValue::Int64(self.count),
            ScalarValue::Double(self.mean),
            ScalarValue::Double(self.m2),
        ])
    }

    fn evaluate(&self) -> Result<ScalarValue> {
        let n = if self.kind.is_sample() { self.count - 1 } else { self.count };
        if n <= 0 {
            return Ok(ScalarValue::Null);
        }
        let variance = self.m2 / n as f64;
        let value = if self.kind.is_stddev() { variance.sqrt() } else { variance };
        Ok(ScalarValue::Double(value))
    }
}

/// Covariance of two columns, sample when `SAMPLE` is true.
#[derive(Debug)]
pub struct Covariance<const SAMPLE: bool> {
    signature: Signature,
}

impl<const SAMPLE: bool> Covariance<SAMPLE> {
    pub fn new() -> Self {
        Self { signature: Signature::Uniform(2, vec![DataType::Integer, DataType::Double]) }
    }
}

impl<const SAMPLE: bool> AggregateUDF for Covariance<SAMPLE> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        if SAMPLE {
            "covar_samp"
        } else {
            "covar_pop"
        }
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(DataType::Double)
    }

    fn state_fields(&self, name: &str, _arg_types: &[DataType]) -> Result<Vec<Field>> {
        Ok(vec![
            Field::new(format!("{name}[count]"), DataType::Integer, false),
            Field::new(format!("{name}[mean1]"), DataType::Double, false),
            Field::new(format!("{name}[mean2]"), DataType::Double, false),
            Field::new(format!("{name}[c]"), DataType::Double, false),
        ])
    }

    fn accumulator(&self, _arg_types: &[DataType]) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(CovarianceAccumulator::<SAMPLE> { count: 0, mean1: 0.0, mean2: 0.0, c: 0.0 }))
    }
}

#[derive(Debug)]
struct CovarianceAccumulator<const SAMPLE: bool> {
    count: i64,
    mean1: f64,
    mean2: f64,
    /// Sum of the co-moments.
    c: f64,
}

impl<const SAMPLE: bool> Accumulator for CovarianceAccumulator<SAMPLE> {
    fn update(&mut self, values: &[ScalarValue]) -> Result<()> {
        let [x, y] = values else {
            return Err(internal_err!("covariance expects 2 arguments, got {}", values.len()));
        };
        if x.is_null() || y.is_null() {
            return Ok(());
        }
        let (x, y) = (numeric("covar", x)?, numeric("covar", y)?);
        self.count += 1;
        let dx = x - self.mean1;
        self.mean1 += dx / self.count as f64;
        self.mean2 += (y - self.mean2) / self.count as f64;
        self.c += dx * (y - self.mean2);
        Ok(())
    }

    fn merge(&mut self, state: &[ScalarValue]) -> Result<()> {
        let [count, mean1, mean2, c] = state else {
            return Err(internal_err!("covariance state expects 4 values, got {}", state.len()));
        };
        let count = count.as_i64().unwrap_or(0);
        if count == 0 {
            return Ok(());
        }
        let (mean1, mean2, c) =
            (numeric("covar", mean1)?, numeric("covar", mean2)?, numeric("covar", c)?);
        let total = self.count + count;
        let d1 = mean1 - self.mean1;
        let d2 = mean2 - self.mean2;
        self.c += c + d1 * d2 * (self.count as f64) * (count as f64) / total as f64;
        self.mean1 += d1 * count as f64 / total as f64;
        self.mean2 += d2 * count as f64 / total as f64;
        self.count = total;
        Ok(())
    }

    fn state(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![
            ScalarValue::Int64(self.count),
            ScalarValue::Double(self.mean1),
            ScalarValue::Double(self.mean2),
            ScalarValue::Double(self.c),
        ])
    }

    fn evaluate(&self) -> Result<ScalarValue> {
        let n = if SAMPLE { self.count - 1 } else { self.count };
        if n <= 0 {
            return Ok(ScalarValue::Null);
        }
        Ok(ScalarValue::Double(self.c / n as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<ScalarValue> {
        values.iter().map(|v| ScalarValue::Int64(*v)).collect()
    }

    fn run(func: std::sync::Arc<dyn AggregateUDF>, rows: &[Vec<ScalarValue>]) -> Result<ScalarValue> {
        let arg_types = rows[0].iter().map(|v| v.datatype()).collect::<Vec<_>>();
        let mut acc = func.accumulator(&arg_types)?;
        for row in rows {
            acc.update(row)?;
        }
        acc.evaluate()
    }

    /// Feed the rows to two partial accumulators and merge them into a
    /// third one.
    fn run_split(func: std::sync::Arc<dyn AggregateUDF>, rows: &[Vec<ScalarValue>], at: usize) -> Result<ScalarValue> {
        let arg_types = rows[0].iter().map(|v| v.datatype()).collect::<Vec<_>>();
        let mut a = func.accumulator(&arg_types)?;
        let mut b = func.accumulator(&arg_types)?;
        for row in &rows[..at] {
            a.update(row)?;
        }
        for row in &rows[at..] {
            b.update(row)?;
        }
        let mut out = func.accumulator(&arg_types)?;
        out.merge(&a.state()?)?;
        out.merge(&b.state()?)?;
        assert_eq!(func.state_fields("f", &arg_types)?.len(), out.state()?.len());
        out.evaluate()
    }

    fn single(values: &[i64]) -> Vec<Vec<ScalarValue>> {
        values.iter().map(|v| vec![ScalarValue::Int64(*v)]).collect()
    }

    #[test]
    fn test_count_sum_avg() -> Result<()> {
        let mut rows = single(&[1, 2, 3, 4]);
        rows.push(vec![ScalarValue::Null]);
        assert_eq!(ScalarValue::Int64(4), run(count(), &rows)?);
        assert_eq!(ScalarValue::Int64(10), run_split(sum(), &rows, 2)?);
        assert_eq!(ScalarValue::Double(2.5), run_split(avg(), &rows, 3)?);
        assert_eq!(ScalarValue::Null, run(sum(), &[vec![ScalarValue::Null]])?);
        Ok(())
    }

    #[test]
    fn test_sum_types() -> Result<()> {
        assert_eq!(DataType::Integer, sum().return_type(&[DataType::Double])?);
        let rows = vec![vec![ScalarValue::Double(1.5)], vec![ScalarValue::Double(2.0)]];
        assert_eq!(ScalarValue::Int64(3), run(sum(), &rows)?);
        let rows = vec![vec![ScalarValue::Int64(i64::MAX)], vec![ScalarValue::Int64(1)]];
        assert!(run(sum(), &rows).is_err());
        assert!(sum().return_type(&[DataType::Utf8]).is_err());
        Ok(())
    }

    #[test]
    fn test_min_max() -> Result<()> {
        let rows = vec![vec![ScalarValue::from("b")], vec![ScalarValue::from("a")], vec![ScalarValue::Null]];
        assert_eq!(ScalarValue::from("a"), run(min(), &rows)?);
        assert_eq!(ScalarValue::from("b"), run_split(max(), &rows, 1)?);
        assert_eq!(DataType::Utf8, max().return_type(&[DataType::Utf8])?);
        assert!(max().return_type(&[DataType::Utf8, DataType::Integer]).is_err());
        Ok(())
    }

    #[test]
    fn test_median() -> Result<()> {
        assert_eq!(ScalarValue::Double(2.5), run_split(median(), &single(&[4, 1, 3, 2]), 2)?);
        assert_eq!(ScalarValue::Double(3.0), run(median(), &single(&[5, 3, 1]))?);
        Ok(())
    }

    #[test]
    fn test_variance() -> Result<()> {
        let rows = single(&[2, 4, 4, 4, 5, 5, 7, 9]);
        let pop = run_split(var_pop(), &rows, 3)?.as_f64().unwrap_or_default();
        assert!((pop - 4.0).abs() < 1e-9);
        let std = run(stddev_pop(), &rows)?.as_f64().unwrap_or_default();
        assert!((std - 2.0).abs() < 1e-9);
        let sample = run_split(variance(), &rows, 4)?.as_f64().unwrap_or_default();
        assert!((sample - 32.0 / 7.0).abs() < 1e-9);
        assert_eq!(ScalarValue::Null, run(stddev(), &single(&[1]))?);
        Ok(())
    }

    #[test]
    fn test_covariance() -> Result<()> {
        let rows = [1i64, 2, 3, 4]
            .iter()
            .map(|x| ints(&[*x, 2 * x]))
            .collect::<Vec<_>>();
        // cov(x, 2x) = 2 var(x)
        let pop = run_split(covar_pop(), &rows, 1)?.as_f64().unwrap_or_default();
        assert!((pop - 2.5).abs() < 1e-9);
        let samp = run_split(covar_samp(), &rows, 2)?.as_f64().unwrap_or_default();
        assert!((samp - 10.0 / 3.0).abs() < 1e-9);
        Ok(())
    }
}
