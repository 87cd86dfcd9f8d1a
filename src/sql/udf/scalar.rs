use std::any::Any;
use std::fmt::Debug;

use crate::access::array::RecordArray;
use crate::access::value::ColumnValue;
use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::parse_err;
use crate::sql::plan::coercion::comparison_coercion;
use crate::sql::udf::signature::ScalarFunctionArgs;
use crate::sql::udf::signature::Signature;
use crate::value_err;

/// Trait for implementing user defined scalar functions.
pub trait ScalarUDF: Debug + Sync + Send {
    /// Returns this object as an [`Any`] trait object
    fn as_any(&self) -> &dyn Any;

    /// Returns this function's name.
    fn name(&self) -> &str;

    fn signature(&self) -> &Signature;

    /// Return the datatype this function returns given the input argument types.
    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType>;

    /// Invoke the function with batched args, returning one value per row.
    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> Result<ColumnValue>;
}

macro_rules! make_udf_function {
    ($UDF:ty, $NAME:ident) => {
        pub fn $NAME() -> std::sync::Arc<dyn ScalarUDF> {
            static INSTANCE: std::sync::LazyLock<std::sync::Arc<dyn ScalarUDF>> =
                std::sync::LazyLock::new(|| std::sync::Arc::new(<$UDF>::new()));
            std::sync::Arc::clone(&INSTANCE)
        }
    };
}

make_udf_function!(UpperFunc, upper);
make_udf_function!(LowerFunc, lower);
make_udf_function!(LengthFunc, length);
make_udf_function!(AbsFunc, abs);
make_udf_function!(CoalesceFunc, coalesce);

/// Apply `f` row by row, nulls in any argument producing a null.
fn map_rows<F>(args: ScalarFunctionArgs, datatype: &DataType, mut f: F) -> Result<ColumnValue>
where
    F: FnMut(&[ScalarValue]) -> Result<ScalarValue>,
{
    let mut out = RecordArray::new(datatype);
    for i in 0..args.num_rows {
        let row = args.args.iter().map(|a| a.value(i)).collect::<Vec<_>>();
        if row.iter().any(|v| v.is_null()) {
            out.push_null();
            continue;
        }
        out.push(f(&row)?)?;
    }
    Ok(ColumnValue::Array(out))
}

#[derive(Debug)]
pub struct UpperFunc {
    signature: Signature,
}

impl UpperFunc {
    pub fn new() -> Self {
        Self { signature: Signature::Exact(vec![DataType::Utf8]) }
    }
}

impl ScalarUDF for UpperFunc {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "upper"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(DataType::Utf8)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> Result<ColumnValue> {
        map_rows(args, &DataType::Utf8, |row| match &row[0] {
            ScalarValue::Utf8(s) => Ok(ScalarValue::Utf8(s.to_uppercase())),
            v => Err(value_err!("upper expects a string, got {}", v)),
        })
    }
}

#[derive(Debug)]
pub struct LowerFunc {
    signature: Signature,
}

impl LowerFunc {
    pub fn new() -> Self {
        Self { signature: Signature::Exact(vec![DataType::Utf8]) }
    }
}

impl ScalarUDF for LowerFunc {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "lower"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(DataType::Utf8)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> Result<ColumnValue> {
        map_rows(args, &DataType::Utf8, |row| match &row[0] {
            ScalarValue::Utf8(s) => Ok(ScalarValue::Utf8(s.to_lowercase())),
            v => Err(value_err!("lower expects a string, got {}", v)),
        })
    }
}

/// Number of characters of a string.
#[derive(Debug)]
pub struct LengthFunc {
    signature: Signature,
}

impl LengthFunc {
    pub fn new() -> Self {
        Self { signature: Signature::Exact(vec![DataType::Utf8]) }
    }
}

impl ScalarUDF for LengthFunc {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "length"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(DataType::Integer)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> Result<ColumnValue> {
        map_rows(args, &DataType::Integer, |row| match &row[0] {
            ScalarValue::Utf8(s) => Ok(ScalarValue::Int64(s.chars().count() as i64)),
            v => Err(value_err!("length expects a string, got {}", v)),
        })
    }
}

#[derive(Debug)]
pub struct AbsFunc {
    signature: Signature,
}

impl AbsFunc {
    pub fn new() -> Self {
        Self { signature: Signature::Uniform(1, vec![DataType::Integer, DataType::Double]) }
    }
}

impl ScalarUDF for AbsFunc {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "abs"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        Ok(arg_types[0].clone())
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> Result<ColumnValue> {
        let datatype = args.args.first().map(|a| a.datatype()).unwrap_or(DataType::Null);
        map_rows(args, &datatype, |row| match &row[0] {
            ScalarValue::Double(f) => Ok(ScalarValue::Double(f.abs())),
            v => match v.as_i64() {
                Some(i) => i
                    .checked_abs()
                    .map(ScalarValue::Int64)
                    .ok_or_else(|| value_err!("abs({}) overflows INTEGER", i)),
                None => Err(value_err!("abs expects a number, got {}", v)),
            },
        })
    }
}

/// The first non-null argument.
#[derive(Debug)]
pub struct CoalesceFunc {
    signature: Signature,
}

impl CoalesceFunc {
    pub fn new() -> Self {
        Self { signature: Signature::VariadicAny }
    }
}

impl ScalarUDF for CoalesceFunc {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "coalesce"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        self.signature.validate(self.name(), arg_types)?;
        let mut out = DataType::Null;
        for t in arg_types {
            out = comparison_coercion(&out, t).ok_or_else(|| {
                parse_err!("coalesce arguments have incompatible types {} and {}", out, t)
            })?;
        }
        Ok(out)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> Result<ColumnValue> {
        let arg_types = args.args.iter().map(|a| a.datatype()).collect::<Vec<_>>();
        let datatype = self.return_type(&arg_types)?;
        let mut out = RecordArray::new(&datatype);
        for i in 0..args.num_rows {
            let v = args.args.iter().map(|a| a.value(i)).find(|v| !v.is_null());
            out.push(v.unwrap_or(ScalarValue::Null))?;
        }
        Ok(ColumnValue::Array(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[Option<&str>]) -> ColumnValue {
        let values = values.iter().map(|v| ScalarValue::from(v.map(|s| s.to_string())));
        ColumnValue::Array(RecordArray::from_values(&DataType::Utf8, values).unwrap())
    }

    #[test]
    fn test_upper_lower_length() -> Result<()> {
        let args = ScalarFunctionArgs::new(vec![strings(&[Some("Steven"), None])], 2);
        let out = upper().invoke_with_args(args.clone())?;
        assert_eq!(ScalarValue::from("STEVEN"), out.value(0));
        assert_eq!(ScalarValue::Null, out.value(1));
        assert_eq!(ScalarValue::from("steven"), lower().invoke_with_args(args.clone())?.value(0));
        assert_eq!(ScalarValue::Int8(6), length().invoke_with_args(args)?.value(0));
        assert!(upper().return_type(&[DataType::Integer]).is_err());
        Ok(())
    }

    #[test]
    fn test_abs() -> Result<()> {
        let args = ScalarFunctionArgs::new(vec![ColumnValue::Scalar(ScalarValue::Int64(-3), 2)], 2);
        let out = abs().invoke_with_args(args)?;
        assert_eq!(ScalarValue::Int64(3), out.value(1));
        let args = ScalarFunctionArgs::new(vec![ColumnValue::Scalar(ScalarValue::Int64(i64::MIN), 1)], 1);
        assert!(abs().invoke_with_args(args).is_err());
        Ok(())
    }

    #[test]
    fn test_coalesce() -> Result<()> {
        assert_eq!(DataType::Double, coalesce().return_type(&[DataType::Null, DataType::Integer, DataType::Double])?);
        let args = ScalarFunctionArgs::new(
            vec![strings(&[None, Some("a")]), ColumnValue::Scalar(ScalarValue::from("b"), 2)],
            2,
        );
        let out = coalesce().invoke_with_args(args)?;
        assert_eq!(ScalarValue::from("b"), out.value(0));
        assert_eq!(ScalarValue::from("a"), out.value(1));
        Ok(())
    }
}
