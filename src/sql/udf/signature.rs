use crate::access::value::ColumnValue;
use crate::catalog::r#type::DataType;
use crate::error::Result;
use crate::parse_err;

/// The arguments a function accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Signature {
    /// One or more arguments with exactly the specified types in order.
    Exact(Vec<DataType>),
    /// A fixed number of arguments, each of one of the listed types.
    Uniform(usize, Vec<DataType>),
    /// A fixed number of arguments of any type.
    Any(usize),
    /// At least one argument of any type.
    VariadicAny,
    /// No arguments
    Nullary,
}

impl Signature {
    /// Check the argument types against the signature. `NULL` is accepted
    /// wherever a typed argument is.
    pub fn validate(&self, name: &str, arg_types: &[DataType]) -> Result<()> {
        let accepts = |t: &DataType, allowed: &DataType| *t == DataType::Null || t == allowed;
        let check_count = |n: usize| {
            if arg_types.len() != n {
                return Err(parse_err!(
                    "Function {} expects {} argument(s), got {}",
                    name,
                    n,
                    arg_types.len()
                ));
            }
            Ok(())
        };
        match self {
            Signature::Exact(types) => {
                check_count(types.len())?;
                for (t, allowed) in arg_types.iter().zip(types) {
                    if !accepts(t, allowed) {
                        return Err(parse_err!("Function {} expects {}, got {}", name, allowed, t));
                    }
                }
            }
            Signature::Uniform(n, types) => {
                check_count(*n)?;
                for t in arg_types {
                    if !types.iter().any(|allowed| accepts(t, allowed)) {
                        return Err(parse_err!(
                            "Function {} does not support argument type {}",
                            name,
                            t
                        ));
                    }
                }
            }
            Signature::Any(n) => check_count(*n)?,
            Signature::VariadicAny => {
                if arg_types.is_empty() {
                    return Err(parse_err!("Function {} expects at least one argument", name));
                }
            }
            Signature::Nullary => check_count(0)?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScalarFunctionArgs {
    /// The evaluated arguments to the function, one column value per
    /// argument. e.g.,
    /// -------------------
    /// row |  arg0 |  arg1
    /// --- |------ |------
    /// #1  |  val1 |  val2
    /// --- |------ |------
    /// #2  |  val3 |  val4
    pub args: Vec<ColumnValue>,
    /// The number of rows in record batch being evaluated,
    /// paired with the args.
    pub num_rows: usize,
}

impl ScalarFunctionArgs {
    pub fn new(args: Vec<ColumnValue>, num_rows: usize) -> Self {
        Self { args, num_rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let sig = Signature::Uniform(1, vec![DataType::Integer, DataType::Double]);
        assert!(sig.validate("abs", &[DataType::Double]).is_ok());
        assert!(sig.validate("abs", &[DataType::Null]).is_ok());
        assert!(sig.validate("abs", &[DataType::Utf8]).is_err());
        assert!(sig.validate("abs", &[]).is_err());
        assert!(Signature::Nullary.validate("f", &[DataType::Utf8]).is_err());
        assert!(Signature::VariadicAny.validate("coalesce", &[]).is_err());
    }
}
