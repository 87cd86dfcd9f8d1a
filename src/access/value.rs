use crate::access::array::RecordArray;
use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;

/// The result of evaluating an expression over a batch: either a value per
/// row or one value standing for every row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Array(RecordArray),
    /// A constant with the row count it stands for.
    Scalar(ScalarValue, usize),
}

impl ColumnValue {
    pub fn len(&self) -> usize {
        match self {
            ColumnValue::Array(a) => a.len(),
            ColumnValue::Scalar(_, n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn datatype(&self) -> DataType {
        match self {
            ColumnValue::Array(a) => a.datatype(),
            ColumnValue::Scalar(v, _) => v.datatype(),
        }
    }

    /// The value at row `i`.
    pub fn value(&self, i: usize) -> ScalarValue {
        match self {
            ColumnValue::Array(a) => a.value(i),
            ColumnValue::Scalar(v, _) => v.clone(),
        }
    }

    pub fn into_array(self) -> Result<RecordArray> {
        match self {
            ColumnValue::Array(a) => Ok(a),
            ColumnValue::Scalar(v, n) => RecordArray::from_scalar(&v, n),
        }
    }

    /// Materialize as an array of `datatype`, casting every value.
    pub fn into_array_of(self, datatype: &DataType) -> Result<RecordArray> {
        let array = self.into_array()?;
        if array.datatype() == *datatype {
            return Ok(array);
        }
        RecordArray::from_values(datatype, array.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_expands() -> Result<()> {
        let v = ColumnValue::Scalar(ScalarValue::Int64(7), 3);
        assert_eq!(3, v.len());
        assert_eq!(ScalarValue::Int64(7), v.value(2));
        let a = v.into_array_of(&DataType::Double)?;
        assert_eq!(DataType::Double, a.datatype());
        assert_eq!(ScalarValue::Double(7.0), a.value(0));
        Ok(())
    }
}
