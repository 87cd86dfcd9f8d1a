use crate::catalog::r#type::DataType;
use crate::error::Result;
use crate::parse_err;
use crate::sql::plan::expr::Operator;
use crate::unimplemented_err;

/// The operand and result types of a binary operator application.
#[derive(Debug, Clone, PartialEq)]
pub struct BinarySignature {
    /// Type the left operand is converted to before evaluation.
    pub lhs: DataType,
    /// Type the right operand is converted to before evaluation.
    pub rhs: DataType,
    /// Type of the whole expression.
    pub ret: DataType,
}

/// Decide the types a binary operator works on.
pub struct BinaryTypeCoercer<'a> {
    lhs: &'a DataType,
    op: &'a Operator,
    rhs: &'a DataType,
}

impl<'a> BinaryTypeCoercer<'a> {
    pub fn new(lhs: &'a DataType, op: &'a Operator, rhs: &'a DataType) -> Self {
        Self { lhs, op, rhs }
    }

    pub fn get_result_type(&self) -> Result<DataType> {
        self.signature().map(|s| s.ret)
    }

    pub fn get_input_types(&self) -> Result<(DataType, DataType)> {
        self.signature().map(|s| (s.lhs, s.rhs))
    }

    pub fn signature(&self) -> Result<BinarySignature> {
        let (lhs, op, rhs) = (self.lhs, self.op, self.rhs);
        if op.is_bitwise() {
            let t = bitwise_coercion(lhs, rhs);
            return Ok(BinarySignature { lhs: t.clone(), rhs: t.clone(), ret: t });
        }
        if op.is_logic() {
            return match (lhs, rhs) {
                (DataType::Boolean | DataType::Null, DataType::Boolean | DataType::Null) => {
                    Ok(BinarySignature {
                        lhs: DataType::Boolean,
                        rhs: DataType::Boolean,
                        ret: DataType::Boolean,
                    })
                }
                _ => Err(parse_err!(
                    "Cannot infer common argument type for logical boolean operation {} {} {}",
                    lhs,
                    op,
                    rhs
                )),
            };
        }
        if op.is_comparison() {
            return match comparison_coercion(lhs, rhs) {
                Some(t) => Ok(BinarySignature { lhs: t.clone(), rhs: t, ret: DataType::Boolean }),
                None => Err(unimplemented_err!(
                    "Unsupported coercion for comparison {} {} {}",
                    lhs,
                    op,
                    rhs
                )),
            };
        }
        if let Operator::StringConcat = op {
            return Ok(BinarySignature {
                lhs: DataType::Utf8,
                rhs: DataType::Utf8,
                ret: DataType::Utf8,
            });
        }
        match arithmetic_coercion(lhs, rhs) {
            Some(t) => Ok(BinarySignature { lhs: t.clone(), rhs: t.clone(), ret: t }),
            None => Err(unimplemented_err!(
                "Unsupported coercion for arithmetic {} {} {}",
                lhs,
                op,
                rhs
            )),
        }
    }
}

/// Bitwise operators need numbers on both sides, anything else is treated
/// as text.
fn bitwise_coercion(lhs: &DataType, rhs: &DataType) -> DataType {
    match (lhs, rhs) {
        (DataType::Null, t) | (t, DataType::Null) if t.is_numeric() => t.clone(),
        _ => numeric_coercion(lhs, rhs).unwrap_or(DataType::Utf8),
    }
}

fn arithmetic_coercion(lhs: &DataType, rhs: &DataType) -> Option<DataType> {
    match (lhs, rhs) {
        (DataType::Null, DataType::Null) => Some(DataType::Null),
        (DataType::Null, t) | (t, DataType::Null) if t.is_numeric() => Some(t.clone()),
        _ => numeric_coercion(lhs, rhs),
    }
}

/// The common type two values are compared in. Each step of the chain
/// returns `None` when it does not apply so the next one can try.
pub fn comparison_coercion(lhs: &DataType, rhs: &DataType) -> Option<DataType> {
    if lhs == rhs {
        return Some(lhs.clone());
    }
    match (lhs, rhs) {
        (DataType::Null, t) | (t, DataType::Null) => Some(t.clone()),
        _ => numeric_coercion(lhs, rhs)
            .or_else(|| temporal_coercion(lhs, rhs))
            .or_else(|| string_coercion(lhs, rhs)),
    }
}

/// Double wins over Integer.
pub fn numeric_coercion(lhs: &DataType, rhs: &DataType) -> Option<DataType> {
    match (lhs, rhs) {
        (DataType::Integer, DataType::Integer) => Some(DataType::Integer),
        (DataType::Double, DataType::Integer | DataType::Double)
        | (DataType::Integer, DataType::Double) => Some(DataType::Double),
        _ => None,
    }
}

fn temporal_coercion(lhs: &DataType, rhs: &DataType) -> Option<DataType> {
    match (lhs, rhs) {
        (DataType::Date, DataType::Timestamp) | (DataType::Timestamp, DataType::Date) => {
            Some(DataType::Timestamp)
        }
        (DataType::Utf8, t) | (t, DataType::Utf8) if t.is_temporal() => Some(t.clone()),
        _ => None,
    }
}

fn string_coercion(lhs: &DataType, rhs: &DataType) -> Option<DataType> {
    match (lhs, rhs) {
        (DataType::Utf8, DataType::List(_)) | (DataType::List(_), DataType::Utf8) => None,
        (DataType::Utf8, _) | (_, DataType::Utf8) => Some(DataType::Utf8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn result_type(lhs: DataType, op: Operator, rhs: DataType) -> Result<DataType> {
        BinaryTypeCoercer::new(&lhs, &op, &rhs).get_result_type()
    }

    #[test]
    fn test_arithmetic() -> Result<()> {
        assert_eq!(DataType::Double, result_type(DataType::Integer, Operator::Plus, DataType::Double)?);
        assert_eq!(DataType::Integer, result_type(DataType::Integer, Operator::Modulo, DataType::Integer)?);
        assert_eq!(DataType::Integer, result_type(DataType::Null, Operator::Minus, DataType::Integer)?);
        assert!(matches!(
            result_type(DataType::Integer, Operator::Multiply, DataType::Utf8),
            Err(Error::Unimplemented(_))
        ));
        assert!(result_type(DataType::Boolean, Operator::Plus, DataType::Boolean).is_err());
        Ok(())
    }

    #[test]
    fn test_comparison_is_boolean() -> Result<()> {
        let lhs = DataType::Integer;
        let rhs = DataType::Double;
        let op = Operator::Lt;
        let coercer = BinaryTypeCoercer::new(&lhs, &op, &rhs);
        assert_eq!(DataType::Boolean, coercer.get_result_type()?);
        assert_eq!((DataType::Double, DataType::Double), coercer.get_input_types()?);

        assert_eq!(DataType::Boolean, result_type(DataType::Utf8, Operator::Eq, DataType::Date)?);
        assert_eq!(
            Some(DataType::Date),
            comparison_coercion(&DataType::Utf8, &DataType::Date)
        );
        assert_eq!(
            Some(DataType::Timestamp),
            comparison_coercion(&DataType::Date, &DataType::Timestamp)
        );
        assert_eq!(Some(DataType::Utf8), comparison_coercion(&DataType::Integer, &DataType::Utf8));
        Ok(())
    }

    #[test]
    fn test_comparison_failure() {
        assert!(matches!(
            result_type(DataType::Boolean, Operator::Eq, DataType::Integer),
            Err(Error::Unimplemented(_))
        ));
        assert!(result_type(DataType::Date, Operator::Gt, DataType::Double).is_err());
        assert_eq!(None, comparison_coercion(&DataType::Boolean, &DataType::Date));
    }

    #[test]
    fn test_logic() -> Result<()> {
        assert_eq!(DataType::Boolean, result_type(DataType::Boolean, Operator::And, DataType::Null)?);
        assert!(matches!(
            result_type(DataType::Boolean, Operator::Or, DataType::Integer),
            Err(Error::Parse(_))
        ));
        Ok(())
    }

    #[test]
    fn test_bitwise() -> Result<()> {
        assert_eq!(DataType::Integer, result_type(DataType::Integer, Operator::BitwiseAnd, DataType::Integer)?);
        assert_eq!(DataType::Utf8, result_type(DataType::Utf8, Operator::BitwiseOr, DataType::Integer)?);
        assert_eq!(DataType::Utf8, result_type(DataType::Boolean, Operator::BitwiseXor, DataType::Boolean)?);
        Ok(())
    }
}
