use std::fmt::Display;
use std::fmt::Formatter;

use chrono::NaiveDate;
use chrono::NaiveDateTime;

use crate::catalog::r#type::DataType;
use crate::catalog::r#type::ScalarValue;
use crate::error::Error;
use crate::error::Result;
use crate::internal_err;
use crate::value_err;

/// Storage width of an integer [`RecordArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntegerWidth {
    Byte,
    Short,
    Int,
    Long,
}

impl IntegerWidth {
    /// The narrowest width able to hold `v`.
    pub fn of(v: i64) -> IntegerWidth {
        if i8::try_from(v).is_ok() {
            IntegerWidth::Byte
        } else if i16::try_from(v).is_ok() {
            IntegerWidth::Short
        } else if i32::try_from(v).is_ok() {
            IntegerWidth::Int
        } else {
            IntegerWidth::Long
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ArrayData {
    /// An array of nulls whose type is not known yet.
    Null(usize),
    Boolean(Vec<Option<bool>>),
    Int8(Vec<Option<i8>>),
    Int16(Vec<Option<i16>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Double(Vec<Option<f64>>),
    Utf8(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
    List(Vec<Option<Vec<ScalarValue>>>),
}

/// Rebuild the same kind of storage, mapping the nulls-only length with
/// `$null` and the typed values `$v` with `$body`.
macro_rules! map_data {
    ($data:expr, $n:ident => $null:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Null($n) => ArrayData::Null($null),
            ArrayData::Boolean($v) => ArrayData::Boolean($body),
            ArrayData::Int8($v) => ArrayData::Int8($body),
            ArrayData::Int16($v) => ArrayData::Int16($body),
            ArrayData::Int32($v) => ArrayData::Int32($body),
            ArrayData::Int64($v) => ArrayData::Int64($body),
            ArrayData::Double($v) => ArrayData::Double($body),
            ArrayData::Utf8($v) => ArrayData::Utf8($body),
            ArrayData::Date($v) => ArrayData::Date($body),
            ArrayData::Timestamp($v) => ArrayData::Timestamp($body),
            ArrayData::List($v) => ArrayData::List($body),
        }
    };
}

/// Apply `$body` to the typed values `$v`, or evaluate `$null` for a
/// nulls-only array.
macro_rules! with_data {
    ($data:expr, $n:ident => $null:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Null($n) => $null,
            ArrayData::Boolean($v) => $body,
            ArrayData::Int8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::Double($v) => $body,
            ArrayData::Utf8($v) => $body,
            ArrayData::Date($v) => $body,
            ArrayData::Timestamp($v) => $body,
            ArrayData::List($v) => $body,
        }
    };
}

/// A growable, nullable, typed column.
///
/// Integer columns are stored in the narrowest width seen so far and widen
/// (`byte -> short -> int -> long`) when a value does not fit, keeping the
/// values already stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordArray {
    data: ArrayData,
}

impl RecordArray {
    pub fn new(datatype: &DataType) -> Self {
        let data = match datatype {
            DataType::Null => ArrayData::Null(0),
            DataType::Boolean => ArrayData::Boolean(vec![]),
            DataType::Integer => ArrayData::Int8(vec![]),
            DataType::Double => ArrayData::Double(vec![]),
            DataType::Utf8 => ArrayData::Utf8(vec![]),
            DataType::Date => ArrayData::Date(vec![]),
            DataType::Timestamp => ArrayData::Timestamp(vec![]),
            DataType::List(_) => ArrayData::List(vec![]),
        };
        Self { data }
    }

    /// `n` nulls of the given type.
    pub fn new_null(datatype: &DataType, n: usize) -> Self {
        let data = match datatype {
            DataType::Null => ArrayData::Null(n),
            DataType::Boolean => ArrayData::Boolean(vec![None; n]),
            DataType::Integer => ArrayData::Int8(vec![None; n]),
            DataType::Double => ArrayData::Double(vec![None; n]),
            DataType::Utf8 => ArrayData::Utf8(vec![None; n]),
            DataType::Date => ArrayData::Date(vec![None; n]),
            DataType::Timestamp => ArrayData::Timestamp(vec![None; n]),
            DataType::List(_) => ArrayData::List(vec![None; n]),
        };
        Self { data }
    }

    pub fn from_values(
        datatype: &DataType,
        values: impl IntoIterator<Item = ScalarValue>,
    ) -> Result<Self> {
        let mut array = Self::new(datatype);
        for v in values {
            array.push(v)?;
        }
        Ok(array)
    }

    /// `value` repeated `n` times.
    pub fn from_scalar(value: &ScalarValue, n: usize) -> Result<Self> {
        Self::from_values(&value.datatype(), std::iter::repeat(value.clone()).take(n))
    }

    pub fn datatype(&self) -> DataType {
        match &self.data {
            ArrayData::Null(_) => DataType::Null,
            ArrayData::Boolean(_) => DataType::Boolean,
            ArrayData::Int8(_) | ArrayData::Int16(_) | ArrayData::Int32(_) | ArrayData::Int64(_) => {
                DataType::Integer
            }
            ArrayData::Double(_) => DataType::Double,
            ArrayData::Utf8(_) => DataType::Utf8,
            ArrayData::Date(_) => DataType::Date,
            ArrayData::Timestamp(_) => DataType::Timestamp,
            ArrayData::List(values) => {
                let inner = values
                    .iter()
                    .flatten()
                    .flatten()
                    .map(|v| v.datatype())
                    .find(|t| *t != DataType::Null)
                    .unwrap_or(DataType::Null);
                DataType::List(Box::new(inner))
            }
        }
    }

    /// The storage width of an integer array, `None` for other types.
    pub fn integer_width(&self) -> Option<IntegerWidth> {
        match &self.data {
            ArrayData::Int8(_) => Some(IntegerWidth::Byte),
            ArrayData::Int16(_) => Some(IntegerWidth::Short),
            ArrayData::Int32(_) => Some(IntegerWidth::Int),
            ArrayData::Int64(_) => Some(IntegerWidth::Long),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        with_data!(&self.data, n => *n, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, i: usize) -> bool {
        with_data!(&self.data, _n => true, v => v.get(i).map_or(true, |x| x.is_none()))
    }

    pub fn null_count(&self) -> usize {
        with_data!(&self.data, n => *n, v => v.iter().filter(|x| x.is_none()).count())
    }

    /// The value at row `i`, `Null` for null slots and out of range rows.
    pub fn value(&self, i: usize) -> ScalarValue {
        let v = match &self.data {
            ArrayData::Null(_) => None,
            ArrayData::Boolean(v) => v.get(i).cloned().flatten().map(ScalarValue::Boolean),
            ArrayData::Int8(v) => v.get(i).cloned().flatten().map(ScalarValue::Int8),
            ArrayData::Int16(v) => v.get(i).cloned().flatten().map(ScalarValue::Int16),
            ArrayData::Int32(v) => v.get(i).cloned().flatten().map(ScalarValue::Int32),
            ArrayData::Int64(v) => v.get(i).cloned().flatten().map(ScalarValue::Int64),
            ArrayData::Double(v) => v.get(i).cloned().flatten().map(ScalarValue::Double),
            ArrayData::Utf8(v) => v.get(i).cloned().flatten().map(ScalarValue::Utf8),
            ArrayData::Date(v) => v.get(i).cloned().flatten().map(ScalarValue::Date),
            ArrayData::Timestamp(v) => v.get(i).cloned().flatten().map(ScalarValue::Timestamp),
            ArrayData::List(v) => v.get(i).cloned().flatten().map(ScalarValue::List),
        };
        v.unwrap_or(ScalarValue::Null)
    }

    pub fn iter(&self) -> impl Iterator<Item = ScalarValue> + '_ {
        (0..self.len()).map(|i| self.value(i))
    }

    pub fn push_null(&mut self) {
        with_data!(&mut self.data, n => *n += 1, v => v.push(None))
    }

    /// Append a value. Values of another type are cast to the array type, a
    /// nulls-only array takes the type of the first non-null value.
    pub fn push(&mut self, value: ScalarValue) -> Result<()> {
        if value.is_null() {
            self.push_null();
            return Ok(());
        }
        if let ArrayData::Null(n) = self.data {
            *self = Self::new_null(&value.datatype(), n);
        }
        let datatype = self.datatype();
        let value = match (&datatype, value.datatype()) {
            (DataType::List(_), DataType::List(_)) => value,
            (t, vt) if *t == vt => value,
            (t, _) => value.cast_to(t)?,
        };
        if let Some(i) = value.as_i64() {
            self.push_integer(i);
            return Ok(());
        }
        match (&mut self.data, value) {
            (ArrayData::Boolean(v), ScalarValue::Boolean(b)) => v.push(Some(b)),
            (ArrayData::Double(v), ScalarValue::Double(f)) => v.push(Some(f)),
            (ArrayData::Utf8(v), ScalarValue::Utf8(s)) => v.push(Some(s)),
            (ArrayData::Date(v), ScalarValue::Date(d)) => v.push(Some(d)),
            (ArrayData::Timestamp(v), ScalarValue::Timestamp(ts)) => v.push(Some(ts)),
            (ArrayData::List(v), ScalarValue::List(l)) => v.push(Some(l)),
            (_, value) => {
                return Err(internal_err!("Can't push {} into a {} array", value, datatype));
            }
        }
        Ok(())
    }

    fn push_integer(&mut self, i: i64) {
        let width = IntegerWidth::of(i);
        if self.integer_width().is_some_and(|w| w < width) {
            self.widen(width);
        }
        // the width now fits the value, so the conversions below are lossless
        match &mut self.data {
            ArrayData::Int8(v) => v.push(Some(i as i8)),
            ArrayData::Int16(v) => v.push(Some(i as i16)),
            ArrayData::Int32(v) => v.push(Some(i as i32)),
            ArrayData::Int64(v) => v.push(Some(i)),
            _ => {}
        }
    }

    fn widen(&mut self, width: IntegerWidth) {
        let values: Vec<Option<i64>> = match &self.data {
            ArrayData::Int8(v) => v.iter().map(|x| x.map(i64::from)).collect(),
            ArrayData::Int16(v) => v.iter().map(|x| x.map(i64::from)).collect(),
            ArrayData::Int32(v) => v.iter().map(|x| x.map(i64::from)).collect(),
            _ => return,
        };
        self.data = match width {
            IntegerWidth::Byte => ArrayData::Int8(values.iter().map(|x| x.map(|x| x as i8)).collect()),
            IntegerWidth::Short => {
                ArrayData::Int16(values.iter().map(|x| x.map(|x| x as i16)).collect())
            }
            IntegerWidth::Int => ArrayData::Int32(values.iter().map(|x| x.map(|x| x as i32)).collect()),
            IntegerWidth::Long => ArrayData::Int64(values),
        };
    }

    /// Gather rows by index, `None` producing a null row.
    pub fn take(&self, indices: &[Option<usize>]) -> Result<Self> {
        let len = self.len();
        if let Some(i) = indices.iter().flatten().find(|i| **i >= len) {
            return Err(internal_err!("Take index {} out of range for {} rows", i, len));
        }
        let data = map_data!(
            &self.data,
            _n => indices.len(),
            v => indices.iter().map(|i| i.and_then(|i| v[i].clone())).collect()
        );
        Ok(Self { data })
    }

    /// Keep the rows where `mask` is true. Null mask slots drop the row.
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(internal_err!(
                "Filter mask has {} rows, array has {}",
                mask.len(),
                self.len()
            ));
        }
        let data = map_data!(
            &self.data,
            _n => mask.iter().filter(|m| **m).count(),
            v => v.iter().zip(mask).filter(|(_, m)| **m).map(|(x, _)| x.clone()).collect()
        );
        Ok(Self { data })
    }

    /// The `len` rows starting at `offset`, which must lie within the array.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self> {
        let end = match offset.checked_add(len) {
            Some(end) if end <= self.len() => end,
            _ => {
                return Err(value_err!(
                    "Slice of {} rows at offset {} out of range for {} rows",
                    len,
                    offset,
                    self.len()
                ))
            }
        };
        let data = map_data!(&self.data, _n => len, v => v[offset..end].to_vec());
        Ok(Self { data })
    }

    /// Append every row of `other`.
    pub fn append(&mut self, other: &RecordArray) -> Result<()> {
        for v in other.iter() {
            self.push(v)?;
        }
        Ok(())
    }

    pub fn concat(datatype: &DataType, arrays: &[&RecordArray]) -> Result<Self> {
        let mut out = Self::new(datatype);
        for a in arrays {
            out.append(a)?;
        }
        Ok(out)
    }

    /// Interpret the array as a predicate result, nulls being false.
    pub fn as_mask(&self) -> Result<Vec<bool>> {
        match &self.data {
            ArrayData::Boolean(v) => Ok(v.iter().map(|b| b.unwrap_or(false)).collect()),
            ArrayData::Null(n) => Ok(vec![false; *n]),
            _ => Err(Error::internal(format!(
                "Expect a BOOLEAN array as predicate, got {}",
                self.datatype()
            ))),
        }
    }
}

impl Display for RecordArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let values = self.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        write!(f, "[{}]", values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upcast_keeps_values() -> Result<()> {
        let mut a = RecordArray::new(&DataType::Integer);
        a.push(ScalarValue::Int64(1))?;
        a.push_null();
        a.push(ScalarValue::Int64(-128))?;
        assert_eq!(Some(IntegerWidth::Byte), a.integer_width());

        a.push(ScalarValue::Int64(40_000))?;
        assert_eq!(Some(IntegerWidth::Int), a.integer_width());
        a.push(ScalarValue::Int64(i64::MAX))?;
        assert_eq!(Some(IntegerWidth::Long), a.integer_width());

        let values = a.iter().collect::<Vec<_>>();
        assert_eq!(
            vec![
                ScalarValue::Int64(1),
                ScalarValue::Null,
                ScalarValue::Int64(-128),
                ScalarValue::Int64(40_000),
                ScalarValue::Int64(i64::MAX),
            ],
            values
        );
        assert_eq!(DataType::Integer, a.datatype());
        Ok(())
    }

    #[test]
    fn test_short_width() -> Result<()> {
        let a = RecordArray::from_values(&DataType::Integer, vec![ScalarValue::Int64(300)])?;
        assert_eq!(Some(IntegerWidth::Short), a.integer_width());
        assert_eq!(ScalarValue::Int16(300), a.value(0));
        Ok(())
    }

    #[test]
    fn test_null_array_takes_type() -> Result<()> {
        let mut a = RecordArray::new(&DataType::Null);
        a.push_null();
        a.push(ScalarValue::from("x"))?;
        assert_eq!(DataType::Utf8, a.datatype());
        assert!(a.is_null(0));
        assert_eq!(ScalarValue::from("x"), a.value(1));
        Ok(())
    }

    #[test]
    fn test_push_casts() -> Result<()> {
        let mut a = RecordArray::new(&DataType::Double);
        a.push(ScalarValue::Int8(2))?;
        assert_eq!(ScalarValue::Double(2.0), a.value(0));
        assert!(a.push(ScalarValue::from("nope")).is_err());
        Ok(())
    }

    #[test]
    fn test_take_filter_slice() -> Result<()> {
        let a = RecordArray::from_values(
            &DataType::Utf8,
            vec![ScalarValue::from("a"), ScalarValue::from("b"), ScalarValue::Null, ScalarValue::from("d")],
        )?;
        let t = a.take(&[Some(3), None, Some(0)])?;
        assert_eq!("['d', NULL, 'a']", t.to_string());
        assert!(a.take(&[Some(4)]).is_err());

        let f = a.filter(&[true, false, true, true])?;
        assert_eq!(3, f.len());
        assert_eq!(1, f.null_count());

        let s = a.slice(1, 3)?;
        assert_eq!("['b', NULL, 'd']", s.to_string());
        assert_eq!(0, a.slice(4, 0)?.len());
        assert!(matches!(a.slice(1, 10), Err(crate::error::Error::Value(_))));
        assert!(matches!(a.slice(2, usize::MAX), Err(crate::error::Error::Value(_))));
        Ok(())
    }
}
