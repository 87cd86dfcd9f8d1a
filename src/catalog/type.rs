use std::cmp::Ordering;
use std::hash::Hash;
use std::hash::Hasher;

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::unimplemented_err;
use crate::value_err;

/// A logical column datatype. Every integer width shares `Integer`, the
/// concrete width only matters to the storage of a `RecordArray`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    Double,
    Utf8,
    Date,
    Timestamp,
    Null,
    /// Only used for intermediate aggregate state.
    List(Box<DataType>),
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Double)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }

    pub fn can_cast_to(&self, to: &DataType) -> bool {
        if self == to {
            return true;
        }
        match (self, to) {
            (DataType::Null, _) => true,
            (DataType::Boolean, DataType::Integer | DataType::Double | DataType::Utf8) => true,
            (DataType::Integer, DataType::Boolean | DataType::Double | DataType::Utf8) => true,
            (DataType::Double, DataType::Boolean | DataType::Integer | DataType::Utf8) => true,
            (DataType::Utf8, DataType::List(_)) => false,
            (DataType::Utf8, _) => true,
            (DataType::Date, DataType::Timestamp | DataType::Utf8) => true,
            (DataType::Timestamp, DataType::Date | DataType::Utf8) => true,
            _ => false,
        }
    }
}

impl Default for DataType {
    fn default() -> Self {
        Self::Utf8
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::Integer => f.write_str("INTEGER"),
            Self::Double => f.write_str("DOUBLE"),
            Self::Utf8 => f.write_str("UTF8"),
            Self::Date => f.write_str("DATE"),
            Self::Timestamp => f.write_str("TIMESTAMP"),
            Self::Null => f.write_str("NULL"),
            Self::List(inner) => write!(f, "LIST<{}>", inner),
        }
    }
}

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

/// A single typed value. It is the payload of literals and the unit of
/// accumulator state.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Utf8(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    List(Vec<ScalarValue>),
}

impl ScalarValue {
    pub fn datatype(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int8(_)
            | ScalarValue::Int16(_)
            | ScalarValue::Int32(_)
            | ScalarValue::Int64(_) => DataType::Integer,
            ScalarValue::Double(_) => DataType::Double,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Date(_) => DataType::Date,
            ScalarValue::Timestamp(_) => DataType::Timestamp,
            ScalarValue::List(values) => {
                let inner = values
                    .iter()
                    .map(|v| v.datatype())
                    .find(|t| *t != DataType::Null)
                    .unwrap_or(DataType::Null);
                DataType::List(Box::new(inner))
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// The value widened to 64 bits, whatever integer width it is stored in.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int8(v) => Some(*v as i64),
            ScalarValue::Int16(v) => Some(*v as i64),
            ScalarValue::Int32(v) => Some(*v as i64),
            ScalarValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Double(v) => Some(*v),
            v => v.as_i64().map(|i| i as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// A typed null for the given datatype. Nulls are untyped, so this is
    /// always `ScalarValue::Null`, kept for readability at call sites.
    pub fn null_of(_datatype: &DataType) -> ScalarValue {
        ScalarValue::Null
    }

    pub fn cast_to(&self, to: &DataType) -> Result<ScalarValue> {
        if self.datatype() == *to {
            return Ok(self.clone());
        }
        let value = match (self, to) {
            (ScalarValue::Null, _) => ScalarValue::Null,
            (ScalarValue::Boolean(b), DataType::Integer) => ScalarValue::Int64(*b as i64),
            (ScalarValue::Boolean(b), DataType::Double) => ScalarValue::Double(*b as i64 as f64),
            (ScalarValue::Boolean(b), DataType::Utf8) => ScalarValue::Utf8(b.to_string()),
            (
                ScalarValue::Int8(_)
                | ScalarValue::Int16(_)
                | ScalarValue::Int32(_)
                | ScalarValue::Int64(_),
                _,
            ) => {
                let i = self.as_i64().unwrap_or_default();
                match to {
                    DataType::Boolean => ScalarValue::Boolean(i != 0),
                    DataType::Double => ScalarValue::Double(i as f64),
                    DataType::Utf8 => ScalarValue::Utf8(i.to_string()),
                    _ => return Err(unimplemented_err!("Can't cast {} to {}", self, to)),
                }
            }
            (ScalarValue::Double(f), DataType::Boolean) => ScalarValue::Boolean(*f != 0.0),
            (ScalarValue::Double(f), DataType::Integer) => {
                if !f.is_finite() || *f < i64::MIN as f64 || *f > i64::MAX as f64 {
                    return Err(value_err!("{} is out of range for INTEGER", f));
                }
                ScalarValue::Int64(f.trunc() as i64)
            }
            (ScalarValue::Double(f), DataType::Utf8) => ScalarValue::Utf8(f.to_string()),
            (ScalarValue::Utf8(s), DataType::Boolean) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" => ScalarValue::Boolean(true),
                "false" | "f" | "0" => ScalarValue::Boolean(false),
                _ => return Err(value_err!("Can't cast '{}' to BOOLEAN", s)),
            },
            (ScalarValue::Utf8(s), DataType::Integer) => s
                .trim()
                .parse::<i64>()
                .map(ScalarValue::Int64)
                .map_err(|err| value_err!("Can't cast '{}' to INTEGER: {}", s, err))?,
            (ScalarValue::Utf8(s), DataType::Double) => s
                .trim()
                .parse::<f64>()
                .map(ScalarValue::Double)
                .map_err(|err| value_err!("Can't cast '{}' to DOUBLE: {}", s, err))?,
            (ScalarValue::Utf8(s), DataType::Date) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(ScalarValue::Date)
                .map_err(|err| value_err!("Can't cast '{}' to DATE: {}", s, err))?,
            (ScalarValue::Utf8(s), DataType::Timestamp) => ScalarValue::Timestamp(parse_timestamp(s)?),
            (ScalarValue::Date(d), DataType::Timestamp) => {
                ScalarValue::Timestamp(d.and_hms_opt(0, 0, 0).unwrap_or_default())
            }
            (ScalarValue::Date(d), DataType::Utf8) => ScalarValue::Utf8(d.format("%Y-%m-%d").to_string()),
            (ScalarValue::Timestamp(ts), DataType::Date) => ScalarValue::Date(ts.date()),
            (ScalarValue::Timestamp(ts), DataType::Utf8) => {
                ScalarValue::Utf8(ts.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            (_, typ) => return Err(unimplemented_err!("Can't cast {} to {}", self, typ)),
        };
        Ok(value)
    }

    fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            ScalarValue::Timestamp(ts) => Some(*ts),
            ScalarValue::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ts);
        }
    }
    match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        Ok(d) => Ok(d.and_hms_opt(0, 0, 0).unwrap_or_default()),
        Err(err) => Err(value_err!("Can't cast '{}' to TIMESTAMP: {}", s, err)),
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Double(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Utf8(v)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ScalarValue::Null)
    }
}

impl Eq for ScalarValue {}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScalarValue::Null, ScalarValue::Null) => true,
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a == b,
            (ScalarValue::Double(a), ScalarValue::Double(b)) => {
                // NaN equals NaN so grouping and joining stay reflexive
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b
                }
            }
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => a == b,
            (ScalarValue::Date(a), ScalarValue::Date(b)) => a == b,
            (ScalarValue::Timestamp(a), ScalarValue::Timestamp(b)) => a == b,
            (ScalarValue::Date(_), ScalarValue::Timestamp(_))
            | (ScalarValue::Timestamp(_), ScalarValue::Date(_)) => {
                self.as_timestamp() == other.as_timestamp()
            }
            (ScalarValue::List(a), ScalarValue::List(b)) => a == b,
            (a, b) => match (a.as_i64(), b.as_i64()) {
                // integers compare by value regardless of stored width
                (Some(a), Some(b)) => a == b,
                (Some(a), None) => matches!(b, ScalarValue::Double(b) if exact_i64(*b) == Some(a)),
                (None, Some(b)) => matches!(a, ScalarValue::Double(a) if exact_i64(*a) == Some(b)),
                (None, None) => false,
            },
        }
    }
}

fn exact_i128(v: &ScalarValue) -> Option<i128> {
    match v {
        ScalarValue::Double(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i128),
        v => v.as_i64().map(i128::from),
    }
}

/// The integer a double holds exactly, if any. Equality and hashing of
/// mixed integers and doubles both go through it.
fn exact_i64(f: f64) -> Option<i64> {
    // 2^63 itself is out of range, `as` would saturate it to i64::MAX.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }

        match (self, other) {
            (ScalarValue::Null, _) => Some(Ordering::Less),
            (_, ScalarValue::Null) => Some(Ordering::Greater),
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.partial_cmp(b),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => a.partial_cmp(b),
            (ScalarValue::Date(a), ScalarValue::Date(b)) => a.partial_cmp(b),
            (ScalarValue::Date(_) | ScalarValue::Timestamp(_), ScalarValue::Date(_) | ScalarValue::Timestamp(_)) => {
                self.as_timestamp().partial_cmp(&other.as_timestamp())
            }
            (ScalarValue::List(a), ScalarValue::List(b)) => a.partial_cmp(b),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => match (a.as_f64(), b.as_f64()) {
                    // Large integers round when widened, the exact values
                    // break the tie.
                    (Some(x), Some(y)) => match x.partial_cmp(&y) {
                        Some(Ordering::Equal) => exact_i128(a).partial_cmp(&exact_i128(b)),
                        ord => ord,
                    },
                    _ => None,
                },
            },
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ScalarValue::Null => {
                0u8.hash(state);
            }
            ScalarValue::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            ScalarValue::Int8(_) | ScalarValue::Int16(_) | ScalarValue::Int32(_) | ScalarValue::Int64(_) => {
                2u8.hash(state);
                self.as_i64().hash(state);
            }
            ScalarValue::Double(f) => match exact_i64(*f) {
                // integral doubles hash like the integer they are equal to
                Some(i) => {
                    2u8.hash(state);
                    Some(i).hash(state);
                }
                None => {
                    3u8.hash(state);
                    let f = if f.is_nan() { f64::NAN } else { *f };
                    f.to_bits().hash(state);
                }
            },
            ScalarValue::Utf8(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            ScalarValue::Date(_) | ScalarValue::Timestamp(_) => {
                5u8.hash(state);
                self.as_timestamp().hash(state);
            }
            ScalarValue::List(values) => {
                6u8.hash(state);
                values.hash(state);
            }
        }
    }
}

impl Default for ScalarValue {
    fn default() -> Self {
        ScalarValue::Null
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ans = match self {
            ScalarValue::Null => "NULL".to_string(),
            ScalarValue::Boolean(b) if *b => "TRUE".to_string(),
            ScalarValue::Boolean(_) => "FALSE".to_string(),
            ScalarValue::Int8(i) => i.to_string(),
            ScalarValue::Int16(i) => i.to_string(),
            ScalarValue::Int32(i) => i.to_string(),
            ScalarValue::Int64(i) => i.to_string(),
            ScalarValue::Double(v) => format!("{:.2}", v),
            ScalarValue::Utf8(s) => format!("'{}'", s),
            ScalarValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            ScalarValue::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
            ScalarValue::List(values) => {
                let values = values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                format!("[{}]", values.join(", "))
            }
        };
        // Use pad to work with formatting flags.
        f.pad(&ans)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash_of(v: &ScalarValue) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_integer_widths_are_equal() {
        let a = ScalarValue::Int8(42);
        let b = ScalarValue::Int64(42);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(DataType::Integer, a.datatype());
        assert_ne!(ScalarValue::Int16(300), ScalarValue::Int32(301));
    }

    #[test]
    fn test_integral_double_matches_integer() {
        let a = ScalarValue::Double(7.0);
        let b = ScalarValue::Int32(7);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(ScalarValue::Double(7.5), b);
        assert_eq!(ScalarValue::Double(-0.0), ScalarValue::Int64(0));
        assert_eq!(hash_of(&ScalarValue::Double(-0.0)), hash_of(&ScalarValue::Int64(0)));
    }

    #[test]
    fn test_large_integer_against_double() {
        // 2^53 + 1 widens to the double 2^53.
        let big = ScalarValue::Int64((1 << 53) + 1);
        let rounded = ScalarValue::Double(9_007_199_254_740_992.0);
        assert_ne!(big, rounded);
        assert_eq!(Some(Ordering::Greater), big.partial_cmp(&rounded));
        assert_eq!(ScalarValue::Int64(1 << 53), rounded);
        assert_eq!(hash_of(&ScalarValue::Int64(1 << 53)), hash_of(&rounded));

        // 2^63 does not fit an i64.
        let edge = ScalarValue::Double(9_223_372_036_854_775_808.0);
        assert_ne!(ScalarValue::Int64(i64::MAX), edge);
        assert_eq!(Some(Ordering::Less), ScalarValue::Int64(i64::MAX).partial_cmp(&edge));
    }

    #[test]
    fn test_nan_hashes_consistently() {
        let quiet = ScalarValue::Double(f64::NAN);
        let other = ScalarValue::Double(f64::from_bits(f64::NAN.to_bits() | 1));
        assert_eq!(quiet, other);
        assert_eq!(hash_of(&quiet), hash_of(&other));
    }

    #[test]
    fn test_null_orders_first() {
        assert_eq!(Some(Ordering::Less), ScalarValue::Null.partial_cmp(&ScalarValue::Int8(-1)));
        assert_eq!(
            Some(Ordering::Less),
            ScalarValue::Int64(1).partial_cmp(&ScalarValue::Double(1.5))
        );
    }

    #[test]
    fn test_cast() -> Result<()> {
        assert_eq!(ScalarValue::Double(3.0), ScalarValue::Int16(3).cast_to(&DataType::Double)?);
        assert_eq!(ScalarValue::Int64(12), ScalarValue::from("12").cast_to(&DataType::Integer)?);
        assert_eq!(ScalarValue::Boolean(true), ScalarValue::Int8(5).cast_to(&DataType::Boolean)?);
        let date = ScalarValue::from("2024-02-29").cast_to(&DataType::Date)?;
        assert_eq!(DataType::Date, date.datatype());
        assert_eq!(
            ScalarValue::from("2024-02-29 00:00:00").cast_to(&DataType::Timestamp)?,
            date
        );
        assert!(ScalarValue::from("abc").cast_to(&DataType::Integer).is_err());
        assert!(ScalarValue::Boolean(true).cast_to(&DataType::Date).is_err());
        Ok(())
    }
}
