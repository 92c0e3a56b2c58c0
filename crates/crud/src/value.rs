//! Flat result rows and value helpers shared by the row mapper, the identity
//! computation and property setters.

use sea_query::{ColumnType, Value};

use crate::error::{Error, Result};

/// A named column value of a flat result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column name (or column alias) as returned by the data store.
    pub name: String,
    /// The column value.
    pub value: Value,
}

/// One flat row as returned by an [`crate::Executor`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    /// Ordered fields of the row.
    pub fields: Vec<Field>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Appends a field to the row.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Returns the value of the first field with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|field| field.name == name).map(|field| &field.value)
    }
}

/// Hashable form of a single primary-key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyComponent {
    Bool(bool),
    Int(i64),
    Unsigned(u64),
    /// Raw bits of a floating point key.
    Float(u64),
    Text(String),
    Bytes(Vec<u8>),
    /// Address of an instance without primary keys.
    Instance(usize),
}

impl KeyComponent {
    pub(crate) fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Bool(v) => vec![u8::from(*v)],
            Self::Int(v) => v.to_le_bytes().to_vec(),
            Self::Unsigned(v) | Self::Float(v) => v.to_le_bytes().to_vec(),
            Self::Text(v) => v.as_bytes().to_vec(),
            Self::Bytes(v) => v.clone(),
            Self::Instance(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// Converts a key value into its hashable form. `NULL` yields `None`.
///
/// # Errors
///
/// Returns a conversion error for value kinds that cannot act as keys.
pub(crate) fn key_component(value: &Value) -> Result<Option<KeyComponent>> {
    if is_null(value) {
        return Ok(None);
    }

    let component = match value {
        Value::Bool(Some(v)) => KeyComponent::Bool(*v),
        Value::TinyInt(Some(v)) => KeyComponent::Int(i64::from(*v)),
        Value::SmallInt(Some(v)) => KeyComponent::Int(i64::from(*v)),
        Value::Int(Some(v)) => KeyComponent::Int(i64::from(*v)),
        Value::BigInt(Some(v)) => KeyComponent::Int(*v),
        Value::TinyUnsigned(Some(v)) => KeyComponent::Unsigned(u64::from(*v)),
        Value::SmallUnsigned(Some(v)) => KeyComponent::Unsigned(u64::from(*v)),
        Value::Unsigned(Some(v)) => KeyComponent::Unsigned(u64::from(*v)),
        Value::BigUnsigned(Some(v)) => KeyComponent::Unsigned(*v),
        Value::Float(Some(v)) => KeyComponent::Float(f64::from(*v).to_bits()),
        Value::Double(Some(v)) => KeyComponent::Float(v.to_bits()),
        Value::String(Some(v)) => KeyComponent::Text(v.to_string()),
        Value::Char(Some(v)) => KeyComponent::Text(v.to_string()),
        Value::Bytes(Some(v)) => KeyComponent::Bytes(v.to_vec()),
        Value::ChronoDate(Some(v)) => KeyComponent::Text(v.to_string()),
        Value::ChronoTime(Some(v)) => KeyComponent::Text(v.to_string()),
        Value::ChronoDateTime(Some(v)) => KeyComponent::Text(v.to_string()),
        Value::ChronoDateTimeUtc(Some(v)) => KeyComponent::Text(v.to_rfc3339()),
        _ => return Err(Error::conversion(format!("unsupported key value: {value:?}"))),
    };
    Ok(Some(component))
}

/// Returns `true` when the value is any of the `NULL` variants.
#[must_use]
pub fn is_null(value: &Value) -> bool {
    matches!(
        value,
        Value::Bool(None)
            | Value::TinyInt(None)
            | Value::SmallInt(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::TinyUnsigned(None)
            | Value::SmallUnsigned(None)
            | Value::Unsigned(None)
            | Value::BigUnsigned(None)
            | Value::Float(None)
            | Value::Double(None)
            | Value::String(None)
            | Value::Char(None)
            | Value::Bytes(None)
            | Value::ChronoDate(None)
            | Value::ChronoTime(None)
            | Value::ChronoDateTime(None)
            | Value::ChronoDateTimeUtc(None)
    )
}

/// Returns `true` for integer column kinds.
#[must_use]
pub const fn is_integer(column_type: &ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::TinyInteger
            | ColumnType::SmallInteger
            | ColumnType::Integer
            | ColumnType::BigInteger
            | ColumnType::TinyUnsigned
            | ColumnType::SmallUnsigned
            | ColumnType::Unsigned
            | ColumnType::BigUnsigned
    )
}

/// Re-shapes integer values returned by a data store to the integer width of
/// the target column. Drivers report identity values with whatever width they
/// like (`SCOPE_IDENTITY()` is a decimal, `last_insert_rowid()` a 64-bit
/// integer), so a strict conversion would reject them.
pub(crate) fn coerce(value: Value, target: &ColumnType) -> Value {
    if !is_integer(target) {
        return value;
    }

    if is_null(&value) {
        return null_of(target).unwrap_or(value);
    }

    let Some(number) = as_i128(&value) else {
        return value;
    };

    let coerced = match target {
        ColumnType::TinyInteger => i8::try_from(number).ok().map(|v| Value::TinyInt(Some(v))),
        ColumnType::SmallInteger => i16::try_from(number).ok().map(|v| Value::SmallInt(Some(v))),
        ColumnType::Integer => i32::try_from(number).ok().map(|v| Value::Int(Some(v))),
        ColumnType::BigInteger => i64::try_from(number).ok().map(|v| Value::BigInt(Some(v))),
        ColumnType::TinyUnsigned => u8::try_from(number).ok().map(|v| Value::TinyUnsigned(Some(v))),
        ColumnType::SmallUnsigned => {
            u16::try_from(number).ok().map(|v| Value::SmallUnsigned(Some(v)))
        }
        ColumnType::Unsigned => u32::try_from(number).ok().map(|v| Value::Unsigned(Some(v))),
        ColumnType::BigUnsigned => u64::try_from(number).ok().map(|v| Value::BigUnsigned(Some(v))),
        _ => None,
    };
    coerced.unwrap_or(value)
}

#[allow(clippy::cast_possible_truncation)]
fn as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::TinyInt(Some(v)) => Some(i128::from(*v)),
        Value::SmallInt(Some(v)) => Some(i128::from(*v)),
        Value::Int(Some(v)) => Some(i128::from(*v)),
        Value::BigInt(Some(v)) => Some(i128::from(*v)),
        Value::TinyUnsigned(Some(v)) => Some(i128::from(*v)),
        Value::SmallUnsigned(Some(v)) => Some(i128::from(*v)),
        Value::Unsigned(Some(v)) => Some(i128::from(*v)),
        Value::BigUnsigned(Some(v)) => Some(i128::from(*v)),
        Value::Double(Some(v)) if v.fract() == 0.0 => Some(*v as i128),
        Value::String(Some(v)) => v.trim().parse().ok(),
        _ => None,
    }
}

const fn null_of(target: &ColumnType) -> Option<Value> {
    match target {
        ColumnType::TinyInteger => Some(Value::TinyInt(None)),
        ColumnType::SmallInteger => Some(Value::SmallInt(None)),
        ColumnType::Integer => Some(Value::Int(None)),
        ColumnType::BigInteger => Some(Value::BigInt(None)),
        ColumnType::TinyUnsigned => Some(Value::TinyUnsigned(None)),
        ColumnType::SmallUnsigned => Some(Value::SmallUnsigned(None)),
        ColumnType::Unsigned => Some(Value::Unsigned(None)),
        ColumnType::BigUnsigned => Some(Value::BigUnsigned(None)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_components() {
        assert_eq!(key_component(&Value::Int(Some(7))).unwrap(), Some(KeyComponent::Int(7)));
        assert_eq!(key_component(&Value::BigInt(Some(7))).unwrap(), Some(KeyComponent::Int(7)));
        assert_eq!(
            key_component(&Value::String(Some(Box::new("a".to_string())))).unwrap(),
            Some(KeyComponent::Text("a".to_string()))
        );
        assert_eq!(key_component(&Value::Int(None)).unwrap(), None);
    }

    #[test]
    fn coerce_identity_values() {
        assert_eq!(coerce(Value::BigInt(Some(12)), &ColumnType::Integer), Value::Int(Some(12)));
        assert_eq!(coerce(Value::Double(Some(3.0)), &ColumnType::BigInteger), Value::BigInt(Some(3)));
        assert_eq!(coerce(Value::BigInt(None), &ColumnType::Integer), Value::Int(None));

        // out of range stays untouched so the setter reports the failure
        let large = Value::BigInt(Some(i64::MAX));
        assert_eq!(coerce(large.clone(), &ColumnType::Integer), large);

        let text = Value::String(Some(Box::new("x".to_string())));
        assert_eq!(coerce(text.clone(), &ColumnType::Integer), text);
    }

    #[test]
    fn row_lookup() {
        let row = Row::new().with("Id", 1).with("Name", "HQ");
        assert_eq!(row.get("Id"), Some(&Value::Int(Some(1))));
        assert!(row.get("Missing").is_none());
    }
}
