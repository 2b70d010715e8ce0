//! Typed configuration binding.
//!
//! A configuration struct declares its fields as a [`BindField`] schema and
//! accepts converted values through [`Bindable::apply`]. The environment
//! drives the binding; there is no runtime introspection of the target.

use std::any::Any;

use tracing::warn;

use crate::error::{EnvError, EnvResult};

/// Semantic type of a bound field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    /// Passed through as-is.
    Text,
    /// `true`/`false`; empty string is `false`.
    Bool,
    /// Signed integer; empty string is `0`.
    I64,
    /// Float; empty string is `0.0`.
    F64,
}

impl BindKind {
    /// The zero value of this kind.
    pub fn zero(&self) -> BindValue {
        match self {
            Self::Text => BindValue::Text(String::new()),
            Self::Bool => BindValue::Bool(false),
            Self::I64 => BindValue::I64(0),
            Self::F64 => BindValue::F64(0.0),
        }
    }

    /// Convert resolved text into a value of this kind.
    pub fn convert(&self, key: &str, raw: &str) -> EnvResult<BindValue> {
        if raw.is_empty() {
            return Ok(self.zero());
        }
        match self {
            Self::Text => Ok(BindValue::Text(raw.to_string())),
            Self::Bool => raw
                .parse()
                .map(BindValue::Bool)
                .map_err(|_| EnvError::conversion(key, raw, "bool")),
            Self::I64 => raw
                .parse()
                .map(BindValue::I64)
                .map_err(|_| EnvError::conversion(key, raw, "i64")),
            Self::F64 => raw
                .parse()
                .map(BindValue::F64)
                .map_err(|_| EnvError::conversion(key, raw, "f64")),
        }
    }
}

/// A converted configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// See [`BindKind::Text`].
    Text(String),
    /// See [`BindKind::Bool`].
    Bool(bool),
    /// See [`BindKind::I64`].
    I64(i64),
    /// See [`BindKind::F64`].
    F64(f64),
}

/// One field of a bindable configuration struct.
#[derive(Debug, Clone, Copy)]
pub struct BindField {
    /// Field name, as accepted by [`Bindable::apply`].
    pub field: &'static str,
    /// Configuration key relative to the bind prefix; the field name when
    /// unset.
    pub key: Option<&'static str>,
    /// Default expression, placeholder-resolvable.
    pub default: Option<&'static str>,
    /// Target type.
    pub kind: BindKind,
    /// Whether a conversion failure aborts the bind instead of falling back
    /// to the zero value.
    pub required: bool,
}

impl BindField {
    /// A non-required field with no default, keyed by its own name.
    pub const fn new(field: &'static str, kind: BindKind) -> Self {
        Self {
            field,
            key: None,
            default: None,
            kind,
            required: false,
        }
    }

    /// Override the relative configuration key.
    pub const fn keyed(mut self, key: &'static str) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the default expression.
    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark conversion failures fatal.
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The key this field reads, relative to the bind prefix.
    pub fn relative_key(&self) -> &'static str {
        self.key.unwrap_or(self.field)
    }
}

/// A configuration struct the environment can populate and keep current.
pub trait Bindable: Any + Send + Sync {
    /// The field schema.
    fn fields(&self) -> Vec<BindField>;

    /// Accept a converted value for a declared field.
    fn apply(&mut self, field: &str, value: BindValue) -> EnvResult<()>;
}

/// Convert a looked-up raw value for one field, applying the
/// default/zero/required fallback rules.
///
/// `raw` is the placeholder-resolved environment value; `fallback` is the
/// placeholder-resolved default, if the field declares one.
pub(crate) fn convert_field(
    key: &str,
    field: &BindField,
    raw: Option<&str>,
    fallback: Option<&str>,
) -> EnvResult<BindValue> {
    let text = raw.or(fallback);
    let Some(text) = text else {
        return Ok(field.kind.zero());
    };
    match field.kind.convert(key, text) {
        Ok(value) => Ok(value),
        Err(err) if !field.required => {
            warn!(%key, %err, "bind conversion failed; using zero value");
            Ok(field.kind.zero())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_conversion() {
        assert_eq!(
            BindKind::Text.convert("k", "hello").unwrap(),
            BindValue::Text("hello".into())
        );
        assert_eq!(BindKind::Bool.convert("k", "true").unwrap(), BindValue::Bool(true));
        assert_eq!(BindKind::I64.convert("k", "-42").unwrap(), BindValue::I64(-42));
        assert_eq!(BindKind::F64.convert("k", "2.5").unwrap(), BindValue::F64(2.5));
        assert!(matches!(
            BindKind::I64.convert("k", "abc"),
            Err(EnvError::ConversionFailure { .. })
        ));
        assert!(matches!(
            BindKind::Bool.convert("k", "yes"),
            Err(EnvError::ConversionFailure { .. })
        ));
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(BindKind::Text.convert("k", "").unwrap(), BindValue::Text(String::new()));
        assert_eq!(BindKind::Bool.convert("k", "").unwrap(), BindValue::Bool(false));
        assert_eq!(BindKind::I64.convert("k", "").unwrap(), BindValue::I64(0));
        assert_eq!(BindKind::F64.convert("k", "").unwrap(), BindValue::F64(0.0));
    }

    #[test]
    fn test_field_schema_builder() {
        let field = BindField::new("id", BindKind::I64)
            .keyed("user_id")
            .with_default("7")
            .required();
        assert_eq!(field.relative_key(), "user_id");
        assert_eq!(field.default, Some("7"));
        assert!(field.required);
        assert_eq!(BindField::new("id", BindKind::I64).relative_key(), "id");
    }

    #[test]
    fn test_convert_field_fallbacks() {
        let optional = BindField::new("port", BindKind::I64);
        // Raw value wins over fallback.
        assert_eq!(
            convert_field("p.port", &optional, Some("8080"), Some("9090")).unwrap(),
            BindValue::I64(8080)
        );
        assert_eq!(
            convert_field("p.port", &optional, None, Some("9090")).unwrap(),
            BindValue::I64(9090)
        );
        assert_eq!(
            convert_field("p.port", &optional, None, None).unwrap(),
            BindValue::I64(0)
        );
        // Optional conversion failure degrades to zero.
        assert_eq!(
            convert_field("p.port", &optional, Some("abc"), None).unwrap(),
            BindValue::I64(0)
        );
        // Required conversion failure aborts.
        let required = BindField::new("port", BindKind::I64).required();
        assert!(convert_field("p.port", &required, Some("abc"), None).is_err());
    }
}
