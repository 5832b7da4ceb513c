//! Message Values
//!
//! The payload carried over a channel: a closed, recursive tagged union of
//! scalars, ordered sequences, and string-keyed mappings.
//!
//! # Wire Encoding
//!
//! Values are serialized as adjacently tagged JSON so every node carries its
//! own type:
//!
//! ```text
//! {"type":"list","value":[{"type":"float","value":0.0},{"type":"float","value":2.0}]}
//! ```
//!
//! JSON has no NaN or infinity, so those floats travel as the strings
//! `"NaN"`, `"inf"`, and `"-inf"` inside a `float` node.
//!
//! # Stop Sentinel
//!
//! [`Message::None`] doubles as the stop sentinel. A listener closes the
//! connection it arrives on; a client terminates after sending it. It is
//! never delivered to the host as a payload.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A structured value exchanged between client and listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Message {
    /// The null value, also the stop sentinel
    None,
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Floating point scalar, including NaN and the infinities
    Float(#[serde(with = "float_repr")] f64),
    /// String scalar
    Str(String),
    /// Ordered sequence of values
    List(Vec<Message>),
    /// Mapping of unique string keys to values
    Map(BTreeMap<String, Message>),
}

impl Message {
    /// The stop sentinel ("close this connection" / "terminate this client")
    pub const STOP: Message = Message::None;

    /// Whether this value is the stop sentinel
    #[must_use]
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Short name of the value's type, used in log fields
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Build a mapping from key/value pairs; later duplicates replace earlier ones
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Message>,
        I: IntoIterator<Item = (K, V)>,
    {
        entries.into_iter().collect()
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::None
    }
}

impl From<bool> for Message {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Message {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Message {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Message {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Message {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Message {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Message {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<Message>> From<Vec<T>> for Message {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Message>> From<Option<T>> for Message {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::None, Into::into)
    }
}

impl<K: Into<String>, V: Into<Message>> FromIterator<(K, V)> for Message {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Plain JSON maps onto the union directly: integral numbers become `Int`,
/// other numbers `Float`, `null` the stop sentinel.
impl From<serde_json::Value> for Message {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;

        match v {
            Value::Null => Self::None,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(fields) => fields.into_iter().collect(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Float encoding that keeps non-finite values intact
mod float_repr {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    const NAN: &str = "NaN";
    const INF: &str = "inf";
    const NEG_INF: &str = "-inf";

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { INF } else { NEG_INF })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct FloatVisitor;

    impl Visitor<'_> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a number or one of \"{NAN}\", \"{INF}\", \"{NEG_INF}\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                NAN => Ok(f64::NAN),
                INF => Ok(f64::INFINITY),
                NEG_INF => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}
