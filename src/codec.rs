//! Serialization Codec
//!
//! Converts cached values to bytes and back through a tagged JSON envelope:
//!
//! ```text
//! {"type": "<type tag>", "data": <serde representation>}
//! ```
//!
//! The type tag is checked on decode, so a `get::<MyTask>` never hands back
//! a value that was saved as some other type.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

// == Cacheable ==
/// A value that can be stored by any cache driver.
///
/// Primitives, sequences, string-keyed maps and `serde_json::Value` are
/// covered out of the box. Caller-defined types opt in with
/// [`impl_cacheable!`](crate::impl_cacheable):
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct MyTask {
///     id: u32,
///     message: String,
/// }
///
/// mini_cache::impl_cacheable!(MyTask, "my_task");
/// ```
pub trait Cacheable: Serialize + DeserializeOwned {
    /// Stable name identifying the concrete type inside the envelope.
    fn type_tag() -> Cow<'static, str>;

    /// Rejects values JSON cannot carry faithfully, such as non-finite
    /// floats or a `Some` wrapping a value that itself encodes as `null`.
    fn check_encodable(&self) -> Result<()> {
        Ok(())
    }

    /// True when the value serializes to JSON `null`.
    fn encodes_as_null(&self) -> bool {
        false
    }
}

/// Implements [`Cacheable`] for a type with a fixed tag.
#[macro_export]
macro_rules! impl_cacheable {
    ($ty:ty, $tag:expr) => {
        impl $crate::codec::Cacheable for $ty {
            fn type_tag() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($tag)
            }
        }
    };
}

// JSON has no NaN or infinity; serde_json writes them as `null`.
macro_rules! impl_cacheable_float {
    ($ty:ty, $tag:expr) => {
        impl Cacheable for $ty {
            fn type_tag() -> Cow<'static, str> {
                Cow::Borrowed($tag)
            }

            fn check_encodable(&self) -> Result<()> {
                if self.is_finite() {
                    Ok(())
                } else {
                    Err(CacheError::Codec(format!("cannot store non-finite {}: {}", $tag, self)))
                }
            }
        }
    };
}

impl_cacheable!(String, "string");
impl_cacheable!(bool, "bool");
impl_cacheable!(i8, "i8");
impl_cacheable!(i16, "i16");
impl_cacheable!(i32, "i32");
impl_cacheable!(i64, "i64");
impl_cacheable!(u8, "u8");
impl_cacheable!(u16, "u16");
impl_cacheable!(u32, "u32");
impl_cacheable!(u64, "u64");
impl_cacheable_float!(f32, "f32");
impl_cacheable_float!(f64, "f64");

impl Cacheable for serde_json::Value {
    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("json")
    }

    fn encodes_as_null(&self) -> bool {
        serde_json::Value::is_null(self)
    }
}

impl<T: Cacheable> Cacheable for Vec<T> {
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("list<{}>", T::type_tag()))
    }

    fn check_encodable(&self) -> Result<()> {
        self.iter().try_for_each(Cacheable::check_encodable)
    }
}

impl<T: Cacheable> Cacheable for Option<T> {
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("option<{}>", T::type_tag()))
    }

    fn check_encodable(&self) -> Result<()> {
        match self {
            None => Ok(()),
            Some(inner) if inner.encodes_as_null() => Err(CacheError::Codec(format!(
                "cannot store Some(null) as {}: it reads back as None",
                Self::type_tag()
            ))),
            Some(inner) => inner.check_encodable(),
        }
    }

    fn encodes_as_null(&self) -> bool {
        self.is_none()
    }
}

impl<T: Cacheable> Cacheable for HashMap<String, T> {
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("map<{}>", T::type_tag()))
    }

    fn check_encodable(&self) -> Result<()> {
        self.values().try_for_each(Cacheable::check_encodable)
    }
}

impl<T: Cacheable> Cacheable for BTreeMap<String, T> {
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("map<{}>", T::type_tag()))
    }

    fn check_encodable(&self) -> Result<()> {
        self.values().try_for_each(Cacheable::check_encodable)
    }
}

// == Envelope ==
#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    #[serde(rename = "type")]
    tag: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    data: serde_json::Value,
}

// == Encode ==
/// Serializes a value into its tagged envelope.
///
/// The value must read back as itself: anything that would come back
/// different (a NaN field in a caller struct, `Some(None)`) is refused with
/// [`CacheError::Codec`] instead of being written.
pub fn encode<T: Cacheable>(value: &T) -> Result<Vec<u8>> {
    value.check_encodable()?;
    let data = serde_json::to_value(value)?;
    if let Err(e) = T::deserialize(&data) {
        return Err(CacheError::Codec(format!("value does not read back as itself: {}", e)));
    }

    let tag = T::type_tag();
    let envelope = EnvelopeRef { tag: &tag, data: &data };
    Ok(serde_json::to_vec(&envelope)?)
}

// == Decode ==
/// Restores a value from its tagged envelope.
///
/// Fails with [`CacheError::Codec`] on malformed bytes, a tag that does not
/// belong to `T`, or data that does not fit `T`.
pub fn decode<T: Cacheable>(bytes: &[u8]) -> Result<T> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    let expected = T::type_tag();
    if envelope.tag != expected {
        return Err(CacheError::Codec(format!(
            "type tag mismatch: stored '{}', requested '{}'",
            envelope.tag, expected
        )));
    }
    Ok(serde_json::from_value(envelope.data)?)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct MyTask {
        id: u32,
        message: String,
    }

    impl_cacheable!(MyTask, "my_task");

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OtherTask {
        id: u32,
        message: String,
    }

    impl_cacheable!(OtherTask, "other_task");

    #[test]
    fn test_envelope_layout() {
        let bytes = encode(&"hello".to_string()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["data"], "hello");
    }

    #[test]
    fn test_struct_keeps_its_type() {
        let task = MyTask {
            id: 9,
            message: "test".to_string(),
        };
        let bytes = encode(&task).unwrap();
        assert_eq!(decode::<MyTask>(&bytes).unwrap(), task);
    }

    #[test]
    fn test_same_shape_different_type_is_rejected() {
        let bytes = encode(&MyTask {
            id: 1,
            message: "x".to_string(),
        })
        .unwrap();
        let result = decode::<OtherTask>(&bytes);
        assert!(matches!(result, Err(CacheError::Codec(_))));
    }

    #[test]
    fn test_nested_collections() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), vec![1i64, 2, 3]);
        map.insert("b".to_string(), vec![]);
        let bytes = encode(&map).unwrap();
        assert_eq!(decode::<HashMap<String, Vec<i64>>>(&bytes).unwrap(), map);
    }

    #[test]
    fn test_composite_tags() {
        assert_eq!(Vec::<String>::type_tag(), "list<string>");
        assert_eq!(Option::<u32>::type_tag(), "option<u32>");
        assert_eq!(BTreeMap::<String, bool>::type_tag(), "map<bool>");
    }

    #[test]
    fn test_integer_widths_are_distinct() {
        let bytes = encode(&42i64).unwrap();
        assert!(decode::<u64>(&bytes).is_err());
        assert_eq!(decode::<i64>(&bytes).unwrap(), 42);
    }

    #[test]
    fn test_garbage_is_codec_error() {
        assert!(matches!(
            decode::<String>(b"\x00\x01not json"),
            Err(CacheError::Codec(_))
        ));
        assert!(matches!(
            decode::<String>(br#"{"type":"string"}"#),
            Err(CacheError::Codec(_))
        ));
    }

    #[test]
    fn test_none_round_trips() {
        let bytes = encode(&Option::<String>::None).unwrap();
        assert_eq!(decode::<Option<String>>(&bytes).unwrap(), None);
    }

    #[test]
    fn test_non_finite_floats_are_rejected() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(encode(&value), Err(CacheError::Codec(_))), "{} was encoded", value);
        }
        assert!(matches!(encode(&f32::NAN), Err(CacheError::Codec(_))));
        assert!(matches!(encode(&vec![1.0, f64::INFINITY]), Err(CacheError::Codec(_))));
        assert!(matches!(encode(&Some(f64::NAN)), Err(CacheError::Codec(_))));

        let bytes = encode(&-0.25f64).unwrap();
        assert_eq!(decode::<f64>(&bytes).unwrap(), -0.25);
    }

    #[test]
    fn test_struct_with_non_finite_field_is_rejected() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Reading {
            sensor: String,
            value: f64,
        }

        impl_cacheable!(Reading, "reading");

        let reading = Reading {
            sensor: "t1".to_string(),
            value: f64::NAN,
        };
        assert!(matches!(encode(&reading), Err(CacheError::Codec(_))));
    }

    #[test]
    fn test_nested_options_keep_their_shape() {
        let outer_none: Option<Option<String>> = None;
        let bytes = encode(&outer_none).unwrap();
        assert_eq!(decode::<Option<Option<String>>>(&bytes).unwrap(), None);

        let both_some = Some(Some("x".to_string()));
        let bytes = encode(&both_some).unwrap();
        assert_eq!(decode::<Option<Option<String>>>(&bytes).unwrap(), both_some);

        // `Some(None)` and `None` share the encoding `null`.
        let inner_none: Option<Option<String>> = Some(None);
        assert!(matches!(encode(&inner_none), Err(CacheError::Codec(_))));
        assert!(matches!(encode(&vec![Some(None::<u8>)]), Err(CacheError::Codec(_))));
        assert!(matches!(
            encode(&Some(serde_json::Value::Null)),
            Err(CacheError::Codec(_))
        ));
    }
}
