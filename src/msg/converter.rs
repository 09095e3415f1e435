use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value as JValue};
use thiserror::Error;
use tracing::trace;

use super::definition::{ArrayKind, BaseType, FieldSpec, PrimitiveType};
use super::registry::TypeRegistry;
use crate::core::{Dictionary, Message, TypeName, Value};

#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    #[error("Unknown message type [{0}]")]
    UnknownType(TypeName),
    #[error("Message type \"{type_name}\" has no field named \"{field}\"")]
    UnknownField { type_name: TypeName, field: String },
    #[error("Missing fields {fields:?} for message type \"{type_name}\"")]
    MissingFields {
        type_name: TypeName,
        fields: Vec<String>,
    },
    #[error("Field [{path}]: expected {expected}, got {got}")]
    TypeMismatch {
        path: String,
        expected: String,
        got: String,
    },
    #[error("Field [{path}]: value {value} out of range for {ty}")]
    OutOfRange {
        path: String,
        value: String,
        ty: &'static str,
    },
    #[error("Field [{path}]: expected {expected} elements, got {got}")]
    ArrayLength {
        path: String,
        expected: String,
        got: usize,
    },
    #[error("Failed to encode message: {0}")]
    Encode(String),
}

type Result<T> = std::result::Result<T, ConversionError>;

fn describe(value: &JValue) -> String {
    match value {
        JValue::Null => "null",
        JValue::Bool(_) => "bool",
        JValue::Number(n) if n.is_f64() => "float",
        JValue::Number(_) => "integer",
        JValue::String(_) => "string",
        JValue::Array(_) => "list",
        JValue::Object(_) => "mapping",
    }
    .to_string()
}

fn join_path(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

fn mismatch(path: &str, expected: impl Into<String>, got: &JValue) -> ConversionError {
    ConversionError::TypeMismatch {
        path: path.to_string(),
        expected: expected.into(),
        got: describe(got),
    }
}

fn signed_range(p: PrimitiveType) -> (i64, i64) {
    match p {
        PrimitiveType::Int8 => (i8::MIN.into(), i8::MAX.into()),
        PrimitiveType::Int16 => (i16::MIN.into(), i16::MAX.into()),
        PrimitiveType::Int32 => (i32::MIN.into(), i32::MAX.into()),
        _ => (i64::MIN, i64::MAX),
    }
}

fn unsigned_max(p: PrimitiveType) -> u64 {
    match p {
        PrimitiveType::UInt8 => u8::MAX.into(),
        PrimitiveType::UInt16 => u16::MAX.into(),
        PrimitiveType::UInt32 => u32::MAX.into(),
        _ => u64::MAX,
    }
}

/// Builds typed messages out of plain dictionaries and back, driven by the
/// definitions held in a `TypeRegistry`.
#[derive(Clone, Copy, Debug)]
pub struct MessageConverter<'a> {
    registry: &'a TypeRegistry,
    strict: bool,
}

impl<'a> MessageConverter<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            strict: false,
        }
    }

    /// In strict mode every field must be present in the dictionary instead
    /// of falling back to its default.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    pub fn dictionary_to_message(&self, type_name: &str, dict: &Dictionary) -> Result<Message> {
        trace!(type_name, ?dict, "Converting dictionary to message");
        self.convert_message(type_name, dict, "", self.strict)
    }

    pub fn message_to_dictionary(&self, msg: &Message) -> Result<Dictionary> {
        serde_json::to_value(msg).map_err(|e| ConversionError::Encode(e.to_string()))
    }

    pub fn default_message(&self, type_name: &str) -> Result<Message> {
        self.convert_message(type_name, &JValue::Null, "", false)
    }

    fn convert_message(
        &self,
        type_name: &str,
        dict: &JValue,
        path: &str,
        strict: bool,
    ) -> Result<Message> {
        let def = self
            .registry
            .message(type_name)
            .ok_or_else(|| ConversionError::UnknownType(type_name.to_string()))?;

        let empty = Map::new();
        let entries = match dict {
            JValue::Null => &empty,
            JValue::Object(map) => map,
            other => {
                let at = if path.is_empty() { def.type_name.as_str() } else { path };
                return Err(mismatch(at, format!("mapping for {}", def.type_name), other));
            }
        };

        if let Some(unknown) = entries.keys().find(|k| def.field(k).is_none()) {
            return Err(ConversionError::UnknownField {
                type_name: def.type_name.clone(),
                field: join_path(path, unknown),
            });
        }

        if strict {
            let missing: Vec<String> = def
                .fields
                .iter()
                .filter(|f| !entries.contains_key(&f.name))
                .map(|f| join_path(path, &f.name))
                .collect();
            if !missing.is_empty() {
                return Err(ConversionError::MissingFields {
                    type_name: def.type_name.clone(),
                    fields: missing,
                });
            }
        }

        let fields = def
            .fields
            .iter()
            .map(|spec| {
                let field_path = join_path(path, &spec.name);
                let value = match entries.get(&spec.name) {
                    Some(v) => self.convert_field(spec, v, &field_path, strict)?,
                    None => self.default_field(spec, &field_path)?,
                };
                Ok((spec.name.clone(), value))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Message::new(def.type_name.clone(), fields))
    }

    fn convert_field(
        &self,
        spec: &FieldSpec,
        value: &JValue,
        path: &str,
        strict: bool,
    ) -> Result<Value> {
        if spec.array == ArrayKind::Scalar {
            return self.convert_base(&spec.base, value, path, strict);
        }

        let items = value
            .as_array()
            .ok_or_else(|| mismatch(path, format!("list of {}", spec.base), value))?;
        match spec.array {
            ArrayKind::Fixed(n) if items.len() != n => {
                return Err(ConversionError::ArrayLength {
                    path: path.to_string(),
                    expected: n.to_string(),
                    got: items.len(),
                });
            }
            ArrayKind::Bounded(n) if items.len() > n => {
                return Err(ConversionError::ArrayLength {
                    path: path.to_string(),
                    expected: format!("at most {}", n),
                    got: items.len(),
                });
            }
            _ => {}
        }

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                self.convert_base(&spec.base, item, &format!("{}[{}]", path, i), strict)
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::List)
    }

    fn convert_base(
        &self,
        base: &BaseType,
        value: &JValue,
        path: &str,
        strict: bool,
    ) -> Result<Value> {
        match base {
            BaseType::Primitive(p) => convert_primitive(*p, value, path),
            BaseType::Message(t) => self
                .convert_message(t, value, path, strict)
                .map(Value::Message),
        }
    }

    fn default_field(&self, spec: &FieldSpec, path: &str) -> Result<Value> {
        if let Some(default) = &spec.default {
            return self.convert_field(spec, default, path, false);
        }
        match spec.array {
            ArrayKind::Scalar => self.default_base(&spec.base, path),
            ArrayKind::Fixed(n) => (0..n)
                .map(|_| self.default_base(&spec.base, path))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            ArrayKind::Unbounded | ArrayKind::Bounded(_) => Ok(Value::List(vec![])),
        }
    }

    fn default_base(&self, base: &BaseType, path: &str) -> Result<Value> {
        Ok(match base {
            BaseType::Primitive(p) => match p {
                PrimitiveType::Bool => Value::Bool(false),
                PrimitiveType::Int8
                | PrimitiveType::Int16
                | PrimitiveType::Int32
                | PrimitiveType::Int64 => Value::Int(0),
                PrimitiveType::UInt8
                | PrimitiveType::UInt16
                | PrimitiveType::UInt32
                | PrimitiveType::UInt64 => Value::UInt(0),
                PrimitiveType::Float32 => Value::Float32(0.0),
                PrimitiveType::Float64 => Value::Float64(0.0),
                PrimitiveType::String => Value::Str(String::new()),
                PrimitiveType::Time => Value::Time { secs: 0, nsecs: 0 },
                PrimitiveType::Duration => Value::Duration { secs: 0, nsecs: 0 },
            },
            BaseType::Message(t) => {
                Value::Message(self.convert_message(t, &JValue::Null, path, false)?)
            }
        })
    }
}

fn out_of_range(path: &str, value: &JValue, ty: PrimitiveType) -> ConversionError {
    ConversionError::OutOfRange {
        path: path.to_string(),
        value: value.to_string(),
        ty: ty.name(),
    }
}

fn convert_primitive(p: PrimitiveType, value: &JValue, path: &str) -> Result<Value> {
    match p {
        PrimitiveType::Bool => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| mismatch(path, "bool", value)),
        PrimitiveType::Int8
        | PrimitiveType::Int16
        | PrimitiveType::Int32
        | PrimitiveType::Int64 => {
            let JValue::Number(n) = value else {
                return Err(mismatch(path, p.name(), value));
            };
            if n.is_f64() {
                return Err(mismatch(path, p.name(), value));
            }
            let (min, max) = signed_range(p);
            match n.as_i64() {
                Some(i) if i >= min && i <= max => Ok(Value::Int(i)),
                _ => Err(out_of_range(path, value, p)),
            }
        }
        PrimitiveType::UInt8
        | PrimitiveType::UInt16
        | PrimitiveType::UInt32
        | PrimitiveType::UInt64 => {
            let JValue::Number(n) = value else {
                return Err(mismatch(path, p.name(), value));
            };
            if n.is_f64() {
                return Err(mismatch(path, p.name(), value));
            }
            match n.as_u64() {
                Some(u) if u <= unsigned_max(p) => Ok(Value::UInt(u)),
                _ => Err(out_of_range(path, value, p)),
            }
        }
        PrimitiveType::Float32 => {
            let x = value
                .as_f64()
                .ok_or_else(|| mismatch(path, "float32", value))?;
            if x.is_finite() && x.abs() > f64::from(f32::MAX) {
                return Err(out_of_range(path, value, p));
            }
            Ok(Value::Float32(x as f32))
        }
        PrimitiveType::Float64 => value
            .as_f64()
            .map(Value::Float64)
            .ok_or_else(|| mismatch(path, "float64", value)),
        PrimitiveType::String => value
            .as_str()
            .map(|s| Value::Str(s.to_string()))
            .ok_or_else(|| mismatch(path, "string", value)),
        PrimitiveType::Time => {
            if value.as_str() == Some("now") {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                return Ok(Value::Time {
                    secs: now.as_secs() as u32,
                    nsecs: now.subsec_nanos(),
                });
            }
            let (secs, nsecs) = stamp_parts(value, path, PrimitiveType::UInt32, p)?;
            Ok(Value::Time {
                secs: secs as u32,
                nsecs: nsecs as u32,
            })
        }
        PrimitiveType::Duration => {
            let (secs, nsecs) = stamp_parts(value, path, PrimitiveType::Int32, p)?;
            Ok(Value::Duration {
                secs: secs as i32,
                nsecs: nsecs as i32,
            })
        }
    }
}

// The {secs, nsecs} mapping shared by time and duration; both parts default to 0
fn stamp_parts(
    value: &JValue,
    path: &str,
    part_ty: PrimitiveType,
    ty: PrimitiveType,
) -> Result<(i64, i64)> {
    let JValue::Object(map) = value else {
        return Err(mismatch(path, format!("{} as {{secs, nsecs}}", ty.name()), value));
    };
    if let Some(unknown) = map.keys().find(|k| *k != "secs" && *k != "nsecs") {
        return Err(ConversionError::UnknownField {
            type_name: ty.name().to_string(),
            field: join_path(path, unknown),
        });
    }
    let part = |name: &str| -> Result<i64> {
        match map.get(name) {
            None => Ok(0),
            Some(v) => match convert_primitive(part_ty, v, &join_path(path, name))? {
                Value::Int(i) => Ok(i),
                Value::UInt(u) => Ok(u as i64),
                _ => Err(mismatch(path, part_ty.name(), v)),
            },
        }
    };
    Ok((part("secs")?, part("nsecs")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::with_builtins();
        registry
            .add_message_text(
                "test_msgs/Sample",
                "Header header\nint8 small\nuint16 count\nfloat32 ratio\nfloat64[2] pair\nstring[] tags\ngeometry_msgs/Point[] path\nduration elapsed\n",
            )
            .unwrap();
        registry
    }

    #[test]
    fn builds_nested_message_with_defaults() {
        let registry = registry();
        let converter = MessageConverter::new(&registry);
        let msg = converter
            .dictionary_to_message(
                "geometry_msgs/Pose",
                &json!({"position": {"x": 1, "y": 2.5}}),
            )
            .unwrap();

        let Some(Value::Message(position)) = msg.field("position") else {
            panic!("position should be a nested message");
        };
        assert_eq!(position.field("x"), Some(&Value::Float64(1.0)));
        assert_eq!(position.field("y"), Some(&Value::Float64(2.5)));
        assert_eq!(position.field("z"), Some(&Value::Float64(0.0)));

        let Some(Value::Message(orientation)) = msg.field("orientation") else {
            panic!("orientation should default to a message");
        };
        assert_eq!(orientation.field("w"), Some(&Value::Float64(0.0)));
    }

    #[test]
    fn null_means_all_defaults() {
        let registry = registry();
        let converter = MessageConverter::new(&registry);
        let msg = converter
            .dictionary_to_message("test_msgs/Sample", &JValue::Null)
            .unwrap();
        assert_eq!(msg, converter.default_message("test_msgs/Sample").unwrap());
        assert_eq!(
            msg.field("pair"),
            Some(&Value::List(vec![Value::Float64(0.0), Value::Float64(0.0)]))
        );
        assert_eq!(msg.field("tags"), Some(&Value::List(vec![])));
    }

    #[test]
    fn rejects_unknown_fields_and_types() {
        let registry = registry();
        let converter = MessageConverter::new(&registry);

        let err = converter
            .dictionary_to_message("std_msgs/String", &json!({"dta": "x"}))
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::UnknownField {
                type_name: "std_msgs/String".into(),
                field: "dta".into()
            }
        );
        assert_eq!(
            err.to_string(),
            "Message type \"std_msgs/String\" has no field named \"dta\""
        );

        let err = converter
            .dictionary_to_message("nope/Missing", &json!({}))
            .unwrap_err();
        assert_eq!(err, ConversionError::UnknownType("nope/Missing".into()));

        let err = converter
            .dictionary_to_message("std_msgs/String", &json!({"data": 3}))
            .unwrap_err();
        assert!(matches!(err, ConversionError::TypeMismatch { ref path, .. } if path == "data"));
    }

    #[test]
    fn checks_integer_ranges() {
        let registry = registry();
        let converter = MessageConverter::new(&registry);

        let err = converter
            .dictionary_to_message("test_msgs/Sample", &json!({"small": 200}))
            .unwrap_err();
        assert!(matches!(err, ConversionError::OutOfRange { ty: "int8", .. }));

        let err = converter
            .dictionary_to_message("test_msgs/Sample", &json!({"count": -1}))
            .unwrap_err();
        assert!(matches!(err, ConversionError::OutOfRange { ty: "uint16", .. }));

        let err = converter
            .dictionary_to_message("test_msgs/Sample", &json!({"count": 1.5}))
            .unwrap_err();
        assert!(matches!(err, ConversionError::TypeMismatch { .. }));

        let msg = converter
            .dictionary_to_message("test_msgs/Sample", &json!({"small": -128, "count": 65535}))
            .unwrap();
        assert_eq!(msg.field("small"), Some(&Value::Int(-128)));
        assert_eq!(msg.field("count"), Some(&Value::UInt(65535)));
    }

    #[test]
    fn checks_array_shapes_with_paths() {
        let registry = registry();
        let converter = MessageConverter::new(&registry);

        let err = converter
            .dictionary_to_message("test_msgs/Sample", &json!({"pair": [1.0]}))
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::ArrayLength {
                path: "pair".into(),
                expected: "2".into(),
                got: 1
            }
        );

        let err = converter
            .dictionary_to_message(
                "test_msgs/Sample",
                &json!({"path": [{"x": 1.0}, {"x": "far"}]}),
            )
            .unwrap_err();
        assert!(matches!(err, ConversionError::TypeMismatch { ref path, .. } if path == "path[1].x"));
    }

    #[test]
    fn strict_mode_requires_every_field() {
        let registry = registry();
        let converter = MessageConverter::new(&registry).strict(true);
        let err = converter
            .dictionary_to_message("geometry_msgs/Point", &json!({"x": 1.0}))
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::MissingFields {
                type_name: "geometry_msgs/Point".into(),
                fields: vec!["y".into(), "z".into()]
            }
        );
        assert!(
            converter
                .dictionary_to_message("geometry_msgs/Point", &json!({"x": 1, "y": 2, "z": 3}))
                .is_ok()
        );
    }

    #[test]
    fn time_and_duration_fields() {
        let registry = registry();
        let converter = MessageConverter::new(&registry);
        let msg = converter
            .dictionary_to_message(
                "test_msgs/Sample",
                &json!({"header": {"stamp": {"secs": 12, "nsecs": 5}, "frame_id": "map"},
                        "elapsed": {"secs": -1}}),
            )
            .unwrap();
        let Some(Value::Message(header)) = msg.field("header") else {
            panic!("header should be a message");
        };
        assert_eq!(header.field("stamp"), Some(&Value::Time { secs: 12, nsecs: 5 }));
        assert_eq!(msg.field("elapsed"), Some(&Value::Duration { secs: -1, nsecs: 0 }));

        let now = converter
            .dictionary_to_message("std_msgs/Time", &json!({"data": "now"}))
            .unwrap();
        assert!(matches!(now.field("data"), Some(Value::Time { secs, .. }) if *secs > 0));
    }

    #[test]
    fn round_trips_to_dictionary() {
        let registry = registry();
        let converter = MessageConverter::new(&registry);
        let msg = converter
            .dictionary_to_message("test_msgs/Sample", &json!({"ratio": 0.25, "tags": ["a"]}))
            .unwrap();
        let dict = converter.message_to_dictionary(&msg).unwrap();
        assert_abs_diff_eq!(dict["ratio"].as_f64().unwrap(), 0.25);
        assert_eq!(dict["tags"], json!(["a"]));
        assert_eq!(dict["header"]["stamp"], json!({"secs": 0, "nsecs": 0}));
        assert_eq!(
            converter
                .dictionary_to_message("test_msgs/Sample", &dict)
                .unwrap(),
            msg
        );
    }
}
