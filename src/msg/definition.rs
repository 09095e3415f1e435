use std::fmt::{self, Display};

use serde_json::Value as JValue;
use thiserror::Error;
use winnow::{
    Parser, Result,
    ascii::{dec_uint, space0, space1},
    combinator::{delimited, opt, preceded},
    token::{rest, take_while},
};

use crate::core::TypeName;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrimitiveType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    Time,
    Duration,
}

impl PrimitiveType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => PrimitiveType::Bool,
            // byte and char are the deprecated aliases of int8 and uint8
            "int8" | "byte" => PrimitiveType::Int8,
            "uint8" | "char" => PrimitiveType::UInt8,
            "int16" => PrimitiveType::Int16,
            "uint16" => PrimitiveType::UInt16,
            "int32" => PrimitiveType::Int32,
            "uint32" => PrimitiveType::UInt32,
            "int64" => PrimitiveType::Int64,
            "uint64" => PrimitiveType::UInt64,
            "float32" => PrimitiveType::Float32,
            "float64" => PrimitiveType::Float64,
            "string" | "wstring" => PrimitiveType::String,
            "time" => PrimitiveType::Time,
            "duration" => PrimitiveType::Duration,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Int8 => "int8",
            PrimitiveType::UInt8 => "uint8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::UInt16 => "uint16",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::UInt32 => "uint32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::UInt64 => "uint64",
            PrimitiveType::Float32 => "float32",
            PrimitiveType::Float64 => "float64",
            PrimitiveType::String => "string",
            PrimitiveType::Time => "time",
            PrimitiveType::Duration => "duration",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BaseType {
    Primitive(PrimitiveType),
    Message(TypeName),
}

impl Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseType::Primitive(p) => write!(f, "{}", p.name()),
            BaseType::Message(t) => write!(f, "{}", t),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArrayKind {
    Scalar,
    Unbounded,
    Fixed(usize),
    Bounded(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub base: BaseType,
    pub array: ArrayKind,
    /// Default value declared inline (ROS 2 style `int32 x 5`)
    pub default: Option<JValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub ty: PrimitiveType,
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MessageDefinition {
    pub type_name: TypeName,
    pub fields: Vec<FieldSpec>,
    pub constants: Vec<Constant>,
}

impl MessageDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceDefinition {
    pub type_name: TypeName,
    pub request: MessageDefinition,
    pub response: MessageDefinition,
}

#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
    #[error("Invalid type name [{0}]: expected <package>/<name>")]
    InvalidTypeName(String),
    #[error("{type_name}:{line}: {message}")]
    Syntax {
        type_name: TypeName,
        line: usize,
        message: String,
    },
    #[error("{type_name}: duplicate field [{field}]")]
    DuplicateField { type_name: TypeName, field: String },
    #[error("{type_name}: service definition has no '---' separator")]
    MissingSeparator { type_name: TypeName },
}

/// Normalize the ROS 2 `pkg/msg/Name` and `pkg/srv/Name` forms to `pkg/Name`.
pub fn normalize_type_name(type_name: &str) -> TypeName {
    let parts: Vec<&str> = type_name.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        [pkg, "msg" | "srv" | "action", name] => format!("{}/{}", pkg, name),
        _ => parts.join("/"),
    }
}

fn split_type_name(type_name: &str) -> std::result::Result<(String, String), DefinitionError> {
    let normalized = normalize_type_name(type_name);
    match normalized.split_once('/') {
        Some((pkg, name)) if !pkg.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((pkg.to_string(), name.to_string()))
        }
        _ => Err(DefinitionError::InvalidTypeName(type_name.to_string())),
    }
}

fn resolve_base_type(package: &str, raw: &str) -> BaseType {
    if let Some(p) = PrimitiveType::from_name(raw) {
        return BaseType::Primitive(p);
    }
    if raw == "Header" {
        return BaseType::Message("std_msgs/Header".into());
    }
    if raw.contains('/') {
        BaseType::Message(normalize_type_name(raw))
    } else {
        BaseType::Message(format!("{}/{}", package, raw))
    }
}

struct RawLine<'a> {
    ty: &'a str,
    array: Option<ArrayKind>,
    name: &'a str,
    tail: &'a str,
}

fn type_ident<'a>(s: &mut &'a str) -> Result<&'a str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || c == '_' || c == '/'
    })
    .parse_next(s)
}

fn field_ident<'a>(s: &mut &'a str) -> Result<&'a str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(s)
}

// `[]`, `[N]` or `[<=N]`
fn array_suffix(s: &mut &str) -> Result<ArrayKind> {
    delimited('[', opt((opt("<="), dec_uint::<_, u32, _>)), ']')
        .map(|bound| match bound {
            None => ArrayKind::Unbounded,
            Some((None, n)) => ArrayKind::Fixed(n as usize),
            Some((Some(_), n)) => ArrayKind::Bounded(n as usize),
        })
        .parse_next(s)
}

fn field_line<'a>(s: &mut &'a str) -> Result<RawLine<'a>> {
    let ty = type_ident.parse_next(s)?;
    // Bounded strings (`string<=10`) are treated as plain strings
    let _ = opt(preceded("<=", dec_uint::<_, u32, _>)).parse_next(s)?;
    let array = opt(array_suffix).parse_next(s)?;
    let _ = space1.parse_next(s)?;
    let name = field_ident.parse_next(s)?;
    let _ = space0.parse_next(s)?;
    let tail = rest.parse_next(s)?;
    Ok(RawLine {
        ty,
        array,
        name,
        tail,
    })
}

fn strip_comment(s: &str) -> &str {
    match s.find('#') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

/// Parse the body of a `.msg` file declaring `type_name`.
pub fn parse_message(
    type_name: &str,
    text: &str,
) -> std::result::Result<MessageDefinition, DefinitionError> {
    let (package, name) = split_type_name(type_name)?;
    let type_name = format!("{}/{}", package, name);
    let mut fields: Vec<FieldSpec> = Vec::new();
    let mut constants = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let syntax_err = |message: String| DefinitionError::Syntax {
            type_name: type_name.clone(),
            line: idx + 1,
            message,
        };

        let raw = field_line
            .parse(line)
            .map_err(|e| syntax_err(e.to_string()))?;

        if let Some(value) = raw.tail.strip_prefix('=') {
            let ty = PrimitiveType::from_name(raw.ty)
                .filter(|p| !matches!(p, PrimitiveType::Time | PrimitiveType::Duration))
                .ok_or_else(|| syntax_err(format!("constant of non-primitive type {}", raw.ty)))?;
            if raw.array.is_some() {
                return Err(syntax_err("array constants are not allowed".into()));
            }
            // String constants run to the end of the line, comments included
            let value = match ty {
                PrimitiveType::String => value.trim(),
                _ => strip_comment(value).trim(),
            };
            constants.push(Constant {
                ty,
                name: raw.name.to_string(),
                value: value.to_string(),
            });
            continue;
        }

        if fields.iter().any(|f| f.name == raw.name) {
            return Err(DefinitionError::DuplicateField {
                type_name: type_name.clone(),
                field: raw.name.to_string(),
            });
        }

        let default_text = strip_comment(raw.tail).trim();
        let default = if default_text.is_empty() {
            None
        } else {
            let parsed: JValue = serde_json5::from_str(default_text)
                .unwrap_or_else(|_| JValue::String(default_text.to_string()));
            Some(parsed)
        };

        fields.push(FieldSpec {
            name: raw.name.to_string(),
            base: resolve_base_type(&package, raw.ty),
            array: raw.array.unwrap_or(ArrayKind::Scalar),
            default,
        });
    }

    Ok(MessageDefinition {
        type_name,
        fields,
        constants,
    })
}

/// Parse the body of a `.srv` file: a request and a response part separated
/// by a `---` line.
pub fn parse_service(
    type_name: &str,
    text: &str,
) -> std::result::Result<ServiceDefinition, DefinitionError> {
    let (package, name) = split_type_name(type_name)?;
    let type_name = format!("{}/{}", package, name);

    let mut request = Vec::new();
    let mut response = Vec::new();
    let mut seen_separator = false;
    for line in text.lines() {
        if !seen_separator && line.trim() == "---" {
            seen_separator = true;
            continue;
        }
        if seen_separator {
            response.push(line);
        } else {
            request.push(line);
        }
    }
    if !seen_separator {
        return Err(DefinitionError::MissingSeparator { type_name });
    }

    Ok(ServiceDefinition {
        request: parse_message(&format!("{}Request", type_name), &request.join("\n"))?,
        response: parse_message(&format!("{}Response", type_name), &response.join("\n"))?,
        type_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fields_arrays_and_constants() {
        let def = parse_message(
            "test_msgs/Sample",
            r#"
            # A comment line
            Header header
            uint8 MODE_A=1   # trailing comment
            string GREETING=hello # not a comment
            float64[] values
            geometry_msgs/Point[3] corners
            Inner inner  # same package
            int32[<=4] bounded
            "#,
        )
        .unwrap();

        assert_eq!(def.type_name, "test_msgs/Sample");
        let names: Vec<_> = def.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["header", "values", "corners", "inner", "bounded"]
        );
        assert_eq!(
            def.field("header").unwrap().base,
            BaseType::Message("std_msgs/Header".into())
        );
        assert_eq!(def.field("values").unwrap().array, ArrayKind::Unbounded);
        assert_eq!(def.field("corners").unwrap().array, ArrayKind::Fixed(3));
        assert_eq!(def.field("bounded").unwrap().array, ArrayKind::Bounded(4));
        assert_eq!(
            def.field("inner").unwrap().base,
            BaseType::Message("test_msgs/Inner".into())
        );

        assert_eq!(def.constants.len(), 2);
        assert_eq!(def.constants[0].value, "1");
        assert_eq!(def.constants[1].value, "hello # not a comment");
    }

    #[test]
    fn parses_inline_defaults() {
        let def = parse_message("pkg/Defaults", "int32 count 5\nstring label \"x\"\n").unwrap();
        assert_eq!(def.field("count").unwrap().default, Some(json!(5)));
        assert_eq!(def.field("label").unwrap().default, Some(json!("x")));
    }

    #[test]
    fn rejects_bad_lines() {
        let err = parse_message("pkg/Bad", "int32\n").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax { line: 1, .. }));

        let err = parse_message("pkg/Bad", "int32 a\nint32 a\n").unwrap_err();
        assert_eq!(
            err,
            DefinitionError::DuplicateField {
                type_name: "pkg/Bad".into(),
                field: "a".into()
            }
        );

        let err = parse_message("Bad", "int32 a\n").unwrap_err();
        assert_eq!(err, DefinitionError::InvalidTypeName("Bad".into()));
    }

    #[test]
    fn parses_services() {
        let srv = parse_service(
            "rospy_tutorials/srv/AddTwoInts",
            "int64 a\nint64 b\n---\nint64 sum\n",
        )
        .unwrap();
        assert_eq!(srv.type_name, "rospy_tutorials/AddTwoInts");
        assert_eq!(srv.request.type_name, "rospy_tutorials/AddTwoIntsRequest");
        assert_eq!(srv.request.fields.len(), 2);
        assert_eq!(srv.response.type_name, "rospy_tutorials/AddTwoIntsResponse");
        assert_eq!(srv.response.fields[0].name, "sum");

        assert!(matches!(
            parse_service("pkg/NoSep", "int64 a\n"),
            Err(DefinitionError::MissingSeparator { .. })
        ));
    }

    #[test]
    fn normalizes_ros2_names() {
        assert_eq!(normalize_type_name("std_msgs/msg/String"), "std_msgs/String");
        assert_eq!(normalize_type_name("std_srvs/srv/SetBool"), "std_srvs/SetBool");
        assert_eq!(normalize_type_name("/std_msgs/String"), "std_msgs/String");
    }
}
