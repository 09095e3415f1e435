use std::fmt::{self, Debug, Display};

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

// A typed field value. The width of integer fields is enforced when the
// value is built (see msg::converter), so storage is widened to 64 bits.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Time { secs: u32, nsecs: u32 },
    Duration { secs: i32, nsecs: i32 },
    List(Vec<Value>),
    Message(Message),
}

/// A strongly typed message instance: the fully qualified type name plus
/// its fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl Message {
    pub fn new(type_name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}
impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}
impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float32(value)
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}
impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}
impl From<Message> for Value {
    fn from(value: Message) -> Self {
        Value::Message(value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float32(x) => write!(f, "{}", x),
            Value::Float64(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Time { secs, nsecs } => write!(f, "time({}.{:09})", secs, nsecs),
            Value::Duration { secs, nsecs } => write!(f, "duration({}, {})", secs, nsecs),
            Value::List(vals) => {
                write!(f, "[")?;
                for (i, val) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", val)?;
                }
                write!(f, "]")
            }
            Value::Message(msg) => write!(f, "{}", msg),
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.type_name)?;
        for (i, (name, val)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}: {}", name, val)?;
        }
        write!(f, " }}")
    }
}

impl Serialize for Value {
    // Time and duration have no JSON counterpart, so they are written as the
    // {secs, nsecs} mapping the dictionary form of messages uses
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            // Widen through the decimal representation so 0.1f32 stays 0.1
            Value::Float32(x) => match x.to_string().parse::<f64>() {
                Ok(widened) => serializer.serialize_f64(widened),
                Err(_) => serializer.serialize_f64(f64::from(*x)),
            },
            Value::Float64(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Time { secs, nsecs } => {
                let mut m = serializer.serialize_map(Some(2))?;
                m.serialize_entry("secs", secs)?;
                m.serialize_entry("nsecs", nsecs)?;
                m.end()
            }
            Value::Duration { secs, nsecs } => {
                let mut m = serializer.serialize_map(Some(2))?;
                m.serialize_entry("secs", secs)?;
                m.serialize_entry("nsecs", nsecs)?;
                m.end()
            }
            Value::List(vals) => {
                let mut seq = serializer.serialize_seq(Some(vals.len()))?;
                for v in vals.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Message(msg) => msg.serialize(serializer),
        }
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut m = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in self.fields.iter() {
            m.serialize_entry(name, value)?;
        }
        m.end()
    }
}
