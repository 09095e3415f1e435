pub mod compare;
pub use compare::{dictionaries_equal, differences};
pub mod converter;
pub use converter::{ConversionError, MessageConverter};
pub mod definition;
pub use definition::{
    ArrayKind, BaseType, DefinitionError, FieldSpec, MessageDefinition, PrimitiveType,
    ServiceDefinition, normalize_type_name, parse_message, parse_service,
};
pub mod registry;
pub use registry::TypeRegistry;
