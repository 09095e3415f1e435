use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::{Level, debug, info, instrument};

use super::definition::{
    BaseType, DefinitionError, MessageDefinition, ServiceDefinition, normalize_type_name,
    parse_message, parse_service,
};
use crate::core::TypeName;

// Interface definitions every ROS installation ships with, so that common
// topics and services can be exercised without a --msg-path.
const BUILTIN_MESSAGES: &[(&str, &str)] = &[
    ("std_msgs/Header", "uint32 seq\ntime stamp\nstring frame_id\n"),
    ("std_msgs/Empty", ""),
    ("std_msgs/Bool", "bool data\n"),
    ("std_msgs/String", "string data\n"),
    ("std_msgs/Int32", "int32 data\n"),
    ("std_msgs/Int64", "int64 data\n"),
    ("std_msgs/UInt8", "uint8 data\n"),
    ("std_msgs/Float32", "float32 data\n"),
    ("std_msgs/Float64", "float64 data\n"),
    ("std_msgs/Time", "time data\n"),
    ("std_msgs/Duration", "duration data\n"),
    ("geometry_msgs/Point", "float64 x\nfloat64 y\nfloat64 z\n"),
    ("geometry_msgs/Vector3", "float64 x\nfloat64 y\nfloat64 z\n"),
    (
        "geometry_msgs/Quaternion",
        "float64 x\nfloat64 y\nfloat64 z\nfloat64 w\n",
    ),
    ("geometry_msgs/Pose", "Point position\nQuaternion orientation\n"),
    ("geometry_msgs/PoseStamped", "Header header\nPose pose\n"),
    ("geometry_msgs/Twist", "Vector3 linear\nVector3 angular\n"),
];

const BUILTIN_SERVICES: &[(&str, &str)] = &[
    ("std_srvs/Empty", "---\n"),
    ("std_srvs/SetBool", "bool data\n---\nbool success\nstring message\n"),
    ("std_srvs/Trigger", "---\nbool success\nstring message\n"),
];

/// Message and service definitions known to the converter, keyed by their
/// normalized `pkg/Name` type name.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    messages: BTreeMap<TypeName, MessageDefinition>,
    services: BTreeMap<TypeName, ServiceDefinition>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, text) in BUILTIN_MESSAGES {
            registry
                .add_message_text(name, text)
                .expect("builtin message definitions are valid");
        }
        for (name, text) in BUILTIN_SERVICES {
            registry
                .add_service_text(name, text)
                .expect("builtin service definitions are valid");
        }
        registry
    }

    pub fn add_message(&mut self, def: MessageDefinition) {
        debug!(type_name = %def.type_name, "Registering message type");
        self.messages.insert(def.type_name.clone(), def);
    }

    pub fn add_message_text(&mut self, type_name: &str, text: &str) -> Result<(), DefinitionError> {
        let def = parse_message(type_name, text)?;
        self.add_message(def);
        Ok(())
    }

    /// Register a service together with its `<Srv>Request`/`<Srv>Response`
    /// message types.
    pub fn add_service(&mut self, def: ServiceDefinition) {
        debug!(type_name = %def.type_name, "Registering service type");
        self.add_message(def.request.clone());
        self.add_message(def.response.clone());
        self.services.insert(def.type_name.clone(), def);
    }

    pub fn add_service_text(&mut self, type_name: &str, text: &str) -> Result<(), DefinitionError> {
        let def = parse_service(type_name, text)?;
        self.add_service(def);
        Ok(())
    }

    pub fn message(&self, type_name: &str) -> Option<&MessageDefinition> {
        self.messages.get(&normalize_type_name(type_name))
    }

    pub fn service(&self, type_name: &str) -> Option<&ServiceDefinition> {
        self.services.get(&normalize_type_name(type_name))
    }

    pub fn message_types(&self) -> impl Iterator<Item = &TypeName> {
        self.messages.keys()
    }

    /// Nested message types referenced by some definition but not registered.
    pub fn unresolved(&self) -> Vec<(TypeName, TypeName)> {
        self.messages
            .values()
            .flat_map(|def| {
                def.fields.iter().filter_map(move |f| match &f.base {
                    BaseType::Message(t) if !self.messages.contains_key(t) => {
                        Some((def.type_name.clone(), t.clone()))
                    }
                    _ => None,
                })
            })
            .collect()
    }

    /// Load every `<pkg>/msg/*.msg` and `<pkg>/srv/*.srv` below `root`.
    /// `root` may also point at a single package directory.
    #[instrument(level = Level::INFO, skip_all, fields(root = %root.as_ref().display()))]
    pub fn load_dir(&mut self, root: impl AsRef<Path>) -> anyhow::Result<usize> {
        let root = root.as_ref();
        let mut packages = vec![root.to_path_buf()];
        for entry in fs::read_dir(root).with_context(|| format!("Reading {}", root.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                packages.push(path);
            }
        }

        let mut loaded = 0;
        for pkg_dir in packages {
            let Some(package) = pkg_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for (sub, is_service) in [("msg", false), ("srv", true)] {
                let dir = pkg_dir.join(sub);
                if !dir.is_dir() {
                    continue;
                }
                for entry in fs::read_dir(&dir)? {
                    let path = entry?.path();
                    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                        continue;
                    };
                    if ext != sub {
                        continue;
                    }
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let type_name = format!("{}/{}", package, stem);
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("Reading {}", path.display()))?;
                    if is_service {
                        self.add_service_text(&type_name, &text)?;
                    } else {
                        self.add_message_text(&type_name, &text)?;
                    }
                    loaded += 1;
                }
            }
        }

        info!(loaded, "Loaded interface definitions");
        Ok(loaded)
    }
}
