use std::collections::BTreeMap;

use crate::core::{Topic, TypeName};
use crate::msg::normalize_type_name;
use crate::params::{ParamError, Params};

/// Static discovery information for transports that carry no type system of
/// their own (MQTT), or no service listing (ROS 2 through r2r).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    pub topics: BTreeMap<Topic, TypeName>,
    pub services: BTreeMap<String, TypeName>,
}

impl Catalog {
    /// Read the `topic_types` and `service_types` parameters.
    pub fn from_params(params: &Params) -> Result<Self, ParamError> {
        let normalize = |map: BTreeMap<String, String>| -> BTreeMap<String, TypeName> {
            map.into_iter()
                .map(|(k, v)| (k, normalize_type_name(&v)))
                .collect()
        };
        Ok(Self {
            topics: normalize(params.get_string_map("topic_types")?),
            services: normalize(params.get_string_map("service_types")?),
        })
    }

    pub fn with_topic(mut self, topic: &str, type_name: &str) -> Self {
        self.topics
            .insert(topic.to_string(), normalize_type_name(type_name));
        self
    }

    pub fn with_service(mut self, service: &str, type_name: &str) -> Self {
        self.services
            .insert(service.to_string(), normalize_type_name(type_name));
        self
    }
}
