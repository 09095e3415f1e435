pub mod client;
pub use client::{MqttClient, MqttFactory, MqttMessage, topic_matches};
pub mod middleware;
pub use middleware::{MqttMiddleware, ServiceReply, ServiceRequest, request_topic};
