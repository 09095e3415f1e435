use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JValue;

pub type OutputStream<T> = futures::stream::LocalBoxStream<'static, T>;

/// A payload as it crosses the transport boundary: a plain key/value
/// dictionary. Typing happens on either side through `msg::MessageConverter`.
pub type Dictionary = JValue;

pub type Topic = String;
pub type TypeName = String;

#[async_trait(?Send)]
pub trait Publisher {
    async fn publish(&self, payload: Dictionary) -> anyhow::Result<()>;
}

/// The publish/subscribe and remote-call facilities of the host middleware,
/// together with its topic and service discovery.
#[async_trait(?Send)]
pub trait Middleware {
    /// Caller id of the node this middleware handle acts as (e.g. `/filterTest`)
    fn node_name(&self) -> &str;

    /// All topics currently known to the middleware with their message types
    async fn published_topics(&self) -> anyhow::Result<Vec<(Topic, TypeName)>>;

    async fn topic_type(&self, topic: &str) -> anyhow::Result<Option<TypeName>> {
        Ok(self
            .published_topics()
            .await?
            .into_iter()
            .find(|(t, _)| t == topic)
            .map(|(_, ty)| ty))
    }

    async fn advertise(&self, topic: &str, type_name: &str)
    -> anyhow::Result<Box<dyn Publisher>>;

    /// Subscribe to a topic. The stream yields every dictionary published
    /// after the subscription is established, or an error if the payload
    /// could not be decoded.
    async fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
    ) -> anyhow::Result<OutputStream<anyhow::Result<Dictionary>>>;

    async fn service_list(&self) -> anyhow::Result<Vec<String>>;

    async fn service_type(&self, service: &str) -> anyhow::Result<Option<TypeName>>;

    /// Invoke a service. `None` as timeout waits for the response forever.
    async fn call_service(
        &self,
        service: &str,
        type_name: &str,
        request: Dictionary,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Dictionary>;
}
