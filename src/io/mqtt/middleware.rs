use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, error, info, instrument, warn};
use uuid::Uuid;

use super::client::{MqttClient, MqttFactory, MqttMessage};
use crate::core::{Dictionary, Middleware, OutputStream, Publisher, Topic, TypeName};
use crate::io::catalog::Catalog;
use crate::msg::normalize_type_name;
use crate::utils::with_timeout;

pub const QOS: i32 = 1;
const MAX_PUBLISH_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: String,
    pub reply_to: String,
    pub request: Dictionary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceReply {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Dictionary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn request_topic(service: &str) -> String {
    format!("{}/request", service)
}

fn response_topic(service: &str, id: &str) -> String {
    format!("{}/response/{}", service, id)
}

// Publish, reconnecting between attempts when the connection has been lost
async fn publish_with_retry(client: &dyn MqttClient, message: MqttMessage) -> anyhow::Result<()> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match client.publish(message.clone()).await {
            Ok(_) => {
                debug!(topic = %message.topic, attempts, "Published MQTT message");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "Lost connection when publishing to topic {}, error: {:?}. Attempt #{}, trying to reconnect...",
                    message.topic, e, attempts
                );
                if attempts >= MAX_PUBLISH_ATTEMPTS {
                    error!(attempts, "Failed to publish, giving up on this message");
                    return Err(e);
                }
                match client.reconnect().await {
                    Ok(_) => debug!("Reconnected successfully, retrying publish"),
                    Err(re) => error!("Failed to reconnect: {:?}", re),
                }
            }
        }
    }
}

pub struct MqttPublisher {
    client: Box<dyn MqttClient>,
    topic: Topic,
}

#[async_trait(?Send)]
impl Publisher for MqttPublisher {
    async fn publish(&self, payload: Dictionary) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&payload)?;
        publish_with_retry(
            self.client.as_ref(),
            MqttMessage::new(self.topic.clone(), payload, QOS),
        )
        .await
    }
}

/// Middleware over an MQTT broker. Payloads are JSON dictionaries; topic and
/// service types come from the catalog since MQTT carries none.
pub struct MqttMiddleware {
    node_name: String,
    uri: String,
    factory: MqttFactory,
    client: Box<dyn MqttClient>,
    catalog: Catalog,
}

impl MqttMiddleware {
    #[instrument(level = Level::INFO, skip(catalog))]
    pub async fn connect(
        factory: MqttFactory,
        uri: &str,
        node_name: &str,
        catalog: Catalog,
    ) -> anyhow::Result<Self> {
        let client = factory.connect(uri).await?;
        info!(
            topics = catalog.topics.len(),
            services = catalog.services.len(),
            "Connected MQTT middleware"
        );
        Ok(Self {
            node_name: format!("/{}", node_name.trim_start_matches('/')),
            uri: uri.to_string(),
            factory,
            client,
            catalog,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn check_topic_type(&self, topic: &str, type_name: &str) -> anyhow::Result<()> {
        match self.catalog.topics.get(topic) {
            Some(known) if *known != normalize_type_name(type_name) => Err(anyhow!(
                "Topic {} is cataloged as {}, cannot use it as {}",
                topic,
                known,
                type_name
            )),
            _ => Ok(()),
        }
    }

    /// Answer requests for `service` with `handler`. The request subscription
    /// is in place when this returns; the returned future runs the responder
    /// until the connection closes.
    #[instrument(level = Level::INFO, skip(self, handler))]
    pub async fn serve_service<F, Fut>(
        &self,
        service: &str,
        handler: F,
    ) -> anyhow::Result<LocalBoxFuture<'static, anyhow::Result<()>>>
    where
        F: Fn(Dictionary) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Dictionary>> + 'static,
    {
        let (client, mut requests) = self.factory.connect_and_receive(&self.uri, 0).await?;
        let topic = request_topic(service);
        client.subscribe(&topic, QOS).await?;
        let service = service.to_string();

        Ok(Box::pin(async move {
            while let Some(msg) = requests.next().await {
                if msg.topic != topic {
                    continue;
                }
                let request: ServiceRequest = match serde_json::from_str(&msg.payload) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(%service, ?e, "Ignoring malformed service request");
                        continue;
                    }
                };
                debug!(%service, id = %request.id, "Handling service request");
                let reply = match handler(request.request).await {
                    Ok(response) => ServiceReply {
                        id: request.id,
                        response: Some(response),
                        error: None,
                    },
                    Err(e) => ServiceReply {
                        id: request.id,
                        response: None,
                        error: Some(e.to_string()),
                    },
                };
                let payload = serde_json::to_string(&reply)?;
                publish_with_retry(
                    client.as_ref(),
                    MqttMessage::new(request.reply_to, payload, QOS),
                )
                .await?;
            }
            debug!(%service, "Service request stream closed");
            Ok(())
        }))
    }
}

#[async_trait(?Send)]
impl Middleware for MqttMiddleware {
    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn published_topics(&self) -> anyhow::Result<Vec<(Topic, TypeName)>> {
        Ok(self
            .catalog
            .topics
            .iter()
            .map(|(t, ty)| (t.clone(), ty.clone()))
            .collect())
    }

    async fn advertise(
        &self,
        topic: &str,
        type_name: &str,
    ) -> anyhow::Result<Box<dyn Publisher>> {
        self.check_topic_type(topic, type_name)?;
        Ok(Box::new(MqttPublisher {
            client: self.client.clone(),
            topic: topic.to_string(),
        }))
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
    ) -> anyhow::Result<OutputStream<anyhow::Result<Dictionary>>> {
        self.check_topic_type(topic, type_name)?;
        // A connection per subscription keeps the streams independent
        let (client, messages) = self.factory.connect_and_receive(&self.uri, 0).await?;
        client.subscribe(topic, QOS).await?;
        let topic = topic.to_string();

        Ok(Box::pin(stream! {
            // Keep the connection open for as long as the stream is alive
            let _client = client;
            let mut messages = messages;
            while let Some(msg) = messages.next().await {
                if msg.topic != topic {
                    continue;
                }
                yield serde_json::from_str::<Dictionary>(&msg.payload)
                    .map_err(|e| anyhow!("Payload on {} is not a JSON dictionary: {}", topic, e));
            }
        }))
    }

    async fn service_list(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.catalog.services.keys().cloned().collect())
    }

    async fn service_type(&self, service: &str) -> anyhow::Result<Option<TypeName>> {
        Ok(self.catalog.services.get(service).cloned())
    }

    #[instrument(level = Level::DEBUG, skip(self, request))]
    async fn call_service(
        &self,
        service: &str,
        type_name: &str,
        request: Dictionary,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Dictionary> {
        let id = Uuid::new_v4().to_string();
        let reply_to = response_topic(service, &id);
        let (client, mut replies) = self.factory.connect_and_receive(&self.uri, 0).await?;
        client.subscribe(&reply_to, QOS).await?;

        let payload = serde_json::to_string(&ServiceRequest {
            id: id.clone(),
            reply_to: reply_to.clone(),
            request,
        })?;
        debug!(service, type_name, %id, "Sending service request");
        publish_with_retry(
            client.as_ref(),
            MqttMessage::new(request_topic(service), payload, QOS),
        )
        .await?;

        let wait_reply = async {
            while let Some(msg) = replies.next().await {
                if msg.topic != reply_to {
                    continue;
                }
                let reply: ServiceReply = match serde_json::from_str(&msg.payload) {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(service, ?e, "Ignoring malformed service reply");
                        continue;
                    }
                };
                if reply.id != id {
                    continue;
                }
                return match (reply.response, reply.error) {
                    (_, Some(err)) => Err(anyhow!("Service {} failed: {}", service, err)),
                    (Some(response), None) => Ok(response),
                    (None, None) => Err(anyhow!("Service {} sent an empty reply", service)),
                };
            }
            Err(anyhow!("Connection closed before service {} replied", service))
        };
        let outcome = with_timeout(timeout, wait_reply).await;

        if let Err(e) = client.disconnect().await {
            debug!(?e, "Failed to disconnect service client");
        }
        outcome.map_err(|e| anyhow!("Call to service {} timed out: {}", service, e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_test;
    use macro_rules_attribute::apply;
    use serde_json::json;
    use smol::LocalExecutor;
    use std::rc::Rc;

    fn mock_uri() -> String {
        format!("mock://{}", Uuid::new_v4())
    }

    #[apply(async_test)]
    async fn publishes_json_dictionaries(_ex: Rc<LocalExecutor<'static>>) -> anyhow::Result<()> {
        let uri = mock_uri();
        let catalog = Catalog::default().with_topic("/chatter", "std_msgs/String");
        let node = MqttMiddleware::connect(MqttFactory::Mock, &uri, "tester", catalog).await?;
        assert_eq!(node.node_name(), "/tester");
        assert_eq!(
            node.topic_type("/chatter").await?,
            Some("std_msgs/String".to_string())
        );

        let mut received = node.subscribe("/chatter", "std_msgs/String").await?;
        let publisher = node.advertise("/chatter", "std_msgs/String").await?;
        publisher.publish(json!({"data": "hello"})).await?;
        assert_eq!(received.next().await.unwrap()?, json!({"data": "hello"}));

        assert!(node.advertise("/chatter", "std_msgs/Bool").await.is_err());
        Ok(())
    }

    #[apply(async_test)]
    async fn request_reply_services(ex: Rc<LocalExecutor<'static>>) -> anyhow::Result<()> {
        let uri = mock_uri();
        let catalog = Catalog::default().with_service("/add", "rospy_tutorials/AddTwoInts");
        let node = MqttMiddleware::connect(MqttFactory::Mock, &uri, "tester", catalog).await?;

        let server = node
            .serve_service("/add", |req| async move {
                match (req["a"].as_i64(), req["b"].as_i64()) {
                    (Some(a), Some(b)) => Ok(json!({"sum": a + b})),
                    _ => Err(anyhow!("a and b must be integers")),
                }
            })
            .await?;
        ex.spawn(server).detach();

        assert_eq!(node.service_list().await?, vec!["/add".to_string()]);
        let resp = node
            .call_service(
                "/add",
                "rospy_tutorials/AddTwoInts",
                json!({"a": 4, "b": 5}),
                Some(Duration::from_secs(5)),
            )
            .await?;
        assert_eq!(resp, json!({"sum": 9}));

        let err = node
            .call_service(
                "/add",
                "rospy_tutorials/AddTwoInts",
                json!({"a": "x"}),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("a and b must be integers"));
        Ok(())
    }

    #[apply(async_test)]
    async fn unanswered_calls_time_out() {
        let uri = mock_uri();
        let catalog = Catalog::default().with_service("/ghost", "std_srvs/Trigger");
        let node = MqttMiddleware::connect(MqttFactory::Mock, &uri, "tester", catalog)
            .await
            .unwrap();
        let err = node
            .call_service(
                "/ghost",
                "std_srvs/Trigger",
                json!({}),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
