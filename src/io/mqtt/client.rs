use anyhow::anyhow;
use async_stream::stream;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt, stream::BoxStream};
use paho_mqtt::{self as mqtt};
use std::time::Duration;
use tracing::{Level, debug, info, instrument, warn};
use uuid::Uuid;

/* An interface for creating MQTT clients, so that the middleware can run
 * against a real broker (Paho) or the in-process mock broker used by the
 * tests. */

#[derive(Clone, Debug)]
pub enum MqttFactory {
    Paho,
    Mock,
}

impl MqttFactory {
    /// Connect to the MQTT broker at the given URI and return the connected client
    pub async fn connect(&self, uri: &str) -> anyhow::Result<Box<dyn MqttClient>> {
        info!(?uri, "Connecting to MQTT broker with factory {:?}", self);
        match self {
            MqttFactory::Paho => paho::connect(uri).await,
            MqttFactory::Mock => mock::connect(uri).await,
        }
    }

    /// Connect to the MQTT broker at the given URI and return the connected client and a stream
    /// for receiving data
    pub async fn connect_and_receive(
        &self,
        uri: &str,
        max_reconnect_attempts: u32,
    ) -> anyhow::Result<(Box<dyn MqttClient>, BoxStream<'static, MqttMessage>)> {
        info!(
            ?uri,
            "Connecting and receiving to MQTT broker with factory {:?}", self
        );
        match self {
            MqttFactory::Paho => paho::connect_and_receive(uri, max_reconnect_attempts).await,
            MqttFactory::Mock => mock::connect_and_receive(uri).await,
        }
    }
}

#[async_trait]
pub trait MqttClient: Send + Sync {
    async fn publish(&self, message: MqttMessage) -> anyhow::Result<()>;

    async fn reconnect(&self) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;

    async fn subscribe(&self, topic: &str, qos: i32) -> anyhow::Result<()>;

    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()>;

    fn clone_box(&self) -> Box<dyn MqttClient>;
}

impl Clone for Box<dyn MqttClient> {
    fn clone(&self) -> Box<dyn MqttClient> {
        self.clone_box()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
    pub qos: i32,
}

impl MqttMessage {
    pub fn new(topic: String, payload: String, qos: i32) -> Self {
        Self {
            topic,
            payload,
            qos,
        }
    }
}

/// MQTT topic filter matching with the `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

pub struct PahoClient {
    client: mqtt::AsyncClient,
}

#[async_trait]
impl MqttClient for PahoClient {
    async fn publish(&self, message: MqttMessage) -> anyhow::Result<()> {
        self.client
            .publish(mqtt::Message::new(
                message.topic,
                message.payload,
                message.qos,
            ))
            .await?;
        Ok(())
    }

    async fn reconnect(&self) -> anyhow::Result<()> {
        match self.client.reconnect().await {
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow!("{}", e)),
        }
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        match self.client.disconnect(None).await {
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow!("{}", e)),
        }
    }

    async fn subscribe(&self, topic: &str, qos: i32) -> anyhow::Result<()> {
        match self.client.subscribe(topic, qos).await {
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow!("{}", e)),
        }
    }

    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
        match self.client.unsubscribe(topic).await {
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow!("{}", e)),
        }
    }

    fn clone_box(&self) -> Box<dyn MqttClient> {
        Box::new(PahoClient {
            client: self.client.clone(),
        })
    }
}

mod paho {
    use super::*;

    async fn connect_impl(
        mqtt_client: mqtt::AsyncClient,
        opts: mqtt::ConnectOptions,
    ) -> Result<mqtt::AsyncClient, mqtt::Error> {
        // Try to connect to the broker
        mqtt_client.connect(opts).await.map(|_| mqtt_client)
    }

    fn new_client_impl(
        uri: &str,
    ) -> Result<(mqtt::AsyncClient, mqtt::ConnectOptions), mqtt::Error> {
        let create_opts = mqtt::CreateOptionsBuilder::new_v3()
            .server_uri(uri)
            .client_id(format!("node_test_{}", Uuid::new_v4()))
            .finalize();

        let opts = mqtt::ConnectOptionsBuilder::new_v3()
            .keep_alive_interval(Duration::from_secs(30))
            .clean_session(true)
            .finalize();

        let (client, opts) = mqtt::AsyncClient::new(create_opts).map(|client| (client, opts))?;
        debug!(?uri, client_id = client.client_id(), "Created MQTT client",);

        Ok((client, opts))
    }

    #[instrument(level=Level::INFO, skip(client))]
    fn message_stream(
        mut client: mqtt::AsyncClient,
        max_reconnect_attempts: u32,
    ) -> BoxStream<'static, MqttMessage> {
        Box::pin(stream! {
            let mut reconnect_attempts = 0;

            loop {
                let mut stream = client.get_stream(10);

                // Inner loop to read from current stream
                while let Some(msg) = stream.next().await {
                    match msg {
                        Some(message) => {
                            debug!(topic = message.topic(), "Received MQTT message");
                            yield MqttMessage::new(
                                message.topic().to_string(),
                                message.payload_str().to_string(),
                                message.qos() as i32,
                            );
                            reconnect_attempts = 0;
                        }
                        None => {
                            debug!("MQTT connection lost, will attempt reconnect");
                            break;
                        }
                    }
                }

                if max_reconnect_attempts == 0 {
                    warn!("Connection lost. Reconnection disabled (max_reconnect_attempts=0), stopping MQTT stream");
                    break;
                }

                reconnect_attempts += 1;
                if reconnect_attempts > max_reconnect_attempts {
                    warn!("Max reconnection attempts ({}) reached, stopping MQTT stream", max_reconnect_attempts);
                    break;
                }
                warn!(attempt = reconnect_attempts, "Connection lost. Attempting reconnect...");

                let reconnect_future = client.reconnect();
                let timeout_future = smol::Timer::after(Duration::from_millis(500));

                futures::select! {
                    result = FutureExt::fuse(reconnect_future) => {
                        match result {
                            Ok(_) => {
                                info!("MQTT client reconnected successfully after {} attempts", reconnect_attempts);
                                continue;
                            }
                            Err(err) => {
                                warn!(?err, attempt = reconnect_attempts, "MQTT client reconnection failed");
                                break;
                            }
                        }
                    }
                    _ = FutureExt::fuse(timeout_future) => {
                        warn!("MQTT reconnection timeout after 500ms, attempt {}/{}", reconnect_attempts, max_reconnect_attempts);
                        break;
                    }
                }
            }
        })
    }

    pub(crate) async fn connect(uri: &str) -> anyhow::Result<Box<dyn MqttClient>> {
        let (client, opts) = new_client_impl(uri)?;
        let client = connect_impl(client, opts).await?;
        Ok(Box::new(PahoClient { client }) as Box<dyn MqttClient>)
    }

    pub(crate) async fn connect_and_receive(
        uri: &str,
        max_reconnect_attempts: u32,
    ) -> anyhow::Result<(Box<dyn MqttClient>, BoxStream<'static, MqttMessage>)> {
        let (client, opts) = new_client_impl(uri)?;
        // The stream must exist before connecting so no message is missed
        let stream = message_stream(client.clone(), max_reconnect_attempts);
        let client = connect_impl(client, opts).await?;
        Ok((Box::new(PahoClient { client }), stream))
    }
}

mod mock {
    use super::*;
    use futures::channel::mpsc;
    use futures::lock::Mutex;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, OnceLock};

    struct MockSession {
        subscriptions: BTreeSet<String>,
        sender: Option<mpsc::UnboundedSender<MqttMessage>>,
    }

    /// In-process broker. Sessions are grouped by broker URI so that tests
    /// using distinct URIs do not see each other's traffic.
    #[derive(Default)]
    pub struct MockBroker {
        sessions: BTreeMap<String, BTreeMap<u32, MockSession>>,
        client_id_counter: u32,
    }

    pub type SharedBroker = Arc<Mutex<MockBroker>>;

    impl MockBroker {
        fn new_session(
            &mut self,
            uri: &str,
            sender: Option<mpsc::UnboundedSender<MqttMessage>>,
        ) -> u32 {
            let id = self.client_id_counter;
            self.client_id_counter += 1;
            self.sessions.entry(uri.to_string()).or_default().insert(
                id,
                MockSession {
                    subscriptions: BTreeSet::new(),
                    sender,
                },
            );
            id
        }

        pub fn publish(&mut self, uri: &str, msg: MqttMessage) {
            let Some(sessions) = self.sessions.get_mut(uri) else {
                return;
            };
            for (id, session) in sessions.iter_mut() {
                let matched = session
                    .subscriptions
                    .iter()
                    .any(|filter| topic_matches(filter, &msg.topic));
                if !matched {
                    continue;
                }
                if let Some(sender) = &session.sender {
                    debug!(?id, topic = %msg.topic, "MockBroker forwarding message");
                    if sender.unbounded_send(msg.clone()).is_err() {
                        session.sender = None;
                    }
                }
            }
        }

        fn session(&mut self, uri: &str, id: u32) -> anyhow::Result<&mut MockSession> {
            self.sessions
                .get_mut(uri)
                .and_then(|m| m.get_mut(&id))
                .ok_or_else(|| anyhow!("Client {} not found in mock broker", id))
        }

        pub fn subscribe(&mut self, uri: &str, topic: &str, id: u32) -> anyhow::Result<()> {
            self.session(uri, id)?
                .subscriptions
                .insert(topic.to_string());
            Ok(())
        }

        pub fn unsubscribe(&mut self, uri: &str, topic: &str, id: u32) -> anyhow::Result<()> {
            self.session(uri, id)?.subscriptions.remove(topic);
            Ok(())
        }

        pub fn disconnect(&mut self, uri: &str, id: u32) {
            if let Some(sessions) = self.sessions.get_mut(uri) {
                sessions.remove(&id);
            }
        }
    }

    pub fn global_broker() -> &'static SharedBroker {
        static BROKER: OnceLock<SharedBroker> = OnceLock::new();
        BROKER.get_or_init(|| Arc::new(Mutex::new(MockBroker::default())))
    }

    pub async fn connect(uri: &str) -> anyhow::Result<Box<dyn MqttClient>> {
        let id = global_broker().lock().await.new_session(uri, None);
        Ok(Box::new(MockClient {
            uri: uri.to_string(),
            id,
        }))
    }

    pub async fn connect_and_receive(
        uri: &str,
    ) -> anyhow::Result<(Box<dyn MqttClient>, BoxStream<'static, MqttMessage>)> {
        let (tx, rx) = mpsc::unbounded();
        let id = global_broker().lock().await.new_session(uri, Some(tx));
        let client = Box::new(MockClient {
            uri: uri.to_string(),
            id,
        }) as Box<dyn MqttClient>;
        Ok((client, rx.boxed()))
    }
}

pub struct MockClient {
    uri: String,
    id: u32,
}

#[async_trait]
impl MqttClient for MockClient {
    async fn publish(&self, message: MqttMessage) -> anyhow::Result<()> {
        mock::global_broker().lock().await.publish(&self.uri, message);
        Ok(())
    }
    async fn reconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn disconnect(&self) -> anyhow::Result<()> {
        mock::global_broker().lock().await.disconnect(&self.uri, self.id);
        Ok(())
    }
    async fn subscribe(&self, topic: &str, _qos: i32) -> anyhow::Result<()> {
        mock::global_broker()
            .lock()
            .await
            .subscribe(&self.uri, topic, self.id)
    }
    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
        mock::global_broker()
            .lock()
            .await
            .unsubscribe(&self.uri, topic, self.id)
    }

    fn clone_box(&self) -> Box<dyn MqttClient> {
        Box::new(MockClient {
            uri: self.uri.clone(),
            id: self.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_test;
    use macro_rules_attribute::apply;

    #[test]
    fn matches_wildcards() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/c"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("/svc/response/#", "/svc/response/1234"));
    }

    #[apply(async_test)]
    async fn mock_broker_routes_by_subscription() -> anyhow::Result<()> {
        let uri = format!("mock://{}", Uuid::new_v4());
        let (sub_client, mut stream) = MqttFactory::Mock.connect_and_receive(&uri, 0).await?;
        sub_client.subscribe("sensors/+", 1).await?;
        let pub_client = MqttFactory::Mock.connect(&uri).await?;

        pub_client
            .publish(MqttMessage::new("other".into(), "0".into(), 1))
            .await?;
        pub_client
            .publish(MqttMessage::new("sensors/a".into(), "1".into(), 1))
            .await?;

        let msg = stream.next().await.expect("message should be forwarded");
        assert_eq!(msg, MqttMessage::new("sensors/a".into(), "1".into(), 1));
        Ok(())
    }
}
