use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::future::LocalBoxFuture;
use futures::{FutureExt, StreamExt};
use tracing::{Level, debug, instrument, warn};

use crate::core::{Dictionary, Middleware, OutputStream, Publisher, Topic, TypeName};
use crate::msg::normalize_type_name;
use crate::utils::with_timeout;

type ServiceHandler = Rc<dyn Fn(Dictionary) -> LocalBoxFuture<'static, anyhow::Result<Dictionary>>>;

struct TopicState {
    type_name: TypeName,
    publishers: usize,
    subscribers: Vec<mpsc::UnboundedSender<Dictionary>>,
}

struct ServiceState {
    type_name: TypeName,
    handler: ServiceHandler,
}

#[derive(Default)]
struct BusState {
    topics: BTreeMap<Topic, TopicState>,
    services: BTreeMap<String, ServiceState>,
}

impl BusState {
    // A topic has a single type for its whole lifetime, whoever registers first
    fn register_topic(&mut self, topic: &str, type_name: &str) -> anyhow::Result<&mut TopicState> {
        let type_name = normalize_type_name(type_name);
        let state = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState {
                type_name: type_name.clone(),
                publishers: 0,
                subscribers: vec![],
            });
        if state.type_name != type_name {
            return Err(anyhow!(
                "Topic {} already carries {}, cannot use it as {}",
                topic,
                state.type_name,
                type_name
            ));
        }
        Ok(state)
    }
}

/// An in-process publish/subscribe and service bus. Nodes under test that
/// live in the same process attach to it through `MemoryBus::node`.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Rc<RefCell<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A middleware handle acting as the node `name`.
    pub fn node(&self, name: &str) -> MemoryNode {
        MemoryNode {
            bus: self.clone(),
            name: format!("/{}", name.trim_start_matches('/')),
        }
    }

    /// Serve `service` with `handler`. Replaces any previous server.
    pub fn serve<F, Fut>(&self, service: &str, type_name: &str, handler: F)
    where
        F: Fn(Dictionary) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Dictionary>> + 'static,
    {
        debug!(service, type_name, "Serving in-memory service");
        let handler: ServiceHandler = Rc::new(move |req| handler(req).boxed_local());
        self.state.borrow_mut().services.insert(
            service.to_string(),
            ServiceState {
                type_name: normalize_type_name(type_name),
                handler,
            },
        );
    }

    pub fn stop_serving(&self, service: &str) {
        self.state.borrow_mut().services.remove(service);
    }

    fn deliver(&self, topic: &str, payload: Dictionary) -> anyhow::Result<usize> {
        let mut state = self.state.borrow_mut();
        let topic_state = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| anyhow!("Topic {} is not advertised", topic))?;
        topic_state
            .subscribers
            .retain(|tx| tx.unbounded_send(payload.clone()).is_ok());
        Ok(topic_state.subscribers.len())
    }
}

pub struct MemoryPublisher {
    bus: MemoryBus,
    topic: Topic,
}

#[async_trait(?Send)]
impl Publisher for MemoryPublisher {
    async fn publish(&self, payload: Dictionary) -> anyhow::Result<()> {
        let receivers = self.bus.deliver(&self.topic, payload)?;
        debug!(topic = %self.topic, receivers, "Published in-memory message");
        Ok(())
    }
}

impl Drop for MemoryPublisher {
    fn drop(&mut self) {
        if let Some(state) = self.bus.state.borrow_mut().topics.get_mut(&self.topic) {
            state.publishers = state.publishers.saturating_sub(1);
        }
    }
}

pub struct MemoryNode {
    bus: MemoryBus,
    name: String,
}

impl MemoryNode {
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }
}

#[async_trait(?Send)]
impl Middleware for MemoryNode {
    fn node_name(&self) -> &str {
        &self.name
    }

    async fn published_topics(&self) -> anyhow::Result<Vec<(Topic, TypeName)>> {
        Ok(self
            .bus
            .state
            .borrow()
            .topics
            .iter()
            .filter(|(_, state)| state.publishers > 0)
            .map(|(topic, state)| (topic.clone(), state.type_name.clone()))
            .collect())
    }

    // Subscribed-only topics have a known type too
    async fn topic_type(&self, topic: &str) -> anyhow::Result<Option<TypeName>> {
        Ok(self
            .bus
            .state
            .borrow()
            .topics
            .get(topic)
            .map(|state| state.type_name.clone()))
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn advertise(
        &self,
        topic: &str,
        type_name: &str,
    ) -> anyhow::Result<Box<dyn Publisher>> {
        self.bus
            .state
            .borrow_mut()
            .register_topic(topic, type_name)?
            .publishers += 1;
        Ok(Box::new(MemoryPublisher {
            bus: self.bus.clone(),
            topic: topic.to_string(),
        }))
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
    ) -> anyhow::Result<OutputStream<anyhow::Result<Dictionary>>> {
        let (tx, rx) = mpsc::unbounded();
        self.bus
            .state
            .borrow_mut()
            .register_topic(topic, type_name)?
            .subscribers
            .push(tx);
        Ok(rx.map(Ok).boxed_local())
    }

    async fn service_list(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.bus.state.borrow().services.keys().cloned().collect())
    }

    async fn service_type(&self, service: &str) -> anyhow::Result<Option<TypeName>> {
        Ok(self
            .bus
            .state
            .borrow()
            .services
            .get(service)
            .map(|s| s.type_name.clone()))
    }

    #[instrument(level = Level::DEBUG, skip(self, request))]
    async fn call_service(
        &self,
        service: &str,
        type_name: &str,
        request: Dictionary,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Dictionary> {
        // Release the borrow before awaiting: handlers may use the bus themselves
        let handler = {
            let state = self.bus.state.borrow();
            let served = state
                .services
                .get(service)
                .ok_or_else(|| anyhow!("Service {} is not available", service))?;
            if served.type_name != normalize_type_name(type_name) {
                warn!(service, served = %served.type_name, requested = type_name, "Service type mismatch");
                return Err(anyhow!(
                    "Service {} has type {}, not {}",
                    service,
                    served.type_name,
                    type_name
                ));
            }
            served.handler.clone()
        };
        with_timeout(timeout, (*handler)(request))
            .await
            .map_err(|e| anyhow!("Call to service {} timed out: {}", service, e))?
    }
}
