use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt, select};
use r2r::QosProfile;
use smol::LocalExecutor;
use tracing::{Level, debug, info, instrument};

use crate::core::{Dictionary, Middleware, OutputStream, Publisher, Topic, TypeName};
use crate::io::catalog::Catalog;
use crate::msg::normalize_type_name;
use crate::stream_utils::drop_guard_stream;
use crate::utils::cancellation_token::{CancellationToken, DropGuard};
use crate::utils::with_timeout;

/// `pkg/Name` to the ROS 2 interface name `pkg/<kind>/Name`.
pub fn to_ros_type(type_name: &str, kind: &str) -> String {
    let normalized = normalize_type_name(type_name);
    match normalized.split_once('/') {
        Some((pkg, name)) => format!("{}/{}/{}", pkg, kind, name),
        None => normalized,
    }
}

struct RosPublisher {
    publisher: r2r::PublisherUntyped,
}

#[async_trait(?Send)]
impl Publisher for RosPublisher {
    async fn publish(&self, payload: Dictionary) -> anyhow::Result<()> {
        self.publisher.publish(payload)?;
        Ok(())
    }
}

/// Middleware over a ROS 2 graph through r2r's untyped interfaces. The node is
/// spun on the local executor until the middleware and every stream it
/// handed out have been dropped.
pub struct RosMiddleware {
    node: Rc<RefCell<r2r::Node>>,
    name: String,
    catalog: Catalog,
    drop_guard: Rc<DropGuard>,
}

impl RosMiddleware {
    #[instrument(level = Level::INFO, skip(executor, catalog))]
    pub fn new(
        executor: Rc<LocalExecutor<'static>>,
        node_name: &str,
        catalog: Catalog,
    ) -> anyhow::Result<Self> {
        let ctx = r2r::Context::create()?;
        let node = r2r::Node::create(ctx, node_name.trim_start_matches('/'), "")?;
        let name = node.fully_qualified_name()?;
        let node = Rc::new(RefCell::new(node));

        // Spin until every holder of the drop guard is gone
        let cancellation_token = CancellationToken::new();
        let drop_guard = Rc::new(cancellation_token.drop_guard());
        let spin_node = node.clone();
        executor
            .spawn(async move {
                loop {
                    select! {
                        _ = cancellation_token.cancelled().fuse() => {
                            debug!("ROS node spinner cancelled");
                            return;
                        },
                        _ = smol::future::yield_now().fuse() => {
                            spin_node.borrow_mut().spin_once(Duration::from_millis(0));
                        },
                    }
                }
            })
            .detach();

        info!(%name, "Created ROS node");
        Ok(Self {
            node,
            name,
            catalog,
            drop_guard,
        })
    }
}

#[async_trait(?Send)]
impl Middleware for RosMiddleware {
    fn node_name(&self) -> &str {
        &self.name
    }

    async fn published_topics(&self) -> anyhow::Result<Vec<(Topic, TypeName)>> {
        let graph = self.node.borrow().get_topic_names_and_types()?;
        let mut topics: Vec<(Topic, TypeName)> = graph
            .into_iter()
            .filter_map(|(topic, types)| {
                types
                    .first()
                    .map(|ty| (topic.clone(), normalize_type_name(ty)))
            })
            .collect();
        topics.sort();
        Ok(topics)
    }

    async fn topic_type(&self, topic: &str) -> anyhow::Result<Option<TypeName>> {
        let live = self
            .published_topics()
            .await?
            .into_iter()
            .find(|(t, _)| t == topic)
            .map(|(_, ty)| ty);
        Ok(live.or_else(|| self.catalog.topics.get(topic).cloned()))
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn advertise(
        &self,
        topic: &str,
        type_name: &str,
    ) -> anyhow::Result<Box<dyn Publisher>> {
        let publisher = self.node.borrow_mut().create_publisher_untyped(
            topic,
            &to_ros_type(type_name, "msg"),
            QosProfile::default(),
        )?;
        Ok(Box::new(RosPublisher { publisher }))
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
    ) -> anyhow::Result<OutputStream<anyhow::Result<Dictionary>>> {
        let stream = self.node.borrow_mut().subscribe_untyped(
            topic,
            &to_ros_type(type_name, "msg"),
            QosProfile::default(),
        )?;
        let stream: OutputStream<anyhow::Result<Dictionary>> =
            Box::pin(stream.map(|msg| msg.map_err(anyhow::Error::from)));
        // Keep the node spinning while the stream is consumed
        Ok(drop_guard_stream(stream, self.drop_guard.clone()))
    }

    // ROS 2 offers no untyped service listing through r2r, so services are cataloged
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
        let client = self.node.borrow_mut().create_client_untyped(
            service,
            &to_ros_type(type_name, "srv"),
            QosProfile::default(),
        )?;
        let availability = r2r::Node::is_available(&client)?;
        let call = async {
            availability.await?;
            debug!(service, "Service available, sending request");
            let response = client.request(request)?.await??;
            anyhow::Ok(response)
        };
        with_timeout(timeout, call)
            .await
            .map_err(|e| anyhow!("Call to service {} timed out: {}", service, e))?
    }
}
