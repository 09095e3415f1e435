use std::rc::Rc;

use smol::LocalExecutor;
use tracing::{Level, info, instrument, warn};

use super::args::{Cli, Transport};
use crate::core::{MQTT_HOSTNAME, MQTT_PORT, Middleware};
use crate::io::catalog::Catalog;
use crate::io::mqtt::{MqttFactory, MqttMiddleware};
use crate::msg::TypeRegistry;
use crate::params::Params;

#[derive(Clone, Debug)]
pub enum TransportSpec {
    Mqtt { factory: MqttFactory, uri: String },
    Ros,
}

impl From<&Cli> for TransportSpec {
    fn from(cli: &Cli) -> Self {
        match cli.transport {
            Transport::Mqtt => TransportSpec::Mqtt {
                factory: cli.mqtt_factory.clone().into(),
                uri: cli
                    .mqtt_uri
                    .clone()
                    .unwrap_or_else(|| format!("tcp://{}:{}", MQTT_HOSTNAME, MQTT_PORT)),
            },
            Transport::Ros => TransportSpec::Ros,
        }
    }
}

impl Cli {
    pub fn node(&self) -> String {
        self.node_name
            .clone()
            .unwrap_or_else(|| self.case.class_name().to_string())
    }

    /// Parameters from `--params`, then every `--param` override in order.
    pub fn load_params(&self) -> anyhow::Result<Params> {
        let mut params = match &self.params {
            Some(path) => Params::from_file(self.node(), path)?,
            None => Params::new(self.node()),
        };
        for assignment in &self.overrides {
            params.apply_override(assignment)?;
        }
        Ok(params)
    }

    pub fn load_registry(&self) -> anyhow::Result<TypeRegistry> {
        let mut registry = TypeRegistry::with_builtins();
        for root in &self.msg_path {
            registry.load_dir(root)?;
        }
        for (owner, missing) in registry.unresolved() {
            warn!(%owner, %missing, "Nested type is not defined");
        }
        Ok(registry)
    }
}

#[instrument(level = Level::INFO, skip(executor, catalog))]
pub async fn build_middleware(
    spec: TransportSpec,
    executor: Rc<LocalExecutor<'static>>,
    node_name: &str,
    catalog: Catalog,
) -> anyhow::Result<Box<dyn Middleware>> {
    match spec {
        TransportSpec::Mqtt { factory, uri } => {
            info!(%uri, "Using MQTT transport");
            let middleware = MqttMiddleware::connect(factory, &uri, node_name, catalog).await?;
            Ok(Box::new(middleware))
        }
        #[cfg(feature = "ros")]
        TransportSpec::Ros => {
            info!("Using ROS 2 transport");
            let middleware =
                crate::io::ros::RosMiddleware::new(executor, node_name, catalog)?;
            Ok(Box::new(middleware))
        }
        #[cfg(not(feature = "ros"))]
        TransportSpec::Ros => {
            let _ = (executor, catalog);
            Err(anyhow::anyhow!(
                "ROS transport requested but node_test was built without the `ros` feature"
            ))
        }
    }
}
