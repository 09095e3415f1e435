use std::time::Duration;

use async_compat::Compat as TokioCompat;
use testcontainers_modules::{
    mosquitto::{self, Mosquitto},
    testcontainers::{ContainerAsync, runners::AsyncRunner},
};
use tracing::{debug, instrument};

use crate::streams::with_timeout;

/// A running mosquitto container, removed when dropped.
pub struct MqttContainer {
    inner: Option<ContainerAsync<Mosquitto>>,
}

impl MqttContainer {
    pub async fn port(&self) -> anyhow::Result<u16> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Container already removed"))?;
        Ok(TokioCompat::new(inner.get_host_port_ipv4(1883)).await?)
    }

    pub async fn uri(&self) -> anyhow::Result<String> {
        Ok(format!("tcp://localhost:{}", self.port().await?))
    }
}

impl Drop for MqttContainer {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            // Removal needs the tokio reactor testcontainers runs on
            if let Err(e) = smol::block_on(TokioCompat::new(inner.rm())) {
                debug!(?e, "Failed to remove mosquitto container");
            }
        }
    }
}

#[instrument(level = tracing::Level::INFO)]
pub async fn start_mqtt() -> anyhow::Result<MqttContainer> {
    let image = mosquitto::Mosquitto::default();
    let container = with_timeout(
        TokioCompat::new(image.start()),
        10,
        "Starting mosquitto test container",
    )
    .await??;
    // Give the broker a moment to accept connections
    smol::Timer::after(Duration::from_millis(200)).await;
    Ok(MqttContainer {
        inner: Some(container),
    })
}
