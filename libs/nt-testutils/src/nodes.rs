//! Small nodes under test, written against the `Middleware` trait so that
//! the same node runs on the in-memory bus and over MQTT.

use std::rc::Rc;

use anyhow::anyhow;
use futures::StreamExt;
use serde_json::json;
use smol::LocalExecutor;
use tracing::{debug, info, instrument};

use node_test::{Dictionary, Middleware};

pub struct FilterNodeSpec {
    pub topic_in: String,
    pub type_in: String,
    pub topic_out: String,
    pub type_out: String,
}

impl FilterNodeSpec {
    pub fn new(topic_in: &str, type_in: &str, topic_out: &str, type_out: &str) -> Self {
        Self {
            topic_in: topic_in.into(),
            type_in: type_in.into(),
            topic_out: topic_out.into(),
            type_out: type_out.into(),
        }
    }
}

/// Start a node that republishes `transform(msg)` on the output topic for
/// every message on the input topic, skipping messages mapped to `None`.
/// Subscriptions are in place when this returns.
#[instrument(level = tracing::Level::INFO, skip_all, fields(topic_in = %spec.topic_in, topic_out = %spec.topic_out))]
pub async fn spawn_filter_node<M, F>(
    executor: Rc<LocalExecutor<'static>>,
    node: M,
    spec: FilterNodeSpec,
    transform: F,
) -> anyhow::Result<()>
where
    M: Middleware + 'static,
    F: Fn(Dictionary) -> Option<Dictionary> + 'static,
{
    let mut input = node.subscribe(&spec.topic_in, &spec.type_in).await?;
    let output = node.advertise(&spec.topic_out, &spec.type_out).await?;
    executor
        .spawn(async move {
            // Keep the node alive with its subscription
            let _node = node;
            while let Some(msg) = input.next().await {
                let msg = msg?;
                debug!(%msg, "Filter node received");
                if let Some(out) = transform(msg) {
                    output.publish(out).await?;
                }
            }
            info!("Filter node input ended");
            anyhow::Ok(())
        })
        .detach();
    Ok(())
}

/// Doubles the `data` field of integer messages.
pub fn double_data(msg: Dictionary) -> Option<Dictionary> {
    msg["data"].as_i64().map(|x| json!({"data": x * 2}))
}

/// Upper-cases the `data` field of string messages.
pub fn shout(msg: Dictionary) -> Option<Dictionary> {
    msg["data"]
        .as_str()
        .map(|s| json!({"data": s.to_uppercase()}))
}

/// Handler for `rospy_tutorials/AddTwoInts`-like services.
pub async fn add_two_ints(request: Dictionary) -> anyhow::Result<Dictionary> {
    match (request["a"].as_i64(), request["b"].as_i64()) {
        (Some(a), Some(b)) => Ok(json!({"sum": a + b})),
        _ => Err(anyhow!("a and b must be integers, got {}", request)),
    }
}

/// Handler for `std_srvs/SetBool`.
pub async fn set_bool(request: Dictionary) -> anyhow::Result<Dictionary> {
    let data = request["data"].as_bool().unwrap_or_default();
    Ok(json!({
        "success": data,
        "message": if data { "enabled" } else { "disabled" },
    }))
}

pub const ADD_TWO_INTS_SRV: &str = "int64 a\nint64 b\n---\nint64 sum\n";
