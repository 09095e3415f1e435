use std::cell::RefCell;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::StreamExt;
use serde_json::Value as JValue;
use tracing::{Level, debug, info, instrument, warn};

use super::TestFailure;
use crate::core::{Dictionary, Message, Middleware, Topic};
use crate::msg::MessageConverter;
use crate::params::{ParamError, Params, is_truthy};

pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq)]
pub struct FilterTestConfig {
    pub topic_in: Topic,
    pub topic_out: Topic,
    pub msg_in: JValue,
    pub msg_out: JValue,
    /// `None` waits for the filtered message forever
    pub timeout: Option<Duration>,
    pub settle_time: Duration,
    pub poll_interval: Duration,
}

impl FilterTestConfig {
    pub fn from_params(params: &Params) -> Result<Self, TestFailure> {
        let not_initialized = |source: ParamError| TestFailure::NotInitialized {
            case: "filter_test",
            source,
        };
        let required = ["topic_in", "topic_out", "msg_in", "msg_out"];
        let mut values = Vec::with_capacity(required.len());
        for name in required {
            values.push(params.get(name).map_err(not_initialized)?);
        }
        for (name, value) in required.iter().zip(&values) {
            if !is_truthy(value) {
                return Err(TestFailure::EmptyParameter(name.to_string()));
            }
        }

        Ok(Self {
            topic_in: params
                .get_str("topic_in")
                .map_err(TestFailure::InvalidParameter)?,
            topic_out: params
                .get_str("topic_out")
                .map_err(TestFailure::InvalidParameter)?,
            msg_in: values[2].clone(),
            msg_out: values[3].clone(),
            timeout: params
                .get_duration_opt("timeout")
                .map_err(TestFailure::InvalidParameter)?,
            settle_time: params
                .get_duration_or("settle_time", DEFAULT_SETTLE_TIME)
                .map_err(TestFailure::InvalidParameter)?,
            poll_interval: params
                .get_duration_or("poll_interval", DEFAULT_POLL_INTERVAL)
                .map_err(TestFailure::InvalidParameter)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutcome {
    pub received: Message,
    /// Time from publication of the input to reception of the output
    pub latency: Duration,
}

#[derive(Default)]
struct Reception {
    published: bool,
    premature: bool,
    first: Option<(Dictionary, Instant)>,
}

/// Checks a node that turns one message on `topic_in` into one message on
/// `topic_out`.
pub struct FilterTest {
    config: FilterTestConfig,
}

impl FilterTest {
    pub fn new(config: FilterTestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterTestConfig {
        &self.config
    }

    fn build(
        converter: &MessageConverter<'_>,
        type_name: &str,
        dict: &JValue,
    ) -> Result<Message, TestFailure> {
        info!("Converting {} into {}", dict, type_name);
        let msg = converter
            .dictionary_to_message(type_name, dict)
            .map_err(|source| TestFailure::MessageConstruction {
                type_name: type_name.to_string(),
                dict: dict.clone(),
                source,
            })?;
        info!("Generated message: [{}]", msg);
        Ok(msg)
    }

    #[instrument(level = Level::INFO, skip_all, fields(topic_in = %self.config.topic_in, topic_out = %self.config.topic_out))]
    pub async fn run(
        &self,
        middleware: &dyn Middleware,
        converter: MessageConverter<'_>,
    ) -> Result<FilterOutcome, TestFailure> {
        let config = &self.config;
        info!("Testing filtering {}-{}", config.topic_in, config.topic_out);

        let published = middleware
            .published_topics()
            .await
            .map_err(TestFailure::Middleware)?;
        info!("Detected topics: {:?}", published);

        let type_in = middleware
            .topic_type(&config.topic_in)
            .await
            .map_err(TestFailure::Middleware)?
            .ok_or_else(|| TestFailure::UnknownTopicType(config.topic_in.clone()))?;
        info!("Type transiting on {}: {}", config.topic_in, type_in);
        let msg_in = Self::build(&converter, &type_in, &config.msg_in)?;

        let type_out = middleware
            .topic_type(&config.topic_out)
            .await
            .map_err(TestFailure::Middleware)?
            .ok_or_else(|| TestFailure::UnknownTopicType(config.topic_out.clone()))?;
        info!("Type transiting on {}: {}", config.topic_out, type_out);
        let expected = Self::build(&converter, &type_out, &config.msg_out)?;

        let mut output = middleware
            .subscribe(&config.topic_out, &type_out)
            .await
            .map_err(TestFailure::Middleware)?;
        let publisher = middleware
            .advertise(&config.topic_in, &type_in)
            .await
            .map_err(TestFailure::Middleware)?;
        let payload = converter
            .message_to_dictionary(&msg_in)
            .map_err(|source| TestFailure::MessageConstruction {
                type_name: type_in.clone(),
                dict: config.msg_in.clone(),
                source,
            })?;

        let reception = RefCell::new(Reception::default());

        // Records what arrives on the output topic for the whole test
        let receiver = async {
            while let Some(item) = output.next().await {
                let dict = item.map_err(TestFailure::Middleware)?;
                let mut state = reception.borrow_mut();
                if !state.published {
                    warn!(?dict, "Message received before publication");
                    state.premature = true;
                } else if state.first.is_none() {
                    info!("Message received!");
                    state.first = Some((dict, Instant::now()));
                } else {
                    debug!(?dict, "Ignoring further message");
                }
            }
            if reception.borrow().first.is_some() {
                // The driver picks the recorded message up on its next poll
                debug!("Output subscription ended after reception");
                return futures::future::pending::<Result<(Dictionary, Duration), TestFailure>>().await;
            }
            Err::<(Dictionary, Duration), _>(TestFailure::Middleware(anyhow!(
                "Subscription to {} ended",
                config.topic_out
            )))
        };

        let driver = async {
            smol::Timer::after(config.settle_time).await;
            if reception.borrow().premature {
                return Err::<(Dictionary, Duration), _>(TestFailure::PrematureReception);
            }
            reception.borrow_mut().published = true;
            let time_pub = Instant::now();
            publisher
                .publish(payload)
                .await
                .map_err(TestFailure::Middleware)?;
            debug!("Published input message");

            loop {
                if let Some((dict, stamp)) = reception.borrow_mut().first.take() {
                    return Ok((dict, stamp.saturating_duration_since(time_pub)));
                }
                if let Some(timeout) = config.timeout {
                    if time_pub.elapsed() > timeout {
                        return Err(TestFailure::Timeout(config.timeout));
                    }
                }
                // The receiver only runs while the driver is pending
                smol::future::yield_now().await;
                smol::Timer::after(config.poll_interval).await;
            }
        };

        let (received, latency) = smol::future::or(driver, receiver).await?;
        info!("A message has been received!");
        info!("Filter duration: {:?}", latency);

        let received = converter
            .strict(false)
            .dictionary_to_message(&type_out, &received)
            .map_err(|source| TestFailure::InvalidReceived {
                type_name: type_out.clone(),
                source,
            })?;
        if received != expected {
            return Err(TestFailure::UnexpectedMessage { expected, received });
        }
        Ok(FilterOutcome { received, latency })
    }
}
