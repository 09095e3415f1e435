use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value as JValue;
use thiserror::Error;

use crate::core::{Message, Topic, TypeName};
use crate::msg::ConversionError;
use crate::params::ParamError;

pub mod filter;
pub use filter::{FilterOutcome, FilterTest, FilterTestConfig};
pub mod runner;
pub use runner::{TestCase, run_case};
pub mod service;
pub use service::{ServiceOutcome, ServiceTest, ServiceTestConfig};

/// Why a test case did not pass. Every variant is a test failure, not a
/// harness crash: the runner turns it into a failed report.
#[derive(Debug, Error)]
pub enum TestFailure {
    #[error("{case} not initialized properly \n {source}")]
    NotInitialized {
        case: &'static str,
        source: ParamError,
    },
    #[error(transparent)]
    InvalidParameter(ParamError),
    #[error("Parameter [{0}] is empty")]
    EmptyParameter(String),
    #[error("Middleware error: {0:#}")]
    Middleware(anyhow::Error),
    #[error("No type known for topic [{0}]")]
    UnknownTopicType(Topic),
    #[error("Message construction failed \nExpected type: [{type_name}]\ndictionary: [{dict}]\nError: [{source}]")]
    MessageConstruction {
        type_name: TypeName,
        dict: JValue,
        source: ConversionError,
    },
    #[error("No message should be received before publication!")]
    PrematureReception,
    #[error("filter out not received within indicated duration: [{}]", format_timeout(.0))]
    Timeout(Option<Duration>),
    #[error("Received message is not a valid [{type_name}]: {source}")]
    InvalidReceived {
        type_name: TypeName,
        source: ConversionError,
    },
    #[error("Received message differs from the expected one\n expected: {expected}\n received: {received}")]
    UnexpectedMessage { expected: Message, received: Message },
    #[error("Service [{service}] not found among {available:?}")]
    ServiceNotFound {
        service: String,
        available: Vec<String>,
    },
    #[error("Service proxy could not be created for [{service}]: {reason}")]
    ProxyCreation { service: String, reason: String },
    #[error("Service proxy error: {0}")]
    ServiceCall(String),
    #[error("Service response differs from the expected one:\n{}", .diff.join("\n"))]
    ResponseMismatch {
        expected: JValue,
        actual: JValue,
        diff: Vec<String>,
    },
}

fn format_timeout(timeout: &Option<Duration>) -> String {
    match timeout {
        Some(t) => format!("{}", t.as_secs_f64()),
        None => "None".to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { message: String },
}

impl Outcome {
    pub fn passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

/// The result of one test case run, as printed and as written with
/// `--report`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub node: String,
    pub outcome: Outcome,
    pub duration_secs: f64,
    #[serde(default)]
    pub details: BTreeMap<String, JValue>,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }

    pub fn summary_line(&self) -> String {
        let status = if self.passed() { "ok" } else { "FAIL" };
        format!("[node_test] {} ... {}", self.name, status)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Report {} could not be written", path.display()))
    }
}
