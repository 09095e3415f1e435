use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use clap::ValueEnum;
use serde_json::json;
use tracing::{Level, error, info, instrument};

use super::filter::{FilterTest, FilterTestConfig};
use super::service::{ServiceTest, ServiceTestConfig};
use super::{Outcome, TestFailure, TestReport};
use crate::core::Middleware;
use crate::msg::MessageConverter;
use crate::params::Params;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum TestCase {
    /// Publish on one topic, expect one message on another
    Filter,
    /// Call a service, expect a response
    Service,
}

impl TestCase {
    /// Name of the test class, also the default node name
    pub fn class_name(&self) -> &'static str {
        match self {
            TestCase::Filter => "filterTest",
            TestCase::Service => "servicetest",
        }
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

async fn run_inner(
    case: TestCase,
    params: &Params,
    middleware: &dyn Middleware,
    converter: MessageConverter<'_>,
    details: &mut BTreeMap<String, serde_json::Value>,
) -> Result<(), TestFailure> {
    match case {
        TestCase::Filter => {
            let test = FilterTest::new(FilterTestConfig::from_params(params)?);
            let outcome = test.run(middleware, converter).await?;
            details.insert("latency_secs".into(), json!(outcome.latency.as_secs_f64()));
            details.insert("received".into(), json!(outcome.received.to_string()));
        }
        TestCase::Service => {
            let test = ServiceTest::new(ServiceTestConfig::from_params(params)?);
            let outcome = test.run(middleware, converter).await?;
            details.insert("latency_secs".into(), json!(outcome.latency.as_secs_f64()));
            details.insert("response".into(), outcome.response);
        }
    }
    Ok(())
}

/// Run one test case to completion. Failures end up in the report rather
/// than in the return value.
#[instrument(level = Level::INFO, skip(params, middleware, converter))]
pub async fn run_case(
    case: TestCase,
    params: &Params,
    middleware: &dyn Middleware,
    converter: MessageConverter<'_>,
) -> TestReport {
    let started = Instant::now();
    let mut details = BTreeMap::new();
    let outcome = match run_inner(case, params, middleware, converter, &mut details).await {
        Ok(()) => {
            info!("Test case passed");
            Outcome::Passed
        }
        Err(failure) => {
            error!(%failure, "Test case failed");
            Outcome::Failed {
                message: failure.to_string(),
            }
        }
    };
    TestReport {
        name: case.class_name().to_string(),
        node: middleware.node_name().to_string(),
        outcome,
        duration_secs: started.elapsed().as_secs_f64(),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_test;
    use crate::io::memory::MemoryBus;
    use crate::msg::TypeRegistry;
    use macro_rules_attribute::apply;

    #[apply(async_test)]
    async fn missing_parameters_fail_the_case() {
        let bus = MemoryBus::new();
        let registry = TypeRegistry::with_builtins();
        let params = Params::new("filterTest");
        let report = run_case(
            TestCase::Filter,
            &params,
            &bus.node("filterTest"),
            MessageConverter::new(&registry),
        )
        .await;
        assert!(!report.passed());
        assert_eq!(report.node, "/filterTest");
        let Outcome::Failed { message } = &report.outcome else {
            panic!("expected failure");
        };
        assert!(message.starts_with("filter_test not initialized properly"));
        assert!(message.contains("Resolved name: [/filterTest/topic_in]"));
        assert_eq!(report.summary_line(), "[node_test] filterTest ... FAIL");
    }

    #[apply(async_test)]
    async fn passing_service_case_records_response() {
        let bus = MemoryBus::new();
        bus.serve("/trigger", "std_srvs/Trigger", |_req| async move {
            Ok(json!({"success": true, "message": "done"}))
        });
        let registry = TypeRegistry::with_builtins();
        let mut params = Params::new("servicetest");
        params.set("service_name", json!("/trigger"));
        params.set("service_input", json!({}));
        params.set("service_output", json!({"success": true, "message": "done"}));
        let report = run_case(
            TestCase::Service,
            &params,
            &bus.node("servicetest"),
            MessageConverter::new(&registry),
        )
        .await;
        assert!(report.passed(), "{:?}", report.outcome);
        assert_eq!(
            report.details["response"],
            json!({"success": true, "message": "done"})
        );
    }
}
