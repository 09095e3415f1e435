use std::time::{Duration, Instant};

use serde_json::Value as JValue;
use tracing::{Level, debug, info, instrument};

use super::TestFailure;
use crate::core::Middleware;
use crate::msg::{MessageConverter, dictionaries_equal, differences};
use crate::params::{ParamError, Params};

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceTestConfig {
    pub service_name: String,
    pub service_input: JValue,
    pub service_output: JValue,
    pub timeout: Option<Duration>,
}

impl ServiceTestConfig {
    pub fn from_params(params: &Params) -> Result<Self, TestFailure> {
        let not_initialized = |source: ParamError| TestFailure::NotInitialized {
            case: "service_test",
            source,
        };
        params.get("service_name").map_err(not_initialized)?;
        let service_input = params
            .get("service_input")
            .map_err(not_initialized)?
            .clone();
        let service_output = params
            .get("service_output")
            .map_err(not_initialized)?
            .clone();
        // Keyword input and expected response are both mappings
        params
            .get_mapping("service_input")
            .map_err(TestFailure::InvalidParameter)?;
        params
            .get_mapping("service_output")
            .map_err(TestFailure::InvalidParameter)?;

        Ok(Self {
            service_name: params
                .get_str("service_name")
                .map_err(TestFailure::InvalidParameter)?,
            service_input,
            service_output,
            timeout: params
                .get_duration_opt("service_timeout")
                .map_err(TestFailure::InvalidParameter)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceOutcome {
    pub response: JValue,
    pub latency: Duration,
}

/// Calls one service with keyword input and checks the response.
pub struct ServiceTest {
    config: ServiceTestConfig,
}

impl ServiceTest {
    pub fn new(config: ServiceTestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServiceTestConfig {
        &self.config
    }

    #[instrument(level = Level::INFO, skip_all, fields(service = %self.config.service_name))]
    pub async fn run(
        &self,
        middleware: &dyn Middleware,
        converter: MessageConverter<'_>,
    ) -> Result<ServiceOutcome, TestFailure> {
        let config = &self.config;
        let service = config.service_name.as_str();
        info!(
            "Testing service {} with input parameters {}",
            service, config.service_input
        );
        if service.is_empty() {
            return Err(TestFailure::EmptyParameter("service_name".into()));
        }

        let available = middleware
            .service_list()
            .await
            .map_err(TestFailure::Middleware)?;
        if !available.iter().any(|s| s == service) {
            return Err(TestFailure::ServiceNotFound {
                service: service.to_string(),
                available,
            });
        }

        let proxy_error = |reason: String| TestFailure::ProxyCreation {
            service: service.to_string(),
            reason,
        };
        let srv_type = middleware
            .service_type(service)
            .await
            .map_err(TestFailure::Middleware)?
            .ok_or_else(|| proxy_error("service type is unknown".into()))?;
        let definition = converter
            .registry()
            .service(&srv_type)
            .ok_or_else(|| proxy_error(format!("service type [{}] is not registered", srv_type)))?;
        debug!(%srv_type, "Resolved service type");

        let request = converter
            .dictionary_to_message(&definition.request.type_name, &config.service_input)
            .and_then(|msg| converter.message_to_dictionary(&msg))
            .map_err(|e| TestFailure::ServiceCall(e.to_string()))?;

        let started = Instant::now();
        let response = middleware
            .call_service(service, &srv_type, request, config.timeout)
            .await
            .map_err(|e| TestFailure::ServiceCall(format!("{:#}", e)))?;
        let latency = started.elapsed();
        debug!(?latency, %response, "Service answered");

        let response = converter
            .strict(false)
            .dictionary_to_message(&definition.response.type_name, &response)
            .and_then(|msg| converter.message_to_dictionary(&msg))
            .map_err(|e| TestFailure::ServiceCall(e.to_string()))?;

        if !dictionaries_equal(&config.service_output, &response) {
            return Err(TestFailure::ResponseMismatch {
                diff: differences(&config.service_output, &response),
                expected: config.service_output.clone(),
                actual: response,
            });
        }
        Ok(ServiceOutcome { response, latency })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_test;
    use crate::io::memory::MemoryBus;
    use crate::msg::TypeRegistry;
    use macro_rules_attribute::apply;
    use serde_json::json;

    fn config(input: JValue, output: JValue) -> ServiceTestConfig {
        ServiceTestConfig {
            service_name: "/set_flag".into(),
            service_input: input,
            service_output: output,
            timeout: Some(Duration::from_secs(1)),
        }
    }

    fn serve_set_bool(bus: &MemoryBus) {
        bus.serve("/set_flag", "std_srvs/SetBool", |req| async move {
            let flag = req["data"].as_bool().unwrap_or_default();
            Ok(json!({"success": flag, "message": if flag { "on" } else { "off" }}))
        });
    }

    #[test]
    fn config_requires_mappings() {
        let mut params = Params::new("servicetest");
        params.set("service_name", json!("/set_flag"));
        params.set("service_input", json!({"data": true}));
        assert!(matches!(
            ServiceTestConfig::from_params(&params),
            Err(TestFailure::NotInitialized { .. })
        ));
        params.set("service_output", json!([1, 2]));
        assert!(matches!(
            ServiceTestConfig::from_params(&params),
            Err(TestFailure::InvalidParameter(_))
        ));
        params.set("service_output", json!({}));
        params.set("service_timeout", json!(0.5));
        let config = ServiceTestConfig::from_params(&params).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(500)));
    }

    #[apply(async_test)]
    async fn passes_on_expected_response() {
        let bus = MemoryBus::new();
        serve_set_bool(&bus);
        let registry = TypeRegistry::with_builtins();
        let test = ServiceTest::new(config(
            json!({"data": true}),
            json!({"success": true, "message": "on"}),
        ));
        let outcome = test
            .run(&bus.node("servicetest"), MessageConverter::new(&registry))
            .await
            .unwrap();
        assert_eq!(outcome.response, json!({"success": true, "message": "on"}));
    }

    #[apply(async_test)]
    async fn reports_response_differences() {
        let bus = MemoryBus::new();
        serve_set_bool(&bus);
        let registry = TypeRegistry::with_builtins();
        let test = ServiceTest::new(config(
            json!({"data": false}),
            json!({"success": true, "message": "off"}),
        ));
        let err = test
            .run(&bus.node("servicetest"), MessageConverter::new(&registry))
            .await
            .unwrap_err();
        let TestFailure::ResponseMismatch { diff, .. } = err else {
            panic!("unexpected failure {err}");
        };
        assert_eq!(diff, vec!["success: expected true, got false".to_string()]);
    }

    #[apply(async_test)]
    async fn unknown_keyword_is_a_call_error() {
        let bus = MemoryBus::new();
        serve_set_bool(&bus);
        let registry = TypeRegistry::with_builtins();
        let test = ServiceTest::new(config(json!({"flag": true}), json!({})));
        let err = test
            .run(&bus.node("servicetest"), MessageConverter::new(&registry))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Service proxy error:"));
        assert!(err.to_string().contains("no field named \"flag\""));
    }

    #[apply(async_test)]
    async fn missing_service() {
        let bus = MemoryBus::new();
        let registry = TypeRegistry::with_builtins();
        let test = ServiceTest::new(config(json!({}), json!({})));
        let err = test
            .run(&bus.node("servicetest"), MessageConverter::new(&registry))
            .await
            .unwrap_err();
        assert!(matches!(err, TestFailure::ServiceNotFound { .. }));
    }
}
