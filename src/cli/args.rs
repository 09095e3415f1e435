use std::path::PathBuf;

use clap::{Parser, ValueEnum, builder::OsStr};

use crate::harness::TestCase;
use crate::io::mqtt::MqttFactory;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Transport {
    /// JSON payloads over an MQTT broker
    Mqtt,
    /// ROS 2 through r2r (requires the `ros` feature)
    Ros,
}

#[derive(ValueEnum, Debug, Clone)]
pub enum MqttFactoryKind {
    Paho,
    Mock,
}

impl From<MqttFactoryKind> for MqttFactory {
    fn from(kind: MqttFactoryKind) -> Self {
        match kind {
            MqttFactoryKind::Paho => MqttFactory::Paho,
            MqttFactoryKind::Mock => MqttFactory::Mock,
        }
    }
}

impl From<MqttFactoryKind> for OsStr {
    fn from(kind: MqttFactoryKind) -> OsStr {
        match kind {
            MqttFactoryKind::Paho => (&"paho").into(),
            MqttFactoryKind::Mock => (&"mock").into(),
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(name = "node_test", about = "Run a filter or service test against a live node")]
pub struct Cli {
    /// The test case to run
    pub case: TestCase,

    /// Node name of the tester; defaults to the test class name
    #[arg(long)]
    pub node_name: Option<String>,

    /// JSON5 file with the test parameters
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// Parameter override `name=value`, value read as JSON5
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,

    /// Root of `<pkg>/msg/*.msg` and `<pkg>/srv/*.srv` interface definitions
    #[arg(long)]
    pub msg_path: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = Transport::Mqtt)]
    pub transport: Transport,

    #[arg(long)]
    pub mqtt_uri: Option<String>,

    #[arg(long, default_value = MqttFactoryKind::Paho)]
    pub mqtt_factory: MqttFactoryKind,

    /// Write the JSON test report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Every message field must be given in the parameters
    #[arg(long)]
    pub strict: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_command_line() {
        let cli = Cli::try_parse_from([
            "node_test",
            "--params",
            "case.json5",
            "--param",
            "timeout=2",
            "--param",
            "topic_in=/in",
            "--msg-path",
            "msgs",
            "--mqtt-factory",
            "mock",
            "--strict",
            "filter",
        ])
        .unwrap();
        assert_eq!(cli.case, TestCase::Filter);
        assert_eq!(cli.overrides, vec!["timeout=2", "topic_in=/in"]);
        assert_eq!(cli.msg_path, vec![PathBuf::from("msgs")]);
        assert_eq!(cli.transport, Transport::Mqtt);
        assert!(matches!(cli.mqtt_factory, MqttFactoryKind::Mock));
        assert!(cli.strict);
        assert!(cli.node_name.is_none());
    }

    #[test]
    fn requires_a_case() {
        assert!(Cli::try_parse_from(["node_test"]).is_err());
        assert!(Cli::try_parse_from(["node_test", "unknown"]).is_err());
    }
}
