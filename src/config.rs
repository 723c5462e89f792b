//! Configuration: command-line flags with environment fallbacks.
//!
//! Every flag can also be set through an environment variable named after it,
//! upper-cased with `-` translated to `_` (`--node-name` → `NODE_NAME`).

use std::fmt;

use crate::error::ConfigError;
use crate::pipeline::ExpectedIdentity;
use crate::transport::queue::{QueueConfig, subject_for_node};

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default MQTT broker port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Which transport delivers envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// CloudEvents over HTTP push.
    Http,
    /// Queue-group subscription on an MQTT broker.
    Queue,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Queue => f.write_str("queue"),
        }
    }
}

#[derive(clap::Parser, Debug, Clone)]
#[command(
    name = "prepper",
    version,
    about = "Receives new-file events and gates them for processing"
)]
pub struct Args {
    /// Node name; defaults to the machine's hostname
    #[arg(long, env)]
    pub node_name: Option<String>,

    /// Broker client id, stable across restarts; defaults to prepper-<hostname>
    #[arg(long, env)]
    pub client_id: Option<String>,

    /// Queue group shared by competing receivers
    #[arg(long, env, default_value = "prepper")]
    pub queue_name: String,

    /// Transport delivering envelopes
    #[arg(long, env, value_enum, default_value_t = TransportKind::Http)]
    pub transport: TransportKind,

    /// HTTP listen port
    #[arg(long, env, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// MQTT broker host (queue transport)
    #[arg(long, env, default_value = "localhost")]
    pub broker_host: String,

    /// MQTT broker port (queue transport)
    #[arg(long, env, default_value_t = DEFAULT_BROKER_PORT)]
    pub broker_port: u16,
}

/// Validated receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub node_name: String,
    pub client_id: String,
    pub queue_name: String,
    pub transport: TransportKind,
    pub port: u16,
    pub broker_host: String,
    pub broker_port: u16,
}

impl ReceiverConfig {
    /// Build from parsed arguments, falling back to the OS hostname.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        Self::resolve(args, os_hostname())
    }

    /// Build from parsed arguments with an explicit hostname fallback.
    ///
    /// The hostname stands in for a missing node name and seeds the default
    /// client id, so one instance keeps its broker session across restarts.
    pub fn resolve(args: Args, hostname: Option<String>) -> Result<Self, ConfigError> {
        let hostname = hostname
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let node_name = args
            .node_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .or_else(|| hostname.clone())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "node-name".to_string(),
                hint: "Pass --node-name or set NODE_NAME; the hostname is used otherwise."
                    .to_string(),
            })?;
        check_topic_segment("node-name", &node_name)?;

        let client_id = match args.client_id {
            Some(id) => id.trim().to_string(),
            None => format!("prepper-{}", hostname.as_deref().unwrap_or(&node_name)),
        };
        if client_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "client-id".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let queue_name = args.queue_name.trim().to_string();
        if queue_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "queue-name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        check_topic_segment("queue-name", &queue_name)?;

        Ok(Self {
            node_name,
            client_id,
            queue_name,
            transport: args.transport,
            port: args.port,
            broker_host: args.broker_host,
            broker_port: args.broker_port,
        })
    }

    /// The type/source pair this node accepts.
    pub fn expected_identity(&self) -> ExpectedIdentity {
        ExpectedIdentity::for_node(&self.node_name)
    }

    /// Broker settings for the queue transport.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            host: self.broker_host.clone(),
            port: self.broker_port,
            client_id: self.client_id.clone(),
            queue_name: self.queue_name.clone(),
            subject: subject_for_node(&self.node_name),
            ..QueueConfig::default()
        }
    }
}

/// The machine's hostname, if the OS reports a valid UTF-8 one.
pub fn os_hostname() -> Option<String> {
    gethostname::gethostname().into_string().ok()
}

/// Node and queue names end up in a broker topic filter, so wildcards and
/// level separators would change what we subscribe to.
fn check_topic_segment(key: &str, value: &str) -> Result<(), ConfigError> {
    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace())
    {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{value:?} contains forbidden character {c:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["prepper"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn explicit_node_name_wins_over_hostname() {
        let config =
            ReceiverConfig::resolve(args(&["--node-name", "node-1"]), Some("host-a".into()))
                .unwrap();
        assert_eq!(config.node_name, "node-1");
        assert_eq!(config.expected_identity().source, "jaconi.io/prepper/node-1");
    }

    #[test]
    fn hostname_is_the_fallback_node_name() {
        let mut parsed = args(&[]);
        parsed.node_name = None;
        let config = ReceiverConfig::resolve(parsed, Some("host-a".into())).unwrap();
        assert_eq!(config.node_name, "host-a");
    }

    #[test]
    fn missing_node_name_is_an_error() {
        let mut parsed = args(&[]);
        parsed.node_name = None;
        let err = ReceiverConfig::resolve(parsed, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "node-name"));

        let mut parsed = args(&[]);
        parsed.node_name = Some("   ".into());
        assert!(ReceiverConfig::resolve(parsed, None).is_err());
    }

    #[test]
    fn wildcard_characters_are_rejected() {
        for name in ["a/b", "a+", "#", "a b"] {
            let err =
                ReceiverConfig::resolve(args(&["--node-name", name]), None).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{name}");
        }
        let err = ReceiverConfig::resolve(
            args(&["--node-name", "n", "--queue-name", "q/1"]),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "queue-name"));
    }

    #[test]
    fn defaults_apply() {
        let config = ReceiverConfig::resolve(args(&["--node-name", "n"]), None).unwrap();
        assert_eq!(config.queue_name, "prepper");
        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(config.broker_port, DEFAULT_BROKER_PORT);
    }

    #[test]
    fn queue_config_derives_subject_from_node_name() {
        let config = ReceiverConfig::resolve(
            args(&["--node-name", "node-1", "--transport", "queue", "--queue-name", "workers"]),
            None,
        )
        .unwrap();
        assert_eq!(config.transport, TransportKind::Queue);

        let queue = config.queue_config();
        assert_eq!(queue.subject, "newfile.node-1");
        assert_eq!(queue.subscription_filter(), "$share/workers/newfile.node-1");
        assert_eq!(queue.client_id, config.client_id);
    }

    #[test]
    fn client_id_is_stable_and_overridable() {
        let mut parsed = args(&["--node-name", "node-1"]);
        parsed.client_id = None;
        let first = ReceiverConfig::resolve(parsed.clone(), Some("pod-a".into())).unwrap();
        let second = ReceiverConfig::resolve(parsed, Some("pod-a".into())).unwrap();
        assert_eq!(first.client_id, "prepper-pod-a");
        assert_eq!(first.client_id, second.client_id);

        let mut parsed = args(&["--node-name", "node-1"]);
        parsed.client_id = None;
        let without_hostname = ReceiverConfig::resolve(parsed, None).unwrap();
        assert_eq!(without_hostname.client_id, "prepper-node-1");

        let explicit = ReceiverConfig::resolve(
            args(&["--node-name", "node-1", "--client-id", "worker-7"]),
            Some("pod-a".into()),
        )
        .unwrap();
        assert_eq!(explicit.queue_config().client_id, "worker-7");

        let err = ReceiverConfig::resolve(args(&["--node-name", "n", "--client-id", " "]), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "client-id"));
    }

    #[test]
    fn os_hostname_is_the_default_node_name() {
        let Some(hostname) = os_hostname().filter(|h| !h.trim().is_empty()) else {
            return;
        };
        let mut parsed = args(&[]);
        parsed.node_name = None;
        parsed.client_id = None;
        let config = ReceiverConfig::resolve(parsed, os_hostname()).unwrap();
        assert_eq!(config.node_name, hostname.trim());
        assert_eq!(config.client_id, format!("prepper-{}", hostname.trim()));
    }
}
