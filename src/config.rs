use std::time::{Duration, SystemTime, UNIX_EPOCH};

use slog::{Drain, Logger};

use crate::proto::{validate_string, Message, MqttPacket, ProtoLvl};
use crate::topic_filter::is_valid_publish_topic;
use crate::transport::TransportKind;

/// Used to configure the client. Defaults are as follows
///  - Port: 1883
///  - Keep Alive: 60 seconds (0 turns pinging off)
///  - Version: MQTT 3.1.1
///  - Credentials: None
///  - Last Will and Testament: None
///  - Clean Session: true
///  - Transport: TCP
///  - Logger: `log`
///
/// The hostname and client ID have no default.
#[derive(Clone, Debug, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ConnectionSettings {
    /// Name or address of the server.
    pub hostname: String,
    #[builder(default = "1883")]
    pub port: u16,
    /// Set the ID used to identify this client to the server. If clean_session is false and this client has a session
    /// stored on the server, this must be the ID used in past sessions.
    pub client_id: String,
    /// An empty username is not sent.
    #[builder(default, setter(strip_option))]
    pub username: Option<String>,
    /// An empty password is not sent.
    #[builder(default, setter(strip_option))]
    pub password: Option<String>,
    /// Specify whether the server should treat this session as clean.
    #[builder(default = "true")]
    pub clean_session: bool,
    /// Sets the Last Will and Testament message. This is stored by the server and published when the connection is
    /// lost without a DISCONNECT.
    #[builder(default, setter(strip_option))]
    pub will: Option<Message>,
    /// Keep alive interval in seconds.
    #[builder(default = "60")]
    pub keep_alive: u16,
    #[builder(default)]
    pub transport: TransportKind,
    /// Specify which version of the MQTT protocol to use when communicating with the server.
    #[builder(default = "ProtoLvl::V3_1_1")]
    pub version: ProtoLvl,
    /// Specify a logger for the client. Defaults to passing to `log`
    #[builder(default = "self.default_logger()")]
    pub logger: Logger,
}

impl ConnectionSettingsBuilder {
    fn default_logger(&self) -> Logger {
        Logger::root(slog_stdlog::StdLog.fuse(), o!())
    }

    fn validate(&self) -> Result<(), String> {
        match &self.hostname {
            Some(h) if h.is_empty() => return Err("Hostname cannot be empty".to_string()),
            _ => {}
        }
        if let Some(id) = &self.client_id {
            if id.is_empty() {
                return Err("Client ID cannot be empty".to_string());
            }
            validate_string(id).map_err(|e| e.to_string())?;
        }
        if let Some(Some(will)) = &self.will {
            if !is_valid_publish_topic(&will.topic) {
                return Err(format!("'{}' is not a valid will topic", will.topic));
            }
        }
        Ok(())
    }
}

impl ConnectionSettings {
    /// A client ID unique enough for throwaway connections, derived from the current time.
    pub fn generate_client_id() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("tokio_mqtt3_{:x}", nanos)
    }

    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive))
    }

    /// The CONNECT packet that opens a connection with these settings.
    pub fn connect_packet(&self) -> MqttPacket {
        MqttPacket::Connect {
            protocol_level: self.version,
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            client_id: self.client_id.clone(),
            will: self.will.clone(),
            username: self.username.clone().filter(|u| !u.is_empty()),
            password: self.password.clone().filter(|p| !p.is_empty()),
        }
    }
}
