//! An asynchronous MQTT 3.1 / 3.1.1 client built on tokio.
//!
//! The client keeps one background task per connection. That task owns the socket and the QoS 1 and QoS 2
//! bookkeeping, and reports results through handlers registered on `MqttClient`.

#[macro_use]
extern crate snafu;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate enum_primitive;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate slog;

mod backend;
mod client;
mod config;
mod errors;
pub mod proto;
mod session;
pub mod topic_filter;
pub mod transport;

pub use crate::backend::{
    DisconnectHandler, LostConnectionHandler, MessageHandler, MqttCodec, PingAction, Pinger,
    SubscribeHandler, UnsubscribeHandler,
};
pub use crate::client::MqttClient;
pub use crate::config::{ConnectionSettings, ConnectionSettingsBuilder, ConnectionSettingsBuilderError};
pub use crate::errors::{Error, Result};
pub use crate::proto::{
    ConnectReturnCode, Message, MqttPacket, PacketType, ProtoLvl, QualityOfService, SubscribeRequest,
    UnsubscribeRequest,
};
pub use crate::session::{MessageIdGenerator, Session, TrackingKey};
pub use crate::topic_filter::TopicFilter;
pub use crate::transport::{TcpTransport, Transport, TransportKind};
