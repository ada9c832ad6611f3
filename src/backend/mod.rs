//! The client loop: one task that owns the transport and the session.

mod codec;
mod mqtt_loop;
mod ping;

pub use self::codec::{MqttCodec, MqttFramed};
pub use self::ping::{PingAction, Pinger};
pub(crate) use self::mqtt_loop::Engine;

use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::Error;
use crate::proto::{Message, QualityOfService, SubscribeRequest, UnsubscribeRequest};

/// Requests the client hands to the loop.
#[derive(Debug)]
pub(crate) enum Command {
    Publish(Message),
    Subscribe { topic: String, qos: QualityOfService },
    Unsubscribe { topic: String },
}

pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;
pub type SubscribeHandler = Arc<dyn Fn(&SubscribeRequest, Option<QualityOfService>) + Send + Sync>;
pub type UnsubscribeHandler = Arc<dyn Fn(&UnsubscribeRequest) + Send + Sync>;
pub type LostConnectionHandler = Arc<dyn Fn(&Error) + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn(Option<&Error>) + Send + Sync>;

/// One handler slot per event. Registering a handler replaces the previous one.
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub message_received: Option<MessageHandler>,
    pub delivery_completed: Option<MessageHandler>,
    pub subscribe_completed: Option<SubscribeHandler>,
    pub unsubscribe_completed: Option<UnsubscribeHandler>,
    pub lost_connection: Option<LostConnectionHandler>,
    pub disconnect: Option<DisconnectHandler>,
}

pub(crate) type SharedCallbacks = Arc<Mutex<Callbacks>>;

/// Copies the current handlers out so none of them runs while the lock is held.
pub(crate) fn snapshot(callbacks: &SharedCallbacks) -> Callbacks {
    callbacks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub(crate) fn update<F>(callbacks: &SharedCallbacks, f: F)
where
    F: FnOnce(&mut Callbacks),
{
    f(&mut callbacks.lock().unwrap_or_else(PoisonError::into_inner))
}
