use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use slog::Logger;
use snafu::ResultExt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::backend::{self, Callbacks, Command, Engine};
use crate::config::ConnectionSettings;
use crate::errors::*;
use crate::proto::{Message, QualityOfService, SubscribeRequest, UnsubscribeRequest};
use crate::session::Session;
use crate::topic_filter::{is_valid_publish_topic, is_valid_subscribe_topic};
use crate::transport::{self, Transport};

enum LoopState {
    Idle(Box<Engine>),
    Running {
        handle: JoinHandle<Engine>,
        shutdown: oneshot::Sender<bool>,
    },
    Poisoned,
}

/// An MQTT client.
///
/// All network work happens in a background task started by `connect`. `publish`, `subscribe` and `unsubscribe` only
/// queue a request for that task and return straight away. Their outcome is reported through the registered handlers.
///
/// # Examples
/// ```no_run
/// # use tokio_mqtt3::{ConnectionSettingsBuilder, Message, MqttClient, QualityOfService};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = ConnectionSettingsBuilder::default()
///     .hostname("localhost")
///     .client_id("example")
///     .build()?;
/// let client = MqttClient::new(settings)?;
/// client.on_delivery_completed(|m| println!("delivered {}", m.topic));
/// client.connect().await?;
/// client.publish(Message::new("greetings", "hello", QualityOfService::QoS1));
/// client.disconnect(true).await?;
/// # Ok(())
/// # }
/// ```
pub struct MqttClient {
    commands: UnboundedSender<Command>,
    state: AsyncMutex<LoopState>,
    connected: Arc<AtomicBool>,
    callbacks: backend::SharedCallbacks,
    logger: Logger,
}

impl MqttClient {
    /// Creates a client using the built-in transport selected in `settings`.
    pub fn new(settings: ConnectionSettings) -> Result<MqttClient> {
        let transport = transport::build(settings.transport, &settings.logger)?;
        Ok(MqttClient::with_transport(settings, transport))
    }

    pub fn with_transport(settings: ConnectionSettings, transport: Box<dyn Transport>) -> MqttClient {
        MqttClient::with_session(settings, transport, Session::new())
    }

    /// Creates a client that resumes `session`, for use with `clean_session` turned off.
    pub fn with_session(
        settings: ConnectionSettings,
        transport: Box<dyn Transport>,
        session: Session,
    ) -> MqttClient {
        let (tx, rx) = unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));
        let logger = settings.logger.clone();
        let engine = Engine::new(
            settings,
            transport,
            session,
            rx,
            callbacks.clone(),
            connected.clone(),
        );

        MqttClient {
            commands: tx,
            state: AsyncMutex::new(LoopState::Idle(Box::new(engine))),
            connected,
            callbacks,
            logger,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connects to the server and starts the client loop. Does nothing if the client is already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let mut engine = match mem::replace(&mut *state, LoopState::Poisoned) {
            LoopState::Idle(engine) => engine,
            // The loop ended on its own after losing the connection.
            LoopState::Running { handle, .. } => Box::new(handle.await.context(LoopAbortedSnafu)?),
            LoopState::Poisoned => return LoopUnavailableSnafu.fail(),
        };

        if let Err(e) = engine.connect().await {
            *state = LoopState::Idle(engine);
            return Err(e);
        }

        let (shutdown, signal) = oneshot::channel();
        let engine = *engine;
        let handle = tokio::spawn(engine.run(signal));
        *state = LoopState::Running { handle, shutdown };
        Ok(())
    }

    /// Stops the client loop and closes the connection. A graceful disconnect writes out queued packets and then sends
    /// DISCONNECT. Disconnecting a client that is not connected does nothing.
    pub async fn disconnect(&self, graceful: bool) -> Result<()> {
        let mut state = self.state.lock().await;

        match mem::replace(&mut *state, LoopState::Poisoned) {
            LoopState::Running { handle, shutdown } => {
                // The loop may already have ended, which is fine.
                let _ = shutdown.send(graceful);
                let engine = handle.await.context(LoopAbortedSnafu)?;
                *state = LoopState::Idle(Box::new(engine));
                Ok(())
            }
            idle @ LoopState::Idle(_) => {
                *state = idle;
                Ok(())
            }
            LoopState::Poisoned => Ok(()),
        }
    }

    /// A copy of the session, available while the client loop is not running.
    pub async fn session(&self) -> Option<Session> {
        match &*self.state.lock().await {
            LoopState::Idle(engine) => Some(engine.session().clone()),
            _ => None,
        }
    }

    fn send(&self, command: Command) -> bool {
        match self.commands.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(self.logger, "Client loop is gone, dropping request"; "request" => ?e.0);
                false
            }
        }
    }

    /// Queues `message` for publishing. Returns false if the topic is not a valid topic name.
    ///
    /// QoS 1 and 2 messages get a fresh message identifier when they are queued.
    pub fn publish(&self, message: Message) -> bool {
        if !is_valid_publish_topic(&message.topic) {
            debug!(self.logger, "Rejected publish topic"; "topic" => &message.topic);
            return false;
        }
        self.send(Command::Publish(message))
    }

    /// Queues a subscription request. Returns false if `topic` is not a valid topic filter.
    pub fn subscribe<T: Into<String>>(&self, topic: T, qos: QualityOfService) -> bool {
        let topic = topic.into();
        if !is_valid_subscribe_topic(&topic) {
            debug!(self.logger, "Rejected subscribe topic"; "topic" => &topic);
            return false;
        }
        self.send(Command::Subscribe { topic, qos })
    }

    /// Queues an unsubscribe request. Returns false if `topic` is not a valid topic filter.
    pub fn unsubscribe<T: Into<String>>(&self, topic: T) -> bool {
        let topic = topic.into();
        if !is_valid_subscribe_topic(&topic) {
            debug!(self.logger, "Rejected unsubscribe topic"; "topic" => &topic);
            return false;
        }
        self.send(Command::Unsubscribe { topic })
    }

    pub fn on_message_received<F>(&self, f: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        backend::update(&self.callbacks, |c| c.message_received = Some(Arc::new(f)));
    }

    pub fn on_delivery_completed<F>(&self, f: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        backend::update(&self.callbacks, |c| c.delivery_completed = Some(Arc::new(f)));
    }

    /// `None` as the granted QoS means the server rejected the subscription.
    pub fn on_subscribe_completed<F>(&self, f: F)
    where
        F: Fn(&SubscribeRequest, Option<QualityOfService>) + Send + Sync + 'static,
    {
        backend::update(&self.callbacks, |c| c.subscribe_completed = Some(Arc::new(f)));
    }

    pub fn on_unsubscribe_complete<F>(&self, f: F)
    where
        F: Fn(&UnsubscribeRequest) + Send + Sync + 'static,
    {
        backend::update(&self.callbacks, |c| c.unsubscribe_completed = Some(Arc::new(f)));
    }

    /// Called when the loop ends because of an error rather than a call to `disconnect`.
    pub fn on_lost_connection<F>(&self, f: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        backend::update(&self.callbacks, |c| c.lost_connection = Some(Arc::new(f)));
    }

    /// Called after `disconnect` stops the loop. Carries the error if a graceful disconnect could not be completed.
    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn(Option<&Error>) + Send + Sync + 'static,
    {
        backend::update(&self.callbacks, |c| c.disconnect = Some(Arc::new(f)));
    }
}
