use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slog::Logger;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;

use super::ping::{PingAction, Pinger};
use super::{snapshot, Command, SharedCallbacks};
use crate::config::ConnectionSettings;
use crate::errors::*;
use crate::proto::{MqttPacket, QualityOfService, SubscribeRequest, UnsubscribeRequest};
use crate::session::{MessageIdGenerator, Session};
use crate::transport::Transport;

/// How long one loop iteration waits for an incoming packet.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_millis(500);
/// How long a single packet write may take.
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// CONNACK wait used when keep-alive is turned off.
pub(crate) const DEFAULT_CONNACK_TIMEOUT: Duration = Duration::from_secs(30);

enum LoopEvent {
    Shutdown(bool),
    Command(Command),
    Read(Result<MqttPacket>),
}

enum Exit {
    Shutdown(bool),
    Lost(Error),
}

enum Ended {
    Disconnected(Option<Error>),
    Lost(Error),
}

/// State owned by the client loop.
///
/// The engine is the only owner of the transport, the session and the outgoing queue. While the loop runs it lives
/// inside the loop task, and it is handed back to the client when the task ends.
pub(crate) struct Engine {
    settings: ConnectionSettings,
    transport: Box<dyn Transport>,
    session: Session,
    pending: VecDeque<MqttPacket>,
    ids: MessageIdGenerator,
    pinger: Pinger,
    commands: UnboundedReceiver<Command>,
    callbacks: SharedCallbacks,
    connected: Arc<AtomicBool>,
    logger: Logger,
}

fn is_request(packet: &MqttPacket) -> bool {
    matches!(
        packet,
        MqttPacket::Publish(_) | MqttPacket::Subscribe(_) | MqttPacket::Unsubscribe(_)
    )
}

impl Engine {
    pub fn new(
        settings: ConnectionSettings,
        transport: Box<dyn Transport>,
        session: Session,
        commands: UnboundedReceiver<Command>,
        callbacks: SharedCallbacks,
        connected: Arc<AtomicBool>,
    ) -> Engine {
        let logger = settings.logger.new(o!("client_id" => settings.client_id.clone()));
        Engine {
            pinger: Pinger::new(settings.keep_alive_duration()),
            settings,
            transport,
            session,
            pending: VecDeque::new(),
            ids: MessageIdGenerator::new(),
            commands,
            callbacks,
            connected,
            logger,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn connack_timeout(&self) -> Duration {
        match self.settings.keep_alive {
            0 => DEFAULT_CONNACK_TIMEOUT,
            _ => self.settings.keep_alive_duration(),
        }
    }

    /// Opens the transport and performs the CONNECT / CONNACK handshake.
    ///
    /// Returns the session present flag of the CONNACK. On failure the transport is closed again.
    pub async fn connect(&mut self) -> Result<bool> {
        info!(self.logger, "Connecting to server";
              "host" => &self.settings.hostname, "port" => self.settings.port);

        if self.transport.is_connected() {
            self.transport.close().await;
        }
        self.transport
            .connect(&self.settings.hostname, self.settings.port)
            .await?;

        let session_present = match self.handshake().await {
            Ok(sp) => sp,
            Err(e) => {
                warn!(self.logger, "Connection attempt failed"; "error" => %e);
                self.transport.close().await;
                return Err(e);
            }
        };

        // Acknowledgments queued for the old connection are meaningless now.
        self.pending.retain(is_request);
        if self.settings.clean_session {
            self.session.clear();
        } else {
            let redelivery = self.session.take_redelivery();
            debug!(self.logger, "Resuming session"; "redelivered" => redelivery.len());
            for packet in redelivery.into_iter().rev() {
                self.pending.push_front(packet);
            }
        }

        self.pinger.reset(Instant::now());
        self.connected.store(true, Ordering::SeqCst);
        info!(self.logger, "Connected to server"; "session_present" => session_present);
        Ok(session_present)
    }

    async fn handshake(&mut self) -> Result<bool> {
        let connect = self.settings.connect_packet();
        self.transport.write_packet(&connect, WRITE_TIMEOUT).await?;

        match self.transport.read_packet(self.connack_timeout()).await? {
            MqttPacket::ConnAck {
                session_present,
                return_code,
            } => {
                ensure!(
                    return_code.is_accepted(),
                    ConnectionRefusedSnafu { code: return_code }
                );
                Ok(session_present)
            }
            other => UnexpectedPacketSnafu {
                packet_type: other.packet_type(),
            }
            .fail(),
        }
    }

    /// Runs until the shutdown signal fires or the connection is lost, then closes the transport and hands the engine
    /// back. The value sent on `shutdown` selects a graceful disconnect.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<bool>) -> Engine {
        let exit = loop {
            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
            }
            if let Err(e) = self.send_pending().await {
                break Exit::Lost(e);
            }

            let event = {
                let commands = &mut self.commands;
                let transport = &mut self.transport;
                tokio::select! {
                    biased;
                    graceful = &mut shutdown => LoopEvent::Shutdown(graceful.unwrap_or(false)),
                    Some(command) = commands.recv() => LoopEvent::Command(command),
                    read = transport.read_packet(READ_TIMEOUT) => LoopEvent::Read(read),
                }
            };

            match event {
                LoopEvent::Shutdown(graceful) => break Exit::Shutdown(graceful),
                LoopEvent::Command(command) => self.handle_command(command),
                LoopEvent::Read(Ok(packet)) => {
                    self.pinger.packet_received(Instant::now());
                    self.route(packet);
                }
                LoopEvent::Read(Err(e)) if e.is_timeout() => {}
                LoopEvent::Read(Err(e)) => break Exit::Lost(e),
            }

            if let Err(e) = self.tick_keep_alive().await {
                break Exit::Lost(e);
            }

            tokio::task::yield_now().await;
        };

        let ended = match exit {
            Exit::Shutdown(graceful) => {
                info!(self.logger, "Disconnecting from server"; "graceful" => graceful);
                let err = if graceful {
                    self.disconnect_gracefully().await.err()
                } else {
                    None
                };
                Ended::Disconnected(err)
            }
            Exit::Lost(e) => {
                warn!(self.logger, "Connection to server lost"; "error" => %e);
                Ended::Lost(e)
            }
        };

        self.transport.close().await;
        self.connected.store(false, Ordering::SeqCst);

        let callbacks = snapshot(&self.callbacks);
        match ended {
            Ended::Lost(e) => {
                if let Some(handler) = callbacks.lost_connection {
                    handler(&e);
                }
            }
            Ended::Disconnected(e) => {
                if let Some(handler) = callbacks.disconnect {
                    handler(e.as_ref());
                }
            }
        }

        self
    }

    async fn disconnect_gracefully(&mut self) -> Result<()> {
        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(command);
        }
        self.send_pending().await?;
        self.transport
            .write_packet(&MqttPacket::Disconnect, WRITE_TIMEOUT)
            .await
    }

    fn next_message_id(&mut self) -> u16 {
        let session = &self.session;
        let pending = &self.pending;
        self.ids.next_id(|id| {
            session.is_id_in_use(id)
                || pending
                    .iter()
                    .any(|p| is_request(p) && p.message_id() == Some(id))
        })
    }

    fn handle_command(&mut self, command: Command) {
        let packet = match command {
            Command::Publish(mut message) => {
                message.duplicate = false;
                message.message_id = match message.qos {
                    QualityOfService::QoS0 => 0,
                    _ => self.next_message_id(),
                };
                MqttPacket::Publish(message)
            }
            Command::Subscribe { topic, qos } => MqttPacket::Subscribe(SubscribeRequest {
                message_id: self.next_message_id(),
                topic,
                qos,
            }),
            Command::Unsubscribe { topic } => MqttPacket::Unsubscribe(UnsubscribeRequest {
                message_id: self.next_message_id(),
                topic,
            }),
        };
        trace!(self.logger, "Queued packet"; "type" => %packet.packet_type(),
               "message_id" => packet.message_id());
        self.pending.push_back(packet);
    }

    /// Writes every queued packet once. Packets that time out stay queued, any other failure ends the connection.
    async fn send_pending(&mut self) -> Result<()> {
        let mut retry = VecDeque::new();

        while let Some(packet) = self.pending.pop_front() {
            match self.transport.write_packet(&packet, WRITE_TIMEOUT).await {
                Ok(()) => self.packet_sent(packet),
                Err(e) if e.is_timeout() => {
                    warn!(self.logger, "Timed out writing packet"; "type" => %packet.packet_type());
                    retry.push_back(packet);
                }
                Err(e) => {
                    retry.push_back(packet);
                    retry.extend(self.pending.drain(..));
                    self.pending = retry;
                    return Err(e);
                }
            }
        }

        self.pending = retry;
        Ok(())
    }

    fn packet_sent(&mut self, packet: MqttPacket) {
        let tracked = match &packet {
            MqttPacket::Publish(message) => message.qos != QualityOfService::QoS0,
            MqttPacket::Subscribe(_) | MqttPacket::Unsubscribe(_) => true,
            _ => false,
        };
        if tracked {
            if let Err(e) = self.session.push_sent_not_ack(packet) {
                warn!(self.logger, "Unable to track sent packet"; "error" => %e);
            }
        }
    }

    async fn tick_keep_alive(&mut self) -> Result<()> {
        let now = Instant::now();
        match self.pinger.poll(now) {
            PingAction::Idle => Ok(()),
            PingAction::SendPing => {
                match self
                    .transport
                    .write_packet(&MqttPacket::PingReq, WRITE_TIMEOUT)
                    .await
                {
                    Ok(()) => {
                        debug!(self.logger, "Sent PINGREQ");
                        self.pinger.ping_sent(now);
                        Ok(())
                    }
                    Err(e) if e.is_timeout() => {
                        warn!(self.logger, "Timed out writing PINGREQ");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            PingAction::Expired => {
                warn!(self.logger, "PINGRESP not received in time");
                PingExpiredSnafu.fail()
            }
        }
    }

    fn route(&mut self, packet: MqttPacket) {
        debug!(self.logger, "Routing packet"; "type" => %packet.packet_type(),
               "message_id" => packet.message_id());
        let callbacks = snapshot(&self.callbacks);

        match packet {
            MqttPacket::PingResp => self.pinger.pong_received(),
            MqttPacket::Publish(message) => match message.qos {
                QualityOfService::QoS0 => {
                    if let Some(handler) = callbacks.message_received {
                        handler(&message);
                    }
                }
                QualityOfService::QoS1 => {
                    self.pending.push_back(MqttPacket::PubAck {
                        message_id: message.message_id,
                    });
                    if let Some(handler) = callbacks.message_received {
                        handler(&message);
                    }
                }
                QualityOfService::QoS2 => {
                    let message_id = message.message_id;
                    if self.session.has_received_publish(message_id) {
                        debug!(self.logger, "Duplicate QoS 2 PUBLISH"; "message_id" => message_id);
                    } else if let Err(e) = self
                        .session
                        .push_received_not_ack(MqttPacket::Publish(message))
                    {
                        warn!(self.logger, "Unable to track received PUBLISH"; "error" => %e);
                    }
                    self.pending.push_back(MqttPacket::PubRec { message_id });
                }
            },
            MqttPacket::PubAck { message_id } => match self.session.pop_sent_publish(message_id) {
                Some(message) => {
                    if let Some(handler) = callbacks.delivery_completed {
                        handler(&message);
                    }
                }
                None => self.spurious("PUBACK", message_id),
            },
            MqttPacket::PubRec { message_id } => match self.session.pop_sent_publish(message_id) {
                Some(message) => {
                    if let Err(e) = self
                        .session
                        .push_sent_not_ack(MqttPacket::Publish(message))
                    {
                        warn!(self.logger, "Unable to track released PUBLISH"; "error" => %e);
                    }
                    if let Err(e) = self
                        .session
                        .push_received_not_ack(MqttPacket::PubRec { message_id })
                    {
                        debug!(self.logger, "PUBREC already tracked"; "error" => %e);
                    }
                    self.pending.push_back(MqttPacket::PubRel { message_id });
                }
                None => self.spurious("PUBREC", message_id),
            },
            MqttPacket::PubRel { message_id } => {
                match self.session.pop_received_publish(message_id) {
                    Some(message) => {
                        self.pending.push_back(MqttPacket::PubComp { message_id });
                        if let Some(handler) = callbacks.message_received {
                            handler(&message);
                        }
                    }
                    None => {
                        // Already delivered, the server just missed our PUBCOMP.
                        self.spurious("PUBREL", message_id);
                        self.pending.push_back(MqttPacket::PubComp { message_id });
                    }
                }
            }
            MqttPacket::PubComp { message_id } => {
                self.session.pop_received_pub_rec(message_id);
                match self.session.pop_sent_publish(message_id) {
                    Some(message) => {
                        if let Some(handler) = callbacks.delivery_completed {
                            handler(&message);
                        }
                    }
                    None => self.spurious("PUBCOMP", message_id),
                }
            }
            MqttPacket::SubAck {
                message_id,
                granted,
            } => match self.session.pop_sent_subscribe(message_id) {
                Some(request) => {
                    if let Some(handler) = callbacks.subscribe_completed {
                        handler(&request, granted);
                    }
                }
                None => self.spurious("SUBACK", message_id),
            },
            MqttPacket::UnsubAck { message_id } => {
                match self.session.pop_sent_unsubscribe(message_id) {
                    Some(request) => {
                        if let Some(handler) = callbacks.unsubscribe_completed {
                            handler(&request);
                        }
                    }
                    None => self.spurious("UNSUBACK", message_id),
                }
            }
            other => {
                debug!(self.logger, "Ignoring unexpected packet"; "type" => %other.packet_type());
            }
        }
    }

    fn spurious(&self, kind: &'static str, message_id: u16) {
        debug!(self.logger, "Acknowledgment matches nothing in flight";
               "type" => kind, "message_id" => message_id);
    }
}
