use crate::{
    model::{BasicProperties, Consumer},
    protocol::{Command, Frame, Response, SubscribeReturns},
    vhost::VirtualHost,
    RelaymqError, Result,
};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Outbound frame queue of each open channel, keyed by channel id
type Sessions = Arc<DashMap<String, UnboundedSender<Frame>>>;

/// Applies decoded commands to the virtual host.
///
/// Handler calls block on disk and metadata I/O; the server runs them on the blocking
/// thread pool.
pub struct MessageHandler {
    vhost: Arc<VirtualHost>,
    sessions: Sessions,
}

impl MessageHandler {
    pub fn new(vhost: Arc<VirtualHost>) -> Self {
        Self {
            vhost,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn vhost(&self) -> &Arc<VirtualHost> {
        &self.vhost
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Executes `command` and builds its reply. Any failure becomes `ok = false`.
    ///
    /// `outbound` is the sending connection's frame queue; channels created by this
    /// command push their deliveries through it.
    pub fn handle(&self, command: Command, outbound: &UnboundedSender<Frame>) -> Response {
        let ok = match self.execute(&command, outbound) {
            Ok(ok) => {
                if !ok {
                    debug!(
                        "{:?} rejected for channel {}",
                        command.frame_type(),
                        command.header().channel_id
                    );
                }
                ok
            }
            Err(e) => {
                error!(
                    "{:?} failed for channel {}: {}",
                    command.frame_type(),
                    command.header().channel_id,
                    e
                );
                false
            }
        };
        Response::for_command(&command, ok)
    }

    fn execute(&self, command: &Command, outbound: &UnboundedSender<Frame>) -> Result<bool> {
        let vhost = &self.vhost;
        match command {
            Command::ChannelCreate(header) => {
                if self
                    .sessions
                    .insert(header.channel_id.clone(), outbound.clone())
                    .is_some()
                {
                    warn!("Channel {} re-created, replacing its session", header.channel_id);
                }
                debug!("Channel {} opened", header.channel_id);
                Ok(true)
            }
            Command::ChannelClose(header) => Ok(self.close_channel(&header.channel_id)),
            Command::ExchangeDeclare(args) => vhost.exchange_declare(
                &args.exchange_name,
                args.exchange_type,
                args.durable,
                args.auto_delete,
                args.arguments.clone(),
            ),
            Command::ExchangeDelete(args) => vhost.exchange_delete(&args.exchange_name),
            Command::QueueDeclare(args) => vhost.queue_declare(
                &args.queue_name,
                args.durable,
                args.exclusive,
                args.auto_delete,
                args.arguments.clone(),
            ),
            Command::QueueDelete(args) => vhost.queue_delete(&args.queue_name),
            Command::QueueBind(args) => {
                vhost.queue_bind(&args.queue_name, &args.exchange_name, &args.binding_key)
            }
            Command::QueueUnbind(args) => vhost.queue_unbind(&args.queue_name, &args.exchange_name),
            Command::BasicPublish(args) => vhost.basic_publish(
                &args.exchange_name,
                &args.routing_key,
                args.properties.clone(),
                args.body.clone(),
            ),
            Command::BasicConsume(args) => vhost.basic_consume(
                &args.consumer_tag,
                &args.queue_name,
                args.auto_ack,
                self.push_consumer(),
            ),
            Command::BasicAck(args) => vhost.basic_ack(&args.queue_name, &args.message_id),
        }
    }

    /// Delivery callback that pushes a `0xc` frame to the channel named by the consumer tag
    fn push_consumer(&self) -> Arc<dyn Consumer> {
        let sessions = Arc::clone(&self.sessions);
        Arc::new(
            move |consumer_tag: &str, properties: &BasicProperties, body: &[u8]| -> Result<()> {
                let outbound = sessions
                    .get(consumer_tag)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| {
                        RelaymqError::Protocol(format!("no open channel {}", consumer_tag))
                    })?;

                let push = Response::Subscribe(SubscribeReturns {
                    rid: String::new(),
                    channel_id: consumer_tag.to_string(),
                    ok: true,
                    consumer_tag: consumer_tag.to_string(),
                    properties: properties.clone(),
                    body: Bytes::copy_from_slice(body),
                });
                outbound.send(push.encode()?).map_err(|_| {
                    RelaymqError::Protocol(format!("channel {} is closed", consumer_tag))
                })
            },
        )
    }

    /// Drops the channel's session and its consumers; false when it was not open
    pub fn close_channel(&self, channel_id: &str) -> bool {
        let existed = self.sessions.remove(channel_id).is_some();
        let cancelled = self.vhost.cancel_consumer_tag(channel_id);
        if existed {
            debug!(
                "Channel {} closed, {} consumer(s) cancelled",
                channel_id, cancelled
            );
        }
        existed
    }

    /// Cleans up every channel a disconnected client left open
    pub fn close_connection(&self, channel_ids: &[String]) {
        for channel_id in channel_ids {
            self.close_channel(channel_id);
        }
        if !channel_ids.is_empty() {
            info!("Connection closed, released {} channel(s)", channel_ids.len());
        }
    }
}
