use crate::model::{Arguments, BasicProperties, ExchangeType};
use crate::{RelaymqError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Frame type codes; responses echo the request's code, deliveries use `Subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FrameType {
    ChannelCreate = 0x1,
    ChannelClose = 0x2,
    ExchangeDeclare = 0x3,
    ExchangeDelete = 0x4,
    QueueDeclare = 0x5,
    QueueDelete = 0x6,
    QueueBind = 0x7,
    QueueUnbind = 0x8,
    BasicPublish = 0x9,
    BasicConsume = 0xa,
    BasicAck = 0xb,
    /// Unsolicited delivery pushed to a consumer
    Subscribe = 0xc,
}

impl FrameType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0x1 => FrameType::ChannelCreate,
            0x2 => FrameType::ChannelClose,
            0x3 => FrameType::ExchangeDeclare,
            0x4 => FrameType::ExchangeDelete,
            0x5 => FrameType::QueueDeclare,
            0x6 => FrameType::QueueDelete,
            0x7 => FrameType::QueueBind,
            0x8 => FrameType::QueueUnbind,
            0x9 => FrameType::BasicPublish,
            0xa => FrameType::BasicConsume,
            0xb => FrameType::BasicAck,
            0xc => FrameType::Subscribe,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }
}

/// Correlation fields carried by every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub rid: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDeclareArgs {
    pub header: RequestHeader,
    pub exchange_name: String,
    pub exchange_type: ExchangeType,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDeleteArgs {
    pub header: RequestHeader,
    pub exchange_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDeclareArgs {
    pub header: RequestHeader,
    pub queue_name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDeleteArgs {
    pub header: RequestHeader,
    pub queue_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueBindArgs {
    pub header: RequestHeader,
    pub queue_name: String,
    pub exchange_name: String,
    pub binding_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueUnbindArgs {
    pub header: RequestHeader,
    pub queue_name: String,
    pub exchange_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicPublishArgs {
    pub header: RequestHeader,
    pub exchange_name: String,
    pub routing_key: String,
    pub properties: Option<BasicProperties>,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicConsumeArgs {
    pub header: RequestHeader,
    pub consumer_tag: String,
    pub queue_name: String,
    pub auto_ack: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAckArgs {
    pub header: RequestHeader,
    pub queue_name: String,
    pub message_id: String,
}

/// A request decoded from a frame
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ChannelCreate(RequestHeader),
    ChannelClose(RequestHeader),
    ExchangeDeclare(ExchangeDeclareArgs),
    ExchangeDelete(ExchangeDeleteArgs),
    QueueDeclare(QueueDeclareArgs),
    QueueDelete(QueueDeleteArgs),
    QueueBind(QueueBindArgs),
    QueueUnbind(QueueUnbindArgs),
    BasicPublish(BasicPublishArgs),
    BasicConsume(BasicConsumeArgs),
    BasicAck(BasicAckArgs),
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(payload)?)
}

impl Command {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Command::ChannelCreate(_) => FrameType::ChannelCreate,
            Command::ChannelClose(_) => FrameType::ChannelClose,
            Command::ExchangeDeclare(_) => FrameType::ExchangeDeclare,
            Command::ExchangeDelete(_) => FrameType::ExchangeDelete,
            Command::QueueDeclare(_) => FrameType::QueueDeclare,
            Command::QueueDelete(_) => FrameType::QueueDelete,
            Command::QueueBind(_) => FrameType::QueueBind,
            Command::QueueUnbind(_) => FrameType::QueueUnbind,
            Command::BasicPublish(_) => FrameType::BasicPublish,
            Command::BasicConsume(_) => FrameType::BasicConsume,
            Command::BasicAck(_) => FrameType::BasicAck,
        }
    }

    pub fn header(&self) -> &RequestHeader {
        match self {
            Command::ChannelCreate(h) | Command::ChannelClose(h) => h,
            Command::ExchangeDeclare(a) => &a.header,
            Command::ExchangeDelete(a) => &a.header,
            Command::QueueDeclare(a) => &a.header,
            Command::QueueDelete(a) => &a.header,
            Command::QueueBind(a) => &a.header,
            Command::QueueUnbind(a) => &a.header,
            Command::BasicPublish(a) => &a.header,
            Command::BasicConsume(a) => &a.header,
            Command::BasicAck(a) => &a.header,
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        let p = &frame.payload[..];
        Ok(match frame.frame_type {
            FrameType::ChannelCreate => Command::ChannelCreate(decode_payload(p)?),
            FrameType::ChannelClose => Command::ChannelClose(decode_payload(p)?),
            FrameType::ExchangeDeclare => Command::ExchangeDeclare(decode_payload(p)?),
            FrameType::ExchangeDelete => Command::ExchangeDelete(decode_payload(p)?),
            FrameType::QueueDeclare => Command::QueueDeclare(decode_payload(p)?),
            FrameType::QueueDelete => Command::QueueDelete(decode_payload(p)?),
            FrameType::QueueBind => Command::QueueBind(decode_payload(p)?),
            FrameType::QueueUnbind => Command::QueueUnbind(decode_payload(p)?),
            FrameType::BasicPublish => Command::BasicPublish(decode_payload(p)?),
            FrameType::BasicConsume => Command::BasicConsume(decode_payload(p)?),
            FrameType::BasicAck => Command::BasicAck(decode_payload(p)?),
            FrameType::Subscribe => {
                return Err(RelaymqError::Protocol(
                    "subscribe frames are server-to-client only".to_string(),
                ))
            }
        })
    }

    pub fn encode(&self) -> Result<Frame> {
        let payload = match self {
            Command::ChannelCreate(h) | Command::ChannelClose(h) => bincode::serialize(h)?,
            Command::ExchangeDeclare(a) => bincode::serialize(a)?,
            Command::ExchangeDelete(a) => bincode::serialize(a)?,
            Command::QueueDeclare(a) => bincode::serialize(a)?,
            Command::QueueDelete(a) => bincode::serialize(a)?,
            Command::QueueBind(a) => bincode::serialize(a)?,
            Command::QueueUnbind(a) => bincode::serialize(a)?,
            Command::BasicPublish(a) => bincode::serialize(a)?,
            Command::BasicConsume(a) => bincode::serialize(a)?,
            Command::BasicAck(a) => bincode::serialize(a)?,
        };
        Ok(Frame::new(self.frame_type(), payload))
    }
}

/// Reply to a request, sent under the request's frame type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicReturns {
    pub rid: String,
    pub channel_id: String,
    pub ok: bool,
}

/// Message delivery pushed to the consumer's channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeReturns {
    /// Always empty; a push answers no request
    pub rid: String,
    pub channel_id: String,
    pub ok: bool,
    pub consumer_tag: String,
    pub properties: BasicProperties,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Basic(FrameType, BasicReturns),
    Subscribe(SubscribeReturns),
}

impl Response {
    pub fn for_command(command: &Command, ok: bool) -> Self {
        let header = command.header();
        Response::Basic(
            command.frame_type(),
            BasicReturns {
                rid: header.rid.clone(),
                channel_id: header.channel_id.clone(),
                ok,
            },
        )
    }

    pub fn encode(&self) -> Result<Frame> {
        Ok(match self {
            Response::Basic(frame_type, returns) => {
                Frame::new(*frame_type, bincode::serialize(returns)?)
            }
            Response::Subscribe(returns) => {
                Frame::new(FrameType::Subscribe, bincode::serialize(returns)?)
            }
        })
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        Ok(match frame.frame_type {
            FrameType::Subscribe => Response::Subscribe(decode_payload(&frame.payload)?),
            other => Response::Basic(other, decode_payload(&frame.payload)?),
        })
    }
}
