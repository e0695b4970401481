use bytes::Bytes;
use std::convert::TryFrom;
use std::fmt::Write;

use crate::error::{Error, Result};
use crate::value::Value;

/// The namespace every client joins unless told otherwise.
pub const DEFAULT_NAMESPACE: &str = "/";

/// An enumeration of the different `Packet` types in the `socket.io` protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PacketId {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl TryFrom<char> for PacketId {
    type Error = Error;
    fn try_from(b: char) -> Result<Self> {
        match b {
            '0' => Ok(PacketId::Connect),
            '1' => Ok(PacketId::Disconnect),
            '2' => Ok(PacketId::Event),
            '3' => Ok(PacketId::Ack),
            '4' => Ok(PacketId::ConnectError),
            '5' => Ok(PacketId::BinaryEvent),
            '6' => Ok(PacketId::BinaryAck),
            _ => Err(Error::InvalidPacketId(b)),
        }
    }
}

/// A packet which gets sent or received during in the `socket.io` protocol.
#[derive(Debug, PartialEq, Clone)]
pub enum Packet {
    /// Sent by the client with the optional auth payload, answered by the
    /// server with the session data.
    Connect {
        nsp: String,
        data: Option<serde_json::Value>,
    },
    Disconnect {
        nsp: String,
    },
    Event {
        nsp: String,
        event: String,
        args: Vec<Value>,
        id: Option<i32>,
    },
    Ack {
        nsp: String,
        id: i32,
        args: Vec<Value>,
    },
    ConnectError {
        nsp: String,
        error: serde_json::Value,
    },
}

impl Packet {
    pub fn nsp(&self) -> &str {
        match self {
            Packet::Connect { nsp, .. }
            | Packet::Disconnect { nsp }
            | Packet::Event { nsp, .. }
            | Packet::Ack { nsp, .. }
            | Packet::ConnectError { nsp, .. } => nsp,
        }
    }

    /// Splits the packet into its text frame and binary attachments.
    pub(crate) fn into_raw(self) -> (RawPacket, Vec<Bytes>) {
        let mut attachments = Vec::new();
        let raw = match self {
            Packet::Connect { nsp, data } => RawPacket::new(PacketId::Connect, nsp, None, data),
            Packet::Disconnect { nsp } => RawPacket::new(PacketId::Disconnect, nsp, None, None),
            Packet::Event {
                nsp,
                event,
                args,
                id,
            } => {
                let mut data = vec![serde_json::Value::String(event)];
                data.extend(args.into_iter().map(|arg| arg.into_json(&mut attachments)));
                let packet_type = if attachments.is_empty() {
                    PacketId::Event
                } else {
                    PacketId::BinaryEvent
                };
                RawPacket::new(packet_type, nsp, id, Some(serde_json::Value::Array(data)))
            }
            Packet::Ack { nsp, id, args } => {
                let data = args
                    .into_iter()
                    .map(|arg| arg.into_json(&mut attachments))
                    .collect();
                let packet_type = if attachments.is_empty() {
                    PacketId::Ack
                } else {
                    PacketId::BinaryAck
                };
                RawPacket::new(packet_type, nsp, Some(id), Some(serde_json::Value::Array(data)))
            }
            Packet::ConnectError { nsp, error } => {
                let data = (!error.is_null()).then_some(error);
                RawPacket::new(PacketId::ConnectError, nsp, None, data)
            }
        };
        let raw = RawPacket {
            attachment_count: attachments.len(),
            ..raw
        };
        (raw, attachments)
    }

    /// Builds the packet from a text frame and the attachments it announced.
    pub(crate) fn from_raw(raw: RawPacket, attachments: &[Bytes]) -> Result<Packet> {
        let RawPacket {
            packet_type,
            nsp,
            id,
            data,
            ..
        } = raw;

        // only binary packets carry placeholders, elsewhere they are plain objects
        let binary = matches!(packet_type, PacketId::BinaryEvent | PacketId::BinaryAck);
        let convert = |value: serde_json::Value| {
            if binary {
                Value::from_json(value, attachments)
            } else {
                Ok(Value::from(value))
            }
        };

        Ok(match packet_type {
            PacketId::Connect => Packet::Connect { nsp, data },
            PacketId::Disconnect => Packet::Disconnect { nsp },
            PacketId::ConnectError => Packet::ConnectError {
                nsp,
                error: data.unwrap_or_default(),
            },
            PacketId::Event | PacketId::BinaryEvent => {
                let mut values = match data {
                    Some(serde_json::Value::Array(values)) => values.into_iter(),
                    Some(_) => return Err(Error::InvalidPacket()),
                    None => return Err(Error::InvalidEventName()),
                };
                let event = match values.next() {
                    Some(serde_json::Value::String(event)) => event,
                    _ => return Err(Error::InvalidEventName()),
                };
                let args = values.map(convert).collect::<Result<_>>()?;
                Packet::Event {
                    nsp,
                    event,
                    args,
                    id,
                }
            }
            PacketId::Ack | PacketId::BinaryAck => {
                let id = id.ok_or(Error::IncompletePacket())?;
                let args = match data {
                    Some(serde_json::Value::Array(values)) => {
                        values.into_iter().map(convert).collect::<Result<_>>()?
                    }
                    Some(_) => return Err(Error::InvalidPacket()),
                    None => Vec::new(),
                };
                Packet::Ack { nsp, id, args }
            }
        })
    }
}

/// The text frame of a packet: header fields plus the json body, with
/// binary data replaced by placeholders.
#[derive(Debug, PartialEq, Clone)]
pub(crate) struct RawPacket {
    pub packet_type: PacketId,
    pub nsp: String,
    pub id: Option<i32>,
    pub attachment_count: usize,
    pub data: Option<serde_json::Value>,
}

impl RawPacket {
    fn new(
        packet_type: PacketId,
        nsp: String,
        id: Option<i32>,
        data: Option<serde_json::Value>,
    ) -> Self {
        RawPacket {
            packet_type,
            nsp,
            id,
            attachment_count: 0,
            data,
        }
    }

    pub fn encode(&self) -> String {
        // first the packet type
        let mut buffer = String::new();
        buffer.push((self.packet_type as u8 + b'0') as char);

        // eventually a number of attachments, followed by '-'
        if let PacketId::BinaryAck | PacketId::BinaryEvent = self.packet_type {
            let _ = write!(buffer, "{}-", self.attachment_count);
        }

        // if the namespace is different from the default one append it as well,
        // followed by ','
        if self.nsp != DEFAULT_NAMESPACE {
            buffer.push_str(&self.nsp);
            buffer.push(',');
        }

        // if an id is present append it...
        if let Some(id) = self.id {
            let _ = write!(buffer, "{id}");
        }

        if let Some(data) = self.data.as_ref() {
            let _ = write!(buffer, "{data}");
        }

        buffer
    }

    pub fn decode(payload: &str) -> Result<RawPacket> {
        let mut payload = payload;

        // packet_type
        let id_char = payload.chars().next().ok_or(Error::IncompletePacket())?;
        let packet_type = PacketId::try_from(id_char)?;
        payload = &payload[id_char.len_utf8()..];

        // attachment_count
        let mut attachment_count = 0;
        if let PacketId::BinaryAck | PacketId::BinaryEvent = packet_type {
            let (prefix, rest) = payload.split_once('-').ok_or(Error::IncompletePacket())?;
            payload = rest;
            attachment_count = prefix.parse().map_err(|_| Error::InvalidPacket())?;
        }

        // namespace
        let mut nsp = DEFAULT_NAMESPACE.to_owned();
        if payload.starts_with('/') {
            let (prefix, rest) = payload.split_once(',').unwrap_or((payload, ""));
            nsp = prefix.to_owned();
            payload = rest;
        }

        // id
        let digits = payload
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(payload.len(), |(idx, _)| idx);
        let mut id = None;
        if digits > 0 {
            let (prefix, rest) = payload.split_at(digits);
            payload = rest;
            id = Some(prefix.parse()?);
        }

        let data = if payload.is_empty() {
            None
        } else {
            Some(serde_json::from_str(payload)?)
        };

        Ok(RawPacket {
            packet_type,
            nsp,
            id,
            attachment_count,
            data,
        })
    }
}
