//! Converts between `socket.io` packets and the `engine.io` packets carrying
//! them. A packet with binary arguments travels as one text message followed
//! by one binary message per attachment.

use bytes::Bytes;
use log::trace;
use std::str::from_utf8;
use unisock_engineio::{Packet as EnginePacket, PacketId as EnginePacketId};

use crate::error::{Error, Result};
use crate::packet::{Packet, RawPacket};

/// Encodes a packet into the engine.io messages to send, in order.
pub fn encode(packet: Packet) -> Vec<EnginePacket> {
    let (raw, attachments) = packet.into_raw();
    let mut packets = Vec::with_capacity(attachments.len() + 1);
    packets.push(EnginePacket::new(EnginePacketId::Message, raw.encode()));
    packets.extend(
        attachments
            .into_iter()
            .map(|attachment| EnginePacket::new(EnginePacketId::MessageBinary, attachment)),
    );
    packets
}

/// A packet waiting for its binary attachments.
#[derive(Debug)]
struct Pending {
    raw: RawPacket,
    attachments: Vec<Bytes>,
}

/// Reassembles packets from engine.io messages fed one at a time.
#[derive(Debug, Default)]
pub struct Decoder {
    pending: Option<Pending>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a packet is still waiting for attachments.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feeds one engine.io packet and returns the packets it completed. A
    /// text message arriving while attachments are outstanding fails the
    /// incomplete packet and is then decoded on its own.
    pub fn decode(&mut self, packet: EnginePacket) -> Vec<Result<Packet>> {
        let mut decoded = Vec::new();
        match packet.packet_id {
            EnginePacketId::MessageBinary => match self.pending.take() {
                Some(mut pending) => {
                    pending.attachments.push(packet.data);
                    if pending.attachments.len() == pending.raw.attachment_count {
                        decoded.push(Packet::from_raw(pending.raw, &pending.attachments));
                    } else {
                        self.pending = Some(pending);
                    }
                }
                None => decoded.push(Err(Error::InvalidAttachment())),
            },
            EnginePacketId::Message => {
                if let Some(pending) = self.pending.take() {
                    decoded.push(Err(Error::InvalidAttachmentCount {
                        expected: pending.raw.attachment_count,
                        received: pending.attachments.len(),
                    }));
                }
                match Self::decode_text(&packet.data) {
                    Ok(raw) if raw.attachment_count > 0 => {
                        trace!("waiting for {} attachments", raw.attachment_count);
                        self.pending = Some(Pending {
                            raw,
                            attachments: Vec::new(),
                        });
                    }
                    Ok(raw) => decoded.push(Packet::from_raw(raw, &[])),
                    Err(err) => decoded.push(Err(err)),
                }
            }
            other => trace!("not a socket.io message: {:?}", other),
        }
        decoded
    }

    fn decode_text(data: &Bytes) -> Result<RawPacket> {
        RawPacket::decode(from_utf8(data)?)
    }

    /// Drops a partially received packet, e.g. when the session ended.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}
