//! Gossip payloads exchanged between peers.

use hodld_primitives::encoding::{decode, DecodeError, Decoder, Encodable, Encoder};
use hodld_primitives::OutPoint;

use crate::broadcast::Broadcast;
use crate::ping::Ping;

pub const MSG_ANNOUNCE: &str = "mnb";
pub const MSG_PING: &str = "mnp";
pub const MSG_LIST_REQUEST: &str = "dseg";
pub const MSG_SYNC_STATUS_COUNT: &str = "ssc";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MasternodeMessage {
    Announce(Broadcast),
    Ping(Ping),
    /// A null outpoint asks for the whole list.
    ListRequest(OutPoint),
    SyncStatusCount { item: i32, count: i32 },
}

impl MasternodeMessage {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Announce(_) => MSG_ANNOUNCE,
            Self::Ping(_) => MSG_PING,
            Self::ListRequest(_) => MSG_LIST_REQUEST,
            Self::SyncStatusCount { .. } => MSG_SYNC_STATUS_COUNT,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        match self {
            Self::Announce(broadcast) => broadcast.consensus_encode(&mut encoder),
            Self::Ping(ping) => ping.consensus_encode(&mut encoder),
            Self::ListRequest(outpoint) => outpoint.consensus_encode(&mut encoder),
            Self::SyncStatusCount { item, count } => {
                encoder.write_i32_le(*item);
                encoder.write_i32_le(*count);
            }
        }
        encoder.into_inner()
    }

    /// Parses a payload for one of the masternode commands. Other commands
    /// yield `Ok(None)`.
    pub fn decode(command: &str, payload: &[u8]) -> Result<Option<Self>, DecodeError> {
        let message = match command {
            MSG_ANNOUNCE => Self::Announce(decode(payload)?),
            MSG_PING => Self::Ping(decode(payload)?),
            MSG_LIST_REQUEST => Self::ListRequest(decode(payload)?),
            MSG_SYNC_STATUS_COUNT => {
                let mut decoder = Decoder::new(payload);
                let item = decoder.read_i32_le()?;
                let count = decoder.read_i32_le()?;
                if !decoder.is_empty() {
                    return Err(DecodeError::TrailingBytes);
                }
                Self::SyncStatusCount { item, count }
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}
