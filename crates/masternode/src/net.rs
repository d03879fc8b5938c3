use std::net::SocketAddr;

use crate::message::MasternodeMessage;

/// Remote peer identity as seen by the transport.
pub type PeerId = SocketAddr;

/// Outbound side of the peer-to-peer transport.
///
/// Calls are made after the registry has released its locks.
pub trait PeerNetwork: Send + Sync {
    /// Queue `message` for every connected peer.
    fn relay(&self, message: &MasternodeMessage);

    fn send(&self, peer: &PeerId, message: MasternodeMessage);

    /// Report a protocol violation for the transport's banning policy.
    fn misbehaving(&self, peer: &PeerId, score: i32);
}
