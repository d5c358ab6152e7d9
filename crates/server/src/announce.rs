//! Chain head announcements to connected clients.

use std::fmt;

use serde::Serialize;

/// A new chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeadInfo {
    pub number: u64,
    #[serde(with = "hex::serde")]
    pub hash: [u8; 32],
}

impl HeadInfo {
    pub const fn new(number: u64, hash: [u8; 32]) -> Self {
        Self { number, hash }
    }
}

impl fmt::Display for HeadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, hex::encode(&self.hash[..4]))
    }
}

/// Broadcasts heads to connected light clients.
///
/// Called from the caller of [`crate::LightServer::on_new_head`]; it must not
/// block.
pub trait HeadAnnouncer: Send + Sync + 'static {
    fn announce(&self, head: &HeadInfo, total_difficulty: u128);
}

/// Announcer that drops every head.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnnouncer;

impl HeadAnnouncer for NoopAnnouncer {
    fn announce(&self, _head: &HeadInfo, _total_difficulty: u128) {}
}
