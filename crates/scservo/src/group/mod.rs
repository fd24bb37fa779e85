// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! Grouped multi-servo transactions.
//!
//! Both group builders accumulate per-servo state for a fixed
//! `(start address, data length)` window and emit a single broadcast frame:
//!
//! - [`GroupSyncWrite`] - distinct payloads to many ids, one frame, no
//!   responses.
//! - [`GroupSyncRead`] - the same window from many ids, one request frame,
//!   one response per addressed id.
//!
//! Members are kept in ordered maps, so the on-wire parameter block is
//! always in ascending id order regardless of insertion order and identical
//! membership produces byte-identical frames.
//!
//! Groups are value state only. They borrow the [`PacketHandler`] and
//! [`Port`](crate::port::Port) per call and own no serial resources.
//!
//! [`PacketHandler`]: crate::packet::PacketHandler

mod sync_read;
mod sync_write;

pub use sync_read::GroupSyncRead;
pub use sync_write::GroupSyncWrite;

/// Membership error from a group builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// The id is already a member.
    DuplicateId(u8),
    /// The id is not a member.
    UnknownId(u8),
    /// The payload exceeds the group's data length.
    PayloadTooLong {
        /// Offered payload length.
        len: usize,
        /// Configured data length.
        max: usize,
    },
}

impl std::fmt::Display for GroupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "id {} is already in the group", id),
            Self::UnknownId(id) => write!(f, "id {} is not in the group", id),
            Self::PayloadTooLong { len, max } => {
                write!(f, "payload of {} bytes exceeds data length {}", len, max)
            }
        }
    }
}

impl std::error::Error for GroupError {}
