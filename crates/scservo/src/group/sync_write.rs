// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! Sync-write accumulation.

use std::collections::BTreeMap;

use super::GroupError;
use crate::link::SerialLink;
use crate::packet::PacketHandler;
use crate::port::Port;
use crate::status::CommResult;

/// Builder for one broadcast sync-write frame.
///
/// Collects `{id -> payload}` for a fixed window, linearises members in
/// ascending id order, and transmits the block in a single broadcast frame.
/// The linearised block is cached and only rebuilt after membership changes.
#[derive(Debug, Clone)]
pub struct GroupSyncWrite {
    start: u8,
    data_len: u8,
    targets: BTreeMap<u8, Vec<u8>>,
    block: Vec<u8>,
    dirty: bool,
}

impl GroupSyncWrite {
    /// Create a builder for the window `[start, start + data_len)`.
    #[must_use]
    pub fn new(start: u8, data_len: u8) -> Self {
        Self {
            start,
            data_len,
            targets: BTreeMap::new(),
            block: Vec::new(),
            dirty: false,
        }
    }

    /// Window start address.
    #[must_use]
    pub fn start(&self) -> u8 {
        self.start
    }

    /// Window length in bytes.
    #[must_use]
    pub fn data_len(&self) -> u8 {
        self.data_len
    }

    /// Number of member ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Register a new member with its payload.
    pub fn add(&mut self, id: u8, payload: &[u8]) -> Result<(), GroupError> {
        if self.targets.contains_key(&id) {
            return Err(GroupError::DuplicateId(id));
        }
        self.check_payload(payload)?;
        self.targets.insert(id, payload.to_vec());
        self.dirty = true;
        Ok(())
    }

    /// Replace an existing member's payload.
    pub fn change(&mut self, id: u8, payload: &[u8]) -> Result<(), GroupError> {
        if !self.targets.contains_key(&id) {
            return Err(GroupError::UnknownId(id));
        }
        self.check_payload(payload)?;
        self.targets.insert(id, payload.to_vec());
        self.dirty = true;
        Ok(())
    }

    /// Drop a member. No-op for unknown ids.
    pub fn remove(&mut self, id: u8) {
        if self.targets.remove(&id).is_some() {
            self.dirty = true;
        }
    }

    /// Drop all members.
    pub fn clear(&mut self) {
        self.targets.clear();
        self.block.clear();
        self.dirty = true;
    }

    /// Transmit the group as one broadcast frame.
    ///
    /// Returns [`CommResult::NotAvailable`] for an empty group without
    /// touching the bus.
    pub fn tx<L: SerialLink>(
        &mut self,
        handler: &PacketHandler,
        port: &mut Port<L>,
    ) -> CommResult {
        if self.targets.is_empty() {
            return CommResult::NotAvailable;
        }
        if self.dirty || self.block.is_empty() {
            self.rebuild();
        }
        handler.sync_write_tx(port, self.start, self.data_len, &self.block)
    }

    /// The linearised parameter block in ascending id order.
    fn rebuild(&mut self) {
        self.block.clear();
        for (id, payload) in &self.targets {
            self.block.push(*id);
            self.block.extend_from_slice(payload);
        }
        self.dirty = false;
    }

    fn check_payload(&self, payload: &[u8]) -> Result<(), GroupError> {
        if payload.len() > usize::from(self.data_len) {
            return Err(GroupError::PayloadTooLong {
                len: payload.len(),
                max: usize::from(self.data_len),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    fn wire_block(&mut self) -> &[u8] {
        if self.dirty || self.block.is_empty() {
            self.rebuild();
        }
        &self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LoopbackLink;
    use crate::value::Endian;

    #[test]
    fn test_block_is_ascending_by_id() {
        let mut group = GroupSyncWrite::new(42, 2);
        // Insertion order 3, 1, 2 must not leak onto the wire.
        group.add(3, &[0xB8, 0x0B]).expect("add");
        group.add(1, &[0xE8, 0x03]).expect("add");
        group.add(2, &[0xD0, 0x07]).expect("add");

        assert_eq!(
            group.wire_block(),
            &[0x01, 0xE8, 0x03, 0x02, 0xD0, 0x07, 0x03, 0xB8, 0x0B]
        );
    }

    #[test]
    fn test_add_rejects_duplicates_and_oversize() {
        let mut group = GroupSyncWrite::new(42, 2);
        group.add(1, &[0, 0]).expect("add");
        assert_eq!(group.add(1, &[1, 1]), Err(GroupError::DuplicateId(1)));
        assert_eq!(
            group.add(2, &[1, 2, 3]),
            Err(GroupError::PayloadTooLong { len: 3, max: 2 })
        );
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_change_requires_presence() {
        let mut group = GroupSyncWrite::new(42, 2);
        assert_eq!(group.change(1, &[0, 0]), Err(GroupError::UnknownId(1)));

        group.add(1, &[0, 0]).expect("add");
        group.change(1, &[0xE8, 0x03]).expect("change");
        assert_eq!(group.wire_block(), &[0x01, 0xE8, 0x03]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut group = GroupSyncWrite::new(42, 2);
        group.add(1, &[0, 0]).expect("add");
        group.add(2, &[1, 1]).expect("add");

        group.remove(9); // unknown: no-op
        group.remove(1);
        assert_eq!(group.wire_block(), &[0x02, 0x01, 0x01]);

        group.clear();
        assert!(group.is_empty());
    }

    #[test]
    fn test_tx_empty_group_not_available() {
        let mut group = GroupSyncWrite::new(42, 2);
        let handler = PacketHandler::new(Endian::Little);
        let mut port = Port::new(LoopbackLink::new(), 1_000_000).expect("port");

        assert_eq!(group.tx(&handler, &mut port), CommResult::NotAvailable);
        assert!(port.link_mut().take_tx().is_empty());
    }

    #[test]
    fn test_tx_emits_single_broadcast_frame() {
        let mut group = GroupSyncWrite::new(42, 2);
        group.add(1, &[0xE8, 0x03]).expect("add");
        group.add(2, &[0xD0, 0x07]).expect("add");
        group.add(3, &[0xB8, 0x0B]).expect("add");

        let handler = PacketHandler::new(Endian::Little);
        let mut port = Port::new(LoopbackLink::new(), 1_000_000).expect("port");

        assert_eq!(group.tx(&handler, &mut port), CommResult::Success);
        let tx = port.link_mut().take_tx();
        assert_eq!(tx[2], 0xFE); // broadcast id
        assert_eq!(tx[4], 0x83); // sync-write
        assert_eq!(&tx[5..7], &[0x2A, 0x02]); // start address, data length
        assert_eq!(
            &tx[7..16],
            &[0x01, 0xE8, 0x03, 0x02, 0xD0, 0x07, 0x03, 0xB8, 0x0B]
        );

        // Unchanged membership reuses the cached block byte-for-byte.
        assert_eq!(group.tx(&handler, &mut port), CommResult::Success);
        assert_eq!(port.link_mut().take_tx(), tx);
    }
}
