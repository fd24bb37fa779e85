// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! Sync-read accumulation and response collection.

use std::collections::{BTreeMap, BTreeSet};

use super::GroupError;
use crate::link::SerialLink;
use crate::packet::PacketHandler;
use crate::port::Port;
use crate::status::CommResult;
use crate::value::Endian;

/// Builder for one broadcast sync-read round.
///
/// Collects member ids for a fixed window, broadcasts a single request, then
/// gathers one response per id. After a round, each id either holds exactly
/// the window's bytes or nothing at all; [`GroupSyncRead::get`] decodes
/// buffered bytes by absolute control-table address.
#[derive(Debug, Clone)]
pub struct GroupSyncRead {
    endian: Endian,
    start: u8,
    data_len: u8,
    ids: BTreeSet<u8>,
    results: BTreeMap<u8, Vec<u8>>,
    last_rx_ok: bool,
}

impl GroupSyncRead {
    /// Create a builder for the window `[start, start + data_len)`.
    ///
    /// The byte-order policy is inherited from the handler.
    #[must_use]
    pub fn new(handler: &PacketHandler, start: u8, data_len: u8) -> Self {
        Self {
            endian: handler.endian(),
            start,
            data_len,
            ids: BTreeSet::new(),
            results: BTreeMap::new(),
            last_rx_ok: false,
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
        self.ids.len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the last receive round completed for every member.
    #[must_use]
    pub fn last_rx_ok(&self) -> bool {
        self.last_rx_ok
    }

    /// Register a member id.
    pub fn add(&mut self, id: u8) -> Result<(), GroupError> {
        if !self.ids.insert(id) {
            return Err(GroupError::DuplicateId(id));
        }
        Ok(())
    }

    /// Drop a member and its buffered bytes. No-op for unknown ids.
    pub fn remove(&mut self, id: u8) {
        self.ids.remove(&id);
        self.results.remove(&id);
    }

    /// Drop all members and buffered bytes.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.results.clear();
        self.last_rx_ok = false;
    }

    /// Broadcast the sync-read request for the current membership.
    ///
    /// Clears buffered bytes from the previous round. Returns
    /// [`CommResult::NotAvailable`] for an empty group.
    pub fn tx<L: SerialLink>(
        &mut self,
        handler: &PacketHandler,
        port: &mut Port<L>,
    ) -> CommResult {
        if self.ids.is_empty() {
            return CommResult::NotAvailable;
        }
        self.results.clear();
        self.last_rx_ok = false;
        let ids: Vec<u8> = self.ids.iter().copied().collect();
        handler.sync_read_tx(port, self.start, self.data_len, &ids)
    }

    /// Collect one response per member, in ascending id order.
    ///
    /// Stops at the first non-success outcome and reports it; ids already
    /// collected keep their bytes, the rest stay empty.
    pub fn rx<L: SerialLink>(
        &mut self,
        handler: &PacketHandler,
        port: &mut Port<L>,
    ) -> CommResult {
        if self.ids.is_empty() {
            return CommResult::NotAvailable;
        }
        let ids: Vec<u8> = self.ids.iter().copied().collect();
        for id in ids {
            let (data, status) = handler.receive_by_id(port, id, usize::from(self.data_len));
            if !status.comm.is_success() {
                log::debug!("[group] sync-read round stopped at id {}: {}", id, status);
                return status.comm;
            }
            self.results.insert(id, data);
        }
        self.last_rx_ok = true;
        CommResult::Success
    }

    /// Run a full request/collect round.
    pub fn txrx<L: SerialLink>(
        &mut self,
        handler: &PacketHandler,
        port: &mut Port<L>,
    ) -> CommResult {
        let comm = self.tx(handler, port);
        if !comm.is_success() {
            return comm;
        }
        self.rx(handler, port)
    }

    /// Raw bytes buffered for an id in the last round, if any.
    #[must_use]
    pub fn bytes(&self, id: u8) -> Option<&[u8]> {
        self.results.get(&id).map(Vec::as_slice)
    }

    /// Whether `get` would see real data for this request.
    ///
    /// True when the id holds bytes from the last round and
    /// `[addr, addr + len)` lies inside the configured window.
    #[must_use]
    pub fn is_available(&self, id: u8, addr: u8, len: usize) -> bool {
        let start = usize::from(self.start);
        let addr = usize::from(addr);
        let Some(end) = addr.checked_add(len) else {
            return false;
        };
        start <= addr && end <= start + usize::from(self.data_len) && self.results.contains_key(&id)
    }

    /// Decode a 1/2/4-byte value at an absolute control-table address.
    ///
    /// Returns 0 when the request falls outside the window, the id holds no
    /// bytes, or `len` is not 1, 2, or 4.
    #[must_use]
    pub fn get(&self, id: u8, addr: u8, len: usize) -> u32 {
        if !self.is_available(id, addr, len) {
            return 0;
        }
        let Some(data) = self.results.get(&id) else {
            return 0;
        };
        let offset = usize::from(addr) - usize::from(self.start);
        match len {
            1 => u32::from(data[offset]),
            2 => u32::from(self.endian.word_from_bytes([data[offset], data[offset + 1]])),
            4 => self.endian.dword_from_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LoopbackLink;

    fn handler() -> PacketHandler {
        PacketHandler::new(Endian::Little)
    }

    fn port() -> Port<LoopbackLink> {
        Port::new(LoopbackLink::new(), 1_000_000).expect("port")
    }

    // Build a response frame for `id` carrying `data`.
    fn response(id: u8, data: &[u8]) -> Vec<u8> {
        let mut f = vec![0xFF, 0xFF, id, (data.len() + 2) as u8, 0x00];
        f.extend_from_slice(data);
        let sum = f[2..].iter().fold(0u8, |s, &b| s.wrapping_add(b));
        f.push(!sum);
        f
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let ph = handler();
        let mut group = GroupSyncRead::new(&ph, 0x38, 2);
        group.add(1).expect("add");
        assert_eq!(group.add(1), Err(GroupError::DuplicateId(1)));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_get_before_any_round_is_zero() {
        let ph = handler();
        let mut group = GroupSyncRead::new(&ph, 0x38, 4);
        group.add(1).expect("add");
        assert_eq!(group.get(1, 0x38, 2), 0);
        assert!(!group.is_available(1, 0x38, 2));
        assert!(!group.last_rx_ok());
    }

    #[test]
    fn test_full_round_and_decoding() {
        let ph = handler();
        let mut p = port();
        let mut group = GroupSyncRead::new(&ph, 0x38, 4);
        group.add(2).expect("add");
        group.add(1).expect("add");

        // Responses arrive in ascending id order.
        let r1 = response(1, &[0xE8, 0x03, 0xAA, 0xBB]);
        let r2 = response(2, &[0xD0, 0x07, 0x11, 0x22]);
        p.link_mut().push_rx(&r1);
        p.link_mut().push_rx(&r2);

        assert_eq!(group.txrx(&ph, &mut p), CommResult::Success);
        assert!(group.last_rx_ok());

        // Request frame: broadcast sync-read over ids {1, 2}.
        let tx = p.link_mut().take_tx();
        assert_eq!(tx[2], 0xFE);
        assert_eq!(tx[4], 0x82);
        assert_eq!(&tx[5..9], &[0x38, 0x04, 0x01, 0x02]);

        // Per-offset decoding against the buffered payloads.
        assert_eq!(group.get(1, 0x38, 2), 0x03E8);
        assert_eq!(group.get(2, 0x38, 2), 0x07D0);
        assert_eq!(group.get(1, 0x38, 4), 0xBBAA_03E8);
        for (k, byte) in [0xE8u32, 0x03, 0xAA, 0xBB].into_iter().enumerate() {
            assert_eq!(group.get(1, 0x38 + k as u8, 1), byte);
        }
        assert_eq!(group.bytes(2), Some(&[0xD0, 0x07, 0x11, 0x22][..]));
    }

    #[test]
    fn test_get_outside_window_is_zero() {
        let ph = handler();
        let mut p = port();
        let mut group = GroupSyncRead::new(&ph, 0x38, 4);
        group.add(1).expect("add");
        p.link_mut().push_rx(&response(1, &[1, 2, 3, 4]));

        assert_eq!(group.txrx(&ph, &mut p), CommResult::Success);

        // Below the window, across its end, and nonsense lengths.
        assert_eq!(group.get(1, 0x37, 1), 0);
        assert_eq!(group.get(1, 0x3B, 2), 0);
        assert_eq!(group.get(1, 0x3C, 1), 0);
        assert_eq!(group.get(1, 0xFF, 4), 0);
        assert_eq!(group.get(1, 0x38, 3), 0);
        // Unknown id.
        assert_eq!(group.get(9, 0x38, 1), 0);
    }

    #[test]
    fn test_round_stops_at_first_missing_id() {
        let ph = handler();
        let mut p = port();
        let mut group = GroupSyncRead::new(&ph, 0x38, 2);
        group.add(1).expect("add");
        group.add(2).expect("add");

        // Only id 1 answers; the round times out waiting for id 2.
        p.link_mut().push_rx(&response(1, &[0xE8, 0x03]));

        assert_eq!(group.txrx(&ph, &mut p), CommResult::RxTimeout);
        assert!(!group.last_rx_ok());
        assert_eq!(group.get(1, 0x38, 2), 0x03E8);
        assert_eq!(group.get(2, 0x38, 2), 0);
        assert!(!p.is_using());
    }

    #[test]
    fn test_tx_empty_group_not_available() {
        let ph = handler();
        let mut p = port();
        let mut group = GroupSyncRead::new(&ph, 0x38, 2);
        assert_eq!(group.tx(&ph, &mut p), CommResult::NotAvailable);
        assert_eq!(group.rx(&ph, &mut p), CommResult::NotAvailable);
    }

    #[test]
    fn test_new_round_clears_stale_results() {
        let ph = handler();
        let mut p = port();
        let mut group = GroupSyncRead::new(&ph, 0x38, 2);
        group.add(1).expect("add");

        p.link_mut().push_rx(&response(1, &[0xE8, 0x03]));
        assert_eq!(group.txrx(&ph, &mut p), CommResult::Success);
        assert_eq!(group.get(1, 0x38, 2), 0x03E8);

        // Next round gets no answer: stale bytes must not survive.
        assert_eq!(group.txrx(&ph, &mut p), CommResult::RxTimeout);
        assert_eq!(group.get(1, 0x38, 2), 0);
        assert!(!group.last_rx_ok());
    }
}
