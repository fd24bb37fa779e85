// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! Request/response transactions over one port.
//!
//! [`PacketHandler`] owns the protocol state machine and the endianness
//! policy for multi-byte fields; the port is borrowed per call, so one
//! handler can serve several ports and two handlers with different policies
//! can serve two servo families in one process.
//!
//! # Transaction State Machine
//!
//! ```text
//!   IDLE --tx--> AWAIT_RESP --match id-----> DONE(success + error byte)
//!                    |  ^
//!                    |  +--mismatched id (frame discarded)
//!                    +--timeout----------> DONE(rx-timeout)
//!                    +--bad frame--------> DONE(rx-corrupt)
//!
//!   IDLE --tx(broadcast or ACTION)-------> DONE(success, no receive)
//! ```
//!
//! A short write (`tx-fail`) or an oversize request (`tx-error`) short-
//! circuits before AWAIT_RESP. The busy flag is held from transmit until the
//! receive path returns; broadcast transmits release it immediately.
//!
//! # Receive Window
//!
//! Armed per transaction from the line rate:
//! `tx_time_per_byte * expected_bytes + 2 * latency + 2` ms, where the
//! expected byte count is `payload + 6` for reads, 6 for other unicast
//! instructions, and `(6 + payload) * n_ids` for a sync-read round.

use crate::frame::{self, instruction, Scan, BROADCAST_ID, MAX_ID, POS_ID, POS_INSTRUCTION, POS_PARAM};
use crate::link::SerialLink;
use crate::port::Port;
use crate::status::{CommResult, Status};
use crate::value::Endian;

/// Control-table addresses the driver itself needs.
pub mod reg {
    /// 16-bit model number, read by ping.
    pub const MODEL_NUMBER: u8 = 3;
}

/// Protocol driver for one servo family.
#[derive(Debug, Clone, Copy)]
pub struct PacketHandler {
    endian: Endian,
}

impl PacketHandler {
    /// Create a handler with the given multi-byte field policy.
    #[must_use]
    pub fn new(endian: Endian) -> Self {
        Self { endian }
    }

    /// The handler's byte-order policy.
    #[must_use]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    // ------------------------------------------------------------------
    // Raw packet layer
    // ------------------------------------------------------------------

    /// Transmit a prebuilt frame. Acquires the bus guard; on any failure the
    /// guard is released before returning.
    pub fn tx_packet<L: SerialLink>(&self, port: &mut Port<L>, txframe: &[u8]) -> CommResult {
        if port.is_using() {
            return CommResult::PortBusy;
        }
        port.set_using(true);

        if txframe.len() > frame::MAX_FRAME_LEN {
            port.set_using(false);
            return CommResult::TxError;
        }
        if port.clear().is_err() {
            port.set_using(false);
            return CommResult::TxFail;
        }

        log::trace!(
            "[bus] tx {} bytes to id {}",
            txframe.len(),
            txframe[POS_ID]
        );
        match port.write(txframe) {
            Ok(n) if n == txframe.len() => {
                port.stats_mut().frames_tx += 1;
                CommResult::Success
            }
            Ok(n) => {
                log::debug!("[bus] short write: {} of {} bytes", n, txframe.len());
                port.set_using(false);
                CommResult::TxFail
            }
            Err(err) => {
                log::debug!("[bus] write failed: {}", err);
                port.set_using(false);
                CommResult::TxFail
            }
        }
    }

    /// Receive one frame within the armed window.
    ///
    /// Resynchronises over leading noise. Expiry with an empty buffer is
    /// `rx-timeout`; expiry with partial bytes is `rx-corrupt`.
    pub fn rx_packet<L: SerialLink>(&self, port: &mut Port<L>) -> (Vec<u8>, CommResult) {
        let mut buf: Vec<u8> = Vec::with_capacity(frame::MIN_FRAME_LEN);
        loop {
            let needed = match frame::scan(&buf) {
                Scan::Frame(len) => {
                    buf.truncate(len);
                    port.stats_mut().frames_rx += 1;
                    log::trace!("[bus] rx frame from id {}", buf[POS_ID]);
                    return (buf, CommResult::Success);
                }
                Scan::BadChecksum(len) => {
                    port.stats_mut().rx_corrupt += 1;
                    log::debug!("[bus] checksum mismatch in {}-byte frame", len);
                    return (buf, CommResult::RxCorrupt);
                }
                Scan::Skip(n) => {
                    port.stats_mut().resync_bytes += n as u64;
                    log::warn!("[bus] resync: skipped {} noise bytes", n);
                    buf.drain(..n);
                    continue;
                }
                Scan::NeedMore(total) => total,
            };

            let mut chunk = [0u8; frame::MAX_FRAME_LEN];
            let want = (needed - buf.len()).min(chunk.len());
            match port.read(&mut chunk[..want]) {
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.len() < needed && port.packet_timeout_expired() {
                        return if buf.is_empty() {
                            port.stats_mut().rx_timeouts += 1;
                            log::debug!("[bus] rx window expired with no bytes");
                            (buf, CommResult::RxTimeout)
                        } else {
                            port.stats_mut().rx_corrupt += 1;
                            log::debug!(
                                "[bus] rx window expired with {} partial bytes",
                                buf.len()
                            );
                            (buf, CommResult::RxCorrupt)
                        };
                    }
                    if n == 0 {
                        std::thread::yield_now();
                    }
                }
                Err(err) => {
                    log::debug!("[bus] read failed: {}", err);
                    return (buf, CommResult::RxFail);
                }
            }
        }
    }

    /// Transmit, then receive the matching response.
    ///
    /// Broadcast requests and ACTION never elicit a response; the call
    /// returns right after a successful transmit. Frames from other ids are
    /// discarded and the wait continues.
    pub fn txrx_packet<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        txframe: &[u8],
    ) -> (Vec<u8>, Status) {
        let comm = self.tx_packet(port, txframe);
        if !comm.is_success() {
            return (Vec::new(), Status::comm(comm));
        }

        let id = txframe[POS_ID];
        if id == BROADCAST_ID || txframe[POS_INSTRUCTION] == instruction::ACTION {
            port.set_using(false);
            return (Vec::new(), Status::ok(0));
        }

        let expected = if txframe[POS_INSTRUCTION] == instruction::READ {
            usize::from(txframe[POS_PARAM + 1]) + 6
        } else {
            frame::MIN_FRAME_LEN
        };
        port.arm_packet_timeout(expected);

        let (rxframe, comm) = self.rx_matching(port, id);
        port.set_using(false);
        if !comm.is_success() {
            return (rxframe, Status::comm(comm));
        }
        let error = rxframe[POS_INSTRUCTION];
        (rxframe, Status::ok(error))
    }

    /// Receive frames until one carries the wanted id.
    fn rx_matching<L: SerialLink>(&self, port: &mut Port<L>, id: u8) -> (Vec<u8>, CommResult) {
        loop {
            let (rxframe, comm) = self.rx_packet(port);
            if !comm.is_success() || rxframe[POS_ID] == id {
                return (rxframe, comm);
            }
            port.stats_mut().id_mismatches += 1;
            log::debug!(
                "[bus] dropped frame from id {} while waiting for id {}",
                rxframe[POS_ID],
                id
            );
        }
    }

    /// Collect the payload of the next response from `id` within the already
    /// armed window. Used for each member of a sync-read round.
    pub fn receive_by_id<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        id: u8,
        data_len: usize,
    ) -> (Vec<u8>, Status) {
        let (rxframe, comm) = self.rx_matching(port, id);
        port.set_using(false);
        if !comm.is_success() {
            return (Vec::new(), Status::comm(comm));
        }
        let error = rxframe[POS_INSTRUCTION];
        let data = &rxframe[POS_PARAM..rxframe.len() - 1];
        if data.len() != data_len {
            port.stats_mut().rx_corrupt += 1;
            log::debug!(
                "[bus] id {} answered {} bytes, expected {}",
                id,
                data.len(),
                data_len
            );
            return (Vec::new(), Status::comm(CommResult::RxCorrupt));
        }
        (data.to_vec(), Status::ok(error))
    }

    // ------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------

    /// Ping a servo and fetch its 16-bit model number.
    ///
    /// Two transactions: the ping itself, then a read of the model-number
    /// register. The returned status is that of the model-number read.
    pub fn ping<L: SerialLink>(&self, port: &mut Port<L>, id: u8) -> (u16, Status) {
        if id > MAX_ID {
            return (0, Status::comm(CommResult::NotAvailable));
        }
        let txframe = match frame::build(id, instruction::PING, &[]) {
            Ok(f) => f,
            Err(_) => return (0, Status::comm(CommResult::TxError)),
        };
        let (_, status) = self.txrx_packet(port, &txframe);
        if !status.comm.is_success() {
            return (0, status);
        }

        let (data, status) = self.read(port, id, reg::MODEL_NUMBER, 2);
        if !status.comm.is_success() {
            return (0, status);
        }
        (self.endian.word_from_bytes([data[0], data[1]]), status)
    }

    /// Commit pending reg-writes. Fire-and-forget; broadcast id allowed.
    pub fn action<L: SerialLink>(&self, port: &mut Port<L>, id: u8) -> CommResult {
        match frame::build(id, instruction::ACTION, &[]) {
            Ok(f) => self.txrx_packet(port, &f).1.comm,
            Err(_) => CommResult::TxError,
        }
    }

    /// Read `len` bytes of the control table starting at `addr`.
    pub fn read<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        id: u8,
        addr: u8,
        len: u8,
    ) -> (Vec<u8>, Status) {
        if id > MAX_ID {
            return (Vec::new(), Status::comm(CommResult::NotAvailable));
        }
        let txframe = match frame::build(id, instruction::READ, &[addr, len]) {
            Ok(f) => f,
            Err(_) => return (Vec::new(), Status::comm(CommResult::TxError)),
        };
        let comm = self.tx_packet(port, &txframe);
        if !comm.is_success() {
            return (Vec::new(), Status::comm(comm));
        }
        port.arm_packet_timeout(usize::from(len) + frame::MIN_FRAME_LEN);
        self.receive_by_id(port, id, usize::from(len))
    }

    /// Write bytes at `addr`. Broadcast writes return after transmit.
    pub fn write<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        id: u8,
        addr: u8,
        data: &[u8],
    ) -> Status {
        self.write_instruction(port, id, instruction::WRITE, addr, data)
    }

    /// Stage bytes at `addr` for a later ACTION commit.
    pub fn reg_write<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        id: u8,
        addr: u8,
        data: &[u8],
    ) -> Status {
        self.write_instruction(port, id, instruction::REG_WRITE, addr, data)
    }

    fn write_instruction<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        id: u8,
        instr: u8,
        addr: u8,
        data: &[u8],
    ) -> Status {
        let mut params = Vec::with_capacity(data.len() + 1);
        params.push(addr);
        params.extend_from_slice(data);
        match frame::build(id, instr, &params) {
            Ok(f) => self.txrx_packet(port, &f).1,
            Err(_) => Status::comm(CommResult::TxError),
        }
    }

    /// Broadcast a sync-write parameter block (`[id, payload…]` repeated).
    pub fn sync_write_tx<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        start: u8,
        data_len: u8,
        block: &[u8],
    ) -> CommResult {
        let mut params = Vec::with_capacity(block.len() + 2);
        params.push(start);
        params.push(data_len);
        params.extend_from_slice(block);
        match frame::build(BROADCAST_ID, instruction::SYNC_WRITE, &params) {
            Ok(f) => self.txrx_packet(port, &f).1.comm,
            Err(_) => CommResult::TxError,
        }
    }

    /// Broadcast a sync-read request and arm one window for the whole round.
    ///
    /// The bus guard stays held on success; the per-id receive round
    /// ([`PacketHandler::receive_by_id`]) releases it.
    pub fn sync_read_tx<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        start: u8,
        data_len: u8,
        ids: &[u8],
    ) -> CommResult {
        let mut params = Vec::with_capacity(ids.len() + 2);
        params.push(start);
        params.push(data_len);
        params.extend_from_slice(ids);
        let txframe = match frame::build(BROADCAST_ID, instruction::SYNC_READ, &params) {
            Ok(f) => f,
            Err(_) => return CommResult::TxError,
        };
        let comm = self.tx_packet(port, &txframe);
        if comm.is_success() {
            port.arm_packet_timeout((frame::MIN_FRAME_LEN + usize::from(data_len)) * ids.len());
        }
        comm
    }

    // ------------------------------------------------------------------
    // Sized register access
    // ------------------------------------------------------------------

    /// Read a single byte.
    pub fn read_u8<L: SerialLink>(&self, port: &mut Port<L>, id: u8, addr: u8) -> (u8, Status) {
        let (data, status) = self.read(port, id, addr, 1);
        (data.first().copied().unwrap_or(0), status)
    }

    /// Read a 16-bit field under the handler's byte order.
    pub fn read_u16<L: SerialLink>(&self, port: &mut Port<L>, id: u8, addr: u8) -> (u16, Status) {
        let (data, status) = self.read(port, id, addr, 2);
        if data.len() == 2 {
            (self.endian.word_from_bytes([data[0], data[1]]), status)
        } else {
            (0, status)
        }
    }

    /// Read a 32-bit field under the handler's byte order.
    pub fn read_u32<L: SerialLink>(&self, port: &mut Port<L>, id: u8, addr: u8) -> (u32, Status) {
        let (data, status) = self.read(port, id, addr, 4);
        if data.len() == 4 {
            let bytes = [data[0], data[1], data[2], data[3]];
            (self.endian.dword_from_bytes(bytes), status)
        } else {
            (0, status)
        }
    }

    /// Write a single byte.
    pub fn write_u8<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        id: u8,
        addr: u8,
        value: u8,
    ) -> Status {
        self.write(port, id, addr, &[value])
    }

    /// Write a 16-bit field under the handler's byte order.
    pub fn write_u16<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        id: u8,
        addr: u8,
        value: u16,
    ) -> Status {
        self.write(port, id, addr, &self.endian.word_to_bytes(value))
    }

    /// Write a 32-bit field under the handler's byte order.
    pub fn write_u32<L: SerialLink>(
        &self,
        port: &mut Port<L>,
        id: u8,
        addr: u8,
        value: u32,
    ) -> Status {
        self.write(port, id, addr, &self.endian.dword_to_bytes(value))
    }
}
