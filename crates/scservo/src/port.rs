// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! Port state: line timing, the packet timer, and the bus guard.
//!
//! A [`Port`] owns one [`SerialLink`] plus everything a transaction needs
//! around it:
//!
//! - the per-byte transmit time derived from the baud rate (10 line bits per
//!   byte: start, 8 data, stop),
//! - a worst-case USB bridge latency allowance,
//! - a single-shot deadline armed per transaction,
//! - the busy flag serialising transactions on the half-duplex bus,
//! - byte/frame/fault counters.
//!
//! Timing uses the monotonic clock; wall-clock jumps do not move deadlines.

use std::io;
use std::time::{Duration, Instant};

use crate::link::{LinkError, SerialLink};

/// Factory rate of STS/SMS servos and the usual bus rate.
pub const DEFAULT_BAUD: u32 = 1_000_000;

/// Worst-case USB-to-TTL bridge turnaround, in milliseconds.
pub const USB_LATENCY_MS: f64 = 16.0;

/// Running bus counters.
#[derive(Debug, Default, Clone)]
pub struct PortStats {
    /// Bytes handed to the link.
    pub bytes_tx: u64,
    /// Bytes received from the link.
    pub bytes_rx: u64,
    /// Request frames transmitted.
    pub frames_tx: u64,
    /// Checksum-valid frames received.
    pub frames_rx: u64,
    /// Receive windows that expired with no bytes.
    pub rx_timeouts: u64,
    /// Frames rejected for checksum or framing faults.
    pub rx_corrupt: u64,
    /// Noise bytes discarded while hunting for a header.
    pub resync_bytes: u64,
    /// Valid frames discarded because their id did not match the request.
    pub id_mismatches: u64,
}

/// One serial endpoint and its transaction state.
pub struct Port<L> {
    link: L,
    baud: u32,
    tx_time_per_byte_ms: f64,
    latency_ms: f64,
    deadline: Option<Instant>,
    armed_ms: f64,
    in_use: bool,
    stats: PortStats,
}

impl<L: SerialLink> Port<L> {
    /// Wrap a link and configure its line rate.
    pub fn new(mut link: L, baud: u32) -> Result<Self, LinkError> {
        link.set_baud(baud)?;
        Ok(Self {
            link,
            baud,
            tx_time_per_byte_ms: 10_000.0 / f64::from(baud),
            latency_ms: USB_LATENCY_MS,
            deadline: None,
            armed_ms: 0.0,
            in_use: false,
            stats: PortStats::default(),
        })
    }

    /// Reconfigure the line rate and the derived per-byte transmit time.
    pub fn set_baud(&mut self, baud: u32) -> Result<(), LinkError> {
        if baud == 0 {
            return Err(LinkError::InvalidBaud(baud));
        }
        self.link.set_baud(baud)?;
        self.baud = baud;
        self.tx_time_per_byte_ms = 10_000.0 / f64::from(baud);
        log::debug!(
            "[port] baud {} ({:.4} ms/byte)",
            baud,
            self.tx_time_per_byte_ms
        );
        Ok(())
    }

    /// Current line rate.
    #[must_use]
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Milliseconds to move one byte across the line.
    #[must_use]
    pub fn tx_time_per_byte_ms(&self) -> f64 {
        self.tx_time_per_byte_ms
    }

    /// Receive window for an expected response size:
    /// `tx_time_per_byte * bytes + 2 * latency + 2` milliseconds.
    #[must_use]
    pub fn packet_timeout_ms(&self, expected_bytes: usize) -> f64 {
        self.tx_time_per_byte_ms * expected_bytes as f64 + 2.0 * self.latency_ms + 2.0
    }

    /// Arm the packet timer for an expected response size.
    pub fn arm_packet_timeout(&mut self, expected_bytes: usize) {
        self.arm_packet_timeout_ms(self.packet_timeout_ms(expected_bytes));
    }

    /// Arm the packet timer for an explicit window.
    pub fn arm_packet_timeout_ms(&mut self, ms: f64) {
        self.armed_ms = ms;
        self.deadline = Some(Instant::now() + Duration::from_secs_f64(ms / 1000.0));
    }

    /// Whether the armed window has elapsed.
    #[must_use]
    pub fn packet_timeout_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The window armed by the last `arm_packet_timeout*` call, in ms.
    #[must_use]
    pub fn armed_timeout_ms(&self) -> f64 {
        self.armed_ms
    }

    /// Whether a transaction currently holds the bus.
    #[must_use]
    pub fn is_using(&self) -> bool {
        self.in_use
    }

    /// Acquire or release the bus guard.
    pub fn set_using(&mut self, using: bool) {
        self.in_use = using;
    }

    /// Drain pending input and output on the link.
    pub fn clear(&mut self) -> io::Result<()> {
        self.link.clear()
    }

    /// Read available bytes into `buf`; counts received bytes.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.link.read(buf)?;
        self.stats.bytes_rx += n as u64;
        Ok(n)
    }

    /// Write `buf`; counts transmitted bytes. May report a short count.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.link.write(buf)?;
        self.stats.bytes_tx += n as u64;
        Ok(n)
    }

    /// Close the underlying link and release the bus guard.
    pub fn close(&mut self) {
        self.link.close();
        self.in_use = false;
    }

    /// Bus counters since construction or the last reset.
    #[must_use]
    pub fn stats(&self) -> &PortStats {
        &self.stats
    }

    /// Zero the bus counters.
    pub fn reset_stats(&mut self) {
        self.stats = PortStats::default();
    }

    pub(crate) fn stats_mut(&mut self) -> &mut PortStats {
        &mut self.stats
    }

    /// Direct access to the link (test scripting, link-specific controls).
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

#[cfg(unix)]
impl Port<crate::link::TtyLink> {
    /// Open a serial device and wrap it.
    pub fn open(path: &str, baud: u32) -> Result<Self, LinkError> {
        let link = crate::link::TtyLink::open(path, baud)?;
        Self::new(link, baud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LoopbackLink;

    fn port(baud: u32) -> Port<LoopbackLink> {
        Port::new(LoopbackLink::new(), baud).expect("port")
    }

    #[test]
    fn test_tx_time_follows_baud() {
        let mut p = port(1_000_000);
        assert!((p.tx_time_per_byte_ms() - 0.01).abs() < 1e-9);

        p.set_baud(115200).expect("baud");
        assert!((p.tx_time_per_byte_ms() - 10_000.0 / 115_200.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_zero_baud() {
        let mut p = port(1_000_000);
        assert!(matches!(p.set_baud(0), Err(LinkError::InvalidBaud(0))));
        // The old rate stays in force.
        assert_eq!(p.baud(), 1_000_000);
    }

    #[test]
    fn test_packet_timeout_formula() {
        // 1 Mbps, 10 expected bytes: 0.01 * 10 + 32 + 2 = 34.1 ms.
        let p = port(1_000_000);
        assert!((p.packet_timeout_ms(10) - 34.1).abs() < 1e-9);
    }

    #[test]
    fn test_timer_is_single_shot_and_expires() {
        let mut p = port(1_000_000);
        p.arm_packet_timeout_ms(5.0);
        assert!(!p.packet_timeout_expired());
        std::thread::sleep(Duration::from_millis(7));
        assert!(p.packet_timeout_expired());

        // Re-arming starts a fresh window.
        p.arm_packet_timeout_ms(50.0);
        assert!(!p.packet_timeout_expired());
    }

    #[test]
    fn test_busy_flag() {
        let mut p = port(1_000_000);
        assert!(!p.is_using());
        p.set_using(true);
        assert!(p.is_using());
        p.set_using(false);
        assert!(!p.is_using());
    }

    #[test]
    fn test_byte_counters() {
        let mut p = port(1_000_000);
        p.link_mut().push_rx(&[1, 2, 3]);

        p.write(&[9, 9]).expect("write");
        let mut buf = [0u8; 8];
        p.read(&mut buf).expect("read");

        assert_eq!(p.stats().bytes_tx, 2);
        assert_eq!(p.stats().bytes_rx, 3);

        p.reset_stats();
        assert_eq!(p.stats().bytes_tx, 0);
    }
}
