// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! Transaction outcomes.
//!
//! Every bus operation reports along two orthogonal axes:
//!
//! - [`CommResult`] - did the host-side transaction work (tx ok, response
//!   framed and checksummed, within the timeout window)?
//! - [`ErrorFlags`] - what the servo itself reports in the fifth byte of its
//!   response frame.
//!
//! The two are independent: a servo that answers with a valid frame while
//! flagging an overload fault yields `CommResult::Success` together with a
//! non-empty [`ErrorFlags`]. The driver never folds one axis into the other
//! and never retries on its own; one call is one transmit.

/// Host-side outcome of a bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommResult {
    /// Transaction completed (a non-zero [`ErrorFlags`] may still be set).
    #[default]
    Success,
    /// The port is already inside a transaction.
    PortBusy,
    /// The link wrote fewer bytes than the request frame holds.
    TxFail,
    /// The request would exceed the 250-byte frame cap.
    TxError,
    /// The link failed while reading.
    RxFail,
    /// A response frame is still incomplete (non-blocking scan only).
    RxWaiting,
    /// No response bytes arrived inside the armed window.
    RxTimeout,
    /// Framing anomaly: bad checksum, impossible header field, or partial
    /// bytes left when the window expired.
    RxCorrupt,
    /// The operation is not meaningful (broadcast id on a unicast read,
    /// empty group transmit).
    NotAvailable,
}

impl CommResult {
    /// `true` for [`CommResult::Success`].
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for CommResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PortBusy => write!(f, "port busy"),
            Self::TxFail => write!(f, "transmit failed"),
            Self::TxError => write!(f, "request frame too large"),
            Self::RxFail => write!(f, "receive failed"),
            Self::RxWaiting => write!(f, "response incomplete"),
            Self::RxTimeout => write!(f, "response timeout"),
            Self::RxCorrupt => write!(f, "corrupt response frame"),
            Self::NotAvailable => write!(f, "operation not available"),
        }
    }
}

/// Servo fault bits carried in the fifth byte of a response frame.
pub mod fault {
    /// Input voltage outside the configured range.
    pub const VOLTAGE: u8 = 0x01;
    /// Goal position outside the angle limits.
    pub const ANGLE: u8 = 0x02;
    /// Internal temperature above the limit.
    pub const OVERHEAT: u8 = 0x04;
    /// Current above the limit.
    pub const OVERCURRENT: u8 = 0x08;
    /// Sustained load above the limit.
    pub const OVERLOAD: u8 = 0x20;
}

/// Servo-reported error bitfield.
///
/// Reserved bits propagate unchanged; [`ErrorFlags::bits`] always returns the
/// raw byte from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    /// Wrap a raw error byte.
    #[inline]
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw error byte, reserved bits included.
    #[inline]
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// No fault bits set.
    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Test one or more fault bits (see [`fault`]).
    #[inline]
    #[must_use]
    pub fn contains(self, bits: u8) -> bool {
        self.0 & bits != 0
    }
}

impl std::fmt::Display for ErrorFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut sep = "";
        for (bit, name) in [
            (fault::VOLTAGE, "voltage"),
            (fault::ANGLE, "angle"),
            (fault::OVERHEAT, "overheat"),
            (fault::OVERCURRENT, "overcurrent"),
            (fault::OVERLOAD, "overload"),
        ] {
            if self.contains(bit) {
                write!(f, "{}{}", sep, name)?;
                sep = "|";
            }
        }
        let reserved = self.0
            & !(fault::VOLTAGE | fault::ANGLE | fault::OVERHEAT | fault::OVERCURRENT | fault::OVERLOAD);
        if reserved != 0 {
            write!(f, "{}reserved(0x{:02X})", sep, reserved)?;
        }
        Ok(())
    }
}

/// Combined outcome of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    /// Host-side communication result.
    pub comm: CommResult,
    /// Servo-reported error byte (zero unless a response was parsed).
    pub error: ErrorFlags,
}

impl Status {
    /// A successful transaction carrying the given servo error byte.
    #[inline]
    #[must_use]
    pub fn ok(error: u8) -> Self {
        Self {
            comm: CommResult::Success,
            error: ErrorFlags::from_bits(error),
        }
    }

    /// A failed transaction; no servo error byte is available.
    #[inline]
    #[must_use]
    pub fn comm(comm: CommResult) -> Self {
        Self {
            comm,
            error: ErrorFlags::default(),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (servo: {})", self.comm, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_with_fault_bits() {
        // Communication success and servo faults are independent axes.
        let status = Status::ok(fault::OVERHEAT | fault::OVERLOAD);
        assert!(status.comm.is_success());
        assert!(!status.error.is_empty());
        assert!(status.error.contains(fault::OVERHEAT));
        assert!(status.error.contains(fault::OVERLOAD));
        assert!(!status.error.contains(fault::VOLTAGE));
    }

    #[test]
    fn test_reserved_bits_propagate() {
        let flags = ErrorFlags::from_bits(0x50);
        assert_eq!(flags.bits(), 0x50);
        assert!(flags.contains(fault::OVERLOAD));
        assert_eq!(format!("{}", flags), "overload|reserved(0x40)");
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", CommResult::RxTimeout), "response timeout");
        assert_eq!(format!("{}", ErrorFlags::default()), "none");
        assert_eq!(
            format!("{}", ErrorFlags::from_bits(fault::VOLTAGE | fault::ANGLE)),
            "voltage|angle"
        );
    }

    #[test]
    fn test_comm_constructor() {
        let status = Status::comm(CommResult::RxCorrupt);
        assert_eq!(status.comm, CommResult::RxCorrupt);
        assert!(status.error.is_empty());
    }
}
