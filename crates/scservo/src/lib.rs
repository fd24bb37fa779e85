// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! # scservo - Feetech SCServo bus driver
//!
//! Host-side driver for Feetech STS / SMS / SCS serial bus servos: ping,
//! byte-addressed control-table reads and writes, deferred reg-write/action
//! commits, and grouped sync-read / sync-write across many servos on one
//! half-duplex line.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scservo::{Endian, PacketHandler, Port};
//!
//! # fn main() -> Result<(), scservo::LinkError> {
//! // STS/SMS servos are little-endian; the factory rate is 1 Mbps.
//! let mut port = Port::open("/dev/ttyUSB0", 1_000_000)?;
//! let handler = PacketHandler::new(Endian::Little);
//!
//! let (model, status) = handler.ping(&mut port, 1);
//! println!("id 1: model {} ({})", model, status);
//!
//! // Goal position lives at address 42 on STS3215.
//! let status = handler.write_u16(&mut port, 1, 42, 2048);
//! assert!(status.comm.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |  GroupSyncWrite / GroupSyncRead   (multi-servo batching)      |
//! +---------------------------------------------------------------+
//! |  PacketHandler   (transactions, sized register access,        |
//! |                   endianness policy)                          |
//! +---------------------------------------------------------------+
//! |  frame           (build / scan, checksum, resync)             |
//! +---------------------------------------------------------------+
//! |  Port            (timer, busy flag, line timing, counters)    |
//! +---------------------------------------------------------------+
//! |  SerialLink      (TtyLink, LoopbackLink, your own)            |
//! +---------------------------------------------------------------+
//! ```
//!
//! Egress flows down the stack, ingress back up. Transactions are blocking
//! and strictly serialised per port; the bus is half duplex and the driver
//! never overlaps requests.
//!
//! ## Outcomes
//!
//! Every operation reports a [`CommResult`] (host-side transaction outcome)
//! and, where a response exists, the servo's own [`ErrorFlags`]. The axes
//! are independent: a reachable servo reporting an overload fault is
//! `Success` plus a non-empty error bitfield.

/// Frame layout, checksum, and receive-side scanning.
pub mod frame;
/// Grouped multi-servo transactions.
pub mod group;
/// Byte-stream capability and its implementations.
pub mod link;
/// Request/response transactions and sized register access.
pub mod packet;
/// Port state: timing, timer, busy flag, counters.
pub mod port;
/// Communication results and servo error flags.
pub mod status;
/// Endianness policy and sign-magnitude helpers.
pub mod value;

// Re-exports
pub use frame::{instruction, BROADCAST_ID, MAX_ID};
pub use group::{GroupError, GroupSyncRead, GroupSyncWrite};
#[cfg(unix)]
pub use link::TtyLink;
pub use link::{LinkError, LoopbackLink, SerialLink};
pub use packet::{reg, PacketHandler};
pub use port::{Port, PortStats, DEFAULT_BAUD, USB_LATENCY_MS};
pub use status::{fault, CommResult, ErrorFlags, Status};
pub use value::{to_host, to_servo, Endian};
