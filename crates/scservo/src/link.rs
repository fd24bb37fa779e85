// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! Byte-stream capability underneath the protocol driver.
//!
//! The driver talks to the bus through [`SerialLink`], a narrow non-blocking
//! byte interface. Anything that moves bytes half-duplex can implement it:
//!
//! - [`TtyLink`] - POSIX termios serial port (the reference implementation)
//! - [`LoopbackLink`] - in-memory double with scripted responses, for tests
//!
//! # Read/Write Contract
//!
//! - `read` never blocks: it returns however many bytes are currently
//!   available, possibly zero. Pacing and timeouts live above this layer.
//! - `write` attempts the whole buffer, retrying an EAGAIN-equivalent a
//!   bounded number of times, and reports how many bytes actually left.
//!   A short count is a transmit failure as far as the driver is concerned.

use std::collections::VecDeque;
use std::io;

/// Bounded retries for transient write failures.
#[cfg(unix)]
const WRITE_RETRY_MAX: u32 = 10;
/// Pause between write retries.
#[cfg(unix)]
const WRITE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(1);

/// Failure at the byte I/O boundary.
///
/// These stay typed and never enter the transaction-result space: a port that
/// cannot be opened or configured is a setup failure, not a bus outcome.
#[derive(Debug)]
pub enum LinkError {
    /// The endpoint could not be acquired.
    OpenFailed {
        /// Endpoint name as given.
        path: String,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The rate is zero or unsupported on this platform.
    InvalidBaud(u32),
    /// The line rate could not be applied.
    SetBaudFailed(io::Error),
    /// The link was closed and cannot be reconfigured.
    Closed,
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenFailed { path, source } => write!(f, "cannot open {}: {}", path, source),
            Self::InvalidBaud(baud) => write!(f, "unsupported baud rate {}", baud),
            Self::SetBaudFailed(source) => write!(f, "cannot set baud rate: {}", source),
            Self::Closed => write!(f, "link is closed"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::OpenFailed { source, .. } | Self::SetBaudFailed(source) => Some(source),
            Self::InvalidBaud(_) | Self::Closed => None,
        }
    }
}

/// Half-duplex byte-stream capability.
pub trait SerialLink {
    /// Read whatever is currently available, up to `buf.len()` bytes.
    /// Returns `Ok(0)` when nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the buffer, retrying transient failures a bounded number of
    /// times. Returns the number of bytes actually written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Drain pending input and output.
    fn clear(&mut self) -> io::Result<()>;

    /// Configure the line rate.
    fn set_baud(&mut self, baud: u32) -> Result<(), LinkError>;

    /// Release the endpoint. Idempotent.
    fn close(&mut self);
}

// ============================================================================
// TtyLink - POSIX termios serial port
// ============================================================================

/// POSIX serial port in raw mode.
///
/// 8N1, no flow control, `VMIN = 0` / `VTIME = 0`, opened non-blocking.
/// Standard rates go through termios speed constants; non-standard rates such
/// as 1 Mbps use the platform custom-baud path (`BOTHER`/termios2 on Linux,
/// `IOSSIOSPEED` on macOS).
#[cfg(unix)]
pub struct TtyLink {
    fd: libc::c_int,
    path: String,
}

#[cfg(unix)]
impl TtyLink {
    /// Open and configure the named device.
    pub fn open(path: &str, baud: u32) -> Result<Self, LinkError> {
        let cpath = std::ffi::CString::new(path).map_err(|_| LinkError::OpenFailed {
            path: path.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "NUL in path"),
        })?;

        let fd = unsafe {
            libc::open(
                cpath.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK,
            )
        };
        if fd < 0 {
            return Err(LinkError::OpenFailed {
                path: path.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        let mut link = Self {
            fd,
            path: path.to_string(),
        };
        link.configure_raw().map_err(|e| {
            link.close();
            LinkError::OpenFailed {
                path: path.to_string(),
                source: e,
            }
        })?;
        link.set_baud(baud).map_err(|e| {
            link.close();
            e
        })?;
        let _ = link.clear();

        log::debug!("[link] opened {} at {} baud", path, baud);
        Ok(link)
    }

    /// Device path this link was opened with.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn configure_raw(&mut self) -> io::Result<()> {
        let mut tio = unsafe { std::mem::zeroed::<libc::termios>() };
        if unsafe { libc::tcgetattr(self.fd, &mut tio) } < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe { libc::cfmakeraw(&mut tio) };
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::CRTSCTS);
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;

        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &tio) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn apply_standard_speed(&mut self, code: libc::speed_t) -> Result<(), LinkError> {
        let mut tio = unsafe { std::mem::zeroed::<libc::termios>() };
        if unsafe { libc::tcgetattr(self.fd, &mut tio) } < 0 {
            return Err(LinkError::SetBaudFailed(io::Error::last_os_error()));
        }
        unsafe {
            libc::cfsetispeed(&mut tio, code);
            libc::cfsetospeed(&mut tio, code);
        }
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &tio) } < 0 {
            return Err(LinkError::SetBaudFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Linux custom-rate path: termios2 with `BOTHER`.
    #[cfg(target_os = "linux")]
    fn apply_custom_speed(&mut self, baud: u32) -> Result<(), LinkError> {
        let mut tio2 = unsafe { std::mem::zeroed::<libc::termios2>() };
        if unsafe { libc::ioctl(self.fd, libc::TCGETS2 as _, &mut tio2) } < 0 {
            return Err(LinkError::SetBaudFailed(io::Error::last_os_error()));
        }
        tio2.c_cflag &= !libc::CBAUD;
        tio2.c_cflag |= libc::BOTHER;
        tio2.c_ispeed = baud;
        tio2.c_ospeed = baud;
        if unsafe { libc::ioctl(self.fd, libc::TCSETS2 as _, &tio2) } < 0 {
            return Err(LinkError::SetBaudFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// macOS custom-rate path: `IOSSIOSPEED` ioctl.
    #[cfg(target_os = "macos")]
    fn apply_custom_speed(&mut self, baud: u32) -> Result<(), LinkError> {
        // _IOW('T', 2, speed_t)
        const IOSSIOSPEED: libc::c_ulong = 0x8004_5402;
        let speed = baud as libc::speed_t;
        if unsafe { libc::ioctl(self.fd, IOSSIOSPEED as _, &speed) } < 0 {
            return Err(LinkError::SetBaudFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn apply_custom_speed(&mut self, baud: u32) -> Result<(), LinkError> {
        Err(LinkError::InvalidBaud(baud))
    }
}

#[cfg(unix)]
fn standard_speed(baud: u32) -> Option<libc::speed_t> {
    match baud {
        4800 => Some(libc::B4800),
        9600 => Some(libc::B9600),
        19200 => Some(libc::B19200),
        38400 => Some(libc::B38400),
        57600 => Some(libc::B57600),
        115200 => Some(libc::B115200),
        230400 => Some(libc::B230400),
        #[cfg(target_os = "linux")]
        460800 => Some(libc::B460800),
        #[cfg(target_os = "linux")]
        500000 => Some(libc::B500000),
        #[cfg(target_os = "linux")]
        921600 => Some(libc::B921600),
        #[cfg(target_os = "linux")]
        1000000 => Some(libc::B1000000),
        _ => None,
    }
}

#[cfg(unix)]
impl SerialLink for TtyLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fd < 0 {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link closed"));
        }
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fd < 0 {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link closed"));
        }
        let mut written = 0;
        let mut retries = 0;
        while written < buf.len() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    buf[written..].as_ptr().cast(),
                    buf.len() - written,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock && retries < WRITE_RETRY_MAX {
                    retries += 1;
                    std::thread::sleep(WRITE_RETRY_DELAY);
                    continue;
                }
                if written == 0 {
                    return Err(err);
                }
                break;
            }
            written += n as usize;
        }
        Ok(written)
    }

    fn clear(&mut self) -> io::Result<()> {
        if self.fd < 0 {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link closed"));
        }
        if unsafe { libc::tcflush(self.fd, libc::TCIOFLUSH) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> Result<(), LinkError> {
        if self.fd < 0 {
            return Err(LinkError::Closed);
        }
        if baud == 0 {
            return Err(LinkError::InvalidBaud(baud));
        }
        match standard_speed(baud) {
            Some(code) => self.apply_standard_speed(code),
            None => self.apply_custom_speed(baud),
        }
    }

    fn close(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
            log::debug!("[link] closed {}", self.path);
        }
    }
}

#[cfg(unix)]
impl Drop for TtyLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// LoopbackLink - scripted in-memory link for tests
// ============================================================================

/// In-memory link double.
///
/// Written bytes accumulate in a transmit log; reads drain a queue of
/// scripted bytes pushed with [`LoopbackLink::push_rx`]. `clear` is a no-op:
/// scripted bytes model the upcoming response, not stale input.
#[derive(Debug, Default)]
pub struct LoopbackLink {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    write_limit: Option<usize>,
    baud: u32,
}

impl LoopbackLink {
    /// Create an empty loopback link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for subsequent reads.
    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Take and reset the transmit log.
    pub fn take_tx(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }

    /// Bytes still queued for reading.
    #[must_use]
    pub fn rx_remaining(&self) -> usize {
        self.rx.len()
    }

    /// Cap each write at `limit` bytes to exercise short-write handling.
    pub fn set_write_limit(&mut self, limit: Option<usize>) {
        self.write_limit = limit;
    }
}

impl SerialLink for LoopbackLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.rx.len());
        for slot in &mut buf[..n] {
            *slot = self.rx.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_limit.map_or(buf.len(), |limit| buf.len().min(limit));
        self.tx.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn clear(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> Result<(), LinkError> {
        if baud == 0 {
            return Err(LinkError::InvalidBaud(baud));
        }
        self.baud = baud;
        Ok(())
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_scripted_read() {
        let mut link = LoopbackLink::new();
        link.push_rx(&[1, 2, 3, 4]);

        let mut buf = [0u8; 3];
        assert_eq!(link.read(&mut buf).expect("read"), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(link.rx_remaining(), 1);

        let mut rest = [0u8; 8];
        assert_eq!(link.read(&mut rest).expect("read"), 1);
        assert_eq!(rest[0], 4);
        assert_eq!(link.read(&mut rest).expect("read"), 0);
    }

    #[test]
    fn test_loopback_tx_log() {
        let mut link = LoopbackLink::new();
        assert_eq!(link.write(&[0xFF, 0xFF, 0x01]).expect("write"), 3);
        assert_eq!(link.write(&[0x02]).expect("write"), 1);
        assert_eq!(link.take_tx(), vec![0xFF, 0xFF, 0x01, 0x02]);
        assert!(link.take_tx().is_empty());
    }

    #[test]
    fn test_loopback_short_write() {
        let mut link = LoopbackLink::new();
        link.set_write_limit(Some(2));
        assert_eq!(link.write(&[1, 2, 3, 4]).expect("write"), 2);
        assert_eq!(link.take_tx(), vec![1, 2]);
    }

    #[test]
    fn test_loopback_rejects_zero_baud() {
        let mut link = LoopbackLink::new();
        assert!(matches!(link.set_baud(0), Err(LinkError::InvalidBaud(0))));
        assert!(link.set_baud(1_000_000).is_ok());
    }

    #[test]
    fn test_link_error_display() {
        assert_eq!(
            format!("{}", LinkError::InvalidBaud(12345)),
            "unsupported baud rate 12345"
        );
        assert_eq!(format!("{}", LinkError::Closed), "link is closed");
    }
}
