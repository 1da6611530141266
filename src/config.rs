//! Framing, flow-control and platform constants.
//!
//! Every enum in this module carries the numeric value that crosses the
//! adapter boundary, so the discriminants are part of the wire contract and
//! must not be renumbered.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Default number of bytes a read requests when the caller does not say.
pub const DEFAULT_READ_SIZE: usize = 1024;

/// Baud rates understood by the configurator.
///
/// The discriminant is the baud rate itself, with one exception:
/// [`BaudRate::Custom`] is the sentinel `251`, which tells the adapter to
/// apply the separately supplied custom rate instead.
#[allow(clippy::unreadable_literal)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum BaudRate {
	B0 = 0,
	B50 = 50,
	B75 = 75,
	B110 = 110,
	B134 = 134,
	B150 = 150,
	B200 = 200,
	B300 = 300,
	B600 = 600,
	B1200 = 1200,
	B1800 = 1800,
	B2400 = 2400,
	B4800 = 4800,
	B9600 = 9600,
	B14400 = 14400,
	B19200 = 19200,
	B28800 = 28800,
	B38400 = 38400,
	B56000 = 56000,
	B57600 = 57600,
	B115200 = 115200,
	B128000 = 128000,
	B153600 = 153600,
	B230400 = 230400,
	B256000 = 256000,
	B460800 = 460800,
	B500000 = 500000,
	B576000 = 576000,
	B921600 = 921600,
	B1000000 = 1000000,
	B1152000 = 1152000,
	B1500000 = 1500000,
	B2000000 = 2000000,
	B2500000 = 2500000,
	B3000000 = 3000000,
	B3500000 = 3500000,
	B4000000 = 4000000,
	/// Use the custom rate passed alongside this sentinel.
	Custom = 251,
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DataBits {
	Five = 5,
	Six = 6,
	Seven = 7,
	Eight = 8,
}

/// Number of stop bits per character.
///
/// The adapter encoding is historical: one-and-a-half stop bits travel as
/// `4`, not `3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StopBits {
	One = 1,
	Two = 2,
	OneAndHalf = 4,
}

/// Parity applied to each character frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Parity {
	None = 1,
	Odd = 2,
	Even = 3,
	Mark = 4,
	Space = 5,
}

/// Flow-control discipline for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FlowControl {
	None = 1,
	/// RTS/CTS handshaking.
	Hardware = 2,
	/// XON/XOFF in-band handshaking.
	Software = 3,
}

/// Byte order used by the typed write helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Endianness {
	Little = 1,
	Big = 2,
	/// Resolves to big endian.
	Default = 3,
}

/// Width in bytes of an integer written by the typed helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum IntWidth {
	Two = 2,
	Four = 4,
}

/// File-transfer protocols the façade can delegate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TransferProtocol {
	Xmodem = 1,
}

/// Hotplug notification codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PortMonitorEvent {
	Added = 1,
	Removed = 2,
}

bitflags::bitflags! {
	/// Modem-line and receive-error bits carried by line events.
	///
	/// The low seven bits are the public modem-line constants; the error
	/// bits live above them so a mask can combine both groups.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct LineEvents: u32 {
		const CTS = 0x01;
		const DSR = 0x02;
		const DCD = 0x04;
		const RI = 0x08;
		const LOOP = 0x10;
		const RTS = 0x20;
		const DTR = 0x40;
		const FRAME_ERROR = 0x100;
		const OVERRUN_ERROR = 0x200;
		const PARITY_ERROR = 0x400;
		const BREAK = 0x800;
	}
}

/// Operating systems the library distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum OsType {
	Unknown = 0,
	Linux = 1,
	Windows = 2,
	Solaris = 3,
	MacOsX = 4,
}

impl OsType {
	/// Classifies an OS name the way the legacy callers expect: by
	/// case-insensitive substring match.
	pub fn from_os_name(name: &str) -> OsType {
		let name = name.to_ascii_lowercase();
		if name.contains("linux") {
			OsType::Linux
		} else if name.contains("windows") {
			OsType::Windows
		} else if name.contains("solaris") || name.contains("sunos") {
			OsType::Solaris
		} else if name.contains("mac os") || name.contains("macos") || name.contains("darwin") {
			OsType::MacOsX
		} else {
			OsType::Unknown
		}
	}

	pub(crate) fn detect_host() -> OsType {
		OsType::from_os_name(std::env::consts::OS)
	}
}

lazy_static::lazy_static! {
	static ref HOST_OS: OsType = OsType::detect_host();
}

/// The operating system this process runs on, captured once.
pub fn os_type() -> OsType {
	*HOST_OS
}
