//! Error taxonomy of the façade and the adapter-code mapper.

use thiserror::Error;

use crate::adapter::Handle;

pub type Result<T> = core::result::Result<T, Error>;

/// Everything a façade operation can fail with.
///
/// Input-validation kinds are produced before any adapter call; [`Error::Io`]
/// wraps a negative adapter code together with its mapped message. End of
/// stream is not an error and is signalled out-of-band by the read results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	#[error("a required argument was absent")]
	NullArg,
	#[error("argument outside the legal domain: {0}")]
	InvalidArg(String),
	#[error("not supported on this platform: {0}")]
	PlatformConstraint(&'static str),
	#[error("handle {0} is not registered")]
	UnknownHandle(Handle),
	#[error("listener is not registered")]
	UnknownListener,
	#[error("handle already has a data listener")]
	AlreadyHasDataListener,
	#[error("handle already has an event listener")]
	AlreadyHasEventListener,
	#[error("data listener must be unregistered before closing")]
	MustUnregisterData,
	#[error("event listener must be unregistered before closing")]
	MustUnregisterEvent,
	#[error("device error {code}: {message}")]
	Io { code: i32, message: &'static str },
	#[error("operation timed out")]
	Timeout,
}

impl Error {
	/// Wraps a negative adapter status code.
	pub(crate) fn from_code(code: i64) -> Error {
		let code = code as i32;
		Error::Io {
			code,
			message: describe_error(code),
		}
	}

	pub(crate) fn invalid_arg(what: impl Into<String>) -> Error {
		Error::InvalidArg(what.into())
	}
}

/// Maps a negative adapter status code to a human-readable message.
///
/// Adapter codes are negated errno values on the POSIX platforms and
/// negated Win32 error codes fitted into the same space on Windows; the
/// table below covers the codes serial devices actually produce.
pub fn describe_error(code: i32) -> &'static str {
	match -code {
		1 => "operation not permitted",
		2 => "no such file or directory",
		4 => "interrupted system call",
		5 => "input/output error",
		6 => "no such device or address",
		9 => "bad file number",
		11 => "try again",
		12 => "out of memory",
		13 => "permission denied",
		14 => "bad address",
		16 => "device or resource busy",
		17 => "file exists",
		19 => "no such device",
		22 => "invalid argument",
		23 => "file table overflow",
		24 => "too many open files",
		25 => "not a typewriter",
		28 => "no space left on device",
		32 => "broken pipe",
		36 => "file name too long",
		38 => "function not implemented",
		61 => "no data available",
		62 => "timer expired",
		71 => "protocol error",
		75 => "value too large for defined data type",
		90 => "message too long",
		95 => "operation not supported on transport endpoint",
		105 => "no buffer space available",
		110 => "connection timed out",
		125 => "operation canceled",
		_ => "unrecognized device error",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn known_codes_map_to_text() {
		assert_eq!(describe_error(-5), "input/output error");
		assert_eq!(describe_error(-9), "bad file number");
		assert_eq!(describe_error(-16), "device or resource busy");
		assert_eq!(describe_error(-9999), "unrecognized device error");
	}

	#[test]
	fn io_errors_carry_code_and_message() {
		let err = Error::from_code(-22);
		assert_eq!(
			err,
			Error::Io {
				code: -22,
				message: "invalid argument"
			}
		);
		assert_eq!(format!("{err}"), "device error -22: invalid argument");
	}
}
