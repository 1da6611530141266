//! The native serial adapter contract.
//!
//! All platform divergence lives below this trait. Operations return either
//! a non-negative resource/status value or a negative error code that the
//! façade runs through [`crate::error::describe_error`]; nothing at this
//! boundary is an `Err` unless it cannot be expressed as a code.

use core::fmt;

use crossbeam_channel::Sender;

use crate::config::PortMonitorEvent;

/// Names one opened OS serial resource.
///
/// Handles are allocated by the adapter on open and stay valid until close.
/// Negative values encode errors and are never stored.
pub type Handle = i64;

/// Outcome of a single adapter read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
	/// Bytes arrived.
	Data(Vec<u8>),
	/// Nothing buffered right now.
	NoData,
	/// The endpoint closed or the device went away.
	Eof,
	/// A negative adapter code.
	Err(i32),
}

/// What an adapter pushes at a looper once delivery has begun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
	/// Received bytes, delivered to the data listener verbatim.
	Data(Vec<u8>),
	/// Raw line-event bits, filtered against the event mask upstream.
	Event(u32),
	/// A device-side failure the data listener should hear about.
	Error(i32),
	/// Wakes a terminating looper. Dispatcher-internal; adapters must not
	/// send it.
	Shutdown,
}

/// Messages flowing from an adapter port watch to the hotplug monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortWatchMessage {
	Event(PortMonitorEvent),
	/// Wakes a terminating watch worker. Monitor-internal.
	Shutdown,
}

/// Platform-specific serial operations, as consumed by the façade.
///
/// Implementations must tolerate a concurrent read (from a looper or
/// delivery thread) and write (from a caller thread) on the same handle;
/// every target platform supports that for serial devices.
pub trait SerialAdapter: Send + Sync + fmt::Debug {
	/// Enumerates the serial ports present right now.
	fn list_ports(&self) -> Vec<String>;

	/// Opens `name`, returning a handle, or a negative code on failure.
	fn open(&self, name: &str, read: bool, write: bool, exclusive: bool) -> Handle;

	/// Closes `handle`. Returns 0 on success.
	fn close(&self, handle: Handle) -> i32;

	/// Reads up to `count` bytes.
	fn read(&self, handle: Handle, count: usize) -> ReadOutcome;

	/// Writes `buf`, blocking until the bytes are handed to the OS transmit
	/// queue. A non-zero `delay_ms` is applied between consecutive bytes.
	/// Returns the number of bytes written, or a negative code.
	fn write(&self, handle: Handle, buf: &[u8], delay_ms: u32) -> i64;

	/// Applies frame settings. `baud` is the numeric wire value; the
	/// sentinel 251 selects `custom_baud`.
	fn configure_data(
		&self,
		handle: Handle,
		data_bits: u8,
		stop_bits: u8,
		parity: u8,
		baud: u32,
		custom_baud: u32,
	) -> i32;

	/// Applies flow control and error-check behavior.
	fn configure_control(
		&self,
		handle: Handle,
		flow: u8,
		xon: u8,
		xoff: u8,
		parity_error_check: bool,
		overflow_error_check: bool,
	) -> i32;

	/// Dumps the current driver configuration as ordered text fields.
	fn current_configuration(&self, handle: Handle) -> Result<Vec<String>, i32>;

	fn set_rts(&self, handle: Handle, asserted: bool) -> i32;

	fn set_dtr(&self, handle: Handle, asserted: bool) -> i32;

	/// Samples (CTS, DSR, DCD, RI, LOOP, RTS, DTR); a platform that cannot
	/// report a signal leaves 0 in its slot.
	fn line_status(&self, handle: Handle) -> Result<[i32; 7], i32>;

	/// Interrupt counters in the fixed order (CTS, DSR, RING, DCD, RX-buf,
	/// TX-buf, frame-err, overrun, parity, break, buffer-overrun).
	fn interrupt_counts(&self, handle: Handle) -> Result<[i32; 11], i32>;

	/// Bytes currently pending in the (receive, transmit) buffers.
	fn byte_counts(&self, handle: Handle) -> Result<(i32, i32), i32>;

	fn clear_buffers(&self, handle: Handle, rx: bool, tx: bool) -> i32;

	/// Asserts BREAK on the transmit line for `duration_ms`.
	fn send_break(&self, handle: Handle, duration_ms: u32) -> i32;

	/// Sets the minimum byte count a blocking read waits for (POSIX VMIN).
	fn set_min_data_length(&self, handle: Handle, len: i32) -> i32;

	/// Starts pushing [`Notification`]s for `handle` into `sink`. Delivery
	/// must be active when this returns 0.
	fn begin_delivery(&self, handle: Handle, sink: Sender<Notification>) -> i32;

	/// Stops pushing notifications for `handle` and releases the sink.
	fn end_delivery(&self, handle: Handle) -> i32;

	/// Starts watching for `name` appearing or disappearing.
	fn begin_port_watch(&self, name: &str, sink: Sender<PortWatchMessage>) -> i32;

	/// Stops the watch for `name`, releasing its sink.
	fn end_port_watch(&self, name: &str) -> i32;
}
