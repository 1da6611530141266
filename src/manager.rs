//! The manager façade composing registry, dispatcher and monitor.

use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::adapter::{Handle, ReadOutcome, SerialAdapter};
use crate::config::{
	BaudRate, DataBits, Endianness, FlowControl, IntWidth, LineEvents, OsType, Parity, StopBits,
	TransferProtocol, DEFAULT_READ_SIZE,
};
use crate::dispatch::{DataListener, Dispatcher, EventListener};
use crate::error::{Error, Result};
use crate::monitor::{HotplugMonitor, PortMonitorListener};
use crate::registry::{self, HandleInfo, PortRegistry};
use crate::xfer::{ByteChannel, Xmodem};
use crate::{debug_enabled, io};

/// Single entry point for serial port access.
///
/// One manager per process is the expected deployment, but nothing stops an
/// application from creating several against distinct adapters; each keeps
/// its own registry.
pub struct SerialManager {
	adapter: Arc<dyn SerialAdapter>,
	registry: PortRegistry,
	dispatcher: Dispatcher,
	monitor: HotplugMonitor,
	// Serializes flush and break against themselves.
	control_lock: Mutex<()>,
	os: OsType,
}

impl SerialManager {
	/// Creates a manager over the native adapter of this platform.
	pub fn new() -> SerialManager {
		SerialManager::with_adapter(crate::sys::native_adapter())
	}

	/// Creates a manager over a caller-supplied adapter.
	pub fn with_adapter(adapter: Arc<dyn SerialAdapter>) -> SerialManager {
		SerialManager::with_adapter_and_os(adapter, crate::config::os_type())
	}

	pub(crate) fn with_adapter_and_os(adapter: Arc<dyn SerialAdapter>, os: OsType) -> SerialManager {
		SerialManager {
			adapter: Arc::clone(&adapter),
			registry: PortRegistry::new(),
			dispatcher: Dispatcher::new(Arc::clone(&adapter)),
			monitor: HotplugMonitor::new(adapter),
			control_lock: Mutex::new(()),
			os,
		}
	}

	/// Enumerates the serial ports present on the system right now.
	pub fn list_ports(&self) -> Vec<String> {
		self.adapter.list_ports()
	}

	/// Opens `name` and registers a handle for it.
	///
	/// When `exclusive` is requested and this process already holds the
	/// port, the call returns the sentinel `-1` without touching the
	/// adapter; cross-process conflicts surface as [`Error::Io`] from the
	/// adapter instead. Legacy callers depend on that asymmetry.
	pub fn open(&self, name: &str, read: bool, write: bool, exclusive: bool) -> Result<Handle> {
		validate_open(self.os, name, read, write, exclusive)?;

		let mut entries = self.registry.lock();
		if exclusive && registry::contains_name(&entries, name) {
			return Ok(-1);
		}

		let handle = self.adapter.open(name, read, write, exclusive);
		if handle < 0 {
			return Err(Error::from_code(handle));
		}
		entries.push(HandleInfo::new(name.to_owned(), handle, exclusive));
		if debug_enabled() {
			debug!("opened {name} as handle {handle}");
		}
		Ok(handle)
	}

	/// Closes `handle` and removes its record.
	///
	/// Fails while a listener is still bound. The record is removed only
	/// when the adapter reports success; on a non-zero close code the
	/// handle stays registered and the error is surfaced.
	pub fn close(&self, handle: Handle) -> Result<()> {
		self.check_closable(handle)?;

		// A forgotten hotplug watch must not outlive its handle.
		if self.monitor.is_watching(handle) {
			let _ = self.monitor.unregister(handle);
		}

		let mut entries = self.registry.lock();
		let index =
			registry::find_by_handle(&entries, handle).ok_or(Error::UnknownHandle(handle))?;
		if entries[index].data_listener.is_some() {
			return Err(Error::MustUnregisterData);
		}
		if entries[index].event_listener.is_some() {
			return Err(Error::MustUnregisterEvent);
		}
		let code = self.adapter.close(handle);
		if code != 0 {
			return Err(Error::from_code(i64::from(code)));
		}
		entries.remove(index);
		if debug_enabled() {
			debug!("closed handle {handle}");
		}
		Ok(())
	}

	// ------------------------------------------------------------------
	// Byte I/O. Reads and writes skip the registry on purpose: the adapter
	// answers with its bad-handle code and the hot path stays lock-free.

	/// Writes `buf`, returning only once the bytes are handed to the OS
	/// transmit queue. An empty buffer returns `false` without touching
	/// the adapter.
	pub fn write_bytes(&self, handle: Handle, buf: &[u8], delay_ms: u32) -> Result<bool> {
		if buf.is_empty() {
			return Ok(false);
		}
		let code = self.adapter.write(handle, buf, delay_ms);
		if code < 0 {
			return Err(Error::from_code(code));
		}
		Ok(true)
	}

	pub fn write_single_byte(&self, handle: Handle, byte: u8) -> Result<bool> {
		self.write_bytes(handle, &[byte], 0)
	}

	/// Writes `text` encoded as UTF-8.
	pub fn write_string(&self, handle: Handle, text: &str, delay_ms: u32) -> Result<bool> {
		self.write_bytes(handle, text.as_bytes(), delay_ms)
	}

	/// Packs `value` with the given byte order and width and writes it.
	pub fn write_int(
		&self,
		handle: Handle,
		value: i32,
		delay_ms: u32,
		endianness: Endianness,
		width: IntWidth,
	) -> Result<bool> {
		self.write_bytes(handle, &io::pack_int(value, endianness, width), delay_ms)
	}

	/// Packs every value in array order and writes the concatenation.
	pub fn write_int_array(
		&self,
		handle: Handle,
		values: &[i32],
		delay_ms: u32,
		endianness: Endianness,
		width: IntWidth,
	) -> Result<bool> {
		self.write_bytes(handle, &io::pack_int_array(values, endianness, width), delay_ms)
	}

	/// Reads up to [`DEFAULT_READ_SIZE`] bytes.
	///
	/// `Ok(Some(vec))` carries data (possibly none buffered right now, in
	/// which case the vector is empty); `Ok(None)` is end of stream.
	pub fn read_bytes(&self, handle: Handle) -> Result<Option<Vec<u8>>> {
		self.read_bytes_limited(handle, DEFAULT_READ_SIZE)
	}

	/// Reads up to `count` bytes; see [`SerialManager::read_bytes`].
	pub fn read_bytes_limited(&self, handle: Handle, count: usize) -> Result<Option<Vec<u8>>> {
		if count == 0 {
			return Err(Error::invalid_arg("read length must be positive"));
		}
		match self.adapter.read(handle, count) {
			ReadOutcome::Data(bytes) => Ok(Some(bytes)),
			ReadOutcome::NoData => Ok(Some(Vec::new())),
			ReadOutcome::Eof => Ok(None),
			ReadOutcome::Err(code) => Err(Error::from_code(i64::from(code))),
		}
	}

	pub fn read_single_byte(&self, handle: Handle) -> Result<Option<Vec<u8>>> {
		self.read_bytes_limited(handle, 1)
	}

	/// Reads up to [`DEFAULT_READ_SIZE`] bytes and decodes them as UTF-8.
	pub fn read_string(&self, handle: Handle) -> Result<Option<String>> {
		self.read_string_limited(handle, DEFAULT_READ_SIZE)
	}

	pub fn read_string_limited(&self, handle: Handle, count: usize) -> Result<Option<String>> {
		match self.read_bytes_limited(handle, count)? {
			Some(bytes) => String::from_utf8(bytes)
				.map(Some)
				.map_err(|_| Error::invalid_arg("received bytes are not valid UTF-8")),
			None => Ok(None),
		}
	}

	/// Sets the minimum byte count a blocking read waits for (POSIX VMIN).
	/// Returns `false` on Windows, which has no equivalent.
	pub fn set_min_data_length(&self, handle: Handle, len: i32) -> Result<bool> {
		if len < 0 {
			return Err(Error::invalid_arg("minimum data length must not be negative"));
		}
		if self.os == OsType::Windows {
			return Ok(false);
		}
		self.ensure_registered(handle)?;
		let code = self.adapter.set_min_data_length(handle, len);
		if code < 0 {
			return Err(Error::from_code(i64::from(code)));
		}
		Ok(true)
	}

	// ------------------------------------------------------------------
	// Configuration and line control.

	/// Applies frame settings. `custom_baud` is consulted only with
	/// [`BaudRate::Custom`] and must be 0 otherwise.
	pub fn configure_data(
		&self,
		handle: Handle,
		data_bits: DataBits,
		stop_bits: StopBits,
		parity: Parity,
		baud: BaudRate,
		custom_baud: u32,
	) -> Result<()> {
		match (baud, custom_baud) {
			(BaudRate::Custom, 0) => {
				return Err(Error::invalid_arg("custom baud selected without a rate"));
			}
			(BaudRate::Custom, _) => {}
			(_, 0) => {}
			(_, _) => {
				return Err(Error::invalid_arg("custom baud given without the sentinel"));
			}
		}
		self.ensure_registered(handle)?;
		let code = self.adapter.configure_data(
			handle,
			data_bits.into(),
			stop_bits.into(),
			parity.into(),
			baud.into(),
			custom_baud,
		);
		self.status_to_result(code)
	}

	pub fn configure_control(
		&self,
		handle: Handle,
		flow: FlowControl,
		xon: u8,
		xoff: u8,
		parity_error_check: bool,
		overflow_error_check: bool,
	) -> Result<()> {
		self.ensure_registered(handle)?;
		let code = self.adapter.configure_control(
			handle,
			flow.into(),
			xon,
			xoff,
			parity_error_check,
			overflow_error_check,
		);
		self.status_to_result(code)
	}

	/// Returns the driver configuration as ordered text fields (termios
	/// fields on POSIX, DCB fields on Windows).
	pub fn current_configuration(&self, handle: Handle) -> Result<Vec<String>> {
		self.ensure_registered(handle)?;
		self.adapter
			.current_configuration(handle)
			.map_err(|code| Error::from_code(i64::from(code)))
	}

	pub fn set_rts(&self, handle: Handle, asserted: bool) -> Result<()> {
		self.ensure_registered(handle)?;
		self.status_to_result(self.adapter.set_rts(handle, asserted))
	}

	pub fn set_dtr(&self, handle: Handle, asserted: bool) -> Result<()> {
		self.ensure_registered(handle)?;
		self.status_to_result(self.adapter.set_dtr(handle, asserted))
	}

	/// Discards pending receive and/or transmit bytes. A call with both
	/// flags false is a no-op that never reaches the adapter.
	pub fn clear_io_buffers(&self, handle: Handle, rx: bool, tx: bool) -> Result<()> {
		if !rx && !tx {
			return Ok(());
		}
		let _guard = self.control_lock.lock().unwrap();
		self.ensure_registered(handle)?;
		self.status_to_result(self.adapter.clear_buffers(handle, rx, tx))
	}

	/// Asserts BREAK on the transmit line for `duration_ms`.
	pub fn send_break(&self, handle: Handle, duration_ms: u32) -> Result<()> {
		let _guard = self.control_lock.lock().unwrap();
		self.ensure_registered(handle)?;
		self.status_to_result(self.adapter.send_break(handle, duration_ms))
	}

	/// Interrupt counters in the fixed order (CTS, DSR, RING, DCD, RX-buf,
	/// TX-buf, frame-err, overrun, parity, break, buffer-overrun). All
	/// zeros on platforms without the counters (everything but Linux).
	pub fn interrupt_counts(&self, handle: Handle) -> Result<[i32; 11]> {
		self.ensure_registered(handle)?;
		if self.os != OsType::Linux {
			return Ok([0; 11]);
		}
		self.adapter
			.interrupt_counts(handle)
			.map_err(|code| Error::from_code(i64::from(code)))
	}

	/// Samples (CTS, DSR, DCD, RI, LOOP, RTS, DTR); a platform that cannot
	/// report a signal leaves 0 in its slot.
	pub fn line_status(&self, handle: Handle) -> Result<[i32; 7]> {
		self.ensure_registered(handle)?;
		self.adapter
			.line_status(handle)
			.map_err(|code| Error::from_code(i64::from(code)))
	}

	/// Bytes currently pending in the (receive, transmit) buffers.
	pub fn io_buffer_byte_counts(&self, handle: Handle) -> Result<(i32, i32)> {
		self.ensure_registered(handle)?;
		self.adapter
			.byte_counts(handle)
			.map_err(|code| Error::from_code(i64::from(code)))
	}

	// ------------------------------------------------------------------
	// Listener registration.

	/// Attaches `listener` to `handle`. Adapter delivery is active and the
	/// looper worker live when this returns.
	pub fn register_data_listener(
		&self,
		handle: Handle,
		listener: Arc<dyn DataListener>,
	) -> Result<()> {
		let mut entries = self.registry.lock();
		let index =
			registry::find_by_handle(&entries, handle).ok_or(Error::UnknownHandle(handle))?;
		if entries[index].data_listener.is_some() {
			return Err(Error::AlreadyHasDataListener);
		}
		if entries[index].looper.is_none() {
			entries[index].looper = Some(self.dispatcher.create_looper(handle)?);
		}
		let info = &mut entries[index];
		info.looper
			.as_ref()
			.unwrap()
			.shared
			.set_data_listener(Some(Arc::clone(&listener)));
		info.data_listener = Some(listener);
		Ok(())
	}

	/// Detaches a data listener located by identity. Returns only after
	/// the looper worker has exited if this was the handle's last
	/// listener. Unregistering a listener that is not registered is a
	/// no-op.
	pub fn unregister_data_listener(&self, listener: &Arc<dyn DataListener>) -> Result<()> {
		let mut entries = self.registry.lock();
		let Some(index) = registry::find_by_data_listener(&entries, listener) else {
			return Ok(());
		};
		let info = &mut entries[index];
		info.data_listener = None;
		if let Some(looper) = info.looper.as_ref() {
			looper.shared.set_data_listener(None);
		}
		self.reap_looper(&mut entries[index]);
		Ok(())
	}

	/// Attaches an event listener to `handle`. Hardware flow control
	/// should already be configured for line events to be meaningful.
	pub fn register_event_listener(
		&self,
		handle: Handle,
		listener: Arc<dyn EventListener>,
	) -> Result<()> {
		let mut entries = self.registry.lock();
		let index =
			registry::find_by_handle(&entries, handle).ok_or(Error::UnknownHandle(handle))?;
		if entries[index].event_listener.is_some() {
			return Err(Error::AlreadyHasEventListener);
		}
		if entries[index].looper.is_none() {
			entries[index].looper = Some(self.dispatcher.create_looper(handle)?);
		}
		let info = &mut entries[index];
		info.looper
			.as_ref()
			.unwrap()
			.shared
			.set_event_listener(Some(Arc::clone(&listener)));
		info.event_listener = Some(listener);
		Ok(())
	}

	/// Detaches an event listener located by identity; see
	/// [`SerialManager::unregister_data_listener`] for the teardown
	/// guarantees.
	pub fn unregister_event_listener(&self, listener: &Arc<dyn EventListener>) -> Result<()> {
		let mut entries = self.registry.lock();
		let Some(index) = registry::find_by_event_listener(&entries, listener) else {
			return Ok(());
		};
		let info = &mut entries[index];
		info.event_listener = None;
		if let Some(looper) = info.looper.as_ref() {
			looper.shared.set_event_listener(None);
		}
		self.reap_looper(&mut entries[index]);
		Ok(())
	}

	/// Suspends delivery for the looper serving `listener`. Notifications
	/// arriving while paused are discarded, not buffered.
	pub fn pause_listening_events(&self, listener: &Arc<dyn EventListener>) -> Result<()> {
		self.with_event_looper(listener, |shared| shared.set_paused(true))
	}

	pub fn resume_listening_events(&self, listener: &Arc<dyn EventListener>) -> Result<()> {
		self.with_event_looper(listener, |shared| shared.set_paused(false))
	}

	/// Restricts which line events reach `listener`; an event is delivered
	/// iff it intersects the mask.
	pub fn set_event_mask(
		&self,
		listener: &Arc<dyn EventListener>,
		mask: LineEvents,
	) -> Result<()> {
		self.with_event_looper(listener, |shared| shared.set_mask(mask))
	}

	pub fn get_event_mask(&self, listener: &Arc<dyn EventListener>) -> Result<LineEvents> {
		self.with_event_looper(listener, |shared| shared.mask())
	}

	// ------------------------------------------------------------------
	// Hotplug.

	/// Watches the port `handle` was opened on for add/remove events.
	pub fn register_port_monitor(
		&self,
		handle: Handle,
		listener: Arc<dyn PortMonitorListener>,
	) -> Result<()> {
		let port_name = {
			let entries = self.registry.lock();
			let index =
				registry::find_by_handle(&entries, handle).ok_or(Error::UnknownHandle(handle))?;
			entries[index].port_name.clone()
		};
		self.monitor.register(handle, &port_name, listener)
	}

	/// Stops the watch for `handle`, joining the watcher synchronously.
	pub fn unregister_port_monitor(&self, handle: Handle) -> Result<()> {
		self.ensure_registered(handle)?;
		self.monitor.unregister(handle)
	}

	// ------------------------------------------------------------------
	// File transfer.

	/// Sends the file at `path` over `handle` with the given protocol.
	pub fn send_file(&self, handle: Handle, path: &Path, protocol: TransferProtocol) -> Result<()> {
		self.ensure_registered(handle)?;
		let mut file = File::open(path).map_err(file_error)?;
		match protocol {
			TransferProtocol::Xmodem => {
				let mut channel = PortByteChannel {
					manager: self,
					handle,
				};
				Xmodem::default().send(&mut channel, &mut file)
			}
		}
	}

	/// Receives a file over `handle` into `path` with the given protocol.
	pub fn receive_file(
		&self,
		handle: Handle,
		path: &Path,
		protocol: TransferProtocol,
	) -> Result<()> {
		self.ensure_registered(handle)?;
		let mut file = File::create(path).map_err(file_error)?;
		match protocol {
			TransferProtocol::Xmodem => {
				let mut channel = PortByteChannel {
					manager: self,
					handle,
				};
				Xmodem::default().receive(&mut channel, &mut file)
			}
		}
	}

	// ------------------------------------------------------------------

	fn ensure_registered(&self, handle: Handle) -> Result<()> {
		let entries = self.registry.lock();
		registry::find_by_handle(&entries, handle)
			.map(|_| ())
			.ok_or(Error::UnknownHandle(handle))
	}

	/// Pre-flight for close, so a refused close leaves the hotplug watch
	/// alone. The decisive checks run again under the lock that removes
	/// the record.
	fn check_closable(&self, handle: Handle) -> Result<()> {
		let entries = self.registry.lock();
		let index =
			registry::find_by_handle(&entries, handle).ok_or(Error::UnknownHandle(handle))?;
		if entries[index].data_listener.is_some() {
			return Err(Error::MustUnregisterData);
		}
		if entries[index].event_listener.is_some() {
			return Err(Error::MustUnregisterEvent);
		}
		Ok(())
	}

	fn status_to_result(&self, code: i32) -> Result<()> {
		if code < 0 {
			Err(Error::from_code(i64::from(code)))
		} else {
			Ok(())
		}
	}

	/// Destroys the looper of a record whose last listener just left.
	fn reap_looper(&self, info: &mut HandleInfo) {
		if !info.has_listener() {
			if let Some(looper) = info.looper.take() {
				self.dispatcher.destroy_looper(info.handle, looper);
			}
		}
	}

	fn with_event_looper<R>(
		&self,
		listener: &Arc<dyn EventListener>,
		operation: impl FnOnce(&crate::dispatch::LooperShared) -> R,
	) -> Result<R> {
		let entries = self.registry.lock();
		let index = registry::find_by_event_listener(&entries, listener)
			.ok_or(Error::UnknownListener)?;
		let looper = entries[index].looper.as_ref().ok_or(Error::UnknownListener)?;
		Ok(operation(&looper.shared))
	}
}

impl Default for SerialManager {
	fn default() -> SerialManager {
		SerialManager::new()
	}
}

impl core::fmt::Debug for SerialManager {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("SerialManager")
			.field("adapter", &self.adapter)
			.field("os", &self.os)
			.finish_non_exhaustive()
	}
}

fn validate_open(os: OsType, name: &str, read: bool, write: bool, exclusive: bool) -> Result<()> {
	if name.is_empty() {
		return Err(Error::NullArg);
	}
	if !read && !write {
		return Err(Error::invalid_arg(
			"a port must be opened for reading, writing or both",
		));
	}
	if os == OsType::Windows && !exclusive {
		return Err(Error::PlatformConstraint(
			"Windows only supports exclusive port access",
		));
	}
	Ok(())
}

fn file_error(err: std::io::Error) -> Error {
	match err.raw_os_error() {
		Some(code) => Error::from_code(-i64::from(code)),
		None => Error::from_code(-5),
	}
}

/// Byte-channel view of one open handle, as consumed by the transfer
/// engine.
struct PortByteChannel<'a> {
	manager: &'a SerialManager,
	handle: Handle,
}

impl ByteChannel for PortByteChannel<'_> {
	fn recv_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
		let deadline = Instant::now() + timeout;
		loop {
			match self.manager.read_bytes_limited(self.handle, 1)? {
				Some(bytes) if !bytes.is_empty() => return Ok(Some(bytes[0])),
				Some(_) => {}
				// The endpoint vanished mid-transfer.
				None => return Err(Error::from_code(-5)),
			}
			if Instant::now() >= deadline {
				return Ok(None);
			}
			thread::sleep(Duration::from_millis(5));
		}
	}

	fn send(&mut self, data: &[u8]) -> Result<()> {
		self.manager.write_bytes(self.handle, data, 0).map(|_| ())
	}
}
