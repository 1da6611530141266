//! Raw HID sibling surface.
//!
//! USB and Bluetooth HID devices share the handle-and-numeric-code shape of
//! the serial adapter but none of its framing machinery, so they get their
//! own small façade over a transport contract.

use core::fmt;
use std::sync::Mutex;

use crate::adapter::Handle;
use crate::error::{Error, Result};

/// Platform HID transport, as consumed by [`HidManager`].
///
/// The status-code conventions match the serial adapter: non-negative for
/// success, negative error codes otherwise. The timeout read additionally
/// returns 0 when the wait expired without a report.
pub trait HidAdapter: Send + Sync + fmt::Debug {
	fn list_devices(&self) -> Vec<String>;

	fn open(&self, path: &str) -> Handle;

	fn close(&self, handle: Handle) -> i32;

	/// Reads one input report into `buf`, blocking until a report arrives.
	/// Returns the report length.
	fn read_input_report(&self, handle: Handle, buf: &mut [u8]) -> i32;

	/// Like [`HidAdapter::read_input_report`] but gives up after
	/// `timeout_ms`, returning 0.
	fn read_input_report_timeout(&self, handle: Handle, buf: &mut [u8], timeout_ms: u32) -> i32;

	/// Writes one output report. `report_id` 0 means the device does not
	/// use numbered reports.
	fn write_output_report(&self, handle: Handle, report_id: u8, data: &[u8]) -> i32;
}

/// Registry-backed façade over a [`HidAdapter`].
#[derive(Debug)]
pub struct HidManager {
	adapter: std::sync::Arc<dyn HidAdapter>,
	devices: Mutex<Vec<(Handle, String)>>,
}

impl HidManager {
	pub fn with_adapter(adapter: std::sync::Arc<dyn HidAdapter>) -> HidManager {
		HidManager {
			adapter,
			devices: Mutex::new(Vec::new()),
		}
	}

	pub fn list_devices(&self) -> Vec<String> {
		self.adapter.list_devices()
	}

	pub fn open(&self, path: &str) -> Result<Handle> {
		if path.is_empty() {
			return Err(Error::NullArg);
		}
		let handle = self.adapter.open(path);
		if handle < 0 {
			return Err(Error::from_code(handle));
		}
		self.devices.lock().unwrap().push((handle, path.to_owned()));
		Ok(handle)
	}

	pub fn close(&self, handle: Handle) -> Result<()> {
		let mut devices = self.devices.lock().unwrap();
		let index = devices
			.iter()
			.position(|(held, _)| *held == handle)
			.ok_or(Error::UnknownHandle(handle))?;
		let code = self.adapter.close(handle);
		if code != 0 {
			return Err(Error::from_code(i64::from(code)));
		}
		devices.remove(index);
		Ok(())
	}

	/// Blocking input-report read; returns the bytes of one report.
	pub fn read_input_report(&self, handle: Handle, max_len: usize) -> Result<Vec<u8>> {
		self.check_registered(handle)?;
		let mut buf = vec![0u8; max_len];
		let code = self.adapter.read_input_report(handle, &mut buf);
		if code < 0 {
			return Err(Error::from_code(i64::from(code)));
		}
		buf.truncate(code as usize);
		Ok(buf)
	}

	/// Input-report read that fails with [`Error::Timeout`] when no report
	/// arrives within `timeout_ms`.
	pub fn read_input_report_with_timeout(
		&self,
		handle: Handle,
		max_len: usize,
		timeout_ms: u32,
	) -> Result<Vec<u8>> {
		self.check_registered(handle)?;
		let mut buf = vec![0u8; max_len];
		let code = self
			.adapter
			.read_input_report_timeout(handle, &mut buf, timeout_ms);
		if code < 0 {
			return Err(Error::from_code(i64::from(code)));
		}
		if code == 0 {
			return Err(Error::Timeout);
		}
		buf.truncate(code as usize);
		Ok(buf)
	}

	pub fn write_output_report(&self, handle: Handle, report_id: u8, data: &[u8]) -> Result<usize> {
		self.check_registered(handle)?;
		if data.is_empty() {
			return Err(Error::invalid_arg("empty output report"));
		}
		let code = self.adapter.write_output_report(handle, report_id, data);
		if code < 0 {
			return Err(Error::from_code(i64::from(code)));
		}
		Ok(code as usize)
	}

	fn check_registered(&self, handle: Handle) -> Result<()> {
		let devices = self.devices.lock().unwrap();
		if devices.iter().any(|(held, _)| *held == handle) {
			Ok(())
		} else {
			Err(Error::UnknownHandle(handle))
		}
	}
}
