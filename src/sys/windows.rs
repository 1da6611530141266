//! Win32 implementation of the native serial adapter.
//!
//! Handles wrap the raw `HANDLE` returned by `CreateFileW`. Reads use
//! immediate-return comm timeouts so the façade's no-data outcome maps onto
//! a zero-length `ReadFile`; event delivery runs one worker per handle on
//! `WaitCommEvent`.

use std::ffi::OsStr;
use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use windows_sys::Win32::Devices::Communication::{
	ClearCommError, EscapeCommFunction, GetCommModemStatus, GetCommState, PurgeComm, SetCommMask,
	SetCommState, SetCommTimeouts, WaitCommEvent, CLRBREAK, CLRDTR, CLRRTS, COMMTIMEOUTS, COMSTAT,
	DCB, EVENPARITY, EV_BREAK, EV_CTS, EV_DSR, EV_ERR, EV_RING, EV_RLSD, EV_RXCHAR, MARKPARITY,
	MS_CTS_ON, MS_DSR_ON, MS_RING_ON, MS_RLSD_ON, NOPARITY, ODDPARITY, ONE5STOPBITS, ONESTOPBIT,
	PURGE_RXABORT, PURGE_RXCLEAR, PURGE_TXABORT, PURGE_TXCLEAR, SETBREAK, SETDTR, SETRTS,
	SPACEPARITY, TWOSTOPBITS,
};
use windows_sys::Win32::Foundation::{
	CloseHandle, GetLastError, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
	CreateFileW, QueryDosDeviceW, ReadFile, WriteFile, FILE_ATTRIBUTE_NORMAL, OPEN_EXISTING,
};

use crate::adapter::{Handle, Notification, PortWatchMessage, ReadOutcome, SerialAdapter};
use crate::config::{LineEvents, PortMonitorEvent};

#[derive(Debug)]
struct OpenPort {
	handle: Handle,
	raw: HANDLE,
	name: String,
}

#[derive(Debug)]
struct Delivery {
	handle: Handle,
	alive: Arc<AtomicBool>,
	worker: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Watch {
	port_name: String,
	alive: Arc<AtomicBool>,
	worker: Option<JoinHandle<()>>,
}

/// The DCB-based adapter used on Windows.
#[derive(Debug)]
pub(crate) struct Win32Adapter {
	ports: Mutex<Vec<OpenPort>>,
	deliveries: Mutex<Vec<Delivery>>,
	watches: Mutex<Vec<Watch>>,
}

// HANDLEs of serial devices may be used from several threads at once.
unsafe impl Send for Win32Adapter {}
unsafe impl Sync for Win32Adapter {}

impl Win32Adapter {
	pub(crate) fn new() -> Win32Adapter {
		Win32Adapter {
			ports: Mutex::new(Vec::new()),
			deliveries: Mutex::new(Vec::new()),
			watches: Mutex::new(Vec::new()),
		}
	}

	fn raw_of(&self, handle: Handle) -> Result<HANDLE, i32> {
		self.ports
			.lock()
			.unwrap()
			.iter()
			.find(|port| port.handle == handle)
			.map(|port| port.raw)
			.ok_or(-9)
	}
}

fn last_error() -> i32 {
	// Win32 error codes share the positive space with errno values; they
	// travel negated like every other adapter code.
	-(unsafe { GetLastError() } as i32)
}

fn wide(name: &str) -> Vec<u16> {
	OsStr::new(name).encode_wide().chain(once(0)).collect()
}

/// `COM10` and beyond need the device-namespace prefix.
fn device_path(name: &str) -> String {
	if name.starts_with(r"\\.\") {
		name.to_owned()
	} else {
		format!(r"\\.\{name}")
	}
}

fn port_present(name: &str) -> bool {
	let mut target = [0u16; 512];
	let trimmed = name.trim_start_matches(r"\\.\");
	unsafe { QueryDosDeviceW(wide(trimmed).as_ptr(), target.as_mut_ptr(), 512) != 0 }
}

impl SerialAdapter for Win32Adapter {
	fn list_ports(&self) -> Vec<String> {
		let mut ports = Vec::new();
		for index in 1..=256u32 {
			let name = format!("COM{index}");
			if port_present(&name) {
				ports.push(name);
			}
		}
		ports
	}

	fn open(&self, name: &str, read: bool, write: bool, _exclusive: bool) -> Handle {
		let mut access = 0u32;
		if read {
			access |= GENERIC_READ;
		}
		if write {
			access |= GENERIC_WRITE;
		}
		let path = wide(&device_path(name));
		// Zero share mode: serial ports are always exclusive on Windows.
		let raw = unsafe {
			CreateFileW(
				path.as_ptr(),
				access,
				0,
				std::ptr::null(),
				OPEN_EXISTING,
				FILE_ATTRIBUTE_NORMAL,
				std::ptr::null_mut() as HANDLE,
			)
		};
		if raw == INVALID_HANDLE_VALUE {
			return i64::from(last_error());
		}

		// Immediate-return reads; writes block until accepted.
		let timeouts = COMMTIMEOUTS {
			ReadIntervalTimeout: u32::MAX,
			ReadTotalTimeoutMultiplier: 0,
			ReadTotalTimeoutConstant: 0,
			WriteTotalTimeoutMultiplier: 0,
			WriteTotalTimeoutConstant: 0,
		};
		if unsafe { SetCommTimeouts(raw, &timeouts) } == 0 {
			let code = last_error();
			unsafe { CloseHandle(raw) };
			return i64::from(code);
		}

		let handle = raw as Handle;
		self.ports.lock().unwrap().push(OpenPort {
			handle,
			raw,
			name: name.to_owned(),
		});
		handle
	}

	fn close(&self, handle: Handle) -> i32 {
		let mut ports = self.ports.lock().unwrap();
		let Some(index) = ports.iter().position(|port| port.handle == handle) else {
			return -9;
		};
		if unsafe { CloseHandle(ports[index].raw) } == 0 {
			return last_error();
		}
		ports.remove(index);
		0
	}

	fn read(&self, handle: Handle, count: usize) -> ReadOutcome {
		let raw = match self.raw_of(handle) {
			Ok(raw) => raw,
			Err(code) => return ReadOutcome::Err(code),
		};
		let mut buf = vec![0u8; count];
		let mut transferred = 0u32;
		let ok = unsafe {
			ReadFile(
				raw,
				buf.as_mut_ptr() as *mut _,
				count as u32,
				&mut transferred,
				std::ptr::null_mut(),
			)
		};
		if ok == 0 {
			return ReadOutcome::Err(last_error());
		}
		if transferred == 0 {
			return ReadOutcome::NoData;
		}
		buf.truncate(transferred as usize);
		ReadOutcome::Data(buf)
	}

	fn write(&self, handle: Handle, buf: &[u8], delay_ms: u32) -> i64 {
		let raw = match self.raw_of(handle) {
			Ok(raw) => raw,
			Err(code) => return i64::from(code),
		};
		let write_chunk = |chunk: &[u8]| -> Result<(), i32> {
			let mut written = 0u32;
			let ok = unsafe {
				WriteFile(
					raw,
					chunk.as_ptr() as *const _,
					chunk.len() as u32,
					&mut written,
					std::ptr::null_mut(),
				)
			};
			if ok == 0 || written as usize != chunk.len() {
				Err(last_error())
			} else {
				Ok(())
			}
		};

		if delay_ms == 0 {
			match write_chunk(buf) {
				Ok(()) => buf.len() as i64,
				Err(code) => i64::from(code),
			}
		} else {
			for (index, byte) in buf.iter().enumerate() {
				if index != 0 {
					thread::sleep(Duration::from_millis(u64::from(delay_ms)));
				}
				if let Err(code) = write_chunk(std::slice::from_ref(byte)) {
					return i64::from(code);
				}
			}
			buf.len() as i64
		}
	}

	fn configure_data(
		&self,
		handle: Handle,
		data_bits: u8,
		stop_bits: u8,
		parity: u8,
		baud: u32,
		custom_baud: u32,
	) -> i32 {
		let raw = match self.raw_of(handle) {
			Ok(raw) => raw,
			Err(code) => return code,
		};
		let mut dcb: DCB = unsafe { std::mem::zeroed() };
		dcb.DCBlength = std::mem::size_of::<DCB>() as u32;
		if unsafe { GetCommState(raw, &mut dcb) } == 0 {
			return last_error();
		}

		if !(5..=8).contains(&data_bits) {
			return -22;
		}
		dcb.ByteSize = data_bits;
		dcb.StopBits = match stop_bits {
			1 => ONESTOPBIT,
			2 => TWOSTOPBITS,
			4 => ONE5STOPBITS,
			_ => return -22,
		};
		dcb.Parity = match parity {
			1 => NOPARITY,
			2 => ODDPARITY,
			3 => EVENPARITY,
			4 => MARKPARITY,
			5 => SPACEPARITY,
			_ => return -22,
		};
		// The DCB takes the numeric rate directly, so the custom sentinel
		// just substitutes the caller's value.
		dcb.BaudRate = if baud == 251 {
			if custom_baud == 0 {
				return -22;
			}
			custom_baud
		} else {
			baud
		};

		if unsafe { SetCommState(raw, &mut dcb) } == 0 {
			return last_error();
		}
		0
	}

	fn configure_control(
		&self,
		handle: Handle,
		flow: u8,
		xon: u8,
		xoff: u8,
		parity_error_check: bool,
		overflow_error_check: bool,
	) -> i32 {
		let raw = match self.raw_of(handle) {
			Ok(raw) => raw,
			Err(code) => return code,
		};
		let mut dcb: DCB = unsafe { std::mem::zeroed() };
		dcb.DCBlength = std::mem::size_of::<DCB>() as u32;
		if unsafe { GetCommState(raw, &mut dcb) } == 0 {
			return last_error();
		}

		// Bit positions in DCB._bitfield: fBinary=0, fParity=1,
		// fOutxCtsFlow=2, fDtrControl=4..5, fOutX=8, fInX=9,
		// fRtsControl=12..13, fAbortOnError=14.
		const F_PARITY: u32 = 1 << 1;
		const F_OUTX_CTS: u32 = 1 << 2;
		const F_OUTX: u32 = 1 << 8;
		const F_INX: u32 = 1 << 9;
		const F_RTS_HANDSHAKE: u32 = 2 << 12;
		const F_ABORT_ON_ERROR: u32 = 1 << 14;

		dcb._bitfield &=
			!(F_PARITY | F_OUTX_CTS | F_OUTX | F_INX | (3 << 12) | F_ABORT_ON_ERROR);
		match flow {
			1 => {}
			2 => dcb._bitfield |= F_OUTX_CTS | F_RTS_HANDSHAKE,
			3 => {
				dcb._bitfield |= F_OUTX | F_INX;
				dcb.XonChar = xon as i8;
				dcb.XoffChar = xoff as i8;
			}
			_ => return -22,
		}
		if parity_error_check {
			dcb._bitfield |= F_PARITY;
		}
		if overflow_error_check {
			dcb._bitfield |= F_ABORT_ON_ERROR;
		}

		if unsafe { SetCommState(raw, &mut dcb) } == 0 {
			return last_error();
		}
		0
	}

	fn current_configuration(&self, handle: Handle) -> Result<Vec<String>, i32> {
		let raw = self.raw_of(handle)?;
		let mut dcb: DCB = unsafe { std::mem::zeroed() };
		dcb.DCBlength = std::mem::size_of::<DCB>() as u32;
		if unsafe { GetCommState(raw, &mut dcb) } == 0 {
			return Err(last_error());
		}
		Ok(vec![
			dcb.DCBlength.to_string(),
			dcb.BaudRate.to_string(),
			dcb._bitfield.to_string(),
			dcb.wReserved.to_string(),
			dcb.XonLim.to_string(),
			dcb.XoffLim.to_string(),
			dcb.ByteSize.to_string(),
			dcb.Parity.to_string(),
			dcb.StopBits.to_string(),
			dcb.XonChar.to_string(),
			dcb.XoffChar.to_string(),
			dcb.ErrorChar.to_string(),
			dcb.EofChar.to_string(),
			dcb.EvtChar.to_string(),
		])
	}

	fn set_rts(&self, handle: Handle, asserted: bool) -> i32 {
		self.escape(handle, if asserted { SETRTS } else { CLRRTS })
	}

	fn set_dtr(&self, handle: Handle, asserted: bool) -> i32 {
		self.escape(handle, if asserted { SETDTR } else { CLRDTR })
	}

	fn line_status(&self, handle: Handle) -> Result<[i32; 7], i32> {
		let raw = self.raw_of(handle)?;
		let mut status = 0u32;
		if unsafe { GetCommModemStatus(raw, &mut status) } == 0 {
			return Err(last_error());
		}
		let is_set = |bit: u32| i32::from(status & bit != 0);
		// Windows cannot report LOOP, RTS or DTR readback.
		Ok([
			is_set(MS_CTS_ON),
			is_set(MS_DSR_ON),
			is_set(MS_RLSD_ON),
			is_set(MS_RING_ON),
			0,
			0,
			0,
		])
	}

	fn interrupt_counts(&self, _handle: Handle) -> Result<[i32; 11], i32> {
		// Only Linux exposes the counters; the façade zero-fills anyway.
		Ok([0; 11])
	}

	fn byte_counts(&self, handle: Handle) -> Result<(i32, i32), i32> {
		let raw = self.raw_of(handle)?;
		let mut errors = 0u32;
		let mut stat: COMSTAT = unsafe { std::mem::zeroed() };
		if unsafe { ClearCommError(raw, &mut errors, &mut stat) } == 0 {
			return Err(last_error());
		}
		Ok((stat.cbInQue as i32, stat.cbOutQue as i32))
	}

	fn clear_buffers(&self, handle: Handle, rx: bool, tx: bool) -> i32 {
		let raw = match self.raw_of(handle) {
			Ok(raw) => raw,
			Err(code) => return code,
		};
		let mut flags = 0u32;
		if rx {
			flags |= PURGE_RXABORT | PURGE_RXCLEAR;
		}
		if tx {
			flags |= PURGE_TXABORT | PURGE_TXCLEAR;
		}
		if flags == 0 {
			return 0;
		}
		if unsafe { PurgeComm(raw, flags) } == 0 {
			return last_error();
		}
		0
	}

	fn send_break(&self, handle: Handle, duration_ms: u32) -> i32 {
		let code = self.escape(handle, SETBREAK);
		if code != 0 {
			return code;
		}
		thread::sleep(Duration::from_millis(u64::from(duration_ms.max(1))));
		self.escape(handle, CLRBREAK)
	}

	fn set_min_data_length(&self, _handle: Handle, _len: i32) -> i32 {
		// VMIN is a termios concept; the façade rejects this beforehand.
		-38
	}

	fn begin_delivery(&self, handle: Handle, sink: Sender<Notification>) -> i32 {
		let raw = match self.raw_of(handle) {
			Ok(raw) => raw,
			Err(code) => return code,
		};
		let mut deliveries = self.deliveries.lock().unwrap();
		if deliveries.iter().any(|delivery| delivery.handle == handle) {
			return -16;
		}
		let mask = EV_RXCHAR | EV_CTS | EV_DSR | EV_RLSD | EV_RING | EV_BREAK | EV_ERR;
		if unsafe { SetCommMask(raw, mask) } == 0 {
			return last_error();
		}
		let alive = Arc::new(AtomicBool::new(true));
		let worker_alive = Arc::clone(&alive);
		let raw_value = raw as usize;
		let worker = match thread::Builder::new()
			.name(format!("portmux-comm-{handle}"))
			.spawn(move || delivery_loop(raw_value as HANDLE, sink, worker_alive))
		{
			Ok(worker) => worker,
			Err(_) => return -12,
		};
		deliveries.push(Delivery {
			handle,
			alive,
			worker: Some(worker),
		});
		0
	}

	fn end_delivery(&self, handle: Handle) -> i32 {
		let Ok(raw) = self.raw_of(handle) else {
			return 0;
		};
		let mut deliveries = self.deliveries.lock().unwrap();
		let Some(index) = deliveries
			.iter()
			.position(|delivery| delivery.handle == handle)
		else {
			return 0;
		};
		let mut delivery = deliveries.remove(index);
		delivery.alive.store(false, Ordering::SeqCst);
		// Clearing the mask aborts a pending WaitCommEvent.
		unsafe { SetCommMask(raw, 0) };
		if let Some(worker) = delivery.worker.take() {
			let _ = worker.join();
		}
		0
	}

	fn begin_port_watch(&self, name: &str, sink: Sender<PortWatchMessage>) -> i32 {
		let mut watches = self.watches.lock().unwrap();
		if watches.iter().any(|watch| watch.port_name == name) {
			return -16;
		}
		let alive = Arc::new(AtomicBool::new(true));
		let worker_alive = Arc::clone(&alive);
		let path = name.to_owned();
		let worker = match thread::Builder::new()
			.name("portmux-hotplug".to_owned())
			.spawn(move || watch_loop(path, sink, worker_alive))
		{
			Ok(worker) => worker,
			Err(_) => return -12,
		};
		watches.push(Watch {
			port_name: name.to_owned(),
			alive,
			worker: Some(worker),
		});
		0
	}

	fn end_port_watch(&self, name: &str) -> i32 {
		let mut watches = self.watches.lock().unwrap();
		let Some(index) = watches.iter().position(|watch| watch.port_name == name) else {
			return 0;
		};
		let mut watch = watches.remove(index);
		watch.alive.store(false, Ordering::SeqCst);
		if let Some(worker) = watch.worker.take() {
			let _ = worker.join();
		}
		0
	}
}

impl Win32Adapter {
	fn escape(&self, handle: Handle, function: u32) -> i32 {
		let raw = match self.raw_of(handle) {
			Ok(raw) => raw,
			Err(code) => return code,
		};
		if unsafe { EscapeCommFunction(raw, function) } == 0 {
			return last_error();
		}
		0
	}
}

fn comm_event_bits(mask: u32) -> u32 {
	let mut events = LineEvents::empty();
	if mask & EV_CTS != 0 {
		events |= LineEvents::CTS;
	}
	if mask & EV_DSR != 0 {
		events |= LineEvents::DSR;
	}
	if mask & EV_RLSD != 0 {
		events |= LineEvents::DCD;
	}
	if mask & EV_RING != 0 {
		events |= LineEvents::RI;
	}
	if mask & EV_BREAK != 0 {
		events |= LineEvents::BREAK;
	}
	events.bits()
}

fn delivery_loop(raw: HANDLE, sink: Sender<Notification>, alive: Arc<AtomicBool>) {
	while alive.load(Ordering::SeqCst) {
		let mut mask = 0u32;
		if unsafe { WaitCommEvent(raw, &mut mask, std::ptr::null_mut()) } == 0 {
			if alive.load(Ordering::SeqCst) {
				let _ = sink.send(Notification::Error(last_error()));
			}
			break;
		}
		if mask & EV_RXCHAR != 0 {
			let mut buf = vec![0u8; 1024];
			let mut transferred = 0u32;
			let ok = unsafe {
				ReadFile(
					raw,
					buf.as_mut_ptr() as *mut _,
					1024,
					&mut transferred,
					std::ptr::null_mut(),
				)
			};
			if ok != 0 && transferred > 0 {
				buf.truncate(transferred as usize);
				if sink.send(Notification::Data(buf)).is_err() {
					break;
				}
			}
		}
		let events = comm_event_bits(mask);
		if events != 0 && sink.send(Notification::Event(events)).is_err() {
			break;
		}
	}
}

fn watch_loop(name: String, sink: Sender<PortWatchMessage>, alive: Arc<AtomicBool>) {
	let mut present = port_present(&name);
	while alive.load(Ordering::SeqCst) {
		thread::sleep(Duration::from_millis(250));
		let now = port_present(&name);
		if now != present {
			present = now;
			let event = if now {
				PortMonitorEvent::Added
			} else {
				PortMonitorEvent::Removed
			};
			if sink.send(PortWatchMessage::Event(event)).is_err() {
				break;
			}
		}
	}
}
