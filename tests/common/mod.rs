//! Shared test scaffolding: a scripted adapter and recording listeners.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use portmux::adapter::{Handle, Notification, PortWatchMessage, ReadOutcome, SerialAdapter};
use portmux::config::PortMonitorEvent;
use portmux::{DataListener, EventListener, LineEvents, PortMonitorListener};

#[derive(Debug, Default)]
pub struct MockState {
	pub opened: Vec<Handle>,
	pub open_calls: Vec<(String, bool, bool, bool)>,
	pub open_code: Option<i64>,
	pub close_code: i32,
	pub writes: Vec<(Handle, Vec<u8>, u32)>,
	pub reads: VecDeque<ReadOutcome>,
	pub read_requests: Vec<(Handle, usize)>,
	pub configured_data: Vec<(Handle, u8, u8, u8, u32, u32)>,
	pub configured_control: Vec<(Handle, u8, u8, u8, bool, bool)>,
	pub rts_calls: Vec<(Handle, bool)>,
	pub dtr_calls: Vec<(Handle, bool)>,
	pub cleared: Vec<(Handle, bool, bool)>,
	pub breaks: Vec<(Handle, u32)>,
	pub min_lengths: Vec<(Handle, i32)>,
	pub line_status: [i32; 7],
	pub interrupt_counts: [i32; 11],
	pub byte_counts: (i32, i32),
	pub deliveries: HashMap<Handle, Sender<Notification>>,
	pub watches: HashMap<String, Sender<PortWatchMessage>>,
}

/// Scripted in-memory adapter.
#[derive(Debug)]
pub struct MockAdapter {
	next_handle: AtomicI64,
	pub state: Mutex<MockState>,
}

impl MockAdapter {
	pub fn new() -> Arc<MockAdapter> {
		Arc::new(MockAdapter {
			next_handle: AtomicI64::new(3),
			state: Mutex::new(MockState::default()),
		})
	}

	pub fn push_read(&self, outcome: ReadOutcome) {
		self.state.lock().unwrap().reads.push_back(outcome);
	}

	/// Scripts a byte stream as single-byte data reads.
	pub fn push_read_bytes(&self, bytes: &[u8]) {
		let mut state = self.state.lock().unwrap();
		for &byte in bytes {
			state.reads.push_back(ReadOutcome::Data(vec![byte]));
		}
	}

	pub fn inject(&self, handle: Handle, notification: Notification) {
		let sender = self
			.state
			.lock()
			.unwrap()
			.deliveries
			.get(&handle)
			.cloned()
			.expect("no delivery registered for handle");
		sender.send(notification).expect("delivery channel closed");
	}

	/// Whether a notification for `handle` can still be delivered.
	pub fn delivery_active(&self, handle: Handle) -> bool {
		self.state.lock().unwrap().deliveries.contains_key(&handle)
	}

	pub fn inject_port_event(&self, name: &str, event: PortMonitorEvent) {
		let sender = self
			.state
			.lock()
			.unwrap()
			.watches
			.get(name)
			.cloned()
			.expect("no watch registered for port");
		sender
			.send(PortWatchMessage::Event(event))
			.expect("watch channel closed");
	}

	pub fn watch_active(&self, name: &str) -> bool {
		self.state.lock().unwrap().watches.contains_key(name)
	}

	pub fn open_call_count(&self) -> usize {
		self.state.lock().unwrap().open_calls.len()
	}

	pub fn writes(&self) -> Vec<(Handle, Vec<u8>, u32)> {
		self.state.lock().unwrap().writes.clone()
	}
}

impl SerialAdapter for MockAdapter {
	fn list_ports(&self) -> Vec<String> {
		vec!["/dev/ttyUSB0".into(), "/dev/ttyUSB1".into()]
	}

	fn open(&self, name: &str, read: bool, write: bool, exclusive: bool) -> Handle {
		let mut state = self.state.lock().unwrap();
		state
			.open_calls
			.push((name.to_owned(), read, write, exclusive));
		if let Some(code) = state.open_code {
			return code;
		}
		let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
		state.opened.push(handle);
		handle
	}

	fn close(&self, handle: Handle) -> i32 {
		let mut state = self.state.lock().unwrap();
		let code = state.close_code;
		if code == 0 {
			state.opened.retain(|&held| held != handle);
		}
		code
	}

	fn read(&self, handle: Handle, count: usize) -> ReadOutcome {
		let mut state = self.state.lock().unwrap();
		if !state.opened.contains(&handle) {
			return ReadOutcome::Err(-9);
		}
		state.read_requests.push((handle, count));
		state.reads.pop_front().unwrap_or(ReadOutcome::NoData)
	}

	fn write(&self, handle: Handle, buf: &[u8], delay_ms: u32) -> i64 {
		let mut state = self.state.lock().unwrap();
		if !state.opened.contains(&handle) {
			return -9;
		}
		state.writes.push((handle, buf.to_vec(), delay_ms));
		buf.len() as i64
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
		self.state
			.lock()
			.unwrap()
			.configured_data
			.push((handle, data_bits, stop_bits, parity, baud, custom_baud));
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
		self.state.lock().unwrap().configured_control.push((
			handle,
			flow,
			xon,
			xoff,
			parity_error_check,
			overflow_error_check,
		));
		0
	}

	fn current_configuration(&self, _handle: Handle) -> Result<Vec<String>, i32> {
		Ok(vec!["0".into(), "4".into(), "3261".into()])
	}

	fn set_rts(&self, handle: Handle, asserted: bool) -> i32 {
		self.state.lock().unwrap().rts_calls.push((handle, asserted));
		0
	}

	fn set_dtr(&self, handle: Handle, asserted: bool) -> i32 {
		self.state.lock().unwrap().dtr_calls.push((handle, asserted));
		0
	}

	fn line_status(&self, _handle: Handle) -> Result<[i32; 7], i32> {
		Ok(self.state.lock().unwrap().line_status)
	}

	fn interrupt_counts(&self, _handle: Handle) -> Result<[i32; 11], i32> {
		Ok(self.state.lock().unwrap().interrupt_counts)
	}

	fn byte_counts(&self, _handle: Handle) -> Result<(i32, i32), i32> {
		Ok(self.state.lock().unwrap().byte_counts)
	}

	fn clear_buffers(&self, handle: Handle, rx: bool, tx: bool) -> i32 {
		self.state.lock().unwrap().cleared.push((handle, rx, tx));
		0
	}

	fn send_break(&self, handle: Handle, duration_ms: u32) -> i32 {
		self.state.lock().unwrap().breaks.push((handle, duration_ms));
		0
	}

	fn set_min_data_length(&self, handle: Handle, len: i32) -> i32 {
		self.state.lock().unwrap().min_lengths.push((handle, len));
		0
	}

	fn begin_delivery(&self, handle: Handle, sink: Sender<Notification>) -> i32 {
		self.state.lock().unwrap().deliveries.insert(handle, sink);
		0
	}

	fn end_delivery(&self, handle: Handle) -> i32 {
		self.state.lock().unwrap().deliveries.remove(&handle);
		0
	}

	fn begin_port_watch(&self, name: &str, sink: Sender<PortWatchMessage>) -> i32 {
		self.state
			.lock()
			.unwrap()
			.watches
			.insert(name.to_owned(), sink);
		0
	}

	fn end_port_watch(&self, name: &str) -> i32 {
		self.state.lock().unwrap().watches.remove(name);
		0
	}
}

/// Records every data chunk and error code it sees.
#[derive(Default)]
pub struct RecordingData {
	pub chunks: Mutex<Vec<Vec<u8>>>,
	pub errors: Mutex<Vec<i32>>,
}

impl DataListener for RecordingData {
	fn on_data(&self, data: &[u8]) {
		self.chunks.lock().unwrap().push(data.to_vec());
	}

	fn on_error(&self, code: i32) {
		self.errors.lock().unwrap().push(code);
	}
}

impl RecordingData {
	pub fn chunk_count(&self) -> usize {
		self.chunks.lock().unwrap().len()
	}
}

/// Records every line event it sees.
#[derive(Default)]
pub struct RecordingEvents {
	pub events: Mutex<Vec<LineEvents>>,
}

impl EventListener for RecordingEvents {
	fn on_event(&self, events: LineEvents) {
		self.events.lock().unwrap().push(events);
	}
}

impl RecordingEvents {
	pub fn event_count(&self) -> usize {
		self.events.lock().unwrap().len()
	}
}

/// Records hotplug events together with the port they concern.
#[derive(Default)]
pub struct RecordingMonitor {
	pub events: Mutex<Vec<(PortMonitorEvent, String)>>,
}

impl PortMonitorListener for RecordingMonitor {
	fn on_port_event(&self, event: PortMonitorEvent, port_name: &str) {
		self.events
			.lock()
			.unwrap()
			.push((event, port_name.to_owned()));
	}
}

/// A data listener that panics on its first callback and records from then
/// on.
#[derive(Default)]
pub struct PanickyData {
	pub calls: AtomicUsize,
}

impl DataListener for PanickyData {
	fn on_data(&self, _data: &[u8]) {
		if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
			panic!("listener under test panics on purpose");
		}
	}
}

/// Polls `cond` until it holds or two seconds pass.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
	let deadline = Instant::now() + Duration::from_secs(2);
	while !cond() {
		assert!(Instant::now() < deadline, "timed out waiting for {what}");
		thread::sleep(Duration::from_millis(5));
	}
}
