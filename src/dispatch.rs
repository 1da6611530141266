//! Looper workers and the dispatcher that owns them.
//!
//! One looper serves a handle's data listener and event listener at the
//! same time. The worker drains a channel fed by the native adapter,
//! filters line events against the handle's mask, and invokes the listener
//! callbacks. Pause drops notifications after the mask stage instead of
//! buffering them, so nothing is replayed on resume.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::adapter::{Handle, Notification, SerialAdapter};
use crate::config::LineEvents;
use crate::error::{Error, Result};

/// Receives bytes and device-side errors for one handle.
pub trait DataListener: Send + Sync {
	/// Called with every chunk the adapter produced, in production order.
	fn on_data(&self, data: &[u8]);

	/// Called when the adapter reports a failure for the handle.
	fn on_error(&self, _code: i32) {}
}

/// Receives mask-filtered line events for one handle.
pub trait EventListener: Send + Sync {
	fn on_event(&self, events: LineEvents);
}

/// State shared between a looper worker and the structural operations.
pub(crate) struct LooperShared {
	mask: AtomicU32,
	paused: AtomicBool,
	alive: AtomicBool,
	data_listener: Mutex<Option<Arc<dyn DataListener>>>,
	event_listener: Mutex<Option<Arc<dyn EventListener>>>,
}

impl LooperShared {
	fn new() -> LooperShared {
		LooperShared {
			mask: AtomicU32::new(LineEvents::all().bits()),
			paused: AtomicBool::new(false),
			alive: AtomicBool::new(true),
			data_listener: Mutex::new(None),
			event_listener: Mutex::new(None),
		}
	}

	pub(crate) fn set_data_listener(&self, listener: Option<Arc<dyn DataListener>>) {
		*self.data_listener.lock().unwrap() = listener;
	}

	pub(crate) fn set_event_listener(&self, listener: Option<Arc<dyn EventListener>>) {
		*self.event_listener.lock().unwrap() = listener;
	}

	pub(crate) fn set_mask(&self, mask: LineEvents) {
		self.mask.store(mask.bits(), Ordering::SeqCst);
	}

	pub(crate) fn mask(&self) -> LineEvents {
		LineEvents::from_bits_truncate(self.mask.load(Ordering::SeqCst))
	}

	pub(crate) fn set_paused(&self, paused: bool) {
		self.paused.store(paused, Ordering::SeqCst);
	}
}

/// A background worker delivering adapter notifications to listeners.
pub(crate) struct Looper {
	pub(crate) shared: Arc<LooperShared>,
	tx: Sender<Notification>,
	worker: Option<JoinHandle<()>>,
}

impl Looper {
	/// Stops the worker and joins it. Idempotent.
	fn stop(&mut self) {
		self.shared.alive.store(false, Ordering::SeqCst);
		// The sentinel wakes a worker blocked on an empty channel.
		let _ = self.tx.send(Notification::Shutdown);
		if let Some(worker) = self.worker.take() {
			if worker.join().is_err() {
				error!("looper worker terminated by panic");
			}
		}
	}
}

impl Drop for Looper {
	fn drop(&mut self) {
		if self.worker.is_some() {
			self.stop();
		}
	}
}

/// Creates and destroys the loopers of all open handles.
#[derive(Debug)]
pub(crate) struct Dispatcher {
	adapter: Arc<dyn SerialAdapter>,
}

impl Dispatcher {
	pub(crate) fn new(adapter: Arc<dyn SerialAdapter>) -> Dispatcher {
		Dispatcher { adapter }
	}

	/// Allocates looper state, activates adapter delivery and spawns the
	/// worker. Delivery is live when this returns.
	pub(crate) fn create_looper(&self, handle: Handle) -> Result<Looper> {
		let (tx, rx) = unbounded();
		let shared = Arc::new(LooperShared::new());

		let code = self.adapter.begin_delivery(handle, tx.clone());
		if code < 0 {
			return Err(Error::from_code(i64::from(code)));
		}

		let worker_shared = Arc::clone(&shared);
		let worker = thread::Builder::new()
			.name(format!("portmux-looper-{handle}"))
			.spawn(move || run_looper(handle, worker_shared, rx))
			.map_err(|_| {
				let _ = self.adapter.end_delivery(handle);
				Error::from_code(-12)
			})?;

		Ok(Looper {
			shared,
			tx,
			worker: Some(worker),
		})
	}

	/// Tears a looper down: marks it dead, stops adapter delivery and joins
	/// the worker before returning.
	pub(crate) fn destroy_looper(&self, handle: Handle, mut looper: Looper) {
		looper.shared.alive.store(false, Ordering::SeqCst);
		let code = self.adapter.end_delivery(handle);
		if code < 0 {
			warn!("stopping delivery for handle {handle} failed with code {code}");
		}
		looper.stop();
	}
}

/// Applies the mask to raw event bits; `None` means drop.
fn filter_event(bits: u32, mask: LineEvents) -> Option<LineEvents> {
	let filtered = LineEvents::from_bits_truncate(bits) & mask;
	if filtered.is_empty() {
		None
	} else {
		Some(filtered)
	}
}

fn run_looper(handle: Handle, shared: Arc<LooperShared>, rx: Receiver<Notification>) {
	while let Ok(notification) = rx.recv() {
		if !shared.alive.load(Ordering::SeqCst) {
			break;
		}
		if let Notification::Shutdown = notification {
			break;
		}
		if shared.paused.load(Ordering::SeqCst) {
			continue;
		}

		match notification {
			Notification::Data(bytes) => {
				let listener = shared.data_listener.lock().unwrap().clone();
				if let Some(listener) = listener {
					invoke(handle, "data", || listener.on_data(&bytes));
				}
			}
			Notification::Event(bits) => {
				if let Some(events) = filter_event(bits, shared.mask()) {
					let listener = shared.event_listener.lock().unwrap().clone();
					if let Some(listener) = listener {
						invoke(handle, "event", || listener.on_event(events));
					}
				}
			}
			Notification::Error(code) => {
				let listener = shared.data_listener.lock().unwrap().clone();
				if let Some(listener) = listener {
					invoke(handle, "error", || listener.on_error(code));
				}
			}
			Notification::Shutdown => unreachable!(),
		}
	}
}

/// Runs a listener callback, containing panics so a misbehaving listener
/// cannot take its looper down.
fn invoke(handle: Handle, what: &str, callback: impl FnOnce()) {
	if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
		warn!("{what} listener for handle {handle} panicked; looper continues");
	}
}
