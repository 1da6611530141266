//! Hotplug monitoring of port add/remove events.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::adapter::{Handle, PortWatchMessage, SerialAdapter};
use crate::config::PortMonitorEvent;
use crate::error::{Error, Result};

/// Receives hotplug notifications for the port a handle was opened on.
pub trait PortMonitorListener: Send + Sync {
	fn on_port_event(&self, event: PortMonitorEvent, port_name: &str);
}

struct Watch {
	handle: Handle,
	port_name: String,
	tx: Sender<PortWatchMessage>,
	worker: Option<JoinHandle<()>>,
}

/// Registers and unregisters native port watches, one per handle.
pub(crate) struct HotplugMonitor {
	adapter: Arc<dyn SerialAdapter>,
	watches: Mutex<Vec<Watch>>,
}

impl HotplugMonitor {
	pub(crate) fn new(adapter: Arc<dyn SerialAdapter>) -> HotplugMonitor {
		HotplugMonitor {
			adapter,
			watches: Mutex::new(Vec::new()),
		}
	}

	/// Starts watching `port_name` on behalf of `handle`. The native watch
	/// is active when this returns.
	pub(crate) fn register(
		&self,
		handle: Handle,
		port_name: &str,
		listener: Arc<dyn PortMonitorListener>,
	) -> Result<()> {
		let mut watches = self.watches.lock().unwrap();
		if watches.iter().any(|watch| watch.handle == handle) {
			return Err(Error::invalid_arg(format!(
				"handle {handle} already has a port monitor"
			)));
		}

		let (tx, rx) = unbounded();
		let code = self.adapter.begin_port_watch(port_name, tx.clone());
		if code < 0 {
			return Err(Error::from_code(i64::from(code)));
		}

		let name = port_name.to_owned();
		let worker_name = name.clone();
		let worker = thread::Builder::new()
			.name(format!("portmux-watch-{handle}"))
			.spawn(move || run_watch(worker_name, listener, rx))
			.map_err(|_| {
				let _ = self.adapter.end_port_watch(port_name);
				Error::from_code(-12)
			})?;

		watches.push(Watch {
			handle,
			port_name: name,
			tx,
			worker: Some(worker),
		});
		Ok(())
	}

	/// Stops the watch registered for `handle`, joining the native watcher
	/// and the forwarding worker before returning.
	pub(crate) fn unregister(&self, handle: Handle) -> Result<()> {
		let mut watches = self.watches.lock().unwrap();
		let index = watches
			.iter()
			.position(|watch| watch.handle == handle)
			.ok_or(Error::UnknownListener)?;
		let mut watch = watches.remove(index);

		let code = self.adapter.end_port_watch(&watch.port_name);
		if code < 0 {
			warn!(
				"stopping port watch for {} failed with code {code}",
				watch.port_name
			);
		}
		let _ = watch.tx.send(PortWatchMessage::Shutdown);
		if let Some(worker) = watch.worker.take() {
			if worker.join().is_err() {
				error!("port watch worker terminated by panic");
			}
		}
		Ok(())
	}

	/// Whether `handle` currently has a watch. Used by close to tear down
	/// an abandoned monitor.
	pub(crate) fn is_watching(&self, handle: Handle) -> bool {
		self.watches
			.lock()
			.unwrap()
			.iter()
			.any(|watch| watch.handle == handle)
	}
}

fn run_watch(
	port_name: String,
	listener: Arc<dyn PortMonitorListener>,
	rx: Receiver<PortWatchMessage>,
) {
	while let Ok(message) = rx.recv() {
		match message {
			PortWatchMessage::Event(event) => listener.on_port_event(event, &port_name),
			PortWatchMessage::Shutdown => break,
		}
	}
}
