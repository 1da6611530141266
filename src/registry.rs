//! Handle bookkeeping for open ports.
//!
//! A [`HandleInfo`] exists for every open handle; the registry is the one
//! place that may create or destroy records. Lookups that feed uniqueness
//! decisions run under the same lock as the structural mutations, so no
//! caller ever observes a half-constructed record.

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::adapter::Handle;
use crate::dispatch::{DataListener, EventListener, Looper};

/// Per-open-port state.
pub(crate) struct HandleInfo {
	pub(crate) port_name: String,
	pub(crate) handle: Handle,
	pub(crate) exclusive: bool,
	pub(crate) data_listener: Option<Arc<dyn DataListener>>,
	pub(crate) event_listener: Option<Arc<dyn EventListener>>,
	pub(crate) looper: Option<Looper>,
}

impl HandleInfo {
	pub(crate) fn new(port_name: String, handle: Handle, exclusive: bool) -> HandleInfo {
		debug_assert!(!port_name.is_empty());
		debug_assert!(handle >= 0);
		HandleInfo {
			port_name,
			handle,
			exclusive,
			data_listener: None,
			event_listener: None,
			looper: None,
		}
	}

	pub(crate) fn has_listener(&self) -> bool {
		self.data_listener.is_some() || self.event_listener.is_some()
	}
}

impl fmt::Debug for HandleInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HandleInfo")
			.field("port_name", &self.port_name)
			.field("handle", &self.handle)
			.field("exclusive", &self.exclusive)
			.field("data_listener", &self.data_listener.is_some())
			.field("event_listener", &self.event_listener.is_some())
			.field("looper", &self.looper.is_some())
			.finish()
	}
}

/// Process-wide collection of [`HandleInfo`] records.
///
/// Cardinality is small (at most 1024 concurrent handles), so an ordered
/// vector with linear scans is deliberate.
pub(crate) struct PortRegistry {
	entries: Mutex<Vec<HandleInfo>>,
}

impl PortRegistry {
	pub(crate) fn new() -> PortRegistry {
		PortRegistry {
			entries: Mutex::new(Vec::new()),
		}
	}

	/// Acquires the registry lock. Every structural mutation and every scan
	/// that feeds one goes through this guard.
	pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<HandleInfo>> {
		self.entries.lock().unwrap()
	}
}

pub(crate) fn find_by_handle(entries: &[HandleInfo], handle: Handle) -> Option<usize> {
	entries.iter().position(|info| info.handle == handle)
}

pub(crate) fn contains_name(entries: &[HandleInfo], name: &str) -> bool {
	entries.iter().any(|info| info.port_name == name)
}

/// Locates a record by the identity of its data listener.
pub(crate) fn find_by_data_listener(
	entries: &[HandleInfo],
	listener: &Arc<dyn DataListener>,
) -> Option<usize> {
	entries.iter().position(|info| {
		info.data_listener
			.as_ref()
			.is_some_and(|held| Arc::ptr_eq(held, listener))
	})
}

/// Locates a record by the identity of its event listener.
pub(crate) fn find_by_event_listener(
	entries: &[HandleInfo],
	listener: &Arc<dyn EventListener>,
) -> Option<usize> {
	entries.iter().position(|info| {
		info.event_listener
			.as_ref()
			.is_some_and(|held| Arc::ptr_eq(held, listener))
	})
}
