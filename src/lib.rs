//! portmux is a cross-platform serial port library.
//!
//! It gives application code uniform access to UART-style serial ports on
//! Linux, Windows, macOS and Solaris: opening with access and exclusivity
//! semantics, framing and flow-control configuration, blocking byte I/O
//! with endianness-aware helpers, modem-line control, asynchronous data and
//! line-event listeners with mask filtering and pause/resume, hotplug
//! monitoring, and XMODEM file transfer. A sibling façade covers raw
//! USB/Bluetooth HID devices.
//!
//! All platform divergence lives below the [`adapter::SerialAdapter`]
//! contract; [`SerialManager::new`] wires up the native adapter of the
//! current platform, while [`SerialManager::with_adapter`] accepts any
//! other implementation (virtual ports, test doubles).

#![warn(rust_2018_idioms)]

#[macro_use]
extern crate log;

use std::sync::atomic::{AtomicBool, Ordering};

pub mod adapter;
pub mod config;
mod dispatch;
mod error;
pub mod hid;
pub mod io;
mod manager;
mod monitor;
mod registry;
mod sys;
mod xfer;

pub use crate::adapter::Handle;
pub use crate::config::{
	os_type, BaudRate, DataBits, Endianness, FlowControl, IntWidth, LineEvents, OsType, Parity,
	PortMonitorEvent, StopBits, TransferProtocol, DEFAULT_READ_SIZE,
};
pub use crate::dispatch::{DataListener, EventListener};
pub use crate::error::{describe_error, Error, Result};
pub use crate::manager::SerialManager;
pub use crate::monitor::PortMonitorListener;

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Toggles verbose diagnostics of the façade and the native adapters.
///
/// The flag is process-wide; the messages themselves still go through the
/// `log` façade at debug level.
pub fn set_debug(enabled: bool) {
	DEBUG.store(enabled, Ordering::SeqCst);
}

pub(crate) fn debug_enabled() -> bool {
	DEBUG.load(Ordering::SeqCst)
}
