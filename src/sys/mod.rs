//! Platform adapters implementing the native serial contract.

use std::sync::Arc;

use crate::adapter::SerialAdapter;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

/// The native adapter of this platform.
pub(crate) fn native_adapter() -> Arc<dyn SerialAdapter> {
	#[cfg(unix)]
	{
		Arc::new(unix::PosixAdapter::new())
	}
	#[cfg(windows)]
	{
		Arc::new(windows::Win32Adapter::new())
	}
}
