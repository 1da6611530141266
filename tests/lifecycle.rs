//! Open/close lifecycle and registry ownership scenarios.

mod common;

use std::sync::Arc;

use common::{MockAdapter, RecordingData};
use portmux::{Error, SerialManager};

#[test]
fn open_close_happy_path() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());

	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();
	assert!(handle >= 0);
	manager.close(handle).unwrap();

	// The registry no longer knows the handle.
	assert_eq!(manager.close(handle), Err(Error::UnknownHandle(handle)));
}

#[test]
fn duplicate_exclusive_open_short_circuits() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());

	let first = manager.open("/dev/ttyUSB0", true, true, true).unwrap();
	assert!(first >= 0);
	assert_eq!(adapter.open_call_count(), 1);

	// Same process, same name: the sentinel comes back and the adapter is
	// never consulted.
	let second = manager.open("/dev/ttyUSB0", true, true, true).unwrap();
	assert_eq!(second, -1);
	assert_eq!(adapter.open_call_count(), 1);

	manager.close(first).unwrap();

	// Once the record is gone the port can be owned again.
	let third = manager.open("/dev/ttyUSB0", true, true, true).unwrap();
	assert!(third >= 0);
	assert_eq!(adapter.open_call_count(), 2);
}

#[test]
fn non_exclusive_opens_share_a_name() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());

	let first = manager.open("/dev/ttyUSB0", true, true, false).unwrap();
	let second = manager.open("/dev/ttyUSB0", true, true, false).unwrap();
	assert!(first >= 0 && second >= 0 && first != second);
}

#[test]
fn close_fails_while_listener_bound() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let listener: Arc<dyn portmux::DataListener> = Arc::new(RecordingData::default());
	manager
		.register_data_listener(handle, Arc::clone(&listener))
		.unwrap();

	assert_eq!(manager.close(handle), Err(Error::MustUnregisterData));

	// The record survived the refused close.
	manager.unregister_data_listener(&listener).unwrap();
	manager.close(handle).unwrap();
}

#[test]
fn close_keeps_record_when_adapter_fails() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	adapter.state.lock().unwrap().close_code = -5;
	assert!(matches!(manager.close(handle), Err(Error::Io { code: -5, .. })));

	// The handle is still registered, so a second attempt is not
	// UnknownHandle and succeeds once the adapter recovers.
	adapter.state.lock().unwrap().close_code = 0;
	manager.close(handle).unwrap();
}

#[test]
fn open_validations_fail_fast() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());

	assert_eq!(manager.open("", true, true, true), Err(Error::NullArg));
	assert!(matches!(
		manager.open("/dev/ttyUSB0", false, false, true),
		Err(Error::InvalidArg(_))
	));
	// Nothing above reached the adapter.
	assert_eq!(adapter.open_call_count(), 0);
}

#[test]
fn adapter_open_failure_is_an_io_error() {
	let adapter = MockAdapter::new();
	adapter.state.lock().unwrap().open_code = Some(-13);
	let manager = SerialManager::with_adapter(adapter.clone());

	assert_eq!(
		manager.open("/dev/ttyS0", true, true, true),
		Err(Error::Io {
			code: -13,
			message: "permission denied"
		})
	);
}

#[test]
fn list_ports_passes_through() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter);
	assert_eq!(manager.list_ports(), vec!["/dev/ttyUSB0", "/dev/ttyUSB1"]);
}

#[test]
fn control_operations_reach_the_adapter() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	manager.set_rts(handle, true).unwrap();
	manager.set_dtr(handle, false).unwrap();
	manager.clear_io_buffers(handle, true, true).unwrap();
	manager.clear_io_buffers(handle, false, false).unwrap();
	manager.send_break(handle, 250).unwrap();

	let state = adapter.state.lock().unwrap();
	assert_eq!(state.rts_calls, vec![(handle, true)]);
	assert_eq!(state.dtr_calls, vec![(handle, false)]);
	// The both-flags-false call never reached the adapter.
	assert_eq!(state.cleared, vec![(handle, true, true)]);
	assert_eq!(state.breaks, vec![(handle, 250)]);
}

#[test]
fn status_queries_check_the_registry_first() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());

	assert_eq!(manager.line_status(42), Err(Error::UnknownHandle(42)));
	assert_eq!(manager.interrupt_counts(42), Err(Error::UnknownHandle(42)));
	assert_eq!(
		manager.io_buffer_byte_counts(42),
		Err(Error::UnknownHandle(42))
	);

	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();
	adapter.state.lock().unwrap().line_status = [1, 0, 1, 0, 0, 1, 1];
	adapter.state.lock().unwrap().byte_counts = (17, 4);
	assert_eq!(manager.line_status(handle).unwrap(), [1, 0, 1, 0, 0, 1, 1]);
	assert_eq!(manager.io_buffer_byte_counts(handle).unwrap(), (17, 4));
}

#[test]
fn configuration_is_forwarded_with_wire_values() {
	use portmux::{BaudRate, DataBits, FlowControl, Parity, StopBits};

	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	manager
		.configure_data(
			handle,
			DataBits::Eight,
			StopBits::OneAndHalf,
			Parity::Even,
			BaudRate::B115200,
			0,
		)
		.unwrap();
	manager
		.configure_data(
			handle,
			DataBits::Seven,
			StopBits::One,
			Parity::None,
			BaudRate::Custom,
			1_234_567,
		)
		.unwrap();
	manager
		.configure_control(handle, FlowControl::Software, 0x11, 0x13, true, false)
		.unwrap();

	let state = adapter.state.lock().unwrap();
	assert_eq!(state.configured_data[0], (handle, 8, 4, 3, 115_200, 0));
	assert_eq!(state.configured_data[1], (handle, 7, 1, 1, 251, 1_234_567));
	assert_eq!(
		state.configured_control[0],
		(handle, 3, 0x11, 0x13, true, false)
	);
}

#[test]
fn custom_baud_needs_the_sentinel_and_a_rate() {
	use portmux::{BaudRate, DataBits, Parity, StopBits};

	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter);
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	assert!(matches!(
		manager.configure_data(
			handle,
			DataBits::Eight,
			StopBits::One,
			Parity::None,
			BaudRate::Custom,
			0
		),
		Err(Error::InvalidArg(_))
	));
	assert!(matches!(
		manager.configure_data(
			handle,
			DataBits::Eight,
			StopBits::One,
			Parity::None,
			BaudRate::B9600,
			1200
		),
		Err(Error::InvalidArg(_))
	));
}
