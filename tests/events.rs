//! Listener registration, mask filtering, pause/resume and ordering.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{wait_until, MockAdapter, PanickyData, RecordingData, RecordingEvents};
use portmux::adapter::Notification;
use portmux::{DataListener, Error, EventListener, LineEvents, SerialManager};

#[test]
fn data_listener_receives_chunks_in_order() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let recorder = Arc::new(RecordingData::default());
	let listener: Arc<dyn DataListener> = recorder.clone();
	manager
		.register_data_listener(handle, Arc::clone(&listener))
		.unwrap();
	assert!(adapter.delivery_active(handle));

	for index in 0..50u8 {
		adapter.inject(handle, Notification::Data(vec![index]));
	}
	wait_until("all chunks delivered", || recorder.chunk_count() == 50);

	let chunks = recorder.chunks.lock().unwrap().clone();
	let expected: Vec<Vec<u8>> = (0..50u8).map(|index| vec![index]).collect();
	assert_eq!(chunks, expected);

	manager.unregister_data_listener(&listener).unwrap();
	manager.close(handle).unwrap();
}

#[test]
fn second_data_listener_is_refused() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter);
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let first: Arc<dyn DataListener> = Arc::new(RecordingData::default());
	let second: Arc<dyn DataListener> = Arc::new(RecordingData::default());
	manager
		.register_data_listener(handle, Arc::clone(&first))
		.unwrap();
	assert_eq!(
		manager.register_data_listener(handle, second),
		Err(Error::AlreadyHasDataListener)
	);
	manager.unregister_data_listener(&first).unwrap();
}

#[test]
fn unregister_stops_delivery() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let recorder = Arc::new(RecordingData::default());
	let listener: Arc<dyn DataListener> = recorder.clone();
	manager
		.register_data_listener(handle, Arc::clone(&listener))
		.unwrap();

	adapter.inject(handle, Notification::Data(vec![1]));
	wait_until("first chunk delivered", || recorder.chunk_count() == 1);

	manager.unregister_data_listener(&listener).unwrap();

	// Teardown released the adapter's sink, so nothing can be delivered
	// for this listener anymore.
	assert!(!adapter.delivery_active(handle));
	assert_eq!(recorder.chunk_count(), 1);

	// Unregistering again is a harmless no-op.
	manager.unregister_data_listener(&listener).unwrap();
	manager.close(handle).unwrap();
}

#[test]
fn unknown_handle_and_listener_are_rejected() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter);

	let data: Arc<dyn DataListener> = Arc::new(RecordingData::default());
	assert_eq!(
		manager.register_data_listener(42, data),
		Err(Error::UnknownHandle(42))
	);

	let events: Arc<dyn EventListener> = Arc::new(RecordingEvents::default());
	assert_eq!(
		manager.pause_listening_events(&events),
		Err(Error::UnknownListener)
	);
	assert_eq!(manager.get_event_mask(&events), Err(Error::UnknownListener));
}

#[test]
fn event_mask_filters_deliveries() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let recorder = Arc::new(RecordingEvents::default());
	let listener: Arc<dyn EventListener> = recorder.clone();
	manager
		.register_event_listener(handle, Arc::clone(&listener))
		.unwrap();

	// A fresh listener hears everything.
	assert_eq!(manager.get_event_mask(&listener).unwrap(), LineEvents::all());

	manager
		.set_event_mask(&listener, LineEvents::CTS | LineEvents::DCD)
		.unwrap();

	// DSR alone is filtered out entirely.
	adapter.inject(handle, Notification::Event(LineEvents::DSR.bits()));
	// CTS+DSR passes, trimmed to the mask.
	adapter.inject(
		handle,
		Notification::Event((LineEvents::CTS | LineEvents::DSR).bits()),
	);
	wait_until("filtered event delivered", || recorder.event_count() == 1);

	assert_eq!(recorder.events.lock().unwrap()[0], LineEvents::CTS);

	manager.unregister_event_listener(&listener).unwrap();
	manager.close(handle).unwrap();
}

#[test]
fn pause_discards_and_resume_delivers_again() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let recorder = Arc::new(RecordingEvents::default());
	let listener: Arc<dyn EventListener> = recorder.clone();
	manager
		.register_event_listener(handle, Arc::clone(&listener))
		.unwrap();

	manager.pause_listening_events(&listener).unwrap();
	for _ in 0..3 {
		adapter.inject(handle, Notification::Event(LineEvents::CTS.bits()));
	}
	// Give the looper time to drain (and discard) the paused events.
	thread::sleep(Duration::from_millis(200));
	manager.resume_listening_events(&listener).unwrap();

	adapter.inject(handle, Notification::Event(LineEvents::RI.bits()));
	wait_until("post-resume event delivered", || recorder.event_count() == 1);

	// Exactly the post-resume event; nothing buffered fired on resume.
	assert_eq!(recorder.events.lock().unwrap().clone(), vec![LineEvents::RI]);

	manager.unregister_event_listener(&listener).unwrap();
	manager.close(handle).unwrap();
}

#[test]
fn one_looper_serves_both_listeners() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let data = Arc::new(RecordingData::default());
	let data_listener: Arc<dyn DataListener> = data.clone();
	let events = Arc::new(RecordingEvents::default());
	let event_listener: Arc<dyn EventListener> = events.clone();

	manager
		.register_data_listener(handle, Arc::clone(&data_listener))
		.unwrap();
	manager
		.register_event_listener(handle, Arc::clone(&event_listener))
		.unwrap();

	adapter.inject(handle, Notification::Data(vec![9]));
	adapter.inject(handle, Notification::Event(LineEvents::CTS.bits()));
	wait_until("both kinds delivered", || {
		data.chunk_count() == 1 && events.event_count() == 1
	});

	// Dropping only the data listener keeps event delivery alive.
	manager.unregister_data_listener(&data_listener).unwrap();
	assert!(adapter.delivery_active(handle));
	adapter.inject(handle, Notification::Event(LineEvents::DSR.bits()));
	wait_until("event after data unregister", || events.event_count() == 2);

	manager.unregister_event_listener(&event_listener).unwrap();
	assert!(!adapter.delivery_active(handle));
	manager.close(handle).unwrap();
}

#[test]
fn device_errors_reach_the_data_listener() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let recorder = Arc::new(RecordingData::default());
	let listener: Arc<dyn DataListener> = recorder.clone();
	manager
		.register_data_listener(handle, Arc::clone(&listener))
		.unwrap();

	adapter.inject(handle, Notification::Error(-19));
	wait_until("error delivered", || {
		recorder.errors.lock().unwrap().len() == 1
	});
	assert_eq!(recorder.errors.lock().unwrap().clone(), vec![-19]);

	manager.unregister_data_listener(&listener).unwrap();
	manager.close(handle).unwrap();
}

#[test]
fn panicking_listener_does_not_kill_the_looper() {
	let adapter = MockAdapter::new();
	let manager = SerialManager::with_adapter(adapter.clone());
	let handle = manager.open("/dev/ttyUSB0", true, true, true).unwrap();

	let panicky = Arc::new(PanickyData::default());
	let listener: Arc<dyn DataListener> = panicky.clone();
	manager
		.register_data_listener(handle, Arc::clone(&listener))
		.unwrap();

	adapter.inject(handle, Notification::Data(vec![1]));
	adapter.inject(handle, Notification::Data(vec![2]));
	wait_until("second chunk after panic", || {
		panicky.calls.load(std::sync::atomic::Ordering::SeqCst) == 2
	});

	// The looper survived and unregistration still joins cleanly.
	manager.unregister_data_listener(&listener).unwrap();
	manager.close(handle).unwrap();
}
