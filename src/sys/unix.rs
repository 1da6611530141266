//! POSIX implementation of the native serial adapter.
//!
//! Handles are the raw file descriptors. Ports are opened non-blocking with
//! `O_NOCTTY`; exclusivity combines an advisory `flock` with `TIOCEXCL` so
//! both cooperating and uncooperative processes are kept out. Event
//! delivery runs one poll thread per handle which forwards received bytes
//! and modem-line transitions into the dispatcher's channel.

use std::fs;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FlockArg, OFlag};
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::stat::Mode;
use nix::sys::termios::{
	cfmakeraw, cfsetispeed, cfsetospeed, tcgetattr, tcsetattr, BaudRate as TermiosBaud,
	ControlFlags, FlushArg, InputFlags, SetArg, SpecialCharacterIndices,
};
use nix::unistd;

use crate::adapter::{Handle, Notification, PortWatchMessage, ReadOutcome, SerialAdapter};
use crate::config::{LineEvents, PortMonitorEvent};

// Ioctls nix does not wrap as functions.
mod raw {
	use nix::libc;
	use nix::{ioctl_none_bad, ioctl_read_bad, ioctl_write_ptr_bad};

	ioctl_none_bad!(tiocexcl, libc::TIOCEXCL);
	ioctl_none_bad!(tiocsbrk, libc::TIOCSBRK);
	ioctl_none_bad!(tioccbrk, libc::TIOCCBRK);
	ioctl_read_bad!(tiocmget, libc::TIOCMGET, libc::c_int);
	ioctl_write_ptr_bad!(tiocmbis, libc::TIOCMBIS, libc::c_int);
	ioctl_write_ptr_bad!(tiocmbic, libc::TIOCMBIC, libc::c_int);
	ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);
	ioctl_read_bad!(tiocoutq, libc::TIOCOUTQ, libc::c_int);
}

#[cfg(target_os = "linux")]
const TIOCGICOUNT: libc::c_ulong = 0x545d;

/// Mirrors the kernel's `serial_icounter_struct`.
#[cfg(target_os = "linux")]
#[repr(C)]
#[derive(Default)]
struct SerialIcounter {
	cts: libc::c_int,
	dsr: libc::c_int,
	rng: libc::c_int,
	dcd: libc::c_int,
	rx: libc::c_int,
	tx: libc::c_int,
	frame: libc::c_int,
	overrun: libc::c_int,
	parity: libc::c_int,
	brk: libc::c_int,
	buf_overrun: libc::c_int,
	reserved: [libc::c_int; 9],
}

#[derive(Debug)]
struct OpenPort {
	handle: Handle,
	fd: RawFd,
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

/// The termios-based adapter used on Linux, macOS and Solaris.
#[derive(Debug)]
pub(crate) struct PosixAdapter {
	ports: Mutex<Vec<OpenPort>>,
	deliveries: Mutex<Vec<Delivery>>,
	watches: Mutex<Vec<Watch>>,
}

impl PosixAdapter {
	pub(crate) fn new() -> PosixAdapter {
		PosixAdapter {
			ports: Mutex::new(Vec::new()),
			deliveries: Mutex::new(Vec::new()),
			watches: Mutex::new(Vec::new()),
		}
	}

	fn fd_of(&self, handle: Handle) -> Result<RawFd, i32> {
		self.ports
			.lock()
			.unwrap()
			.iter()
			.find(|port| port.handle == handle)
			.map(|port| port.fd)
			.ok_or(-libc::EBADF)
	}
}

fn last_errno() -> i32 {
	Errno::last() as i32
}

fn device_prefixes() -> &'static [&'static str] {
	#[cfg(target_os = "linux")]
	{
		&["ttyS", "ttyUSB", "ttyACM", "ttyAMA", "rfcomm"]
	}
	#[cfg(any(target_os = "macos", target_os = "ios"))]
	{
		&["cu.", "tty."]
	}
	#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
	{
		&["cua", "term"]
	}
}

impl SerialAdapter for PosixAdapter {
	fn list_ports(&self) -> Vec<String> {
		let mut ports = Vec::new();
		if let Ok(entries) = fs::read_dir("/dev") {
			for entry in entries.flatten() {
				let name = entry.file_name();
				let name = name.to_string_lossy();
				if device_prefixes()
					.iter()
					.any(|prefix| name.starts_with(prefix) && name.len() > prefix.len())
				{
					ports.push(format!("/dev/{name}"));
				}
			}
		}
		ports.sort();
		ports
	}

	fn open(&self, name: &str, read: bool, write: bool, exclusive: bool) -> Handle {
		let access = match (read, write) {
			(true, true) => OFlag::O_RDWR,
			(true, false) => OFlag::O_RDONLY,
			(false, true) => OFlag::O_WRONLY,
			(false, false) => return i64::from(-libc::EINVAL),
		};
		let fd = match fcntl::open(
			Path::new(name),
			access | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
			Mode::empty(),
		) {
			Ok(fd) => fd,
			Err(errno) => return -(errno as i64),
		};

		if exclusive {
			// Solaris has no flock; TIOCEXCL alone carries the claim there.
			#[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
			if let Err(errno) = fcntl::flock(fd, FlockArg::LockExclusiveNonblock) {
				let _ = unistd::close(fd);
				let errno = if errno == Errno::EWOULDBLOCK {
					Errno::EBUSY
				} else {
					errno
				};
				return -(errno as i64);
			}
			if unsafe { raw::tiocexcl(fd) }.is_err() {
				let _ = unistd::close(fd);
				return i64::from(-last_errno());
			}
		}

		// Raw 9600 8N1 baseline; the configurator refines it later.
		let mut termios = match tcgetattr(fd) {
			Ok(termios) => termios,
			Err(errno) => {
				let _ = unistd::close(fd);
				return -(errno as i64);
			}
		};
		cfmakeraw(&mut termios);
		termios.control_flags |= ControlFlags::CREAD | ControlFlags::CLOCAL;
		termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
		termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
		let _ = cfsetispeed(&mut termios, TermiosBaud::B9600);
		let _ = cfsetospeed(&mut termios, TermiosBaud::B9600);
		if let Err(errno) = tcsetattr(fd, SetArg::TCSANOW, &termios) {
			let _ = unistd::close(fd);
			return -(errno as i64);
		}

		self.ports.lock().unwrap().push(OpenPort {
			handle: i64::from(fd),
			fd,
		});
		if crate::debug_enabled() {
			debug!("native open of {name} produced fd {fd}");
		}
		i64::from(fd)
	}

	fn close(&self, handle: Handle) -> i32 {
		let mut ports = self.ports.lock().unwrap();
		let Some(index) = ports.iter().position(|port| port.handle == handle) else {
			return -libc::EBADF;
		};
		let fd = ports[index].fd;
		match unistd::close(fd) {
			Ok(()) => {
				ports.remove(index);
				0
			}
			Err(errno) => -(errno as i32),
		}
	}

	fn read(&self, handle: Handle, count: usize) -> ReadOutcome {
		let fd = match self.fd_of(handle) {
			Ok(fd) => fd,
			Err(code) => return ReadOutcome::Err(code),
		};
		let mut buf = vec![0u8; count];
		loop {
			match unistd::read(fd, &mut buf) {
				Ok(0) => return ReadOutcome::Eof,
				Ok(n) => {
					buf.truncate(n);
					return ReadOutcome::Data(buf);
				}
				Err(Errno::EAGAIN) => return ReadOutcome::NoData,
				Err(Errno::EINTR) => {}
				Err(errno) => return ReadOutcome::Err(-(errno as i32)),
			}
		}
	}

	fn write(&self, handle: Handle, buf: &[u8], delay_ms: u32) -> i64 {
		let fd = match self.fd_of(handle) {
			Ok(fd) => fd,
			Err(code) => return i64::from(code),
		};
		if delay_ms == 0 {
			match write_all(fd, buf) {
				Ok(()) => buf.len() as i64,
				Err(code) => i64::from(code),
			}
		} else {
			for (index, byte) in buf.iter().enumerate() {
				if index != 0 {
					thread::sleep(Duration::from_millis(u64::from(delay_ms)));
				}
				if let Err(code) = write_all(fd, std::slice::from_ref(byte)) {
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
		let fd = match self.fd_of(handle) {
			Ok(fd) => fd,
			Err(code) => return code,
		};
		let mut termios = match tcgetattr(fd) {
			Ok(termios) => termios,
			Err(errno) => return -(errno as i32),
		};

		termios.control_flags &= !ControlFlags::CSIZE;
		termios.control_flags |= match data_bits {
			5 => ControlFlags::CS5,
			6 => ControlFlags::CS6,
			7 => ControlFlags::CS7,
			8 => ControlFlags::CS8,
			_ => return -libc::EINVAL,
		};

		match stop_bits {
			1 => termios.control_flags &= !ControlFlags::CSTOPB,
			2 => termios.control_flags |= ControlFlags::CSTOPB,
			// termios has no 1.5 stop bits.
			4 => return -libc::EOPNOTSUPP,
			_ => return -libc::EINVAL,
		}

		if let Some(code) = apply_parity(&mut termios, parity) {
			return code;
		}

		let needs_custom = baud == 251;
		if !needs_custom {
			let Some(speed) = map_baud(baud) else {
				return -libc::EINVAL;
			};
			if let Err(errno) = cfsetispeed(&mut termios, speed) {
				return -(errno as i32);
			}
			if let Err(errno) = cfsetospeed(&mut termios, speed) {
				return -(errno as i32);
			}
		}
		if let Err(errno) = tcsetattr(fd, SetArg::TCSANOW, &termios) {
			return -(errno as i32);
		}
		if needs_custom {
			return set_custom_baud(fd, custom_baud);
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
		let fd = match self.fd_of(handle) {
			Ok(fd) => fd,
			Err(code) => return code,
		};
		let mut termios = match tcgetattr(fd) {
			Ok(termios) => termios,
			Err(errno) => return -(errno as i32),
		};

		termios.control_flags &= !ControlFlags::CRTSCTS;
		termios.input_flags &= !(InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY);
		match flow {
			1 => {}
			2 => termios.control_flags |= ControlFlags::CRTSCTS,
			3 => {
				termios.input_flags |= InputFlags::IXON | InputFlags::IXOFF;
				termios.control_chars[SpecialCharacterIndices::VSTART as usize] = xon;
				termios.control_chars[SpecialCharacterIndices::VSTOP as usize] = xoff;
			}
			_ => return -libc::EINVAL,
		}

		termios.input_flags &= !(InputFlags::INPCK | InputFlags::IGNPAR | InputFlags::PARMRK);
		if parity_error_check {
			termios.input_flags |= InputFlags::INPCK;
		} else {
			termios.input_flags |= InputFlags::IGNPAR;
		}
		if overflow_error_check {
			// No termios knob reports receive overruns; the interrupt
			// counters carry them instead.
			debug!("overflow error reporting is counter-based on POSIX");
		}

		match tcsetattr(fd, SetArg::TCSANOW, &termios) {
			Ok(()) => 0,
			Err(errno) => -(errno as i32),
		}
	}

	fn current_configuration(&self, handle: Handle) -> Result<Vec<String>, i32> {
		let fd = self.fd_of(handle)?;
		let mut raw: libc::termios = unsafe { std::mem::zeroed() };
		if unsafe { libc::tcgetattr(fd, &mut raw) } < 0 {
			return Err(-last_errno());
		}

		let mut fields = Vec::with_capacity(24);
		fields.push(raw.c_iflag.to_string());
		fields.push(raw.c_oflag.to_string());
		fields.push(raw.c_cflag.to_string());
		fields.push(raw.c_lflag.to_string());
		#[cfg(any(target_os = "linux", target_os = "android"))]
		fields.push(raw.c_line.to_string());
		#[cfg(not(any(target_os = "linux", target_os = "android")))]
		fields.push("0".to_string());
		for cc in raw.c_cc.iter().take(17) {
			fields.push(cc.to_string());
		}
		fields.push(unsafe { libc::cfgetispeed(&raw) }.to_string());
		fields.push(unsafe { libc::cfgetospeed(&raw) }.to_string());
		Ok(fields)
	}

	fn set_rts(&self, handle: Handle, asserted: bool) -> i32 {
		self.fd_of(handle)
			.map_or_else(|code| code, |fd| set_modem_bit(fd, libc::TIOCM_RTS, asserted))
	}

	fn set_dtr(&self, handle: Handle, asserted: bool) -> i32 {
		self.fd_of(handle)
			.map_or_else(|code| code, |fd| set_modem_bit(fd, libc::TIOCM_DTR, asserted))
	}

	fn line_status(&self, handle: Handle) -> Result<[i32; 7], i32> {
		let fd = self.fd_of(handle)?;
		let bits = modem_bits(fd)?;
		let is_set = |bit: libc::c_int| i32::from(bits & bit != 0);
		Ok([
			is_set(libc::TIOCM_CTS),
			is_set(libc::TIOCM_DSR),
			is_set(libc::TIOCM_CAR),
			is_set(libc::TIOCM_RNG),
			// No portable loopback indication.
			0,
			is_set(libc::TIOCM_RTS),
			is_set(libc::TIOCM_DTR),
		])
	}

	#[cfg(target_os = "linux")]
	fn interrupt_counts(&self, handle: Handle) -> Result<[i32; 11], i32> {
		let fd = self.fd_of(handle)?;
		let mut counts = SerialIcounter::default();
		if unsafe { libc::ioctl(fd, TIOCGICOUNT as _, &mut counts) } < 0 {
			return Err(-last_errno());
		}
		Ok([
			counts.cts,
			counts.dsr,
			counts.rng,
			counts.dcd,
			counts.rx,
			counts.tx,
			counts.frame,
			counts.overrun,
			counts.parity,
			counts.brk,
			counts.buf_overrun,
		])
	}

	#[cfg(not(target_os = "linux"))]
	fn interrupt_counts(&self, _handle: Handle) -> Result<[i32; 11], i32> {
		Err(-libc::EOPNOTSUPP)
	}

	fn byte_counts(&self, handle: Handle) -> Result<(i32, i32), i32> {
		let fd = self.fd_of(handle)?;
		let mut rx: libc::c_int = 0;
		let mut tx: libc::c_int = 0;
		if unsafe { raw::fionread(fd, &mut rx) }.is_err() {
			return Err(-last_errno());
		}
		if unsafe { raw::tiocoutq(fd, &mut tx) }.is_err() {
			return Err(-last_errno());
		}
		Ok((rx, tx))
	}

	fn clear_buffers(&self, handle: Handle, rx: bool, tx: bool) -> i32 {
		let fd = match self.fd_of(handle) {
			Ok(fd) => fd,
			Err(code) => return code,
		};
		let action = match (rx, tx) {
			(true, true) => FlushArg::TCIOFLUSH,
			(true, false) => FlushArg::TCIFLUSH,
			(false, true) => FlushArg::TCOFLUSH,
			(false, false) => return 0,
		};
		match nix::sys::termios::tcflush(fd, action) {
			Ok(()) => 0,
			Err(errno) => -(errno as i32),
		}
	}

	fn send_break(&self, handle: Handle, duration_ms: u32) -> i32 {
		let fd = match self.fd_of(handle) {
			Ok(fd) => fd,
			Err(code) => return code,
		};
		if unsafe { raw::tiocsbrk(fd) }.is_err() {
			return -last_errno();
		}
		thread::sleep(Duration::from_millis(u64::from(duration_ms.max(1))));
		if unsafe { raw::tioccbrk(fd) }.is_err() {
			return -last_errno();
		}
		0
	}

	fn set_min_data_length(&self, handle: Handle, len: i32) -> i32 {
		let fd = match self.fd_of(handle) {
			Ok(fd) => fd,
			Err(code) => return code,
		};
		let mut termios = match tcgetattr(fd) {
			Ok(termios) => termios,
			Err(errno) => return -(errno as i32),
		};
		termios.control_chars[SpecialCharacterIndices::VMIN as usize] = len.clamp(0, 255) as u8;
		if let Err(errno) = tcsetattr(fd, SetArg::TCSANOW, &termios) {
			return -(errno as i32);
		}
		// VMIN only acts on a blocking descriptor.
		let flags = if len > 0 {
			OFlag::empty()
		} else {
			OFlag::O_NONBLOCK
		};
		match fcntl::fcntl(fd, FcntlArg::F_SETFL(flags)) {
			Ok(_) => 0,
			Err(errno) => -(errno as i32),
		}
	}

	fn begin_delivery(&self, handle: Handle, sink: Sender<Notification>) -> i32 {
		let fd = match self.fd_of(handle) {
			Ok(fd) => fd,
			Err(code) => return code,
		};
		let mut deliveries = self.deliveries.lock().unwrap();
		if deliveries.iter().any(|delivery| delivery.handle == handle) {
			return -libc::EBUSY;
		}
		let alive = Arc::new(AtomicBool::new(true));
		let worker_alive = Arc::clone(&alive);
		let worker = match thread::Builder::new()
			.name(format!("portmux-poll-{handle}"))
			.spawn(move || delivery_loop(fd, sink, worker_alive))
		{
			Ok(worker) => worker,
			Err(_) => return -libc::ENOMEM,
		};
		deliveries.push(Delivery {
			handle,
			alive,
			worker: Some(worker),
		});
		0
	}

	fn end_delivery(&self, handle: Handle) -> i32 {
		let mut deliveries = self.deliveries.lock().unwrap();
		let Some(index) = deliveries
			.iter()
			.position(|delivery| delivery.handle == handle)
		else {
			return 0;
		};
		let mut delivery = deliveries.remove(index);
		delivery.alive.store(false, Ordering::SeqCst);
		if let Some(worker) = delivery.worker.take() {
			let _ = worker.join();
		}
		0
	}

	fn begin_port_watch(&self, name: &str, sink: Sender<PortWatchMessage>) -> i32 {
		let mut watches = self.watches.lock().unwrap();
		if watches.iter().any(|watch| watch.port_name == name) {
			return -libc::EBUSY;
		}
		let alive = Arc::new(AtomicBool::new(true));
		let worker_alive = Arc::clone(&alive);
		let path = name.to_owned();
		let worker = match thread::Builder::new()
			.name("portmux-hotplug".to_owned())
			.spawn(move || watch_loop(path, sink, worker_alive))
		{
			Ok(worker) => worker,
			Err(_) => return -libc::ENOMEM,
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

fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<(), i32> {
	while !buf.is_empty() {
		match unistd::write(fd, buf) {
			Ok(n) => buf = &buf[n..],
			Err(Errno::EAGAIN) => {
				// Transmit queue is full; wait for room.
				let mut fds = [PollFd::new(fd, PollFlags::POLLOUT)];
				match poll(&mut fds, 100) {
					Ok(_) | Err(Errno::EINTR) => {}
					Err(errno) => return Err(-(errno as i32)),
				}
			}
			Err(Errno::EINTR) => {}
			Err(errno) => return Err(-(errno as i32)),
		}
	}
	Ok(())
}

fn apply_parity(termios: &mut nix::sys::termios::Termios, parity: u8) -> Option<i32> {
	termios.control_flags &= !(ControlFlags::PARENB | ControlFlags::PARODD);
	#[cfg(any(target_os = "linux", target_os = "android"))]
	{
		termios.control_flags &= !ControlFlags::CMSPAR;
	}
	match parity {
		1 => {}
		2 => termios.control_flags |= ControlFlags::PARENB | ControlFlags::PARODD,
		3 => termios.control_flags |= ControlFlags::PARENB,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		4 => {
			termios.control_flags |=
				ControlFlags::PARENB | ControlFlags::CMSPAR | ControlFlags::PARODD;
		}
		#[cfg(any(target_os = "linux", target_os = "android"))]
		5 => termios.control_flags |= ControlFlags::PARENB | ControlFlags::CMSPAR,
		#[cfg(not(any(target_os = "linux", target_os = "android")))]
		4 | 5 => return Some(-libc::EOPNOTSUPP),
		_ => return Some(-libc::EINVAL),
	}
	None
}

fn map_baud(value: u32) -> Option<TermiosBaud> {
	Some(match value {
		0 => TermiosBaud::B0,
		50 => TermiosBaud::B50,
		75 => TermiosBaud::B75,
		110 => TermiosBaud::B110,
		134 => TermiosBaud::B134,
		150 => TermiosBaud::B150,
		200 => TermiosBaud::B200,
		300 => TermiosBaud::B300,
		600 => TermiosBaud::B600,
		1200 => TermiosBaud::B1200,
		1800 => TermiosBaud::B1800,
		2400 => TermiosBaud::B2400,
		4800 => TermiosBaud::B4800,
		9600 => TermiosBaud::B9600,
		19200 => TermiosBaud::B19200,
		38400 => TermiosBaud::B38400,
		57600 => TermiosBaud::B57600,
		115200 => TermiosBaud::B115200,
		230400 => TermiosBaud::B230400,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		460800 => TermiosBaud::B460800,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		500000 => TermiosBaud::B500000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		576000 => TermiosBaud::B576000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		921600 => TermiosBaud::B921600,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		1000000 => TermiosBaud::B1000000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		1152000 => TermiosBaud::B1152000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		1500000 => TermiosBaud::B1500000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		2000000 => TermiosBaud::B2000000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		2500000 => TermiosBaud::B2500000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		3000000 => TermiosBaud::B3000000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		3500000 => TermiosBaud::B3500000,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		4000000 => TermiosBaud::B4000000,
		#[cfg(any(target_os = "macos", target_os = "ios"))]
		7200 => TermiosBaud::B7200,
		#[cfg(any(target_os = "macos", target_os = "ios"))]
		14400 => TermiosBaud::B14400,
		#[cfg(any(target_os = "macos", target_os = "ios"))]
		28800 => TermiosBaud::B28800,
		_ => return None,
	})
}

/// Sets a rate the `Bxxx` constants cannot express.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_custom_baud(fd: RawFd, rate: u32) -> i32 {
	if rate == 0 {
		return -libc::EINVAL;
	}
	unsafe {
		let mut tio2: libc::termios2 = std::mem::zeroed();
		if libc::ioctl(fd, libc::TCGETS2 as _, &mut tio2) < 0 {
			return -last_errno();
		}
		tio2.c_cflag &= !libc::CBAUD;
		tio2.c_cflag |= libc::BOTHER;
		tio2.c_ispeed = rate;
		tio2.c_ospeed = rate;
		if libc::ioctl(fd, libc::TCSETS2 as _, &tio2) < 0 {
			return -last_errno();
		}
	}
	0
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_custom_baud(_fd: RawFd, _rate: u32) -> i32 {
	-libc::EOPNOTSUPP
}

fn modem_bits(fd: RawFd) -> Result<libc::c_int, i32> {
	let mut bits: libc::c_int = 0;
	if unsafe { raw::tiocmget(fd, &mut bits) }.is_err() {
		return Err(-last_errno());
	}
	Ok(bits)
}

fn set_modem_bit(fd: RawFd, bit: libc::c_int, asserted: bool) -> i32 {
	let result = if asserted {
		unsafe { raw::tiocmbis(fd, &bit) }
	} else {
		unsafe { raw::tiocmbic(fd, &bit) }
	};
	match result {
		Ok(_) => 0,
		Err(errno) => -(errno as i32),
	}
}

/// Translates a changed TIOCM bit set into the public line-event bits.
fn line_event_bits(changed: libc::c_int) -> u32 {
	let mut events = LineEvents::empty();
	if changed & libc::TIOCM_CTS != 0 {
		events |= LineEvents::CTS;
	}
	if changed & libc::TIOCM_DSR != 0 {
		events |= LineEvents::DSR;
	}
	if changed & libc::TIOCM_CAR != 0 {
		events |= LineEvents::DCD;
	}
	if changed & libc::TIOCM_RNG != 0 {
		events |= LineEvents::RI;
	}
	if changed & libc::TIOCM_RTS != 0 {
		events |= LineEvents::RTS;
	}
	if changed & libc::TIOCM_DTR != 0 {
		events |= LineEvents::DTR;
	}
	events.bits()
}

fn delivery_loop(fd: RawFd, sink: Sender<Notification>, alive: Arc<AtomicBool>) {
	let mut last_lines = modem_bits(fd).unwrap_or(0);
	while alive.load(Ordering::SeqCst) {
		let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
		let ready = match poll(&mut fds, 100) {
			Ok(ready) => ready,
			Err(Errno::EINTR) => continue,
			Err(errno) => {
				let _ = sink.send(Notification::Error(-(errno as i32)));
				break;
			}
		};

		if ready > 0 {
			let revents = fds[0].revents().unwrap_or(PollFlags::empty());
			if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
				let _ = sink.send(Notification::Error(-libc::EIO));
				break;
			}
			if revents.contains(PollFlags::POLLIN) {
				let mut buf = vec![0u8; 1024];
				match unistd::read(fd, &mut buf) {
					Ok(0) => {
						let _ = sink.send(Notification::Error(-libc::ENODEV));
						break;
					}
					Ok(n) => {
						buf.truncate(n);
						if sink.send(Notification::Data(buf)).is_err() {
							break;
						}
					}
					Err(Errno::EAGAIN) | Err(Errno::EINTR) => {}
					Err(errno) => {
						let _ = sink.send(Notification::Error(-(errno as i32)));
						break;
					}
				}
			}
		}

		if let Ok(bits) = modem_bits(fd) {
			let changed = bits ^ last_lines;
			if changed != 0 {
				last_lines = bits;
				let events = line_event_bits(changed);
				if events != 0 && sink.send(Notification::Event(events)).is_err() {
					break;
				}
			}
		}
	}
}

fn watch_loop(path: String, sink: Sender<PortWatchMessage>, alive: Arc<AtomicBool>) {
	let mut present = Path::new(&path).exists();
	while alive.load(Ordering::SeqCst) {
		thread::sleep(Duration::from_millis(250));
		let now = Path::new(&path).exists();
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
