//! XMODEM file transfer.
//!
//! The engine speaks classic XMODEM: 128-byte SOH blocks, a one-byte block
//! number plus its complement, an arithmetic checksum and SUB padding in
//! the final block. It consumes the port only through the [`ByteChannel`]
//! seam, so the protocol runs identically over a live handle and over the
//! in-memory pairs the tests use.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const SOH: u8 = 0x01;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1a;

const BLOCK_SIZE: usize = 128;

/// Byte transport the engine runs over.
pub(crate) trait ByteChannel {
	/// Waits up to `timeout` for one byte; `Ok(None)` means the wait
	/// expired.
	fn recv_byte(&mut self, timeout: Duration) -> Result<Option<u8>>;

	fn send(&mut self, data: &[u8]) -> Result<()>;
}

/// XMODEM engine with its protocol knobs.
pub(crate) struct Xmodem {
	pub(crate) byte_timeout: Duration,
	pub(crate) start_timeout: Duration,
	pub(crate) max_retries: u32,
}

impl Default for Xmodem {
	fn default() -> Xmodem {
		Xmodem {
			byte_timeout: Duration::from_secs(1),
			start_timeout: Duration::from_secs(60),
			max_retries: 10,
		}
	}
}

impl Xmodem {
	/// Sends `source` over `channel`. Blocks until the receiver has
	/// acknowledged the end of the transfer.
	pub(crate) fn send(&self, channel: &mut dyn ByteChannel, source: &mut dyn Read) -> Result<()> {
		self.await_start(channel)?;

		let mut block_num: u8 = 1;
		loop {
			let mut data = [SUB; BLOCK_SIZE];
			let used = fill_block(source, &mut data)?;
			if used == 0 {
				break;
			}
			self.send_block(channel, block_num, &data)?;
			block_num = block_num.wrapping_add(1);
			if used < BLOCK_SIZE {
				break;
			}
		}

		self.send_eot(channel)
	}

	/// Receives a transfer from `channel` into `sink`.
	///
	/// SUB padding of the final block is preserved, as classic XMODEM has
	/// no length field to strip it with.
	pub(crate) fn receive(
		&self,
		channel: &mut dyn ByteChannel,
		sink: &mut dyn Write,
	) -> Result<()> {
		channel.send(&[NAK])?;

		let mut expected: u8 = 1;
		let mut retries = 0;
		loop {
			match self.recv_or_timeout(channel)? {
				EOT => {
					channel.send(&[ACK])?;
					return Ok(());
				}
				CAN => return Err(Error::from_code(-125)),
				SOH => match self.recv_block(channel, expected)? {
					BlockOutcome::Fresh(data) => {
						sink.write_all(&data).map_err(|_| Error::from_code(-5))?;
						channel.send(&[ACK])?;
						expected = expected.wrapping_add(1);
						retries = 0;
					}
					BlockOutcome::Duplicate => {
						channel.send(&[ACK])?;
					}
					BlockOutcome::Corrupt => {
						retries += 1;
						if retries > self.max_retries {
							return Err(Error::Timeout);
						}
						channel.send(&[NAK])?;
					}
				},
				other => {
					debug!("ignoring unexpected transfer byte {other:#04x}");
				}
			}
		}
	}

	fn await_start(&self, channel: &mut dyn ByteChannel) -> Result<()> {
		let deadline = Instant::now() + self.start_timeout;
		loop {
			match channel.recv_byte(self.byte_timeout)? {
				Some(NAK) => return Ok(()),
				Some(CAN) => return Err(Error::from_code(-125)),
				Some(_) | None => {}
			}
			if Instant::now() >= deadline {
				return Err(Error::Timeout);
			}
		}
	}

	fn send_block(
		&self,
		channel: &mut dyn ByteChannel,
		block_num: u8,
		data: &[u8; BLOCK_SIZE],
	) -> Result<()> {
		let mut frame = Vec::with_capacity(BLOCK_SIZE + 4);
		frame.push(SOH);
		frame.push(block_num);
		frame.push(255 - block_num);
		frame.extend_from_slice(data);
		frame.push(checksum(data));

		for _ in 0..=self.max_retries {
			channel.send(&frame)?;
			match channel.recv_byte(self.byte_timeout)? {
				Some(ACK) => return Ok(()),
				Some(CAN) => return Err(Error::from_code(-125)),
				Some(NAK) | Some(_) | None => {}
			}
		}
		Err(Error::Timeout)
	}

	fn send_eot(&self, channel: &mut dyn ByteChannel) -> Result<()> {
		for _ in 0..=self.max_retries {
			channel.send(&[EOT])?;
			if let Some(ACK) = channel.recv_byte(self.byte_timeout)? {
				return Ok(());
			}
		}
		Err(Error::Timeout)
	}

	fn recv_or_timeout(&self, channel: &mut dyn ByteChannel) -> Result<u8> {
		let deadline = Instant::now() + self.start_timeout;
		loop {
			if let Some(byte) = channel.recv_byte(self.byte_timeout)? {
				return Ok(byte);
			}
			if Instant::now() >= deadline {
				return Err(Error::Timeout);
			}
		}
	}

	/// Reads the remainder of a block after its SOH.
	fn recv_block(&self, channel: &mut dyn ByteChannel, expected: u8) -> Result<BlockOutcome> {
		let mut raw = [0u8; BLOCK_SIZE + 3];
		for slot in raw.iter_mut() {
			match channel.recv_byte(self.byte_timeout)? {
				Some(byte) => *slot = byte,
				None => return Ok(BlockOutcome::Corrupt),
			}
		}

		let block_num = raw[0];
		let complement = raw[1];
		let data: [u8; BLOCK_SIZE] = raw[2..2 + BLOCK_SIZE].try_into().unwrap();
		let sum = raw[BLOCK_SIZE + 2];

		if block_num != 255 - complement || sum != checksum(&data) {
			return Ok(BlockOutcome::Corrupt);
		}
		if block_num == expected.wrapping_sub(1) {
			// Retransmission of a block we already acknowledged.
			return Ok(BlockOutcome::Duplicate);
		}
		if block_num != expected {
			return Ok(BlockOutcome::Corrupt);
		}
		Ok(BlockOutcome::Fresh(data))
	}
}

enum BlockOutcome {
	Fresh([u8; BLOCK_SIZE]),
	Duplicate,
	Corrupt,
}

fn checksum(data: &[u8]) -> u8 {
	data.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte))
}

/// Reads until the block is full or the source is drained.
fn fill_block(source: &mut dyn Read, block: &mut [u8; BLOCK_SIZE]) -> Result<usize> {
	let mut used = 0;
	while used < BLOCK_SIZE {
		match source.read(&mut block[used..]) {
			Ok(0) => break,
			Ok(n) => used += n,
			Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
			Err(_) => return Err(Error::from_code(-5)),
		}
	}
	Ok(used)
}
