use crate::cnf::BLOCK_SIZE;
use crate::err::Error;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// A byte-addressed, buffered temporary file.
///
/// Reads and writes touch the underlying file only when the one-page
/// buffer fills or empties. Seeks within the buffered page adjust the
/// intra-page position without any I/O; seeks outside flush first. The
/// backing file is anonymous and unlinked, so it disappears with the
/// value. Single-threaded ownership; sort and hash-join spills are the
/// customers.
pub struct BufFile {
	file: File,
	/// Physical seek position of the underlying file.
	offset: u64,
	/// Logical file position of the start of the buffer.
	cur_offset: u64,
	/// Next read/write position within the buffer.
	pos: usize,
	/// Number of valid bytes in the buffer.
	nbytes: usize,
	dirty: bool,
	buffer: Box<[u8; BLOCK_SIZE]>,
}

impl BufFile {
	/// Create a buffered temp file backed by a fresh anonymous file.
	pub fn create() -> Result<Self, Error> {
		Ok(Self {
			file: tempfile::tempfile()?,
			offset: 0,
			cur_offset: 0,
			pos: 0,
			nbytes: 0,
			dirty: false,
			buffer: Box::new([0u8; BLOCK_SIZE]),
		})
	}

	/// The logical position the next read or write applies to.
	pub fn tell(&self) -> u64 {
		self.cur_offset + self.pos as u64
	}

	/// Block-oriented position, ignoring any fractional page.
	pub fn tell_block(&self) -> u64 {
		self.tell() / BLOCK_SIZE as u64
	}

	fn load_buffer(&mut self) -> Result<(), Error> {
		if self.cur_offset != self.offset {
			self.file.seek(SeekFrom::Start(self.cur_offset))?;
			self.offset = self.cur_offset;
		}
		self.nbytes = self.file.read(&mut self.buffer[..])?;
		self.offset += self.nbytes as u64;
		Ok(())
	}

	fn dump_buffer(&mut self) -> Result<(), Error> {
		if self.cur_offset != self.offset {
			self.file.seek(SeekFrom::Start(self.cur_offset))?;
			self.offset = self.cur_offset;
		}
		self.file.write_all(&self.buffer[..self.nbytes])?;
		self.offset += self.nbytes as u64;
		self.cur_offset += self.nbytes as u64;
		self.dirty = false;
		// Point the logical position back at the user's position, which
		// can be before the buffer end after a small backwards seek
		self.cur_offset -= (self.nbytes - self.pos) as u64;
		self.pos = 0;
		self.nbytes = 0;
		Ok(())
	}

	/// Flush any dirty buffered data to the file.
	pub fn flush(&mut self) -> Result<(), Error> {
		if self.dirty {
			self.dump_buffer()?;
		}
		Ok(())
	}

	/// Read up to `out.len()` bytes from the current position. Returns
	/// the number of bytes read; zero at end of file.
	pub fn read(&mut self, out: &mut [u8]) -> Result<usize, Error> {
		self.flush()?;
		let mut nread = 0;
		while nread < out.len() {
			if self.pos >= self.nbytes {
				// Buffer exhausted; load the next page
				self.cur_offset += self.pos as u64;
				self.pos = 0;
				self.nbytes = 0;
				self.load_buffer()?;
				if self.nbytes == 0 {
					break;
				}
			}
			let avail = (self.nbytes - self.pos).min(out.len() - nread);
			out[nread..nread + avail].copy_from_slice(&self.buffer[self.pos..self.pos + avail]);
			self.pos += avail;
			nread += avail;
		}
		Ok(nread)
	}

	/// Write all of `data` at the current position, extending the file
	/// when writing past the end.
	pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
		let mut written = 0;
		while written < data.len() {
			if self.pos >= BLOCK_SIZE {
				if self.dirty {
					self.dump_buffer()?;
				} else {
					// Went directly from reading to writing
					self.cur_offset += self.pos as u64;
					self.pos = 0;
					self.nbytes = 0;
				}
			}
			let avail = (BLOCK_SIZE - self.pos).min(data.len() - written);
			self.buffer[self.pos..self.pos + avail]
				.copy_from_slice(&data[written..written + avail]);
			self.dirty = true;
			self.pos += avail;
			if self.nbytes < self.pos {
				self.nbytes = self.pos;
			}
			written += avail;
		}
		Ok(())
	}

	/// Seek to an absolute logical offset.
	pub fn seek(&mut self, target: u64) -> Result<(), Error> {
		if target >= self.cur_offset && target <= self.cur_offset + self.nbytes as u64 {
			// Within the buffered page: adjust the intra-page position
			// only. The buffer stays dirty if it was dirty.
			self.pos = (target - self.cur_offset) as usize;
			return Ok(());
		}
		self.flush()?;
		self.cur_offset = target;
		self.pos = 0;
		self.nbytes = 0;
		Ok(())
	}

	/// Seek to the start of the n'th page.
	pub fn seek_block(&mut self, block: u64) -> Result<(), Error> {
		self.seek(block * BLOCK_SIZE as u64)
	}
}
