use crate::store::Oid;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Pin accounting over the process-global buffer pool.
///
/// The in-process heap keeps pages resident, so the pool tracks pins and
/// read-ahead bias rather than page contents; the accounting is what the
/// executor's ownership rules are checked against.
#[derive(Default)]
pub struct BufferPool {
	pins: Mutex<HashMap<(Oid, u32), usize>>,
	warm: Mutex<HashSet<(Oid, u32)>>,
}

impl BufferPool {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Pin a block for reading. The pin is held until the returned guard
	/// drops.
	pub fn read(self: &Arc<Self>, rel: Oid, block: u32) -> PinnedBuffer {
		*self.pins.lock().entry((rel, block)).or_insert(0) += 1;
		PinnedBuffer {
			pool: Arc::clone(self),
			rel,
			block,
		}
	}

	/// Non-blocking read-ahead hint: mark the block warm so the next
	/// reader finds it resident.
	pub fn prefetch(&self, rel: Oid, block: u32) {
		self.warm.lock().insert((rel, block));
	}

	/// Whether a prefetch hint was recorded for the block.
	pub fn is_warm(&self, rel: Oid, block: u32) -> bool {
		self.warm.lock().contains(&(rel, block))
	}

	pub fn pin_count(&self, rel: Oid, block: u32) -> usize {
		self.pins.lock().get(&(rel, block)).copied().unwrap_or(0)
	}

	/// Total outstanding pins. Non-zero at connection teardown means a
	/// leak somewhere on an error path.
	pub fn leaked_pins(&self) -> usize {
		self.pins.lock().values().sum()
	}

	fn unpin(&self, rel: Oid, block: u32) {
		let mut pins = self.pins.lock();
		if let Some(count) = pins.get_mut(&(rel, block)) {
			*count -= 1;
			if *count == 0 {
				pins.remove(&(rel, block));
			}
		}
	}
}

/// A held buffer pin. Dropping the guard releases the pin, including on
/// unwind paths.
pub struct PinnedBuffer {
	pool: Arc<BufferPool>,
	rel: Oid,
	block: u32,
}

impl PinnedBuffer {
	pub fn block(&self) -> u32 {
		self.block
	}

	pub fn relation(&self) -> Oid {
		self.rel
	}
}

impl Drop for PinnedBuffer {
	fn drop(&mut self) {
		self.pool.unpin(self.rel, self.block);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pins_release_on_drop() {
		let pool = BufferPool::new();
		let a = pool.read(1, 7);
		let b = pool.read(1, 7);
		assert_eq!(pool.pin_count(1, 7), 2);
		drop(a);
		assert_eq!(pool.pin_count(1, 7), 1);
		drop(b);
		assert_eq!(pool.pin_count(1, 7), 0);
		assert_eq!(pool.leaked_pins(), 0);
	}

	#[test]
	fn prefetch_marks_blocks_warm() {
		let pool = BufferPool::new();
		pool.prefetch(2, 3);
		assert!(pool.is_warm(2, 3));
		assert!(!pool.is_warm(2, 4));
	}
}
