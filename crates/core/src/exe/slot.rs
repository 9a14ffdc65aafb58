use crate::err::Error;
use crate::store::buffer::PinnedBuffer;
use crate::store::tuple::{HeapTuple, ItemPointer, TupleDesc};

/// Handle of one slot in the per-query tuple table. Handles stay valid
/// for the life of the query because the table is sized at plan
/// initialization and never grown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRef(pub(crate) usize);

/// Holder of at most one tuple plus its descriptor.
///
/// A slot owns whatever it holds: clearing it releases the tuple memory
/// (when `should_free` is set) and drops any buffer pin that was keeping
/// the tuple's block resident.
#[derive(Default)]
pub struct TupleSlot {
	tuple: Option<HeapTuple>,
	desc: Option<TupleDesc>,
	should_free: bool,
	buffer: Option<PinnedBuffer>,
}

impl TupleSlot {
	/// Store a tuple, clearing whatever was there first. `should_free`
	/// records whether the slot owns the tuple's memory.
	pub fn store(&mut self, tuple: HeapTuple, should_free: bool) {
		self.clear();
		self.tuple = Some(tuple);
		self.should_free = should_free;
	}

	/// Store a tuple together with the pin keeping its block resident.
	/// The pin travels with the slot and is dropped on clear.
	pub fn store_pinned(&mut self, tuple: HeapTuple, buffer: PinnedBuffer) {
		self.clear();
		self.tuple = Some(tuple);
		self.should_free = true;
		self.buffer = Some(buffer);
	}

	/// Drop the held tuple and release any pin. Idempotent.
	pub fn clear(&mut self) {
		if self.should_free {
			self.tuple = None;
		} else {
			// The tuple was only lent to this slot; forget it without
			// freeing
			self.tuple.take();
		}
		self.should_free = false;
		self.buffer = None;
	}

	pub fn is_empty(&self) -> bool {
		self.tuple.is_none()
	}

	pub fn tuple(&self) -> Option<&HeapTuple> {
		self.tuple.as_ref()
	}

	pub fn set_desc(&mut self, desc: TupleDesc) {
		self.desc = Some(desc);
	}

	pub fn desc(&self) -> Option<&TupleDesc> {
		self.desc.as_ref()
	}

	/// Build a projected (computed) tuple in this slot.
	pub fn store_values(&mut self, values: Vec<crate::sql::val::Value>) {
		self.store(
			HeapTuple {
				tid: ItemPointer::new(0, 0),
				oid: 0,
				xmin: 0,
				cmin: 0,
				xmax: None,
				cmax: None,
				link: None,
				values,
			},
			true,
		);
	}
}

/// The per-query tuple table: a fixed array of slots reserved at plan
/// initialization. Growing it would invalidate held [`SlotRef`]s, so
/// allocation past the reserved count is an executor failure.
pub struct TupleTable {
	slots: Vec<TupleSlot>,
	next: usize,
}

impl TupleTable {
	pub fn new(capacity: usize) -> Self {
		let mut slots = Vec::with_capacity(capacity);
		slots.resize_with(capacity, TupleSlot::default);
		Self {
			slots,
			next: 0,
		}
	}

	/// Reserve the next free slot.
	pub fn alloc(&mut self) -> Result<SlotRef, Error> {
		if self.next >= self.slots.len() {
			return Err(Error::Execution {
				message: "tuple table exhausted; slot count was miscounted at init".to_owned(),
			});
		}
		let slot = SlotRef(self.next);
		self.next += 1;
		Ok(slot)
	}

	pub fn get(&self, slot: SlotRef) -> &TupleSlot {
		&self.slots[slot.0]
	}

	pub fn get_mut(&mut self, slot: SlotRef) -> &mut TupleSlot {
		&mut self.slots[slot.0]
	}

	/// Clear every slot; called at executor teardown.
	pub fn clear_all(&mut self) {
		for slot in &mut self.slots {
			slot.clear();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sql::val::Value;
	use crate::store::buffer::BufferPool;

	#[test]
	fn clear_releases_the_pin() {
		let pool = BufferPool::new();
		let mut table = TupleTable::new(1);
		let slot = table.alloc().unwrap();
		let pin = pool.read(3, 9);
		table.get_mut(slot).store_pinned(
			HeapTuple {
				tid: ItemPointer::new(9, 1),
				oid: 0,
				xmin: 0,
				cmin: 0,
				xmax: None,
				cmax: None,
				link: None,
				values: vec![Value::Int4(1)],
			},
			pin,
		);
		assert_eq!(pool.pin_count(3, 9), 1);
		table.get_mut(slot).clear();
		assert_eq!(pool.pin_count(3, 9), 0);
		assert!(table.get(slot).is_empty());
	}

	#[test]
	fn overwrite_clears_first() {
		let mut slot = TupleSlot::default();
		slot.store_values(vec![Value::Int4(1)]);
		slot.store_values(vec![Value::Int4(2)]);
		assert_eq!(slot.tuple().unwrap().values, vec![Value::Int4(2)]);
	}

	#[test]
	fn table_never_grows() {
		let mut table = TupleTable::new(2);
		table.alloc().unwrap();
		table.alloc().unwrap();
		assert!(table.alloc().is_err());
	}
}
