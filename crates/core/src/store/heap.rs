use crate::cnf::TUPLES_PER_BLOCK;
use crate::err::Error;
use crate::plan::Direction;
use crate::sql::val::Value;
use crate::store::buffer::{BufferPool, PinnedBuffer};
use crate::store::snapshot::{CommandId, Snapshot, XactId};
use crate::store::tuple::{HeapTuple, ItemPointer, TupleDesc};
use crate::store::xact::TransactionManager;
use crate::store::Oid;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of a heap delete or update attempt, driving the caller's
/// concurrent-update handling.
#[derive(Debug)]
pub enum HeapModify {
	/// The tuple was marked deleted by this transaction.
	Ok,
	/// This transaction had already deleted the tuple in an earlier
	/// command.
	SelfModified,
	/// Another transaction deleted or replaced the tuple; the link, when
	/// present, points at the replacing version for re-evaluation.
	Concurrent {
		latest: Option<ItemPointer>,
	},
	/// No tuple at the pointer.
	NotFound,
}

#[derive(Default)]
struct HeapBlock {
	tuples: Vec<HeapTuple>,
}

/// One heap relation of the in-process store: blocks of MVCC tuple
/// versions addressed by item pointer.
pub struct HeapRelation {
	pub id: Oid,
	pub name: String,
	pub desc: TupleDesc,
	blocks: RwLock<Vec<HeapBlock>>,
	has_index: AtomicBool,
}

impl HeapRelation {
	pub fn new(id: Oid, name: &str, desc: TupleDesc) -> Self {
		Self {
			id,
			name: name.to_owned(),
			desc,
			blocks: RwLock::new(Vec::new()),
			has_index: AtomicBool::new(false),
		}
	}

	pub fn has_index(&self) -> bool {
		self.has_index.load(Ordering::Acquire)
	}

	pub(crate) fn set_has_index(&self) {
		self.has_index.store(true, Ordering::Release);
	}

	pub fn block_count(&self) -> u32 {
		self.blocks.read().len() as u32
	}

	/// Item pointers of every tuple version on the block, unfiltered;
	/// visibility is the reader's concern.
	pub fn pointers_on_block(&self, block: u32) -> Vec<ItemPointer> {
		let blocks = self.blocks.read();
		match blocks.get(block as usize) {
			Some(b) => b.tuples.iter().map(|t| t.tid).collect(),
			None => Vec::new(),
		}
	}

	/// Append a new tuple version and return its location.
	pub fn insert(&self, oid: Oid, values: Vec<Value>, xid: XactId, cid: CommandId) -> Result<ItemPointer, Error> {
		if values.len() != self.desc.natts() {
			return Err(Error::Execution {
				message: format!(
					"relation '{}' expects {} attributes, got {}",
					self.name,
					self.desc.natts(),
					values.len()
				),
			});
		}
		for (i, attr) in self.desc.attrs().iter().enumerate() {
			if attr.not_null && values[i].is_null() {
				return Err(Error::Execution {
					message: format!("null value in attribute '{}'", attr.name),
				});
			}
		}
		let mut blocks = self.blocks.write();
		if blocks.last().map_or(true, |b| b.tuples.len() >= TUPLES_PER_BLOCK) {
			blocks.push(HeapBlock::default());
		}
		let block = blocks.len() - 1;
		let line = blocks[block].tuples.len();
		let tid = ItemPointer::new(block as u32, (line + 1) as u16);
		blocks[block].tuples.push(HeapTuple {
			tid,
			oid,
			xmin: xid,
			cmin: cid,
			xmax: None,
			cmax: None,
			link: None,
			values,
		});
		Ok(tid)
	}

	fn with_tuple<T>(&self, tid: ItemPointer, f: impl FnOnce(&mut HeapTuple) -> T) -> Option<T> {
		let mut blocks = self.blocks.write();
		let block = blocks.get_mut(tid.block as usize)?;
		let tuple = block.tuples.get_mut((tid.offset as usize).checked_sub(1)?)?;
		Some(f(tuple))
	}

	/// Pin the tuple's block and return a copy of the version at `tid`
	/// if it is visible under `snapshot`. The caller owns the pin.
	pub fn fetch(
		&self,
		tid: ItemPointer,
		snapshot: &Snapshot,
		xmgr: &TransactionManager,
		pool: &Arc<BufferPool>,
	) -> Option<(HeapTuple, PinnedBuffer)> {
		let pin = pool.read(self.id, tid.block);
		let blocks = self.blocks.read();
		let tuple = blocks
			.get(tid.block as usize)?
			.tuples
			.get((tid.offset as usize).checked_sub(1)?)?;
		if snapshot.is_visible(tuple, xmgr) {
			Some((tuple.clone(), pin))
		} else {
			None
		}
	}

	/// Read a tuple version regardless of visibility; used when chasing
	/// update links.
	pub fn fetch_any(&self, tid: ItemPointer) -> Option<HeapTuple> {
		let blocks = self.blocks.read();
		blocks.get(tid.block as usize)?.tuples.get((tid.offset as usize).checked_sub(1)?).cloned()
	}

	/// Mark the tuple at `tid` deleted by `xid`.
	pub fn delete(
		&self,
		tid: ItemPointer,
		xid: XactId,
		cid: CommandId,
		xmgr: &TransactionManager,
	) -> HeapModify {
		self.with_tuple(tid, |tuple| match tuple.xmax {
			Some(xmax) if xmax == xid => HeapModify::SelfModified,
			Some(xmax) if xmgr.is_committed(xmax) || xmgr.is_in_progress(xmax) => {
				HeapModify::Concurrent {
					latest: tuple.link,
				}
			}
			_ => {
				// Either never deleted, or the deleter aborted
				tuple.xmax = Some(xid);
				tuple.cmax = Some(cid);
				HeapModify::Ok
			}
		})
		.unwrap_or(HeapModify::NotFound)
	}

	/// Replace the tuple at `tid` with a new version carrying `values`.
	pub fn update(
		&self,
		tid: ItemPointer,
		values: Vec<Value>,
		xid: XactId,
		cid: CommandId,
		xmgr: &TransactionManager,
	) -> Result<(HeapModify, Option<ItemPointer>), Error> {
		let oid = match self.fetch_any(tid) {
			Some(t) => t.oid,
			None => return Ok((HeapModify::NotFound, None)),
		};
		match self.delete(tid, xid, cid, xmgr) {
			HeapModify::Ok => {
				let new_tid = self.insert(oid, values, xid, cid)?;
				self.with_tuple(tid, |t| t.link = Some(new_tid));
				Ok((HeapModify::Ok, Some(new_tid)))
			}
			other => Ok((other, None)),
		}
	}

	/// Open a sequential scan under `snapshot`.
	pub fn begin_scan(
		self: &Arc<Self>,
		snapshot: Snapshot,
		xmgr: Arc<TransactionManager>,
		pool: Arc<BufferPool>,
	) -> HeapScan {
		HeapScan {
			rel: Arc::clone(self),
			snapshot,
			xmgr,
			pool,
			forward_pos: (0, 0),
			backward_pos: None,
		}
	}
}

/// A sequential scan over one heap relation.
pub struct HeapScan {
	rel: Arc<HeapRelation>,
	snapshot: Snapshot,
	xmgr: Arc<TransactionManager>,
	pool: Arc<BufferPool>,
	/// Next (block, line) to visit going forward.
	forward_pos: (usize, usize),
	/// Next (block, line) going backward; `None` until positioned.
	backward_pos: Option<(usize, usize)>,
}

impl HeapScan {
	/// Reset the scan to the start (or end, for backward scans).
	pub fn rescan(&mut self, snapshot: Snapshot) {
		self.snapshot = snapshot;
		self.forward_pos = (0, 0);
		self.backward_pos = None;
	}

	/// The next visible tuple in the requested direction, with its pin.
	pub fn getnext(&mut self, direction: Direction) -> Option<(HeapTuple, PinnedBuffer)> {
		match direction {
			Direction::Backward => self.next_backward(),
			// NoMovement scans read forward; the flag only matters to
			// delegated producers
			_ => self.next_forward(),
		}
	}

	fn next_forward(&mut self) -> Option<(HeapTuple, PinnedBuffer)> {
		loop {
			let (block, line) = self.forward_pos;
			let blocks = self.rel.blocks.read();
			let b = blocks.get(block)?;
			match b.tuples.get(line) {
				None => {
					drop(blocks);
					self.forward_pos = (block + 1, 0);
					continue;
				}
				Some(tuple) => {
					self.forward_pos = (block, line + 1);
					if self.snapshot.is_visible(tuple, &self.xmgr) {
						let tuple = tuple.clone();
						drop(blocks);
						let pin = self.pool.read(self.rel.id, block as u32);
						return Some((tuple, pin));
					}
				}
			}
		}
	}

	fn next_backward(&mut self) -> Option<(HeapTuple, PinnedBuffer)> {
		loop {
			let blocks = self.rel.blocks.read();
			let pos = match self.backward_pos {
				Some(pos) => pos,
				None => {
					// Position after the physically last tuple
					let block = blocks.len().checked_sub(1)?;
					let line = blocks[block].tuples.len();
					(block, line)
				}
			};
			let (block, line) = pos;
			if line == 0 {
				if block == 0 {
					return None;
				}
				let prev = block - 1;
				let len = blocks.get(prev)?.tuples.len();
				self.backward_pos = Some((prev, len));
				continue;
			}
			self.backward_pos = Some((block, line - 1));
			let tuple = &blocks[block].tuples[line - 1];
			if self.snapshot.is_visible(tuple, &self.xmgr) {
				let tuple = tuple.clone();
				drop(blocks);
				let pin = self.pool.read(self.rel.id, block as u32);
				return Some((tuple, pin));
			}
		}
	}
}
