//! Delegated scans: an index or sequential scan split across two
//! cooperating threads.
//!
//! The producer walks the index or heap and batches row pointers; the
//! consumer (the executor thread) fetches and projects the referenced
//! heap tuples. A bounded single-slot channel carries the batches, so
//! at most one batch is ever in flight and the producer naturally
//! blocks until the consumer has drained the previous one. Cancellation
//! closes the channel from either side; ending the scan always joins
//! the producer thread.

use crate::cnf::TRANSFER_MAX;
use crate::err::Error;
use crate::store::buffer::{BufferPool, PinnedBuffer};
use crate::store::heap::HeapRelation;
use crate::store::index::{IndexRelation, ScanKey};
use crate::store::lock::LockMode;
use crate::store::snapshot::Snapshot;
use crate::store::tuple::{HeapTuple, ItemPointer};
use crate::store::xact::TransactionManager;
use crate::store::Database;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One handoff of row pointers from producer to consumer.
pub type Batch = Vec<ItemPointer>;

/// Smallest batch worth flushing early when the consumer is idle.
const PARTIAL_FLUSH_MIN: usize = 32;

/// The producer's view of the handoff: the channel sender plus the
/// cancellation flags it must observe.
pub struct DelegateProducer {
	tx: flume::Sender<Batch>,
	scan_cancel: Arc<AtomicBool>,
	session_cancel: Arc<AtomicBool>,
}

impl DelegateProducer {
	/// Whether the scan was ended or the owning statement cancelled.
	pub fn cancelled(&self) -> bool {
		self.scan_cancel.load(Ordering::Acquire) || self.session_cancel.load(Ordering::Acquire)
	}

	/// Whether the consumer has drained the previous batch and is
	/// waiting; a producer can flush a partial batch early when so.
	pub fn collector_waiting(&self) -> bool {
		self.tx.is_empty()
	}

	/// Hand a batch over, blocking until the consumer drained the
	/// previous one. Returns false when the scan is over and the
	/// producer should stop.
	pub fn transfer(&self, batch: Batch) -> bool {
		if self.cancelled() {
			return false;
		}
		self.tx.send(batch).is_ok()
	}
}

/// The consumer-side handle: owns the producer thread and the receiving
/// end of the handoff channel.
pub struct Delegate {
	rx: flume::Receiver<Batch>,
	scan_cancel: Arc<AtomicBool>,
	producer: Option<JoinHandle<Result<(), Error>>>,
	current: std::vec::IntoIter<ItemPointer>,
}

/// Spawn a producer thread running `worker` and return the consumer
/// handle.
pub fn delegated_scan_start<F>(session_cancel: Arc<AtomicBool>, worker: F) -> Delegate
where
	F: FnOnce(DelegateProducer) -> Result<(), Error> + Send + 'static,
{
	// Capacity one: a single batch in flight between the two threads
	let (tx, rx) = flume::bounded(1);
	let scan_cancel = Arc::new(AtomicBool::new(false));
	let producer_side = DelegateProducer {
		tx,
		scan_cancel: Arc::clone(&scan_cancel),
		session_cancel,
	};
	let producer = std::thread::spawn(move || {
		let result = worker(producer_side);
		if let Err(err) = &result {
			warn!("delegated scan producer failed: {err}");
		}
		result
	});
	Delegate {
		rx,
		scan_cancel,
		producer: Some(producer),
		current: Vec::new().into_iter(),
	}
}

impl Delegate {
	/// The next row pointer, or `None` when the producer is done.
	pub fn next(&mut self) -> Option<ItemPointer> {
		loop {
			if let Some(tid) = self.current.next() {
				return Some(tid);
			}
			match self.rx.recv() {
				Ok(batch) => self.current = batch.into_iter(),
				Err(_) => return None,
			}
		}
	}

	/// Fetch the referenced heap tuple under the executor's snapshot.
	/// Tuples failing visibility yield `None` and are dropped by the
	/// caller; the returned pin belongs to the consumer alone.
	pub fn get_tuple(
		&self,
		rel: &HeapRelation,
		snapshot: &Snapshot,
		xmgr: &TransactionManager,
		pool: &Arc<BufferPool>,
		tid: ItemPointer,
	) -> Option<(HeapTuple, PinnedBuffer)> {
		rel.fetch(tid, snapshot, xmgr, pool)
	}

	/// Signal the producer, drain the channel, and join the thread.
	/// Safe to call on every teardown path, including after an error on
	/// the consumer side.
	pub fn end(&mut self) -> Result<(), Error> {
		self.scan_cancel.store(true, Ordering::Release);
		// Unblock a producer parked on the handoff
		while self.rx.recv().is_ok() {}
		if let Some(handle) = self.producer.take() {
			match handle.join() {
				Ok(result) => result?,
				Err(_) => {
					return Err(Error::Execution {
						message: "delegated scan producer panicked".to_owned(),
					})
				}
			}
		}
		Ok(())
	}
}

impl Drop for Delegate {
	fn drop(&mut self) {
		// The producer must never outlive the handle
		let _ = self.end();
	}
}

/// Sort a batch by block number and warm the buffer cache for the
/// blocks the consumer is about to need. Only worthwhile when the scan
/// does not have to preserve index order.
fn sort_and_prewarm(rel: &HeapRelation, pool: &BufferPool, batch: &mut Batch) {
	batch.sort_by_key(|tid| tid.block);
	let mut last = None;
	for tid in batch.iter() {
		if last != Some(tid.block) {
			pool.prefetch(rel.id, tid.block);
			last = Some(tid.block);
		}
	}
}

/// Producer body for a delegated sequential scan: walk the heap in
/// block order, batching every tuple pointer. Visibility is the
/// consumer's job.
pub fn seq_producer(db: Arc<Database>, rel: Arc<HeapRelation>, producer: DelegateProducer) -> Result<(), Error> {
	let _lock = db.locks.lock_relation(rel.id, LockMode::AccessShare);
	let mut batch = Batch::with_capacity(*TRANSFER_MAX);
	'scan: for block in 0..rel.block_count() {
		for tid in rel.pointers_on_block(block) {
			if producer.cancelled() {
				break 'scan;
			}
			batch.push(tid);
			if batch.len() >= *TRANSFER_MAX {
				if !producer.transfer(std::mem::take(&mut batch)) {
					break 'scan;
				}
			}
		}
		// A block boundary is a natural point to hand a partial batch
		// to an already-waiting consumer
		if batch.len() >= PARTIAL_FLUSH_MIN && producer.collector_waiting() {
			if !producer.transfer(std::mem::take(&mut batch)) {
				break 'scan;
			}
		}
	}
	if !batch.is_empty() {
		producer.transfer(batch);
	}
	trace!("delegated seq producer finished for relation {}", rel.id);
	Ok(())
}

/// Producer body for a delegated index scan: walk the index, batching
/// matching pointers; unordered scans get the block-sort and cache
/// pre-warming treatment before each handoff.
pub fn index_producer(
	db: Arc<Database>,
	rel: Arc<HeapRelation>,
	index: Arc<IndexRelation>,
	keys: Vec<ScanKey>,
	backward: bool,
	ordered: bool,
	producer: DelegateProducer,
) -> Result<(), Error> {
	let _lock = db.locks.lock_relation(rel.id, LockMode::AccessShare);
	let mut scan = index.begin_scan(backward, &keys)?;
	let mut batch = Batch::with_capacity(*TRANSFER_MAX);
	let mut done = false;
	while !done {
		if producer.cancelled() {
			break;
		}
		match scan.getnext() {
			Some(tid) => batch.push(tid),
			None => done = true,
		}
		// Flush on a full batch, at scan end, or early when the
		// consumer is already waiting
		let flush = done
			|| batch.len() >= *TRANSFER_MAX
			|| (batch.len() >= PARTIAL_FLUSH_MIN && producer.collector_waiting());
		if flush && !batch.is_empty() {
			if !ordered {
				sort_and_prewarm(&rel, &db.buffers, &mut batch);
			}
			if !producer.transfer(std::mem::take(&mut batch)) {
				break;
			}
		}
	}
	trace!("delegated index producer finished for index {}", index.id);
	Ok(())
}
