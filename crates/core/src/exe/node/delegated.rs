use crate::delegate::{self, Delegate};
use crate::err::Error;
use crate::exe::node::indexscan::build_scan_keys;
use crate::exe::node::CommonState;
use crate::exe::scan::exec_scan;
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::{Direction, IndexQual, PlanCommon};
use crate::store::heap::HeapRelation;
use crate::store::lock::{LockMode, RelationLockGuard};
use std::sync::Arc;

/// Sequential scan executed through a producer thread that batches row
/// pointers while this node materializes the referenced tuples.
pub struct DelegatedSeqScanState {
	pub common: CommonState,
	pub scan_slot: SlotRef,
	pub rel: Arc<HeapRelation>,
	pub lock: Option<RelationLockGuard>,
	pub delegate: Delegate,
}

/// Index scan executed through a producer thread.
pub struct DelegatedIndexScanState {
	pub common: CommonState,
	pub scan_slot: SlotRef,
	pub rel: Arc<HeapRelation>,
	pub lock: Option<RelationLockGuard>,
	pub delegate: Delegate,
}

pub fn init_seq(
	common: &PlanCommon,
	scanrelid: usize,
	estate: &mut EState,
) -> Result<DelegatedSeqScanState, Error> {
	let mut common = CommonState::build(common, estate)?;
	let scan_slot = estate.tuple_table.alloc()?;
	let rel = estate.open_relation(scanrelid)?;
	let lock = estate.db.locks.lock_relation(rel.id, LockMode::AccessShare);
	estate.tuple_table.get_mut(scan_slot).set_desc(rel.desc.clone());
	common.ectx.relation = Some(Arc::clone(&rel));
	common.ectx.relid = scanrelid;
	let db = Arc::clone(&estate.db);
	let producer_rel = Arc::clone(&rel);
	let delegate = delegate::delegated_scan_start(Arc::clone(&estate.cancel), move |producer| {
		delegate::seq_producer(db, producer_rel, producer)
	});
	Ok(DelegatedSeqScanState {
		common,
		scan_slot,
		rel,
		lock: Some(lock),
		delegate,
	})
}

pub fn init_index(
	common: &PlanCommon,
	scanrelid: usize,
	index: &str,
	indexqual: &[IndexQual],
	direction: Direction,
	estate: &mut EState,
) -> Result<DelegatedIndexScanState, Error> {
	let mut common = CommonState::build(common, estate)?;
	let scan_slot = estate.tuple_table.alloc()?;
	let rel = estate.open_relation(scanrelid)?;
	if !rel.has_index() {
		return Err(Error::Execution {
			message: format!("indexes of relation {} are inactive", rel.id),
		});
	}
	let lock = estate.db.locks.lock_relation(rel.id, LockMode::AccessShare);
	estate.tuple_table.get_mut(scan_slot).set_desc(rel.desc.clone());
	common.ectx.relation = Some(Arc::clone(&rel));
	common.ectx.relid = scanrelid;
	let keys = build_scan_keys(indexqual, &common.ectx, estate)?;
	// No requested order means the producer may sort pointers by block
	// number and pre-warm the cache
	let (backward, ordered) = match direction {
		Direction::NoMovement => (false, false),
		Direction::Backward => (true, true),
		Direction::Forward => (false, true),
	};
	let db = Arc::clone(&estate.db);
	let producer_rel = Arc::clone(&rel);
	let producer_index = estate.db.index(index)?;
	let delegate = delegate::delegated_scan_start(Arc::clone(&estate.cancel), move |producer| {
		delegate::index_producer(db, producer_rel, producer_index, keys, backward, ordered, producer)
	});
	Ok(DelegatedIndexScanState {
		common,
		scan_slot,
		rel,
		lock: Some(lock),
		delegate,
	})
}

pub fn exec_seq(state: &mut DelegatedSeqScanState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	let DelegatedSeqScanState {
		common,
		scan_slot,
		rel,
		delegate,
		..
	} = state;
	exec_scan(common, *scan_slot, estate, &mut |estate, _| {
		// Only tuples passing visibility propagate upward
		while let Some(tid) = delegate.next() {
			let snapshot = estate.snapshot.clone();
			if let Some((tuple, pin)) =
				delegate.get_tuple(rel, &snapshot, &estate.db.xact, &estate.db.buffers, tid)
			{
				return Ok(Some((tuple, Some(pin))));
			}
		}
		Ok(None)
	})
}

pub fn exec_index(state: &mut DelegatedIndexScanState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	let DelegatedIndexScanState {
		common,
		scan_slot,
		rel,
		delegate,
		..
	} = state;
	exec_scan(common, *scan_slot, estate, &mut |estate, _| {
		while let Some(tid) = delegate.next() {
			let snapshot = estate.snapshot.clone();
			if let Some((tuple, pin)) =
				delegate.get_tuple(rel, &snapshot, &estate.db.xact, &estate.db.buffers, tid)
			{
				return Ok(Some((tuple, Some(pin))));
			}
		}
		Ok(None)
	})
}

pub fn end_seq(state: &mut DelegatedSeqScanState, estate: &mut EState) -> Result<(), Error> {
	// Join the producer before anything else is torn down
	let joined = state.delegate.end();
	estate.tuple_table.get_mut(state.scan_slot).clear();
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	state.lock.take();
	joined
}

pub fn end_index(state: &mut DelegatedIndexScanState, estate: &mut EState) -> Result<(), Error> {
	let joined = state.delegate.end();
	estate.tuple_table.get_mut(state.scan_slot).clear();
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	state.lock.take();
	joined
}

pub fn rescan_seq(_: &mut DelegatedSeqScanState, _: &mut EState) -> Result<(), Error> {
	Err(Error::Execution {
		message: "delegated seq rescan not implemented".to_owned(),
	})
}

pub fn rescan_index(_: &mut DelegatedIndexScanState, _: &mut EState) -> Result<(), Error> {
	Err(Error::Execution {
		message: "delegated index rescan not implemented".to_owned(),
	})
}
