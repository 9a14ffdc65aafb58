use crate::err::Error;
use crate::exe::node::CommonState;
use crate::exe::scan::exec_scan;
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::PlanCommon;
use crate::store::heap::{HeapRelation, HeapScan};
use crate::store::lock::{LockMode, RelationLockGuard};
use std::sync::Arc;

/// Sequential scan over a heap relation.
pub struct SeqScanState {
	pub common: CommonState,
	pub scan_slot: SlotRef,
	pub rel: Arc<HeapRelation>,
	pub scan: HeapScan,
	/// AccessShare lock held from init to end.
	pub lock: Option<RelationLockGuard>,
}

pub fn init(common: &PlanCommon, scanrelid: usize, estate: &mut EState) -> Result<SeqScanState, Error> {
	let mut common = CommonState::build(common, estate)?;
	let scan_slot = estate.tuple_table.alloc()?;
	let rel = estate.open_relation(scanrelid)?;
	let lock = estate.db.locks.lock_relation(rel.id, LockMode::AccessShare);
	let scan = rel.begin_scan(
		estate.snapshot.clone(),
		Arc::clone(&estate.db.xact),
		Arc::clone(&estate.db.buffers),
	);
	estate.tuple_table.get_mut(scan_slot).set_desc(rel.desc.clone());
	common.ectx.relation = Some(Arc::clone(&rel));
	common.ectx.relid = scanrelid;
	Ok(SeqScanState {
		common,
		scan_slot,
		rel,
		scan,
		lock: Some(lock),
	})
}

pub fn exec(state: &mut SeqScanState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	let SeqScanState {
		common,
		scan_slot,
		scan,
		..
	} = state;
	let direction = estate.direction;
	exec_scan(common, *scan_slot, estate, &mut |_, _| {
		Ok(scan.getnext(direction).map(|(t, pin)| (t, Some(pin))))
	})
}

pub fn end(state: &mut SeqScanState, estate: &mut EState) -> Result<(), Error> {
	estate.tuple_table.get_mut(state.scan_slot).clear();
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	// Drop the scan lock last, after the pins went away
	state.lock.take();
	Ok(())
}

pub fn rescan(state: &mut SeqScanState, estate: &mut EState) -> Result<(), Error> {
	state.scan.rescan(estate.snapshot.clone());
	Ok(())
}
