use crate::err::Error;
use crate::exe::eval::exec_eval_expr;
use crate::exe::node::CommonState;
use crate::exe::scan::exec_scan;
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::PlanCommon;
use crate::sql::expr::Expr;
use crate::store::heap::HeapRelation;
use crate::store::lock::{LockMode, RelationLockGuard};
use crate::store::tuple::ItemPointer;
use std::sync::Arc;

/// Direct fetch of heap tuples by item pointer.
pub struct TidScanState {
	pub common: CommonState,
	pub scan_slot: SlotRef,
	pub rel: Arc<HeapRelation>,
	pub lock: Option<RelationLockGuard>,
	pub tideval: Vec<Expr>,
	pub tids: Vec<ItemPointer>,
	pub pos: usize,
}

fn eval_tids(
	tideval: &[Expr],
	common: &CommonState,
	estate: &mut EState,
) -> Result<Vec<ItemPointer>, Error> {
	let mut tids = Vec::with_capacity(tideval.len());
	for expr in tideval {
		let v = exec_eval_expr(expr, &common.ectx, estate)?;
		if !v.is_null() {
			tids.push(ItemPointer::from_datum(&v)?);
		}
	}
	Ok(tids)
}

pub fn init(
	common: &PlanCommon,
	scanrelid: usize,
	tideval: &[Expr],
	estate: &mut EState,
) -> Result<TidScanState, Error> {
	let mut common = CommonState::build(common, estate)?;
	let scan_slot = estate.tuple_table.alloc()?;
	let rel = estate.open_relation(scanrelid)?;
	let lock = estate.db.locks.lock_relation(rel.id, LockMode::AccessShare);
	estate.tuple_table.get_mut(scan_slot).set_desc(rel.desc.clone());
	common.ectx.relation = Some(Arc::clone(&rel));
	common.ectx.relid = scanrelid;
	let tids = eval_tids(tideval, &common, estate)?;
	Ok(TidScanState {
		common,
		scan_slot,
		rel,
		lock: Some(lock),
		tideval: tideval.to_vec(),
		tids,
		pos: 0,
	})
}

pub fn exec(state: &mut TidScanState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	let TidScanState {
		common,
		scan_slot,
		rel,
		tids,
		pos,
		..
	} = state;
	exec_scan(common, *scan_slot, estate, &mut |estate, _| {
		while *pos < tids.len() {
			let tid = tids[*pos];
			*pos += 1;
			let snapshot = estate.snapshot.clone();
			if let Some((tuple, pin)) = rel.fetch(tid, &snapshot, &estate.db.xact, &estate.db.buffers) {
				return Ok(Some((tuple, Some(pin))));
			}
		}
		Ok(None)
	})
}

pub fn end(state: &mut TidScanState, estate: &mut EState) -> Result<(), Error> {
	estate.tuple_table.get_mut(state.scan_slot).clear();
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	state.lock.take();
	Ok(())
}

pub fn rescan(state: &mut TidScanState, estate: &mut EState) -> Result<(), Error> {
	// The pointer expressions may reference parameters; re-evaluate them
	let tideval = state.tideval.clone();
	state.tids = eval_tids(&tideval, &state.common, estate)?;
	state.pos = 0;
	Ok(())
}
