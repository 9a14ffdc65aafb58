use crate::err::Error;
use crate::exe::eval::{exec_eval_expr, exec_qual};
use crate::exe::node::CommonState;
use crate::exe::scan::exec_scan;
use crate::exe::slot::SlotRef;
use crate::exe::state::{EState, ExprContext};
use crate::plan::{Direction, IndexQual, PlanCommon};
use crate::sql::expr::Expr;
use crate::store::heap::HeapRelation;
use crate::store::index::{IndexRelation, IndexScan, ScanKey};
use crate::store::lock::{LockMode, RelationLockGuard};
use std::sync::Arc;

/// Index scan over a heap relation, supporting OR-of-AND qualifications
/// as a list of index descriptors walked in turn.
pub struct IndexScanState {
	pub common: CommonState,
	pub scan_slot: SlotRef,
	pub rel: Arc<HeapRelation>,
	pub lock: Option<RelationLockGuard>,
	pub indices: Vec<Arc<IndexRelation>>,
	pub indexquals: Vec<Vec<IndexQual>>,
	/// Original disjunct expressions; a matched heap tuple is re-checked
	/// against every earlier disjunct so no tuple is reported twice.
	pub qual_orig: Vec<Vec<Expr>>,
	pub scans: Vec<IndexScan>,
	pub current: usize,
	pub direction: Direction,
	mark: Option<usize>,
}

/// Evaluate the planner's scan-key clauses into concrete keys.
pub(crate) fn build_scan_keys(
	quals: &[IndexQual],
	ectx: &ExprContext,
	estate: &mut EState,
) -> Result<Vec<ScanKey>, Error> {
	let mut keys = Vec::with_capacity(quals.len());
	for qual in quals {
		let value = exec_eval_expr(&qual.value, ectx, estate)?;
		keys.push(ScanKey {
			attno: qual.attno,
			strategy: qual.strategy,
			is_null: value.is_null(),
			value,
		});
	}
	Ok(keys)
}

pub fn init(
	common: &PlanCommon,
	scanrelid: usize,
	indices: &[String],
	indexquals: &[Vec<IndexQual>],
	indexqualorig: &[Vec<Expr>],
	direction: Direction,
	estate: &mut EState,
) -> Result<IndexScanState, Error> {
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

	let mut opened = Vec::with_capacity(indices.len());
	let mut scans = Vec::with_capacity(indices.len());
	let backward = direction == Direction::Backward;
	for (name, quals) in indices.iter().zip(indexquals.iter()) {
		let index = estate.db.index(name)?;
		let keys = build_scan_keys(quals, &common.ectx, estate)?;
		scans.push(index.begin_scan(backward, &keys)?);
		opened.push(index);
	}
	Ok(IndexScanState {
		common,
		scan_slot,
		rel,
		lock: Some(lock),
		indices: opened,
		indexquals: indexquals.to_vec(),
		qual_orig: indexqualorig.to_vec(),
		scans,
		current: 0,
		direction,
		mark: None,
	})
}

pub fn exec(state: &mut IndexScanState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	let IndexScanState {
		common,
		scan_slot,
		rel,
		scans,
		current,
		qual_orig,
		..
	} = state;
	let slot = *scan_slot;
	exec_scan(common, slot, estate, &mut |estate, ectx| {
		'scans: while *current < scans.len() {
			let Some(tid) = scans[*current].getnext() else {
				*current += 1;
				continue;
			};
			let snapshot = estate.snapshot.clone();
			let Some((tuple, pin)) = rel.fetch(tid, &snapshot, &estate.db.xact, &estate.db.buffers) else {
				// Dead to this snapshot
				continue;
			};
			// Re-check earlier disjuncts so a tuple matching several
			// OR arms is reported only once
			if *current > 0 {
				estate.tuple_table.get_mut(slot).store_pinned(tuple.clone(), pin);
				ectx.scan_tuple = Some(slot);
				for prior in qual_orig.iter().take(*current) {
					if exec_qual(prior, ectx, estate, false)? {
						continue 'scans;
					}
				}
				return Ok(Some((tuple, None)));
			}
			return Ok(Some((tuple, Some(pin))));
		}
		Ok(None)
	})
}

pub fn end(state: &mut IndexScanState, estate: &mut EState) -> Result<(), Error> {
	estate.tuple_table.get_mut(state.scan_slot).clear();
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	state.scans.clear();
	state.lock.take();
	Ok(())
}

pub fn rescan(state: &mut IndexScanState, estate: &mut EState) -> Result<(), Error> {
	// Scan keys can reference parameters whose values changed; rebuild
	// them and restart every disjunct
	let backward = state.direction == Direction::Backward;
	let mut scans = Vec::with_capacity(state.indices.len());
	for (index, quals) in state.indices.iter().zip(state.indexquals.iter()) {
		let keys = build_scan_keys(quals, &state.common.ectx, estate)?;
		scans.push(index.begin_scan(backward, &keys)?);
	}
	state.scans = scans;
	state.current = 0;
	Ok(())
}

/// Mark the position of the active index descriptor.
pub fn markpos(state: &mut IndexScanState) -> Result<(), Error> {
	if let Some(scan) = state.scans.get_mut(state.current) {
		scan.markpos();
		state.mark = Some(state.current);
	}
	Ok(())
}

pub fn restrpos(state: &mut IndexScanState) -> Result<(), Error> {
	if let Some(index) = state.mark {
		state.current = index;
		if let Some(scan) = state.scans.get_mut(index) {
			scan.restrpos();
		}
	}
	Ok(())
}
