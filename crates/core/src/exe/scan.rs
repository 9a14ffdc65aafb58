use crate::err::Error;
use crate::exe::eval::{exec_project, exec_qual};
use crate::exe::node::CommonState;
use crate::exe::slot::SlotRef;
use crate::exe::state::{EState, ExprContext};
use crate::store::buffer::PinnedBuffer;
use crate::store::tuple::HeapTuple;

/// One tuple delivered by a scan access method, optionally carrying the
/// pin that keeps its block resident.
pub type ScanTuple = (HeapTuple, Option<PinnedBuffer>);

/// Access-method callback of the generic scan loop. It receives the
/// executor state and the node's expression context so index access
/// methods can re-check disjuncts against the candidate tuple.
pub type ScanAccess<'a> =
	dyn FnMut(&mut EState, &mut ExprContext) -> Result<Option<ScanTuple>, Error> + 'a;

/// The reusable scan loop: pull tuples from the access method, bind each
/// as the scan tuple, test the node's qual, and project survivors.
///
/// Also implements the plan-requal bypass: when a replacement tuple has
/// been installed for this node's range table index (because a write
/// found the row concurrently updated), that tuple is returned once and
/// a null marker prevents it from being returned again.
pub fn exec_scan(
	common: &mut CommonState,
	scan_slot: SlotRef,
	estate: &mut EState,
	access: &mut ScanAccess,
) -> Result<Option<SlotRef>, Error> {
	let relid = common.ectx.relid;
	if relid > 0 {
		if let Some(replacement) = estate.ev_tuple[relid - 1].clone() {
			if estate.ev_tuple_null[relid - 1] {
				// The replacement was already returned
				estate.tuple_table.get_mut(scan_slot).clear();
				return Ok(None);
			}
			estate.ev_tuple_null[relid - 1] = true;
			estate.tuple_table.get_mut(scan_slot).store(replacement, true);
			common.ectx.scan_tuple = Some(scan_slot);
			if !exec_qual(&common.qual, &common.ectx, estate, false)? {
				return Ok(None);
			}
			let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
			common.tup_from_tlist = !done;
			return Ok(Some(slot));
		}
	}

	// A set-returning projection may still be iterating over the
	// previous scan tuple
	if common.tup_from_tlist {
		let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
		common.tup_from_tlist = !done;
		return Ok(Some(slot));
	}

	loop {
		let fetched = access(estate, &mut common.ectx)?;
		let Some((tuple, pin)) = fetched else {
			// Nothing more to scan
			common.tup_from_tlist = false;
			estate.tuple_table.get_mut(scan_slot).clear();
			estate.tuple_table.get_mut(common.proj.slot).clear();
			return Ok(None);
		};
		match pin {
			Some(pin) => estate.tuple_table.get_mut(scan_slot).store_pinned(tuple, pin),
			None => estate.tuple_table.get_mut(scan_slot).store(tuple, true),
		}
		common.ectx.scan_tuple = Some(scan_slot);
		if common.qual.is_empty() || exec_qual(&common.qual, &common.ectx, estate, false)? {
			break;
		}
	}

	let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
	common.tup_from_tlist = !done;
	Ok(Some(slot))
}
