use crate::err::Error;
use crate::exe::eval::{exec_eval_expr, exec_project, exec_qual};
use crate::exe::node::{exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::PlanCommon;
use crate::sql::expr::Expr;

/// Returns tuples from its outer plan that satisfy the qualification,
/// or, with no outer plan, a single projected tuple.
pub struct ResultState {
	pub common: CommonState,
	pub outer: Option<Box<NodeState>>,
	pub constant_qual: Option<Expr>,
	/// Result of the one-time constant qual check.
	pub const_checked: bool,
	pub const_passed: bool,
	/// For the planless form: whether the single tuple was emitted.
	pub done: bool,
}

pub fn init(
	common: &PlanCommon,
	constant_qual: Option<&Expr>,
	estate: &mut EState,
) -> Result<ResultState, Error> {
	let outer = match &common.lefttree {
		Some(child) => Some(Box::new(crate::exe::node::exec_init_node(child, estate)?)),
		None => None,
	};
	let common = CommonState::build(common, estate)?;
	Ok(ResultState {
		common,
		outer,
		constant_qual: constant_qual.cloned(),
		const_checked: false,
		const_passed: true,
		done: false,
	})
}

pub fn exec(state: &mut ResultState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	// The constant qual does not depend on any input tuple, so it is
	// checked exactly once
	if !state.const_checked {
		state.const_checked = true;
		if let Some(qual) = &state.constant_qual.clone() {
			state.const_passed =
				exec_eval_expr(qual, &state.common.ectx, estate)?.is_true();
		}
	}
	if !state.const_passed {
		return Ok(None);
	}
	if state.common.tup_from_tlist {
		let common = &mut state.common;
		let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
		common.tup_from_tlist = !done;
		return Ok(Some(slot));
	}
	match &mut state.outer {
		None => {
			// No input: project the target list once
			if state.done {
				return Ok(None);
			}
			state.done = true;
			let common = &mut state.common;
			let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
			common.tup_from_tlist = !done;
			Ok(Some(slot))
		}
		Some(outer) => loop {
			let Some(child_slot) = exec_proc_node(outer, estate)? else {
				return Ok(None);
			};
			let common = &mut state.common;
			common.ectx.outer_tuple = Some(child_slot);
			common.ectx.scan_tuple = Some(child_slot);
			if exec_qual(&common.qual, &common.ectx, estate, false)? {
				let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
				common.tup_from_tlist = !done;
				return Ok(Some(slot));
			}
		},
	}
}

pub fn end(state: &mut ResultState, estate: &mut EState) -> Result<(), Error> {
	if let Some(outer) = &mut state.outer {
		crate::exe::node::exec_end_node(outer, estate)?;
	}
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut ResultState, estate: &mut EState) -> Result<(), Error> {
	state.done = false;
	state.const_checked = false;
	if let Some(outer) = &mut state.outer {
		exec_rescan(outer, estate)?;
	}
	Ok(())
}
