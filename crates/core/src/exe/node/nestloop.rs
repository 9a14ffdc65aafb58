use crate::err::Error;
use crate::exe::eval::{exec_project, exec_qual};
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::PlanCommon;

/// Nested loop join: for every outer tuple, rescan the inner subtree and
/// test each inner tuple against the join qual.
pub struct NestLoopState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	pub inner: Box<NodeState>,
	pub need_new_outer: bool,
}

pub fn init(common: &PlanCommon, estate: &mut EState) -> Result<NestLoopState, Error> {
	let outer = common.lefttree.as_deref().ok_or_else(|| no_child("outer"))?;
	let inner = common.righttree.as_deref().ok_or_else(|| no_child("inner"))?;
	let outer = Box::new(exec_init_node(outer, estate)?);
	let inner = Box::new(exec_init_node(inner, estate)?);
	let common = CommonState::build(common, estate)?;
	Ok(NestLoopState {
		common,
		outer,
		inner,
		need_new_outer: true,
	})
}

fn no_child(side: &str) -> Error {
	Error::Execution {
		message: format!("join node is missing its {side} subtree"),
	}
}

pub fn exec(state: &mut NestLoopState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	if state.common.tup_from_tlist {
		let common = &mut state.common;
		let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
		common.tup_from_tlist = !done;
		return Ok(Some(slot));
	}
	loop {
		if state.need_new_outer {
			let Some(outer_slot) = exec_proc_node(&mut state.outer, estate)? else {
				return Ok(None);
			};
			state.common.ectx.outer_tuple = Some(outer_slot);
			// Let inner scans see the new outer tuple in their keys,
			// then restart them against it
			state.inner.common_mut().ectx.outer_tuple = Some(outer_slot);
			exec_rescan(&mut state.inner, estate)?;
			state.need_new_outer = false;
		}
		match exec_proc_node(&mut state.inner, estate)? {
			None => {
				state.need_new_outer = true;
			}
			Some(inner_slot) => {
				let common = &mut state.common;
				common.ectx.inner_tuple = Some(inner_slot);
				if exec_qual(&common.qual, &common.ectx, estate, false)? {
					let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
					common.tup_from_tlist = !done;
					return Ok(Some(slot));
				}
			}
		}
	}
}

pub fn end(state: &mut NestLoopState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	exec_end_node(&mut state.inner, estate)?;
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut NestLoopState, estate: &mut EState) -> Result<(), Error> {
	exec_rescan(&mut state.outer, estate)?;
	state.need_new_outer = true;
	Ok(())
}
