use crate::err::Error;
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::{PlanCommon, PlanNode};

/// Concatenates the output of its member plans, in order.
pub struct AppendState {
	pub common: CommonState,
	pub plans: Vec<NodeState>,
	pub whichplan: usize,
}

pub fn init(common: &PlanCommon, plans: &[PlanNode], estate: &mut EState) -> Result<AppendState, Error> {
	let mut members = Vec::with_capacity(plans.len());
	for plan in plans {
		members.push(exec_init_node(plan, estate)?);
	}
	let common = CommonState::build(common, estate)?;
	Ok(AppendState {
		common,
		plans: members,
		whichplan: 0,
	})
}

pub fn exec(state: &mut AppendState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	while state.whichplan < state.plans.len() {
		if let Some(slot) = exec_proc_node(&mut state.plans[state.whichplan], estate)? {
			return Ok(Some(slot));
		}
		// This member is exhausted; move on to the next
		state.whichplan += 1;
	}
	Ok(None)
}

pub fn end(state: &mut AppendState, estate: &mut EState) -> Result<(), Error> {
	for plan in &mut state.plans {
		exec_end_node(plan, estate)?;
	}
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut AppendState, estate: &mut EState) -> Result<(), Error> {
	for plan in &mut state.plans {
		exec_rescan(plan, estate)?;
	}
	state.whichplan = 0;
	Ok(())
}
