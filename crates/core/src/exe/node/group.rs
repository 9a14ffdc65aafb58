use crate::err::Error;
use crate::exe::eval::exec_project;
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::PlanCommon;
use crate::sql::val::Value;

/// Groups pre-sorted input on the grouping columns.
///
/// In final mode (`tuple_per_group`) one representative tuple is
/// returned per group. Otherwise every tuple is returned and a null
/// boundary marker separates groups, for an aggregate node sitting
/// above.
pub struct GroupState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	pub tuple_per_group: bool,
	pub group_cols: Vec<usize>,
	/// Grouping-column values of the current group.
	current_key: Option<Vec<Value>>,
	/// First tuple of the next group, held across a boundary marker.
	pending: Option<Vec<Value>>,
	/// Set once the subtree is fully drained; every later call returns
	/// end-of-data rather than another boundary.
	pub input_exhausted: bool,
}

pub fn init(
	common: &PlanCommon,
	tuple_per_group: bool,
	group_cols: &[usize],
	estate: &mut EState,
) -> Result<GroupState, Error> {
	let child = common.lefttree.as_deref().ok_or_else(|| Error::Execution {
		message: "group node is missing its subtree".to_owned(),
	})?;
	let outer = Box::new(exec_init_node(child, estate)?);
	let common = CommonState::build(common, estate)?;
	Ok(GroupState {
		common,
		outer,
		tuple_per_group,
		group_cols: group_cols.to_vec(),
		current_key: None,
		pending: None,
		input_exhausted: false,
	})
}

fn key_of(group_cols: &[usize], values: &[Value]) -> Vec<Value> {
	group_cols.iter().map(|col| values[col - 1].clone()).collect()
}

/// Adjacent-tuple comparison using grouping equality, where two nulls
/// belong to the same group.
fn same_group(a: &[Value], b: &[Value]) -> bool {
	a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.grouping_eq(y))
}

fn emit(state: &mut GroupState, values: Vec<Value>, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	let scratch = state.common.proj.slot;
	estate.tuple_table.get_mut(scratch).store_values(values);
	state.common.ectx.scan_tuple = Some(scratch);
	if state.common.proj.targetlist.is_empty() {
		return Ok(Some(scratch));
	}
	let common = &mut state.common;
	let (slot, _) = exec_project(&mut common.proj, &common.ectx, estate)?;
	Ok(Some(slot))
}

pub fn exec(state: &mut GroupState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	if state.input_exhausted {
		return Ok(None);
	}
	// A held-over tuple starts the next group
	if let Some(values) = state.pending.take() {
		state.current_key = Some(key_of(&state.group_cols, &values));
		return emit(state, values, estate);
	}
	loop {
		let Some(slot) = exec_proc_node(&mut state.outer, estate)? else {
			state.input_exhausted = true;
			return Ok(None);
		};
		let values = estate.tuple_table.get(slot).tuple().map(|t| t.values.clone()).ok_or_else(
			|| Error::Execution {
				message: "group child returned an empty slot".to_owned(),
			},
		)?;
		let key = key_of(&state.group_cols, &values);
		match &state.current_key {
			None => {
				state.current_key = Some(key);
				return emit(state, values, estate);
			}
			Some(current) if same_group(current, &key) => {
				if state.tuple_per_group {
					// Only the first tuple of the group is interesting
					continue;
				}
				return emit(state, values, estate);
			}
			Some(_) => {
				if state.tuple_per_group {
					state.current_key = Some(key);
					return emit(state, values, estate);
				}
				// Hold the tuple over and emit a group boundary
				state.pending = Some(values);
				return Ok(None);
			}
		}
	}
}

pub fn end(state: &mut GroupState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut GroupState, estate: &mut EState) -> Result<(), Error> {
	exec_rescan(&mut state.outer, estate)?;
	state.current_key = None;
	state.pending = None;
	state.input_exhausted = false;
	Ok(())
}
