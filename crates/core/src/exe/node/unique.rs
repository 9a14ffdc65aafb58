use crate::err::Error;
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::PlanCommon;
use crate::sql::val::Value;

/// Drops adjacent duplicates from pre-sorted input, comparing the
/// configured output columns (or the whole tuple).
pub struct UniqueState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	pub unique_cols: Vec<usize>,
	prev: Option<Vec<Value>>,
}

pub fn init(common: &PlanCommon, unique_cols: &[usize], estate: &mut EState) -> Result<UniqueState, Error> {
	let child = common.lefttree.as_deref().ok_or_else(|| Error::Execution {
		message: "unique node is missing its subtree".to_owned(),
	})?;
	let outer = Box::new(exec_init_node(child, estate)?);
	let common = CommonState::build(common, estate)?;
	Ok(UniqueState {
		common,
		outer,
		unique_cols: unique_cols.to_vec(),
		prev: None,
	})
}

fn comparison_key(unique_cols: &[usize], values: &[Value]) -> Vec<Value> {
	if unique_cols.is_empty() {
		values.to_vec()
	} else {
		unique_cols.iter().map(|col| values[col - 1].clone()).collect()
	}
}

pub fn exec(state: &mut UniqueState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	loop {
		let Some(slot) = exec_proc_node(&mut state.outer, estate)? else {
			return Ok(None);
		};
		let values = estate.tuple_table.get(slot).tuple().map(|t| t.values.clone()).ok_or_else(
			|| Error::Execution {
				message: "unique child returned an empty slot".to_owned(),
			},
		)?;
		let key = comparison_key(&state.unique_cols, &values);
		let duplicate = state
			.prev
			.as_ref()
			.is_some_and(|prev| prev.len() == key.len() && prev.iter().zip(key.iter()).all(|(a, b)| a.grouping_eq(b)));
		if duplicate {
			continue;
		}
		state.prev = Some(key);
		let out = state.common.proj.slot;
		estate.tuple_table.get_mut(out).store_values(values);
		return Ok(Some(out));
	}
}

pub fn end(state: &mut UniqueState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut UniqueState, estate: &mut EState) -> Result<(), Error> {
	exec_rescan(&mut state.outer, estate)?;
	state.prev = None;
	Ok(())
}
