use crate::err::Error;
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::{Direction, PlanCommon};
use crate::sql::val::Value;

/// Collects its subplan's output, then replays it from the collection.
/// Breaks pipeline dependencies and makes the subtree restartable and
/// scrollable.
pub struct MaterialState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	tuples: Vec<Vec<Value>>,
	filled: bool,
	/// Index of the next tuple going forward.
	pub pos: usize,
	pub mark: Option<usize>,
}

pub fn init(common: &PlanCommon, estate: &mut EState) -> Result<MaterialState, Error> {
	let child = common.lefttree.as_deref().ok_or_else(|| Error::Execution {
		message: "material node is missing its subtree".to_owned(),
	})?;
	let outer = Box::new(exec_init_node(child, estate)?);
	let common = CommonState::build(common, estate)?;
	Ok(MaterialState {
		common,
		outer,
		tuples: Vec::new(),
		filled: false,
		pos: 0,
		mark: None,
	})
}

fn fill(state: &mut MaterialState, estate: &mut EState) -> Result<(), Error> {
	while let Some(slot) = exec_proc_node(&mut state.outer, estate)? {
		let tuple = estate.tuple_table.get(slot).tuple().ok_or_else(|| Error::Execution {
			message: "material child returned an empty slot".to_owned(),
		})?;
		state.tuples.push(tuple.values.clone());
	}
	state.filled = true;
	Ok(())
}

pub fn exec(state: &mut MaterialState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	if !state.filled {
		fill(state, estate)?;
	}
	let values = match estate.direction {
		Direction::Backward => {
			if state.pos == 0 {
				return Ok(None);
			}
			state.pos -= 1;
			state.tuples[state.pos].clone()
		}
		_ => {
			let Some(values) = state.tuples.get(state.pos) else {
				return Ok(None);
			};
			state.pos += 1;
			values.clone()
		}
	};
	let slot = state.common.proj.slot;
	estate.tuple_table.get_mut(slot).store_values(values);
	Ok(Some(slot))
}

pub fn end(state: &mut MaterialState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	state.tuples.clear();
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut MaterialState, estate: &mut EState) -> Result<(), Error> {
	if state.outer.common().chg_param {
		// The subtree depends on changed parameters; the collection is
		// stale and must be rebuilt
		exec_rescan(&mut state.outer, estate)?;
		state.tuples.clear();
		state.filled = false;
	}
	state.pos = 0;
	state.mark = None;
	Ok(())
}
