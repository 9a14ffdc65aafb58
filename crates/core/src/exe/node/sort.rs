use crate::cnf::SORT_SPILL_THRESHOLD;
use crate::err::Error;
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::spill;
use crate::exe::state::EState;
use crate::plan::{Direction, PlanCommon, SortKey};
use crate::sql::val::Value;
use crate::store::buffile::BufFile;
use std::cmp::Ordering;

/// Sorts its subplan's output. Oversized inputs spill pre-sorted runs
/// to buffered temp files and are merged back on the first read.
pub struct SortState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	pub keys: Vec<SortKey>,
	tuples: Vec<Vec<Value>>,
	runs: Vec<BufFile>,
	sorted: bool,
	pub pos: usize,
	pub mark: Option<usize>,
}

pub fn init(common: &PlanCommon, keys: &[SortKey], estate: &mut EState) -> Result<SortState, Error> {
	let child = common.lefttree.as_deref().ok_or_else(|| Error::Execution {
		message: "sort node is missing its subtree".to_owned(),
	})?;
	let outer = Box::new(exec_init_node(child, estate)?);
	let common = CommonState::build(common, estate)?;
	Ok(SortState {
		common,
		outer,
		keys: keys.to_vec(),
		tuples: Vec::new(),
		runs: Vec::new(),
		sorted: false,
		pos: 0,
		mark: None,
	})
}

fn compare(keys: &[SortKey], a: &[Value], b: &[Value]) -> Ordering {
	for key in keys {
		let x = &a[key.attno - 1];
		let y = &b[key.attno - 1];
		let ord = match x.compare(y) {
			Some(ord) => ord,
			// Nulls sort after everything else
			None => match (x.is_null(), y.is_null()) {
				(true, false) => Ordering::Greater,
				(false, true) => Ordering::Less,
				_ => Ordering::Equal,
			},
		};
		let ord = if key.descending {
			ord.reverse()
		} else {
			ord
		};
		if ord != Ordering::Equal {
			return ord;
		}
	}
	Ordering::Equal
}

fn spill_run(state: &mut SortState) -> Result<(), Error> {
	let keys = state.keys.clone();
	state.tuples.sort_by(|a, b| compare(&keys, a, b));
	let mut run = BufFile::create()?;
	for row in state.tuples.drain(..) {
		spill::write_row(&mut run, &row)?;
	}
	state.runs.push(run);
	Ok(())
}

fn perform_sort(state: &mut SortState, estate: &mut EState) -> Result<(), Error> {
	while let Some(slot) = exec_proc_node(&mut state.outer, estate)? {
		let tuple = estate.tuple_table.get(slot).tuple().ok_or_else(|| Error::Execution {
			message: "sort child returned an empty slot".to_owned(),
		})?;
		state.tuples.push(tuple.values.clone());
		if state.tuples.len() >= *SORT_SPILL_THRESHOLD {
			spill_run(state)?;
		}
	}
	let keys = state.keys.clone();
	if state.runs.is_empty() {
		state.tuples.sort_by(|a, b| compare(&keys, a, b));
	} else {
		// Merge the spilled runs with the resident tail
		spill_run(state)?;
		let mut heads: Vec<Option<Vec<Value>>> = Vec::with_capacity(state.runs.len());
		for run in &mut state.runs {
			run.seek(0)?;
			heads.push(spill::read_row(run)?);
		}
		let mut merged = Vec::new();
		loop {
			let mut best: Option<usize> = None;
			for i in 0..heads.len() {
				let Some(row) = heads[i].as_ref() else {
					continue;
				};
				best = match best.and_then(|b| heads[b].as_ref().map(|r| (b, r))) {
					Some((b, current)) if compare(&keys, row, current) != Ordering::Less => Some(b),
					_ => Some(i),
				};
			}
			let Some(row) = best.and_then(|w| heads[w].take()) else {
				break;
			};
			merged.push(row);
			if let Some(winner) = best {
				heads[winner] = spill::read_row(&mut state.runs[winner])?;
			}
		}
		state.tuples = merged;
		state.runs.clear();
	}
	state.sorted = true;
	Ok(())
}

pub fn exec(state: &mut SortState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	if !state.sorted {
		perform_sort(state, estate)?;
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

pub fn end(state: &mut SortState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	state.tuples.clear();
	state.runs.clear();
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut SortState, estate: &mut EState) -> Result<(), Error> {
	if state.outer.common().chg_param {
		exec_rescan(&mut state.outer, estate)?;
		state.tuples.clear();
		state.runs.clear();
		state.sorted = false;
	}
	state.pos = 0;
	state.mark = None;
	Ok(())
}
