use crate::err::Error;
use crate::exe::eval::{exec_eval_expr, exec_project, exec_qual};
use crate::exe::node::{
	exec_end_node, exec_init_node, exec_markpos, exec_proc_node, exec_rescan, exec_restrpos,
	CommonState, NodeState,
};
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::{MergeClause, PlanCommon};
use crate::sql::val::Value;
use std::cmp::Ordering;

enum Phase {
	/// Pull the first tuple from both sides.
	Initial,
	/// Advance the lagging side until the keys meet.
	Align,
	/// Keys are equal; emit the cross product of the equal groups,
	/// restoring the inner mark for each new matching outer tuple.
	Emit,
}

/// Merge join over inputs pre-sorted on the merge clauses. The inner
/// subtree must support position marks (Sort, Material or an index
/// scan).
pub struct MergeJoinState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	pub inner: Box<NodeState>,
	pub clauses: Vec<MergeClause>,
	phase: Phase,
	outer_slot: Option<SlotRef>,
	inner_slot: Option<SlotRef>,
	/// Key of the equal-group the inner mark points at.
	group_key: Vec<Value>,
	inner_exhausted: bool,
}

pub fn init(common: &PlanCommon, clauses: &[MergeClause], estate: &mut EState) -> Result<MergeJoinState, Error> {
	let outer = common.lefttree.as_deref().ok_or_else(|| missing("outer"))?;
	let inner = common.righttree.as_deref().ok_or_else(|| missing("inner"))?;
	let outer = Box::new(exec_init_node(outer, estate)?);
	let inner = Box::new(exec_init_node(inner, estate)?);
	let common = CommonState::build(common, estate)?;
	Ok(MergeJoinState {
		common,
		outer,
		inner,
		clauses: clauses.to_vec(),
		phase: Phase::Initial,
		outer_slot: None,
		inner_slot: None,
		group_key: Vec::new(),
		inner_exhausted: false,
	})
}

fn missing(side: &str) -> Error {
	Error::Execution {
		message: format!("merge join is missing its {side} subtree"),
	}
}

/// Evaluate one side's merge keys. Returns `None` when any key is null;
/// null keys match nothing and just advance their side.
fn eval_keys(
	state: &mut MergeJoinState,
	estate: &mut EState,
	outer_side: bool,
) -> Result<Option<Vec<Value>>, Error> {
	let mut keys = Vec::with_capacity(state.clauses.len());
	for clause in &state.clauses {
		let expr = if outer_side {
			&clause.outer
		} else {
			&clause.inner
		};
		let v = exec_eval_expr(expr, &state.common.ectx, estate)?;
		if v.is_null() {
			return Ok(None);
		}
		keys.push(v);
	}
	Ok(Some(keys))
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
	for (x, y) in a.iter().zip(b.iter()) {
		match x.compare(y) {
			Some(Ordering::Equal) | None => continue,
			Some(ord) => return ord,
		}
	}
	Ordering::Equal
}

fn advance_outer(state: &mut MergeJoinState, estate: &mut EState) -> Result<bool, Error> {
	match exec_proc_node(&mut state.outer, estate)? {
		Some(slot) => {
			state.outer_slot = Some(slot);
			state.common.ectx.outer_tuple = Some(slot);
			Ok(true)
		}
		None => Ok(false),
	}
}

fn advance_inner(state: &mut MergeJoinState, estate: &mut EState) -> Result<bool, Error> {
	match exec_proc_node(&mut state.inner, estate)? {
		Some(slot) => {
			state.inner_slot = Some(slot);
			state.common.ectx.inner_tuple = Some(slot);
			Ok(true)
		}
		None => {
			state.inner_exhausted = true;
			Ok(false)
		}
	}
}

pub fn exec(state: &mut MergeJoinState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	if state.common.tup_from_tlist {
		let common = &mut state.common;
		let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
		common.tup_from_tlist = !done;
		return Ok(Some(slot));
	}
	loop {
		match state.phase {
			Phase::Initial => {
				if !advance_outer(state, estate)? || !advance_inner(state, estate)? {
					return Ok(None);
				}
				state.phase = Phase::Align;
			}
			Phase::Align => {
				let Some(outer_keys) = eval_keys(state, estate, true)? else {
					if !advance_outer(state, estate)? {
						return Ok(None);
					}
					continue;
				};
				let Some(inner_keys) = eval_keys(state, estate, false)? else {
					if !advance_inner(state, estate)? {
						return Ok(None);
					}
					continue;
				};
				match compare_keys(&outer_keys, &inner_keys) {
					Ordering::Less => {
						if !advance_outer(state, estate)? {
							return Ok(None);
						}
					}
					Ordering::Greater => {
						if !advance_inner(state, estate)? {
							return Ok(None);
						}
					}
					Ordering::Equal => {
						// Remember where the equal group starts so it
						// can be replayed for later outer duplicates
						exec_markpos(&mut state.inner)?;
						state.group_key = inner_keys;
						state.phase = Phase::Emit;
					}
				}
			}
			Phase::Emit => {
				// Does the current inner tuple still belong to the group?
				let inner_in_group = if state.inner_exhausted {
					false
				} else {
					match eval_keys(state, estate, false)? {
						Some(keys) => compare_keys(&keys, &state.group_key) == Ordering::Equal,
						None => false,
					}
				};
				if inner_in_group {
					state.common.ectx.inner_tuple = state.inner_slot;
					let passed = {
						let common = &mut state.common;
						exec_qual(&common.qual, &common.ectx, estate, false)?
					};
					if passed {
						// Project first; the result slot owns a copy,
						// so the inner side can advance underneath it
						let slot = {
							let common = &mut state.common;
							let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
							common.tup_from_tlist = !done;
							slot
						};
						advance_inner(state, estate)?;
						return Ok(Some(slot));
					}
					advance_inner(state, estate)?;
					continue;
				}
				// Group finished for this outer tuple; fetch the next
				// outer and decide whether to replay the group
				if !advance_outer(state, estate)? {
					return Ok(None);
				}
				let outer_keys = eval_keys(state, estate, true)?;
				match outer_keys {
					Some(keys) if compare_keys(&keys, &state.group_key) == Ordering::Equal => {
						exec_restrpos(&mut state.inner)?;
						state.inner_exhausted = false;
						advance_inner(state, estate)?;
					}
					_ => {
						if state.inner_exhausted {
							return Ok(None);
						}
						state.phase = Phase::Align;
					}
				}
			}
		}
	}
}

pub fn end(state: &mut MergeJoinState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	exec_end_node(&mut state.inner, estate)?;
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut MergeJoinState, estate: &mut EState) -> Result<(), Error> {
	exec_rescan(&mut state.outer, estate)?;
	exec_rescan(&mut state.inner, estate)?;
	state.phase = Phase::Initial;
	state.outer_slot = None;
	state.inner_slot = None;
	state.group_key.clear();
	state.inner_exhausted = false;
	Ok(())
}
