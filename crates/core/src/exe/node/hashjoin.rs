use crate::err::Error;
use crate::exe::eval::{exec_eval_expr, exec_project, exec_qual};
use crate::exe::node::hash::{self, HashTable};
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::spill;
use crate::exe::state::EState;
use crate::plan::{HashClause, PlanCommon};

/// Hash join probe node. The right subtree is the Hash build node; the
/// left subtree feeds probe tuples, which either probe the resident
/// table or are parked in per-batch spill files for the later passes.
pub struct HashJoinState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	pub hash: Box<NodeState>,
	pub clauses: Vec<HashClause>,
	pub table: Option<HashTable>,
	/// Probe tuples are copied here so batch-file tuples and child
	/// tuples probe identically.
	pub outer_slot: SlotRef,
	/// The current build-side candidate.
	pub inner_slot: SlotRef,
	/// Probe cursor: resident bucket and position within its chain.
	cursor: Option<(usize, usize)>,
	outer_child_done: bool,
}

pub fn init(common: &PlanCommon, clauses: &[HashClause], estate: &mut EState) -> Result<HashJoinState, Error> {
	let outer = common.lefttree.as_deref().ok_or_else(|| missing("outer"))?;
	let inner = common.righttree.as_deref().ok_or_else(|| missing("hash"))?;
	let outer = Box::new(exec_init_node(outer, estate)?);
	let hash = Box::new(exec_init_node(inner, estate)?);
	if !matches!(*hash, NodeState::Hash(_)) {
		return Err(Error::Execution {
			message: "hash join requires a hash build node on its inner side".to_owned(),
		});
	}
	let common = CommonState::build(common, estate)?;
	let outer_slot = estate.tuple_table.alloc()?;
	let inner_slot = estate.tuple_table.alloc()?;
	Ok(HashJoinState {
		common,
		outer,
		hash,
		clauses: clauses.to_vec(),
		table: None,
		outer_slot,
		inner_slot,
		cursor: None,
		outer_child_done: false,
	})
}

fn missing(side: &str) -> Error {
	Error::Execution {
		message: format!("hash join is missing its {side} subtree"),
	}
}

/// Pull the next probe tuple for the current batch into the outer slot.
fn next_outer(state: &mut HashJoinState, estate: &mut EState) -> Result<bool, Error> {
	let batch = state.table.as_ref().map_or(0, |t| t.cur_batch);
	if batch == 0 {
		if state.outer_child_done {
			return Ok(false);
		}
		match exec_proc_node(&mut state.outer, estate)? {
			Some(slot) => {
				let tuple = estate.tuple_table.get(slot).tuple().cloned().ok_or_else(|| {
					Error::Execution {
						message: "probe child returned an empty slot".to_owned(),
					}
				})?;
				estate.tuple_table.get_mut(state.outer_slot).store(tuple, true);
				Ok(true)
			}
			None => {
				state.outer_child_done = true;
				Ok(false)
			}
		}
	} else {
		let table = state.table.as_mut().ok_or_else(|| missing("table"))?;
		match spill::read_row(&mut table.outer_files[batch - 1])? {
			Some(values) => {
				estate.tuple_table.get_mut(state.outer_slot).store_values(values);
				Ok(true)
			}
			None => Ok(false),
		}
	}
}

pub fn exec(state: &mut HashJoinState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	if state.common.tup_from_tlist {
		let common = &mut state.common;
		let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
		common.tup_from_tlist = !done;
		return Ok(Some(slot));
	}
	// Build the table on the first pull
	if state.table.is_none() {
		let NodeState::Hash(build) = state.hash.as_mut() else {
			return Err(missing("hash"));
		};
		state.table = Some(hash::build(build, estate)?);
	}
	loop {
		// Walk the chain of the current probe tuple
		if let Some((bucketno, chain_pos)) = state.cursor {
			let candidate = {
				let table = state.table.as_ref().ok_or_else(|| missing("table"))?;
				table.buckets[bucketno].get(chain_pos).cloned()
			};
			match candidate {
				None => {
					state.cursor = None;
				}
				Some(stored) => {
					state.cursor = Some((bucketno, chain_pos + 1));
					let values = hash::stored_values(&stored).to_vec();
					estate.tuple_table.get_mut(state.inner_slot).store_values(values);
					state.common.ectx.inner_tuple = Some(state.inner_slot);
					state.common.ectx.outer_tuple = Some(state.outer_slot);
					if clauses_match(state, estate)? {
						let common = &mut state.common;
						if exec_qual(&common.qual, &common.ectx, estate, false)? {
							let (slot, done) = exec_project(&mut common.proj, &common.ectx, estate)?;
							common.tup_from_tlist = !done;
							return Ok(Some(slot));
						}
					}
				}
			}
			continue;
		}
		// Need a new probe tuple
		if next_outer(state, estate)? {
			state.common.ectx.outer_tuple = Some(state.outer_slot);
			let key = {
				let clause = state.clauses.first().ok_or_else(|| missing("clause"))?;
				exec_eval_expr(&clause.outer.clone(), &state.common.ectx, estate)?
			};
			if key.is_null() {
				continue;
			}
			let table = state.table.as_mut().ok_or_else(|| missing("table"))?;
			let hashval = table.hash_keys(std::slice::from_ref(&key));
			let bucketno = table.bucket_of(hashval);
			if bucketno >= table.nbuckets {
				// This probe tuple belongs to a later batch
				let batch = table.batch_of(bucketno);
				let tuple = estate
					.tuple_table
					.get(state.outer_slot)
					.tuple()
					.cloned()
					.ok_or_else(|| missing("outer tuple"))?;
				spill::write_row(&mut table.outer_files[batch], &tuple.values)?;
				continue;
			}
			state.cursor = Some((bucketno, 0));
			continue;
		}
		// Probe side exhausted for this batch; advance to the next one
		let table = state.table.as_mut().ok_or_else(|| missing("table"))?;
		let next_batch = table.cur_batch + 1;
		if next_batch > table.nbatch {
			return Ok(None);
		}
		table.start_batch(next_batch)?;
		table.outer_files[next_batch - 1].seek(0)?;
	}
}

/// Evaluate every hash clause as an equality between the probe and the
/// candidate.
fn clauses_match(state: &mut HashJoinState, estate: &mut EState) -> Result<bool, Error> {
	let clauses = state.clauses.clone();
	for clause in &clauses {
		let outer = exec_eval_expr(&clause.outer, &state.common.ectx, estate)?;
		let inner = exec_eval_expr(&clause.inner, &state.common.ectx, estate)?;
		if !outer.datum_eq(&inner) {
			return Ok(false);
		}
	}
	Ok(true)
}

pub fn end(state: &mut HashJoinState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	exec_end_node(&mut state.hash, estate)?;
	// Dropping the table releases the batch files with it
	state.table = None;
	estate.tuple_table.get_mut(state.outer_slot).clear();
	estate.tuple_table.get_mut(state.inner_slot).clear();
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut HashJoinState, estate: &mut EState) -> Result<(), Error> {
	exec_rescan(&mut state.outer, estate)?;
	exec_rescan(&mut state.hash, estate)?;
	state.table = None;
	state.cursor = None;
	state.outer_child_done = false;
	Ok(())
}
