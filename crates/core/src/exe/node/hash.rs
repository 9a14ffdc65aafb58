use crate::cnf::{FUDGE_FAC, MAX_PRIVATE_FILES, NTUP_PER_BUCKET, SORT_MEM};
use crate::err::Error;
use crate::exe::eval::exec_eval_expr;
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::spill;
use crate::exe::state::EState;
use crate::plan::PlanCommon;
use crate::sql::expr::Expr;
use crate::sql::val::Value;
use crate::store::buffile::BufFile;
use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};

/// Overhead added to the planner's width estimate per stored tuple.
const TUPLE_OVERHEAD: usize = 40;

/// The two-phase batched hash table shared by the Hash build node and
/// the hash join probe.
///
/// The planner's estimates pick `totalbuckets` (virtual, for hash-value
/// distribution), `nbuckets` (physically resident) and `nbatch` (spill
/// batches). Tuples hashing to a bucket at or past `nbuckets` go to one
/// of the batch files; later passes rebuild the table with
/// `totalbuckets == nbuckets` so nothing spills twice.
pub struct HashTable {
	pub nbuckets: usize,
	pub totalbuckets: usize,
	pub nbatch: usize,
	pub buckets: Vec<Vec<Vec<Value>>>,
	pub inner_files: Vec<BufFile>,
	pub outer_files: Vec<BufFile>,
	/// 0 during the first pass, then 1..=nbatch.
	pub cur_batch: usize,
	hasher: RandomState,
}

/// Pick the table geometry from the planner's estimates, mirroring the
/// cost model's sizing rules. `3 * nbatch` stays within the private
/// file budget since each batch needs an inner file, an outer file and
/// headroom for the rebuild.
fn choose_hash_table_size(rows: f64, width: u32, forced: Option<usize>) -> (usize, usize, usize) {
	let ntuples = rows.max(1.0);
	let tupsize = width as f64 + TUPLE_OVERHEAD as f64;
	let inner_bytes = ntuples * tupsize * FUDGE_FAC;
	let table_bytes = (*SORT_MEM * 1024) as f64;
	let mut totalbuckets = (ntuples * FUDGE_FAC / NTUP_PER_BUCKET as f64).ceil() as usize;
	totalbuckets = totalbuckets.max(1);
	if let Some(forced) = forced {
		if forced == 0 {
			return (totalbuckets, totalbuckets, 0);
		}
		let nbuckets = (totalbuckets / (forced + 1)).max(1);
		return (totalbuckets.max(nbuckets + forced), nbuckets, forced);
	}
	if inner_bytes <= table_bytes {
		return (totalbuckets, totalbuckets, 0);
	}
	let mut nbatch = (inner_bytes / table_bytes).ceil() as usize;
	nbatch = nbatch.min(*MAX_PRIVATE_FILES / 3).max(1);
	let mut nbuckets = (table_bytes / (tupsize * NTUP_PER_BUCKET as f64)).floor() as usize;
	nbuckets = nbuckets.max(1);
	if totalbuckets < nbuckets {
		totalbuckets = nbuckets;
	}
	(totalbuckets, nbuckets, nbatch)
}

impl HashTable {
	pub fn create(rows: f64, width: u32, forced: Option<usize>) -> Result<Self, Error> {
		let (totalbuckets, nbuckets, nbatch) = choose_hash_table_size(rows, width, forced);
		debug!("hash table sized: nbatch={nbatch} totalbuckets={totalbuckets} nbuckets={nbuckets}");
		let mut inner_files = Vec::with_capacity(nbatch);
		let mut outer_files = Vec::with_capacity(nbatch);
		for _ in 0..nbatch {
			inner_files.push(BufFile::create()?);
			outer_files.push(BufFile::create()?);
		}
		Ok(Self {
			nbuckets,
			totalbuckets,
			nbatch,
			buckets: (0..nbuckets).map(|_| Vec::new()).collect(),
			inner_files,
			outer_files,
			cur_batch: 0,
			// Seeds are fixed per table so build and probe agree
			hasher: RandomState::with_seeds(11, 23, 47, 97),
		})
	}

	/// Combined hash of a key value list.
	pub fn hash_keys(&self, keys: &[Value]) -> u64 {
		let mut h = self.hasher.build_hasher();
		for key in keys {
			key.hash_datum(&mut h);
		}
		h.finish()
	}

	pub fn bucket_of(&self, hash: u64) -> usize {
		(hash % self.totalbuckets as u64) as usize
	}

	/// Which batch file a virtual (non-resident) bucket spills to.
	pub fn batch_of(&self, bucketno: usize) -> usize {
		(self.nbatch * (bucketno - self.nbuckets)) / (self.totalbuckets - self.nbuckets)
	}

	/// Insert a build-side tuple, spilling it when its bucket is not
	/// resident in this pass.
	pub fn insert(&mut self, hash: u64, values: &[Value]) -> Result<(), Error> {
		let bucketno = self.bucket_of(hash);
		if bucketno < self.nbuckets {
			self.buckets[bucketno].push(values.to_vec());
		} else {
			let batch = self.batch_of(bucketno);
			spill::write_row(&mut self.inner_files[batch], values)?;
		}
		Ok(())
	}

	/// Move to the given batch: drop the resident table, collapse the
	/// virtual buckets onto the physical ones, and reload the batch's
	/// build side.
	pub fn start_batch(&mut self, batch: usize) -> Result<(), Error> {
		self.cur_batch = batch;
		for bucket in &mut self.buckets {
			bucket.clear();
		}
		// From now on every bucket is resident, so nothing spills again
		self.totalbuckets = self.nbuckets;
		let mut file = std::mem::replace(&mut self.inner_files[batch - 1], BufFile::create()?);
		file.seek(0)?;
		while let Some(values) = spill::read_row(&mut file)? {
			let keyless = self.hash_stored(&values);
			let bucketno = self.bucket_of(keyless);
			self.buckets[bucketno].push(values);
		}
		Ok(())
	}

	/// Re-hash a stored build row by its saved key prefix. Build rows
	/// are stored as `key values ++ tuple values`; see the Hash node.
	fn hash_stored(&self, stored: &[Value]) -> u64 {
		let nkeys = stored
			.first()
			.and_then(|v| match v {
				Value::Int4(n) => Some(*n as usize),
				_ => None,
			})
			.unwrap_or(0);
		self.hash_keys(&stored[1..=nkeys])
	}
}

/// The hash build node. It is initialized like any other node but never
/// pulled through the normal protocol; the owning hash join drives
/// [`build`] to fill the table.
pub struct HashState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	pub key: Expr,
	pub rows: f64,
	pub width: u32,
	pub forced_batches: Option<usize>,
}

pub fn init(
	common: &PlanCommon,
	key: &Expr,
	forced_batches: Option<usize>,
	estate: &mut EState,
) -> Result<HashState, Error> {
	let child = common.lefttree.as_deref().ok_or_else(|| Error::Execution {
		message: "hash node is missing its subtree".to_owned(),
	})?;
	let rows = child.common().cost.rows;
	let width = child.common().cost.width;
	let outer = Box::new(exec_init_node(child, estate)?);
	let common = CommonState::build(common, estate)?;
	Ok(HashState {
		common,
		outer,
		key: key.clone(),
		rows,
		width,
		forced_batches,
	})
}

pub fn exec(_: &mut HashState, _: &mut EState) -> Result<Option<SlotRef>, Error> {
	Err(Error::Execution {
		message: "hash build node cannot be pulled directly".to_owned(),
	})
}

/// Drain the build side into a fresh hash table.
///
/// Each stored row is `[nkeys, key values.., tuple values..]` so spilled
/// batches can be re-hashed without re-evaluating the key expression.
pub fn build(state: &mut HashState, estate: &mut EState) -> Result<HashTable, Error> {
	let mut table = HashTable::create(state.rows, state.width, state.forced_batches)?;
	while let Some(slot) = exec_proc_node(&mut state.outer, estate)? {
		state.common.ectx.scan_tuple = Some(slot);
		state.common.ectx.inner_tuple = Some(slot);
		let key = exec_eval_expr(&state.key, &state.common.ectx, estate)?;
		// Null keys can never match an equi-join clause
		if key.is_null() {
			continue;
		}
		let tuple = estate.tuple_table.get(slot).tuple().ok_or_else(|| Error::Execution {
			message: "hash build child returned an empty slot".to_owned(),
		})?;
		let mut stored = Vec::with_capacity(tuple.values.len() + 2);
		stored.push(Value::Int4(1));
		stored.push(key.clone());
		stored.extend(tuple.values.iter().cloned());
		let hash = table.hash_keys(std::slice::from_ref(&key));
		table.insert(hash, &stored)?;
	}
	Ok(table)
}

/// The tuple values of a stored build row, without the key prefix.
pub fn stored_values(stored: &[Value]) -> &[Value] {
	let nkeys = match stored.first() {
		Some(Value::Int4(n)) => *n as usize,
		_ => 0,
	};
	&stored[nkeys + 1..]
}

pub fn end(state: &mut HashState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut HashState, estate: &mut EState) -> Result<(), Error> {
	exec_rescan(&mut state.outer, estate)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn small_builds_stay_in_memory() {
		let (total, resident, nbatch) = choose_hash_table_size(100.0, 16, None);
		assert_eq!(nbatch, 0);
		assert_eq!(total, resident);
	}

	#[test]
	fn oversized_builds_spill_within_the_file_budget() {
		let (total, resident, nbatch) = choose_hash_table_size(10_000_000.0, 64, None);
		assert!(nbatch >= 1);
		assert!(3 * nbatch <= *MAX_PRIVATE_FILES);
		assert!(resident <= total);
	}

	#[test]
	fn forced_batches_are_honored() {
		for forced in [0, 2, 4, 8] {
			let (_, _, nbatch) = choose_hash_table_size(1000.0, 16, Some(forced));
			assert_eq!(nbatch, forced);
		}
	}
}
