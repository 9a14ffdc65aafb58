use crate::err::Error;
use crate::sql::val::Value;
use crate::store::tuple::ItemPointer;
use crate::store::Oid;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;

/// Comparison strategy of one scan key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
	Lt,
	Le,
	Eq,
	Ge,
	Gt,
}

impl Strategy {
	fn admits(&self, ord: Ordering) -> bool {
		match self {
			Strategy::Lt => ord == Ordering::Less,
			Strategy::Le => ord != Ordering::Greater,
			Strategy::Eq => ord == Ordering::Equal,
			Strategy::Ge => ord != Ordering::Less,
			Strategy::Gt => ord == Ordering::Greater,
		}
	}
}

/// One evaluated scan key: `key-column strategy constant`.
#[derive(Clone, Debug)]
pub struct ScanKey {
	/// 1-based key column within the index.
	pub attno: usize,
	pub strategy: Strategy,
	pub value: Value,
	pub is_null: bool,
}

impl ScanKey {
	fn matches(&self, key: &[Value]) -> bool {
		if self.is_null {
			return false;
		}
		match key.get(self.attno - 1) {
			Some(v) => match v.compare(&self.value) {
				Some(ord) => self.strategy.admits(ord),
				None => false,
			},
			None => false,
		}
	}
}

/// A pluggable access method for extension index types. The built-in
/// b-tree is dispatched directly; anything registered with the database
/// under a method name routes through this trait.
pub trait AccessMethod: Send + Sync {
	/// Collect the item pointers matching `keys`, in scan order.
	fn collect(&self, keys: &[ScanKey], backward: bool) -> Result<Vec<ItemPointer>, Error>;
	fn insert(&self, key: Vec<Value>, tid: ItemPointer) -> Result<(), Error>;
	fn delete(&self, key: &[Value], tid: ItemPointer) -> Result<(), Error>;
}

#[derive(Default)]
struct BTreeStore {
	/// Entries kept sorted by key, then by pointer for stability.
	entries: Vec<(Vec<Value>, ItemPointer)>,
}

impl BTreeStore {
	fn ordering(a: &[Value], b: &[Value]) -> Ordering {
		for (x, y) in a.iter().zip(b.iter()) {
			match x.compare(y) {
				Some(Ordering::Equal) => continue,
				Some(ord) => return ord,
				// Nulls sort last so scans stay deterministic
				None => match (x.is_null(), y.is_null()) {
					(true, false) => return Ordering::Greater,
					(false, true) => return Ordering::Less,
					_ => continue,
				},
			}
		}
		Ordering::Equal
	}
}

enum Inner {
	BTree(RwLock<BTreeStore>),
	Custom(Arc<dyn AccessMethod>),
}

/// One index over a heap relation, dispatching through the built-in
/// b-tree or a registered access method.
pub struct IndexRelation {
	pub id: Oid,
	pub name: String,
	pub table: Oid,
	/// 1-based heap attribute numbers forming the key.
	pub key_cols: Vec<usize>,
	pub unique: bool,
	inner: Inner,
}

impl IndexRelation {
	pub fn btree(id: Oid, name: &str, table: Oid, key_cols: Vec<usize>, unique: bool) -> Self {
		Self {
			id,
			name: name.to_owned(),
			table,
			key_cols,
			unique,
			inner: Inner::BTree(RwLock::new(BTreeStore::default())),
		}
	}

	pub fn custom(
		id: Oid,
		name: &str,
		table: Oid,
		key_cols: Vec<usize>,
		method: Arc<dyn AccessMethod>,
	) -> Self {
		Self {
			id,
			name: name.to_owned(),
			table,
			key_cols,
			unique: false,
			inner: Inner::Custom(method),
		}
	}

	/// Insert a key for the heap tuple at `tid`.
	pub fn insert(&self, key: Vec<Value>, tid: ItemPointer) -> Result<(), Error> {
		match &self.inner {
			Inner::BTree(store) => {
				let mut store = store.write();
				if self.unique
					&& store
						.entries
						.iter()
						.any(|(k, _)| BTreeStore::ordering(k, &key) == Ordering::Equal)
				{
					return Err(Error::Execution {
						message: format!("duplicate key violates unique index '{}'", self.name),
					});
				}
				let at = store
					.entries
					.partition_point(|(k, t)| {
						match BTreeStore::ordering(k, &key) {
							Ordering::Less => true,
							Ordering::Equal => *t < tid,
							Ordering::Greater => false,
						}
					});
				store.entries.insert(at, (key, tid));
				Ok(())
			}
			Inner::Custom(method) => method.insert(key, tid),
		}
	}

	pub fn delete(&self, key: &[Value], tid: ItemPointer) -> Result<(), Error> {
		match &self.inner {
			Inner::BTree(store) => {
				store.write().entries.retain(|(k, t)| {
					!(*t == tid && BTreeStore::ordering(k, key) == Ordering::Equal)
				});
				Ok(())
			}
			Inner::Custom(method) => method.delete(key, tid),
		}
	}

	/// Begin a scan; the keys are AND-ed. Direction is fixed at begin
	/// and honored by `getnext`.
	pub fn begin_scan(&self, backward: bool, keys: &[ScanKey]) -> Result<IndexScan, Error> {
		let mut matches = match &self.inner {
			Inner::BTree(store) => store
				.read()
				.entries
				.iter()
				.filter(|(k, _)| keys.iter().all(|sk| sk.matches(k)))
				.map(|(_, tid)| *tid)
				.collect::<Vec<_>>(),
			Inner::Custom(method) => method.collect(keys, backward)?,
		};
		if backward {
			matches.reverse();
		}
		Ok(IndexScan {
			matches,
			pos: 0,
			mark: None,
		})
	}
}

/// An in-flight index scan. Positions are stable across heap writes
/// because the match set was collected at begin time under the index
/// read lock.
pub struct IndexScan {
	matches: Vec<ItemPointer>,
	pos: usize,
	mark: Option<usize>,
}

impl IndexScan {
	/// The next matching item pointer, or `None` at the end of the scan.
	pub fn getnext(&mut self) -> Option<ItemPointer> {
		let tid = self.matches.get(self.pos).copied()?;
		self.pos += 1;
		Some(tid)
	}

	/// Restart the scan from the beginning with the same keys.
	pub fn rescan(&mut self) {
		self.pos = 0;
		self.mark = None;
	}

	/// Remember the current position.
	pub fn markpos(&mut self) {
		self.mark = Some(self.pos);
	}

	/// Return to the remembered position.
	pub fn restrpos(&mut self) {
		if let Some(mark) = self.mark {
			self.pos = mark;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn index_with(values: &[i32]) -> IndexRelation {
		let idx = IndexRelation::btree(10, "t_a_idx", 1, vec![1], false);
		for (i, v) in values.iter().enumerate() {
			idx.insert(vec![Value::Int4(*v)], ItemPointer::new(0, (i + 1) as u16)).unwrap();
		}
		idx
	}

	fn keys_of(scan: &mut IndexScan) -> Vec<u16> {
		let mut out = Vec::new();
		while let Some(tid) = scan.getnext() {
			out.push(tid.offset);
		}
		out
	}

	#[test]
	fn range_scan_in_key_order() {
		let idx = index_with(&[5, 1, 3, 9, 7]);
		let keys = vec![ScanKey {
			attno: 1,
			strategy: Strategy::Ge,
			value: Value::Int4(3),
			is_null: false,
		}];
		let mut scan = idx.begin_scan(false, &keys).unwrap();
		// Offsets of 3, 5, 7, 9 in insertion order 5@1 1@2 3@3 9@4 7@5
		assert_eq!(keys_of(&mut scan), vec![3, 1, 5, 4]);
	}

	#[test]
	fn backward_scan_reverses() {
		let idx = index_with(&[2, 4, 6]);
		let mut scan = idx.begin_scan(true, &[]).unwrap();
		assert_eq!(keys_of(&mut scan), vec![3, 2, 1]);
	}

	#[test]
	fn mark_and_restore() {
		let idx = index_with(&[1, 2, 3]);
		let mut scan = idx.begin_scan(false, &[]).unwrap();
		scan.getnext();
		scan.markpos();
		scan.getnext();
		scan.restrpos();
		assert_eq!(scan.getnext().map(|t| t.offset), Some(2));
	}

	#[test]
	fn unique_index_rejects_duplicates() {
		let idx = IndexRelation::btree(11, "t_pk", 1, vec![1], true);
		idx.insert(vec![Value::Int4(1)], ItemPointer::new(0, 1)).unwrap();
		assert!(idx.insert(vec![Value::Int4(1)], ItemPointer::new(0, 2)).is_err());
	}
}
