use crate::err::Error;
use crate::plan::{PlannedStatement, Planner};
use crate::sql::func::ForeignBridge;
use crate::store::blob::BlobHeap;
use crate::store::buffer::BufferPool;
use crate::store::heap::HeapRelation;
use crate::store::index::{AccessMethod, IndexRelation};
use crate::store::lock::LockManager;
use crate::store::tuple::TupleDesc;
use crate::store::xact::{DurabilityHook, NoopDurability, TransactionManager};
use crate::store::Oid;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// A function written in SQL, stored as its planned body. Invocations
/// re-enter the executor through the nested procedure stack.
pub struct SqlFunction {
	pub plans: Vec<PlannedStatement>,
	pub set_returning: bool,
}

/// The process-global database: relation catalog, transaction and lock
/// managers, buffer accounting, the blob heap, and the seams where the
/// external collaborators plug in.
///
/// One `Database` is shared by every connection of the process. Its
/// lifecycle is explicit: created by the embedder, dropped when the last
/// connection is gone.
pub struct Database {
	pub name: String,
	pub id: Oid,
	pub path: String,
	pub xact: Arc<TransactionManager>,
	pub locks: Arc<LockManager>,
	pub buffers: Arc<BufferPool>,
	pub blobs: BlobHeap,
	next_oid: AtomicU32,
	next_row_oid: AtomicU32,
	relations: RwLock<HashMap<String, Arc<HeapRelation>>>,
	relations_by_id: RwLock<HashMap<Oid, Arc<HeapRelation>>>,
	indexes: RwLock<HashMap<String, Arc<IndexRelation>>>,
	planner: RwLock<Option<Arc<dyn Planner>>>,
	methods: RwLock<HashMap<String, Arc<dyn AccessMethod>>>,
	functions: RwLock<HashMap<String, Arc<SqlFunction>>>,
	bridge: RwLock<Option<Arc<dyn ForeignBridge>>>,
	durability: RwLock<Arc<dyn DurabilityHook>>,
	users: RwLock<HashMap<String, Option<String>>>,
	connections: AtomicUsize,
	max_connections: usize,
}

impl Database {
	pub fn new(name: &str) -> Arc<Self> {
		Arc::new(Self {
			name: name.to_owned(),
			id: 1,
			path: format!("/{name}"),
			xact: Arc::new(TransactionManager::default()),
			locks: Arc::new(LockManager::default()),
			buffers: BufferPool::new(),
			blobs: BlobHeap::default(),
			next_oid: AtomicU32::new(16384),
			next_row_oid: AtomicU32::new(1),
			relations: RwLock::new(HashMap::new()),
			relations_by_id: RwLock::new(HashMap::new()),
			indexes: RwLock::new(HashMap::new()),
			planner: RwLock::new(None),
			methods: RwLock::new(HashMap::new()),
			functions: RwLock::new(HashMap::new()),
			bridge: RwLock::new(None),
			durability: RwLock::new(Arc::new(NoopDurability)),
			users: RwLock::new(HashMap::new()),
			connections: AtomicUsize::new(0),
			max_connections: 128,
		})
	}

	/// Allocate a catalog object id.
	pub fn next_oid(&self) -> Oid {
		self.next_oid.fetch_add(1, Ordering::SeqCst)
	}

	/// Allocate a row object id for an inserted tuple.
	pub fn next_row_oid(&self) -> Oid {
		self.next_row_oid.fetch_add(1, Ordering::SeqCst)
	}

	// --------------------------------------------------
	// Connection admission
	// --------------------------------------------------

	pub(crate) fn admit_connection(&self) -> Result<(), Error> {
		let count = self.connections.fetch_add(1, Ordering::SeqCst);
		if count >= self.max_connections {
			self.connections.fetch_sub(1, Ordering::SeqCst);
			return Err(Error::ConnectionFailed {
				message: "too many connections".to_owned(),
			});
		}
		Ok(())
	}

	pub(crate) fn release_connection(&self) {
		self.connections.fetch_sub(1, Ordering::SeqCst);
	}

	/// Register a user; `password` of `None` allows any password.
	pub fn define_user(&self, name: &str, password: Option<&str>) {
		self.users.write().insert(name.to_owned(), password.map(str::to_owned));
	}

	/// Check credentials. A database with no users defined is in
	/// bootstrap mode and admits anyone.
	pub(crate) fn authenticate(&self, user: &str, password: &str) -> Result<(), Error> {
		let users = self.users.read();
		if users.is_empty() {
			return Ok(());
		}
		match users.get(user) {
			None => Err(Error::AuthUnknownUser),
			Some(None) => Ok(()),
			Some(Some(expected)) if expected == password => Ok(()),
			Some(Some(_)) => Err(Error::AuthPassword),
		}
	}

	// --------------------------------------------------
	// Relation catalog
	// --------------------------------------------------

	pub fn create_table(&self, name: &str, desc: TupleDesc) -> Result<Arc<HeapRelation>, Error> {
		let mut relations = self.relations.write();
		if relations.contains_key(name) {
			return Err(Error::RelationExists {
				name: name.to_owned(),
			});
		}
		let rel = Arc::new(HeapRelation::new(self.next_oid(), name, desc));
		relations.insert(name.to_owned(), Arc::clone(&rel));
		self.relations_by_id.write().insert(rel.id, Arc::clone(&rel));
		debug!("created relation '{name}' as oid {}", rel.id);
		Ok(rel)
	}

	pub fn drop_table(&self, name: &str) -> Result<(), Error> {
		let rel = self.relations.write().remove(name).ok_or_else(|| Error::RelationNotFound {
			name: name.to_owned(),
		})?;
		self.relations_by_id.write().remove(&rel.id);
		self.indexes.write().retain(|_, idx| idx.table != rel.id);
		Ok(())
	}

	pub fn relation(&self, name: &str) -> Result<Arc<HeapRelation>, Error> {
		self.relations.read().get(name).cloned().ok_or_else(|| Error::RelationNotFound {
			name: name.to_owned(),
		})
	}

	pub fn relation_by_id(&self, id: Oid) -> Result<Arc<HeapRelation>, Error> {
		self.relations_by_id.read().get(&id).cloned().ok_or_else(|| Error::RelationNotFound {
			name: format!("oid {id}"),
		})
	}

	/// Create an index over `table`. `method` of `None` selects the
	/// built-in b-tree; otherwise the registered access method with that
	/// name is used.
	pub fn create_index(
		&self,
		name: &str,
		table: &str,
		key_cols: Vec<usize>,
		unique: bool,
		method: Option<&str>,
	) -> Result<Arc<IndexRelation>, Error> {
		let rel = self.relation(table)?;
		let idx = match method {
			None => IndexRelation::btree(self.next_oid(), name, rel.id, key_cols, unique),
			Some(m) => {
				let methods = self.methods.read();
				let am = methods.get(m).ok_or_else(|| Error::Execution {
					message: format!("no access method '{m}' registered"),
				})?;
				IndexRelation::custom(self.next_oid(), name, rel.id, key_cols, Arc::clone(am))
			}
		};
		let idx = Arc::new(idx);
		// Backfill from every existing tuple version; scans recheck
		// visibility against the heap anyway
		for block in 0..rel.block_count() {
			for tid in rel.pointers_on_block(block) {
				if let Some(tuple) = rel.fetch_any(tid) {
					let key = idx
						.key_cols
						.iter()
						.map(|col| tuple.values[col - 1].clone())
						.collect::<Vec<_>>();
					idx.insert(key, tid)?;
				}
			}
		}
		self.indexes.write().insert(name.to_owned(), Arc::clone(&idx));
		rel.set_has_index();
		Ok(idx)
	}

	pub fn drop_index(&self, name: &str) -> Result<(), Error> {
		self.indexes.write().remove(name).map(|_| ()).ok_or_else(|| Error::IndexNotFound {
			name: name.to_owned(),
		})
	}

	pub fn index(&self, name: &str) -> Result<Arc<IndexRelation>, Error> {
		self.indexes.read().get(name).cloned().ok_or_else(|| Error::IndexNotFound {
			name: name.to_owned(),
		})
	}

	pub fn indexes_for(&self, table: Oid) -> Vec<Arc<IndexRelation>> {
		self.indexes.read().values().filter(|i| i.table == table).cloned().collect()
	}

	/// Resolve a user-lock group name to its tag oid. Groups are backed
	/// by a `<group>/ownerinfo` relation, matching the lock layout
	/// embedders already depend on.
	pub fn user_lock_group(&self, group: &str) -> Result<Oid, Error> {
		let name = format!("{}/ownerinfo", group.to_lowercase());
		self.relations.read().get(&name).map(|r| r.id).ok_or_else(|| Error::UserLockGroup {
			group: group.to_owned(),
		})
	}

	// --------------------------------------------------
	// External collaborators
	// --------------------------------------------------

	pub fn set_planner(&self, planner: Arc<dyn Planner>) {
		*self.planner.write() = Some(planner);
	}

	pub fn planner(&self) -> Result<Arc<dyn Planner>, Error> {
		self.planner.read().clone().ok_or_else(|| Error::Planner {
			message: "no planner installed".to_owned(),
		})
	}

	pub fn register_method(&self, name: &str, method: Arc<dyn AccessMethod>) {
		self.methods.write().insert(name.to_owned(), method);
	}

	pub fn register_function(&self, name: &str, func: SqlFunction) {
		self.functions.write().insert(name.to_owned(), Arc::new(func));
	}

	pub fn function(&self, name: &str) -> Option<Arc<SqlFunction>> {
		self.functions.read().get(name).cloned()
	}

	pub fn set_foreign_bridge(&self, bridge: Arc<dyn ForeignBridge>) {
		*self.bridge.write() = Some(bridge);
	}

	pub fn foreign_bridge(&self) -> Option<Arc<dyn ForeignBridge>> {
		self.bridge.read().clone()
	}

	pub fn set_durability(&self, hook: Arc<dyn DurabilityHook>) {
		*self.durability.write() = hook;
	}

	pub fn durability(&self) -> Arc<dyn DurabilityHook> {
		Arc::clone(&self.durability.read())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sql::kind::TypeId;
	use crate::store::tuple::Attribute;

	fn desc() -> TupleDesc {
		TupleDesc::new(vec![Attribute::new("a", TypeId::Int4)])
	}

	#[test]
	fn duplicate_relations_are_rejected() {
		let db = Database::new("test");
		db.create_table("t", desc()).unwrap();
		assert!(matches!(db.create_table("t", desc()), Err(Error::RelationExists { .. })));
	}

	#[test]
	fn bootstrap_mode_admits_anyone() {
		let db = Database::new("test");
		db.authenticate("someone", "pw").unwrap();
		db.define_user("alice", Some("secret"));
		assert!(matches!(db.authenticate("bob", "x"), Err(Error::AuthUnknownUser)));
		assert!(matches!(db.authenticate("alice", "wrong"), Err(Error::AuthPassword)));
		db.authenticate("alice", "secret").unwrap();
	}

	#[test]
	fn user_lock_groups_resolve_through_the_catalog() {
		let db = Database::new("test");
		assert!(db.user_lock_group("orders").is_err());
		db.create_table("orders/ownerinfo", desc()).unwrap();
		db.user_lock_group("ORDERS").unwrap();
	}
}
