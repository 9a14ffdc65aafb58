use crate::err::Error;
use crate::store::snapshot::XactId;
use crate::store::Oid;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Lock strength on a relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
	/// Taken by scans; conflicts only with exclusive locks.
	AccessShare,
	/// Taken by schema changes; conflicts with everything.
	Exclusive,
}

#[derive(Default)]
struct RelLock {
	shared: usize,
	exclusive: bool,
}

/// Process-global lock state: the master lock over shared caches,
/// relation locks, and application-level user locks.
pub struct LockManager {
	/// Reader/writer master lock protecting the shared caches.
	master: RwLock<()>,
	relations: Mutex<HashMap<Oid, RelLock>>,
	released: Condvar,
	user: Mutex<HashMap<(Oid, u32), XactId>>,
}

impl Default for LockManager {
	fn default() -> Self {
		Self {
			master: RwLock::new(()),
			relations: Mutex::new(HashMap::new()),
			released: Condvar::new(),
			user: Mutex::new(HashMap::new()),
		}
	}
}

impl LockManager {
	/// Run `f` under the shared side of the master lock.
	pub fn with_master_shared<T>(&self, f: impl FnOnce() -> T) -> T {
		let _guard = self.master.read();
		f()
	}

	/// Run `f` under the exclusive side of the master lock.
	pub fn with_master_exclusive<T>(&self, f: impl FnOnce() -> T) -> T {
		let _guard = self.master.write();
		f()
	}

	/// Acquire a relation lock, blocking until it is grantable. The lock
	/// is held until the returned guard drops.
	pub fn lock_relation(self: &Arc<Self>, rel: Oid, mode: LockMode) -> RelationLockGuard {
		let mut rels = self.relations.lock();
		loop {
			let entry = rels.entry(rel).or_default();
			let grantable = match mode {
				LockMode::AccessShare => !entry.exclusive,
				LockMode::Exclusive => !entry.exclusive && entry.shared == 0,
			};
			if grantable {
				match mode {
					LockMode::AccessShare => entry.shared += 1,
					LockMode::Exclusive => entry.exclusive = true,
				}
				return RelationLockGuard {
					manager: Arc::clone(self),
					rel,
					mode,
				};
			}
			self.released.wait(&mut rels);
		}
	}

	fn unlock_relation(&self, rel: Oid, mode: LockMode) {
		let mut rels = self.relations.lock();
		if let Some(entry) = rels.get_mut(&rel) {
			match mode {
				LockMode::AccessShare => entry.shared = entry.shared.saturating_sub(1),
				LockMode::Exclusive => entry.exclusive = false,
			}
			if entry.shared == 0 && !entry.exclusive {
				rels.remove(&rel);
			}
		}
		self.released.notify_all();
	}

	/// Acquire the cooperative user lock `(group, item)` for `xid`.
	/// Fails without blocking when another transaction holds it.
	pub fn user_lock(&self, group: Oid, item: u32, xid: XactId) -> Result<(), Error> {
		let mut locks = self.user.lock();
		match locks.get(&(group, item)) {
			Some(owner) if *owner != xid => Err(Error::UserLock {
				message: format!("lock on item {item} held by another transaction"),
			}),
			_ => {
				locks.insert((group, item), xid);
				debug!("user lock on group:{group} item:{item}");
				Ok(())
			}
		}
	}

	/// Release a user lock previously taken by `xid`.
	pub fn user_unlock(&self, group: Oid, item: u32, xid: XactId) -> Result<(), Error> {
		let mut locks = self.user.lock();
		match locks.get(&(group, item)) {
			Some(owner) if *owner == xid => {
				locks.remove(&(group, item));
				debug!("user unlock on group:{group} item:{item}");
				Ok(())
			}
			_ => Err(Error::UserLock {
				message: "user unlock failed".to_owned(),
			}),
		}
	}

	/// Drop every user lock held by `xid`; user locks live until
	/// transaction end by default.
	pub fn release_user_locks(&self, xid: XactId) {
		self.user.lock().retain(|_, owner| *owner != xid);
	}
}

/// A held relation lock, released on drop.
pub struct RelationLockGuard {
	manager: Arc<LockManager>,
	rel: Oid,
	mode: LockMode,
}

impl Drop for RelationLockGuard {
	fn drop(&mut self) {
		self.manager.unlock_relation(self.rel, self.mode);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn shared_locks_coexist() {
		let mgr = Arc::new(LockManager::default());
		let a = mgr.lock_relation(5, LockMode::AccessShare);
		let b = mgr.lock_relation(5, LockMode::AccessShare);
		drop(a);
		drop(b);
		let c = mgr.lock_relation(5, LockMode::Exclusive);
		drop(c);
	}

	#[test]
	fn user_locks_are_transaction_scoped() {
		let mgr = LockManager::default();
		mgr.user_lock(1, 42, 10).unwrap();
		assert!(mgr.user_lock(1, 42, 11).is_err());
		// Re-acquiring within the owner is fine
		mgr.user_lock(1, 42, 10).unwrap();
		mgr.release_user_locks(10);
		mgr.user_lock(1, 42, 11).unwrap();
		assert!(mgr.user_unlock(1, 42, 10).is_err());
		mgr.user_unlock(1, 42, 11).unwrap();
	}
}
