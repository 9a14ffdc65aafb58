use crate::store::tuple::HeapTuple;
use crate::store::xact::TransactionManager;

/// Transaction identifier. Monotonically increasing across the process.
pub type XactId = u64;

/// Statement counter within one transaction. Each statement of a
/// transaction runs at the next command id, so later statements see the
/// effects of earlier ones.
pub type CommandId = u32;

/// The visibility cut a statement evaluates under.
///
/// A tuple version is visible when its inserting transaction is part of
/// the cut (committed before the snapshot, or this transaction at an
/// earlier command id) and its deleting transaction, if any, is not.
#[derive(Clone, Debug)]
pub struct Snapshot {
	/// Every transaction id below this is settled (committed or aborted).
	pub xmin: XactId,
	/// Ids at or above this did not exist when the snapshot was taken.
	pub xmax: XactId,
	/// In-progress transaction ids in `[xmin, xmax)` at snapshot time.
	pub active: Vec<XactId>,
	/// The observing transaction.
	pub xid: XactId,
	/// The observing command id.
	pub cid: CommandId,
}

impl Snapshot {
	/// Same visibility cut, observed from a later command of the same
	/// transaction.
	pub fn at_command(&self, cid: CommandId) -> Snapshot {
		Snapshot {
			cid,
			..self.clone()
		}
	}

	fn xact_in_cut(&self, xid: XactId, xmgr: &TransactionManager) -> bool {
		if xid >= self.xmax {
			return false;
		}
		if self.active.contains(&xid) {
			return false;
		}
		xmgr.is_committed(xid)
	}

	/// Whether the insertion of `tuple` is visible under this snapshot.
	fn insert_visible(&self, tuple: &HeapTuple, xmgr: &TransactionManager) -> bool {
		if tuple.xmin == self.xid {
			// Our own insert: visible once the inserting command is over
			return tuple.cmin < self.cid;
		}
		self.xact_in_cut(tuple.xmin, xmgr)
	}

	/// Whether the deletion of `tuple`, if any, is visible under this
	/// snapshot.
	fn delete_visible(&self, tuple: &HeapTuple, xmgr: &TransactionManager) -> bool {
		match tuple.xmax {
			None => false,
			Some(xmax) => {
				if xmax == self.xid {
					return tuple.cmax.is_some_and(|cmax| cmax < self.cid);
				}
				self.xact_in_cut(xmax, xmgr)
			}
		}
	}

	/// The visibility test every scan applies before a tuple propagates
	/// upward.
	pub fn is_visible(&self, tuple: &HeapTuple, xmgr: &TransactionManager) -> bool {
		self.insert_visible(tuple, xmgr) && !self.delete_visible(tuple, xmgr)
	}
}
