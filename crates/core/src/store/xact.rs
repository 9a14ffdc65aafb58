use crate::store::snapshot::{CommandId, Snapshot, XactId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// How strongly a commit is made durable before the call returns.
///
/// Soft commits acknowledge as soon as the commit record is queued;
/// careful commits force the log; synced commits force the log and flush
/// dirty buffers. The `Fast` variants skip the buffer flush entirely and
/// are meant for bulk work. The `User` and `Transaction` overlays apply
/// the same strengths, but only for the scope that set them;
/// [`TransactionManager::reset_commit_mode`] restores the default after
/// every transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitMode {
	SoftCommit,
	FastSoftCommit,
	CarefulCommit,
	FastCarefulCommit,
	SyncedCommit,
	UserSoftCommit,
	UserCarefulCommit,
	TransactionSyncedCommit,
}

impl CommitMode {
	/// Whether the log is forced synchronously at commit.
	pub fn syncs_log(&self) -> bool {
		!matches!(self, Self::SoftCommit | Self::FastSoftCommit | Self::UserSoftCommit)
	}

	/// Whether dirty buffers are flushed before acknowledging.
	pub fn flushes_buffers(&self) -> bool {
		matches!(self, Self::SyncedCommit | Self::TransactionSyncedCommit)
	}

	/// Whether this mode is a per-user or per-transaction overlay rather
	/// than a process default.
	pub fn is_overlay(&self) -> bool {
		matches!(
			self,
			Self::UserSoftCommit | Self::UserCarefulCommit | Self::TransactionSyncedCommit
		)
	}
}

/// The durability collaborator. Write-ahead logging and buffer flushing
/// live outside the core; commits call through this hook with the
/// strength the commit mode demands.
pub trait DurabilityHook: Send + Sync {
	/// Persist the commit record; `sync` requests a synchronous force.
	fn flush_log(&self, xid: XactId, sync: bool);
	/// Flush dirty buffers ahead of the acknowledgement.
	fn flush_buffers(&self, xid: XactId);
}

/// Default hook for the in-process store, where commits are durable the
/// moment the state map is updated.
pub struct NoopDurability;

impl DurabilityHook for NoopDurability {
	fn flush_log(&self, _: XactId, _: bool) {}
	fn flush_buffers(&self, _: XactId) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum XactStatus {
	InProgress,
	Committed,
	Aborted,
}

/// Process-wide transaction state: id assignment, commit/abort registry
/// and snapshot construction.
pub struct TransactionManager {
	next: AtomicU64,
	states: RwLock<HashMap<XactId, XactStatus>>,
	default_mode: RwLock<CommitMode>,
	session_mode: RwLock<Option<CommitMode>>,
}

impl Default for TransactionManager {
	fn default() -> Self {
		Self {
			next: AtomicU64::new(1),
			states: RwLock::new(HashMap::new()),
			default_mode: RwLock::new(CommitMode::SoftCommit),
			session_mode: RwLock::new(None),
		}
	}
}

impl TransactionManager {
	/// Start a transaction and return its id.
	pub fn begin(&self) -> XactId {
		let xid = self.next.fetch_add(1, Ordering::SeqCst);
		self.states.write().insert(xid, XactStatus::InProgress);
		trace!("transaction {xid} started");
		xid
	}

	pub fn is_committed(&self, xid: XactId) -> bool {
		self.states.read().get(&xid) == Some(&XactStatus::Committed)
	}

	pub fn is_in_progress(&self, xid: XactId) -> bool {
		self.states.read().get(&xid) == Some(&XactStatus::InProgress)
	}

	pub fn commit(&self, xid: XactId) {
		self.states.write().insert(xid, XactStatus::Committed);
		trace!("transaction {xid} committed");
	}

	pub fn abort(&self, xid: XactId) {
		self.states.write().insert(xid, XactStatus::Aborted);
		trace!("transaction {xid} aborted");
	}

	/// Commit with the given strength, driving the durability hook.
	pub fn commit_with(&self, xid: XactId, mode: CommitMode, hook: &dyn DurabilityHook) {
		if mode.flushes_buffers() {
			hook.flush_buffers(xid);
		}
		hook.flush_log(xid, mode.syncs_log());
		self.commit(xid);
	}

	/// Build the visibility cut for `xid` at command `cid`.
	pub fn snapshot(&self, xid: XactId, cid: CommandId) -> Snapshot {
		let states = self.states.read();
		let xmax = self.next.load(Ordering::SeqCst);
		let active = states
			.iter()
			.filter(|(id, st)| **st == XactStatus::InProgress && **id != xid)
			.map(|(id, _)| *id)
			.collect::<Vec<_>>();
		let xmin = active.iter().copied().min().unwrap_or(xmax);
		Snapshot {
			xmin,
			xmax,
			active,
			xid,
			cid,
		}
	}

	/// The commit strength in effect: the transaction/user overlay when
	/// one is set, the process default otherwise.
	pub fn commit_mode(&self) -> CommitMode {
		(*self.session_mode.read()).unwrap_or(*self.default_mode.read())
	}

	pub fn set_default_commit_mode(&self, mode: CommitMode) {
		*self.default_mode.write() = mode;
	}

	/// Install an overlay commit mode for the current transaction scope.
	pub fn set_commit_mode(&self, mode: CommitMode) {
		*self.session_mode.write() = Some(mode);
	}

	/// Restore the process default; called at the end of every
	/// transaction.
	pub fn reset_commit_mode(&self) {
		*self.session_mode.write() = None;
	}
}
