use crate::cnf::{MAX_ARGS, MAX_STATEMENT_LENGTH};
use crate::dbs::binding::{InputBinding, OutputBinding, OutputSink, OutputSlot, TransferEvent};
use crate::dbs::prepared::{PreparedPlan, QueryDesc};
use crate::dbs::transfer::transfer_value;
use crate::dbs::StatementStage;
use crate::err::Error;
use crate::exe;
use crate::exe::node;
use crate::exe::state::{EState, ParamBound, ParamList};
use crate::plan::{CommandType, ParamDecl, PlannedStatement};
use crate::spi::{self, SpiContext, SpiStack, SpiTupleTable};
use crate::sql::kind::TypeId;
use crate::sql::val::Value;
use crate::store::snapshot::{CommandId, Snapshot, XactId};
use crate::store::xact::CommitMode;
use crate::store::Database;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::instrument;

/// The connection's error area: last code, state tag and message, kept
/// for retrieval after a call fails.
#[derive(Clone, Debug)]
pub struct ErrorArea {
	pub code: i32,
	pub state: String,
	pub text: String,
}

/// Everything owned by the transaction side of a connection. Guarded by
/// one mutex so owner calls are serial and `cancel_and_join` can wait
/// for the engine to go quiet.
pub(crate) struct Session {
	stage: StatementStage,
	abort_only: bool,
	owner: Option<ThreadId>,
	xid: Option<XactId>,
	cid: CommandId,
	/// The transaction snapshot taken at begin.
	snapshot: Option<Snapshot>,
	/// Nested snapshots pushed for procedure bodies.
	user_snapshots: Vec<Snapshot>,
	statement: String,
	inputs: Vec<InputBinding>,
	outputs: Vec<OutputBinding>,
	plan: Option<PreparedPlan>,
	spi: SpiStack,
	saved_plans: HashMap<String, Arc<Vec<PlannedStatement>>>,
	next_portal: u64,
}

impl Session {
	fn new() -> Self {
		Self {
			stage: StatementStage::Invalid,
			abort_only: false,
			owner: None,
			xid: None,
			cid: 0,
			snapshot: None,
			user_snapshots: Vec::new(),
			statement: String::new(),
			inputs: Vec::new(),
			outputs: Vec::new(),
			plan: None,
			spi: SpiStack::default(),
			saved_plans: HashMap::new(),
			next_portal: 0,
		}
	}

	/// The snapshot the next statement evaluates under: the innermost
	/// procedure snapshot if one is pushed, the transaction snapshot
	/// otherwise, observed at the current command id.
	fn active_snapshot(&self) -> Result<Snapshot, Error> {
		let base = self.user_snapshots.last().or(self.snapshot.as_ref()).ok_or_else(|| {
			Error::ContextValid {
				message: "transaction not begun".to_owned(),
			}
		})?;
		Ok(base.at_command(self.cid))
	}

	fn xid(&self) -> Result<XactId, Error> {
		self.xid.ok_or_else(|| Error::ContextValid {
			message: "transaction not begun".to_owned(),
		})
	}
}

/// One embedded connection: a caller thread's handle on its own
/// transactional context, prepared plan and bound parameters.
///
/// A connection is owned by at most one thread at a time, the
/// transaction owner recorded at `begin`. Every call other than
/// `create`, `cancel`, `cancel_and_join`, `destroy` and the status
/// getters must come from that thread.
pub struct Connection {
	db: Arc<Database>,
	user: String,
	valid: AtomicBool,
	cancel: Arc<AtomicBool>,
	parent: Option<Arc<Connection>>,
	children: Mutex<usize>,
	child_done: Condvar,
	error: Mutex<ErrorArea>,
	session: Mutex<Session>,
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection").field("user", &self.user).finish_non_exhaustive()
	}
}

impl Connection {
	/// Open a connection to the database, authenticating the user.
	#[instrument(level = "debug", skip(db, password))]
	pub fn create(db: &Arc<Database>, user: &str, password: &str) -> Result<Arc<Connection>, Error> {
		db.admit_connection()?;
		if let Err(err) = db.authenticate(user, password) {
			db.release_connection();
			return Err(err);
		}
		debug!("connection opened for user '{user}'");
		Ok(Arc::new(Connection {
			db: Arc::clone(db),
			user: user.to_owned(),
			valid: AtomicBool::new(true),
			cancel: Arc::new(AtomicBool::new(false)),
			parent: None,
			children: Mutex::new(0),
			child_done: Condvar::new(),
			error: Mutex::new(ErrorArea {
				code: 0,
				state: "CONNECTED".to_owned(),
				text: "successful connection".to_owned(),
			}),
			session: Mutex::new(Session::new()),
		}))
	}

	/// Spawn a subconnection: same identity and database, its own
	/// transaction owned by some other thread. A subconnection cannot
	/// itself spawn children.
	pub fn create_sub(self: &Arc<Self>) -> Result<Arc<Connection>, Error> {
		if self.parent.is_some() {
			let err = Error::ConnectionFailed {
				message: "a sub-connection cannot spawn children".to_owned(),
			};
			self.record_error(&err);
			return Err(err);
		}
		self.db.admit_connection()?;
		*self.children.lock() += 1;
		Ok(Arc::new(Connection {
			db: Arc::clone(&self.db),
			user: self.user.clone(),
			valid: AtomicBool::new(true),
			cancel: Arc::new(AtomicBool::new(false)),
			parent: Some(Arc::clone(self)),
			children: Mutex::new(0),
			child_done: Condvar::new(),
			error: Mutex::new(ErrorArea {
				code: 0,
				state: "CONNECTED".to_owned(),
				text: "successful connection".to_owned(),
			}),
			session: Mutex::new(Session::new()),
		}))
	}

	/// Close the connection. A parent waits until every subconnection
	/// has been destroyed; a subconnection signs off with its parent.
	pub fn destroy(&self) -> Result<(), Error> {
		match &self.parent {
			Some(parent) => {
				self.dispose();
				let mut count = parent.children.lock();
				*count = count.saturating_sub(1);
				parent.child_done.notify_all();
			}
			None => {
				let mut count = self.children.lock();
				while *count > 0 {
					self.child_done.wait(&mut count);
				}
				drop(count);
				self.dispose();
			}
		}
		Ok(())
	}

	fn dispose(&self) {
		if !self.valid.swap(false, Ordering::SeqCst) {
			return;
		}
		let mut session = self.session.lock();
		// Abort any transaction still in flight, dropping executor
		// state, pins and locks on the way
		if let Some(xid) = session.xid {
			if let Some(plan) = session.plan.as_mut() {
				let _ = plan.reset_executor();
			}
			self.db.xact.abort(xid);
			self.db.locks.release_user_locks(xid);
		}
		session.spi.reset();
		session.plan = None;
		session.xid = None;
		session.owner = None;
		session.stage = StatementStage::Invalid;
		let leaked = self.db.buffers.leaked_pins();
		if leaked > 0 {
			warn!("buffer leak in dispose connection: {leaked} pins");
		}
		self.db.release_connection();
		debug!("connection closed for user '{}'", self.user);
	}

	// --------------------------------------------------
	// Error area and status getters
	// --------------------------------------------------

	fn clear_error(&self) {
		let mut area = self.error.lock();
		area.code = 0;
	}

	fn record_error(&self, err: &Error) {
		let mut area = self.error.lock();
		area.code = err.code();
		area.state = err.state().to_owned();
		area.text = err.to_string();
	}

	pub fn error_code(&self) -> i32 {
		self.error.lock().code
	}

	pub fn error_text(&self) -> String {
		self.error.lock().text.clone()
	}

	pub fn error_state(&self) -> String {
		self.error.lock().state.clone()
	}

	pub fn is_valid(&self) -> bool {
		self.valid.load(Ordering::SeqCst)
	}

	pub fn database_name(&self) -> &str {
		&self.db.name
	}

	pub fn database_path(&self) -> &str {
		&self.db.path
	}

	pub fn user_name(&self) -> &str {
		&self.user
	}

	/// Cheap end-of-data probe for the current fetch loop.
	pub fn fetch_is_complete(&self) -> bool {
		self.session.lock().stage == StatementStage::EoD
	}

	// --------------------------------------------------
	// Call plumbing
	// --------------------------------------------------

	fn check_cancel(&self) -> Result<(), Error> {
		if self.cancel.load(Ordering::Acquire) {
			return Err(Error::Cancelled);
		}
		Ok(())
	}

	/// Serialize an owner call: take the session, verify thread
	/// affinity, clear the error area, and record any failure.
	fn run<T>(
		&self,
		check_owner: bool,
		f: impl FnOnce(&mut Session) -> Result<T, Error>,
	) -> Result<T, Error> {
		let mut session = self.session.lock();
		if check_owner && session.owner != Some(thread::current().id()) {
			let err = Error::ContextOwnership;
			self.record_error(&err);
			return Err(err);
		}
		self.clear_error();
		match f(&mut session) {
			Ok(v) => Ok(v),
			Err(err) => {
				self.record_error(&err);
				Err(err)
			}
		}
	}

	/// Like [`Connection::run`], but an execution failure makes the
	/// connection abort-only, the discipline for errors inside Exec and
	/// Fetch. Call-sequence errors report without poisoning the
	/// transaction.
	fn run_statement<T>(
		&self,
		f: impl FnOnce(&mut Session) -> Result<T, Error>,
	) -> Result<T, Error> {
		self.run(true, |session| match f(session) {
			Ok(v) => Ok(v),
			Err(err) => {
				if !matches!(
					err,
					Error::EndOfData
						| Error::ContextValid {
							..
						} | Error::AbortOnly
				) {
					session.stage = StatementStage::Abort;
					session.abort_only = true;
					if let Some(plan) = session.plan.as_mut() {
						let _ = plan.reset_executor();
					}
				}
				Err(err)
			}
		})
	}

	// --------------------------------------------------
	// Transaction lifecycle
	// --------------------------------------------------

	/// Start a transaction and record the calling thread as its owner.
	#[instrument(level = "debug", skip(self))]
	pub fn begin(&self) -> Result<(), Error> {
		self.run(false, |session| {
			if session.owner.is_some() {
				return Err(Error::ContextOwnership);
			}
			if session.stage != StatementStage::Invalid {
				return Err(Error::ContextValid {
					message: "already in transaction".to_owned(),
				});
			}
			session.abort_only = false;
			session.plan = None;
			match &self.parent {
				None => {
					let xid = self.db.xact.begin();
					session.snapshot = Some(self.db.xact.snapshot(xid, 0));
					session.xid = Some(xid);
				}
				Some(parent) => {
					// Clone the parent's transaction snapshot; the child
					// runs its own transaction under it
					let parent_session = parent.session.lock();
					if parent_session.stage == StatementStage::Invalid {
						return Err(Error::ContextValid {
							message: "parent transaction is not in a transaction".to_owned(),
						});
					}
					let mut snapshot =
						parent_session.snapshot.clone().ok_or_else(|| Error::ContextValid {
							message: "parent transaction is not in a transaction".to_owned(),
						})?;
					drop(parent_session);
					let xid = self.db.xact.begin();
					snapshot.xid = xid;
					session.snapshot = Some(snapshot);
					session.xid = Some(xid);
				}
			}
			session.cid = 0;
			session.owner = Some(thread::current().id());
			session.stage = StatementStage::New;
			Ok(())
		})
	}

	/// Finish the transaction with the configured commit strength. In
	/// abort-only mode the commit is performed as an abort.
	#[instrument(level = "debug", skip(self))]
	pub fn commit(&self) -> Result<(), Error> {
		self.run(true, |session| {
			if session.stage == StatementStage::Invalid {
				return Err(Error::ContextValid {
					message: "connection is currently in an invalid state for commit".to_owned(),
				});
			}
			self.check_cancel()?;
			let xid = session.xid()?;
			if let Some(plan) = session.plan.as_mut() {
				plan.reset_executor()?;
			}
			if session.abort_only {
				warn!("transaction in abort only mode");
				self.db.xact.abort(xid);
			} else if self.parent.is_none() {
				let mode = self.db.xact.commit_mode();
				self.db.xact.commit_with(xid, mode, self.db.durability().as_ref());
			} else {
				// Closing a subtransaction defers durability to the
				// parent's commit
				self.db.xact.commit(xid);
			}
			self.finish_transaction(session, xid);
			Ok(())
		})
	}

	/// Abort the transaction, releasing everything it held.
	#[instrument(level = "debug", skip(self))]
	pub fn rollback(&self) -> Result<(), Error> {
		self.run(true, |session| {
			if session.stage == StatementStage::Invalid {
				return Err(Error::ContextValid {
					message: "connection is currently in an invalid state for rollback".to_owned(),
				});
			}
			let xid = session.xid()?;
			if let Some(plan) = session.plan.as_mut() {
				plan.reset_executor()?;
			}
			self.db.xact.abort(xid);
			self.finish_transaction(session, xid);
			Ok(())
		})
	}

	fn finish_transaction(&self, session: &mut Session, xid: XactId) {
		self.db.locks.release_user_locks(xid);
		self.db.xact.reset_commit_mode();
		// The nested procedure stack never survives transaction end
		session.spi.reset();
		session.user_snapshots.clear();
		session.snapshot = None;
		session.xid = None;
		session.owner = None;
		session.plan = None;
		session.inputs.clear();
		session.outputs.clear();
		session.stage = StatementStage::Invalid;
		session.abort_only = false;
		self.cancel.store(false, Ordering::Release);
	}

	/// Request cancellation of whatever the connection is executing.
	/// Safe from any thread; the executor honors it at its next
	/// cancellation checkpoint.
	pub fn cancel(&self) -> Result<(), Error> {
		self.cancel.store(true, Ordering::Release);
		Ok(())
	}

	/// Cancel and block until the owner thread has left the engine.
	pub fn cancel_and_join(&self) -> Result<(), Error> {
		self.cancel.store(true, Ordering::Release);
		// Taking the session lock waits out the in-flight call
		let _session = self.session.lock();
		Ok(())
	}

	pub fn transaction_id(&self) -> Result<i64, Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			Ok(session.xid()? as i64)
		})
	}

	pub fn command_id(&self) -> Result<i64, Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			session.xid()?;
			Ok(i64::from(session.cid))
		})
	}

	/// Push a nested snapshot for a procedure body.
	pub fn begin_procedure(&self) -> Result<(), Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			let xid = session.xid()?;
			let snapshot = self.db.xact.snapshot(xid, session.cid);
			session.user_snapshots.push(snapshot);
			Ok(())
		})
	}

	/// Drop the innermost procedure snapshot.
	pub fn end_procedure(&self) -> Result<(), Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			session.xid()?;
			session.user_snapshots.pop().ok_or_else(|| Error::ContextValid {
				message: "no procedure snapshot to drop".to_owned(),
			})?;
			Ok(())
		})
	}

	/// Set the commit strength for the rest of this transaction scope.
	pub fn set_commit_mode(&self, mode: CommitMode) -> Result<(), Error> {
		self.run(true, |_| {
			if mode.is_overlay() {
				self.db.xact.set_commit_mode(mode);
			} else {
				self.db.xact.set_default_commit_mode(mode);
			}
			Ok(())
		})
	}

	// --------------------------------------------------
	// Statement lifecycle
	// --------------------------------------------------

	/// Accept a statement's text and move to the parsed stage. Planning
	/// is deferred to `exec` so bindings registered in between are
	/// visible to the planner.
	#[instrument(level = "debug", skip(self, statement))]
	pub fn parse(&self, statement: &str) -> Result<(), Error> {
		self.run(true, |session| {
			if session.abort_only {
				return Err(Error::AbortOnly);
			}
			if !session.stage.accepts_parse() {
				return Err(Error::ContextValid {
					message: "context not valid, check call sequence".to_owned(),
				});
			}
			if statement.len() > MAX_STATEMENT_LENGTH {
				return Err(Error::StatementTooLong);
			}
			self.check_cancel()?;
			if let Some(plan) = session.plan.as_mut() {
				plan.reset_executor()?;
			}
			session.plan = None;
			session.inputs.clear();
			session.outputs.clear();
			session.statement = statement.to_owned();
			session.stage = StatementStage::Parsed;
			Ok(())
		})
	}

	/// Declare an input binding without a value yet.
	pub fn bind(&self, name: &str, kind: TypeId) -> Result<(), Error> {
		self.bind_slot(name, kind, None)
	}

	/// Declare an input binding and set its value. `Value::Null` binds
	/// an explicit null.
	pub fn bind_value(&self, name: &str, kind: TypeId, value: Value) -> Result<(), Error> {
		self.bind_slot(name, kind, Some(value))
	}

	fn bind_slot(&self, name: &str, kind: TypeId, value: Option<Value>) -> Result<(), Error> {
		self.run(true, |session| {
			if session.abort_only {
				return Err(Error::AbortOnly);
			}
			self.check_cancel()?;
			// Strip the parameter marker if the caller passed one
			let name = name.trim_start_matches(['$', '?', ':']);
			let existing = session.inputs.iter().position(|b| b.name == name);
			match existing {
				Some(at) => {
					let binding = &mut session.inputs[at];
					binding.kind = kind;
					binding.is_set = value.is_some();
					binding.value = value.unwrap_or(Value::Null);
				}
				None => {
					if session.inputs.len() >= MAX_ARGS {
						return Err(Error::ArgumentOutOfRange {
							max: MAX_ARGS,
						});
					}
					let index = session.inputs.len() + 1;
					session.inputs.push(InputBinding {
						name: name.to_owned(),
						index,
						kind,
						is_set: value.is_some(),
						value: value.unwrap_or(Value::Null),
					});
				}
			}
			Ok(())
		})
	}

	/// Register an output slot for a 1-based column position.
	pub fn output_link(&self, position: usize, kind: TypeId, size: usize) -> Result<(), Error> {
		self.register_output(position, OutputSink::Slot(OutputSlot::new(kind, size)))
	}

	/// Register a callback-based output for a column position; streamed
	/// blobs arrive in chunks.
	pub fn output_register(
		&self,
		position: usize,
		callback: Box<dyn FnMut(TransferEvent) -> Result<(), Error> + Send>,
	) -> Result<(), Error> {
		self.register_output(position, OutputSink::Registered(callback))
	}

	fn register_output(&self, position: usize, sink: OutputSink) -> Result<(), Error> {
		self.run(true, |session| {
			if session.abort_only {
				return Err(Error::AbortOnly);
			}
			self.check_cancel()?;
			if position == 0 || position > MAX_ARGS {
				return Err(Error::ArgumentOutOfRange {
					max: MAX_ARGS,
				});
			}
			session.outputs.retain(|o| o.index != position);
			session.outputs.push(OutputBinding {
				index: position,
				sink,
			});
			Ok(())
		})
	}

	/// Plan (if not already planned) and execute the statement. SELECT
	/// leaves a cursor open for `fetch`; writes run to completion here.
	#[instrument(level = "debug", skip(self))]
	pub fn exec(&self) -> Result<(), Error> {
		self.run_statement(|session| {
			if session.abort_only {
				return Err(Error::AbortOnly);
			}
			self.check_cancel()?;
			if !session.stage.accepts_exec() {
				return Err(Error::ContextValid {
					message: "no statement parsed".to_owned(),
				});
			}
			if session.plan.is_none() {
				let decls = param_decls(&session.inputs)?;
				let statements = self.db.planner()?.plan(&session.statement, &decls)?;
				session.plan = Some(PreparedPlan::new(&session.statement, statements));
			}
			self.exec_statements(session)?;
			Ok(())
		})
	}

	fn exec_statements(&self, session: &mut Session) -> Result<(), Error> {
		let xid = session.xid()?;
		let params = param_list(&session.inputs);
		let statements = match session.plan.as_ref() {
			Some(plan) => plan.statements.clone(),
			None => Vec::new(),
		};
		let mut left_cursor = false;
		for stmt in statements {
			// Each statement of the list runs at the next command id so
			// it sees everything the transaction did before it
			session.cid += 1;
			let snapshot = session.active_snapshot()?;
			let plan = session.plan.as_mut().ok_or_else(|| Error::Execution {
				message: "prepared plan vanished mid-exec".to_owned(),
			})?;
			plan.reset_executor()?;
			match stmt.command {
				CommandType::Utility => {
					spi::apply_utility(&self.db, &stmt)?;
					left_cursor = false;
				}
				CommandType::Select => {
					let slots = stmt.plan.as_ref().map(node::exec_count_slots).unwrap_or(0);
					let mut estate = EState::new(
						Arc::clone(&self.db),
						snapshot,
						xid,
						session.cid,
						stmt.range_table.clone(),
						params.clone(),
						stmt.n_param_exec,
						slots,
						Arc::clone(&self.cancel),
					);
					let (node, desc) = exe::executor_start(&stmt, &mut estate)?;
					plan.node = Some(node);
					plan.estate = Some(estate);
					plan.desc = Some(desc);
					plan.qdesc = Some(QueryDesc {
						command: stmt.command,
						stmt: stmt.clone(),
					});
					left_cursor = true;
				}
				_ => {
					let slots = stmt.plan.as_ref().map(node::exec_count_slots).unwrap_or(0);
					let mut estate = EState::new(
						Arc::clone(&self.db),
						snapshot,
						xid,
						session.cid,
						stmt.range_table.clone(),
						params.clone(),
						stmt.n_param_exec,
						slots,
						Arc::clone(&self.cancel),
					);
					let (mut node, _) = exe::executor_start(&stmt, &mut estate)?;
					let result = exe::execute_dml(&stmt, &mut node, &mut estate);
					exe::executor_end(&mut node, &mut estate)?;
					plan.processed += result?;
					left_cursor = false;
				}
			}
		}
		session.stage = if left_cursor {
			StatementStage::Exec
		} else {
			// Nothing to fetch from; utility and write statements leave
			// no cursor behind
			StatementStage::Empty
		};
		Ok(())
	}

	/// Pull the next row of the open cursor into the output bindings.
	/// Returns `false` once the end of data is reached; fetching again
	/// after that is an error.
	pub fn fetch(&self) -> Result<bool, Error> {
		self.run_statement(|session| {
			self.check_cancel()?;
			if session.stage == StatementStage::EoD {
				return Err(Error::EndOfData);
			}
			if !session.stage.accepts_fetch() {
				return Err(Error::ContextValid {
					message: "no statement executed".to_owned(),
				});
			}
			let Session {
				plan,
				outputs,
				stage,
				..
			} = session;
			let plan = plan.as_mut().ok_or_else(|| Error::ContextValid {
				message: "no statement executed".to_owned(),
			})?;
			if !plan.has_cursor() {
				return Err(Error::ContextValid {
					message: "no statement executed".to_owned(),
				});
			}
			let (node, estate) = match (plan.node.as_mut(), plan.estate.as_mut()) {
				(Some(node), Some(estate)) => (node, estate),
				_ => {
					return Err(Error::ContextValid {
						message: "no statement executed".to_owned(),
					})
				}
			};
			let Some(slot) = exe::fetch_one(node, estate)? else {
				*stage = StatementStage::EoD;
				return Ok(false);
			};
			let desc = plan.desc.clone().ok_or_else(|| Error::Execution {
				message: "cursor has no output descriptor".to_owned(),
			})?;
			let filter = estate.junk_filter.clone().unwrap_or_default();
			let tuple = estate.tuple_table.get(slot).tuple().cloned().ok_or_else(|| {
				Error::Execution {
					message: "cursor returned an empty slot".to_owned(),
				}
			})?;
			let values = filter.filter(&tuple);
			for output in outputs.iter_mut() {
				if output.index > values.len() {
					return Err(Error::NoSuchAttribute {
						position: output.index,
					});
				}
				let attr = desc.attr(output.index)?;
				transfer_value(output, attr, &values[output.index - 1], &self.db)?;
			}
			estate.tuple_table.get_mut(slot).clear();
			estate.processed += 1;
			plan.processed += 1;
			*stage = StatementStage::Fetch;
			Ok(true)
		})
	}

	/// Read an output slot after a fetch; positions match
	/// `output_link`.
	pub fn output_value(&self, position: usize) -> Result<Value, Error> {
		self.run(true, |session| {
			let binding = session
				.outputs
				.iter()
				.find(|o| o.index == position)
				.ok_or(Error::NoSuchAttribute {
					position,
				})?;
			match &binding.sink {
				OutputSink::Slot(slot) => {
					if slot.is_null() {
						Ok(Value::Null)
					} else {
						Ok(slot.value.clone())
					}
				}
				OutputSink::Registered(_) => Err(Error::Execution {
					message: "output position uses a registered transfer".to_owned(),
				}),
			}
		})
	}

	/// Inspect an output slot's raw landing area.
	pub fn output_slot<T>(&self, position: usize, f: impl FnOnce(&OutputSlot) -> T) -> Result<T, Error> {
		self.run(true, |session| {
			let binding = session
				.outputs
				.iter()
				.find(|o| o.index == position)
				.ok_or(Error::NoSuchAttribute {
					position,
				})?;
			match &binding.sink {
				OutputSink::Slot(slot) => Ok(f(slot)),
				OutputSink::Registered(_) => Err(Error::Execution {
					message: "output position uses a registered transfer".to_owned(),
				}),
			}
		})
	}

	/// Owner-checked cancellation checkpoint between statements.
	pub fn prepare(&self) -> Result<(), Error> {
		self.run(true, |_| self.check_cancel())
	}

	/// Plan-and-print without executing.
	pub fn explain(&self, statement: &str) -> Result<String, Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			let decls = param_decls(&session.inputs)?;
			let statements = self.db.planner()?.plan(statement, &decls)?;
			Ok(statements.iter().map(crate::dbs::explain::explain_statement).collect::<Vec<_>>().join(""))
		})
	}

	// --------------------------------------------------
	// User locks
	// --------------------------------------------------

	/// Take the cooperative lock `(group, item)` until transaction end.
	pub fn user_lock(&self, group: &str, item: u32) -> Result<(), Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			let xid = session.xid()?;
			let group_id = self.db.user_lock_group(group)?;
			self.db.locks.user_lock(group_id, item, xid)
		})
	}

	/// Release a cooperative lock early.
	pub fn user_unlock(&self, group: &str, item: u32) -> Result<(), Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			let xid = session.xid()?;
			let group_id = self.db.user_lock_group(group)?;
			self.db.locks.user_unlock(group_id, item, xid)
		})
	}

	// --------------------------------------------------
	// Fire-and-forget multi-statement mode
	// --------------------------------------------------

	/// Run a multi-statement string outside the prepared pipeline. Each
	/// statement commits before the next starts; a failure aborts the
	/// remainder but leaves earlier statements' effects visible.
	pub fn stream_exec(&self, statements: &str) -> Result<(), Error> {
		self.run(false, |session| {
			if session.owner.is_some() && session.owner != Some(thread::current().id()) {
				return Err(Error::ContextOwnership);
			}
			self.check_cancel()?;
			let planned = self.db.planner()?.plan(statements, &[])?;
			for stmt in planned {
				let xid = self.db.xact.begin();
				let snapshot = self.db.xact.snapshot(xid, 0);
				let ctx = SpiContext {
					db: Arc::clone(&self.db),
					xid,
					cid: 1,
					snapshot: snapshot.at_command(1),
					cancel: Arc::clone(&self.cancel),
				};
				match spi::run_statements(&ctx, &[stmt], ParamList::default()) {
					Ok(_) => {
						let mode = self.db.xact.commit_mode();
						self.db.xact.commit_with(xid, mode, self.db.durability().as_ref());
					}
					Err(err) => {
						self.db.xact.abort(xid);
						session.stage = StatementStage::Invalid;
						return Err(err);
					}
				}
			}
			session.stage = StatementStage::Invalid;
			Ok(())
		})
	}

	// --------------------------------------------------
	// Nested query interface
	// --------------------------------------------------

	fn spi_context(&self, session: &Session) -> Result<SpiContext, Error> {
		Ok(SpiContext {
			db: Arc::clone(&self.db),
			xid: session.xid()?,
			cid: session.cid,
			snapshot: session.active_snapshot()?,
			cancel: Arc::clone(&self.cancel),
		})
	}

	/// Open a nested invocation level.
	pub fn spi_connect(&self) -> Result<(), Error> {
		self.run(true, |session| {
			session.xid()?;
			session.spi.connect();
			Ok(())
		})
	}

	/// Tear the current nested level down.
	pub fn spi_finish(&self) -> Result<(), Error> {
		self.run(true, |session| session.spi.finish())
	}

	pub fn spi_push(&self) -> Result<(), Error> {
		self.run(true, |session| {
			session.spi.push();
			Ok(())
		})
	}

	pub fn spi_pop(&self) -> Result<(), Error> {
		self.run(true, |session| {
			session.spi.pop();
			Ok(())
		})
	}

	/// Plan and run a statement inside the current nested level.
	pub fn spi_exec(&self, statement: &str) -> Result<u64, Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			session.spi.current()?;
			session.cid += 1;
			let ctx = self.spi_context(session)?;
			let plans = self.db.planner()?.plan(statement, &[])?;
			let (table, processed) = spi::run_statements(&ctx, &plans, ParamList::default())?;
			let frame = session.spi.current()?;
			frame.tuptable = table;
			frame.processed = processed;
			Ok(processed)
		})
	}

	/// Plan a statement for repeated nested execution.
	pub fn spi_prepare(&self, statement: &str, decls: &[ParamDecl]) -> Result<Arc<Vec<PlannedStatement>>, Error> {
		self.run(true, |session| {
			session.spi.current()?;
			let plans = self.db.planner()?.plan(statement, decls)?;
			Ok(Arc::new(plans))
		})
	}

	/// Run a prepared nested plan with positional parameter values.
	pub fn spi_execp(
		&self,
		plan: &Arc<Vec<PlannedStatement>>,
		values: &[Value],
	) -> Result<u64, Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			session.spi.current()?;
			session.cid += 1;
			let ctx = self.spi_context(session)?;
			let params = positional_params(values);
			let (table, processed) = spi::run_statements(&ctx, plan, params)?;
			let frame = session.spi.current()?;
			frame.tuptable = table;
			frame.processed = processed;
			Ok(processed)
		})
	}

	/// Keep a prepared nested plan beyond the current level.
	pub fn spi_saveplan(&self, name: &str, plan: Arc<Vec<PlannedStatement>>) -> Result<(), Error> {
		self.run(true, |session| {
			session.saved_plans.insert(name.to_owned(), plan);
			Ok(())
		})
	}

	pub fn spi_saved_plan(&self, name: &str) -> Result<Arc<Vec<PlannedStatement>>, Error> {
		self.run(true, |session| {
			session.saved_plans.get(name).cloned().ok_or_else(|| Error::Execution {
				message: format!("no saved plan named '{name}'"),
			})
		})
	}

	pub fn spi_freeplan(&self, name: &str) -> Result<(), Error> {
		self.run(true, |session| {
			session.saved_plans.remove(name);
			Ok(())
		})
	}

	/// Open a named cursor over a prepared plan. The command id at open
	/// is pinned for all later fetches.
	pub fn spi_cursor_open(
		&self,
		name: Option<&str>,
		plan: &Arc<Vec<PlannedStatement>>,
		values: &[Value],
	) -> Result<String, Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			let ctx = self.spi_context(session)?;
			let stmt = plan.first().ok_or_else(|| Error::Execution {
				message: "cursor plan is empty".to_owned(),
			})?;
			let portal = spi::open_portal(&ctx, stmt, positional_params(values))?;
			let name = match name {
				Some(name) => name.to_owned(),
				None => {
					session.next_portal += 1;
					format!("<unnamed portal {}>", session.next_portal)
				}
			};
			let frame = session.spi.current()?;
			frame.portals.insert(name.clone(), portal);
			Ok(name)
		})
	}

	/// Fetch rows from a nested cursor; the rows also become the
	/// current nested result table.
	pub fn spi_cursor_fetch(
		&self,
		name: &str,
		forward: bool,
		count: usize,
	) -> Result<Vec<Vec<Value>>, Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			let frame = session.spi.current()?;
			let portal = frame.portals.get_mut(name).ok_or_else(|| Error::SpiCursorMissing {
				name: name.to_owned(),
			})?;
			let rows = portal.fetch(forward, count)?;
			frame.processed = rows.len() as u64;
			frame.tuptable = Some(SpiTupleTable {
				desc: portal.desc.clone(),
				tuples: rows.clone(),
			});
			Ok(rows)
		})
	}

	/// Move a nested cursor without returning rows.
	pub fn spi_cursor_move(&self, name: &str, forward: bool, count: usize) -> Result<u64, Error> {
		self.run(true, |session| {
			self.check_cancel()?;
			let frame = session.spi.current()?;
			let portal = frame.portals.get_mut(name).ok_or_else(|| Error::SpiCursorMissing {
				name: name.to_owned(),
			})?;
			portal.move_by(forward, count)
		})
	}

	pub fn spi_cursor_close(&self, name: &str) -> Result<(), Error> {
		self.run(true, |session| {
			let frame = session.spi.current()?;
			let portal = frame.portals.remove(name).ok_or_else(|| Error::SpiCursorMissing {
				name: name.to_owned(),
			})?;
			portal.close()
		})
	}

	/// Inspect the current nested result table.
	pub fn spi_result<T>(&self, f: impl FnOnce(&SpiTupleTable) -> T) -> Result<T, Error> {
		self.run(true, |session| {
			let frame = session.spi.current()?;
			let table = frame.tuptable.as_ref().ok_or_else(|| Error::Execution {
				message: "no nested result table".to_owned(),
			})?;
			Ok(f(table))
		})
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.dispose();
	}
}

fn param_decls(inputs: &[InputBinding]) -> Result<Vec<ParamDecl>, Error> {
	let mut decls = Vec::with_capacity(inputs.len());
	for binding in inputs {
		if !binding.is_set {
			return Err(Error::Execution {
				message: format!("bound variable {} has not been set", binding.name),
			});
		}
		decls.push(ParamDecl {
			name: binding.name.clone(),
			kind: binding.kind,
		});
	}
	Ok(decls)
}

fn param_list(inputs: &[InputBinding]) -> ParamList {
	ParamList {
		params: inputs
			.iter()
			.map(|b| ParamBound {
				name: b.name.clone(),
				index: b.index,
				kind: b.kind,
				value: b.value.clone(),
			})
			.collect(),
	}
}

fn positional_params(values: &[Value]) -> ParamList {
	ParamList {
		params: values
			.iter()
			.enumerate()
			.map(|(i, v)| ParamBound {
				name: format!("{}", i + 1),
				index: i + 1,
				kind: v.kind().unwrap_or(TypeId::Text),
				value: v.clone(),
			})
			.collect(),
	}
}
