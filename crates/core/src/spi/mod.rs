//! The nested query interface: code already running inside the engine
//! (SQL-language functions, triggers) opens its own sub-executors here
//! without destabilizing the caller's executor.
//!
//! Invocations stack: each frame owns its result table and portals, and
//! the whole stack is forcibly reset at transaction commit or abort.

use crate::err::Error;
use crate::exe::node::{self, NodeState};
use crate::exe::state::{EState, JunkFilter, ParamBound, ParamList};
use crate::exe::{self, executor_end, executor_start};
use crate::plan::{CommandType, PlannedStatement};
use crate::sql::kind::TypeId;
use crate::sql::val::Value;
use crate::store::ds::SqlFunction;
use crate::store::snapshot::{CommandId, Snapshot, XactId};
use crate::store::tuple::TupleDesc;
use crate::store::Database;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Result rows of the most recent nested execution.
pub struct SpiTupleTable {
	pub desc: TupleDesc,
	pub tuples: Vec<Vec<Value>>,
}

impl SpiTupleTable {
	/// 1-based column number for a name, or 0 when absent.
	pub fn fnumber(&self, name: &str) -> usize {
		self.desc.attno(name).unwrap_or(0)
	}

	pub fn fname(&self, fnumber: usize) -> Result<&str, Error> {
		Ok(&self.desc.attr(fnumber)?.name)
	}

	/// Column value of one row, rendered as text.
	pub fn getvalue(&self, row: usize, fnumber: usize) -> Result<String, Error> {
		let value = self.getbinval(row, fnumber)?;
		Ok(value.to_string())
	}

	/// Raw column value of one row.
	pub fn getbinval(&self, row: usize, fnumber: usize) -> Result<Value, Error> {
		self.desc.attr(fnumber)?;
		let tuple = self.tuples.get(row).ok_or_else(|| Error::Execution {
			message: format!("row {row} out of range"),
		})?;
		Ok(tuple.get(fnumber - 1).cloned().unwrap_or(Value::Null))
	}

	pub fn gettype(&self, fnumber: usize) -> Result<TypeId, Error> {
		Ok(self.desc.attr(fnumber)?.kind)
	}
}

/// Copy a result row, replacing the listed attributes; the input row is
/// left untouched.
pub fn modify_tuple(
	tuple: &[Value],
	replacements: &[(usize, Value)],
) -> Result<Vec<Value>, Error> {
	let mut out = tuple.to_vec();
	for (attno, value) in replacements {
		let slot = out.get_mut(attno.wrapping_sub(1)).ok_or(Error::NoSuchAttribute {
			position: *attno,
		})?;
		*slot = value.clone();
	}
	Ok(out)
}

/// A cursor opened through the nested interface. The command id at open
/// is pinned so every fetch sees the same command visibility as the
/// cursor declaration.
pub struct Portal {
	node: NodeState,
	estate: EState,
	pub desc: TupleDesc,
	filter: JunkFilter,
	/// Whether the plan top is a materialized node and may be walked
	/// backwards.
	scrollable: bool,
}

impl Portal {
	/// Fetch up to `count` rows in the given direction.
	pub fn fetch(&mut self, forward: bool, count: usize) -> Result<Vec<Vec<Value>>, Error> {
		self.position(forward)?;
		let mut rows = Vec::new();
		while rows.len() < count {
			let Some(slot) = exe::fetch_one(&mut self.node, &mut self.estate)? else {
				break;
			};
			let tuple = self.estate.tuple_table.get(slot).tuple().ok_or_else(|| Error::Execution {
				message: "cursor plan returned an empty slot".to_owned(),
			})?;
			rows.push(self.filter.filter(tuple));
		}
		Ok(rows)
	}

	/// Move the cursor without returning rows.
	pub fn move_by(&mut self, forward: bool, count: usize) -> Result<u64, Error> {
		self.position(forward)?;
		let mut moved = 0;
		while moved < count as u64 {
			if exe::fetch_one(&mut self.node, &mut self.estate)?.is_none() {
				break;
			}
			moved += 1;
		}
		Ok(moved)
	}

	fn position(&mut self, forward: bool) -> Result<(), Error> {
		if !forward && !self.scrollable {
			return Err(Error::CursorNotScrollable);
		}
		self.estate.direction = if forward {
			crate::plan::Direction::Forward
		} else {
			crate::plan::Direction::Backward
		};
		Ok(())
	}

	pub fn close(mut self) -> Result<(), Error> {
		executor_end(&mut self.node, &mut self.estate)
	}
}

/// One nested invocation level.
#[derive(Default)]
pub struct SpiFrame {
	pub processed: u64,
	pub tuptable: Option<SpiTupleTable>,
	pub portals: HashMap<String, Portal>,
}

/// The session's stack of nested invocations.
#[derive(Default)]
pub struct SpiStack {
	frames: Vec<SpiFrame>,
	/// Suspension depth: a connected caller that hands control to other
	/// engine code pushes before and pops after.
	pushed: usize,
}

impl SpiStack {
	/// Open a new nested level.
	pub fn connect(&mut self) {
		self.frames.push(SpiFrame::default());
	}

	/// Suspend the current level so called code can connect its own.
	pub fn push(&mut self) {
		self.pushed += 1;
	}

	/// Resume the level suspended by the matching [`SpiStack::push`].
	pub fn pop(&mut self) {
		self.pushed = self.pushed.saturating_sub(1);
	}

	/// Tear the current level down and restore the caller's.
	pub fn finish(&mut self) -> Result<(), Error> {
		let frame = self.frames.pop().ok_or(Error::SpiNotConnected)?;
		for (_, portal) in frame.portals {
			portal.close()?;
		}
		Ok(())
	}

	pub fn current(&mut self) -> Result<&mut SpiFrame, Error> {
		self.frames.last_mut().ok_or(Error::SpiNotConnected)
	}

	pub fn depth(&self) -> usize {
		self.frames.len()
	}

	/// Forced teardown at transaction end, success or not: every frame
	/// and portal goes away.
	pub fn reset(&mut self) {
		self.pushed = 0;
		while let Some(frame) = self.frames.pop() {
			for (_, portal) in frame.portals {
				// Best effort; the transaction is over either way
				let _ = portal.close();
			}
		}
	}
}

/// Everything a nested execution needs from its caller's transaction.
#[derive(Clone)]
pub struct SpiContext {
	pub db: Arc<Database>,
	pub xid: XactId,
	pub cid: CommandId,
	pub snapshot: Snapshot,
	pub cancel: Arc<AtomicBool>,
}

fn build_estate(ctx: &SpiContext, stmt: &PlannedStatement, params: ParamList) -> EState {
	let slots = stmt.plan.as_ref().map(node::exec_count_slots).unwrap_or(0);
	EState::new(
		Arc::clone(&ctx.db),
		ctx.snapshot.clone(),
		ctx.xid,
		ctx.cid,
		stmt.range_table.clone(),
		params,
		stmt.n_param_exec,
		slots,
		Arc::clone(&ctx.cancel),
	)
}

/// Execute planned statements to completion and report the last
/// statement's result.
pub fn run_statements(
	ctx: &SpiContext,
	statements: &[PlannedStatement],
	params: ParamList,
) -> Result<(Option<SpiTupleTable>, u64), Error> {
	let mut table = None;
	let mut processed = 0;
	for stmt in statements {
		match stmt.command {
			CommandType::Utility => {
				apply_utility(&ctx.db, stmt)?;
				table = None;
				processed = 0;
			}
			CommandType::Select => {
				let mut estate = build_estate(ctx, stmt, params.clone());
				let (mut node, desc) = executor_start(stmt, &mut estate)?;
				let filter = estate.junk_filter.clone().unwrap_or_default();
				let mut tuples = Vec::new();
				let result = loop {
					match exe::fetch_one(&mut node, &mut estate) {
						Ok(Some(slot)) => {
							if let Some(tuple) = estate.tuple_table.get(slot).tuple() {
								tuples.push(filter.filter(tuple));
							}
						}
						Ok(None) => break Ok(()),
						Err(err) => break Err(err),
					}
				};
				executor_end(&mut node, &mut estate)?;
				result?;
				processed = tuples.len() as u64;
				table = Some(SpiTupleTable {
					desc,
					tuples,
				});
			}
			_ => {
				let mut estate = build_estate(ctx, stmt, params.clone());
				let (mut node, _) = executor_start(stmt, &mut estate)?;
				let result = exe::execute_dml(stmt, &mut node, &mut estate);
				executor_end(&mut node, &mut estate)?;
				processed = result?;
				table = None;
			}
		}
	}
	Ok((table, processed))
}

/// Open a portal over the single SELECT statement of a prepared plan.
pub fn open_portal(ctx: &SpiContext, stmt: &PlannedStatement, params: ParamList) -> Result<Portal, Error> {
	if stmt.command != CommandType::Select {
		return Err(Error::Execution {
			message: "cursors require a select statement".to_owned(),
		});
	}
	// Pin command visibility to the open, not to later fetches
	let pinned = SpiContext {
		snapshot: ctx.snapshot.at_command(ctx.cid),
		..ctx.clone()
	};
	let mut estate = build_estate(&pinned, stmt, params);
	let (node, desc) = executor_start(stmt, &mut estate)?;
	let filter = estate.junk_filter.clone().unwrap_or_default();
	let scrollable = stmt.plan.as_ref().is_some_and(node::restartable);
	Ok(Portal {
		node,
		estate,
		desc,
		filter,
		scrollable,
	})
}

/// Relay a utility statement to the catalog.
pub fn apply_utility(db: &Arc<Database>, stmt: &PlannedStatement) -> Result<(), Error> {
	use crate::plan::UtilityStmt;
	match stmt.utility.as_ref().ok_or_else(|| Error::Execution {
		message: "utility statement without a payload".to_owned(),
	})? {
		UtilityStmt::CreateTable {
			name,
			desc,
		} => db.create_table(name, desc.clone()).map(|_| ()),
		UtilityStmt::DropTable {
			name,
		} => db.drop_table(name),
		UtilityStmt::CreateIndex {
			name,
			table,
			key_cols,
			unique,
		} => db.create_index(name, table, key_cols.clone(), *unique, None).map(|_| ()),
		UtilityStmt::DropIndex {
			name,
		} => db.drop_index(name),
	}
}

/// Run a SQL-language function body and shape its result for the
/// expression evaluator. Set-returning functions deliver the first
/// column of every row; scalar functions the first column of the first
/// row.
pub fn call_sql_function(
	estate: &mut EState,
	function: &SqlFunction,
	args: &[Value],
) -> Result<Value, Error> {
	let ctx = SpiContext {
		db: Arc::clone(&estate.db),
		xid: estate.xid,
		cid: estate.cid,
		snapshot: estate.snapshot.clone(),
		cancel: Arc::clone(&estate.cancel),
	};
	let params = ParamList {
		params: args
			.iter()
			.enumerate()
			.map(|(i, v)| ParamBound {
				name: format!("{}", i + 1),
				index: i + 1,
				kind: v.kind().unwrap_or(TypeId::Text),
				value: v.clone(),
			})
			.collect(),
	};
	let (table, _) = run_statements(&ctx, &function.plans, params)?;
	let Some(table) = table else {
		return Ok(Value::Null);
	};
	if function.set_returning {
		let set: VecDeque<Value> = table
			.tuples
			.into_iter()
			.map(|row| row.into_iter().next().unwrap_or(Value::Null))
			.collect();
		Ok(Value::Set(set))
	} else {
		Ok(table
			.tuples
			.into_iter()
			.next()
			.and_then(|row| row.into_iter().next())
			.unwrap_or(Value::Null))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn modify_tuple_is_pure() {
		let row = vec![Value::Int4(1), Value::Text("a".to_owned())];
		let out = modify_tuple(&row, &[(2, Value::Text("b".to_owned()))]).unwrap();
		assert_eq!(row[1], Value::Text("a".to_owned()));
		assert_eq!(out[1], Value::Text("b".to_owned()));
		assert!(modify_tuple(&row, &[(3, Value::Null)]).is_err());
	}

	#[test]
	fn stack_resets_drop_all_frames() {
		let mut stack = SpiStack::default();
		stack.connect();
		stack.connect();
		assert_eq!(stack.depth(), 2);
		stack.reset();
		assert_eq!(stack.depth(), 0);
		assert!(stack.finish().is_err());
	}
}
