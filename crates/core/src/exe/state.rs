use crate::err::Error;
use crate::exe::node::NodeState;
use crate::exe::slot::{SlotRef, TupleTable};
use crate::plan::{Direction, RangeTableEntry, SubPlan};
use crate::sql::expr::{Expr, Target};
use crate::sql::kind::TypeId;
use crate::sql::val::Value;
use crate::store::heap::HeapRelation;
use crate::store::snapshot::{CommandId, Snapshot, XactId};
use crate::store::tuple::HeapTuple;
use crate::store::Database;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// One externally bound parameter, addressable by name and by position.
#[derive(Clone, Debug)]
pub struct ParamBound {
	pub name: String,
	/// 1-based binding position.
	pub index: usize,
	pub kind: TypeId,
	pub value: Value,
}

/// The external parameter list of a query.
#[derive(Clone, Debug, Default)]
pub struct ParamList {
	pub params: Vec<ParamBound>,
}

impl ParamList {
	pub fn by_name(&self, name: &str) -> Option<&ParamBound> {
		self.params.iter().find(|p| p.name == name)
	}

	pub fn by_num(&self, index: usize) -> Option<&ParamBound> {
		self.params.iter().find(|p| p.index == index)
	}
}

/// One executor-internal parameter slot, filled by init-plans and
/// correlated subplans.
#[derive(Clone, Debug, Default)]
pub struct ParamExecSlot {
	pub value: Value,
	/// When set, the slot is lazily filled by running this init-plan on
	/// first reference.
	pub pending_plan: Option<usize>,
}

/// State of one subplan hanging off the plan tree, keyed by plan id.
pub struct SubPlanState {
	pub node: Box<NodeState>,
	pub set_params: Vec<usize>,
	pub par_params: Vec<(usize, Expr)>,
}

/// The per-node expression evaluation environment: the tuples in scope,
/// the current relation, and the aggregate vectors the Agg node fills
/// before projecting.
#[derive(Default)]
pub struct ExprContext {
	pub scan_tuple: Option<SlotRef>,
	pub inner_tuple: Option<SlotRef>,
	pub outer_tuple: Option<SlotRef>,
	pub relation: Option<Arc<HeapRelation>>,
	/// 1-based range table index of the scanned relation.
	pub relid: usize,
	pub agg_values: Vec<Value>,
	pub agg_nulls: Vec<bool>,
}

/// Projection machinery of one plan node: the target list and the
/// result slot it materializes into. Set-returning targets park their
/// remaining output here and are drained one element per call.
pub struct ProjectionInfo {
	pub targetlist: Vec<Target>,
	pub slot: SlotRef,
	/// Pending set-returning output per target.
	pub pending: Vec<Option<VecDeque<Value>>>,
	/// Scalar values of the current iteration round.
	pub current: Vec<Value>,
}

impl ProjectionInfo {
	pub fn new(targetlist: Vec<Target>, slot: SlotRef) -> Self {
		let pending = targetlist.iter().map(|_| None).collect();
		Self {
			targetlist,
			slot,
			pending,
			current: Vec::new(),
		}
	}
}

/// Strips executor-only (junk) columns before tuples reach the caller.
#[derive(Clone, Debug, Default)]
pub struct JunkFilter {
	/// Positions (0-based) of junk targets in the projected tuple.
	junk: Vec<usize>,
	names: Vec<String>,
}

impl JunkFilter {
	pub fn new(targetlist: &[Target]) -> Self {
		Self {
			junk: targetlist
				.iter()
				.enumerate()
				.filter(|(_, t)| t.junk)
				.map(|(i, _)| i)
				.collect(),
			names: targetlist.iter().map(|t| t.name.clone()).collect(),
		}
	}

	pub fn has_junk(&self) -> bool {
		!self.junk.is_empty()
	}

	/// The value of a junk attribute by name, from a projected tuple.
	pub fn junk_attr(&self, tuple: &HeapTuple, name: &str) -> Option<Value> {
		self.names
			.iter()
			.position(|n| n == name)
			.filter(|i| self.junk.contains(i))
			.and_then(|i| tuple.values.get(i).cloned())
	}

	/// Copy the non-junk values out of a projected tuple.
	pub fn filter(&self, tuple: &HeapTuple) -> Vec<Value> {
		tuple
			.values
			.iter()
			.enumerate()
			.filter(|(i, _)| !self.junk.contains(i))
			.map(|(_, v)| v.clone())
			.collect()
	}
}

/// The per-query executor root: direction, range table, parameters,
/// snapshot, the tuple table, and the working state the nodes share.
pub struct EState {
	pub db: Arc<Database>,
	pub direction: Direction,
	pub snapshot: Snapshot,
	pub xid: XactId,
	pub cid: CommandId,
	pub range_table: Vec<RangeTableEntry>,
	pub result_relation: Option<Arc<HeapRelation>>,
	pub params: ParamList,
	pub param_exec: Vec<ParamExecSlot>,
	pub tuple_table: TupleTable,
	pub junk_filter: Option<JunkFilter>,
	/// Tuples processed by the current statement.
	pub processed: u64,
	/// Object id assigned to the last inserted row.
	pub last_oid: u32,
	/// Counter handing out node base ids during initialization.
	pub base_id: usize,
	/// Replacement tuples for concurrent-update re-checks, per range
	/// table index.
	pub ev_tuple: Vec<Option<HeapTuple>>,
	pub ev_tuple_null: Vec<bool>,
	pub cancel: Arc<AtomicBool>,
	pub sub_plans: HashMap<usize, SubPlanState>,
}

impl EState {
	pub fn new(
		db: Arc<Database>,
		snapshot: Snapshot,
		xid: XactId,
		cid: CommandId,
		range_table: Vec<RangeTableEntry>,
		params: ParamList,
		n_param_exec: usize,
		slots: usize,
		cancel: Arc<AtomicBool>,
	) -> Self {
		let rt_len = range_table.len();
		Self {
			db,
			direction: Direction::Forward,
			snapshot,
			xid,
			cid,
			range_table,
			result_relation: None,
			params,
			param_exec: vec![ParamExecSlot::default(); n_param_exec],
			tuple_table: TupleTable::new(slots),
			junk_filter: None,
			processed: 0,
			last_oid: 0,
			base_id: 0,
			ev_tuple: vec![None; rt_len],
			ev_tuple_null: vec![false; rt_len],
			cancel,
			sub_plans: HashMap::new(),
		}
	}

	/// Hand out the next node base id.
	pub fn assign_base_id(&mut self) -> usize {
		let id = self.base_id;
		self.base_id += 1;
		id
	}

	/// Resolve a 1-based range table index to its heap relation.
	pub fn open_relation(&self, relid: usize) -> Result<Arc<HeapRelation>, Error> {
		let entry = self.range_table.get(relid.wrapping_sub(1)).ok_or_else(|| Error::Execution {
			message: format!("range table index {relid} out of bounds"),
		})?;
		self.db.relation_by_id(entry.relid)
	}

	/// Register the subplan states of a plan node's lists.
	pub fn register_sub_plans(
		&mut self,
		init_plans: &[SubPlan],
		sub_plans: &[SubPlan],
	) -> Result<(), Error> {
		for sp in init_plans {
			// Init-plans fill their output parameters lazily, on first
			// reference from an expression
			for param in &sp.set_params {
				if let Some(slot) = self.param_exec.get_mut(*param) {
					slot.pending_plan = Some(sp.plan_id);
				}
			}
		}
		let _ = sub_plans;
		Ok(())
	}
}
