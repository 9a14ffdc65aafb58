//! Per-node executor implementations and the dispatch layer.
//!
//! Every node type implements five operations: init, exec (produce the
//! next tuple), end, rescan, and slot counting. Dispatch is a single
//! match over the node state, initialization is bottom-up, and the pull
//! loop checks for cancellation before every node call.

pub mod agg;
pub mod append;
pub mod delegated;
pub mod group;
pub mod hash;
pub mod hashjoin;
pub mod indexscan;
pub mod material;
pub mod mergejoin;
pub mod nestloop;
pub mod result;
pub mod seqscan;
pub mod sort;
pub mod subplan;
pub mod tidscan;
pub mod unique;

use crate::err::Error;
use crate::exe::slot::SlotRef;
use crate::exe::state::{EState, ExprContext, ProjectionInfo, SubPlanState};
use crate::plan::{PlanCommon, PlanNode};
use crate::sql::expr::Expr;
use std::sync::atomic::Ordering;

/// State every node carries: its expression context, qualification,
/// projection, and the bookkeeping flags of the pull protocol.
pub struct CommonState {
	pub base_id: usize,
	pub ectx: ExprContext,
	pub qual: Vec<Expr>,
	pub proj: ProjectionInfo,
	/// A set-returning projection is mid-iteration; keep projecting
	/// without advancing the input.
	pub tup_from_tlist: bool,
	/// A parameter this subtree depends on changed; rescan before the
	/// next exec.
	pub chg_param: bool,
}

impl CommonState {
	/// Build the common state for a plan node: assign its base id,
	/// reserve the projection slot, and initialize subplans.
	pub fn build(common: &PlanCommon, estate: &mut EState) -> Result<Self, Error> {
		let base_id = estate.assign_base_id();
		let slot = estate.tuple_table.alloc()?;
		init_sub_plans(common, estate)?;
		Ok(Self {
			base_id,
			ectx: ExprContext::default(),
			qual: common.qual.clone(),
			proj: ProjectionInfo::new(common.targetlist.clone(), slot),
			tup_from_tlist: false,
			chg_param: false,
		})
	}
}

fn init_sub_plans(common: &PlanCommon, estate: &mut EState) -> Result<(), Error> {
	for sp in common.init_plans.iter().chain(common.sub_plans.iter()) {
		let node = exec_init_node(&sp.plan, estate)?;
		estate.sub_plans.insert(
			sp.plan_id,
			SubPlanState {
				node: Box::new(node),
				set_params: sp.set_params.clone(),
				par_params: sp.par_params.clone(),
			},
		);
	}
	estate.register_sub_plans(&common.init_plans, &common.sub_plans)?;
	Ok(())
}

/// The executor state tree, one variant per plan node type.
pub enum NodeState {
	Result(result::ResultState),
	Append(append::AppendState),
	SeqScan(seqscan::SeqScanState),
	DelegatedSeqScan(delegated::DelegatedSeqScanState),
	IndexScan(indexscan::IndexScanState),
	DelegatedIndexScan(delegated::DelegatedIndexScanState),
	TidScan(tidscan::TidScanState),
	NestLoop(nestloop::NestLoopState),
	MergeJoin(mergejoin::MergeJoinState),
	HashJoin(hashjoin::HashJoinState),
	Hash(hash::HashState),
	Material(material::MaterialState),
	Sort(sort::SortState),
	Group(group::GroupState),
	Agg(agg::AggState),
	Unique(unique::UniqueState),
}

impl NodeState {
	pub fn common(&self) -> &CommonState {
		match self {
			NodeState::Result(s) => &s.common,
			NodeState::Append(s) => &s.common,
			NodeState::SeqScan(s) => &s.common,
			NodeState::DelegatedSeqScan(s) => &s.common,
			NodeState::IndexScan(s) => &s.common,
			NodeState::DelegatedIndexScan(s) => &s.common,
			NodeState::TidScan(s) => &s.common,
			NodeState::NestLoop(s) => &s.common,
			NodeState::MergeJoin(s) => &s.common,
			NodeState::HashJoin(s) => &s.common,
			NodeState::Hash(s) => &s.common,
			NodeState::Material(s) => &s.common,
			NodeState::Sort(s) => &s.common,
			NodeState::Group(s) => &s.common,
			NodeState::Agg(s) => &s.common,
			NodeState::Unique(s) => &s.common,
		}
	}

	pub fn common_mut(&mut self) -> &mut CommonState {
		match self {
			NodeState::Result(s) => &mut s.common,
			NodeState::Append(s) => &mut s.common,
			NodeState::SeqScan(s) => &mut s.common,
			NodeState::DelegatedSeqScan(s) => &mut s.common,
			NodeState::IndexScan(s) => &mut s.common,
			NodeState::DelegatedIndexScan(s) => &mut s.common,
			NodeState::TidScan(s) => &mut s.common,
			NodeState::NestLoop(s) => &mut s.common,
			NodeState::MergeJoin(s) => &mut s.common,
			NodeState::HashJoin(s) => &mut s.common,
			NodeState::Hash(s) => &mut s.common,
			NodeState::Material(s) => &mut s.common,
			NodeState::Sort(s) => &mut s.common,
			NodeState::Group(s) => &mut s.common,
			NodeState::Agg(s) => &mut s.common,
			NodeState::Unique(s) => &mut s.common,
		}
	}

	/// Mark this subtree as depending on changed parameters.
	pub fn mark_chg_param(&mut self) {
		self.common_mut().chg_param = true;
	}
}

/// How many tuple table slots the subtree rooted at `plan` reserves,
/// including its init-plans and subplans. The total sizes the tuple
/// table before any node initializes.
pub fn exec_count_slots(plan: &PlanNode) -> usize {
	let common = plan.common();
	let own = match plan {
		// Scans reserve a scan slot next to the projection slot
		PlanNode::SeqScan {
			..
		}
		| PlanNode::DelegatedSeqScan {
			..
		}
		| PlanNode::IndexScan {
			..
		}
		| PlanNode::DelegatedIndexScan {
			..
		}
		| PlanNode::TidScan {
			..
		} => 2,
		// Hash join holds the probe tuple and the current build-side
		// candidate in slots of its own
		PlanNode::HashJoin {
			..
		} => 3,
		_ => 1,
	};
	let children = common.lefttree.as_deref().map_or(0, exec_count_slots)
		+ common.righttree.as_deref().map_or(0, exec_count_slots);
	let append = match plan {
		PlanNode::Append {
			plans,
			..
		} => plans.iter().map(exec_count_slots).sum(),
		_ => 0,
	};
	let subs = common
		.init_plans
		.iter()
		.chain(common.sub_plans.iter())
		.map(|sp| exec_count_slots(&sp.plan))
		.sum::<usize>();
	own + children + append + subs
}

/// Initialize the subtree rooted at `plan`, bottom-up.
pub fn exec_init_node(plan: &PlanNode, estate: &mut EState) -> Result<NodeState, Error> {
	trace!("init node {}", plan.name());
	match plan {
		PlanNode::Result {
			common,
			constant_qual,
		} => result::init(common, constant_qual.as_ref(), estate).map(NodeState::Result),
		PlanNode::Append {
			common,
			plans,
		} => append::init(common, plans, estate).map(NodeState::Append),
		PlanNode::SeqScan {
			common,
			scanrelid,
		} => seqscan::init(common, *scanrelid, estate).map(NodeState::SeqScan),
		PlanNode::DelegatedSeqScan {
			common,
			scanrelid,
		} => delegated::init_seq(common, *scanrelid, estate).map(NodeState::DelegatedSeqScan),
		PlanNode::IndexScan {
			common,
			scanrelid,
			indices,
			indexquals,
			indexqualorig,
			direction,
		} => indexscan::init(common, *scanrelid, indices, indexquals, indexqualorig, *direction, estate)
			.map(NodeState::IndexScan),
		PlanNode::DelegatedIndexScan {
			common,
			scanrelid,
			index,
			indexqual,
			direction,
		} => delegated::init_index(common, *scanrelid, index, indexqual, *direction, estate)
			.map(NodeState::DelegatedIndexScan),
		PlanNode::TidScan {
			common,
			scanrelid,
			tideval,
		} => tidscan::init(common, *scanrelid, tideval, estate).map(NodeState::TidScan),
		PlanNode::NestLoop {
			common,
		} => nestloop::init(common, estate).map(NodeState::NestLoop),
		PlanNode::MergeJoin {
			common,
			clauses,
		} => mergejoin::init(common, clauses, estate).map(NodeState::MergeJoin),
		PlanNode::HashJoin {
			common,
			clauses,
		} => hashjoin::init(common, clauses, estate).map(NodeState::HashJoin),
		PlanNode::Hash {
			common,
			key,
			forced_batches,
		} => hash::init(common, key, *forced_batches, estate).map(NodeState::Hash),
		PlanNode::Material {
			common,
		} => material::init(common, estate).map(NodeState::Material),
		PlanNode::Sort {
			common,
			keys,
		} => sort::init(common, keys, estate).map(NodeState::Sort),
		PlanNode::Group {
			common,
			tuple_per_group,
			group_cols,
		} => group::init(common, *tuple_per_group, group_cols, estate).map(NodeState::Group),
		PlanNode::Agg {
			common,
			aggs,
			group_boundaries,
		} => agg::init(common, aggs, *group_boundaries, estate).map(NodeState::Agg),
		PlanNode::Unique {
			common,
			unique_cols,
		} => unique::init(common, unique_cols, estate).map(NodeState::Unique),
	}
}

/// The canonical pull: produce the next tuple of the subtree, or `None`
/// when it is exhausted.
pub fn exec_proc_node(node: &mut NodeState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	// Cancellation is polled on every pull so a cancel lands within one
	// node call per plan level
	if estate.cancel.load(Ordering::Acquire) {
		return Err(Error::Cancelled);
	}
	if node.common().chg_param {
		// A parameter this subtree depends on changed; let rescan
		// propagate the change down before pulling
		exec_rescan(node, estate)?;
	}
	match node {
		NodeState::Result(s) => result::exec(s, estate),
		NodeState::Append(s) => append::exec(s, estate),
		NodeState::SeqScan(s) => seqscan::exec(s, estate),
		NodeState::DelegatedSeqScan(s) => delegated::exec_seq(s, estate),
		NodeState::IndexScan(s) => indexscan::exec(s, estate),
		NodeState::DelegatedIndexScan(s) => delegated::exec_index(s, estate),
		NodeState::TidScan(s) => tidscan::exec(s, estate),
		NodeState::NestLoop(s) => nestloop::exec(s, estate),
		NodeState::MergeJoin(s) => mergejoin::exec(s, estate),
		NodeState::HashJoin(s) => hashjoin::exec(s, estate),
		NodeState::Hash(s) => hash::exec(s, estate),
		NodeState::Material(s) => material::exec(s, estate),
		NodeState::Sort(s) => sort::exec(s, estate),
		NodeState::Group(s) => group::exec(s, estate),
		NodeState::Agg(s) => agg::exec(s, estate),
		NodeState::Unique(s) => unique::exec(s, estate),
	}
}

/// Shut the subtree down, releasing scans, locks, pins and subplans.
pub fn exec_end_node(node: &mut NodeState, estate: &mut EState) -> Result<(), Error> {
	match node {
		NodeState::Result(s) => result::end(s, estate),
		NodeState::Append(s) => append::end(s, estate),
		NodeState::SeqScan(s) => seqscan::end(s, estate),
		NodeState::DelegatedSeqScan(s) => delegated::end_seq(s, estate),
		NodeState::IndexScan(s) => indexscan::end(s, estate),
		NodeState::DelegatedIndexScan(s) => delegated::end_index(s, estate),
		NodeState::TidScan(s) => tidscan::end(s, estate),
		NodeState::NestLoop(s) => nestloop::end(s, estate),
		NodeState::MergeJoin(s) => mergejoin::end(s, estate),
		NodeState::HashJoin(s) => hashjoin::end(s, estate),
		NodeState::Hash(s) => hash::end(s, estate),
		NodeState::Material(s) => material::end(s, estate),
		NodeState::Sort(s) => sort::end(s, estate),
		NodeState::Group(s) => group::end(s, estate),
		NodeState::Agg(s) => agg::end(s, estate),
		NodeState::Unique(s) => unique::end(s, estate),
	}
}

/// Restart the subtree, usually because an outer tuple or a parameter
/// changed.
pub fn exec_rescan(node: &mut NodeState, estate: &mut EState) -> Result<(), Error> {
	node.common_mut().chg_param = false;
	node.common_mut().tup_from_tlist = false;
	match node {
		NodeState::Result(s) => result::rescan(s, estate),
		NodeState::Append(s) => append::rescan(s, estate),
		NodeState::SeqScan(s) => seqscan::rescan(s, estate),
		NodeState::DelegatedSeqScan(s) => delegated::rescan_seq(s, estate),
		NodeState::IndexScan(s) => indexscan::rescan(s, estate),
		NodeState::DelegatedIndexScan(s) => delegated::rescan_index(s, estate),
		NodeState::TidScan(s) => tidscan::rescan(s, estate),
		NodeState::NestLoop(s) => nestloop::rescan(s, estate),
		NodeState::MergeJoin(s) => mergejoin::rescan(s, estate),
		NodeState::HashJoin(s) => hashjoin::rescan(s, estate),
		NodeState::Hash(s) => hash::rescan(s, estate),
		NodeState::Material(s) => material::rescan(s, estate),
		NodeState::Sort(s) => sort::rescan(s, estate),
		NodeState::Group(s) => group::rescan(s, estate),
		NodeState::Agg(s) => agg::rescan(s, estate),
		NodeState::Unique(s) => unique::rescan(s, estate),
	}
}

/// Mark the current scan position of a restartable node.
pub fn exec_markpos(node: &mut NodeState) -> Result<(), Error> {
	match node {
		NodeState::Material(s) => {
			s.mark = Some(s.pos);
			Ok(())
		}
		NodeState::Sort(s) => {
			s.mark = Some(s.pos);
			Ok(())
		}
		NodeState::IndexScan(s) => indexscan::markpos(s),
		_ => Err(Error::Execution {
			message: "node does not support position marks".to_owned(),
		}),
	}
}

/// Return a restartable node to its marked position.
pub fn exec_restrpos(node: &mut NodeState) -> Result<(), Error> {
	match node {
		NodeState::Material(s) => {
			if let Some(mark) = s.mark {
				s.pos = mark;
			}
			Ok(())
		}
		NodeState::Sort(s) => {
			if let Some(mark) = s.mark {
				s.pos = mark;
			}
			Ok(())
		}
		NodeState::IndexScan(s) => indexscan::restrpos(s),
		_ => Err(Error::Execution {
			message: "node does not support position marks".to_owned(),
		}),
	}
}

/// Whether a plan's output can be replayed backwards, which is what a
/// scrollable cursor needs at its top.
pub fn restartable(plan: &PlanNode) -> bool {
	matches!(
		plan,
		PlanNode::Material {
			..
		} | PlanNode::Sort {
			..
		}
	)
}
