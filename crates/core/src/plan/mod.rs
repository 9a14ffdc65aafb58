//! The plan-tree representation handed to the executor.
//!
//! Parsing, rewriting and planning happen outside the engine. A
//! [`Planner`] implementation turns statement text plus the caller's
//! parameter declarations into [`PlannedStatement`]s; the executor walks
//! the [`PlanNode`] tree they contain.

use crate::err::Error;
use crate::sql::expr::{Expr, Target};
use crate::sql::kind::TypeId;
use crate::store::index::Strategy;
use crate::store::tuple::TupleDesc;
use crate::store::Oid;

/// Scan direction requested by the plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
	Forward,
	Backward,
	/// The plan does not care about row order; delegated scans use this
	/// to enable the block-sort optimization.
	NoMovement,
}

/// The kind of statement a planned tree implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
	Select,
	Insert,
	Update,
	Delete,
	Utility,
}

/// One entry of the range table; plan nodes reference relations by
/// 1-based index into this list.
#[derive(Clone, Debug)]
pub struct RangeTableEntry {
	pub relname: String,
	pub relid: Oid,
}

/// Estimated costs and sizing carried on every plan node.
#[derive(Clone, Debug, Default)]
pub struct Cost {
	pub startup: f64,
	pub total: f64,
	pub rows: f64,
	pub width: u32,
}

/// An uncorrelated or correlated subquery hanging off a plan node.
#[derive(Clone, Debug)]
pub struct SubPlan {
	/// Identifier referenced by `Expr::SubPlan` and by `set_params`.
	pub plan_id: usize,
	pub plan: Box<PlanNode>,
	/// Executor-internal parameter slots this subplan fills when run as
	/// an init-plan.
	pub set_params: Vec<usize>,
	/// Correlation: parameter slot, filled from an expression evaluated
	/// in the parent's context before each rescan.
	pub par_params: Vec<(usize, Expr)>,
}

/// State shared by all plan node shapes.
#[derive(Clone, Debug)]
pub struct PlanCommon {
	pub cost: Cost,
	pub targetlist: Vec<Target>,
	pub qual: Vec<Expr>,
	pub lefttree: Option<Box<PlanNode>>,
	pub righttree: Option<Box<PlanNode>>,
	/// Uncorrelated subqueries evaluated once before the node runs.
	pub init_plans: Vec<SubPlan>,
	/// Correlated subqueries evaluated per tuple.
	pub sub_plans: Vec<SubPlan>,
}

impl Default for PlanCommon {
	fn default() -> Self {
		Self {
			cost: Cost::default(),
			targetlist: Vec::new(),
			qual: Vec::new(),
			lefttree: None,
			righttree: None,
			init_plans: Vec::new(),
			sub_plans: Vec::new(),
		}
	}
}

/// One index-qual clause, already normalized by the planner into
/// `indexed-attribute strategy value`.
#[derive(Clone, Debug)]
pub struct IndexQual {
	/// 1-based key column within the index.
	pub attno: usize,
	pub strategy: Strategy,
	/// Restricted to `Const` and `Param` by the planner.
	pub value: Expr,
}

/// One merge clause of a merge join: `outer = inner` over pre-sorted
/// inputs.
#[derive(Clone, Debug)]
pub struct MergeClause {
	pub outer: Expr,
	pub inner: Expr,
}

/// One hash clause of a hash join: `outer = inner`.
#[derive(Clone, Debug)]
pub struct HashClause {
	pub outer: Expr,
	pub inner: Expr,
}

/// A sort key over the node's output columns.
#[derive(Clone, Debug)]
pub struct SortKey {
	/// 1-based output column.
	pub attno: usize,
	pub descending: bool,
}

/// The aggregate kinds the Agg node computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggKind {
	CountStar,
	Count,
	Sum,
	Avg,
	Min,
	Max,
}

/// One aggregate computed by an Agg node, referenced from target lists
/// through `Expr::Aggref` by position.
#[derive(Clone, Debug)]
pub struct AggExpr {
	pub kind: AggKind,
	pub arg: Option<Expr>,
	pub distinct: bool,
}

/// The executor plan tree.
#[derive(Clone, Debug)]
pub enum PlanNode {
	Result {
		common: PlanCommon,
		/// A qual independent of any input tuple, checked once.
		constant_qual: Option<Expr>,
	},
	Append {
		common: PlanCommon,
		plans: Vec<PlanNode>,
	},
	SeqScan {
		common: PlanCommon,
		scanrelid: usize,
	},
	DelegatedSeqScan {
		common: PlanCommon,
		scanrelid: usize,
	},
	IndexScan {
		common: PlanCommon,
		scanrelid: usize,
		/// Index name per OR'd disjunct.
		indices: Vec<String>,
		/// AND'ed scan-key clauses per disjunct, aligned with `indices`.
		indexquals: Vec<Vec<IndexQual>>,
		/// The original disjunct expressions, for re-checking matched
		/// tuples against prior disjuncts.
		indexqualorig: Vec<Vec<Expr>>,
		direction: Direction,
	},
	DelegatedIndexScan {
		common: PlanCommon,
		scanrelid: usize,
		index: String,
		indexqual: Vec<IndexQual>,
		direction: Direction,
	},
	TidScan {
		common: PlanCommon,
		scanrelid: usize,
		/// Expressions yielding item pointers encoded as `(block << 16) | offset` in int8.
		tideval: Vec<Expr>,
	},
	NestLoop {
		common: PlanCommon,
	},
	MergeJoin {
		common: PlanCommon,
		clauses: Vec<MergeClause>,
	},
	HashJoin {
		common: PlanCommon,
		clauses: Vec<HashClause>,
	},
	Hash {
		common: PlanCommon,
		/// Hash key evaluated against the build-side tuple.
		key: Expr,
		/// Planner-forced batch count; `None` lets the executor size the
		/// table from the cost estimates.
		forced_batches: Option<usize>,
	},
	Material {
		common: PlanCommon,
	},
	Sort {
		common: PlanCommon,
		keys: Vec<SortKey>,
	},
	Group {
		common: PlanCommon,
		/// One tuple per group when true; all tuples plus a null group
		/// boundary when false.
		tuple_per_group: bool,
		group_cols: Vec<usize>,
	},
	Agg {
		common: PlanCommon,
		aggs: Vec<AggExpr>,
		/// Whether the input delivers null group boundaries (a Group
		/// node in all-tuples mode sits below).
		group_boundaries: bool,
	},
	Unique {
		common: PlanCommon,
		/// Output columns compared for uniqueness; empty means the whole
		/// tuple.
		unique_cols: Vec<usize>,
	},
}

impl PlanNode {
	pub fn common(&self) -> &PlanCommon {
		match self {
			PlanNode::Result {
				common,
				..
			}
			| PlanNode::Append {
				common,
				..
			}
			| PlanNode::SeqScan {
				common,
				..
			}
			| PlanNode::DelegatedSeqScan {
				common,
				..
			}
			| PlanNode::IndexScan {
				common,
				..
			}
			| PlanNode::DelegatedIndexScan {
				common,
				..
			}
			| PlanNode::TidScan {
				common,
				..
			}
			| PlanNode::NestLoop {
				common,
			}
			| PlanNode::MergeJoin {
				common,
				..
			}
			| PlanNode::HashJoin {
				common,
				..
			}
			| PlanNode::Hash {
				common,
				..
			}
			| PlanNode::Material {
				common,
			}
			| PlanNode::Sort {
				common,
				..
			}
			| PlanNode::Group {
				common,
				..
			}
			| PlanNode::Agg {
				common,
				..
			}
			| PlanNode::Unique {
				common,
				..
			} => common,
		}
	}

	/// The display name used by the plan printer.
	pub fn name(&self) -> &'static str {
		match self {
			PlanNode::Result {
				..
			} => "Result",
			PlanNode::Append {
				..
			} => "Append",
			PlanNode::SeqScan {
				..
			} => "Seq Scan",
			PlanNode::DelegatedSeqScan {
				..
			} => "Delegated Seq Scan",
			PlanNode::IndexScan {
				..
			} => "Index Scan",
			PlanNode::DelegatedIndexScan {
				..
			} => "Delegated Index Scan",
			PlanNode::TidScan {
				..
			} => "Tid Scan",
			PlanNode::NestLoop {
				..
			} => "Nested Loop",
			PlanNode::MergeJoin {
				..
			} => "Merge Join",
			PlanNode::HashJoin {
				..
			} => "Hash Join",
			PlanNode::Hash {
				..
			} => "Hash",
			PlanNode::Material {
				..
			} => "Material",
			PlanNode::Sort {
				..
			} => "Sort",
			PlanNode::Group {
				..
			} => "Group",
			PlanNode::Agg {
				..
			} => "Aggregate",
			PlanNode::Unique {
				..
			} => "Unique",
		}
	}
}

/// Utility statements the session relays to the catalog layer.
#[derive(Clone, Debug)]
pub enum UtilityStmt {
	CreateTable {
		name: String,
		desc: TupleDesc,
	},
	DropTable {
		name: String,
	},
	CreateIndex {
		name: String,
		table: String,
		key_cols: Vec<usize>,
		unique: bool,
	},
	DropIndex {
		name: String,
	},
}

/// One statement as produced by the external planner.
#[derive(Clone, Debug)]
pub struct PlannedStatement {
	pub command: CommandType,
	pub plan: Option<PlanNode>,
	pub range_table: Vec<RangeTableEntry>,
	/// 1-based range-table index of the relation INSERT/UPDATE/DELETE
	/// writes to.
	pub result_relation: Option<usize>,
	pub utility: Option<UtilityStmt>,
	/// Number of executor-internal parameter slots used across the tree.
	pub n_param_exec: usize,
}

/// Declaration of one bound parameter, passed through to the planner.
#[derive(Clone, Debug)]
pub struct ParamDecl {
	pub name: String,
	pub kind: TypeId,
}

/// The external parse/rewrite/plan pipeline.
pub trait Planner: Send + Sync {
	/// Plan a statement. `params` describes the bindings the caller has
	/// registered, in binding order.
	fn plan(&self, statement: &str, params: &[ParamDecl]) -> Result<Vec<PlannedStatement>, Error>;
}
