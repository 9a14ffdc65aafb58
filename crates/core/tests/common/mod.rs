//! Shared harness for the integration tests: a canned-plan planner
//! double standing in for the external parse/rewrite/plan pipeline,
//! plus terse builders for the plan shapes the tests exercise.

#![allow(dead_code)]

use loomdb_core::err::Error;
use loomdb_core::plan::{
	CommandType, Cost, Direction, IndexQual, ParamDecl, PlanCommon, PlanNode, PlannedStatement,
	Planner, RangeTableEntry, SortKey, UtilityStmt,
};
use loomdb_core::sql::expr::{Expr, Target};
use loomdb_core::sql::kind::TypeId;
use loomdb_core::sql::val::Value;
use loomdb_core::store::tuple::{Attribute, TupleDesc};
use loomdb_core::store::Database;
use loomdb_core::Connection;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type PlanFn = Box<dyn Fn(&[ParamDecl]) -> Result<Vec<PlannedStatement>, Error> + Send + Sync>;

/// Planner double: statements are registered ahead of time by their
/// exact text.
#[derive(Default)]
pub struct TestPlanner {
	plans: Mutex<HashMap<String, PlanFn>>,
}

impl TestPlanner {
	pub fn install(db: &Arc<Database>) -> Arc<TestPlanner> {
		let planner = Arc::new(TestPlanner::default());
		db.set_planner(Arc::clone(&planner) as Arc<dyn Planner>);
		planner
	}

	pub fn register(&self, statement: &str, stmts: Vec<PlannedStatement>) {
		self.plans
			.lock()
			.insert(statement.to_owned(), Box::new(move |_| Ok(stmts.clone())));
	}

	pub fn register_fn(
		&self,
		statement: &str,
		f: impl Fn(&[ParamDecl]) -> Result<Vec<PlannedStatement>, Error> + Send + Sync + 'static,
	) {
		self.plans.lock().insert(statement.to_owned(), Box::new(f));
	}
}

impl Planner for TestPlanner {
	fn plan(&self, statement: &str, params: &[ParamDecl]) -> Result<Vec<PlannedStatement>, Error> {
		let plans = self.plans.lock();
		let f = plans.get(statement).ok_or_else(|| Error::Planner {
			message: format!("no canned plan for '{statement}'"),
		})?;
		f(params)
	}
}

// --------------------------------------------------
// Plan builders
// --------------------------------------------------

pub fn rte(db: &Arc<Database>, table: &str) -> RangeTableEntry {
	RangeTableEntry {
		relname: table.to_owned(),
		relid: db.relation(table).expect("table exists").id,
	}
}

/// Pass-through target list over a relation's attributes.
pub fn passthrough(db: &Arc<Database>, table: &str) -> Vec<Target> {
	let rel = db.relation(table).expect("table exists");
	rel.desc
		.attrs()
		.iter()
		.enumerate()
		.map(|(i, attr)| Target::new(&attr.name, Expr::column(i + 1)))
		.collect()
}

pub fn costed(rows: f64, width: u32) -> Cost {
	Cost {
		startup: 0.0,
		total: rows,
		rows,
		width,
	}
}

/// `SELECT <targets>` with no FROM clause: a lone Result node.
pub fn select_values(targets: Vec<Target>) -> PlannedStatement {
	PlannedStatement {
		command: CommandType::Select,
		plan: Some(PlanNode::Result {
			common: PlanCommon {
				targetlist: targets,
				..PlanCommon::default()
			},
			constant_qual: None,
		}),
		range_table: vec![],
		result_relation: None,
		utility: None,
		n_param_exec: 0,
	}
}

/// `SELECT <targets> FROM <table> WHERE <qual>` as a sequential scan.
pub fn select_seqscan(
	db: &Arc<Database>,
	table: &str,
	targets: Vec<Target>,
	qual: Vec<Expr>,
) -> PlannedStatement {
	PlannedStatement {
		command: CommandType::Select,
		plan: Some(PlanNode::SeqScan {
			common: PlanCommon {
				targetlist: targets,
				qual,
				..PlanCommon::default()
			},
			scanrelid: 1,
		}),
		range_table: vec![rte(db, table)],
		result_relation: None,
		utility: None,
		n_param_exec: 0,
	}
}

/// Same scan, executed through a producer thread.
pub fn select_delegated_seqscan(
	db: &Arc<Database>,
	table: &str,
	targets: Vec<Target>,
	qual: Vec<Expr>,
) -> PlannedStatement {
	PlannedStatement {
		command: CommandType::Select,
		plan: Some(PlanNode::DelegatedSeqScan {
			common: PlanCommon {
				targetlist: targets,
				qual,
				..PlanCommon::default()
			},
			scanrelid: 1,
		}),
		range_table: vec![rte(db, table)],
		result_relation: None,
		utility: None,
		n_param_exec: 0,
	}
}

/// Single-disjunct index scan.
pub fn select_indexscan(
	db: &Arc<Database>,
	table: &str,
	index: &str,
	targets: Vec<Target>,
	quals: Vec<IndexQual>,
	orig: Vec<Expr>,
	direction: Direction,
) -> PlannedStatement {
	PlannedStatement {
		command: CommandType::Select,
		plan: Some(PlanNode::IndexScan {
			common: PlanCommon {
				targetlist: targets,
				..PlanCommon::default()
			},
			scanrelid: 1,
			indices: vec![index.to_owned()],
			indexquals: vec![quals],
			indexqualorig: vec![orig],
			direction,
		}),
		range_table: vec![rte(db, table)],
		result_relation: None,
		utility: None,
		n_param_exec: 0,
	}
}

/// `INSERT INTO <table> VALUES (<rows>)`: an Append of Result nodes,
/// or a single Result for one row.
pub fn insert_values(db: &Arc<Database>, table: &str, rows: Vec<Vec<Expr>>) -> PlannedStatement {
	let rel = db.relation(table).expect("table exists");
	let names: Vec<String> = rel.desc.attrs().iter().map(|a| a.name.clone()).collect();
	let mut members: Vec<PlanNode> = rows
		.into_iter()
		.map(|row| PlanNode::Result {
			common: PlanCommon {
				targetlist: names
					.iter()
					.zip(row.into_iter())
					.map(|(name, expr)| Target::new(name, expr))
					.collect(),
				..PlanCommon::default()
			},
			constant_qual: None,
		})
		.collect();
	let plan = if members.len() == 1 {
		members.remove(0)
	} else {
		// The append keeps the first member's target list for output
		// shape purposes
		let targetlist = members[0].common().targetlist.clone();
		PlanNode::Append {
			common: PlanCommon {
				targetlist,
				..PlanCommon::default()
			},
			plans: members,
		}
	};
	PlannedStatement {
		command: CommandType::Insert,
		plan: Some(plan),
		range_table: vec![rte(db, table)],
		result_relation: Some(1),
		utility: None,
		n_param_exec: 0,
	}
}

/// `DELETE FROM <table> WHERE <qual>`: a scan projecting the ctid junk
/// attribute.
pub fn delete_where(db: &Arc<Database>, table: &str, qual: Vec<Expr>) -> PlannedStatement {
	PlannedStatement {
		command: CommandType::Delete,
		plan: Some(PlanNode::SeqScan {
			common: PlanCommon {
				targetlist: vec![Target::junk("ctid", Expr::CurrentTid)],
				qual,
				..PlanCommon::default()
			},
			scanrelid: 1,
		}),
		range_table: vec![rte(db, table)],
		result_relation: Some(1),
		utility: None,
		n_param_exec: 0,
	}
}

/// `UPDATE <table> SET ... WHERE <qual>`: new column values plus the
/// ctid junk attribute.
pub fn update_where(
	db: &Arc<Database>,
	table: &str,
	mut new_values: Vec<Target>,
	qual: Vec<Expr>,
) -> PlannedStatement {
	new_values.push(Target::junk("ctid", Expr::CurrentTid));
	PlannedStatement {
		command: CommandType::Update,
		plan: Some(PlanNode::SeqScan {
			common: PlanCommon {
				targetlist: new_values,
				qual,
				..PlanCommon::default()
			},
			scanrelid: 1,
		}),
		range_table: vec![rte(db, table)],
		result_relation: Some(1),
		utility: None,
		n_param_exec: 0,
	}
}

/// Wrap a select's plan under a Sort on the given output columns.
pub fn sorted(mut stmt: PlannedStatement, keys: Vec<SortKey>) -> PlannedStatement {
	let child = stmt.plan.take().expect("plan");
	stmt.plan = Some(PlanNode::Sort {
		common: PlanCommon {
			lefttree: Some(Box::new(child)),
			..PlanCommon::default()
		},
		keys,
	});
	stmt
}

/// Wrap a select's plan under a Material node.
pub fn materialized(mut stmt: PlannedStatement) -> PlannedStatement {
	let child = stmt.plan.take().expect("plan");
	stmt.plan = Some(PlanNode::Material {
		common: PlanCommon {
			lefttree: Some(Box::new(child)),
			..PlanCommon::default()
		},
	});
	stmt
}

pub fn sort_key(attno: usize) -> SortKey {
	SortKey {
		attno,
		descending: false,
	}
}

// --------------------------------------------------
// Database and data helpers
// --------------------------------------------------

/// A database with table `t(a int4, b text)`.
pub fn test_db() -> (Arc<Database>, Arc<TestPlanner>) {
	let db = Database::new("test");
	let planner = TestPlanner::install(&db);
	db.create_table(
		"t",
		TupleDesc::new(vec![Attribute::new("a", TypeId::Int4), Attribute::new("b", TypeId::Text)]),
	)
	.expect("create t");
	(db, planner)
}

/// Insert rows into a table directly through the store, committed by
/// their own transaction.
pub fn seed_rows(db: &Arc<Database>, table: &str, rows: Vec<Vec<Value>>) {
	let rel = db.relation(table).expect("table exists");
	let xid = db.xact.begin();
	for values in rows {
		let oid = db.next_row_oid();
		let tid = rel.insert(oid, values.clone(), xid, 0).expect("insert");
		for index in db.indexes_for(rel.id) {
			let key = index.key_cols.iter().map(|c| values[c - 1].clone()).collect();
			index.insert(key, tid).expect("index insert");
		}
	}
	db.xact.commit(xid);
}

/// Run a registered SELECT through the nested interface and collect its
/// rows.
pub fn query(conn: &Arc<Connection>, statement: &str) -> Vec<Vec<Value>> {
	conn.begin().expect("begin");
	let rows = query_in_txn(conn, statement);
	conn.commit().expect("commit");
	rows
}

/// Like [`query`], inside an already-open transaction.
pub fn query_in_txn(conn: &Arc<Connection>, statement: &str) -> Vec<Vec<Value>> {
	conn.spi_connect().expect("spi connect");
	conn.spi_exec(statement).expect("spi exec");
	let rows = conn.spi_result(|t| t.tuples.clone()).expect("spi result");
	conn.spi_finish().expect("spi finish");
	rows
}

/// Multiset comparison: sort both row sets by display form and compare.
pub fn assert_same_rows(mut a: Vec<Vec<Value>>, mut b: Vec<Vec<Value>>) {
	let key = |row: &Vec<Value>| row.iter().map(|v| format!("{v}|")).collect::<String>();
	a.sort_by_key(key);
	b.sort_by_key(key);
	assert_eq!(a, b);
}

pub fn int_rows(rows: &[Vec<Value>], col: usize) -> Vec<i32> {
	rows.iter()
		.map(|r| match &r[col] {
			Value::Int4(v) => *v,
			other => panic!("expected int4, found {other}"),
		})
		.collect()
}

/// Convenience constructors used across the suites.
pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
	Expr::op(loomdb_core::sql::expr::OperId::Eq, lhs, rhs)
}

pub fn utility(stmt: UtilityStmt) -> PlannedStatement {
	PlannedStatement {
		command: CommandType::Utility,
		plan: None,
		range_table: vec![],
		result_relation: None,
		utility: Some(stmt),
		n_param_exec: 0,
	}
}

pub fn join_common(targets: Vec<Target>, qual: Vec<Expr>, left: PlanNode, right: PlanNode) -> PlanCommon {
	PlanCommon {
		targetlist: targets,
		qual,
		lefttree: Some(Box::new(left)),
		righttree: Some(Box::new(right)),
		..PlanCommon::default()
	}
}

pub fn scan_node(db: &Arc<Database>, table_index: usize, targets: Vec<Target>, qual: Vec<Expr>) -> PlanNode {
	let _ = db;
	PlanNode::SeqScan {
		common: PlanCommon {
			targetlist: targets,
			qual,
			..PlanCommon::default()
		},
		scanrelid: table_index,
	}
}

pub fn hash_node(key: Expr, child: PlanNode, rows: f64, width: u32, forced: Option<usize>) -> PlanNode {
	let mut common = PlanCommon::default();
	let mut child = child;
	if let PlanNode::SeqScan {
		common: c,
		..
	} = &mut child
	{
		c.cost = costed(rows, width);
	}
	common.lefttree = Some(Box::new(child));
	PlanNode::Hash {
		common,
		key,
		forced_batches: forced,
	}
}
