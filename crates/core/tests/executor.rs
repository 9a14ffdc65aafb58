//! Executor pipeline: scans, joins, sorting, grouping, aggregation,
//! duplicate elimination and subplans, checked against their relational
//! semantics.

mod common;

use common::*;
use loomdb_core::plan::{
	AggExpr, AggKind, CommandType, Direction, HashClause, IndexQual, MergeClause, PlanCommon,
	PlanNode, PlannedStatement, SubPlan,
};
use loomdb_core::sql::expr::{Expr, OperId, ParamRef, SubLinkKind, SubPlanRef, Target, VarSource};
use loomdb_core::sql::kind::TypeId;
use loomdb_core::sql::val::Value;
use loomdb_core::store::index::Strategy;
use loomdb_core::store::tuple::{Attribute, TupleDesc};
use loomdb_core::Connection;

fn two_table_db() -> (
	std::sync::Arc<loomdb_core::store::Database>,
	std::sync::Arc<TestPlanner>,
) {
	let (db, planner) = test_db();
	db.create_table(
		"s",
		TupleDesc::new(vec![Attribute::new("k", TypeId::Int4), Attribute::new("v", TypeId::Text)]),
	)
	.unwrap();
	(db, planner)
}

fn outer_col(attno: usize) -> Expr {
	Expr::Var {
		source: VarSource::Outer,
		attno,
	}
}

fn inner_col(attno: usize) -> Expr {
	Expr::Var {
		source: VarSource::Inner,
		attno,
	}
}

/// t join s on t.a = s.k, projected as (t.a, t.b, s.v).
fn join_targets() -> Vec<Target> {
	vec![
		Target::new("a", outer_col(1)),
		Target::new("b", outer_col(2)),
		Target::new("v", inner_col(2)),
	]
}

fn join_stmt(db: &std::sync::Arc<loomdb_core::store::Database>, plan: PlanNode) -> PlannedStatement {
	PlannedStatement {
		command: CommandType::Select,
		plan: Some(plan),
		range_table: vec![rte(db, "t"), rte(db, "s")],
		result_relation: None,
		utility: None,
		n_param_exec: 0,
	}
}

fn nestloop_join(db: &std::sync::Arc<loomdb_core::store::Database>) -> PlannedStatement {
	let outer = scan_node(db, 1, passthrough(db, "t"), vec![]);
	let inner = scan_node(db, 2, passthrough(db, "s"), vec![]);
	join_stmt(
		db,
		PlanNode::NestLoop {
			common: join_common(join_targets(), vec![eq(outer_col(1), inner_col(1))], outer, inner),
		},
	)
}

fn hashjoin(db: &std::sync::Arc<loomdb_core::store::Database>, forced: Option<usize>) -> PlannedStatement {
	let outer = scan_node(db, 1, passthrough(db, "t"), vec![]);
	let build = scan_node(db, 2, passthrough(db, "s"), vec![]);
	let hash = hash_node(
		Expr::Var {
			source: VarSource::Scan,
			attno: 1,
		},
		build,
		100.0,
		16,
		forced,
	);
	join_stmt(
		db,
		PlanNode::HashJoin {
			common: join_common(join_targets(), vec![], outer, hash),
			clauses: vec![HashClause {
				outer: outer_col(1),
				inner: inner_col(1),
			}],
		},
	)
}

fn seed_join_data(db: &std::sync::Arc<loomdb_core::store::Database>) {
	seed_rows(
		db,
		"t",
		(0..40).map(|i| vec![Value::Int4(i % 10), Value::Text(format!("t{i}"))]).collect(),
	);
	seed_rows(
		db,
		"s",
		(0..15).map(|i| vec![Value::Int4(i % 5), Value::Text(format!("s{i}"))]).collect(),
	);
}

#[test]
fn hash_join_matches_nested_loop_for_any_batch_count() {
	let (db, planner) = two_table_db();
	seed_join_data(&db);
	planner.register("nestloop", vec![nestloop_join(&db)]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let expected = query(&conn, "nestloop");
	assert!(!expected.is_empty());
	// The output multiset is independent of the batch count the planner
	// picks
	for forced in [0usize, 2, 4, 8] {
		let name = format!("hashjoin{forced}");
		planner.register(&name, vec![hashjoin(&db, Some(forced))]);
		let rows = query(&conn, &name);
		assert_same_rows(expected.clone(), rows);
	}
	conn.destroy().unwrap();
}

#[test]
fn merge_join_handles_duplicates_on_both_sides() {
	let (db, planner) = two_table_db();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(1), Value::Text("a".into())],
			vec![Value::Int4(1), Value::Text("b".into())],
			vec![Value::Int4(2), Value::Text("c".into())],
			vec![Value::Int4(4), Value::Text("d".into())],
		],
	);
	seed_rows(
		&db,
		"s",
		vec![
			vec![Value::Int4(1), Value::Text("x".into())],
			vec![Value::Int4(1), Value::Text("y".into())],
			vec![Value::Int4(3), Value::Text("z".into())],
			vec![Value::Int4(4), Value::Text("w".into())],
		],
	);
	planner.register("nestloop", vec![nestloop_join(&db)]);

	// Merge join needs both inputs sorted and a restartable inner
	let outer = PlanNode::Sort {
		common: PlanCommon {
			lefttree: Some(Box::new(scan_node(&db, 1, passthrough(&db, "t"), vec![]))),
			..PlanCommon::default()
		},
		keys: vec![sort_key(1)],
	};
	let inner = PlanNode::Sort {
		common: PlanCommon {
			lefttree: Some(Box::new(scan_node(&db, 2, passthrough(&db, "s"), vec![]))),
			..PlanCommon::default()
		},
		keys: vec![sort_key(1)],
	};
	let merge = PlanNode::MergeJoin {
		common: join_common(join_targets(), vec![], outer, inner),
		clauses: vec![MergeClause {
			outer: outer_col(1),
			inner: inner_col(1),
		}],
	};
	planner.register("mergejoin", vec![join_stmt(&db, merge)]);

	let conn = Connection::create(&db, "admin", "").unwrap();
	let expected = query(&conn, "nestloop");
	let rows = query(&conn, "mergejoin");
	// 2x2 group on key 1 plus the single match on key 4
	assert_eq!(rows.len(), 5);
	assert_same_rows(expected, rows);
	conn.destroy().unwrap();
}

#[test]
fn sort_orders_and_spills() {
	let (db, planner) = test_db();
	// Push enough rows through to spill several runs
	std::env::set_var("LOOM_SORT_SPILL_THRESHOLD", "100");
	let n = 1000;
	seed_rows(
		&db,
		"t",
		(0..n).map(|i| vec![Value::Int4((n - i) as i32), Value::Text(format!("r{i}"))]).collect(),
	);
	planner.register(
		"sorted",
		vec![sorted(
			select_seqscan(&db, "t", passthrough(&db, "t"), vec![]),
			vec![sort_key(1)],
		)],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "sorted");
	let keys = int_rows(&rows, 0);
	assert_eq!(keys.len(), n);
	assert!(keys.windows(2).all(|w| w[0] <= w[1]));
	conn.destroy().unwrap();
}

#[test]
fn group_and_aggregate_over_boundaries() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(1), Value::Text("x".into())],
			vec![Value::Int4(1), Value::Text("y".into())],
			vec![Value::Int4(2), Value::Text("z".into())],
			vec![Value::Int4(2), Value::Text("w".into())],
			vec![Value::Int4(2), Value::Text("v".into())],
		],
	);
	// Sort -> Group(all tuples + boundaries) -> Agg(count per group)
	let scan = scan_node(&db, 1, passthrough(&db, "t"), vec![]);
	let sort = PlanNode::Sort {
		common: PlanCommon {
			lefttree: Some(Box::new(scan)),
			..PlanCommon::default()
		},
		keys: vec![sort_key(1)],
	};
	let group = PlanNode::Group {
		common: PlanCommon {
			lefttree: Some(Box::new(sort)),
			..PlanCommon::default()
		},
		tuple_per_group: false,
		group_cols: vec![1],
	};
	let agg = PlanNode::Agg {
		common: PlanCommon {
			targetlist: vec![
				Target::new("a", Expr::column(1)),
				Target::new("n", Expr::Aggref {
					aggno: 0,
				}),
			],
			lefttree: Some(Box::new(group)),
			..PlanCommon::default()
		},
		aggs: vec![AggExpr {
			kind: AggKind::CountStar,
			arg: None,
			distinct: false,
		}],
		group_boundaries: true,
	};
	planner.register(
		"count by a",
		vec![PlannedStatement {
			command: CommandType::Select,
			plan: Some(agg),
			range_table: vec![rte(&db, "t")],
			result_relation: None,
			utility: None,
			n_param_exec: 0,
		}],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "count by a");
	assert_eq!(
		rows,
		vec![
			vec![Value::Int4(1), Value::Int8(2)],
			vec![Value::Int4(2), Value::Int8(3)],
		]
	);
	conn.destroy().unwrap();
}

#[test]
fn final_mode_group_returns_one_tuple_per_group() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(3), Value::Text("x".into())],
			vec![Value::Int4(1), Value::Text("y".into())],
			vec![Value::Int4(3), Value::Text("z".into())],
		],
	);
	let sort = PlanNode::Sort {
		common: PlanCommon {
			lefttree: Some(Box::new(scan_node(&db, 1, passthrough(&db, "t"), vec![]))),
			..PlanCommon::default()
		},
		keys: vec![sort_key(1)],
	};
	let group = PlanNode::Group {
		common: PlanCommon {
			targetlist: vec![Target::new("a", Expr::column(1))],
			lefttree: Some(Box::new(sort)),
			..PlanCommon::default()
		},
		tuple_per_group: true,
		group_cols: vec![1],
	};
	planner.register(
		"groups",
		vec![PlannedStatement {
			command: CommandType::Select,
			plan: Some(group),
			range_table: vec![rte(&db, "t")],
			result_relation: None,
			utility: None,
			n_param_exec: 0,
		}],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "groups");
	assert_eq!(int_rows(&rows, 0), vec![1, 3]);
	conn.destroy().unwrap();
}

#[test]
fn aggregates_over_empty_input_yield_one_row() {
	let (db, planner) = test_db();
	let agg = PlanNode::Agg {
		common: PlanCommon {
			targetlist: vec![
				Target::new("n", Expr::Aggref {
					aggno: 0,
				}),
				Target::new("m", Expr::Aggref {
					aggno: 1,
				}),
			],
			lefttree: Some(Box::new(scan_node(&db, 1, passthrough(&db, "t"), vec![]))),
			..PlanCommon::default()
		},
		aggs: vec![
			AggExpr {
				kind: AggKind::CountStar,
				arg: None,
				distinct: false,
			},
			AggExpr {
				kind: AggKind::Max,
				arg: Some(Expr::column(1)),
				distinct: false,
			},
		],
		group_boundaries: false,
	};
	planner.register(
		"empty agg",
		vec![PlannedStatement {
			command: CommandType::Select,
			plan: Some(agg),
			range_table: vec![rte(&db, "t")],
			result_relation: None,
			utility: None,
			n_param_exec: 0,
		}],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "empty agg");
	assert_eq!(rows, vec![vec![Value::Int8(0), Value::Null]]);
	conn.destroy().unwrap();
}

#[test]
fn unique_drops_adjacent_duplicates_and_pairs_nulls() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(1), Value::Text("a".into())],
			vec![Value::Int4(1), Value::Text("b".into())],
			vec![Value::Null, Value::Text("c".into())],
			vec![Value::Null, Value::Text("d".into())],
			vec![Value::Int4(2), Value::Text("e".into())],
		],
	);
	let sort = PlanNode::Sort {
		common: PlanCommon {
			lefttree: Some(Box::new(scan_node(
				&db,
				1,
				vec![Target::new("a", Expr::column(1))],
				vec![],
			))),
			..PlanCommon::default()
		},
		keys: vec![sort_key(1)],
	};
	let unique = PlanNode::Unique {
		common: PlanCommon {
			lefttree: Some(Box::new(sort)),
			..PlanCommon::default()
		},
		unique_cols: vec![1],
	};
	planner.register(
		"distinct a",
		vec![PlannedStatement {
			command: CommandType::Select,
			plan: Some(unique),
			range_table: vec![rte(&db, "t")],
			result_relation: None,
			utility: None,
			n_param_exec: 0,
		}],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "distinct a");
	// Two nulls count as the same group, so three distinct values
	assert_eq!(rows.len(), 3);
	conn.destroy().unwrap();
}

#[test]
fn or_index_qualifications_never_report_a_tuple_twice() {
	let (db, planner) = test_db();
	db.create_index("t_a_idx", "t", vec![1], false, None).unwrap();
	seed_rows(
		&db,
		"t",
		(0..20).map(|i| vec![Value::Int4(i), Value::Text(format!("r{i}"))]).collect(),
	);
	// Two overlapping disjuncts: a <= 12 OR a >= 8; rows 8..=12 match both
	let disjunct_a = vec![IndexQual {
		attno: 1,
		strategy: Strategy::Le,
		value: Expr::int4(12),
	}];
	let disjunct_b = vec![IndexQual {
		attno: 1,
		strategy: Strategy::Ge,
		value: Expr::int4(8),
	}];
	let orig_a = vec![Expr::op(OperId::Le, Expr::column(1), Expr::int4(12))];
	let orig_b = vec![Expr::op(OperId::Ge, Expr::column(1), Expr::int4(8))];
	let stmt = PlannedStatement {
		command: CommandType::Select,
		plan: Some(PlanNode::IndexScan {
			common: PlanCommon {
				targetlist: passthrough(&db, "t"),
				..PlanCommon::default()
			},
			scanrelid: 1,
			indices: vec!["t_a_idx".to_owned(), "t_a_idx".to_owned()],
			indexquals: vec![disjunct_a, disjunct_b],
			indexqualorig: vec![orig_a, orig_b],
			direction: Direction::Forward,
		}),
		range_table: vec![rte(&db, "t")],
		result_relation: None,
		utility: None,
		n_param_exec: 0,
	};
	planner.register("or scan", vec![stmt]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "or scan");
	// Every row matches at least one disjunct, none is duplicated
	assert_eq!(rows.len(), 20);
	let mut keys = int_rows(&rows, 0);
	keys.sort_unstable();
	assert_eq!(keys, (0..20).collect::<Vec<_>>());
	conn.destroy().unwrap();
}

#[test]
fn index_scans_honor_keys_and_direction() {
	let (db, planner) = test_db();
	db.create_index("t_a_idx", "t", vec![1], false, None).unwrap();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(5), Value::Text("e".into())],
			vec![Value::Int4(2), Value::Text("b".into())],
			vec![Value::Int4(9), Value::Text("i".into())],
			vec![Value::Int4(4), Value::Text("d".into())],
		],
	);
	planner.register(
		"a >= 4",
		vec![select_indexscan(
			&db,
			"t",
			"t_a_idx",
			passthrough(&db, "t"),
			vec![IndexQual {
				attno: 1,
				strategy: Strategy::Ge,
				value: Expr::int4(4),
			}],
			vec![Expr::op(OperId::Ge, Expr::column(1), Expr::int4(4))],
			Direction::Forward,
		)],
	);
	planner.register(
		"a >= 4 backward",
		vec![select_indexscan(
			&db,
			"t",
			"t_a_idx",
			passthrough(&db, "t"),
			vec![IndexQual {
				attno: 1,
				strategy: Strategy::Ge,
				value: Expr::int4(4),
			}],
			vec![Expr::op(OperId::Ge, Expr::column(1), Expr::int4(4))],
			Direction::Backward,
		)],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	assert_eq!(int_rows(&query(&conn, "a >= 4"), 0), vec![4, 5, 9]);
	assert_eq!(int_rows(&query(&conn, "a >= 4 backward"), 0), vec![9, 5, 4]);
	conn.destroy().unwrap();
}

#[test]
fn tid_scan_fetches_by_pointer() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(1), Value::Text("a".into())],
			vec![Value::Int4(2), Value::Text("b".into())],
		],
	);
	let rel = db.relation("t").unwrap();
	let tid = rel.pointers_on_block(0)[1];
	let stmt = PlannedStatement {
		command: CommandType::Select,
		plan: Some(PlanNode::TidScan {
			common: PlanCommon {
				targetlist: passthrough(&db, "t"),
				..PlanCommon::default()
			},
			scanrelid: 1,
			tideval: vec![Expr::Const(tid.to_datum())],
		}),
		range_table: vec![rte(&db, "t")],
		result_relation: None,
		utility: None,
		n_param_exec: 0,
	};
	planner.register("by tid", vec![stmt]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "by tid");
	assert_eq!(rows, vec![vec![Value::Int4(2), Value::Text("b".into())]]);
	conn.destroy().unwrap();
}

#[test]
fn update_and_delete_through_junk_pointers() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		(0..6).map(|i| vec![Value::Int4(i), Value::Text(format!("r{i}"))]).collect(),
	);
	planner.register(
		"bump even",
		vec![update_where(
			&db,
			"t",
			vec![
				Target::new("a", Expr::op(OperId::Add, Expr::column(1), Expr::int4(100))),
				Target::new("b", Expr::column(2)),
			],
			vec![eq(
				Expr::op(OperId::Mod, Expr::column(1), Expr::int4(2)),
				Expr::int4(0),
			)],
		)],
	);
	planner.register(
		"drop odd",
		vec![delete_where(
			&db,
			"t",
			vec![eq(Expr::op(OperId::Mod, Expr::column(1), Expr::int4(2)), Expr::int4(1))],
		)],
	);
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);

	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.parse("bump even").unwrap();
	conn.exec().unwrap();
	conn.commit().unwrap();

	conn.begin().unwrap();
	conn.parse("drop odd").unwrap();
	conn.exec().unwrap();
	conn.commit().unwrap();

	let rows = query(&conn, "select * from t");
	let mut keys = int_rows(&rows, 0);
	keys.sort_unstable();
	assert_eq!(keys, vec![100, 102, 104]);
	conn.destroy().unwrap();
}

#[test]
fn correlated_subplan_filters_by_existence() {
	let (db, planner) = two_table_db();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(1), Value::Text("keep".into())],
			vec![Value::Int4(2), Value::Text("drop".into())],
			vec![Value::Int4(3), Value::Text("keep".into())],
		],
	);
	seed_rows(
		&db,
		"s",
		vec![
			vec![Value::Int4(1), Value::Text("m".into())],
			vec![Value::Int4(3), Value::Text("n".into())],
		],
	);
	// select * from t where exists (select 1 from s where s.k = t.a)
	let sub_scan = PlanNode::SeqScan {
		common: PlanCommon {
			targetlist: vec![Target::new("one", Expr::int4(1))],
			qual: vec![eq(Expr::column(1), Expr::Param(ParamRef::Exec(0)))],
			..PlanCommon::default()
		},
		scanrelid: 2,
	};
	let stmt = PlannedStatement {
		command: CommandType::Select,
		plan: Some(PlanNode::SeqScan {
			common: PlanCommon {
				targetlist: passthrough(&db, "t"),
				qual: vec![Expr::SubPlan(SubPlanRef {
					plan_id: 0,
					kind: SubLinkKind::Exists,
					lhs: vec![],
				})],
				sub_plans: vec![SubPlan {
					plan_id: 0,
					plan: Box::new(sub_scan),
					set_params: vec![],
					par_params: vec![(0, Expr::column(1))],
				}],
				..PlanCommon::default()
			},
			scanrelid: 1,
		}),
		range_table: vec![rte(&db, "t"), rte(&db, "s")],
		result_relation: None,
		utility: None,
		n_param_exec: 1,
	};
	planner.register("exists", vec![stmt]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "exists");
	assert_eq!(int_rows(&rows, 0), vec![1, 3]);
	conn.destroy().unwrap();
}

#[test]
fn init_plan_fills_executor_parameters_once() {
	let (db, planner) = two_table_db();
	seed_rows(
		&db,
		"t",
		(1..=5).map(|i| vec![Value::Int4(i), Value::Text(format!("r{i}"))]).collect(),
	);
	seed_rows(&db, "s", vec![vec![Value::Int4(3), Value::Text("max".into())]]);
	// select * from t where a = (select k from s)
	let init_scan = PlanNode::SeqScan {
		common: PlanCommon {
			targetlist: vec![Target::new("k", Expr::column(1))],
			..PlanCommon::default()
		},
		scanrelid: 2,
	};
	let stmt = PlannedStatement {
		command: CommandType::Select,
		plan: Some(PlanNode::SeqScan {
			common: PlanCommon {
				targetlist: passthrough(&db, "t"),
				qual: vec![eq(Expr::column(1), Expr::Param(ParamRef::Exec(0)))],
				init_plans: vec![SubPlan {
					plan_id: 7,
					plan: Box::new(init_scan),
					set_params: vec![0],
					par_params: vec![],
				}],
				..PlanCommon::default()
			},
			scanrelid: 1,
		}),
		range_table: vec![rte(&db, "t"), rte(&db, "s")],
		result_relation: None,
		utility: None,
		n_param_exec: 1,
	};
	planner.register("scalar sub", vec![stmt]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "scalar sub");
	assert_eq!(int_rows(&rows, 0), vec![3]);
	conn.destroy().unwrap();
}

#[test]
fn material_replays_its_collection() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		(0..4).map(|i| vec![Value::Int4(i), Value::Text(format!("r{i}"))]).collect(),
	);
	planner.register(
		"materialized",
		vec![materialized(select_seqscan(&db, "t", passthrough(&db, "t"), vec![]))],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "materialized");
	assert_eq!(rows.len(), 4);
	conn.destroy().unwrap();
}

#[test]
fn explain_prints_a_cost_annotated_tree() {
	let (db, planner) = test_db();
	planner.register(
		"slow query",
		vec![sorted(
			select_seqscan(&db, "t", passthrough(&db, "t"), vec![]),
			vec![sort_key(1)],
		)],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	let text = conn.explain("slow query").unwrap();
	assert!(text.contains("Sort"));
	assert!(text.contains("->  Seq Scan on t"));
	assert!(text.contains("cost="));
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn set_returning_functions_iterate_target_lists() {
	let (db, planner) = test_db();
	// A SQL-language function returning a set of ints
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(10), Value::Text("a".into())],
			vec![Value::Int4(20), Value::Text("b".into())],
		],
	);
	db.register_function(
		"t_keys",
		loomdb_core::store::ds::SqlFunction {
			plans: vec![select_seqscan(&db, "t", vec![Target::new("a", Expr::column(1))], vec![])],
			set_returning: true,
		},
	);
	planner.register(
		"select t_keys()",
		vec![select_values(vec![Target::new(
			"k",
			Expr::Iter(Box::new(Expr::Func {
				name: "t_keys".to_owned(),
				args: vec![],
			})),
		)])],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "select t_keys()");
	assert_eq!(int_rows(&rows, 0), vec![10, 20]);
	conn.destroy().unwrap();
}
