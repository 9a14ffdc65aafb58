//! The nested query interface: stacked sub-executors, cursors with
//! pinned command visibility, and saved plans.

mod common;

use common::*;
use loomdb_core::sql::expr::{Expr, ParamRef, Target};
use loomdb_core::sql::kind::TypeId;
use loomdb_core::sql::val::Value;
use loomdb_core::Connection;

#[test]
fn nested_exec_produces_a_result_table() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(1), Value::Text("a".into())],
			vec![Value::Int4(2), Value::Text("b".into())],
		],
	);
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.spi_connect().unwrap();
	let processed = conn.spi_exec("select * from t").unwrap();
	assert_eq!(processed, 2);
	conn.spi_result(|table| {
		assert_eq!(table.fnumber("b"), 2);
		assert_eq!(table.fname(1).unwrap(), "a");
		assert_eq!(table.gettype(1).unwrap(), TypeId::Int4);
		assert_eq!(table.getbinval(0, 1).unwrap(), Value::Int4(1));
		assert_eq!(table.getvalue(1, 2).unwrap(), "b");
	})
	.unwrap();
	conn.spi_finish().unwrap();
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn nested_levels_stack_and_reset_at_transaction_end() {
	let (db, planner) = test_db();
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.spi_connect().unwrap();
	conn.spi_push().unwrap();
	conn.spi_connect().unwrap();
	conn.spi_exec("select * from t").unwrap();
	conn.spi_finish().unwrap();
	conn.spi_pop().unwrap();
	// Commit force-drops whatever is left on the stack
	conn.commit().unwrap();
	conn.begin().unwrap();
	let err = conn.spi_finish().unwrap_err();
	assert_eq!(err.state(), "SPI");
	conn.rollback().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn cursor_fetches_see_the_visibility_of_their_open() {
	let (db, planner) = test_db();
	seed_rows(&db, "t", vec![vec![Value::Int4(1), Value::Text("before".into())]]);
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	planner.register(
		"insert during",
		vec![insert_values(&db, "t", vec![vec![Expr::int4(2), Expr::text("during")]])],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.spi_connect().unwrap();

	let plan = conn.spi_prepare("select * from t", &[]).unwrap();
	let portal = conn.spi_cursor_open(Some("c"), &plan, &[]).unwrap();

	// The same connection inserts and the statement counter advances
	conn.spi_exec("insert during").unwrap();
	assert_eq!(conn.spi_exec("select * from t").unwrap(), 2);

	// The cursor still sees only what was visible at its open
	let rows = conn.spi_cursor_fetch(&portal, true, 100).unwrap();
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0][1], Value::Text("before".into()));

	conn.spi_cursor_close(&portal).unwrap();
	conn.spi_finish().unwrap();
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn cursor_move_skips_rows() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		(0..10).map(|i| vec![Value::Int4(i), Value::Text(format!("r{i}"))]).collect(),
	);
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.spi_connect().unwrap();
	let plan = conn.spi_prepare("select * from t", &[]).unwrap();
	let portal = conn.spi_cursor_open(None, &plan, &[]).unwrap();
	assert_eq!(conn.spi_cursor_move(&portal, true, 4).unwrap(), 4);
	let rows = conn.spi_cursor_fetch(&portal, true, 2).unwrap();
	assert_eq!(int_rows(&rows, 0), vec![4, 5]);
	conn.spi_cursor_close(&portal).unwrap();
	conn.spi_finish().unwrap();
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn reverse_motion_requires_a_materialized_top() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		(0..5).map(|i| vec![Value::Int4(i), Value::Text(format!("r{i}"))]).collect(),
	);
	planner.register("plain", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	planner.register(
		"scrollable",
		vec![materialized(select_seqscan(&db, "t", passthrough(&db, "t"), vec![]))],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.spi_connect().unwrap();

	// A bare scan cannot be walked backwards
	let plan = conn.spi_prepare("plain", &[]).unwrap();
	let portal = conn.spi_cursor_open(Some("p"), &plan, &[]).unwrap();
	conn.spi_cursor_fetch(&portal, true, 3).unwrap();
	let err = conn.spi_cursor_fetch(&portal, false, 1).unwrap_err();
	assert!(matches!(err, loomdb_core::Error::CursorNotScrollable));
	conn.spi_cursor_close(&portal).unwrap();

	// A Material node on top makes the plan replayable both ways
	let plan = conn.spi_prepare("scrollable", &[]).unwrap();
	let portal = conn.spi_cursor_open(Some("s"), &plan, &[]).unwrap();
	let forward = conn.spi_cursor_fetch(&portal, true, 3).unwrap();
	assert_eq!(int_rows(&forward, 0), vec![0, 1, 2]);
	let backward = conn.spi_cursor_fetch(&portal, false, 2).unwrap();
	assert_eq!(int_rows(&backward, 0), vec![2, 1]);
	conn.spi_cursor_close(&portal).unwrap();

	conn.spi_finish().unwrap();
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn prepared_plans_run_with_positional_values() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		(0..10).map(|i| vec![Value::Int4(i), Value::Text(format!("r{i}"))]).collect(),
	);
	planner.register(
		"select where a = $1",
		vec![select_seqscan(
			&db,
			"t",
			passthrough(&db, "t"),
			vec![eq(Expr::column(1), Expr::Param(ParamRef::Num(1)))],
		)],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.spi_connect().unwrap();
	let plan = conn.spi_prepare("select where a = $1", &[]).unwrap();
	for wanted in [3i32, 7] {
		let processed = conn.spi_execp(&plan, &[Value::Int4(wanted)]).unwrap();
		assert_eq!(processed, 1);
		conn.spi_result(|table| {
			assert_eq!(table.getbinval(0, 1).unwrap(), Value::Int4(wanted));
		})
		.unwrap();
	}
	conn.spi_finish().unwrap();
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn saved_plans_survive_levels_until_freed() {
	let (db, planner) = test_db();
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.spi_connect().unwrap();
	let plan = conn.spi_prepare("select * from t", &[]).unwrap();
	conn.spi_saveplan("walker", plan).unwrap();
	conn.spi_finish().unwrap();
	// A later level finds the saved plan again
	conn.spi_connect().unwrap();
	let plan = conn.spi_saved_plan("walker").unwrap();
	conn.spi_execp(&plan, &[]).unwrap();
	conn.spi_freeplan("walker").unwrap();
	assert!(conn.spi_saved_plan("walker").is_err());
	conn.spi_finish().unwrap();
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn sql_functions_reenter_the_executor() {
	let (db, planner) = test_db();
	seed_rows(
		&db,
		"t",
		vec![
			vec![Value::Int4(4), Value::Text("x".into())],
			vec![Value::Int4(9), Value::Text("y".into())],
		],
	);
	db.register_function(
		"t_count",
		loomdb_core::store::ds::SqlFunction {
			plans: vec![{
				use loomdb_core::plan::{AggExpr, AggKind, PlanCommon, PlanNode};
				let agg = PlanNode::Agg {
					common: PlanCommon {
						targetlist: vec![Target::new("n", Expr::Aggref {
							aggno: 0,
						})],
						lefttree: Some(Box::new(scan_node(&db, 1, passthrough(&db, "t"), vec![]))),
						..PlanCommon::default()
					},
					aggs: vec![AggExpr {
						kind: AggKind::CountStar,
						arg: None,
						distinct: false,
					}],
					group_boundaries: false,
				};
				loomdb_core::plan::PlannedStatement {
					command: loomdb_core::plan::CommandType::Select,
					plan: Some(agg),
					range_table: vec![rte(&db, "t")],
					result_relation: None,
					utility: None,
					n_param_exec: 0,
				}
			}],
			set_returning: false,
		},
	);
	planner.register(
		"select t_count()",
		vec![select_values(vec![Target::new(
			"n",
			Expr::Func {
				name: "t_count".to_owned(),
				args: vec![],
			},
		)])],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&conn, "select t_count()");
	assert_eq!(rows, vec![vec![Value::Int8(2)]]);
	conn.destroy().unwrap();
}
