//! Connection lifecycle: statement staging, bindings, output transfer,
//! transactions, subconnections and cancellation.

mod common;

use common::*;
use loomdb_core::plan::UtilityStmt;
use loomdb_core::sql::expr::{Expr, OperId, Target};
use loomdb_core::sql::kind::TypeId;
use loomdb_core::sql::val::Value;
use loomdb_core::store::tuple::{Attribute, TupleDesc};
use loomdb_core::store::Database;
use loomdb_core::Connection;
use std::sync::Arc;

#[test]
fn select_constant_expression_through_output_binding() {
	// Begin; Parse("select 1+1"); OutputLink; Exec; Fetch; Fetch; Commit
	let (db, planner) = test_db();
	planner.register(
		"select 1+1",
		vec![select_values(vec![Target::new(
			"sum",
			Expr::op(OperId::Add, Expr::int4(1), Expr::int4(1)),
		)])],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.parse("select 1+1").unwrap();
	conn.output_link(1, TypeId::Int4, 4).unwrap();
	conn.exec().unwrap();
	assert!(conn.fetch().unwrap());
	conn.output_slot(1, |slot| {
		assert_eq!(slot.not_null, 1);
		assert_eq!(slot.length, 4);
		assert_eq!(slot.data, 2i32.to_le_bytes().to_vec());
	})
	.unwrap();
	assert_eq!(conn.output_value(1).unwrap(), Value::Int4(2));
	// End of data is reported once, as a clean false
	assert!(!conn.fetch().unwrap());
	assert!(conn.fetch_is_complete());
	// Past it, fetching is a 1405
	let err = conn.fetch().unwrap_err();
	assert_eq!(err.code(), 1405);
	assert_eq!(conn.error_code(), 1405);
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn insert_with_bindings_is_visible_after_commit() {
	let (db, planner) = test_db();
	planner.register(
		"insert into t values($1,$2)",
		vec![insert_values(
			&db,
			"t",
			vec![vec![
				Expr::Param(loomdb_core::sql::expr::ParamRef::Named("1".to_owned())),
				Expr::Param(loomdb_core::sql::expr::ParamRef::Named("2".to_owned())),
			]],
		)],
	);
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);

	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.parse("insert into t values($1,$2)").unwrap();
	conn.bind_value("$1", TypeId::Int4, Value::Int4(42)).unwrap();
	conn.bind_value("$2", TypeId::Text, Value::Text("hello".to_owned())).unwrap();
	conn.exec().unwrap();
	conn.commit().unwrap();

	// One row visible from a second connection after commit
	let other = Connection::create(&db, "admin", "").unwrap();
	let rows = query(&other, "select * from t");
	assert_eq!(rows, vec![vec![Value::Int4(42), Value::Text("hello".to_owned())]]);
	other.destroy().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn snapshot_isolation_across_connections() {
	let (db, planner) = test_db();
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	planner.register(
		"insert into t",
		vec![insert_values(&db, "t", vec![vec![Expr::int4(1), Expr::text("x")]])],
	);

	let a = Connection::create(&db, "admin", "").unwrap();
	let b = Connection::create(&db, "admin", "").unwrap();

	// A's snapshot is cut before B commits
	a.begin().unwrap();
	a.parse("select * from t").unwrap();

	b.begin().unwrap();
	b.parse("insert into t").unwrap();
	b.exec().unwrap();
	b.commit().unwrap();

	a.exec().unwrap();
	assert!(!a.fetch().unwrap());
	a.commit().unwrap();

	// A fresh transaction sees the row
	let rows = query(&a, "select * from t");
	assert_eq!(rows.len(), 1);
	a.destroy().unwrap();
	b.destroy().unwrap();
}

#[test]
fn statement_stage_machine_is_enforced() {
	let (db, planner) = test_db();
	planner.register("select 1", vec![select_values(vec![Target::new("c", Expr::int4(1))])]);
	let conn = Connection::create(&db, "admin", "").unwrap();

	// Parse before begin is out of order
	let err = conn.parse("select 1").unwrap_err();
	assert_eq!(err.code(), 454, "no owner thread yet");

	conn.begin().unwrap();
	// Exec without a parsed statement
	let err = conn.exec().unwrap_err();
	assert_eq!(err.code(), 455);
	// Fetch without exec
	let err = conn.fetch().unwrap_err();
	assert_eq!(err.code(), 455);
	// Begin while already in a transaction
	let err = conn.begin().unwrap_err();
	assert_eq!(err.code(), 454);

	conn.parse("select 1").unwrap();
	conn.exec().unwrap();
	assert!(conn.fetch().unwrap());
	assert!(!conn.fetch().unwrap());
	conn.commit().unwrap();

	// Commit outside a transaction
	let err = conn.commit().unwrap_err();
	assert_eq!(err.code(), 455);
	conn.destroy().unwrap();
}

#[test]
fn overlong_statements_are_rejected() {
	let (db, _) = test_db();
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	let big = "x".repeat(8192);
	let err = conn.parse(&big).unwrap_err();
	assert_eq!(err.code(), 456);
	assert_eq!(conn.error_state(), "CONTEXT");
	conn.rollback().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn wrong_thread_calls_fail_with_context_ownership() {
	let (db, planner) = test_db();
	planner.register("select 1", vec![select_values(vec![Target::new("c", Expr::int4(1))])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	let other = Arc::clone(&conn);
	let result = std::thread::spawn(move || other.parse("select 1")).join().unwrap();
	let err = result.unwrap_err();
	assert_eq!(err.code(), 454);
	// The owner can continue unharmed
	conn.parse("select 1").unwrap();
	conn.rollback().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn execution_errors_leave_the_connection_abort_only() {
	let (db, planner) = test_db();
	planner.register(
		"select 1/0",
		vec![select_values(vec![Target::new(
			"boom",
			Expr::op(OperId::Div, Expr::int4(1), Expr::int4(0)),
		)])],
	);
	planner.register("select 1", vec![select_values(vec![Target::new("c", Expr::int4(1))])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.parse("select 1/0").unwrap();
	conn.exec().unwrap();
	let err = conn.fetch().unwrap_err();
	assert_eq!(err.to_string(), "division by zero");
	// Statement-mutating calls now fail until rollback
	let err = conn.parse("select 1").unwrap_err();
	assert_eq!(err.code(), 458);
	conn.rollback().unwrap();
	// And the connection is usable again
	conn.begin().unwrap();
	conn.parse("select 1").unwrap();
	conn.exec().unwrap();
	assert!(conn.fetch().unwrap());
	conn.commit().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn cancel_from_another_thread_stops_the_fetch_loop() {
	let (db, planner) = test_db();
	seed_rows(&db, "t", (0..500).map(|i| vec![Value::Int4(i), Value::Text("r".to_owned())]).collect());
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.parse("select * from t").unwrap();
	conn.exec().unwrap();
	assert!(conn.fetch().unwrap());

	let canceller = Arc::clone(&conn);
	std::thread::spawn(move || canceller.cancel().unwrap()).join().unwrap();

	// The very next checkpoint raises the cancellation
	let err = conn.fetch().unwrap_err();
	assert_eq!(err.code(), 457);
	assert_eq!(conn.error_state(), "CANCEL");
	// Rollback still succeeds and clears the flag
	conn.rollback().unwrap();
	conn.begin().unwrap();
	conn.rollback().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn cancel_and_join_waits_for_the_owner_call() {
	let (db, planner) = test_db();
	planner.register("select 1", vec![select_values(vec![Target::new("c", Expr::int4(1))])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	let joiner = Arc::clone(&conn);
	let handle = std::thread::spawn(move || joiner.cancel_and_join());
	handle.join().unwrap().unwrap();
	let err = conn.parse("select 1").unwrap_err();
	assert_eq!(err.code(), 457);
	conn.rollback().unwrap();
	conn.destroy().unwrap();
}

#[test_log::test]
fn subconnection_lifecycle_and_parent_destroy() {
	let (db, planner) = test_db();
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	seed_rows(&db, "t", vec![vec![Value::Int4(7), Value::Text("p".to_owned())]]);

	let parent = Connection::create(&db, "admin", "").unwrap();
	parent.begin().unwrap();
	let child = parent.create_sub().unwrap();

	// A subconnection cannot spawn its own children
	assert!(child.create_sub().is_err());

	let worker = std::thread::spawn(move || {
		child.begin().unwrap();
		let rows = query_in_txn(&child, "select * from t");
		assert_eq!(rows.len(), 1);
		child.commit().unwrap();
		child.destroy().unwrap();
	});
	worker.join().unwrap();

	parent.commit().unwrap();
	// Returns only after the child has signed off
	parent.destroy().unwrap();
}

#[test]
fn subconnection_begin_requires_parent_transaction() {
	let (db, _) = test_db();
	let parent = Connection::create(&db, "admin", "").unwrap();
	let child = parent.create_sub().unwrap();
	let result = std::thread::spawn(move || {
		let err = child.begin().unwrap_err();
		let code = err.code();
		child.destroy().unwrap();
		code
	})
	.join()
	.unwrap();
	assert_eq!(result, 455);
	parent.destroy().unwrap();
}

#[test]
fn user_locks_are_cooperative_and_transaction_scoped() {
	let (db, _) = test_db();
	db.create_table(
		"orders/ownerinfo",
		TupleDesc::new(vec![Attribute::new("x", TypeId::Int4)]),
	)
	.unwrap();
	let a = Connection::create(&db, "admin", "").unwrap();
	let b = Connection::create(&db, "admin", "").unwrap();
	a.begin().unwrap();
	b.begin().unwrap();
	a.user_lock("orders", 42).unwrap();
	let err = b.user_lock("orders", 42).unwrap_err();
	assert_eq!(err.code(), 501);
	// Unknown groups fail with their own code
	let err = a.user_lock("nosuch", 1).unwrap_err();
	assert_eq!(err.code(), 502);
	// Commit releases the lock
	a.commit().unwrap();
	b.user_lock("orders", 42).unwrap();
	b.user_unlock("orders", 42).unwrap();
	b.rollback().unwrap();
	a.destroy().unwrap();
	b.destroy().unwrap();
}

#[test]
fn stream_exec_commits_each_statement() {
	let (db, planner) = test_db();
	planner.register(
		"insert a; insert broken",
		vec![
			insert_values(&db, "t", vec![vec![Expr::int4(1), Expr::text("one")]]),
			// The second statement fails at execution time
			select_values(vec![Target::new(
				"boom",
				Expr::op(OperId::Div, Expr::int4(1), Expr::int4(0)),
			)]),
		],
	);
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let err = conn.stream_exec("insert a; insert broken").unwrap_err();
	assert_eq!(err.to_string(), "division by zero");
	// Best effort: the first statement's work stays visible
	let rows = query(&conn, "select * from t");
	assert_eq!(rows.len(), 1);
	conn.destroy().unwrap();
}

#[test]
fn utility_statements_relay_to_the_catalog() {
	let (db, planner) = test_db();
	planner.register(
		"create table u",
		vec![utility(UtilityStmt::CreateTable {
			name: "u".to_owned(),
			desc: TupleDesc::new(vec![Attribute::new("k", TypeId::Int4)]),
		})],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.parse("create table u").unwrap();
	conn.exec().unwrap();
	// Utility statements leave nothing to fetch from
	let err = conn.fetch().unwrap_err();
	assert_eq!(err.code(), 455);
	conn.commit().unwrap();
	db.relation("u").unwrap();
	conn.destroy().unwrap();
}

#[test]
fn too_many_connections_is_reported() {
	let db = Database::new("busy");
	let mut held = Vec::new();
	loop {
		match Connection::create(&db, "admin", "") {
			Ok(conn) => held.push(conn),
			Err(err) => {
				assert_eq!(err.code(), 99);
				break;
			}
		}
		assert!(held.len() <= 4096, "admission limit never engaged");
	}
	for conn in held {
		conn.destroy().unwrap();
	}
}

#[test]
fn authentication_failures_carry_their_codes() {
	let db = Database::new("authy");
	db.define_user("alice", Some("secret"));
	let err = Connection::create(&db, "mallory", "guess").unwrap_err();
	assert_eq!(err.code(), 1703);
	let err = Connection::create(&db, "alice", "guess").unwrap_err();
	assert_eq!(err.code(), 1702);
	let conn = Connection::create(&db, "alice", "secret").unwrap();
	assert!(conn.is_valid());
	assert_eq!(conn.user_name(), "alice");
	assert_eq!(conn.database_name(), "authy");
	conn.destroy().unwrap();
	assert!(!conn.is_valid());
}

#[test]
fn binding_positions_are_bounded() {
	let (db, _) = test_db();
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	let err = conn.output_link(0, TypeId::Int4, 4).unwrap_err();
	assert_eq!(err.code(), 101);
	let err = conn.output_link(65, TypeId::Int4, 4).unwrap_err();
	assert_eq!(err.code(), 101);
	conn.output_link(64, TypeId::Int4, 4).unwrap();
	conn.rollback().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn unset_bindings_fail_at_exec() {
	let (db, planner) = test_db();
	planner.register(
		"insert one param",
		vec![insert_values(
			&db,
			"t",
			vec![vec![
				Expr::Param(loomdb_core::sql::expr::ParamRef::Named("1".to_owned())),
				Expr::text("x"),
			]],
		)],
	);
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	conn.parse("insert one param").unwrap();
	conn.bind("$1", TypeId::Int4).unwrap();
	let err = conn.exec().unwrap_err();
	assert!(err.to_string().contains("has not been set"));
	conn.rollback().unwrap();
	conn.destroy().unwrap();
}

#[test]
fn procedure_snapshots_nest() {
	let (db, planner) = test_db();
	planner.register("select * from t", vec![select_seqscan(&db, "t", passthrough(&db, "t"), vec![])]);
	planner.register(
		"insert row",
		vec![insert_values(&db, "t", vec![vec![Expr::int4(9), Expr::text("in")]])],
	);
	let writer = Connection::create(&db, "admin", "").unwrap();
	let conn = Connection::create(&db, "admin", "").unwrap();
	conn.begin().unwrap();
	assert_eq!(query_in_txn(&conn, "select * from t").len(), 0);

	// A concurrent commit happens mid-transaction
	writer.begin().unwrap();
	writer.parse("insert row").unwrap();
	writer.exec().unwrap();
	writer.commit().unwrap();

	// The transaction snapshot still hides it
	assert_eq!(query_in_txn(&conn, "select * from t").len(), 0);
	// A procedure snapshot is a fresh cut and sees it
	conn.begin_procedure().unwrap();
	assert_eq!(query_in_txn(&conn, "select * from t").len(), 1);
	conn.end_procedure().unwrap();
	// Dropping it restores the old visibility
	assert_eq!(query_in_txn(&conn, "select * from t").len(), 0);
	conn.commit().unwrap();
	conn.destroy().unwrap();
	writer.destroy().unwrap();
}

#[test]
fn transaction_and_command_ids_are_exposed() {
	let (db, planner) = test_db();
	planner.register("select 1", vec![select_values(vec![Target::new("c", Expr::int4(1))])]);
	let conn = Connection::create(&db, "admin", "").unwrap();
	let err = conn.transaction_id().unwrap_err();
	assert_eq!(err.code(), 454);
	conn.begin().unwrap();
	let xid = conn.transaction_id().unwrap();
	assert!(xid > 0);
	let before = conn.command_id().unwrap();
	conn.parse("select 1").unwrap();
	conn.exec().unwrap();
	let after = conn.command_id().unwrap();
	assert!(after > before);
	conn.commit().unwrap();
	conn.destroy().unwrap();
}
