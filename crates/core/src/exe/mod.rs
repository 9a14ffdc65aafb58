//! The executor: a pull-based tree of plan nodes evaluating expressions
//! over tuple slots, honoring snapshot visibility and owning its buffer
//! pins.

pub mod eval;
pub mod node;
pub mod scan;
pub mod slot;
pub mod spill;
pub mod state;

use crate::err::Error;
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::state::{EState, JunkFilter};
use crate::plan::{AggKind, CommandType, PlanNode, PlannedStatement};
use crate::sql::expr::{Expr, OperId, ParamRef, VarSource};
use crate::sql::kind::TypeId;
use crate::sql::val::{Blob, Value};
use crate::store::heap::HeapModify;
use crate::store::tuple::{Attribute, ItemPointer, TupleDesc};

/// Initialize the plan tree of a statement: count and reserve slots is
/// the caller's job (the tuple table must exist before nodes allocate
/// from it); this wires the result relation, the junk filter, and the
/// node tree itself.
pub fn executor_start(stmt: &PlannedStatement, estate: &mut EState) -> Result<(NodeState, TupleDesc), Error> {
	if let Some(result_index) = stmt.result_relation {
		estate.result_relation = Some(estate.open_relation(result_index)?);
	}
	let plan = stmt.plan.as_ref().ok_or_else(|| Error::Execution {
		message: "statement has no plan tree".to_owned(),
	})?;
	estate.junk_filter = Some(JunkFilter::new(&plan.common().targetlist));
	let node = exec_init_node(plan, estate)?;
	let desc = output_desc(stmt, estate)?;
	Ok((node, desc))
}

/// Tear the plan tree down: subplans included, every slot cleared.
pub fn executor_end(node: &mut NodeState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(node, estate)?;
	let mut subs: Vec<_> = estate.sub_plans.drain().collect();
	for (_, sp) in subs.iter_mut() {
		exec_end_node(&mut sp.node, estate)?;
	}
	estate.tuple_table.clear_all();
	Ok(())
}

/// Run the write loop of an INSERT, UPDATE or DELETE statement and
/// return the number of tuples processed.
pub fn execute_dml(
	stmt: &PlannedStatement,
	node: &mut NodeState,
	estate: &mut EState,
) -> Result<u64, Error> {
	let rel = estate.result_relation.clone().ok_or_else(|| Error::Execution {
		message: "write statement without a result relation".to_owned(),
	})?;
	let result_index = stmt.result_relation.unwrap_or(0);
	let mut processed = 0u64;
	loop {
		let Some(slot) = exec_proc_node(node, estate)? else {
			break;
		};
		let tuple = estate.tuple_table.get(slot).tuple().cloned().ok_or_else(|| Error::Execution {
			message: "write plan returned an empty slot".to_owned(),
		})?;
		let filter = estate.junk_filter.clone().unwrap_or_default();
		match stmt.command {
			CommandType::Insert => {
				let values = externalize_blobs(&rel.desc, filter.filter(&tuple), estate);
				let oid = estate.db.next_row_oid();
				let tid = rel.insert(oid, values.clone(), estate.xid, estate.cid)?;
				index_insert(&rel, &values, tid, estate)?;
				estate.last_oid = oid;
				processed += 1;
			}
			CommandType::Delete => {
				let tid = junk_tid(&filter, &tuple)?;
				processed += apply_delete(node, &rel, result_index, tid, estate)?;
			}
			CommandType::Update => {
				let tid = junk_tid(&filter, &tuple)?;
				let values = externalize_blobs(&rel.desc, filter.filter(&tuple), estate);
				processed += apply_update(node, &rel, result_index, tid, values, estate)?;
			}
			_ => {
				return Err(Error::Execution {
					message: "unexpected operation in write loop".to_owned(),
				})
			}
		}
	}
	estate.processed += processed;
	Ok(processed)
}

fn junk_tid(filter: &JunkFilter, tuple: &crate::store::tuple::HeapTuple) -> Result<ItemPointer, Error> {
	let datum = filter.junk_attr(tuple, "ctid").ok_or_else(|| Error::Execution {
		message: "write plan is missing its ctid junk attribute".to_owned(),
	})?;
	ItemPointer::from_datum(&datum)
}

/// Move oversized blob values out of line before they reach the heap.
fn externalize_blobs(desc: &TupleDesc, mut values: Vec<Value>, estate: &EState) -> Vec<Value> {
	for (attr, value) in desc.attrs().iter().zip(values.iter_mut()) {
		if attr.kind == TypeId::Blob {
			let data = match value {
				Value::Bytes(data) => Some(std::mem::take(data)),
				Value::Blob(Blob::Inline(data)) => Some(std::mem::take(data)),
				_ => None,
			};
			if let Some(data) = data {
				*value = Value::Blob(estate.db.blobs.store(&data));
			}
		}
	}
	values
}

fn index_insert(
	rel: &crate::store::heap::HeapRelation,
	values: &[Value],
	tid: ItemPointer,
	estate: &EState,
) -> Result<(), Error> {
	for index in estate.db.indexes_for(rel.id) {
		let key = index.key_cols.iter().map(|col| values[col - 1].clone()).collect();
		index.insert(key, tid)?;
	}
	Ok(())
}

fn apply_delete(
	node: &mut NodeState,
	rel: &std::sync::Arc<crate::store::heap::HeapRelation>,
	result_index: usize,
	tid: ItemPointer,
	estate: &mut EState,
) -> Result<u64, Error> {
	match rel.delete(tid, estate.xid, estate.cid, &estate.db.xact) {
		HeapModify::Ok => Ok(1),
		HeapModify::SelfModified => Ok(0),
		HeapModify::NotFound => Err(Error::Execution {
			message: format!("no tuple at {tid} to delete"),
		}),
		HeapModify::Concurrent {
			latest,
		} => {
			// The row moved under us; re-evaluate the plan against the
			// newest version and retry when it still qualifies
			match eval_plan_qual(node, rel, result_index, latest, estate)? {
				Some(new_tid) => apply_delete(node, rel, result_index, new_tid, estate),
				None => Ok(0),
			}
		}
	}
}

fn apply_update(
	node: &mut NodeState,
	rel: &std::sync::Arc<crate::store::heap::HeapRelation>,
	result_index: usize,
	tid: ItemPointer,
	values: Vec<Value>,
	estate: &mut EState,
) -> Result<u64, Error> {
	match rel.update(tid, values.clone(), estate.xid, estate.cid, &estate.db.xact)? {
		(HeapModify::Ok, Some(new_tid)) => {
			index_insert(rel, &values, new_tid, estate)?;
			Ok(1)
		}
		(HeapModify::Ok, None) | (HeapModify::SelfModified, _) => Ok(0),
		(HeapModify::NotFound, _) => Err(Error::Execution {
			message: format!("no tuple at {tid} to replace"),
		}),
		(HeapModify::Concurrent {
			latest,
		}, _) => match eval_plan_qual(node, rel, result_index, latest, estate)? {
			Some(new_tid) => apply_update(node, rel, result_index, new_tid, values, estate),
			None => Ok(0),
		},
	}
}

/// Re-check the plan against the newest version of a concurrently
/// updated row. The replacement tuple is installed for the result
/// relation's range table index; scan nodes return it once instead of
/// reading the heap. Returns the new version's pointer when the plan
/// still qualifies.
fn eval_plan_qual(
	node: &mut NodeState,
	rel: &std::sync::Arc<crate::store::heap::HeapRelation>,
	result_index: usize,
	latest: Option<ItemPointer>,
	estate: &mut EState,
) -> Result<Option<ItemPointer>, Error> {
	let Some(mut tid) = latest else {
		// Deleted outright, nothing to re-check
		return Ok(None);
	};
	// Chase the update chain to the newest version
	let newest = loop {
		let Some(tuple) = rel.fetch_any(tid) else {
			return Ok(None);
		};
		match tuple.link {
			Some(next) => tid = next,
			None => break tuple,
		}
	};
	if result_index == 0 || result_index > estate.ev_tuple.len() {
		return Ok(None);
	}
	estate.ev_tuple[result_index - 1] = Some(newest.clone());
	estate.ev_tuple_null[result_index - 1] = false;
	exec_rescan(node, estate)?;
	let requalified = exec_proc_node(node, estate)?.is_some();
	estate.ev_tuple[result_index - 1] = None;
	estate.ev_tuple_null[result_index - 1] = false;
	exec_rescan(node, estate)?;
	if requalified {
		Ok(Some(newest.tid))
	} else {
		Ok(None)
	}
}

/// Pull the next projected tuple from a SELECT plan.
pub fn fetch_one(node: &mut NodeState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	exec_proc_node(node, estate)
}

// --------------------------------------------------
// Output descriptor inference
// --------------------------------------------------

/// The descriptor of a statement's projected output: non-junk targets
/// with inferred types.
pub fn output_desc(stmt: &PlannedStatement, estate: &EState) -> Result<TupleDesc, Error> {
	let plan = stmt.plan.as_ref().ok_or_else(|| Error::Execution {
		message: "statement has no plan tree".to_owned(),
	})?;
	let outputs = node_output(plan, stmt, estate)?;
	let attrs = outputs
		.into_iter()
		.map(|(name, kind)| Attribute::new(&name, kind))
		.collect();
	Ok(TupleDesc::new(attrs))
}

/// Output column names and types of the subtree rooted at `plan`.
fn node_output(
	plan: &PlanNode,
	stmt: &PlannedStatement,
	estate: &EState,
) -> Result<Vec<(String, TypeId)>, Error> {
	let common = plan.common();
	// Sources for Var resolution
	let scan_input: Option<Vec<(String, TypeId)>> = match plan {
		PlanNode::SeqScan {
			scanrelid,
			..
		}
		| PlanNode::DelegatedSeqScan {
			scanrelid,
			..
		}
		| PlanNode::IndexScan {
			scanrelid,
			..
		}
		| PlanNode::DelegatedIndexScan {
			scanrelid,
			..
		}
		| PlanNode::TidScan {
			scanrelid,
			..
		} => {
			let rel = estate.open_relation(*scanrelid)?;
			Some(rel.desc.attrs().iter().map(|a| (a.name.clone(), a.kind)).collect())
		}
		_ => None,
	};
	let left = match &common.lefttree {
		Some(child) => Some(node_output(child, stmt, estate)?),
		None => None,
	};
	let right = match &common.righttree {
		Some(child) => Some(node_output(child, stmt, estate)?),
		None => None,
	};
	// Pass-through nodes inherit their input's shape
	match plan {
		PlanNode::Material {
			..
		}
		| PlanNode::Sort {
			..
		}
		| PlanNode::Unique {
			..
		} => {
			return left.ok_or_else(|| Error::Execution {
				message: "pass-through node without input".to_owned(),
			})
		}
		PlanNode::Group {
			..
		} if common.targetlist.is_empty() => {
			return left.ok_or_else(|| Error::Execution {
				message: "group node without input".to_owned(),
			})
		}
		PlanNode::Append {
			plans,
			..
		} => {
			if let Some(first) = plans.first() {
				return node_output(first, stmt, estate);
			}
		}
		_ => {}
	}
	let scan_or_left = scan_input.as_ref().or(left.as_ref());
	let aggs = match plan {
		PlanNode::Agg {
			aggs,
			..
		} => Some(aggs.as_slice()),
		_ => None,
	};
	let mut out = Vec::new();
	for target in &common.targetlist {
		if target.junk {
			continue;
		}
		let kind = infer_kind(&target.expr, scan_or_left, right.as_ref(), aggs, estate);
		out.push((target.name.clone(), kind));
	}
	Ok(out)
}

/// Best-effort type inference over an expression, for the output
/// descriptor handed to output bindings.
fn infer_kind(
	expr: &Expr,
	scan: Option<&Vec<(String, TypeId)>>,
	inner: Option<&Vec<(String, TypeId)>>,
	aggs: Option<&[crate::plan::AggExpr]>,
	estate: &EState,
) -> TypeId {
	match expr {
		Expr::Const(v) => v.kind().unwrap_or(TypeId::Text),
		Expr::Var {
			source,
			attno,
		} => {
			let list = match source {
				VarSource::Inner => inner,
				_ => scan,
			};
			list.and_then(|l| l.get(attno - 1)).map(|(_, k)| *k).unwrap_or(TypeId::Text)
		}
		Expr::Param(ParamRef::Named(name)) => {
			estate.params.by_name(name).map(|p| p.kind).unwrap_or(TypeId::Text)
		}
		Expr::Param(ParamRef::Num(index)) => {
			estate.params.by_num(*index).map(|p| p.kind).unwrap_or(TypeId::Text)
		}
		Expr::Param(ParamRef::Exec(_)) => TypeId::Text,
		Expr::CurrentTid => TypeId::Int8,
		Expr::Oper {
			op,
			args,
		} => {
			if op.is_comparison() || matches!(op, OperId::Like) {
				TypeId::Bool
			} else if matches!(op, OperId::Concat) {
				TypeId::Text
			} else {
				args.first()
					.map(|a| infer_kind(a, scan, inner, aggs, estate))
					.unwrap_or(TypeId::Int4)
			}
		}
		Expr::Func {
			name,
			args,
		} => match name.as_str() {
			"upper" | "lower" => TypeId::Text,
			"length" => TypeId::Int4,
			"sqrt" => TypeId::Float8,
			_ => args
				.first()
				.map(|a| infer_kind(a, scan, inner, aggs, estate))
				.unwrap_or(TypeId::Text),
		},
		Expr::Not(_) | Expr::Or(_) | Expr::And(_) => TypeId::Bool,
		Expr::Case {
			whens,
			default,
		} => whens
			.first()
			.map(|w| infer_kind(&w.then, scan, inner, aggs, estate))
			.or_else(|| default.as_ref().map(|d| infer_kind(d, scan, inner, aggs, estate)))
			.unwrap_or(TypeId::Text),
		Expr::ArrayRef {
			assign,
			..
		} => {
			if assign.is_some() {
				TypeId::Array
			} else {
				TypeId::Text
			}
		}
		Expr::Aggref {
			aggno,
		} => match aggs.and_then(|a| a.get(*aggno)) {
			Some(agg) => match agg.kind {
				AggKind::Count | AggKind::CountStar => TypeId::Int8,
				AggKind::Avg => TypeId::Float8,
				AggKind::Sum => agg
					.arg
					.as_ref()
					.map(|a| match infer_kind(a, scan, inner, aggs, estate) {
						TypeId::Float4 | TypeId::Float8 => TypeId::Float8,
						_ => TypeId::Int8,
					})
					.unwrap_or(TypeId::Int8),
				AggKind::Min | AggKind::Max => agg
					.arg
					.as_ref()
					.map(|a| infer_kind(a, scan, inner, aggs, estate))
					.unwrap_or(TypeId::Text),
			},
			None => TypeId::Text,
		},
		Expr::SubPlan(link) => match link.kind {
			crate::sql::expr::SubLinkKind::Expr => TypeId::Text,
			_ => TypeId::Bool,
		},
		Expr::Relabel {
			to,
			..
		} => *to,
		Expr::Iter(arg) => infer_kind(arg, scan, inner, aggs, estate),
	}
}
