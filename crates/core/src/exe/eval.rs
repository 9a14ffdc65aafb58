use crate::err::Error;
use crate::exe::node::subplan;
use crate::exe::state::{EState, ExprContext, ProjectionInfo};
use crate::exe::slot::SlotRef;
use crate::sql::expr::{CaseWhen, Expr, ParamRef, VarSource};
use crate::sql::func;
use crate::sql::val::Value;
use std::collections::VecDeque;

/// Evaluate an expression against the tuples and parameters in scope.
///
/// Nulls follow three-valued logic: strict operators return null on any
/// null operand, AND/OR short-circuit and remember nulls, and a null
/// qualification result is decided by the caller's context.
pub fn exec_eval_expr(expr: &Expr, ectx: &ExprContext, estate: &mut EState) -> Result<Value, Error> {
	match expr {
		Expr::Const(v) => Ok(v.clone()),
		Expr::Var {
			source,
			attno,
		} => eval_var(*source, *attno, ectx, estate),
		Expr::CurrentTid => {
			let slot = ectx.scan_tuple.ok_or_else(|| Error::Execution {
				message: "no scan tuple in scope for a tid reference".to_owned(),
			})?;
			let tuple = estate.tuple_table.get(slot).tuple().ok_or_else(|| Error::Execution {
				message: "scan tuple slot is empty".to_owned(),
			})?;
			Ok(tuple.tid.to_datum())
		}
		Expr::Param(param) => eval_param(param, ectx, estate),
		Expr::Oper {
			op,
			args,
		} => {
			// Operators are strict: a null operand yields null
			let mut vals = Vec::with_capacity(args.len());
			for arg in args {
				let v = exec_eval_expr(arg, ectx, estate)?;
				if v.is_null() {
					return Ok(Value::Null);
				}
				vals.push(v);
			}
			func::eval_oper(*op, &vals)
		}
		Expr::Func {
			name,
			args,
		} => {
			let mut vals = Vec::with_capacity(args.len());
			for arg in args {
				vals.push(exec_eval_expr(arg, ectx, estate)?);
			}
			eval_func(name, &vals, estate)
		}
		Expr::Not(arg) => {
			let v = exec_eval_expr(arg, ectx, estate)?;
			match v {
				Value::Null => Ok(Value::Null),
				v => Ok(Value::Bool(!v.is_true())),
			}
		}
		Expr::Or(args) => {
			// True on the first true; null is remembered and reported
			// only when no definitive answer is found
			let mut saw_null = false;
			for arg in args {
				match exec_eval_expr(arg, ectx, estate)? {
					Value::Null => saw_null = true,
					v if v.is_true() => return Ok(Value::Bool(true)),
					_ => {}
				}
			}
			if saw_null {
				Ok(Value::Null)
			} else {
				Ok(Value::Bool(false))
			}
		}
		Expr::And(args) => {
			let mut saw_null = false;
			for arg in args {
				match exec_eval_expr(arg, ectx, estate)? {
					Value::Null => saw_null = true,
					v if !v.is_true() => return Ok(Value::Bool(false)),
					_ => {}
				}
			}
			if saw_null {
				Ok(Value::Null)
			} else {
				Ok(Value::Bool(true))
			}
		}
		Expr::Case {
			whens,
			default,
		} => eval_case(whens, default.as_deref(), ectx, estate),
		Expr::ArrayRef {
			array,
			upper,
			lower,
			assign,
		} => eval_array_ref(array, upper, lower, assign.as_deref(), ectx, estate),
		Expr::Aggref {
			aggno,
		} => {
			if *aggno >= ectx.agg_values.len() {
				return Err(Error::Execution {
					message: "no aggregates in this expression context".to_owned(),
				});
			}
			if ectx.agg_nulls[*aggno] {
				Ok(Value::Null)
			} else {
				Ok(ectx.agg_values[*aggno].clone())
			}
		}
		Expr::SubPlan(link) => subplan::exec_sub_plan(link, ectx, estate),
		Expr::Relabel {
			arg,
			..
		} => exec_eval_expr(arg, ectx, estate),
		Expr::Iter(arg) => {
			// The inner call produces the whole set; iteration happens in
			// the projection layer
			let v = exec_eval_expr(arg, ectx, estate)?;
			match v {
				Value::Set(_) => Ok(v),
				scalar => Ok(Value::Set(VecDeque::from([scalar]))),
			}
		}
	}
}

fn eval_var(
	source: VarSource,
	attno: usize,
	ectx: &ExprContext,
	estate: &EState,
) -> Result<Value, Error> {
	let slot = match source {
		VarSource::Scan => ectx.scan_tuple,
		VarSource::Inner => ectx.inner_tuple,
		VarSource::Outer => ectx.outer_tuple,
	};
	let slot = slot.ok_or_else(|| Error::Execution {
		message: format!("no {source:?} tuple in scope"),
	})?;
	let tuple = estate.tuple_table.get(slot).tuple().ok_or_else(|| Error::Execution {
		message: format!("{source:?} tuple slot is empty"),
	})?;
	Ok(tuple.attr(attno)?.clone())
}

fn eval_param(param: &ParamRef, ectx: &ExprContext, estate: &mut EState) -> Result<Value, Error> {
	match param {
		ParamRef::Named(name) => {
			let bound = estate.params.by_name(name).ok_or_else(|| Error::Execution {
				message: format!("unknown parameter {name}"),
			})?;
			Ok(bound.value.clone())
		}
		ParamRef::Num(index) => {
			let bound = estate.params.by_num(*index).ok_or_else(|| Error::Execution {
				message: format!("unknown parameter ${index}"),
			})?;
			Ok(bound.value.clone())
		}
		ParamRef::Exec(index) => subplan::resolve_exec_param(*index, ectx, estate),
	}
}

fn eval_func(name: &str, args: &[Value], estate: &mut EState) -> Result<Value, Error> {
	if func::is_native(name) {
		return func::eval_native(name, args);
	}
	if let Some(function) = estate.db.function(name) {
		// SQL-language functions run their planned body through the
		// nested procedure stack, on the caller's thread and snapshot
		return crate::spi::call_sql_function(estate, &function, args);
	}
	if let Some(bridge) = estate.db.foreign_bridge() {
		let tagged = args
			.iter()
			.map(|v| (v.kind().unwrap_or(crate::sql::kind::TypeId::Text), v.clone()))
			.collect::<Vec<_>>();
		return bridge.call(name, &tagged);
	}
	Err(Error::UnsupportedFunction {
		name: name.to_owned(),
	})
}

fn eval_case(
	whens: &[CaseWhen],
	default: Option<&Expr>,
	ectx: &ExprContext,
	estate: &mut EState,
) -> Result<Value, Error> {
	for arm in whens {
		let cond = exec_eval_expr(&arm.when, ectx, estate)?;
		if cond.is_true() {
			return exec_eval_expr(&arm.then, ectx, estate);
		}
	}
	match default {
		Some(expr) => exec_eval_expr(expr, ectx, estate),
		None => Ok(Value::Null),
	}
}

fn eval_array_ref(
	array: &Expr,
	upper: &[Expr],
	lower: &[Expr],
	assign: Option<&Expr>,
	ectx: &ExprContext,
	estate: &mut EState,
) -> Result<Value, Error> {
	let base = exec_eval_expr(array, ectx, estate)?;
	let Value::Array(base) = base else {
		return Err(Error::Execution {
			message: format!("array reference over non-array value {base}"),
		});
	};
	let mut up = Vec::with_capacity(upper.len());
	for e in upper {
		up.push(exec_eval_expr(e, ectx, estate)?.try_into_i32()?);
	}
	let mut low = Vec::with_capacity(lower.len());
	for e in lower {
		low.push(exec_eval_expr(e, ectx, estate)?.try_into_i32()?);
	}
	match assign {
		None => {
			if low.is_empty() {
				base.element(&up)
			} else {
				Ok(Value::Array(base.clip(&low, &up)?))
			}
		}
		Some(source) => {
			// Assignment builds a new array; the input datum is never
			// mutated
			let v = exec_eval_expr(source, ectx, estate)?;
			if low.is_empty() {
				Ok(Value::Array(base.with_element(&up, v)?))
			} else {
				let Value::Array(src) = v else {
					return Err(Error::Execution {
						message: "array slice assignment needs an array source".to_owned(),
					});
				};
				Ok(Value::Array(base.with_clip(&low, &up, &src)?))
			}
		}
	}
}

/// Fold a qualification list with AND semantics. A null clause result
/// counts as `result_for_null`: false in WHERE context, true for
/// constraint checks.
pub fn exec_qual(
	quals: &[Expr],
	ectx: &ExprContext,
	estate: &mut EState,
	result_for_null: bool,
) -> Result<bool, Error> {
	for qual in quals {
		match exec_eval_expr(qual, ectx, estate)? {
			Value::Null => {
				if !result_for_null {
					return Ok(false);
				}
			}
			v if !v.is_true() => return Ok(false),
			_ => {}
		}
	}
	Ok(true)
}

/// Project the target list into the projection slot.
///
/// Returns the slot and whether the projection is done: set-returning
/// targets make this yield one combined row per call with `done` false
/// until every set is drained, so callers loop without advancing their
/// input.
pub fn exec_project(
	proj: &mut ProjectionInfo,
	ectx: &ExprContext,
	estate: &mut EState,
) -> Result<(SlotRef, bool), Error> {
	let iterating = proj.pending.iter().any(|p| p.as_ref().is_some_and(|q| !q.is_empty()));
	if !iterating {
		// Fresh round: evaluate every target
		proj.current.clear();
		for (i, target) in proj.targetlist.iter().enumerate() {
			let v = exec_eval_expr(&target.expr, ectx, estate)?;
			match v {
				Value::Set(queue) => {
					proj.pending[i] = Some(queue);
					proj.current.push(Value::Null);
				}
				v => {
					proj.pending[i] = None;
					proj.current.push(v);
				}
			}
		}
	}
	// Assemble one output row, consuming one element of each live set
	let mut row = Vec::with_capacity(proj.targetlist.len());
	for (i, scalar) in proj.current.iter().enumerate() {
		match proj.pending.get_mut(i).and_then(Option::as_mut) {
			Some(queue) => row.push(queue.pop_front().unwrap_or(Value::Null)),
			None => row.push(scalar.clone()),
		}
	}
	let done = !proj.pending.iter().any(|p| p.as_ref().is_some_and(|q| !q.is_empty()));
	if done {
		for p in proj.pending.iter_mut() {
			*p = None;
		}
	}
	estate.tuple_table.get_mut(proj.slot).store_values(row);
	Ok((proj.slot, done))
}
