use crate::err::Error;
use crate::exe::eval::exec_eval_expr;
use crate::exe::node::exec_proc_node;
use crate::exe::state::{EState, ExprContext, ParamExecSlot};
use crate::sql::expr::{SubLinkKind, SubPlanRef};
use crate::sql::func;
use crate::sql::val::Value;

/// Read an executor-internal parameter, running its init-plan first if
/// the slot is still pending.
pub fn resolve_exec_param(
	index: usize,
	_ectx: &ExprContext,
	estate: &mut EState,
) -> Result<Value, Error> {
	let pending = estate.param_exec.get(index).and_then(|slot| slot.pending_plan);
	if let Some(plan_id) = pending {
		run_init_plan(plan_id, estate)?;
	}
	estate.param_exec.get(index).map(|slot| slot.value.clone()).ok_or_else(|| Error::Execution {
		message: format!("executor parameter {index} out of range"),
	})
}

/// Run an uncorrelated init-plan to its first row and publish the row's
/// columns into the parameters it sets.
fn run_init_plan(plan_id: usize, estate: &mut EState) -> Result<(), Error> {
	// Take the state out so the subplan can run against the executor
	// without aliasing it
	let mut sp = estate.sub_plans.remove(&plan_id).ok_or_else(|| Error::Execution {
		message: format!("no subplan with id {plan_id}"),
	})?;
	let row = exec_proc_node(&mut sp.node, estate)?;
	let values = match row {
		Some(slot) => estate.tuple_table.get(slot).tuple().map(|t| t.values.clone()).unwrap_or_default(),
		None => Vec::new(),
	};
	for (i, param) in sp.set_params.iter().enumerate() {
		if let Some(slot) = estate.param_exec.get_mut(*param) {
			*slot = ParamExecSlot {
				value: values.get(i).cloned().unwrap_or(Value::Null),
				pending_plan: None,
			};
		}
	}
	estate.sub_plans.insert(plan_id, sp);
	Ok(())
}

/// Evaluate a subplan reference embedded in an expression: EXISTS, a
/// scalar subselect, or a quantified ANY/ALL comparison.
pub fn exec_sub_plan(
	link: &SubPlanRef,
	ectx: &ExprContext,
	estate: &mut EState,
) -> Result<Value, Error> {
	let mut sp = estate.sub_plans.remove(&link.plan_id).ok_or_else(|| Error::Execution {
		message: format!("no subplan with id {}", link.plan_id),
	})?;
	// Push the correlation parameters down, then force a rescan so the
	// subtree sees their new values
	for (param, expr) in &sp.par_params {
		let v = exec_eval_expr(expr, ectx, estate)?;
		if let Some(slot) = estate.param_exec.get_mut(*param) {
			*slot = ParamExecSlot {
				value: v,
				pending_plan: None,
			};
		}
	}
	sp.node.mark_chg_param();

	let mut lhs = Vec::with_capacity(link.lhs.len());
	for expr in &link.lhs {
		lhs.push(exec_eval_expr(expr, ectx, estate)?);
	}

	let result = eval_rows(link, &lhs, &mut sp, estate);
	estate.sub_plans.insert(link.plan_id, sp);
	result
}

fn eval_rows(
	link: &SubPlanRef,
	lhs: &[Value],
	sp: &mut crate::exe::state::SubPlanState,
	estate: &mut EState,
) -> Result<Value, Error> {
	match link.kind {
		SubLinkKind::Exists => {
			let row = exec_proc_node(&mut sp.node, estate)?;
			Ok(Value::Bool(row.is_some()))
		}
		SubLinkKind::Expr => {
			let row = exec_proc_node(&mut sp.node, estate)?;
			match row {
				None => Ok(Value::Null),
				Some(slot) => {
					let value = estate
						.tuple_table
						.get(slot)
						.tuple()
						.and_then(|t| t.values.first().cloned())
						.unwrap_or(Value::Null);
					// A scalar subselect must not produce a second row
					if exec_proc_node(&mut sp.node, estate)?.is_some() {
						return Err(Error::Execution {
							message: "subselect returned more than one row".to_owned(),
						});
					}
					Ok(value)
				}
			}
		}
		SubLinkKind::Any(op) => {
			let mut saw_null = false;
			while let Some(slot) = exec_proc_node(&mut sp.node, estate)? {
				let row = estate.tuple_table.get(slot).tuple().map(|t| t.values.clone()).unwrap_or_default();
				match row_verdict(op, lhs, &row)? {
					Some(true) => return Ok(Value::Bool(true)),
					Some(false) => {}
					None => saw_null = true,
				}
			}
			if saw_null {
				Ok(Value::Null)
			} else {
				Ok(Value::Bool(false))
			}
		}
		SubLinkKind::All(op) => {
			let mut saw_null = false;
			while let Some(slot) = exec_proc_node(&mut sp.node, estate)? {
				let row = estate.tuple_table.get(slot).tuple().map(|t| t.values.clone()).unwrap_or_default();
				match row_verdict(op, lhs, &row)? {
					Some(false) => return Ok(Value::Bool(false)),
					Some(true) => {}
					None => saw_null = true,
				}
			}
			if saw_null {
				Ok(Value::Null)
			} else {
				Ok(Value::Bool(true))
			}
		}
	}
}

/// Combine `lhs[i] op row[i]` with AND semantics; `None` is the null
/// verdict of three-valued logic.
fn row_verdict(
	op: crate::sql::expr::OperId,
	lhs: &[Value],
	row: &[Value],
) -> Result<Option<bool>, Error> {
	let mut saw_null = false;
	for (left, right) in lhs.iter().zip(row.iter()) {
		if left.is_null() || right.is_null() {
			saw_null = true;
			continue;
		}
		let v = func::eval_oper(op, &[left.clone(), right.clone()])?;
		if !v.is_true() {
			return Ok(Some(false));
		}
	}
	if saw_null {
		Ok(None)
	} else {
		Ok(Some(true))
	}
}
