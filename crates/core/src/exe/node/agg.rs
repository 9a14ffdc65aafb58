use crate::err::Error;
use crate::exe::eval::{exec_eval_expr, exec_project};
use crate::exe::node::{exec_end_node, exec_init_node, exec_proc_node, exec_rescan, CommonState, NodeState};
use crate::exe::slot::SlotRef;
use crate::exe::state::EState;
use crate::plan::{AggExpr, AggKind, PlanCommon};
use crate::sql::val::Value;

/// Working state of one aggregate within the current group.
#[derive(Default)]
struct AggAccum {
	count: i64,
	sum_i: i64,
	sum_f: f64,
	float_seen: bool,
	extreme: Option<Value>,
	distinct_seen: Vec<Value>,
}

impl AggAccum {
	fn advance(&mut self, agg: &AggExpr, value: Value) {
		if value.is_null() {
			return;
		}
		if agg.distinct {
			if self.distinct_seen.iter().any(|v| v.grouping_eq(&value)) {
				return;
			}
			self.distinct_seen.push(value.clone());
		}
		self.count += 1;
		match agg.kind {
			AggKind::Sum | AggKind::Avg => match &value {
				Value::Int2(v) => self.sum_i += i64::from(*v),
				Value::Int4(v) => self.sum_i += i64::from(*v),
				Value::Int8(v) => self.sum_i += *v,
				Value::Float4(v) => {
					self.sum_f += f64::from(*v);
					self.float_seen = true;
				}
				Value::Float8(v) => {
					self.sum_f += *v;
					self.float_seen = true;
				}
				_ => {}
			},
			AggKind::Min => {
				let better = match &self.extreme {
					None => true,
					Some(cur) => value.compare(cur) == Some(std::cmp::Ordering::Less),
				};
				if better {
					self.extreme = Some(value);
				}
			}
			AggKind::Max => {
				let better = match &self.extreme {
					None => true,
					Some(cur) => value.compare(cur) == Some(std::cmp::Ordering::Greater),
				};
				if better {
					self.extreme = Some(value);
				}
			}
			AggKind::Count | AggKind::CountStar => {}
		}
	}

	fn finish(&self, agg: &AggExpr) -> (Value, bool) {
		match agg.kind {
			AggKind::Count | AggKind::CountStar => (Value::Int8(self.count), false),
			AggKind::Sum => {
				if self.count == 0 {
					(Value::Null, true)
				} else if self.float_seen {
					(Value::Float8(self.sum_f), false)
				} else {
					(Value::Int8(self.sum_i), false)
				}
			}
			AggKind::Avg => {
				if self.count == 0 {
					(Value::Null, true)
				} else {
					let total = if self.float_seen {
						self.sum_f
					} else {
						self.sum_i as f64
					};
					(Value::Float8(total / self.count as f64), false)
				}
			}
			AggKind::Min | AggKind::Max => match &self.extreme {
				Some(v) => (v.clone(), false),
				None => (Value::Null, true),
			},
		}
	}
}

/// Computes aggregates over its input, either as one group spanning the
/// whole input or per group when a Group node below delivers null
/// boundary markers.
pub struct AggState {
	pub common: CommonState,
	pub outer: Box<NodeState>,
	pub aggs: Vec<AggExpr>,
	pub group_boundaries: bool,
	done: bool,
}

pub fn init(
	common: &PlanCommon,
	aggs: &[AggExpr],
	group_boundaries: bool,
	estate: &mut EState,
) -> Result<AggState, Error> {
	let child = common.lefttree.as_deref().ok_or_else(|| Error::Execution {
		message: "aggregate node is missing its subtree".to_owned(),
	})?;
	let outer = Box::new(exec_init_node(child, estate)?);
	let mut common = CommonState::build(common, estate)?;
	common.ectx.agg_values = vec![Value::Null; aggs.len()];
	common.ectx.agg_nulls = vec![true; aggs.len()];
	Ok(AggState {
		common,
		outer,
		aggs: aggs.to_vec(),
		group_boundaries,
		done: false,
	})
}

pub fn exec(state: &mut AggState, estate: &mut EState) -> Result<Option<SlotRef>, Error> {
	if state.done {
		return Ok(None);
	}
	let mut accums: Vec<AggAccum> = state.aggs.iter().map(|_| AggAccum::default()).collect();
	let mut any_row = false;
	let mut last_values: Option<Vec<Value>> = None;
	loop {
		match exec_proc_node(&mut state.outer, estate)? {
			Some(slot) => {
				any_row = true;
				state.common.ectx.scan_tuple = Some(slot);
				last_values = estate.tuple_table.get(slot).tuple().map(|t| t.values.clone());
				let aggs = state.aggs.clone();
				for (agg, accum) in aggs.iter().zip(accums.iter_mut()) {
					let value = match &agg.arg {
						None => Value::Bool(true),
						Some(arg) => exec_eval_expr(arg, &state.common.ectx, estate)?,
					};
					accum.advance(agg, value);
				}
			}
			None => {
				// End of the input, or a group boundary from below
				if state.group_boundaries {
					if !any_row {
						state.done = true;
						return Ok(None);
					}
				} else {
					state.done = true;
				}
				for ((agg, accum), i) in state.aggs.iter().zip(accums.iter()).zip(0..) {
					let (value, is_null) = accum.finish(agg);
					state.common.ectx.agg_values[i] = value;
					state.common.ectx.agg_nulls[i] = is_null;
				}
				// Re-bind the last input tuple so grouping columns in
				// the target list resolve
				if let Some(values) = last_values {
					let scratch = state.common.proj.slot;
					estate.tuple_table.get_mut(scratch).store_values(values);
					state.common.ectx.scan_tuple = Some(scratch);
				}
				let common = &mut state.common;
				let (slot, _) = exec_project(&mut common.proj, &common.ectx, estate)?;
				return Ok(Some(slot));
			}
		}
	}
}

pub fn end(state: &mut AggState, estate: &mut EState) -> Result<(), Error> {
	exec_end_node(&mut state.outer, estate)?;
	estate.tuple_table.get_mut(state.common.proj.slot).clear();
	Ok(())
}

pub fn rescan(state: &mut AggState, estate: &mut EState) -> Result<(), Error> {
	exec_rescan(&mut state.outer, estate)?;
	state.done = false;
	Ok(())
}
