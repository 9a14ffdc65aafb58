use crate::plan::{PlanNode, PlannedStatement};
use std::fmt::Write;

/// Render a cost-annotated text dump of a planned statement's tree.
pub fn explain_statement(stmt: &PlannedStatement) -> String {
	let mut out = String::new();
	if let Some(plan) = &stmt.plan {
		explain_node(plan, stmt, 0, &mut out);
	}
	out
}

fn explain_node(plan: &PlanNode, stmt: &PlannedStatement, indent: usize, out: &mut String) {
	let common = plan.common();
	if indent > 0 {
		for _ in 0..indent {
			out.push_str("  ");
		}
		out.push_str("->  ");
	}
	out.push_str(plan.name());
	// Scans name the relation they walk; index scans the index too
	match plan {
		PlanNode::SeqScan {
			scanrelid,
			..
		}
		| PlanNode::DelegatedSeqScan {
			scanrelid,
			..
		}
		| PlanNode::TidScan {
			scanrelid,
			..
		} => {
			if let Some(rte) = stmt.range_table.get(scanrelid - 1) {
				let _ = write!(out, " on {}", rte.relname);
			}
		}
		PlanNode::IndexScan {
			scanrelid,
			indices,
			..
		} => {
			let _ = write!(out, " using {}", indices.join(", "));
			if let Some(rte) = stmt.range_table.get(scanrelid - 1) {
				let _ = write!(out, " on {}", rte.relname);
			}
		}
		PlanNode::DelegatedIndexScan {
			scanrelid,
			index,
			..
		} => {
			let _ = write!(out, " using {index}");
			if let Some(rte) = stmt.range_table.get(scanrelid - 1) {
				let _ = write!(out, " on {}", rte.relname);
			}
		}
		_ => {}
	}
	let _ = write!(
		out,
		"  (cost={:.2}..{:.2} rows={:.0} width={})\n",
		common.cost.startup, common.cost.total, common.cost.rows, common.cost.width
	);
	if let Some(left) = &common.lefttree {
		explain_node(left, stmt, indent + 1, out);
	}
	if let Some(right) = &common.righttree {
		explain_node(right, stmt, indent + 1, out);
	}
	if let PlanNode::Append {
		plans,
		..
	} = plan
	{
		for member in plans {
			explain_node(member, stmt, indent + 1, out);
		}
	}
	for sp in common.init_plans.iter().chain(common.sub_plans.iter()) {
		for _ in 0..indent + 1 {
			out.push_str("  ");
		}
		let _ = writeln!(out, "InitPlan (id={})", sp.plan_id);
		explain_node(&sp.plan, stmt, indent + 2, out);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::{CommandType, Cost, PlanCommon, RangeTableEntry};
	use crate::sql::expr::{Expr, Target};

	#[test]
	fn dump_shape() {
		let stmt = PlannedStatement {
			command: CommandType::Select,
			plan: Some(PlanNode::Sort {
				common: PlanCommon {
					cost: Cost {
						startup: 10.0,
						total: 12.5,
						rows: 100.0,
						width: 8,
					},
					lefttree: Some(Box::new(PlanNode::SeqScan {
						common: PlanCommon {
							targetlist: vec![Target::new("a", Expr::column(1))],
							..PlanCommon::default()
						},
						scanrelid: 1,
					})),
					..PlanCommon::default()
				},
				keys: vec![],
			}),
			range_table: vec![RangeTableEntry {
				relname: "t".to_owned(),
				relid: 1,
			}],
			result_relation: None,
			utility: None,
			n_param_exec: 0,
		};
		let text = explain_statement(&stmt);
		assert!(text.starts_with("Sort  (cost=10.00..12.50 rows=100 width=8)"));
		assert!(text.contains("->  Seq Scan on t"));
	}
}
