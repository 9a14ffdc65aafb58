use crate::err::Error;
use crate::exe::node::NodeState;
use crate::exe::state::EState;
use crate::exe::executor_end;
use crate::plan::{CommandType, PlannedStatement};
use crate::store::tuple::TupleDesc;

/// The executable description of the statement currently open for
/// fetching.
pub struct QueryDesc {
	pub command: CommandType,
	pub stmt: PlannedStatement,
}

/// A parsed and planned statement together with its executor state.
///
/// The plan owns the whole execution: the planned trees, the live node
/// tree and executor state of the open cursor, and the output
/// descriptor fetches transfer from.
pub struct PreparedPlan {
	pub statement: String,
	pub statements: Vec<PlannedStatement>,
	pub qdesc: Option<QueryDesc>,
	pub node: Option<NodeState>,
	pub estate: Option<EState>,
	pub desc: Option<TupleDesc>,
	pub processed: u64,
}

impl PreparedPlan {
	pub fn new(statement: &str, statements: Vec<PlannedStatement>) -> Self {
		Self {
			statement: statement.to_owned(),
			statements,
			qdesc: None,
			node: None,
			estate: None,
			desc: None,
			processed: 0,
		}
	}

	/// Shut down the live executor, releasing its scans, pins and
	/// subplans. The planned trees stay usable.
	pub fn reset_executor(&mut self) -> Result<(), Error> {
		if let (Some(node), Some(estate)) = (self.node.as_mut(), self.estate.as_mut()) {
			executor_end(node, estate)?;
		}
		self.node = None;
		self.estate = None;
		self.qdesc = None;
		Ok(())
	}

	/// Whether a cursor is open to fetch from.
	pub fn has_cursor(&self) -> bool {
		self.node.is_some() && self.estate.is_some()
	}
}
