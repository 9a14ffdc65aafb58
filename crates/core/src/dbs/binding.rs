use crate::err::Error;
use crate::sql::kind::TypeId;
use crate::sql::val::Value;

/// One input binding: a named or positional parameter slot declared by
/// the caller. A binding that was declared but never given a value is
/// "unset", and using it in an execution raises an error.
#[derive(Clone, Debug)]
pub struct InputBinding {
	pub name: String,
	/// 1-based binding position.
	pub index: usize,
	pub kind: TypeId,
	pub value: Value,
	pub is_set: bool,
}

/// What happened to one output column during a fetch, as seen through a
/// registered transfer callback.
pub enum TransferEvent<'a> {
	/// A complete non-null value.
	Value {
		kind: TypeId,
		data: &'a [u8],
	},
	/// The column was null.
	Null {
		kind: TypeId,
	},
	/// One chunk of a streamed blob.
	Chunk {
		kind: TypeId,
		data: &'a [u8],
	},
	/// Streaming of the current column finished.
	Close,
}

/// Caller-registered sink of one output column.
pub enum OutputSink {
	/// Deliver into an owned slot of declared size.
	Slot(OutputSlot),
	/// Deliver through a callback, chunked for streamed blobs.
	Registered(Box<dyn FnMut(TransferEvent) -> Result<(), Error> + Send>),
}

/// An output slot: the landing area of one column value. Values within
/// the declared size land in `data`; larger values are kept whole and
/// flagged, mirroring the overflow-allocation behavior callers rely on.
pub struct OutputSlot {
	pub kind: TypeId,
	pub declared_size: usize,
	pub data: Vec<u8>,
	pub overflowed: bool,
	/// Not-null indicator: 1 when a value arrived, 0 for null.
	pub not_null: i16,
	/// Length of the transferred value in bytes.
	pub length: i32,
	/// The typed value, for embedders that prefer it over raw bytes.
	pub value: Value,
}

impl OutputSlot {
	pub fn new(kind: TypeId, declared_size: usize) -> Self {
		Self {
			kind,
			declared_size,
			data: Vec::new(),
			overflowed: false,
			not_null: 0,
			length: 0,
			value: Value::Null,
		}
	}

	pub fn is_null(&self) -> bool {
		self.not_null == 0
	}
}

/// One registered output binding.
pub struct OutputBinding {
	/// 1-based output column position.
	pub index: usize,
	pub sink: OutputSink,
}
