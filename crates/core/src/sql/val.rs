use crate::err::Error;
use crate::sql::array::Array;
use crate::sql::kind::TypeId;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Handle of an out-of-line blob in the blob heap.
pub type BlobId = u64;

/// A blob column value: either stored inline in the tuple or indirected
/// into the blob heap as a list of segments.
#[derive(Clone, Debug, PartialEq)]
pub enum Blob {
	Inline(Vec<u8>),
	Indirect {
		id: BlobId,
		length: u64,
	},
}

/// One scalar (or array, or blob) value flowing through the executor.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Char(u8),
	Int2(i16),
	Int4(i32),
	Int8(i64),
	Float4(f32),
	Float8(f64),
	Text(String),
	Bytes(Vec<u8>),
	Blob(Blob),
	Timestamp(i64),
	Array(Array),
	/// The pending output of a set-returning function. Never stored in a
	/// tuple; the projection layer drains it one element per pass.
	Set(VecDeque<Value>),
}

impl Value {
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// The type of this value, if it carries one. `Null` is typeless.
	pub fn kind(&self) -> Option<TypeId> {
		match self {
			Value::Null | Value::Set(_) => None,
			Value::Bool(_) => Some(TypeId::Bool),
			Value::Char(_) => Some(TypeId::Char),
			Value::Int2(_) => Some(TypeId::Int2),
			Value::Int4(_) => Some(TypeId::Int4),
			Value::Int8(_) => Some(TypeId::Int8),
			Value::Float4(_) => Some(TypeId::Float4),
			Value::Float8(_) => Some(TypeId::Float8),
			Value::Text(_) => Some(TypeId::Text),
			Value::Bytes(_) => Some(TypeId::Bytes),
			Value::Blob(_) => Some(TypeId::Blob),
			Value::Timestamp(_) => Some(TypeId::Timestamp),
			Value::Array(_) => Some(TypeId::Array),
		}
	}

	/// Whether this value tests true in a qualification context.
	pub fn is_true(&self) -> bool {
		matches!(self, Value::Bool(true))
	}

	/// Numeric widening used by comparison and arithmetic.
	fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Int2(v) => Some(f64::from(*v)),
			Value::Int4(v) => Some(f64::from(*v)),
			Value::Int8(v) => Some(*v as f64),
			Value::Float4(v) => Some(f64::from(*v)),
			Value::Float8(v) => Some(*v),
			_ => None,
		}
	}

	fn as_i64(&self) -> Option<i64> {
		match self {
			Value::Char(v) => Some(i64::from(*v)),
			Value::Int2(v) => Some(i64::from(*v)),
			Value::Int4(v) => Some(i64::from(*v)),
			Value::Int8(v) => Some(*v),
			_ => None,
		}
	}

	/// Total order within comparable kinds. `None` when the two values
	/// cannot be compared (including any null operand).
	pub fn compare(&self, other: &Value) -> Option<Ordering> {
		match (self, other) {
			(Value::Null, _) | (_, Value::Null) => None,
			(Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
			(Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
			(Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
			(Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
			(Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
			_ => {
				// Integer pairs compare exactly, mixed pairs through f64
				if let (Some(a), Some(b)) = (self.as_i64(), other.as_i64()) {
					return Some(a.cmp(&b));
				}
				let a = self.as_f64()?;
				let b = other.as_f64()?;
				a.partial_cmp(&b)
			}
		}
	}

	/// Equality for join keys; never true for nulls.
	pub fn datum_eq(&self, other: &Value) -> bool {
		self.compare(other) == Some(Ordering::Equal)
	}

	/// Equality for grouping and duplicate elimination, where two nulls
	/// count as the same group.
	pub fn grouping_eq(&self, other: &Value) -> bool {
		match (self.is_null(), other.is_null()) {
			(true, true) => true,
			(false, false) => self.datum_eq(other),
			_ => false,
		}
	}

	/// Feed a stable representation of this value to a hasher, so that
	/// values which compare equal hash equal across integer widths.
	pub fn hash_datum<H: Hasher>(&self, state: &mut H) {
		match self {
			Value::Null => 0u8.hash(state),
			Value::Bool(v) => v.hash(state),
			Value::Char(v) => i64::from(*v).hash(state),
			Value::Int2(v) => i64::from(*v).hash(state),
			Value::Int4(v) => i64::from(*v).hash(state),
			Value::Int8(v) => v.hash(state),
			Value::Float4(v) => f64::from(*v).to_bits().hash(state),
			Value::Float8(v) => v.to_bits().hash(state),
			Value::Text(v) => v.hash(state),
			Value::Bytes(v) => v.hash(state),
			Value::Blob(Blob::Inline(v)) => v.hash(state),
			Value::Blob(Blob::Indirect {
				id,
				..
			}) => id.hash(state),
			Value::Timestamp(v) => v.hash(state),
			Value::Array(v) => {
				for e in &v.elems {
					e.hash_datum(state);
				}
			}
			Value::Set(_) => 0u8.hash(state),
		}
	}

	/// The in-memory footprint used when budgeting hash and sort memory.
	pub fn size(&self) -> usize {
		match self {
			Value::Text(v) => std::mem::size_of::<Value>() + v.len(),
			Value::Bytes(v) | Value::Blob(Blob::Inline(v)) => {
				std::mem::size_of::<Value>() + v.len()
			}
			Value::Array(v) => {
				std::mem::size_of::<Value>() + v.elems.iter().map(Value::size).sum::<usize>()
			}
			_ => std::mem::size_of::<Value>(),
		}
	}

	pub fn try_into_bool(&self) -> Result<bool, Error> {
		match self {
			Value::Bool(v) => Ok(*v),
			other => Err(Error::Execution {
				message: format!("expected bool, found {other}"),
			}),
		}
	}

	pub fn try_into_i32(&self) -> Result<i32, Error> {
		self.as_i64()
			.and_then(|v| i32::try_from(v).ok())
			.ok_or_else(|| Error::Execution {
				message: format!("expected int4, found {self}"),
			})
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Value::Null => f.write_str("NULL"),
			Value::Bool(v) => write!(f, "{v}"),
			Value::Char(v) => write!(f, "{}", *v as char),
			Value::Int2(v) => write!(f, "{v}"),
			Value::Int4(v) => write!(f, "{v}"),
			Value::Int8(v) => write!(f, "{v}"),
			Value::Float4(v) => write!(f, "{v}"),
			Value::Float8(v) => write!(f, "{v}"),
			Value::Text(v) => f.write_str(v),
			Value::Bytes(v) => write!(f, "\\x{}", hex(v)),
			Value::Blob(Blob::Inline(v)) => write!(f, "\\x{}", hex(v)),
			Value::Blob(Blob::Indirect {
				id,
				length,
			}) => write!(f, "<blob #{id} {length}b>"),
			Value::Timestamp(v) => write!(f, "@{v}"),
			Value::Array(v) => write!(f, "{v}"),
			Value::Set(_) => f.write_str("<set>"),
		}
	}
}

fn hex(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{b:02x}")).collect()
}
