use crate::err::Error;
use crate::sql::kind::{Align, Storage, TypeId};
use crate::sql::val::Value;
use crate::store::snapshot::{CommandId, XactId};
use crate::store::Oid;
use std::fmt;
use std::sync::Arc;

/// Physical location of a tuple: heap block number plus line offset
/// within the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemPointer {
	pub block: u32,
	pub offset: u16,
}

impl ItemPointer {
	pub fn new(block: u32, offset: u16) -> Self {
		Self {
			block,
			offset,
		}
	}

	/// Pack into an int8 datum for tid-valued expressions.
	pub fn to_datum(self) -> Value {
		Value::Int8((i64::from(self.block) << 16) | i64::from(self.offset))
	}

	/// Unpack from an int8 datum produced by [`ItemPointer::to_datum`].
	pub fn from_datum(v: &Value) -> Result<Self, Error> {
		match v {
			Value::Int8(raw) => Ok(Self {
				block: (raw >> 16) as u32,
				offset: (raw & 0xffff) as u16,
			}),
			other => Err(Error::Execution {
				message: format!("expected tid datum, found {other}"),
			}),
		}
	}
}

impl fmt::Display for ItemPointer {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "({},{})", self.block, self.offset)
	}
}

/// Metadata of one attribute of a relation.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
	pub name: String,
	pub kind: TypeId,
	/// Type modifier (declared length of varchar and the like); -1 when
	/// unused.
	pub typmod: i32,
	pub not_null: bool,
}

impl Attribute {
	pub fn new(name: &str, kind: TypeId) -> Self {
		Self {
			name: name.to_owned(),
			kind,
			typmod: -1,
			not_null: false,
		}
	}

	pub fn len(&self) -> i32 {
		self.kind.len()
	}

	pub fn by_val(&self) -> bool {
		self.kind.by_val()
	}

	pub fn align(&self) -> Align {
		self.kind.align()
	}

	pub fn storage(&self) -> Storage {
		self.kind.storage()
	}
}

/// An ordered, immutable sequence of attribute metadata. Cheap to clone;
/// one descriptor is shared by every tuple of a relation version.
#[derive(Clone, Debug, PartialEq)]
pub struct TupleDesc(Arc<Vec<Attribute>>);

impl TupleDesc {
	pub fn new(attrs: Vec<Attribute>) -> Self {
		Self(Arc::new(attrs))
	}

	pub fn natts(&self) -> usize {
		self.0.len()
	}

	/// Attribute by 1-based number.
	pub fn attr(&self, attno: usize) -> Result<&Attribute, Error> {
		self.0.get(attno.wrapping_sub(1)).ok_or(Error::NoSuchAttribute {
			position: attno,
		})
	}

	pub fn attrs(&self) -> &[Attribute] {
		&self.0
	}

	/// 1-based attribute number for a name, if present.
	pub fn attno(&self, name: &str) -> Option<usize> {
		self.0.iter().position(|a| a.name == name).map(|i| i + 1)
	}
}

/// One heap tuple: row values plus the transaction visibility header.
#[derive(Clone, Debug)]
pub struct HeapTuple {
	pub tid: ItemPointer,
	/// Row object id assigned at insert.
	pub oid: Oid,
	pub xmin: XactId,
	pub cmin: CommandId,
	pub xmax: Option<XactId>,
	pub cmax: Option<CommandId>,
	/// Forward link to the replacing version after an update.
	pub link: Option<ItemPointer>,
	pub values: Vec<Value>,
}

impl HeapTuple {
	/// Attribute value by 1-based number, with a null flag.
	pub fn attr(&self, attno: usize) -> Result<&Value, Error> {
		self.values.get(attno.wrapping_sub(1)).ok_or(Error::NoSuchAttribute {
			position: attno,
		})
	}

	pub fn natts(&self) -> usize {
		self.values.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tid_datum_round_trip() {
		let tid = ItemPointer::new(71, 12);
		let back = ItemPointer::from_datum(&tid.to_datum()).unwrap();
		assert_eq!(tid, back);
	}

	#[test]
	fn descriptor_lookup_is_one_based() {
		let desc = TupleDesc::new(vec![
			Attribute::new("id", TypeId::Int4),
			Attribute::new("name", TypeId::Text),
		]);
		assert_eq!(desc.attr(1).unwrap().name, "id");
		assert_eq!(desc.attno("name"), Some(2));
		assert!(desc.attr(3).is_err());
		assert!(desc.attr(0).is_err());
	}
}
