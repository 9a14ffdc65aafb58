use std::fmt;

/// The fixed set of scalar types the engine understands.
///
/// Attribute metadata (length, by-value, alignment, storage class) hangs
/// off the type rather than being carried per column, since the engine
/// never defines new base types at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TypeId {
	Bool,
	Char,
	Int2,
	Int4,
	Int8,
	Float4,
	Float8,
	Text,
	Varchar,
	Bytes,
	Blob,
	Timestamp,
	Array,
}

/// Alignment class of a type's on-page representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
	Char,
	Short,
	Int,
	Double,
}

/// Storage class: plain, external, compressed, or external and compressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
	Plain,
	Extended,
	Compressed,
	Both,
}

impl TypeId {
	/// Declared length in bytes; negative means variable length.
	pub fn len(&self) -> i32 {
		match self {
			Self::Bool | Self::Char => 1,
			Self::Int2 => 2,
			Self::Int4 | Self::Float4 => 4,
			Self::Int8 | Self::Float8 | Self::Timestamp => 8,
			Self::Text | Self::Varchar | Self::Bytes | Self::Blob | Self::Array => -1,
		}
	}

	/// Whether values of this type are passed by value.
	pub fn by_val(&self) -> bool {
		self.len() > 0
	}

	pub fn align(&self) -> Align {
		match self {
			Self::Bool | Self::Char => Align::Char,
			Self::Int2 => Align::Short,
			Self::Int4 | Self::Float4 | Self::Text | Self::Varchar | Self::Bytes => Align::Int,
			Self::Int8 | Self::Float8 | Self::Timestamp | Self::Blob | Self::Array => Align::Double,
		}
	}

	pub fn storage(&self) -> Storage {
		match self {
			Self::Text | Self::Varchar | Self::Bytes => Storage::Both,
			Self::Blob | Self::Array => Storage::Extended,
			_ => Storage::Plain,
		}
	}

	/// Whether a value of `self` can be delivered into an output binding
	/// declared as `link` without loss, either directly or through the
	/// fixed coercion matrix.
	///
	/// Any pair not listed here fails the transfer with a type mismatch.
	pub fn transfers_to(&self, link: TypeId) -> bool {
		if *self == link {
			return true;
		}
		matches!(
			(*self, link),
			(Self::Bool, Self::Int4)
				| (Self::Int4, Self::Bool)
				| (Self::Char, Self::Text)
				| (Self::Int2, Self::Int4)
				| (Self::Int2, Self::Int8)
				| (Self::Int4, Self::Int8)
				| (Self::Float4, Self::Float8)
				| (Self::Varchar, Self::Text)
				| (Self::Text, Self::Varchar)
				| (Self::Bytes, Self::Blob)
				| (Self::Blob, Self::Bytes)
		)
	}

	/// Whether a coercion between the two types could exist in principle,
	/// even if this engine does not implement it. Distinguishes the
	/// "conversion not implemented" failure from the hard mismatch.
	pub fn coercible_to(&self, link: TypeId) -> bool {
		if self.transfers_to(link) {
			return true;
		}
		let numeric = |t: TypeId| {
			matches!(t, Self::Int2 | Self::Int4 | Self::Int8 | Self::Float4 | Self::Float8)
		};
		let textual = |t: TypeId| matches!(t, Self::Char | Self::Text | Self::Varchar);
		(numeric(*self) && numeric(link))
			|| (textual(*self) && textual(link))
			|| (numeric(*self) && textual(link))
	}
}

impl fmt::Display for TypeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Self::Bool => "bool",
			Self::Char => "char",
			Self::Int2 => "int2",
			Self::Int4 => "int4",
			Self::Int8 => "int8",
			Self::Float4 => "float4",
			Self::Float8 => "float8",
			Self::Text => "text",
			Self::Varchar => "varchar",
			Self::Bytes => "bytes",
			Self::Blob => "blob",
			Self::Timestamp => "timestamp",
			Self::Array => "array",
		};
		f.write_str(name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn variable_length_types_are_indirect() {
		assert!(TypeId::Int4.by_val());
		assert!(!TypeId::Text.by_val());
		assert_eq!(TypeId::Text.len(), -1);
	}

	#[test]
	fn transfer_matrix() {
		assert!(TypeId::Int4.transfers_to(TypeId::Bool));
		assert!(TypeId::Float4.transfers_to(TypeId::Float8));
		assert!(!TypeId::Float8.transfers_to(TypeId::Float4));
		assert!(!TypeId::Text.transfers_to(TypeId::Int4));
		// int8 -> int4 could exist but is not implemented
		assert!(TypeId::Int8.coercible_to(TypeId::Int4));
		assert!(!TypeId::Int8.transfers_to(TypeId::Int4));
	}
}
