use crate::err::Error;
use crate::sql::kind::TypeId;
use crate::sql::val::Value;
use std::fmt;

/// One dimension of an array: its lower bound and extent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayDim {
	pub lower: i32,
	pub len: usize,
}

/// An N-dimensional array value. Elements are stored flat in row-major
/// order. All mutating operations return a fresh array, leaving the input
/// untouched, so that expression evaluation stays pure.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
	pub elem: TypeId,
	pub dims: Vec<ArrayDim>,
	pub elems: Vec<Value>,
}

impl Array {
	/// Build a one-dimensional array with lower bound 1.
	pub fn list(elem: TypeId, elems: Vec<Value>) -> Self {
		let dims = vec![ArrayDim {
			lower: 1,
			len: elems.len(),
		}];
		Self {
			elem,
			dims,
			elems,
		}
	}

	pub fn ndims(&self) -> usize {
		self.dims.len()
	}

	/// Flat offset of a full subscript vector, or an error when any
	/// subscript falls outside its dimension.
	fn offset(&self, indices: &[i32]) -> Result<usize, Error> {
		if indices.len() != self.dims.len() {
			return Err(Error::ArraySubscript);
		}
		let mut off = 0usize;
		for (idx, dim) in indices.iter().zip(self.dims.iter()) {
			let rel = idx - dim.lower;
			if rel < 0 || rel as usize >= dim.len {
				return Err(Error::ArraySubscript);
			}
			off = off * dim.len + rel as usize;
		}
		Ok(off)
	}

	/// Read one element.
	pub fn element(&self, indices: &[i32]) -> Result<Value, Error> {
		Ok(self.elems[self.offset(indices)?].clone())
	}

	/// Copy out the sub-array between `lower` and `upper` inclusive.
	pub fn clip(&self, lower: &[i32], upper: &[i32]) -> Result<Array, Error> {
		if lower.len() != self.dims.len() || upper.len() != self.dims.len() {
			return Err(Error::ArraySubscript);
		}
		let mut dims = Vec::with_capacity(self.dims.len());
		for ((lo, up), dim) in lower.iter().zip(upper.iter()).zip(self.dims.iter()) {
			if up < lo {
				return Err(Error::ArraySubscript);
			}
			if lo - dim.lower < 0 || (up - dim.lower) as usize >= dim.len {
				return Err(Error::ArraySubscript);
			}
			dims.push(ArrayDim {
				lower: 1,
				len: (up - lo + 1) as usize,
			});
		}
		let mut out = Array {
			elem: self.elem,
			dims,
			elems: Vec::new(),
		};
		let mut cursor = lower.to_vec();
		loop {
			out.elems.push(self.elems[self.offset(&cursor)?].clone());
			// Advance the subscript vector, innermost dimension first
			let mut d = cursor.len();
			loop {
				if d == 0 {
					return Ok(out);
				}
				d -= 1;
				cursor[d] += 1;
				if cursor[d] <= upper[d] {
					break;
				}
				cursor[d] = lower[d];
			}
		}
	}

	/// Return a new array with one element replaced.
	pub fn with_element(&self, indices: &[i32], value: Value) -> Result<Array, Error> {
		let off = self.offset(indices)?;
		let mut out = self.clone();
		out.elems[off] = value;
		Ok(out)
	}

	/// Return a new array with the given sub-array overwritten.
	pub fn with_clip(&self, lower: &[i32], upper: &[i32], source: &Array) -> Result<Array, Error> {
		let mut out = self.clone();
		let mut cursor = lower.to_vec();
		let mut src = source.elems.iter();
		loop {
			let off = out.offset(&cursor)?;
			out.elems[off] = src.next().ok_or(Error::ArraySubscript)?.clone();
			let mut d = cursor.len();
			loop {
				if d == 0 {
					return Ok(out);
				}
				d -= 1;
				cursor[d] += 1;
				if cursor[d] <= upper[d] {
					break;
				}
				cursor[d] = lower[d];
			}
		}
	}
}

impl fmt::Display for Array {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("{")?;
		for (i, e) in self.elems.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}
			write!(f, "{e}")?;
		}
		f.write_str("}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> Array {
		// 2 x 3 matrix, lower bounds 1
		Array {
			elem: TypeId::Int4,
			dims: vec![
				ArrayDim {
					lower: 1,
					len: 2,
				},
				ArrayDim {
					lower: 1,
					len: 3,
				},
			],
			elems: (1..=6).map(Value::Int4).collect(),
		}
	}

	#[test]
	fn element_access_is_row_major() {
		let a = sample();
		assert_eq!(a.element(&[1, 1]).unwrap(), Value::Int4(1));
		assert_eq!(a.element(&[2, 3]).unwrap(), Value::Int4(6));
		assert!(a.element(&[3, 1]).is_err());
	}

	#[test]
	fn clip_copies_a_rectangle() {
		let a = sample();
		let c = a.clip(&[1, 2], &[2, 3]).unwrap();
		assert_eq!(c.dims[0].len, 2);
		assert_eq!(c.dims[1].len, 2);
		assert_eq!(
			c.elems,
			vec![Value::Int4(2), Value::Int4(3), Value::Int4(5), Value::Int4(6)]
		);
	}

	#[test]
	fn assignment_is_pure() {
		let a = sample();
		let b = a.with_element(&[1, 1], Value::Int4(99)).unwrap();
		assert_eq!(a.element(&[1, 1]).unwrap(), Value::Int4(1));
		assert_eq!(b.element(&[1, 1]).unwrap(), Value::Int4(99));
	}
}
