use crate::err::Error;
use crate::sql::array::{Array, ArrayDim};
use crate::sql::kind::TypeId;
use crate::sql::val::{Blob, Value};
use crate::store::buffile::BufFile;

/// Row codec for executor spill files (hash-join batches, sort runs).
/// Rows are self-describing so a spill file needs no descriptor.

fn kind_tag(kind: TypeId) -> u8 {
	match kind {
		TypeId::Bool => 1,
		TypeId::Char => 2,
		TypeId::Int2 => 3,
		TypeId::Int4 => 4,
		TypeId::Int8 => 5,
		TypeId::Float4 => 6,
		TypeId::Float8 => 7,
		TypeId::Text => 8,
		TypeId::Varchar => 9,
		TypeId::Bytes => 10,
		TypeId::Blob => 11,
		TypeId::Timestamp => 12,
		TypeId::Array => 13,
	}
}

fn tag_kind(tag: u8) -> Result<TypeId, Error> {
	Ok(match tag {
		1 => TypeId::Bool,
		2 => TypeId::Char,
		3 => TypeId::Int2,
		4 => TypeId::Int4,
		5 => TypeId::Int8,
		6 => TypeId::Float4,
		7 => TypeId::Float8,
		8 => TypeId::Text,
		9 => TypeId::Varchar,
		10 => TypeId::Bytes,
		11 => TypeId::Blob,
		12 => TypeId::Timestamp,
		13 => TypeId::Array,
		other => {
			return Err(Error::Execution {
				message: format!("corrupt spill file; unknown type tag {other}"),
			})
		}
	})
}

fn write_value(file: &mut BufFile, value: &Value) -> Result<(), Error> {
	match value {
		Value::Null => file.write(&[0u8]),
		Value::Bool(v) => {
			file.write(&[kind_tag(TypeId::Bool), u8::from(*v)])
		}
		Value::Char(v) => file.write(&[kind_tag(TypeId::Char), *v]),
		Value::Int2(v) => {
			file.write(&[kind_tag(TypeId::Int2)])?;
			file.write(&v.to_le_bytes())
		}
		Value::Int4(v) => {
			file.write(&[kind_tag(TypeId::Int4)])?;
			file.write(&v.to_le_bytes())
		}
		Value::Int8(v) => {
			file.write(&[kind_tag(TypeId::Int8)])?;
			file.write(&v.to_le_bytes())
		}
		Value::Float4(v) => {
			file.write(&[kind_tag(TypeId::Float4)])?;
			file.write(&v.to_le_bytes())
		}
		Value::Float8(v) => {
			file.write(&[kind_tag(TypeId::Float8)])?;
			file.write(&v.to_le_bytes())
		}
		Value::Timestamp(v) => {
			file.write(&[kind_tag(TypeId::Timestamp)])?;
			file.write(&v.to_le_bytes())
		}
		Value::Text(v) => {
			file.write(&[kind_tag(TypeId::Text)])?;
			write_bytes(file, v.as_bytes())
		}
		Value::Bytes(v) => {
			file.write(&[kind_tag(TypeId::Bytes)])?;
			write_bytes(file, v)
		}
		Value::Blob(Blob::Inline(v)) => {
			file.write(&[kind_tag(TypeId::Blob), 0])?;
			write_bytes(file, v)
		}
		Value::Blob(Blob::Indirect {
			id,
			length,
		}) => {
			file.write(&[kind_tag(TypeId::Blob), 1])?;
			file.write(&id.to_le_bytes())?;
			file.write(&length.to_le_bytes())
		}
		Value::Array(a) => {
			file.write(&[kind_tag(TypeId::Array), kind_tag(a.elem)])?;
			file.write(&(a.dims.len() as u32).to_le_bytes())?;
			for dim in &a.dims {
				file.write(&dim.lower.to_le_bytes())?;
				file.write(&(dim.len as u32).to_le_bytes())?;
			}
			file.write(&(a.elems.len() as u32).to_le_bytes())?;
			for elem in &a.elems {
				write_value(file, elem)?;
			}
			Ok(())
		}
		Value::Set(_) => Err(Error::Execution {
			message: "set values cannot be spilled".to_owned(),
		}),
	}
}

fn write_bytes(file: &mut BufFile, data: &[u8]) -> Result<(), Error> {
	file.write(&(data.len() as u32).to_le_bytes())?;
	file.write(data)
}

fn read_exact(file: &mut BufFile, out: &mut [u8]) -> Result<(), Error> {
	let n = file.read(out)?;
	if n != out.len() {
		return Err(Error::Execution {
			message: "corrupt spill file; unexpected end of data".to_owned(),
		});
	}
	Ok(())
}

fn read_bytes(file: &mut BufFile) -> Result<Vec<u8>, Error> {
	let mut len = [0u8; 4];
	read_exact(file, &mut len)?;
	let mut out = vec![0u8; u32::from_le_bytes(len) as usize];
	read_exact(file, &mut out)?;
	Ok(out)
}

fn read_value(file: &mut BufFile) -> Result<Value, Error> {
	let mut tag = [0u8; 1];
	read_exact(file, &mut tag)?;
	if tag[0] == 0 {
		return Ok(Value::Null);
	}
	Ok(match tag_kind(tag[0])? {
		TypeId::Bool => {
			let mut b = [0u8; 1];
			read_exact(file, &mut b)?;
			Value::Bool(b[0] != 0)
		}
		TypeId::Char => {
			let mut b = [0u8; 1];
			read_exact(file, &mut b)?;
			Value::Char(b[0])
		}
		TypeId::Int2 => {
			let mut b = [0u8; 2];
			read_exact(file, &mut b)?;
			Value::Int2(i16::from_le_bytes(b))
		}
		TypeId::Int4 => {
			let mut b = [0u8; 4];
			read_exact(file, &mut b)?;
			Value::Int4(i32::from_le_bytes(b))
		}
		TypeId::Int8 => {
			let mut b = [0u8; 8];
			read_exact(file, &mut b)?;
			Value::Int8(i64::from_le_bytes(b))
		}
		TypeId::Float4 => {
			let mut b = [0u8; 4];
			read_exact(file, &mut b)?;
			Value::Float4(f32::from_le_bytes(b))
		}
		TypeId::Float8 => {
			let mut b = [0u8; 8];
			read_exact(file, &mut b)?;
			Value::Float8(f64::from_le_bytes(b))
		}
		TypeId::Timestamp => {
			let mut b = [0u8; 8];
			read_exact(file, &mut b)?;
			Value::Timestamp(i64::from_le_bytes(b))
		}
		TypeId::Text | TypeId::Varchar => {
			let bytes = read_bytes(file)?;
			Value::Text(String::from_utf8(bytes).map_err(|_| Error::Execution {
				message: "corrupt spill file; invalid utf8".to_owned(),
			})?)
		}
		TypeId::Bytes => Value::Bytes(read_bytes(file)?),
		TypeId::Blob => {
			let mut form = [0u8; 1];
			read_exact(file, &mut form)?;
			if form[0] == 0 {
				Value::Blob(Blob::Inline(read_bytes(file)?))
			} else {
				let mut id = [0u8; 8];
				read_exact(file, &mut id)?;
				let mut length = [0u8; 8];
				read_exact(file, &mut length)?;
				Value::Blob(Blob::Indirect {
					id: u64::from_le_bytes(id),
					length: u64::from_le_bytes(length),
				})
			}
		}
		TypeId::Array => {
			let mut elem = [0u8; 1];
			read_exact(file, &mut elem)?;
			let elem = tag_kind(elem[0])?;
			let mut n = [0u8; 4];
			read_exact(file, &mut n)?;
			let ndims = u32::from_le_bytes(n) as usize;
			let mut dims = Vec::with_capacity(ndims);
			for _ in 0..ndims {
				let mut lower = [0u8; 4];
				read_exact(file, &mut lower)?;
				let mut len = [0u8; 4];
				read_exact(file, &mut len)?;
				dims.push(ArrayDim {
					lower: i32::from_le_bytes(lower),
					len: u32::from_le_bytes(len) as usize,
				});
			}
			read_exact(file, &mut n)?;
			let nelems = u32::from_le_bytes(n) as usize;
			let mut elems = Vec::with_capacity(nelems);
			for _ in 0..nelems {
				elems.push(read_value(file)?);
			}
			Value::Array(Array {
				elem,
				dims,
				elems,
			})
		}
	})
}

/// Append one row to a spill file.
pub fn write_row(file: &mut BufFile, values: &[Value]) -> Result<(), Error> {
	file.write(&(values.len() as u32).to_le_bytes())?;
	for value in values {
		write_value(file, value)?;
	}
	Ok(())
}

/// Read the next row, or `None` at end of file.
pub fn read_row(file: &mut BufFile) -> Result<Option<Vec<Value>>, Error> {
	let mut len = [0u8; 4];
	let n = file.read(&mut len)?;
	if n == 0 {
		return Ok(None);
	}
	if n != 4 {
		return Err(Error::Execution {
			message: "corrupt spill file; truncated row header".to_owned(),
		});
	}
	let count = u32::from_le_bytes(len) as usize;
	let mut values = Vec::with_capacity(count);
	for _ in 0..count {
		values.push(read_value(file)?);
	}
	Ok(Some(values))
}
