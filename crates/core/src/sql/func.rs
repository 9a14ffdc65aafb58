use crate::err::Error;
use crate::sql::expr::OperId;
use crate::sql::kind::TypeId;
use crate::sql::val::Value;
use std::cmp::Ordering;

/// The call boundary for functions implemented in a foreign language
/// runtime. The engine ships no implementation; embedders install one on
/// the database when they host such a runtime.
pub trait ForeignBridge: Send + Sync {
	/// Invoke `name` with a type-tagged argument array. Exceptions in the
	/// foreign runtime must be mapped onto [`Error`] by the bridge.
	fn call(&self, name: &str, args: &[(TypeId, Value)]) -> Result<Value, Error>;
}

/// Evaluate a built-in operator over already-evaluated operands.
///
/// Operand nulls are handled by the caller (strict-operator rule): this
/// function is never called with a null argument.
pub fn eval_oper(op: OperId, args: &[Value]) -> Result<Value, Error> {
	let arity = if op == OperId::Neg {
		1
	} else {
		2
	};
	if args.len() != arity {
		return Err(bad_operands(op, args));
	}
	match op {
		OperId::Neg => match args {
			[Value::Int2(v)] => Ok(Value::Int2(-v)),
			[Value::Int4(v)] => Ok(Value::Int4(-v)),
			[Value::Int8(v)] => Ok(Value::Int8(-v)),
			[Value::Float4(v)] => Ok(Value::Float4(-v)),
			[Value::Float8(v)] => Ok(Value::Float8(-v)),
			_ => Err(bad_operands(op, args)),
		},
		OperId::Add | OperId::Sub | OperId::Mul | OperId::Div | OperId::Mod => {
			arith(op, &args[0], &args[1])
		}
		OperId::Eq | OperId::Ne | OperId::Lt | OperId::Le | OperId::Gt | OperId::Ge => {
			let ord = args[0].compare(&args[1]).ok_or_else(|| bad_operands(op, args))?;
			let res = match op {
				OperId::Eq => ord == Ordering::Equal,
				OperId::Ne => ord != Ordering::Equal,
				OperId::Lt => ord == Ordering::Less,
				OperId::Le => ord != Ordering::Greater,
				OperId::Gt => ord == Ordering::Greater,
				OperId::Ge => ord != Ordering::Less,
				_ => unreachable!(),
			};
			Ok(Value::Bool(res))
		}
		OperId::Concat => match (&args[0], &args[1]) {
			(Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
			_ => Err(bad_operands(op, args)),
		},
		OperId::Like => match (&args[0], &args[1]) {
			(Value::Text(s), Value::Text(p)) => Ok(Value::Bool(like(s, p))),
			_ => Err(bad_operands(op, args)),
		},
	}
}

fn arith(op: OperId, lhs: &Value, rhs: &Value) -> Result<Value, Error> {
	// Integer pairs stay exact, anything involving a float widens to f64
	match (lhs, rhs) {
		(Value::Float4(_) | Value::Float8(_), _) | (_, Value::Float4(_) | Value::Float8(_)) => {
			let a = to_f64(lhs).ok_or_else(|| bad_operands(op, &[lhs.clone(), rhs.clone()]))?;
			let b = to_f64(rhs).ok_or_else(|| bad_operands(op, &[lhs.clone(), rhs.clone()]))?;
			let out = match op {
				OperId::Add => a + b,
				OperId::Sub => a - b,
				OperId::Mul => a * b,
				OperId::Div => {
					if b == 0.0 {
						return Err(Error::DivisionByZero);
					}
					a / b
				}
				OperId::Mod => {
					if b == 0.0 {
						return Err(Error::DivisionByZero);
					}
					a % b
				}
				_ => unreachable!(),
			};
			Ok(Value::Float8(out))
		}
		_ => {
			let a = to_i64(lhs).ok_or_else(|| bad_operands(op, &[lhs.clone(), rhs.clone()]))?;
			let b = to_i64(rhs).ok_or_else(|| bad_operands(op, &[lhs.clone(), rhs.clone()]))?;
			let out = match op {
				OperId::Add => a.checked_add(b),
				OperId::Sub => a.checked_sub(b),
				OperId::Mul => a.checked_mul(b),
				OperId::Div => {
					if b == 0 {
						return Err(Error::DivisionByZero);
					}
					a.checked_div(b)
				}
				OperId::Mod => {
					if b == 0 {
						return Err(Error::DivisionByZero);
					}
					a.checked_rem(b)
				}
				_ => unreachable!(),
			};
			let out = out.ok_or(Error::NumericOverflow)?;
			// Keep the narrower integer width when both inputs fit it
			match (lhs, rhs) {
				(Value::Int8(_), _) | (_, Value::Int8(_)) => Ok(Value::Int8(out)),
				_ => i32::try_from(out).map(Value::Int4).map_err(|_| Error::NumericOverflow),
			}
		}
	}
}

fn to_f64(v: &Value) -> Option<f64> {
	match v {
		Value::Int2(v) => Some(f64::from(*v)),
		Value::Int4(v) => Some(f64::from(*v)),
		Value::Int8(v) => Some(*v as f64),
		Value::Float4(v) => Some(f64::from(*v)),
		Value::Float8(v) => Some(*v),
		_ => None,
	}
}

fn to_i64(v: &Value) -> Option<i64> {
	match v {
		Value::Int2(v) => Some(i64::from(*v)),
		Value::Int4(v) => Some(i64::from(*v)),
		Value::Int8(v) => Some(*v),
		_ => None,
	}
}

fn bad_operands(op: OperId, args: &[Value]) -> Error {
	Error::Execution {
		message: format!("operator {op:?} undefined for operands {args:?}"),
	}
}

/// SQL LIKE with `%` and `_` wildcards, no escape support.
fn like(s: &str, p: &str) -> bool {
	fn rec(s: &[char], p: &[char]) -> bool {
		match p.first() {
			None => s.is_empty(),
			Some('%') => (0..=s.len()).any(|i| rec(&s[i..], &p[1..])),
			Some('_') => !s.is_empty() && rec(&s[1..], &p[1..]),
			Some(c) => s.first() == Some(c) && rec(&s[1..], &p[1..]),
		}
	}
	let s: Vec<char> = s.chars().collect();
	let p: Vec<char> = p.chars().collect();
	rec(&s, &p)
}

/// Whether `name` resolves to a native function.
pub fn is_native(name: &str) -> bool {
	matches!(name, "abs" | "upper" | "lower" | "length" | "coalesce" | "nullif" | "sqrt")
}

/// Evaluate a native function over already-evaluated arguments. Unlike
/// operators, native functions see their nulls (coalesce needs them).
pub fn eval_native(name: &str, args: &[Value]) -> Result<Value, Error> {
	match name {
		"abs" => match args {
			[Value::Int4(v)] => Ok(Value::Int4(v.abs())),
			[Value::Int8(v)] => Ok(Value::Int8(v.abs())),
			[Value::Float8(v)] => Ok(Value::Float8(v.abs())),
			[Value::Null] => Ok(Value::Null),
			_ => Err(bad_args(name, args)),
		},
		"upper" => match args {
			[Value::Text(v)] => Ok(Value::Text(v.to_uppercase())),
			[Value::Null] => Ok(Value::Null),
			_ => Err(bad_args(name, args)),
		},
		"lower" => match args {
			[Value::Text(v)] => Ok(Value::Text(v.to_lowercase())),
			[Value::Null] => Ok(Value::Null),
			_ => Err(bad_args(name, args)),
		},
		"length" => match args {
			[Value::Text(v)] => Ok(Value::Int4(v.chars().count() as i32)),
			[Value::Bytes(v)] => Ok(Value::Int4(v.len() as i32)),
			[Value::Null] => Ok(Value::Null),
			_ => Err(bad_args(name, args)),
		},
		"coalesce" => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
		"nullif" => match args {
			[a, b] => {
				if a.datum_eq(b) {
					Ok(Value::Null)
				} else {
					Ok(a.clone())
				}
			}
			_ => Err(bad_args(name, args)),
		},
		"sqrt" => match args {
			[v] if !v.is_null() => {
				let f = to_f64(v).ok_or_else(|| bad_args(name, args))?;
				Ok(Value::Float8(f.sqrt()))
			}
			[Value::Null] => Ok(Value::Null),
			_ => Err(bad_args(name, args)),
		},
		_ => Err(Error::UnsupportedFunction {
			name: name.to_owned(),
		}),
	}
}

fn bad_args(name: &str, args: &[Value]) -> Error {
	Error::Execution {
		message: format!("function {name} undefined for arguments {args:?}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn integer_arithmetic_stays_exact() {
		assert_eq!(eval_oper(OperId::Add, &[Value::Int4(1), Value::Int4(1)]).unwrap(), Value::Int4(2));
		assert!(matches!(
			eval_oper(OperId::Div, &[Value::Int4(1), Value::Int4(0)]),
			Err(Error::DivisionByZero)
		));
		assert!(matches!(
			eval_oper(OperId::Mul, &[Value::Int8(i64::MAX), Value::Int8(2)]),
			Err(Error::NumericOverflow)
		));
	}

	#[test]
	fn like_wildcards() {
		assert!(like("weaving", "w%ing"));
		assert!(like("abc", "a_c"));
		assert!(!like("abc", "a_d"));
	}

	#[test]
	fn coalesce_sees_nulls() {
		let v = eval_native("coalesce", &[Value::Null, Value::Int4(3)]).unwrap();
		assert_eq!(v, Value::Int4(3));
	}
}
