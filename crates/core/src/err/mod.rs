use thiserror::Error;

/// The error type for every fallible engine operation.
///
/// Numeric codes and the short state tags are part of the embedding
/// contract and are kept stable for compatibility with existing callers;
/// see [`Error::code`] and [`Error::state`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The connection could not be established
	#[error("unsuccessful connection; {message}")]
	ConnectionFailed {
		message: String,
	},

	/// A binding position fell outside the valid range
	#[error("bad value; binding index must be greater than 0 and no more than {max}")]
	ArgumentOutOfRange {
		max: usize,
	},

	/// A bound value was larger than its declared slot
	#[error("binary truncation on input")]
	BinaryTruncation,

	/// An output binding referenced a column that does not exist
	#[error("no attribute at output position {position}")]
	NoSuchAttribute {
		position: usize,
	},

	/// The types are compatible but the conversion is not implemented
	#[error("types are compatible but conversion not implemented; link type {link} column type {column}")]
	TypeCoercion {
		link: String,
		column: String,
	},

	/// The output binding type is incompatible with the column type
	#[error("types do not match, no type conversion; position {position} link type {link} column type {column}")]
	TypeMismatch {
		position: usize,
		link: String,
		column: String,
	},

	/// No output function exists for the column type
	#[error("no output function for type {kind}")]
	TypeConversion {
		kind: String,
	},

	/// The call was made from a thread that does not own the transaction
	#[error("transaction is owned by another thread, cannot make call from this context")]
	ContextOwnership,

	/// The call is out of order for the current statement stage
	#[error("context not valid, check call sequence; {message}")]
	ContextValid {
		message: String,
	},

	/// The statement text exceeds the maximum length
	#[error("statement is longer than the {max} character max", max = crate::cnf::MAX_STATEMENT_LENGTH)]
	StatementTooLong,

	/// The statement was cancelled from another thread
	#[error("query cancelled")]
	Cancelled,

	/// The connection is in abort-only mode until rolled back
	#[error("transaction in abort only mode")]
	AbortOnly,

	/// A user lock could not be acquired or released
	#[error("user lock operation failed; {message}")]
	UserLock {
		message: String,
	},

	/// The user lock group does not name a known relation
	#[error("user lock failed; no relation for group {group}")]
	UserLockGroup {
		group: String,
	},

	/// Fetch was called after the end of data was already reached
	#[error("end of data already reached")]
	EndOfData,

	/// The supplied password does not match
	#[error("user password does not match")]
	AuthPassword,

	/// The user is not known to the database
	#[error("user does not exist")]
	AuthUnknownUser,

	/// The external planner could not produce a plan
	#[error("planning failed; {message}")]
	Planner {
		message: String,
	},

	/// The named relation does not exist
	#[error("relation '{name}' does not exist")]
	RelationNotFound {
		name: String,
	},

	/// The named relation already exists
	#[error("relation '{name}' already exists")]
	RelationExists {
		name: String,
	},

	/// The named index does not exist
	#[error("index '{name}' does not exist")]
	IndexNotFound {
		name: String,
	},

	/// A function call could not be routed to an implementation
	#[error("function '{name}' is not supported")]
	UnsupportedFunction {
		name: String,
	},

	/// Integer or floating point division by zero
	#[error("division by zero")]
	DivisionByZero,

	/// An arithmetic result did not fit its type
	#[error("numeric value out of range")]
	NumericOverflow,

	/// An array subscript fell outside the array bounds
	#[error("array subscript out of range")]
	ArraySubscript,

	/// The cursor's plan cannot be walked backwards
	#[error("cursor is not scrollable; no materialized node above the scan")]
	CursorNotScrollable,

	/// A nested executor call was made without a connected procedure frame
	#[error("procedure call stack is not connected")]
	SpiNotConnected,

	/// A nested executor cursor name did not resolve
	#[error("no open cursor named '{name}'")]
	SpiCursorMissing {
		name: String,
	},

	/// An internal invariant of the executor was violated
	#[error("executor failure; {message}")]
	Execution {
		message: String,
	},

	/// An I/O problem in the temp-file layer
	#[error("file system error; {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// The stable numeric code for this error kind.
	pub fn code(&self) -> i32 {
		match self {
			Self::ConnectionFailed {
				..
			} => 99,
			Self::ArgumentOutOfRange {
				..
			} => 101,
			Self::BinaryTruncation => 103,
			Self::NoSuchAttribute {
				..
			} => 104,
			Self::TypeCoercion {
				..
			} => 105,
			Self::TypeMismatch {
				..
			} => 106,
			Self::TypeConversion {
				..
			} => 108,
			Self::ContextOwnership => 454,
			Self::ContextValid {
				..
			} => 455,
			Self::StatementTooLong => 456,
			Self::Cancelled => 457,
			Self::AbortOnly => 458,
			Self::UserLock {
				..
			} => 501,
			Self::UserLockGroup {
				..
			} => 502,
			Self::EndOfData => 1405,
			Self::AuthPassword => 1702,
			Self::AuthUnknownUser => 1703,
			Self::Io(_) => 904,
			_ => 700,
		}
	}

	/// The short state tag reported through the connection error area.
	pub fn state(&self) -> &'static str {
		match self {
			Self::ConnectionFailed {
				..
			} => "DISCONNECTED",
			Self::AuthPassword | Self::AuthUnknownUser => "AUTH",
			Self::ArgumentOutOfRange {
				..
			}
			| Self::BinaryTruncation => "BIND",
			Self::NoSuchAttribute {
				..
			}
			| Self::TypeCoercion {
				..
			}
			| Self::TypeMismatch {
				..
			}
			| Self::TypeConversion {
				..
			} => "TRANSFER",
			Self::ContextOwnership
			| Self::ContextValid {
				..
			}
			| Self::StatementTooLong
			| Self::AbortOnly => "CONTEXT",
			Self::Cancelled => "CANCEL",
			Self::UserLock {
				..
			}
			| Self::UserLockGroup {
				..
			} => "USER",
			Self::EndOfData => "FETCH",
			Self::SpiNotConnected
			| Self::SpiCursorMissing {
				..
			} => "SPI",
			Self::Io(_) => "IO",
			_ => "EXEC",
		}
	}
}
