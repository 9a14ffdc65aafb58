use crate::cnf::MAX_INLINE_BLOB;
use crate::err::Error;
use crate::sql::val::{Blob, BlobId};
use crate::store::tuple::ItemPointer;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One stored segment of an indirect blob. The on-disk layout is a list
/// of `(pointer, length)` pairs into the blob heap; rewriting paths must
/// preserve it exactly, so segment boundaries are kept as written.
struct BlobSegment {
	tid: ItemPointer,
	data: Vec<u8>,
}

struct BlobEntry {
	segments: Vec<BlobSegment>,
}

/// The out-of-line blob store. Values larger than the inline limit are
/// split into segments here and the tuple keeps an indirect reference.
#[derive(Default)]
pub struct BlobHeap {
	entries: RwLock<HashMap<BlobId, BlobEntry>>,
	next: AtomicU64,
	next_block: AtomicU64,
}

impl BlobHeap {
	/// Store a value, splitting it into inline-sized segments, and
	/// return the reference to embed in the tuple.
	pub fn store(&self, data: &[u8]) -> Blob {
		if data.len() <= MAX_INLINE_BLOB {
			return Blob::Inline(data.to_vec());
		}
		let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
		let mut segments = Vec::new();
		for chunk in data.chunks(MAX_INLINE_BLOB) {
			let block = self.next_block.fetch_add(1, Ordering::SeqCst);
			segments.push(BlobSegment {
				tid: ItemPointer::new(block as u32, 1),
				data: chunk.to_vec(),
			});
		}
		self.entries.write().insert(
			id,
			BlobEntry {
				segments,
			},
		);
		Blob::Indirect {
			id,
			length: data.len() as u64,
		}
	}

	/// Open a pipelined reader over an indirect blob.
	pub fn open(&self, id: BlobId) -> Result<BlobPipeline, Error> {
		let entries = self.entries.read();
		let entry = entries.get(&id).ok_or_else(|| Error::Execution {
			message: format!("dangling blob reference #{id}"),
		})?;
		// The pipeline owns its segment list so readers never hold the
		// heap lock across chunk delivery
		Ok(BlobPipeline {
			segments: entry.segments.iter().map(|s| (s.tid, s.data.clone())).collect(),
			pos: 0,
		})
	}

	/// Total stored length of an indirect blob.
	pub fn length(&self, id: BlobId) -> Result<u64, Error> {
		let entries = self.entries.read();
		let entry = entries.get(&id).ok_or_else(|| Error::Execution {
			message: format!("dangling blob reference #{id}"),
		})?;
		Ok(entry.segments.iter().map(|s| s.data.len() as u64).sum())
	}

	pub fn free(&self, id: BlobId) {
		self.entries.write().remove(&id);
	}
}

/// Pipelined segment reader for an indirect blob. Output transfer
/// assembles chunks of up to five times the inline limit from these
/// segments.
pub struct BlobPipeline {
	segments: Vec<(ItemPointer, Vec<u8>)>,
	pos: usize,
}

impl BlobPipeline {
	/// The next chunk, up to `max` bytes, assembled from consecutive
	/// segments. `None` once the blob is exhausted.
	pub fn next_chunk(&mut self, max: usize) -> Option<Vec<u8>> {
		if self.pos >= self.segments.len() {
			return None;
		}
		let mut out = Vec::new();
		while self.pos < self.segments.len() {
			let seg = &self.segments[self.pos].1;
			if !out.is_empty() && out.len() + seg.len() > max {
				break;
			}
			out.extend_from_slice(seg);
			self.pos += 1;
		}
		Some(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn small_values_stay_inline() {
		let heap = BlobHeap::default();
		match heap.store(&[1, 2, 3]) {
			Blob::Inline(v) => assert_eq!(v, vec![1, 2, 3]),
			other => panic!("expected inline blob, got {other:?}"),
		}
	}

	#[test]
	fn large_values_segment_and_reassemble() {
		let heap = BlobHeap::default();
		let data = vec![9u8; MAX_INLINE_BLOB * 3 + 17];
		let blob = heap.store(&data);
		let Blob::Indirect {
			id,
			length,
		} = blob
		else {
			panic!("expected indirect blob");
		};
		assert_eq!(length, data.len() as u64);
		let mut pipe = heap.open(id).unwrap();
		let mut out = Vec::new();
		while let Some(chunk) = pipe.next_chunk(MAX_INLINE_BLOB * 5) {
			out.extend(chunk);
		}
		assert_eq!(out, data);
	}
}
