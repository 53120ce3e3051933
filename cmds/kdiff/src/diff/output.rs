//! Shared output for concurrent diff tasks.

use std::{
	io::{self, Write},
	sync::{Mutex, PoisonError},
};

/// A writer shared between tasks that writes whole blocks at a time.
///
/// Each call to [`LockWriter::write_block`] holds the lock for the complete
/// block, so blocks from different tasks never interleave.
pub struct LockWriter {
	inner: Mutex<Box<dyn Write + Send>>,
}

impl LockWriter {
	pub fn new(writer: impl Write + Send + 'static) -> Self {
		Self {
			inner: Mutex::new(Box::new(writer)),
		}
	}

	pub fn write_block(&self, block: &str) -> io::Result<()> {
		let mut w = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
		w.write_all(block.as_bytes())?;
		w.flush()
	}
}

impl std::fmt::Debug for LockWriter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LockWriter").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::test_utils::SharedBuffer;

	#[test]
	fn test_blocks_do_not_interleave() {
		let buf = SharedBuffer::default();
		let writer = Arc::new(LockWriter::new(buf.clone()));

		let handles: Vec<_> = (0..4)
			.map(|i| {
				let writer = writer.clone();
				std::thread::spawn(move || {
					let block: String = (0..50).map(|j| format!("task{i} line{j}\n")).collect();
					for _ in 0..10 {
						writer.write_block(&block).unwrap();
					}
				})
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}

		let out = buf.contents();
		let lines: Vec<_> = out.lines().collect();
		assert_eq!(lines.len(), 4 * 10 * 50);
		for chunk in lines.chunks(50) {
			let task = chunk[0].split(' ').next().unwrap();
			assert!(chunk.iter().all(|l| l.starts_with(task)), "{chunk:?}");
			assert!(chunk[0].ends_with("line0"));
		}
	}
}
