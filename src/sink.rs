//! Shared log sinks for error reports and leak dumps.
//!
//! A pool writes line-oriented plain text to an optional sink: one line
//! per event, terminated with the host newline. Sinks are shared so a
//! caller can keep a clone and inspect what the pool wrote; a file sink
//! opened by the pool closes when the last clone drops.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

/// Shared, interiorly-mutable byte sink.
pub type SharedSink = Rc<RefCell<dyn Write>>;

/// Opens `path` for writing and wraps it in a buffered shared sink.
pub fn file_sink(path: impl AsRef<Path>) -> io::Result<SharedSink> {
    let file = File::create(path)?;
    Ok(Rc::new(RefCell::new(BufWriter::new(file))))
}

/// Creates an in-memory sink together with a handle to its contents.
///
/// Useful in tests and tools that want to inspect the pool's reports
/// after the fact.
#[must_use]
pub fn buffer_sink() -> (SharedSink, Rc<RefCell<Vec<u8>>>) {
    let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let sink: SharedSink = buffer.clone();
    (sink, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_round_trips() {
        let (sink, contents) = buffer_sink();
        writeln!(sink.borrow_mut(), "hello").unwrap();
        assert_eq!(&*contents.borrow(), b"hello\n");
    }
}
