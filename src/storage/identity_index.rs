//! Identity index - memory-mapped, sorted view of a collection file.
//!
//! A collection file holds one identity per line, in insertion order. The
//! index maps the file read-only (shared mapping, so every process reading
//! the same database shares the physical pages) and keeps a table of spans
//! into the mapping, sorted by the bytes they reference.
//!
//! # Layout
//! ```text
//! file:   "id-3\nid-1\nid-2\n"
//! spans:  [(5,4) "id-1", (10,4) "id-2", (0,4) "id-3"]
//! ```
//!
//! Membership is a binary search over the span table; identity bytes are
//! never copied into the heap.

use memmap2::Mmap;
use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;

use crate::error::{Error, Result};

/// Offset and length of one line inside the mapped file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
    offset: u32,
    length: u32,
}

/// Sorted, memory-mapped set of identities.
pub struct IdentityIndex {
    /// Mapped file content; `None` for an empty file
    memory: Option<Mmap>,

    /// One span per line, sorted by referenced bytes
    spans: Vec<Span>,
}

impl std::fmt::Debug for IdentityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityIndex")
            .field("bytes", &self.mapped_len())
            .field("identities", &self.spans.len())
            .finish()
    }
}

impl IdentityIndex {
    /// Map the collection file at `path` and index its lines.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io("open", path, e))?;
        let len = file
            .metadata()
            .map_err(|e| Error::io("stat", path, e))?
            .len();

        if len == 0 {
            return Ok(Self::empty());
        }

        if len > u32::MAX as u64 {
            return Err(Error::malformed(
                path,
                format!("collection of {} bytes exceeds the 4 GiB index limit", len),
            ));
        }

        // SAFETY: the mapping is read-only and owned by this index. Writers
        // replace collection files rather than truncating them in place.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| Error::io("mmap", path, e))? };

        let mut index = Self {
            spans: line_spans(&mmap),
            memory: Some(mmap),
        };
        if index.sort() {
            log::debug!("Collection {} is not sorted on disk", path.display());
        }
        Ok(index)
    }

    /// An index with no identities.
    pub fn empty() -> Self {
        Self {
            memory: None,
            spans: Vec::new(),
        }
    }

    /// Returns true only if `id` is exactly one of the indexed lines.
    pub fn contains(&self, id: &str) -> bool {
        let id = id.as_bytes();
        self.spans
            .binary_search_by(|span| self.bytes(*span).cmp(id))
            .is_ok()
    }

    /// Number of lines in the collection (duplicates included).
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Size of the mapped region in bytes.
    pub fn mapped_len(&self) -> usize {
        self.memory.as_ref().map_or(0, |m| m.len())
    }

    /// Iterates identities in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.spans.iter().map(move |span| self.bytes(*span))
    }

    #[inline]
    fn bytes(&self, span: Span) -> &[u8] {
        match &self.memory {
            Some(memory) => {
                let start = span.offset as usize;
                &memory[start..start + span.length as usize]
            }
            None => &[],
        }
    }

    fn is_sorted(&self) -> bool {
        self.spans
            .windows(2)
            .all(|w| self.bytes(w[0]) <= self.bytes(w[1]))
    }

    /// Sorts the span table; returns true if it was not already sorted.
    fn sort(&mut self) -> bool {
        if self.is_sorted() {
            return false;
        }
        let mut spans = std::mem::take(&mut self.spans);
        spans.sort_unstable_by(|a, b| self.compare(*a, *b));
        self.spans = spans;
        true
    }

    fn compare(&self, a: Span, b: Span) -> Ordering {
        self.bytes(a).cmp(self.bytes(b))
    }
}

/// Splits `bytes` on `\n`. A final newline does not produce an empty line;
/// empty lines elsewhere are kept.
fn line_spans(bytes: &[u8]) -> Vec<Span> {
    let count = bytes.iter().filter(|&&b| b == b'\n').count() + 1;
    let mut spans = Vec::with_capacity(count);

    let mut start = 0;
    while start < bytes.len() {
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |n| start + n);
        spans.push(Span {
            offset: start as u32,
            length: (end - start) as u32,
        });
        start = end + 1;
    }

    spans
}
