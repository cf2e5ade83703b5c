use log::{debug, info, warn};
use std::cmp;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::document::{FileState, Origin, Slot};
use crate::error::{ParseError, StructureError, Warning};
use crate::parser::{self, ParserInput};
use crate::xref::{Revision, Xref, XrefEntry};
use crate::{Dictionary, Document, Error, Object, ObjectId, Result};

impl Document {
    /// Load a PDF document from a specified file path.
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Document> {
        let file = File::open(path)?;
        let capacity = Some(file.metadata()?.len() as usize);
        Self::load_internal(file, capacity)
    }

    /// Load a PDF document from an arbitrary source.
    #[inline]
    pub fn load_from<R: Read>(source: R) -> Result<Document> {
        Self::load_internal(source, None)
    }

    fn load_internal<R: Read>(mut source: R, capacity: Option<usize>) -> Result<Document> {
        let mut buffer = capacity.map(Vec::with_capacity).unwrap_or_default();
        source.read_to_end(&mut buffer)?;
        Reader::new(buffer).read()
    }

    /// Load a PDF document from a memory slice.
    pub fn load_mem(buffer: &[u8]) -> Result<Document> {
        Reader::new(buffer.to_vec()).read()
    }
}

impl TryFrom<&[u8]> for Document {
    type Error = Error;

    fn try_from(buffer: &[u8]) -> Result<Document> {
        Document::load_mem(buffer)
    }
}

/// Reads the file structure. Object bodies are left for the document to parse on demand.
pub struct Reader {
    buffer: Vec<u8>,
    base_offset: usize,
}

impl Reader {
    pub fn new(buffer: Vec<u8>) -> Reader {
        Reader { buffer, base_offset: 0 }
    }

    fn body(&self) -> &[u8] {
        &self.buffer[self.base_offset..]
    }

    /// Read whole document.
    pub fn read(mut self) -> Result<Document> {
        // Junk in front of the header is tolerated; offsets count from `%PDF-`.
        self.base_offset = self.buffer.windows(5).position(|w| w == b"%PDF-").unwrap_or(0);
        if self.base_offset > 0 {
            info!("skipping {} bytes before the PDF header", self.base_offset);
        }

        let version =
            parser::header(ParserInput::new_extra(self.body(), "header")).ok_or(ParseError::InvalidFileHeader)?;

        let mut binary_mark = Vec::new();
        if let Some(pos) = self.body().iter().position(|&byte| byte == b'\n') {
            if let Some(mark) = parser::binary_mark(ParserInput::new_extra(&self.body()[pos + 1..], "binary_mark")) {
                if mark.iter().all(|&byte| byte >= 128) {
                    binary_mark = mark;
                }
            }
        }

        let xref_start = Self::get_xref_start(self.body())?;
        if xref_start > self.body().len() {
            return Err(StructureError::InvalidStartXref(xref_start).into());
        }

        let (xref, trailer, revisions) = self.read_xref_chain(xref_start)?;
        if !trailer.has(b"Root") {
            return Err(StructureError::MissingRoot.into());
        }

        let mut document = Document::new();
        document.version = version;
        document.binary_mark = binary_mark;
        document.max_id = xref.size.saturating_sub(1);
        document.xref_start = xref_start;
        document.revisions = revisions;

        for (&number, entry) in &xref.entries {
            let (id, origin): (ObjectId, Origin) = match *entry {
                XrefEntry::Normal { offset, generation } => ((number, generation), Origin::Offset(offset as usize)),
                XrefEntry::Compressed { container, index } => ((number, 0), Origin::InStream { container, index }),
                XrefEntry::Free { .. } => continue,
            };
            document.slots.insert(id, Slot::lazy(origin));
        }

        if let Some(Warning::SizeMismatch { declared, actual }) = self.check_size(&xref, &trailer) {
            document.record_warning(Warning::SizeMismatch { declared, actual });
            document.max_id = actual.saturating_sub(1);
        }
        if trailer.has(b"Encrypt") {
            warn!("document is encrypted; objects can be read but not saved or copied");
        }

        debug!(
            "loaded PDF {} with {} objects in {} revisions",
            document.version,
            document.slots.len(),
            document.revisions.len()
        );

        document.trailer = trailer;
        document.reference_table = xref;
        document.base_offset = self.base_offset;
        document.source = self.buffer;
        document.set_state(FileState::Reopened);
        Ok(document)
    }

    fn check_size(&self, xref: &Xref, trailer: &Dictionary) -> Option<Warning> {
        let declared = trailer.get(b"Size").and_then(Object::as_i64).ok()?;
        let actual = xref.max_id().checked_add(1)?;
        if u32::try_from(declared).ok() == Some(actual) {
            return None;
        }
        Some(Warning::SizeMismatch {
            declared: u32::try_from(declared).unwrap_or(0),
            actual,
        })
    }

    /// Follow `Prev` (and hybrid `XRefStm`) links from the newest section back.
    fn read_xref_chain(&self, xref_start: usize) -> Result<(Xref, Dictionary, Vec<Revision>)> {
        let (mut xref, mut trailer) = self.read_section(xref_start)?;
        if let Some(stream_start) = trailer.remove(b"XRefStm").and_then(|offset| offset.as_i64().ok()) {
            xref.merge_hybrid(self.read_hybrid_stream(stream_start)?);
        }
        let mut revisions = vec![revision(xref_start, &xref)];

        let mut already_seen = HashSet::from([xref_start as i64]);

        let mut prev_xref_start = trailer.remove(b"Prev");
        while let Some(prev) = prev_xref_start.and_then(|offset| offset.as_i64().ok()) {
            if !already_seen.insert(prev) {
                warn!("cross-reference chain loops back to offset {}", prev);
                break;
            }
            let start = usize::try_from(prev)
                .ok()
                .filter(|&start| start < self.body().len())
                .ok_or(StructureError::InvalidPrev(prev))?;
            debug!("following Prev to cross-reference section at {}", start);

            let (mut prev_xref, mut prev_trailer) = self.read_section(start)?;
            if let Some(stream_start) = prev_trailer.remove(b"XRefStm").and_then(|offset| offset.as_i64().ok()) {
                prev_xref.merge_hybrid(self.read_hybrid_stream(stream_start)?);
            }
            revisions.push(revision(start, &prev_xref));
            xref.merge(prev_xref);
            prev_xref_start = prev_trailer.remove(b"Prev");
        }

        Ok((xref, trailer, revisions))
    }

    fn read_section(&self, start: usize) -> Result<(Xref, Dictionary)> {
        let resolve_length = |_: ObjectId| None;
        parser::xref_and_trailer(&self.body()[start..], &resolve_length).map_err(|err| match err {
            Error::Parse(ParseError::InvalidTrailer) => StructureError::MissingTrailer.into(),
            Error::Parse(source) => StructureError::CorruptXref { offset: start, source }.into(),
            other => other,
        })
    }

    fn read_hybrid_stream(&self, offset: i64) -> Result<Xref> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start < self.body().len())
            .ok_or(StructureError::InvalidXrefStream(offset))?;
        let (xref, _) = self.read_section(start)?;
        Ok(xref)
    }

    fn get_xref_start(buffer: &[u8]) -> Result<usize> {
        let seek_pos = buffer.len() - cmp::min(buffer.len(), 1024);
        let tail = &buffer[seek_pos..];
        let eof_pos = tail
            .windows(5)
            .rposition(|w| w == b"%%EOF")
            .ok_or(StructureError::MissingStartXref)?;
        let xref_pos = tail[..eof_pos]
            .windows(9)
            .rposition(|w| w == b"startxref")
            .ok_or(StructureError::MissingStartXref)?;
        parser::xref_start(ParserInput::new_extra(&tail[xref_pos..], "startxref"))
            .and_then(|start| usize::try_from(start).ok())
            .ok_or_else(|| StructureError::MissingStartXref.into())
    }
}

fn revision(offset: usize, xref: &Xref) -> Revision {
    Revision {
        offset,
        xref_type: xref.xref_type,
        objects: xref.in_use().collect(),
    }
}
