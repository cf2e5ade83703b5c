use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use log::{debug, warn};
use tempfile::NamedTempFile;

use super::Object::*;
use super::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use crate::document::{FileState, Origin};
use crate::filters::{self, Filter};
use crate::save_options::{Compression, SaveOptions, XrefFormat};
use crate::xref::*;
use crate::{Error, Result};

/// Object types that only describe the old file layout and are never copied into a new one.
const LAYOUT_TYPES: [&str; 3] = ["ObjStm", "XRef", "Linearized"];

impl Document {
    /// Save PDF document to specified file path.
    ///
    /// The file is staged next to `path` and moved into place once complete.
    #[inline]
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<File> {
        self.save_with_options(path, &SaveOptions::default())
    }

    pub fn save_with_options<P: AsRef<Path>>(&mut self, path: P, options: &SaveOptions) -> Result<File> {
        let output = self.render_full(options)?;
        let file = persist(path.as_ref(), &output.bytes)?;
        self.adopt(output, true);
        Ok(file)
    }

    /// Save PDF to arbitrary target
    #[inline]
    pub fn save_to<W: Write>(&mut self, target: &mut W) -> Result<()> {
        self.save_to_with_options(target, &SaveOptions::default())
    }

    pub fn save_to_with_options<W: Write>(&mut self, target: &mut W, options: &SaveOptions) -> Result<()> {
        let output = self.render_full(options)?;
        target.write_all(&output.bytes)?;
        target.flush()?;
        self.adopt(output, true);
        Ok(())
    }

    fn render_full(&mut self, options: &SaveOptions) -> Result<Rendered> {
        if self.is_encrypted() {
            return Err(Error::Encrypted);
        }
        if options.stamp_modification_date {
            self.stamp_modification_date()?;
        }
        self.realize_all();

        let version = options.header_version().to_string();
        let mut target = CountingWrite {
            inner: Vec::with_capacity(self.source.len().max(1024)),
            bytes_written: 0,
        };
        writeln!(target, "%PDF-{}", version)?;
        if !self.binary_mark.is_empty() {
            target.write_all(b"%")?;
            target.write_all(&self.binary_mark)?;
            target.write_all(b"\n")?;
        }

        let mut xref = Xref::new(0, xref_type(options.xref_format));
        for (&id, slot) in &self.slots {
            let Some(object) = slot.value.get() else {
                continue;
            };
            let is_layout = object
                .type_name()
                .map(|name| LAYOUT_TYPES.contains(&name))
                .unwrap_or(false);
            if !is_layout {
                Writer::write_indirect_object(&mut target, id, object, options, &mut xref)?;
            }
        }

        let mut size = self.max_id + 1;
        let mut trailer = self.trailer.clone();
        for key in [&b"Prev"[..], b"XRefStm", b"Size"] {
            trailer.remove(key);
        }

        let xref_start = target.bytes_written;
        match options.xref_format {
            XrefFormat::Table => {
                chain_free_entries(&mut xref, size, &self.freed);
                trailer.set("Size", i64::from(size));
                Writer::write_xref_table(&mut target, &xref)?;
                target.write_all(b"trailer\n")?;
                Writer::write_dictionary(&mut target, &trailer)?;
                target.write_all(b"\n")?;
            }
            XrefFormat::Stream => {
                let stream_id = size;
                size += 1;
                xref.insert(stream_id, XrefEntry::Normal { offset: xref_start as u32, generation: 0 });
                chain_free_entries(&mut xref, size, &self.freed);
                trailer.set("Size", i64::from(size));
                Writer::write_xref_stream(&mut target, stream_id, &xref, &trailer, options)?;
            }
        }
        write!(target, "startxref\n{}\n%%EOF\n", xref_start)?;
        xref.size = size;

        debug!(
            "full save wrote {} objects, {} bytes, PDF {}",
            xref.in_use().count(),
            target.bytes_written,
            version
        );
        Ok(Rendered {
            bytes: target.inner,
            base_offset: 0,
            xref_start,
            section: xref,
            trailer,
            version: Some(version),
        })
    }

    /// Take the bytes just written as the new base of the document.
    pub(crate) fn adopt(&mut self, output: Rendered, full: bool) {
        let Rendered {
            bytes,
            base_offset,
            xref_start,
            section,
            trailer,
            version,
        } = output;

        if full {
            self.slots.retain(|&(number, generation), _| {
                matches!(section.get(number), Some(XrefEntry::Normal { generation: g, .. }) if *g == generation)
            });
        }
        for (&number, entry) in &section.entries {
            if let XrefEntry::Normal { offset, generation } = *entry {
                if let Some(slot) = self.slots.get_mut(&(number, generation)) {
                    slot.origin = Origin::Offset(offset as usize);
                }
            }
        }

        let revision = Revision {
            offset: xref_start,
            xref_type: section.xref_type,
            objects: section.in_use().collect(),
        };
        self.max_id = self.max_id.max(section.size.saturating_sub(1));
        if full {
            self.reference_table = section;
            self.revisions = vec![revision];
        } else {
            let older = std::mem::replace(&mut self.reference_table, section);
            self.reference_table.merge(older);
            self.revisions.insert(0, revision);
        }
        if let Some(version) = version {
            self.version = version;
        }
        self.trailer = trailer;
        self.source = bytes;
        self.base_offset = base_offset;
        self.xref_start = xref_start;
        self.mark_clean();
        self.set_state(FileState::Flushed);
    }
}

/// A complete file image waiting to be handed to its destination.
pub(crate) struct Rendered {
    pub(crate) bytes: Vec<u8>,
    pub(crate) base_offset: usize,
    pub(crate) xref_start: usize,
    /// Entries written by this save, offsets relative to `base_offset`.
    pub(crate) section: Xref,
    pub(crate) trailer: Dictionary,
    pub(crate) version: Option<std::string::String>,
}

pub(crate) fn xref_type(format: XrefFormat) -> XrefType {
    match format {
        XrefFormat::Table => XrefType::CrossReferenceTable,
        XrefFormat::Stream => XrefType::CrossReferenceStream,
    }
}

/// Stage `bytes` in a temporary file beside `path`, then move it over `path`.
pub(crate) fn persist(path: &Path, bytes: &[u8]) -> Result<File> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(directory)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    let file = staged.persist(path).map_err(|err| Error::IO(err.error))?;
    Ok(file)
}

/// Fill every unused number below `size` with a free entry and link them into a list headed by 0.
fn chain_free_entries(xref: &mut Xref, size: u32, freed: &BTreeMap<u32, u16>) {
    let free: Vec<u32> = (1..size).filter(|id| xref.get(*id).is_none()).collect();
    let mut next = 0;
    for &id in free.iter().rev() {
        let generation = freed.get(&id).copied().unwrap_or(0);
        xref.insert(id, XrefEntry::Free { next, generation });
        next = id;
    }
    xref.insert(0, XrefEntry::Free { next, generation: 65535 });
}

pub struct Writer;

impl Writer {
    fn need_separator(object: &Object) -> bool {
        matches!(*object, Null | Boolean(_) | Integer(_) | Real(_) | Reference(_))
    }

    fn need_end_separator(object: &Object) -> bool {
        matches!(
            *object,
            Null | Boolean(_) | Integer(_) | Real(_) | Name(_) | Reference(_) | Object::Stream(_)
        )
    }

    /// Table rows are 20 bytes each; subsections follow runs of consecutive numbers.
    pub(crate) fn write_xref_table(file: &mut dyn Write, xref: &Xref) -> io::Result<()> {
        file.write_all(b"xref\n")?;
        for (start, count) in subsections(xref) {
            writeln!(file, "{} {}", start, count)?;
            for id in start..start + count {
                let (value, generation, kind) = match xref.get(id) {
                    Some(XrefEntry::Normal { offset, generation }) => (*offset, *generation, 'n'),
                    Some(XrefEntry::Free { next, generation }) => (*next, *generation, 'f'),
                    // Tables cannot express compressed entries.
                    Some(XrefEntry::Compressed { .. }) | None => (0, 65535, 'f'),
                };
                writeln!(file, "{:>010} {:>05} {} ", value, generation, kind)?;
            }
        }
        Ok(())
    }

    pub(crate) fn write_xref_stream<W: Write>(
        file: &mut CountingWrite<W>, id: u32, xref: &Xref, trailer: &Dictionary, options: &SaveOptions,
    ) -> Result<()> {
        let (rows, widths) = encode_xref_rows(xref);
        let index: Vec<Object> = subsections(xref)
            .into_iter()
            .flat_map(|(start, count)| [Object::from(start), Object::from(count)])
            .collect();

        let mut dict = Dictionary::new();
        dict.set("Type", "XRef");
        for (key, value) in trailer {
            dict.set(key.clone(), value.clone());
        }
        dict.set("Index", index);
        dict.set("W", widths.iter().map(|&w| Object::from(w)).collect::<Vec<_>>());

        let mut content = rows;
        if options.compression == Compression::Flate {
            content = filters::encode(&content, Filter::Flate, options.compression_level)?;
            dict.set("Filter", "FlateDecode");
        }
        dict.set("Length", content.len() as i64);

        writeln!(file, "{} 0 obj", id)?;
        Writer::write_stream_parts(file, &dict, &content)?;
        file.write_all(b"\nendobj\n")?;
        Ok(())
    }

    pub(crate) fn write_indirect_object<W: Write>(
        file: &mut CountingWrite<W>, id: ObjectId, object: &Object, options: &SaveOptions, xref: &mut Xref,
    ) -> Result<()> {
        let offset = u32::try_from(file.bytes_written).map_err(|_| Error::InvalidStream("file exceeds 4 GiB".into()))?;
        xref.insert(id.0, XrefEntry::Normal { offset, generation: id.1 });
        write!(
            file,
            "{} {} obj{}",
            id.0,
            id.1,
            if Writer::need_separator(object) { " " } else { "\n" }
        )?;
        match object {
            Object::Stream(stream) => {
                let (dict, content) = prepare_stream(stream, options)?;
                Writer::write_stream_parts(file, &dict, &content)?;
            }
            other => Writer::write_object(file, other)?,
        }
        writeln!(
            file,
            "{}endobj",
            if Writer::need_end_separator(object) { "\n" } else { "" }
        )?;
        Ok(())
    }

    pub fn write_object(file: &mut dyn Write, object: &Object) -> io::Result<()> {
        match *object {
            Null => file.write_all(b"null"),
            Boolean(ref value) => {
                if *value {
                    file.write_all(b"true")
                } else {
                    file.write_all(b"false")
                }
            }
            Integer(ref value) => {
                let mut buf = itoa::Buffer::new();
                file.write_all(buf.format(*value).as_bytes())
            }
            Real(ref value) => Writer::write_real(file, *value),
            Name(ref name) => Writer::write_name(file, name),
            String(ref text, ref format) => Writer::write_string(file, text, format),
            Array(ref array) => Writer::write_array(file, array),
            Object::Dictionary(ref dict) => Writer::write_dictionary(file, dict),
            Object::Stream(ref stream) => Writer::write_stream(file, stream),
            Reference(ref id) => write!(file, "{} {} R", id.0, id.1),
        }
    }

    /// Shortest decimal that reads back to the same value, never in exponent form.
    fn write_real(file: &mut dyn Write, value: f64) -> io::Result<()> {
        if !value.is_finite() {
            warn!("non-finite real {} written as 0", value);
            return file.write_all(b"0.0");
        }
        let mut text = value.to_string();
        if !text.contains('.') {
            text.push_str(".0");
        }
        file.write_all(text.as_bytes())
    }

    fn write_name(file: &mut dyn Write, name: &[u8]) -> io::Result<()> {
        file.write_all(b"/")?;
        for &byte in name {
            // white-space and delimiter chars are encoded to # sequences
            // also encode bytes outside of the range 33 (!) to 126 (~)
            if b" \t\n\r\x0C()<>[]{}/%#".contains(&byte) || !(33..=126).contains(&byte) {
                write!(file, "#{:02X}", byte)?;
            } else {
                file.write_all(&[byte])?;
            }
        }
        Ok(())
    }

    fn write_string(file: &mut dyn Write, text: &[u8], format: &StringFormat) -> io::Result<()> {
        match *format {
            // Backslashes, carriage returns and unbalanced parentheses are escaped.
            StringFormat::Literal => {
                let mut escape_indice = Vec::new();
                let mut parentheses = Vec::new();
                for (index, &byte) in text.iter().enumerate() {
                    match byte {
                        b'(' => parentheses.push(index),
                        b')' => {
                            if parentheses.pop().is_none() {
                                escape_indice.push(index);
                            }
                        }
                        b'\\' | b'\r' => escape_indice.push(index),
                        _ => continue,
                    }
                }
                escape_indice.append(&mut parentheses);

                file.write_all(b"(")?;
                if escape_indice.is_empty() {
                    file.write_all(text)?;
                } else {
                    for (index, &byte) in text.iter().enumerate() {
                        if escape_indice.contains(&index) {
                            file.write_all(b"\\")?;
                            file.write_all(&[if byte == b'\r' { b'r' } else { byte }])?;
                        } else {
                            file.write_all(&[byte])?;
                        }
                    }
                }
                file.write_all(b")")?;
            }
            StringFormat::Hexadecimal => {
                file.write_all(b"<")?;
                for &byte in text {
                    write!(file, "{:02X}", byte)?;
                }
                file.write_all(b">")?;
            }
            StringFormat::Utf16 => {
                file.write_all(b"<FEFF")?;
                for &byte in text {
                    write!(file, "{:02X}", byte)?;
                }
                file.write_all(b">")?;
            }
        }
        Ok(())
    }

    fn write_array(file: &mut dyn Write, array: &[Object]) -> io::Result<()> {
        file.write_all(b"[")?;
        let mut first = true;
        for object in array {
            if first {
                first = false;
            } else if Writer::need_separator(object) {
                file.write_all(b" ")?;
            }
            Writer::write_object(file, object)?;
        }
        file.write_all(b"]")?;
        Ok(())
    }

    pub(crate) fn write_dictionary(file: &mut dyn Write, dictionary: &Dictionary) -> io::Result<()> {
        file.write_all(b"<<")?;
        for (key, value) in dictionary {
            Writer::write_name(file, key)?;
            if Writer::need_separator(value) {
                file.write_all(b" ")?;
            }
            Writer::write_object(file, value)?;
        }
        file.write_all(b">>")?;
        Ok(())
    }

    fn write_stream(file: &mut dyn Write, stream: &Stream) -> io::Result<()> {
        let mut dict = stream.dict.clone();
        dict.set("Length", stream.content.len() as i64);
        Writer::write_stream_parts(file, &dict, &stream.content)
    }

    fn write_stream_parts(file: &mut dyn Write, dict: &Dictionary, content: &[u8]) -> io::Result<()> {
        Writer::write_dictionary(file, dict)?;
        file.write_all(b"stream\n")?;
        file.write_all(content)?;
        file.write_all(b"\nendstream")?;
        Ok(())
    }
}

/// The dictionary and payload a stream is written with. `Length` always matches the payload.
fn prepare_stream<'a>(stream: &'a Stream, options: &SaveOptions) -> Result<(Dictionary, Cow<'a, [u8]>)> {
    let mut dict = stream.dict.clone();
    let mut content = Cow::Borrowed(stream.content.as_slice());
    if options.compression == Compression::Flate && stream.allows_compression && !stream.is_compressed() {
        let compressed = filters::encode(&stream.content, Filter::Flate, options.compression_level)?;
        if compressed.len() < stream.content.len() {
            dict.remove(b"DecodeParms");
            dict.set("Filter", "FlateDecode");
            content = Cow::Owned(compressed);
        }
    }
    dict.set("Length", content.len() as i64);
    Ok((dict, content))
}

impl Object {
    /// The token form of this value as it appears in a file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = Writer::write_object(&mut bytes, self);
        bytes
    }
}

pub struct CountingWrite<W: Write> {
    pub(crate) inner: W,
    pub(crate) bytes_written: usize,
}

impl<W: Write> Write for CountingWrite<W> {
    #[inline]
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        let result = self.inner.write(buffer);
        if let Ok(bytes) = result {
            self.bytes_written += bytes;
        }
        result
    }

    #[inline]
    fn write_all(&mut self, buffer: &[u8]) -> io::Result<()> {
        self.bytes_written += buffer.len();
        // If this returns `Err` we can’t know how many bytes were actually written (if any)
        // but that doesn’t matter since we’re gonna abort the entire PDF generation anyway.
        self.inner.write_all(buffer)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
