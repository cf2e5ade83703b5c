use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::debug;

use crate::save_options::SaveOptions;
use crate::writer::{CountingWrite, Rendered, Writer, persist};
use crate::xref::{Xref, XrefEntry, XrefType};
use crate::{Document, Error, Object, Result};

impl Document {
    /// Append the changed objects to the bytes the document was read from.
    ///
    /// Everything before the old end of file is kept byte for byte; the new
    /// section points back at the previous one with `Prev`. A document with
    /// no source bytes gets a full save instead.
    pub fn save_incremental<P: AsRef<Path>>(&mut self, path: P) -> Result<File> {
        self.save_incremental_with_options(path, &SaveOptions::default())
    }

    pub fn save_incremental_with_options<P: AsRef<Path>>(&mut self, path: P, options: &SaveOptions) -> Result<File> {
        if !self.has_source() {
            return self.save_with_options(path, options);
        }
        let output = self.render_incremental(options)?;
        let file = persist(path.as_ref(), &output.bytes)?;
        self.adopt(output, false);
        Ok(file)
    }

    pub fn save_incremental_to<W: Write>(&mut self, target: &mut W) -> Result<()> {
        self.save_incremental_to_with_options(target, &SaveOptions::default())
    }

    pub fn save_incremental_to_with_options<W: Write>(&mut self, target: &mut W, options: &SaveOptions) -> Result<()> {
        if !self.has_source() {
            return self.save_to_with_options(target, options);
        }
        let output = self.render_incremental(options)?;
        target.write_all(&output.bytes)?;
        target.flush()?;
        self.adopt(output, false);
        Ok(())
    }

    fn render_incremental(&mut self, options: &SaveOptions) -> Result<Rendered> {
        if self.is_encrypted() {
            return Err(Error::Encrypted);
        }
        if options.stamp_modification_date {
            self.stamp_modification_date()?;
        }

        let mut buffer = self.source.clone();
        if !buffer.ends_with(b"\n") && !buffer.ends_with(b"\r") {
            buffer.push(b'\n');
        }
        // Offsets in the new section count from the header, like the old ones.
        let base_offset = self.base_offset;
        let mut target = CountingWrite {
            bytes_written: buffer.len() - base_offset,
            inner: buffer,
        };

        let xref_type = self
            .revisions
            .first()
            .map_or(self.reference_table.xref_type, |revision| revision.xref_type);
        let mut section = Xref::new(0, xref_type);

        let dirty: Vec<_> = self.dirty_ids().collect();
        for id in &dirty {
            let object = self.get_object(*id)?;
            Writer::write_indirect_object(&mut target, *id, object, options, &mut section)?;
        }
        for (&number, &generation) in &self.freed {
            section.insert(number, XrefEntry::Free { next: 0, generation });
        }

        let previous_size = self.reference_table.size;
        let mut size = previous_size.max(self.max_id + 1);
        let mut trailer = self.trailer.clone();
        trailer.remove(b"XRefStm");
        trailer.set("Prev", Object::Integer(self.xref_start as i64));

        let xref_start = target.bytes_written;
        match xref_type {
            XrefType::CrossReferenceTable => {
                trailer.set("Size", i64::from(size));
                Writer::write_xref_table(&mut target, &section)?;
                target.write_all(b"trailer\n")?;
                Writer::write_dictionary(&mut target, &trailer)?;
                target.write_all(b"\n")?;
            }
            XrefType::CrossReferenceStream => {
                let stream_id = size;
                size += 1;
                section.insert(stream_id, XrefEntry::Normal { offset: xref_start as u32, generation: 0 });
                trailer.set("Size", i64::from(size));
                Writer::write_xref_stream(&mut target, stream_id, &section, &trailer, options)?;
            }
        }
        write!(target, "startxref\n{}\n%%EOF\n", xref_start)?;
        section.size = size;

        debug!(
            "incremental save appended {} objects and {} free entries after byte {}",
            dirty.len(),
            self.freed.len(),
            self.source.len()
        );

        // The in-memory trailer never carries Prev; the section chain records it.
        trailer.remove(b"Prev");
        Ok(Rendered {
            bytes: target.inner,
            base_offset,
            xref_start,
            section,
            trailer,
            version: None,
        })
    }
}
