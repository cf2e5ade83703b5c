use std::collections::BTreeMap;
use std::fmt::Write as _;

use pdfgraft::{Filter, filters};

#[derive(Clone, Copy)]
enum Entry {
    Offset(usize),
    Compressed(u32, u16),
}

/// Assembles PDF files by hand, tracking object offsets for the xref sections.
pub struct PdfBuilder {
    bytes: Vec<u8>,
    /// Length of any junk written before `%PDF-`.
    prefix: usize,
    /// Entries added since the last xref section.
    pending: BTreeMap<u32, Entry>,
    max_id: u32,
    last_xref: Option<usize>,
}

#[allow(dead_code)]
impl PdfBuilder {
    pub fn new(version: &str) -> PdfBuilder {
        PdfBuilder::with_prefix(b"", version)
    }

    pub fn with_prefix(junk: &[u8], version: &str) -> PdfBuilder {
        let mut bytes = junk.to_vec();
        bytes.extend_from_slice(format!("%PDF-{}\n", version).as_bytes());
        bytes.extend_from_slice(b"%\xBF\xF7\xA2\xFE\n");
        PdfBuilder {
            bytes,
            prefix: junk.len(),
            pending: BTreeMap::new(),
            max_id: 0,
            last_xref: None,
        }
    }

    fn offset(&self) -> usize {
        self.bytes.len() - self.prefix
    }

    fn record(&mut self, id: u32, entry: Entry) {
        self.pending.insert(id, entry);
        self.max_id = self.max_id.max(id);
    }

    pub fn object(mut self, id: u32, body: &str) -> PdfBuilder {
        self.record(id, Entry::Offset(self.offset()));
        self.bytes
            .extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
        self
    }

    /// Bytes of object `id` written exactly as given.
    pub fn raw(mut self, id: u32, text: &str) -> PdfBuilder {
        self.record(id, Entry::Offset(self.offset()));
        self.bytes.extend_from_slice(text.as_bytes());
        self
    }

    /// A stream object; `extra` goes into the dictionary next to `Length`.
    pub fn stream(mut self, id: u32, extra: &str, data: &[u8]) -> PdfBuilder {
        self.record(id, Entry::Offset(self.offset()));
        self.bytes.extend_from_slice(
            format!("{} 0 obj\n<< /Length {} {} >>\nstream\n", id, data.len(), extra).as_bytes(),
        );
        self.bytes.extend_from_slice(data);
        self.bytes.extend_from_slice(b"\nendstream\nendobj\n");
        self
    }

    pub fn flate_stream(self, id: u32, data: &[u8]) -> PdfBuilder {
        let encoded = filters::encode(data, Filter::Flate, 6).expect("flate encoding");
        self.stream(id, "/Filter /FlateDecode", &encoded)
    }

    /// An uncompressed object stream holding `members` in order.
    pub fn object_stream(mut self, id: u32, members: &[(u32, &str)]) -> PdfBuilder {
        let mut header = String::new();
        let mut body = String::new();
        for (index, (number, text)) in members.iter().enumerate() {
            write!(header, "{} {} ", number, body.len()).unwrap();
            body.push_str(text);
            body.push(' ');
            self.record(*number, Entry::Compressed(id, index as u16));
        }
        let first = header.len();
        let content = format!("{}{}", header, body);
        let extra = format!("/Type /ObjStm /N {} /First {}", members.len(), first);
        self.stream(id, &extra, content.as_bytes())
    }

    fn size(&self) -> u32 {
        self.max_id + 1
    }

    fn trailer_tail(&self, extra: &str) -> String {
        match self.last_xref {
            Some(prev) => format!("{} /Prev {}", extra, prev),
            None => extra.to_string(),
        }
    }

    /// Close a revision with a classic xref table and trailer.
    pub fn xref_table(mut self, trailer: &str) -> PdfBuilder {
        let start = self.offset();
        let mut table = String::from("xref\n");
        if self.last_xref.is_none() {
            table.push_str("0 1\n0000000000 65535 f \n");
        }
        for (id, entry) in &self.pending {
            let Entry::Offset(offset) = *entry else {
                panic!("tables cannot hold compressed entries");
            };
            write!(table, "{} 1\n{:010} 00000 n \n", id, offset).unwrap();
        }
        write!(
            table,
            "trailer\n<< /Size {} {} >>\nstartxref\n{}\n%%EOF\n",
            self.size(),
            self.trailer_tail(trailer),
            start
        )
        .unwrap();
        self.bytes.extend_from_slice(table.as_bytes());
        self.pending.clear();
        self.last_xref = Some(start);
        self
    }

    /// Close a revision with an uncompressed xref stream numbered `id`.
    pub fn xref_stream(mut self, id: u32, trailer: &str) -> PdfBuilder {
        let start = self.offset();
        self.record(id, Entry::Offset(start));
        if self.last_xref.is_none() {
            self.pending.insert(0, Entry::Offset(usize::MAX));
        }

        let mut rows = Vec::new();
        let mut index = String::new();
        for (number, entry) in &self.pending {
            let (kind, field2, field3): (u8, u32, u16) = match *entry {
                Entry::Offset(usize::MAX) => (0, 0, 65535),
                Entry::Offset(offset) => (1, offset as u32, 0),
                Entry::Compressed(container, position) => (2, container, position),
            };
            rows.push(kind);
            rows.extend_from_slice(&field2.to_be_bytes());
            rows.extend_from_slice(&field3.to_be_bytes());
            write!(index, "{} 1 ", number).unwrap();
        }

        let dict = format!(
            "<< /Type /XRef /Size {} /W [1 4 2] /Index [{}] /Length {} {} >>",
            self.size(),
            index.trim_end(),
            rows.len(),
            self.trailer_tail(trailer)
        );
        self.bytes
            .extend_from_slice(format!("{} 0 obj\n{}\nstream\n", id, dict).as_bytes());
        self.bytes.extend_from_slice(&rows);
        self.bytes.extend_from_slice(b"\nendstream\nendobj\n");
        self.bytes
            .extend_from_slice(format!("startxref\n{}\n%%EOF\n", start).as_bytes());
        self.pending.clear();
        self.last_xref = Some(start);
        self
    }

    /// Close a revision the way hybrid writers do: a classic table that lists
    /// object-stream members as free, plus an `XRefStm` stream `id` that
    /// holds their compressed entries.
    pub fn hybrid_xref(mut self, id: u32, trailer: &str) -> PdfBuilder {
        let stream_offset = self.offset();
        self.record(id, Entry::Offset(stream_offset));

        let mut rows = Vec::new();
        let mut index = String::new();
        for (number, entry) in &self.pending {
            if let Entry::Compressed(container, position) = *entry {
                rows.push(2);
                rows.extend_from_slice(&container.to_be_bytes());
                rows.extend_from_slice(&position.to_be_bytes());
                write!(index, "{} 1 ", number).unwrap();
            }
        }
        let dict = format!(
            "<< /Type /XRef /Size {} /W [1 4 2] /Index [{}] /Length {} >>",
            self.size(),
            index.trim_end(),
            rows.len()
        );
        self.bytes
            .extend_from_slice(format!("{} 0 obj\n{}\nstream\n", id, dict).as_bytes());
        self.bytes.extend_from_slice(&rows);
        self.bytes.extend_from_slice(b"\nendstream\nendobj\n");

        let start = self.offset();
        let mut table = String::from("xref\n");
        if self.last_xref.is_none() {
            table.push_str("0 1\n0000000000 65535 f \n");
        }
        for (number, entry) in &self.pending {
            match *entry {
                Entry::Offset(offset) => write!(table, "{} 1\n{:010} 00000 n \n", number, offset).unwrap(),
                Entry::Compressed(..) => write!(table, "{} 1\n0000000000 00000 f \n", number).unwrap(),
            }
        }
        write!(
            table,
            "trailer\n<< /Size {} {} /XRefStm {} >>\nstartxref\n{}\n%%EOF\n",
            self.size(),
            self.trailer_tail(trailer),
            stream_offset,
            start
        )
        .unwrap();
        self.bytes.extend_from_slice(table.as_bytes());
        self.pending.clear();
        self.last_xref = Some(start);
        self
    }

    /// Offset of the newest xref section, relative to the header.
    pub fn last_xref(&self) -> usize {
        self.last_xref.expect("no xref section written")
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// A one-page document: catalog 1, pages 2, page 3, content stream 4.
#[allow(dead_code)]
pub fn one_page_document() -> Vec<u8> {
    PdfBuilder::new("1.4")
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>")
        .flate_stream(4, b"BT /F1 12 Tf 72 720 Td (hello) Tj ET")
        .xref_table("/Root 1 0 R")
        .build()
}

#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
