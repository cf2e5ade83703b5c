use pdfgraft::{Document, Error, FileState, Object, ParseError, StructureError, Warning, XrefEntry, XrefType};

mod utils;
use utils::{PdfBuilder, init_logging, one_page_document};

#[test]
fn load_resolves_objects_lazily() -> pdfgraft::Result<()> {
    init_logging();
    let doc = Document::load_mem(&one_page_document())?;
    assert_eq!(doc.version, "1.4");
    assert_eq!(doc.state(), FileState::Reopened);
    assert_eq!(doc.object_count(), 4);
    assert_eq!(doc.get_pages().len(), 1);

    let content = doc.get_object((4, 0))?.as_stream()?;
    assert_eq!(
        content.decompressed_content()?,
        b"BT /F1 12 Tf 72 720 Td (hello) Tj ET"
    );
    assert!(std::ptr::eq(doc.get_object((4, 0))?, doc.get_object((4, 0))?));
    assert!(doc.warnings().is_empty());
    Ok(())
}

#[test]
fn junk_before_the_header_is_skipped() -> pdfgraft::Result<()> {
    let bytes = PdfBuilder::with_prefix(b"MIME junk\r\n", "1.6")
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .xref_table("/Root 1 0 R")
        .build();
    let doc = Document::load_mem(&bytes)?;
    assert_eq!(doc.version, "1.6");
    assert!(doc.catalog()?.has_type(b"Catalog"));
    Ok(())
}

#[test]
fn newest_revision_wins() -> pdfgraft::Result<()> {
    let builder = PdfBuilder::new("1.4")
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, "(first)")
        .xref_table("/Root 1 0 R");
    let first_xref = builder.last_xref();
    let bytes = builder.object(3, "(second)").xref_table("/Root 1 0 R").build();

    let doc = Document::load_mem(&bytes)?;
    assert_eq!(doc.get_object((3, 0))?.as_str()?, b"second");
    assert_eq!(doc.revisions.len(), 2);
    assert_eq!(doc.revisions[1].offset, first_xref);
    assert!(!doc.trailer.has(b"Prev"));
    Ok(())
}

#[test]
fn object_stream_members_are_realized() -> pdfgraft::Result<()> {
    let bytes = PdfBuilder::new("1.5")
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object_stream(5, &[(2, "<< /Type /Pages /Kids [] /Count 0 >>"), (3, "[1 2 3]")])
        .xref_stream(6, "/Root 1 0 R")
        .build();

    let doc = Document::load_mem(&bytes)?;
    assert_eq!(doc.reference_table.xref_type, XrefType::CrossReferenceStream);
    assert_eq!(doc.get_object((3, 0))?.as_array()?.len(), 3);
    assert!(doc.get_dictionary((2, 0))?.has_type(b"Pages"));
    assert!(doc.warnings().is_empty());
    Ok(())
}

#[test]
fn hybrid_sections_keep_object_stream_members() -> pdfgraft::Result<()> {
    let bytes = PdfBuilder::new("1.5")
        .object(1, "<< /Type /Catalog /Pages 2 0 R /Extra 3 0 R >>")
        .object_stream(4, &[(2, "<< /Type /Pages /Kids [] /Count 0 >>"), (3, "(member)")])
        .hybrid_xref(5, "/Root 1 0 R")
        .build();

    let doc = Document::load_mem(&bytes)?;
    assert_eq!(doc.reference_table.get(3), Some(&XrefEntry::Compressed { container: 4, index: 1 }));
    assert!(doc.has_object((3, 0)));
    let extra = doc.catalog()?.get(b"Extra")?;
    assert_eq!(doc.dereference(extra)?.1.as_str()?, b"member");
    assert!(doc.get_dictionary((2, 0))?.has_type(b"Pages"));
    assert!(doc.warnings().is_empty());
    Ok(())
}

#[test]
fn indirect_length_is_resolved() -> pdfgraft::Result<()> {
    let mut bytes = PdfBuilder::new("1.4")
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(4, "5");
    // Length points at object 4; the body is written by hand.
    let data = "3 0 obj\n<< /Length 4 0 R >>\nstream\nabcde\nendstream\nendobj\n";
    bytes = bytes.raw(3, data);
    let doc = Document::load_mem(&bytes.xref_table("/Root 1 0 R").build())?;
    assert_eq!(doc.get_object((3, 0))?.as_stream()?.content, b"abcde");
    Ok(())
}

#[test]
fn corrupt_object_becomes_null_with_warning() -> pdfgraft::Result<()> {
    let bytes = PdfBuilder::new("1.4")
        .object(1, "<< /Type /Catalog /Pages 2 0 R /Broken 3 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, "<< /Unterminated [1 2")
        .xref_table("/Root 1 0 R")
        .build();

    let doc = Document::load_mem(&bytes)?;
    assert_eq!(doc.get_object((3, 0))?, &Object::Null);
    assert!(matches!(
        doc.warnings().as_slice(),
        [Warning::CorruptObject { id: (3, 0), .. }]
    ));
    // The rest of the document is still usable.
    assert!(doc.get_dictionary((2, 0))?.has_type(b"Pages"));
    Ok(())
}

#[test]
fn missing_startxref_fails_to_open() {
    let bytes = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n";
    assert!(matches!(
        Document::load_mem(bytes),
        Err(Error::Structure(StructureError::MissingStartXref))
    ));
}

#[test]
fn missing_root_fails_to_open() {
    let bytes = PdfBuilder::new("1.4")
        .object(1, "<< /Type /Catalog >>")
        .xref_table("")
        .build();
    assert!(matches!(
        Document::load_mem(&bytes),
        Err(Error::Structure(StructureError::MissingRoot))
    ));
}

#[test]
fn not_a_pdf() {
    assert!(matches!(
        Document::load_mem(b"GIF89a"),
        Err(Error::Parse(ParseError::InvalidFileHeader))
    ));
}

#[test]
fn encrypted_documents_are_read_only() -> pdfgraft::Result<()> {
    let bytes = PdfBuilder::new("1.4")
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, "<< /Filter /Standard /V 2 /R 3 >>")
        .xref_table("/Root 1 0 R /Encrypt 3 0 R")
        .build();
    let mut doc = Document::load_mem(&bytes)?;
    assert!(doc.is_encrypted());
    let mut out = Vec::new();
    assert!(matches!(doc.save_to(&mut out), Err(Error::Encrypted)));
    assert!(matches!(doc.save_incremental_to(&mut out), Err(Error::Encrypted)));
    Ok(())
}
