use pdfgraft::{Document, FileState, Object, SaveOptions, XrefEntry, XrefType, dictionary};

mod utils;
use utils::{PdfBuilder, init_logging, one_page_document};

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn original_bytes_are_kept_verbatim() -> pdfgraft::Result<()> {
    init_logging();
    let original = one_page_document();
    let mut doc = Document::load_mem(&original)?;
    let old_startxref = doc.revisions[0].offset;

    doc.get_dictionary_mut((3, 0))?.set("Rotate", 90);
    let mut out = Vec::new();
    doc.save_incremental_to(&mut out)?;

    assert!(out.starts_with(&original));
    let appended = &out[original.len()..];
    assert!(contains(appended, format!("/Prev {}", old_startxref).as_bytes()));
    assert!(contains(appended, b"3 0 obj"));
    assert!(!contains(appended, b"4 0 obj"));
    assert_eq!(doc.state(), FileState::Flushed);

    let reloaded = Document::load_mem(&out)?;
    assert_eq!(reloaded.revisions.len(), 2);
    assert_eq!(reloaded.revisions[1].offset, old_startxref);
    assert_eq!(reloaded.get_dictionary((3, 0))?.get(b"Rotate")?.as_i64()?, 90);
    Ok(())
}

#[test]
fn new_objects_extend_size() -> pdfgraft::Result<()> {
    let original = one_page_document();
    let mut doc = Document::load_mem(&original)?;
    let note = doc.add_object(Object::string_literal("appended"));
    assert_eq!(note, (5, 0));
    doc.get_dictionary_mut((1, 0))?.set("Note", note);

    let mut out = Vec::new();
    doc.save_incremental_to(&mut out)?;
    let reloaded = Document::load_mem(&out)?;
    assert_eq!(reloaded.trailer.get(b"Size")?.as_i64()?, 6);
    assert_eq!(reloaded.get_object(note)?.as_str()?, b"appended");
    assert_eq!(reloaded.revisions[0].objects, vec![1, 5]);
    Ok(())
}

#[test]
fn removed_objects_are_freed_in_the_update() -> pdfgraft::Result<()> {
    let mut doc = Document::load_mem(&one_page_document())?;
    doc.remove_object((4, 0))?;
    doc.get_dictionary_mut((3, 0))?.remove(b"Contents");

    let mut out = Vec::new();
    doc.save_incremental_to(&mut out)?;
    let reloaded = Document::load_mem(&out)?;
    assert_eq!(reloaded.reference_table.get(4), Some(&XrefEntry::Free { next: 0, generation: 1 }));
    assert!(!reloaded.has_object((4, 0)));
    Ok(())
}

#[test]
fn xref_stream_files_get_an_xref_stream_update() -> pdfgraft::Result<()> {
    let original = PdfBuilder::new("1.5")
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .xref_stream(3, "/Root 1 0 R")
        .build();
    let mut doc = Document::load_mem(&original)?;
    doc.get_dictionary_mut((1, 0))?.set("Lang", Object::string_literal("en"));

    let mut out = Vec::new();
    doc.save_incremental_to(&mut out)?;
    assert!(out.starts_with(&original));
    assert!(contains(&out[original.len()..], b"/Type/XRef"));

    let reloaded = Document::load_mem(&out)?;
    assert_eq!(reloaded.revisions[0].xref_type, XrefType::CrossReferenceStream);
    assert_eq!(reloaded.catalog()?.get(b"Lang")?.as_str()?, b"en");
    Ok(())
}

#[test]
fn repeated_updates_chain_their_sections() -> pdfgraft::Result<()> {
    let mut doc = Document::load_mem(&one_page_document())?;
    let mut out = Vec::new();
    for rotate in [90, 180] {
        doc.get_dictionary_mut((3, 0))?.set("Rotate", rotate);
        out.clear();
        doc.save_incremental_to(&mut out)?;
    }
    assert_eq!(doc.revisions.len(), 3);

    let reloaded = Document::load_mem(&out)?;
    assert_eq!(reloaded.revisions.len(), 3);
    assert_eq!(reloaded.get_dictionary((3, 0))?.get(b"Rotate")?.as_i64()?, 180);
    Ok(())
}

#[test]
fn documents_without_source_get_a_full_save() -> pdfgraft::Result<()> {
    let mut doc = Document::new();
    let catalog = doc.add_object(dictionary! { "Type" => "Catalog" });
    doc.trailer.set("Root", catalog);

    let mut out = Vec::new();
    doc.save_incremental_to_with_options(&mut out, &SaveOptions::default())?;
    let reloaded = Document::load_mem(&out)?;
    assert_eq!(reloaded.revisions.len(), 1);
    assert_eq!(reloaded.trailer.get(b"Size")?.as_i64()?, 2);
    Ok(())
}

#[test]
fn incremental_save_to_path() -> pdfgraft::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("report.pdf");
    let original = one_page_document();
    std::fs::write(&path, &original)?;

    let mut doc = Document::load(&path)?;
    doc.get_dictionary_mut((3, 0))?.set("Rotate", 270);
    doc.save_incremental(&path)?;

    let written = std::fs::read(&path)?;
    assert!(written.starts_with(&original));
    assert_eq!(
        Document::load(&path)?.get_dictionary((3, 0))?.get(b"Rotate")?.as_i64()?,
        270
    );
    Ok(())
}
