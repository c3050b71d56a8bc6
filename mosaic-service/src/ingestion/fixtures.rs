//! In-memory office documents for tests.

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// 1x1 PNG used wherever a document needs an embedded picture
pub const TINY_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNgYAAAAAMAASsJTYQAAAAASUVORK5CYII=";

pub fn tiny_png() -> Vec<u8> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(TINY_PNG_BASE64)
        .unwrap()
}

/// Zip the given parts into a package
pub fn build_package(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in parts {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Relationships part from `(id, type suffix, target)` triples
pub fn rels(entries: &[(&str, &str, &str)]) -> String {
    let mut xml = format!(r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="{REL_NS}">"#);
    for (id, kind, target) in entries {
        xml.push_str(&format!(
            r#"<Relationship Id="{id}" Type="{REL_BASE}/{kind}" Target="{target}"/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

/// Word document with one body paragraph per entry and the given images
pub fn docx(paragraphs: &[&str], images: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut body = String::new();
    for text in paragraphs {
        body.push_str(&format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#));
    }
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
    );

    let root_rels = rels(&[("rId1", "officeDocument", "word/document.xml")]);
    let image_rels: Vec<(String, String)> = images
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (format!("rId{}", i + 10), format!("media/{name}")))
        .collect();
    let doc_rels = rels(
        &image_rels
            .iter()
            .map(|(id, target)| (id.as_str(), "image", target.as_str()))
            .collect::<Vec<_>>(),
    );

    let media_names: Vec<String> = images
        .iter()
        .map(|(name, _)| format!("word/media/{name}"))
        .collect();
    let mut parts: Vec<(&str, &[u8])> = vec![
        ("_rels/.rels", root_rels.as_bytes()),
        ("word/document.xml", document.as_bytes()),
        ("word/_rels/document.xml.rels", doc_rels.as_bytes()),
    ];
    for (name, (_, data)) in media_names.iter().zip(images) {
        parts.push((name.as_str(), data.as_slice()));
    }
    build_package(&parts)
}

/// Workbook whose sheets contain the given raw `<sheetData>` XML
pub fn xlsx(sheets: &[(&str, &str)], shared_strings: &[&str]) -> Vec<u8> {
    let mut sheet_entries = String::new();
    let mut wb_rels = Vec::new();
    let mut sheet_parts = Vec::new();
    for (i, (name, data)) in sheets.iter().enumerate() {
        let id = format!("rId{}", i + 1);
        sheet_entries.push_str(&format!(
            r#"<sheet name="{name}" sheetId="{}" r:id="{id}"/>"#,
            i + 1
        ));
        wb_rels.push((id, format!("worksheets/sheet{}.xml", i + 1)));
        sheet_parts.push((
            format!("xl/worksheets/sheet{}.xml", i + 1),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{data}</sheetData></worksheet>"#
            ),
        ));
    }
    let workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="{REL_BASE}"><sheets>{sheet_entries}</sheets></workbook>"#
    );

    let mut rel_entries: Vec<(&str, &str, &str)> = wb_rels
        .iter()
        .map(|(id, target)| (id.as_str(), "worksheet", target.as_str()))
        .collect();
    rel_entries.push(("rIdSst", "sharedStrings", "sharedStrings.xml"));
    let workbook_rels = rels(&rel_entries);

    let mut sst = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
    );
    for s in shared_strings {
        sst.push_str(&format!("<si><t>{s}</t></si>"));
    }
    sst.push_str("</sst>");

    let root_rels = rels(&[("rId1", "officeDocument", "xl/workbook.xml")]);
    let mut parts: Vec<(&str, &[u8])> = vec![
        ("_rels/.rels", root_rels.as_bytes()),
        ("xl/workbook.xml", workbook.as_bytes()),
        ("xl/_rels/workbook.xml.rels", workbook_rels.as_bytes()),
        ("xl/sharedStrings.xml", sst.as_bytes()),
    ];
    for (name, xml) in &sheet_parts {
        parts.push((name.as_str(), xml.as_bytes()));
    }
    build_package(&parts)
}

/// A slide: raw `<p:spTree>` content plus `(rId, media file)` image links
pub struct SlideFixture<'a> {
    pub shapes: String,
    pub images: Vec<(&'a str, &'a str)>,
}

/// Text box shape XML
pub fn text_shape(paragraphs: &[&str]) -> String {
    let mut body = String::new();
    for p in paragraphs {
        body.push_str(&format!("<a:p><a:r><a:t>{p}</a:t></a:r></a:p>"));
    }
    format!("<p:sp><p:nvSpPr/><p:txBody><a:bodyPr/>{body}</p:txBody></p:sp>")
}

/// Picture shape XML referencing relationship `rid`
pub fn picture_shape(rid: &str) -> String {
    format!(r#"<p:pic><p:nvPicPr/><p:blipFill><a:blip r:embed="{rid}"/></p:blipFill></p:pic>"#)
}

/// Presentation from slides plus the media files they reference
pub fn pptx(slides: &[SlideFixture<'_>], media: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut ids = String::new();
    let mut pres_rels = Vec::new();
    let mut slide_parts = Vec::new();
    for (i, slide) in slides.iter().enumerate() {
        let id = format!("rId{}", i + 2);
        ids.push_str(&format!(r#"<p:sldId id="{}" r:id="{id}"/>"#, 256 + i));
        pres_rels.push((id, format!("slides/slide{}.xml", i + 1)));

        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="{REL_BASE}" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:nvGrpSpPr/><p:grpSpPr/>{}</p:spTree></p:cSld></p:sld>"#,
            slide.shapes
        );
        let links: Vec<(String, String)> = slide
            .images
            .iter()
            .map(|(rid, file)| (rid.to_string(), format!("../media/{file}")))
            .collect();
        let slide_rels = rels(
            &links
                .iter()
                .map(|(rid, target)| (rid.as_str(), "image", target.as_str()))
                .collect::<Vec<_>>(),
        );
        slide_parts.push((
            format!("ppt/slides/slide{}.xml", i + 1),
            xml,
            format!("ppt/slides/_rels/slide{}.xml.rels", i + 1),
            slide_rels,
        ));
    }

    let presentation = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><p:presentation xmlns:r="{REL_BASE}" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldIdLst>{ids}</p:sldIdLst></p:presentation>"#
    );
    let pres_rel_entries: Vec<(&str, &str, &str)> = pres_rels
        .iter()
        .map(|(id, target)| (id.as_str(), "slide", target.as_str()))
        .collect();
    let presentation_rels = rels(&pres_rel_entries);
    let root_rels = rels(&[("rId1", "officeDocument", "ppt/presentation.xml")]);

    let media_names: Vec<String> = media
        .iter()
        .map(|(name, _)| format!("ppt/media/{name}"))
        .collect();

    let mut parts: Vec<(&str, &[u8])> = vec![
        ("_rels/.rels", root_rels.as_bytes()),
        ("ppt/presentation.xml", presentation.as_bytes()),
        ("ppt/_rels/presentation.xml.rels", presentation_rels.as_bytes()),
    ];
    for (slide_name, slide_xml, rels_name, rels_xml) in &slide_parts {
        parts.push((slide_name.as_str(), slide_xml.as_bytes()));
        parts.push((rels_name.as_str(), rels_xml.as_bytes()));
    }
    for (name, (_, data)) in media_names.iter().zip(media) {
        parts.push((name.as_str(), data.as_slice()));
    }
    build_package(&parts)
}
