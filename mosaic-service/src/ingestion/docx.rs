//! Word-processing documents (`.docx`).
//!
//! Text is the body paragraphs in document order, newline-joined. Only
//! paragraphs that are direct children of `w:body` count: table cells and
//! text boxes hold nested paragraphs that are skipped. Images are every
//! internal image relationship of the main part, in enumeration order.

use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;

use super::Decoded;
use super::ooxml::{OoxmlPackage, Relationship};
use crate::error::DecodeError;

const DEFAULT_MAIN_PART: &str = "word/document.xml";

pub fn decode(data: &[u8]) -> Result<Decoded, DecodeError> {
    let mut package = OoxmlPackage::open(data)?;
    let main_part = package.main_part(DEFAULT_MAIN_PART)?;
    let xml = package.read_xml(&main_part)?;
    let text = body_paragraphs(&xml)?.join("\n");

    let relationships = package.relationships(&main_part)?;
    let images = read_images(&mut package, &relationships)?;

    Ok(Decoded { text, images })
}

/// Read every internal image target, skipping targets missing from the
/// package.
pub(super) fn read_images(
    package: &mut OoxmlPackage<'_>,
    relationships: &[Relationship],
) -> Result<Vec<Bytes>, DecodeError> {
    let mut images = Vec::new();
    for rel in relationships.iter().filter(|r| r.is_image()) {
        match package.read_part(&rel.target) {
            Ok(data) => images.push(Bytes::from(data)),
            Err(DecodeError::MissingPart { part }) => {
                warn!(part = %part, id = %rel.id, "Image relationship points at a missing part");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(images)
}

/// Text of each paragraph whose parent is `w:body`
fn body_paragraphs(xml: &str) -> Result<Vec<String>, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut paragraphs = Vec::new();

    // Paragraph being collected, and how many paragraphs are open inside it
    let mut current: Option<String> = None;
    let mut nested = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"p" if current.is_some() => nested += 1,
                    b"p" if parent_is_body(&stack) => current = Some(String::new()),
                    b"t" if current.is_some() && nested == 0 => in_text = true,
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                if let Some(paragraph) = current.as_mut() {
                    if nested == 0 {
                        match e.local_name().as_ref() {
                            b"tab" => paragraph.push('\t'),
                            b"br" | b"cr" => paragraph.push('\n'),
                            _ => {}
                        }
                    }
                } else if e.local_name().as_ref() == b"p" && parent_is_body(&stack) {
                    paragraphs.push(String::new());
                }
            }
            Event::Text(e) if in_text => {
                if let Some(paragraph) = current.as_mut() {
                    paragraph.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) if in_text => {
                if let Some(paragraph) = current.as_mut() {
                    paragraph.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(e) => {
                stack.pop();
                match e.local_name().as_ref() {
                    b"t" => in_text = false,
                    b"p" if nested > 0 => nested -= 1,
                    b"p" => {
                        if let Some(paragraph) = current.take() {
                            paragraphs.push(paragraph);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn parent_is_body(stack: &[Vec<u8>]) -> bool {
    stack.last().is_some_and(|name| name.as_slice() == b"body")
}
