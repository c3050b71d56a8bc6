//! Presentation decks (`.pptx`).

use std::collections::HashMap;

use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

use super::Decoded;
use super::ooxml::{OoxmlPackage, Relationship, attribute, relationship_id};
use crate::error::DecodeError;

const DEFAULT_PRESENTATION_PART: &str = "ppt/presentation.xml";
const REL_SLIDE: &str = "/slide";

/// Slides in presentation order. Each slide's text is its non-empty shape
/// texts joined with newlines; slide texts (empty ones included) are joined
/// with newlines. Pictures follow shape order across the whole deck.
pub fn decode(data: &[u8]) -> Result<Decoded, DecodeError> {
    let mut package = OoxmlPackage::open(data)?;
    let presentation_part = package.main_part(DEFAULT_PRESENTATION_PART)?;
    let presentation = package.read_xml(&presentation_part)?;
    let relationships = package.relationships(&presentation_part)?;
    let by_id: HashMap<&str, &Relationship> =
        relationships.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut slide_texts = Vec::new();
    let mut images = Vec::new();

    for rel_id in parse_slide_ids(&presentation)? {
        let Some(rel) = by_id.get(rel_id.as_str()).filter(|r| r.has_type(REL_SLIDE)) else {
            return Err(DecodeError::Malformed {
                message: format!("slide relationship {} not found", rel_id),
            });
        };

        let xml = package.read_xml(&rel.target)?;
        let slide = parse_slide(&xml)?;
        slide_texts.push(slide.shape_texts.join("\n"));

        if slide.image_refs.is_empty() {
            continue;
        }
        let slide_rels = package.relationships(&rel.target)?;
        for image_ref in &slide.image_refs {
            let Some(target) = slide_rels
                .iter()
                .find(|r| &r.id == image_ref && r.is_image())
                .map(|r| r.target.clone())
            else {
                warn!(slide = %rel.target, id = %image_ref, "Picture has no internal image relationship");
                continue;
            };
            match package.read_part(&target) {
                Ok(data) => images.push(Bytes::from(data)),
                Err(DecodeError::MissingPart { part }) => {
                    warn!(slide = %rel.target, part = %part, "Picture points at a missing part");
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(Decoded {
        text: slide_texts.join("\n"),
        images,
    })
}

fn parse_slide_ids(xml: &str) -> Result<Vec<String>, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut ids = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sldId" => {
                if let Some(id) = relationship_id(&e)? {
                    ids.push(id);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(ids)
}

#[derive(Debug, Default)]
struct SlideContent {
    shape_texts: Vec<String>,
    /// Relationship ids of pictures, in shape order
    image_refs: Vec<String>,
}

/// Text of the `p:sp` shape being read
#[derive(Default)]
struct ShapeText {
    paragraphs: Vec<String>,
    current: Option<String>,
}

fn parse_slide(xml: &str) -> Result<SlideContent, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut slide = SlideContent::default();

    let mut shape: Option<ShapeText> = None;
    // Open `p:sp` / `p:pic` elements; pictures inside tables and charts are
    // not shapes of the slide
    let mut drawable_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                match e.local_name().as_ref() {
                    b"sp" => {
                        shape = Some(ShapeText::default());
                        drawable_depth += 1;
                    }
                    b"pic" => drawable_depth += 1,
                    b"p" => {
                        if let Some(s) = shape.as_mut() {
                            s.current = Some(String::new());
                        }
                    }
                    b"t" => in_text = shape.as_ref().is_some_and(|s| s.current.is_some()),
                    b"blip" if drawable_depth > 0 => push_blip(&e, &mut slide)?,
                    _ => {}
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"br" => {
                    if let Some(paragraph) = shape.as_mut().and_then(|s| s.current.as_mut()) {
                        paragraph.push('\n');
                    }
                }
                b"p" => {
                    if let Some(s) = shape.as_mut() {
                        s.paragraphs.push(String::new());
                    }
                }
                b"blip" if drawable_depth > 0 => push_blip(&e, &mut slide)?,
                _ => {}
            },
            Event::Text(e) if in_text => {
                if let Some(paragraph) = shape.as_mut().and_then(|s| s.current.as_mut()) {
                    paragraph.push_str(&e.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(s) = shape.as_mut() {
                        if let Some(paragraph) = s.current.take() {
                            s.paragraphs.push(paragraph);
                        }
                    }
                }
                b"sp" => {
                    drawable_depth = drawable_depth.saturating_sub(1);
                    if let Some(s) = shape.take() {
                        let text = s.paragraphs.join("\n");
                        if !text.is_empty() {
                            slide.shape_texts.push(text);
                        }
                    }
                }
                b"pic" => drawable_depth = drawable_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(slide)
}

fn push_blip(element: &BytesStart<'_>, slide: &mut SlideContent) -> Result<(), DecodeError> {
    if let Some(id) = attribute(element, b"embed")? {
        slide.image_refs.push(id);
    }
    Ok(())
}
