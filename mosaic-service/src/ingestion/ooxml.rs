//! Shared access to Office Open XML packages.
//!
//! All three supported formats are zip archives of XML parts linked together
//! by `_rels/*.rels` relationship parts. This module owns the archive, reads
//! parts and resolves relationship targets to part names.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::DecodeError;

/// Largest single part we are willing to inflate
const MAX_PART_SIZE: u64 = 256 * 1024 * 1024;

const REL_OFFICE_DOCUMENT: &str = "/officeDocument";
const REL_IMAGE: &str = "/image";

/// One entry of a `.rels` part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    /// Target resolved to an absolute part name (no leading slash), or the
    /// raw URI for external targets
    pub target: String,
    pub external: bool,
}

impl Relationship {
    pub fn is_image(&self) -> bool {
        !self.external && self.rel_type.ends_with(REL_IMAGE)
    }

    pub fn has_type(&self, suffix: &str) -> bool {
        self.rel_type.ends_with(suffix)
    }
}

/// An opened OOXML package
pub struct OoxmlPackage<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> OoxmlPackage<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self, DecodeError> {
        let archive = ZipArchive::new(Cursor::new(data))?;
        Ok(Self { archive })
    }

    /// Read a part's raw bytes
    pub fn read_part(&mut self, name: &str) -> Result<Vec<u8>, DecodeError> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(DecodeError::MissingPart {
                    part: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if file.size() > MAX_PART_SIZE {
            return Err(DecodeError::Malformed {
                message: format!("part {} is too large ({} bytes)", name, file.size()),
            });
        }

        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read a part as UTF-8 XML text
    pub fn read_xml(&mut self, name: &str) -> Result<String, DecodeError> {
        let bytes = self.read_part(name)?;
        let text = String::from_utf8(bytes).map_err(|e| DecodeError::Malformed {
            message: format!("part {} is not valid UTF-8: {}", name, e),
        })?;
        Ok(match text.strip_prefix('\u{feff}') {
            Some(stripped) => stripped.to_string(),
            None => text,
        })
    }

    /// Read an optional XML part
    pub fn try_read_xml(&mut self, name: &str) -> Result<Option<String>, DecodeError> {
        match self.read_xml(name) {
            Ok(xml) => Ok(Some(xml)),
            Err(DecodeError::MissingPart { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Relationships of `part`, in the order they are enumerated in its
    /// `.rels` part. A part without a `.rels` part has no relationships.
    pub fn relationships(&mut self, part: &str) -> Result<Vec<Relationship>, DecodeError> {
        let rels_name = rels_path_for(part);
        match self.try_read_xml(&rels_name)? {
            Some(xml) => parse_relationships(&xml, part),
            None => Ok(Vec::new()),
        }
    }

    /// Locate the main document part through the package relationships,
    /// falling back to the conventional location.
    pub fn main_part(&mut self, fallback: &str) -> Result<String, DecodeError> {
        let root_rels = self.relationships("")?;
        Ok(root_rels
            .into_iter()
            .find(|rel| !rel.external && rel.has_type(REL_OFFICE_DOCUMENT))
            .map(|rel| rel.target)
            .unwrap_or_else(|| fallback.to_string()))
    }
}

/// Name of the relationships part describing `part`.
///
/// `word/document.xml` -> `word/_rels/document.xml.rels`; the package
/// itself (`""`) -> `_rels/.rels`.
pub fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target against the directory of its source part
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize(absolute.split('/').collect());
    }

    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    segments.extend(target.split('/'));
    normalize(segments)
}

fn normalize(segments: Vec<&str>) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out.join("/")
}

fn parse_relationships(xml: &str, source_part: &str) -> Result<Vec<Relationship>, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut rels = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attribute(&e, b"Id")?.unwrap_or_default();
                let rel_type = attribute(&e, b"Type")?.unwrap_or_default();
                let raw_target = attribute(&e, b"Target")?.unwrap_or_default();
                let external = attribute(&e, b"TargetMode")?
                    .is_some_and(|mode| mode.eq_ignore_ascii_case("External"));

                let target = if external {
                    raw_target
                } else {
                    resolve_target(source_part, &raw_target)
                };

                rels.push(Relationship {
                    id,
                    rel_type,
                    target,
                    external,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rels)
}

/// Unescaped value of the attribute whose local name is `local`
pub fn attribute(element: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, DecodeError> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Value of the namespaced `r:id` attribute, ignoring an unprefixed `id`
/// on the same element (`<p:sldId id="256" r:id="rId2"/>`).
pub fn relationship_id(element: &BytesStart<'_>) -> Result<Option<String>, DecodeError> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.prefix().is_some() && attr.key.local_name().as_ref() == b"id" {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
