//! Spreadsheet workbooks (`.xlsx`).
//!
//! Every worksheet, in workbook order, is rendered as tab-separated rows
//! terminated by newlines. The grid starts at `A1` and extends to the
//! furthest cell present in the sheet; absent cells render as empty
//! strings. Cached values are used, never formulas.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use super::Decoded;
use super::ooxml::{OoxmlPackage, Relationship, attribute, relationship_id};
use crate::error::DecodeError;

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";
const REL_WORKSHEET: &str = "/worksheet";
const REL_SHARED_STRINGS: &str = "/sharedStrings";

/// Worksheet bounds: `XFD1048576`
const MAX_ROWS: u32 = 1_048_576;
const MAX_COLUMNS: u32 = 16_384;

/// Padded cells rendered across the whole workbook. Sparse sheets with a
/// far-away cell would otherwise expand into gigabytes of tabs.
const MAX_RENDERED_CELLS: u64 = 2_000_000;

pub fn decode(data: &[u8]) -> Result<Decoded, DecodeError> {
    let mut package = OoxmlPackage::open(data)?;
    let workbook_part = package.main_part(DEFAULT_WORKBOOK_PART)?;
    let workbook = package.read_xml(&workbook_part)?;
    let relationships = package.relationships(&workbook_part)?;

    let shared_strings = match relationships.iter().find(|r| r.has_type(REL_SHARED_STRINGS)) {
        Some(rel) => parse_shared_strings(&package.read_xml(&rel.target)?)?,
        None => Vec::new(),
    };

    let by_id: HashMap<&str, &Relationship> =
        relationships.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut text = String::new();
    let mut cell_budget = MAX_RENDERED_CELLS;
    for sheet in parse_sheet_list(&workbook)? {
        let Some(rel) = by_id.get(sheet.rel_id.as_str()) else {
            return Err(DecodeError::Malformed {
                message: format!("sheet {} has no relationship {}", sheet.name, sheet.rel_id),
            });
        };
        if !rel.has_type(REL_WORKSHEET) {
            debug!(sheet = %sheet.name, rel_type = %rel.rel_type, "Skipping non-worksheet sheet");
            continue;
        }

        let xml = package.read_xml(&rel.target)?;
        let cells = parse_cells(&xml, &shared_strings)?;
        render_grid(&cells, &mut cell_budget, &mut text)?;
    }

    Ok(Decoded {
        text,
        images: Vec::new(),
    })
}

struct SheetEntry {
    name: String,
    rel_id: String,
}

fn parse_sheet_list(xml: &str) -> Result<Vec<SheetEntry>, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                sheets.push(SheetEntry {
                    name: attribute(&e, b"name")?.unwrap_or_default(),
                    rel_id: relationship_id(&e)?.unwrap_or_default(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(sheets)
}

/// Shared string table. Phonetic runs (`rPh`) are not part of the value.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut phonetic_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => phonetic_depth += 1,
                b"t" => in_text = phonetic_depth == 0,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(e) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&e.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

/// A cell with 1-based coordinates
#[derive(Debug, PartialEq)]
struct Cell {
    row: u32,
    col: u32,
    value: String,
}

#[derive(Default)]
struct PendingCell {
    row: u32,
    col: u32,
    cell_type: String,
    raw: Option<String>,
    inline: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Capture {
    None,
    Value,
    Inline,
}

fn parse_cells(xml: &str, shared_strings: &[String]) -> Result<Vec<Cell>, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut cells = Vec::new();

    let mut row = 0u32;
    let mut col = 0u32;
    let mut pending: Option<PendingCell> = None;
    let mut in_inline = false;
    let mut phonetic_depth = 0usize;
    let mut capture = Capture::None;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row = match attribute(&e, b"r")? {
                    Some(r) => r
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|n| (1..=MAX_ROWS).contains(n))
                        .ok_or_else(|| DecodeError::Malformed {
                            message: format!("invalid row number {:?}", r),
                        })?,
                    None => next_index(row, MAX_ROWS, "row")?,
                };
                col = 0;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                (row, col) = cell_position(attribute(&e, b"r")?.as_deref(), row, col)?;
                pending = Some(PendingCell {
                    row,
                    col,
                    cell_type: attribute(&e, b"t")?.unwrap_or_default(),
                    ..Default::default()
                });
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                (row, col) = cell_position(attribute(&e, b"r")?.as_deref(), row, col)?;
                cells.push(Cell {
                    row,
                    col,
                    value: String::new(),
                });
            }
            Event::Start(e) => match e.local_name().as_ref() {
                b"v" if pending.is_some() => capture = Capture::Value,
                b"is" => in_inline = true,
                b"rPh" => phonetic_depth += 1,
                b"t" if in_inline && phonetic_depth == 0 => capture = Capture::Inline,
                _ => {}
            },
            Event::Text(e) if capture != Capture::None => {
                if let Some(cell) = pending.as_mut() {
                    let slot = match capture {
                        Capture::Value => &mut cell.raw,
                        _ => &mut cell.inline,
                    };
                    slot.get_or_insert_with(String::new).push_str(&e.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = Capture::None,
                b"is" => in_inline = false,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"c" => {
                    if let Some(cell) = pending.take() {
                        cells.push(Cell {
                            row: cell.row,
                            col: cell.col,
                            value: cell_value(&cell, shared_strings)?,
                        });
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(cells)
}

/// Position of a cell from its `r` reference, or the next column in the
/// current row when the reference is absent.
fn cell_position(reference: Option<&str>, row: u32, col: u32) -> Result<(u32, u32), DecodeError> {
    let Some(reference) = reference else {
        return Ok((row.max(1), next_index(col, MAX_COLUMNS, "column")?));
    };

    let reference = reference.trim();
    let split = reference
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(reference.len());
    let (letters, digits) = reference.split_at(split);

    let malformed = || DecodeError::Malformed {
        message: format!("invalid cell reference {:?}", reference),
    };

    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(malformed());
    }
    let column = letters
        .chars()
        .try_fold(0u32, |acc, c| {
            acc.checked_mul(26)?
                .checked_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)
        })
        .ok_or_else(malformed)?;

    let row = if digits.is_empty() {
        row.max(1)
    } else {
        digits.parse().map_err(|_| malformed())?
    };

    if column > MAX_COLUMNS || !(1..=MAX_ROWS).contains(&row) {
        return Err(malformed());
    }
    Ok((row, column))
}

/// The row or column after `current`, within the worksheet bounds
fn next_index(current: u32, max: u32, what: &str) -> Result<u32, DecodeError> {
    current
        .checked_add(1)
        .filter(|n| *n <= max)
        .ok_or_else(|| DecodeError::Malformed {
            message: format!("{} {} is past the worksheet bounds", what, current),
        })
}

fn cell_value(cell: &PendingCell, shared_strings: &[String]) -> Result<String, DecodeError> {
    match cell.cell_type.as_str() {
        "inlineStr" => Ok(cell.inline.clone().unwrap_or_default()),
        "s" => {
            let Some(raw) = cell.raw.as_deref() else {
                return Ok(String::new());
            };
            let index: usize = raw.trim().parse().map_err(|_| DecodeError::Malformed {
                message: format!("invalid shared string index {:?}", raw),
            })?;
            shared_strings
                .get(index)
                .cloned()
                .ok_or_else(|| DecodeError::Malformed {
                    message: format!("shared string index {} out of range", index),
                })
        }
        "b" => Ok(match cell.raw.as_deref().map(str::trim) {
            Some("1") => "True".to_string(),
            Some("0") => "False".to_string(),
            Some(other) => other.to_string(),
            None => String::new(),
        }),
        "str" | "e" | "d" => Ok(cell.raw.clone().unwrap_or_default()),
        _ => Ok(cell.raw.as_deref().map(format_number).unwrap_or_default()),
    }
}

/// Numeric cells: integers stay integers; anything with a fraction or an
/// exponent is a float and integral floats keep one decimal (`3.0`).
fn format_number(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.contains(['.', 'e', 'E']) {
        if let Ok(n) = raw.parse::<i64>() {
            return n.to_string();
        }
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 => format!("{:.1}", f),
        Ok(f) => f.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Append one sheet's grid, charging its padded size against `budget`
fn render_grid(cells: &[Cell], budget: &mut u64, out: &mut String) -> Result<(), DecodeError> {
    let (Some(max_row), Some(max_col)) = (
        cells.iter().map(|c| c.row).max(),
        cells.iter().map(|c| c.col).max(),
    ) else {
        return Ok(());
    };

    let size = u64::from(max_row) * u64::from(max_col);
    *budget = budget.checked_sub(size).ok_or_else(|| DecodeError::Malformed {
        message: format!(
            "sheet grid of {} rows by {} columns exceeds the {} cell limit",
            max_row, max_col, MAX_RENDERED_CELLS
        ),
    })?;

    let mut grid: HashMap<(u32, u32), &str> = HashMap::with_capacity(cells.len());
    for cell in cells {
        grid.insert((cell.row, cell.col), cell.value.as_str());
    }

    for row in 1..=max_row {
        for col in 1..=max_col {
            if col > 1 {
                out.push('\t');
            }
            if let Some(value) = grid.get(&(row, col)) {
                out.push_str(value);
            }
        }
        out.push('\n');
    }
    Ok(())
}
