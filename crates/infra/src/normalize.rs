//! Result normalization: batch output lines to a flat table keyed by
//! `custom_id`.
//!
//! Each output line looks like
//!
//! ```text
//! {"custom_id": "...", "response": {"status_code": 200, "body": {
//!     "model": "...", "usage": {...},
//!     "choices": [{"message": {"content": "<JSON-encoded answer object>"}}]}}}
//! ```
//!
//! The answer string is decoded and flattened together with the envelope.
//! Nested objects flatten to the last segment of their path; when two paths
//! end in the same name the deeper one wins, and among equal depths the later
//! one. Only the first choice is descended; any other array becomes a JSON text
//! cell.

use std::collections::HashMap;
use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const CUSTOM_ID: &str = "custom_id";

/// What to do with a line that cannot be normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log and record the line, keep going.
    #[default]
    Skip,
    /// Fail the whole fetch on the first bad line.
    Abort,
}

impl MalformedPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MalformedPolicy::Skip => "skip",
            MalformedPolicy::Abort => "abort",
        }
    }
}

impl core::fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(MalformedPolicy::Skip),
            "abort" => Ok(MalformedPolicy::Abort),
            other => Err(format!("expected 'skip' or 'abort', got '{other}'")),
        }
    }
}

/// A line that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("line {line}: {reason}")]
pub struct MalformedLine {
    /// 1-based line number in the raw output.
    pub line: usize,
    pub custom_id: Option<String>,
    pub reason: String,
}

/// One flat output row. Cells are in first-seen order, `custom_id` first.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    cells: Vec<(String, Value)>,
}

impl NormalizedRow {
    pub fn custom_id(&self) -> &str {
        self.cells
            .first()
            .and_then(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTable {
    /// Union of all row columns in first-seen order, `custom_id` first.
    pub columns: Vec<String>,
    pub rows: Vec<NormalizedRow>,
    pub skipped: Vec<MalformedLine>,
}

impl NormalizedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the table as CSV with a header row.
    pub fn write_csv<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        let header: Vec<String> = self.columns.iter().map(|c| escape_csv(c)).collect();
        writeln!(out, "{}", header.join(","))?;

        for row in &self.rows {
            let values: Vec<String> = self
                .columns
                .iter()
                .map(|col| row.get(col).map(csv_cell).unwrap_or_default())
                .collect();
            writeln!(out, "{}", values.join(","))?;
        }
        out.flush()
    }
}

/// Normalize raw line-delimited output.
///
/// Under [`MalformedPolicy::Abort`] the first bad line is returned as the
/// error; under `Skip` it is logged and listed in [`NormalizedTable::skipped`].
pub fn normalize(raw: &[u8], policy: MalformedPolicy) -> Result<NormalizedTable, MalformedLine> {
    let mut table = NormalizedTable {
        columns: vec![CUSTOM_ID.to_string()],
        ..NormalizedTable::default()
    };

    for (idx, line) in raw.split(|b| *b == b'\n').enumerate() {
        let line_no = idx + 1;
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim(),
            Err(_) => {
                let bad = MalformedLine {
                    line: line_no,
                    custom_id: None,
                    reason: "not valid UTF-8".to_string(),
                };
                reject(&mut table, bad, policy)?;
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }

        match normalize_line(text, line_no) {
            Ok(row) => {
                for name in row.columns() {
                    if !table.columns.iter().any(|c| c == name) {
                        table.columns.push(name.to_string());
                    }
                }
                table.rows.push(row);
            }
            Err(bad) => reject(&mut table, bad, policy)?,
        }
    }

    Ok(table)
}

fn reject(
    table: &mut NormalizedTable,
    bad: MalformedLine,
    policy: MalformedPolicy,
) -> Result<(), MalformedLine> {
    match policy {
        MalformedPolicy::Abort => Err(bad),
        MalformedPolicy::Skip => {
            tracing::warn!(
                line = bad.line,
                custom_id = bad.custom_id.as_deref().unwrap_or("-"),
                reason = %bad.reason,
                "skipping malformed output line"
            );
            table.skipped.push(bad);
            Ok(())
        }
    }
}

fn normalize_line(text: &str, line: usize) -> Result<NormalizedRow, MalformedLine> {
    let malformed = |custom_id: Option<&str>, reason: String| MalformedLine {
        line,
        custom_id: custom_id.map(str::to_string),
        reason,
    };

    let mut value: Value =
        serde_json::from_str(text).map_err(|e| malformed(None, format!("not JSON: {e}")))?;

    let custom_id = value
        .get(CUSTOM_ID)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(None, "missing custom_id".to_string()))?;
    let id = Some(custom_id.as_str());

    let content = value
        .pointer_mut("/response/body/choices/0/message/content")
        .ok_or_else(|| malformed(id, "missing response.body.choices[0].message.content".to_string()))?;
    let answer = match &mut *content {
        Value::String(encoded) => serde_json::from_str::<Value>(encoded)
            .map_err(|e| malformed(id, format!("answer content is not JSON: {e}")))?,
        other => other.take(),
    };
    if !answer.is_object() {
        return Err(malformed(id, "answer content is not a JSON object".to_string()));
    }
    *content = answer;

    let mut flat = Flattener::default();
    flat.visit(value, 0);

    let mut cells = vec![(CUSTOM_ID.to_string(), Value::String(custom_id))];
    cells.extend(
        flat.cells
            .into_iter()
            .filter(|cell| cell.name != CUSTOM_ID)
            .map(|cell| (cell.name, cell.value)),
    );
    Ok(NormalizedRow { cells })
}

struct Cell {
    name: String,
    depth: usize,
    value: Value,
}

#[derive(Default)]
struct Flattener {
    cells: Vec<Cell>,
    index: HashMap<String, usize>,
}

impl Flattener {
    fn visit(&mut self, value: Value, depth: usize) {
        let Value::Object(map) = value else {
            return;
        };
        for (key, child) in map {
            match child {
                Value::Object(_) => self.visit(child, depth + 1),
                Value::Array(items) if key == "choices" => {
                    if let Some(first) = items.into_iter().next() {
                        self.visit(first, depth + 1);
                    }
                }
                leaf => self.insert(key, depth + 1, leaf),
            }
        }
    }

    fn insert(&mut self, name: String, depth: usize, value: Value) {
        let value = match value {
            Value::Array(_) => Value::String(value.to_string()),
            other => other,
        };
        match self.index.get(&name) {
            Some(&pos) => {
                let cell = &mut self.cells[pos];
                if depth >= cell.depth {
                    cell.depth = depth;
                    cell.value = value;
                }
            }
            None => {
                self.index.insert(name.clone(), self.cells.len());
                self.cells.push(Cell { name, depth, value });
            }
        }
    }
}

fn csv_cell(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    };
    escape_csv(&text)
}

fn escape_csv(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') || text.contains('\r') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}
