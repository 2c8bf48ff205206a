//! Dataframe summary parsing and comparison.
//!
//! Student scripts print summaries such as `df.shape: (3, 7)` or a
//! `Dtypes:` block followed by one `name  type` pair per line. The parser
//! extracts the labelled sections from free-form stdout into a
//! [`DataFrameSummary`]; [`compare`] checks an expectation against it and
//! returns one feedback line per mismatching field.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::contract::{DataframeExpectation, ExpectedDtypes, ExpectedValue};

/// Summary fields recognised in output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryField {
    Shape,
    Columns,
    Head,
    Dtypes,
}

impl SummaryField {
    pub fn name(&self) -> &'static str {
        match self {
            SummaryField::Shape => "shape",
            SummaryField::Columns => "columns",
            SummaryField::Head => "head",
            SummaryField::Dtypes => "dtypes",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "shape" => Some(SummaryField::Shape),
            "columns" => Some(SummaryField::Columns),
            "head" => Some(SummaryField::Head),
            "dtypes" => Some(SummaryField::Dtypes),
            _ => None,
        }
    }

    fn is_block(&self) -> bool {
        matches!(self, SummaryField::Head | SummaryField::Dtypes)
    }
}

/// Raw text captured under each label, before any parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummarySections {
    pub shape: Option<String>,
    pub columns: Option<String>,
    pub head: Option<String>,
    pub dtypes: Option<String>,
}

impl SummarySections {
    pub fn get(&self, field: SummaryField) -> Option<&str> {
        match field {
            SummaryField::Shape => self.shape.as_deref(),
            SummaryField::Columns => self.columns.as_deref(),
            SummaryField::Head => self.head.as_deref(),
            SummaryField::Dtypes => self.dtypes.as_deref(),
        }
    }

    fn slot(&mut self, field: SummaryField) -> &mut Option<String> {
        match field {
            SummaryField::Shape => &mut self.shape,
            SummaryField::Columns => &mut self.columns,
            SummaryField::Head => &mut self.head,
            SummaryField::Dtypes => &mut self.dtypes,
        }
    }
}

/// Parsed summary; a field is `None` when its label was absent or unparsable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFrameSummary {
    pub shape: Option<Vec<i64>>,
    pub columns: Option<Vec<String>>,
    pub head: Option<String>,
    pub dtypes: Option<BTreeMap<String, String>>,
}

impl DataFrameSummary {
    pub fn parse(output: &str) -> Self {
        Self::from_sections(&scan_sections(output))
    }

    pub fn from_sections(sections: &SummarySections) -> Self {
        Self {
            shape: sections.shape.as_deref().and_then(parse_shape),
            columns: sections.columns.as_deref().and_then(parse_columns),
            head: sections
                .head
                .as_deref()
                .map(normalize_block)
                .filter(|h| !h.is_empty()),
            dtypes: sections.dtypes.as_deref().and_then(parse_dtypes),
        }
    }
}

fn label_regex() -> Option<&'static Regex> {
    static LABEL: OnceLock<Option<Regex>> = OnceLock::new();
    LABEL
        .get_or_init(|| {
            Regex::new(
                r"(?i)^\s*(?:[A-Za-z_][A-Za-z0-9_]*\.)?(shape|columns|head|dtypes)(?:\(\))?\s*(?::|=|->)\s*(.*)$",
            )
            .ok()
        })
        .as_ref()
}

fn bracket_depth(text: &str) -> i32 {
    text.chars().fold(0, |depth, c| match c {
        '[' | '(' => depth + 1,
        ']' | ')' => depth - 1,
        _ => depth,
    })
}

/// Split stdout into labelled sections.
///
/// Unlabelled lines after a `head` or `dtypes` label belong to that block
/// until a blank line follows block content. A `dtypes` block also ends at
/// its `dtype: object` footer. A `head` block has no footer, so a script
/// must print a blank line after the head table before printing anything
/// else unlabelled. A `columns` value continues across lines while its
/// brackets are unbalanced. A repeated label replaces the earlier value.
pub fn scan_sections(output: &str) -> SummarySections {
    let mut sections = SummarySections::default();
    let mut current: Option<SummaryField> = None;

    for line in output.lines() {
        if let Some(caps) = label_regex().and_then(|re| re.captures(line)) {
            let field = caps.get(1).and_then(|m| SummaryField::from_label(m.as_str()));
            if let Some(field) = field {
                let value = caps.get(2).map(|m| m.as_str().trim_end()).unwrap_or("");
                *sections.slot(field) = Some(value.to_string());
                let open_columns = field == SummaryField::Columns && bracket_depth(value) > 0;
                current = (field.is_block() || open_columns).then_some(field);
                continue;
            }
        }

        let Some(field) = current else {
            continue;
        };
        let slot = sections.slot(field);
        let text = slot.get_or_insert_with(String::new);

        if field == SummaryField::Columns {
            text.push(' ');
            text.push_str(line.trim());
            if bracket_depth(text) <= 0 {
                current = None;
            }
            continue;
        }

        if line.trim().is_empty() {
            if !text.trim().is_empty() {
                current = None;
            }
            continue;
        }
        if field == SummaryField::Dtypes && is_dtype_footer(line) {
            current = None;
            continue;
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(line);
    }

    sections
}

/// The `dtype: object` line pandas prints under a dtypes series.
fn is_dtype_footer(line: &str) -> bool {
    line.trim().to_ascii_lowercase().starts_with("dtype:")
}

/// `(3, 7)`, `[3, 7]` or `3, 7` as integers.
pub fn parse_shape(raw: &str) -> Option<Vec<i64>> {
    let inner = raw
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']'])
        .trim();
    let values: Vec<i64> = inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<i64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Split on commas outside quotes, unquoting each item.
fn split_literal_items(inner: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in inner.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => quote = Some(c),
            (None, ',') => {
                items.push(current.trim().to_string());
                current.clear();
            }
            (None, c) => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

/// Python list or `Index([...], dtype=...)` syntax, else comma-separated names.
pub fn parse_columns(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let inner = match (raw.find('['), raw.rfind(']')) {
        (Some(open), Some(close)) if open < close => &raw[open + 1..close],
        (Some(_), _) | (_, Some(_)) => return None,
        _ => raw,
    };
    Some(
        split_literal_items(inner)
            .into_iter()
            .filter(|item| !item.is_empty())
            .collect(),
    )
}

/// Right-trim each line and drop blank lines.
pub fn normalize_block(raw: &str) -> String {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `name type` pairs, one per line or alternating across lines.
pub fn parse_dtypes(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    let mut pending: Option<String> = None;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || is_dtype_footer(line) {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [single] => match pending.take() {
                Some(name) => {
                    map.insert(name, single.to_string());
                }
                None => pending = Some(single.to_string()),
            },
            [names @ .., kind] => {
                map.insert(names.join(" "), kind.to_string());
            }
            [] => {}
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

fn format_shape(shape: &[i64]) -> String {
    let parts: Vec<String> = shape.iter().map(i64::to_string).collect();
    if parts.len() == 1 {
        format!("({},)", parts[0])
    } else {
        format!("({})", parts.join(", "))
    }
}

fn format_columns(columns: &[String]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| format!("'{}'", c)).collect();
    format!("[{}]", quoted.join(", "))
}

fn format_dtypes(dtypes: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = dtypes.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
    format!("{{{}}}", pairs.join(", "))
}

fn missing(field: SummaryField, expected: &str) -> String {
    format!(
        "dataframe {} not found in output (expected {})",
        field.name(),
        expected
    )
}

fn unparsable(field: SummaryField, raw: &str, expected: &str) -> String {
    format!(
        "dataframe {} is unparsable: got '{}', expected {}",
        field.name(),
        raw.trim(),
        expected
    )
}

fn invalid_expectation(field: SummaryField) -> String {
    format!(
        "dataframe {} expectation in the contract could not be parsed",
        field.name()
    )
}

/// Check `expect` against `output`, one feedback line per failing field.
pub fn compare(expect: &DataframeExpectation, output: &str) -> Vec<String> {
    let sections = scan_sections(output);
    let summary = DataFrameSummary::from_sections(&sections);
    let mut feedback = Vec::new();

    if let Some(expected) = &expect.shape {
        let field = SummaryField::Shape;
        let wanted = match expected {
            ExpectedValue::List(_) => expected.items().and_then(|items| {
                items.iter().map(|i| i.trim().parse::<i64>().ok()).collect::<Option<Vec<_>>>()
            }),
            ExpectedValue::Text(text) => parse_shape(text),
        };
        match wanted {
            None => feedback.push(invalid_expectation(field)),
            Some(wanted) => {
                let shown = format_shape(&wanted);
                match (sections.get(field), &summary.shape) {
                    (None, _) => feedback.push(missing(field, &shown)),
                    (Some(raw), None) => feedback.push(unparsable(field, raw, &shown)),
                    (Some(_), Some(actual)) if *actual != wanted => feedback.push(format!(
                        "dataframe shape mismatch: expected {}, got {}",
                        shown,
                        format_shape(actual)
                    )),
                    _ => {}
                }
            }
        }
    }

    if let Some(expected) = &expect.columns {
        let field = SummaryField::Columns;
        let wanted = match expected {
            ExpectedValue::List(_) => expected.items(),
            ExpectedValue::Text(text) => parse_columns(text),
        };
        match wanted {
            None => feedback.push(invalid_expectation(field)),
            Some(wanted) => {
                let shown = format_columns(&wanted);
                match (sections.get(field), &summary.columns) {
                    (None, _) => feedback.push(missing(field, &shown)),
                    (Some(raw), None) => feedback.push(unparsable(field, raw, &shown)),
                    (Some(_), Some(actual)) if *actual != wanted => feedback.push(format!(
                        "dataframe columns mismatch: expected {}, got {}",
                        shown,
                        format_columns(actual)
                    )),
                    _ => {}
                }
            }
        }
    }

    if let Some(expected) = &expect.head {
        let field = SummaryField::Head;
        let wanted = match expected {
            ExpectedValue::List(_) => expected.items().map(|lines| lines.join("\n")),
            ExpectedValue::Text(text) => Some(text.clone()),
        }
        .map(|text| normalize_block(&text));
        match wanted {
            None => feedback.push(invalid_expectation(field)),
            Some(wanted) => match (sections.get(field), &summary.head) {
                (None, _) => feedback.push("dataframe head not found in output".to_string()),
                (Some(_), None) => feedback.push("dataframe head is empty in output".to_string()),
                (Some(_), Some(actual)) if *actual != wanted => feedback.push(format!(
                    "dataframe head mismatch: expected:\n{}\ngot:\n{}",
                    wanted, actual
                )),
                _ => {}
            },
        }
    }

    if let Some(expected) = &expect.dtypes {
        let field = SummaryField::Dtypes;
        let wanted = match expected {
            ExpectedDtypes::Map(map) => Some(map.clone()).filter(|m| !m.is_empty()),
            ExpectedDtypes::Text(text) => parse_dtypes(text),
        };
        match wanted {
            None => feedback.push(invalid_expectation(field)),
            Some(wanted) => {
                let shown = format_dtypes(&wanted);
                match (sections.get(field), &summary.dtypes) {
                    (None, _) => feedback.push(missing(field, &shown)),
                    (Some(raw), None) => feedback.push(unparsable(field, raw, &shown)),
                    (Some(_), Some(actual)) if *actual != wanted => feedback.push(format!(
                        "dataframe dtypes mismatch: expected {}, got {}",
                        shown,
                        format_dtypes(actual)
                    )),
                    _ => {}
                }
            }
        }
    }

    feedback
}
