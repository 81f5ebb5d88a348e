//! Prompt composition - instruction plus spreadsheet context plus reply format

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;

const PREAMBLE: &str = "You are Manice, an advanced Excel AI CoPilot assistant. You can:

1. Read and analyze Excel data
2. Modify cells, rows, columns, and formatting in real-time
3. Create formulas and explain existing ones
4. Generate charts and visualizations
5. Perform complex data analysis and business intelligence
6. Convert natural language to Excel actions
";

pub(crate) const CONTEXT_HEADER: &str = "## Excel Context:";

const RESPONSE_FORMAT: &str = "

## Response Format:
Provide a JSON response with these fields:
{
  \"action\": \"excel_operation_type\",
  \"parameters\": {...},
  \"explanation\": \"Human-readable explanation\",
  \"excel_operations\": [
    {
      \"type\": \"cell_edit|formula|format|chart|etc\",
      \"target\": \"A1:B10\",
      \"value\": \"...\",
      \"options\": {...}
    }
  ]
}

Be precise, actionable, and always consider Excel's capabilities and limitations.
";

/// What the Excel add-in knows about the workbook at request time.
///
/// Every field is optional; missing fields are left out of the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpreadsheetContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workbook_info: Option<Value>,
    /// Operations already applied in this session, oldest first
    #[serde(default, rename = "previous_operations", skip_serializing_if = "Vec::is_empty")]
    pub prior_operation_log: Vec<String>,
}

impl SpreadsheetContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, name: impl Into<String>) -> Self {
        self.sheet_name = Some(name.into());
        self
    }

    pub fn range(mut self, range: impl Into<String>) -> Self {
        self.selected_range = Some(range.into());
        self
    }

    pub fn cells(mut self, data: Value) -> Self {
        self.cell_data = Some(data);
        self
    }

    pub fn workbook(mut self, info: Value) -> Self {
        self.workbook_info = Some(info);
        self
    }

    pub fn operation(mut self, op: impl Into<String>) -> Self {
        self.prior_operation_log.push(op.into());
        self
    }

    /// True when no field carries anything; such a context is treated as absent
    pub fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, str::is_empty);
        let no_json = |v: &Option<Value>| v.as_ref().map_or(true, is_empty_json);
        blank(&self.sheet_name)
            && blank(&self.selected_range)
            && no_json(&self.cell_data)
            && no_json(&self.workbook_info)
            && self.prior_operation_log.is_empty()
    }
}

/// Approximate size of the data a request carries, used for tier selection.
///
/// Counted in characters. Cell data and workbook info are measured in their
/// display form (`{"A1": 1}`, with a space after each `,` and `:`); a bare
/// string counts without its quotes.
pub fn context_size(context: Option<&SpreadsheetContext>) -> usize {
    let Some(context) = context else {
        return 0;
    };

    let value_len = |value: &Option<Value>| {
        value
            .as_ref()
            .filter(|v| !is_empty_json(v))
            .map(display_len)
            .unwrap_or(0)
    };

    value_len(&context.cell_data)
        + value_len(&context.workbook_info)
        + context
            .prior_operation_log
            .iter()
            .map(|op| op.chars().count())
            .sum::<usize>()
}

/// Writes `", "` and `": "` between elements
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

fn display_len(value: &Value) -> usize {
    if let Value::String(s) = value {
        return s.chars().count();
    }
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8_lossy(&out).chars().count(),
        Err(_) => value.to_string().chars().count(),
    }
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// `['a', 'b']`, switching to double quotes for items that contain `'`
fn quoted_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|item| quote(item)).collect();
    format!("[{}]", quoted.join(", "))
}

fn quote(item: &str) -> String {
    let delim = if item.contains('\'') && !item.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(item.len() + 2);
    out.push(delim);
    for c in item.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

/// Builds the enhanced prompt sent to a provider
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(&self, instruction: &str, context: Option<&SpreadsheetContext>) -> String {
        let mut prompt =
            String::with_capacity(PREAMBLE.len() + RESPONSE_FORMAT.len() + instruction.len());
        prompt.push_str(PREAMBLE);
        prompt.push_str(&format!("\nCurrent task: {}\n", instruction));

        if let Some(context) = context {
            prompt.push_str(&format!("\n{}\n", CONTEXT_HEADER));

            if let Some(sheet) = context.sheet_name.as_deref().filter(|s| !s.is_empty()) {
                prompt.push_str(&format!("- Active Sheet: {}\n", sheet));
            }
            if let Some(range) = context.selected_range.as_deref().filter(|s| !s.is_empty()) {
                prompt.push_str(&format!("- Selected Range: {}\n", range));
            }
            if let Some(cells) = context.cell_data.as_ref().filter(|v| !is_empty_json(v)) {
                prompt.push_str(&format!("- Cell Data: {}\n", pretty(cells)));
            }
            if let Some(info) = context.workbook_info.as_ref().filter(|v| !is_empty_json(v)) {
                prompt.push_str(&format!("- Workbook Info: {}\n", pretty(info)));
            }
            if !context.prior_operation_log.is_empty() {
                let ops = quoted_list(&context.prior_operation_log);
                prompt.push_str(&format!("- Previous Operations: {}\n", ops));
            }
        }

        prompt.push_str(RESPONSE_FORMAT);
        prompt
    }
}
