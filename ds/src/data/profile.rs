//! Column statistics and the dataset summary text

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::Table;

/// Number of sample values kept for non-numeric columns
const MAX_SAMPLE_VALUES: usize = 5;

/// Inferred column type, named the way analysts read them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Int64,
    Float64,
    Bool,
    Object,
    Empty,
}

impl Dtype {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Dtype::Int64 | Dtype::Float64)
    }

    fn infer<'a>(cells: impl Iterator<Item = &'a Value>) -> Self {
        let mut seen = None;
        for cell in cells {
            let kind = match cell {
                Value::Null => continue,
                Value::Number(n) if n.is_i64() || n.is_u64() => Dtype::Int64,
                Value::Number(_) => Dtype::Float64,
                Value::Bool(_) => Dtype::Bool,
                _ => Dtype::Object,
            };
            seen = Some(match (seen, kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(a), b) if a.is_numeric() && b.is_numeric() => Dtype::Float64,
                _ => return Dtype::Object,
            });
        }
        seen.unwrap_or(Dtype::Empty)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dtype::Int64 => "int64",
            Dtype::Float64 => "float64",
            Dtype::Bool => "bool",
            Dtype::Object => "object",
            Dtype::Empty => "empty",
        };
        f.write_str(s)
    }
}

/// Per-column statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub name: String,
    pub dtype: Dtype,
    pub missing: usize,
    /// Percentage of missing cells, rounded to one decimal
    pub missing_pct: f64,
    pub unique: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Up to five distinct values, only for non-numeric columns
    pub samples: Vec<String>,
}

impl ColumnStats {
    /// The one-line description used in summaries
    pub fn describe(&self) -> String {
        let mut line = format!("  - {} ({})", self.name, self.dtype);
        if self.missing > 0 {
            line.push_str(&format!(" - {} missing ({:.1}%)", self.missing, self.missing_pct));
        }
        match (self.dtype, self.min, self.max) {
            (Dtype::Int64, Some(min), Some(max)) => line.push_str(&format!(" - Range: [{}, {}]", min as i64, max as i64)),
            (Dtype::Float64, Some(min), Some(max)) => line.push_str(&format!(" - Range: [{}, {}]", min, max)),
            (Dtype::Object | Dtype::Bool, _, _) => line.push_str(&format!(" - {} unique values", self.unique)),
            _ => {}
        }
        line
    }
}

/// Compute statistics for one column; None if the column does not exist
pub fn column_stats(table: &Table, column: &str) -> Option<ColumnStats> {
    debug!(%column, "column_stats: called");
    let cells = table.column(column)?;
    let dtype = Dtype::infer(cells.iter().copied());
    let missing = cells.iter().filter(|c| c.is_null()).count();
    let missing_pct = if cells.is_empty() {
        0.0
    } else {
        ((missing as f64 / cells.len() as f64) * 1000.0).round() / 10.0
    };

    let present: Vec<&Value> = cells.iter().copied().filter(|c| !c.is_null()).collect();
    let unique = present.iter().map(|c| display_cell(c)).collect::<HashSet<_>>().len();

    let (min, max, mean) = if dtype.is_numeric() {
        let nums: Vec<f64> = present.iter().filter_map(|c| c.as_f64()).collect();
        let min = nums.iter().copied().reduce(f64::min);
        let max = nums.iter().copied().reduce(f64::max);
        let mean = (!nums.is_empty()).then(|| nums.iter().sum::<f64>() / nums.len() as f64);
        (min, max, mean)
    } else {
        (None, None, None)
    };

    let mut samples = Vec::new();
    if !dtype.is_numeric() {
        for cell in &present {
            let s = display_cell(cell);
            if !samples.contains(&s) {
                samples.push(s);
            }
            if samples.len() == MAX_SAMPLE_VALUES {
                break;
            }
        }
    }

    Some(ColumnStats {
        name: column.to_string(),
        dtype,
        missing,
        missing_pct,
        unique,
        min,
        max,
        mean,
        samples,
    })
}

/// Full profile text: shape, columns, sample rows and quality issues
pub fn profile_table(table: &Table, sample_rows: usize) -> String {
    debug!(rows = table.num_rows(), columns = table.num_columns(), sample_rows, "profile_table: called");
    let mut parts = vec![
        format!("Dataset Shape: {} rows × {} columns\n", table.num_rows(), table.num_columns()),
        "Column Information:".to_string(),
    ];
    parts.extend(all_stats(table).iter().map(ColumnStats::describe));

    parts.push(format!("\nFirst {} Rows:", sample_rows));
    parts.push(render_rows(table, sample_rows));

    let mut issues = Vec::new();
    let total_missing: usize = table.rows.iter().flatten().filter(|c| c.is_null()).count();
    if total_missing > 0 {
        issues.push(format!("Total missing values: {}", total_missing));
    }
    let duplicates = duplicate_rows(table);
    if duplicates > 0 {
        issues.push(format!("Duplicate rows: {}", duplicates));
    }
    if !issues.is_empty() {
        debug!(issue_count = issues.len(), "profile_table: quality issues found");
        parts.push("\nData Quality Issues:".to_string());
        parts.extend(issues.iter().map(|i| format!("  - {}", i)));
    }

    parts.join("\n")
}

/// Shape and column lines only, for prompts that must stay small
pub fn concise_summary(table: &Table) -> String {
    debug!("concise_summary: called");
    let mut parts = vec![
        format!("Dataset Shape: {} rows × {} columns\n", table.num_rows(), table.num_columns()),
        "Columns:".to_string(),
    ];
    parts.extend(all_stats(table).iter().map(ColumnStats::describe));
    parts.join("\n")
}

fn all_stats(table: &Table) -> Vec<ColumnStats> {
    table.columns.iter().filter_map(|c| column_stats(table, c)).collect()
}

fn duplicate_rows(table: &Table) -> usize {
    let mut seen = HashSet::new();
    table
        .rows
        .iter()
        .filter(|row| !seen.insert(serde_json::to_string(row).unwrap_or_default()))
        .count()
}

fn display_cell(cell: &Value) -> String {
    match cell {
        Value::Null => "NaN".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Left-aligned text grid of the first `n` rows
fn render_rows(table: &Table, n: usize) -> String {
    let shown: Vec<Vec<String>> = table
        .rows
        .iter()
        .take(n)
        .map(|row| row.iter().map(display_cell).collect())
        .collect();

    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            shown
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![line(table.columns.iter().map(String::as_str).collect())];
    lines.extend(shown.iter().map(|row| line(row.iter().map(String::as_str).collect())));
    lines.join("\n")
}
