//! Derived views: descriptive statistics and declarative chart descriptions.
//!
//! Nothing here renders anything. Charts are returned as [`ChartSpec`] values
//! that serialize to JSON for an external renderer.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::history::History;
use crate::table::{Column, Table};
use crate::{Error, Result};

/// Number of equal-width bins of a column histogram.
pub const HISTOGRAM_BINS: usize = 10;

const DEFAULT_HEIGHT: u32 = 400;
const DEFAULT_SCHEME: &str = "tableau10";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Line,
    Bar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Quantitative,
    Nominal,
}

/// Mapping of one data field onto a chart axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encoding {
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub title: String,
    /// Set when the field holds the lower edge of pre-computed bins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<usize>,
}

impl Encoding {
    fn quantitative(field: &str) -> Self {
        Self {
            field: field.to_owned(),
            field_type: FieldType::Quantitative,
            title: field.to_owned(),
            bin: None,
        }
    }
}

/// Declarative chart description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub mark: Mark,
    pub x: Encoding,
    pub y: Encoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Encoding>,
    pub scheme: String,
    pub interactive: bool,
    pub height: u32,
    /// Draw point markers on lines.
    pub points: bool,
    /// Row records, one JSON object per mark.
    pub data: Vec<Map<String, Value>>,
}

impl ChartSpec {
    fn new(mark: Mark, x: Encoding, y: Encoding, points: bool) -> Self {
        Self {
            mark,
            x,
            y,
            color: None,
            scheme: DEFAULT_SCHEME.to_owned(),
            interactive: true,
            height: DEFAULT_HEIGHT,
            points,
            data: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn row(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

fn numeric_column<'a>(table: &'a Table, name: Option<&str>, axis: &str) -> Result<&'a Column> {
    let name = name.ok_or_else(|| Error::Plot(format!("select a column for the {axis} axis")))?;
    let col = table
        .column(name)
        .ok_or_else(|| Error::Plot(format!("column {name:?} is not in the data")))?;
    if !col.is_numeric() {
        return Err(Error::Plot(format!("column {name:?} is not numeric")));
    }
    Ok(col)
}

/// Chart of two columns: a histogram when `x == y`, else `y` against `x` sorted by `x`.
pub fn plot_columns(
    table: &Table,
    x: Option<&str>,
    y: Option<&str>,
    points: bool,
) -> Result<ChartSpec> {
    let xc = numeric_column(table, x, "x")?;
    let yc = numeric_column(table, y, "y")?;

    if xc.name() == yc.name() {
        return Ok(histogram(xc));
    }

    let (xs, ys) = match (xc.numbers(), yc.numbers()) {
        (Some(xs), Some(ys)) => (xs, ys),
        _ => return Err(Error::Plot("columns are not numeric".to_owned())),
    };
    let mut pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut chart = ChartSpec::new(
        Mark::Line,
        Encoding::quantitative(xc.name()),
        Encoding::quantitative(yc.name()),
        points,
    );
    chart.data = pairs
        .into_iter()
        .map(|(a, b)| row(&[(xc.name(), json!(a)), (yc.name(), json!(b))]))
        .collect();
    Ok(chart)
}

fn histogram(col: &Column) -> ChartSpec {
    let values: Vec<f64> = col
        .numbers()
        .unwrap_or_default()
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .collect();

    let mut x = Encoding::quantitative(col.name());
    x.bin = Some(HISTOGRAM_BINS);
    let mut y = Encoding::quantitative("count");
    y.title = "Count of records".to_owned();
    let mut chart = ChartSpec::new(Mark::Bar, x, y, false);

    let Some((lo, hi)) = values.iter().fold(None, |acc: Option<(f64, f64)>, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    }) else {
        return chart;
    };

    let width = if hi > lo { (hi - lo) / HISTOGRAM_BINS as f64 } else { 1.0 };
    let mut counts = [0_usize; HISTOGRAM_BINS];
    for v in &values {
        let idx = (((v - lo) / width) as usize).min(HISTOGRAM_BINS - 1);
        counts[idx] += 1;
    }

    let end_field = format!("{}_end", col.name());
    chart.data = counts
        .iter()
        .enumerate()
        .map(|(i, &n)| {
            let start = lo + i as f64 * width;
            row(&[
                (col.name(), json!(start)),
                (end_field.as_str(), json!(start + width)),
                ("count", json!(n)),
            ])
        })
        .collect();
    chart
}

/// Line chart of the selected logs over epochs, one colored series per log.
pub fn plot_history(history: &History, log_names: &[&str], points: bool) -> Result<ChartSpec> {
    if history.is_empty() {
        return Err(Error::Plot("there is no training history".to_owned()));
    }
    if log_names.is_empty() {
        return Err(Error::Plot("select at least one log".to_owned()));
    }
    if let Some(missing) = log_names.iter().find(|n| !history.has_log(n)) {
        return Err(Error::Plot(format!("history has no log {missing:?}")));
    }

    let mut chart = ChartSpec::new(
        Mark::Line,
        Encoding::quantitative("epoch"),
        Encoding::quantitative("value"),
        points,
    );
    chart.color = Some(Encoding {
        field: "metric".to_owned(),
        field_type: FieldType::Nominal,
        title: "metric".to_owned(),
        bin: None,
    });

    for record in history.records() {
        for &name in log_names {
            if let Some(v) = record.logs.get(name) {
                chart.data.push(row(&[
                    ("epoch", json!(record.epoch)),
                    ("metric", json!(name)),
                    ("value", json!(v)),
                ]));
            }
        }
    }
    Ok(chart)
}

/// Statistic rows produced by [`describe`], in column order.
pub const STAT_COLUMNS: [&str; 11] = [
    "column", "count", "mean", "std", "min", "25%", "50%", "75%", "max", "dtype", "missing %",
];

/// One row per column of `table`: count, mean, sample std, min, quartiles,
/// max, dtype and percentage of missing cells.
///
/// Object columns only report count, dtype and missing percentage. An empty
/// table yields an empty table.
pub fn describe(table: &Table) -> Result<Table> {
    if table.is_empty() {
        return Ok(Table::default());
    }

    let n = table.width();
    let mut names = Vec::with_capacity(n);
    let mut stats: [Vec<Option<f64>>; 8] = Default::default();
    let mut dtypes = Vec::with_capacity(n);
    let mut missing = Vec::with_capacity(n);

    for col in table.columns() {
        names.push(Some(col.name().to_owned()));
        dtypes.push(Some(col.dtype().name().to_owned()));
        let rows = col.len();
        missing.push(Some(if rows == 0 {
            0.0
        } else {
            100.0 * col.missing() as f64 / rows as f64
        }));

        let row = match col.numbers() {
            Some(values) => {
                let mut present: Vec<f64> = values.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
                present.sort_by(f64::total_cmp);
                numeric_summary(&present)
            }
            None => {
                let mut row = [None; 8];
                row[0] = Some((col.len() - col.missing()) as f64);
                row
            }
        };
        for (slot, v) in stats.iter_mut().zip(row) {
            slot.push(v);
        }
    }

    let mut columns = vec![Column::text(STAT_COLUMNS[0], names)];
    for (name, values) in STAT_COLUMNS[1..9].iter().zip(stats) {
        columns.push(Column::float(*name, values));
    }
    columns.push(Column::text(STAT_COLUMNS[9], dtypes));
    columns.push(Column::float(STAT_COLUMNS[10], missing));
    Table::new(columns)
}

/// `[count, mean, std, min, 25%, 50%, 75%, max]` of sorted values.
fn numeric_summary(sorted: &[f64]) -> [Option<f64>; 8] {
    let count = sorted.len();
    if count == 0 {
        return [Some(0.0), None, None, None, None, None, None, None];
    }
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let std = if count > 1 {
        let ss: f64 = sorted.iter().map(|v| (v - mean) * (v - mean)).sum();
        Some((ss / (count - 1) as f64).sqrt())
    } else {
        None
    };
    [
        Some(count as f64),
        Some(mean),
        std,
        sorted.first().copied(),
        Some(quantile(sorted, 0.25)),
        Some(quantile(sorted, 0.5)),
        Some(quantile(sorted, 0.75)),
        sorted.last().copied(),
    ]
}

/// Linear-interpolated quantile of non-empty sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn table() -> Table {
        Table::new(vec![
            Column::int("a", vec![4, 1, 3, 2]),
            Column::float("b", vec![Some(1.0), Some(2.0), None, Some(4.0)]),
            Column::text("c", vec![Some("x".into()), None, Some("y".into()), Some("z".into())]),
        ])
        .unwrap()
    }

    #[test]
    fn same_column_is_a_histogram() {
        let chart = plot_columns(&table(), Some("a"), Some("a"), false).unwrap();
        assert_eq!(chart.mark, Mark::Bar);
        assert_eq!(chart.data.len(), HISTOGRAM_BINS);
        let total: u64 = chart.data.iter().filter_map(|r| r["count"].as_u64()).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn line_chart_is_sorted_and_skips_missing() {
        let chart = plot_columns(&table(), Some("a"), Some("b"), true).unwrap();
        assert_eq!(chart.mark, Mark::Line);
        let xs: Vec<f64> = chart.data.iter().filter_map(|r| r["a"].as_f64()).collect();
        assert_eq!(xs, vec![1.0, 2.0, 4.0]);
        assert!(chart.points);
    }

    #[test]
    fn plot_rejects_bad_columns() {
        let t = table();
        assert!(matches!(plot_columns(&t, Some("c"), Some("a"), false), Err(Error::Plot(_))));
        assert!(matches!(plot_columns(&t, None, Some("a"), false), Err(Error::Plot(_))));
        assert!(matches!(plot_columns(&t, Some("a"), Some("zz"), false), Err(Error::Plot(_))));
    }

    #[test]
    fn describe_matches_sample_statistics() {
        let stats = describe(&table()).unwrap();
        assert_eq!(stats.rows(), 3);
        let get = |col: &str, row: usize| stats.column(col).and_then(|c| c.numbers()).and_then(|v| v[row]);
        assert_eq!(get("count", 0), Some(4.0));
        assert_eq!(get("mean", 0), Some(2.5));
        assert!((get("std", 0).unwrap() - 1.290_994_448_7).abs() < 1e-9);
        assert_eq!(get("25%", 0), Some(1.75));
        assert_eq!(get("50%", 0), Some(2.5));
        assert_eq!(get("missing %", 1), Some(25.0));
        assert_eq!(get("count", 2), Some(3.0));
        assert_eq!(get("mean", 2), None);
    }

    #[test]
    fn history_chart_is_long_format() {
        let mut h = History::new();
        h.extend([
            BTreeMap::from([("loss".to_owned(), 1.0), ("val_loss".to_owned(), 1.5)]),
            BTreeMap::from([("loss".to_owned(), 0.5), ("val_loss".to_owned(), 0.9)]),
        ]);
        let chart = plot_history(&h, &["loss", "val_loss"], false).unwrap();
        assert_eq!(chart.data.len(), 4);
        assert!(chart.color.is_some());
        assert!(matches!(plot_history(&h, &[], false), Err(Error::Plot(_))));
        assert!(matches!(plot_history(&h, &["mae"], false), Err(Error::Plot(_))));
        assert!(matches!(plot_history(&History::new(), &["loss"], false), Err(Error::Plot(_))));
    }
}
