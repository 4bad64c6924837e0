//! CSV ingest.
//!
//! [`read_csv`] turns a raw byte buffer into a typed [`Table`]:
//!
//! - the delimiter is sniffed from the first chunk and must be `,` or `;`
//! - the first row must look like a header (see [`has_header`])
//! - fields are trimmed; empty and NA-like fields become missing cells
//! - a column is `Int` if every present value parses as an integer, `Float`
//!   if every present value parses as a number, `Object` otherwise
//!
//! Every failure is an [`Error::Upload`] whose cause says whether the bytes
//! could not be parsed or the parsed table is unusable.

use std::collections::HashSet;

use csv::{ReaderBuilder, Trim};

use crate::table::{Column, Table};
use crate::{Error, Result};

/// Delimiters accepted by the sniffer, in order of preference.
pub const DELIMITERS: [u8; 2] = [b',', b';'];

const SNIFF_BYTES: usize = 4096;
const HEADER_SAMPLE_ROWS: usize = 20;
const CONSISTENCY: f64 = 0.9;

const NA_VALUES: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Parse a CSV buffer into a table.
pub fn read_csv(bytes: &[u8]) -> Result<Table> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::parse_csv(format!("buffer is not valid UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Err(Error::parse_csv("buffer is empty"));
    }

    let delimiter = sniff_delimiter(sample(text))?;
    let records = parse_records(text, delimiter)?;

    let (header, rows) = match records.split_first() {
        Some(split) => split,
        None => return Err(Error::parse_csv("no rows found")),
    };
    if !has_header(header, rows) {
        return Err(Error::validate_data("the first row does not look like a header"));
    }
    validate_header(header)?;
    if header.len() < 2 {
        return Err(Error::validate_data(format!(
            "expected at least 2 columns, found {}",
            header.len()
        )));
    }
    if rows.len() < 2 {
        return Err(Error::validate_data(format!(
            "expected at least 2 rows, found {}",
            rows.len()
        )));
    }
    for (i, row) in rows.iter().enumerate() {
        if row.len() > header.len() {
            // The leading fields of a longer row would become an index.
            return Err(Error::validate_data(format!(
                "row {} has {} fields but the header has {}: multi-indexed data is not supported",
                i + 2,
                row.len(),
                header.len()
            )));
        }
    }

    let columns = header
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let cells: Vec<Option<&str>> = rows
                .iter()
                .map(|r| r.get(j).map(String::as_str).filter(|v| !is_na(v)))
                .collect();
            infer_column(name, &cells)
        })
        .collect();

    let table = Table::new(columns).map_err(|e| Error::validate_data(e.to_string()))?;
    log::debug!(
        "parsed csv: {} rows x {} columns, delimiter {:?}",
        table.rows(),
        table.width(),
        delimiter as char
    );
    Ok(table)
}

/// First chunk of `text`, cut at a line boundary when possible.
fn sample(text: &str) -> &str {
    if text.len() <= SNIFF_BYTES {
        return text;
    }
    let mut end = SNIFF_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let chunk = &text[..end];
    match chunk.rfind('\n') {
        Some(pos) if pos > 0 => &chunk[..pos],
        _ => chunk,
    }
}

/// Pick the delimiter that occurs a consistent, non-zero number of times per line.
///
/// Among consistent candidates the one whose header count matches the body
/// wins, so `x;y\n1,5;2,5` reads as two decimal-comma columns.
pub fn sniff_delimiter(sample: &str) -> Result<u8> {
    let lines: Vec<&str> = sample.lines().filter(|l| !l.trim().is_empty()).collect();
    let Some((header, rest)) = lines.split_first() else {
        return Err(Error::parse_csv("could not determine delimiter"));
    };

    // The header may be shorter than the data rows, so only the body has to agree.
    let body = if rest.is_empty() { &lines[..] } else { rest };
    let mut fallback = None;
    for delim in DELIMITERS {
        let counts: Vec<usize> = body.iter().map(|l| count_unquoted(l, delim)).collect();
        let mode = mode(&counts);
        if mode == 0 {
            continue;
        }
        let agree = counts.iter().filter(|&&c| c == mode).count();
        if (agree as f64 / counts.len() as f64) < CONSISTENCY {
            continue;
        }
        if count_unquoted(header, delim) == mode {
            return Ok(delim);
        }
        fallback.get_or_insert(delim);
    }
    fallback.ok_or_else(|| Error::parse_csv("could not determine delimiter (expected ',' or ';')"))
}

fn count_unquoted(line: &str, delim: u8) -> usize {
    let mut quoted = false;
    let mut n = 0;
    for b in line.bytes() {
        if b == b'"' {
            quoted = !quoted;
        } else if b == delim && !quoted {
            n += 1;
        }
    }
    n
}

fn mode(counts: &[usize]) -> usize {
    let mut best = (0, 0);
    for &c in counts {
        let freq = counts.iter().filter(|&&x| x == c).count();
        if freq > best.1 || (freq == best.1 && c > best.0) {
            best = (c, freq);
        }
    }
    best.0
}

fn parse_records(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| Error::parse_csv(e.to_string()))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        out.push(record.iter().map(str::to_owned).collect());
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CellShape {
    Number,
    Length(usize),
}

fn shape_of(v: &str) -> CellShape {
    if v.parse::<f64>().is_ok() {
        CellShape::Number
    } else {
        CellShape::Length(v.chars().count())
    }
}

/// Decide whether `header` is a header row by comparing it with the rows below.
///
/// Each column whose sample values share one shape (all numeric, or all text
/// of one length) votes: a header cell of a different shape counts for a
/// header, a matching one against. Columns of mixed shape abstain.
pub fn has_header(header: &[String], rows: &[Vec<String>]) -> bool {
    let mut votes = 0_i32;
    for (j, name) in header.iter().enumerate() {
        let mut column_shape: Option<CellShape> = None;
        let mut mixed = false;
        for row in rows.iter().take(HEADER_SAMPLE_ROWS) {
            let Some(v) = row.get(j).filter(|v| !is_na(v)) else {
                continue;
            };
            let s = shape_of(v);
            match column_shape {
                None => column_shape = Some(s),
                Some(prev) if prev != s => {
                    mixed = true;
                    break;
                }
                Some(_) => {}
            }
        }
        if mixed {
            continue;
        }
        match column_shape {
            Some(s) if s == shape_of(name) => votes -= 1,
            Some(_) => votes += 1,
            None => {}
        }
    }
    votes > 0
}

fn validate_header(header: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(header.len());
    for (j, name) in header.iter().enumerate() {
        if name.is_empty() {
            return Err(Error::validate_data(format!("column {j} has an empty name")));
        }
        if !seen.insert(name.as_str()) {
            return Err(Error::validate_data(format!("duplicate column name {name:?}")));
        }
    }
    Ok(())
}

fn is_na(v: &str) -> bool {
    NA_VALUES.contains(&v)
}

fn infer_column(name: &str, cells: &[Option<&str>]) -> Column {
    let present = || cells.iter().flatten();
    let all_int = present().all(|v| v.parse::<i64>().is_ok());
    let any_missing = cells.iter().any(Option::is_none);

    if all_int && !any_missing && !cells.is_empty() {
        let values = cells
            .iter()
            .map(|v| v.and_then(|v| v.parse::<i64>().ok()).unwrap_or_default())
            .collect();
        return Column::int(name, values);
    }
    if present().all(|v| v.parse::<f64>().is_ok()) {
        let values = cells
            .iter()
            .map(|v| v.and_then(|v| v.parse::<f64>().ok()))
            .collect();
        return Column::float(name, values);
    }
    Column::text(name, cells.iter().map(|v| v.map(str::to_owned)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::table::Dtype;

    fn kind_of(err: Error) -> &'static str {
        match err {
            Error::Upload(IngestError::ParseCsv(_)) => "parse",
            Error::Upload(IngestError::ValidateData(_)) => "validate",
            _ => "other",
        }
    }

    #[test]
    fn reads_comma_and_semicolon() {
        let a = read_csv(b"x,y\n1,2.5\n3,4\n").unwrap();
        let b = read_csv(b"x;y\n1;2.5\n3;4\n").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.column("x").map(Column::dtype), Some(Dtype::Int));
        assert_eq!(a.column("y").map(Column::dtype), Some(Dtype::Float));
    }

    #[test]
    fn trims_and_marks_missing() {
        let t = read_csv(b"a , b,c\n 1 , , x\n2,3,NA\n").unwrap();
        assert_eq!(t.column_names(), vec!["a", "b", "c"]);
        assert_eq!(t.column("b").map(Column::dtype), Some(Dtype::Float));
        assert_eq!(t.column("b").map(Column::missing), Some(1));
        assert_eq!(t.column("c").map(Column::missing), Some(1));
        assert!(t.has_missing());
    }

    #[test]
    fn rejects_bad_buffers() {
        assert_eq!(kind_of(read_csv(b"").unwrap_err()), "parse");
        assert_eq!(kind_of(read_csv(b"a\tb\n1\t2\n3\t4\n").unwrap_err()), "parse");
        assert_eq!(kind_of(read_csv(b"1,2\n3,4\n5,6\n").unwrap_err()), "validate");
        assert_eq!(kind_of(read_csv(b"a,b\n1,2\n").unwrap_err()), "validate");
        assert_eq!(kind_of(read_csv(b"a,a\n1,2\n3,4\n").unwrap_err()), "validate");
        assert_eq!(
            kind_of(read_csv(b"a,b\nk,1,2\nk,3,4\n").unwrap_err()),
            "validate"
        );
    }

    #[test]
    fn header_detection() {
        let h = |cells: &[&str]| cells.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let rows = vec![h(&["1", "2"]), h(&["3", "4"])];
        assert!(has_header(&h(&["a", "b"]), &rows));
        assert!(!has_header(&h(&["0", "9"]), &rows));
    }

    #[test]
    fn decimal_commas_in_semicolon_files() {
        let t = read_csv(b"x;y\n1,5;2,5\n3,5;4,5\n5,5;6,5\n").unwrap();
        assert_eq!(t.column_names(), vec!["x", "y"]);
        assert_eq!(t.rows(), 3);
        assert_eq!(sniff_delimiter("x;y\n1,5;2,5\n3,5;4,5").unwrap(), b';');
        // Without a matching header the first consistent delimiter is kept.
        assert_eq!(sniff_delimiter("a,b\nk,1,2\nk,3,4").unwrap(), b',');
    }

    #[test]
    fn quoted_delimiters_do_not_count() {
        assert_eq!(sniff_delimiter("name;v\n\"a,b\";1\n\"c,d\";2").unwrap(), b';');
    }
}
