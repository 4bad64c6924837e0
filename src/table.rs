//! In-memory typed tables.
//!
//! A [`Table`] is a list of equally long named columns. Numeric columns keep
//! their values as `f64` with `None` marking a missing cell; everything that
//! did not parse as a number is kept as text.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::data::Matrix;
use crate::{Error, Result};

/// Inferred column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Int,
    Float,
    Object,
}

impl Dtype {
    pub fn is_numeric(self) -> bool {
        !matches!(self, Dtype::Object)
    }

    pub fn name(self) -> &'static str {
        match self {
            Dtype::Int => "int64",
            Dtype::Float => "float64",
            Dtype::Object => "object",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

/// A single cell, borrowed from its column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Number(f64),
    Text(&'a str),
    Missing,
}

impl fmt::Display for Cell<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(v) => write!(f, "{v}"),
            Cell::Text(s) => f.write_str(s),
            Cell::Missing => f.write_str("NaN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    name: String,
    dtype: Dtype,
    data: ColumnData,
}

impl Column {
    pub fn int<S: Into<String>>(name: S, values: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::Int,
            data: ColumnData::Numeric(values.into_iter().map(|v| Some(v as f64)).collect()),
        }
    }

    pub fn float<S: Into<String>>(name: S, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::Float,
            data: ColumnData::Numeric(values),
        }
    }

    pub fn text<S: Into<String>>(name: S, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::Object,
            data: ColumnData::Text(values),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        self.dtype.is_numeric()
    }

    /// Numeric values, or `None` for an object column.
    pub fn numbers(&self) -> Option<&[Option<f64>]> {
        match &self.data {
            ColumnData::Numeric(v) => Some(v),
            ColumnData::Text(_) => None,
        }
    }

    pub fn cell(&self, row: usize) -> Cell<'_> {
        match &self.data {
            ColumnData::Numeric(v) => v.get(row).copied().flatten().map_or(Cell::Missing, Cell::Number),
            ColumnData::Text(v) => v
                .get(row)
                .and_then(Option::as_deref)
                .map_or(Cell::Missing, Cell::Text),
        }
    }

    pub fn missing(&self) -> usize {
        match &self.data {
            ColumnData::Numeric(v) => v.iter().filter(|x| x.is_none_or(f64::is_nan)).count(),
            ColumnData::Text(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }
}

/// Named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Build a table, checking names are unique and non-empty and columns have equal length.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for col in &columns {
            if col.name.is_empty() {
                return Err(Error::Model("column names must not be empty".to_owned()));
            }
            if !seen.insert(col.name.as_str()) {
                return Err(Error::Model(format!("duplicate column {:?}", col.name)));
            }
        }
        if let Some(first) = columns.first() {
            let rows = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != rows) {
                return Err(Error::Model(format!(
                    "column {:?} has {} rows, expected {rows}",
                    bad.name,
                    bad.len()
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Wrap a matrix as a float table with the given column names.
    pub fn from_matrix(names: &[String], m: &Matrix) -> Result<Self> {
        if names.len() != m.cols() {
            return Err(Error::Model(format!(
                "{} column names given for {} columns",
                names.len(),
                m.cols()
            )));
        }
        let columns = names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let values = (0..m.rows()).map(|i| Some(f64::from(m.row(i)[j]))).collect();
                Column::float(name.clone(), values)
            })
            .collect();
        Self::new(columns)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Replace the column of the same name, or append it.
    pub fn set_column(&mut self, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.len() != self.rows() {
            return Err(Error::Model(format!(
                "column {:?} has {} rows, expected {}",
                column.name,
                column.len(),
                self.rows()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(slot) => *slot = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn has_missing(&self) -> bool {
        self.columns.iter().any(|c| c.missing() > 0)
    }

    pub fn has_object_columns(&self) -> bool {
        self.columns.iter().any(|c| !c.is_numeric())
    }

    /// Gather `names`, in order, into a `(rows, names.len())` matrix.
    ///
    /// Fails with [`Error::Model`] if a column is absent, non-numeric or has
    /// missing values.
    pub fn project(&self, names: &[String]) -> Result<Matrix> {
        let mut cols = Vec::with_capacity(names.len());
        for name in names {
            let col = self
                .column(name)
                .ok_or_else(|| Error::Model(format!("column {name:?} is not in the data")))?;
            let values = col.numbers().ok_or_else(|| {
                Error::Model(format!("column {name:?} holds non-numeric values"))
            })?;
            if col.missing() > 0 {
                return Err(Error::Model(format!("column {name:?} has missing values")));
            }
            cols.push(values);
        }

        let rows = self.rows();
        let mut m = Matrix::zeros(rows, names.len());
        for (j, values) in cols.iter().enumerate() {
            for (i, v) in values.iter().enumerate() {
                m.row_mut(i)[j] = v.unwrap_or(f64::NAN) as f32;
            }
        }
        Ok(m)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        writeln!(f, "{}", names.join("\t"))?;
        for i in 0..self.rows() {
            let cells: Vec<String> = self.columns.iter().map(|c| c.cell(i).to_string()).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}
