//! The data half of a workbench: one uploaded table and its column accounting.

use crate::table::Table;
use crate::views::{self, ChartSpec};
use crate::{Result, ingest};

/// Holds the uploaded table and the columns not yet assigned to a layer.
#[derive(Debug, Clone, Default)]
pub struct DataSession {
    table: Table,
    unused: Vec<String>,
}

impl DataSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `buffer` as CSV and replace the current table.
    ///
    /// On failure the session is left untouched.
    pub fn upload(&mut self, buffer: &[u8]) -> Result<()> {
        let table = ingest::read_csv(buffer).inspect_err(|e| log::debug!("upload rejected: {e}"))?;
        log::info!("uploaded table with {} rows and {} columns", table.rows(), table.width());
        self.unused = table.column_names();
        self.table = table;
        Ok(())
    }

    pub fn dataframe(&self) -> &Table {
        &self.table
    }

    pub fn columns(&self) -> Vec<String> {
        self.table.column_names()
    }

    pub fn numeric_columns(&self) -> Vec<String> {
        self.table
            .columns()
            .iter()
            .filter(|c| c.is_numeric())
            .map(|c| c.name().to_owned())
            .collect()
    }

    /// Of `available`, keep those not in `selected` as the unused columns.
    ///
    /// Names that are not table columns are dropped, so the result is always a
    /// subsequence of the table columns.
    pub fn set_unused_columns<A, S>(&mut self, available: &[A], selected: &[S])
    where
        A: AsRef<str>,
        S: AsRef<str>,
    {
        let picked = |name: &str| selected.iter().any(|s| s.as_ref() == name);
        let offered = |name: &str| available.iter().any(|a| a.as_ref() == name);
        self.unused = self
            .table
            .columns()
            .iter()
            .map(|c| c.name())
            .filter(|name| offered(*name) && !picked(*name))
            .map(str::to_owned)
            .collect();
    }

    pub fn get_unused_columns(&self) -> Vec<String> {
        self.unused.clone()
    }

    /// Descriptive statistics, one row per column.
    pub fn get_stats(&self) -> Result<Table> {
        views::describe(&self.table)
    }

    pub fn plot_columns(&self, x: Option<&str>, y: Option<&str>, points: bool) -> Result<ChartSpec> {
        views::plot_columns(&self.table, x, y, points)
    }

    pub fn has_nans(&self) -> bool {
        self.table.has_missing()
    }

    pub fn has_nonnumeric_dtypes(&self) -> bool {
        self.table.has_object_columns()
    }

    pub fn empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn reset_state(&mut self) {
        log::info!("data session reset");
        self.table = Table::default();
        self.unused.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const CSV: &[u8] = b"a,b,c\n1,2,3\n4,5,6\n";

    #[test]
    fn upload_resets_unused_columns() {
        let mut s = DataSession::new();
        assert!(s.empty());
        s.upload(CSV).unwrap();
        assert_eq!(s.get_unused_columns(), vec!["a", "b", "c"]);
        s.set_unused_columns(&["a", "b", "c"], &["b"]);
        assert_eq!(s.get_unused_columns(), vec!["a", "c"]);
        s.upload(CSV).unwrap();
        assert_eq!(s.get_unused_columns(), vec!["a", "b", "c"]);
    }

    #[test]
    fn failed_upload_keeps_previous_table() {
        let mut s = DataSession::new();
        s.upload(CSV).unwrap();
        assert!(matches!(s.upload(b"x\ty\n"), Err(Error::Upload(_))));
        assert_eq!(s.columns(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unused_columns_ignore_unknown_names() {
        let mut s = DataSession::new();
        s.upload(CSV).unwrap();
        s.set_unused_columns(&["c", "zz", "a"], &[] as &[&str]);
        assert_eq!(s.get_unused_columns(), vec!["a", "c"]);
    }

    #[test]
    fn reset_empties_everything() {
        let mut s = DataSession::new();
        s.upload(CSV).unwrap();
        s.reset_state();
        assert!(s.empty());
        assert!(s.get_unused_columns().is_empty());
        assert_eq!(s.get_stats().unwrap().rows(), 0);
    }
}
