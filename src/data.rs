//! Data-driven injection: delimited tables shared read-only across VUs.
//!
//! Tables are loaded once at process start and handed out as `Arc` clones, so
//! every virtual user reads the same immutable rows. Row selection is a pure
//! function of `(vu_id, iteration)` — reruns pick the same rows.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ConfigError;

/// One row as seen by an operation: column name -> string value.
pub type Row = HashMap<String, String>;

/// An immutable, ordered table parsed from delimited text.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DataTable {
    /// Parse RFC-4180-style delimited text: quoted fields, doubled-quote
    /// escapes, per-field whitespace trimming. The first record is the
    /// header row.
    pub fn parse(text: &str) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Deterministic row selection: `rows[(vu_id * 1000 + iteration) % len]`.
    /// An empty table yields an empty row rather than failing the call.
    pub fn pick_row(&self, vu_id: u64, iteration: u64) -> Row {
        if self.rows.is_empty() {
            return Row::new();
        }
        let idx = ((vu_id.wrapping_mul(1000).wrapping_add(iteration)) % self.rows.len() as u64)
            as usize;
        self.row(idx)
    }

    fn row(&self, idx: usize) -> Row {
        self.headers
            .iter()
            .cloned()
            .zip(self.rows[idx].iter().cloned())
            .collect()
    }
}

/// Loads and caches data tables by name (`{root}/{name}.csv`).
///
/// Loading happens single-threaded at startup; afterwards tables are only
/// read through the shared `Arc`s.
#[derive(Debug)]
pub struct DataInjector {
    root: PathBuf,
    tables: HashMap<String, Arc<DataTable>>,
}

impl DataInjector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tables: HashMap::new(),
        }
    }

    /// Load a table, reusing the cached copy on repeat calls for the same name.
    pub fn load(&mut self, name: &str) -> Result<Arc<DataTable>, ConfigError> {
        if let Some(table) = self.tables.get(name) {
            return Ok(Arc::clone(table));
        }
        let path = self.root.join(format!("{name}.csv"));
        let text = std::fs::read_to_string(&path)?;
        let table = Arc::new(DataTable::parse(&text).map_err(|source| ConfigError::DataFile {
            name: name.to_string(),
            source,
        })?);
        tracing::debug!(table = name, rows = table.len(), "loaded data table");
        self.tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DataTable>> {
        self.tables.get(name).map(Arc::clone)
    }

    /// All loaded tables, keyed by name. Handed to the dispatcher at startup.
    pub fn tables(&self) -> HashMap<String, Arc<DataTable>> {
        self.tables.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_commas_do_not_split_fields() {
        let table = DataTable::parse("a,\"b,c\",d\n1,\"2,3\",4").unwrap();
        assert_eq!(table.len(), 1);
        let row = table.pick_row(0, 0);
        assert_eq!(row["a"], "1");
        assert_eq!(row["b,c"], "2,3");
        assert_eq!(row["d"], "4");
    }

    #[test]
    fn doubled_quotes_become_literal_quotes() {
        let table = DataTable::parse("note\n\"say \"\"hi\"\"\"").unwrap();
        let row = table.pick_row(0, 0);
        assert_eq!(row["note"], "say \"hi\"");
    }

    #[test]
    fn fields_are_trimmed() {
        let table = DataTable::parse("user , city\n alice ,  berlin ").unwrap();
        let row = table.pick_row(0, 0);
        assert_eq!(row["user"], "alice");
        assert_eq!(row["city"], "berlin");
    }

    #[test]
    fn pick_row_is_deterministic() {
        let table = DataTable::parse("n\n0\n1\n2\n3\n4\n5\n6").unwrap();
        let first = table.pick_row(3, 17);
        assert_eq!(first, table.pick_row(3, 17));
        // (3 * 1000 + 17) % 7 == 0
        assert_eq!(first["n"], "0");
        // (2 * 1000 + 5) % 7 == 3
        assert_eq!(table.pick_row(2, 5)["n"], "3");
    }

    #[test]
    fn empty_table_yields_empty_row() {
        let table = DataTable::parse("a,b").unwrap();
        assert!(table.is_empty());
        assert!(table.pick_row(1, 1).is_empty());
    }

    #[test]
    fn injector_caches_by_name() {
        let dir = std::env::temp_dir().join(format!("stampede-data-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("users.csv"), "id,name\n1,alice\n2,bob\n").unwrap();

        let mut injector = DataInjector::new(&dir);
        let first = injector.load("users").unwrap();
        let second = injector.load("users").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 2);
        assert!(injector.get("users").is_some());
        assert!(injector.get("missing").is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
