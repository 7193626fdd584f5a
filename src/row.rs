use prost::bytes::Bytes;

/// A single versioned value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub(crate) timestamp_micros: i64,
    pub(crate) value: Bytes,
    pub(crate) labels: Vec<String>,
}

impl Cell {
    pub fn new(timestamp_micros: i64, value: impl Into<Bytes>) -> Self {
        Self {
            timestamp_micros,
            value: value.into(),
            labels: vec![],
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// The cell's timestamp, in microseconds since the epoch.
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp_micros
    }

    /// The cell's timestamp as a UTC date time.
    ///
    /// Returns `None` if the timestamp is out of the range supported by `chrono`.
    #[cfg(feature = "temporal")]
    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        use chrono::TimeZone;
        let secs = self.timestamp_micros.div_euclid(1_000_000);
        let nanos = (self.timestamp_micros.rem_euclid(1_000_000) * 1_000) as u32;
        chrono::Utc.timestamp_opt(secs, nanos).single()
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Labels applied by a `apply_label_transformer` filter, if any.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub(crate) qualifier: Bytes,
    pub(crate) cells: Vec<Cell>,
}

impl Column {
    pub fn qualifier(&self) -> &Bytes {
        &self.qualifier
    }

    /// The column's cells, most recent first.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// The most recent cell of this column.
    pub fn latest(&self) -> Option<&Cell> {
        self.cells.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub(crate) name: String,
    pub(crate) columns: Vec<Column>,
}

impl Family {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, qualifier: &[u8]) -> Option<&Column> {
        self.columns.iter().find(|c| c.qualifier == qualifier)
    }
}

/// A row as returned by a read: its key and all the cells that matched the read's filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub(crate) key: Bytes,
    pub(crate) families: Vec<Family>,
}

impl Row {
    /// Builds a row from `(family, qualifier, cell)` triples, grouping cells by family and column.
    pub fn from_cells<I>(key: impl Into<Bytes>, cells: I) -> Self
    where
        I: IntoIterator<Item = (String, Bytes, Cell)>,
    {
        let mut builder = RowBuilder::new(key.into());
        for (family, qualifier, cell) in cells {
            builder.select_family(family);
            builder.select_column(qualifier);
            builder.push_cell(cell);
        }
        builder.build()
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// The row's families, in the order the server returned them.
    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn family(&self, name: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.name == name)
    }

    /// Returns the cells of a single column, most recent first.
    ///
    /// An absent family or column yields an empty slice.
    pub fn cells(&self, family: &str, qualifier: &[u8]) -> &[Cell] {
        self.family(family)
            .and_then(|f| f.column(qualifier))
            .map(|c| c.cells())
            .unwrap_or(&[])
    }

    /// A row without any family carries no data.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

/// Accumulates the cells of one row while its chunks are being received.
#[derive(Debug, Default)]
pub(crate) struct RowBuilder {
    key: Bytes,
    families: Vec<Family>,
    family: Option<usize>,
    column: Option<usize>,
}

impl RowBuilder {
    pub(crate) fn new(key: Bytes) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub(crate) fn key(&self) -> &Bytes {
        &self.key
    }

    /// Makes `name` the current family, creating it if it was not seen yet in this row.
    pub(crate) fn select_family(&mut self, name: String) {
        let idx = match self.families.iter().position(|f| f.name == name) {
            Some(idx) => idx,
            None => {
                self.families.push(Family {
                    name,
                    columns: vec![],
                });
                self.families.len() - 1
            }
        };
        self.family = Some(idx);
        self.column = None;
    }

    /// Makes `qualifier` the current column of the current family.
    pub(crate) fn select_column(&mut self, qualifier: Bytes) -> bool {
        let family = match self.family {
            Some(idx) => &mut self.families[idx],
            None => return false,
        };
        let idx = match family.columns.iter().position(|c| c.qualifier == qualifier) {
            Some(idx) => idx,
            None => {
                family.columns.push(Column {
                    qualifier,
                    cells: vec![],
                });
                family.columns.len() - 1
            }
        };
        self.column = Some(idx);
        true
    }

    pub(crate) fn push_cell(&mut self, cell: Cell) -> bool {
        match (self.family, self.column) {
            (Some(family), Some(column)) => {
                self.families[family].columns[column].cells.push(cell);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn build(self) -> Row {
        let mut families = self.families;
        for column in families.iter_mut().flat_map(|f| f.columns.iter_mut()) {
            // stable, so equal timestamps keep their arrival order
            column
                .cells
                .sort_by(|a, b| b.timestamp_micros.cmp(&a.timestamp_micros));
        }
        Row {
            key: self.key,
            families,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builder_groups_by_family_and_column() {
        let mut builder = RowBuilder::new(Bytes::from("row"));
        builder.select_family("cf1".to_string());
        assert!(builder.select_column(Bytes::from("a")));
        assert!(builder.push_cell(Cell::new(1, "old")));
        assert!(builder.push_cell(Cell::new(5, "new")));
        builder.select_family("cf2".to_string());
        assert!(builder.select_column(Bytes::from("b")));
        assert!(builder.push_cell(Cell::new(2, "x")));
        builder.select_family("cf1".to_string());
        assert!(builder.select_column(Bytes::from("a")));
        assert!(builder.push_cell(Cell::new(3, "mid")));

        let row = builder.build();
        assert_eq!(row.key(), &Bytes::from("row"));
        assert_eq!(
            row.families()
                .iter()
                .map(|f| f.name())
                .collect::<Vec<&str>>(),
            vec!["cf1", "cf2"]
        );
        let timestamps = row
            .cells("cf1", b"a")
            .iter()
            .map(Cell::timestamp_micros)
            .collect::<Vec<i64>>();
        assert_eq!(timestamps, vec![5, 3, 1]);
        assert_eq!(
            row.family("cf1").unwrap().column(b"a").unwrap().latest(),
            Some(&Cell::new(5, "new"))
        );
        assert!(row.cells("cf3", b"a").is_empty());
        assert!(!row.is_empty());
    }

    #[test]
    fn test_row_from_cells() {
        let row = Row::from_cells(
            "row",
            vec![
                ("cf".to_string(), Bytes::from("a"), Cell::new(1, "one")),
                ("cf".to_string(), Bytes::from("b"), Cell::new(1, "x")),
                ("cf".to_string(), Bytes::from("a"), Cell::new(2, "two")),
            ],
        );
        assert_eq!(row.families().len(), 1);
        assert_eq!(row.family("cf").unwrap().columns().len(), 2);
        assert_eq!(row.cells("cf", b"a")[0].value(), &Bytes::from("two"));
    }

    #[test]
    fn test_builder_requires_family_before_column() {
        let mut builder = RowBuilder::new(Bytes::from("row"));
        assert!(!builder.select_column(Bytes::from("a")));
        assert!(!builder.push_cell(Cell::new(1, "v")));
        assert!(builder.build().is_empty());
    }

    #[cfg(feature = "temporal")]
    #[test]
    fn test_cell_timestamp() {
        let cell = Cell::new(1_500_000, "v");
        let ts = cell.timestamp().unwrap();
        assert_eq!(ts.timestamp(), 1);
        assert_eq!(ts.timestamp_subsec_micros(), 500_000);
    }
}
