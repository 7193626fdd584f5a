use prost::bytes::Bytes;

/// A fragment of a row as streamed by `ReadRows`.
///
/// A chunk either starts a row (it then carries the row key), continues it with a new cell
/// (family and/or qualifier), continues a split cell value (value only), or resets the row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellChunk {
    /// Only set on the first chunk of a row. Empty means absent.
    pub row_key: Bytes,
    pub family_name: Option<String>,
    pub qualifier: Option<Bytes>,
    pub timestamp_micros: i64,
    pub labels: Vec<String>,
    pub value: Bytes,
    /// Total size of the cell value when it is split over several chunks and this is not the
    /// last one, zero otherwise.
    pub value_size: i32,
    pub reset_row: bool,
    pub commit_row: bool,
}

impl CellChunk {
    pub(crate) fn has_data(&self) -> bool {
        !self.row_key.is_empty()
            || self.family_name.is_some()
            || self.qualifier.is_some()
            || !self.value.is_empty()
            || self.timestamp_micros != 0
            || !self.labels.is_empty()
    }
}

/// One message of a `ReadRows` response stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRowsResponse {
    pub chunks: Vec<CellChunk>,
    /// The server has scanned up to this key, no row at or before it will be returned.
    /// Empty means absent.
    pub last_scanned_row_key: Bytes,
}
