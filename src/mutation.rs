use prost::bytes::Bytes;

/// Asks the server to use its own clock for a cell's timestamp.
///
/// Mutations using it are not idempotent: replaying them writes a new version.
pub const SERVER_TIMESTAMP: i64 = -1;

/// A single change to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetCell {
        family: String,
        qualifier: Bytes,
        timestamp_micros: i64,
        value: Bytes,
    },
    /// Deletes the cells of a column, optionally only those within `[start, end)` microseconds.
    DeleteFromColumn {
        family: String,
        qualifier: Bytes,
        time_range: Option<(i64, i64)>,
    },
    DeleteFromFamily {
        family: String,
    },
    DeleteFromRow,
}

impl Mutation {
    pub fn set_cell(
        family: &str,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Mutation::SetCell {
            family: family.to_string(),
            qualifier: qualifier.into(),
            timestamp_micros,
            value: value.into(),
        }
    }

    pub fn delete_from_column(family: &str, qualifier: impl Into<Bytes>) -> Self {
        Mutation::DeleteFromColumn {
            family: family.to_string(),
            qualifier: qualifier.into(),
            time_range: None,
        }
    }

    pub fn delete_from_family(family: &str) -> Self {
        Mutation::DeleteFromFamily {
            family: family.to_string(),
        }
    }
}

/// The mutations to apply atomically to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEntry {
    row_key: Bytes,
    mutations: Vec<Mutation>,
}

impl MutationEntry {
    pub fn new(row_key: impl Into<Bytes>) -> Self {
        Self {
            row_key: row_key.into(),
            mutations: vec![],
        }
    }

    pub fn with_mutations(row_key: impl Into<Bytes>, mutations: Vec<Mutation>) -> Self {
        Self {
            row_key: row_key.into(),
            mutations,
        }
    }

    pub fn push(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn set_cell(
        self,
        family: &str,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        self.push(Mutation::set_cell(
            family,
            qualifier,
            timestamp_micros,
            value,
        ))
    }

    pub fn delete_row(self) -> Self {
        self.push(Mutation::DeleteFromRow)
    }

    pub fn row_key(&self) -> &Bytes {
        &self.row_key
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        if self.row_key.is_empty() {
            Err(crate::Error::Client(
                "a mutation entry must have a row key".to_string(),
            ))
        } else if self.mutations.is_empty() {
            Err(crate::Error::Client(format!(
                "mutation entry for row {:?} has no mutations",
                self.row_key
            )))
        } else {
            Ok(())
        }
    }
}

/// Transforms the latest value of a cell, atomically on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadModifyWriteRule {
    /// Appends to the latest value. An unset cell is treated as empty.
    Append {
        family: String,
        qualifier: Bytes,
        value: Bytes,
    },
    /// Adds to the latest value, read as a 64-bit big-endian integer. An unset cell is treated
    /// as zero.
    Increment {
        family: String,
        qualifier: Bytes,
        amount: i64,
    },
}

impl ReadModifyWriteRule {
    pub fn append(family: &str, qualifier: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        ReadModifyWriteRule::Append {
            family: family.to_string(),
            qualifier: qualifier.into(),
            value: value.into(),
        }
    }

    pub fn increment(family: &str, qualifier: impl Into<Bytes>, amount: i64) -> Self {
        ReadModifyWriteRule::Increment {
            family: family.to_string(),
            qualifier: qualifier.into(),
            amount,
        }
    }

    pub fn family(&self) -> &str {
        match self {
            ReadModifyWriteRule::Append { family, .. }
            | ReadModifyWriteRule::Increment { family, .. } => family,
        }
    }

    pub fn qualifier(&self) -> &Bytes {
        match self {
            ReadModifyWriteRule::Append { qualifier, .. }
            | ReadModifyWriteRule::Increment { qualifier, .. } => qualifier,
        }
    }
}
