use prost::bytes::Bytes;

use crate::row::RowBuilder;
use crate::{CellChunk, Cell, Error, ReadRowsResponse, Row};

/// What the assembler produces from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// A committed row.
    Row(Row),
    /// The server scanned up to this key without returning any further row.
    LastScanned(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No row is being assembled: the next chunk must start one.
    NewRow,
    /// A row was started and its last cell is complete.
    RowInProgress,
    /// A cell value is split across chunks and more of it is expected.
    CellInProgress,
}

#[derive(Debug)]
struct PendingCell {
    timestamp_micros: i64,
    labels: Vec<String>,
    value: Vec<u8>,
    declared_size: usize,
}

/// Turns the chunks of a single `ReadRows` stream into rows.
///
/// An assembler holds the state of one stream only and must not be reused once the stream ends,
/// successfully or not. After any error the assembler refuses further input.
#[derive(Debug)]
pub struct CellChunkAssembler {
    state: State,
    row: Option<RowBuilder>,
    cell: Option<PendingCell>,
    last_key: Option<Bytes>,
    failed: bool,
}

impl Default for CellChunkAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T, Error> {
    Err(Error::InvalidChunkSequence(message.into()))
}

impl CellChunkAssembler {
    pub fn new() -> Self {
        Self {
            state: State::NewRow,
            row: None,
            cell: None,
            last_key: None,
            failed: false,
        }
    }

    /// Processes every chunk of a response, then its last scanned row key.
    ///
    /// Rows are added to `events` as soon as they are committed: when a chunk is invalid, the rows
    /// committed before it in the same response are kept in `events`.
    pub fn push_response<E>(
        &mut self,
        response: ReadRowsResponse,
        events: &mut E,
    ) -> Result<(), Error>
    where
        E: Extend<ReadEvent>,
    {
        for chunk in response.chunks {
            if let Some(row) = self.push_chunk(chunk)? {
                events.extend(Some(ReadEvent::Row(row)));
            }
        }
        let scanned = response.last_scanned_row_key;
        if !scanned.is_empty() {
            if self.last_key.as_ref().map_or(true, |last| &scanned > last) {
                self.last_key = Some(scanned.clone());
            }
            events.extend(Some(ReadEvent::LastScanned(scanned)));
        }
        Ok(())
    }

    /// Processes a single chunk, returning the row it commits, if any.
    pub fn push_chunk(&mut self, chunk: CellChunk) -> Result<Option<Row>, Error> {
        if self.failed {
            return invalid("chunk received after a previous error");
        }
        log::trace!(
            "chunk in state {:?}: key={:?} family={:?} qualifier={:?} ts={} value_size={} reset={} commit={}",
            self.state,
            chunk.row_key,
            chunk.family_name,
            chunk.qualifier,
            chunk.timestamp_micros,
            chunk.value_size,
            chunk.reset_row,
            chunk.commit_row
        );
        let result = self.validate(&chunk).and_then(|_| match self.state {
            State::NewRow => self.process_new_row(chunk),
            State::RowInProgress => self.process_row_in_progress(chunk),
            State::CellInProgress => self.process_cell_in_progress(chunk),
        });
        if result.is_err() {
            self.failed = true;
            self.reset();
        }
        result
    }

    /// Checks that the stream did not end in the middle of a row.
    pub fn finish(&self) -> Result<(), Error> {
        if self.failed {
            invalid("stream ended after a previous error")
        } else if self.state != State::NewRow {
            invalid("response ended with a pending row without commit")
        } else {
            Ok(())
        }
    }

    fn validate(&self, chunk: &CellChunk) -> Result<(), Error> {
        if chunk.reset_row && chunk.commit_row {
            invalid("a chunk cannot both reset and commit a row")
        } else if chunk.value_size < 0 {
            invalid(format!("negative value size {}", chunk.value_size))
        } else if chunk.value_size > 0 && chunk.commit_row {
            invalid("a row cannot have a value size and be a commit row")
        } else if chunk.reset_row && chunk.has_data() {
            invalid("a reset should have no data")
        } else {
            Ok(())
        }
    }

    fn process_new_row(&mut self, chunk: CellChunk) -> Result<Option<Row>, Error> {
        if chunk.reset_row {
            return invalid("a new row cannot be reset");
        }
        if chunk.row_key.is_empty() {
            return invalid("a row key must be set");
        }
        if let Some(last) = &self.last_key {
            if chunk.row_key == *last {
                return invalid(format!(
                    "a commit happened but the same key followed: {:?}",
                    last
                ));
            }
            if chunk.row_key < *last {
                return invalid(format!(
                    "a row key must be strictly increasing: {:?} after {:?}",
                    chunk.row_key, last
                ));
            }
        }
        let (family, qualifier) = match (chunk.family_name.clone(), chunk.qualifier.clone()) {
            (Some(family), Some(qualifier)) => (family, qualifier),
            (None, _) => return invalid("a family must be set"),
            (_, None) => return invalid("a column qualifier must be set"),
        };

        let mut row = RowBuilder::new(chunk.row_key.clone());
        row.select_family(family);
        row.select_column(qualifier);
        self.row = Some(row);
        self.start_cell(chunk)
    }

    fn process_row_in_progress(&mut self, chunk: CellChunk) -> Result<Option<Row>, Error> {
        let current_key = match &self.row {
            Some(row) => row.key().clone(),
            None => return invalid("no row in progress"),
        };
        if !chunk.row_key.is_empty() && chunk.row_key != current_key {
            return invalid("a commit is required between row keys");
        }
        if chunk.reset_row {
            self.reset();
            return Ok(None);
        }
        if chunk.family_name.is_some() && chunk.qualifier.is_none() {
            return invalid("a qualifier must be specified with a new family");
        }
        if let Some(row) = self.row.as_mut() {
            if let Some(family) = chunk.family_name.clone() {
                row.select_family(family);
            }
            if let Some(qualifier) = chunk.qualifier.clone() {
                row.select_column(qualifier);
            }
        }
        self.start_cell(chunk)
    }

    fn process_cell_in_progress(&mut self, chunk: CellChunk) -> Result<Option<Row>, Error> {
        if chunk.reset_row {
            self.reset();
            return Ok(None);
        }
        if chunk.family_name.is_some() || chunk.qualifier.is_some() {
            return invalid("a cell value continuation cannot start a new cell");
        }
        let cell = match self.cell.as_mut() {
            Some(cell) => cell,
            None => return invalid("value continuation without an open cell"),
        };
        cell.value.extend_from_slice(&chunk.value);
        if cell.value.len() > cell.declared_size {
            return invalid(format!(
                "cell value of {} bytes exceeds its declared size of {}",
                cell.value.len(),
                cell.declared_size
            ));
        }
        if chunk.value_size > 0 {
            // more to come
            return Ok(None);
        }
        if cell.value.len() != cell.declared_size {
            return invalid(format!(
                "cell value has {} bytes but {} were declared",
                cell.value.len(),
                cell.declared_size
            ));
        }
        let cell = self
            .cell
            .take()
            .map(|c| Cell::new(c.timestamp_micros, c.value).with_labels(c.labels));
        self.complete_cell(cell, chunk.commit_row)
    }

    /// Handles the value part of a chunk that starts a new cell.
    fn start_cell(&mut self, chunk: CellChunk) -> Result<Option<Row>, Error> {
        if chunk.value_size > 0 {
            let declared_size = chunk.value_size as usize;
            if chunk.value.len() > declared_size {
                return invalid(format!(
                    "cell value of {} bytes exceeds its declared size of {}",
                    chunk.value.len(),
                    declared_size
                ));
            }
            let mut value = Vec::with_capacity(declared_size);
            value.extend_from_slice(&chunk.value);
            self.cell = Some(PendingCell {
                timestamp_micros: chunk.timestamp_micros,
                labels: chunk.labels,
                value,
                declared_size,
            });
            self.state = State::CellInProgress;
            return Ok(None);
        }
        let cell = Cell::new(chunk.timestamp_micros, chunk.value).with_labels(chunk.labels);
        self.complete_cell(Some(cell), chunk.commit_row)
    }

    fn complete_cell(&mut self, cell: Option<Cell>, commit: bool) -> Result<Option<Row>, Error> {
        let pushed = match (self.row.as_mut(), cell) {
            (Some(row), Some(cell)) => row.push_cell(cell),
            _ => false,
        };
        if !pushed {
            return invalid("cell without a family and qualifier");
        }
        if commit {
            Ok(self.commit())
        } else {
            self.state = State::RowInProgress;
            Ok(None)
        }
    }

    fn commit(&mut self) -> Option<Row> {
        let row = self.row.take().map(RowBuilder::build);
        self.reset();
        if let Some(row) = &row {
            self.last_key = Some(row.key().clone());
        }
        row
    }

    fn reset(&mut self) {
        self.row = None;
        self.cell = None;
        self.state = State::NewRow;
    }
}
