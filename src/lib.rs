//! An asynchronous client for the Cloud Bigtable data API.
//!
//! # Example
//!
//! ```no_run
//! use bigtable_rs::{Client, Error, MutationEntry, ReadRowsOptions};
//! use futures::TryStreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let client = Client::configure()
//!         .project("my-gcp-project")
//!         .instance("my-instance")
//!         .connect()
//!         .await?;
//!
//!     let table = client.table("person");
//!
//!     let outcome = table
//!         .mutate_rows(vec![
//!             MutationEntry::new("person#1").set_cell("info", "name", 0, "ferris"),
//!             MutationEntry::new("person#2").set_cell("info", "name", 0, "corro"),
//!         ])
//!         .await?;
//!     for failure in outcome.failures() {
//!         println!("could not write {:?}: {}", failure.row_key, failure.status);
//!     }
//!
//!     let mut rows = table.read_rows(ReadRowsOptions::builder().prefix("person#").build()?);
//!     while let Some(row) = rows.try_next().await? {
//!         let name = row.cells("info", b"name").first().map(|cell| cell.value().clone());
//!         println!("found person: {:?} {:?}", row.key(), name);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Reads
//!
//! [`Table::read_rows`] returns a [`RowStream`]. The server streams rows in key order, split into
//! chunks that are reassembled by the client. When the stream is interrupted by a transient error,
//! the read is resumed after the last row returned, so rows are never returned twice nor skipped.
//! A row limit applies to the whole read, across resumptions.
//!
//! Retries are bounded by [`RetrySettings`]: a number of consecutive failures and, optionally, an
//! overall timeout. Dropping the stream, or calling [`RowStream::cancel`], aborts the read.
//!
//! # Writes
//!
//! [`Table::mutate_rows`] applies a batch of [`MutationEntry`], each of them atomically. Entries
//! that fail transiently are sent again, and only them. Entries that could not be applied are
//! reported through [`MutateRowsOutcome`] rather than as an error.
//!
//! [`Table::check_and_mutate_row`] and [`Table::read_modify_write_row`] are not idempotent and
//! are never retried.
//!
//! ## Authentication
//!
//! Authentication uses the [`gcp_auth`] crate which supports several authentication methods.
//! When the `BIGTABLE_EMULATOR_HOST` environment variable is set, the client connects to the
//! emulator instead, without authentication.

pub use crate::assembler::{CellChunkAssembler, ReadEvent};
pub use crate::batch::{FailedEntry, MutateRowsOutcome};
pub use crate::chunk::{CellChunk, ReadRowsResponse};
pub use crate::client::*;
pub use crate::config::*;
pub use crate::connection::{
    CheckAndMutateRowRequest, Connection, EntryStatus, KeyOffset, MutateRowRequest,
    MutateRowsRequest, MutateRowsResponse, ReadModifyWriteRowRequest, ReadRowsRequest,
    ResponseStream, SampleRowKeysRequest,
};
pub use crate::error::{is_retryable_status, Error};
pub use crate::keys::{RowRange, RowSelection, RowSet};
pub use crate::mutation::{Mutation, MutationEntry, ReadModifyWriteRule, SERVER_TIMESTAMP};
pub use crate::read::{ReadRowsOptions, ReadRowsOptionsBuilder, RowStream};
pub use crate::resource::*;
pub use crate::resumption::{ResumeRequest, ResumptionState};
pub use crate::retry::RetrySettings;
pub use crate::row::{Cell, Column, Family, Row};
pub use google_api_proto::google::bigtable::v2::RowFilter;

mod assembler;
mod auth;
mod batch;
mod chunk;
mod client;
mod config;
mod connection;
mod error;
mod keys;
mod mutation;
mod read;
mod resource;
mod resumption;
mod retry;
mod row;
