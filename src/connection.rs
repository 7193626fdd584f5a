use async_trait::async_trait;
use dyn_clone::DynClone;
use futures::stream::BoxStream;
use prost::bytes::Bytes;

use crate::{
    Error, Mutation, MutationEntry, ReadModifyWriteRule, ReadRowsResponse, Row, RowFilter, RowSet,
};

/// A stream of responses from a server-streaming RPC.
///
/// Dropping the stream cancels the call.
pub type ResponseStream<T> = BoxStream<'static, Result<T, Error>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ReadRowsRequest {
    pub table_name: String,
    pub app_profile_id: Option<String>,
    pub rows: RowSet,
    pub filter: Option<RowFilter>,
    pub rows_limit: Option<u64>,
    /// Zero for the first attempt of an operation.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutateRowsRequest {
    pub table_name: String,
    pub app_profile_id: Option<String>,
    pub entries: Vec<MutationEntry>,
    pub attempt: u32,
}

/// The outcome of one entry of a `MutateRows` call.
#[derive(Debug)]
pub struct EntryStatus {
    /// Position of the entry in the request that was sent.
    pub index: usize,
    pub status: tonic::Status,
}

#[derive(Debug, Default)]
pub struct MutateRowsResponse {
    pub entries: Vec<EntryStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutateRowRequest {
    pub table_name: String,
    pub app_profile_id: Option<String>,
    pub row_key: Bytes,
    pub mutations: Vec<Mutation>,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckAndMutateRowRequest {
    pub table_name: String,
    pub app_profile_id: Option<String>,
    pub row_key: Bytes,
    pub predicate_filter: Option<RowFilter>,
    pub true_mutations: Vec<Mutation>,
    pub false_mutations: Vec<Mutation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadModifyWriteRowRequest {
    pub table_name: String,
    pub app_profile_id: Option<String>,
    pub row_key: Bytes,
    /// Applied in order, a rule sees the result of the previous ones.
    pub rules: Vec<ReadModifyWriteRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRowKeysRequest {
    pub table_name: String,
    pub app_profile_id: Option<String>,
    pub attempt: u32,
}

/// A sampled row key along with the approximate size of the table up to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOffset {
    pub row_key: Bytes,
    pub offset_bytes: i64,
}

/// The RPCs of the Bigtable data API used by the client.
///
/// A connection is cloned for every operation, so implementations should share their underlying
/// channel between clones.
#[async_trait]
pub trait Connection
where
    Self: DynClone + Send + Sync,
{
    async fn read_rows(
        &mut self,
        request: ReadRowsRequest,
    ) -> Result<ResponseStream<ReadRowsResponse>, Error>;
    async fn mutate_rows(
        &mut self,
        request: MutateRowsRequest,
    ) -> Result<ResponseStream<MutateRowsResponse>, Error>;
    async fn mutate_row(&mut self, request: MutateRowRequest) -> Result<(), Error>;
    async fn check_and_mutate_row(&mut self, request: CheckAndMutateRowRequest)
        -> Result<bool, Error>;
    /// Returns the new contents of the cells modified by the rules.
    async fn read_modify_write_row(
        &mut self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<Row, Error>;
    async fn sample_row_keys(
        &mut self,
        request: SampleRowKeysRequest,
    ) -> Result<ResponseStream<KeyOffset>, Error>;
}

dyn_clone::clone_trait_object!(Connection);

pub(crate) mod grpc;

#[cfg(test)]
pub(crate) mod scripted;
