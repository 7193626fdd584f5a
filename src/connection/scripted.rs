//! A `Connection` replaying canned replies, for driving the read and write paths in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use prost::bytes::Bytes;

use super::*;
use crate::CellChunk;

/// What a scripted call does.
pub(crate) enum Reply<T> {
    /// The call itself fails.
    Fail(Error),
    /// The call returns a stream yielding the items, then ends.
    Stream(Vec<Result<T, Error>>),
    /// Like `Stream`, but the stream never ends after its items.
    Hang(Vec<Result<T, Error>>),
}

struct DropGuard(Arc<AtomicUsize>);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedConnection {
    reads: Arc<Mutex<VecDeque<Reply<ReadRowsResponse>>>>,
    batches: Arc<Mutex<VecDeque<Reply<MutateRowsResponse>>>>,
    pub(crate) read_requests: Arc<Mutex<Vec<ReadRowsRequest>>>,
    pub(crate) batch_requests: Arc<Mutex<Vec<MutateRowsRequest>>>,
    pub(crate) dropped_streams: Arc<AtomicUsize>,
}

impl ScriptedConnection {
    pub(crate) fn with_reads(self, replies: Vec<Reply<ReadRowsResponse>>) -> Self {
        self.reads.lock().unwrap().extend(replies);
        self
    }

    pub(crate) fn with_batches(self, replies: Vec<Reply<MutateRowsResponse>>) -> Self {
        self.batches.lock().unwrap().extend(replies);
        self
    }

    pub(crate) fn read_requests(&self) -> Vec<ReadRowsRequest> {
        self.read_requests.lock().unwrap().clone()
    }

    pub(crate) fn batch_requests(&self) -> Vec<MutateRowsRequest> {
        self.batch_requests.lock().unwrap().clone()
    }

    fn play<T: Send + 'static>(
        &self,
        reply: Option<Reply<T>>,
    ) -> Result<ResponseStream<T>, Error> {
        let guard = DropGuard(self.dropped_streams.clone());
        let stream = match reply {
            None => stream::empty().boxed(),
            Some(Reply::Fail(error)) => return Err(error),
            Some(Reply::Stream(items)) => stream::iter(items).boxed(),
            Some(Reply::Hang(items)) => stream::iter(items).chain(stream::pending()).boxed(),
        };
        Ok(stream
            .map(move |item| {
                let _guard = &guard;
                item
            })
            .boxed())
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn read_rows(
        &mut self,
        request: ReadRowsRequest,
    ) -> Result<ResponseStream<ReadRowsResponse>, Error> {
        self.read_requests.lock().unwrap().push(request);
        let reply = self.reads.lock().unwrap().pop_front();
        self.play(reply)
    }

    async fn mutate_rows(
        &mut self,
        request: MutateRowsRequest,
    ) -> Result<ResponseStream<MutateRowsResponse>, Error> {
        self.batch_requests.lock().unwrap().push(request);
        let reply = self.batches.lock().unwrap().pop_front();
        self.play(reply)
    }

    async fn mutate_row(&mut self, _request: MutateRowRequest) -> Result<(), Error> {
        Ok(())
    }

    async fn check_and_mutate_row(
        &mut self,
        _request: CheckAndMutateRowRequest,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    async fn read_modify_write_row(
        &mut self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<Row, Error> {
        Ok(Row::from_cells(request.row_key, vec![]))
    }

    async fn sample_row_keys(
        &mut self,
        _request: SampleRowKeysRequest,
    ) -> Result<ResponseStream<KeyOffset>, Error> {
        self.play(None)
    }
}

/// A response holding one single-cell committed row per key.
pub(crate) fn rows(keys: &[&str]) -> ReadRowsResponse {
    ReadRowsResponse {
        chunks: keys
            .iter()
            .map(|key| CellChunk {
                row_key: Bytes::copy_from_slice(key.as_bytes()),
                family_name: Some("cf".to_string()),
                qualifier: Some(Bytes::from_static(b"q")),
                timestamp_micros: 1,
                value: Bytes::copy_from_slice(key.as_bytes()),
                commit_row: true,
                ..Default::default()
            })
            .collect(),
        last_scanned_row_key: Bytes::new(),
    }
}

/// A response made of a single status per entry, in order.
pub(crate) fn statuses(codes: &[(usize, tonic::Code)]) -> MutateRowsResponse {
    MutateRowsResponse {
        entries: codes
            .iter()
            .map(|(index, code)| EntryStatus {
                index: *index,
                status: tonic::Status::new(*code, format!("{:?}", code)),
            })
            .collect(),
    }
}
