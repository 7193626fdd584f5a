use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use derive_builder::Builder;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use prost::bytes::Bytes;
use tokio::time::Instant;

use crate::assembler::{CellChunkAssembler, ReadEvent};
use crate::connection::{Connection, ReadRowsRequest, ResponseStream};
use crate::resumption::ResumptionState;
use crate::retry::{deadline, deadline_exceeded, expired, until, RetrySettings};
use crate::{Error, ReadRowsResponse, Row, RowFilter, RowRange, RowSelection, RowSet};

/// Describes which rows to read and how.
///
/// The rows can be described in one of several mutually exclusive ways: explicit keys and ranges,
/// a single prefix, a list of prefixes, or a `start`/`end` pair (both inclusive). Describing none
/// of them reads the whole table.
///
/// ```
/// # use bigtable_rs::{Error, ReadRowsOptions, RowRange};
/// # fn main() -> Result<(), Error> {
/// let options = ReadRowsOptions::builder()
///     .key("user#1")
///     .range(RowRange::closed_open("user#5", "user#9"))
///     .limit(100)
///     .build()?;
///
/// // a prefix cannot be combined with a start and end
/// assert!(ReadRowsOptions::builder()
///     .prefix("user#")
///     .start("user#5")
///     .build()
///     .is_err());
/// # Ok(()) }
/// ```
#[derive(Builder, Debug, Clone, Default, PartialEq)]
#[builder(
    pattern = "owned",
    build_fn(validate = "Self::validate", error = "Error")
)]
pub struct ReadRowsOptions {
    #[builder(setter(custom), default)]
    keys: Vec<Bytes>,
    #[builder(setter(custom), default)]
    ranges: Vec<RowRange>,
    /// Reads every row whose key starts with this prefix.
    #[builder(setter(into, strip_option), default)]
    prefix: Option<Bytes>,
    #[builder(setter(custom), default)]
    prefixes: Vec<Bytes>,
    /// The first key to read, inclusive.
    #[builder(setter(into, strip_option), default)]
    start: Option<Bytes>,
    /// The last key to read, inclusive.
    #[builder(setter(into, strip_option), default)]
    end: Option<Bytes>,
    /// Passed as-is to the server.
    #[builder(setter(strip_option), default)]
    filter: Option<RowFilter>,
    /// The maximum number of rows to return, across all retries.
    #[builder(setter(strip_option), default)]
    limit: Option<u64>,
    /// Bounds the whole read, retries included. Overrides [`RetrySettings::timeout`].
    #[builder(setter(strip_option), default)]
    timeout: Option<Duration>,
}

impl ReadRowsOptions {
    pub fn builder() -> ReadRowsOptionsBuilder {
        ReadRowsOptionsBuilder::default()
    }

    /// Reads the whole table.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> RowSelection {
        if let Some(prefix) = &self.prefix {
            RowSelection::Prefix(prefix.clone())
        } else if !self.prefixes.is_empty() {
            RowSelection::Prefixes(self.prefixes.clone())
        } else if self.start.is_some() || self.end.is_some() {
            RowSelection::Span {
                start: self.start.clone(),
                end: self.end.clone(),
            }
        } else if !self.keys.is_empty() || !self.ranges.is_empty() {
            RowSelection::Rows(RowSet::new(self.keys.clone(), self.ranges.clone()))
        } else {
            RowSelection::All
        }
    }

    pub fn filter(&self) -> Option<&RowFilter> {
        self.filter.as_ref()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl ReadRowsOptionsBuilder {
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.keys.get_or_insert_with(Vec::new).push(key.into());
        self
    }

    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.keys
            .get_or_insert_with(Vec::new)
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn range(mut self, range: RowRange) -> Self {
        self.ranges.get_or_insert_with(Vec::new).push(range);
        self
    }

    pub fn ranges(mut self, ranges: impl IntoIterator<Item = RowRange>) -> Self {
        self.ranges.get_or_insert_with(Vec::new).extend(ranges);
        self
    }

    /// Reads every row whose key starts with any of the prefixes.
    pub fn prefixes<I, K>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.prefixes
            .get_or_insert_with(Vec::new)
            .extend(prefixes.into_iter().map(Into::into));
        self
    }

    fn validate(&self) -> Result<(), Error> {
        let non_empty = |values: Option<usize>| values.unwrap_or(0) > 0;
        let shapes = [
            (
                "keys or ranges",
                non_empty(self.keys.as_ref().map(Vec::len))
                    || non_empty(self.ranges.as_ref().map(Vec::len)),
            ),
            ("prefix", matches!(self.prefix, Some(Some(_)))),
            ("prefixes", non_empty(self.prefixes.as_ref().map(Vec::len))),
            (
                "start/end",
                matches!(self.start, Some(Some(_))) || matches!(self.end, Some(Some(_))),
            ),
        ];
        let given = shapes
            .iter()
            .filter(|(_, given)| *given)
            .map(|(name, _)| *name)
            .collect::<Vec<_>>();
        if given.len() > 1 {
            return Err(Error::InvalidKeySet(format!(
                "{} cannot be combined",
                given.join(", ")
            )));
        }
        if matches!(self.limit, Some(Some(0))) {
            return Err(Error::Client("a row limit must be positive".to_string()));
        }
        Ok(())
    }
}

/// The stream of a single attempt along with the rows assembled from it and not yet delivered.
struct Attempt {
    stream: ResponseStream<ReadRowsResponse>,
    assembler: CellChunkAssembler,
    events: VecDeque<ReadEvent>,
    /// A protocol violation, returned once the rows committed before it are delivered.
    violation: Option<Error>,
}

impl Attempt {
    fn new(stream: ResponseStream<ReadRowsResponse>) -> Self {
        Self {
            stream,
            assembler: CellChunkAssembler::new(),
            events: VecDeque::new(),
            violation: None,
        }
    }
}

/// Drives a read across as many attempts as needed.
pub(crate) struct ReadOperation {
    connection: Box<dyn Connection>,
    table_name: String,
    app_profile_id: Option<String>,
    filter: Option<RowFilter>,
    state: ResumptionState,
    settings: RetrySettings,
    deadline: Option<Instant>,
    attempts: u32,
    consecutive_failures: u32,
    last_error: Option<Error>,
    current: Option<Attempt>,
    done: bool,
}

impl ReadOperation {
    pub(crate) fn new(
        connection: Box<dyn Connection>,
        table_name: String,
        app_profile_id: Option<String>,
        options: ReadRowsOptions,
        settings: RetrySettings,
    ) -> Self {
        let deadline = deadline(options.timeout.or(settings.timeout));
        let state = ResumptionState::new(options.selection().into_row_set(), options.limit);
        Self {
            connection,
            table_name,
            app_profile_id,
            filter: options.filter,
            state,
            settings,
            deadline,
            attempts: 0,
            consecutive_failures: 0,
            last_error: None,
            current: None,
            done: false,
        }
    }

    /// Returns the next row, or `None` once the read is complete. After an error, the read is
    /// over and `None` is returned from then on.
    async fn next_row(&mut self) -> Option<Result<Row, Error>> {
        if self.done {
            return None;
        }
        let next = self.advance().await;
        if !matches!(next, Ok(Some(_))) {
            self.done = true;
            self.current = None;
        }
        next.transpose()
    }

    async fn advance(&mut self) -> Result<Option<Row>, Error> {
        loop {
            if self.state.limit_reached() {
                log::debug!("read of {} reached its limit", self.table_name);
                return Ok(None);
            }

            if self.current.is_none() {
                let request = match self.state.next_request() {
                    Some(request) => request,
                    None => return Ok(None),
                };
                let request = ReadRowsRequest {
                    table_name: self.table_name.clone(),
                    app_profile_id: self.app_profile_id.clone(),
                    rows: request.row_set,
                    filter: self.filter.clone(),
                    rows_limit: request.rows_limit,
                    attempt: self.attempts,
                };
                log::debug!(
                    "read attempt {} on {} ({} rows read)",
                    self.attempts,
                    self.table_name,
                    self.state.rows_read()
                );
                self.attempts += 1;
                match until(self.deadline, self.connection.read_rows(request)).await {
                    Some(Ok(stream)) => self.current = Some(Attempt::new(stream)),
                    Some(Err(error)) => {
                        self.retry_or_fail(error).await?;
                        continue;
                    }
                    None => return Err(deadline_exceeded(self.last_error.take())),
                }
            }

            let attempt = match self.current.as_mut() {
                Some(attempt) => attempt,
                None => continue,
            };

            if let Some(event) = attempt.events.pop_front() {
                match event {
                    ReadEvent::Row(row) => {
                        if self.state.record_row(row.key()) {
                            self.consecutive_failures = 0;
                            return Ok(Some(row));
                        }
                        log::trace!("skipping already delivered row {:?}", row.key());
                    }
                    ReadEvent::LastScanned(key) => self.state.record_scanned(key),
                }
                continue;
            }
            if let Some(violation) = attempt.violation.take() {
                return Err(violation);
            }

            let next = match until(self.deadline, attempt.stream.next()).await {
                Some(next) => next,
                None => return Err(deadline_exceeded(self.last_error.take())),
            };
            match next {
                Some(Ok(response)) => {
                    if let Err(error) = attempt.assembler.push_response(response, &mut attempt.events)
                    {
                        log::warn!("read of {} received invalid chunks: {}", self.table_name, error);
                        attempt.violation = Some(error);
                    }
                }
                Some(Err(error)) => self.retry_or_fail(error).await?,
                None => {
                    attempt.assembler.finish()?;
                    return Ok(None);
                }
            }
        }
    }

    /// Drops the current attempt and waits before the next one, unless `error` must end the read.
    async fn retry_or_fail(&mut self, error: Error) -> Result<(), Error> {
        self.current = None;
        if !error.is_retryable() {
            log::warn!("read of {} failed: {}", self.table_name, error);
            return Err(error);
        }
        if self.consecutive_failures >= self.settings.max_read_retries {
            log::warn!(
                "read of {} failed after {} consecutive retries: {}",
                self.table_name,
                self.consecutive_failures,
                error
            );
            return Err(error);
        }
        if expired(self.deadline) {
            return Err(error);
        }
        self.consecutive_failures += 1;
        let delay = self.settings.backoff(self.consecutive_failures);
        log::debug!(
            "read of {} interrupted ({}), retrying in {:?}",
            self.table_name,
            error,
            delay
        );
        if until(self.deadline, tokio::time::sleep(delay)).await.is_none() {
            return Err(error);
        }
        self.last_error = Some(error);
        Ok(())
    }
}

/// The rows returned by a read, in key order.
///
/// Nothing is sent to the server until the stream is first polled. The stream ends after the
/// last row, or after yielding an error.
///
/// Dropping the stream or calling [`RowStream::cancel`] aborts the read: the in-flight call and
/// any pending backoff are dropped and no further row is yielded.
pub struct RowStream {
    inner: Option<BoxStream<'static, Result<Row, Error>>>,
}

impl RowStream {
    pub(crate) fn new(operation: ReadOperation) -> Self {
        let rows = futures::stream::unfold(operation, |mut operation| async move {
            operation.next_row().await.map(|row| (row, operation))
        });
        Self {
            inner: Some(rows.boxed()),
        }
    }

    /// Aborts the read. Rows assembled but not yet yielded are discarded.
    pub fn cancel(&mut self) {
        if self.inner.take().is_some() {
            log::debug!("read cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for RowStream {
    type Item = Result<Row, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut() {
            Some(rows) => rows.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}
