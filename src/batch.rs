use std::collections::{BTreeMap, BTreeSet};

use futures::StreamExt;
use prost::bytes::Bytes;
use tonic::{Code, Status};

use crate::connection::{Connection, MutateRowsRequest};
use crate::error::is_retryable_status;
use crate::retry::{deadline, expired, until, RetrySettings};
use crate::{Error, MutationEntry};

/// An entry that could not be applied.
#[derive(Debug)]
pub struct FailedEntry {
    /// Position of the entry in the batch given by the caller.
    pub index: usize,
    pub row_key: Bytes,
    /// The last status the entry failed with.
    pub status: Status,
}

/// The result of a bulk mutation that ran to completion.
///
/// Entries are applied independently of each other, so some of them may have failed while others
/// succeeded.
#[derive(Debug, Default)]
pub struct MutateRowsOutcome {
    attempts: u32,
    failures: Vec<FailedEntry>,
}

impl MutateRowsOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The entries that were not applied, in the order of the batch.
    pub fn failures(&self) -> &[FailedEntry] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<FailedEntry> {
        self.failures
    }

    /// The number of calls made to the server.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Progress of a bulk mutation across its attempts.
#[derive(Debug)]
struct BatchState {
    pending: BTreeSet<usize>,
    errors: BTreeMap<usize, Status>,
    attempts: u32,
}

impl BatchState {
    fn new(entries: usize) -> Self {
        Self {
            pending: (0..entries).collect(),
            errors: BTreeMap::new(),
            attempts: 0,
        }
    }

    fn record(&mut self, index: usize, status: Status) {
        if status.code() == Code::Ok {
            self.pending.remove(&index);
            self.errors.remove(&index);
        } else {
            if !is_retryable_status(&status) {
                self.pending.remove(&index);
            }
            self.errors.insert(index, status);
        }
    }

    /// Applies a failure of the whole call to every pending entry that did not report its own.
    fn record_call_failure(&mut self, status: &Status) {
        for index in &self.pending {
            self.errors
                .entry(*index)
                .or_insert_with(|| Status::new(status.code(), status.message()));
        }
        if !is_retryable_status(status) {
            self.pending.clear();
        }
    }

    fn into_outcome(mut self, entries: &[MutationEntry]) -> MutateRowsOutcome {
        for index in &self.pending {
            self.errors.entry(*index).or_insert_with(|| {
                Status::unknown("the entry was not acknowledged by the server")
            });
        }
        MutateRowsOutcome {
            attempts: self.attempts,
            failures: self
                .errors
                .into_iter()
                .map(|(index, status)| FailedEntry {
                    index,
                    row_key: entries[index].row_key().clone(),
                    status,
                })
                .collect(),
        }
    }
}

/// Applies every entry, retrying the ones that failed transiently.
///
/// Each attempt only sends the entries that are still pending. A failure of an entry is reported
/// in the outcome, only invalid input or a malformed response make the whole operation fail.
pub(crate) async fn mutate_rows(
    connection: &mut Box<dyn Connection>,
    table_name: &str,
    app_profile_id: &Option<String>,
    entries: Vec<MutationEntry>,
    settings: &RetrySettings,
) -> Result<MutateRowsOutcome, Error> {
    for entry in &entries {
        entry.validate()?;
    }
    if entries.is_empty() {
        return Ok(MutateRowsOutcome::default());
    }

    let deadline = deadline(settings.timeout);
    let mut state = BatchState::new(entries.len());
    loop {
        let indices = state.pending.iter().copied().collect::<Vec<_>>();
        let request = MutateRowsRequest {
            table_name: table_name.to_string(),
            app_profile_id: app_profile_id.clone(),
            entries: indices.iter().map(|index| entries[*index].clone()).collect(),
            attempt: state.attempts,
        };
        log::debug!(
            "mutate attempt {} on {} with {} entries",
            state.attempts,
            table_name,
            indices.len()
        );
        state.attempts += 1;

        let mut timed_out = false;
        let call_failure = match until(deadline, connection.mutate_rows(request)).await {
            None => {
                timed_out = true;
                Some(timeout_status())
            }
            Some(Err(error)) => Some(into_status(error)?),
            Some(Ok(mut stream)) => loop {
                match until(deadline, stream.next()).await {
                    None => {
                        timed_out = true;
                        break Some(timeout_status());
                    }
                    Some(None) => break None,
                    Some(Some(Err(error))) => break Some(into_status(error)?),
                    Some(Some(Ok(response))) => {
                        for entry in response.entries {
                            let index = indices.get(entry.index).copied().ok_or_else(|| {
                                Error::Codec(format!(
                                    "response for entry {} of a batch of {}",
                                    entry.index,
                                    indices.len()
                                ))
                            })?;
                            state.record(index, entry.status);
                        }
                    }
                }
            },
        };

        let timed_out = timed_out || expired(deadline);
        if let Some(status) = &call_failure {
            state.record_call_failure(status);
        }

        if state.pending.is_empty() {
            break;
        }
        if state.attempts > settings.max_mutate_retries || timed_out {
            log::warn!(
                "giving up on {} entries of {} after {} attempts",
                state.pending.len(),
                table_name,
                state.attempts
            );
            break;
        }
        let delay = settings.backoff(state.attempts);
        log::debug!(
            "{} entries of {} pending, retrying in {:?}",
            state.pending.len(),
            table_name,
            delay
        );
        if until(deadline, tokio::time::sleep(delay)).await.is_none() {
            break;
        }
    }
    Ok(state.into_outcome(&entries))
}

fn timeout_status() -> Status {
    Status::deadline_exceeded("operation timed out before completing")
}

/// Errors other than a gRPC status end the operation.
fn into_status(error: Error) -> Result<Status, Error> {
    match error {
        Error::Status(status) => Ok(status),
        other => Err(other),
    }
}
