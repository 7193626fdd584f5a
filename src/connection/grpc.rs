use std::ops::Bound;

use super::{
    CheckAndMutateRowRequest, Connection, EntryStatus, KeyOffset, MutateRowRequest,
    MutateRowsRequest, MutateRowsResponse, ReadModifyWriteRowRequest, ReadRowsRequest,
    ResponseStream, SampleRowKeysRequest,
};
use crate::auth::AuthFilter;
use crate::{
    Cell, CellChunk, Error, Mutation, ReadModifyWriteRule, ReadRowsResponse, Row, RowRange, RowSet,
};
use async_trait::async_trait;
use futures::StreamExt;
use gcp_auth::AuthenticationManager;
use google_api_proto::google::bigtable::v2::{self as proto, bigtable_client::BigtableClient};
use prost::bytes::Bytes;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::{Code, Request};
use tower::filter::{AsyncFilter, AsyncFilterLayer};
use tower::util::Either;
use tower::ServiceBuilder;

pub(crate) const DEFAULT_ENDPOINT: &str = "https://bigtable.googleapis.com";

#[derive(Clone)]
struct GrpcConnection {
    bigtable: BigtableClient<Either<AsyncFilter<Channel, AuthFilter>, Channel>>,
}

pub(crate) async fn connect(
    endpoint: Option<String>,
    tls_config: Option<ClientTlsConfig>,
    auth: Option<AuthenticationManager>,
) -> Result<Box<dyn Connection>, Error> {
    let channel = match endpoint {
        None => Channel::from_static(DEFAULT_ENDPOINT)
            .tls_config(tls_config.ok_or_else(|| Error::Config("TLS is required".into()))?)?,
        Some(hostname) => {
            let channel = Channel::from_shared(hostname).map_err(|invalid_uri| {
                Error::Config(format!("invalid endpoint: {}", invalid_uri))
            })?;
            if let Some(tls_config) = tls_config {
                channel.tls_config(tls_config)?
            } else {
                channel
            }
        }
    };

    let channel = channel.connect().await?;

    let auth_layer = auth.map(|auth| AsyncFilterLayer::new(AuthFilter::new(auth)));

    let channel = ServiceBuilder::new()
        .option_layer(auth_layer)
        .service(channel);

    Ok(Box::new(GrpcConnection {
        bigtable: BigtableClient::new(channel),
    }))
}

/// Wraps a message with the routing and attempt headers the service expects.
fn request<T>(
    message: T,
    table_name: &str,
    app_profile_id: &Option<String>,
    attempt: Option<u32>,
) -> Result<Request<T>, Error> {
    let mut params = format!("table_name={}", table_name);
    if let Some(app_profile_id) = app_profile_id {
        params.push_str(&format!("&app_profile_id={}", app_profile_id));
    }
    let mut request = Request::new(message);
    let metadata = request.metadata_mut();
    metadata.insert(
        "x-goog-request-params",
        params
            .parse::<MetadataValue<Ascii>>()
            .map_err(|err| Error::Client(format!("invalid routing header: {}", err)))?,
    );
    if let Some(attempt) = attempt {
        metadata.insert("bigtable-attempt", MetadataValue::from(attempt));
    }
    Ok(request)
}

fn row_range(range: &RowRange) -> proto::RowRange {
    use proto::row_range::{EndKey, StartKey};
    proto::RowRange {
        start_key: match range.start() {
            Bound::Included(key) => Some(StartKey::StartKeyClosed(key.clone().into())),
            Bound::Excluded(key) => Some(StartKey::StartKeyOpen(key.clone().into())),
            Bound::Unbounded => None,
        },
        end_key: match range.end() {
            Bound::Included(key) => Some(EndKey::EndKeyClosed(key.clone().into())),
            Bound::Excluded(key) => Some(EndKey::EndKeyOpen(key.clone().into())),
            Bound::Unbounded => None,
        },
    }
}

fn row_set(rows: &RowSet) -> proto::RowSet {
    proto::RowSet {
        row_keys: rows.keys().iter().map(|key| key.clone().into()).collect(),
        row_ranges: rows.ranges().iter().map(row_range).collect(),
    }
}

fn mutation(value: &Mutation) -> proto::Mutation {
    use proto::mutation as m;
    let mutation = match value {
        Mutation::SetCell {
            family,
            qualifier,
            timestamp_micros,
            value,
        } => m::Mutation::SetCell(m::SetCell {
            family_name: family.clone(),
            column_qualifier: qualifier.clone().into(),
            timestamp_micros: *timestamp_micros,
            value: value.clone().into(),
        }),
        Mutation::DeleteFromColumn {
            family,
            qualifier,
            time_range,
        } => m::Mutation::DeleteFromColumn(m::DeleteFromColumn {
            family_name: family.clone(),
            column_qualifier: qualifier.clone().into(),
            time_range: time_range.map(|(start, end)| proto::TimestampRange {
                start_timestamp_micros: start,
                end_timestamp_micros: end,
            }),
        }),
        Mutation::DeleteFromFamily { family } => {
            m::Mutation::DeleteFromFamily(m::DeleteFromFamily {
                family_name: family.clone(),
            })
        }
        Mutation::DeleteFromRow => m::Mutation::DeleteFromRow(m::DeleteFromRow {}),
    };
    proto::Mutation {
        mutation: Some(mutation),
    }
}

fn mutations(values: &[Mutation]) -> Vec<proto::Mutation> {
    values.iter().map(mutation).collect()
}

fn rule(value: &ReadModifyWriteRule) -> proto::ReadModifyWriteRule {
    use proto::read_modify_write_rule::Rule;
    proto::ReadModifyWriteRule {
        family_name: value.family().to_string(),
        column_qualifier: value.qualifier().clone().into(),
        rule: Some(match value {
            ReadModifyWriteRule::Append { value, .. } => Rule::AppendValue(value.clone().into()),
            ReadModifyWriteRule::Increment { amount, .. } => Rule::IncrementAmount(*amount),
        }),
    }
}

impl From<proto::Row> for Row {
    fn from(value: proto::Row) -> Self {
        let mut cells = vec![];
        for family in value.families {
            for column in family.columns {
                let qualifier = Bytes::from(column.qualifier);
                for cell in column.cells {
                    cells.push((
                        family.name.clone(),
                        qualifier.clone(),
                        Cell::new(cell.timestamp_micros, cell.value).with_labels(cell.labels),
                    ));
                }
            }
        }
        Row::from_cells(value.key, cells)
    }
}

impl From<proto::read_rows_response::CellChunk> for CellChunk {
    fn from(value: proto::read_rows_response::CellChunk) -> Self {
        use proto::read_rows_response::cell_chunk::RowStatus;
        let (reset_row, commit_row) = match value.row_status {
            Some(RowStatus::ResetRow(reset)) => (reset, false),
            Some(RowStatus::CommitRow(commit)) => (false, commit),
            None => (false, false),
        };
        CellChunk {
            row_key: Bytes::from(value.row_key),
            family_name: value.family_name,
            qualifier: value.qualifier.map(Bytes::from),
            timestamp_micros: value.timestamp_micros,
            labels: value.labels,
            value: Bytes::from(value.value),
            value_size: value.value_size,
            reset_row,
            commit_row,
        }
    }
}

impl From<proto::ReadRowsResponse> for ReadRowsResponse {
    fn from(value: proto::ReadRowsResponse) -> Self {
        ReadRowsResponse {
            chunks: value.chunks.into_iter().map(CellChunk::from).collect(),
            last_scanned_row_key: Bytes::from(value.last_scanned_row_key),
        }
    }
}

impl TryFrom<proto::MutateRowsResponse> for MutateRowsResponse {
    type Error = crate::Error;

    fn try_from(value: proto::MutateRowsResponse) -> Result<Self, Self::Error> {
        value
            .entries
            .into_iter()
            .map(|entry| {
                let index = usize::try_from(entry.index).map_err(|_| {
                    Error::Codec(format!("invalid mutation entry index {}", entry.index))
                })?;
                let status = entry
                    .status
                    .map(|status| tonic::Status::new(Code::from_i32(status.code), status.message))
                    .ok_or_else(|| Error::Codec(format!("missing status for entry {}", index)))?;
                Ok(EntryStatus { index, status })
            })
            .collect::<Result<Vec<EntryStatus>, Error>>()
            .map(|entries| MutateRowsResponse { entries })
    }
}

#[async_trait]
impl Connection for GrpcConnection {
    async fn read_rows(
        &mut self,
        request: ReadRowsRequest,
    ) -> Result<ResponseStream<ReadRowsResponse>, Error> {
        let message = proto::ReadRowsRequest {
            table_name: request.table_name.clone(),
            app_profile_id: request.app_profile_id.clone().unwrap_or_default(),
            rows: Some(row_set(&request.rows)),
            filter: request.filter.clone(),
            rows_limit: request.rows_limit.unwrap_or(0) as i64,
            ..Default::default()
        };
        let stream = self
            .bigtable
            .read_rows(self::request(
                message,
                &request.table_name,
                &request.app_profile_id,
                Some(request.attempt),
            )?)
            .await?
            .into_inner()
            .map(|response| response.map(ReadRowsResponse::from).map_err(Error::from));
        Ok(stream.boxed())
    }

    async fn mutate_rows(
        &mut self,
        request: MutateRowsRequest,
    ) -> Result<ResponseStream<MutateRowsResponse>, Error> {
        let message = proto::MutateRowsRequest {
            table_name: request.table_name.clone(),
            app_profile_id: request.app_profile_id.clone().unwrap_or_default(),
            entries: request
                .entries
                .iter()
                .map(|entry| proto::mutate_rows_request::Entry {
                    row_key: entry.row_key().clone().into(),
                    mutations: mutations(entry.mutations()),
                })
                .collect(),
            ..Default::default()
        };
        let stream = self
            .bigtable
            .mutate_rows(self::request(
                message,
                &request.table_name,
                &request.app_profile_id,
                Some(request.attempt),
            )?)
            .await?
            .into_inner()
            .map(|response| {
                response
                    .map_err(Error::from)
                    .and_then(MutateRowsResponse::try_from)
            });
        Ok(stream.boxed())
    }

    async fn mutate_row(&mut self, request: MutateRowRequest) -> Result<(), Error> {
        let message = proto::MutateRowRequest {
            table_name: request.table_name.clone(),
            app_profile_id: request.app_profile_id.clone().unwrap_or_default(),
            row_key: request.row_key.clone().into(),
            mutations: mutations(&request.mutations),
            ..Default::default()
        };
        self.bigtable
            .mutate_row(self::request(
                message,
                &request.table_name,
                &request.app_profile_id,
                Some(request.attempt),
            )?)
            .await?;
        Ok(())
    }

    async fn check_and_mutate_row(
        &mut self,
        request: CheckAndMutateRowRequest,
    ) -> Result<bool, Error> {
        let message = proto::CheckAndMutateRowRequest {
            table_name: request.table_name.clone(),
            app_profile_id: request.app_profile_id.clone().unwrap_or_default(),
            row_key: request.row_key.clone().into(),
            predicate_filter: request.predicate_filter.clone(),
            true_mutations: mutations(&request.true_mutations),
            false_mutations: mutations(&request.false_mutations),
            ..Default::default()
        };
        let response = self
            .bigtable
            .check_and_mutate_row(self::request(
                message,
                &request.table_name,
                &request.app_profile_id,
                None,
            )?)
            .await?
            .into_inner();
        Ok(response.predicate_matched)
    }

    async fn read_modify_write_row(
        &mut self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<Row, Error> {
        let message = proto::ReadModifyWriteRowRequest {
            table_name: request.table_name.clone(),
            app_profile_id: request.app_profile_id.clone().unwrap_or_default(),
            row_key: request.row_key.clone().into(),
            rules: request.rules.iter().map(rule).collect(),
            ..Default::default()
        };
        let response = self
            .bigtable
            .read_modify_write_row(self::request(
                message,
                &request.table_name,
                &request.app_profile_id,
                None,
            )?)
            .await?
            .into_inner();
        response
            .row
            .map(Row::from)
            .ok_or_else(|| Error::Codec("read-modify-write response without a row".to_string()))
    }

    async fn sample_row_keys(
        &mut self,
        request: SampleRowKeysRequest,
    ) -> Result<ResponseStream<KeyOffset>, Error> {
        let message = proto::SampleRowKeysRequest {
            table_name: request.table_name.clone(),
            app_profile_id: request.app_profile_id.clone().unwrap_or_default(),
            ..Default::default()
        };
        let stream = self
            .bigtable
            .sample_row_keys(self::request(
                message,
                &request.table_name,
                &request.app_profile_id,
                Some(request.attempt),
            )?)
            .await?
            .into_inner()
            .map(|response| {
                response
                    .map(|sample| KeyOffset {
                        row_key: Bytes::from(sample.row_key),
                        offset_bytes: sample.offset_bytes,
                    })
                    .map_err(Error::from)
            });
        Ok(stream.boxed())
    }
}
