use futures::TryStreamExt;
use prost::bytes::Bytes;

use crate::connection::{
    CheckAndMutateRowRequest, Connection, KeyOffset, MutateRowRequest, ReadModifyWriteRowRequest,
    SampleRowKeysRequest,
};
use crate::read::{ReadOperation, ReadRowsOptions, RowStream};
use crate::retry::{retry_idempotent, RetrySettings};
use crate::{
    BigtableResource, Config, Error, InstanceId, MutateRowsOutcome, Mutation, MutationEntry,
    ReadModifyWriteRule, Row, RowFilter, TableId,
};

/// A handle on a Bigtable instance.
///
/// Clones share the underlying connection.
#[derive(Clone)]
pub struct Client {
    connection: Box<dyn Connection>,
    instance: InstanceId,
    app_profile_id: Option<String>,
    retry_settings: RetrySettings,
}

impl Client {
    /// Returns a new [`Config`] to configure and connect a client.
    pub fn configure() -> Config {
        Config::default()
    }

    /// Creates a client sending its requests through `connection`.
    pub fn with_connection(connection: Box<dyn Connection>, instance: InstanceId) -> Self {
        Self {
            connection,
            instance,
            app_profile_id: None,
            retry_settings: RetrySettings::default(),
        }
    }

    pub fn with_app_profile(mut self, app_profile_id: &str) -> Self {
        self.app_profile_id = Some(app_profile_id.to_string());
        self
    }

    pub fn with_retry_settings(mut self, retry_settings: RetrySettings) -> Self {
        self.retry_settings = retry_settings;
        self
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn table(&self, name: &str) -> Table {
        Table {
            connection: self.connection.clone(),
            id: self.instance.table(name),
            app_profile_id: self.app_profile_id.clone(),
            retry_settings: self.retry_settings.clone(),
        }
    }
}

/// Reads and writes the rows of a table.
#[derive(Clone)]
pub struct Table {
    connection: Box<dyn Connection>,
    id: TableId,
    app_profile_id: Option<String>,
    retry_settings: RetrySettings,
}

impl Table {
    pub fn id(&self) -> &TableId {
        &self.id
    }

    /// Streams the rows selected by `options`.
    ///
    /// Interrupted streams are resumed transparently, without returning any row twice.
    pub fn read_rows(&self, options: ReadRowsOptions) -> RowStream {
        RowStream::new(ReadOperation::new(
            self.connection.clone(),
            self.id.id(),
            self.app_profile_id.clone(),
            options,
            self.retry_settings.clone(),
        ))
    }

    /// Reads a single row, if it exists.
    pub async fn read_row(
        &self,
        key: impl Into<Bytes>,
        filter: Option<RowFilter>,
    ) -> Result<Option<Row>, Error> {
        let mut options = ReadRowsOptions::builder().key(key).limit(1);
        if let Some(filter) = filter {
            options = options.filter(filter);
        }
        self.read_rows(options.build()?).try_next().await
    }

    /// Applies a batch of mutations, each entry atomically.
    ///
    /// The returned outcome lists the entries that could not be applied.
    pub async fn mutate_rows(
        &self,
        entries: Vec<MutationEntry>,
    ) -> Result<MutateRowsOutcome, Error> {
        let mut connection = self.connection.clone();
        crate::batch::mutate_rows(
            &mut connection,
            &self.id.id(),
            &self.app_profile_id,
            entries,
            &self.retry_settings,
        )
        .await
    }

    /// Applies mutations atomically to a single row.
    pub async fn mutate_row(&self, entry: MutationEntry) -> Result<(), Error> {
        entry.validate()?;
        let table_name = self.id.id();
        retry_idempotent(
            &self.retry_settings,
            self.retry_settings.max_mutate_retries,
            self.retry_settings.timeout,
            |attempt| {
                let mut connection = self.connection.clone();
                let request = MutateRowRequest {
                    table_name: table_name.clone(),
                    app_profile_id: self.app_profile_id.clone(),
                    row_key: entry.row_key().clone(),
                    mutations: entry.mutations().to_vec(),
                    attempt,
                };
                async move { connection.mutate_row(request).await }
            },
        )
        .await
    }

    /// Applies `true_mutations` if the row has any cell matching `predicate`, `false_mutations`
    /// otherwise. Without a predicate, any cell matches.
    ///
    /// Returns whether the predicate matched. This is never retried.
    pub async fn check_and_mutate_row(
        &self,
        row_key: impl Into<Bytes>,
        predicate: Option<RowFilter>,
        true_mutations: Vec<Mutation>,
        false_mutations: Vec<Mutation>,
    ) -> Result<bool, Error> {
        let row_key = row_key.into();
        if row_key.is_empty() {
            return Err(Error::Client("a row key is required".to_string()));
        }
        if true_mutations.is_empty() && false_mutations.is_empty() {
            return Err(Error::Client("no mutations to apply".to_string()));
        }
        let mut connection = self.connection.clone();
        connection
            .check_and_mutate_row(CheckAndMutateRowRequest {
                table_name: self.id.id(),
                app_profile_id: self.app_profile_id.clone(),
                row_key,
                predicate_filter: predicate,
                true_mutations,
                false_mutations,
            })
            .await
    }

    /// Applies `rules` to the latest values of a row's cells, in order.
    ///
    /// Returns the new contents of the modified cells. This is never retried.
    pub async fn read_modify_write_row(
        &self,
        row_key: impl Into<Bytes>,
        rules: Vec<ReadModifyWriteRule>,
    ) -> Result<Row, Error> {
        let row_key = row_key.into();
        if row_key.is_empty() {
            return Err(Error::Client("a row key is required".to_string()));
        }
        if rules.is_empty() {
            return Err(Error::Client("at least one rule must be provided".to_string()));
        }
        let mut connection = self.connection.clone();
        connection
            .read_modify_write_row(ReadModifyWriteRowRequest {
                table_name: self.id.id(),
                app_profile_id: self.app_profile_id.clone(),
                row_key,
                rules,
            })
            .await
    }

    /// Adds `amount` to a counter cell and returns its new value.
    pub async fn increment(
        &self,
        row_key: impl Into<Bytes>,
        family: &str,
        qualifier: impl Into<Bytes>,
        amount: i64,
    ) -> Result<i64, Error> {
        let qualifier = qualifier.into();
        let row = self
            .read_modify_write_row(
                row_key,
                vec![ReadModifyWriteRule::increment(family, qualifier.clone(), amount)],
            )
            .await?;
        let value = row
            .cells(family, &qualifier)
            .first()
            .map(|cell| cell.value().clone())
            .ok_or_else(|| Error::Codec("the incremented cell was not returned".to_string()))?;
        let bytes = <[u8; 8]>::try_from(&value[..])
            .map_err(|_| Error::Codec(format!("counter of {} bytes", value.len())))?;
        Ok(i64::from_be_bytes(bytes))
    }

    /// Returns a sample of the row keys of the table, roughly delimiting equal sized chunks.
    pub async fn sample_row_keys(&self) -> Result<Vec<KeyOffset>, Error> {
        let table_name = self.id.id();
        retry_idempotent(
            &self.retry_settings,
            self.retry_settings.max_read_retries,
            self.retry_settings.timeout,
            |attempt| {
                let mut connection = self.connection.clone();
                let request = SampleRowKeysRequest {
                    table_name: table_name.clone(),
                    app_profile_id: self.app_profile_id.clone(),
                    attempt,
                };
                async move {
                    connection
                        .sample_row_keys(request)
                        .await?
                        .try_collect::<Vec<_>>()
                        .await
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::scripted::{rows, Reply, ScriptedConnection};

    fn client(connection: &ScriptedConnection) -> Client {
        Client::with_connection(
            Box::new(connection.clone()),
            InstanceId::new("test-project", "test-instance"),
        )
        .with_app_profile("default")
    }

    #[test]
    fn test_table_name() {
        let table = client(&ScriptedConnection::default()).table("users");
        assert_eq!(
            table.id().id(),
            "projects/test-project/instances/test-instance/tables/users"
        );
    }

    #[tokio::test]
    async fn test_read_row() {
        let connection = ScriptedConnection::default()
            .with_reads(vec![Reply::Stream(vec![Ok(rows(&["a"]))])]);
        let row = client(&connection)
            .table("users")
            .read_row("a", None)
            .await
            .unwrap();
        assert_eq!(row.unwrap().key(), &Bytes::from("a"));

        let requests = connection.read_requests();
        assert_eq!(requests[0].rows_limit, Some(1));
        assert_eq!(requests[0].app_profile_id.as_deref(), Some("default"));
        assert_eq!(
            requests[0].table_name,
            "projects/test-project/instances/test-instance/tables/users"
        );
    }

    #[tokio::test]
    async fn test_read_modify_write_requires_rules() {
        let table = client(&ScriptedConnection::default()).table("users");
        let result = table.read_modify_write_row("a", vec![]).await;
        assert!(matches!(result, Err(Error::Client(_))));
        let result = table
            .read_modify_write_row("", vec![ReadModifyWriteRule::append("cf", "q", "v")])
            .await;
        assert!(matches!(result, Err(Error::Client(_))));
    }

    #[tokio::test]
    async fn test_increment_requires_returned_cell() {
        let table = client(&ScriptedConnection::default()).table("users");
        let result = table.increment("a", "cf", "n", 1).await;
        assert!(matches!(result, Err(Error::Codec(_))));
    }

    #[tokio::test]
    async fn test_check_and_mutate_requires_mutations() {
        let table = client(&ScriptedConnection::default()).table("users");
        let result = table.check_and_mutate_row("a", None, vec![], vec![]).await;
        assert!(matches!(result, Err(Error::Client(_))));
    }
}
