use gcp_auth::AuthenticationManager;
use tonic::transport::ClientTlsConfig;

use crate::retry::RetrySettings;
use crate::{Client, Error, InstanceId};

/// When set, connections go to the emulator listening at this address, in plaintext and without
/// authentication.
pub const EMULATOR_HOST_ENV: &str = "BIGTABLE_EMULATOR_HOST";

/// Configuration for connecting to Cloud Bigtable.
///
/// ```no_run
/// # use bigtable_rs::*;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Error> {
/// let client = Client::configure()
///     .project("my-gcp-project")
///     .instance("my-instance")
///     .app_profile("batch")
///     .connect()
///     .await?;
/// # Ok(()) }
/// ```
#[derive(Default)]
pub struct Config {
    endpoint: Option<String>,
    tls_config: Option<ClientTlsConfig>,
    credentials: Option<AuthenticationManager>,
    project: Option<String>,
    instance: Option<String>,
    app_profile: Option<String>,
    retry_settings: RetrySettings,
}

impl Config {
    /// Overrides the default `https://bigtable.googleapis.com` endpoint.
    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// Connects to an emulator at `host` (e.g. `localhost:8086`), ignoring `BIGTABLE_EMULATOR_HOST`.
    pub fn with_emulator_host(self, host: &str) -> Self {
        self.endpoint(&format!("http://{}", host))
    }

    pub fn tls_config(mut self, tls_config: ClientTlsConfig) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Uses these credentials instead of discovering them from the environment.
    pub fn credentials(mut self, credentials: AuthenticationManager) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    pub fn instance(mut self, instance: &str) -> Self {
        self.instance = Some(instance.to_string());
        self
    }

    /// The app profile requests are routed with.
    pub fn app_profile(mut self, app_profile: &str) -> Self {
        self.app_profile = Some(app_profile.to_string());
        self
    }

    pub fn retry_settings(mut self, retry_settings: RetrySettings) -> Self {
        self.retry_settings = retry_settings;
        self
    }

    pub async fn connect(self) -> Result<Client, Error> {
        let project = self
            .project
            .ok_or_else(|| Error::Config("missing project".to_string()))?;
        let instance = self
            .instance
            .ok_or_else(|| Error::Config("missing instance".to_string()))?;
        let instance = InstanceId::new(&project, &instance);

        let emulator = std::env::var(EMULATOR_HOST_ENV)
            .ok()
            .filter(|host| !host.is_empty());

        let (endpoint, tls_config, credentials) = match (self.endpoint, emulator) {
            (Some(endpoint), _) => (Some(endpoint), self.tls_config, self.credentials),
            (None, Some(host)) => {
                log::debug!("connecting to the Bigtable emulator at {}", host);
                (Some(format!("http://{}", host)), None, None)
            }
            (None, None) => {
                let credentials = match self.credentials {
                    Some(credentials) => credentials,
                    None => AuthenticationManager::new().await?,
                };
                (
                    None,
                    Some(self.tls_config.unwrap_or_else(ClientTlsConfig::new)),
                    Some(credentials),
                )
            }
        };

        let connection =
            crate::connection::grpc::connect(endpoint, tls_config, credentials).await?;

        let mut client = Client::with_connection(connection, instance)
            .with_retry_settings(self.retry_settings);
        if let Some(app_profile) = self.app_profile {
            client = client.with_app_profile(&app_profile);
        }
        Ok(client)
    }
}
