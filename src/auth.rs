use std::{future::Future, pin::Pin, sync::Arc};

use gcp_auth::AuthenticationManager;
use http::HeaderValue;
use tower::{filter::AsyncPredicate, BoxError};

const DATA_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/bigtable.data",
    "https://www.googleapis.com/auth/cloud-platform",
];

/// Adds a bearer token to every outgoing request.
#[derive(Clone)]
pub(crate) struct AuthFilter {
    auth_manager: Arc<AuthenticationManager>,
}

impl AuthFilter {
    pub(crate) fn new(auth_manager: AuthenticationManager) -> Self {
        Self {
            auth_manager: Arc::new(auth_manager),
        }
    }
}

impl AsyncPredicate<http::Request<tonic::body::BoxBody>> for AuthFilter {
    type Future = Pin<Box<dyn Future<Output = Result<Self::Request, BoxError>> + Send>>;

    type Request = http::Request<tonic::body::BoxBody>;

    fn check(&mut self, request: http::Request<tonic::body::BoxBody>) -> Self::Future {
        let auth_manager = self.auth_manager.clone();
        Box::pin(async move {
            let token = auth_manager.get_token(&DATA_SCOPES).await?;

            let header = HeaderValue::try_from(format!("Bearer {}", token.as_str()))
                .map_err(|err| crate::Error::Client(format!("invalid auth token: {}", err)))?;

            let (mut parts, body) = request.into_parts();
            parts.headers.insert(http::header::AUTHORIZATION, header);
            Ok(http::Request::from_parts(parts, body))
        })
    }
}
