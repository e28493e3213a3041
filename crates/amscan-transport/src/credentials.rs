//! Per-call authentication metadata

use amscan_common::TokenType;
use amscan_core::{Error, Result};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Metadata key naming the calling application
pub const APP_NAME_HEADER: &str = "tm-app-name";

/// Default application name
pub const DEFAULT_APP_NAME: &str = "V1FS";

/// Interceptor attaching the credential and application name to every call
#[derive(Clone)]
pub struct CallCredentials {
    authorization: MetadataValue<Ascii>,
    app_name: MetadataValue<Ascii>,
}

impl CallCredentials {
    /// Build from an API key or bearer token. An empty key is `MissingAuth`.
    pub fn new(key: &str, token_type: TokenType, app_name: &str) -> Result<Self> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::MissingAuth);
        }

        let scheme = match token_type {
            TokenType::ApiKey => "ApiKey",
            TokenType::Bearer => "Bearer",
        };
        let authorization = format!("{} {}", scheme, key)
            .parse()
            .map_err(|_| Error::Configuration("credential contains invalid characters".into()))?;
        let app_name = app_name.parse().map_err(|_| {
            Error::Configuration(format!("invalid application name '{}'", app_name))
        })?;

        Ok(Self {
            authorization,
            app_name,
        })
    }
}

impl std::fmt::Debug for CallCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCredentials")
            .field("authorization", &"<redacted>")
            .field("app_name", &self.app_name)
            .finish()
    }
}

impl Interceptor for CallCredentials {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        let metadata = request.metadata_mut();
        metadata.insert("authorization", self.authorization.clone());
        metadata.insert(APP_NAME_HEADER, self.app_name.clone());
        Ok(request)
    }
}
