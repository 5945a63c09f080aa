//! KMS plugin API v1beta1.

use crate::plugin::Plugin;
use crate::proto::v1beta1::key_management_service_server::{
    KeyManagementService, KeyManagementServiceServer,
};
use crate::proto::v1beta1::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, VersionRequest,
    VersionResponse,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::debug;
use zeroize::Zeroize;

/// API version served by this adapter.
pub const API_VERSION: &str = "v1beta1";

/// Runtime name reported to the API server.
pub const RUNTIME_NAME: &str = "AWSKMS";

/// Runtime version reported to the API server.
pub const RUNTIME_VERSION: &str = "0.1.0";

/// gRPC adapter exposing a [`Plugin`] over the v1beta1 API.
#[derive(Clone)]
pub struct V1Service {
    plugin: Arc<Plugin>,
}

impl V1Service {
    /// Wrap an instance.
    #[must_use]
    pub fn new(plugin: Arc<Plugin>) -> Self {
        Self { plugin }
    }

    /// The wrapped instance.
    #[must_use]
    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }

    /// Build the tonic service.
    #[must_use]
    pub fn into_server(self) -> KeyManagementServiceServer<Self> {
        KeyManagementServiceServer::new(self)
    }
}

fn check_version(version: &str) -> Result<(), Status> {
    if version.is_empty() || version == API_VERSION {
        return Ok(());
    }
    Err(Status::invalid_argument(format!(
        "unsupported KMS API version {version:?}, expected {API_VERSION:?}"
    )))
}

#[tonic::async_trait]
impl KeyManagementService for V1Service {
    async fn version(
        &self,
        request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        debug!(requested = %request.get_ref().version, "Version requested");
        Ok(Response::new(VersionResponse {
            version: API_VERSION.to_string(),
            runtime_name: RUNTIME_NAME.to_string(),
            runtime_version: RUNTIME_VERSION.to_string(),
        }))
    }

    async fn decrypt(
        &self,
        request: Request<DecryptRequest>,
    ) -> Result<Response<DecryptResponse>, Status> {
        let req = request.into_inner();
        check_version(&req.version)?;

        let plain = self.plugin.decrypt(&req.cipher).await?;
        Ok(Response::new(DecryptResponse { plain }))
    }

    async fn encrypt(
        &self,
        request: Request<EncryptRequest>,
    ) -> Result<Response<EncryptResponse>, Status> {
        let mut req = request.into_inner();
        check_version(&req.version)?;

        let result = self.plugin.encrypt(&req.plain).await;
        req.plain.zeroize();
        Ok(Response::new(EncryptResponse { cipher: result? }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthAggregator;
    use crate::kms::{KmsError, MockKms};

    fn service(kms: Arc<MockKms>) -> V1Service {
        let health = Arc::new(HealthAggregator::default());
        let plugin =
            Plugin::new("test-key", kms, None, health, false).with_api_version(API_VERSION);
        V1Service::new(Arc::new(plugin))
    }

    #[tokio::test]
    async fn test_version() {
        let svc = service(Arc::new(MockKms::new()));
        let resp = svc
            .version(Request::new(VersionRequest { version: API_VERSION.to_string() }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(resp.version, "v1beta1");
        assert_eq!(resp.runtime_name, "AWSKMS");
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let svc = service(Arc::new(MockKms::new()));

        let cipher = svc
            .encrypt(Request::new(EncryptRequest {
                version: API_VERSION.to_string(),
                plain: b"secret".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner()
            .cipher;
        assert_eq!(cipher, b"1secret");

        let plain = svc
            .decrypt(Request::new(DecryptRequest { version: String::new(), cipher }))
            .await
            .unwrap()
            .into_inner()
            .plain;
        assert_eq!(plain, b"secret");
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let kms = Arc::new(MockKms::new());
        let svc = service(kms.clone());

        let status = svc
            .encrypt(Request::new(EncryptRequest {
                version: "v9".to_string(),
                plain: b"secret".to_vec(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert_eq!(kms.encrypt_calls(), 0);
    }

    #[tokio::test]
    async fn test_kms_error_is_internal() {
        let kms = Arc::new(MockKms::new());
        kms.set_decrypt_resp("", Some(KmsError::api("InvalidCiphertextException", "bad")));
        let svc = service(kms);

        let status = svc
            .decrypt(Request::new(DecryptRequest {
                version: String::new(),
                cipher: b"1blob".to_vec(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(status.message(), "api error InvalidCiphertextException: bad");
        assert!(svc.plugin().live().is_err());
    }
}
