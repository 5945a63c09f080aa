//! KMS plugin API v2.

use crate::plugin::Plugin;
use crate::proto::v2::key_management_service_server::{
    KeyManagementService, KeyManagementServiceServer,
};
use crate::proto::v2::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, StatusRequest,
    StatusResponse,
};
use std::collections::HashMap;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};
use zeroize::Zeroize;

/// API version served by this adapter.
pub const API_VERSION: &str = "v2";

/// Healthz value reported while the aggregate verdict is healthy.
pub const HEALTHZ_OK: &str = "ok";

/// gRPC adapter exposing a [`Plugin`] over the v2 API.
#[derive(Clone)]
pub struct V2Service {
    plugin: Arc<Plugin>,
}

impl V2Service {
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

#[tonic::async_trait]
impl KeyManagementService for V2Service {
    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let healthz = match self.plugin.health() {
            Ok(()) => HEALTHZ_OK.to_string(),
            Err(err) => err.to_string(),
        };
        Ok(Response::new(StatusResponse {
            version: API_VERSION.to_string(),
            healthz,
            key_id: self.plugin.key_id().to_string(),
        }))
    }

    async fn decrypt(
        &self,
        request: Request<DecryptRequest>,
    ) -> Result<Response<DecryptResponse>, Status> {
        let req = request.into_inner();
        if !req.key_id.is_empty() && req.key_id != self.plugin.key_id() {
            // KMS ciphertext names its own key
            warn!(
                uid = %req.uid,
                request_key_id = %req.key_id,
                "Decrypt requested for a different key id"
            );
        }
        debug!(uid = %req.uid, "Decrypt request");

        let plaintext = self.plugin.decrypt(&req.ciphertext).await?;
        Ok(Response::new(DecryptResponse { plaintext }))
    }

    async fn encrypt(
        &self,
        request: Request<EncryptRequest>,
    ) -> Result<Response<EncryptResponse>, Status> {
        let mut req = request.into_inner();
        debug!(uid = %req.uid, "Encrypt request");

        let result = self.plugin.encrypt(&req.plaintext).await;
        req.plaintext.zeroize();
        Ok(Response::new(EncryptResponse {
            ciphertext: result?,
            key_id: self.plugin.key_id().to_string(),
            annotations: HashMap::new(),
        }))
    }
}
