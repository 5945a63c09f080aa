//! gRPC transport over a Unix domain socket.

use crate::error::ProviderError;
use crate::plugin::{V1Service, V2Service};
use std::future::Future;
use std::io;
use std::path::Path;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::info;

/// Bind `socket`, replacing a stale socket file left by an earlier run.
///
/// # Errors
///
/// Returns an error if the old file cannot be removed or the bind fails.
pub async fn bind(socket: &Path) -> Result<UnixListener, ProviderError> {
    match tokio::fs::remove_file(socket).await {
        Ok(()) => info!(socket = %socket.display(), "Removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = socket.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(UnixListener::bind(socket)?)
}

/// Serve both wire API versions on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the transport fails.
pub async fn serve<F>(
    listener: UnixListener,
    v1: V1Service,
    v2: V2Service,
    shutdown: F,
) -> Result<(), ProviderError>
where
    F: Future<Output = ()> + Send,
{
    info!(key_id = %v2.plugin().key_id(), "gRPC server listening");

    Server::builder()
        .add_service(v1.into_server())
        .add_service(v2.into_server())
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
        .await?;

    info!("gRPC server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = std::env::temp_dir().join(format!("kms-provider-{}", std::process::id()));
        let socket = dir.join("stale.sock");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(&socket, b"stale").await.unwrap();

        let listener = bind(&socket).await.unwrap();
        assert!(listener.local_addr().is_ok());

        drop(listener);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
