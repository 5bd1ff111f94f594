//! Process-wide Docker engine handle
//!
//! One client is created lazily on first use and shared by every container
//! executor in the process. `Docker` is cheap to clone and safe to use from
//! concurrent tasks; it is never torn down.

use bollard::errors::Error as BollardError;
use bollard::Docker;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::{Error, Result};

static ENGINE: OnceCell<Docker> = OnceCell::const_new();

/// Get the shared engine handle, connecting on first call.
///
/// A failed connection is not cached; the next call tries again.
pub async fn shared_engine() -> Result<Docker> {
    ENGINE.get_or_try_init(connect).await.cloned()
}

async fn connect() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults().map_err(translate_error)?;
    docker.ping().await.map_err(translate_error)?;
    info!("Connected to Docker engine");
    Ok(docker)
}

/// Map a client error onto pyrun's error type, singling out a daemon that
/// cannot be reached.
pub fn translate_error(err: BollardError) -> Error {
    if is_unreachable(&err) {
        return Error::EngineUnavailable(format!(
            "{}. Is the Docker daemon running and is its socket accessible?",
            err
        ));
    }
    Error::Container(err.to_string())
}

/// True when the error means the daemon itself could not be reached
pub(crate) fn is_unreachable(err: &BollardError) -> bool {
    match err {
        BollardError::SocketNotFoundError(_) => true,
        BollardError::IOError { err } => matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::PermissionDenied
        ),
        BollardError::DockerResponseServerError { .. } => false,
        other => {
            let message = other.to_string().to_lowercase();
            message.contains("connection refused")
                || message.contains("no such file or directory")
                || message.contains("error trying to connect")
        }
    }
}

/// True for a 404 from the engine
pub fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == 404
    )
}

/// True for a 409 from the engine (e.g. removal already in progress)
pub fn is_conflict(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == 409
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_socket_is_unreachable() {
        let err = translate_error(BollardError::SocketNotFoundError(
            "/var/run/docker.sock".to_string(),
        ));
        assert!(matches!(err, Error::EngineUnavailable(_)));
        assert!(err.to_string().contains("Docker daemon running"));
    }

    #[test]
    fn test_refused_connection_is_unreachable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = translate_error(BollardError::IOError { err: io });
        assert!(matches!(err, Error::EngineUnavailable(_)));
    }

    #[test]
    fn test_server_errors_stay_generic() {
        let err = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(!is_not_found(&err));
        assert!(matches!(translate_error(err), Error::Container(_)));

        let missing = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert!(is_not_found(&missing));
        assert!(!is_conflict(&missing));
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_shared_engine_is_reused() {
        let first = shared_engine().await.unwrap();
        let second = shared_engine().await.unwrap();
        assert!(first.ping().await.is_ok());
        assert!(second.ping().await.is_ok());
    }
}
