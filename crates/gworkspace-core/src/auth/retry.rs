//! One-shot retry for calls rejected with 401/403

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use super::WorkspaceAuth;
use crate::error::{Error, Result};
use crate::google::ServiceHandle;

/// Run `op` against the `(api, version)` handle. If it fails with an
/// authorization error, clear the cache, rebuild the handle and run it once
/// more.
pub async fn with_auth_retry<T, F, Fut>(
    auth: &WorkspaceAuth,
    api: &str,
    version: &str,
    op: F,
) -> Result<T>
where
    F: Fn(Arc<ServiceHandle>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_auth_retry_if(auth, api, version, Error::is_auth_failure, op).await
}

/// [`with_auth_retry`] with a caller-supplied classifier
pub async fn with_auth_retry_if<T, F, Fut, C>(
    auth: &WorkspaceAuth,
    api: &str,
    version: &str,
    should_retry: C,
    op: F,
) -> Result<T>
where
    F: Fn(Arc<ServiceHandle>) -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&Error) -> bool,
{
    let handle = auth.get_service(api, version).await?;
    match op(handle).await {
        Err(e) if should_retry(&e) => {
            warn!("{} {} call rejected ({}), retrying with fresh credentials", api, version, e);
            auth.clear_cache();
            let handle = auth.get_service(api, version).await?;
            op(handle).await
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{auth_with, CountingSource};
    use crate::auth::CredentialKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn api_error(status: u16) -> Error {
        Error::Api {
            status,
            message: format!("HTTP {}", status),
        }
    }

    #[tokio::test]
    async fn test_success_runs_once() {
        let source = CountingSource::ready(CredentialKind::LocalToken);
        let auth = auth_with(vec![source.clone()]);
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let value = with_auth_retry(&auth, "drive", "v3", move |_svc| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_retries_with_fresh_credentials() {
        let source = CountingSource::ready(CredentialKind::LocalToken);
        let auth = auth_with(vec![source.clone()]);
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let value = with_auth_retry(&auth, "drive", "v3", move |_svc| async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(api_error(401))
            } else {
                Ok("second try")
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "second try");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // The cache was cleared, so the source was asked again
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn test_forbidden_twice_surfaces_error() {
        let auth = auth_with(vec![CountingSource::ready(CredentialKind::LocalToken)]);
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let err = with_auth_retry(&auth, "drive", "v3", move |_svc| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(api_error(403))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Api { status: 403, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let source = CountingSource::ready(CredentialKind::LocalToken);
        let auth = auth_with(vec![source.clone()]);
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let err = with_auth_retry(&auth, "drive", "v3", move |_svc| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(api_error(404))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Api { status: 404, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let auth = auth_with(vec![CountingSource::ready(CredentialKind::LocalToken)]);
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let err = with_auth_retry_if(
            &auth,
            "drive",
            "v3",
            |e| matches!(e, Error::Api { status: 429, .. }),
            move |_svc| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(api_error(429))
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Api { status: 429, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_credentials_fails_before_calling() {
        let auth = auth_with(vec![CountingSource::unavailable(CredentialKind::LocalToken)]);
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let err = with_auth_retry(&auth, "drive", "v3", move |_svc| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(err.requires_setup());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
