//! ============================================================================
//! Relay Fallback - Direct call first, relay only on transport failure
//! ============================================================================
//! Every backend call gets exactly one direct attempt. Only when that attempt
//! never produced an HTTP response is a single relay attempt made. HTTP error
//! statuses are answers, not transport failures, and never trigger the relay.
//! Neither does a response whose body was cut off after the status arrived:
//! the backend has already acted on that request.
//! ============================================================================

use std::future::Future;
use tracing::{info, warn};

use crate::transport::TransportError;
use crate::types::Route;

/// Tagged result of the two-step routing strategy
#[derive(Debug)]
pub enum RouteOutcome<T> {
    /// The direct call answered
    Direct(T),
    /// The direct call failed at transport level; the relay answered
    Relayed {
        direct_error: TransportError,
        response: T,
    },
    /// Both attempts failed at transport level
    Failed {
        direct_error: TransportError,
        relay_error: TransportError,
    },
    /// The direct call was answered but its body was lost; relay not tried
    Interrupted { direct_error: TransportError },
}

/// Why no usable answer came back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteFailure {
    Unreachable {
        direct: TransportError,
        relay: TransportError,
    },
    Interrupted(TransportError),
}

impl<T> RouteOutcome<T> {
    /// Which path produced the answer, if any did
    pub fn route(&self) -> Option<Route> {
        match self {
            RouteOutcome::Direct(_) => Some(Route::Direct),
            RouteOutcome::Relayed { .. } => Some(Route::Relay),
            RouteOutcome::Failed { .. } | RouteOutcome::Interrupted { .. } => None,
        }
    }

    pub fn used_relay(&self) -> bool {
        matches!(self, RouteOutcome::Relayed { .. } | RouteOutcome::Failed { .. })
    }

    /// Collapse into the answer and its route, or the reason there is none
    pub fn into_result(self) -> Result<(T, Route), RouteFailure> {
        match self {
            RouteOutcome::Direct(response) => Ok((response, Route::Direct)),
            RouteOutcome::Relayed { response, .. } => Ok((response, Route::Relay)),
            RouteOutcome::Failed {
                direct_error,
                relay_error,
            } => Err(RouteFailure::Unreachable {
                direct: direct_error,
                relay: relay_error,
            }),
            RouteOutcome::Interrupted { direct_error } => {
                Err(RouteFailure::Interrupted(direct_error))
            }
        }
    }
}

/// Run `direct`; if it fails at transport level, build and run the relay
/// attempt once. The relay future is only constructed when it is needed, and
/// never for a direct call that had already been answered.
pub async fn route_with_fallback<T, D, R, F>(direct: D, relay: F) -> RouteOutcome<T>
where
    D: Future<Output = Result<T, TransportError>>,
    F: FnOnce() -> R,
    R: Future<Output = Result<T, TransportError>>,
{
    let direct_error = match direct.await {
        Ok(response) => return RouteOutcome::Direct(response),
        Err(e) => e,
    };

    if !direct_error.is_unanswered() {
        warn!("Direct call answered but was cut off ({}), not relaying", direct_error);
        return RouteOutcome::Interrupted { direct_error };
    }

    warn!("Direct call failed ({}), switching to relay", direct_error);

    match relay().await {
        Ok(response) => {
            info!("Relay answered after direct failure");
            RouteOutcome::Relayed {
                direct_error,
                response,
            }
        }
        Err(relay_error) => {
            warn!("Relay call failed too: {}", relay_error);
            RouteOutcome::Failed {
                direct_error,
                relay_error,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn refused(url: &str) -> TransportError {
        TransportError::new(url, "connection refused")
    }

    #[tokio::test]
    async fn test_direct_success_skips_relay() {
        let relay_calls = AtomicU32::new(0);
        let counter = &relay_calls;
        let outcome =
            route_with_fallback(async { Ok::<_, TransportError>(200u16) }, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(201u16)
            })
            .await;

        assert!(matches!(outcome, RouteOutcome::Direct(200)));
        assert_eq!(outcome.route(), Some(Route::Direct));
        assert!(!outcome.used_relay());
        assert_eq!(relay_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_uses_relay_once() {
        let relay_calls = AtomicU32::new(0);
        let counter = &relay_calls;
        let outcome = route_with_fallback(async { Err(refused("direct")) }, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(200u16)
        })
        .await;

        assert_eq!(relay_calls.load(Ordering::SeqCst), 1);
        assert!(outcome.used_relay());
        match outcome {
            RouteOutcome::Relayed {
                direct_error,
                response,
            } => {
                assert_eq!(direct_error.url, "direct");
                assert_eq!(response, 200);
            }
            other => panic!("expected relayed outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_both_failures_reported() {
        let outcome: RouteOutcome<u16> =
            route_with_fallback(async { Err(refused("direct")) }, || async {
                Err(refused("relay"))
            })
            .await;

        assert_eq!(outcome.route(), None);
        match outcome.into_result().unwrap_err() {
            RouteFailure::Unreachable { direct, relay } => {
                assert_eq!(direct.url, "direct");
                assert_eq!(relay.url, "relay");
            }
            other => panic!("expected unreachable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_into_result_keeps_route() {
        let outcome = route_with_fallback(async { Err(refused("direct")) }, || async {
            Ok::<_, TransportError>("body")
        })
        .await;
        assert_eq!(outcome.into_result().unwrap(), ("body", Route::Relay));
    }

    #[tokio::test]
    async fn test_cut_off_answer_never_relayed() {
        let relay_calls = AtomicU32::new(0);
        let counter = &relay_calls;
        let outcome = route_with_fallback(
            async { Err::<u16, _>(TransportError::interrupted("direct", 200, "body lost")) },
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(201u16)
            },
        )
        .await;

        assert_eq!(relay_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.route(), None);
        assert!(!outcome.used_relay());
        match outcome.into_result().unwrap_err() {
            RouteFailure::Interrupted(err) => assert_eq!(err.response_status, Some(200)),
            other => panic!("expected interrupted, got {:?}", other),
        }
    }
}
