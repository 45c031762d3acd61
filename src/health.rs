//! Health endpoint: `GET /healthz` returning 200 OK while the process is
//! accepting work, 503 otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Flipped to `true` once the pool health check and initial migrations
/// succeed; flipped back to `false` during shutdown so load balancers
/// stop routing new work before the process actually exits.
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn router(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(readiness)
}

async fn healthz(
    axum::extract::State(readiness): axum::extract::State<Readiness>,
) -> StatusCode {
    if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_starts_false() {
        let r = Readiness::new();
        assert!(!r.is_ready());
    }

    #[test]
    fn readiness_toggles() {
        let r = Readiness::new();
        r.set_ready(true);
        assert!(r.is_ready());
        r.set_ready(false);
        assert!(!r.is_ready());
    }
}
