//! Route definitions for the `/judge` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::judge;
use crate::state::AppState;

/// Routes mounted at `/judge`.
///
/// ```text
/// POST   /judge/{thread_id}          -> enqueue (?dry_run=&model=)
/// GET    /judge/status/{thread_id}   -> status
/// POST   /judge/status/bulk          -> status_bulk
/// GET    /judge/metrics/{thread_id}  -> metrics
/// GET    /judge/active               -> active
/// GET    /judge/state                -> quota_state (?model=)
/// POST   /judge/cancel/{thread_id}   -> cancel
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/judge/{thread_id}", post(judge::enqueue))
        .route("/judge/status/{thread_id}", get(judge::status))
        .route("/judge/status/bulk", post(judge::status_bulk))
        .route("/judge/metrics/{thread_id}", get(judge::metrics))
        .route("/judge/active", get(judge::active))
        .route("/judge/state", get(judge::quota_state))
        .route("/judge/cancel/{thread_id}", post(judge::cancel))
}
