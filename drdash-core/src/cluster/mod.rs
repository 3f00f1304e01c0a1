//! Database cluster status: polling the per-node role endpoints and
//! reconciling their answers into one primary verdict.

pub mod classify;
pub mod reconciler;

pub use classify::{
    FetchOutcome, NodeStatus, ROLE_BAD_RESPONSE, ROLE_INVALID_JSON, ROLE_UNKNOWN,
    ROLE_UNREACHABLE, classify_response, is_primary_role,
};
pub use reconciler::{
    ClusterStatusReconciler, ClusterVerdict, DEFAULT_NODE_TIMEOUT, PRIMARY_NOT_DETECTED,
};
