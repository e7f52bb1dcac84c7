//! Request admission: the per-request decision and the outcomes handed
//! back to the host transport.

mod response;
mod service;

pub use response::{
    RateLimitHeaders, Rejection, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RESET_AFTER,
};
pub use service::{AdmissionController, AdmissionRequest, AdmissionSettings, Admitted};
