//! Multi-level approval workflow for cooperative society loans and
//! withdrawals, backed by an embedded sled ledger.

pub mod config;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod request;
pub mod service;
mod settlement;
pub mod store;
pub mod types;
pub mod utils;
pub mod view;

pub use config::Settings;
pub use error::{WorkflowError, WorkflowResult};
pub use request::{ApprovalRequest, RequestContent, RequestStatus, RequestType};
pub use service::ApprovalService;
pub use types::{Amount, CurrentActor, SubjectRef};
