pub mod api;
pub mod config;
pub mod dashboard;
pub mod delivery;
pub mod error;
pub mod events;
pub mod logger;
pub mod session;

pub use api::{ApiClient, ProtocolKind};
pub use config::DashboardConfig;
pub use dashboard::{Dashboard, JobBoard, Poller};
pub use delivery::FileDelivery;
pub use error::ApiError;
pub use logger::StructuredLogger;
pub use session::{CredentialSource, Session};
