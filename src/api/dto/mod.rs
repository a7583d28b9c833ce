//! Data Transfer Objects for REST request/response serialization.

pub mod common_dto;
pub mod event_dto;
pub mod notification_dto;
pub mod transaction_dto;

pub use common_dto::*;
pub use event_dto::*;
pub use notification_dto::*;
pub use transaction_dto::*;
