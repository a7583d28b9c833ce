//! Notification and statistics DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::PaginationMeta;
use crate::domain::{Notification, NotificationId};

/// Paginated list response for `GET /notifications`.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationListResponse {
    /// Notifications on this page, newest first.
    pub data: Vec<Notification>,
    /// Unread notifications across all pages.
    pub unread: u32,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Request body for `POST /notifications/read`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkReadRequest {
    /// Notifications to mark. Ids of other members are ignored.
    pub ids: Vec<NotificationId>,
}

/// Response body for `POST /notifications/read`.
#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    /// Notifications that changed from unread to read.
    pub updated: u64,
}

/// Query parameters for `GET /statistics`.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatisticsParams {
    /// Window length in days. Defaults to 28.
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    28
}
