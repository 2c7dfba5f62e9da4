use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Banner returned from the service root
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusMessage {
    pub message: String,
}
