pub mod file_repository;
pub mod repository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATUS_IN_PROGRESS: &str = "Em andamento";
pub const STATUS_CONCLUDED: &str = "Concluido";

/// The record a flow execution runs against. Only its status is touched by
/// the flow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            status: STATUS_IN_PROGRESS.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_concluded(&self) -> bool {
        self.status == STATUS_CONCLUDED
    }
}
