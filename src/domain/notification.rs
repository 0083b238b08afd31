use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Application,
    Interview,
    Recommendation,
    ProfileView,
    JobAlert,
    System,
    JobApplicantsRollup,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Application => "application",
            NotificationKind::Interview => "interview",
            NotificationKind::Recommendation => "recommendation",
            NotificationKind::ProfileView => "profile_view",
            NotificationKind::JobAlert => "job_alert",
            NotificationKind::System => "system",
            NotificationKind::JobApplicantsRollup => "job_applicants_rollup",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "application" => Ok(NotificationKind::Application),
            "interview" => Ok(NotificationKind::Interview),
            "recommendation" => Ok(NotificationKind::Recommendation),
            "profile_view" => Ok(NotificationKind::ProfileView),
            "job_alert" => Ok(NotificationKind::JobAlert),
            "system" => Ok(NotificationKind::System),
            "job_applicants_rollup" => Ok(NotificationKind::JobApplicantsRollup),
            other => Err(anyhow!("unknown notification type: {}", other)),
        }
    }
}

/// Polymorphic reference to the subject of a notification (a job, an
/// application, a profile, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub entity: Option<EntityRef>,
    pub aggregation_key: Option<String>,
    pub metadata: Value,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
