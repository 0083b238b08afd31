use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Usage,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Usage => "usage",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "deposit" => Ok(TransactionType::Deposit),
            "usage" => Ok(TransactionType::Usage),
            other => Err(anyhow!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    Recharge,
    JobView,
    CvUnlock,
    ProfileBoost,
    JobPost,
    PremiumFeature,
}

impl TransactionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionCategory::Recharge => "recharge",
            TransactionCategory::JobView => "job_view",
            TransactionCategory::CvUnlock => "cv_unlock",
            TransactionCategory::ProfileBoost => "profile_boost",
            TransactionCategory::JobPost => "job_post",
            TransactionCategory::PremiumFeature => "premium_feature",
        }
    }
}

impl std::str::FromStr for TransactionCategory {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "recharge" => Ok(TransactionCategory::Recharge),
            "job_view" => Ok(TransactionCategory::JobView),
            "cv_unlock" => Ok(TransactionCategory::CvUnlock),
            "profile_boost" => Ok(TransactionCategory::ProfileBoost),
            "job_post" => Ok(TransactionCategory::JobPost),
            "premium_feature" => Ok(TransactionCategory::PremiumFeature),
            other => Err(anyhow!("unknown transaction category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub actor_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub category: TransactionCategory,
    /// Signed: positive for deposits, negative for usage.
    pub amount: i64,
    /// Running balance immediately after this transaction.
    pub balance_after: i64,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBreakdown {
    pub category: TransactionCategory,
    pub count: i64,
    pub total_amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditSummary {
    pub current_balance: i64,
    pub total_deposits: i64,
    /// Absolute value of all usage amounts in range.
    pub total_usage: i64,
    pub by_category: Vec<CategoryBreakdown>,
}
