// src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, FromRow)]
pub struct Paint {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub hiding_power: f64,
    pub photo: Option<String>,
    pub is_deleted: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_moderator: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Draft,
    Formed,
    Completed,
    Rejected,
    Deleted,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Formed => "formed",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Deleted => "deleted",
        }
    }

    /// The only edges of the request state machine.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Draft, Formed) | (Draft, Deleted) | (Formed, Completed) | (Formed, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Rejected | RequestStatus::Deleted
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown request status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RequestStatus::Draft),
            "formed" => Ok(RequestStatus::Formed),
            "completed" => Ok(RequestStatus::Completed),
            "rejected" => Ok(RequestStatus::Rejected),
            "deleted" => Ok(RequestStatus::Deleted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PaintRequest {
    pub id: i64,
    pub status: RequestStatus,
    pub date_create: DateTime<Utc>,
    pub date_form: Option<DateTime<Utc>>,
    pub date_finish: Option<DateTime<Utc>>,
    pub creator_id: Uuid,
    pub moderator_id: Option<Uuid>,
    pub min_layers: i32,
}

// Status is stored as text, so the row mapping goes through FromStr.
impl<'r> FromRow<'r, PgRow> for PaintRequest {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<RequestStatus>()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: Box::new(e),
            })?;

        Ok(PaintRequest {
            id: row.try_get("id")?,
            status,
            date_create: row.try_get("date_create")?,
            date_form: row.try_get("date_form")?,
            date_finish: row.try_get("date_finish")?,
            creator_id: row.try_get("creator_id")?,
            moderator_id: row.try_get("moderator_id")?,
            min_layers: row.try_get("min_layers")?,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, FromRow)]
pub struct RequestLine {
    pub request_id: i64,
    pub paint_id: i64,
    pub area: f64,
    pub layers: i32,
    pub quantity: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    pub sub: String, // user_id
    pub is_moderator: bool,
    pub iat: i64,
    pub exp: i64,
}

// Request bodies

#[derive(Serialize, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Default)]
pub struct ProfileUpdate {
    pub login: Option<String>,
    pub password: Option<String>,
    pub is_moderator: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewPaint {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub hiding_power: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PaintPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub hiding_power: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AddLineRequest {
    #[serde(default)]
    pub area: f64,
    #[serde(default = "default_layers")]
    pub layers: i32,
}

fn default_layers() -> i32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LinePatch {
    pub area: Option<f64>,
    pub layers: Option<i32>,
    pub quantity: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChangeRequestBody {
    pub min_layers: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModerateBody {
    pub status: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QuantityUpdate {
    pub paint_id: i64,
    pub quantity: f64,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct RequestFilter {
    #[serde(rename = "from-date")]
    pub from_date: Option<NaiveDate>,
    #[serde(rename = "to-date")]
    pub to_date: Option<NaiveDate>,
    pub status: Option<RequestStatus>,
}

// Responses

#[derive(Serialize, Clone, Debug)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: PaintRequest,
    pub creator_login: String,
    pub moderator_login: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct RequestDetails {
    pub request: RequestView,
    pub paints: Vec<Paint>,
    pub lines: Vec<RequestLine>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CartSummary {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub paints_count: i64,
}

impl CartSummary {
    pub fn no_draft() -> Self {
        CartSummary {
            status: "no_draft",
            id: None,
            paints_count: 0,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct SignInResponse {
    pub token: String,
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_one_directional() {
        use RequestStatus::*;
        assert!(Draft.can_transition_to(Formed));
        assert!(Draft.can_transition_to(Deleted));
        assert!(Formed.can_transition_to(Completed));
        assert!(Formed.can_transition_to(Rejected));

        assert!(!Formed.can_transition_to(Draft));
        assert!(!Formed.can_transition_to(Formed));
        assert!(!Formed.can_transition_to(Deleted));
        assert!(!Draft.can_transition_to(Completed));
        for terminal in [Completed, Rejected, Deleted] {
            for next in [Draft, Formed, Completed, Rejected, Deleted] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_text_matches_serde() {
        for status in [
            RequestStatus::Draft,
            RequestStatus::Formed,
            RequestStatus::Completed,
            RequestStatus::Rejected,
            RequestStatus::Deleted,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("черновик".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            login: "painter".into(),
            password_hash: "$2b$04$secret".into(),
            is_moderator: false,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["login"], "painter");
    }
}
