use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub title: String,
    pub title_en: Option<String>,
    pub question: String,
    pub question_en: Option<String>,
    pub is_active: bool,
    pub closes_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub thread_id: Option<i64>,
    pub discord_link: Option<String>,
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: i64,
    pub poll_id: i64,
    pub label: String,
    pub label_en: Option<String>,
    pub votes: i32,
}

impl Poll {
    /// Global polls are the ones shown on the front page; thread polls live in the forum.
    pub fn is_global(&self) -> bool {
        self.thread_id.is_none()
    }

    pub fn total_votes(&self) -> i64 {
        self.options.iter().map(|option| i64::from(option.votes.max(0))).sum()
    }
}

/// A poll ready to be inserted. English fields are already resolved.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub title: String,
    pub title_en: String,
    pub question: String,
    pub question_en: String,
    pub closes_at: Option<DateTime<Utc>>,
    pub thread_id: Option<i64>,
    pub discord_link: Option<String>,
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOption {
    pub label: String,
    pub label_en: String,
}

/// Field replacement for an existing poll. `options: None` and `closes_at: None`
/// leave those fields untouched; `closes_at: Some(None)` clears the deadline.
#[derive(Debug, Clone)]
pub struct PollChanges {
    pub title: String,
    pub title_en: String,
    pub question: String,
    pub question_en: String,
    pub closes_at: Option<Option<DateTime<Utc>>>,
    pub options: Option<Vec<NewOption>>,
}

// --- Request bodies ---

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    #[serde(default)]
    pub title_en: Option<String>,
    pub question: String,
    #[serde(default)]
    pub question_en: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionInput>,
    #[serde(default, deserialize_with = "deserialize_closes_at")]
    pub closes_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub discord_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePollRequest {
    pub title: String,
    #[serde(default)]
    pub title_en: Option<String>,
    pub question: String,
    #[serde(default)]
    pub question_en: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<OptionInput>>,
    /// Absent keeps the stored deadline; `null` or `""` clears it.
    #[serde(default, deserialize_with = "deserialize_closes_at_change")]
    pub closes_at: Option<Option<DateTime<Utc>>>,
}

/// Options arrive either as bare labels or as `{ label, label_en }` objects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OptionInput {
    Label(String),
    Detailed {
        label: String,
        #[serde(default)]
        label_en: Option<String>,
    },
}

impl OptionInput {
    pub fn label(&self) -> &str {
        match self {
            OptionInput::Label(label) => label,
            OptionInput::Detailed { label, .. } => label,
        }
    }

    /// The supplied English label, if any non-blank one was given.
    pub fn label_en(&self) -> Option<&str> {
        match self {
            OptionInput::Label(_) => None,
            OptionInput::Detailed { label_en, .. } => non_blank(label_en.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub poll_id: i64,
    pub option_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub poll_id: i64,
    pub option_id: i64,
    pub votes: i32,
}

pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accepts RFC 3339, or the naive `YYYY-MM-DDTHH:MM[:SS]` an HTML datetime input sends (read as UTC).
pub fn parse_closes_at(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format!("invalid closes_at timestamp: {}", raw))
}

fn deserialize_closes_at<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match non_blank(raw.as_deref()) {
        None => Ok(None),
        Some(value) => parse_closes_at(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn deserialize_closes_at_change<'de, D>(deserializer: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_closes_at(deserializer).map(Some)
}
