pub mod countdown;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Poll, PollOption};
use countdown::Countdown;

/// An option together with its share of the poll's votes.
#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub id: i64,
    pub poll_id: i64,
    pub label: String,
    pub label_en: Option<String>,
    pub votes: i32,
    pub percent: u32,
}

/// A poll as the site renders it: options with percentages plus the countdown strings.
#[derive(Debug, Clone, Serialize)]
pub struct PollView {
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
    pub options: Vec<OptionView>,
    #[serde(rename = "totalVotes")]
    pub total_votes: i64,
    #[serde(rename = "closesIn")]
    pub closes_in: String,
    #[serde(rename = "closesInEn")]
    pub closes_in_en: String,
}

/// Row of the admin history table.
#[derive(Debug, Clone, Serialize)]
pub struct PollSummary {
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
    #[serde(rename = "totalVotes")]
    pub total_votes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollPage {
    pub data: Vec<PollSummary>,
    pub total: i64,
    pub page: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

/// Share of `total` held by `votes`, rounded to a whole percent.
pub fn percent(votes: i32, total: i64) -> u32 {
    if total <= 0 {
        return 0;
    }
    (f64::from(votes.max(0)) * 100.0 / total as f64).round() as u32
}

pub fn total_pages(total: i64, limit: u32) -> u32 {
    if total <= 0 || limit == 0 {
        return 0;
    }
    let limit = i64::from(limit);
    ((total + limit - 1) / limit) as u32
}

impl PollView {
    pub fn build(poll: Poll, now: DateTime<Utc>) -> Self {
        let total_votes = poll.total_votes();
        let countdown = Countdown::until(poll.closes_at, now);

        let options = poll
            .options
            .into_iter()
            .map(|option: PollOption| OptionView {
                percent: percent(option.votes, total_votes),
                id: option.id,
                poll_id: option.poll_id,
                label: option.label,
                label_en: option.label_en,
                votes: option.votes,
            })
            .collect();

        Self {
            id: poll.id,
            title: poll.title,
            title_en: poll.title_en,
            question: poll.question,
            question_en: poll.question_en,
            is_active: poll.is_active,
            closes_at: poll.closes_at,
            created_at: poll.created_at,
            thread_id: poll.thread_id,
            discord_link: poll.discord_link,
            options,
            total_votes,
            closes_in: countdown.spanish(),
            closes_in_en: countdown.english(),
        }
    }
}

impl From<Poll> for PollSummary {
    fn from(poll: Poll) -> Self {
        let total_votes = poll.total_votes();
        Self {
            id: poll.id,
            title: poll.title,
            title_en: poll.title_en,
            question: poll.question,
            question_en: poll.question_en,
            is_active: poll.is_active,
            closes_at: poll.closes_at,
            created_at: poll.created_at,
            thread_id: poll.thread_id,
            discord_link: poll.discord_link,
            total_votes,
        }
    }
}
