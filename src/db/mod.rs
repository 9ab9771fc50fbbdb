pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::error::{PollError, PollResult};
use crate::models::{NewOption, NewPoll, Poll, PollChanges, PollOption};

pub use memory::MemoryStore;

/// Persistence for polls and their options. Vote counts live here.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Most recently created active poll that is not attached to a forum thread.
    async fn active_global_poll(&self) -> PollResult<Option<Poll>>;

    async fn get_poll(&self, poll_id: i64) -> PollResult<Option<Poll>>;

    /// Adds one vote to `option_id` and returns its new count.
    async fn increment_vote(&self, poll_id: i64, option_id: i64) -> PollResult<i32>;

    /// Inserts an active poll. A global poll deactivates every other global poll.
    async fn create_poll(&self, poll: &NewPoll) -> PollResult<Poll>;

    async fn update_poll(&self, poll_id: i64, changes: &PollChanges) -> PollResult<Poll>;

    async fn close_poll(&self, poll_id: i64) -> PollResult<()>;

    async fn delete_poll(&self, poll_id: i64) -> PollResult<()>;

    /// Newest first, with options. Returns the page and the total number of polls.
    async fn list_polls(&self, offset: i64, limit: i64) -> PollResult<(Vec<Poll>, i64)>;

    /// Active polls whose `closes_at` is before `now`.
    async fn expired_polls(&self, now: DateTime<Utc>) -> PollResult<Vec<i64>>;
}

const POLL_COLUMNS: &str = "id, title, title_en, question, question_en, is_active, closes_at, created_at, thread_id, discord_link";
const OPTION_COLUMNS: &str = "id, poll_id, label, label_en, votes";

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                title_en TEXT,
                question TEXT NOT NULL,
                question_en TEXT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                closes_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                thread_id BIGINT,
                discord_link TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                id BIGSERIAL PRIMARY KEY,
                poll_id BIGINT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                label_en TEXT,
                votes INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS poll_options_poll_id_idx ON poll_options (poll_id)")
            .execute(&self.pool)
            .await?;

        // At most one active global poll.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS polls_single_active_global
            ON polls ((TRUE))
            WHERE is_active AND thread_id IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Poll schema is ready.");
        Ok(())
    }
}

fn poll_from_row(row: &PgRow) -> Result<Poll, sqlx::Error> {
    Ok(Poll {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        title_en: row.try_get("title_en")?,
        question: row.try_get("question")?,
        question_en: row.try_get("question_en")?,
        is_active: row.try_get("is_active")?,
        closes_at: row.try_get("closes_at")?,
        created_at: row.try_get("created_at")?,
        thread_id: row.try_get("thread_id")?,
        discord_link: row.try_get("discord_link")?,
        options: Vec::new(),
    })
}

fn option_from_row(row: &PgRow) -> Result<PollOption, sqlx::Error> {
    Ok(PollOption {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        label: row.try_get("label")?,
        label_en: row.try_get("label_en")?,
        votes: row.try_get("votes")?,
    })
}

async fn fetch_options(conn: &mut PgConnection, poll_id: i64) -> Result<Vec<PollOption>, sqlx::Error> {
    sqlx::query(&format!(
        "SELECT {} FROM poll_options WHERE poll_id = $1 ORDER BY id",
        OPTION_COLUMNS
    ))
    .bind(poll_id)
    .fetch_all(conn)
    .await?
    .iter()
    .map(option_from_row)
    .collect()
}

async fn insert_option(
    conn: &mut PgConnection,
    poll_id: i64,
    option: &NewOption,
) -> Result<PollOption, sqlx::Error> {
    let row = sqlx::query(&format!(
        "INSERT INTO poll_options (poll_id, label, label_en, votes) VALUES ($1, $2, $3, 0) RETURNING {}",
        OPTION_COLUMNS
    ))
    .bind(poll_id)
    .bind(&option.label)
    .bind(&option.label_en)
    .fetch_one(conn)
    .await?;
    option_from_row(&row)
}

#[async_trait]
impl PollStore for Database {
    async fn active_global_poll(&self) -> PollResult<Option<Poll>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM polls
            WHERE is_active = TRUE AND thread_id IS NULL
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            POLL_COLUMNS
        ))
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut poll = poll_from_row(&row)?;
        poll.options = fetch_options(&mut conn, poll.id).await?;
        Ok(Some(poll))
    }

    async fn get_poll(&self, poll_id: i64) -> PollResult<Option<Poll>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!("SELECT {} FROM polls WHERE id = $1", POLL_COLUMNS))
            .bind(poll_id)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut poll = poll_from_row(&row)?;
        poll.options = fetch_options(&mut conn, poll.id).await?;
        Ok(Some(poll))
    }

    async fn increment_vote(&self, poll_id: i64, option_id: i64) -> PollResult<i32> {
        // Single statement, so concurrent votes never overwrite each other.
        let votes: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE poll_options AS o
            SET votes = o.votes + 1
            FROM polls AS p
            WHERE o.id = $1 AND o.poll_id = $2 AND p.id = o.poll_id AND p.is_active = TRUE
            RETURNING o.votes
            "#,
        )
        .bind(option_id)
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(votes) = votes {
            return Ok(votes);
        }

        let is_active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM polls WHERE id = $1")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?;

        match is_active {
            None => Err(PollError::PollNotFound),
            Some(false) => Err(PollError::PollClosed),
            Some(true) => Err(PollError::OptionNotFound),
        }
    }

    async fn create_poll(&self, poll: &NewPoll) -> PollResult<Poll> {
        let mut tx = self.pool.begin().await?;

        if poll.thread_id.is_none() {
            let deactivated = sqlx::query(
                "UPDATE polls SET is_active = FALSE WHERE is_active = TRUE AND thread_id IS NULL",
            )
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if deactivated > 0 {
                info!("Deactivated {} previous global poll(s).", deactivated);
            }
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO polls (title, title_en, question, question_en, is_active, closes_at, thread_id, discord_link)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7)
            RETURNING {}
            "#,
            POLL_COLUMNS
        ))
        .bind(&poll.title)
        .bind(&poll.title_en)
        .bind(&poll.question)
        .bind(&poll.question_en)
        .bind(poll.closes_at)
        .bind(poll.thread_id)
        .bind(&poll.discord_link)
        .fetch_one(&mut *tx)
        .await?;

        let mut created = poll_from_row(&row)?;
        for option in &poll.options {
            let inserted = insert_option(&mut tx, created.id, option).await?;
            created.options.push(inserted);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn update_poll(&self, poll_id: i64, changes: &PollChanges) -> PollResult<Poll> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE polls
            SET title = $2, title_en = $3, question = $4, question_en = $5,
                closes_at = CASE WHEN $7 THEN $6 ELSE closes_at END
            WHERE id = $1
            RETURNING {}
            "#,
            POLL_COLUMNS
        ))
        .bind(poll_id)
        .bind(&changes.title)
        .bind(&changes.title_en)
        .bind(&changes.question)
        .bind(&changes.question_en)
        .bind(changes.closes_at.flatten())
        .bind(changes.closes_at.is_some())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(PollError::PollNotFound)?;

        let mut updated = poll_from_row(&row)?;

        if let Some(options) = &changes.options {
            // Positional diff: relabel in place, append extras, drop the surplus tail.
            let existing = fetch_options(&mut tx, poll_id).await?;
            for (position, option) in options.iter().enumerate() {
                match existing.get(position) {
                    Some(current) => {
                        sqlx::query("UPDATE poll_options SET label = $2, label_en = $3 WHERE id = $1")
                            .bind(current.id)
                            .bind(&option.label)
                            .bind(&option.label_en)
                            .execute(&mut *tx)
                            .await?;
                    }
                    None => {
                        insert_option(&mut tx, poll_id, option).await?;
                    }
                }
            }

            if existing.len() > options.len() {
                let surplus: Vec<i64> = existing[options.len()..].iter().map(|o| o.id).collect();
                sqlx::query("DELETE FROM poll_options WHERE id = ANY($1)")
                    .bind(&surplus)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        updated.options = fetch_options(&mut tx, poll_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn close_poll(&self, poll_id: i64) -> PollResult<()> {
        let affected = sqlx::query("UPDATE polls SET is_active = FALSE WHERE id = $1")
            .bind(poll_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(PollError::PollNotFound);
        }
        Ok(())
    }

    async fn delete_poll(&self, poll_id: i64) -> PollResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM poll_options WHERE poll_id = $1")
            .bind(poll_id)
            .execute(&mut *tx)
            .await?;

        let affected = sqlx::query("DELETE FROM polls WHERE id = $1")
            .bind(poll_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if affected == 0 {
            // Dropping the transaction rolls it back.
            return Err(PollError::PollNotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_polls(&self, offset: i64, limit: i64) -> PollResult<(Vec<Poll>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM polls")
            .fetch_one(&self.pool)
            .await?;

        let mut polls = sqlx::query(&format!(
            "SELECT {} FROM polls ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            POLL_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(poll_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        if polls.is_empty() {
            return Ok((polls, total));
        }

        let poll_ids: Vec<i64> = polls.iter().map(|p| p.id).collect();
        let options = sqlx::query(&format!(
            "SELECT {} FROM poll_options WHERE poll_id = ANY($1) ORDER BY id",
            OPTION_COLUMNS
        ))
        .bind(&poll_ids)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(option_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        for option in options {
            if let Some(poll) = polls.iter_mut().find(|p| p.id == option.poll_id) {
                poll.options.push(option);
            }
        }

        Ok((polls, total))
    }

    async fn expired_polls(&self, now: DateTime<Utc>) -> PollResult<Vec<i64>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id
            FROM polls
            WHERE closes_at IS NOT NULL AND closes_at < $1 AND is_active = TRUE
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
