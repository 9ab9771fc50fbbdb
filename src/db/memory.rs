use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::PollStore;
use crate::error::{PollError, PollResult};
use crate::models::{NewOption, NewPoll, Poll, PollChanges, PollOption};

/// Process-local store for development runs without Postgres, and for tests.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_poll_id: i64,
    next_option_id: i64,
    polls: Vec<Poll>,
}

impl MemoryState {
    fn new_option(&mut self, poll_id: i64, option: &NewOption) -> PollOption {
        self.next_option_id += 1;
        PollOption {
            id: self.next_option_id,
            poll_id,
            label: option.label.clone(),
            label_en: Some(option.label_en.clone()),
            votes: 0,
        }
    }

    fn poll_mut(&mut self, poll_id: i64) -> PollResult<&mut Poll> {
        self.polls
            .iter_mut()
            .find(|p| p.id == poll_id)
            .ok_or(PollError::PollNotFound)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first; ids break ties between polls created within the same instant.
fn newest_first(a: &Poll, b: &Poll) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn active_global_poll(&self) -> PollResult<Option<Poll>> {
        let state = self.state.read().await;
        let mut active: Vec<&Poll> = state
            .polls
            .iter()
            .filter(|p| p.is_active && p.is_global())
            .collect();
        active.sort_by(|a, b| newest_first(a, b));
        Ok(active.first().map(|p| (*p).clone()))
    }

    async fn get_poll(&self, poll_id: i64) -> PollResult<Option<Poll>> {
        let state = self.state.read().await;
        Ok(state.polls.iter().find(|p| p.id == poll_id).cloned())
    }

    async fn increment_vote(&self, poll_id: i64, option_id: i64) -> PollResult<i32> {
        let mut state = self.state.write().await;
        let poll = state.poll_mut(poll_id)?;
        if !poll.is_active {
            return Err(PollError::PollClosed);
        }
        let option = poll
            .options
            .iter_mut()
            .find(|o| o.id == option_id)
            .ok_or(PollError::OptionNotFound)?;
        option.votes += 1;
        Ok(option.votes)
    }

    async fn create_poll(&self, poll: &NewPoll) -> PollResult<Poll> {
        let mut state = self.state.write().await;

        if poll.thread_id.is_none() {
            for existing in state.polls.iter_mut().filter(|p| p.is_global()) {
                existing.is_active = false;
            }
        }

        state.next_poll_id += 1;
        let poll_id = state.next_poll_id;
        let options = poll
            .options
            .iter()
            .map(|option| state.new_option(poll_id, option))
            .collect();

        let created = Poll {
            id: poll_id,
            title: poll.title.clone(),
            title_en: Some(poll.title_en.clone()),
            question: poll.question.clone(),
            question_en: Some(poll.question_en.clone()),
            is_active: true,
            closes_at: poll.closes_at,
            created_at: Utc::now(),
            thread_id: poll.thread_id,
            discord_link: poll.discord_link.clone(),
            options,
        };
        state.polls.push(created.clone());
        Ok(created)
    }

    async fn update_poll(&self, poll_id: i64, changes: &PollChanges) -> PollResult<Poll> {
        let mut state = self.state.write().await;
        // Validate existence before touching the option id counter.
        state.poll_mut(poll_id)?;

        let mut appended = Vec::new();
        if let Some(options) = &changes.options {
            let existing = state.poll_mut(poll_id)?.options.len();
            for option in options.iter().skip(existing) {
                appended.push(state.new_option(poll_id, option));
            }
        }

        let poll = state.poll_mut(poll_id)?;
        poll.title = changes.title.clone();
        poll.title_en = Some(changes.title_en.clone());
        poll.question = changes.question.clone();
        poll.question_en = Some(changes.question_en.clone());
        if let Some(closes_at) = changes.closes_at {
            poll.closes_at = closes_at;
        }

        if let Some(options) = &changes.options {
            poll.options.truncate(options.len());
            for (current, option) in poll.options.iter_mut().zip(options) {
                current.label = option.label.clone();
                current.label_en = Some(option.label_en.clone());
            }
            poll.options.extend(appended);
        }

        Ok(poll.clone())
    }

    async fn close_poll(&self, poll_id: i64) -> PollResult<()> {
        let mut state = self.state.write().await;
        state.poll_mut(poll_id)?.is_active = false;
        Ok(())
    }

    async fn delete_poll(&self, poll_id: i64) -> PollResult<()> {
        let mut state = self.state.write().await;
        let before = state.polls.len();
        state.polls.retain(|p| p.id != poll_id);
        if state.polls.len() == before {
            return Err(PollError::PollNotFound);
        }
        Ok(())
    }

    async fn list_polls(&self, offset: i64, limit: i64) -> PollResult<(Vec<Poll>, i64)> {
        let state = self.state.read().await;
        let mut polls: Vec<Poll> = state.polls.clone();
        polls.sort_by(newest_first);

        let total = polls.len() as i64;
        let page = polls
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn expired_polls(&self, now: DateTime<Utc>) -> PollResult<Vec<i64>> {
        let state = self.state.read().await;
        Ok(state
            .polls
            .iter()
            .filter(|p| p.is_active && p.closes_at.is_some_and(|closes_at| closes_at < now))
            .map(|p| p.id)
            .collect())
    }
}
