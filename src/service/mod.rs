use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;

use crate::db::PollStore;
use crate::error::{PollError, PollResult};
use crate::models::{
    non_blank, CreatePollRequest, NewOption, NewPoll, OptionInput, PollChanges, UpdatePollRequest,
    VoteReceipt,
};
use crate::translate::Translator;
use crate::voting::{total_pages, PollPage, PollSummary, PollView};

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 25;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

lazy_static! {
    static ref DISCORD_LINK: Regex = Regex::new(
        r"^(?:https?://)?(?:(?:www|ptb|canary)\.)?(?:discord(?:app)?\.com/(?:channels/\d+/\d+(?:/\d+)?|invite/[A-Za-z0-9-]+)|discord\.gg/[A-Za-z0-9-]+)/?(?:[?#]\S*)?$"
    )
    .unwrap();
}

/// Poll lifecycle, voting and aggregation on top of a [`PollStore`].
pub struct PollService {
    store: Arc<dyn PollStore>,
    translator: Arc<dyn Translator>,
    target_language: String,
}

impl PollService {
    pub fn new(
        store: Arc<dyn PollStore>,
        translator: Arc<dyn Translator>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            store,
            translator,
            target_language: target_language.into(),
        }
    }

    pub async fn active_poll(&self) -> PollResult<Option<PollView>> {
        let poll = self.store.active_global_poll().await?;
        Ok(poll.map(|poll| PollView::build(poll, Utc::now())))
    }

    pub async fn get_poll(&self, poll_id: i64) -> PollResult<PollView> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)?;
        Ok(PollView::build(poll, Utc::now()))
    }

    pub async fn vote(&self, poll_id: i64, option_id: i64) -> PollResult<VoteReceipt> {
        let votes = self.store.increment_vote(poll_id, option_id).await?;
        Ok(VoteReceipt {
            poll_id,
            option_id,
            votes,
        })
    }

    pub async fn create_poll(&self, request: CreatePollRequest) -> PollResult<PollView> {
        require_text("title", &request.title)?;
        require_text("question", &request.question)?;
        let discord_link = match non_blank(request.discord_link.as_deref()) {
            Some(link) if !DISCORD_LINK.is_match(link) => {
                return Err(PollError::Invalid("discord_link must be a Discord channel or invite URL".to_string()));
            }
            link => link.map(str::to_string),
        };
        let min_options = if discord_link.is_some() { 0 } else { MIN_OPTIONS };
        validate_options(&request.options, min_options)?;

        let new_poll = NewPoll {
            title_en: self.english(&request.title, request.title_en.as_deref()).await,
            question_en: self.english(&request.question, request.question_en.as_deref()).await,
            options: self.resolve_options(&request.options).await,
            title: request.title.trim().to_string(),
            question: request.question.trim().to_string(),
            closes_at: request.closes_at,
            thread_id: request.thread_id,
            discord_link,
        };

        let created = self.store.create_poll(&new_poll).await?;
        info!(
            "Created poll {} ({} options, {}).",
            created.id,
            created.options.len(),
            match created.thread_id {
                Some(thread_id) => format!("thread {}", thread_id),
                None => "global".to_string(),
            }
        );
        Ok(PollView::build(created, Utc::now()))
    }

    pub async fn update_poll(&self, poll_id: i64, request: UpdatePollRequest) -> PollResult<PollView> {
        require_text("title", &request.title)?;
        require_text("question", &request.question)?;
        if let Some(options) = &request.options {
            validate_options(options, MIN_OPTIONS)?;
        }

        let options = match &request.options {
            Some(options) => Some(self.resolve_options(options).await),
            None => None,
        };
        let changes = PollChanges {
            title_en: self.english(&request.title, request.title_en.as_deref()).await,
            question_en: self.english(&request.question, request.question_en.as_deref()).await,
            title: request.title.trim().to_string(),
            question: request.question.trim().to_string(),
            closes_at: request.closes_at,
            options,
        };

        let updated = self.store.update_poll(poll_id, &changes).await?;
        info!("Updated poll {}.", poll_id);
        Ok(PollView::build(updated, Utc::now()))
    }

    pub async fn close_poll(&self, poll_id: i64) -> PollResult<()> {
        self.store.close_poll(poll_id).await?;
        info!("Closed poll {}.", poll_id);
        Ok(())
    }

    pub async fn delete_poll(&self, poll_id: i64) -> PollResult<()> {
        self.store.delete_poll(poll_id).await?;
        info!("Deleted poll {} and its options.", poll_id);
        Ok(())
    }

    pub async fn list_polls(&self, page: u32, limit: u32) -> PollResult<PollPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = i64::from(page - 1) * i64::from(limit);

        let (polls, total) = self.store.list_polls(offset, i64::from(limit)).await?;
        Ok(PollPage {
            data: polls.into_iter().map(PollSummary::from).collect(),
            total,
            page,
            total_pages: total_pages(total, limit),
        })
    }

    /// Closes every active poll whose deadline is before `now`. Returns the closed ids.
    pub async fn close_expired(&self, now: DateTime<Utc>) -> PollResult<Vec<i64>> {
        let expired = self.store.expired_polls(now).await?;
        let mut closed = Vec::with_capacity(expired.len());
        for poll_id in expired {
            match self.store.close_poll(poll_id).await {
                Ok(()) => closed.push(poll_id),
                // Deleted between the query and the update.
                Err(PollError::PollNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(closed)
    }

    async fn resolve_options(&self, options: &[OptionInput]) -> Vec<NewOption> {
        let mut resolved = Vec::with_capacity(options.len());
        for option in options {
            resolved.push(NewOption {
                label: option.label().trim().to_string(),
                label_en: self.english(option.label(), option.label_en()).await,
            });
        }
        resolved
    }

    /// The supplied English text, or a translation of `text`. Falls back to `text` itself.
    async fn english(&self, text: &str, supplied: Option<&str>) -> String {
        if let Some(supplied) = non_blank(supplied) {
            return supplied.to_string();
        }
        let text = text.trim();
        match self.translator.translate(text, &self.target_language).await {
            Ok(translated) if !translated.trim().is_empty() => translated,
            Ok(_) => text.to_string(),
            Err(e) => {
                warn!("Translation of {:?} failed, keeping source text: {}", text, e);
                text.to_string()
            }
        }
    }
}

fn require_text(field: &str, value: &str) -> PollResult<()> {
    if value.trim().is_empty() {
        return Err(PollError::Invalid(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_options(options: &[OptionInput], min: usize) -> PollResult<()> {
    if options.len() < min {
        return Err(PollError::Invalid(format!("a poll needs at least {} options", min)));
    }
    if options.len() > MAX_OPTIONS {
        return Err(PollError::Invalid(format!("a poll can have at most {} options", MAX_OPTIONS)));
    }
    if options.iter().any(|option| option.label().trim().is_empty()) {
        return Err(PollError::Invalid("option labels cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::translate::{Passthrough, TranslateError};
    use async_trait::async_trait;
    use chrono::Duration;

    struct Prefixing;

    #[async_trait]
    impl Translator for Prefixing {
        async fn translate(&self, text: &str, target: &str) -> Result<String, TranslateError> {
            Ok(format!("[{}] {}", target, text))
        }
    }

    struct Failing;

    #[async_trait]
    impl Translator for Failing {
        async fn translate(&self, _text: &str, _target: &str) -> Result<String, TranslateError> {
            Err(TranslateError::Malformed)
        }
    }

    fn service_with(translator: Arc<dyn Translator>) -> PollService {
        PollService::new(Arc::new(MemoryStore::new()), translator, "en")
    }

    fn service() -> PollService {
        service_with(Arc::new(Passthrough))
    }

    fn labels(labels: &[&str]) -> Vec<OptionInput> {
        labels.iter().map(|l| OptionInput::Label(l.to_string())).collect()
    }

    fn create_request(title: &str, thread_id: Option<i64>) -> CreatePollRequest {
        CreatePollRequest {
            title: title.to_string(),
            title_en: None,
            question: format!("¿{}?", title),
            question_en: None,
            options: labels(&["Sí", "No"]),
            closes_at: None,
            thread_id,
            discord_link: None,
        }
    }

    fn update_request(options: Option<Vec<OptionInput>>) -> UpdatePollRequest {
        UpdatePollRequest {
            title: "Nuevo".to_string(),
            title_en: Some("New".to_string()),
            question: "¿Nuevo?".to_string(),
            question_en: None,
            options,
            closes_at: None,
        }
    }

    #[tokio::test]
    async fn creating_global_poll_deactivates_previous_globals() {
        let service = service();
        let first = service.create_poll(create_request("Primera", None)).await.unwrap();
        let thread = service.create_poll(create_request("Hilo", Some(12))).await.unwrap();
        let second = service.create_poll(create_request("Segunda", None)).await.unwrap();

        assert!(!service.get_poll(first.id).await.unwrap().is_active);
        assert!(service.get_poll(thread.id).await.unwrap().is_active);
        assert!(service.get_poll(second.id).await.unwrap().is_active);

        let active = service.active_poll().await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
    }

    #[tokio::test]
    async fn vote_increments_exactly_one_option() {
        let service = service();
        let poll = service.create_poll(create_request("Votación", None)).await.unwrap();
        let (yes, no) = (poll.options[0].id, poll.options[1].id);

        assert_eq!(service.vote(poll.id, yes).await.unwrap().votes, 1);
        assert_eq!(service.vote(poll.id, yes).await.unwrap().votes, 2);
        assert_eq!(service.vote(poll.id, no).await.unwrap().votes, 1);

        let view = service.get_poll(poll.id).await.unwrap();
        assert_eq!(view.options[0].votes, 2);
        assert_eq!(view.options[1].votes, 1);
        assert_eq!(view.total_votes, 3);
        assert_eq!(view.options[0].percent, 67);
        assert_eq!(view.options[1].percent, 33);
    }

    #[tokio::test]
    async fn vote_on_unknown_option_is_not_found() {
        let service = service();
        let poll = service.create_poll(create_request("Votación", None)).await.unwrap();

        let err = service.vote(poll.id, 9_999).await.unwrap_err();
        assert!(matches!(err, PollError::OptionNotFound));
    }

    #[tokio::test]
    async fn closed_poll_leaves_active_and_rejects_votes() {
        let service = service();
        let poll = service.create_poll(create_request("Cerrar", None)).await.unwrap();

        service.close_poll(poll.id).await.unwrap();
        assert!(service.active_poll().await.unwrap().is_none());

        let err = service.vote(poll.id, poll.options[0].id).await.unwrap_err();
        assert!(matches!(err, PollError::PollClosed));

        // Closing twice is fine.
        service.close_poll(poll.id).await.unwrap();
    }

    #[tokio::test]
    async fn delete_removes_poll_and_options() {
        let service = service();
        let poll = service.create_poll(create_request("Borrar", None)).await.unwrap();
        let option_id = poll.options[0].id;

        service.delete_poll(poll.id).await.unwrap();
        assert!(matches!(service.get_poll(poll.id).await, Err(PollError::PollNotFound)));
        assert!(matches!(
            service.vote(poll.id, option_id).await,
            Err(PollError::PollNotFound)
        ));
        assert!(matches!(service.delete_poll(poll.id).await, Err(PollError::PollNotFound)));
    }

    #[tokio::test]
    async fn missing_english_fields_are_translated() {
        let service = service_with(Arc::new(Prefixing));
        let mut request = create_request("Mapa", None);
        request.question_en = Some("Which map?".to_string());
        request.options = vec![
            OptionInput::Label("Bosque".to_string()),
            OptionInput::Detailed {
                label: "Desierto".to_string(),
                label_en: Some("Desert".to_string()),
            },
        ];

        let poll = service.create_poll(request).await.unwrap();
        assert_eq!(poll.title_en.as_deref(), Some("[en] Mapa"));
        assert_eq!(poll.question_en.as_deref(), Some("Which map?"));
        assert_eq!(poll.options[0].label_en.as_deref(), Some("[en] Bosque"));
        assert_eq!(poll.options[1].label_en.as_deref(), Some("Desert"));
    }

    #[tokio::test]
    async fn translation_failure_keeps_source_text() {
        let service = service_with(Arc::new(Failing));
        let poll = service.create_poll(create_request("Mapa", None)).await.unwrap();
        assert_eq!(poll.title_en.as_deref(), Some("Mapa"));
        assert_eq!(poll.options[0].label_en.as_deref(), Some("Sí"));
    }

    #[tokio::test]
    async fn create_validates_input() {
        let service = service();

        let mut blank_title = create_request("x", None);
        blank_title.title = "  ".to_string();
        assert!(matches!(service.create_poll(blank_title).await, Err(PollError::Invalid(_))));

        let mut one_option = create_request("x", None);
        one_option.options = labels(&["solo"]);
        assert!(matches!(service.create_poll(one_option).await, Err(PollError::Invalid(_))));

        let mut blank_option = create_request("x", None);
        blank_option.options = labels(&["a", " "]);
        assert!(matches!(service.create_poll(blank_option).await, Err(PollError::Invalid(_))));

        let mut bad_link = create_request("x", Some(3));
        bad_link.discord_link = Some("https://example.com/poll".to_string());
        assert!(matches!(service.create_poll(bad_link).await, Err(PollError::Invalid(_))));
    }

    #[tokio::test]
    async fn discord_polls_may_have_no_local_options() {
        let service = service();
        let mut request = create_request("Externa", Some(5));
        request.options = Vec::new();
        request.discord_link = Some("https://discord.com/channels/1234/5678/9012".to_string());

        let poll = service.create_poll(request).await.unwrap();
        assert!(poll.options.is_empty());
        assert_eq!(poll.total_votes, 0);
        assert_eq!(poll.discord_link.as_deref(), Some("https://discord.com/channels/1234/5678/9012"));
    }

    #[tokio::test]
    async fn update_diffs_options_by_position() {
        let service = service();
        let mut request = create_request("Editar", None);
        request.options = labels(&["a", "b", "c"]);
        let poll = service.create_poll(request).await.unwrap();
        service.vote(poll.id, poll.options[0].id).await.unwrap();

        // Shrink: first two relabelled, third dropped, votes kept.
        let updated = service
            .update_poll(poll.id, update_request(Some(labels(&["A", "B"]))))
            .await
            .unwrap();
        assert_eq!(updated.title, "Nuevo");
        assert_eq!(updated.title_en.as_deref(), Some("New"));
        assert_eq!(updated.options.len(), 2);
        assert_eq!(updated.options[0].id, poll.options[0].id);
        assert_eq!(updated.options[0].label, "A");
        assert_eq!(updated.options[0].votes, 1);

        // Grow: new option starts at zero.
        let grown = service
            .update_poll(poll.id, update_request(Some(labels(&["A", "B", "C", "D"]))))
            .await
            .unwrap();
        assert_eq!(grown.options.len(), 4);
        assert_eq!(grown.options[3].label, "D");
        assert_eq!(grown.options[3].votes, 0);

        // No options in the body leaves them alone.
        let same = service.update_poll(poll.id, update_request(None)).await.unwrap();
        assert_eq!(same.options.len(), 4);
    }

    #[tokio::test]
    async fn update_keeps_deadline_unless_cleared() {
        let service = service();
        let deadline = Utc::now() + Duration::days(3);
        let mut request = create_request("Plazo", None);
        request.closes_at = Some(deadline);
        let poll = service.create_poll(request).await.unwrap();

        let kept = service.update_poll(poll.id, update_request(None)).await.unwrap();
        assert_eq!(kept.closes_at, Some(deadline));

        let moved = deadline + Duration::days(1);
        let mut request = update_request(None);
        request.closes_at = Some(Some(moved));
        let rescheduled = service.update_poll(poll.id, request).await.unwrap();
        assert_eq!(rescheduled.closes_at, Some(moved));

        let mut request = update_request(None);
        request.closes_at = Some(None);
        let cleared = service.update_poll(poll.id, request).await.unwrap();
        assert_eq!(cleared.closes_at, None);
        assert_eq!(cleared.closes_in, "Indefinido");
    }

    #[tokio::test]
    async fn update_unknown_poll_is_not_found() {
        let service = service();
        let err = service.update_poll(42, update_request(None)).await.unwrap_err();
        assert!(matches!(err, PollError::PollNotFound));
    }

    #[tokio::test]
    async fn list_normalises_paging() {
        let service = service();
        for i in 0..12 {
            service
                .create_poll(create_request(&format!("P{}", i), Some(i)))
                .await
                .unwrap();
        }
        let first = service.list_polls(0, 0).await.unwrap();
        assert_eq!(first.page, 1);
        assert_eq!(first.data.len(), 1);
        assert_eq!(first.total, 12);
        assert_eq!(first.total_pages, 12);

        let second = service.list_polls(2, 10).await.unwrap();
        assert_eq!(second.data.len(), 2);
        assert_eq!(second.total_pages, 2);
        assert_eq!(second.data[1].title, "P0");
    }

    #[tokio::test]
    async fn close_expired_only_touches_past_deadlines() {
        let service = service();
        let now = Utc::now();

        let mut expired = create_request("Vencida", Some(1));
        expired.closes_at = Some(now - Duration::minutes(5));
        let expired = service.create_poll(expired).await.unwrap();

        let mut open = create_request("Abierta", Some(2));
        open.closes_at = Some(now + Duration::days(2));
        let open = service.create_poll(open).await.unwrap();

        assert_eq!(service.close_expired(now).await.unwrap(), vec![expired.id]);
        assert!(!service.get_poll(expired.id).await.unwrap().is_active);
        assert!(service.get_poll(open.id).await.unwrap().is_active);
    }

    #[test]
    fn discord_link_pattern() {
        assert!(DISCORD_LINK.is_match("https://discord.com/channels/1/2"));
        assert!(DISCORD_LINK.is_match("https://ptb.discord.com/channels/1/2/3"));
        assert!(DISCORD_LINK.is_match("https://discord.gg/minecraft-es"));
        assert!(DISCORD_LINK.is_match("http://discord.com/channels/1/2"));
        assert!(DISCORD_LINK.is_match("discord.gg/abc"));
        assert!(DISCORD_LINK.is_match("discord.com/invite/minecraft-es"));
        assert!(DISCORD_LINK.is_match("https://discord.com/invite/abc?event=123"));
        assert!(DISCORD_LINK.is_match("https://discord.gg/abc?utm_source=site"));
        assert!(!DISCORD_LINK.is_match("https://discord.com.evil.io/channels/1/2"));
        assert!(!DISCORD_LINK.is_match("https://example.com/discord.gg/abc"));
        assert!(!DISCORD_LINK.is_match("ftp://discord.gg/abc"));
        assert!(!DISCORD_LINK.is_match("https://discord.gg/abc def"));
    }
}
