use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info};
use tokio::time::{interval, MissedTickBehavior};

use crate::service::PollService;

/// Periodically closes active polls whose `closes_at` has passed.
pub async fn close_expired_polls_task(polls: Arc<PollService>, period: Duration) {
    info!("Starting background task to close expired polls every {}s.", period.as_secs());
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let now = Utc::now();
        debug!("Checking for expired polls at {}", now.to_rfc3339());

        match polls.close_expired(now).await {
            Ok(closed) if closed.is_empty() => {}
            Ok(closed) => info!("Closed {} expired poll(s): {:?}", closed.len(), closed),
            Err(e) => error!("Failed to close expired polls: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::CreatePollRequest;
    use crate::models::OptionInput;
    use crate::translate::Passthrough;

    #[tokio::test(start_paused = true)]
    async fn sweep_closes_polls_past_deadline() {
        let polls = Arc::new(PollService::new(Arc::new(MemoryStore::new()), Arc::new(Passthrough), "en"));
        let poll = polls
            .create_poll(CreatePollRequest {
                title: "Vieja".to_string(),
                title_en: None,
                question: "¿Sigue?".to_string(),
                question_en: None,
                options: vec![OptionInput::Label("Sí".to_string()), OptionInput::Label("No".to_string())],
                closes_at: Some(Utc::now() - chrono::Duration::hours(1)),
                thread_id: None,
                discord_link: None,
            })
            .await
            .unwrap();

        let task = tokio::spawn(close_expired_polls_task(polls.clone(), Duration::from_secs(60)));
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.abort();

        assert!(polls.active_poll().await.unwrap().is_none());
        assert!(!polls.get_poll(poll.id).await.unwrap().is_active);
    }
}
