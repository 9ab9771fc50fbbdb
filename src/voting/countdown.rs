use chrono::{DateTime, Duration, Utc};

/// Coarse time left before a poll's `closes_at`, as shown next to the poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Indefinite,
    Finished,
    Days(i64),
    Hours(i64),
}

impl Countdown {
    pub fn until(closes_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(closes_at) = closes_at else {
            return Countdown::Indefinite;
        };

        let remaining = closes_at - now;
        if remaining <= Duration::zero() {
            return Countdown::Finished;
        }

        let days = remaining.num_days();
        if days > 0 {
            Countdown::Days(days)
        } else {
            Countdown::Hours(remaining.num_hours())
        }
    }

    /// Spanish rendering, the site's primary language.
    pub fn spanish(&self) -> String {
        match *self {
            Countdown::Indefinite => "Indefinido".to_string(),
            Countdown::Finished => "Finalizada".to_string(),
            Countdown::Days(1) => "1 día".to_string(),
            Countdown::Days(days) => format!("{} días", days),
            Countdown::Hours(1) => "1 hora".to_string(),
            Countdown::Hours(hours) => format!("{} horas", hours),
        }
    }

    pub fn english(&self) -> String {
        match *self {
            Countdown::Indefinite => "Indefinite".to_string(),
            Countdown::Finished => "Closed".to_string(),
            Countdown::Days(1) => "1 day".to_string(),
            Countdown::Days(days) => format!("{} days", days),
            Countdown::Hours(1) => "1 hour".to_string(),
            Countdown::Hours(hours) => format!("{} hours", hours),
        }
    }
}
