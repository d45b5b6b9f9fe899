use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Position of a source in its time-ordered, paginated feed
///
/// Both sources return "everything updated at or after `since`" in ascending
/// order. After each page `since` moves up to the newest timestamp on that
/// page, so an item updated while paging moves behind the cursor instead of
/// shifting unseen items onto an already fetched page. `page` only grows
/// while a full page shares the single timestamp `since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCursor {
    pub since: DateTime<Utc>,
    pub page: u32,
}

impl PollCursor {
    /// Cursor for a source that has never been polled
    ///
    /// A `days_back` that reaches before the representable range starts at
    /// the unix epoch.
    pub fn starting(days_back: u32, now: DateTime<Utc>) -> Self {
        let since = ChronoDuration::try_days(i64::from(days_back))
            .and_then(|back| now.checked_sub_signed(back))
            .unwrap_or_default();
        Self { since, page: 1 }
    }

    /// Cursor to request after a page whose newest item is `newest_on_page`
    ///
    /// `since` is inclusive, so items sharing the newest timestamp are
    /// fetched again; upserts absorb the duplicates.
    pub fn after_page(&self, newest_on_page: Option<DateTime<Utc>>, full: bool) -> Self {
        match newest_on_page {
            Some(newest) if newest > self.since => Self {
                since: newest,
                page: 1,
            },
            _ if full => Self {
                since: self.since,
                page: self.page.saturating_add(1),
            },
            _ => Self {
                since: self.since,
                page: 1,
            },
        }
    }
}
