//! Transient Notices
//!
//! Short-lived messages produced by bookmark mutations. A notice is handed
//! to the caller together with its deadline; removing it from the screen
//! once the deadline passes is the caller's job.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::ticker::Symbol;

/// Display time for bookmark add/remove notices.
pub const TOGGLE_NOTICE_TTL: Duration = Duration::from_millis(700);

/// Display time for clear-all notices.
pub const CLEAR_NOTICE_TTL: Duration = Duration::from_secs(1);

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// A symbol was bookmarked.
    BookmarkAdded,
    /// A bookmark was removed.
    BookmarkRemoved,
    /// Clear-all was requested with no bookmarks present.
    NothingToClear,
    /// Every bookmark was removed.
    BookmarksCleared,
}

impl NoticeKind {
    /// User-facing message.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::BookmarkAdded => "Added to bookmarks",
            Self::BookmarkRemoved => "Removed from bookmarks",
            Self::NothingToClear => "No bookmarks to clear",
            Self::BookmarksCleared => "All bookmarks cleared",
        }
    }

    /// How long the notice stays visible.
    #[must_use]
    pub const fn ttl(self) -> Duration {
        match self {
            Self::BookmarkAdded | Self::BookmarkRemoved => TOGGLE_NOTICE_TTL,
            Self::NothingToClear | Self::BookmarksCleared => CLEAR_NOTICE_TTL,
        }
    }
}

/// A notice with its display deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Kind of notice.
    pub kind: NoticeKind,
    /// Symbol the notice refers to, for toggle notices.
    pub symbol: Option<Symbol>,
    /// When the notice was produced.
    pub issued_at: Instant,
    /// When the caller must stop displaying it.
    pub expires_at: Instant,
}

impl Notice {
    /// Issue a notice now.
    #[must_use]
    pub fn issue(kind: NoticeKind, symbol: Option<Symbol>) -> Self {
        let issued_at = Instant::now();
        Self {
            kind,
            symbol,
            issued_at,
            expires_at: issued_at + kind.ttl(),
        }
    }

    /// Notice for a bookmark toggle that left `symbol` in state `bookmarked`.
    #[must_use]
    pub fn toggled(symbol: Symbol, bookmarked: bool) -> Self {
        let kind = if bookmarked {
            NoticeKind::BookmarkAdded
        } else {
            NoticeKind::BookmarkRemoved
        };
        Self::issue(kind, Some(symbol))
    }

    /// User-facing message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        self.kind.message()
    }

    /// Whether the deadline has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Resolves once the deadline passes.
    pub async fn expired(&self) {
        tokio::time::sleep_until(self.expires_at).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_per_kind() {
        assert_eq!(NoticeKind::BookmarkAdded.ttl(), Duration::from_millis(700));
        assert_eq!(NoticeKind::BookmarkRemoved.ttl(), Duration::from_millis(700));
        assert_eq!(NoticeKind::NothingToClear.ttl(), Duration::from_secs(1));
        assert_eq!(NoticeKind::BookmarksCleared.ttl(), Duration::from_secs(1));
    }

    #[test]
    fn add_and_remove_messages_differ() {
        assert_ne!(
            NoticeKind::BookmarkAdded.message(),
            NoticeKind::BookmarkRemoved.message()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn toggled_notice_expires_after_deadline() {
        let notice = Notice::toggled("btc_krw".to_string(), true);
        assert_eq!(notice.kind, NoticeKind::BookmarkAdded);
        assert_eq!(notice.expires_at - notice.issued_at, TOGGLE_NOTICE_TTL);
        assert!(!notice.is_expired_at(Instant::now()));

        tokio::time::advance(Duration::from_millis(699)).await;
        assert!(!notice.is_expired_at(Instant::now()));

        notice.expired().await;
        assert!(notice.is_expired_at(Instant::now()));
        assert_eq!(notice.remaining(), Duration::ZERO);
    }
}
