//! Resumable paging over an upstream "modified since" stream.
//!
//! The pager never calls upstream itself. The caller asks for the next
//! [`Since`] bound, fetches the page, lets the pager classify it with
//! [`CursorPager::observe`], persists the page and only then calls
//! [`CursorPager::commit`]. A crash between persisting and committing makes the
//! next run re-fetch the same page, which is safe because pages re-apply
//! idempotently.

use tracing::debug;

use crate::collections::CheckpointKey;
use crate::config::PagerSettings;
use crate::contract::{CursorPage, DocumentStore, Since};
use crate::error::StoreError;
use crate::store::Checkpoints;

/// What the caller should do with the page it just fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page was empty: nothing to persist, the stream is drained.
    Exhausted,
    /// Data arrived with a blank continuation. Process it, but do not persist
    /// it through the checkpointed path and do not advance; the next run
    /// resumes from the last committed cursor.
    Final,
    /// Persist the page, then [`CursorPager::commit`] the carried cursor.
    Continue(String),
}

#[derive(Debug)]
pub struct CursorPager {
    key: CheckpointKey,
    settings: PagerSettings,
    cursor: Option<String>,
    finished: bool,
    pages: usize,
}

impl CursorPager {
    /// Loads the last committed cursor for `key`, if any.
    pub async fn resume<S>(
        checkpoints: &Checkpoints<'_, S>,
        key: CheckpointKey,
        settings: PagerSettings,
    ) -> Result<Self, StoreError>
    where
        S: DocumentStore + ?Sized,
    {
        let cursor = checkpoints.cursor(&key).await?;
        debug!(
            checkpoint = %key,
            bootstrap = cursor.is_none(),
            "Resuming cursor pager"
        );
        Ok(Self {
            key,
            settings,
            cursor,
            finished: false,
            pages: 0,
        })
    }

    /// Bound and page size for the next request, or `None` once finished.
    pub fn request(&self) -> Option<(Since, u32)> {
        if self.finished {
            return None;
        }
        Some(match &self.cursor {
            Some(cursor) => (Since::Cursor(cursor.clone()), self.settings.page_count()),
            None => (
                Since::Timestamp(self.settings.bootstrap_since.clone()),
                self.settings.bootstrap_count(),
            ),
        })
    }

    pub fn observe(&mut self, page: &CursorPage) -> PageOutcome {
        self.pages += 1;
        if page.items.is_empty() {
            self.finished = true;
            return PageOutcome::Exhausted;
        }
        if page.next_cursor.is_empty() {
            self.finished = true;
            return PageOutcome::Final;
        }
        PageOutcome::Continue(page.next_cursor.clone())
    }

    /// Records `cursor` durably; call only after the page it follows was persisted.
    pub async fn commit<S>(
        &mut self,
        checkpoints: &Checkpoints<'_, S>,
        cursor: String,
    ) -> Result<(), StoreError>
    where
        S: DocumentStore + ?Sized,
    {
        checkpoints.set_cursor(&self.key, &cursor).await?;
        debug!(checkpoint = %self.key, page = self.pages, "Committed cursor");
        self.cursor = Some(cursor);
        Ok(())
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn key(&self) -> &CheckpointKey {
        &self.key
    }

    pub fn pages_seen(&self) -> usize {
        self.pages
    }
}
