// src/enumerator.rs

use tracing::{debug, info, warn};

use crate::config::Timeouts;
use crate::model::{Period, WorkItem};
use crate::session::AuthenticatedSession;
use crate::site;
use crate::target_adapter::{AdapterError, EntryText, TargetAdapter, ViewId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagerState {
    NotStarted,
    OnPage,
    Exhausted,
}

/// Page-by-page staff list for one period. Each call to [`next_batch`]
/// yields the items of one page; the pager only moves on when asked for the
/// next batch, so the caller finishes a page before the UI changes under it.
///
/// [`next_batch`]: WorkItemPages::next_batch
pub struct WorkItemPages<'a> {
    adapter: &'a dyn TargetAdapter,
    view: &'a ViewId,
    date_tag: String,
    filter_identity: Option<String>,
    timeouts: Timeouts,
    max_pages: usize,
    pages_read: usize,
    state: PagerState,
}

impl<'a> WorkItemPages<'a> {
    pub fn new(
        session: &'a AuthenticatedSession,
        period: Period,
        filter_identity: Option<String>,
        timeouts: Timeouts,
        max_pages: usize,
    ) -> Self {
        Self {
            adapter: session.adapter(),
            view: session.view(),
            date_tag: period.date_tag(1),
            filter_identity,
            timeouts,
            max_pages,
            pages_read: 0,
            state: PagerState::NotStarted,
        }
    }

    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// `Ok(None)` once there is no further page.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<WorkItem>>, AdapterError> {
        match self.state {
            PagerState::Exhausted => return Ok(None),
            PagerState::NotStarted => {}
            PagerState::OnPage => {
                if self.pages_read >= self.max_pages {
                    warn!(
                        "Stopping after {} pages (page limit reached).",
                        self.pages_read
                    );
                    self.state = PagerState::Exhausted;
                    return Ok(None);
                }
                if !self.adapter.is_present(self.view, site::NEXT_PAGE).await? {
                    self.state = PagerState::Exhausted;
                    return Ok(None);
                }
                info!("Moving to the next page.");
                self.adapter.click(self.view, site::NEXT_PAGE).await?;
                self.adapter
                    .settle(self.view, self.timeouts.navigation())
                    .await?;
            }
        }

        // Park as exhausted until the page has been read, so a failed read
        // ends the sequence instead of retrying it.
        self.state = PagerState::Exhausted;
        let batch = self.read_page().await?;
        self.pages_read += 1;
        self.state = PagerState::OnPage;
        Ok(Some(batch))
    }

    async fn read_page(&self) -> Result<Vec<WorkItem>, AdapterError> {
        let rows = site::staff_rows(&self.date_tag);
        match self
            .adapter
            .wait_for(self.view, &rows, self.timeouts.navigation())
            .await
        {
            Ok(()) => {}
            Err(AdapterError::Timeout { .. }) => {
                info!("No staff rows tagged {} on this page.", self.date_tag);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        }

        let entries = self
            .adapter
            .read_entries(
                self.view,
                &site::staff_links(&self.date_tag),
                EntryText::Whole,
            )
            .await?;

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.href {
                Some(href) if !href.is_empty() => items.push(WorkItem {
                    identity: entry.text,
                    detail_location: href,
                }),
                _ => warn!("Staff row '{}' has no detail link; skipped.", entry.text),
            }
        }
        let listed = items.len();

        if let Some(identity) = &self.filter_identity {
            items.retain(|item| &item.identity == identity);
        }
        info!(
            "Read {} staff on page {} ({} after filter).",
            listed,
            self.pages_read + 1,
            items.len()
        );
        debug!("Page items: {:?}", items);
        Ok(items)
    }
}
