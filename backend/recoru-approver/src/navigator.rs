// src/navigator.rs

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Timeouts;
use crate::model::{Period, UnitChoice};
use crate::session::AuthenticatedSession;
use crate::site;
use crate::target_adapter::{AdapterError, EntryText, TargetAdapter, ViewId};

/// Department menu order of the Recoru tenant this tool was written for.
pub const DEFAULT_UNITS: [&str; 10] = [
    "経営総括部",
    "大阪本社",
    "本社営業部",
    "事業総括部",
    "システム開発1部",
    "システム開発2部",
    "システム開発3部",
    "エンベデッド部",
    "人事DX部",
    "ビジネスサポート部",
];

const UNIT_LINKS: &str = "#SIDE-MENU li a";

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static regex"));

#[derive(Error, Debug)]
pub enum NavigatorError {
    #[error("Calendar could not reach {target}: still showing {displayed} after {steps} steps")]
    PeriodNotReachable {
        target: Period,
        displayed: Period,
        steps: u64,
    },

    #[error("Calendar shows {0} but has no day 1 to select")]
    FirstDayMissing(Period),

    #[error("Could not read the calendar header: '{0}'")]
    UnreadableCalendar(String),

    #[error("Browser interaction failed while navigating")]
    Adapter(#[from] AdapterError),
}

// --- Unit Catalog ---

/// Ordinal-to-name mapping used for the operator menu and the name fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCatalog {
    names: Vec<String>,
}

impl Default for UnitCatalog {
    fn default() -> Self {
        Self::from_names(DEFAULT_UNITS.iter().map(|s| s.to_string()).collect())
    }
}

impl UnitCatalog {
    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// The choice for a 1-based ordinal. Ordinals past the catalog still make a
    /// choice, just without a mapped name.
    pub fn choice(&self, ordinal: usize) -> UnitChoice {
        let mapped_name = ordinal
            .checked_sub(1)
            .and_then(|i| self.names.get(i))
            .cloned();
        UnitChoice {
            ordinal,
            mapped_name,
        }
    }
}

/// How (and whether) a department ended up selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSelection {
    ByOrdinal(String),
    ByName(String),
    NotSelected,
}

impl UnitSelection {
    pub fn selected_name(&self) -> Option<&str> {
        match self {
            UnitSelection::ByOrdinal(name) | UnitSelection::ByName(name) => Some(name),
            UnitSelection::NotSelected => None,
        }
    }
}

// --- Navigator ---

pub struct Navigator<'a> {
    adapter: &'a dyn TargetAdapter,
    view: &'a ViewId,
    timeouts: Timeouts,
}

impl<'a> Navigator<'a> {
    pub fn new(session: &'a AuthenticatedSession, timeouts: Timeouts) -> Self {
        Self {
            adapter: session.adapter(),
            view: session.view(),
            timeouts,
        }
    }

    /// Select by menu position first; fall back to the mapped name only when
    /// one exists. When both fail nothing is selected and the run carries on
    /// against whatever department the page already shows.
    pub async fn select_unit(&self, choice: &UnitChoice) -> UnitSelection {
        match self.select_unit_by_ordinal(choice.ordinal).await {
            Ok(Some(label)) => return UnitSelection::ByOrdinal(label),
            Ok(None) => {}
            Err(e) => warn!("Selecting department #{} failed: {}", choice.ordinal, e),
        }

        let Some(name) = choice.mapped_name.as_deref() else {
            warn!(
                "Department #{} could not be selected and has no mapped name; continuing without a department selection.",
                choice.ordinal
            );
            return UnitSelection::NotSelected;
        };

        match self.select_unit_by_name(name).await {
            Ok(true) => UnitSelection::ByName(name.to_string()),
            Ok(false) => {
                warn!("Department '{}' not found in the side menu.", name);
                UnitSelection::NotSelected
            }
            Err(e) => {
                warn!("Selecting department '{}' by name failed: {}", name, e);
                UnitSelection::NotSelected
            }
        }
    }

    /// Returns the selected entry's label, or `None` when the ordinal is out of
    /// range or its entry has no clickable link.
    pub async fn select_unit_by_ordinal(
        &self,
        ordinal: usize,
    ) -> Result<Option<String>, AdapterError> {
        self.adapter
            .wait_for(self.view, site::UNIT_LIST, self.timeouts.element())
            .await?;
        let entries = self
            .adapter
            .read_entries(self.view, site::UNIT_LIST, EntryText::SpanLabel)
            .await?;

        let Some(entry) = ordinal.checked_sub(1).and_then(|i| entries.get(i)) else {
            warn!(
                "Department number {} is out of range (menu has {} entries).",
                ordinal,
                entries.len()
            );
            return Ok(None);
        };

        let Some(entry_id) = entry.id.as_deref().filter(|id| !id.is_empty()) else {
            warn!("Department entry #{} has no id to click.", ordinal);
            return Ok(None);
        };

        let link = site::unit_link(entry_id);
        if !self.adapter.is_present(self.view, &link).await? {
            warn!("Department entry #{} has no link.", ordinal);
            return Ok(None);
        }

        self.adapter.click(self.view, &link).await?;
        self.adapter
            .settle(self.view, self.timeouts.navigation())
            .await?;
        info!("Selected department '{}'.", entry.text);
        Ok(Some(entry.text.clone()))
    }

    pub async fn select_unit_by_name(&self, name: &str) -> Result<bool, AdapterError> {
        self.adapter
            .wait_for(self.view, site::UNIT_LIST, self.timeouts.element())
            .await?;
        let entries = self
            .adapter
            .read_entries(self.view, site::UNIT_LIST, EntryText::SpanLabel)
            .await?;

        let Some(entry) = entries.iter().find(|e| e.text == name) else {
            return Ok(false);
        };

        let clicked = match entry.id.as_deref().filter(|id| !id.is_empty()) {
            Some(entry_id) => {
                let link = site::unit_link(entry_id);
                if self.adapter.is_present(self.view, &link).await? {
                    self.adapter.click(self.view, &link).await?;
                    true
                } else {
                    false
                }
            }
            None => self.adapter.click_by_text(self.view, UNIT_LINKS, name).await?,
        };

        if clicked {
            self.adapter
                .settle(self.view, self.timeouts.navigation())
                .await?;
            info!("Selected department '{}' by name.", name);
        }
        Ok(clicked)
    }

    /// Step the calendar one month at a time until it shows `target`, then
    /// pick day 1. The step budget is the initial distance, so a control that
    /// stops moving ends in `PeriodNotReachable` instead of spinning forever.
    pub async fn seek_period(&self, target: Period) -> Result<(), NavigatorError> {
        self.adapter
            .wait_for(self.view, site::DISPLAY_DATE, self.timeouts.navigation())
            .await?;
        self.adapter.click(self.view, site::DISPLAY_DATE).await?;
        self.adapter
            .wait_for(self.view, site::CALENDAR_YEAR, self.timeouts.element())
            .await?;

        let mut displayed = self.displayed_period().await?;
        let budget = displayed.months_until(&target).unsigned_abs();
        let mut steps = 0u64;
        debug!(
            "Calendar shows {}, target {} ({} steps)",
            displayed, target, budget
        );

        while displayed != target {
            if steps >= budget {
                return Err(NavigatorError::PeriodNotReachable {
                    target,
                    displayed,
                    steps,
                });
            }
            let control = if displayed > target {
                site::CALENDAR_PREV
            } else {
                site::CALENDAR_NEXT
            };
            self.adapter.click(self.view, control).await?;
            self.adapter
                .settle(self.view, self.timeouts.element())
                .await?;
            steps += 1;
            displayed = self.displayed_period().await?;
        }

        if !self
            .adapter
            .click_by_text(self.view, site::CALENDAR_DAYS, "1")
            .await?
        {
            return Err(NavigatorError::FirstDayMissing(target));
        }
        self.adapter
            .settle(self.view, self.timeouts.navigation())
            .await?;
        info!("Selected {} 1日.", target);
        Ok(())
    }

    async fn displayed_period(&self) -> Result<Period, NavigatorError> {
        let year_text = self.adapter.text(self.view, site::CALENDAR_YEAR).await?;
        let month_text = self.adapter.text(self.view, site::CALENDAR_MONTH).await?;
        let year = parse_number(&year_text)?;
        let month = parse_number(&month_text)?;
        Period::new(year, month as u32)
            .map_err(|_| NavigatorError::UnreadableCalendar(format!("{} {}", year_text, month_text)))
    }
}

/// First run of digits in a header such as `2025` or `7月`.
fn parse_number(text: &str) -> Result<i32, NavigatorError> {
    DIGITS
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| NavigatorError::UnreadableCalendar(text.to_string()))
}
