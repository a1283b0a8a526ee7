// src/fake_site.rs
//
// In-memory stand-in for the Recoru UI, driven through `TargetAdapter`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::model::Period;
use crate::navigator::DEFAULT_UNITS;
use crate::site;
use crate::target_adapter::{
    AdapterError, DialogPolicy, EntryText, TargetAdapter, UiEntry, ViewId,
};

const BASE_URL: &str = "https://fake.recoru.test";
pub const ENTRY_URL: &str = "https://fake.recoru.test/ap/";
const MAIN_VIEW: &str = "main";
const UNIT_LINKS: &str = "#SIDE-MENU li a";

/// Where a staff member's detail view stops cooperating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Open,
    CheckButton,
    Popup,
    ApproveCheckbox,
    CommitButton,
}

#[derive(Debug, Clone)]
pub struct FakeStaff {
    name: String,
    messages: Vec<String>,
    fail_at: Option<FailPoint>,
    commit_disabled: bool,
    escape_fails: bool,
    stall: Option<Duration>,
    commit_confirm: Option<String>,
}

impl FakeStaff {
    pub fn clean(name: &str) -> Self {
        Self::with_messages(name, &["エラーはありません。"])
    }

    pub fn with_messages(name: &str, messages: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            messages: messages.iter().map(|m| m.to_string()).collect(),
            fail_at: None,
            commit_disabled: false,
            escape_fails: false,
            stall: None,
            commit_confirm: None,
        }
    }

    pub fn failing_at(mut self, point: FailPoint) -> Self {
        self.fail_at = Some(point);
        self
    }

    pub fn with_disabled_commit(mut self) -> Self {
        self.commit_disabled = true;
        self
    }

    pub fn escape_fails(mut self) -> Self {
        self.escape_fails = true;
        self
    }

    /// The check button takes `delay` to appear.
    pub fn stalls(mut self, delay: Duration) -> Self {
        self.stall = Some(delay);
        self
    }

    /// Committing raises a native confirm with `message`.
    pub fn confirms_commit(mut self, message: &str) -> Self {
        self.commit_confirm = Some(message.to_string());
        self
    }

    fn fails_at(&self, point: FailPoint) -> bool {
        self.fail_at == Some(point)
    }
}

#[derive(Debug)]
struct DetailView {
    staff: FakeStaff,
    popup_open: bool,
    approval_marked: bool,
}

#[derive(Debug, Clone)]
enum LoginBehaviour {
    Accept,
    Reject(String),
    Ignore,
}

#[derive(Debug)]
struct State {
    login: LoginBehaviour,
    already_signed_in: bool,
    sign_out_missing: bool,
    signed_in: bool,
    main_url: String,
    user_menu_open: bool,
    units: Vec<String>,
    selected_unit: Option<String>,
    unit_list_reads: usize,
    calendar: Period,
    calendar_floor: Period,
    calendar_ceiling: Period,
    calendar_open: bool,
    calendar_steps: usize,
    selected_day: Option<Period>,
    pages: Vec<Vec<FakeStaff>>,
    current_page: usize,
    views: HashMap<ViewId, DetailView>,
    next_view: usize,
    opened_views: Vec<ViewId>,
    closed_views: Vec<ViewId>,
    armed: HashMap<ViewId, (DialogPolicy, Option<String>)>,
    commit_clicks: Vec<String>,
    shutdowns: usize,
    events: Vec<String>,
}

pub struct FakeSite {
    state: Mutex<State>,
}

impl FakeSite {
    pub fn new() -> Self {
        let today = Period {
            year: 2025,
            month: 8,
        };
        Self {
            state: Mutex::new(State {
                login: LoginBehaviour::Accept,
                already_signed_in: false,
                sign_out_missing: false,
                signed_in: false,
                main_url: String::new(),
                user_menu_open: false,
                units: DEFAULT_UNITS.iter().map(|u| u.to_string()).collect(),
                selected_unit: None,
                unit_list_reads: 0,
                calendar: today,
                calendar_floor: Period::EARLIEST,
                calendar_ceiling: today,
                calendar_open: false,
                calendar_steps: 0,
                selected_day: None,
                pages: Vec::new(),
                current_page: 0,
                views: HashMap::new(),
                next_view: 1,
                opened_views: Vec::new(),
                closed_views: Vec::new(),
                armed: HashMap::new(),
                commit_clicks: Vec::new(),
                shutdowns: 0,
                events: Vec::new(),
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut State)) -> Self {
        f(self.state.get_mut().unwrap());
        self
    }

    pub fn with_units(self, units: &[&str]) -> Self {
        self.configure(|s| s.units = units.iter().map(|u| u.to_string()).collect())
    }

    pub fn with_calendar(self, shown: Period) -> Self {
        self.configure(|s| {
            s.calendar = shown;
            s.calendar_ceiling = s.calendar_ceiling.max(shown);
        })
    }

    /// The previous-month control stops working below `floor`.
    pub fn with_calendar_floor(self, floor: Period) -> Self {
        self.configure(|s| s.calendar_floor = floor)
    }

    pub fn with_staff_pages(self, pages: Vec<Vec<FakeStaff>>) -> Self {
        self.configure(|s| s.pages = pages)
    }

    pub fn already_signed_in(self) -> Self {
        self.configure(|s| s.already_signed_in = true)
    }

    /// The user menu opens but never offers the sign-out control.
    pub fn without_sign_out(self) -> Self {
        self.configure(|s| s.sign_out_missing = true)
    }

    pub fn rejecting_login(self, message: &str) -> Self {
        self.configure(|s| s.login = LoginBehaviour::Reject(message.to_string()))
    }

    /// Login submits without a dialog but never reaches the landing page.
    pub fn silently_failing_login(self) -> Self {
        self.configure(|s| s.login = LoginBehaviour::Ignore)
    }

    pub fn entry_url(&self) -> String {
        ENTRY_URL.to_string()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn selected_unit(&self) -> Option<String> {
        self.lock().selected_unit.clone()
    }

    pub fn unit_list_reads(&self) -> usize {
        self.lock().unit_list_reads
    }

    pub fn calendar_steps(&self) -> usize {
        self.lock().calendar_steps
    }

    pub fn selected_day(&self) -> Option<Period> {
        self.lock().selected_day
    }

    /// Zero-based index of the staff page on display.
    pub fn current_page(&self) -> usize {
        self.lock().current_page
    }

    pub fn commit_clicks(&self) -> Vec<String> {
        self.lock().commit_clicks.clone()
    }

    pub fn opened_views(&self) -> Vec<ViewId> {
        self.lock().opened_views.clone()
    }

    pub fn closed_views(&self) -> Vec<ViewId> {
        self.lock().closed_views.clone()
    }

    pub fn open_view_count(&self) -> usize {
        self.lock().views.len()
    }

    pub fn shutdown_count(&self) -> usize {
        self.lock().shutdowns
    }

    /// Coarse log of session-level actions: `logout`, `login`, `shutdown`.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }
}

pub fn detail_href(page: usize, index: usize) -> String {
    format!("{}/ap/attendance/{}/{}", BASE_URL, page, index)
}

fn unit_id(position: usize) -> String {
    format!("busho-{}", position + 1)
}

impl State {
    fn is_main(view: &ViewId) -> bool {
        view.0 == MAIN_VIEW
    }

    fn check_view(&self, view: &ViewId) -> Result<(), AdapterError> {
        if Self::is_main(view) || self.views.contains_key(view) {
            Ok(())
        } else {
            Err(AdapterError::UnknownView(view.clone()))
        }
    }

    fn staff_tag(&self) -> Option<String> {
        self.selected_day.map(|p| p.date_tag(1))
    }

    fn page_has_staff(&self) -> bool {
        self.pages
            .get(self.current_page)
            .map_or(false, |page| !page.is_empty())
    }

    fn unit_position_for_link(&self, selector: &str) -> Option<usize> {
        (0..self.units.len()).find(|&i| site::unit_link(&unit_id(i)) == selector)
    }

    fn present(&self, view: &ViewId, selector: &str) -> Result<bool, AdapterError> {
        self.check_view(view)?;
        if let Some(detail) = self.views.get(view) {
            let staff = &detail.staff;
            return Ok(match selector {
                site::CHECK_BUTTON => !staff.fails_at(FailPoint::CheckButton),
                site::CHECK_POPUP | site::CHECK_MESSAGES => {
                    detail.popup_open && !staff.fails_at(FailPoint::Popup)
                }
                site::APPROVE_CHECKBOX => !staff.fails_at(FailPoint::ApproveCheckbox),
                site::COMMIT_BUTTON => !staff.fails_at(FailPoint::CommitButton),
                _ => false,
            });
        }

        let signed_in = self.signed_in;
        let present = match selector {
            site::USER_ID_INPUT | site::CONTRACT_ID_INPUT | site::SECRET_INPUT => !signed_in,
            site::LOGIN_BUTTON => !signed_in,
            site::LANDING_MENU | site::USER_MENU | site::DISPLAY_DATE => signed_in,
            site::SIGN_OUT => signed_in && self.user_menu_open && !self.sign_out_missing,
            site::UNIT_LIST | UNIT_LINKS => signed_in && !self.units.is_empty(),
            site::CALENDAR_YEAR | site::CALENDAR_MONTH | site::CALENDAR_PREV
            | site::CALENDAR_NEXT | site::CALENDAR_DAYS => signed_in && self.calendar_open,
            site::NEXT_PAGE => {
                self.selected_day.is_some() && self.current_page + 1 < self.pages.len()
            }
            other => match self.staff_tag() {
                Some(tag)
                    if other == site::staff_rows(&tag) || other == site::staff_links(&tag) =>
                {
                    self.page_has_staff()
                }
                _ => signed_in && self.unit_position_for_link(other).is_some(),
            },
        };
        Ok(present)
    }

    fn require(&self, view: &ViewId, selector: &str) -> Result<(), AdapterError> {
        if self.present(view, selector)? {
            Ok(())
        } else {
            Err(AdapterError::ElementNotFound(selector.to_string()))
        }
    }

    /// Route a dialog through the policy armed on `view`. An unarmed dialog
    /// blocks the page, which the driver reports as an error.
    fn raise_dialog(&mut self, view: &ViewId, message: &str) -> Result<(), AdapterError> {
        match self.armed.get_mut(view) {
            Some((_, seen)) => {
                *seen = Some(message.to_string());
                Ok(())
            }
            None => Err(AdapterError::WebDriver {
                error: "unexpected alert open".to_string(),
                message: message.to_string(),
            }),
        }
    }

    fn click_main(&mut self, view: &ViewId, selector: &str) -> Result<(), AdapterError> {
        match selector {
            site::LOGIN_BUTTON => {
                self.events.push("login".to_string());
                match self.login.clone() {
                    LoginBehaviour::Accept => {
                        self.signed_in = true;
                        self.main_url = format!("{}{}", BASE_URL, site::LANDING_PATH);
                    }
                    LoginBehaviour::Reject(message) => self.raise_dialog(view, &message)?,
                    LoginBehaviour::Ignore => {}
                }
            }
            site::USER_MENU => self.user_menu_open = true,
            site::SIGN_OUT => {
                self.events.push("logout".to_string());
                self.signed_in = false;
                self.user_menu_open = false;
                self.main_url = format!("{}/ap/", BASE_URL);
            }
            site::DISPLAY_DATE => self.calendar_open = true,
            site::CALENDAR_PREV => {
                self.calendar_steps += 1;
                if self.calendar > self.calendar_floor {
                    self.calendar = self.calendar.previous();
                }
            }
            site::CALENDAR_NEXT => {
                self.calendar_steps += 1;
                if self.calendar < self.calendar_ceiling {
                    self.calendar = self.calendar.next();
                }
            }
            site::NEXT_PAGE => self.current_page += 1,
            site::LANDING_MENU => {}
            other => {
                if let Some(position) = self.unit_position_for_link(other) {
                    self.select_unit_at(position);
                }
            }
        }
        Ok(())
    }

    fn click_detail(&mut self, view: &ViewId, selector: &str) -> Result<(), AdapterError> {
        let detail = self
            .views
            .get_mut(view)
            .ok_or_else(|| AdapterError::UnknownView(view.clone()))?;
        match selector {
            site::CHECK_BUTTON => detail.popup_open = true,
            site::APPROVE_CHECKBOX => detail.approval_marked = true,
            site::COMMIT_BUTTON => {
                let name = detail.staff.name.clone();
                let confirm = detail.staff.commit_confirm.clone();
                self.commit_clicks.push(name);
                if let Some(message) = confirm {
                    self.raise_dialog(view, &message)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn select_unit_at(&mut self, position: usize) {
        self.selected_unit = self.units.get(position).cloned();
        self.current_page = 0;
    }
}

#[async_trait]
impl TargetAdapter for FakeSite {
    fn main_view(&self) -> ViewId {
        ViewId(MAIN_VIEW.to_string())
    }

    async fn goto(&self, view: &ViewId, url: &str) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.check_view(view)?;
        if url == ENTRY_URL && state.already_signed_in {
            state.already_signed_in = false;
            state.signed_in = true;
            state.main_url = format!("{}{}", BASE_URL, site::LANDING_PATH);
        } else {
            state.main_url = url.to_string();
        }
        Ok(())
    }

    async fn current_url(&self, view: &ViewId) -> Result<String, AdapterError> {
        let state = self.lock();
        state.check_view(view)?;
        Ok(state.main_url.clone())
    }

    async fn wait_for(
        &self,
        view: &ViewId,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let stall = {
            let state = self.lock();
            state
                .views
                .get(view)
                .filter(|_| selector == site::CHECK_BUTTON)
                .and_then(|d| d.staff.stall)
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        if self.lock().present(view, selector)? {
            Ok(())
        } else {
            Err(AdapterError::Timeout {
                selector: selector.to_string(),
                waited: timeout,
            })
        }
    }

    async fn is_present(&self, view: &ViewId, selector: &str) -> Result<bool, AdapterError> {
        self.lock().present(view, selector)
    }

    async fn is_enabled(&self, view: &ViewId, selector: &str) -> Result<bool, AdapterError> {
        let state = self.lock();
        state.require(view, selector)?;
        Ok(match state.views.get(view) {
            Some(detail) if selector == site::COMMIT_BUTTON => {
                detail.approval_marked && !detail.staff.commit_disabled
            }
            _ => true,
        })
    }

    async fn click(&self, view: &ViewId, selector: &str) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.require(view, selector)?;
        if State::is_main(view) {
            state.click_main(view, selector)
        } else {
            state.click_detail(view, selector)
        }
    }

    async fn fill(&self, view: &ViewId, selector: &str, _value: &str) -> Result<(), AdapterError> {
        self.lock().require(view, selector)
    }

    async fn press_escape(&self, view: &ViewId) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.check_view(view)?;
        if let Some(detail) = state.views.get_mut(view) {
            if detail.staff.escape_fails {
                return Err(AdapterError::WebDriver {
                    error: "element not interactable".to_string(),
                    message: "popup refused the key".to_string(),
                });
            }
            detail.popup_open = false;
        }
        Ok(())
    }

    async fn text(&self, view: &ViewId, selector: &str) -> Result<String, AdapterError> {
        let state = self.lock();
        state.require(view, selector)?;
        match selector {
            site::CALENDAR_YEAR => Ok(state.calendar.year.to_string()),
            site::CALENDAR_MONTH => Ok(format!("{}月", state.calendar.month)),
            _ => Ok(String::new()),
        }
    }

    async fn read_entries(
        &self,
        view: &ViewId,
        selector: &str,
        _text: EntryText,
    ) -> Result<Vec<UiEntry>, AdapterError> {
        let mut state = self.lock();
        if !state.present(view, selector)? || state.views.contains_key(view) {
            return Ok(Vec::new());
        }

        if selector == site::UNIT_LIST {
            state.unit_list_reads += 1;
            return Ok(state
                .units
                .iter()
                .enumerate()
                .map(|(i, name)| UiEntry {
                    id: Some(unit_id(i)),
                    text: name.clone(),
                    href: Some("#".to_string()),
                })
                .collect());
        }

        if let Some(tag) = state.staff_tag() {
            if selector == site::staff_links(&tag) {
                let page = state.current_page;
                return Ok(state.pages[page]
                    .iter()
                    .enumerate()
                    .map(|(i, staff)| UiEntry {
                        id: None,
                        text: staff.name.clone(),
                        href: Some(detail_href(page, i)),
                    })
                    .collect());
            }
        }
        Ok(Vec::new())
    }

    async fn read_texts(
        &self,
        view: &ViewId,
        selector: &str,
    ) -> Result<Vec<String>, AdapterError> {
        let state = self.lock();
        if !state.present(view, selector)? {
            return Ok(Vec::new());
        }
        Ok(match state.views.get(view) {
            Some(detail) if selector == site::CHECK_MESSAGES => detail.staff.messages.clone(),
            _ => Vec::new(),
        })
    }

    async fn click_by_text(
        &self,
        view: &ViewId,
        selector: &str,
        text: &str,
    ) -> Result<bool, AdapterError> {
        let mut state = self.lock();
        if !state.present(view, selector)? {
            return Ok(false);
        }
        match selector {
            site::CALENDAR_DAYS if text == "1" => {
                state.selected_day = Some(state.calendar);
                state.calendar_open = false;
                state.current_page = 0;
                Ok(true)
            }
            UNIT_LINKS => match state.units.iter().position(|u| u == text) {
                Some(position) => {
                    state.select_unit_at(position);
                    Ok(true)
                }
                None => Ok(false),
            },
            _ => Ok(false),
        }
    }

    async fn settle(&self, view: &ViewId, _timeout: Duration) -> Result<(), AdapterError> {
        self.lock().check_view(view)
    }

    async fn open_view(&self, url: &str) -> Result<ViewId, AdapterError> {
        let mut state = self.lock();
        let staff = state
            .pages
            .iter()
            .enumerate()
            .flat_map(|(p, page)| {
                page.iter()
                    .enumerate()
                    .map(move |(i, staff)| (detail_href(p, i), staff))
            })
            .find(|(href, _)| href == url)
            .map(|(_, staff)| staff.clone())
            .ok_or_else(|| AdapterError::UnexpectedResponse(format!("no page at {}", url)))?;
        if staff.fails_at(FailPoint::Open) {
            return Err(AdapterError::WebDriver {
                error: "no such window".to_string(),
                message: "new window could not be created".to_string(),
            });
        }

        let view = ViewId(format!("detail-{}", state.next_view));
        state.next_view += 1;
        state.views.insert(
            view.clone(),
            DetailView {
                staff,
                popup_open: false,
                approval_marked: false,
            },
        );
        state.opened_views.push(view.clone());
        Ok(view)
    }

    async fn close_view(&self, view: &ViewId) -> Result<(), AdapterError> {
        let mut state = self.lock();
        match state.views.remove(view) {
            Some(_) => {
                state.armed.remove(view);
                state.closed_views.push(view.clone());
                Ok(())
            }
            None => Err(AdapterError::UnknownView(view.clone())),
        }
    }

    async fn arm_dialog(&self, view: &ViewId, policy: DialogPolicy) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.check_view(view)?;
        state.armed.insert(view.clone(), (policy, None));
        Ok(())
    }

    async fn disarm_dialog(&self, view: &ViewId) -> Result<Option<String>, AdapterError> {
        let mut state = self.lock();
        state.check_view(view)?;
        Ok(state.armed.remove(view).and_then(|(_, seen)| seen))
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.shutdowns += 1;
        state.events.push("shutdown".to_string());
        Ok(())
    }
}
