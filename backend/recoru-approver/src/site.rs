// src/site.rs
//
// Locations and selectors of the Recoru attendance UI.

pub const DEFAULT_ENTRY_URL: &str = "https://app.recoru.in/ap/";
/// Path fragment of the page shown to an already signed-in user.
pub const LANDING_PATH: &str = "/ap/home";

// Login & logout
pub const CONTRACT_ID_INPUT: &str = "#contractId";
pub const USER_ID_INPUT: &str = "#authId";
pub const SECRET_INPUT: &str = "#password";
pub const LOGIN_BUTTON: &str = r#"input[type="button"]"#;
pub const LANDING_MENU: &str = "#m2";
pub const USER_MENU: &str = ".text-overflow-hidden";
pub const SIGN_OUT: &str = ".icon-exit-to-app";

// Department side menu
pub const UNIT_LIST: &str = "#SIDE-MENU li";

pub fn unit_link(entry_id: &str) -> String {
    format!(r#"#SIDE-MENU li[id="{}"] a"#, entry_id)
}

// Calendar control
pub const DISPLAY_DATE: &str = ".acm-displayDate";
pub const CALENDAR_YEAR: &str = ".ui-datepicker-year";
pub const CALENDAR_MONTH: &str = ".ui-datepicker-month";
pub const CALENDAR_PREV: &str = ".ui-datepicker-prev";
pub const CALENDAR_NEXT: &str = ".ui-datepicker-next";
pub const CALENDAR_DAYS: &str = ".ui-datepicker-calendar td a";

// Staff list
pub fn staff_rows(date_tag: &str) -> String {
    format!(r#"tr[class*="{}"]"#, date_tag)
}

pub fn staff_links(date_tag: &str) -> String {
    format!(
        r#"tr[class*="{}"] td.item-userNameAndId a.link"#,
        date_tag
    )
}

pub const NEXT_PAGE: &str = r#"div.pager li[onclick="nextPage();"]"#;

// Staff detail view
pub const CHECK_BUTTON: &str = "#checker";
pub const CHECK_POPUP: &str = ".ui-dialog-content.ui-widget-content";
pub const CHECK_MESSAGES: &str = "div.ui-dialog-content";
pub const APPROVE_CHECKBOX: &str = r#"label[for="CHECKBOX-approved_2"]"#;
pub const COMMIT_BUTTON: &str = "#UPDATE-BTN";
