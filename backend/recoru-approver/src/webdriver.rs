// src/webdriver.rs
//
// `TargetAdapter` over the W3C WebDriver HTTP protocol (msedgedriver or
// chromedriver). Each view is a browser window handle.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{BrowserKind, BrowserSettings, Timeouts};
use crate::target_adapter::{
    AdapterError, DialogPolicy, EntryText, TargetAdapter, UiEntry, ViewId,
};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const UNEXPECTED_ALERT: &str = "unexpected alert open";
const NO_SUCH_ELEMENT: &str = "no such element";
const NO_SUCH_WINDOW: &str = "no such window";
const NO_SUCH_ALERT: &str = "no such alert";
const ESCAPE_KEY: &str = "\u{E00C}";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const READ_ENTRIES_SCRIPT: &str = r#"
var preferSpan = arguments[1];
return Array.from(document.querySelectorAll(arguments[0])).map(function (el) {
  var span = preferSpan ? el.querySelector('span') : null;
  var spanText = span ? span.textContent.trim() : '';
  var link = el.getAttribute('href') ? el : el.querySelector('a[href]');
  return {
    id: el.id || null,
    text: spanText || el.textContent.trim(),
    href: link ? link.href : null
  };
});
"#;

const READ_TEXTS_SCRIPT: &str = r#"
return Array.from(document.querySelectorAll(arguments[0])).map(function (el) {
  return el.innerText.trim();
});
"#;

const CLICK_BY_TEXT_SCRIPT: &str = r#"
var matches = Array.from(document.querySelectorAll(arguments[0]));
for (var i = 0; i < matches.length; i++) {
  if (matches[i].textContent.trim() === arguments[1]) {
    matches[i].click();
    return true;
  }
}
return false;
"#;

const QUIET_SCRIPT: &str = r#"
return document.readyState === 'complete'
  && (typeof jQuery === 'undefined' || jQuery.active === 0);
"#;

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    text: String,
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorValue {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
struct ArmedDialog {
    policy: DialogPolicy,
    seen: Option<String>,
}

#[derive(Debug)]
struct DriverState {
    current_window: String,
    armed: HashMap<ViewId, ArmedDialog>,
}

pub struct WebDriverAdapter {
    http_client: Client,
    session_url: String,
    main_handle: String,
    settle_timeout: Duration,
    poll_interval: Duration,
    state: Mutex<DriverState>,
}

/// Session capabilities for the configured browser. Prompts are left alone
/// by the driver so armed dialog policies decide what happens to them.
pub fn capabilities(settings: &BrowserSettings) -> Value {
    let mut args = vec![
        "--disable-popup-blocking".to_string(),
        "--no-first-run".to_string(),
    ];
    if settings.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(profile) = &settings.profile_path {
        args.push(format!("--user-data-dir={}", profile.display()));
    }
    if let Some(extension) = &settings.extension_path {
        args.push(format!("--load-extension={}", extension.display()));
    }

    let mut options = json!({ "args": args });
    if let Some(binary) = &settings.binary {
        options["binary"] = json!(binary.display().to_string());
    }

    let (browser_name, options_key) = match settings.kind {
        BrowserKind::Chrome => ("chrome", "goog:chromeOptions"),
        BrowserKind::Edge => ("MicrosoftEdge", "ms:edgeOptions"),
    };
    let mut always_match = json!({
        "browserName": browser_name,
        "unhandledPromptBehavior": "ignore",
    });
    always_match[options_key] = options;

    json!({ "capabilities": { "alwaysMatch": always_match } })
}

/// Unwrap a WebDriver response body, turning protocol errors into
/// `AdapterError::WebDriver`.
async fn unwrap_response(response: reqwest::Response) -> Result<Value, AdapterError> {
    let status = response.status();
    let body: Value = response.json().await?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    match serde_json::from_value::<ErrorValue>(value) {
        Ok(err) => Err(AdapterError::WebDriver {
            error: err.error,
            message: err.message,
        }),
        Err(_) => Err(AdapterError::UnexpectedResponse(format!(
            "HTTP {} without error payload",
            status
        ))),
    }
}

fn is_driver_error(result: &Result<Value, AdapterError>, code: &str) -> bool {
    matches!(result, Err(AdapterError::WebDriver { error, .. }) if error == code)
}

fn string_value(value: &Value, what: &str) -> Result<String, AdapterError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AdapterError::UnexpectedResponse(format!("{} is not a string: {}", what, value)))
}

fn element_id(value: &Value) -> Result<String, AdapterError> {
    string_value(&value[ELEMENT_KEY], "element reference")
}

impl WebDriverAdapter {
    /// Start a browser session on the driver at `settings.webdriver_url`.
    pub async fn connect(
        settings: &BrowserSettings,
        timeouts: Timeouts,
    ) -> Result<Self, AdapterError> {
        let base = Url::parse(&settings.webdriver_url)?;
        let http_client = Client::builder().build()?;

        info!(
            "Starting {:?} session via {}",
            settings.kind, settings.webdriver_url
        );
        let response = http_client
            .post(base.join("session")?)
            .header(CONTENT_TYPE, "application/json")
            .json(&capabilities(settings))
            .send()
            .await?;
        let created = unwrap_response(response).await?;
        let session_id = string_value(&created["sessionId"], "sessionId")?;
        let session_url = base.join(&format!("session/{}", session_id))?.to_string();
        debug!("WebDriver session {}", session_id);

        let mut adapter = Self {
            http_client,
            session_url,
            main_handle: String::new(),
            settle_timeout: timeouts.navigation(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(DriverState {
                current_window: String::new(),
                armed: HashMap::new(),
            }),
        };
        let handle = string_value(&adapter.command(Method::GET, "/window", None).await?, "window handle")?;
        adapter.main_handle = handle.clone();
        adapter.state.get_mut().current_window = handle;
        Ok(adapter)
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, AdapterError> {
        let url = format!("{}{}", self.session_url, path);
        debug!("WebDriver {} {}", method, path);
        let mut request = self.http_client.request(method, &url);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").json(&body);
        }
        unwrap_response(request.send().await?).await
    }

    async fn focus(&self, view: &ViewId) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        if state.current_window == view.0 {
            return Ok(());
        }
        let result = self
            .command(Method::POST, "/window", Some(json!({ "handle": view.0 })))
            .await;
        if is_driver_error(&result, NO_SUCH_WINDOW) {
            return Err(AdapterError::UnknownView(view.clone()));
        }
        result?;
        state.current_window = view.0.clone();
        Ok(())
    }

    /// Run a command against `view`. A dialog blocking the command is handled
    /// by the policy armed on that view, after which the command is retried once.
    async fn on_view(
        &self,
        view: &ViewId,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, AdapterError> {
        self.focus(view).await?;
        let result = self.command(method.clone(), path, body.clone()).await;
        if is_driver_error(&result, UNEXPECTED_ALERT) && self.handle_armed_dialog(view).await? {
            return self.command(method, path, body).await;
        }
        result
    }

    /// Returns false when no policy is armed or no dialog is open.
    async fn handle_armed_dialog(&self, view: &ViewId) -> Result<bool, AdapterError> {
        let mut state = self.state.lock().await;
        let Some(armed) = state.armed.get_mut(view) else {
            return Ok(false);
        };

        let text = self.command(Method::GET, "/alert/text", None).await;
        let message = match text {
            Ok(value) => value.as_str().unwrap_or_default().to_string(),
            Err(AdapterError::WebDriver { error, .. }) if error == NO_SUCH_ALERT => {
                return Ok(false)
            }
            Err(e) => return Err(e),
        };

        let endpoint = match armed.policy {
            DialogPolicy::Accept => "/alert/accept",
            DialogPolicy::Reject => "/alert/dismiss",
        };
        self.command(Method::POST, endpoint, Some(json!({}))).await?;
        info!("Handled dialog on {} ({:?}): {}", view, armed.policy, message);
        armed.seen = Some(message);
        Ok(true)
    }

    async fn find_elements(&self, view: &ViewId, selector: &str) -> Result<Vec<String>, AdapterError> {
        let found = self
            .on_view(
                view,
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        found
            .as_array()
            .ok_or_else(|| AdapterError::UnexpectedResponse(format!("elements: {}", found)))?
            .iter()
            .map(element_id)
            .collect()
    }

    async fn find_element(&self, view: &ViewId, selector: &str) -> Result<String, AdapterError> {
        let result = self
            .on_view(
                view,
                Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await;
        if is_driver_error(&result, NO_SUCH_ELEMENT) {
            return Err(AdapterError::ElementNotFound(selector.to_string()));
        }
        element_id(&result?)
    }

    async fn execute(&self, view: &ViewId, script: &str, args: Value) -> Result<Value, AdapterError> {
        self.on_view(
            view,
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }
}

#[async_trait]
impl TargetAdapter for WebDriverAdapter {
    fn main_view(&self) -> ViewId {
        ViewId(self.main_handle.clone())
    }

    async fn goto(&self, view: &ViewId, url: &str) -> Result<(), AdapterError> {
        self.on_view(view, Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        self.settle(view, self.settle_timeout).await
    }

    async fn current_url(&self, view: &ViewId) -> Result<String, AdapterError> {
        let url = self.on_view(view, Method::GET, "/url", None).await?;
        string_value(&url, "current url")
    }

    async fn wait_for(
        &self,
        view: &ViewId,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.find_elements(view, selector).await?.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::Timeout {
                    selector: selector.to_string(),
                    waited: timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn is_present(&self, view: &ViewId, selector: &str) -> Result<bool, AdapterError> {
        Ok(!self.find_elements(view, selector).await?.is_empty())
    }

    async fn is_enabled(&self, view: &ViewId, selector: &str) -> Result<bool, AdapterError> {
        let element = self.find_element(view, selector).await?;
        let enabled = self
            .on_view(view, Method::GET, &format!("/element/{}/enabled", element), None)
            .await?;
        Ok(enabled.as_bool().unwrap_or(false))
    }

    async fn click(&self, view: &ViewId, selector: &str) -> Result<(), AdapterError> {
        let element = self.find_element(view, selector).await?;
        self.on_view(
            view,
            Method::POST,
            &format!("/element/{}/click", element),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn fill(&self, view: &ViewId, selector: &str, value: &str) -> Result<(), AdapterError> {
        let element = self.find_element(view, selector).await?;
        self.on_view(
            view,
            Method::POST,
            &format!("/element/{}/clear", element),
            Some(json!({})),
        )
        .await?;
        self.on_view(
            view,
            Method::POST,
            &format!("/element/{}/value", element),
            Some(json!({ "text": value })),
        )
        .await?;
        Ok(())
    }

    async fn press_escape(&self, view: &ViewId) -> Result<(), AdapterError> {
        let actions = json!({
            "actions": [{
                "type": "key",
                "id": "keyboard",
                "actions": [
                    { "type": "keyDown", "value": ESCAPE_KEY },
                    { "type": "keyUp", "value": ESCAPE_KEY }
                ]
            }]
        });
        self.on_view(view, Method::POST, "/actions", Some(actions))
            .await?;
        Ok(())
    }

    async fn text(&self, view: &ViewId, selector: &str) -> Result<String, AdapterError> {
        let element = self.find_element(view, selector).await?;
        let text = self
            .on_view(view, Method::GET, &format!("/element/{}/text", element), None)
            .await?;
        Ok(string_value(&text, "element text")?.trim().to_string())
    }

    async fn read_entries(
        &self,
        view: &ViewId,
        selector: &str,
        text: EntryText,
    ) -> Result<Vec<UiEntry>, AdapterError> {
        let prefer_span = text == EntryText::SpanLabel;
        let raw = self
            .execute(view, READ_ENTRIES_SCRIPT, json!([selector, prefer_span]))
            .await?;
        let entries: Vec<RawEntry> = serde_json::from_value(raw)?;
        Ok(entries
            .into_iter()
            .map(|e| UiEntry {
                id: e.id.filter(|id| !id.is_empty()),
                text: e.text,
                href: e.href,
            })
            .collect())
    }

    async fn read_texts(
        &self,
        view: &ViewId,
        selector: &str,
    ) -> Result<Vec<String>, AdapterError> {
        let raw = self
            .execute(view, READ_TEXTS_SCRIPT, json!([selector]))
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    async fn click_by_text(
        &self,
        view: &ViewId,
        selector: &str,
        text: &str,
    ) -> Result<bool, AdapterError> {
        let clicked = self
            .execute(view, CLICK_BY_TEXT_SCRIPT, json!([selector, text]))
            .await?;
        Ok(clicked.as_bool().unwrap_or(false))
    }

    /// Quiet means the document is loaded and jQuery has no request in flight,
    /// seen on two consecutive polls.
    async fn settle(&self, view: &ViewId, timeout: Duration) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        let mut quiet_polls = 0;
        loop {
            let quiet = self
                .execute(view, QUIET_SCRIPT, json!([]))
                .await?
                .as_bool()
                .unwrap_or(false);
            quiet_polls = if quiet { quiet_polls + 1 } else { 0 };
            if quiet_polls >= 2 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::SettleTimeout(timeout));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn open_view(&self, url: &str) -> Result<ViewId, AdapterError> {
        let created = self
            .command(Method::POST, "/window/new", Some(json!({ "type": "tab" })))
            .await?;
        let view = ViewId(string_value(&created["handle"], "window handle")?);
        debug!("Opened view {} for {}", view, url);

        if let Err(e) = self.goto(&view, url).await {
            if let Err(close_err) = self.close_view(&view).await {
                warn!("Could not close half-opened view {}: {}", view, close_err);
            }
            return Err(e);
        }
        Ok(view)
    }

    async fn close_view(&self, view: &ViewId) -> Result<(), AdapterError> {
        self.focus(view).await?;
        self.command(Method::DELETE, "/window", None).await?;
        let mut state = self.state.lock().await;
        state.armed.remove(view);
        self.command(
            Method::POST,
            "/window",
            Some(json!({ "handle": self.main_handle })),
        )
        .await?;
        state.current_window = self.main_handle.clone();
        Ok(())
    }

    async fn arm_dialog(&self, view: &ViewId, policy: DialogPolicy) -> Result<(), AdapterError> {
        self.state
            .lock()
            .await
            .armed
            .insert(view.clone(), ArmedDialog { policy, seen: None });
        Ok(())
    }

    async fn disarm_dialog(&self, view: &ViewId) -> Result<Option<String>, AdapterError> {
        // A dialog raised by the last action may still be waiting.
        self.focus(view).await?;
        self.handle_armed_dialog(view).await?;
        let armed = self.state.lock().await.armed.remove(view);
        Ok(armed.and_then(|a| a.seen))
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        let response = self.http_client.delete(&self.session_url).send().await?;
        unwrap_response(response).await?;
        info!("Browser session closed.");
        Ok(())
    }
}
