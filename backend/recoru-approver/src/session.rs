// src/session.rs

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Credentials, Timeouts};
use crate::site;
use crate::target_adapter::{
    click_expecting_dialog, AdapterError, DialogPolicy, TargetAdapter, ViewId,
};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Login rejected by the target system: {0}")]
    CredentialsRejected(String),

    #[error("Login failed: landing page did not appear (check contract id, user id and password)")]
    LandingMissing(#[source] AdapterError),

    #[error("Could not sign out the existing session")]
    LogoutFailed(#[source] AdapterError),

    #[error("Browser interaction failed during login")]
    Adapter(#[from] AdapterError),
}

/// A signed-in main view. Dropping it does not close the browser; call
/// [`AuthenticatedSession::teardown`].
pub struct AuthenticatedSession {
    adapter: Arc<dyn TargetAdapter>,
    view: ViewId,
}

impl AuthenticatedSession {
    pub fn view(&self) -> &ViewId {
        &self.view
    }

    pub fn adapter(&self) -> &dyn TargetAdapter {
        self.adapter.as_ref()
    }

    pub async fn teardown(self) {
        if let Err(e) = self.adapter.shutdown().await {
            warn!("Failed to shut the browser session down cleanly: {}", e);
        }
    }
}

pub struct SessionManager {
    adapter: Arc<dyn TargetAdapter>,
    entry_url: String,
    timeouts: Timeouts,
}

impl SessionManager {
    pub fn new(adapter: Arc<dyn TargetAdapter>, entry_url: String, timeouts: Timeouts) -> Self {
        Self {
            adapter,
            entry_url,
            timeouts,
        }
    }

    /// Sign in, clearing any session the browser profile is still holding.
    /// On failure the browser session is torn down before the error is returned.
    pub async fn establish(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthenticatedSession, SessionError> {
        let view = self.adapter.main_view();
        match self.login(&view, credentials).await {
            Ok(()) => Ok(AuthenticatedSession {
                adapter: self.adapter.clone(),
                view,
            }),
            Err(e) => {
                if let Err(shutdown_err) = self.adapter.shutdown().await {
                    warn!(
                        "Failed to shut the browser down after login failure: {}",
                        shutdown_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn login(&self, view: &ViewId, credentials: &Credentials) -> Result<(), SessionError> {
        let adapter = self.adapter.as_ref();
        adapter.goto(view, &self.entry_url).await?;

        let current_url = adapter.current_url(view).await?;
        if current_url.contains(site::LANDING_PATH) {
            warn!("A session is already active in this browser profile. Signing out first.");
            self.logout(view).await.map_err(SessionError::LogoutFailed)?;
            info!("Signed out the existing session.");
        }

        adapter
            .wait_for(view, site::USER_ID_INPUT, self.timeouts.element())
            .await?;
        adapter
            .fill(view, site::CONTRACT_ID_INPUT, &credentials.contract_id)
            .await?;
        adapter
            .fill(view, site::USER_ID_INPUT, &credentials.user_id)
            .await?;
        adapter
            .fill(view, site::SECRET_INPUT, &credentials.secret)
            .await?;

        // Any native dialog during submission is the credential rejection popup.
        let dialog = click_expecting_dialog(
            adapter,
            view,
            site::LOGIN_BUTTON,
            DialogPolicy::Reject,
            self.timeouts.navigation(),
        )
        .await?;
        if let Some(message) = dialog {
            return Err(SessionError::CredentialsRejected(message));
        }

        adapter
            .wait_for(view, site::LANDING_MENU, self.timeouts.element())
            .await
            .map_err(SessionError::LandingMissing)?;
        adapter.click(view, site::LANDING_MENU).await?;
        adapter.settle(view, self.timeouts.navigation()).await?;
        info!("Login succeeded.");
        Ok(())
    }

    async fn logout(&self, view: &ViewId) -> Result<(), AdapterError> {
        let adapter = self.adapter.as_ref();
        adapter.click(view, site::USER_MENU).await?;
        adapter
            .wait_for(view, site::SIGN_OUT, self.timeouts.element())
            .await?;
        adapter.click(view, site::SIGN_OUT).await?;
        adapter
            .wait_for(view, site::USER_ID_INPUT, self.timeouts.navigation())
            .await
    }
}
