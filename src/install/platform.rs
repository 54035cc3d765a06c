//! Page-side platform surfaces the install gate talks to.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AuthenticationHint;
use crate::error::Result;

/// The user's answer to the native install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserChoice {
    Accepted,
    Dismissed,
}

/// Single-use capability granted by the platform when install becomes possible.
///
/// [`prompt`](Self::prompt) consumes the signal, so it cannot be invoked twice.
#[async_trait]
pub trait EligibilitySignal: Send + Sync {
    /// Suppresses the platform's own install prompt.
    fn prevent_default(&mut self);

    /// Shows the native install prompt and waits for the user's decision.
    async fn prompt(self: Box<Self>) -> Result<UserChoice>;
}

/// The custom install button.
pub trait Affordance: Send + Sync {
    fn set_visible(&self, visible: bool);
}

/// User-facing messages the gate asks the page to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// Install is on offer.
    InstallAvailable,
    /// The user accepted the native prompt.
    InstallSucceeded,
    /// Install was requested but the app already runs standalone.
    AlreadyInstalled,
    /// Install was requested but the platform is not offering it right now.
    Unavailable,
}

impl Notice {
    /// Default English text for the notice.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InstallAvailable => "Install the app for a better experience!",
            Self::InstallSucceeded => "App installed successfully!",
            Self::AlreadyInstalled => "The app is already installed!",
            Self::Unavailable => "Installation is not available right now. Try again later.",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Everything the gate needs from the page it runs in.
pub trait InstallPlatform: Send + Sync {
    /// Reads the current authentication hint.
    fn auth_hint(&self) -> AuthenticationHint;

    /// Generic `(display-mode: standalone)` media query.
    fn is_display_mode_standalone(&self) -> bool;

    /// Legacy iOS `navigator.standalone` flag.
    fn is_ios_standalone(&self) -> bool;

    /// Looks up the install button by element id.
    fn find_affordance(&self, id: &str) -> Option<Arc<dyn Affordance>>;

    /// Shows a notice.
    fn notify(&self, notice: Notice);

    /// Removes the install-available notice if it is still on screen.
    fn dismiss_notice(&self);
}
