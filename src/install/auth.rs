//! Client-side login detection.
//!
//! This is advisory only: both inputs live in the page and can be forged. It
//! decides whether to offer install, never whether to grant access.

/// Authentication signal read from the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationHint {
    /// Flag injected by the server-rendered template, if any.
    flag: Option<bool>,
    /// Raw `document.cookie` string.
    cookies: String,
}

impl AuthenticationHint {
    #[must_use]
    pub fn new(flag: Option<bool>, cookies: impl Into<String>) -> Self {
        Self {
            flag,
            cookies: cookies.into(),
        }
    }

    /// Hint with no flag and no cookies. Never authenticated.
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// Returns true when the page looks logged in.
    ///
    /// An injected flag is authoritative. Without one, the presence of
    /// `session_cookie` counts as logged in. A present-but-expired cookie still
    /// passes; the server is the only one that can tell.
    #[must_use]
    pub fn is_authenticated(&self, session_cookie: &str) -> bool {
        if let Some(flag) = self.flag {
            return flag;
        }
        !session_cookie.is_empty() && self.has_cookie(session_cookie)
    }

    fn has_cookie(&self, name: &str) -> bool {
        self.cookies
            .split(';')
            .map(|pair| pair.trim().split_once('=').map_or(pair.trim(), |(n, _)| n))
            .any(|n| n == name)
    }
}
