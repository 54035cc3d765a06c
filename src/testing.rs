//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::error::{Error, Result};
use crate::http::{ShellRequest, ShellResponse};
use crate::install::{Affordance, AuthenticationHint, EligibilitySignal, InstallPlatform, Notice, UserChoice};
use crate::network::Network;
use crate::worker::{CacheVersion, Clients};

/// Scope every test worker runs under.
pub fn scope() -> Url {
    Url::parse("https://games.test/").unwrap()
}

/// A network with canned responses keyed by absolute URL and an offline switch.
///
/// Unknown URLs answer `404`.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, ShellResponse>>,
    offline: AtomicBool,
    requests: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `response` for `path`, resolved against [`scope`] unless already absolute.
    pub fn serve(&self, path: &str, response: ShellResponse) {
        let url = scope().join(path).unwrap();
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &ShellRequest) -> Result<ShellResponse> {
        self.requests.lock().unwrap().push(request.url().to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".to_string()));
        }
        let routes = self.routes.lock().unwrap();
        Ok(routes
            .get(request.url().as_str())
            .cloned()
            .unwrap_or_else(|| ShellResponse::plain_text(StatusCode::NOT_FOUND, "not found")))
    }
}

/// Client set with a fixed number of open pages.
#[derive(Debug)]
pub struct CountingClients {
    open: usize,
    claimed_by: Mutex<Option<CacheVersion>>,
}

impl CountingClients {
    pub fn new(open: usize) -> Self {
        Self {
            open,
            claimed_by: Mutex::new(None),
        }
    }

    pub fn claimed_by(&self) -> Option<CacheVersion> {
        self.claimed_by.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clients for CountingClients {
    async fn claim(&self, version: &CacheVersion) -> usize {
        *self.claimed_by.lock().unwrap() = Some(version.clone());
        self.open
    }
}

/// Affordance that records its visibility.
#[derive(Debug, Default)]
pub struct FakeButton {
    visible: AtomicBool,
}

impl FakeButton {
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

impl Affordance for FakeButton {
    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }
}

/// Page platform whose auth hint, display mode and affordance are set by the test.
#[derive(Debug, Default)]
pub struct FakePage {
    pub flag: Mutex<Option<bool>>,
    pub cookies: Mutex<String>,
    pub standalone: AtomicBool,
    pub ios_standalone: AtomicBool,
    pub button: Option<Arc<FakeButton>>,
    pub notices: Mutex<Vec<Notice>>,
    pub dismissals: AtomicUsize,
}

impl FakePage {
    /// A page with the install button present and the given login flag.
    pub fn with_button(logged_in: bool) -> Self {
        Self {
            flag: Mutex::new(Some(logged_in)),
            button: Some(Arc::new(FakeButton::default())),
            ..Self::default()
        }
    }

    /// A page without the install button.
    pub fn without_button(logged_in: bool) -> Self {
        Self {
            flag: Mutex::new(Some(logged_in)),
            ..Self::default()
        }
    }

    pub fn button_visible(&self) -> bool {
        self.button.as_ref().is_some_and(|b| b.is_visible())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl InstallPlatform for FakePage {
    fn auth_hint(&self) -> AuthenticationHint {
        AuthenticationHint::new(*self.flag.lock().unwrap(), self.cookies.lock().unwrap().clone())
    }

    fn is_display_mode_standalone(&self) -> bool {
        self.standalone.load(Ordering::SeqCst)
    }

    fn is_ios_standalone(&self) -> bool {
        self.ios_standalone.load(Ordering::SeqCst)
    }

    fn find_affordance(&self, _id: &str) -> Option<Arc<dyn Affordance>> {
        self.button.clone().map(|b| b as Arc<dyn Affordance>)
    }

    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn dismiss_notice(&self) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared counters observed after the signal itself has been moved into the gate.
#[derive(Debug, Default)]
pub struct SignalTrace {
    pub prevented: AtomicBool,
    pub prompts: AtomicUsize,
}

/// Eligibility signal answering with a fixed choice.
#[derive(Debug)]
pub struct FakeSignal {
    choice: Option<UserChoice>,
    trace: Arc<SignalTrace>,
}

impl FakeSignal {
    /// A signal whose prompt resolves to `choice`.
    pub fn answering(choice: UserChoice) -> (Box<Self>, Arc<SignalTrace>) {
        let trace = Arc::new(SignalTrace::default());
        let signal = Box::new(Self {
            choice: Some(choice),
            trace: Arc::clone(&trace),
        });
        (signal, trace)
    }

    /// A signal whose prompt fails on the platform side.
    pub fn failing() -> (Box<Self>, Arc<SignalTrace>) {
        let trace = Arc::new(SignalTrace::default());
        let signal = Box::new(Self {
            choice: None,
            trace: Arc::clone(&trace),
        });
        (signal, trace)
    }
}

#[async_trait]
impl EligibilitySignal for FakeSignal {
    fn prevent_default(&mut self) {
        self.trace.prevented.store(true, Ordering::SeqCst);
    }

    async fn prompt(self: Box<Self>) -> Result<UserChoice> {
        self.trace.prompts.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.choice
            .ok_or_else(|| Error::Platform("prompt() rejected".to_string()))
    }
}
