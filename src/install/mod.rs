//! Install gate: offers the platform's "add to home screen" flow only to
//! logged-in users, behind a custom button.
//!
//! One [`InstallGate`] is constructed per page load and owns everything the
//! page-level event handlers share: the retained eligibility signal, the
//! install button and the current [`GateState`].

mod auth;
mod platform;

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::config::GateConfig;

pub use auth::AuthenticationHint;
pub use platform::{Affordance, EligibilitySignal, InstallPlatform, Notice, UserChoice};

/// Install gate states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "choice")]
pub enum GateState {
    /// No signal retained.
    Idle,
    /// The page is not logged in; install is never offered on this page load.
    Disabled,
    /// A signal is retained and the button is shown.
    PromptAvailable,
    /// The native prompt is on screen.
    Prompting,
    /// The last prompt finished. Behaves like `Idle`.
    Resolved(UserChoice),
    /// The page already runs as an installed app.
    AlreadyInstalled,
}

/// What the gate did with an eligibility signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    /// Native prompt suppressed, signal retained for the custom button.
    Deferred,
    /// Signal dropped; the platform's default flow proceeds.
    PassedThrough,
}

/// Result of an install request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Accepted,
    Dismissed,
    /// No signal retained and the page already runs standalone.
    AlreadyInstalled,
    /// No signal retained; install is not on offer right now.
    Unavailable,
    /// A prompt from an earlier request is still on screen.
    InProgress,
}

impl From<UserChoice> for InstallOutcome {
    fn from(choice: UserChoice) -> Self {
        match choice {
            UserChoice::Accepted => Self::Accepted,
            UserChoice::Dismissed => Self::Dismissed,
        }
    }
}

struct GateInner {
    state: GateState,
    signal: Option<Box<dyn EligibilitySignal>>,
    affordance: Option<Arc<dyn Affordance>>,
}

impl GateInner {
    fn show_affordance(&self, visible: bool) {
        if let Some(button) = &self.affordance {
            button.set_visible(visible);
        }
    }
}

/// Install-prompt manager for one page load.
pub struct InstallGate<P: InstallPlatform> {
    platform: P,
    config: GateConfig,
    inner: Mutex<GateInner>,
}

impl<P: InstallPlatform> InstallGate<P> {
    /// Creates a gate in the `Idle` state.
    pub fn new(platform: P, config: GateConfig) -> Self {
        Self {
            platform,
            config,
            inner: Mutex::new(GateInner {
                state: GateState::Idle,
                signal: None,
                affordance: None,
            }),
        }
    }

    /// Returns the platform the gate runs on.
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// Returns the current state.
    pub fn state(&self) -> GateState {
        self.lock().state
    }

    /// Returns true while a signal is retained.
    pub fn has_signal(&self) -> bool {
        self.lock().signal.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn is_authenticated(&self) -> bool {
        self.platform
            .auth_hint()
            .is_authenticated(&self.config.session_cookie)
    }

    /// True if the page runs in standalone display mode (generic or legacy iOS).
    pub fn is_installed(&self) -> bool {
        self.platform.is_display_mode_standalone() || self.platform.is_ios_standalone()
    }

    /// Page-load initialization.
    ///
    /// Not logged in: the gate is disabled for this page load. Already
    /// installed: the button stays hidden. Otherwise the button is bound and
    /// kept hidden until a signal arrives (or shown, if one already did).
    pub fn on_page_load(&self) -> GateState {
        if !self.is_authenticated() {
            log::info!("Not logged in, install prompt disabled");
            let mut inner = self.lock();
            inner.signal = None;
            inner.state = GateState::Disabled;
            return inner.state;
        }

        if self.is_installed() {
            log::info!("App already installed");
            let affordance = self.platform.find_affordance(&self.config.affordance_id);
            let mut inner = self.lock();
            inner.affordance = affordance;
            inner.signal = None;
            inner.show_affordance(false);
            inner.state = GateState::AlreadyInstalled;
            return inner.state;
        }

        let affordance = self.platform.find_affordance(&self.config.affordance_id);
        if affordance.is_none() {
            log::debug!("No #{} element, install runs without a button", self.config.affordance_id);
        }
        let mut inner = self.lock();
        inner.affordance = affordance;
        inner.show_affordance(inner.state == GateState::PromptAvailable);
        log::debug!("Install gate initialized");
        inner.state
    }

    /// Handles the platform's install-eligibility signal.
    pub fn on_eligibility_signal(&self, mut signal: Box<dyn EligibilitySignal>) -> SignalDisposition {
        if !self.is_authenticated() {
            log::info!("Not logged in, leaving install prompt to the platform");
            return SignalDisposition::PassedThrough;
        }

        {
            let mut inner = self.lock();
            match inner.state {
                GateState::Disabled | GateState::AlreadyInstalled | GateState::Prompting => {
                    return SignalDisposition::PassedThrough;
                }
                GateState::Idle | GateState::PromptAvailable | GateState::Resolved(_) => {}
            }

            signal.prevent_default();
            inner.signal = Some(signal);
            inner.state = GateState::PromptAvailable;
            inner.show_affordance(true);
        }

        log::info!("Install prompt deferred");
        self.platform.notify(Notice::InstallAvailable);
        SignalDisposition::Deferred
    }

    /// Runs the native install prompt from the custom button.
    ///
    /// Never fails. Without a retained signal it reports whether the app is
    /// already installed or simply not on offer; a second click while the
    /// prompt is open reports `InProgress`.
    pub async fn request_install(&self) -> InstallOutcome {
        let signal = {
            let mut inner = self.lock();
            if inner.state == GateState::Prompting {
                return InstallOutcome::InProgress;
            }
            let retained = inner.signal.take();
            if retained.is_some() {
                inner.state = GateState::Prompting;
            }
            retained
        };
        let Some(signal) = signal else {
            return self.not_offerable();
        };

        let choice = match signal.prompt().await {
            Ok(choice) => choice,
            Err(e) => {
                log::warn!("Install prompt failed: {e}");
                UserChoice::Dismissed
            }
        };
        log::info!("Install prompt outcome: {choice:?}");

        {
            let mut inner = self.lock();
            // An installed event may have landed while the prompt was open.
            if inner.state == GateState::Prompting {
                inner.state = GateState::Resolved(choice);
            }
            inner.show_affordance(false);
        }
        self.platform.dismiss_notice();
        if choice == UserChoice::Accepted {
            self.platform.notify(Notice::InstallSucceeded);
        }
        choice.into()
    }

    fn not_offerable(&self) -> InstallOutcome {
        log::info!("No install prompt available");
        if self.is_installed() {
            self.platform.notify(Notice::AlreadyInstalled);
            InstallOutcome::AlreadyInstalled
        } else {
            self.platform.notify(Notice::Unavailable);
            InstallOutcome::Unavailable
        }
    }

    /// Handles the platform's app-installed event. Idempotent.
    ///
    /// `Disabled` and `AlreadyInstalled` hold for the rest of the page load.
    pub fn on_installed_event(&self) {
        log::info!("App installed");
        {
            let mut inner = self.lock();
            inner.signal = None;
            inner.show_affordance(false);
            if !matches!(inner.state, GateState::Disabled | GateState::AlreadyInstalled) {
                inner.state = GateState::Idle;
            }
        }
        self.platform.dismiss_notice();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{FakePage, FakeSignal};

    fn gate(page: FakePage) -> InstallGate<FakePage> {
        InstallGate::new(page, GateConfig::default())
    }

    #[test]
    fn logged_out_signal_is_passed_through() {
        let gate = gate(FakePage::with_button(false));
        assert_eq!(gate.on_page_load(), GateState::Disabled);

        let (signal, trace) = FakeSignal::answering(UserChoice::Accepted);
        assert_eq!(gate.on_eligibility_signal(signal), SignalDisposition::PassedThrough);

        assert!(!trace.prevented.load(Ordering::SeqCst));
        assert!(!gate.has_signal());
        assert!(!gate.platform().button_visible());
        assert!(gate.platform().notices().is_empty());
    }

    #[test]
    fn missing_auth_hint_fails_closed() {
        let page = FakePage::with_button(true);
        *page.flag.lock().unwrap() = None;
        let gate = gate(page);

        let (signal, trace) = FakeSignal::answering(UserChoice::Accepted);
        assert_eq!(gate.on_eligibility_signal(signal), SignalDisposition::PassedThrough);
        assert!(!trace.prevented.load(Ordering::SeqCst));
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn session_cookie_enables_gate_without_flag() {
        let page = FakePage::with_button(true);
        *page.flag.lock().unwrap() = None;
        *page.cookies.lock().unwrap() = "sessionid=abc".to_string();
        let gate = gate(page);

        assert_eq!(gate.on_page_load(), GateState::Idle);
        let (signal, _) = FakeSignal::answering(UserChoice::Dismissed);
        assert_eq!(gate.on_eligibility_signal(signal), SignalDisposition::Deferred);
    }

    #[tokio::test]
    async fn accepted_install_shows_success_and_discards_signal() {
        let gate = gate(FakePage::with_button(true));
        gate.on_page_load();
        assert!(!gate.platform().button_visible());

        let (signal, trace) = FakeSignal::answering(UserChoice::Accepted);
        assert_eq!(gate.on_eligibility_signal(signal), SignalDisposition::Deferred);
        assert!(trace.prevented.load(Ordering::SeqCst));
        assert_eq!(gate.state(), GateState::PromptAvailable);
        assert!(gate.platform().button_visible());

        assert_eq!(gate.request_install().await, InstallOutcome::Accepted);

        assert_eq!(trace.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(gate.state(), GateState::Resolved(UserChoice::Accepted));
        assert!(!gate.has_signal());
        assert!(!gate.platform().button_visible());
        assert_eq!(
            gate.platform().notices(),
            vec![Notice::InstallAvailable, Notice::InstallSucceeded]
        );
        assert_eq!(gate.platform().dismissals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dismissed_install_hides_button_without_success() {
        let gate = gate(FakePage::with_button(true));
        gate.on_page_load();
        let (signal, _) = FakeSignal::answering(UserChoice::Dismissed);
        gate.on_eligibility_signal(signal);

        assert_eq!(gate.request_install().await, InstallOutcome::Dismissed);
        assert!(!gate.platform().button_visible());
        assert!(!gate.platform().notices().contains(&Notice::InstallSucceeded));
    }

    #[tokio::test]
    async fn second_request_does_not_prompt_again() {
        let gate = gate(FakePage::with_button(true));
        gate.on_page_load();
        let (signal, trace) = FakeSignal::answering(UserChoice::Dismissed);
        gate.on_eligibility_signal(signal);

        gate.request_install().await;
        assert_eq!(gate.request_install().await, InstallOutcome::Unavailable);

        assert_eq!(trace.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(gate.platform().notices().last(), Some(&Notice::Unavailable));
    }

    #[tokio::test]
    async fn double_click_while_prompting_is_in_progress() {
        let gate = gate(FakePage::with_button(true));
        gate.on_page_load();
        let (signal, trace) = FakeSignal::answering(UserChoice::Accepted);
        gate.on_eligibility_signal(signal);

        let (first, second) = tokio::join!(gate.request_install(), gate.request_install());

        assert_eq!(first, InstallOutcome::Accepted);
        assert_eq!(second, InstallOutcome::InProgress);
        assert_eq!(trace.prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_without_signal_reports_already_installed() {
        let page = FakePage::with_button(true);
        page.ios_standalone.store(true, Ordering::SeqCst);
        let gate = gate(page);

        assert_eq!(gate.request_install().await, InstallOutcome::AlreadyInstalled);
        assert_eq!(gate.platform().notices(), vec![Notice::AlreadyInstalled]);
    }

    #[tokio::test]
    async fn prompt_failure_is_absorbed() {
        let gate = gate(FakePage::with_button(true));
        gate.on_page_load();
        let (signal, _) = FakeSignal::failing();
        gate.on_eligibility_signal(signal);

        assert_eq!(gate.request_install().await, InstallOutcome::Dismissed);
        assert!(!gate.has_signal());
        assert!(!gate.platform().button_visible());
    }

    #[test]
    fn installed_page_stays_hidden() {
        let page = FakePage::with_button(true);
        page.standalone.store(true, Ordering::SeqCst);
        let gate = gate(page);

        assert!(gate.is_installed());
        assert_eq!(gate.on_page_load(), GateState::AlreadyInstalled);

        let (signal, trace) = FakeSignal::answering(UserChoice::Accepted);
        assert_eq!(gate.on_eligibility_signal(signal), SignalDisposition::PassedThrough);
        assert!(!trace.prevented.load(Ordering::SeqCst));
        assert!(!gate.platform().button_visible());
    }

    #[test]
    fn installed_event_clears_signal_and_is_idempotent() {
        let gate = gate(FakePage::with_button(true));
        gate.on_page_load();
        let (signal, _) = FakeSignal::answering(UserChoice::Accepted);
        gate.on_eligibility_signal(signal);

        gate.on_installed_event();
        gate.on_installed_event();

        assert_eq!(gate.state(), GateState::Idle);
        assert!(!gate.has_signal());
        assert!(!gate.platform().button_visible());
        assert_eq!(gate.platform().dismissals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn installed_event_keeps_already_installed_terminal() {
        let page = FakePage::with_button(true);
        page.standalone.store(true, Ordering::SeqCst);
        let gate = gate(page);
        assert_eq!(gate.on_page_load(), GateState::AlreadyInstalled);

        gate.on_installed_event();
        assert_eq!(gate.state(), GateState::AlreadyInstalled);

        let (signal, trace) = FakeSignal::answering(UserChoice::Accepted);
        assert_eq!(gate.on_eligibility_signal(signal), SignalDisposition::PassedThrough);
        assert!(!trace.prevented.load(Ordering::SeqCst));
        assert!(!gate.platform().button_visible());
    }

    #[test]
    fn signal_before_page_load_shows_button_once_bound() {
        let gate = gate(FakePage::with_button(true));
        let (signal, _) = FakeSignal::answering(UserChoice::Accepted);
        gate.on_eligibility_signal(signal);
        assert!(!gate.platform().button_visible());

        assert_eq!(gate.on_page_load(), GateState::PromptAvailable);
        assert!(gate.platform().button_visible());
    }

    #[tokio::test]
    async fn missing_button_does_not_break_install() {
        let gate = gate(FakePage::without_button(true));
        assert_eq!(gate.on_page_load(), GateState::Idle);
        let (signal, trace) = FakeSignal::answering(UserChoice::Accepted);

        assert_eq!(gate.on_eligibility_signal(signal), SignalDisposition::Deferred);
        assert_eq!(gate.request_install().await, InstallOutcome::Accepted);
        assert_eq!(trace.prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_signal_after_resolution_is_offered_again() {
        let gate = gate(FakePage::with_button(true));
        gate.on_page_load();
        let (first, _) = FakeSignal::answering(UserChoice::Dismissed);
        gate.on_eligibility_signal(first);
        gate.request_install().await;

        let (second, trace) = FakeSignal::answering(UserChoice::Accepted);
        assert_eq!(gate.on_eligibility_signal(second), SignalDisposition::Deferred);
        assert_eq!(gate.request_install().await, InstallOutcome::Accepted);
        assert_eq!(trace.prompts.load(Ordering::SeqCst), 1);
    }
}
