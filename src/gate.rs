//! The service object a page constructs once and drives for its lifetime.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::auth::AuthProvider;
use crate::calendar::Calendar;
use crate::config::Config;
use crate::error::Result;
use crate::events::{EventBus, GateEvent};
use crate::inactivity::{Activity, InactivityMonitor};
use crate::ledger::{CoinOutcome, CurrencyLedger};
use crate::reconcile::{Reconciled, ReconciliationEngine};
use crate::remote::ProfileStore;
use crate::reward::{self, RewardFlow};
use crate::session::{Availability, SessionManager};
use crate::state::{GameState, SharedState, UserIdentity};
use crate::store::{DeviceMode, LocalStore};
use crate::sync::{SyncOutcome, SyncScheduler};
use crate::ticker::{self, TickOutcome, TickerPhase};
use crate::zoom::ZoomControl;

/// Below this many seconds the timer is shown as running low.
const LOW_TIME_SECS: u64 = 60;

/// Controls for the loops that live as long as the page.
struct BackgroundTasks {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn stop(self) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles {
            handle.abort();
        }
    }
}

pub struct PlaytimeGate {
    config: Config,
    store: LocalStore,
    calendar: Arc<dyn Calendar>,
    events: EventBus,
    state: SharedState,
    session: SessionManager,
    engine: ReconciliationEngine,
    sync: Arc<SyncScheduler>,
    ledger: CurrencyLedger,
    reward: RewardFlow,
    zoom: Mutex<ZoomControl>,
    background: Mutex<Option<BackgroundTasks>>,
    ticker_task: Mutex<Option<JoinHandle<()>>>,
    inactivity: Mutex<Option<InactivityMonitor>>,
    this: Weak<PlaytimeGate>,
}

impl PlaytimeGate {
    pub fn new(
        config: Config,
        store: LocalStore,
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileStore>,
        calendar: Arc<dyn Calendar>,
    ) -> Arc<Self> {
        let limits = config.limits();
        let events = EventBus::new();
        let state = SharedState::new(GameState::new(calendar.today(), &limits));

        let session = SessionManager::new(auth, Arc::clone(&profiles), store.clone());
        let engine = ReconciliationEngine::new(
            store.clone(),
            Arc::clone(&profiles),
            Arc::clone(&calendar),
            limits,
            config.reconcile_policy,
        );
        let sync = Arc::new(SyncScheduler::new(
            state.clone(),
            store.clone(),
            profiles,
            Arc::clone(&calendar),
            events.clone(),
        ));
        let ledger = CurrencyLedger::new(limits.daily_coin_cap);
        let reward = RewardFlow::new(config.ad_duration(), config.ad_reward_secs);
        let zoom = Mutex::new(ZoomControl::load(store.clone()));

        Arc::new_cyclic(|this| Self {
            config,
            store,
            calendar,
            events,
            state,
            session,
            engine,
            sync,
            ledger,
            reward,
            zoom,
            background: Mutex::new(None),
            ticker_task: Mutex::new(None),
            inactivity: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Page load: restore the session, reconcile state, and start the loops.
    pub async fn initialize(&self) -> Result<Reconciled> {
        log::info!("Initializing playtime gate");

        if let Some(user) = self.session.restore().await {
            self.state.lock().user = Some(user);
        }

        let reconciled = self.load().await?;
        self.start_background();

        if let Some(mode) = self.store.device_mode() {
            log::info!("Device mode '{}' already chosen, starting timer", mode.as_str());
            self.start_ticker();
        }

        let user = self.current_user();
        if user.is_some() {
            self.start_inactivity();
        }
        self.events.emit(GateEvent::AuthStateChanged {
            authenticated: user.is_some(),
            username: user.map(|u| u.username),
        });
        self.events.emit(GateEvent::ZoomChanged {
            level: self.zoom_level(),
        });

        Ok(reconciled)
    }

    /// Reconcile local and remote state and adopt the result.
    pub async fn load(&self) -> Result<Reconciled> {
        let user = self.current_user();
        let reconciled = self.engine.load(user.as_ref()).await?;

        {
            let mut state = self.state.lock();
            state.clock = reconciled.clock;
            state.currency = reconciled.currency;
            state.remote_detached = false;

            // Only slices the remote copy already holds start out clean.
            if reconciled.clock_pending {
                state.clock_sync.mark_dirty();
            } else {
                let rev = state.clock_sync.revision();
                state.clock_sync.confirm(rev);
            }
            if reconciled.currency_pending {
                state.currency_sync.mark_dirty();
            } else {
                let rev = state.currency_sync.revision();
                state.currency_sync.confirm(rev);
            }

            if state.ticker == TickerPhase::Expired && state.clock.remaining_seconds > 0 {
                state.ticker = TickerPhase::Running;
                self.events.emit(GateEvent::PromptDismissed);
            }
        }

        self.emit_clock();
        self.emit_coins(false);

        if reconciled.force_sync && user.is_some() {
            if let Err(e) = self.sync.save_local() {
                log::warn!("Failed to save reset state locally: {}", e);
            }
            if let Err(e) = self.sync.flush(true).await {
                log::warn!("Forced sync after load failed: {}", e);
            }
        }

        Ok(reconciled)
    }

    fn start_background(&self) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handles = vec![
            self.sync
                .spawn_periodic(self.config.sync_interval(), stop_rx.clone()),
            self.sync
                .spawn_local_saver(self.config.save_interval(), stop_rx.clone()),
            self.sync.spawn_storage_observer(self.store.watch(), stop_rx),
        ];

        let previous = self
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(BackgroundTasks { stop_tx, handles });
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    // ---- countdown ------------------------------------------------------

    /// The session-start signal: remember the device mode and start counting.
    pub fn select_device_mode(&self, mode: DeviceMode) -> Result<()> {
        self.store.set_device_mode(mode)?;
        log::info!("Device mode '{}' selected", mode.as_str());
        self.start_ticker();
        Ok(())
    }

    /// Start (or restart) the one-second countdown
    pub fn start_ticker(&self) {
        ticker::start(&mut self.state.lock());

        let state = self.state.clone();
        let sync = Arc::clone(&self.sync);
        let calendar = Arc::clone(&self.calendar);
        let events = self.events.clone();
        let limits = self.config.limits();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // Skip the first tick (immediate fire)
            interval.tick().await;

            loop {
                interval.tick().await;

                let outcome = ticker::tick(&mut state.lock(), calendar.today(), &limits);
                match outcome {
                    TickOutcome::Idle | TickOutcome::StillExpired => {}
                    TickOutcome::Counted { remaining } => {
                        events.emit(GateEvent::TimerTick {
                            remaining,
                            low: remaining < LOW_TIME_SECS,
                        });
                    }
                    TickOutcome::Expired => {
                        log::info!("[Ticker] Time's up");
                        if let Err(e) = sync.save_local() {
                            log::warn!("[Ticker] Failed to save expired clock: {}", e);
                        }
                        events.emit(GateEvent::TimerTick {
                            remaining: 0,
                            low: true,
                        });
                        events.emit(GateEvent::TimeUp);
                    }
                    TickOutcome::DayRolledOver { remaining } => {
                        log::info!("[Ticker] New day detected, playtime reset to {}s", remaining);
                        if let Err(e) = sync.save_local() {
                            log::warn!("[Ticker] Failed to save daily reset: {}", e);
                        }
                        events.emit(GateEvent::PromptDismissed);
                        events.emit(GateEvent::TimerTick {
                            remaining,
                            low: remaining < LOW_TIME_SECS,
                        });
                        let currency = state.lock().currency;
                        events.emit(GateEvent::CoinsUpdated {
                            coins: currency.coins,
                            daily_earned: currency.daily_earned,
                            highlight: false,
                        });

                        let sync = Arc::clone(&sync);
                        tokio::spawn(async move {
                            if let Err(e) = sync.flush(true).await {
                                log::warn!("[Ticker] Sync after daily reset failed: {}", e);
                            }
                        });
                    }
                }
            }
        });

        let previous = self
            .ticker_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    // ---- reward ---------------------------------------------------------

    /// Play the reward ad. Time is credited only if it runs to the end.
    pub fn watch_ad(&self) {
        let state = self.state.clone();
        let sync = Arc::clone(&self.sync);
        let events = self.events.clone();
        let bonus = self.reward.bonus();

        self.reward.start(self.events.clone(), move || {
            let remaining = reward::credit(&mut state.lock(), bonus);
            if let Err(e) = sync.save_local() {
                log::warn!("[Reward] Failed to save credited time: {}", e);
            }
            events.emit(GateEvent::AdFinished {
                credited: bonus,
                remaining,
            });
            events.emit(GateEvent::PromptDismissed);
            events.emit(GateEvent::TimerTick {
                remaining,
                low: remaining < LOW_TIME_SECS,
            });
        });
    }

    /// Close the ad before it finishes
    pub fn dismiss_ad(&self) {
        if self.reward.cancel() {
            self.events.emit(GateEvent::AdCancelled);
        }
    }

    pub fn is_ad_playing(&self) -> bool {
        self.reward.is_playing()
    }

    // ---- coins ----------------------------------------------------------

    pub fn add_coins(&self, amount: u64) -> CoinOutcome {
        let outcome = self.ledger.add_coins(&mut self.state.lock(), amount);
        if let CoinOutcome::Credited { amount, .. } = outcome {
            if amount > 0 {
                self.save_local_quietly();
                self.emit_coins(true);
            }
        }
        outcome
    }

    pub fn reset_daily_coins(&self) {
        self.ledger.reset_daily(&mut self.state.lock());
        self.save_local_quietly();
        self.emit_coins(false);
    }

    // ---- zoom -----------------------------------------------------------

    pub fn zoom_level(&self) -> f64 {
        self.zoom.lock().unwrap_or_else(|e| e.into_inner()).level()
    }

    pub fn zoom_in(&self) -> Result<f64> {
        let level = self.zoom.lock().unwrap_or_else(|e| e.into_inner()).zoom_in()?;
        self.events.emit(GateEvent::ZoomChanged { level });
        Ok(level)
    }

    pub fn zoom_out(&self) -> Result<f64> {
        let level = self.zoom.lock().unwrap_or_else(|e| e.into_inner()).zoom_out()?;
        self.events.emit(GateEvent::ZoomChanged { level });
        Ok(level)
    }

    // ---- session --------------------------------------------------------

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.state.lock().user.clone()
    }

    pub async fn check_username(&self, username: &str) -> Availability {
        self.session.check_username(username).await
    }

    pub async fn check_email(&self, email: &str) -> Availability {
        self.session.check_email(email).await
    }

    pub async fn sign_up(&self, username: &str, email: &str, password: &str) -> Result<UserIdentity> {
        let identity = self.session.sign_up(username, email, password).await?;
        self.adopt_user(identity.clone()).await;
        Ok(identity)
    }

    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<UserIdentity> {
        let identity = self.session.sign_in(identifier, password).await?;
        self.adopt_user(identity.clone()).await;
        Ok(identity)
    }

    async fn adopt_user(&self, identity: UserIdentity) {
        {
            let mut state = self.state.lock();
            state.user = Some(identity.clone());
            state.remote_detached = false;
        }
        if let Err(e) = self.load().await {
            log::warn!("Failed to load state after sign-in: {}", e);
        }
        self.start_inactivity();
        self.events.emit(GateEvent::AuthStateChanged {
            authenticated: true,
            username: Some(identity.username),
        });
    }

    /// Record player input for the idle timer. Returns false when ignored.
    pub fn record_activity(&self, activity: Activity) -> bool {
        self.inactivity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|monitor| monitor.record(activity))
    }

    fn start_inactivity(&self) {
        if !self.store.is_logged_in() {
            return;
        }

        let gate = self.this.clone();
        let monitor = InactivityMonitor::spawn(
            self.config.inactivity_limit(),
            self.config.activity_debounce(),
            move || async move {
                let Some(gate) = gate.upgrade() else { return };
                // Logout stops this monitor, so it runs on its own task.
                tokio::spawn(async move {
                    if let Err(e) = gate.logout().await {
                        log::error!("Idle logout failed: {}", e);
                    }
                });
            },
        );

        // Dropping the old monitor cancels its timer.
        *self.inactivity.lock().unwrap_or_else(|e| e.into_inner()) = Some(monitor);
    }

    /// Final sync (capped), sign out, clear local keys, then reload state.
    pub async fn logout(&self) -> Result<()> {
        let monitor = self.inactivity.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(monitor) = monitor {
            monitor.stop();
        }

        if self.current_user().is_some() {
            log::info!("Syncing time before logout...");
            match tokio::time::timeout(self.config.logout_sync_cap(), self.sync.flush(true)).await {
                Ok(Ok(outcome)) => log::debug!("Logout sync: {:?}", outcome),
                Ok(Err(e)) => log::warn!("Logout sync failed: {}", e),
                Err(_) => log::warn!("Logout sync timed out"),
            }
        }

        self.reward.cancel();
        self.session.sign_out_and_clear().await?;
        {
            let mut state = self.state.lock();
            state.user = None;
            state.remote_detached = false;
        }
        self.events.emit(GateEvent::AuthStateChanged {
            authenticated: false,
            username: None,
        });

        self.load().await?;
        Ok(())
    }

    // ---- sync hooks -----------------------------------------------------

    pub async fn flush(&self, force: bool) -> Result<SyncOutcome> {
        self.sync.flush(force).await
    }

    pub async fn on_visibility_hidden(&self) {
        self.sync.on_hidden().await;
    }

    /// Fire-and-forget flush; the handle is only useful to tests.
    pub fn on_unload(&self) -> JoinHandle<()> {
        self.sync.on_unload()
    }

    /// Stop every timer owned by the gate
    pub fn shutdown(&self) {
        if let Some(background) = self.background.lock().unwrap_or_else(|e| e.into_inner()).take() {
            background.stop();
        }
        if let Some(handle) = self.ticker_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        if let Some(monitor) = self.inactivity.lock().unwrap_or_else(|e| e.into_inner()).take() {
            monitor.stop();
        }
        self.reward.cancel();
        log::info!("Playtime gate stopped");
    }

    // ---- observation ----------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> GameState {
        self.state.snapshot()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    fn save_local_quietly(&self) {
        if let Err(e) = self.sync.save_local() {
            log::warn!("Failed to save state locally: {}", e);
        }
    }

    fn emit_clock(&self) {
        let remaining = self.state.lock().clock.remaining_seconds;
        self.events.emit(GateEvent::TimerTick {
            remaining,
            low: remaining < LOW_TIME_SECS,
        });
    }

    fn emit_coins(&self, highlight: bool) {
        let currency = self.state.lock().currency;
        self.events.emit(GateEvent::CoinsUpdated {
            coins: currency.coins,
            daily_earned: currency.daily_earned,
            highlight,
        });
    }
}

impl Drop for PlaytimeGate {
    fn drop(&mut self) {
        self.shutdown();
    }
}
