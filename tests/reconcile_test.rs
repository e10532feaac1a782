use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use playtime_gate::{
    format_date, keys, reconcile, Authority, ClockState, CurrencyState, DailyLimits, LocalSnapshot,
    LocalStore, ManualCalendar, MemoryProfiles, ProfileRow, ReconcilePolicy, ReconciliationEngine,
    RemoteSnapshot, UserIdentity,
};

const LIMITS: DailyLimits = DailyLimits {
    daily_seconds: 300,
    daily_coin_cap: 15,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

fn yesterday() -> NaiveDate {
    today().pred_opt().unwrap()
}

fn local(remaining: u64, date: NaiveDate, coins: u64, earned: u64) -> LocalSnapshot {
    LocalSnapshot {
        remaining_seconds: Some(remaining),
        last_reset_date: Some(date),
        coins: Some(coins),
        daily_earned: Some(earned),
        clock_pending: false,
        coins_pending: false,
        saved_at: None,
    }
}

fn remote(remaining: u64, date: NaiveDate, coins: u64, earned: u64) -> RemoteSnapshot {
    RemoteSnapshot {
        remaining_seconds: Some(remaining),
        last_reset_date: Some(date),
        coins: Some(coins),
        daily_earned: Some(earned),
        updated_at: None,
    }
}

fn player() -> UserIdentity {
    UserIdentity {
        id: "user-1".to_string(),
        email: "kid@example.com".to_string(),
        username: "kid_one".to_string(),
    }
}

fn row_for(user: &UserIdentity, remaining: i64, date: NaiveDate, coins: i64, earned: i64) -> ProfileRow {
    let mut row = ProfileRow::new(&user.id, &user.username, &user.email);
    row.remaining_seconds = Some(remaining);
    row.last_reset_date = Some(format_date(date));
    row.gold_coins = Some(coins);
    row.daily_coins_earned = Some(earned);
    row
}

fn engine(store: &LocalStore, profiles: Arc<MemoryProfiles>, policy: ReconcilePolicy) -> ReconciliationEngine {
    ReconciliationEngine::new(
        store.clone(),
        profiles,
        Arc::new(ManualCalendar::new(today())),
        LIMITS,
        policy,
    )
}

#[test]
fn local_only_new_day_resets_clock_and_daily_earned() {
    let result = reconcile(&local(12, yesterday(), 40, 9), None, today(), &LIMITS, ReconcilePolicy::RemoteWins);

    assert_eq!(result.authority, Authority::DailyReset);
    assert_eq!(result.clock, ClockState { remaining_seconds: 300, last_reset_date: today() });
    assert_eq!(result.currency, CurrencyState { coins: 40, daily_earned: 0 });
    assert!(!result.force_sync);
}

#[test]
fn local_only_same_day_keeps_stored_values() {
    let result = reconcile(&local(120, today(), 40, 9), None, today(), &LIMITS, ReconcilePolicy::RemoteWins);

    assert_eq!(result.authority, Authority::Local);
    assert_eq!(result.clock.remaining_seconds, 120);
    assert_eq!(result.currency, CurrencyState { coins: 40, daily_earned: 9 });
}

#[test]
fn absent_local_values_fall_back_to_daily_defaults() {
    let snapshot = LocalSnapshot {
        last_reset_date: Some(today()),
        ..LocalSnapshot::default()
    };
    let result = reconcile(&snapshot, None, today(), &LIMITS, ReconcilePolicy::RemoteWins);

    assert_eq!(result.clock.remaining_seconds, 300);
    assert_eq!(result.currency, CurrencyState::default());
}

#[test]
fn stale_remote_row_resets_and_forces_sync() {
    let result = reconcile(
        &local(100, today(), 3, 3),
        Some(&remote(5, yesterday(), 70, 15)),
        today(),
        &LIMITS,
        ReconcilePolicy::RemoteWins,
    );

    assert_eq!(result.authority, Authority::DailyReset);
    assert!(result.force_sync);
    assert_eq!(result.clock.remaining_seconds, 300);
    assert_eq!(result.currency, CurrencyState { coins: 70, daily_earned: 0 });
}

#[test]
fn same_day_remote_wins_by_default() {
    let mut pending_local = local(250, today(), 10, 2);
    pending_local.clock_pending = true;

    let result = reconcile(
        &pending_local,
        Some(&remote(42, today(), 12, 4)),
        today(),
        &LIMITS,
        ReconcilePolicy::RemoteWins,
    );

    assert_eq!(result.authority, Authority::Remote);
    assert_eq!(result.clock.remaining_seconds, 42);
    assert_eq!(result.currency, CurrencyState { coins: 12, daily_earned: 4 });
    assert!(!result.force_sync);
}

#[test]
fn pending_local_state_wins_under_prefer_pending_local() {
    let mut pending_local = local(250, today(), 10, 2);
    pending_local.clock_pending = true;

    let result = reconcile(
        &pending_local,
        Some(&remote(42, today(), 12, 4)),
        today(),
        &LIMITS,
        ReconcilePolicy::PreferPendingLocal,
    );

    assert_eq!(result.authority, Authority::LocalOverRemote);
    assert_eq!(result.clock.remaining_seconds, 250);
    assert!(result.force_sync);

    // Without the pending marker the remote row still decides.
    let clean = reconcile(
        &local(250, today(), 10, 2),
        Some(&remote(42, today(), 12, 4)),
        today(),
        &LIMITS,
        ReconcilePolicy::PreferPendingLocal,
    );
    assert_eq!(clean.authority, Authority::Remote);
}

#[test]
fn last_writer_wins_compares_timestamps() {
    let base = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
    let mut newer_local = local(250, today(), 10, 2);
    newer_local.saved_at = Some(base + Duration::seconds(30));
    let mut older_remote = remote(42, today(), 12, 4);
    older_remote.updated_at = Some(base);

    let result = reconcile(&newer_local, Some(&older_remote), today(), &LIMITS, ReconcilePolicy::LastWriterWins);
    assert_eq!(result.clock.remaining_seconds, 250);
    assert!(result.force_sync);

    older_remote.updated_at = Some(base + Duration::seconds(60));
    let result = reconcile(&newer_local, Some(&older_remote), today(), &LIMITS, ReconcilePolicy::LastWriterWins);
    assert_eq!(result.clock.remaining_seconds, 42);

    older_remote.updated_at = None;
    let result = reconcile(&newer_local, Some(&older_remote), today(), &LIMITS, ReconcilePolicy::LastWriterWins);
    assert_eq!(result.authority, Authority::Remote);
}

#[test]
fn daily_earned_is_clamped_to_the_cap() {
    let result = reconcile(
        &local(0, today(), 0, 0),
        Some(&remote(10, today(), 99, 40)),
        today(),
        &LIMITS,
        ReconcilePolicy::RemoteWins,
    );
    assert_eq!(result.currency.daily_earned, 15);
}

#[test]
fn policy_parses_from_config_strings() {
    assert_eq!("remote_wins".parse::<ReconcilePolicy>(), Ok(ReconcilePolicy::RemoteWins));
    assert_eq!("last-writer-wins".parse::<ReconcilePolicy>(), Ok(ReconcilePolicy::LastWriterWins));
    assert_eq!("lww".parse::<ReconcilePolicy>(), Ok(ReconcilePolicy::LastWriterWins));
    assert!("sometimes".parse::<ReconcilePolicy>().is_err());
    assert_eq!(ReconcilePolicy::PreferPendingLocal.to_string(), "prefer_pending_local");
}

#[tokio::test]
async fn local_reset_happens_once_per_day() {
    let store = LocalStore::in_memory();
    store.set(keys::KEY_REMAINING_SECONDS, "17").unwrap();
    store.set(keys::KEY_LAST_RESET_DATE, format_date(yesterday())).unwrap();
    store.set(keys::KEY_DAILY_EARNED, "8").unwrap();
    store.set(keys::KEY_GOLD_COINS, "30").unwrap();
    let engine = engine(&store, Arc::new(MemoryProfiles::new()), ReconcilePolicy::RemoteWins);

    let first = engine.load(None).await.unwrap();
    assert_eq!(first.authority, Authority::DailyReset);
    assert_eq!(first.clock.remaining_seconds, 300);
    assert_eq!(first.currency, CurrencyState { coins: 30, daily_earned: 0 });

    // Play some time, then load again on the same day: no second reset.
    store.set(keys::KEY_REMAINING_SECONDS, "250").unwrap();
    let second = engine.load(None).await.unwrap();
    assert_eq!(second.authority, Authority::Local);
    assert_eq!(second.clock.remaining_seconds, 250);
}

#[tokio::test]
async fn malformed_local_numbers_become_defaults() {
    let store = LocalStore::in_memory();
    store.set(keys::KEY_REMAINING_SECONDS, "NaN").unwrap();
    store.set(keys::KEY_LAST_RESET_DATE, format_date(today())).unwrap();
    store.set(keys::KEY_GOLD_COINS, "-4").unwrap();
    store.set(keys::KEY_DAILY_EARNED, "lots").unwrap();
    let engine = engine(&store, Arc::new(MemoryProfiles::new()), ReconcilePolicy::RemoteWins);

    let result = engine.load(None).await.unwrap();
    assert_eq!(result.clock.remaining_seconds, 300);
    assert_eq!(result.currency, CurrencyState::default());
    assert_eq!(store.remaining_seconds(), Some(300));
}

#[tokio::test]
async fn legacy_date_strings_are_understood() {
    let store = LocalStore::in_memory();
    store.set(keys::KEY_REMAINING_SECONDS, "77").unwrap();
    store.set(keys::KEY_LAST_RESET_DATE, "Sun Oct 18 2026").unwrap();
    let engine = engine(&store, Arc::new(MemoryProfiles::new()), ReconcilePolicy::RemoteWins);

    let result = engine.load(None).await.unwrap();
    assert_eq!(result.authority, Authority::Local);
    assert_eq!(result.clock.remaining_seconds, 77);
}

#[tokio::test]
async fn remote_row_from_today_overwrites_local_cache() {
    let user = player();
    let profiles = Arc::new(MemoryProfiles::new());
    profiles.put(row_for(&user, 42, today(), 9, 3));

    let store = LocalStore::in_memory();
    store.set(keys::KEY_REMAINING_SECONDS, "250").unwrap();
    store.set(keys::KEY_LAST_RESET_DATE, format_date(today())).unwrap();
    let engine = engine(&store, profiles, ReconcilePolicy::RemoteWins);

    let result = engine.load(Some(&user)).await.unwrap();
    assert_eq!(result.clock.remaining_seconds, 42);
    assert_eq!(store.remaining_seconds(), Some(42));
    assert_eq!(store.get(keys::KEY_GOLD_COINS).as_deref(), Some("9"));
    assert_eq!(store.get(keys::KEY_DAILY_EARNED).as_deref(), Some("3"));
}

#[tokio::test]
async fn loading_twice_without_remote_changes_is_idempotent() {
    let user = player();
    let profiles = Arc::new(MemoryProfiles::new());
    profiles.put(row_for(&user, 133, today(), 21, 6));
    let store = LocalStore::in_memory();

    for policy in [
        ReconcilePolicy::RemoteWins,
        ReconcilePolicy::PreferPendingLocal,
        ReconcilePolicy::LastWriterWins,
    ] {
        let engine = engine(&store, Arc::clone(&profiles), policy);
        let first = engine.load(Some(&user)).await.unwrap();
        let second = engine.load(Some(&user)).await.unwrap();
        assert_eq!((first.clock, first.currency), (second.clock, second.currency));
    }
}

#[tokio::test]
async fn missing_row_falls_back_to_local_state() {
    let store = LocalStore::in_memory();
    store.set(keys::KEY_REMAINING_SECONDS, "90").unwrap();
    store.set(keys::KEY_LAST_RESET_DATE, format_date(today())).unwrap();
    let engine = engine(&store, Arc::new(MemoryProfiles::new()), ReconcilePolicy::RemoteWins);

    let result = engine.load(Some(&player())).await.unwrap();
    assert_eq!(result.authority, Authority::Local);
    assert_eq!(result.clock.remaining_seconds, 90);
}

#[tokio::test]
async fn unreachable_backend_falls_back_to_local_state() {
    let user = player();
    let profiles = Arc::new(MemoryProfiles::new());
    profiles.put(row_for(&user, 5, today(), 0, 0));
    profiles.set_offline(true);

    let store = LocalStore::in_memory();
    store.set(keys::KEY_REMAINING_SECONDS, "90").unwrap();
    store.set(keys::KEY_LAST_RESET_DATE, format_date(today())).unwrap();
    store.set(keys::KEY_COINS_PENDING, "true").unwrap();
    let engine = engine(&store, profiles, ReconcilePolicy::RemoteWins);

    let result = engine.load(Some(&user)).await.unwrap();
    assert_eq!(result.authority, Authority::Local);
    assert_eq!(result.clock.remaining_seconds, 90);

    // Unsynced coins stay unsynced until a write goes through.
    assert!(result.currency_pending);
    assert!(!result.clock_pending);
    assert_eq!(store.get(keys::KEY_COINS_PENDING).as_deref(), Some("true"));
}

#[tokio::test]
async fn adopted_remote_row_clears_pending_markers() {
    let user = player();
    let profiles = Arc::new(MemoryProfiles::new());
    profiles.put(row_for(&user, 42, today(), 9, 3));

    let store = LocalStore::in_memory();
    store.set(keys::KEY_LAST_RESET_DATE, format_date(today())).unwrap();
    store.set_pending(true, true).unwrap();
    let engine = engine(&store, profiles, ReconcilePolicy::RemoteWins);

    let result = engine.load(Some(&user)).await.unwrap();
    assert_eq!(result.authority, Authority::Remote);
    assert!(!result.clock_pending && !result.currency_pending);
    assert!(!store.local_snapshot().pending());
}
