use std::time::Duration;

use chrono::{NaiveDate, Utc};
use playtime_gate::{
    keys, ClockState, CurrencyState, DeviceMode, LocalStore, ZoomControl, MAX_ZOOM, MIN_ZOOM,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

#[test]
fn values_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();

    let store = LocalStore::open(dir.path()).unwrap();
    store
        .write_clock(
            &ClockState {
                remaining_seconds: 123,
                last_reset_date: today(),
            },
            Utc::now(),
        )
        .unwrap();
    store
        .write_currency(&CurrencyState {
            coins: 9,
            daily_earned: 4,
        })
        .unwrap();
    store.set_device_mode(DeviceMode::Mobile).unwrap();
    drop(store);

    let reopened = LocalStore::open(dir.path()).unwrap();
    let snapshot = reopened.local_snapshot();
    assert_eq!(snapshot.remaining_seconds, Some(123));
    assert_eq!(snapshot.last_reset_date, Some(today()));
    assert_eq!(snapshot.coins, Some(9));
    assert_eq!(snapshot.daily_earned, Some(4));
    assert!(snapshot.saved_at.is_some());
    assert_eq!(reopened.device_mode(), Some(DeviceMode::Mobile));
}

#[test]
fn corrupt_store_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("local_storage.json"), "{not json").unwrap();

    assert!(LocalStore::open(dir.path()).is_err());
}

#[test]
fn failed_disk_write_leaves_entries_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let store = LocalStore::open(&data_dir).unwrap();
    store.set(keys::KEY_REMAINING_SECONDS, "120").unwrap();

    std::fs::remove_dir_all(&data_dir).unwrap();

    assert!(store.set(keys::KEY_REMAINING_SECONDS, "60").is_err());
    assert_eq!(store.remaining_seconds(), Some(120));
}

#[test]
fn pending_markers_round_through_the_snapshot() {
    let store = LocalStore::in_memory();
    assert!(!store.local_snapshot().pending());

    store.set_pending(false, true).unwrap();
    assert!(store.local_snapshot().pending());
    assert_eq!(store.get(keys::KEY_COINS_PENDING).as_deref(), Some("true"));
    assert_eq!(store.get(keys::KEY_CLOCK_PENDING), None);

    store.set_pending(false, false).unwrap();
    assert!(!store.local_snapshot().pending());
}

#[test]
fn logout_clears_session_and_gameplay_but_not_preferences() {
    let store = LocalStore::in_memory();
    store.set_session("kid_one", Some("{\"token\":1}")).unwrap();
    store.set(keys::KEY_REMAINING_SECONDS, "10").unwrap();
    store.set(keys::KEY_GOLD_COINS, "10").unwrap();
    store.set(keys::KEY_ZOOM_LEVEL, "1.2").unwrap();
    store.set_device_mode(DeviceMode::Desktop).unwrap();
    assert!(store.is_logged_in());

    store.clear_session().unwrap();

    assert!(!store.is_logged_in());
    assert_eq!(store.session_token(), None);
    assert_eq!(store.get(keys::KEY_REMAINING_SECONDS), None);
    assert_eq!(store.get(keys::KEY_GOLD_COINS), None);
    assert_eq!(store.get(keys::KEY_ZOOM_LEVEL).as_deref(), Some("1.2"));
    assert_eq!(store.device_mode(), Some(DeviceMode::Desktop));
}

#[tokio::test]
async fn other_tabs_see_changes_but_not_their_own() {
    let tab_a = LocalStore::in_memory();
    let tab_b = tab_a.open_tab();
    let mut watcher_a = tab_a.watch();

    tab_a.set(keys::KEY_REMAINING_SECONDS, "50").unwrap();
    tab_b.set(keys::KEY_REMAINING_SECONDS, "40").unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), watcher_a.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.key, keys::KEY_REMAINING_SECONDS);
    assert_eq!(event.old_value.as_deref(), Some("50"));
    assert_eq!(event.new_value.as_deref(), Some("40"));
    assert_eq!(tab_a.remaining_seconds(), Some(40));

    // Writing the same value again is not a change.
    tab_b.set(keys::KEY_REMAINING_SECONDS, "40").unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(50), watcher_a.changed())
        .await
        .is_err());
}

#[test]
fn zoom_stays_in_bounds_and_persists() {
    let store = LocalStore::in_memory();
    let mut zoom = ZoomControl::load(store.clone());
    assert_eq!(zoom.level(), 1.0);

    assert_eq!(zoom.zoom_in().unwrap(), 1.1);
    for _ in 0..20 {
        zoom.zoom_in().unwrap();
    }
    assert_eq!(zoom.level(), MAX_ZOOM);
    assert_eq!(store.get(keys::KEY_ZOOM_LEVEL).as_deref(), Some("2"));

    for _ in 0..30 {
        zoom.zoom_out().unwrap();
    }
    assert_eq!(zoom.level(), MIN_ZOOM);

    let reloaded = ZoomControl::load(store);
    assert_eq!(reloaded.level(), MIN_ZOOM);
}

#[test]
fn bad_saved_zoom_falls_back() {
    let store = LocalStore::in_memory();
    store.set(keys::KEY_ZOOM_LEVEL, "huge").unwrap();
    assert_eq!(ZoomControl::load(store.clone()).level(), 1.0);

    store.set(keys::KEY_ZOOM_LEVEL, "7.5").unwrap();
    assert_eq!(ZoomControl::load(store.clone()).level(), MAX_ZOOM);

    store.set(keys::KEY_ZOOM_LEVEL, "1.30000001").unwrap();
    assert_eq!(ZoomControl::load(store).level(), 1.3);
}
