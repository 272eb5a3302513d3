// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dredge_core::test_support;

#[test]
fn missing_file_means_no_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::load(&dir.path().join("accounts.toml")).unwrap();
    assert!(store.all().is_empty());
}

#[test]
fn upsert_persists_across_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.toml");

    let store = AccountStore::load(&path).unwrap();
    store.upsert(test_support::account("acct-1")).unwrap();

    let reloaded = AccountStore::load(&path).unwrap();
    let account = reloaded.get(&AccountId::new("acct-1")).unwrap();
    assert_eq!(account.access_token, "tok-access");
    assert_eq!(account.provider_id, "gitlabCloud");
}

#[test]
fn apply_refresh_keeps_old_refresh_token_when_none_returned() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.toml");
    let store = AccountStore::load(&path).unwrap();
    store.upsert(test_support::account("acct-1")).unwrap();

    let updated = store
        .apply_refresh(&AccountId::new("acct-1"), "tok-new".to_string(), None, Some(12345))
        .unwrap();
    assert_eq!(updated.access_token, "tok-new");
    assert_eq!(updated.refresh_token.as_deref(), Some("tok-refresh"));
    assert_eq!(updated.access_token_expires_at_ms, Some(12345));

    // And a new refresh token replaces the old one.
    let updated = store
        .apply_refresh(
            &AccountId::new("acct-1"),
            "tok-newer".to_string(),
            Some("tok-refresh-2".to_string()),
            None,
        )
        .unwrap();
    assert_eq!(updated.refresh_token.as_deref(), Some("tok-refresh-2"));

    // Persistence survives reload.
    let reloaded = AccountStore::load(&path).unwrap();
    assert_eq!(
        reloaded.get(&AccountId::new("acct-1")).unwrap().access_token,
        "tok-newer"
    );
}

#[test]
fn refresh_for_unknown_account_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::load(&dir.path().join("accounts.toml")).unwrap();
    let err = store
        .apply_refresh(&AccountId::new("acct-ghost"), "tok".to_string(), None, None)
        .unwrap_err();
    assert!(matches!(err, AccountsError::Unknown(_)));
}
