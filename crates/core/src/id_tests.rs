// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn generated_ids_carry_prefix_and_are_unique() {
    let a = RequestId::generate();
    let b = RequestId::generate();
    assert!(a.as_str().starts_with("req-"));
    assert_ne!(a, b);
}

#[test]
fn ids_roundtrip_through_json_as_plain_strings() {
    let id = ConnectionId::new("con-abc123");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"con-abc123\"");
    let back: ConnectionId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn foreign_ids_are_accepted_verbatim() {
    // Ids minted by other processes may not carry our prefix.
    let id = RequestId::new("01HZX4-external");
    assert_eq!(id.as_str(), "01HZX4-external");
}
