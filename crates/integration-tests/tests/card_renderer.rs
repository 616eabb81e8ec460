//! Integration tests for card rendering from stored state.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use chatops_core::{CardState, RequestId};
use chatops_integration_tests::{card_buttons, release_request, service};
use chatops_server::card::{build_card, render_state};

fn actions_of(card: &serde_json::Value, svc: &str) -> Vec<String> {
    card_buttons(card)
        .into_iter()
        .filter(|(s, _)| s == svc)
        .map(|(_, a)| a)
        .collect()
}

#[test]
fn test_check_is_dropped_and_rollback_restart_are_added() {
    let request = release_request(vec![service("svc", "master", &["gray", "check"])]);
    let card = build_card(
        &request,
        &RequestId::new("r1"),
        &BTreeMap::new(),
        &BTreeMap::new(),
    )
    .unwrap();
    let card = serde_json::to_value(&card).unwrap();

    assert_eq!(
        actions_of(&card, "svc"),
        ["do_gray_release", "do_rollback", "do_restart"]
    );
    assert!(!card.to_string().contains("do_check"));
}

#[test]
fn test_empty_services_render_nothing() {
    let request = release_request(Vec::new());
    assert!(
        build_card(
            &request,
            &RequestId::new("r1"),
            &BTreeMap::new(),
            &BTreeMap::new()
        )
        .is_none()
    );
}

#[test]
fn test_first_service_preconditions() {
    let id = RequestId::new("r1");
    let none = BTreeMap::new();
    let counts = BTreeMap::new();

    let mut no_object = service("svc", "master", &["gray"]);
    no_object.object_id.clear();
    assert!(build_card(&release_request(vec![no_object]), &id, &none, &counts).is_none());

    let no_actions = service("svc", "master", &[]);
    assert!(build_card(&release_request(vec![no_actions]), &id, &none, &counts).is_none());

    let mut no_branch = service("svc", "master", &["gray"]);
    no_branch.branches.clear();
    assert!(build_card(&release_request(vec![no_branch]), &id, &none, &counts).is_none());
}

#[test]
fn test_later_service_without_branch_gets_placeholder() {
    let mut second = service("worker", "unused", &["official"]);
    second.branches.clear();
    let request = release_request(vec![service("api", "release/2", &["official"]), second]);

    let card = build_card(
        &request,
        &RequestId::new("r1"),
        &BTreeMap::new(),
        &BTreeMap::new(),
    )
    .unwrap();

    let worker = card.button("worker", "do_official_release").unwrap();
    assert_eq!(worker.value.branch.as_deref(), Some("无分支"));

    let batch = card.button("BATCH", "batch_release_all").unwrap();
    let branches = batch.value.all_branches.as_ref().unwrap();
    assert_eq!(branches.get("api").map(String::as_str), Some("release/2"));
    assert!(!branches.contains_key("worker"));
}

#[test]
fn test_rendered_state_reflects_counts_and_disabled() {
    let id = RequestId::new("r1");
    let mut state = CardState::new(release_request(vec![service(
        "svc",
        "master",
        &["official"],
    )]));
    state.increment("svc", "do_official_release");
    state.increment("svc", "do_official_release");
    state.disable("svc", "do_rollback");
    state.disable("BATCH", "stop_batch_release");

    let card = render_state(&state, &id).unwrap();

    let official = card.button("svc", "do_official_release").unwrap();
    assert_eq!(official.text.content(), "🎉 正式 (2)");
    assert!(!official.disabled);

    let rollback = card.button("svc", "do_rollback").unwrap();
    assert!(rollback.disabled);
    let json = serde_json::to_value(rollback).unwrap();
    assert_eq!(json["type"], "default");

    let stop = card.button("BATCH", "stop_batch_release").unwrap();
    assert!(stop.disabled);
    assert!(stop.text.content().ends_with("(已执行)"));
}

#[test]
fn test_gray_requests_render_only_gray_services_without_official() {
    let id = RequestId::new("r1");
    let state = CardState::new(release_request(vec![
        service("api", "master", &["gray", "official"]),
        service("web", "master", &["official"]),
    ]));

    let card = serde_json::to_value(render_state(&state, &id).unwrap()).unwrap();
    let buttons = card_buttons(&card);

    assert!(buttons.iter().all(|(s, _)| s != "web"));
    assert!(buttons.iter().all(|(_, a)| a != "do_official_release"));
    assert_eq!(
        actions_of(&card, "api"),
        ["do_gray_release", "do_rollback", "do_restart"]
    );
    // The stored request keeps its official action.
    assert_eq!(state.original_request.services[0].actions, ["gray", "official"]);
}
