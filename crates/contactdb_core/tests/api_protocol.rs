mod common;

use common::{create_contact, engine, load, LOCK_TTL};
use contactdb_core::{
    open_db_in_memory, ContactField, FieldResolutions, FieldValue, MergeApi, MergeEngine,
    ResolutionPolicy, SqliteMergeStore, SubmitCandidatesRequest, SubmitResolutionRequest,
};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

fn john() -> FieldResolutions {
    let mut resolutions = FieldResolutions::new();
    resolutions.insert(ContactField::FirstName, FieldValue::Text("John".to_string()));
    resolutions
}

#[test]
fn two_requests_merge_with_default_primary() {
    let conn = open_db_in_memory().unwrap();
    let api = MergeApi::new(engine(&conn));
    let x = create_contact(&conn, "J.", "Smith");
    let y = create_contact(&conn, "John", "Smith");

    let response = api
        .submit_candidates(SubmitCandidatesRequest {
            session_token: None,
            candidate_ids: vec![x.id, y.id],
            primary_id: None,
        })
        .unwrap();
    assert!(Uuid::parse_str(&response.session_token).is_ok());
    assert_eq!(response.plan.primary_id, x.id);
    assert_eq!(response.plan.conflict_fields(), vec![ContactField::FirstName]);

    let missing = api.submit_resolution(SubmitResolutionRequest {
        session_token: response.session_token.clone(),
        primary_id: x.id,
        resolutions: FieldResolutions::new(),
    });
    assert!(!missing.ok);
    let failure = missing.error.unwrap();
    assert_eq!(failure.code, "unresolved_conflict");
    assert!(failure.retryable);
    assert_eq!(failure.missing_fields, vec![ContactField::FirstName]);

    let outcome = api.submit_resolution(SubmitResolutionRequest {
        session_token: response.session_token,
        primary_id: x.id,
        resolutions: john(),
    });
    assert!(outcome.ok, "{outcome:?}");
    assert_eq!(outcome.primary_id, Some(x.id));
    assert_eq!(load(&conn, x.id).first_name, "John");
    assert_eq!(load(&conn, y.id).main_contact, Some(x.id));
}

#[test]
fn changing_primary_in_second_request_reproposes() {
    let conn = open_db_in_memory().unwrap();
    let api = MergeApi::new(engine(&conn));
    let x = create_contact(&conn, "J.", "Smith");
    let y = create_contact(&conn, "John", "Smith");

    let response = api
        .submit_candidates(SubmitCandidatesRequest {
            session_token: Some("desk-42".to_string()),
            candidate_ids: vec![x.id, y.id],
            primary_id: None,
        })
        .unwrap();
    assert_eq!(response.session_token, "desk-42");

    let outcome = api.submit_resolution(SubmitResolutionRequest {
        session_token: "desk-42".to_string(),
        primary_id: y.id,
        resolutions: john(),
    });
    assert!(outcome.ok, "{outcome:?}");
    assert_eq!(outcome.primary_id, Some(y.id));
    assert_eq!(load(&conn, x.id).main_contact, Some(y.id));
}

#[test]
fn failed_submission_leaves_no_session() {
    let conn = open_db_in_memory().unwrap();
    let api = MergeApi::new(engine(&conn));
    let x = create_contact(&conn, "J.", "Smith");
    let y = create_contact(&conn, "John", "Smith");
    let outsider = create_contact(&conn, "Jane", "Doe");

    let failure = api
        .submit_candidates(SubmitCandidatesRequest {
            session_token: Some("s1".to_string()),
            candidate_ids: vec![x.id],
            primary_id: None,
        })
        .unwrap_err();
    assert_eq!(failure.code, "invalid_selection");
    assert!(!failure.retryable);

    let failure = api
        .submit_candidates(SubmitCandidatesRequest {
            session_token: Some("s1".to_string()),
            candidate_ids: vec![x.id, y.id],
            primary_id: Some(outsider.id),
        })
        .unwrap_err();
    assert_eq!(failure.code, "invalid_primary");

    let outcome = api.submit_resolution(SubmitResolutionRequest {
        session_token: "s1".to_string(),
        primary_id: x.id,
        resolutions: john(),
    });
    assert_eq!(outcome.error.unwrap().code, "session_not_found");
}

#[test]
fn resubmitting_a_token_restarts_the_session() {
    let conn = open_db_in_memory().unwrap();
    let api = MergeApi::new(engine(&conn));
    let x = create_contact(&conn, "J.", "Smith");
    let y = create_contact(&conn, "John", "Smith");
    let z = create_contact(&conn, "Johnny", "Smith");

    api.submit_candidates(SubmitCandidatesRequest {
        session_token: Some("s1".to_string()),
        candidate_ids: vec![x.id, y.id],
        primary_id: None,
    })
    .unwrap();
    let response = api
        .submit_candidates(SubmitCandidatesRequest {
            session_token: Some("s1".to_string()),
            candidate_ids: vec![x.id, y.id, z.id],
            primary_id: None,
        })
        .unwrap();
    assert_eq!(response.plan.secondary_ids, vec![y.id, z.id]);

    api.cancel("s1").unwrap();
    assert_eq!(api.cancel("s1").unwrap_err().code, "session_not_found");
}

#[test]
fn plan_envelope_wire_shape() {
    let conn = open_db_in_memory().unwrap();
    let api = MergeApi::new(engine(&conn));
    let mut x = create_contact(&conn, "J.", "Smith");
    x.phones = vec!["+1-555-0100".to_string()];
    let x = common::save(&conn, &x);
    let mut y = create_contact(&conn, "John", "Smith");
    y.phones = vec!["+1-555-0100".to_string(), "+1-555-0200".to_string()];
    let y = common::save(&conn, &y);

    let response = api
        .submit_candidates(SubmitCandidatesRequest {
            session_token: Some("wire".to_string()),
            candidate_ids: vec![x.id, y.id],
            primary_id: None,
        })
        .unwrap();
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["session_token"], json!("wire"));
    assert_eq!(value["plan"]["primary_id"], json!(x.id));
    let conflicts = value["plan"]["conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["field"], json!("first_name"));
    assert_eq!(
        conflicts[0]["primary_value"],
        json!({ "kind": "text", "value": "J." })
    );
    assert_eq!(
        conflicts[0]["secondary_values"][0]["value"],
        json!({ "kind": "text", "value": "John" })
    );

    let phones = value["plan"]["list_unions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|union| union["field"] == json!("phones"))
        .unwrap();
    assert_eq!(phones["merged"], json!(["+1-555-0100", "+1-555-0200"]));
    assert_eq!(
        value["plan"]["auto_resolved"]["last_name"],
        json!({ "kind": "text", "value": "Smith" })
    );
}

#[test]
fn walked_away_sessions_are_dropped_by_later_submissions() {
    let conn = open_db_in_memory().unwrap();
    let engine = MergeEngine::with_settings(
        SqliteMergeStore::new(&conn, LOCK_TTL),
        Duration::from_millis(200),
        ResolutionPolicy::default(),
    );
    let api = MergeApi::new(engine);
    let x = create_contact(&conn, "J.", "Smith");
    let y = create_contact(&conn, "John", "Smith");
    let submit = |token: String| {
        api.submit_candidates(SubmitCandidatesRequest {
            session_token: Some(token),
            candidate_ids: vec![x.id, y.id],
            primary_id: None,
        })
        .unwrap()
    };

    for index in 0..50 {
        submit(format!("idle-{index}"));
    }
    std::thread::sleep(Duration::from_millis(250));
    submit("fresh".to_string());

    // Nothing idle is left for a manual sweep.
    assert_eq!(api.engine().expire_sessions(), 0);
    api.cancel("fresh").unwrap();
}
