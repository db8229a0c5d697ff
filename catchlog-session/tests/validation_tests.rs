use catchlog_crypto::KeyDeriver;
use catchlog_session::{OperationKind, Session, SessionConfig, SessionError, SessionGuard};
use catchlog_types::Identity;
use serde_json::json;
use std::sync::Arc;

fn guard_with(config: SessionConfig) -> SessionGuard {
    let session = Arc::new(Session::new(Arc::new(KeyDeriver::default())));
    SessionGuard::new(session, config)
}

fn guard() -> SessionGuard {
    guard_with(SessionConfig::default())
}

// ── Classification ──

#[test]
fn read_prefixes_classify_as_read() {
    for op in ["getTrip", "listCatches", "readPhoto", "fetchWeather", "loadDraft", "search", "countTrips", "findSpot", "query_logs", "viewTrip"] {
        assert_eq!(OperationKind::classify(op), OperationKind::Read, "{op}");
    }
}

#[test]
fn unknown_operations_fail_closed_as_write() {
    for op in ["saveTrip", "deleteCatch", "syncNow", "", "  ", "mystery"] {
        assert_eq!(OperationKind::classify(op), OperationKind::Write, "{op:?}");
    }
}

// ── Authenticated writes ──

#[test]
fn reads_pass_without_identity() {
    let mut payload = json!({"ownerId": "someone"});
    assert!(guard().validate_write(None, "listTrips", &mut payload).is_ok());
}

#[test]
fn write_without_identity_is_rejected() {
    let mut payload = json!({"notes": "x"});
    let err = guard().validate_write(None, "saveTrip", &mut payload).unwrap_err();
    assert!(matches!(err, SessionError::UnauthenticatedWrite { .. }));
    assert!(err.is_security_violation());
}

#[test]
fn mismatched_owner_is_rejected() {
    let mut payload = json!({"ownerId": "u2", "notes": "x"});
    match guard().validate_write(Some("u1"), "saveTrip", &mut payload).unwrap_err() {
        SessionError::OwnershipMismatch { active, claimed, .. } => {
            assert_eq!(active, "u1");
            assert_eq!(claimed, "u2");
        }
        other => panic!("expected OwnershipMismatch, got {other:?}"),
    }
}

#[test]
fn snake_case_owner_field_is_checked_too() {
    let mut payload = json!({"ownerId": "u1", "owner_id": "u2"});
    assert!(matches!(
        guard().validate_write(Some("u1"), "saveTrip", &mut payload),
        Err(SessionError::OwnershipMismatch { .. })
    ));
}

#[test]
fn non_string_owner_is_a_mismatch() {
    let mut payload = json!({"ownerId": 42});
    assert!(matches!(
        guard().validate_write(Some("u1"), "saveTrip", &mut payload),
        Err(SessionError::OwnershipMismatch { .. })
    ));
}

#[test]
fn missing_owner_is_stamped_by_default() {
    let mut payload = json!({"notes": "x"});
    let kind = guard().validate_write(Some("u1"), "saveTrip", &mut payload).unwrap();
    assert_eq!(kind, OperationKind::Write);
    assert_eq!(payload["ownerId"], json!("u1"));
}

#[test]
fn matching_owner_passes_untouched() {
    let mut payload = json!({"owner_id": "u1"});
    guard().validate_write(Some("u1"), "saveTrip", &mut payload).unwrap();
    assert_eq!(payload, json!({"owner_id": "u1"}));
}

#[test]
fn strict_mode_rejects_missing_owner() {
    let g = guard_with(SessionConfig {
        reject_missing_owner: true,
        ..SessionConfig::default()
    });
    let mut payload = json!({"notes": "x"});
    assert!(matches!(
        g.validate_write(Some("u1"), "saveTrip", &mut payload),
        Err(SessionError::MissingOwner { .. })
    ));
    assert!(payload.get("ownerId").is_none());
}

#[test]
fn non_object_write_payload_is_rejected() {
    let mut payload = json!("just a string");
    assert!(matches!(
        guard().validate_write(Some("u1"), "saveTrip", &mut payload),
        Err(SessionError::MissingOwner { .. })
    ));
}

// ── Guest writes ──

#[test]
fn guest_write_is_tagged_with_session_id() {
    let guest = Identity::guest();
    let mut payload = json!({"notes": "first cast"});
    guard().validate_guest_write(&guest, "saveDraft", &mut payload).unwrap();
    assert_eq!(payload["guestSessionId"], json!(guest.id()));
    assert!(payload.get("ownerId").is_none());
}

#[test]
fn guest_write_declaring_owner_is_rejected() {
    let guest = Identity::guest();
    let mut payload = json!({"ownerId": "u1"});
    assert!(matches!(
        guard().validate_guest_write(&guest, "saveDraft", &mut payload),
        Err(SessionError::GuestWriteRejected(_))
    ));
}

#[test]
fn guest_write_for_other_guest_session_is_rejected() {
    let guest = Identity::guest();
    let mut payload = json!({"guestSessionId": "guest:someone-else"});
    assert!(guard().validate_guest_write(&guest, "saveDraft", &mut payload).is_err());
}

#[test]
fn authenticated_identity_cannot_use_guest_path() {
    let mut payload = json!({});
    assert!(matches!(
        guard().validate_guest_write(&Identity::authenticated("u1"), "saveDraft", &mut payload),
        Err(SessionError::GuestWriteRejected(_))
    ));
}

#[tokio::test]
async fn check_dispatches_on_active_identity() {
    let g = guard();
    let mut payload = json!({});
    assert!(matches!(
        g.check("saveTrip", &mut payload),
        Err(SessionError::UnauthenticatedWrite { .. })
    ));

    g.start_session(Identity::guest()).await;
    let mut payload = json!({});
    g.check("saveTrip", &mut payload).unwrap();
    assert!(payload.get("guestSessionId").is_some());

    g.start_session(Identity::authenticated("u1")).await;
    let mut payload = json!({"ownerId": "u2"});
    assert!(g.check("saveTrip", &mut payload).is_err());
}

#[tokio::test]
async fn session_requires_authenticated_identity() {
    let session = Session::new(Arc::new(KeyDeriver::default()));
    assert!(matches!(
        session.require_authenticated(),
        Err(SessionError::NoActiveSession)
    ));
    session.open(Identity::guest());
    assert!(session.require_authenticated().is_err());
    session.open(Identity::authenticated("u1"));
    assert_eq!(session.require_authenticated().unwrap().id(), "u1");
    assert_eq!(session.close().map(|i| i.id().to_string()).as_deref(), Some("u1"));
    assert!(session.active().is_none());
}
