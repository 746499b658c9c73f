use chrono::{TimeZone, Utc};
use parley_db::{
    create_call, create_pool, get_call, list_transcript, run_migrations, save_summary, save_turn,
    CallDirection, CallOutcome, DbPool, DbRuntimeSettings, NewCall,
};
use parley_types::Role;

fn setup() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("parley.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("failed to create pool");
    {
        let conn = pool.get().expect("failed to get connection");
        run_migrations(&conn).expect("failed to run migrations");
    }
    (dir, pool)
}

#[test]
fn inbound_call_lifecycle() {
    let (_dir, pool) = setup();
    let conn = pool.get().unwrap();

    create_call(
        &conn,
        &NewCall {
            call_id: "CA100",
            tenant_id: Some("acme"),
            direction: CallDirection::Inbound,
            caller_number: Some("+15550001"),
            called_number: Some("+15559999"),
        },
    )
    .unwrap();

    let record = get_call(&conn, "CA100").unwrap().expect("call should exist");
    assert_eq!(record.status, "in_progress");
    assert_eq!(record.direction, "inbound");
    assert_eq!(record.tenant_id.as_deref(), Some("acme"));
    assert!(record.ended_at.is_none());

    save_summary(
        &conn,
        "CA100",
        &CallOutcome {
            summary: "Caller asked about opening hours.".to_string(),
            transfer_requested: true,
            transfer_reason: Some("wants a manager".to_string()),
        },
    )
    .unwrap();

    let record = get_call(&conn, "CA100").unwrap().unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(
        record.summary.as_deref(),
        Some("Caller asked about opening hours.")
    );
    assert!(record.transfer_requested);
    assert_eq!(record.transfer_reason.as_deref(), Some("wants a manager"));
    assert!(record.ended_at.is_some());
    // Announced fields survive the summary upsert.
    assert_eq!(record.caller_number.as_deref(), Some("+15550001"));
}

#[test]
fn create_call_is_idempotent() {
    let (_dir, pool) = setup();
    let conn = pool.get().unwrap();
    let call = NewCall {
        call_id: "CA200",
        tenant_id: Some("acme"),
        direction: CallDirection::Outbound,
        caller_number: None,
        called_number: Some("+15551234"),
    };

    create_call(&conn, &call).unwrap();
    create_call(&conn, &call).unwrap();

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM calls WHERE call_id = 'CA200'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn summary_for_unannounced_call_creates_row() {
    let (_dir, pool) = setup();
    let conn = pool.get().unwrap();

    save_summary(
        &conn,
        "CA300",
        &CallOutcome {
            summary: "No conversation recorded.".to_string(),
            transfer_requested: false,
            transfer_reason: None,
        },
    )
    .unwrap();

    let record = get_call(&conn, "CA300").unwrap().unwrap();
    assert_eq!(record.status, "completed");
    assert!(record.tenant_id.is_none());
}

#[test]
fn transcript_preserves_order_and_timestamps() {
    let (_dir, pool) = setup();
    let conn = pool.get().unwrap();
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 4).unwrap();

    save_turn(&conn, "CA400", Role::User, "what are your hours", t0).unwrap();
    save_turn(&conn, "CA400", Role::Assistant, "We open at nine.", t1).unwrap();
    save_turn(&conn, "CA401", Role::User, "other call", t0).unwrap();

    let transcript = list_transcript(&conn, "CA400").unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].speaker, Role::User);
    assert_eq!(transcript[0].text, "what are your hours");
    assert_eq!(transcript[0].spoken_at, t0);
    assert_eq!(transcript[1].speaker, Role::Assistant);
    assert_eq!(transcript[1].spoken_at, t1);

    assert!(get_call(&conn, "missing").unwrap().is_none());
    assert!(list_transcript(&conn, "missing").unwrap().is_empty());
}
