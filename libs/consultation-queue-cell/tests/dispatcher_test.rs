mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use common::{harness, harness_with, harness_with_hub, hub_settings, policy, FaultyRepository};
use consultation_queue_cell::{
    ConsultationRepository, DispatchError, HydrationSummary, PriorityTier, Requester,
    SessionStatus,
};
use shared_config::{DispatchPolicy, HubSettings};
use shared_models::auth::UserRole;
use video_conferencing_cell::{ProviderEvent, ProviderEventSink, RecordingFile};

fn patient(identity: Uuid) -> Requester {
    Requester {
        identity,
        role: UserRole::Patient,
    }
}

async fn drain(outbound: &mut mpsc::Receiver<Arc<str>>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(frame) = outbound.try_recv() {
        events.push(serde_json::from_str(&frame).unwrap());
    }
    events
}

fn family(identity: Uuid) -> Requester {
    Requester {
        identity,
        role: UserRole::Family,
    }
}

fn of_type<'a>(events: &'a [Value], event_type: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["type"] == event_type).collect()
}

// ==============================================================================
// ORDERING & ASSIGNMENT
// ==============================================================================

#[tokio::test]
async fn test_urgent_patient_is_dispatched_first() {
    let h = harness();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let staff = Uuid::new_v4();

    h.dispatcher.enqueue(a, PriorityTier::Normal, None, None).await.unwrap();
    h.dispatcher.enqueue(b, PriorityTier::Urgent, None, None).await.unwrap();

    let listing = h.dispatcher.list_queue().await.unwrap();
    let order: Vec<Uuid> = listing.entries.iter().map(|r| r.entry.patient_id).collect();
    assert_eq!(order, vec![b, a]);
    assert_eq!(listing.stats.urgent, 1);

    let session = h.dispatcher.assign_next(staff).await.unwrap();
    assert_eq!(session.patient_id, b);
    assert_eq!(session.staff_id, staff);
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.queue_entry_id.is_some());

    let listing = h.dispatcher.list_queue().await.unwrap();
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].entry.patient_id, a);
    assert_eq!(h.dispatcher.position_of(a).await.unwrap(), 1);

    assert_eq!(*h.media.created.lock().unwrap(), vec![session.id]);
}

#[tokio::test]
async fn test_assign_next_on_empty_queue() {
    let h = harness();
    assert_matches!(
        h.dispatcher.assign_next(Uuid::new_v4()).await,
        Err(DispatchError::QueueEmpty)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assign_next_claims_each_entry_once() {
    let h = harness();
    let waiting = 3;
    let callers = 10;

    for _ in 0..waiting {
        h.dispatcher
            .enqueue(Uuid::new_v4(), PriorityTier::Normal, None, None)
            .await
            .unwrap();
    }

    let tasks: Vec<_> = (0..callers)
        .map(|_| {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.assign_next(Uuid::new_v4()).await })
        })
        .collect();

    let mut claimed = HashSet::new();
    let mut empty = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(session) => assert!(claimed.insert(session.queue_entry_id.unwrap())),
            Err(DispatchError::QueueEmpty) => empty += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(claimed.len(), waiting);
    assert_eq!(empty, callers - waiting);
    assert_eq!(h.dispatcher.queue_depth().await.unwrap(), 0);
    assert_eq!(h.dispatcher.active_session_count().await.unwrap(), waiting);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assign_specific_has_one_winner() {
    let h = harness();
    let ranked = h
        .dispatcher
        .enqueue(Uuid::new_v4(), PriorityTier::High, None, None)
        .await
        .unwrap();
    let entry_id = ranked.entry.id;

    let first = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move { dispatcher.assign_specific(entry_id, Uuid::new_v4()).await })
    };
    let second = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move { dispatcher.assign_specific(entry_id, Uuid::new_v4()).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(DispatchError::AlreadyAssigned(id)) if *id == entry_id)));
}

#[tokio::test]
async fn test_assign_specific_unknown_entry() {
    let h = harness();
    assert_matches!(
        h.dispatcher.assign_specific(Uuid::new_v4(), Uuid::new_v4()).await,
        Err(DispatchError::NotFound(_))
    );
}

#[tokio::test]
async fn test_assign_specific_skips_the_head() {
    let h = harness();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    h.dispatcher.enqueue(first, PriorityTier::Urgent, None, None).await.unwrap();
    let target = h
        .dispatcher
        .enqueue(second, PriorityTier::Low, Some("follow-up".into()), None)
        .await
        .unwrap();

    let session = h
        .dispatcher
        .assign_specific(target.entry.id, Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(session.patient_id, second);
    assert_eq!(h.dispatcher.position_of(first).await.unwrap(), 1);
}

// ==============================================================================
// MUTUAL EXCLUSION
// ==============================================================================

#[tokio::test]
async fn test_patient_holds_one_entry_or_one_session() {
    let h = harness();
    let p = Uuid::new_v4();
    let staff = Uuid::new_v4();

    h.dispatcher.enqueue(p, PriorityTier::Normal, None, None).await.unwrap();
    assert_matches!(
        h.dispatcher.enqueue(p, PriorityTier::Urgent, None, None).await,
        Err(DispatchError::AlreadyWaiting(id)) if id == p
    );
    assert_matches!(
        h.dispatcher.start_ad_hoc(p, staff).await,
        Err(DispatchError::AlreadyWaiting(_))
    );

    let session = h.dispatcher.assign_next(staff).await.unwrap();
    assert_matches!(
        h.dispatcher.enqueue(p, PriorityTier::Normal, None, None).await,
        Err(DispatchError::AlreadyInSession(id)) if id == p
    );
    assert_matches!(
        h.dispatcher.start_ad_hoc(p, staff).await,
        Err(DispatchError::AlreadyInSession(_))
    );

    h.dispatcher.end_session(session.id).await.unwrap();
    assert!(h.dispatcher.enqueue(p, PriorityTier::Normal, None, None).await.is_ok());
}

#[tokio::test]
async fn test_cancel_entry_permissions() {
    let h = harness();
    let owner = Uuid::new_v4();
    let ranked = h
        .dispatcher
        .enqueue(owner, PriorityTier::Normal, None, None)
        .await
        .unwrap();

    assert_matches!(
        h.dispatcher.cancel_entry(ranked.entry.id, patient(Uuid::new_v4())).await,
        Err(DispatchError::NotParticipant)
    );

    let cancelled = h.dispatcher.cancel_entry(ranked.entry.id, patient(owner)).await.unwrap();
    assert_eq!(cancelled.status, consultation_queue_cell::QueueStatus::Cancelled);
    assert_eq!(h.dispatcher.queue_depth().await.unwrap(), 0);

    let stored = h.repository.get_queue_entry(ranked.entry.id).await.unwrap().unwrap();
    assert_eq!(stored.status, consultation_queue_cell::QueueStatus::Cancelled);

    assert_matches!(
        h.dispatcher.cancel_entry(ranked.entry.id, patient(owner)).await,
        Err(DispatchError::NotFound(_))
    );
}

// ==============================================================================
// SESSION LIFECYCLE
// ==============================================================================

#[tokio::test]
async fn test_end_session_is_idempotent() {
    let h = harness();
    let session = h
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    let first = h.dispatcher.end_session(session.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = h.dispatcher.end_session(session.id).await.unwrap();

    assert_eq!(first.status, SessionStatus::Ended);
    assert_eq!(second.status, SessionStatus::Ended);
    assert_eq!(first.ended_at, second.ended_at);
    assert!(first.duration_seconds.is_some());

    // A later cancel does not rewrite history either.
    let third = h.dispatcher.cancel_session(session.id).await.unwrap();
    assert_eq!(third.status, SessionStatus::Ended);
    assert_eq!(third.ended_at, first.ended_at);

    assert_eq!(*h.media.ended.lock().unwrap(), vec![session.room_name.clone()]);
    assert!(h.dispatcher.list_active_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_session() {
    let h = harness();
    let session = h
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    let cancelled = h.dispatcher.cancel_session(session.id).await.unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);

    let stored = h.repository.get_call_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_end_unknown_session() {
    let h = harness();
    assert_matches!(
        h.dispatcher.end_session(Uuid::new_v4()).await,
        Err(DispatchError::NotFound(_))
    );
}

#[tokio::test]
async fn test_room_failures_do_not_fail_dispatch() {
    let h = harness();
    h.media.fail_rooms.store(true, Ordering::SeqCst);

    let session = h
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();
    let ended = h.dispatcher.end_session(session.id).await.unwrap();

    assert_eq!(ended.status, SessionStatus::Ended);
    assert!(h.media.created.lock().unwrap().is_empty());
}

// ==============================================================================
// MEDIA TOKENS
// ==============================================================================

#[tokio::test]
async fn test_session_tokens_follow_roles() {
    let h = harness();
    let p = Uuid::new_v4();
    let staff = Uuid::new_v4();
    let session = h.dispatcher.start_ad_hoc(p, staff).await.unwrap();

    let token = h
        .dispatcher
        .issue_session_token(session.id, patient(p), false)
        .await
        .unwrap();
    assert_eq!(token.room_name, session.room_name);
    assert!(token.grant.can_publish);

    let staff_token = h
        .dispatcher
        .issue_session_token(
            session.id,
            Requester { identity: staff, role: UserRole::Staff },
            false,
        )
        .await
        .unwrap();
    assert!(!staff_token.grant.hidden);

    let admin = h
        .dispatcher
        .issue_session_token(
            session.id,
            Requester { identity: Uuid::new_v4(), role: UserRole::Admin },
            true,
        )
        .await
        .unwrap();
    assert!(admin.grant.is_observer());
    assert!(!admin.grant.room_admin);

    assert_matches!(
        h.dispatcher
            .issue_session_token(session.id, patient(Uuid::new_v4()), false)
            .await,
        Err(DispatchError::NotParticipant)
    );
    assert_matches!(
        h.dispatcher
            .issue_session_token(
                session.id,
                Requester { identity: Uuid::new_v4(), role: UserRole::Staff },
                false,
            )
            .await,
        Err(DispatchError::NotParticipant)
    );

    h.dispatcher.end_session(session.id).await.unwrap();
    assert_matches!(
        h.dispatcher.issue_session_token(session.id, patient(p), false).await,
        Err(DispatchError::SessionClosed(id)) if id == session.id
    );
}

#[tokio::test]
async fn test_family_observe_only_linked_consenting_patients() {
    let h = harness();
    let p = Uuid::new_v4();
    let relative = Uuid::new_v4();
    let session = h.dispatcher.start_ad_hoc(p, Uuid::new_v4()).await.unwrap();

    assert_matches!(
        h.dispatcher
            .issue_session_token(session.id, family(relative), false)
            .await,
        Err(DispatchError::NotParticipant)
    );

    h.repository.inner.link_family(relative, p).await;
    assert_matches!(
        h.dispatcher
            .issue_session_token(session.id, family(relative), false)
            .await,
        Err(DispatchError::ObservationNotConsented(id)) if id == p
    );

    h.repository.inner.set_observation_consent(p, true).await;
    // Family always join as hidden observers, whatever they ask for.
    let token = h
        .dispatcher
        .issue_session_token(session.id, family(relative), false)
        .await
        .unwrap();
    assert!(token.grant.is_observer());
    assert!(token.grant.can_subscribe);
    assert!(!token.grant.can_publish);

    // A link to one patient says nothing about another.
    let other = h
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();
    assert_matches!(
        h.dispatcher
            .issue_session_token(other.id, family(relative), false)
            .await,
        Err(DispatchError::NotParticipant)
    );
}

// ==============================================================================
// RECORDINGS
// ==============================================================================

async fn record(h: &common::Harness, patient: Uuid, url: &str) -> Uuid {
    let session = h.dispatcher.start_ad_hoc(patient, Uuid::new_v4()).await.unwrap();
    h.dispatcher.end_session(session.id).await.unwrap();
    h.dispatcher
        .recording_ended(
            &format!("EG_{}", session.id.simple()),
            Some(session.room_name.as_str()),
            RecordingFile {
                url: url.to_string(),
                size_bytes: 2048,
                duration_seconds: 60,
            },
        )
        .await
        .unwrap();
    session.id
}

#[tokio::test]
async fn test_recordings_are_scoped_by_role() {
    let h = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let relative = Uuid::new_v4();
    h.repository.inner.link_family(relative, bob).await;

    let alice_session = record(&h, alice, "s3://recordings/alice.mp4").await;
    let bob_session = record(&h, bob, "s3://recordings/bob.mp4").await;
    // Never recorded.
    let quiet = h.dispatcher.start_ad_hoc(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
    h.dispatcher.end_session(quiet.id).await.unwrap();

    let staff = Requester { identity: Uuid::new_v4(), role: UserRole::Staff };
    assert_eq!(h.dispatcher.list_recordings(staff).await.unwrap().len(), 2);

    let own = h.dispatcher.list_recordings(patient(alice)).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].session_id, alice_session);
    assert_eq!(own[0].url, "s3://recordings/alice.mp4");

    let linked = h.dispatcher.list_recordings(family(relative)).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].session_id, bob_session);

    assert!(h
        .dispatcher
        .list_recordings(family(Uuid::new_v4()))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_session_recordings_check_access() {
    let h = harness();
    let p = Uuid::new_v4();
    let relative = Uuid::new_v4();
    let session_id = record(&h, p, "s3://recordings/call.mp4").await;

    let own = h.dispatcher.session_recordings(session_id, patient(p)).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].size_bytes, Some(2048));

    assert_matches!(
        h.dispatcher.session_recordings(session_id, patient(Uuid::new_v4())).await,
        Err(DispatchError::NotParticipant)
    );
    assert_matches!(
        h.dispatcher.session_recordings(session_id, family(relative)).await,
        Err(DispatchError::NotParticipant)
    );

    // Viewing recordings needs the link but not live-observation consent.
    h.repository.inner.link_family(relative, p).await;
    assert_eq!(
        h.dispatcher.session_recordings(session_id, family(relative)).await.unwrap().len(),
        1
    );

    let unrecorded = h.dispatcher.start_ad_hoc(p, Uuid::new_v4()).await.unwrap();
    assert!(h
        .dispatcher
        .session_recordings(unrecorded.id, patient(p))
        .await
        .unwrap()
        .is_empty());
}

// ==============================================================================
// PROVIDER EVENTS
// ==============================================================================

#[tokio::test]
async fn test_room_finished_ends_session_without_closing_room() {
    let h = harness();
    let session = h
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    h.dispatcher
        .handle_provider_event(ProviderEvent::RoomFinished {
            room_name: session.room_name.clone(),
        })
        .await
        .unwrap();

    let stored = h.dispatcher.get_session(session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
    assert!(h.media.ended.lock().unwrap().is_empty());

    // Redelivery is harmless.
    h.dispatcher
        .handle_provider_event(ProviderEvent::RoomFinished {
            room_name: session.room_name.clone(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recording_lifecycle() {
    let h = harness();
    let session = h
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    h.dispatcher
        .handle_provider_event(ProviderEvent::RecordingStarted {
            room_name: session.room_name.clone(),
            egress_id: "EG_1".to_string(),
        })
        .await
        .unwrap();
    assert!(h.dispatcher.get_session(session.id).await.unwrap().is_recording);

    h.dispatcher
        .handle_provider_event(ProviderEvent::RecordingEnded {
            egress_id: "EG_1".to_string(),
            room_name: None,
            file: RecordingFile {
                url: "s3://recordings/call.mp4".to_string(),
                size_bytes: 1_048_576,
                duration_seconds: 600,
            },
        })
        .await
        .unwrap();

    let stored = h.repository.get_call_session(session.id).await.unwrap().unwrap();
    assert!(!stored.is_recording);
    assert_eq!(stored.recording_url.as_deref(), Some("s3://recordings/call.mp4"));
    assert_eq!(stored.recording_size_bytes, Some(1_048_576));
    assert_eq!(stored.recording_duration_seconds, Some(600));
}

#[tokio::test]
async fn test_recording_ending_after_the_room_closed() {
    let h = harness();
    let session = h
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();
    h.dispatcher
        .recording_started(&session.room_name, "EG_late")
        .await
        .unwrap();
    h.dispatcher
        .handle_provider_event(ProviderEvent::RoomFinished {
            room_name: session.room_name.clone(),
        })
        .await
        .unwrap();

    h.dispatcher
        .handle_provider_event(ProviderEvent::RecordingEnded {
            egress_id: "EG_late".to_string(),
            room_name: Some(session.room_name.clone()),
            file: RecordingFile {
                url: "s3://recordings/late.mp4".to_string(),
                size_bytes: 10,
                duration_seconds: 5,
            },
        })
        .await
        .unwrap();

    let stored = h.repository.get_call_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
    assert_eq!(stored.recording_url.as_deref(), Some("s3://recordings/late.mp4"));
    assert_eq!(h.dispatcher.active_session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_events_for_unknown_rooms_are_acknowledged() {
    let h = harness();
    let result = h
        .dispatcher
        .handle_provider_event(ProviderEvent::RoomFinished {
            room_name: format!("call_{}", Uuid::new_v4()),
        })
        .await;
    assert!(result.is_ok());

    let result = h
        .dispatcher
        .handle_provider_event(ProviderEvent::RecordingStarted {
            room_name: "lobby".to_string(),
            egress_id: "EG_2".to_string(),
        })
        .await;
    assert!(result.is_ok());
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

#[tokio::test]
async fn test_state_changes_reach_connected_clients() {
    let h = harness();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let staff = Uuid::new_v4();

    let mut first_conn = h.hub.register(first, UserRole::Patient).await.unwrap();
    let mut second_conn = h.hub.register(second, UserRole::Patient).await.unwrap();
    let mut staff_conn = h.hub.register(staff, UserRole::Staff).await.unwrap();

    h.dispatcher.enqueue(first, PriorityTier::Normal, None, None).await.unwrap();
    h.dispatcher.enqueue(second, PriorityTier::Normal, None, None).await.unwrap();
    h.hub.snapshot().await.unwrap();

    let events = drain(&mut second_conn.outbound).await;
    let positions = of_type(&events, "queue_position");
    assert_eq!(positions.last().unwrap()["data"]["position"], 2);
    assert_eq!(positions.last().unwrap()["data"]["queue_length"], 2);

    let staff_events = drain(&mut staff_conn.outbound).await;
    let updates = of_type(&staff_events, "queue_updated");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1]["data"]["stats"]["normal"], 2);

    let session = h.dispatcher.assign_next(staff).await.unwrap();
    h.hub.snapshot().await.unwrap();

    let events = drain(&mut first_conn.outbound).await;
    let started = of_type(&events, "call_started");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["data"]["session_id"], session.id.to_string());
    assert_eq!(started[0]["data"]["room_name"], session.room_name);

    let events = drain(&mut second_conn.outbound).await;
    assert_eq!(of_type(&events, "queue_position").last().unwrap()["data"]["position"], 1);

    drain(&mut staff_conn.outbound).await;
    h.dispatcher.end_session(session.id).await.unwrap();
    h.hub.snapshot().await.unwrap();

    for outbound in [&mut first_conn.outbound, &mut staff_conn.outbound] {
        let events = drain(outbound).await;
        let ended = of_type(&events, "call_ended");
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0]["data"]["status"], "ended");
    }
}

#[tokio::test]
async fn test_long_queue_does_not_crowd_out_call_started() {
    let h = harness_with_hub(
        policy(),
        Arc::new(FaultyRepository::default()),
        HubSettings {
            mailbox_capacity: 64,
            connection_buffer_capacity: 128,
            ..hub_settings()
        },
    );
    let head = Uuid::new_v4();
    let mut head_conn = h.hub.register(head, UserRole::Patient).await.unwrap();
    let mut staff_conn = h.hub.register(Uuid::new_v4(), UserRole::Staff).await.unwrap();

    h.dispatcher.enqueue(head, PriorityTier::Urgent, None, None).await.unwrap();
    for _ in 0..40 {
        h.dispatcher
            .enqueue(Uuid::new_v4(), PriorityTier::Normal, None, None)
            .await
            .unwrap();
    }

    let session = h.dispatcher.assign_next(Uuid::new_v4()).await.unwrap();
    assert_eq!(session.patient_id, head);
    h.hub.snapshot().await.unwrap();

    let events = drain(&mut head_conn.outbound).await;
    assert_eq!(of_type(&events, "queue_position").len(), 41);
    let started = of_type(&events, "call_started");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["data"]["session_id"], session.id.to_string());
    assert!(h.hub.is_connected(head).await);

    let updates = drain(&mut staff_conn.outbound).await;
    let updates = of_type(&updates, "queue_updated");
    assert_eq!(updates.len(), 42);
    assert_eq!(updates.last().unwrap()["data"]["queue_length"], 40);
}

#[tokio::test]
async fn test_linked_family_hear_about_call_start() {
    let h = harness();
    let p = Uuid::new_v4();
    let relative = Uuid::new_v4();
    h.repository.inner.link_family(relative, p).await;
    let mut relative_conn = h.hub.register(relative, UserRole::Family).await.unwrap();
    let mut stranger_conn = h.hub.register(Uuid::new_v4(), UserRole::Family).await.unwrap();

    let session = h.dispatcher.start_ad_hoc(p, Uuid::new_v4()).await.unwrap();
    h.hub.snapshot().await.unwrap();

    let events = drain(&mut relative_conn.outbound).await;
    let started = of_type(&events, "call_started");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["data"]["session_id"], session.id.to_string());
    assert_eq!(started[0]["data"]["observer"], true);
    assert!(drain(&mut stranger_conn.outbound).await.is_empty());
}

#[tokio::test]
async fn test_disconnected_clients_do_not_fail_operations() {
    let h = harness();
    let p = Uuid::new_v4();

    let conn = h.hub.register(p, UserRole::Patient).await.unwrap();
    drop(conn);

    h.dispatcher.enqueue(p, PriorityTier::High, None, None).await.unwrap();
    let session = h.dispatcher.assign_next(Uuid::new_v4()).await.unwrap();
    h.hub.snapshot().await.unwrap();

    assert_eq!(session.patient_id, p);
    assert!(!h.hub.is_connected(p).await);
}

// ==============================================================================
// CONTENTION & STORAGE FAILURES
// ==============================================================================

#[tokio::test]
async fn test_contended_lock_reports_busy() {
    let repository = Arc::new(FaultyRepository::default());
    let h = harness_with(
        DispatchPolicy {
            lock_timeout: Duration::from_millis(100),
            storage_timeout: Duration::from_secs(2),
            ..policy()
        },
        repository,
    );
    h.repository.slow_writes(Duration::from_millis(400));

    let slow = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .enqueue(Uuid::new_v4(), PriorityTier::Normal, None, None)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_matches!(
        h.dispatcher
            .enqueue(Uuid::new_v4(), PriorityTier::Normal, None, None)
            .await,
        Err(DispatchError::Busy)
    );
    assert!(slow.await.unwrap().is_ok());
    assert_eq!(h.dispatcher.queue_depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_slow_storage_reads_do_not_hold_the_lock() {
    let h = harness();
    h.repository.slow_reads(Duration::from_millis(800));

    let lookups: Vec<_> = (0..3)
        .map(|n| {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move {
                match n {
                    0 => dispatcher.get_session(Uuid::new_v4()).await.map(|_| ()),
                    1 => dispatcher.end_session(Uuid::new_v4()).await.map(|_| ()),
                    _ => dispatcher
                        .assign_specific(Uuid::new_v4(), Uuid::new_v4())
                        .await
                        .map(|_| ()),
                }
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The lock wait is 500ms; each lookup takes 800ms.
    let p = Uuid::new_v4();
    h.dispatcher.enqueue(p, PriorityTier::Normal, None, None).await.unwrap();
    assert_eq!(h.dispatcher.position_of(p).await.unwrap(), 1);
    assert!(h.dispatcher.list_queue().await.is_ok());

    for lookup in lookups {
        assert_matches!(lookup.await.unwrap(), Err(DispatchError::NotFound(_)));
    }
}

#[tokio::test]
async fn test_failed_write_leaves_memory_unchanged() {
    let h = harness();
    let p = Uuid::new_v4();
    h.dispatcher.enqueue(p, PriorityTier::Normal, None, None).await.unwrap();

    h.repository.fail_writes(true);
    assert_matches!(
        h.dispatcher
            .enqueue(Uuid::new_v4(), PriorityTier::Urgent, None, None)
            .await,
        Err(DispatchError::StorageUnavailable(_))
    );
    assert_matches!(
        h.dispatcher.assign_next(Uuid::new_v4()).await,
        Err(DispatchError::StorageUnavailable(_))
    );

    assert_eq!(h.dispatcher.queue_depth().await.unwrap(), 1);
    assert_eq!(h.dispatcher.position_of(p).await.unwrap(), 1);
    assert_eq!(h.dispatcher.active_session_count().await.unwrap(), 0);

    h.repository.fail_writes(false);
    let session = h.dispatcher.assign_next(Uuid::new_v4()).await.unwrap();
    assert_eq!(session.patient_id, p);
}

#[tokio::test]
async fn test_slow_write_times_out() {
    let repository = Arc::new(FaultyRepository::default());
    let h = harness_with(
        DispatchPolicy {
            storage_timeout: Duration::from_millis(100),
            ..policy()
        },
        repository,
    );
    h.repository.slow_writes(Duration::from_millis(300));

    assert_matches!(
        h.dispatcher
            .enqueue(Uuid::new_v4(), PriorityTier::Normal, None, None)
            .await,
        Err(DispatchError::StorageUnavailable(_))
    );
    assert_eq!(h.dispatcher.queue_depth().await.unwrap(), 0);
    assert!(h.repository.list_waiting_entries().await.unwrap().is_empty());
}

// ==============================================================================
// HYDRATION
// ==============================================================================

#[tokio::test]
async fn test_hydrate_restores_state_and_retries_reads() {
    let first = harness();
    let waiting = Uuid::new_v4();
    let in_call = Uuid::new_v4();
    first.dispatcher.enqueue(waiting, PriorityTier::High, None, None).await.unwrap();
    first.dispatcher.enqueue(Uuid::new_v4(), PriorityTier::Low, None, None).await.unwrap();
    let session = first.dispatcher.start_ad_hoc(in_call, Uuid::new_v4()).await.unwrap();

    let restarted = harness_with(policy(), first.repository.clone());
    restarted.repository.fail_next_reads(2);
    let attempts_before = restarted.repository.read_attempts.load(Ordering::SeqCst);

    let summary = restarted.dispatcher.hydrate().await.unwrap();
    assert_eq!(
        summary,
        HydrationSummary {
            waiting_entries: 2,
            active_sessions: 1,
        }
    );
    // Two failed reads, then one success per listing.
    assert_eq!(
        restarted.repository.read_attempts.load(Ordering::SeqCst) - attempts_before,
        4
    );

    assert_eq!(restarted.dispatcher.position_of(waiting).await.unwrap(), 1);
    assert_eq!(
        restarted.dispatcher.get_session(session.id).await.unwrap().patient_id,
        in_call
    );
    assert_matches!(
        restarted
            .dispatcher
            .enqueue(in_call, PriorityTier::Normal, None, None)
            .await,
        Err(DispatchError::AlreadyInSession(_))
    );
}

#[tokio::test]
async fn test_hydrate_gives_up_after_bounded_retries() {
    let h = harness();
    h.repository.fail_next_reads(10);

    assert_matches!(
        h.dispatcher.hydrate().await,
        Err(DispatchError::StorageUnavailable(_))
    );
    // One attempt plus two retries.
    assert_eq!(h.repository.read_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_ended_sessions_leave_memory() {
    let h = harness();
    let session = h
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();
    h.dispatcher.end_session(session.id).await.unwrap();

    let reads_before = h.repository.read_attempts.load(Ordering::SeqCst);
    let stored = h.dispatcher.get_session(session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
    // Served by the repository, not the registry.
    assert_eq!(h.repository.read_attempts.load(Ordering::SeqCst) - reads_before, 1);
    assert_eq!(h.dispatcher.active_session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_get_session_falls_back_to_repository() {
    let first = harness();
    let session = first
        .dispatcher
        .start_ad_hoc(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();
    first.dispatcher.end_session(session.id).await.unwrap();

    // Not hydrated: ended sessions only live in storage.
    let other = harness_with(policy(), first.repository.clone());
    let stored = other.dispatcher.get_session(session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
}
