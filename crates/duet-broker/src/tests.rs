use super::*;
use serde_json::value::RawValue;

fn payload(json: &str) -> Option<Payload> {
    Some(RawValue::from_string(json.to_string()).unwrap())
}

fn drain(inbox: &mut Inbox) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = inbox.try_recv() {
        events.push(event);
    }
    events
}

fn matches_in(events: &[ServerEvent]) -> Vec<(SessionId, Role)> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::MatchFound {
                session_id, role, ..
            } => Some((*session_id, *role)),
            _ => None,
        })
        .collect()
}

fn partner_left_count(events: &[ServerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ServerEvent::PartnerLeft))
        .count()
}

fn relayed(events: &[ServerEvent]) -> Vec<(SignalKind, Option<String>)> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Signal(sig) => {
                Some((sig.kind, sig.payload.as_ref().map(|p| p.get().to_string())))
            }
            _ => None,
        })
        .collect()
}

async fn paired(broker: &Broker) -> (ConnectionHandle, ConnectionHandle, SessionId) {
    let mut a = broker.register().await;
    let mut b = broker.register().await;
    broker.find_match(a.id).await.unwrap();
    broker.find_match(b.id).await.unwrap();
    let found = matches_in(&drain(&mut a.inbox));
    drain(&mut b.inbox);
    (a, b, found[0].0)
}

#[tokio::test]
async fn first_come_pairs_first_and_initiates() {
    let broker = Broker::default();
    let mut c1 = broker.register().await;
    let mut c2 = broker.register().await;

    broker.find_match(c1.id).await.unwrap();
    assert!(matches!(
        broker.connection_state(c1.id).await,
        Some(ConnectionState::Waiting { .. })
    ));
    broker.find_match(c2.id).await.unwrap();

    let e1 = drain(&mut c1.inbox);
    let e2 = drain(&mut c2.inbox);
    assert!(matches!(e1[0], ServerEvent::Waiting));

    let m1 = matches_in(&e1);
    let m2 = matches_in(&e2);
    assert_eq!(m1.len(), 1);
    assert_eq!(m2.len(), 1);
    assert_eq!(m1[0].0, m2[0].0);
    assert_eq!(m1[0].1, Role::Initiator);
    assert_eq!(m2[0].1, Role::Responder);

    let session = broker.session(m1[0].0).await.unwrap();
    assert_eq!(session.initiator, c1.id);
    assert_eq!(session.responder, c2.id);
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(
        broker.connection_state(c2.id).await,
        Some(ConnectionState::Paired {
            session: session.id
        })
    );
}

#[tokio::test]
async fn offer_next_and_repair_scenario() {
    let broker = Broker::default();
    let (mut c1, mut c2, first) = paired(&broker).await;

    broker
        .relay(c1.id, Signal::new(SignalKind::Offer, payload(r#""O1""#)))
        .await
        .unwrap();
    assert_eq!(
        relayed(&drain(&mut c2.inbox)),
        vec![(SignalKind::Offer, Some(r#""O1""#.to_string()))]
    );

    broker.next(c2.id).await.unwrap();
    assert_eq!(partner_left_count(&drain(&mut c1.inbox)), 1);
    assert_eq!(broker.connection_state(c1.id).await, Some(ConnectionState::Idle));
    assert!(broker.is_queued(c2.id).await);
    assert!(broker.session(first).await.is_none());
    let c2_events = drain(&mut c2.inbox);
    assert!(matches!(c2_events.as_slice(), [ServerEvent::Waiting]));

    let mut c3 = broker.register().await;
    broker.find_match(c3.id).await.unwrap();

    let m2 = matches_in(&drain(&mut c2.inbox));
    let m3 = matches_in(&drain(&mut c3.inbox));
    assert_eq!(m2.len(), 1);
    assert_eq!(m2[0].0, m3[0].0);
    assert_ne!(m2[0].0, first);
    // C2 waited longer than C3, so it opens the negotiation this time.
    assert_eq!(m2[0].1, Role::Initiator);
    assert_eq!(m3[0].1, Role::Responder);
    // C1 went idle and was not pulled into the new pair.
    assert_eq!(broker.connection_state(c1.id).await, Some(ConnectionState::Idle));
    assert!(drain(&mut c1.inbox).is_empty());
}

#[tokio::test]
async fn next_leaves_requester_queued_once_and_partner_idle() {
    let broker = Broker::default();
    let (a, b, session) = paired(&broker).await;

    broker.next(a.id).await.unwrap();

    assert!(broker.is_queued(a.id).await);
    assert!(!broker.is_queued(b.id).await);
    assert_eq!(broker.stats().await.waiting, 1);
    assert_eq!(broker.connection_state(b.id).await, Some(ConnectionState::Idle));
    assert!(broker.session(session).await.is_none());
    assert!(broker.session_of(a.id).await.is_none());
    assert!(broker.session_of(b.id).await.is_none());

    // A second `next` while waiting changes nothing.
    assert_eq!(broker.next(a.id).await, Err(BrokerError::AlreadyQueued));
    assert_eq!(broker.stats().await.waiting, 1);
}

#[tokio::test]
async fn relay_preserves_per_sender_order() {
    let broker = Broker::default();
    let (a, mut b, _) = paired(&broker).await;

    for i in 0..20 {
        let candidate = format!(r#"{{"candidate":"c{i}","sdpMid":"0"}}"#);
        broker
            .relay(a.id, Signal::new(SignalKind::IceCandidate, payload(&candidate)))
            .await
            .unwrap();
    }

    let got = relayed(&drain(&mut b.inbox));
    assert_eq!(got.len(), 20);
    for (i, (kind, body)) in got.into_iter().enumerate() {
        assert_eq!(kind, SignalKind::IceCandidate);
        assert_eq!(
            body.unwrap(),
            format!(r#"{{"candidate":"c{i}","sdpMid":"0"}}"#)
        );
    }
}

#[tokio::test]
async fn payload_bytes_are_forwarded_verbatim() {
    let broker = Broker::default();
    let (a, mut b, _) = paired(&broker).await;

    // Odd spacing and key order must survive the hop untouched.
    let sdp = r#"{ "type":"offer",  "sdp":"v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\n" }"#;
    broker
        .relay(a.id, Signal::new(SignalKind::Offer, payload(sdp)))
        .await
        .unwrap();

    let got = relayed(&drain(&mut b.inbox));
    assert_eq!(got[0].1.as_deref(), Some(sdp));
}

#[tokio::test]
async fn cancel_withdraws_without_creating_a_session() {
    let broker = Broker::default();
    let mut a = broker.register().await;
    let mut b = broker.register().await;

    broker.find_match(a.id).await.unwrap();
    broker.cancel(a.id).await.unwrap();
    assert!(!broker.is_queued(a.id).await);
    assert_eq!(broker.connection_state(a.id).await, Some(ConnectionState::Idle));

    broker.find_match(b.id).await.unwrap();
    assert!(matches_in(&drain(&mut a.inbox)).is_empty());
    assert!(matches_in(&drain(&mut b.inbox)).is_empty());
    assert_eq!(broker.stats().await.sessions_created, 0);

    // Cancelling again is harmless.
    assert_eq!(broker.cancel(a.id).await, Ok(()));
}

#[tokio::test]
async fn cancel_while_paired_is_rejected() {
    let broker = Broker::default();
    let (a, _b, session) = paired(&broker).await;

    assert_eq!(broker.cancel(a.id).await, Err(BrokerError::NotWaiting));
    assert!(broker.session(session).await.is_some());
}

#[tokio::test]
async fn disconnect_mid_session_notifies_partner_once() {
    let broker = Broker::default();
    let (c1, mut c2, session) = paired(&broker).await;

    broker.unregister(c1.id).await;
    broker.unregister(c1.id).await;

    assert_eq!(partner_left_count(&drain(&mut c2.inbox)), 1);
    assert_eq!(broker.connection_state(c2.id).await, Some(ConnectionState::Idle));
    assert!(!broker.is_queued(c2.id).await);
    assert!(broker.session(session).await.is_none());
    assert_eq!(broker.connection_state(c1.id).await, None);

    let late = broker
        .relay(c2.id, Signal::new(SignalKind::Answer, payload(r#""A1""#)))
        .await;
    assert_eq!(late, Err(BrokerError::NoActiveSession));
}

#[tokio::test]
async fn disconnect_while_waiting_leaves_the_queue() {
    let broker = Broker::default();
    let a = broker.register().await;
    let mut b = broker.register().await;

    broker.find_match(a.id).await.unwrap();
    broker.unregister(a.id).await;
    broker.find_match(b.id).await.unwrap();

    assert!(matches_in(&drain(&mut b.inbox)).is_empty());
    assert_eq!(broker.stats().await.waiting, 1);
    assert_eq!(broker.stats().await.connections, 1);
}

#[tokio::test]
async fn duplicate_find_match_is_a_noop() {
    let broker = Broker::default();
    let mut a = broker.register().await;

    broker.find_match(a.id).await.unwrap();
    assert_eq!(broker.find_match(a.id).await, Err(BrokerError::AlreadyQueued));
    assert_eq!(drain(&mut a.inbox).len(), 1);

    let mut b = broker.register().await;
    broker.find_match(b.id).await.unwrap();
    assert_eq!(broker.find_match(b.id).await, Err(BrokerError::AlreadyPaired));
    assert_eq!(matches_in(&drain(&mut b.inbox)).len(), 1);
}

#[tokio::test]
async fn relay_without_session_is_rejected() {
    let broker = Broker::default();
    let a = broker.register().await;

    let err = broker
        .relay(a.id, Signal::new(SignalKind::Offer, payload("{}")))
        .await;
    assert_eq!(err, Err(BrokerError::NoActiveSession));

    broker.find_match(a.id).await.unwrap();
    let err = broker.relay(a.id, Signal::new(SignalKind::Typing, None)).await;
    assert_eq!(err, Err(BrokerError::NoActiveSession));
}

#[tokio::test]
async fn invalid_chat_is_not_forwarded() {
    let broker = Broker::default();
    let (a, mut b, _) = paired(&broker).await;

    let err = broker
        .relay(a.id, Signal::new(SignalKind::Chat, payload(r#"{"text":""}"#)))
        .await;
    assert!(matches!(err, Err(BrokerError::InvalidPayload { .. })));
    assert!(drain(&mut b.inbox).is_empty());

    broker
        .relay(a.id, Signal::new(SignalKind::Chat, payload(r#"{"emoji":"🔥"}"#)))
        .await
        .unwrap();
    assert_eq!(relayed(&drain(&mut b.inbox)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn typing_bursts_are_coalesced() {
    let broker = Broker::default();
    let (a, mut b, _) = paired(&broker).await;
    let typing = || Signal::new(SignalKind::Typing, None);

    assert_eq!(broker.relay(a.id, typing()).await, Ok(Delivery::Forwarded));
    assert_eq!(broker.relay(a.id, typing()).await, Ok(Delivery::Coalesced));
    tokio::time::advance(Duration::from_millis(400)).await;
    assert_eq!(broker.relay(a.id, typing()).await, Ok(Delivery::Coalesced));
    tokio::time::advance(Duration::from_millis(700)).await;
    assert_eq!(broker.relay(a.id, typing()).await, Ok(Delivery::Forwarded));

    assert_eq!(relayed(&drain(&mut b.inbox)).len(), 2);
}

#[tokio::test]
async fn leave_ends_session_without_requeue() {
    let broker = Broker::default();
    let (mut a, mut b, session) = paired(&broker).await;

    broker.leave(a.id).await.unwrap();

    assert_eq!(partner_left_count(&drain(&mut b.inbox)), 1);
    assert!(drain(&mut a.inbox).is_empty());
    for id in [a.id, b.id] {
        assert_eq!(broker.connection_state(id).await, Some(ConnectionState::Idle));
        assert!(!broker.is_queued(id).await);
    }
    assert!(broker.session(session).await.is_none());
    assert_eq!(broker.leave(a.id).await, Err(BrokerError::NoActiveSession));
}

#[tokio::test]
async fn slow_partner_is_dropped_on_overflow() {
    let broker = Broker::new(BrokerSettings {
        outbound_capacity: 2,
        ..BrokerSettings::default()
    });
    let mut slow = broker.register().await;
    let mut fast = broker.register().await;
    broker.find_match(slow.id).await.unwrap();
    broker.find_match(fast.id).await.unwrap();
    // `slow` now holds waiting + match-found and never reads.
    drain(&mut fast.inbox);

    let err = broker
        .relay(fast.id, Signal::new(SignalKind::Offer, payload(r#""O""#)))
        .await;
    assert_eq!(err, Err(BrokerError::TransportFailure));

    assert_eq!(broker.connection_state(slow.id).await, None);
    assert_eq!(broker.connection_state(fast.id).await, Some(ConnectionState::Idle));
    assert_eq!(partner_left_count(&drain(&mut fast.inbox)), 1);

    // The evicted connection's queue is closed once drained.
    assert_eq!(drain(&mut slow.inbox).len(), 2);
    assert!(matches!(
        slow.inbox.try_recv(),
        Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
    ));
}

#[tokio::test]
async fn closed_writer_counts_as_disconnect() {
    let broker = Broker::default();
    let a = broker.register().await;
    let mut b = broker.register().await;
    broker.find_match(a.id).await.unwrap();
    let a_id = a.id;
    drop(a);

    // Pairing tries to deliver match-found to `a`, finds its queue closed,
    // and tears the fresh session down again.
    broker.find_match(b.id).await.unwrap();

    let events = drain(&mut b.inbox);
    assert_eq!(matches_in(&events).len(), 1);
    assert_eq!(partner_left_count(&events), 1);
    assert_eq!(broker.connection_state(a_id).await, None);
    assert_eq!(broker.connection_state(b.id).await, Some(ConnectionState::Idle));
    assert_eq!(broker.stats().await.active_sessions, 0);
}

#[tokio::test]
async fn dead_waiter_is_never_paired() {
    let broker = Broker::default();
    let mut b = broker.register().await;
    broker.find_match(b.id).await.unwrap();

    let a = broker.register().await;
    let a_id = a.id;
    drop(a);

    // `a`'s writer is already gone, so its `waiting` ack fails and it must
    // not be handed to `b` as a partner.
    broker.find_match(a_id).await.unwrap();

    let events = drain(&mut b.inbox);
    assert!(matches!(events.as_slice(), [ServerEvent::Waiting]));
    assert_eq!(broker.stats().await.sessions_created, 0);
    assert_eq!(broker.connection_state(a_id).await, None);
    assert!(broker.is_queued(b.id).await);

    // `b` kept its place and opens the next real match.
    let mut c = broker.register().await;
    broker.find_match(c.id).await.unwrap();
    assert_eq!(matches_in(&drain(&mut b.inbox))[0].1, Role::Initiator);
    assert_eq!(matches_in(&drain(&mut c.inbox))[0].1, Role::Responder);
    assert_eq!(broker.stats().await.sessions_created, 1);
}

#[tokio::test]
async fn skip_with_closed_writer_does_not_repair() {
    let broker = Broker::default();
    let (a, mut b, _) = paired(&broker).await;
    let mut waiting = broker.register().await;
    broker.find_match(waiting.id).await.unwrap();
    drain(&mut waiting.inbox);

    let a_id = a.id;
    drop(a);
    broker.next(a_id).await.unwrap();

    assert_eq!(partner_left_count(&drain(&mut b.inbox)), 1);
    assert!(matches_in(&drain(&mut waiting.inbox)).is_empty());
    assert!(broker.is_queued(waiting.id).await);
    assert_eq!(broker.connection_state(a_id).await, None);
    assert_eq!(broker.stats().await.active_sessions, 0);
}

#[tokio::test]
async fn relay_into_closing_session_is_rejected() {
    let broker = Broker::default();
    let (a, mut b, session) = paired(&broker).await;

    broker
        .state
        .lock()
        .await
        .sessions
        .get_mut(session)
        .unwrap()
        .state = SessionState::Closing;

    let err = broker
        .relay(a.id, Signal::new(SignalKind::Offer, payload(r#""O1""#)))
        .await;
    assert_eq!(err, Err(BrokerError::SessionClosing));
    assert!(drain(&mut b.inbox).is_empty());
}

#[tokio::test]
async fn zero_outbound_capacity_is_raised_to_one() {
    let broker = Broker::new(BrokerSettings {
        outbound_capacity: 0,
        ..BrokerSettings::default()
    });
    assert_eq!(broker.settings().outbound_capacity, 1);

    let mut a = broker.register().await;
    broker.find_match(a.id).await.unwrap();
    assert!(matches!(
        drain(&mut a.inbox).as_slice(),
        [ServerEvent::Waiting]
    ));
}

#[tokio::test(start_paused = true)]
async fn stale_waiters_expire() {
    let broker = Broker::default();
    let mut old = broker.register().await;
    broker.find_match(old.id).await.unwrap();

    tokio::time::advance(Duration::from_secs(20)).await;
    let mut fresh = broker.register().await;
    // `old` withdraws, so `fresh` waits alone instead of pairing.
    broker.cancel(old.id).await.unwrap();
    broker.find_match(fresh.id).await.unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    let expired = broker.expire_waiting(Duration::from_secs(30)).await;
    assert_eq!(expired, vec![fresh.id]);
    assert_eq!(broker.connection_state(fresh.id).await, Some(ConnectionState::Idle));
    assert!(matches!(
        drain(&mut fresh.inbox).last(),
        Some(ServerEvent::MatchTimeout)
    ));
    assert!(
        !drain(&mut old.inbox)
            .iter()
            .any(|e| matches!(e, ServerEvent::MatchTimeout))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_find_match_pairs_everyone_once() {
    let broker = Broker::default();
    let mut tasks = Vec::new();

    for _ in 0..50 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            let handle = broker.register().await;
            broker.find_match(handle.id).await.unwrap();
            handle
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    let stats = broker.stats().await;
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.active_sessions, 25);

    let mut per_session: std::collections::HashMap<SessionId, Vec<Role>> =
        std::collections::HashMap::new();
    for handle in &mut handles {
        let found = matches_in(&drain(&mut handle.inbox));
        assert_eq!(found.len(), 1, "each connection is matched exactly once");
        per_session.entry(found[0].0).or_default().push(found[0].1);
    }
    assert_eq!(per_session.len(), 25);
    for roles in per_session.values() {
        assert_eq!(roles.len(), 2);
        assert!(roles.contains(&Role::Initiator));
        assert!(roles.contains(&Role::Responder));
    }
}
