//! Broadcast selection, fan-out and membership integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use wavehub::{AdapterEvent, EmitError, Namespace, ParentNamespace};

mod common;
use common::{connect, rooms, RecordingTransport};

/// A session's own id doubles as a room, so unicast rides the broadcast path.
#[test]
fn test_unicast_via_personal_room() {
    let nsp = Namespace::new("/");
    let (a, ta) = connect(&nsp, "127.0.0.1:1");
    let (_b, tb) = connect(&nsp, "127.0.0.1:2");

    nsp.to([a.id()])
        .emit("x", vec![json!(1).into()])
        .expect("emit failed");

    assert_eq!(ta.texts(), vec![r#"2["x",1]"#.to_string()]);
    assert_eq!(tb.write_count(), 0);
}

/// A session in several targeted rooms is written to exactly once.
#[test]
fn test_overlapping_rooms_deliver_once() {
    let nsp = Namespace::new("/");
    let (a, ta) = connect(&nsp, "127.0.0.1:1");
    a.join(&rooms(&["r1", "r2"]));

    nsp.to(["r1", "r2"]).emit("e", vec![]).expect("emit failed");

    assert_eq!(ta.write_count(), 1);
}

/// A session matching both a targeted and an excluded room is excluded.
#[test]
fn test_except_wins_over_targeted_rooms() {
    let nsp = Namespace::new("/");
    let (a, ta) = connect(&nsp, "127.0.0.1:1");
    let (b, tb) = connect(&nsp, "127.0.0.1:2");
    a.join(&rooms(&["r1", "r2"]));
    b.join(&rooms(&["r1"]));

    nsp.to(["r1"])
        .except(["r2"])
        .emit("e", vec![])
        .expect("emit failed");

    assert_eq!(ta.write_count(), 0);
    assert_eq!(tb.write_count(), 1);
}

/// Empty rooms target the whole namespace; except still subtracts.
#[test]
fn test_broadcast_to_all_honors_except() {
    let nsp = Namespace::new("/");
    let (a, ta) = connect(&nsp, "127.0.0.1:1");
    let (_b, tb) = connect(&nsp, "127.0.0.1:2");
    a.join(&rooms(&["muted"]));

    nsp.except(["muted"]).emit("e", vec![]).expect("emit failed");

    assert_eq!(ta.write_count(), 0);
    assert_eq!(tb.write_count(), 1);
}

#[test]
fn test_write_options_carry_broadcast_flags() {
    let nsp = Namespace::new("/");
    let (_a, ta) = connect(&nsp, "127.0.0.1:1");

    nsp.volatile()
        .compress(true)
        .emit("e", vec![])
        .expect("emit failed");

    let writes = ta.writes();
    assert_eq!(writes.len(), 1);
    let opts = writes[0].1;
    assert!(opts.pre_encoded);
    assert!(opts.volatile);
    assert!(opts.compress);
}

#[test]
fn test_reserved_event_is_rejected_without_broadcasting() {
    let nsp = Namespace::new("/");
    let (_a, ta) = connect(&nsp, "127.0.0.1:1");

    let result = nsp.emit("connection", vec![]);
    assert!(matches!(result, Err(EmitError::ReservedEvent(name)) if name == "connection"));
    assert_eq!(ta.write_count(), 0);
}

#[test]
fn test_all_sockets_deduplicates_across_rooms() {
    let nsp = Namespace::new("/");
    let (a, _ta) = connect(&nsp, "127.0.0.1:1");
    let (b, _tb) = connect(&nsp, "127.0.0.1:2");
    a.join(&rooms(&["r1", "r2"]));
    b.join(&rooms(&["r2"]));

    let matched = nsp.to(["r1", "r2"]).all_sockets().expect("no adapter");
    assert_eq!(matched.len(), 2);
    assert!(matched.contains(a.id()));
    assert!(matched.contains(b.id()));

    let everyone = nsp.all_sockets().expect("no adapter");
    assert_eq!(everyone.len(), 2);
}

/// Remote socket views are snapshots: id, rooms and data are captured at
/// fetch time, and emitting through one targets the personal room.
#[test]
fn test_fetch_sockets_returns_usable_snapshots() {
    let nsp = Namespace::new("/");
    let (a, ta) = connect(&nsp, "127.0.0.1:1");
    a.join(&rooms(&["r"]));
    a.set_data(json!({ "name": "ada" }));

    let fetched = nsp.to(["r"]).fetch_sockets();
    assert_eq!(fetched.len(), 1);
    let remote = &fetched[0];
    assert_eq!(remote.id(), a.id());
    assert!(remote.rooms().contains("r"));
    assert!(remote.rooms().contains(a.id()));
    assert_eq!(remote.data(), &json!({ "name": "ada" }));

    remote
        .emit("direct", vec![json!("hello").into()])
        .expect("emit failed");
    assert_eq!(ta.texts(), vec![r#"2["direct","hello"]"#.to_string()]);
}

#[test]
fn test_bulk_join_and_leave() {
    let nsp = Namespace::new("/");
    let (a, _ta) = connect(&nsp, "127.0.0.1:1");
    let (b, _tb) = connect(&nsp, "127.0.0.1:2");
    a.join(&rooms(&["staging"]));
    b.join(&rooms(&["staging"]));

    nsp.to(["staging"]).sockets_join(&rooms(&["prod"]));
    assert!(a.rooms().contains("prod"));
    assert!(b.rooms().contains("prod"));

    nsp.to(["prod"]).sockets_leave(&rooms(&["staging"]));
    assert!(!a.rooms().contains("staging"));
    assert!(!b.rooms().contains("staging"));
}

#[test]
fn test_disconnect_sockets_with_close_tears_down_transport() {
    let nsp = Namespace::new("/");
    let (a, ta) = connect(&nsp, "127.0.0.1:1");
    a.join(&rooms(&["doomed"]));

    nsp.to(["doomed"]).disconnect_sockets(true);

    assert!(ta.closed());
    assert!(!a.connected());
    assert_eq!(nsp.socket_count(), 0);
    assert!(a.rooms().is_empty());
}

#[test]
fn test_disconnect_sockets_without_close_sends_disconnect_packet() {
    let nsp = Namespace::new("/");
    let (a, ta) = connect(&nsp, "127.0.0.1:1");

    nsp.disconnect_sockets(false);

    assert!(!ta.closed());
    assert_eq!(ta.texts(), vec!["1".to_string()]);
    assert!(!a.connected());
    assert_eq!(nsp.socket_count(), 0);
}

/// The outgoing hook fires at most once per broadcast that selects the
/// session, and not at all when the session is excluded.
#[test]
fn test_outgoing_listener_fires_once_per_selection() {
    let nsp = Namespace::new("/");
    let (a, _ta) = connect(&nsp, "127.0.0.1:1");
    a.join(&rooms(&["r1", "r2"]));

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    a.set_outgoing_listener(Arc::new(move |_packet| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    nsp.to(["r1", "r2"]).emit("e", vec![]).expect("emit failed");
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    nsp.to(["r1"]).except(["r2"]).emit("e", vec![]).expect("emit failed");
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_middleware_rejection_blocks_registration() {
    let nsp = Namespace::new("/");
    nsp.use_middleware(Arc::new(|_session: &wavehub::Session| {
        anyhow::bail!("not allowed")
    }));

    let transport = RecordingTransport::new();
    let result = nsp.add(transport, "127.0.0.1:1", json!(null));

    assert!(result.is_err());
    assert_eq!(nsp.socket_count(), 0);
}

#[test]
fn test_membership_events_for_session_lifecycle() {
    let nsp = Namespace::new("/");
    let mut events = nsp.adapter().subscribe();

    let (a, _ta) = connect(&nsp, "127.0.0.1:1");
    assert_eq!(
        events.try_recv().unwrap(),
        AdapterEvent::RoomCreated(a.id().to_string())
    );
    assert_eq!(
        events.try_recv().unwrap(),
        AdapterEvent::Joined {
            room: a.id().to_string(),
            sid: a.id().to_string()
        }
    );

    a.join(&rooms(&["r"]));
    assert_eq!(
        events.try_recv().unwrap(),
        AdapterEvent::RoomCreated("r".into())
    );
    assert_eq!(
        events.try_recv().unwrap(),
        AdapterEvent::Joined {
            room: "r".into(),
            sid: a.id().to_string()
        }
    );

    a.leave("r");
    assert_eq!(
        events.try_recv().unwrap(),
        AdapterEvent::Left {
            room: "r".into(),
            sid: a.id().to_string()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        AdapterEvent::RoomDeleted("r".into())
    );
}

#[test]
fn test_parent_namespace_fans_out_to_children() {
    let parent = ParentNamespace::new();
    let chat = parent.create_child("/chat");
    let news = parent.create_child("/news");
    let (_a, ta) = connect(&chat, "127.0.0.1:1");
    let (_b, tb) = connect(&news, "127.0.0.1:2");

    parent
        .emit("announce", vec![json!("v2 is out").into()])
        .expect("emit failed");

    assert_eq!(ta.texts(), vec![r#"2/chat,["announce","v2 is out"]"#.to_string()]);
    assert_eq!(tb.texts(), vec![r#"2/news,["announce","v2 is out"]"#.to_string()]);

    assert!(matches!(
        parent.fetch_sockets(),
        Err(EmitError::UnsupportedOnParent)
    ));
}

/// Selectors seeded from the parent's namespace route through the broadcast
/// override into every child adapter.
#[test]
fn test_parent_broadcast_override_reaches_children() {
    let parent = ParentNamespace::new();
    let chat = parent.create_child("/chat");
    let (_a, ta) = connect(&chat, "127.0.0.1:1");

    parent
        .namespace()
        .emit("ping", vec![])
        .expect("emit failed");

    assert_eq!(ta.texts(), vec![r#"2/chat,["ping"]"#.to_string()]);
}

#[test]
fn test_child_namespaces_inherit_connection_listeners() {
    let parent = ParentNamespace::new();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    parent.namespace().on_connection(Arc::new(move |_session| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let child = parent.create_child("/chat");
    let (_a, _ta) = connect(&child, "127.0.0.1:1");

    assert_eq!(connections.load(Ordering::SeqCst), 1);
}
