use std::sync::Arc;

use parley_mesh::loopback::LoopbackMedia;
use parley_mesh::{ClientEvent, ClientRegistry, MediaStream, PeerPhase};
use parley_proto::{Identity, PlayerInfo};
use tokio::sync::mpsc;

struct Side {
    registry: ClientRegistry,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    media: Arc<LoopbackMedia>,
}

fn side(local: &str) -> Side {
    let media = LoopbackMedia::new();
    let (registry, events) = ClientRegistry::new(media.clone());
    registry.set_local_identity(Identity::from(local));
    Side {
        registry,
        events,
        media,
    }
}

async fn next_connected(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> MediaStream {
    loop {
        if let ClientEvent::Connected { remote, .. } = events.recv().await.expect("event stream open") {
            return remote;
        }
    }
}

#[test_timeout::tokio_timeout_test]
async fn caller_and_callee_connect_then_tear_down() {
    let amy = Identity::from("amy");
    let ben = Identity::from("ben");
    let mut a = side("amy");
    let mut b = side("ben");

    let a_peer = a.registry.add_peer(ben.clone(), PlayerInfo::default());
    let b_peer = b.registry.add_peer(amy.clone(), PlayerInfo::default());

    a.registry.dial(&a_peer).await.expect("dial task");
    let a_call = a.media.last_outbound().expect("outbound call");
    assert_eq!(a_call.remote(), &ben);

    // The media layer rings the callee.
    let (ringing, b_call) = b.media.incoming(amy.clone());
    b.registry
        .on_incoming_call(ringing)
        .expect("routed to amy's peer")
        .await
        .expect("answer task");
    assert_eq!(b_peer.phase(), PeerPhase::DialingIn);

    a_call.emit_stream(MediaStream::new("ben-mic"));
    b_call.emit_stream(MediaStream::new("amy-mic"));
    assert_eq!(next_connected(&mut a.events).await, MediaStream::new("ben-mic"));
    assert_eq!(next_connected(&mut b.events).await, MediaStream::new("amy-mic"));
    assert!(a_peer.is_connected() && b_peer.is_connected());

    // Ben leaves; the hang-up reaches Amy as a close event.
    b.registry.remove_peer(&amy).expect("amy tracked");
    assert_eq!(b_call.close_requests(), 1);
    a_call.emit_close();

    loop {
        if let ClientEvent::PeerClosed { identity } = a.events.recv().await.expect("event") {
            assert_eq!(identity, ben);
            break;
        }
    }
    assert_eq!(a_peer.phase(), PeerPhase::Closed);
    let replacement = a.registry.get_peer(&ben).expect("ben still known");
    assert_eq!(replacement.phase(), PeerPhase::Idle);

    // The next auto-dial pass retries the dropped call.
    assert_eq!(a.registry.auto_dial(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn one_failing_peer_leaves_the_rest_alone() {
    let mut a = side("amy");
    let ben = a.registry.add_peer(Identity::from("ben"), PlayerInfo::default());
    let cat = a.registry.add_peer(Identity::from("cat"), PlayerInfo::default());
    a.registry.dial(&ben).await.expect("dial");
    a.registry.dial(&cat).await.expect("dial");

    let calls = a.media.outbound_calls();
    calls[0].emit_error("transport failed");
    calls[1].emit_stream(MediaStream::new("cat-mic"));

    assert_eq!(next_connected(&mut a.events).await, MediaStream::new("cat-mic"));
    assert_eq!(cat.phase(), PeerPhase::Connected);
    assert_eq!(a.registry.len(), 2);
}
