//! Multi-node scenarios over the simulated medium.

use lora_mesh_link::link::AckMatch;
use lora_mesh_link::lora::{RadioTransport, SimMedium, SimTransport};
use lora_mesh_link::protocol::{decode, MessageType, BROADCAST_ID};
use lora_mesh_link::{LinkConfig, LoRaLink, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn node(medium: &SimMedium, id: u16) -> (LoRaLink<SimTransport>, SimTransport) {
    let radio = medium.attach();
    let tap = radio.clone();
    let mut link = LoRaLink::new(radio);
    assert!(link.init(LinkConfig::default().with_node_id(id)));
    link.enable_mesh_mode(id);
    (link, tap)
}

/// Nodes 1..=n where each node hears only its neighbours.
fn chain(n: u16) -> (SimMedium, Vec<(LoRaLink<SimTransport>, SimTransport)>) {
    let medium = SimMedium::new();
    let nodes: Vec<_> = (1..=n).map(|id| node(&medium, id)).collect();
    for i in 0..nodes.len() {
        for j in (i + 2)..nodes.len() {
            medium.set_link(&nodes[i].1, &nodes[j].1, false);
        }
    }
    (medium, nodes)
}

/// Poll every node until a full pass moves no traffic.
fn settle(nodes: &mut [(LoRaLink<SimTransport>, SimTransport)]) -> Vec<Vec<Message>> {
    let mut delivered = vec![Vec::new(); nodes.len()];
    loop {
        let mut progress = false;
        for (i, (link, _)) in nodes.iter_mut().enumerate() {
            while let Some(msg) = link.poll_mesh() {
                delivered[i].push(msg);
                progress = true;
            }
        }
        if !progress {
            return delivered;
        }
    }
}

#[test]
fn test_multi_hop_delivery() {
    let (_medium, mut nodes) = chain(4);
    assert!(nodes[0].0.send_to_mesh(4, b"end to end", 4));

    let delivered = settle(&mut nodes);
    assert_eq!(delivered[3].len(), 1);
    assert_eq!(delivered[3][0].payload(), b"end to end");
    assert_eq!(delivered[3][0].source_id, 1);
    assert!(delivered[1].is_empty());
    assert!(delivered[2].is_empty());

    // Each relay transmits once.
    assert_eq!(nodes[1].1.sent_count(), 1);
    assert_eq!(nodes[2].1.sent_count(), 1);
    assert_eq!(nodes[3].1.sent_count(), 0);
}

#[test]
fn test_ttl_limits_reach() {
    let (_medium, mut nodes) = chain(4);
    assert!(nodes[0].0.send_to_mesh(4, b"short", 2));

    let delivered = settle(&mut nodes);
    assert!(delivered[3].is_empty());
    assert_eq!(nodes[1].1.sent_count(), 1);
    assert_eq!(nodes[2].1.sent_count(), 0);
}

#[test]
fn test_ttl_never_increases_along_path() {
    let (_medium, mut nodes) = chain(5);
    assert!(nodes[0].0.broadcast(b"flood", 4));
    settle(&mut nodes);

    let mut last_ttl = 4;
    for (_, tap) in nodes.iter().skip(1) {
        for frame in tap.sent_frames() {
            let msg = decode(&frame).unwrap();
            assert_eq!(msg.source_id, 1);
            assert!(msg.ttl < last_ttl);
            last_ttl = msg.ttl;
        }
    }
    assert_eq!(last_ttl, 1);
}

#[test]
fn test_broadcast_reaches_every_node_once() {
    let (_medium, mut nodes) = chain(3);
    assert!(nodes[1].0.broadcast(b"all", 3));

    let delivered = settle(&mut nodes);
    assert_eq!(delivered[0].len(), 1);
    assert_eq!(delivered[2].len(), 1);
    assert!(delivered[1].is_empty());
    assert_eq!(delivered[0][0].dest_id, BROADCAST_ID);
    assert_eq!(delivered[0][0].kind(), MessageType::Broadcast);
}

#[test]
fn test_discovery_populates_tables() {
    let (_medium, mut nodes) = chain(3);
    for (link, _) in nodes.iter_mut() {
        link.set_answer_discovery(true);
    }
    assert!(nodes[0].0.discover_nodes(2));
    settle(&mut nodes);

    let origin = &nodes[0].0;
    assert_eq!(origin.known_node_count(), 2);
    assert!(origin.known_nodes().contains(&2));
    assert!(origin.known_nodes().contains(&3));
    assert_eq!(nodes[2].0.known_node_id(0), Some(1));
    assert!(nodes[2].0.known_nodes().contains(&2));
}

#[test]
fn test_ack_reply_does_not_shadow_later_broadcast() {
    let (_medium, mut nodes) = chain(3);
    for i in 0..5 {
        assert!(nodes[0].0.broadcast(format!("b{}", i).as_bytes(), 3));
    }
    let delivered = settle(&mut nodes);
    assert_eq!(delivered[2].len(), 5);

    let mut from_three = Message::new(MessageType::Data, 3, 1, 2, b"ping");
    from_three.msg_id = 2;
    let mut ack = Message::ack_for(&from_three, 1);
    assert!(nodes[0].0.send(&mut ack));
    assert_eq!(nodes[0].0.last_message_id(), 5);

    assert!(nodes[0].0.broadcast(b"fresh", 3));
    let delivered = settle(&mut nodes);
    assert_eq!(delivered[2].len(), 1);
    assert_eq!(delivered[2][0].payload(), b"fresh");
    assert_eq!(delivered[2][0].msg_id, 6);
}

#[test]
fn test_frames_for_self_stop_at_destination() {
    let (_medium, mut nodes) = chain(3);
    assert!(nodes[0].0.send_to_mesh(2, b"for two", 5));

    let delivered = settle(&mut nodes);
    assert_eq!(delivered[1].len(), 1);
    assert_eq!(nodes[1].1.sent_count(), 0);
    assert!(delivered[2].is_empty());
}

#[test]
fn test_ack_exchange_between_links() {
    let medium = SimMedium::new();
    let (mut sender, tap) = node(&medium, 1);
    let (mut peer, _) = node(&medium, 2);
    sender.set_ack_match(AckMatch::MessageId);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_peer = stop.clone();
    let responder = thread::spawn(move || {
        let mut answered = 0;
        while !stop_peer.load(Ordering::Relaxed) {
            if let Some(msg) = peer.receive_message() {
                if msg.kind() == MessageType::Data && msg.dest_id == peer.node_id() {
                    let mut ack = Message::ack_for(&msg, peer.node_id());
                    assert!(peer.send(&mut ack));
                    answered += 1;
                }
            }
            thread::sleep(Duration::from_millis(2));
        }
        (answered, peer.known_nodes().to_vec())
    });

    let mut msg = Message::new(MessageType::Data, 0, 2, 1, b"reliable");
    let started = Instant::now();
    let attempts = sender.try_send_with_ack(&mut msg, Duration::from_millis(200), 3);
    stop.store(true, Ordering::Relaxed);
    let (answered, peer_known) = responder.join().unwrap();

    assert_eq!(attempts, Ok(1));
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(answered, 1);
    assert_eq!(peer_known, vec![1]);
    assert_eq!(tap.sent_count(), 1);
}

#[test]
fn test_sleeping_node_misses_traffic() {
    let medium = SimMedium::new();
    let (mut a, _) = node(&medium, 1);
    let (mut b, mut b_radio) = node(&medium, 2);

    b.sleep();
    assert!(a.broadcast(b"zzz", 1));
    b.idle();
    assert_eq!(b_radio.parse_packet(), 0);
    assert!(b.poll_mesh().is_none());

    assert!(a.broadcast(b"awake", 1));
    assert_eq!(b.poll_mesh().map(|m| m.payload().to_vec()), Some(b"awake".to_vec()));
}
