use criterion::{black_box, criterion_group, criterion_main, Criterion};
use p2p_protocol::core::peer::{Multiaddr, PeerId, PeerInfo};
use p2p_protocol::core::protobuf::{ProtoBuffer, ProtoReader};
use p2p_protocol::protocol::message::{check_response, response_tags, success_response, DhtRequest, DhtRequestType};
use std::time::Duration;

fn sample_peers(count: usize) -> Vec<PeerInfo> {
    (0..count)
        .map(|i| PeerInfo {
            peer: PeerId::from_bytes(vec![0x12, 0x20, i as u8]),
            addrs: vec![
                Multiaddr::tcp(std::net::SocketAddr::from(([10, 0, 0, i as u8], 4001))),
                Multiaddr::tcp(std::net::SocketAddr::from(([192, 168, 1, i as u8], 4001))),
            ],
        })
        .collect()
}

fn list_peers_response(peers: &[PeerInfo]) -> Vec<u8> {
    let mut pb = success_response();
    for peer in peers {
        pb.write_message(response_tags::PEERS, &peer.to_proto());
    }
    pb.finish()
}

fn bench_requests(c: &mut Criterion) {
    let key = vec![7u8; 64];
    c.bench_function("dht_request_encode", |b| {
        b.iter(|| {
            DhtRequest::new(DhtRequestType::SearchValue)
                .key(black_box(&key))
                .timeout(Some(Duration::from_secs(30)))
                .encode()
        })
    });

    let peers = sample_peers(32);
    c.bench_function("list_peers_response_encode_32", |b| {
        b.iter(|| list_peers_response(black_box(&peers)))
    });
}

#[allow(clippy::unwrap_used)]
fn bench_responses(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_peers_response_decode");
    for count in [1usize, 32, 200] {
        let encoded = list_peers_response(&sample_peers(count));
        group.bench_function(format!("{count}_peers"), |b| {
            b.iter(|| {
                let reader = check_response(black_box(&encoded)).unwrap();
                reader
                    .get_repeated_submessages(response_tags::PEERS)
                    .unwrap()
                    .iter()
                    .map(PeerInfo::from_proto)
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap()
            })
        });
    }
    group.finish();

    let mut pb = ProtoBuffer::new();
    for i in 0..64u64 {
        pb.write_varint(1, i).write_bytes(2, b"field");
    }
    let flat = pb.finish();
    c.bench_function("proto_reader_validate_128_fields", |b| {
        b.iter(|| ProtoReader::new(black_box(&flat)).validate())
    });
}

criterion_group!(benches, bench_requests, bench_responses);
criterion_main!(benches);
