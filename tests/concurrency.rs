//! Concurrent negotiations against one shared responder over TCP

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use p2p_protocol::core::varint::{read_lp, write_lp};
use p2p_protocol::protocol::dispatcher::ProtocolHandler;
use p2p_protocol::{MultistreamSelect, ProtocolError, Result};
use std::sync::atomic::Ordering;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

struct Echo;

#[async_trait]
impl ProtocolHandler<TcpStream> for Echo {
    async fn handle(&self, stream: &mut TcpStream, _protocol: &str) -> Result<()> {
        let frame = read_lp(stream, 1024).await?;
        write_lp(stream, &frame).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_negotiations_share_one_registry() {
    let responder = MultistreamSelect::<TcpStream>::new();
    responder.add_handler("/echo/1.0.0", Echo).unwrap();
    responder
        .add_handler_with_matcher("/echo/2.0.0", |p| p.starts_with("/echo/2."), Echo)
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = responder.clone();
    let clients = 64usize;
    let accept = tokio::spawn(async move {
        let mut served = JoinSet::new();
        for _ in 0..clients {
            let (mut stream, _) = listener.accept().await.unwrap();
            let server = server.clone();
            served.spawn(async move { server.handle(&mut stream).await });
        }
        let mut negotiated = Vec::new();
        while let Some(res) = served.join_next().await {
            negotiated.push(res.unwrap().unwrap());
        }
        negotiated
    });

    let mut tasks = JoinSet::new();
    for i in 0..clients {
        tasks.spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let initiator = MultistreamSelect::<TcpStream>::new();
            let wanted = if i % 2 == 0 { "/echo/2.1.0" } else { "/echo/1.0.0" };
            let agreed = initiator
                .select(&mut stream, &["/missing/1.0.0", wanted])
                .await
                .unwrap();
            assert_eq!(agreed, wanted);

            let payload = format!("client {i}");
            write_lp(&mut stream, payload.as_bytes()).await.unwrap();
            let echoed = read_lp(&mut stream, 1024).await.unwrap();
            assert_eq!(echoed, payload.as_bytes());
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let negotiated = accept.await.unwrap();
    assert_eq!(negotiated.len(), clients);
    assert!(negotiated.iter().all(Option::is_some));
    let metrics = responder.metrics();
    assert_eq!(metrics.negotiations_success.load(Ordering::Relaxed), clients as u64);
    assert_eq!(metrics.na_sent.load(Ordering::Relaxed), clients as u64);
}

#[tokio::test]
async fn exhausted_proposals_leave_stream_usable() {
    let responder = MultistreamSelect::<TcpStream>::new();
    responder.add_handler("/echo/1.0.0", Echo).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = responder.clone();
    let serve = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        server.handle(&mut stream).await
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let initiator = MultistreamSelect::<TcpStream>::new();
    let err = initiator
        .select(&mut stream, &["/a/1.0.0", "/b/1.0.0"])
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NoCommonProtocol));

    let agreed = initiator.select(&mut stream, &["/echo/1.0.0"]).await.unwrap();
    assert_eq!(agreed, "/echo/1.0.0");
    write_lp(&mut stream, b"again").await.unwrap();
    assert_eq!(read_lp(&mut stream, 1024).await.unwrap(), b"again");

    assert_eq!(serve.await.unwrap().unwrap().as_deref(), Some("/echo/1.0.0"));
}
