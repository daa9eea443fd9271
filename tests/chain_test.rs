//! Tunnel chain lifecycle tests

mod common;

use common::*;
use hopsocks::chain::{ChainOptions, ChainState, HopSpec, TunnelChain};
use hopsocks::error::{ChainError, ChannelError, ErrorCategory};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn spawn_hops(n: usize) -> Vec<FakeHop> {
    let mut hops = Vec::with_capacity(n);
    for i in 0..n {
        hops.push(spawn_fake_hop(&format!("user{}", i), &format!("secret{}", i)).await);
    }
    hops
}

fn specs(hops: &[FakeHop]) -> Vec<HopSpec> {
    hops.iter().map(FakeHop::spec).collect()
}

fn fast_options() -> ChainOptions {
    ChainOptions {
        connect_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_establish_authenticates_every_hop_in_order() {
    let hops = spawn_hops(3).await;
    let connector = LoopbackConnector::new();

    let chain = TunnelChain::establish(specs(&hops), Arc::new(connector.clone()), fast_options())
        .await
        .unwrap();

    assert_eq!(chain.state().await, ChainState::Established);
    assert_eq!(chain.hop_count(), 3);
    assert_eq!(connector.live(), 3);
    assert_eq!(connector.auth_order(), vec![0, 1, 2]);
    assert!(wait_until(|| hops.iter().all(|h| h.live() == 1)).await);

    chain.teardown().await.unwrap();
}

#[tokio::test]
async fn test_teardown_is_reverse_and_idempotent() {
    let hops = spawn_hops(4).await;
    let connector = LoopbackConnector::new();
    let chain = TunnelChain::establish(specs(&hops), Arc::new(connector.clone()), fast_options())
        .await
        .unwrap();

    chain.teardown().await.unwrap();
    assert_eq!(connector.close_order(), vec![3, 2, 1, 0]);
    assert_eq!(connector.live(), 0);
    assert_eq!(chain.state().await, ChainState::Closed);
    assert!(wait_until(|| hops.iter().all(|h| h.live() == 0)).await);

    chain.teardown().await.unwrap();
    assert_eq!(connector.close_order(), vec![3, 2, 1, 0]);
}

#[tokio::test]
async fn test_failure_at_each_hop_leaves_nothing_open() {
    for k in 0..3 {
        let hops = spawn_hops(3).await;
        let connector = LoopbackConnector::new();

        let mut hop_specs = specs(&hops);
        hop_specs[k] = hops[k].spec_with_wrong_secret();

        let err = TunnelChain::establish(hop_specs, Arc::new(connector.clone()), fast_options())
            .await
            .unwrap_err();

        assert!(
            matches!(err, ChainError::AuthenticationFailed { index, .. } if index == k),
            "unexpected error for k={}: {}",
            k,
            err
        );
        assert_eq!(connector.live(), 0, "live hops after failure at {}", k);
        let mut expected: Vec<usize> = (0..k).collect();
        assert_eq!(connector.auth_order(), expected);
        expected.reverse();
        assert_eq!(connector.close_order(), expected);
        assert!(wait_until(|| hops.iter().all(|h| h.live() == 0)).await);
    }
}

#[tokio::test]
async fn test_silent_hop_times_out() {
    let first = spawn_fake_hop("alice", "pw").await;
    let silent = spawn_silent_hop().await;
    let connector = LoopbackConnector::new();

    let hop_specs = vec![
        first.spec(),
        HopSpec::with_password("127.0.0.1", silent.port(), "bob", "pw"),
    ];
    let options = ChainOptions {
        connect_timeout: Duration::from_millis(200),
        ..Default::default()
    };

    let err = TunnelChain::establish(hop_specs, Arc::new(connector.clone()), options)
        .await
        .unwrap_err();

    match err {
        ChainError::ConnectTimeout { index, timeout } => {
            assert_eq!(index, 1);
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("expected timeout, got {}", other),
    }
    assert_eq!(connector.live(), 0);
    assert_eq!(connector.close_order(), vec![0]);
}

#[tokio::test]
async fn test_unreachable_first_hop() {
    let port = closed_port().await;
    let connector = LoopbackConnector::new();

    let err = TunnelChain::establish(
        vec![HopSpec::with_password("127.0.0.1", port, "u", "p")],
        Arc::new(connector.clone()),
        fast_options(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ChainError::Connect { index: 0, .. }));
    assert_eq!(connector.live(), 0);
}

#[tokio::test]
async fn test_unreachable_inner_hop() {
    let first = spawn_fake_hop("alice", "pw").await;
    let port = closed_port().await;
    let connector = LoopbackConnector::new();

    let err = TunnelChain::establish(
        vec![
            first.spec(),
            HopSpec::with_password("127.0.0.1", port, "bob", "pw"),
        ],
        Arc::new(connector.clone()),
        fast_options(),
    )
    .await
    .unwrap_err();

    // The refusal seen by the previous hop is reported, not the hang-up
    match &err {
        ChainError::Connect { index, source } => {
            assert_eq!(*index, 1);
            assert_eq!(source.kind(), std::io::ErrorKind::ConnectionRefused);
            assert!(source.to_string().contains(&port.to_string()));
        }
        other => panic!("expected connect error, got {}", other),
    }
    assert_eq!(err.category(), ErrorCategory::Network);
    assert_eq!(connector.live(), 0);
    assert_eq!(connector.close_order(), vec![0]);
}

#[tokio::test]
async fn test_invalid_hops_rejected_before_connecting() {
    let connector = LoopbackConnector::new();

    let err = TunnelChain::establish(Vec::new(), Arc::new(connector.clone()), fast_options())
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Configuration(_)));

    let err = TunnelChain::establish(
        vec![HopSpec::with_password("", 22, "u", "p")],
        Arc::new(connector.clone()),
        fast_options(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ChainError::Configuration(_)));
    assert!(connector.events().is_empty());
}

#[tokio::test]
async fn test_downstream_channel_through_two_hops() {
    let hops = spawn_hops(2).await;
    let echo = spawn_echo_server().await;
    let connector = LoopbackConnector::new();
    let chain = TunnelChain::establish(specs(&hops), Arc::new(connector), fast_options())
        .await
        .unwrap();

    let mut channel = chain
        .open_downstream_channel(&echo.ip().to_string(), echo.port())
        .await
        .unwrap();

    channel.write_all(b"over two hops").await.unwrap();
    let mut buf = [0u8; 13];
    channel.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"over two hops");

    let refused = closed_port().await;
    assert!(matches!(
        chain.open_downstream_channel("127.0.0.1", refused).await,
        Err(ChannelError::Refused { .. })
    ));

    chain.teardown().await.unwrap();
    assert!(matches!(
        chain.open_downstream_channel(&echo.ip().to_string(), echo.port()).await,
        Err(ChannelError::ChainNotEstablished)
    ));
}

#[tokio::test]
async fn test_teardown_errors_are_collected() {
    let hops = spawn_hops(3).await;
    let connector = LoopbackConnector::new();
    connector.fail_close_at(1);

    let chain = TunnelChain::establish(specs(&hops), Arc::new(connector.clone()), fast_options())
        .await
        .unwrap();

    let errors = chain.teardown().await.unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].index, 1);
    assert_eq!(errors[0].hop, format!("127.0.0.1:{}", hops[1].addr.port()));

    // Hop 0 was still closed after hop 1 failed
    assert_eq!(connector.close_order(), vec![2, 1, 0]);
    assert_eq!(connector.live(), 0);
    assert_eq!(chain.state().await, ChainState::Closed);
}

#[tokio::test]
async fn test_local_forward_through_two_hops() {
    let hops = spawn_hops(2).await;
    let echo = spawn_echo_server().await;
    let connector = LoopbackConnector::new();
    let chain = TunnelChain::establish(specs(&hops), Arc::new(connector.clone()), fast_options())
        .await
        .unwrap();

    let forward = chain
        .forward_local(&echo.ip().to_string(), echo.port())
        .await
        .unwrap();
    assert!(forward.ip().is_loopback());

    let mut first = TcpStream::connect(forward).await.unwrap();
    let mut second = TcpStream::connect(forward).await.unwrap();
    assert_echo(&mut first, b"fixed target").await;
    assert_echo(&mut second, b"second client").await;

    chain.teardown().await.unwrap();

    assert_closed(&mut first).await;
    assert_closed(&mut second).await;
    assert!(TcpStream::connect(forward).await.is_err());
    assert_eq!(connector.close_order(), vec![1, 0]);
    assert!(matches!(
        chain.forward_local(&echo.ip().to_string(), echo.port()).await,
        Err(ChannelError::ChainNotEstablished)
    ));
}
