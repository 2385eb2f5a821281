use anyhow::Result;
use rpc_batch_benchmark::{
    channel::{serve_echo, TcpChannel},
    CallError, Channel, ChannelPool, DispatchError, LoadClient, RequestOptions, RunConfig,
    RunError,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;

async fn spawn_echo_server() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve_echo(listener));
    Ok(addr)
}

/// Accepts one connection and closes it straight away
async fn spawn_closing_server() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    Ok(addr)
}

fn request(endpoint: &str, body: &[u8]) -> RequestOptions {
    RequestOptions {
        endpoint: endpoint.to_string(),
        headers: BTreeMap::new(),
        body: body.to_vec(),
        timeout: Duration::from_secs(2),
    }
}

async fn wait_until_closed(channel: &TcpChannel) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !channel.is_closed() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Echo, health and unknown endpoints over one multiplexed connection
#[tokio::test]
async fn tcp_channel_answers_builtin_endpoints() -> Result<()> {
    let addr = spawn_echo_server().await?;
    let channel = TcpChannel::connect("tcp-0", addr).await?;
    assert_eq!(channel.peer(), addr);

    let echoed = channel.send(&request("echo", b"payload")).await?;
    assert!(echoed.ok);
    assert_eq!(echoed.body, b"payload");

    let health = channel.send(&request("health", b"")).await?;
    assert!(health.ok);
    assert_eq!(health.body, b"OK");

    let missing = channel.send(&request("nope", b"")).await?;
    assert!(!missing.ok);
    Ok(())
}

/// Concurrent requests on one connection are matched back by id
#[tokio::test]
async fn tcp_channel_multiplexes_concurrent_requests() -> Result<()> {
    let addr = spawn_echo_server().await?;
    let channel = Arc::new(TcpChannel::connect("tcp-0", addr).await?);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..32u32 {
        let channel = channel.clone();
        tasks.spawn(async move {
            let body = i.to_le_bytes();
            let response = channel.send(&request("echo", &body)).await;
            (body, response)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (body, response) = joined?;
        assert_eq!(response?.body, body);
    }
    Ok(())
}

/// Full run against a live echo server
#[tokio::test]
async fn tcp_batch_run_completes_without_errors() -> Result<()> {
    let addr = spawn_echo_server().await?;
    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
    for i in 0..2 {
        channels.push(Arc::new(TcpChannel::connect(format!("tcp-{}", i), addr).await?));
    }

    let config = RunConfig::builder()
        .num_buckets(2)
        .batches_per_bucket(3)
        .requests_per_batch(4)
        .client_batch_delay(Duration::from_millis(5))
        .timeout(Duration::from_secs(2))
        .endpoint("echo")
        .body("ping")
        .build()?;
    let client = Arc::new(LoadClient::new(config, ChannelPool::new(channels)?)?);

    let results = client.start_run(Instant::now()).await?;
    assert_eq!(results.total_count(), 24);
    assert_eq!(results.error_count(), 0);
    for bucket in results.summaries() {
        assert_eq!(bucket.success_count, 12);
        assert_eq!(bucket.not_ok_count, 0);
    }
    Ok(())
}

/// A dropped connection fails calls and then refuses dispatch
#[tokio::test]
async fn closed_connection_is_reported() -> Result<()> {
    let addr = spawn_closing_server().await?;
    let channel = Arc::new(TcpChannel::connect("tcp-closed", addr).await?);

    wait_until_closed(&channel).await;
    assert!(channel.is_closed());

    assert_eq!(
        channel.check_dispatch(),
        Err(DispatchError::ChannelClosed("tcp-closed".to_string()))
    );
    let err = channel.send(&request("echo", b"x")).await.unwrap_err();
    assert!(matches!(err, CallError::Connection(_)));

    let config = RunConfig::builder()
        .num_buckets(1)
        .batches_per_bucket(1)
        .requests_per_batch(1)
        .endpoint("echo")
        .build()?;
    let client = Arc::new(LoadClient::new(
        config,
        ChannelPool::new(vec![channel as Arc<dyn Channel>])?,
    )?);
    let err = client.start_run(Instant::now()).await.unwrap_err();
    assert!(matches!(err, RunError::Dispatch(DispatchError::ChannelClosed(_))));
    Ok(())
}
