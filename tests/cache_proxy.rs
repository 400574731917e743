//! End-to-end tests: a real proxy on a loopback port in front of mock origins.

mod common;

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use cache_proxy::CacheKey;
use common::{
    client, dir_entries, eventually, start_origin, start_proxy, test_config, wait_for_file, OriginReply,
};
use flate2::write::GzEncoder;
use flate2::Compression;

fn entry_path(dir: &std::path::Path, protocol: &str, url: &str) -> PathBuf {
    dir.join(CacheKey::derive(protocol, url).to_hex())
}

#[tokio::test]
async fn test_miss_then_hit() {
    let dir = tempfile::tempdir().unwrap();
    let origin = start_origin(OriginReply::ok("image/png", b"\x89PNG fake image".to_vec())).await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;
    let client = client();

    let url = format!("{}/img/logo.png", origin.addr);
    let target = format!("http://{}/cache/http/{}", proxy, url);

    let first = client.get(&target).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-cache"], "MISS");
    assert_eq!(first.headers()["content-type"], "image/png");
    assert_eq!(first.bytes().await.unwrap().as_ref(), b"\x89PNG fake image");

    let stored = wait_for_file(&entry_path(dir.path(), "http", &url)).await.unwrap();
    let mut expected = b"image/png       ".to_vec();
    expected.extend_from_slice(b"\x89PNG fake image");
    assert_eq!(stored, expected);

    let second = client.get(&target).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(second.headers()["content-type"], "image/png");
    assert_eq!(second.headers()["cache-control"], "max-age=31536000, immutable");
    assert_eq!(second.bytes().await.unwrap().as_ref(), b"\x89PNG fake image");

    assert_eq!(origin.hits(), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_preseeded_entry_never_contacts_origin() {
    let dir = tempfile::tempdir().unwrap();
    let origin = start_origin(OriginReply::ok("text/plain", "from origin")).await;
    let url = format!("{}/seeded.txt", origin.addr);

    let mut seeded = b"text/css        ".to_vec();
    seeded.extend_from_slice(b"body{}");
    std::fs::write(entry_path(dir.path(), "http", &url), &seeded).unwrap();

    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;
    let response = client()
        .get(format!("http://{}/cache/http/{}", proxy, url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/css");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"body{}");
    assert_eq!(origin.hits(), 0);
    shutdown.trigger();
}

#[tokio::test]
async fn test_origin_not_found_serves_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let origin = start_origin(OriginReply::status("404 Not Found")).await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let url = format!("{}/missing.png", origin.addr);
    let response = client()
        .get(format!("http://{}/cache/http/{}", proxy, url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "image/svg+xml");
    assert_eq!(response.headers()["cache-control"], "max-age=6000, immutable");
    assert_eq!(response.headers()["x-cache"], "FALLBACK");
    let body = response.bytes().await.unwrap();
    assert!(body.starts_with(b"<svg"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!entry_path(dir.path(), "http", &url).exists());
    assert_eq!(origin.hits(), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_origin_serves_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let response = client()
        .get(format!("http://{}/cache/http/127.0.0.1:1/nothing.png", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-cache"], "FALLBACK");
    assert_eq!(response.headers()["content-type"], "image/svg+xml");
    shutdown.trigger();
}

#[tokio::test]
async fn test_compressed_origin_relayed_raw_and_stored_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let plain = "console.log('hello');\n".repeat(50);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain.as_bytes()).unwrap();
    let gzipped = encoder.finish().unwrap();

    let origin = start_origin(
        OriginReply::ok("application/js", gzipped.clone()).with_header("Content-Encoding", "gzip"),
    )
    .await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let url = format!("{}/app.js", origin.addr);
    let response = client()
        .get(format!("http://{}/cache/http/{}", proxy, url))
        .header("accept-encoding", "gzip")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-encoding"], "gzip");
    assert_eq!(response.bytes().await.unwrap().as_ref(), gzipped.as_slice());

    let stored = wait_for_file(&entry_path(dir.path(), "http", &url)).await.unwrap();
    assert_eq!(&stored[..16], b"application/js  ");
    assert_eq!(&stored[16..], plain.as_bytes());
    assert_eq!(origin.hits(), 2);

    let heads = origin.request_heads();
    assert!(heads[0].to_ascii_lowercase().contains("accept-encoding: gzip"));
    shutdown.trigger();
}

#[tokio::test]
async fn test_created_post_response_is_cached() {
    let dir = tempfile::tempdir().unwrap();
    let origin = start_origin(OriginReply {
        status: "201 Created",
        ..OriginReply::ok("text/plain", "created")
    })
    .await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;
    let client = client();

    let url = format!("{}/things", origin.addr);
    let target = format!("http://{}/cache/http/{}", proxy, url);

    let posted = client.post(&target).body("payload").send().await.unwrap();
    assert_eq!(posted.status(), 201);
    assert_eq!(posted.bytes().await.unwrap().as_ref(), b"created");
    wait_for_file(&entry_path(dir.path(), "http", &url)).await.unwrap();

    let fetched = client.get(&target).send().await.unwrap();
    assert_eq!(fetched.status(), 200);
    assert_eq!(fetched.headers()["x-cache"], "HIT");
    assert_eq!(fetched.bytes().await.unwrap().as_ref(), b"created");
    assert_eq!(origin.hits(), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_corrupt_entry_is_refetched_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let origin = start_origin(OriginReply::ok("text/plain", "fresh")).await;
    let url = format!("{}/broken.txt", origin.addr);
    let path = entry_path(dir.path(), "http", &url);
    std::fs::write(&path, b"garbage").unwrap();

    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;
    let response = client()
        .get(format!("http://{}/cache/http/{}", proxy, url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-cache"], "MISS");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"fresh");

    let mut replaced = None;
    for _ in 0..100 {
        let data = std::fs::read(&path).unwrap();
        if data != b"garbage" {
            replaced = Some(data);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(replaced.unwrap(), b"text/plain      fresh".to_vec());
    shutdown.trigger();
}

#[tokio::test]
async fn test_query_string_is_part_of_identity() {
    let dir = tempfile::tempdir().unwrap();
    let origin = start_origin(OriginReply::ok("image/png", "pixels")).await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;
    let client = client();

    let url = format!("{}/thumb.png", origin.addr);
    for query in ["w=100", "w=200"] {
        let response = client
            .get(format!("http://{}/cache/http/{}?{}", proxy, url, query))
            .send()
            .await
            .unwrap();
        assert_eq!(response.headers()["x-cache"], "MISS");
        response.bytes().await.unwrap();

        let identity = format!("{}?{}", url, query);
        wait_for_file(&entry_path(dir.path(), "http", &identity)).await.unwrap();
    }

    assert!(!entry_path(dir.path(), "http", &url).exists());
    assert_eq!(origin.hits(), 2);
    shutdown.trigger();
}

#[tokio::test]
async fn test_pass_through_failure_serves_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let response = client()
        .get(format!("http://{}/proxy/127.0.0.1:1/x", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-cache"], "FALLBACK");
    shutdown.trigger();
}

#[tokio::test]
async fn test_body_over_tee_limit_persisted_by_refetch() {
    let dir = tempfile::tempdir().unwrap();
    let body: Vec<u8> = (0..65_536u32).map(|i| (i % 251) as u8).collect();
    let origin = start_origin(OriginReply::ok("application/zip", body.clone())).await;

    let mut config = test_config(dir.path());
    config.cache.tee_limit_bytes = 1024;
    let (proxy, shutdown) = start_proxy(config).await;

    let url = format!("{}/archive.zip", origin.addr);
    let response = client()
        .get(format!("http://{}/cache/http/{}", proxy, url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.bytes().await.unwrap().len(), body.len());

    let stored = wait_for_file(&entry_path(dir.path(), "http", &url)).await.unwrap();
    assert_eq!(&stored[..16], b"application/zip ");
    assert_eq!(&stored[16..], body.as_slice());
    assert_eq!(origin.hits(), 2);
    shutdown.trigger();
}

#[tokio::test]
async fn test_head_request_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let origin = start_origin(OriginReply::ok("image/png", "pixels")).await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let url = format!("{}/head.png", origin.addr);
    let response = client()
        .head(format!("http://{}/cache/http/{}", proxy, url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-cache"], "BYPASS");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(dir_entries(dir.path()).is_empty());
    shutdown.trigger();
}

#[tokio::test]
async fn test_undecodable_coding_is_relayed_but_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let encoded = b"\x28\xb5\x2f\xfd-pretend-zstd-frame".to_vec();
    let origin = start_origin(
        OriginReply::ok("text/plain", encoded.clone()).with_header("Content-Encoding", "zstd"),
    )
    .await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let url = format!("{}/packed.txt", origin.addr);
    let response = client()
        .get(format!("http://{}/cache/http/{}", proxy, url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-cache"], "MISS");
    assert_eq!(response.headers()["content-encoding"], "zstd");
    assert_eq!(response.bytes().await.unwrap().as_ref(), encoded.as_slice());

    // The re-fetch still happens; its body just cannot be stored decoded.
    assert!(eventually(|| origin.hits() >= 2).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!entry_path(dir.path(), "http", &url).exists());
    assert!(dir_entries(dir.path()).is_empty());
    shutdown.trigger();
}

#[tokio::test]
async fn test_pass_through_with_empty_path() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let response = client()
        .get(format!("http://{}/proxy/127.0.0.1:1/", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-cache"], "FALLBACK");
    shutdown.trigger();
}

#[tokio::test]
async fn test_first_chunk_arrives_while_origin_stalls() {
    let dir = tempfile::tempdir().unwrap();
    let body = b"head-tail-tail".to_vec();
    let origin = start_origin(
        OriginReply::ok("text/plain", body.clone()).paced(5, Duration::from_millis(800)),
    )
    .await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let url = format!("{}/slow.txt", origin.addr);
    let started = Instant::now();
    let mut response = client()
        .get(format!("http://{}/cache/http/{}", proxy, url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-cache"], "MISS");

    let first = response.chunk().await.unwrap().unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(700),
        "first chunk took {:?}",
        started.elapsed()
    );
    assert!(b"head-".starts_with(&first));

    let mut received = first.to_vec();
    while let Some(chunk) = response.chunk().await.unwrap() {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, body);
    assert!(started.elapsed() >= Duration::from_millis(1600));
    shutdown.trigger();
}

#[tokio::test]
async fn test_origin_failure_mid_body_terminates_client_response() {
    let dir = tempfile::tempdir().unwrap();
    let body: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let origin = start_origin(OriginReply::ok("application/data", body).cut_after(1024)).await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let url = format!("{}/truncated.bin", origin.addr);
    let response = client()
        .get(format!("http://{}/cache/http/{}", proxy, url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.bytes().await.is_err(), "a cut body must not read as complete");

    // The persisting re-fetch is cut short too and leaves nothing behind.
    assert!(eventually(|| origin.hits() >= 2).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(dir_entries(dir.path()).is_empty());
    shutdown.trigger();
}

#[tokio::test]
async fn test_client_disconnect_releases_origin_and_still_persists() {
    let dir = tempfile::tempdir().unwrap();
    let body: Vec<u8> = (0..32 * 1024u32).map(|i| (i % 251) as u8).collect();
    let origin = start_origin(
        OriginReply::ok("application/data", body.clone()).paced(1024, Duration::from_millis(50)),
    )
    .await;
    let (proxy, shutdown) = start_proxy(test_config(dir.path())).await;

    let url = format!("{}/abandoned.bin", origin.addr);
    {
        let client = client();
        let mut response = client
            .get(format!("http://{}/cache/http/{}", proxy, url))
            .send()
            .await
            .unwrap();
        let first = response.chunk().await.unwrap().unwrap();
        assert!(!first.is_empty());
    }

    // The relayed origin connection is closed rather than drained.
    assert!(eventually(|| origin.aborted() >= 1).await);

    let stored = wait_for_file(&entry_path(dir.path(), "http", &url)).await.unwrap();
    assert_eq!(&stored[..16], b"application/data");
    assert_eq!(&stored[16..], body.as_slice());
    assert_eq!(origin.hits(), 2);
    shutdown.trigger();
}
