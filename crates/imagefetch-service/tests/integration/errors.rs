use std::time::Duration;

use imagefetch_service::FetchError;

use crate::utils::setup_fetcher;

#[tokio::test]
async fn test_status_errors() {
    let (fetcher, _cache_dir) = setup_fetcher(|_| {});
    let server = imagefetch_test::Server::new();

    let err = fetcher
        .fetch_image(server.url("/status/404").as_str())
        .await
        .unwrap_err();
    insta::assert_snapshot!(err, @"transfer failed: unexpected status code: 404 Not Found");

    let err = fetcher
        .fetch_image(server.url("/status/401").as_str())
        .await
        .unwrap_err();
    insta::assert_snapshot!(err, @"transfer failed: permission denied: 401 Unauthorized");

    let err = fetcher
        .fetch_image(server.url("/status/500").as_str())
        .await
        .unwrap_err();
    insta::assert_snapshot!(err, @"transfer failed: unexpected status code: 500 Internal Server Error");
}

#[tokio::test]
async fn test_failures_are_retried() {
    let (fetcher, _cache_dir) = setup_fetcher(|_| {});
    let server = imagefetch_test::Server::new();
    let url = server.url("/status/503");

    for _ in 0..2 {
        let err = fetcher.fetch_image(url.as_str()).await.unwrap_err();
        assert!(matches!(err, FetchError::TransportFailure(_)));
    }
    assert_eq!(server.accesses(), 2);
    assert!(fetcher.in_flight().await.is_empty());
}

#[tokio::test]
async fn test_garbage_payload() {
    let (fetcher, _cache_dir) = setup_fetcher(|_| {});
    let server = imagefetch_test::Server::new();

    let err = fetcher
        .fetch_image(server.url("/garbage").as_str())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::DecodeFailure(_)));
}

#[tokio::test]
async fn test_download_timeout() {
    let (fetcher, _cache_dir) = setup_fetcher(|config| {
        config.timeouts.max_download = Duration::from_millis(100);
    });
    let server = imagefetch_test::Server::new();

    let err = fetcher
        .fetch_image(server.url("/delay/1s/image/8/8").as_str())
        .await
        .unwrap_err();
    insta::assert_snapshot!(err, @"transfer failed: download was cancelled after 100ms");
}

#[tokio::test]
async fn test_invalid_keys() {
    let (fetcher, _cache_dir) = setup_fetcher(|_| {});

    let err = fetcher.fetch_image("ftp://example.com/cat.png").await.unwrap_err();
    insta::assert_snapshot!(err, @"invalid resource key: `ftp://example.com/cat.png`: unsupported scheme `ftp`");

    let err = fetcher.fetch_image("cat.png").await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidKey(_)));
}
