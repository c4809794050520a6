use std::sync::Arc;

use futures::future::join_all;
use imagefetch_service::config::Config;

use crate::utils::{fetcher_for, setup_fetcher};

#[tokio::test]
async fn test_fetch_thumbnail() {
    let (fetcher, _cache_dir) = setup_fetcher(|_| {});
    let server = imagefetch_test::Server::new();
    let url = server.url("/image/200/100");

    let image = fetcher.fetch_image(url.as_str()).await.unwrap();
    assert_eq!((image.width(), image.height()), (50, 25));

    let again = fetcher.fetch_image(url.as_str()).await.unwrap();
    assert!(Arc::ptr_eq(&image, &again));
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_custom_thumbnail_size() {
    let (fetcher, _cache_dir) = setup_fetcher(|config| {
        config.thumbnail.width = 120;
        config.thumbnail.height = 120;
    });
    let server = imagefetch_test::Server::new();

    let image = fetcher
        .fetch_image(server.url("/image/30/60").as_str())
        .await
        .unwrap();
    assert_eq!((image.width(), image.height()), (60, 120));
}

#[tokio::test]
async fn test_concurrent_requests_transfer_once() {
    let (fetcher, _cache_dir) = setup_fetcher(|_| {});
    let server = imagefetch_test::Server::new();
    let url = server.url("/delay/100ms/image/64/64");

    let requests = (0..10).map(|_| fetcher.fetch_image(url.as_str()));
    let images = join_all(requests).await;

    let first = images[0].as_ref().unwrap();
    for image in &images {
        assert!(Arc::ptr_eq(image.as_ref().unwrap(), first));
    }

    insta::assert_debug_snapshot!(server.all_hits(), @r###"
    [
        (
            "/delay/100ms/image/64/64",
            1,
        ),
        (
            "/image/64/64",
            1,
        ),
    ]
    "###);
    assert!(fetcher.in_flight().await.is_empty());
}

#[tokio::test]
async fn test_restart_serves_from_disk() {
    let (fetcher, cache_dir) = setup_fetcher(|_| {});
    let server = imagefetch_test::Server::new();
    let url = server.url("/image/640/480");

    fetcher.fetch_image(url.as_str()).await.unwrap();
    assert_eq!(server.accesses(), 1);
    drop(fetcher);

    let config = Config {
        cache_dir: Some(cache_dir.path().to_owned()),
        ..Default::default()
    };
    let fetcher = fetcher_for(&config);

    let image = fetcher.fetch_image(url.as_str()).await.unwrap();
    assert_eq!((image.width(), image.height()), (50, 38));
    assert_eq!(server.accesses(), 0);

    let original = fetcher.cached_original(url.as_str()).unwrap();
    assert_eq!((original.width(), original.height()), (640, 480));
}

#[tokio::test]
async fn test_memory_only() {
    let (fetcher, cache_dir) = setup_fetcher(|config| config.cache_dir = None);
    let server = imagefetch_test::Server::new();
    let url = server.url("/image/10/10");

    fetcher.fetch_image(url.as_str()).await.unwrap();
    fetcher.fetch_image(url.as_str()).await.unwrap();
    assert_eq!(server.accesses(), 1);

    assert!(fetcher.cached_original(url.as_str()).is_none());
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_follows_redirects() {
    let (fetcher, _cache_dir) = setup_fetcher(|_| {});
    let server = imagefetch_test::Server::new();

    let image = fetcher
        .fetch_image(server.url("/redirect/image/8/8").as_str())
        .await
        .unwrap();
    assert_eq!((image.width(), image.height()), (50, 50));
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_local_file() {
    let (fetcher, cache_dir) = setup_fetcher(|_| {});
    let path = cache_dir.path().join("source.png");
    std::fs::write(&path, imagefetch_test::png_bytes(25, 100)).unwrap();

    let key = format!("file://{}", path.display());
    let image = fetcher.fetch_image(&key).await.unwrap();
    assert_eq!((image.width(), image.height()), (13, 50));
}
