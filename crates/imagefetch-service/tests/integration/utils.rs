use imagefetch_service::ImageFetcher;
use imagefetch_service::config::Config;
use imagefetch_service::download::DownloadService;
use imagefetch_test::TempDir;

/// Setup tests and create a fetcher backed by the real download service.
///
/// The fetcher caches to a fresh temporary directory, unless the config is changed to point
/// somewhere else. Keep the returned [`TempDir`] as guard until the test has finished.
pub fn setup_fetcher(update_config: impl FnOnce(&mut Config)) -> (ImageFetcher, TempDir) {
    imagefetch_test::setup();

    let cache_dir = imagefetch_test::tempdir();
    let mut config = Config {
        cache_dir: Some(cache_dir.path().to_owned()),
        ..Default::default()
    };
    update_config(&mut config);

    let fetcher = fetcher_for(&config);
    (fetcher, cache_dir)
}

pub fn fetcher_for(config: &Config) -> ImageFetcher {
    let transport = DownloadService::new(config).unwrap();
    let handle = tokio::runtime::Handle::current();
    ImageFetcher::new(config, transport, handle).unwrap()
}
