use std::time::Duration;

use reqwest::{StatusCode, redirect};

use crate::config::DownloadTimeouts;

/// The `User-Agent` sent with every image request.
pub const USER_AGENT: &str = concat!("imagefetch/", env!("CARGO_PKG_VERSION"));

/// Creates a [`reqwest::Client`] with the provided timeouts.
///
/// * `timeouts` controls the connection timeout, the overall download timeout is applied by the
///   [`DownloadService`](crate::download::DownloadService).
/// * Uses a redirect policy that refuses to follow temporary redirects to a different host,
///   as those are typically login or landing pages instead of the requested image.
pub fn create_client(timeouts: &DownloadTimeouts) -> reqwest::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .user_agent(USER_AGENT)
        .connect_timeout(timeouts.connect)
        .pool_idle_timeout(Duration::from_secs(30))
        .redirect(redirect::Policy::custom(|attempt: redirect::Attempt| {
            if attempt.status() == StatusCode::FOUND {
                let previous_host = attempt
                    .previous()
                    .last()
                    .and_then(|url| url.host_str().map(str::to_owned));
                if previous_host.as_deref() != attempt.url().host_str() {
                    return attempt.stop();
                }
            }
            redirect::Policy::default().redirect(attempt)
        }))
        .build()
}
