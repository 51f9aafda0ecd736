use rand::Rng;
use std::time::Duration;

/// Sleeps for `base` plus up to half of `base` in random jitter, so
/// parallel retries against the same backend do not synchronize.
pub async fn sleep_with_jitter(base: Duration) {
    let jitter_ms = (base.as_millis() / 2) as u64;
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    };
    tokio::time::sleep(base + jitter).await;
}
