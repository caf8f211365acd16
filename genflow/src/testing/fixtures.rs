//! Sample documents, assets and configurations.

use std::sync::Arc;

use crate::assembly::ProducedAsset;
use crate::resilience::{CircuitConfig, RetryConfig, RetryEngine};

/// A landing page referencing a hero, a logo, a favicon, one asset nobody
/// produced (`icon-x.png`) and a structured-data block.
pub const SAMPLE_DOCUMENT: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <!-- genflow: sample -->
    <link rel="icon" href="favicon.ico">
    <script type="application/ld+json">
    {"@context": "https://schema.org", "@type": "Product", "name": "Trail Shoe"}
    </script>
    <style>
      .hero { background: url('hero.jpg') center / cover; }
    </style>
  </head>
  <body>
    <!-- layout -->
    <img class="logo" src="logo.png" width="48" height="48">
    <section class="hero"><img src="hero.jpg" alt="Runner"></section>
    <img src="icon-x.png" alt="missing">
    <pre>  keep   this  </pre>
  </body>
</html>
"#;

/// Bytes that sniff as JPEG, padded to `len`.
#[must_use]
pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len.max(3)];
    bytes[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    bytes
}

/// Bytes that sniff as PNG, padded to `len`.
#[must_use]
pub fn png_bytes(len: usize) -> Vec<u8> {
    const MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let mut bytes = vec![0u8; len.max(MAGIC.len())];
    bytes[..MAGIC.len()].copy_from_slice(&MAGIC);
    bytes
}

/// A JPEG-looking asset of `len` bytes.
#[must_use]
pub fn jpeg_asset(locator: &str, len: usize) -> ProducedAsset {
    ProducedAsset::new(locator, jpeg_bytes(len))
}

/// A PNG-looking asset of `len` bytes.
#[must_use]
pub fn png_asset(locator: &str, len: usize) -> ProducedAsset {
    ProducedAsset::new(locator, png_bytes(len))
}

/// The assets [`SAMPLE_DOCUMENT`] can resolve, all within their class targets.
#[must_use]
pub fn sample_assets() -> Vec<ProducedAsset> {
    vec![
        jpeg_asset("hero.jpg", 40 * 1024),
        png_asset("logo.png", 2 * 1024),
        ProducedAsset::new("favicon.ico", vec![0, 0, 1, 0, 1, 0, 16, 16]),
    ]
}

/// Retry settings with millisecond delays and no jitter.
#[must_use]
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig::new()
        .with_base_delay_ms(10)
        .with_max_delay_ms(100)
        .with_jitter_ratio(0.0)
}

/// An engine with fast retries and the given breaker threshold and cooldown.
#[must_use]
pub fn test_engine(failure_threshold: u32, cooldown_ms: u64) -> Arc<RetryEngine> {
    Arc::new(RetryEngine::new(
        fast_retry_config(),
        CircuitConfig::new()
            .with_failure_threshold(failure_threshold)
            .with_cooldown_ms(cooldown_ms),
    ))
}
