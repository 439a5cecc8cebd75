//! Test utilities to help with testing seqgate.

pub mod id;
pub mod record;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// Run a block of code repeatedly until it `break`s, sleeping between
/// attempts. Panics if it did not break within the timeout.
///
/// ```ignore
/// iter_check!(1000, {
///     if store.op_count(&op) == 2 {
///         break;
///     }
/// });
/// ```
#[macro_export]
macro_rules! iter_check {
    ($timeout_ms:literal, $sleep_ms:literal, $code:block) => {
        ::tokio::time::timeout(
            ::std::time::Duration::from_millis($timeout_ms),
            async {
                loop {
                    ::tokio::time::sleep(::std::time::Duration::from_millis(
                        $sleep_ms,
                    ))
                    .await;
                    $code
                }
            },
        )
        .await
        .unwrap();
    };
    ($timeout_ms:literal, $code:block) => {
        $crate::iter_check!($timeout_ms, 10, $code)
    };
    ($code:block) => {
        $crate::iter_check!(1000, $code)
    };
}
