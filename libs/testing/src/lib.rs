//! Test doubles shared by harbor integration tests.
//!
//! - [`RecordingPublisher`]: a bus publisher that records every call.
//! - [`ScriptedEventSource`]: an event source driven by the test.
//! - [`FakeRuntime`]: an HTTP server standing in for the runtime on a unix
//!   socket, plain TCP or TLS.
//! - [`TlsFixture`]: a throwaway CA with server and client certificates.

use std::time::Duration;

mod publisher;
mod runtime;
mod source;
mod tls;

pub use publisher::{Published, RecordingPublisher};
pub use runtime::{FakeRuntime, RecordedRequest};
pub use source::{ScriptedEventSource, SessionHandle, SourceCall};
pub use tls::TlsFixture;

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
