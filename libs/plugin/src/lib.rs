//! # harbor-plugin
//!
//! What a plugin sees of harbor.
//!
//! A plugin reacts to bus messages with [`PluginContext::on`] and acts on the
//! runtime through the remaining [`PluginContext`] operations. [`Context`]
//! implements it over any bus [`Subscribe`](harbor_bus::Subscribe) plus a
//! [`RuntimeClient`](harbor_runtime::RuntimeClient); [`Context::remote`]
//! points both at a running gateway.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use chrono::{DateTime, Utc};
//! use harbor_plugin::{Context, PluginContext};
//!
//! # async fn run() -> Result<(), harbor_plugin::PluginError> {
//! let ctx = Context::remote("localhost", 8000)?;
//! let _containers = ctx
//!     .on(
//!         "container",
//!         Arc::new(|id: u64, payload: Bytes, _created: DateTime<Utc>| async move {
//!             println!("{id}: {} bytes", payload.len());
//!             Ok::<(), anyhow::Error>(())
//!         }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod context;
mod error;
mod handler;

pub use context::{Context, PluginContext, SubscriptionHandle, RESUBSCRIBE_DELAY};
pub use error::PluginError;
pub use handler::Handler;
