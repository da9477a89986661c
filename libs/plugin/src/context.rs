use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use harbor_bus::{MessageStream, RemoteSubscriber, Subscribe};
use harbor_runtime::{Endpoint, RuntimeClient};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::handler::Handler;

/// Delay before following a topic again after its stream ended.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// What a plugin can do.
#[async_trait]
pub trait PluginContext: Send + Sync {
    /// Call `handler` for every message delivered on `topic` from now on.
    async fn on(
        &self,
        topic: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<SubscriptionHandle, PluginError>;

    async fn start_container(&self, id: &str) -> Result<(), PluginError>;

    /// Resubmit the named service's spec, bumping `ForceUpdate` when `force`
    /// so the runtime redeploys it.
    async fn update_service(&self, name: &str, force: bool) -> Result<(), PluginError>;

    /// The value of label `key` on a container. `None` when the label is absent.
    async fn get_label(&self, container_id: &str, key: &str)
        -> Result<Option<String>, PluginError>;
}

/// A running topic subscription. Dropping the handle leaves it running.
#[derive(Debug)]
pub struct SubscriptionHandle {
    topic: String,
    delivered: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Messages handed to the handler so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop delivering and wait for the in-flight handler call to finish.
    pub async fn unsubscribe(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(topic = %self.topic, error = %e, "Subscription task panicked");
        }
    }
}

/// [`PluginContext`] over a bus subscriber and a runtime client.
pub struct Context<S> {
    bus: Arc<S>,
    runtime: RuntimeClient,
}

impl<S> Context<S>
where
    S: Subscribe + 'static,
{
    pub fn new(bus: S, runtime: RuntimeClient) -> Self {
        Self {
            bus: Arc::new(bus),
            runtime,
        }
    }

    pub fn runtime(&self) -> &RuntimeClient {
        &self.runtime
    }
}

impl Context<RemoteSubscriber> {
    /// Talk to a gateway at `host:port`: the bus under `/events`, the
    /// runtime through `/proxy`.
    pub fn remote(host: &str, port: u16) -> Result<Self, PluginError> {
        let bus = RemoteSubscriber::new(&format!("http://{host}:{port}/events"))?;
        let endpoint = Endpoint::parse(&format!("tcp://{host}:{port}/proxy"), None)?;
        Ok(Self::new(bus, RuntimeClient::new(endpoint)))
    }
}

#[async_trait]
impl<S> PluginContext for Context<S>
where
    S: Subscribe + 'static,
{
    async fn on(
        &self,
        topic: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<SubscriptionHandle, PluginError> {
        let stream = self.bus.subscribe(topic).await?;
        info!(topic = %topic, "Subscribed");

        let delivered = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(deliver(
            Arc::clone(&self.bus),
            topic.to_string(),
            stream,
            handler,
            Arc::clone(&delivered),
            cancel.clone(),
        ));

        Ok(SubscriptionHandle {
            topic: topic.to_string(),
            delivered,
            cancel,
            task,
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), PluginError> {
        self.runtime.start_container(id).await?;
        debug!(container = %id, "Container started");
        Ok(())
    }

    async fn update_service(&self, name: &str, force: bool) -> Result<(), PluginError> {
        let services = self.runtime.list_services(Some(name)).await?;

        // The runtime's name filter matches prefixes.
        let service = services
            .iter()
            .find(|service| service.name() == Some(name))
            .or_else(|| services.first())
            .ok_or_else(|| PluginError::ServiceNotFound(name.to_string()))?;

        let mut spec = service.spec.clone();
        if force {
            bump_force_update(&mut spec);
        }

        self.runtime
            .update_service(&service.id, service.version.index, &spec)
            .await?;
        info!(service = %name, id = %service.id, force, "Service update submitted");
        Ok(())
    }

    async fn get_label(
        &self,
        container_id: &str,
        key: &str,
    ) -> Result<Option<String>, PluginError> {
        let container = self.runtime.inspect_container(container_id).await?;
        Ok(container.label(key).map(str::to_string))
    }
}

/// Feed one topic to a handler until cancelled, following again whenever the
/// stream ends.
async fn deliver<S: Subscribe>(
    bus: Arc<S>,
    topic: String,
    mut stream: MessageStream,
    handler: Arc<dyn Handler>,
    delivered: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(message)) => {
                    let id = message.id;
                    if let Err(e) = handler.handle(id, message.payload, message.created).await {
                        warn!(topic = %topic, id, error = %e, "Handler failed");
                    }
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
                Some(Err(e)) => {
                    warn!(topic = %topic, error = %e, "Subscription stream failed");
                    break;
                }
                None => {
                    debug!(topic = %topic, "Subscription stream ended");
                    break;
                }
            }
        }

        stream = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }

            match bus.subscribe(&topic).await {
                Ok(stream) => {
                    info!(topic = %topic, "Resubscribed");
                    break stream;
                }
                Err(e) => warn!(topic = %topic, error = %e, "Resubscribe failed; retrying"),
            }
        };
    }
}

fn bump_force_update(spec: &mut Value) {
    let Some(spec) = spec.as_object_mut() else {
        return;
    };
    let template = spec
        .entry("TaskTemplate")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(template) = template.as_object_mut() {
        let current = template
            .get("ForceUpdate")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        template.insert("ForceUpdate".to_string(), Value::from(current + 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bump_force_update() {
        let mut spec = json!({
            "Name": "web",
            "TaskTemplate": {"ForceUpdate": 2, "Runtime": "container"}
        });
        bump_force_update(&mut spec);
        assert_eq!(
            spec,
            json!({"Name": "web", "TaskTemplate": {"ForceUpdate": 3, "Runtime": "container"}})
        );

        let mut spec = json!({"Name": "web"});
        bump_force_update(&mut spec);
        assert_eq!(spec["TaskTemplate"]["ForceUpdate"], 1);
    }
}
