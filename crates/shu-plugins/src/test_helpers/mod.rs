//! Test helpers for plugin unit tests
//!
//! Closure-backed plugins and an executor wired to in-memory host services,
//! so executor, handler and scheduler tests need no network or database.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PluginError;
use crate::executor::{ExecutorConfig, PluginExecutor};
use crate::host::{Host, HostPolicy, HostServices};
use crate::manifest::{Capability, OperationSpec, PluginManifest};
use crate::plugin::{Plugin, PluginCall, PluginOutput};
use crate::registry::PluginRegistry;

type CallFn = dyn Fn(PluginCall, &Host) -> Result<PluginOutput, PluginError> + Send + Sync;

/// Plugin whose behaviour is a closure.
#[derive(Clone)]
pub struct FnPlugin {
    manifest: PluginManifest,
    delay: Option<Duration>,
    call: Arc<CallFn>,
    calls: Arc<AtomicUsize>,
}

impl FnPlugin {
    pub fn new(
        manifest: PluginManifest,
        f: impl Fn(PluginCall) -> Result<PluginOutput, PluginError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_host(manifest, move |call, _host| f(call))
    }

    pub fn with_host(
        manifest: PluginManifest,
        f: impl Fn(PluginCall, &Host) -> Result<PluginOutput, PluginError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            manifest,
            delay: None,
            call: Arc::new(f),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleeps for `delay` before answering.
    pub fn with_delay(
        manifest: PluginManifest,
        delay: Duration,
        f: impl Fn(PluginCall) -> Result<PluginOutput, PluginError> + Send + Sync + 'static,
    ) -> Self {
        let mut plugin = Self::new(manifest, f);
        plugin.delay = Some(delay);
        plugin
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn execute(&self, call: PluginCall, host: &Host) -> Result<PluginOutput, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.call)(call, host)
    }
}

/// `echo` plugin: operation `echo` (feed-allowed, requires a string `message`)
/// and operation `shout` (not feed-allowed).
pub fn echo_manifest() -> PluginManifest {
    PluginManifest::new("echo", "1.0.0")
        .with_description("Returns its input")
        .with_capability(Capability::Log)
        .with_operation(
            OperationSpec::new("echo")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }))
                .feed_allowed(true),
        )
        .with_operation(OperationSpec::new("shout"))
}

pub fn echo_plugin() -> FnPlugin {
    FnPlugin::new(echo_manifest(), |call| {
        Ok(PluginOutput::new(json!({
            "operation": call.operation,
            "echo": call.params,
        })))
    })
}

/// Executor over in-memory host services and the default egress policy.
pub fn test_executor(config: ExecutorConfig) -> PluginExecutor {
    PluginExecutor::new(
        PluginRegistry::new(),
        HostServices::in_memory(64),
        HostPolicy::default(),
        config,
    )
}
