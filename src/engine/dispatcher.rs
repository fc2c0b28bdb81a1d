//! Dispatcher: resolve -> build -> invoke for one note.
//!
//! The dispatcher owns the policy the registry and bindings do not: the
//! optional per-engine invocation lock, the process spawn throttle, the
//! default process timeout, and render telemetry.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};

use crate::config::{DispatchConfig, HostConfig};
use crate::contract::{EngineInfo, EngineInput, EngineOutput};
use crate::engine::binding::InvokeContext;
use crate::engine::descriptor::{BindingKind, EngineDescriptor};
use crate::engine::registry::EngineRegistry;
use crate::error::{log_engine_error, EngineError, ErrorCode, InvocationCause};
use crate::render::{build, RenderItem};
use crate::telemetry::{RenderEvent, TelemetryCollector};

const QUEUE_POLL: Duration = Duration::from_millis(10);

/// Fixed pool of spawn tokens limiting concurrently running process engines.
struct ProcessSlots {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl ProcessSlots {
    fn new(slots: usize) -> Self {
        let (tx, rx) = bounded(slots);
        for _ in 0..slots {
            // Capacity equals the number of sends.
            let _ = tx.try_send(());
        }
        Self { tx, rx }
    }

    /// Wait for a spawn token. Queue time counts against the caller's
    /// timeout, and cancellation is honored while waiting.
    fn acquire(
        &self,
        location: &str,
        ctx: &InvokeContext,
    ) -> Result<SlotGuard<'_>, EngineError> {
        let deadline = ctx.deadline(Instant::now());
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::invocation(location, InvocationCause::Cancelled));
            }
            let mut wait = QUEUE_POLL;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!("[Dispatcher] {} timed out waiting for a process slot", location);
                    return Err(EngineError::invocation(
                        location,
                        InvocationCause::Timeout {
                            timeout_ms: ctx.timeout_ms(),
                        },
                    ));
                }
                wait = wait.min(deadline - now);
            }
            match self.rx.recv_timeout(wait) {
                Ok(()) => return Ok(SlotGuard { tx: &self.tx }),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::invocation(
                        location,
                        InvocationCause::Spawn("process pool closed".into()),
                    ))
                }
            }
        }
    }
}

struct SlotGuard<'a> {
    tx: &'a Sender<()>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}

/// Public render entry point. Share it behind an `Arc` across worker threads.
pub struct Dispatcher {
    registry: Arc<EngineRegistry>,
    config: DispatchConfig,
    process_slots: ProcessSlots,
    telemetry: TelemetryCollector,
}

impl Dispatcher {
    pub fn new(registry: Arc<EngineRegistry>, config: DispatchConfig) -> Self {
        let defaults = crate::config::TelemetryConfig::default();
        Self::with_telemetry(
            registry,
            config,
            TelemetryCollector::new(defaults.channel_capacity, defaults.history_capacity),
        )
    }

    fn with_telemetry(
        registry: Arc<EngineRegistry>,
        config: DispatchConfig,
        telemetry: TelemetryCollector,
    ) -> Self {
        let process_slots = ProcessSlots::new(config.process_slots());
        Self {
            registry,
            config,
            process_slots,
            telemetry,
        }
    }

    /// Build a dispatcher and its registry from host configuration.
    pub fn from_config(config: &HostConfig) -> Result<Self, EngineError> {
        if config.telemetry.channel_capacity == 0 {
            let err = EngineError::Config {
                reason: "telemetry.channel_capacity must be at least 1".to_string(),
            };
            log_engine_error(&err, "from_config");
            return Err(err);
        }
        let registry = Arc::new(EngineRegistry::from_config(config));
        let telemetry = TelemetryCollector::new(
            config.telemetry.channel_capacity,
            config.telemetry.history_capacity,
        );
        Ok(Self::with_telemetry(
            registry,
            config.dispatch.clone(),
            telemetry,
        ))
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    /// Context carrying the configured process timeout.
    pub fn default_context(&self) -> InvokeContext {
        InvokeContext::new().with_timeout(self.config.process_timeout())
    }

    /// Render one note with the configured timeout.
    pub fn render(&self, location: &str, item: &RenderItem) -> Result<Vec<u8>, EngineError> {
        self.render_with(location, item, &self.default_context())
    }

    /// Render one note under a caller-supplied timeout/cancel context.
    pub fn render_with(
        &self,
        location: &str,
        item: &RenderItem,
        ctx: &InvokeContext,
    ) -> Result<Vec<u8>, EngineError> {
        let _span = tracing::debug_span!("render", location).entered();
        let result = self.resolve(location).and_then(|descriptor| {
            let input = build(item)?;
            self.invoke(&descriptor, &input, ctx)
        });
        self.finish(location, result)
    }

    /// Invoke with an already-built input.
    pub fn render_input(
        &self,
        location: &str,
        input: &EngineInput,
        ctx: &InvokeContext,
    ) -> Result<Vec<u8>, EngineError> {
        let _span = tracing::debug_span!("render_input", location).entered();
        let result = self
            .resolve(location)
            .and_then(|descriptor| self.invoke(&descriptor, input, ctx));
        self.finish(location, result)
    }

    /// Render into a caller sink, returning the number of bytes written.
    pub fn render_into<W: Write>(
        &self,
        location: &str,
        item: &RenderItem,
        sink: &mut W,
    ) -> Result<usize, EngineError> {
        let bytes = self.render(location, item)?;
        sink.write_all(&bytes).map_err(|err| {
            let err = EngineError::invocation(location, InvocationCause::Encoding(err.to_string()));
            log_engine_error(&err, "render_into");
            err
        })?;
        Ok(bytes.len())
    }

    /// Render on the tokio blocking pool.
    pub async fn render_async(
        self: Arc<Self>,
        location: String,
        item: RenderItem,
    ) -> Result<Vec<u8>, EngineError> {
        let task_location = location.clone();
        tokio::task::spawn_blocking(move || self.render(&task_location, &item))
            .await
            .map_err(|err| {
                let err =
                    EngineError::invocation(location, InvocationCause::Panicked(err.to_string()));
                log_engine_error(&err, "render_async");
                err
            })?
    }

    /// Engine metadata for `location`, discovering it if needed.
    pub fn describe(&self, location: &str) -> Result<EngineInfo, EngineError> {
        self.resolve(location)
            .map(|descriptor| descriptor.info().clone())
            .map_err(|err| {
                log_engine_error(&err, "describe");
                err
            })
    }

    fn resolve(&self, location: &str) -> Result<Arc<EngineDescriptor>, EngineError> {
        let (descriptor, discovered) = self.registry.resolve_tracked(location)?;
        if discovered {
            self.telemetry.publish(RenderEvent::EngineResolved {
                location: location.to_string(),
                kind: descriptor.kind(),
                engine: descriptor.info().name.clone(),
            });
        }
        Ok(descriptor)
    }

    fn invoke(
        &self,
        descriptor: &EngineDescriptor,
        input: &EngineInput,
        ctx: &InvokeContext,
    ) -> Result<Vec<u8>, EngineError> {
        let started = Instant::now();
        let output = match descriptor.kind() {
            BindingKind::Process => {
                let ctx = ctx.clone().anchored(started);
                let _slot = self.process_slots.acquire(descriptor.location(), &ctx)?;
                descriptor.binding().invoke(input, &ctx)?
            }
            _ if self.config.serialize_invocations => {
                let _guard = descriptor.lock_invocations()?;
                descriptor.binding().invoke(input, ctx)?
            }
            _ => descriptor.binding().invoke(input, ctx)?,
        };
        let bytes = accept_output(descriptor.location(), output)?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            "[Dispatcher] {} rendered {} bytes in {} ms",
            descriptor.location(),
            bytes.len(),
            elapsed_ms
        );
        self.telemetry.publish(RenderEvent::RenderCompleted {
            location: descriptor.location().to_string(),
            bytes: bytes.len(),
            elapsed_ms,
        });
        Ok(bytes)
    }

    fn finish(
        &self,
        location: &str,
        result: Result<Vec<u8>, EngineError>,
    ) -> Result<Vec<u8>, EngineError> {
        if let Err(err) = &result {
            log_engine_error(err, "render");
            self.telemetry.publish(RenderEvent::RenderFailed {
                location: location.to_string(),
                code: err.code(),
                message: err.message(),
            });
        }
        result
    }
}

/// A zero-length buffer is never a successful render.
fn accept_output(location: &str, output: EngineOutput) -> Result<Vec<u8>, EngineError> {
    if output.is_empty() {
        return Err(EngineError::invocation(location, InvocationCause::EmptyOutput));
    }
    Ok(output.into_bytes())
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("engines", &self.registry.len())
            .finish()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let snapshot = self.telemetry.snapshot();
        if snapshot.total_events > 0 {
            info!(
                "[Dispatcher] Shutting down after {} events ({} failures)",
                snapshot.total_events, snapshot.failures
            );
        }
    }
}
