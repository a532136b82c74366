//! The adapter: single chokepoint for all LLM calls
//!
//! Routing, admission, concurrency, retry, cancellation, and I/O logging
//! live here so no caller talks to a backend directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use quarry_core::{
    GenerateRequest, GenerateResponse, LlmIoLog, LlmRequestRecord, LlmResponseRecord, NoopLlmIoLog,
};
use quarry_config::Settings;

use crate::backend::{
    HostedBackend, HostedConfig, LlmBackend, LocalBackend, LocalConfig, ProviderFamily,
    ProviderUri,
};
use crate::hardware::HardwareProfile;
use crate::memory::{AdmissionController, MemoryMonitor, SysinfoMemoryMonitor};
use crate::LlmError;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Per-call context: correlation id for logging plus the run's cancellation
/// token.
#[derive(Clone)]
pub struct RequestContext {
    pub run_id: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(run_id: Option<String>, cancel: CancellationToken) -> Self {
        Self { run_id, cancel }
    }

    pub fn detached() -> Self {
        Self { run_id: None, cancel: CancellationToken::new() }
    }
}

/// Centralized request submission. Constructed once at startup and injected
/// into every processor; processors never build their own.
pub struct LlmAdapter {
    backends: HashMap<String, Arc<dyn LlmBackend>>,
    local_semaphore: Arc<Semaphore>,
    hosted_semaphore: Arc<Semaphore>,
    admission: AdmissionController,
    iolog: Arc<dyn LlmIoLog>,
    request_timeout: Duration,
    profile: HardwareProfile,
}

impl LlmAdapter {
    /// Build from settings with hardware detection and OS memory monitoring.
    pub fn from_settings(settings: &Settings, iolog: Arc<dyn LlmIoLog>) -> Result<Self, LlmError> {
        let profile = HardwareProfile::detect();
        let monitor: Arc<dyn MemoryMonitor> = Arc::new(SysinfoMemoryMonitor::new());
        Self::build(settings, iolog, profile, monitor)
    }

    /// Build with explicit hardware profile and memory monitor.
    pub fn build(
        settings: &Settings,
        iolog: Arc<dyn LlmIoLog>,
        profile: HardwareProfile,
        monitor: Arc<dyn MemoryMonitor>,
    ) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(settings.llm.request_timeout_secs);

        let mut backends: HashMap<String, Arc<dyn LlmBackend>> = HashMap::new();
        backends.insert(
            "local".to_string(),
            Arc::new(LocalBackend::new(LocalConfig {
                endpoint: settings.llm.local_endpoint.clone(),
                default_model: settings.llm.local_model.clone(),
                timeout,
            })?),
        );
        backends.insert(
            "openai".to_string(),
            Arc::new(HostedBackend::new(HostedConfig {
                provider_name: "openai".to_string(),
                endpoint: settings.llm.hosted_endpoint.clone(),
                api_key: settings.llm.api_key.clone(),
                default_model: settings.llm.model.clone(),
                timeout,
            })?),
        );

        Ok(Self::assemble(backends, settings, profile, monitor, iolog, timeout))
    }

    /// Assemble from pre-built backends. Tests inject mocks here.
    pub fn with_backends(
        backends: HashMap<String, Arc<dyn LlmBackend>>,
        settings: &Settings,
        profile: HardwareProfile,
        monitor: Arc<dyn MemoryMonitor>,
        iolog: Arc<dyn LlmIoLog>,
    ) -> Self {
        let timeout = Duration::from_secs(settings.llm.request_timeout_secs);
        Self::assemble(backends, settings, profile, monitor, iolog, timeout)
    }

    fn assemble(
        backends: HashMap<String, Arc<dyn LlmBackend>>,
        settings: &Settings,
        profile: HardwareProfile,
        monitor: Arc<dyn MemoryMonitor>,
        iolog: Arc<dyn LlmIoLog>,
        request_timeout: Duration,
    ) -> Self {
        let limits = profile.tier.semaphore_limits();
        let local = settings.llm.max_concurrent_local.unwrap_or(limits.local).max(1);
        let hosted = settings.llm.max_concurrent_cloud.unwrap_or(limits.hosted).max(1);
        debug!(
            tier = ?profile.tier,
            workers = profile.workers,
            local_permits = local,
            hosted_permits = hosted,
            "llm adapter configured"
        );
        Self {
            backends,
            local_semaphore: Arc::new(Semaphore::new(local)),
            hosted_semaphore: Arc::new(Semaphore::new(hosted)),
            admission: AdmissionController::new(monitor, profile.workers),
            iolog,
            request_timeout,
            profile,
        }
    }

    /// Register an additional hosted backend under its provider name.
    pub fn register_backend(&mut self, name: impl Into<String>, backend: Arc<dyn LlmBackend>) {
        self.backends.insert(name.into(), backend);
    }

    /// Register the emergency-cleanup hook run when memory parks.
    pub fn set_emergency_cleanup(&mut self, hook: Arc<dyn Fn() + Send + Sync>) {
        self.admission.set_emergency_cleanup(hook);
    }

    pub fn hardware_profile(&self) -> HardwareProfile {
        self.profile
    }

    /// Submit one generation request through admission control, the family
    /// semaphore, and the retry loop.
    pub async fn generate(
        &self,
        provider: &ProviderUri,
        request: GenerateRequest,
        ctx: &RequestContext,
    ) -> Result<GenerateResponse, LlmError> {
        if ctx.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let backend = self
            .backends
            .get(&provider.provider)
            .ok_or_else(|| {
                LlmError::Configuration(format!("unknown provider {:?}", provider.provider))
            })?
            .clone();

        // Admission before the semaphore so memory pressure also gates
        // requests that would otherwise queue on permits.
        let _admission = self.admission.admit(&ctx.cancel).await?;

        let semaphore = match backend.family() {
            ProviderFamily::Local => &self.local_semaphore,
            ProviderFamily::Hosted => &self.hosted_semaphore,
        };
        let _permit = tokio::select! {
            permit = semaphore.acquire() => {
                permit.map_err(|_| LlmError::Configuration("semaphore closed".to_string()))?
            }
            _ = ctx.cancel.cancelled() => return Err(LlmError::Cancelled),
        };

        let request_id = Uuid::new_v4().to_string();
        let request_record = LlmRequestRecord {
            request_id: request_id.clone(),
            run_id: ctx.run_id.clone(),
            provider: provider.provider.clone(),
            model: provider.model.clone(),
            prompt_hash: request.prompt_hash(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.iolog.record_request(&request_record).await {
            warn!(error = %e, "failed to record llm request");
        }

        let result = self.generate_with_retry(backend.as_ref(), provider, &request, ctx).await;

        let response_record = match &result {
            Ok(response) => LlmResponseRecord {
                request_id,
                response_text: Some(response.text.clone()),
                tokens_in: response.usage.tokens_in,
                tokens_out: response.usage.tokens_out,
                duration_ms: response.duration_ms,
                error_code: None,
            },
            Err(err) => LlmResponseRecord {
                request_id,
                response_text: None,
                tokens_in: 0,
                tokens_out: 0,
                duration_ms: 0,
                error_code: Some(err.code().to_string()),
            },
        };
        if let Err(e) = self.iolog.record_response(&response_record).await {
            warn!(error = %e, "failed to record llm response");
        }

        result
    }

    async fn generate_with_retry(
        &self,
        backend: &dyn LlmBackend,
        provider: &ProviderUri,
        request: &GenerateRequest,
        ctx: &RequestContext,
    ) -> Result<GenerateResponse, LlmError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let jittered = jitter(backoff);
                warn!(
                    provider = %provider,
                    attempt,
                    delay_ms = jittered.as_millis() as u64,
                    "llm request failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(jittered) => {}
                    _ = ctx.cancel.cancelled() => return Err(LlmError::Cancelled),
                }
                backoff *= 2;
            }

            let outcome = tokio::select! {
                r = tokio::time::timeout(
                    self.request_timeout,
                    backend.generate(&provider.model, request),
                ) => match r {
                    Ok(inner) => inner,
                    Err(_) => Err(LlmError::Timeout),
                },
                _ = ctx.cancel.cancelled() => return Err(LlmError::Cancelled),
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(LlmError::Timeout))
    }

    /// Synchronous entry point. Safe to call from inside a running tokio
    /// runtime: the call is dispatched to a dedicated thread with its own
    /// runtime rather than nesting `block_on`.
    pub fn generate_blocking(
        self: &Arc<Self>,
        provider: &ProviderUri,
        request: GenerateRequest,
        ctx: &RequestContext,
    ) -> Result<GenerateResponse, LlmError> {
        let adapter = Arc::clone(self);
        let provider = provider.clone();
        let ctx = ctx.clone();

        let run = move || -> Result<GenerateResponse, LlmError> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| LlmError::Configuration(format!("runtime: {e}")))?;
            runtime.block_on(adapter.generate(&provider, request, &ctx))
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            // Already inside a runtime; a nested block_on would panic
            std::thread::scope(|scope| {
                scope
                    .spawn(run)
                    .join()
                    .map_err(|_| LlmError::Configuration("blocking thread panicked".to_string()))?
            })
        } else {
            run()
        }
    }
}

/// Default adapter for contexts with no persistent log.
pub fn adapter_without_logging(settings: &Settings) -> Result<LlmAdapter, LlmError> {
    LlmAdapter::from_settings(settings, Arc::new(NoopLlmIoLog))
}

fn jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StubMemoryMonitor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyBackend {
        calls: AtomicUsize,
        fail_first: usize,
        error: fn() -> LlmError,
    }

    #[async_trait]
    impl LlmBackend for FlakyBackend {
        async fn generate(
            &self,
            _model: &str,
            _request: &GenerateRequest,
        ) -> Result<GenerateResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err((self.error)())
            } else {
                Ok(GenerateResponse::text_only("ok"))
            }
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn family(&self) -> ProviderFamily {
            ProviderFamily::Local
        }

        fn provider_name(&self) -> &str {
            "local"
        }
    }

    fn adapter_with(backend: Arc<dyn LlmBackend>) -> LlmAdapter {
        let mut backends: HashMap<String, Arc<dyn LlmBackend>> = HashMap::new();
        backends.insert("local".to_string(), backend);
        let settings = Settings::default();
        LlmAdapter::with_backends(
            backends,
            &settings,
            HardwareProfile::from_specs(8, 32.0),
            Arc::new(StubMemoryMonitor::new(0.30)),
            Arc::new(NoopLlmIoLog),
        )
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            error: || LlmError::RateLimited("slow down".into()),
        });
        let adapter = adapter_with(backend.clone());
        let uri = ProviderUri::parse("local:m").unwrap();
        let response = adapter
            .generate(&uri, GenerateRequest::new("s"), &RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_auth_failures() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 10,
            error: || LlmError::Auth("bad key".into()),
        });
        let adapter = adapter_with(backend.clone());
        let uri = ProviderUri::parse("local:m").unwrap();
        let result = adapter
            .generate(&uri, GenerateRequest::new("s"), &RequestContext::detached())
            .await;
        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_provider_is_configuration_error() {
        let adapter = adapter_with(Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            error: || LlmError::Timeout,
        }));
        let uri = ProviderUri::parse("nonexistent:m").unwrap();
        let result = adapter
            .generate(&uri, GenerateRequest::new("s"), &RequestContext::detached())
            .await;
        assert!(matches!(result, Err(LlmError::Configuration(_))));
    }

    #[tokio::test]
    async fn pre_cancelled_context_short_circuits() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            error: || LlmError::Timeout,
        });
        let adapter = adapter_with(backend.clone());
        let uri = ProviderUri::parse("local:m").unwrap();
        let ctx = RequestContext::detached();
        ctx.cancel.cancel();
        let result = adapter.generate(&uri, GenerateRequest::new("s"), &ctx).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_entry_works_inside_a_runtime() {
        let adapter = Arc::new(adapter_with(Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            error: || LlmError::Timeout,
        })));
        let uri = ProviderUri::parse("local:m").unwrap();
        let ctx = RequestContext::detached();
        // Called from within the test runtime; must not panic
        let response = tokio::task::spawn_blocking(move || {
            adapter.generate_blocking(&uri, GenerateRequest::new("s"), &ctx)
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.text, "ok");
    }
}
