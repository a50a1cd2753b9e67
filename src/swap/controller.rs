//! Model swap controller.
//!
//! Several model backends share one endpoint and one GPU, so at most one may
//! run at a time. In supervised mode the controller stops whatever is
//! running, starts the requested unit, and polls the endpoint until it
//! answers. In passthrough mode (no supervisor available) it only checks that
//! something is serving and records the requested key optimistically.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use crate::error::SwapError;
use crate::llm::EndpointProbe;
use crate::swap::catalog::ModelCatalog;
use crate::swap::supervisor::Supervisor;

/// Polling cadence and bounds of the readiness protocol.
#[derive(Debug, Clone)]
pub struct SwapTimings {
    /// Step between probes while waiting for a stopped model to go away.
    pub drain_poll: Duration,
    /// Drain bound after stopping the recorded model.
    pub drain_timeout: Duration,
    /// Drain bound after stopping every known model.
    pub drain_all_timeout: Duration,
    /// Step between probes while waiting for a started model.
    pub ready_poll: Duration,
    /// Readiness bound after the startup grace.
    pub swap_timeout: Duration,
}

impl Default for SwapTimings {
    fn default() -> Self {
        Self {
            drain_poll: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(15),
            drain_all_timeout: Duration::from_secs(10),
            ready_poll: Duration::from_secs(1),
            swap_timeout: Duration::from_secs(120),
        }
    }
}

impl SwapTimings {
    pub fn with_swap_timeout(mut self, swap_timeout: Duration) -> Self {
        self.swap_timeout = swap_timeout;
        self
    }
}

/// Snapshot for the STATUS command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStatus {
    pub active: Option<String>,
    pub default_model: String,
    pub endpoint_online: bool,
    pub supervised: bool,
}

/// Keeps exactly one catalog model active on the shared endpoint.
pub struct ModelSwapController {
    catalog: ModelCatalog,
    default_key: String,
    probe: Arc<dyn EndpointProbe>,
    supervisor: Option<Arc<dyn Supervisor>>,
    active: Option<String>,
    timings: SwapTimings,
}

impl ModelSwapController {
    /// `supervisor = None` selects passthrough mode.
    pub fn new(
        catalog: ModelCatalog,
        default_key: impl Into<String>,
        probe: Arc<dyn EndpointProbe>,
        supervisor: Option<Arc<dyn Supervisor>>,
    ) -> Self {
        Self {
            catalog,
            default_key: default_key.into(),
            probe,
            supervisor,
            active: None,
            timings: SwapTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: SwapTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Key of the model believed to be running.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_supervised(&self) -> bool {
        self.supervisor.is_some()
    }

    pub async fn status(&self) -> ModelStatus {
        ModelStatus {
            active: self.active.clone(),
            default_model: self.default_key.clone(),
            endpoint_online: self.probe.is_available().await,
            supervised: self.is_supervised(),
        }
    }

    pub async fn ensure_default(&mut self) -> Result<(), SwapError> {
        let key = self.default_key.clone();
        self.ensure(&key).await
    }

    /// Make `key` the running model, swapping out whatever else is running.
    pub async fn ensure(&mut self, key: &str) -> Result<(), SwapError> {
        let Some(descriptor) = self.catalog.get(key).cloned() else {
            return Err(SwapError::UnknownModel {
                key: key.to_string(),
            });
        };

        let Some(supervisor) = self.supervisor.clone() else {
            return self.ensure_passthrough(key).await;
        };

        if self.active.as_deref() == Some(key) && self.probe.is_available().await {
            tracing::debug!(model = key, "Model already active");
            return Ok(());
        }

        match self.active.take() {
            Some(previous) => {
                if let Some(prev) = self.catalog.get(&previous) {
                    tracing::info!(from = %previous, to = key, "Stopping active model");
                    if let Err(e) = supervisor.stop(&prev.unit).await {
                        tracing::warn!(error = %e, "Failed to stop model");
                    }
                }
                self.wait_for_stopped(self.timings.drain_timeout).await;
            }
            None => {
                tracing::info!(to = key, "No model recorded, stopping all known models");
                for model in self.catalog.iter() {
                    if let Err(e) = supervisor.stop(&model.unit).await {
                        tracing::debug!(unit = %model.unit, error = %e, "Stop failed");
                    }
                }
                self.wait_for_stopped(self.timings.drain_all_timeout).await;
            }
        }

        tracing::info!(model = key, unit = %descriptor.unit, "Starting model");
        supervisor.start(&descriptor.unit).await?;

        tokio::time::sleep(descriptor.startup_grace).await;

        if self.wait_for_ready(self.timings.swap_timeout).await {
            tracing::info!(model = key, "Model ready");
            self.active = Some(key.to_string());
            Ok(())
        } else {
            tracing::error!(model = key, timeout = ?self.timings.swap_timeout, "Model failed to become ready");
            Err(SwapError::NotReady {
                key: key.to_string(),
                timeout: self.timings.swap_timeout,
            })
        }
    }

    async fn ensure_passthrough(&mut self, key: &str) -> Result<(), SwapError> {
        if self.probe.is_available().await {
            // No supervisor: whatever is serving is assumed to be `key`.
            self.active = Some(key.to_string());
            Ok(())
        } else {
            tracing::warn!(model = key, "LLM endpoint not reachable in passthrough mode");
            Err(SwapError::EndpointUnreachable {
                key: key.to_string(),
            })
        }
    }

    /// Run `body` with `key` active, then restore the previous model (or the
    /// default) whether `body` returns or panics.
    pub async fn with_model<F, Fut, T>(&mut self, key: &str, body: F) -> Result<T, SwapError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let restore_to = self
            .active
            .clone()
            .unwrap_or_else(|| self.default_key.clone());

        self.ensure(key).await?;

        let outcome = AssertUnwindSafe(body()).catch_unwind().await;

        if restore_to != key
            && let Err(e) = self.ensure(&restore_to).await
        {
            tracing::error!(model = %restore_to, error = %e, "Failed to restore model");
        }

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn wait_for_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.probe.is_available().await {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::debug!(?timeout, "Endpoint still answering after drain timeout");
                return false;
            }
            tokio::time::sleep(self.timings.drain_poll).await;
        }
    }

    async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.probe.is_available().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.timings.ready_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Endpoint that is live exactly when some unit is started.
    struct MockProbe {
        live: AtomicBool,
    }

    #[async_trait]
    impl EndpointProbe for MockProbe {
        async fn is_available(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    struct MockSupervisor {
        probe: Arc<MockProbe>,
        calls: Mutex<Vec<String>>,
        /// Units that start but never become ready.
        broken: Vec<String>,
        /// Units whose start command fails.
        refuse: Vec<String>,
    }

    impl MockSupervisor {
        fn new(probe: Arc<MockProbe>) -> Self {
            Self {
                probe,
                calls: Mutex::new(Vec::new()),
                broken: Vec::new(),
                refuse: Vec::new(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Supervisor for MockSupervisor {
        async fn start(&self, unit: &str) -> Result<(), SwapError> {
            self.calls.lock().unwrap().push(format!("start {unit}"));
            if self.refuse.iter().any(|u| u == unit) {
                return Err(SwapError::Supervisor {
                    action: "start".into(),
                    unit: unit.into(),
                    reason: "unit not found".into(),
                });
            }
            let ready = !self.broken.iter().any(|u| u == unit);
            self.probe.live.store(ready, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, unit: &str) -> Result<(), SwapError> {
            self.calls.lock().unwrap().push(format!("stop {unit}"));
            self.probe.live.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_timings() -> SwapTimings {
        SwapTimings {
            drain_poll: Duration::from_millis(1),
            drain_timeout: Duration::from_millis(20),
            drain_all_timeout: Duration::from_millis(20),
            ready_poll: Duration::from_millis(1),
            swap_timeout: Duration::from_millis(30),
        }
    }

    fn catalog() -> ModelCatalog {
        ModelCatalog::parse("triage:unit-a:0:default,heavy:unit-b:0:on_demand").unwrap()
    }

    fn supervised(
        supervisor: MockSupervisor,
        probe: Arc<MockProbe>,
    ) -> (ModelSwapController, Arc<MockSupervisor>) {
        let supervisor = Arc::new(supervisor);
        let controller = ModelSwapController::new(
            catalog(),
            "triage",
            probe,
            Some(supervisor.clone() as Arc<dyn Supervisor>),
        )
        .with_timings(fast_timings());
        (controller, supervisor)
    }

    fn probe(live: bool) -> Arc<MockProbe> {
        Arc::new(MockProbe {
            live: AtomicBool::new(live),
        })
    }

    #[tokio::test]
    async fn cold_start_stops_everything_then_starts() {
        let p = probe(false);
        let (mut controller, sup) = supervised(MockSupervisor::new(p.clone()), p);

        controller.ensure_default().await.unwrap();
        assert_eq!(controller.active(), Some("triage"));
        assert_eq!(sup.calls(), vec!["stop unit-a", "stop unit-b", "start unit-a"]);
    }

    #[tokio::test]
    async fn ensure_is_idempotent_when_live() {
        let p = probe(false);
        let (mut controller, sup) = supervised(MockSupervisor::new(p.clone()), p);

        controller.ensure("triage").await.unwrap();
        let before = sup.calls().len();
        controller.ensure("triage").await.unwrap();
        controller.ensure("triage").await.unwrap();
        assert_eq!(sup.calls().len(), before);
        assert_eq!(controller.active(), Some("triage"));
    }

    #[tokio::test]
    async fn swap_stops_only_the_recorded_model() {
        let p = probe(false);
        let (mut controller, sup) = supervised(MockSupervisor::new(p.clone()), p);
        controller.ensure("triage").await.unwrap();

        controller.ensure("heavy").await.unwrap();
        assert_eq!(controller.active(), Some("heavy"));
        assert_eq!(&sup.calls()[3..], ["stop unit-a", "start unit-b"]);
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_without_side_effects() {
        let p = probe(false);
        let (mut controller, sup) = supervised(MockSupervisor::new(p.clone()), p);

        let err = controller.ensure("ghost").await.unwrap_err();
        assert!(matches!(err, SwapError::UnknownModel { .. }));
        assert!(sup.calls().is_empty());
        assert_eq!(controller.active(), None);
    }

    #[tokio::test]
    async fn not_ready_leaves_record_cleared() {
        let p = probe(false);
        let mut mock = MockSupervisor::new(p.clone());
        mock.broken = vec!["unit-b".into()];
        let (mut controller, _) = supervised(mock, p);
        controller.ensure("triage").await.unwrap();

        let err = controller.ensure("heavy").await.unwrap_err();
        assert!(matches!(err, SwapError::NotReady { ref key, .. } if key == "heavy"));
        assert_eq!(controller.active(), None);
    }

    #[tokio::test]
    async fn failed_start_is_an_error() {
        let p = probe(false);
        let mut mock = MockSupervisor::new(p.clone());
        mock.refuse = vec!["unit-a".into()];
        let (mut controller, _) = supervised(mock, p);

        let err = controller.ensure("triage").await.unwrap_err();
        assert!(matches!(err, SwapError::Supervisor { .. }));
        assert_eq!(controller.active(), None);
    }

    #[tokio::test]
    async fn with_model_restores_previous() {
        let p = probe(false);
        let (mut controller, sup) = supervised(MockSupervisor::new(p.clone()), p);
        controller.ensure("triage").await.unwrap();

        let out = controller.with_model("heavy", || async { 42 }).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(controller.active(), Some("triage"));
        assert!(sup.calls().iter().any(|c| c == "start unit-b"));
    }

    #[tokio::test]
    async fn with_model_restores_default_when_nothing_active() {
        let p = probe(false);
        let (mut controller, sup) = supervised(MockSupervisor::new(p.clone()), p);
        assert_eq!(controller.active(), None);

        let out = controller.with_model("heavy", || async { "done" }).await.unwrap();
        assert_eq!(out, "done");
        assert_eq!(controller.active(), Some("triage"));

        let calls = sup.calls();
        let position = |call: &str| calls.iter().rposition(|c| c == call).unwrap();
        assert!(position("start unit-a") > position("start unit-b"));
        assert_eq!(calls.last().map(String::as_str), Some("start unit-a"));
    }

    #[tokio::test]
    async fn with_model_restores_after_panic() {
        let p = probe(false);
        let (mut controller, _) = supervised(MockSupervisor::new(p.clone()), p);
        controller.ensure("triage").await.unwrap();

        async fn explode() -> u32 {
            panic!("body blew up");
        }

        let result = AssertUnwindSafe(controller.with_model("heavy", explode))
            .catch_unwind()
            .await;
        assert!(result.is_err());
        assert_eq!(controller.active(), Some("triage"));
    }

    #[tokio::test]
    async fn with_model_does_not_run_body_when_swap_fails() {
        let p = probe(false);
        let mut mock = MockSupervisor::new(p.clone());
        mock.broken = vec!["unit-b".into()];
        let (mut controller, _) = supervised(mock, p);
        controller.ensure("triage").await.unwrap();

        let ran = AtomicBool::new(false);
        let flag = &ran;
        let result = controller
            .with_model("heavy", move || async move { flag.store(true, Ordering::SeqCst) })
            .await;
        assert!(result.is_err());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn passthrough_records_when_live() {
        let p = probe(true);
        let mut controller = ModelSwapController::new(catalog(), "triage", p.clone(), None);
        assert!(!controller.is_supervised());

        controller.ensure("heavy").await.unwrap();
        assert_eq!(controller.active(), Some("heavy"));

        p.live.store(false, Ordering::SeqCst);
        let err = controller.ensure("triage").await.unwrap_err();
        assert!(matches!(err, SwapError::EndpointUnreachable { .. }));
    }

    #[tokio::test]
    async fn status_reports_endpoint() {
        let p = probe(true);
        let mut controller = ModelSwapController::new(catalog(), "triage", p, None);
        controller.ensure_default().await.unwrap();

        let status = controller.status().await;
        assert_eq!(status.active.as_deref(), Some("triage"));
        assert!(status.endpoint_online);
        assert!(!status.supervised);
    }
}
