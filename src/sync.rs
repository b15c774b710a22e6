//! The cost sync context.
//!
//! Constructed once at startup and handed to whatever drives the display.
//! Owns the pipeline and the refresh scheduler and exposes the manual entry
//! points (refresh, local file selection) plus read-only lookups.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::derive::{DerivationEngine, Formula, FormulaId};
use crate::error::LoadError;
use crate::format::{format_value, ValueKind};
use crate::pipeline::{CheckOutcome, Pipeline};
use crate::record::Record;
use crate::render::{BindingRenderer, DisplaySurface, SlideMapping};
use crate::scheduler::{RefreshScheduler, SchedulerState};
use crate::source::{FileHandle, FilePicker, HttpSource, RecordSource, SourceLoader};

pub struct CostSync {
    pipeline: Arc<Pipeline>,
    scheduler: RefreshScheduler,
    auto_refresh: bool,
    refresh_interval: Duration,
    initial_delay: Duration,
}

impl CostSync {
    pub fn new(
        config: &SyncConfig,
        remote: Arc<dyn RecordSource>,
        picker: Option<Arc<dyn FilePicker>>,
        surface: Arc<dyn DisplaySurface>,
    ) -> Self {
        let mut loader = SourceLoader::new(remote, picker, config.data_version.clone());
        if let Some(path) = &config.local_file {
            match FileHandle::new(path) {
                Ok(handle) => loader = loader.with_file_handle(handle),
                Err(err) => warn!(error = %err, "configured local file ignored"),
            }
        }
        let pipeline = Arc::new(Pipeline::new(
            loader,
            DerivationEngine::new(config.scope.clone()),
            BindingRenderer::new(surface),
            config.bindings.clone(),
        ));

        Self {
            scheduler: RefreshScheduler::new(pipeline.clone()),
            pipeline,
            auto_refresh: config.auto_refresh,
            refresh_interval: config.refresh_interval,
            initial_delay: config.initial_delay,
        }
    }

    /// Production wiring: HTTP transport for `config.source_url`.
    pub fn from_config(
        config: &SyncConfig,
        picker: Option<Arc<dyn FilePicker>>,
        surface: Arc<dyn DisplaySurface>,
    ) -> Self {
        let remote = Arc::new(HttpSource::new(config.source_url.clone(), config.request_timeout));
        Self::new(config, remote, picker, surface)
    }

    /// Initial load. Renders every binding and starts auto-refresh on
    /// success; failure is reported as `false` so the host can decide what
    /// to do next.
    pub async fn initialize(&self) -> bool {
        match self.pipeline.load_and_accept(false).await {
            Ok(_) => {
                self.start_auto_refresh();
                true
            }
            Err(err) => {
                warn!(error = %err, "initial cost record load failed");
                if self.pipeline.loader().can_pick_files() {
                    info!("a local cost file can be selected instead");
                }
                false
            }
        }
    }

    /// Manual refresh outside the schedule.
    pub async fn refresh(&self) -> CheckOutcome {
        if !self.is_loaded() {
            warn!("no cost record loaded yet, initialize first");
            return CheckOutcome::Skipped;
        }
        self.scheduler.check_now().await
    }

    /// Prompt for a local file and accept it unconditionally.
    pub async fn select_local_file(&self) -> bool {
        match self.pipeline.load_and_accept(true).await {
            Ok(_) => {
                info!("cost record loaded from manually selected file");
                self.start_auto_refresh();
                true
            }
            Err(LoadError::UnsupportedEnvironment) => {
                warn!("local file selection is not available in this environment");
                false
            }
            Err(LoadError::UserCancelled) => {
                warn!("no cost file was selected");
                false
            }
            Err(err) => {
                warn!(error = %err, "could not load the selected cost file");
                false
            }
        }
    }

    /// Start polling if auto-refresh is enabled. Returns whether a new
    /// schedule was started.
    pub fn start_auto_refresh(&self) -> bool {
        if !self.auto_refresh {
            return false;
        }
        self.scheduler.start(self.refresh_interval, self.initial_delay)
    }

    pub fn shutdown(&self) {
        self.scheduler.stop();
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.store().is_loaded()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn record(&self) -> Option<Arc<Record>> {
        self.pipeline.store().current()
    }

    pub fn slide(&self, slide_id: &str) -> Option<Value> {
        self.record()?.slide(slide_id).cloned()
    }

    pub fn metric(&self, slide_id: &str, name: &str) -> Option<Value> {
        self.lookup(slide_id, &format!("metrics.{}", name))
    }

    pub fn service(&self, slide_id: &str, name: &str) -> Option<Value> {
        self.lookup(slide_id, &format!("services.{}", name))
    }

    /// Resolve `field` in `slide_id` and format it as `kind`.
    pub fn get(&self, slide_id: &str, field: &str, kind: ValueKind) -> Option<String> {
        let record = self.record()?;
        let value = record.resolve(slide_id, field).found()?;
        Some(format_value(value, kind, &record.configuration.format))
    }

    pub fn formula(&self, id: FormulaId) -> Option<Formula> {
        let record = self.record()?;
        self.pipeline.engine().formula(&record, id)
    }

    /// Render ad-hoc mappings against one slide of the current record.
    pub fn render_slide(&self, slide_id: &str, mappings: &[SlideMapping]) -> usize {
        match self.record() {
            Some(record) => self.pipeline.renderer().render_slide(&record, slide_id, mappings),
            None => 0,
        }
    }

    /// Re-render every configured binding against the current record.
    pub fn render_all(&self) -> usize {
        self.pipeline.render_current()
    }

    fn lookup(&self, slide_id: &str, path: &str) -> Option<Value> {
        self.record()?.resolve(slide_id, path).found().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Binding, MemorySurface};
    use crate::source::testing::{QueuePicker, ScriptedSource};
    use crate::source::Origin;
    use serde_json::json;

    const RECORD: &str = r#"{
        "slides": {
            "slide14": {
                "distribution": {
                    "facebook": { "investment": 3000, "leads": 50 },
                    "instagram": { "investment": 2000, "leads": 40 }
                },
                "metrics": { "conversionRate": 3.5 }
            },
            "slide19": {
                "services": {
                    "content": { "oneTime": 500, "monthly": 300 },
                    "adCreation": { "oneTime": 200 },
                    "adManagement": { "setupCost": 100, "monthly": 400, "commissionRate": 0.1 }
                }
            }
        },
        "configuration": { "format": { "thousandsSeparator": ",", "currencySymbol": "$" } }
    }"#;

    fn config() -> SyncConfig {
        SyncConfig {
            auto_refresh: false,
            bindings: vec![
                Binding::new("first", "slide19", "totals.firstPeriodInvestment", ValueKind::Currency),
                Binding::new("cpl", "slide14", "costPerLead", ValueKind::Number),
            ],
            ..SyncConfig::default()
        }
    }

    fn sync_with(
        responses: Vec<Result<String, String>>,
        picker: Option<Arc<dyn FilePicker>>,
    ) -> (CostSync, Arc<MemorySurface>) {
        let surface = Arc::new(MemorySurface::new());
        let remote = Arc::new(ScriptedSource::new(responses));
        (CostSync::new(&config(), remote, picker, surface.clone()), surface)
    }

    #[tokio::test]
    async fn test_initialize_renders_bindings() {
        let (sync, surface) = sync_with(vec![Ok(RECORD.into())], None);
        assert!(sync.initialize().await);
        assert!(sync.is_loaded());
        // media investment comes from the distribution slide: 800 + 700 + 5000
        assert_eq!(surface.text("first").as_deref(), Some("$6,500"));
        assert_eq!(surface.text("cpl").as_deref(), Some("55.56"));
        assert_eq!(sync.scheduler_state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_initialize_failure_is_false() {
        let (sync, surface) = sync_with(vec![Err("connection refused".into())], None);
        assert!(!sync.initialize().await);
        assert!(!sync.is_loaded());
        assert!(surface.snapshot().is_empty());
        assert!(matches!(sync.refresh().await, CheckOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_lookups() {
        let (sync, _surface) = sync_with(vec![Ok(RECORD.into())], None);
        assert!(sync.get("slide14", "costPerLead", ValueKind::Number).is_none());
        sync.initialize().await;

        assert_eq!(
            sync.get("slide19", "totals.monthlyInvestment", ValueKind::Currency).as_deref(),
            Some("$5,700")
        );
        assert_eq!(sync.metric("slide14", "conversionRate"), Some(json!(3.5)));
        assert_eq!(
            sync.service("slide19", "adCreation"),
            Some(json!({ "oneTime": 200 }))
        );
        assert!(sync.metric("slide19", "conversionRate").is_none());
        assert!(sync.slide("slide99").is_none());

        match sync.formula(FormulaId::Services) {
            Some(Formula::Services { ad_commission, .. }) => {
                assert!((ad_commission - 500.0).abs() < 1e-9)
            }
            other => panic!("unexpected formula: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_render_slide() {
        let (sync, surface) = sync_with(vec![Ok(RECORD.into())], None);
        sync.initialize().await;
        let written = sync.render_slide(
            "slide14",
            &[SlideMapping {
                target: "conversion".into(),
                field: "metrics.conversionRate".into(),
                kind: ValueKind::Percentage,
            }],
        );
        assert_eq!(written, 1);
        assert_eq!(surface.text("conversion").as_deref(), Some("3.5%"));
    }

    #[tokio::test]
    async fn test_select_local_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        std::io::Write::write_all(&mut file, RECORD.as_bytes()).unwrap();

        let picker: Arc<dyn FilePicker> =
            Arc::new(QueuePicker::new(vec![None, Some(file.path().to_path_buf())]));
        let (sync, surface) = sync_with(vec![Err("offline".into())], Some(picker));

        assert!(!sync.initialize().await);
        // first prompt is dismissed
        assert!(!sync.select_local_file().await);
        assert!(sync.select_local_file().await);
        assert!(sync.is_loaded());
        assert_eq!(surface.text("first").as_deref(), Some("$6,500"));

        // remote still offline: the selected file answers the manual refresh
        assert!(matches!(sync.refresh().await, CheckOutcome::Unchanged));
    }

    #[tokio::test]
    async fn test_select_without_picker() {
        let (sync, _surface) = sync_with(vec![Ok(RECORD.into())], None);
        assert!(!sync.select_local_file().await);
        assert!(!sync.is_loaded());
    }

    #[tokio::test]
    async fn test_configured_local_file_backs_remote_outage() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        std::io::Write::write_all(
            &mut file,
            RECORD.replace("\"investment\": 3000", "\"investment\": 4000").as_bytes(),
        )
        .unwrap();

        let config = SyncConfig {
            local_file: Some(file.path().to_path_buf()),
            ..config()
        };
        let surface = Arc::new(MemorySurface::new());
        let remote = Arc::new(ScriptedSource::new(vec![
            Ok(RECORD.into()),
            Err("HTTP 503".into()),
        ]));
        let picker: Arc<dyn FilePicker> = Arc::new(QueuePicker::new(vec![]));
        let sync = CostSync::new(&config, remote, Some(picker), surface.clone());

        assert!(sync.initialize().await);
        assert_eq!(surface.text("first").as_deref(), Some("$6,500"));

        match sync.refresh().await {
            CheckOutcome::Updated { origin, .. } => {
                assert_eq!(origin, Origin::Local(file.path().to_path_buf()))
            }
            other => panic!("expected local fallback, got {:?}", other),
        }
        assert_eq!(surface.text("first").as_deref(), Some("$7,500"));
    }

    #[tokio::test]
    async fn test_non_json_local_file_is_ignored() {
        let config = SyncConfig {
            local_file: Some("/tmp/costs.csv".into()),
            ..config()
        };
        let surface = Arc::new(MemorySurface::new());
        let remote = Arc::new(ScriptedSource::new(vec![Ok(RECORD.into()), Err("down".into())]));
        let sync = CostSync::new(&config, remote, None, surface);

        assert!(sync.initialize().await);
        assert!(matches!(sync.refresh().await, CheckOutcome::Failed(_)));
    }
}
