//! Load → derive → sign → compare → commit + render.
//!
//! One [`Pipeline`] owns the loader, the derivation engine, the record store
//! and the renderer with its bindings. It has no notion of timing or overlap;
//! [`crate::scheduler::RefreshScheduler`] decides when a cycle may run.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::derive::DerivationEngine;
use crate::error::LoadError;
use crate::record::Record;
use crate::render::{Binding, BindingRenderer};
use crate::signature::{signature, Signature};
use crate::source::{Loaded, Origin, SourceLoader};
use crate::store::RecordStore;

/// Result of one refresh check.
#[derive(Debug)]
pub enum CheckOutcome {
    /// Another cycle was in flight, nothing has been loaded yet, or a
    /// manual load committed while this cycle was fetching.
    Skipped,
    /// The fetched record matched the accepted one.
    Unchanged,
    /// A new record was committed and `rendered` targets were written.
    Updated { origin: Origin, rendered: usize },
    /// Loading failed; the previous record stays in place.
    Failed(LoadError),
}

impl CheckOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

pub struct Pipeline {
    loader: SourceLoader,
    engine: DerivationEngine,
    store: RecordStore,
    renderer: BindingRenderer,
    bindings: Vec<Binding>,
}

impl Pipeline {
    pub fn new(
        loader: SourceLoader,
        engine: DerivationEngine,
        renderer: BindingRenderer,
        bindings: Vec<Binding>,
    ) -> Self {
        Self {
            loader,
            engine,
            store: RecordStore::new(),
            renderer,
            bindings,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn loader(&self) -> &SourceLoader {
        &self.loader
    }

    pub fn engine(&self) -> &DerivationEngine {
        &self.engine
    }

    pub fn renderer(&self) -> &BindingRenderer {
        &self.renderer
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Load with `force_local_picker` and accept the result unconditionally.
    /// Used for the initial load and for manual file selection. A refresh
    /// cycle that was already fetching when this commits discards its result.
    pub async fn load_and_accept(&self, force_local_picker: bool) -> Result<usize, LoadError> {
        let Loaded { mut record, origin } = self.loader.load(force_local_picker).await?;
        self.engine.derive(&mut record);
        let signature = sign(&record);
        let rendered = self.commit(record, signature);
        info!(origin = %origin, rendered, "cost record loaded");
        Ok(rendered)
    }

    /// One refresh cycle. Failures are logged here and never propagate.
    pub async fn run_cycle(&self) -> CheckOutcome {
        debug!("checking for cost record changes");
        let generation = self.store.commits();

        let Loaded { mut record, origin } = match self.loader.load(false).await {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(error = %err, "cost record refresh failed, keeping last accepted record");
                return CheckOutcome::Failed(err);
            }
        };

        self.engine.derive(&mut record);
        let signature = sign(&record);

        if !self.store.is_changed(signature.as_ref()) {
            debug!(origin = %origin, "cost record unchanged");
            return CheckOutcome::Unchanged;
        }

        let Some(record) = self.store.commit_if_current(generation, record, signature) else {
            debug!(origin = %origin, "cost record replaced during check, discarding result");
            return CheckOutcome::Skipped;
        };
        let rendered = self.renderer.render_all(&record, &self.bindings);
        info!(origin = %origin, rendered, "cost record updated");
        self.log_service_totals();

        CheckOutcome::Updated { origin, rendered }
    }

    /// Re-render every binding against the current record.
    pub fn render_current(&self) -> usize {
        match self.store.current() {
            Some(record) => self.renderer.render_all(&record, &self.bindings),
            None => 0,
        }
    }

    fn commit(&self, record: Record, signature: Option<Signature>) -> usize {
        let record = self.store.commit(record, signature);
        self.renderer.render_all(&record, &self.bindings)
    }

    fn log_service_totals(&self) {
        let Some(record) = self.store.current() else {
            return;
        };
        let Some(slide) = record.slide(&self.engine.scope().services_slide) else {
            return;
        };
        let null = Value::Null;
        let totals = slide.get("totals").unwrap_or(&null);
        let monthly = totals.get("monthlyInvestment").unwrap_or(&null);
        let first_period = totals.get("firstPeriodInvestment").unwrap_or(&null);
        debug!(
            slide = %self.engine.scope().services_slide,
            monthly_investment = %monthly,
            first_period_investment = %first_period,
            "new service totals"
        );
    }
}

fn sign(record: &Record) -> Option<Signature> {
    match signature(record) {
        Ok(signature) => Some(signature),
        Err(err) => {
            warn!(error = %err, "could not fingerprint cost record, treating it as changed");
            None
        }
    }
}
