use crate::{
    config::DeployConfig,
    fingerprint::{Fingerprint, LinkMode},
    host::Host,
    link::{remove_stale_link, DeploymentEntry, LinkAction, Linker, Outcome},
    origin,
    state::{DeployedRecord, StateStore},
    walker::{RootCategory, VirtualFile, VirtualTreeWalker},
};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Walking,
    Resolving,
    Executing,
    Persisting,
    Done,
    Canceled,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub virtual_path: String,
    pub target_path: PathBuf,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

impl EntryReport {
    fn new(virtual_path: &str, target_path: PathBuf, action: &LinkAction) -> Self {
        Self {
            virtual_path: virtual_path.to_string(),
            target_path,
            outcome: action.outcome(),
            detail: action.detail(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploySummary {
    pub link_mode: LinkMode,
    pub final_phase: Phase,
    pub linked: usize,
    pub already_deployed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub canceled: usize,
    pub removed: usize,
    pub state_saved: bool,
    pub duration_secs: f64,
}

impl DeploySummary {
    fn new(link_mode: LinkMode) -> Self {
        Self {
            link_mode,
            final_phase: Phase::Idle,
            linked: 0,
            already_deployed: 0,
            skipped: 0,
            failed: 0,
            canceled: 0,
            removed: 0,
            state_saved: false,
            duration_secs: 0.0,
        }
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Linked => self.linked += 1,
            Outcome::AlreadyDeployed => self.already_deployed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Canceled => self.canceled += 1,
            Outcome::Removed => self.removed += 1,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Clone)]
pub enum DeployEvent {
    Phase(Phase),
    Entry(EntryReport),
    Warning(String),
    Finished(DeploySummary),
}

/// A deployment cycle running on its own coordinating thread.
pub struct DeployHandle {
    events: Receiver<DeployEvent>,
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<DeploySummary>,
}

impl DeployHandle {
    pub fn events(&self) -> &Receiver<DeployEvent> {
        &self.events
    }

    /// Entries not yet started finish as canceled; running ones complete.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn wait(self) -> Result<DeploySummary> {
        self.thread
            .join()
            .map_err(|_| anyhow::anyhow!("deployment thread panicked"))
    }
}

/// Reconciles the host's overlay with the target tree.
#[derive(Clone)]
pub struct Deployer {
    host: Arc<dyn Host>,
    config: DeployConfig,
    state_path: PathBuf,
    pool: Arc<rayon::ThreadPool>,
}

impl Deployer {
    pub fn new(host: Arc<dyn Host>, config: DeployConfig, state_path: PathBuf) -> Result<Self> {
        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("linkdeploy-{index}"))
            .build()
            .context("build link worker pool")?;
        debug!(workers, "link worker pool ready");
        Ok(Self {
            host,
            config,
            state_path,
            pool: Arc::new(pool),
        })
    }

    /// Enumerate the overlay without deploying anything.
    pub fn refresh(&self, cancel: Arc<AtomicBool>) -> Vec<VirtualFile> {
        VirtualTreeWalker::new(self.host.as_ref())
            .with_cancel(cancel)
            .collect()
    }

    /// Deploy a previously refreshed list of files in the background.
    pub fn begin(&self, files: Vec<VirtualFile>) -> DeployHandle {
        self.spawn(Some(files))
    }

    /// Walk the overlay and deploy it in the background.
    pub fn begin_full(&self) -> DeployHandle {
        self.spawn(None)
    }

    fn spawn(&self, files: Option<Vec<VirtualFile>>) -> DeployHandle {
        let (sender, events) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let deployer = self.clone();
        let flag = Arc::clone(&cancel);
        let thread = thread::spawn(move || deployer.run(files, flag, sender));
        DeployHandle {
            events,
            cancel,
            thread,
        }
    }

    /// Run one full cycle on the calling thread. `None` walks the overlay first.
    pub fn run(
        &self,
        files: Option<Vec<VirtualFile>>,
        cancel: Arc<AtomicBool>,
        events: Sender<DeployEvent>,
    ) -> DeploySummary {
        let started = Instant::now();
        let mode = self.config.link_mode();
        let mut summary = DeploySummary::new(mode);

        let walked = files.is_none();
        let files = match files {
            Some(files) => files,
            None => {
                emit(&events, DeployEvent::Phase(Phase::Walking));
                self.refresh(Arc::clone(&cancel))
            }
        };
        if cancel.load(Ordering::SeqCst) {
            return finish(summary, Phase::Canceled, started, &events);
        }

        emit(&events, DeployEvent::Phase(Phase::Resolving));
        let mut store = StateStore::load(&self.state_path, mode);
        // Data and game entries may be our own links showing through the overlay.
        let provided: HashSet<String> = files
            .iter()
            .filter(|file| matches!(file.category, RootCategory::Mods | RootCategory::Overwrite))
            .map(|file| file.path.clone())
            .collect();
        let mut seen = HashSet::with_capacity(files.len());
        let entries: Vec<DeploymentEntry> = files
            .into_iter()
            .filter(|file| seen.insert(file.path.clone()))
            .map(|file| self.prepare(file, &store))
            .collect();
        info!(
            entries = entries.len(),
            mode = mode.label(),
            walked,
            "deploying overlay"
        );

        emit(&events, DeployEvent::Phase(Phase::Executing));
        let results = self.execute(entries, Arc::clone(&cancel), &events);

        emit(&events, DeployEvent::Phase(Phase::Persisting));
        for (entry, action) in &results {
            summary.record(action.outcome());
            if action.outcome().is_deployed() {
                self.stage_record(&mut store, entry);
            }
        }
        let canceled = cancel.load(Ordering::SeqCst);
        if self.config.prune_stale && !canceled {
            self.prune(&mut store, &provided, &mut summary, &events);
        }
        match store.save() {
            Ok(()) => summary.state_saved = true,
            Err(err) => {
                warn!("{err}");
                emit(&events, DeployEvent::Warning(err.to_string()));
            }
        }

        let phase = if canceled { Phase::Canceled } else { Phase::Done };
        finish(summary, phase, started, &events)
    }

    fn prepare(&self, file: VirtualFile, store: &StateStore) -> DeploymentEntry {
        let mode = self.config.link_mode();
        let target = file.target_path(self.host.roots(), self.config.redirect_root_to_game_dir);
        let source = origin::resolve_source(self.host.as_ref(), &file);
        let source_fingerprint = source
            .as_ref()
            .ok()
            .and_then(|path| Fingerprint::of(path, mode).ok());
        let prior = store.get(&file.path).cloned();
        DeploymentEntry {
            file,
            source,
            target,
            prior,
            source_fingerprint,
        }
    }

    fn execute(
        &self,
        entries: Vec<DeploymentEntry>,
        cancel: Arc<AtomicBool>,
        events: &Sender<DeployEvent>,
    ) -> Vec<(DeploymentEntry, LinkAction)> {
        let linker = Linker::new(self.config.link_mode(), cancel);
        let events = events.clone();
        self.pool.install(move || {
            entries
                .into_par_iter()
                .map_with(events, |events, entry| {
                    let action = linker.plan_and_execute(&entry);
                    let report = EntryReport::new(&entry.file.path, entry.target.clone(), &action);
                    log_report(&report);
                    emit(events, DeployEvent::Entry(report));
                    (entry, action)
                })
                .collect()
        })
    }

    fn stage_record(&self, store: &mut StateStore, entry: &DeploymentEntry) {
        let mode = store.mode();
        let Ok(source) = &entry.source else {
            return;
        };
        let fingerprints = Fingerprint::of(&entry.target, mode)
            .and_then(|target| Ok((target, Fingerprint::of(source, mode)?)));
        match fingerprints {
            Ok((target_fingerprint, source_fingerprint)) => store.put(
                entry.file.path.clone(),
                DeployedRecord {
                    target: entry.target.clone(),
                    source: source.clone(),
                    target_fingerprint,
                    source_fingerprint,
                },
            ),
            Err(err) => warn!(
                path = %entry.target.display(),
                "could not fingerprint deployed file: {err}"
            ),
        }
    }

    fn prune(
        &self,
        store: &mut StateStore,
        provided: &HashSet<String>,
        summary: &mut DeploySummary,
        events: &Sender<DeployEvent>,
    ) {
        let stale: Vec<String> = store
            .keys()
            .filter(|key| !provided.contains(*key))
            .map(str::to_string)
            .collect();
        for key in stale {
            let Some(record) = store.remove(&key) else {
                continue;
            };
            if self.still_provided(&key, &record) {
                debug!(path = %key, "not part of this cycle but still provided by a mod");
                store.put(key, record);
                continue;
            }
            let action = remove_stale_link(&record, store.mode());
            if let LinkAction::Failed(_) = action {
                // Keep the record so the next cycle can try again.
                store.put(key.clone(), record.clone());
            }
            let report = EntryReport::new(&key, record.target, &action);
            log_report(&report);
            if action.outcome() == Outcome::Removed {
                summary.removed += 1;
            }
            emit(events, DeployEvent::Entry(report));
        }
    }

    /// Whether a mod still provides `virtual_path` from outside the deployment tree.
    fn still_provided(&self, virtual_path: &str, record: &DeployedRecord) -> bool {
        let file = VirtualFile::new(virtual_path, RootCategory::Mods);
        match origin::resolve_source(self.host.as_ref(), &file) {
            Ok(source) => source != record.target && !source.starts_with(&self.host.roots().data),
            Err(_) => false,
        }
    }
}

fn finish(
    mut summary: DeploySummary,
    phase: Phase,
    started: Instant,
    events: &Sender<DeployEvent>,
) -> DeploySummary {
    summary.final_phase = phase;
    summary.duration_secs = started.elapsed().as_secs_f64();
    info!(
        linked = summary.linked,
        already_deployed = summary.already_deployed,
        skipped = summary.skipped,
        failed = summary.failed,
        canceled = summary.canceled,
        removed = summary.removed,
        "deployment finished in {:.2}s",
        summary.duration_secs
    );
    emit(events, DeployEvent::Phase(phase));
    emit(events, DeployEvent::Finished(summary.clone()));
    summary
}

fn log_report(report: &EntryReport) {
    let detail = report.detail.as_deref().unwrap_or("");
    match report.outcome {
        Outcome::Failed => warn!(
            path = %report.virtual_path,
            target = %report.target_path.display(),
            "{}: {detail}",
            report.outcome.label()
        ),
        _ => debug!(path = %report.virtual_path, "{} {detail}", report.outcome.label()),
    }
}

// The receiver may be gone when nobody listens; the cycle carries on.
fn emit(events: &Sender<DeployEvent>, event: DeployEvent) {
    let _ = events.send(event);
}
