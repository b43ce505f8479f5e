use super::outcome::OperationOutcome;
use super::request::{OperationRequest, PlannedPlugin};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event_log::{EventLog, OperationEvent};
use crate::registry::{
    resolve_all, InstalledPlugin, LocalPluginHost, PluginCatalog, PluginHost, StaticCatalog,
};
use crate::state::{
    ChangedPlugins, FailedPlugins, OperationMode, OperationState, OperationStatus, ReasonCode,
    StateStore, ToolReport, VersionMap,
};
use crate::tool::{
    ignore_client_abort, CacheInvalidator, CommandCacheInvalidator, OperationLog,
    ProcessRunner, RunOptions, ToolExit, ToolInvocation, ToolOutcome, ToolRunner,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::Location;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

type Installed = BTreeMap<String, InstalledPlugin>;

/// An error together with the step of the operation it surfaced at.
#[derive(Debug)]
struct Failure {
    error: Error,
    location: &'static Location<'static>,
}

impl From<Error> for Failure {
    #[track_caller]
    fn from(error: Error) -> Self {
        Self {
            error,
            location: Location::caller(),
        }
    }
}

/// Drives plugin operations end to end: resolution, cache clearing, the
/// dependency tool run, and the persisted operation state.
pub struct Orchestrator {
    project_root: PathBuf,
    state_file: PathBuf,
    log_dir: PathBuf,
    interactive: bool,
    time_limit: Duration,
    catalog: Arc<dyn PluginCatalog>,
    runner: Arc<dyn ToolRunner>,
    cache: Arc<dyn CacheInvalidator>,
    host: Arc<dyn PluginHost>,
    events: EventLog,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        catalog: Arc<dyn PluginCatalog>,
        runner: Arc<dyn ToolRunner>,
        cache: Arc<dyn CacheInvalidator>,
        host: Arc<dyn PluginHost>,
    ) -> Self {
        debug!("Creating new orchestrator");
        Self {
            project_root: config.project_root.clone(),
            state_file: config.state_file.clone(),
            log_dir: config.log_dir.clone(),
            interactive: config.interactive,
            time_limit: config.time_limit(),
            catalog,
            runner,
            cache,
            host,
            events: EventLog::new(),
        }
    }

    /// Wire the process-backed collaborators described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let catalog = StaticCatalog::load(&config.catalog).await?;
        let report_dir = config
            .state_file
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| config.project_root.clone());
        let runner = ProcessRunner::from_config(&config.tool, report_dir);
        let cache = CommandCacheInvalidator::from_config(&config.cache, &config.project_root);
        let host = LocalPluginHost::new(&config.plugins_dir, &config.activation_file);
        Ok(Self::new(
            config,
            Arc::new(catalog),
            Arc::new(runner),
            Arc::new(cache),
            Arc::new(host),
        ))
    }

    /// Switch between attached and detached execution.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Install or update every target as one batch.
    pub async fn install_or_update<S: AsRef<str>>(&self, targets: &[S]) -> Result<OperationOutcome> {
        let request = OperationRequest::parse(OperationMode::InstallOrUpdate, targets)?;
        self.execute(request).await
    }

    /// Remove installed plugins as one batch.
    pub async fn remove<S: AsRef<str>>(&self, plugin_ids: &[S]) -> Result<OperationOutcome> {
        let request = OperationRequest::parse(OperationMode::Remove, plugin_ids)?;
        self.execute(request).await
    }

    /// Plan the request and run it. Planning failures leave the state
    /// document untouched.
    pub async fn execute(&self, request: OperationRequest) -> Result<OperationOutcome> {
        let plugins = self.plan(&request).await?;
        self.run_batch(request.mode, plugins).await
    }

    /// Activate an installed plugin. Returns `false` when it already was.
    pub async fn activate_plugin(&self, plugin_id: &str) -> Result<bool> {
        self.host.refresh().await?;
        if self.host.is_activated(plugin_id) {
            debug!(plugin_id = %plugin_id, "Plugin already activated");
            return Ok(false);
        }
        self.host.activate(plugin_id).await?;
        self.events.append(OperationEvent::Activated {
            plugin_id: plugin_id.to_string(),
        });
        Ok(true)
    }

    /// Run the post-install update step of an activated plugin.
    pub async fn update_plugin(&self, plugin_id: &str) -> Result<()> {
        self.host.refresh().await?;
        self.host.update(plugin_id).await?;
        self.events.append(OperationEvent::Updated {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    /// Activate newly installed plugins and update the activated ones the
    /// tool upgraded. Failed outcomes are left alone.
    pub async fn apply_changes(&self, outcome: &OperationOutcome) -> Result<()> {
        if !outcome.succeeded() {
            return Ok(());
        }
        for plugin_id in outcome.changed().installed.keys() {
            self.activate_plugin(plugin_id).await?;
        }
        for plugin_id in outcome.changed().updated.keys() {
            if self.host.is_activated(plugin_id) {
                self.update_plugin(plugin_id).await?;
            } else {
                debug!(plugin_id = %plugin_id, "Skipping update of inactive plugin");
            }
        }
        Ok(())
    }

    /// The last persisted operation state.
    pub async fn status(&self) -> Result<OperationState> {
        Ok(StateStore::open(&self.state_file).await?.operation())
    }

    fn run_options(&self) -> RunOptions {
        if self.interactive {
            RunOptions::interactive()
        } else {
            RunOptions::detached(self.time_limit)
        }
    }

    async fn plan(&self, request: &OperationRequest) -> Result<Vec<PlannedPlugin>> {
        match request.mode {
            OperationMode::Remove => {
                self.host.refresh().await?;
                let installed = self.host.installed();
                request
                    .targets
                    .iter()
                    .map(|target| {
                        installed
                            .get(&target.id)
                            .map(|plugin| PlannedPlugin {
                                id: plugin.id().to_string(),
                                package: plugin.manifest.name.clone(),
                                version: plugin.version().to_string(),
                            })
                            .ok_or_else(|| Error::NotInstalled(target.id.clone()))
                    })
                    .collect()
            }
            _ => {
                let descriptors = resolve_all(self.catalog.as_ref(), &request.targets).await?;
                Ok(descriptors
                    .into_iter()
                    .map(|descriptor| PlannedPlugin {
                        id: descriptor.id,
                        package: descriptor.name,
                        version: descriptor.resolved_version,
                    })
                    .collect())
            }
        }
    }

    async fn run_batch(
        &self,
        mode: OperationMode,
        plugins: Vec<PlannedPlugin>,
    ) -> Result<OperationOutcome> {
        let started_at = Utc::now();
        let log = OperationLog::for_start(&self.log_dir, started_at);
        let options = self.run_options();
        let expires_at = options
            .time_limit
            .and_then(|limit| chrono::Duration::from_std(limit).ok())
            .and_then(|limit| started_at.checked_add_signed(limit));
        let requested: VersionMap = plugins
            .iter()
            .map(|plugin| (plugin.id.clone(), plugin.version.clone()))
            .collect();

        let state = OperationState::start(
            mode,
            log.path().to_path_buf(),
            started_at,
            expires_at,
            requested,
        );
        let operation_id = state.id.unwrap_or_else(Uuid::new_v4);

        // Hangups are ignored before the document says running.
        if !self.interactive {
            ignore_client_abort();
        }

        let mut store = StateStore::open(&self.state_file).await?;
        store.set_operation(&state)?;
        store.write().await?;

        self.events.append(OperationEvent::Started {
            operation_id,
            mode,
            plugins: plugins.iter().map(|plugin| plugin.id.clone()).collect(),
        });

        match self
            .drive(operation_id, mode, &plugins, options, &log, &mut store)
            .await
        {
            Ok(state) => {
                self.events.append(OperationEvent::Completed {
                    operation_id,
                    status: state.status,
                });
                Ok(OperationOutcome::new(state))
            }
            Err(Failure { error: err, location }) => {
                log.record_failure(&err, location, Utc::now()).await;
                self.abort(&mut store, &err).await;
                self.events.append(OperationEvent::Aborted {
                    operation_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        operation_id: Uuid,
        mode: OperationMode,
        plugins: &[PlannedPlugin],
        options: RunOptions,
        log: &OperationLog,
        store: &mut StateStore,
    ) -> std::result::Result<OperationState, Failure> {
        // Cache clear and tool run share the one time limit.
        let started = Instant::now();
        let exit_code = self.cache.clear(options, log).await?;
        self.events.append(OperationEvent::CacheCleared {
            operation_id,
            exit_code,
        });
        if exit_code != 0 {
            return Err(Failure::from(Error::CacheClearFailed(exit_code)));
        }

        self.host.refresh().await?;
        let before = self.host.installed();

        let packages: Vec<String> = plugins.iter().map(|plugin| plugin.package.clone()).collect();
        self.events.append(OperationEvent::ToolStarted {
            operation_id,
            packages: packages.clone(),
        });
        let invocation = ToolInvocation::update(self.project_root.clone(), packages);
        let outcome = self
            .runner
            .run(&invocation, options.remaining(started), log)
            .await?;
        self.events.append(OperationEvent::ToolFinished {
            operation_id,
            exit: outcome.exit,
        });

        self.host.refresh().await?;
        let after = self.host.installed();

        // Plugin-side hooks may have written to the document during the run.
        store.load().await?;
        let mut state = store.operation();
        if state.id != Some(operation_id) {
            warn!(operation_id = %operation_id, "State document was replaced during the run");
        }
        reconcile(&mut state, mode, plugins, &before, &after, outcome);

        state.finish(state.status, Utc::now());
        store.set_operation(&state)?;
        store.write().await?;
        info!(
            operation_id = %operation_id,
            installed = state.changed.installed.len(),
            updated = state.changed.updated.len(),
            uninstalled = state.changed.uninstalled.len(),
            "Operation finished: {}", state.status
        );
        Ok(state)
    }

    /// Best effort: mark the operation failed so it does not read as running.
    async fn abort(&self, store: &mut StateStore, err: &Error) {
        if let Err(e) = store.load().await {
            warn!("Failed to reload state document: {}", e);
        }
        let mut state = store.operation();
        state.reason = Some(err.to_string());
        state.finish(OperationStatus::Failed, Utc::now());
        let written = match store.set_operation(&state) {
            Ok(()) => store.write().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("Failed to record aborted operation: {}", e);
        }
    }
}

/// Fold the tool outcome and the before/after snapshot into `state` and
/// decide the terminal status.
fn reconcile(
    state: &mut OperationState,
    mode: OperationMode,
    plugins: &[PlannedPlugin],
    before: &Installed,
    after: &Installed,
    outcome: ToolOutcome,
) {
    // Hooks write through the same document and may use package names too.
    let ids = PackageIds::new(plugins);
    state.changed = ids.changed(std::mem::take(&mut state.changed));
    state.failed = ids.failed(std::mem::take(&mut state.failed));

    state.changed.merge(&diff_installed(before, after));
    state.merge_report(&ids.report(outcome.report));

    let requested: BTreeSet<&str> = plugins.iter().map(|plugin| plugin.id.as_str()).collect();
    state.failed.retain(|plugin_id| {
        let keep = requested.contains(plugin_id);
        if !keep {
            warn!(plugin_id = %plugin_id, "Ignoring failure for a plugin outside the batch");
        }
        keep
    });

    if outcome.exit.success() && state.failed.is_empty() {
        state.status = OperationStatus::Succeeded;
        return;
    }

    state.status = OperationStatus::Failed;
    if outcome.exit.success() {
        state.reason = Some("one or more plugins failed".to_string());
        return;
    }

    state.reason = Some(format!("dependency tool {}", outcome.exit));
    let code = failure_code(outcome.exit);
    let unaccounted: Vec<&PlannedPlugin> = plugins
        .iter()
        .filter(|plugin| !state.failed.contains(&plugin.id) && !state.changed.contains(&plugin.id))
        .collect();
    let blamed = if unaccounted.is_empty() && state.failed.is_empty() {
        plugins.iter().collect()
    } else {
        unaccounted
    };
    for plugin in blamed {
        let failures = failure_bucket(&mut state.failed, mode, before.contains_key(&plugin.id));
        failures.insert(plugin.id.clone(), code.clone());
    }
}

fn failure_code(exit: ToolExit) -> ReasonCode {
    match exit {
        ToolExit::TimedOut(_) => ReasonCode::Timeout,
        ToolExit::Exited(code) => ReasonCode::Unknown(format!("exit:{}", code)),
        ToolExit::Signaled => ReasonCode::Unknown("signal".to_string()),
    }
}

fn failure_bucket(
    failed: &mut FailedPlugins,
    mode: OperationMode,
    was_installed: bool,
) -> &mut BTreeMap<String, ReasonCode> {
    match mode {
        OperationMode::Install => &mut failed.install,
        OperationMode::Update => &mut failed.update,
        OperationMode::Remove => &mut failed.uninstall,
        OperationMode::InstallOrUpdate if was_installed => &mut failed.update,
        OperationMode::InstallOrUpdate => &mut failed.install,
    }
}

fn diff_installed(before: &Installed, after: &Installed) -> ChangedPlugins {
    let mut changed = ChangedPlugins::default();
    for (plugin_id, plugin) in after {
        match before.get(plugin_id) {
            None => {
                changed
                    .installed
                    .insert(plugin_id.clone(), plugin.version().to_string());
            }
            Some(previous) if previous.version() != plugin.version() => {
                changed
                    .updated
                    .insert(plugin_id.clone(), plugin.version().to_string());
            }
            Some(_) => {}
        }
    }
    for (plugin_id, plugin) in before {
        if !after.contains_key(plugin_id) {
            changed
                .uninstalled
                .insert(plugin_id.clone(), plugin.version().to_string());
        }
    }
    changed
}

/// Maps the batch's package names back to plugin ids. Tool reports and hook
/// writes may key entries either way.
struct PackageIds<'a>(BTreeMap<&'a str, &'a str>);

impl<'a> PackageIds<'a> {
    fn new(plugins: &'a [PlannedPlugin]) -> Self {
        Self(
            plugins
                .iter()
                .map(|plugin| (plugin.package.as_str(), plugin.id.as_str()))
                .collect(),
        )
    }

    fn rekey<V>(&self, map: BTreeMap<String, V>) -> BTreeMap<String, V> {
        map.into_iter()
            .map(|(key, value)| match self.0.get(key.as_str()) {
                Some(id) => (id.to_string(), value),
                None => (key, value),
            })
            .collect()
    }

    fn changed(&self, changed: ChangedPlugins) -> ChangedPlugins {
        ChangedPlugins {
            installed: self.rekey(changed.installed),
            updated: self.rekey(changed.updated),
            uninstalled: self.rekey(changed.uninstalled),
        }
    }

    fn failed(&self, failed: FailedPlugins) -> FailedPlugins {
        FailedPlugins {
            install: self.rekey(failed.install),
            update: self.rekey(failed.update),
            uninstall: self.rekey(failed.uninstall),
        }
    }

    fn report(&self, report: ToolReport) -> ToolReport {
        ToolReport {
            changed: self.changed(report.changed),
            failed: self.failed(report.failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginManifest;

    fn planned(id: &str, version: &str) -> PlannedPlugin {
        PlannedPlugin {
            id: id.into(),
            package: format!("xpressengine-plugin/{}", id),
            version: version.into(),
        }
    }

    fn installed(entries: &[(&str, &str)]) -> Installed {
        entries
            .iter()
            .map(|(id, version)| {
                let manifest =
                    PluginManifest::new(*id, format!("xpressengine-plugin/{}", id), *version);
                (
                    id.to_string(),
                    InstalledPlugin {
                        manifest,
                        path: PathBuf::from(id),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_diff_installed() {
        let before = installed(&[("board", "1.0.0"), ("page", "1.0.0"), ("old", "0.1.0")]);
        let after = installed(&[("board", "1.1.0"), ("page", "1.0.0"), ("news", "2.0.0")]);
        let changed = diff_installed(&before, &after);
        assert_eq!(changed.installed["news"], "2.0.0");
        assert_eq!(changed.updated["board"], "1.1.0");
        assert_eq!(changed.uninstalled["old"], "0.1.0");
        assert!(!changed.contains("page"));
    }

    #[test]
    fn test_package_keys_map_to_plugin_ids() {
        let mut report = ToolReport::default();
        report
            .changed
            .installed
            .insert("xpressengine-plugin/board".into(), "1.0.0".into());
        report
            .failed
            .install
            .insert("page".into(), ReasonCode::PaymentRequired);

        let plugins = [planned("board", "1.0.0"), planned("page", "1.0.0")];
        let report = PackageIds::new(&plugins).report(report);
        assert_eq!(report.changed.installed["board"], "1.0.0");
        assert_eq!(report.failed.install["page"], ReasonCode::PaymentRequired);
    }

    #[test]
    fn test_reconcile_rekeys_hook_written_entries() {
        let plugins = [planned("board", "1.0.0")];
        let empty = Installed::new();
        let mut state = OperationState::default();
        state
            .failed
            .install
            .insert("xpressengine-plugin/board".into(), ReasonCode::PaymentRequired);

        reconcile(
            &mut state,
            OperationMode::Install,
            &plugins,
            &empty,
            &empty,
            ToolOutcome::new(ToolExit::Exited(1), ToolReport::default()),
        );

        assert_eq!(state.failed.install["board"], ReasonCode::PaymentRequired);
        assert!(!state.failed.install.contains_key("xpressengine-plugin/board"));
        assert_eq!(state.status, OperationStatus::Failed);
    }

    #[test]
    fn test_reconcile_attributes_failed_run() {
        let plugins = [planned("board", "1.1.0"), planned("page", "1.0.0")];
        let before = installed(&[("board", "1.0.0")]);
        let mut state = OperationState::default();

        reconcile(
            &mut state,
            OperationMode::InstallOrUpdate,
            &plugins,
            &before,
            &before,
            ToolOutcome::new(ToolExit::Exited(2), ToolReport::default()),
        );

        assert_eq!(state.status, OperationStatus::Failed);
        assert_eq!(state.failed.update["board"], ReasonCode::Unknown("exit:2".into()));
        assert_eq!(state.failed.install["page"], ReasonCode::Unknown("exit:2".into()));
        assert_eq!(state.reason.as_deref(), Some("dependency tool exit code 2"));
    }

    #[test]
    fn test_reconcile_drops_foreign_failures() {
        let plugins = [planned("board", "1.0.0")];
        let empty = Installed::new();
        let mut report = ToolReport::default();
        report
            .failed
            .install
            .insert("stranger".into(), ReasonCode::Forbidden);
        let mut state = OperationState::default();

        reconcile(
            &mut state,
            OperationMode::Install,
            &plugins,
            &empty,
            &installed(&[("board", "1.0.0")]),
            ToolOutcome::new(ToolExit::Exited(0), report),
        );

        assert_eq!(state.status, OperationStatus::Succeeded);
        assert!(state.failed.is_empty());
        assert_eq!(state.changed.installed["board"], "1.0.0");
    }

    #[test]
    fn test_reconcile_blames_batch_when_everything_changed() {
        let plugins = [planned("board", "1.0.0")];
        let mut state = OperationState::default();

        reconcile(
            &mut state,
            OperationMode::Remove,
            &plugins,
            &installed(&[("board", "1.0.0")]),
            &Installed::new(),
            ToolOutcome::new(ToolExit::Signaled, ToolReport::default()),
        );

        assert_eq!(state.status, OperationStatus::Failed);
        assert_eq!(state.changed.uninstalled["board"], "1.0.0");
        assert_eq!(
            state.failed.uninstall["board"],
            ReasonCode::Unknown("signal".into())
        );
    }
}
