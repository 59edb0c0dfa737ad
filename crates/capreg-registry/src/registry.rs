//! The plugin registry.
//!
//! [`PluginRegistry`] maps [`Type`]s to the capability that serves them.
//! A type is served either by an in-process implementation registered with
//! [`register_internal`](PluginRegistry::register_internal), or by an
//! external plugin described by a [`PluginDescriptor`] and launched on first
//! use. Internal bindings win over external ones.
//!
//! All tables live behind one mutex that is never held across an `.await`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use capreg_plugin::{CallContext, PluginDescriptor, ResourceRepository};
use capreg_types::{Scheme, Type, Typed};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::discovery;
use crate::error::{RegistryError, Result};
use crate::launcher::{PluginLauncher, StdioLauncher};
use crate::shutdown;
use crate::supervisor::{Slot, Supervisor};

/// Identity reported when a type is already bound internally.
const INTERNAL_OWNER: &str = "<internal>";

/// Tables guarded by the registry lock.
#[derive(Default)]
pub(crate) struct RegistryState {
    /// Host scheme. Types registered here are served internally.
    pub(crate) scheme: Scheme,
    /// External descriptors by type (canonical or not).
    pub(crate) external: HashMap<Type, Arc<PluginDescriptor>>,
    /// Internal implementations by canonical type and alias.
    pub(crate) internal: HashMap<Type, Arc<dyn ResourceRepository>>,
    /// Launch slots by plugin identity.
    pub(crate) constructed: HashMap<String, Slot>,
    /// Set by shutdown.
    pub(crate) closed: bool,
}

/// Registry of internal and external resource-repository capabilities.
pub struct PluginRegistry {
    state: Mutex<RegistryState>,
    supervisor: Supervisor,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PluginRegistry")
            .field("external", &state.external.len())
            .field("internal", &state.internal.len())
            .field("constructed", &state.constructed.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl PluginRegistry {
    /// Create a registry that launches plugins as stdio child processes.
    pub fn new(config: RegistryConfig) -> Self {
        let launcher = Arc::new(StdioLauncher::new(&config));
        Self::with_launcher(config, launcher)
    }

    /// Create a registry with a custom launcher.
    pub fn with_launcher(config: RegistryConfig, launcher: Arc<dyn PluginLauncher>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            supervisor: Supervisor::new(launcher, config),
        }
    }

    /// Seed the host scheme. Every type in `scheme` is treated as served
    /// internally and must be given an implementation.
    pub fn with_scheme(self, scheme: Scheme) -> Self {
        self.state.lock().scheme = scheme;
        self
    }

    /// The registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        self.supervisor.config()
    }

    /// Bind `typ` to an external plugin.
    ///
    /// Fails with [`RegistryError::DuplicateRegistration`] if another
    /// descriptor already serves `typ`; the existing binding is kept.
    pub fn add_external_descriptor(
        &self,
        descriptor: impl Into<Arc<PluginDescriptor>>,
        typ: Type,
    ) -> Result<()> {
        let descriptor = descriptor.into();
        let mut state = self.state.lock();
        if let Some(existing) = state.external.get(&typ) {
            return Err(RegistryError::DuplicateRegistration {
                typ,
                existing: existing.id.clone(),
            });
        }

        debug!(typ = %typ, plugin = %descriptor.id, "registered external plugin");
        state.external.insert(typ, descriptor);
        Ok(())
    }

    /// Bind every type `descriptor` advertises.
    ///
    /// Either every type is bound or, on the first conflict, none is.
    /// Returns the bound types.
    pub fn add_descriptor(&self, descriptor: impl Into<Arc<PluginDescriptor>>) -> Result<Vec<Type>> {
        let descriptor = descriptor.into();
        descriptor
            .validate()
            .map_err(|e| RegistryError::InvalidDescriptor(e.to_string()))?;

        let mut types: Vec<Type> = Vec::new();
        for advertised in descriptor.advertised_types() {
            if !types.contains(&advertised.typ) {
                types.push(advertised.typ.clone());
            }
        }

        let mut state = self.state.lock();
        if let Some((typ, existing)) = types
            .iter()
            .find_map(|t| state.external.get(t).map(|d| (t, d)))
        {
            return Err(RegistryError::DuplicateRegistration {
                typ: typ.clone(),
                existing: existing.id.clone(),
            });
        }

        for typ in &types {
            state.external.insert(typ.clone(), Arc::clone(&descriptor));
        }
        info!(plugin = %descriptor.id, types = types.len(), "registered plugin descriptor");
        Ok(types)
    }

    /// Register every descriptor found in the configured plugin directory.
    ///
    /// Descriptors that conflict with existing bindings are logged and
    /// skipped. Returns the number registered.
    pub fn discover_plugins(&self) -> usize {
        let dir = &self.config().plugin_dir;
        let mut registered = 0;
        for descriptor in discovery::discover(dir) {
            let id = descriptor.id.clone();
            match self.add_descriptor(descriptor) {
                Ok(_) => registered += 1,
                Err(e) => warn!(plugin = %id, error = %e, "skipping discovered plugin"),
            }
        }
        registered
    }

    /// Bind an in-process implementation to the type `scheme` registers for
    /// `prototype`, and to all of that type's aliases.
    ///
    /// The scheme entry is imported into the host scheme, so later lookups
    /// by the canonical type, an alias, or an untyped `prototype` value all
    /// resolve to `implementation`.
    pub fn register_internal(
        &self,
        scheme: &Scheme,
        implementation: Arc<dyn ResourceRepository>,
        prototype: &dyn Typed,
    ) -> Result<()> {
        let canonical = scheme.type_for_prototype(prototype)?;
        let aliases = scheme.aliases_of(&canonical);

        let mut state = self.state.lock();
        if let Some(taken) = std::iter::once(&canonical)
            .chain(&aliases)
            .find(|t| state.internal.contains_key(*t))
        {
            return Err(RegistryError::DuplicateRegistration {
                typ: taken.clone(),
                existing: INTERNAL_OWNER.to_string(),
            });
        }

        state.scheme.import_type(scheme, &canonical)?;
        for typ in std::iter::once(&canonical).chain(&aliases) {
            state.internal.insert(typ.clone(), Arc::clone(&implementation));
        }
        debug!(typ = %canonical, aliases = aliases.len(), "registered internal implementation");
        Ok(())
    }

    /// Resolve the capability serving `spec`.
    ///
    /// Internal implementations are returned directly. External plugins are
    /// launched on first use, bounded by `ctx`, and reused afterwards.
    pub async fn get_capability(
        &self,
        ctx: &CallContext,
        spec: &dyn Typed,
    ) -> Result<Arc<dyn ResourceRepository>> {
        let (typ, descriptor) = {
            let state = self.state.lock();
            let typ = state.scheme.default_type(spec)?;

            if state.scheme.is_registered(&typ) {
                return state
                    .internal
                    .get(&typ)
                    .cloned()
                    .ok_or(RegistryError::MissingInternalImplementation(typ));
            }

            match state.external.get(&typ) {
                Some(descriptor) => (typ, Arc::clone(descriptor)),
                None => return Err(RegistryError::NotRegistered(typ)),
            }
        };

        debug!(typ = %typ, plugin = %descriptor.id, "resolving external plugin");
        let plugin = self
            .supervisor
            .acquire(&self.state, ctx, &descriptor)
            .await?;
        let repository: Arc<dyn ResourceRepository> = plugin.repository().clone();
        Ok(repository)
    }

    /// Ask every live plugin process to exit.
    ///
    /// Each process is signalled at most once, every process is attempted,
    /// and nothing is awaited. Failures are aggregated into
    /// [`RegistryError::ShutdownSignal`]. Afterwards external lookups fail
    /// with [`RegistryError::Closed`]; internal ones keep working. Plugin
    /// log forwarding ends once the termination grace period (if any)
    /// has elapsed.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;

        let live: Vec<_> = state
            .constructed
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect();
        let errors = shutdown::signal_all(&live, self.supervisor.termination_grace());
        self.supervisor.stop_log_forwarding();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::ShutdownSignal(errors))
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Snapshot of the host scheme.
    pub fn scheme(&self) -> Scheme {
        self.state.lock().scheme.clone()
    }

    /// Every bound type, internal and external, sorted.
    pub fn registered_types(&self) -> Vec<Type> {
        let state = self.state.lock();
        let types: BTreeSet<&Type> = state.internal.keys().chain(state.external.keys()).collect();
        types.into_iter().cloned().collect()
    }

    /// Identities of plugins with a running process, sorted.
    pub fn live_plugins(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .constructed
            .iter()
            .filter(|(_, slot)| slot.get().is_some_and(|p| !p.has_exited()))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StartupCause;
    use crate::launcher::{StartedPlugin, await_handshake};
    use crate::process::PluginProcess;
    use crate::transport::StdioTransport;
    use async_trait::async_trait;
    use capreg_plugin::{
        Blob, LaunchSpec, MemoryRepository, PluginError, PluginServer, RESOURCE_REPOSITORY,
        ResourceRef,
    };
    use capreg_types::Raw;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::BufReader;

    // -- Fakes --

    #[derive(Default)]
    struct FakeProcess {
        terminations: AtomicUsize,
        kills: AtomicUsize,
        exited: AtomicBool,
        fail_termination: bool,
    }

    impl PluginProcess for FakeProcess {
        fn id(&self) -> Option<u32> {
            None
        }

        fn request_termination(&self) -> std::io::Result<()> {
            self.terminations.fetch_add(1, Ordering::SeqCst);
            if self.fail_termination {
                return Err(std::io::Error::other("operation not permitted"));
            }
            Ok(())
        }

        fn has_exited(&self) -> bool {
            self.exited.load(Ordering::SeqCst)
        }

        fn kill(&self) -> std::io::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.exited.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Launches in-memory plugins served over duplex pipes.
    #[derive(Default)]
    struct FakeLauncher {
        launches: AtomicUsize,
        launched_ids: parking_lot::Mutex<Vec<String>>,
        processes: parking_lot::Mutex<Vec<(String, Arc<FakeProcess>)>>,
        delay: Duration,
        broken: HashSet<String>,
        unsignallable: HashSet<String>,
    }

    impl FakeLauncher {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }

        fn process(&self, id: &str) -> Arc<FakeProcess> {
            self.processes
                .lock()
                .iter()
                .rev()
                .find(|(p, _)| p == id)
                .map(|(_, proc)| Arc::clone(proc))
                .expect("plugin was never launched")
        }
    }

    #[async_trait]
    impl PluginLauncher for FakeLauncher {
        async fn launch(
            &self,
            ctx: &CallContext,
            descriptor: &PluginDescriptor,
        ) -> Result<StartedPlugin> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.launched_ids.lock().push(descriptor.id.clone());

            if self.broken.contains(&descriptor.id) {
                return Err(RegistryError::StartupFailure {
                    plugin: descriptor.id.clone(),
                    cause: StartupCause::Spawn(std::io::Error::other("no such file")),
                });
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let (host_out, plugin_in) = tokio::io::duplex(64 * 1024);
            let (plugin_out, host_in) = tokio::io::duplex(64 * 1024);
            tokio::spawn(async move {
                let server = PluginServer::new(Arc::new(MemoryRepository::new()));
                let _ = server.run(BufReader::new(plugin_in), plugin_out).await;
            });

            let mut reader = BufReader::new(host_in);
            let announcement =
                await_handshake(&descriptor.id, ctx, &mut reader, Duration::from_secs(5)).await?;

            let process = Arc::new(FakeProcess {
                fail_termination: self.unsignallable.contains(&descriptor.id),
                ..FakeProcess::default()
            });
            self.processes
                .lock()
                .push((descriptor.id.clone(), Arc::clone(&process)));

            Ok(StartedPlugin {
                transport: Arc::new(StdioTransport::new(
                    host_out,
                    reader,
                    Duration::from_secs(5),
                )),
                address: announcement.address,
                process,
                diagnostics: None,
            })
        }
    }

    // -- Helpers --

    struct OciImage;

    impl Typed for OciImage {
        fn typ(&self) -> Option<Type> {
            None
        }
    }

    fn registry(launcher: &Arc<FakeLauncher>) -> PluginRegistry {
        PluginRegistry::with_launcher(RegistryConfig::default(), launcher.clone())
    }

    fn registry_with(config: RegistryConfig, launcher: &Arc<FakeLauncher>) -> PluginRegistry {
        PluginRegistry::with_launcher(config, launcher.clone())
    }

    fn descriptor(id: &str, typ: &Type) -> PluginDescriptor {
        PluginDescriptor::new(id, LaunchSpec::new(format!("/opt/plugins/{id}")))
            .with_type(RESOURCE_REPOSITORY, typ.clone(), None)
    }

    fn spec(typ: &Type) -> Raw {
        Raw::new(typ.clone())
    }

    fn helm() -> Type {
        Type::new("Helm", "v1")
    }

    // -- Registration --

    #[tokio::test]
    async fn duplicate_registration_keeps_original() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);

        reg.add_external_descriptor(descriptor("first", &helm()), helm())
            .unwrap();
        let err = reg
            .add_external_descriptor(descriptor("second", &helm()), helm())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "plugin for type Helm/v1 already registered with id first"
        );

        reg.get_capability(&CallContext::new(), &spec(&helm()))
            .await
            .unwrap();
        assert_eq!(*launcher.launched_ids.lock(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn add_descriptor_is_all_or_nothing() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        let maven = Type::new("Maven", "v1");

        reg.add_external_descriptor(descriptor("maven", &maven), maven.clone())
            .unwrap();

        let multi = descriptor("multi", &helm()).with_type(RESOURCE_REPOSITORY, maven.clone(), None);
        let err = reg.add_descriptor(multi).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRegistration { ref existing, .. } if existing == "maven"));
        assert_eq!(reg.registered_types(), vec![maven.clone()]);

        let bound = reg.add_descriptor(descriptor("helm", &helm())).unwrap();
        assert_eq!(bound, vec![helm()]);
        assert_eq!(reg.registered_types(), vec![helm(), maven]);
    }

    #[test]
    fn add_descriptor_validates() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        let empty = PluginDescriptor::new("empty", LaunchSpec::new("/bin/true"));
        assert!(matches!(
            reg.add_descriptor(empty),
            Err(RegistryError::InvalidDescriptor(_))
        ));
    }

    #[tokio::test]
    async fn internal_aliases_share_one_implementation() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);

        let canonical = Type::new("OCIImage", "v1");
        let a1 = Type::new("ociImage", "v1");
        let a2 = Type::new("ociArtifact", "v1");
        let mut scheme = Scheme::new();
        scheme
            .register::<OciImage>(canonical.clone(), [a1.clone(), a2.clone()])
            .unwrap();

        let implementation: Arc<dyn ResourceRepository> = Arc::new(MemoryRepository::new());
        reg.register_internal(&scheme, implementation.clone(), &OciImage)
            .unwrap();

        let ctx = CallContext::new();
        for typ in [&canonical, &a1, &a2] {
            let got = reg.get_capability(&ctx, &spec(typ)).await.unwrap();
            assert!(Arc::ptr_eq(&got, &implementation), "{typ} resolved elsewhere");
        }
        let untyped = reg.get_capability(&ctx, &OciImage).await.unwrap();
        assert!(Arc::ptr_eq(&untyped, &implementation));

        assert_eq!(launcher.launches(), 0);
        assert!(reg.scheme().is_registered(&a2));
    }

    #[test]
    fn internal_registration_conflict_changes_nothing() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);

        let mut scheme = Scheme::new();
        scheme
            .register::<OciImage>(Type::new("OCIImage", "v1"), [])
            .unwrap();
        reg.register_internal(&scheme, Arc::new(MemoryRepository::new()), &OciImage)
            .unwrap();

        let err = reg
            .register_internal(&scheme, Arc::new(MemoryRepository::new()), &OciImage)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRegistration { .. }));
        assert_eq!(reg.registered_types().len(), 1);
    }

    #[test]
    fn unknown_prototype_is_scheme_error() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        let err = reg
            .register_internal(&Scheme::new(), Arc::new(MemoryRepository::new()), &OciImage)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Scheme(_)));
    }

    #[tokio::test]
    async fn scheme_type_without_implementation_is_reported() {
        let launcher = Arc::new(FakeLauncher::default());
        let mut scheme = Scheme::new();
        scheme
            .register::<OciImage>(Type::new("OCIImage", "v1"), [])
            .unwrap();
        let reg = registry(&launcher).with_scheme(scheme);

        let err = reg
            .get_capability(&CallContext::new(), &OciImage)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingInternalImplementation(t) if t == Type::new("OCIImage", "v1")));
    }

    #[tokio::test]
    async fn internal_wins_over_external() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        let canonical = Type::new("OCIImage", "v1");

        reg.add_external_descriptor(descriptor("oci", &canonical), canonical.clone())
            .unwrap();
        let mut scheme = Scheme::new();
        scheme.register::<OciImage>(canonical.clone(), []).unwrap();
        let implementation: Arc<dyn ResourceRepository> = Arc::new(MemoryRepository::new());
        reg.register_internal(&scheme, implementation.clone(), &OciImage)
            .unwrap();

        let got = reg
            .get_capability(&CallContext::new(), &spec(&canonical))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&got, &implementation));
        assert_eq!(launcher.launches(), 0);
    }

    #[test]
    fn discover_plugins_registers_valid_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = serde_json::to_string(&descriptor("helm", &helm())).unwrap();
        std::fs::write(dir.path().join("helm.json"), &manifest).unwrap();
        std::fs::write(dir.path().join("helm-copy.json"), &manifest).unwrap();

        let launcher = Arc::new(FakeLauncher::default());
        let config = RegistryConfig {
            plugin_dir: dir.path().to_path_buf(),
            ..RegistryConfig::default()
        };
        let reg = registry_with(config, &launcher);

        assert_eq!(reg.discover_plugins(), 1);
        assert_eq!(reg.registered_types(), vec![helm()]);
    }

    // -- Lookup and launch --

    #[tokio::test]
    async fn unbound_type_launches_nothing() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();

        let other = Type::new("Npm", "v1");
        let err = reg
            .get_capability(&CallContext::new(), &spec(&other))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotRegistered(t) if t == other));
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn concurrent_acquisitions_launch_once() {
        let launcher = Arc::new(FakeLauncher::with_delay(Duration::from_millis(50)));
        let reg = Arc::new(registry(&launcher));
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let reg = Arc::clone(&reg);
            tasks.push(tokio::spawn(async move {
                reg.get_capability(&CallContext::new(), &spec(&helm())).await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(launcher.launches(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(reg.live_plugins(), vec!["helm".to_string()]);
    }

    #[tokio::test]
    async fn handles_share_one_process() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();
        let ctx = CallContext::new();

        let first = reg.get_capability(&ctx, &spec(&helm())).await.unwrap();
        let second = reg.get_capability(&ctx, &spec(&helm())).await.unwrap();

        let resource = ResourceRef::new("chart", "1.2.3");
        let pushed = first
            .push(&ctx, &resource, Blob::new("application/x-tar", b"chart-bytes".to_vec()))
            .await
            .unwrap();
        let (blob, descriptor) = second.fetch(&ctx, &resource).await.unwrap();

        assert_eq!(blob.data, b"chart-bytes");
        assert_eq!(descriptor, pushed);
        assert_eq!(launcher.launches(), 1);

        let err = second
            .fetch(&ctx, &ResourceRef::new("chart", "9.9.9"))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));
    }

    #[tokio::test]
    async fn one_descriptor_under_several_types_is_one_process() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        let chart = Type::new("HelmChart", "v1");
        let d = descriptor("helm", &helm()).with_type(RESOURCE_REPOSITORY, chart.clone(), None);
        reg.add_descriptor(d).unwrap();

        let ctx = CallContext::new();
        let a = reg.get_capability(&ctx, &spec(&helm())).await.unwrap();
        let b = reg.get_capability(&ctx, &spec(&chart)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn failed_launch_can_be_retried() {
        let launcher = Arc::new(FakeLauncher {
            broken: HashSet::from(["helm".to_string()]),
            ..FakeLauncher::default()
        });
        let reg = registry(&launcher);
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();

        for attempt in 1..=2 {
            let err = reg
                .get_capability(&CallContext::new(), &spec(&helm()))
                .await
                .unwrap_err();
            assert!(matches!(err, RegistryError::StartupFailure { .. }));
            assert_eq!(launcher.launches(), attempt);
        }
        assert!(reg.live_plugins().is_empty());
    }

    #[tokio::test]
    async fn cancelled_acquisition_leaves_slot_empty() {
        let launcher = Arc::new(FakeLauncher::with_delay(Duration::from_millis(200)));
        let reg = registry(&launcher);
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();

        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = reg.get_capability(&ctx, &spec(&helm())).await.unwrap_err();
        assert!(matches!(err, RegistryError::Cancelled { plugin } if plugin == "helm"));
        assert!(reg.live_plugins().is_empty());

        reg.get_capability(&CallContext::new(), &spec(&helm()))
            .await
            .unwrap();
        assert_eq!(launcher.launches(), 2);
    }

    #[tokio::test]
    async fn deadline_during_launch_is_never_ready() {
        let launcher = Arc::new(FakeLauncher::with_delay(Duration::from_millis(200)));
        let reg = registry(&launcher);
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();

        let ctx = CallContext::new().with_timeout(Duration::from_millis(20));
        let err = reg.get_capability(&ctx, &spec(&helm())).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::StartupFailure {
                cause: StartupCause::NeverReady(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn exited_plugin_is_relaunched() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();
        let ctx = CallContext::new();

        reg.get_capability(&ctx, &spec(&helm())).await.unwrap();
        launcher.process("helm").exited.store(true, Ordering::SeqCst);
        assert!(reg.live_plugins().is_empty());

        reg.get_capability(&ctx, &spec(&helm())).await.unwrap();
        assert_eq!(launcher.launches(), 2);
        assert_eq!(reg.live_plugins(), vec!["helm".to_string()]);
    }

    #[tokio::test]
    async fn exited_plugin_is_kept_when_relaunch_disabled() {
        let launcher = Arc::new(FakeLauncher::default());
        let config = RegistryConfig {
            relaunch_exited: false,
            ..RegistryConfig::default()
        };
        let reg = registry_with(config, &launcher);
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();
        let ctx = CallContext::new();

        reg.get_capability(&ctx, &spec(&helm())).await.unwrap();
        launcher.process("helm").exited.store(true, Ordering::SeqCst);
        reg.get_capability(&ctx, &spec(&helm())).await.unwrap();
        assert_eq!(launcher.launches(), 1);
    }

    // -- Shutdown --

    async fn launch_all(reg: &PluginRegistry, ids: &[&str]) {
        for id in ids {
            let typ = Type::new(*id, "v1");
            reg.add_external_descriptor(descriptor(id, &typ), typ.clone())
                .unwrap();
            reg.get_capability(&CallContext::new(), &spec(&typ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn shutdown_signals_each_process_once() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        launch_all(&reg, &["x", "y", "z"]).await;

        reg.shutdown().unwrap();
        reg.shutdown().unwrap();

        for id in ["x", "y", "z"] {
            let process = launcher.process(id);
            assert_eq!(process.terminations.load(Ordering::SeqCst), 1, "{id}");
            assert_eq!(process.kills.load(Ordering::SeqCst), 0, "{id}");
        }
    }

    #[tokio::test]
    async fn shutdown_failure_does_not_stop_the_others() {
        let launcher = Arc::new(FakeLauncher {
            unsignallable: HashSet::from(["x".to_string()]),
            ..FakeLauncher::default()
        });
        let reg = registry(&launcher);
        launch_all(&reg, &["x", "y", "z"]).await;

        match reg.shutdown().unwrap_err() {
            RegistryError::ShutdownSignal(errors) => {
                assert_eq!(errors.plugins(), vec!["x"]);
            }
            other => panic!("expected shutdown signal error, got {other:?}"),
        }
        for id in ["x", "y", "z"] {
            assert_eq!(launcher.process(id).terminations.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn shutdown_closes_external_lookups_only() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();
        let mut scheme = Scheme::new();
        scheme
            .register::<OciImage>(Type::new("OCIImage", "v1"), [])
            .unwrap();
        reg.register_internal(&scheme, Arc::new(MemoryRepository::new()), &OciImage)
            .unwrap();

        reg.shutdown().unwrap();
        assert!(reg.is_closed());

        let err = reg
            .get_capability(&CallContext::new(), &spec(&helm()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Closed));
        assert_eq!(launcher.launches(), 0);

        reg.get_capability(&CallContext::new(), &OciImage)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn launch_completing_after_shutdown_is_signalled() {
        let launcher = Arc::new(FakeLauncher::with_delay(Duration::from_millis(100)));
        let reg = Arc::new(registry(&launcher));
        reg.add_external_descriptor(descriptor("helm", &helm()), helm())
            .unwrap();

        let pending = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.get_capability(&CallContext::new(), &spec(&helm())).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        reg.shutdown().unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, RegistryError::Closed));
        assert_eq!(launcher.process("helm").terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn grace_period_kills_lingering_plugins() {
        let launcher = Arc::new(FakeLauncher::default());
        let config = RegistryConfig {
            termination_grace_secs: Some(0),
            ..RegistryConfig::default()
        };
        let reg = registry_with(config, &launcher);
        launch_all(&reg, &["x"]).await;

        reg.shutdown().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let process = launcher.process("x");
        assert_eq!(process.terminations.load(Ordering::SeqCst), 1);
        assert_eq!(process.kills.load(Ordering::SeqCst), 1);
        assert!(!reg.supervisor.is_forwarding_logs());
    }

    #[tokio::test]
    async fn shutdown_stops_log_forwarding() {
        let launcher = Arc::new(FakeLauncher::default());
        let reg = registry(&launcher);
        launch_all(&reg, &["x"]).await;
        assert!(reg.supervisor.is_forwarding_logs());

        reg.shutdown().unwrap();
        assert!(!reg.supervisor.is_forwarding_logs());
    }

    #[tokio::test]
    async fn log_forwarding_outlives_shutdown_during_grace() {
        let launcher = Arc::new(FakeLauncher::default());
        let config = RegistryConfig {
            termination_grace_secs: Some(60),
            ..RegistryConfig::default()
        };
        let reg = registry_with(config, &launcher);
        launch_all(&reg, &["x"]).await;

        reg.shutdown().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(reg.supervisor.is_forwarding_logs());
        assert_eq!(launcher.process("x").kills.load(Ordering::SeqCst), 0);
    }
}
