//! Name-indexed store of discovered handler modules.
//!
//! Modules are declared at compile time via [`crate::register_module!`] and
//! collected through inventory at startup; there is no runtime reflection or
//! directory walking. The canonical-name convention mirrors the on-disk
//! layout the declarations describe: the source path relative to the
//! discovery root, with the kind suffix and file extension stripped and a
//! leading slash enforced (`v1/UserController.rs` → `/v1/User`).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::contracts::{HandlerModule, ModuleKind};

/// A startup-time module declaration submitted via `inventory::submit!`.
pub struct ModuleRegistration {
    /// Source path relative to the kind's discovery root, e.g.
    /// `"v1/UserController.rs"`.
    pub source: &'static str,
    pub kind: ModuleKind,
    pub construct: fn(&ModuleContext) -> Arc<dyn HandlerModule>,
}

inventory::collect!(ModuleRegistration);

/// Declare a handler module for startup-time discovery.
#[macro_export]
macro_rules! register_module {
    (kind = $kind:ident, source = $source:literal, $construct:expr) => {
        $crate::inventory::submit! {
            $crate::registry::ModuleRegistration {
                source: $source,
                kind: $crate::contracts::ModuleKind::$kind,
                construct: $construct,
            }
        }
    };
}

/// View of the modules constructed so far, handed to every module's
/// constructor.
///
/// Construction runs in dependency order (models, services, interceptors,
/// controllers), so a controller's constructor can resolve the service
/// instances it needs here instead of reaching for ambient globals. This is
/// not the registry: the full registry is only observable after discovery
/// completes.
pub struct ModuleContext<'a> {
    modules: &'a BTreeMap<ModuleKind, BTreeMap<String, ModuleEntry>>,
}

impl ModuleContext<'_> {
    pub fn get(&self, kind: ModuleKind, name: &str) -> Option<Arc<dyn HandlerModule>> {
        Some(self.modules.get(&kind)?.get(name)?.instance.clone())
    }

    /// Resolve an already-constructed service module by canonical name and
    /// concrete type.
    pub fn service<T: HandlerModule>(&self, name: &str) -> Option<Arc<T>> {
        self.get(ModuleKind::Service, name)?
            .as_any_arc()
            .downcast::<T>()
            .ok()
    }
}

/// Derive the canonical registry name for a source path of the given kind.
///
/// Returns `None` when the file name does not carry the kind suffix directly
/// before its extension; such sources are never loaded.
pub fn canonical_name(source: &str, kind: ModuleKind) -> Option<String> {
    let path = source.trim_start_matches(['/', '.']).replace('\\', "/");
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => ("", path.as_str()),
    };
    let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);
    let base = stem.strip_suffix(kind.suffix())?;

    let mut name = String::with_capacity(dir.len() + base.len() + 2);
    name.push('/');
    if !dir.is_empty() {
        name.push_str(dir);
        name.push('/');
    }
    name.push_str(base);
    Some(name)
}

/// A registered module and the metadata it was discovered with.
pub struct ModuleEntry {
    pub name: String,
    pub kind: ModuleKind,
    pub source: &'static str,
    pub instance: Arc<dyn HandlerModule>,
    pub initialized: bool,
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("initialized", &self.initialized)
            .finish()
    }
}

/// Mutable builder fed by discovery; never observable mid-scan. The built
/// [`ModuleRegistry`] is immutable for the process lifetime.
#[derive(Default)]
pub struct RegistryBuilder {
    modules: BTreeMap<ModuleKind, BTreeMap<String, ModuleEntry>>,
}

impl RegistryBuilder {
    /// Register one module declaration, constructing the instance only when
    /// the source qualifies under the kind's suffix convention.
    ///
    /// A failing init hook aborts registration of this module alone. A name
    /// collision within a kind is resolved last-write-wins, with a warning.
    pub fn register(
        &mut self,
        source: &'static str,
        kind: ModuleKind,
        construct: impl FnOnce(&ModuleContext) -> Arc<dyn HandlerModule>,
    ) {
        let Some(name) = canonical_name(source, kind) else {
            tracing::debug!(source, kind = %kind, "source does not match the suffix convention, not loaded");
            return;
        };

        let instance = construct(&ModuleContext {
            modules: &self.modules,
        });
        let mut initialized = false;
        if let Some(hook) = instance.as_initializable() {
            if let Err(error) = hook.init() {
                tracing::warn!(
                    module = %name,
                    kind = %kind,
                    source,
                    error = format!("{error:#}"),
                    "module init hook failed, module not registered"
                );
                return;
            }
            initialized = true;
        }

        let entry = ModuleEntry {
            name: name.clone(),
            kind,
            source,
            instance,
            initialized,
        };
        if let Some(previous) = self.modules.entry(kind).or_default().insert(name.clone(), entry) {
            tracing::warn!(
                module = %name,
                kind = %kind,
                previous = previous.source,
                replacement = source,
                "canonical name collision, later registration wins"
            );
        } else {
            tracing::info!(module = %name, kind = %kind, source, "module registered");
        }
    }

    pub fn build(self) -> ModuleRegistry {
        ModuleRegistry {
            modules: self.modules,
        }
    }
}

/// The immutable, name-indexed module store consulted by the route binder.
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleKind, BTreeMap<String, ModuleEntry>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("ModuleRegistry");
        for kind in ModuleKind::ALL {
            let names: Vec<&str> = self.of_kind(kind).map(|e| e.name.as_str()).collect();
            dbg.field(kind.suffix(), &names);
        }
        dbg.finish()
    }
}

impl ModuleRegistry {
    /// Discover all modules declared via [`crate::register_module!`].
    ///
    /// Declarations are processed in construction-phase order (models,
    /// services, interceptors, controllers) and sorted source-path order
    /// within a phase, so collision resolution does not depend on link
    /// order and repeated discovery over an unchanged set produces an
    /// identical registry.
    pub fn discover_and_build() -> Self {
        let mut declarations: Vec<&ModuleRegistration> =
            inventory::iter::<ModuleRegistration>.into_iter().collect();
        declarations.sort_by_key(|r| (r.kind.construction_phase(), r.source));

        let mut builder = RegistryBuilder::default();
        for declaration in declarations {
            builder.register(declaration.source, declaration.kind, declaration.construct);
        }
        builder.build()
    }

    pub fn get(&self, kind: ModuleKind, name: &str) -> Option<&ModuleEntry> {
        self.modules.get(&kind)?.get(name)
    }

    /// Entries of one kind, in canonical-name order.
    pub fn of_kind(&self, kind: ModuleKind) -> impl Iterator<Item = &ModuleEntry> {
        self.modules.get(&kind).into_iter().flat_map(|m| m.values())
    }

    pub fn len(&self) -> usize {
        self.modules.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Initializable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Plain;
    impl HandlerModule for Plain {
        fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
    }

    static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct WithInit {
        fail: bool,
    }
    impl Initializable for WithInit {
        fn init(&self) -> anyhow::Result<()> {
            INIT_CALLS.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("refusing to come up");
            }
            Ok(())
        }
    }
    impl HandlerModule for WithInit {
        fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
        fn as_initializable(&self) -> Option<&dyn Initializable> {
            Some(self)
        }
    }

    #[test]
    fn canonical_name_strips_suffix_and_extension() {
        assert_eq!(
            canonical_name("v1/UserController.rs", ModuleKind::Controller).as_deref(),
            Some("/v1/User")
        );
        assert_eq!(
            canonical_name("UserController.rs", ModuleKind::Controller).as_deref(),
            Some("/User")
        );
        assert_eq!(
            canonical_name("auth/SessionService.rs", ModuleKind::Service).as_deref(),
            Some("/auth/Session")
        );
    }

    #[test]
    fn sources_without_suffix_are_never_loaded() {
        assert_eq!(canonical_name("Helpers.rs", ModuleKind::Controller), None);
        // Suffix must sit directly before the extension.
        assert_eq!(
            canonical_name("ControllerUtils.rs", ModuleKind::Controller),
            None
        );

        let mut b = RegistryBuilder::default();
        b.register("Helpers.rs", ModuleKind::Controller, |_| Arc::new(Plain));
        assert!(b.build().is_empty());
    }

    #[test]
    fn distinct_paths_yield_distinct_names() {
        let a = canonical_name("v1/UserController.rs", ModuleKind::Controller);
        let b = canonical_name("v2/UserController.rs", ModuleKind::Controller);
        assert_ne!(a, b);
    }

    #[test]
    fn same_name_across_kinds_does_not_collide() {
        // Scenario A: UserController and UserService both end up as /User,
        // in their own kinds.
        let mut b = RegistryBuilder::default();
        b.register("UserController.rs", ModuleKind::Controller, |_| {
            Arc::new(Plain)
        });
        b.register("UserService.rs", ModuleKind::Service, |_| Arc::new(Plain));
        let registry = b.build();

        assert_eq!(registry.len(), 2);
        assert!(registry.get(ModuleKind::Controller, "/User").is_some());
        assert!(registry.get(ModuleKind::Service, "/User").is_some());
    }

    #[test]
    fn later_registration_overwrites_earlier_entry() {
        let mut b = RegistryBuilder::default();
        b.register("UserController.rs", ModuleKind::Controller, |_| {
            Arc::new(Plain)
        });
        b.register("UserController.go", ModuleKind::Controller, |_| {
            Arc::new(WithInit { fail: false })
        });
        let registry = b.build();

        assert_eq!(registry.len(), 1);
        let entry = registry.get(ModuleKind::Controller, "/User").unwrap();
        assert_eq!(entry.source, "UserController.go");
        assert!(entry.initialized);
    }

    #[test]
    fn failing_init_hook_skips_only_that_module() {
        let mut b = RegistryBuilder::default();
        b.register("BrokenController.rs", ModuleKind::Controller, |_| {
            Arc::new(WithInit { fail: true })
        });
        b.register("HealthyController.rs", ModuleKind::Controller, |_| {
            Arc::new(WithInit { fail: false })
        });
        let registry = b.build();

        assert!(registry.get(ModuleKind::Controller, "/Broken").is_none());
        let healthy = registry.get(ModuleKind::Controller, "/Healthy").unwrap();
        assert!(healthy.initialized);
        assert!(INIT_CALLS.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn constructors_resolve_services_from_the_context() {
        let mut b = RegistryBuilder::default();
        b.register("AuditService.rs", ModuleKind::Service, |_| Arc::new(Plain));

        let mut resolved: Option<Arc<Plain>> = None;
        b.register("AuditController.rs", ModuleKind::Controller, |ctx| {
            resolved = ctx.service::<Plain>("/Audit");
            Arc::new(Plain)
        });

        let registry = b.build();
        let resolved = resolved.expect("service visible during controller construction");
        let entry = registry.get(ModuleKind::Service, "/Audit").unwrap();
        let shared = entry
            .instance
            .clone()
            .as_any_arc()
            .downcast::<Plain>()
            .unwrap();
        // The constructor saw the registered instance, not a copy.
        assert!(Arc::ptr_eq(&resolved, &shared));
    }

    #[test]
    fn modules_without_hook_register_uninitialized() {
        let mut b = RegistryBuilder::default();
        b.register("PlainController.rs", ModuleKind::Controller, |_| {
            Arc::new(Plain)
        });
        let registry = b.build();
        assert!(!registry.get(ModuleKind::Controller, "/Plain").unwrap().initialized);
    }
}
