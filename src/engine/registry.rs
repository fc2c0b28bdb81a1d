//! EngineRegistry: location -> descriptor cache with at-most-once discovery.
//!
//! Lookups of already-resolved locations only take the map's read lock.
//! First-time discovery runs under a per-location mutex, so concurrent
//! callers for the same location wait for a single discovery and share its
//! result, error included, while other locations proceed in parallel.
//! Failures are not cached: a call that starts after a failed discovery has
//! finished runs a fresh one, and the failed slot is dropped from the map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};
use once_cell::sync::OnceCell;

use crate::config::HostConfig;
use crate::engine::binding::{
    ManagedBinding, ModuleCatalog, NativeBinding, NativeEntryPoints, Probe, ProcessBinding,
    ProcessOptions,
};
use crate::engine::descriptor::{BindingKind, EngineDescriptor};
use crate::error::EngineError;

#[derive(Default)]
struct Slot {
    resolved: OnceCell<Arc<EngineDescriptor>>,
    /// Completed failed discoveries on this slot.
    failures: AtomicU64,
    /// Error of the most recent failed discovery, handed to callers that were
    /// already waiting when it finished.
    last_error: Mutex<Option<EngineError>>,
}

/// Process-local engine cache. Construct one per host and share it.
pub struct EngineRegistry {
    catalog: ModuleCatalog,
    linked_natives: RwLock<HashMap<String, NativeEntryPoints>>,
    process_options: ProcessOptions,
    entries: RwLock<HashMap<String, Arc<Slot>>>,
    discoveries: AtomicUsize,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::with_process_options(ProcessOptions::default())
    }

    pub fn with_process_options(process_options: ProcessOptions) -> Self {
        Self {
            catalog: ModuleCatalog::new(),
            linked_natives: RwLock::new(HashMap::new()),
            process_options,
            entries: RwLock::new(HashMap::new()),
            discoveries: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::with_process_options(config.process.to_options())
    }

    /// Managed modules visible to discovery.
    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Make native entry points already present in this process (statically
    /// linked or resolved by the host) discoverable under `location`.
    pub fn link_native(
        &self,
        location: impl Into<String>,
        entry: NativeEntryPoints,
    ) -> Result<(), EngineError> {
        let mut natives = self
            .linked_natives
            .write()
            .map_err(|_| EngineError::LockPoisoned {
                component: "linked_natives".to_string(),
            })?;
        natives.insert(location.into(), entry);
        Ok(())
    }

    /// Resolve `location` to its descriptor, discovering it on first use.
    pub fn resolve(&self, location: &str) -> Result<Arc<EngineDescriptor>, EngineError> {
        self.resolve_tracked(location).map(|(descriptor, _)| descriptor)
    }

    /// Like [`resolve`](Self::resolve), also reporting whether this call ran
    /// the discovery.
    pub(crate) fn resolve_tracked(
        &self,
        location: &str,
    ) -> Result<(Arc<EngineDescriptor>, bool), EngineError> {
        let slot = self.slot(location)?;
        if let Some(descriptor) = slot.resolved.get() {
            return Ok((Arc::clone(descriptor), false));
        }

        let seen = slot.failures.load(Ordering::SeqCst);
        let mut last_error = slot.last_error.lock().map_err(|_| EngineError::LockPoisoned {
            component: "registry".to_string(),
        })?;
        if let Some(descriptor) = slot.resolved.get() {
            return Ok((Arc::clone(descriptor), false));
        }
        if slot.failures.load(Ordering::SeqCst) != seen {
            if let Some(err) = last_error.as_ref() {
                debug!("[Registry] Sharing failed discovery of {}", location);
                return Err(err.clone());
            }
        }

        match self.discover(location) {
            Ok(descriptor) => {
                let descriptor = Arc::new(descriptor);
                // Only the mutex holder initializes the cell.
                let _ = slot.resolved.set(Arc::clone(&descriptor));
                *last_error = None;
                Ok((descriptor, true))
            }
            Err(err) => {
                *last_error = Some(err.clone());
                slot.failures.fetch_add(1, Ordering::SeqCst);
                drop(last_error);
                self.forget_failed(location, &slot)?;
                Err(err)
            }
        }
    }

    /// Drop the cached descriptor for `location`, e.g. after its file changed.
    pub fn evict(&self, location: &str) -> Result<bool, EngineError> {
        let mut entries = self.write_entries()?;
        let evicted = entries
            .remove(location)
            .map(|slot| slot.resolved.get().is_some())
            .unwrap_or(false);
        if evicted {
            info!("[Registry] Evicted {}", location);
        }
        Ok(evicted)
    }

    pub fn clear(&self) -> Result<(), EngineError> {
        self.write_entries()?.clear();
        Ok(())
    }

    /// Number of resolved locations.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries
                    .values()
                    .filter(|slot| slot.resolved.get().is_some())
                    .count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many discovery probes have run, successful or not.
    pub fn discovery_count(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    /// Number of locations holding a slot, resolved or mid-discovery.
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    fn slot(&self, location: &str) -> Result<Arc<Slot>, EngineError> {
        {
            let entries = self.entries.read().map_err(|_| EngineError::LockPoisoned {
                component: "registry".to_string(),
            })?;
            if let Some(slot) = entries.get(location) {
                return Ok(Arc::clone(slot));
            }
        }
        let mut entries = self.write_entries()?;
        Ok(Arc::clone(entries.entry(location.to_string()).or_default()))
    }

    fn write_entries(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Slot>>>, EngineError> {
        self.entries.write().map_err(|_| EngineError::LockPoisoned {
            component: "registry".to_string(),
        })
    }

    /// Remove `slot` from the map if it is still the entry for `location` and
    /// never resolved.
    fn forget_failed(&self, location: &str, slot: &Arc<Slot>) -> Result<(), EngineError> {
        let mut entries = self.write_entries()?;
        let stale = entries
            .get(location)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.resolved.get().is_none());
        if stale {
            entries.remove(location);
        }
        Ok(())
    }

    fn discover(&self, location: &str) -> Result<EngineDescriptor, EngineError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        let mut rejected = Vec::new();

        for kind in BindingKind::PROBE_ORDER {
            match self.probe(kind, location)? {
                Probe::Bound(binding) => {
                    let info = binding.describe()?;
                    info!(
                        "[Registry] Bound {} as {} engine ({})",
                        location, kind, info
                    );
                    return Ok(EngineDescriptor::new(location, info, binding));
                }
                Probe::Unrecognized(reason) => {
                    debug!("[Registry] {} probe rejected {}: {}", kind, location, reason);
                    rejected.push(format!("{}: {}", kind, reason));
                }
            }
        }

        warn!(
            "[Registry] No binding recognizes {} ({})",
            location,
            rejected.join("; ")
        );
        Err(EngineError::EngineNotFound {
            location: location.to_string(),
        })
    }

    fn probe(&self, kind: BindingKind, location: &str) -> Result<Probe, EngineError> {
        let probe = match kind {
            BindingKind::Managed => match self.catalog.get(location)? {
                Some(module) => ManagedBinding::probe(location, &module),
                None => Probe::Unrecognized("no managed module loaded".to_string()),
            },
            BindingKind::Native => {
                let linked = self
                    .linked_natives
                    .read()
                    .map_err(|_| EngineError::LockPoisoned {
                        component: "linked_natives".to_string(),
                    })?
                    .get(location)
                    .copied();
                match linked {
                    Some(entry) => {
                        Probe::Bound(Box::new(NativeBinding::from_entry_points(location, entry)))
                    }
                    None => NativeBinding::probe(location),
                }
            }
            BindingKind::Process => ProcessBinding::probe(location, &self.process_options),
        };
        Ok(probe)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
