//! Broadcast session
//!
//! A [`Broadcaster`] owns the set of advertisements it has registered with
//! an [`AdvertisingTransport`]. Each advertisement moves from unregistered
//! to registered on [`Broadcaster::broadcast`] and back on
//! [`Broadcaster::stop_broadcast`] or when the transport releases it.
//!
//! # Cancellation
//!
//! Dropping a `broadcast` future before it completes leaves nothing
//! exported and nothing active. Dropping a `stop_broadcast` future still
//! unexports the advertisement and removes it from the active set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::advertisement::{BroadcastAdvertisement, ReleaseHook};
use crate::error::SessionError;
use crate::transport::{AdvertisingTransport, RegisterOptions, TransportError};

#[derive(Default)]
struct Registry {
    active: HashMap<String, BroadcastAdvertisement>,
    /// Paths whose registration is in flight
    pending: HashSet<String>,
}

/// Manages outgoing advertisements for one local name
pub struct Broadcaster {
    name: String,
    transport: Arc<dyn AdvertisingTransport>,
    registry: Arc<Mutex<Registry>>,
    register_options: RegisterOptions,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn AdvertisingTransport>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport,
            registry: Arc::new(Mutex::new(Registry::default())),
            register_options: RegisterOptions::new(),
        }
    }

    /// Options passed to the transport on every registration
    pub fn with_register_options(mut self, options: RegisterOptions) -> Self {
        self.register_options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Common prefix of all advertisement paths owned by this broadcaster
    pub fn path_namespace(&self) -> String {
        format!("/org/bluez/{}", self.name)
    }

    /// New advertisement on `channel` carrying this broadcaster's name
    pub fn create_advertisement(&self, channel: u8) -> BroadcastAdvertisement {
        BroadcastAdvertisement::new(self.name.clone(), channel)
    }

    /// Export and register `adv`
    ///
    /// Fails with [`SessionError::AlreadyRegistered`] while `adv` is active.
    /// Transport errors are returned unchanged and leave `adv` inactive.
    pub async fn broadcast(&self, adv: &BroadcastAdvertisement) -> Result<(), SessionError> {
        if adv.local_name() != self.name {
            return Err(SessionError::NameMismatch {
                expected: self.name.clone(),
                actual: adv.local_name().to_string(),
            });
        }

        let path = adv.path().to_string();
        {
            let mut registry = self.registry.lock();
            if registry.active.contains_key(&path) || registry.pending.contains(&path) {
                return Err(SessionError::AlreadyRegistered(path));
            }
            registry.pending.insert(path.clone());
        }

        let mut guard = RegistrationGuard {
            transport: self.transport.as_ref(),
            registry: &self.registry,
            adv,
            exported: false,
            armed: true,
        };

        self.transport.export(adv)?;
        guard.exported = true;

        adv.set_release_hook(release_hook(&self.registry, &self.transport));
        self.transport
            .register_advertisement(adv, &self.register_options)
            .await?;
        guard.armed = false;

        let activated = {
            let mut registry = self.registry.lock();
            if registry.pending.remove(&path) {
                registry.active.insert(path.clone(), adv.clone());
                true
            } else {
                false
            }
        };
        if activated {
            info!("Broadcasting {}", adv);
            return Ok(());
        }

        // Stopped or released before registration returned
        debug!("Advertisement {} ended during registration", path);
        adv.clear_release_hook();
        match self.transport.unregister_advertisement(&path).await {
            Ok(()) | Err(TransportError::NotFound) => {}
            Err(e) => warn!("Failed to unregister {}: {}", path, e),
        }
        self.transport.unexport(&path);
        Ok(())
    }

    /// Stop broadcasting `adv`
    pub async fn stop_broadcast(&self, adv: &BroadcastAdvertisement) -> Result<(), SessionError> {
        self.stop_path(adv.path()).await
    }

    /// Stop broadcasting the advertisement at `path`
    ///
    /// A transport reporting that the advertisement does not exist is not an
    /// error. The advertisement is unexported and removed from the active set
    /// whatever the outcome. Stopping an advertisement whose registration is
    /// still in flight leaves it inactive once that registration returns.
    pub async fn stop_path(&self, path: &str) -> Result<(), SessionError> {
        unregister(&self.transport, &self.registry, path).await
    }

    /// Stop all active advertisements concurrently
    ///
    /// Every advertisement is stopped even if some fail. The first failure is
    /// returned. Unregistration runs on spawned tasks and completes even if
    /// this future is dropped.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let paths: Vec<String> = self.registry.lock().active.keys().cloned().collect();

        let tasks: Vec<_> = paths
            .into_iter()
            .map(|path| {
                let transport = self.transport.clone();
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    let result = unregister(&transport, &registry, &path).await;
                    (path, result)
                })
            })
            .collect();

        let mut first_error = None;
        for joined in join_all(tasks).await {
            let err = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((path, Err(e))) => {
                    warn!("Failed to stop broadcast {}: {}", path, e);
                    e
                }
                Err(e) => {
                    warn!("Stop task failed: {}", e);
                    SessionError::TaskFailed(e.to_string())
                }
            };
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Whether `adv` is active, or with `None` whether anything is
    pub fn is_broadcasting(&self, adv: Option<&BroadcastAdvertisement>) -> bool {
        let registry = self.registry.lock();
        match adv {
            Some(adv) => registry.active.contains_key(adv.path()),
            None => !registry.active.is_empty(),
        }
    }

    /// Active advertisements
    pub fn advertisements(&self) -> Vec<BroadcastAdvertisement> {
        self.registry.lock().active.values().cloned().collect()
    }

    /// Number of advertising instances in use and supported by the transport
    pub async fn instances(&self) -> Result<(u8, u8), SessionError> {
        let active = self.transport.active_instances().await?;
        let supported = self.transport.supported_instances().await?;
        Ok((active, supported))
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        let paths: Vec<String> = self.registry.lock().active.keys().cloned().collect();
        if paths.is_empty() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "Broadcaster {} dropped outside a runtime with {} active advertisements",
                self.name,
                paths.len()
            );
            return;
        };

        debug!(
            "Broadcaster {} dropped, unregistering {} advertisements",
            self.name,
            paths.len()
        );
        for path in paths {
            let transport = self.transport.clone();
            let registry = self.registry.clone();
            handle.spawn(async move {
                if let Err(e) = unregister(&transport, &registry, &path).await {
                    warn!("Failed to stop broadcast {}: {}", path, e);
                }
            });
        }
    }
}

async fn unregister(
    transport: &Arc<dyn AdvertisingTransport>,
    registry: &Arc<Mutex<Registry>>,
    path: &str,
) -> Result<(), SessionError> {
    let _cleanup = StopGuard {
        transport: transport.as_ref(),
        registry,
        path,
    };
    if registry.lock().pending.remove(path) {
        debug!("Stopping {} while its registration is in flight", path);
    }

    match transport.unregister_advertisement(path).await {
        Ok(()) => {
            debug!("Stopped broadcast {}", path);
            Ok(())
        }
        Err(TransportError::NotFound) => {
            debug!("Advertisement {} does not exist", path);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Session bookkeeping for a transport-initiated release
fn release_hook(
    registry: &Arc<Mutex<Registry>>,
    transport: &Arc<dyn AdvertisingTransport>,
) -> ReleaseHook {
    let registry = Arc::downgrade(registry);
    let transport = Arc::downgrade(transport);

    Box::new(move |path: &str| {
        if let Some(registry) = registry.upgrade() {
            let removed = {
                let mut registry = registry.lock();
                registry.pending.remove(path);
                registry.active.remove(path)
            };
            drop(removed);
        }
        if let Some(transport) = transport.upgrade() {
            transport.unexport(path);
        }
    })
}

/// Undoes a registration that did not complete
struct RegistrationGuard<'a> {
    transport: &'a dyn AdvertisingTransport,
    registry: &'a Mutex<Registry>,
    adv: &'a BroadcastAdvertisement,
    exported: bool,
    armed: bool,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.adv.clear_release_hook();
        self.registry.lock().pending.remove(self.adv.path());
        if self.exported {
            self.transport.unexport(self.adv.path());
        }
    }
}

/// Unexports and deactivates an advertisement when a stop finishes or is dropped
struct StopGuard<'a> {
    transport: &'a dyn AdvertisingTransport,
    registry: &'a Mutex<Registry>,
    path: &'a str,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        let removed = self.registry.lock().active.remove(self.path);
        if let Some(adv) = removed {
            adv.clear_release_hook();
        }
        self.transport.unexport(self.path);
    }
}
