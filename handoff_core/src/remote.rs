// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Handing a presentation layer to another process.
//!
//! The consuming side (a UI process) owns the layer that ends up on screen
//! and publishes it under a [`RemoteHandle`]. The producing side passes the
//! handle to [`LayerBridge::attach_remote`](crate::bridge::LayerBridge::attach_remote),
//! which resolves it through a [`LayerHost`] and, from then on, presents into
//! the remote layer instead of its local one.
//!
//! If resolution fails the bridge keeps presenting locally. The content is
//! still produced; only the destination differs.
//!
//! [`InProcessLayerHost`] is a registry that resolves handles within one
//! process. It holds layers weakly, so a consumer that drops its layer reads
//! as disconnected.

use core::fmt;
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::bridge::PresentTarget;
use crate::device::Device;

/// Identifies a layer within one endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteLayerId(pub u32);

impl fmt::Debug for RemoteLayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteLayerId({})", self.0)
    }
}

/// Token naming a layer hosted by another process.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteHandle {
    /// Layer within the endpoint.
    pub id: RemoteLayerId,
    /// Name of the hosting process's endpoint.
    pub endpoint: String,
}

/// Why a remote layer could not be resolved.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    /// No endpoint is registered under this name.
    #[error("unknown endpoint {0:?}")]
    UnknownEndpoint(String),
    /// The endpoint does not host this layer.
    #[error("endpoint hosts no layer {0:?}")]
    UnknownLayer(RemoteLayerId),
    /// The endpoint or the layer went away.
    #[error("remote layer disconnected")]
    Disconnected,
}

/// Resolves [`RemoteHandle`]s to presentation targets.
pub trait LayerHost<D: Device>: Send + Sync {
    /// Connects to the layer named by `handle`.
    fn resolve(&self, handle: &RemoteHandle) -> Result<Box<dyn PresentTarget<D>>, HandoffError>;
}

/// A shared presentation target.
pub type SharedTarget<D> = Arc<Mutex<dyn PresentTarget<D>>>;

struct Endpoint<D: Device> {
    connected: bool,
    next_id: u32,
    layers: HashMap<RemoteLayerId, Weak<Mutex<dyn PresentTarget<D>>>>,
}

/// Resolves handles to layers registered in this process.
pub struct InProcessLayerHost<D: Device> {
    endpoints: Mutex<HashMap<String, Endpoint<D>>>,
}

impl<D: Device> fmt::Debug for InProcessLayerHost<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoints = self.endpoints.lock();
        let mut names: Vec<&str> = endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("InProcessLayerHost")
            .field("endpoints", &names)
            .finish()
    }
}

impl<D: Device> Default for InProcessLayerHost<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> InProcessLayerHost<D> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes `target` under `endpoint` and returns its handle.
    ///
    /// Registering under a disconnected endpoint reconnects it.
    pub fn register(&self, endpoint: &str, target: &SharedTarget<D>) -> RemoteHandle {
        let mut endpoints = self.endpoints.lock();
        let entry = endpoints
            .entry(endpoint.to_owned())
            .or_insert_with(|| Endpoint {
                connected: true,
                next_id: 1,
                layers: HashMap::new(),
            });
        entry.connected = true;
        let id = RemoteLayerId(entry.next_id);
        entry.next_id = entry.next_id.wrapping_add(1).max(1);
        entry.layers.insert(id, Arc::downgrade(target));
        tracing::debug!(endpoint, ?id, "registered remote layer");
        RemoteHandle {
            id,
            endpoint: endpoint.to_owned(),
        }
    }

    /// Withdraws a layer. Returns `false` if it was not registered.
    pub fn unregister(&self, handle: &RemoteHandle) -> bool {
        self.endpoints
            .lock()
            .get_mut(&handle.endpoint)
            .is_some_and(|e| e.layers.remove(&handle.id).is_some())
    }

    /// Marks an endpoint as gone; its handles stop resolving.
    pub fn disconnect(&self, endpoint: &str) {
        if let Some(e) = self.endpoints.lock().get_mut(endpoint) {
            e.connected = false;
        }
    }
}

impl<D: Device> LayerHost<D> for InProcessLayerHost<D> {
    fn resolve(&self, handle: &RemoteHandle) -> Result<Box<dyn PresentTarget<D>>, HandoffError> {
        let endpoints = self.endpoints.lock();
        let endpoint = endpoints
            .get(&handle.endpoint)
            .ok_or_else(|| HandoffError::UnknownEndpoint(handle.endpoint.clone()))?;
        if !endpoint.connected {
            return Err(HandoffError::Disconnected);
        }
        let layer = endpoint
            .layers
            .get(&handle.id)
            .ok_or(HandoffError::UnknownLayer(handle.id))?;
        let target: SharedTarget<D> = layer.upgrade().ok_or(HandoffError::Disconnected)?;
        Ok(Box::new(target))
    }
}
