//! Host-side table of live streams, keyed by [`StreamId`].

use std::sync::{Arc, PoisonError, RwLock};

use hashbrown::HashMap;

use crate::bridge::{FrameBridge, FrameDisposition};
use crate::error::BridgeError;
use crate::executor::ScriptExecutor;
use crate::geometry::{FlipMode, FrameParams};
use crate::ids::{StreamId, StreamIdAllocator};
use crate::sink::Controller;

/// Creates, looks up and tears down bridges that share one executor.
///
/// Lookups hand out `Arc<FrameBridge>` clones, so a producer still holding a
/// bridge keeps it usable after [`destroy`](Self::destroy); the stream is
/// released once the last clone drops.
pub struct BridgeRegistry {
    ids: Arc<StreamIdAllocator>,
    executor: Arc<dyn ScriptExecutor>,
    bridges: RwLock<HashMap<StreamId, Arc<FrameBridge>>>,
}

impl BridgeRegistry {
    pub fn new(ids: Arc<StreamIdAllocator>, executor: Arc<dyn ScriptExecutor>) -> Self {
        Self {
            ids,
            executor,
            bridges: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self) -> Result<Arc<FrameBridge>, BridgeError> {
        let bridge = Arc::new(FrameBridge::new(&self.ids, Arc::clone(&self.executor))?);
        self.bridges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bridge.id(), Arc::clone(&bridge));
        Ok(bridge)
    }

    pub fn get(&self, id: StreamId) -> Option<Arc<FrameBridge>> {
        self.bridges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Remove a stream. Returns `false` if it was not registered.
    pub fn destroy(&self, id: StreamId) -> bool {
        self.bridges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn bind_controller(
        &self,
        id: StreamId,
        controller: Controller,
    ) -> Result<Option<Controller>, BridgeError> {
        let bridge = self.get(id).ok_or(BridgeError::UnknownStream(id))?;
        Ok(bridge.bind_controller(controller))
    }

    /// Route a frame to stream `id`. The registry lock is released before delivery.
    pub fn update_frame_buffer(
        &self,
        id: StreamId,
        frame: &[u8],
        params: FrameParams,
        flip_mode: FlipMode,
    ) -> Result<FrameDisposition, BridgeError> {
        let bridge = self.get(id).ok_or(BridgeError::UnknownStream(id))?;
        Ok(bridge.update_frame_buffer(frame, params, flip_mode))
    }

    /// Registered ids in ascending order.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .bridges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.bridges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every stream.
    pub fn clear(&self) {
        self.bridges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
