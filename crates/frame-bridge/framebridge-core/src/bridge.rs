//! The per-stream frame bridge.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
    Weak,
};

use crate::diagnostics::{BridgeStats, StatsSnapshot};
use crate::error::{BridgeError, ExecutorError};
use crate::executor::{panic_message, ScriptExecutor, ScriptTask};
use crate::geometry::{FlipMode, FrameGeometry, FrameParams};
use crate::ids::{StreamId, StreamIdAllocator};
use crate::sink::Controller;

/// What happened to a frame handed to [`FrameBridge::update_frame_buffer`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameDisposition {
    /// Geometry updated; no controller bound, so no script call was made.
    Unbound,
    /// Geometry updated and a controller call was queued on the executor.
    Posted,
    /// Geometry updated but the executor refused the call (full or shut down).
    Rejected,
}

/// State shared with queued deliveries. Tasks only hold a [`Weak`] to it, so
/// a destroyed bridge's queued frames are discarded rather than delivered.
struct StreamState {
    geometry: RwLock<FrameGeometry>,
    controller: RwLock<Option<Controller>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bridges one video stream from a native producer to a script-side controller.
///
/// Producers may call [`update_frame_buffer`](Self::update_frame_buffer) from
/// any thread. Geometry is updated in place under a lock. The controller call
/// is posted to the [`ScriptExecutor`] with an owned copy of the pixels, in
/// the same order the frames were accepted.
pub struct FrameBridge {
    id: StreamId,
    state: Arc<StreamState>,
    stats: Arc<BridgeStats>,
    executor: Arc<dyn ScriptExecutor>,
    // Held across "update geometry + post" so concurrent producers of the
    // same stream enqueue in the order their geometry became visible.
    post_order: Mutex<()>,
}

impl FrameBridge {
    /// Create a bridge with the next id from `ids`.
    ///
    /// Fails if `executor` has already shut down.
    pub fn new(
        ids: &StreamIdAllocator,
        executor: Arc<dyn ScriptExecutor>,
    ) -> Result<Self, BridgeError> {
        if !executor.is_running() {
            return Err(ExecutorError::Closed.into());
        }
        let id = ids.alloc();
        log::debug!("stream {id}: bridge created");
        Ok(Self {
            id,
            state: Arc::new(StreamState {
                geometry: RwLock::new(FrameGeometry::default()),
                controller: RwLock::new(None),
            }),
            stats: Arc::new(BridgeStats::new()),
            executor,
            post_order: Mutex::new(()),
        })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Geometry of the last accepted frame, read as one consistent tuple.
    pub fn geometry(&self) -> FrameGeometry {
        *read(&self.state.geometry)
    }

    pub fn width(&self) -> u32 {
        self.geometry().width
    }

    pub fn height(&self) -> u32 {
        self.geometry().height
    }

    pub fn rotation_degrees(&self) -> u32 {
        self.geometry().rotation_degrees
    }

    pub fn flip_mode(&self) -> FlipMode {
        self.geometry().flip_mode
    }

    pub fn is_bound(&self) -> bool {
        read(&self.state.controller).is_some()
    }

    /// Bind `controller`, returning the one it replaces.
    ///
    /// The method is not checked here; the controller resolves it per frame.
    pub fn bind_controller(&self, controller: Controller) -> Option<Controller> {
        let previous = write(&self.state.controller).replace(controller);
        if previous.is_some() {
            log::debug!("stream {}: controller rebound", self.id);
        } else {
            log::debug!("stream {}: controller bound", self.id);
        }
        previous
    }

    /// Detach the controller. Frames still queued for it are discarded.
    pub fn unbind_controller(&self) -> Option<Controller> {
        let previous = write(&self.state.controller).take();
        if previous.is_some() {
            log::debug!("stream {}: controller unbound", self.id);
        }
        previous
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The live counters. Queued deliveries keep updating them after the
    /// bridge itself is dropped.
    pub fn stats_handle(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    pub fn executor(&self) -> &Arc<dyn ScriptExecutor> {
        &self.executor
    }

    /// Accept one frame from the producer.
    ///
    /// `frame` only needs to stay valid for the duration of this call. Never
    /// fails: outcomes of the script call are recorded in [`stats`](Self::stats).
    pub fn update_frame_buffer(
        &self,
        frame: &[u8],
        params: FrameParams,
        flip_mode: FlipMode,
    ) -> FrameDisposition {
        BridgeStats::bump(&self.stats.frames_received);

        let disposition = {
            let order = self.acquire_post_order();
            *write(&self.state.geometry) = FrameGeometry::from_frame(params, flip_mode);

            if !self.is_bound() {
                BridgeStats::bump(&self.stats.frames_unbound);
                return FrameDisposition::Unbound;
            }
            if order.is_none() {
                BridgeStats::bump(&self.stats.frames_rejected);
                log::warn!(
                    "stream {}: frame from the script thread rejected while a producer waits on the queue",
                    self.id
                );
                return FrameDisposition::Rejected;
            }

            let task = delivery_task(
                self.id,
                Arc::downgrade(&self.state),
                Arc::clone(&self.stats),
                frame.to_vec(),
            );
            match self.executor.post(task) {
                Ok(()) => {
                    BridgeStats::bump(&self.stats.frames_posted);
                    FrameDisposition::Posted
                }
                Err(err) => {
                    BridgeStats::bump(&self.stats.frames_rejected);
                    log::warn!("stream {}: frame rejected: {err}", self.id);
                    FrameDisposition::Rejected
                }
            }
        };

        self.executor.run_pending();
        disposition
    }

    /// On the executor's own thread the order lock is only tried: its holder
    /// may be blocked on a full queue that only this thread can drain.
    fn acquire_post_order(&self) -> Option<MutexGuard<'_, ()>> {
        if !self.executor.is_worker_thread() {
            return Some(lock(&self.post_order));
        }
        match self.post_order.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

fn delivery_task(
    stream_id: StreamId,
    state: Weak<StreamState>,
    stats: Arc<BridgeStats>,
    frame: Vec<u8>,
) -> ScriptTask {
    Box::new(move || {
        let Some(state) = state.upgrade() else {
            BridgeStats::bump(&stats.frames_discarded);
            log::debug!("stream {stream_id}: bridge destroyed, queued frame discarded");
            return;
        };
        let controller = read(&state.controller).clone();
        let Some(controller) = controller else {
            BridgeStats::bump(&stats.frames_discarded);
            log::debug!("stream {stream_id}: controller unbound, queued frame discarded");
            return;
        };

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| controller.deliver_frame(stream_id, &frame)));
        match outcome {
            Ok(Ok(())) => BridgeStats::bump(&stats.frames_delivered),
            Ok(Err(err)) if err.is_method_unavailable() => {
                BridgeStats::bump(&stats.method_unavailable)
            }
            Ok(Err(err)) => {
                BridgeStats::bump(&stats.call_failures);
                log::error!("stream {stream_id}: {err}");
            }
            Err(payload) => {
                BridgeStats::bump(&stats.call_failures);
                log::error!(
                    "stream {stream_id}: controller panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    })
}

impl fmt::Debug for FrameBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBridge")
            .field("id", &self.id)
            .field("geometry", &self.geometry())
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl Drop for FrameBridge {
    fn drop(&mut self) {
        log::debug!("stream {}: bridge destroyed", self.id);
    }
}
