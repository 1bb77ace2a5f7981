//! wasm-bindgen bindings that deliver native video frames to JavaScript
//! controller objects.
//!
//! JS objects never cross into `framebridge-core`; the core holds
//! `JsController` handles into a thread-local table instead.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use hashbrown::HashMap;
use js_sys::{Function, Object, Reflect, Uint8Array};
use serde_wasm_bindgen as swb;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use framebridge_core::{
    BridgeError, Config, ControllerSink, FlipMode, FrameBridge, FrameDisposition, FrameParams, InlineExecutor,
    MethodLookup, ScriptError, ScriptExecutor, ScriptObject, StreamId, StreamIdAllocator,
};

thread_local! {
    // JS objects never leave the JS thread; the bridge holds `JsController` handles into this table.
    static CONTROLLERS: RefCell<HashMap<u32, Object>> = RefCell::new(HashMap::new());
    static NEXT_HANDLE: Cell<u32> = const { Cell::new(1) };
    static EXECUTOR: Arc<InlineExecutor> = Arc::new(InlineExecutor::new());
}

fn jsvalue_is_undefined_or_null(v: &JsValue) -> bool {
    v.is_undefined() || v.is_null()
}

fn describe_js_error(err: JsValue) -> ScriptError {
    if let Some(e) = err.dyn_ref::<js_sys::Error>() {
        return ScriptError::new(String::from(e.message()));
    }
    if let Some(s) = err.as_string() {
        return ScriptError::new(s);
    }
    ScriptError::new(format!("{err:?}"))
}

/// Counted handle to a JS controller object.
///
/// The object stays reachable from JS-side bookkeeping until the last bridge
/// holding this handle lets go of it.
struct JsController {
    handle: u32,
}

impl JsController {
    fn register(object: Object) -> Self {
        let handle = NEXT_HANDLE.with(|next| {
            let h = next.get();
            next.set(h.wrapping_add(1));
            h
        });
        CONTROLLERS.with(|table| table.borrow_mut().insert(handle, object));
        Self { handle }
    }

    // Cloned out so JS callbacks may bind or unbind controllers reentrantly.
    fn object(&self) -> Option<Object> {
        CONTROLLERS.with(|table| table.borrow().get(&self.handle).cloned())
    }
}

impl Drop for JsController {
    fn drop(&mut self) {
        let removed = CONTROLLERS.try_with(|table| match table.try_borrow_mut() {
            Ok(mut table) => {
                table.remove(&self.handle);
                true
            }
            Err(_) => false,
        });
        if !matches!(removed, Ok(true)) {
            log::warn!(
                "controller handle {} could not be released; its object stays registered",
                self.handle
            );
        }
    }
}

impl ScriptObject for JsController {
    fn lookup_method(&self, name: &str) -> MethodLookup {
        let Some(object) = self.object() else {
            log::warn!("controller handle {} is no longer registered", self.handle);
            return MethodLookup::Missing;
        };
        match Reflect::get(&object, &JsValue::from_str(name)) {
            Ok(value) if value.is_function() => MethodLookup::Callable,
            Ok(value) if value.is_undefined() => MethodLookup::Missing,
            Ok(_) => MethodLookup::NotCallable,
            // A throwing getter counts as an absent method.
            Err(_) => MethodLookup::Missing,
        }
    }

    fn call_method(
        &self,
        name: &str,
        stream_id: StreamId,
        frame: &[u8],
    ) -> Result<(), ScriptError> {
        let object = self
            .object()
            .ok_or_else(|| ScriptError::new("controller was released"))?;
        let method: Function = Reflect::get(&object, &JsValue::from_str(name))
            .map_err(describe_js_error)?
            .dyn_into()
            .map_err(|_| ScriptError::new(format!("`{name}` is not a function")))?;

        // Ids stay far below 2^53, so a JS number represents them exactly.
        let id = JsValue::from_f64(stream_id.0 as f64);
        // Copies out of wasm memory; JS may keep the array after the call.
        let buffer = Uint8Array::from(frame);
        method
            .call2(&object, &id, &buffer)
            .map(|_| ())
            .map_err(describe_js_error)
    }
}

/// One video stream, exposed to JavaScript as `FrameBridge`.
///
/// Frames are delivered synchronously to the bound controller's
/// `updateRendererFrameBuffer(id, Uint8Array)` (the method name is
/// configurable). Calls made from inside that method are queued and run once
/// it returns.
#[wasm_bindgen(js_name = FrameBridge)]
pub struct WebFrameBridge {
    core: FrameBridge,
    config: Config,
}

#[wasm_bindgen(js_class = FrameBridge)]
impl WebFrameBridge {
    /// Create a bridge. Pass a config object or undefined/null for defaults.
    /// Example:
    ///   new FrameBridge({ controller_method: "onFrame" })
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<WebFrameBridge, JsError> {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        let config: Config = if jsvalue_is_undefined_or_null(&config) {
            Config::default()
        } else {
            swb::from_value(config).map_err(|e| JsError::new(&format!("config error: {e}")))?
        };
        config
            .validate()
            .map_err(|e| JsError::new(&format!("config error: {e}")))?;

        let executor: Arc<dyn ScriptExecutor> = EXECUTOR.with(|e| e.clone());
        let core = FrameBridge::new(&StreamIdAllocator::process_wide(), executor)
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(WebFrameBridge { core, config })
    }

    /// Stream id, passed as the first argument of every controller call.
    #[wasm_bindgen(getter)]
    pub fn id(&self) -> f64 {
        self.core.id().0 as f64
    }

    #[wasm_bindgen(getter)]
    pub fn width(&self) -> u32 {
        self.core.width()
    }

    #[wasm_bindgen(getter)]
    pub fn height(&self) -> u32 {
        self.core.height()
    }

    #[wasm_bindgen(getter)]
    pub fn rotation(&self) -> u32 {
        self.core.rotation_degrees()
    }

    /// Width once rotation is applied; quarter turns swap the axes.
    #[wasm_bindgen(getter, js_name = displayWidth)]
    pub fn display_width(&self) -> u32 {
        self.core.geometry().oriented_size().0
    }

    #[wasm_bindgen(getter, js_name = displayHeight)]
    pub fn display_height(&self) -> u32 {
        self.core.geometry().oriented_size().1
    }

    /// 0 = none, 1 = horizontal, 2 = vertical, 3 = both.
    #[wasm_bindgen(getter, js_name = flipMode)]
    pub fn flip_mode(&self) -> u32 {
        self.core.flip_mode().as_raw()
    }

    #[wasm_bindgen(getter, js_name = isBound)]
    pub fn is_bound(&self) -> bool {
        self.core.is_bound()
    }

    /// Bind a controller object, replacing any previous one. The frame method
    /// is looked up on every frame, not here.
    #[wasm_bindgen(js_name = bindController)]
    pub fn bind_controller(&self, controller: JsValue) -> Result<(), JsError> {
        if !controller.is_object() {
            let err = BridgeError::InvalidController("controller must be an object".into());
            return Err(JsError::new(&err.to_string()));
        }
        let handle = JsController::register(controller.unchecked_into::<Object>());
        let sink = ControllerSink::new(handle, &self.config);
        self.core.bind_controller(Arc::new(sink));
        Ok(())
    }

    /// Returns true if a controller was bound.
    #[wasm_bindgen(js_name = unbindController)]
    pub fn unbind_controller(&self) -> bool {
        self.core.unbind_controller().is_some()
    }

    /// Deliver one frame. Returns "unbound", "posted" or "rejected".
    #[wasm_bindgen(js_name = updateFrameBuffer)]
    pub fn update_frame_buffer(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        rotation: u32,
        flip_mode: u32,
    ) -> Result<String, JsError> {
        let flip = FlipMode::from_raw(flip_mode)
            .ok_or_else(|| JsError::new(&format!("invalid flip mode {flip_mode}")))?;
        let disposition =
            self.core
                .update_frame_buffer(data, FrameParams::new(width, height, rotation), flip);
        let label = match disposition {
            FrameDisposition::Unbound => "unbound",
            FrameDisposition::Posted => "posted",
            FrameDisposition::Rejected => "rejected",
        };
        Ok(label.to_string())
    }

    /// Delivery counters as a plain object.
    pub fn stats(&self) -> Result<JsValue, JsError> {
        swb::to_value(&self.core.stats()).map_err(|e| JsError::new(&format!("stats error: {e}")))
    }
}

/// Numeric ABI version for compatibility checks at init.
#[wasm_bindgen]
pub fn abi_version() -> u32 {
    1
}
