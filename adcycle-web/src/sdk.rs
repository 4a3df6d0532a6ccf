//! The JS-facing `c3` facade.
//!
//! One [`Runtime`] lives in a thread-local slot. Every exported function
//! borrows it for the duration of a synchronous call; ad callbacks and timer
//! wake-ups re-enter through [`deliver`] and [`pump`], never while a borrow
//! is held.

use std::cell::RefCell;
use std::rc::Rc;

use adcycle_core::{
    AdEvent, AdRotation, BreakId, PendingHook, SdkConfig, SdkError, VERSION,
};
use js_sys::{Function, Promise};
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use web_sys::Event;

use crate::dom;
use crate::loader::{self, ScriptTag};
use crate::options;
use crate::queue::{AdsByGoogleQueue, EventSink};
use crate::storage::{BrowserClock, WebSessionStore};

type WebRotation = AdRotation<WebSessionStore, AdsByGoogleQueue, BrowserClock>;

struct Runtime {
    rotation: WebRotation,
    pump: Function,
    timeout: Option<i32>,
    hash_listener: Option<Closure<dyn FnMut(Event)>>,
    reward_defaults: JsValue,
}

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

fn to_js(err: &SdkError) -> JsValue {
    dom::js_error(&err.to_string())
}

/// Run `f` against the live runtime.
fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> Result<R, JsValue>) -> Result<R, JsValue> {
    RUNTIME.with(|cell| {
        let mut slot = cell
            .try_borrow_mut()
            .map_err(|_| dom::js_error("C3 SDK is busy"))?;
        let runtime = slot
            .as_mut()
            .ok_or_else(|| to_js(&SdkError::NotInitialized))?;
        f(runtime)
    })
}

/// Re-arm the single `setTimeout` for the earliest pending task.
fn rearm(runtime: &mut Runtime) {
    let Some(win) = dom::window() else {
        return;
    };
    if let Some(handle) = runtime.timeout.take() {
        win.clear_timeout_with_handle(handle);
    }
    let Some(deadline) = runtime.rotation.next_deadline() else {
        return;
    };
    let delay = deadline.saturating_sub(dom::now_ms());
    let delay = i32::try_from(delay).unwrap_or(i32::MAX);
    match win.set_timeout_with_callback_and_timeout_and_arguments_0(&runtime.pump, delay) {
        Ok(handle) => runtime.timeout = Some(handle),
        Err(err) => log::error!("setTimeout failed: {}", dom::js_error_message(&err)),
    }
}

fn pump() {
    let result = with_runtime(|runtime| {
        runtime.timeout = None;
        let ran = runtime.rotation.run_due_timers();
        log::trace!("Ran {ran} due task(s)");
        rearm(runtime);
        Ok(())
    });
    if let Err(err) = result {
        log::warn!("Timer wake-up skipped: {}", dom::js_error_message(&err));
    }
}

/// Hand a network callback to the service on a fresh microtask, then run the
/// caller's hook once the runtime is released.
fn deliver(id: BreakId, event: AdEvent) {
    spawn_local(async move {
        let pending: Result<Option<PendingHook>, JsValue> = with_runtime(|runtime| {
            let hook = runtime.rotation.handle_ad_event(id, event);
            rearm(runtime);
            hook.map_err(|err| to_js(&err))
        });
        match pending {
            Ok(Some(hook)) => hook.run(),
            Ok(None) => {}
            Err(err) => log::error!("Ad event for {id} failed: {}", dom::js_error_message(&err)),
        }
    });
}

fn on_hash_change(_: Event) {
    let fragment = dom::current_hash();
    let result = with_runtime(|runtime| {
        let outcome = runtime.rotation.on_fragment_changed(&fragment);
        rearm(runtime);
        outcome.map_err(|err| to_js(&err))
    });
    if let Err(err) = result {
        log::error!("hashchange handling failed: {}", dom::js_error_message(&err));
    }
}

/// Attach the `hashchange` listener if the rotation is listening and none is attached.
fn sync_listener(runtime: &mut Runtime) -> Result<(), JsValue> {
    if !runtime.rotation.is_listening() || runtime.hash_listener.is_some() {
        return Ok(());
    }
    let win = dom::window().ok_or_else(|| dom::js_error("window unavailable"))?;
    let listener = Closure::<dyn FnMut(Event)>::new(on_hash_change);
    win.add_event_listener_with_callback("hashchange", listener.as_ref().unchecked_ref())?;
    runtime.hash_listener = Some(listener);
    Ok(())
}

fn detach_listener(runtime: &mut Runtime) {
    let Some(listener) = runtime.hash_listener.take() else {
        return;
    };
    if let Some(win) = dom::window()
        && let Err(err) = win.remove_event_listener_with_callback(
            "hashchange",
            listener.as_ref().unchecked_ref(),
        )
    {
        log::warn!(
            "Failed to detach hashchange listener: {}",
            dom::js_error_message(&err)
        );
    }
}

fn is_live() -> bool {
    RUNTIME.with(|cell| cell.try_borrow().map_or(true, |slot| slot.is_some()))
}

/// Configure the SDK, inject the ad tag, and start the rotation once the tag
/// has loaded. Resolves when start-up is complete.
///
/// # Errors
/// Throws synchronously for invalid options; the promise rejects if the tag
/// cannot be loaded.
#[wasm_bindgen]
pub fn init(options: JsValue) -> Result<Promise, JsValue> {
    if is_live() {
        log::warn!("{}", SdkError::AlreadyInitialized);
        return Ok(Promise::resolve(&JsValue::UNDEFINED));
    }

    let reward_defaults = options::reward_defaults(&options);
    let raw = options::parse_sdk_options(options)?;
    let config = SdkConfig::from_options(raw).map_err(|err| to_js(&SdkError::from(err)))?;
    let script = ScriptTag::for_config(&config);

    let sink: EventSink = Rc::new(deliver);
    let rotation = AdRotation::new(
        config,
        WebSessionStore,
        AdsByGoogleQueue::new(sink),
        BrowserClock,
    )
    .map_err(|err| to_js(&err))?;
    let pump = Closure::<dyn FnMut()>::new(pump)
        .into_js_value()
        .unchecked_into::<Function>();

    RUNTIME.with(|cell| {
        *cell.borrow_mut() = Some(Runtime {
            rotation,
            pump,
            timeout: None,
            hash_listener: None,
            reward_defaults,
        });
    });
    loader::install_ad_break_globals()?;

    Ok(future_to_promise(async move {
        if let Err(err) = loader::load_script(&script).await {
            log::error!("Ad tag failed to load: {}", dom::js_error_message(&err));
            return Err(err);
        }
        let fragment = dom::current_hash();
        with_runtime(|runtime| {
            let started = runtime.rotation.start(&fragment);
            let attached = sync_listener(runtime);
            rearm(runtime);
            started.map_err(|err| to_js(&err))?;
            attached
        })?;
        Ok(JsValue::UNDEFINED)
    }))
}

/// Start counting navigation-driven ads. Returns whether the listener is active.
///
/// # Errors
/// Throws before `init` or if session storage is unusable.
#[wasm_bindgen(js_name = enableHashListener)]
pub fn enable_hash_listener() -> Result<bool, JsValue> {
    let fragment = dom::current_hash();
    with_runtime(|runtime| {
        let enabled = runtime
            .rotation
            .enable_hash_listener(&fragment)
            .map_err(|err| to_js(&err))?;
        sync_listener(runtime)?;
        rearm(runtime);
        Ok(enabled)
    })
}

/// Request a preroll. `options` may carry `beforeAd`, `adDismissed`,
/// `adViewed`, `afterAd` and `adBreakDone` callbacks.
///
/// # Errors
/// Throws before `init`.
#[wasm_bindgen(js_name = showPreroll)]
pub fn show_preroll(options: JsValue) -> Result<(), JsValue> {
    let hooks = options::hooks_from_js(&options, &JsValue::UNDEFINED);
    with_runtime(|runtime| {
        let id = runtime.rotation.show_preroll(hooks);
        log::debug!("Manual preroll requested as {id}");
        rearm(runtime);
        Ok(())
    })
}

/// # Errors
/// Throws before `init`.
#[wasm_bindgen(js_name = triggerPreroll)]
pub fn trigger_preroll(options: JsValue) -> Result<(), JsValue> {
    show_preroll(options)
}

/// Push a reward break. Callbacks missing from `options` fall back to the ones
/// given in `adsenseConfig.rewardConfig` at `init`.
///
/// # Errors
/// Throws before `init`.
#[wasm_bindgen(js_name = showReward)]
pub fn show_reward(options: JsValue) -> Result<(), JsValue> {
    let name = options::reward_name(&options);
    with_runtime(|runtime| {
        let hooks = options::hooks_from_js(&options, &runtime.reward_defaults);
        runtime.rotation.show_reward(name.as_deref(), hooks);
        Ok(())
    })
}

/// # Errors
/// Throws before `init`.
#[wasm_bindgen(js_name = triggerReward)]
pub fn trigger_reward(options: JsValue) -> Result<(), JsValue> {
    show_reward(options)
}

/// The session's tracking record, or `null` when none exists yet.
///
/// # Errors
/// Throws before `init` or if session storage is unusable.
#[wasm_bindgen(js_name = getTrackingStats)]
pub fn get_tracking_stats() -> Result<JsValue, JsValue> {
    let record = with_runtime(|runtime| {
        runtime
            .rotation
            .tracking_stats()
            .map_err(|err| to_js(&err))
    })?;
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    match record {
        Some(record) => Ok(serde::Serialize::serialize(&record, &serializer)?),
        None => Ok(JsValue::NULL),
    }
}

/// # Errors
/// Throws before `init` or if session storage rejects the change.
#[wasm_bindgen(js_name = resetTracking)]
pub fn reset_tracking() -> Result<(), JsValue> {
    with_runtime(|runtime| {
        runtime
            .rotation
            .reset_tracking()
            .map(|_| log::info!("Ad cycle tracking reset"))
            .map_err(|err| to_js(&err))
    })
}

/// # Errors
/// Throws before `init` or if session storage rejects the change.
#[wasm_bindgen(js_name = resetInitialPreroll)]
pub fn reset_initial_preroll() -> Result<(), JsValue> {
    with_runtime(|runtime| {
        runtime
            .rotation
            .reset_initial_preroll_flag()
            .map_err(|err| to_js(&err))
    })
}

/// # Errors
/// Throws before `init` or if session storage rejects the change.
#[wasm_bindgen(js_name = resetInitialReward)]
pub fn reset_initial_reward() -> Result<(), JsValue> {
    with_runtime(|runtime| {
        runtime
            .rotation
            .reset_initial_reward_flag()
            .map_err(|err| to_js(&err))
    })
}

/// Cancel every pending timer and stop listening to navigation.
///
/// # Errors
/// Throws before `init`.
#[wasm_bindgen]
pub fn cleanup() -> Result<(), JsValue> {
    with_runtime(|runtime| {
        runtime.rotation.teardown();
        if let (Some(handle), Some(win)) = (runtime.timeout.take(), dom::window()) {
            win.clear_timeout_with_handle(handle);
        }
        detach_listener(runtime);
        Ok(())
    })
}

#[wasm_bindgen(js_name = isInitialized)]
#[must_use]
pub fn is_initialized() -> bool {
    is_live()
}

#[wasm_bindgen]
#[must_use]
pub fn version() -> String {
    VERSION.to_string()
}
