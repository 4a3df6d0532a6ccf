//! Reading caller options and callbacks out of plain JS objects.

use adcycle_core::{AdBreakHooks, SdkOptions, ShowAd};
use js_sys::{Function, Reflect};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::dom;

/// Decode the `init` options object.
///
/// # Errors
/// Returns a JS `Error` if the object does not have the expected shape.
pub fn parse_sdk_options(value: JsValue) -> Result<SdkOptions, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(SdkOptions::default());
    }
    serde_wasm_bindgen::from_value(value)
        .map_err(|err| dom::js_error(&format!("invalid options: {err}")))
}

fn property(source: &JsValue, name: &str) -> Option<JsValue> {
    if !source.is_object() {
        return None;
    }
    Reflect::get(source, &JsValue::from_str(name))
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

/// A function-valued property, looked up on `primary` first and `fallback` second.
fn callback(primary: &JsValue, fallback: &JsValue, name: &str) -> Option<Function> {
    property(primary, name)
        .or_else(|| property(fallback, name))
        .and_then(|value| value.dyn_into::<Function>().ok())
}

/// Reward break name from the call options, if given.
#[must_use]
pub fn reward_name(options: &JsValue) -> Option<String> {
    property(options, "name").and_then(|value| value.as_string())
}

/// The `adsenseConfig.rewardConfig` object, whose callbacks back up the ones
/// passed to `showReward`.
#[must_use]
pub fn reward_defaults(options: &JsValue) -> JsValue {
    property(options, "adsenseConfig")
        .and_then(|adsense| property(&adsense, "rewardConfig"))
        .unwrap_or(JsValue::UNDEFINED)
}

fn call_logged(function: &Function, name: &str, arg: Option<&JsValue>) {
    let result = match arg {
        Some(arg) => function.call1(&JsValue::NULL, arg),
        None => function.call0(&JsValue::NULL),
    };
    if let Err(err) = result {
        log::error!("{name} callback threw: {}", dom::js_error_message(&err));
    }
}

fn plain(function: Function, name: &'static str) -> impl FnMut() + 'static {
    move || call_logged(&function, name, None)
}

/// Wrap the caller's JS callbacks as break hooks.
#[must_use]
pub fn hooks_from_js(options: &JsValue, fallback: &JsValue) -> AdBreakHooks {
    let mut hooks = AdBreakHooks::new();

    if let Some(function) = callback(options, fallback, "beforeAd") {
        hooks = hooks.before_ad(plain(function, "beforeAd"));
    }
    if let Some(function) = callback(options, fallback, "adDismissed") {
        hooks = hooks.ad_dismissed(plain(function, "adDismissed"));
    }
    if let Some(function) = callback(options, fallback, "adViewed") {
        hooks = hooks.ad_viewed(plain(function, "adViewed"));
    }
    if let Some(function) = callback(options, fallback, "afterAd") {
        hooks = hooks.after_ad(plain(function, "afterAd"));
    }

    if let Some(function) = callback(options, fallback, "beforeReward") {
        hooks = hooks.before_reward(move |show: ShowAd| {
            let show = Closure::once_into_js(move || show.show());
            call_logged(&function, "beforeReward", Some(&show));
        });
    }

    if let Some(function) = callback(options, fallback, "adBreakDone") {
        hooks = hooks.break_done(move |status| {
            let info = js_sys::Object::new();
            if let Some(status) = status {
                let _ = Reflect::set(
                    &info,
                    &JsValue::from_str("breakStatus"),
                    &JsValue::from_str(status),
                );
            }
            call_logged(&function, "adBreakDone", Some(&info));
        });
    }

    hooks
}
