//! Network tag injection.

use adcycle_core::SdkConfig;
use js_sys::{Function, Promise, Reflect};
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::HtmlScriptElement;

use crate::dom;
use crate::queue::QUEUE_GLOBAL;

const SCRIPT_BASE: &str = "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js";
const FREQUENCY_HINT: &str = "10s";

/// Where and how the ad tag is requested for a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTag {
    pub src: String,
    pub attributes: Vec<(&'static str, String)>,
}

impl ScriptTag {
    /// Native ad-break support loads the bare tag with the publisher and a
    /// frequency hint as attributes; otherwise the client goes in the URL.
    #[must_use]
    pub fn for_config(config: &SdkConfig) -> Self {
        if config.native_afg_support {
            Self {
                src: SCRIPT_BASE.to_string(),
                attributes: vec![
                    ("data-ad-client", config.pub_id.clone()),
                    ("data-ad-frequency-hint", FREQUENCY_HINT.to_string()),
                ],
            }
        } else {
            Self {
                src: format!("{SCRIPT_BASE}?client={}", config.pub_id),
                attributes: vec![("crossorigin", "anonymous".to_string())],
            }
        }
    }
}

/// Expose `window.adBreak` and `window.adConfig` as thin pushes onto the queue.
///
/// # Errors
/// Returns an error if the globals cannot be assigned.
pub fn install_ad_break_globals() -> Result<(), JsValue> {
    let win = dom::window().ok_or_else(|| dom::js_error("window unavailable"))?;
    let body = format!("(window.{QUEUE_GLOBAL} = window.{QUEUE_GLOBAL} || []).push(o);");
    let forward = Function::new_with_args("o", &body);
    Reflect::set(&win, &JsValue::from_str("adBreak"), &forward)?;
    Reflect::set(&win, &JsValue::from_str("adConfig"), &forward)?;
    Ok(())
}

/// Append the tag to `<head>` and wait for it to load. A tag already on the
/// page counts as loaded.
///
/// # Errors
/// Returns an error if the element cannot be created or the script fails to load.
#[allow(clippy::future_not_send)] // Wasm futures rely on `JsFuture`, which is not `Send`.
pub async fn load_script(tag: &ScriptTag) -> Result<(), JsValue> {
    if dom::has_element(&format!(r#"script[src="{}"]"#, tag.src)) {
        return Ok(());
    }
    let doc = dom::document().ok_or_else(|| dom::js_error("document unavailable"))?;
    let script: HtmlScriptElement = doc.create_element("script")?.dyn_into()?;
    script.set_src(&tag.src);
    script.set_async(true);
    for (name, value) in &tag.attributes {
        script.set_attribute(name, value)?;
    }

    let src = tag.src.clone();
    let promise = Promise::new(&mut |resolve, reject| {
        let onload = Closure::once_into_js(move || {
            let _ = resolve.call0(&JsValue::UNDEFINED);
        });
        let failed = format!("Script load failed: {src}");
        let onerror = Closure::once_into_js(move || {
            let _ = reject.call1(&JsValue::UNDEFINED, &dom::js_error(&failed));
        });
        script.set_onload(Some(onload.unchecked_ref()));
        script.set_onerror(Some(onerror.unchecked_ref()));
    });

    doc.head()
        .ok_or_else(|| dom::js_error("document has no <head>"))?
        .append_child(&script)?;
    JsFuture::from(promise).await?;
    Ok(())
}
