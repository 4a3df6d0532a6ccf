use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, Storage, Window};

/// Retrieve the global `window` object, if running in a browser context.
#[must_use]
pub fn window() -> Option<Window> {
    web_sys::window()
}

/// Retrieve the document object for DOM interactions.
#[must_use]
pub fn document() -> Option<Document> {
    window().and_then(|win| win.document())
}

/// Convert a JavaScript value into a readable string for error reporting.
#[must_use]
pub fn js_error_message(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .map(|err| err.message().into())
        })
        .unwrap_or_else(|| format!("{value:?}"))
}

/// Wrap a message in a JS `Error` so callers can `catch` it.
#[must_use]
pub fn js_error(message: &str) -> JsValue {
    js_sys::Error::new(message).into()
}

/// Access the browser `sessionStorage` handle.
///
/// # Errors
/// Returns an error if the browser window cannot be accessed or `sessionStorage` is unavailable.
pub fn session_storage() -> Result<Storage, JsValue> {
    window()
        .ok_or_else(|| JsValue::from_str("window unavailable"))?
        .session_storage()?
        .ok_or_else(|| JsValue::from_str("sessionStorage unavailable"))
}

/// Current `location.hash`, or an empty string outside a browser.
#[must_use]
pub fn current_hash() -> String {
    window()
        .and_then(|win| win.location().hash().ok())
        .unwrap_or_default()
}

/// Whether any element matches `selector`.
#[must_use]
pub fn has_element(selector: &str) -> bool {
    document()
        .and_then(|doc| doc.query_selector(selector).ok().flatten())
        .is_some()
}

/// Milliseconds since the Unix epoch from the JS clock.
#[must_use]
pub fn now_ms() -> u64 {
    // Date.now() is an integral, non-negative millisecond count.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let now = js_sys::Date::now() as u64;
    now
}
