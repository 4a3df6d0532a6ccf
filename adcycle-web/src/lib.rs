#![forbid(unsafe_code)]
//! Browser binding for the ad rotation: `sessionStorage`, `window.adsbygoogle`,
//! `hashchange` and `setTimeout` wired to [`adcycle_core::AdRotation`].

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod dom;
pub mod loader;
pub mod options;
pub mod queue;
pub mod sdk;
pub mod storage;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
    if let Err(err) = console_log::init_with_level(log::Level::Debug) {
        web_sys::console::warn_1(&format!("console logger unavailable: {err}").into());
    }
}
