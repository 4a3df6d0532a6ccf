//! `sessionStorage` and wall-clock backends for the rotation service.

use adcycle_core::{Clock, SessionStore};
use wasm_bindgen::JsValue;

use crate::dom;

#[derive(Debug, thiserror::Error)]
pub enum WebStorageError {
    #[error("Storage error: {0}")]
    Storage(String),
}

impl WebStorageError {
    fn from_js(value: &JsValue) -> Self {
        Self::Storage(dom::js_error_message(value))
    }
}

/// Session-scoped storage shared by every tab of the same browsing session.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSessionStore;

impl WebSessionStore {
    fn storage() -> Result<web_sys::Storage, WebStorageError> {
        dom::session_storage().map_err(|e| WebStorageError::from_js(&e))
    }
}

impl SessionStore for WebSessionStore {
    type Error = WebStorageError;

    fn get_item(&self, key: &str) -> Result<Option<String>, Self::Error> {
        Self::storage()?
            .get_item(key)
            .map_err(|e| WebStorageError::from_js(&e))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        Self::storage()?
            .set_item(key, value)
            .map_err(|e| WebStorageError::from_js(&e))
    }

    fn remove_item(&self, key: &str) -> Result<(), Self::Error> {
        Self::storage()?
            .remove_item(key)
            .map_err(|e| WebStorageError::from_js(&e))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserClock;

impl Clock for BrowserClock {
    fn now_ms(&self) -> u64 {
        dom::now_ms()
    }
}
