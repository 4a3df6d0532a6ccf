//! `window.adsbygoogle` as an [`AdQueue`].
//!
//! Each break is pushed as a plain object carrying the network's lifecycle
//! callbacks. Callbacks never touch the service directly: they forward the
//! event to the [`EventSink`], which decides when it is safe to deliver.

use std::rc::Rc;

use adcycle_core::{AdCommand, AdEvent, AdQueue, BreakId, BreakKind, PushError, ShowAd};
use js_sys::{Array, Function, Object, Reflect};
use serde::Serialize;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::dom;

pub const QUEUE_GLOBAL: &str = "adsbygoogle";
pub const SCRIPT_SELECTOR: &str = r#"script[src*="adsbygoogle.js"]"#;

pub type EventSink = Rc<dyn Fn(BreakId, AdEvent)>;

/// Data part of a queue entry; callbacks are attached afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preload_ad_breaks: Option<&'static str>,
}

impl CommandPayload {
    #[must_use]
    pub fn for_command(command: &AdCommand) -> Self {
        match command {
            AdCommand::Preload => Self {
                kind: None,
                name: None,
                sound: Some("on"),
                preload_ad_breaks: Some("on"),
            },
            AdCommand::Break(request) => Self {
                kind: Some(request.kind.label()),
                name: match &request.kind {
                    BreakKind::Reward { name } => Some(name.clone()),
                    BreakKind::Preroll => None,
                },
                sound: None,
                preload_ad_breaks: None,
            },
        }
    }
}

pub struct AdsByGoogleQueue {
    sink: EventSink,
}

impl AdsByGoogleQueue {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }

    /// The queue global, created as an empty array when the tag has not run yet.
    fn global_queue() -> Result<JsValue, JsValue> {
        let win = dom::window().ok_or_else(|| dom::js_error("window unavailable"))?;
        let key = JsValue::from_str(QUEUE_GLOBAL);
        let existing = Reflect::get(&win, &key)?;
        if !existing.is_undefined() && !existing.is_null() {
            return Ok(existing);
        }
        let fresh: JsValue = Array::new().into();
        Reflect::set(&win, &key, &fresh)?;
        Ok(fresh)
    }

    fn entry(&self, command: &AdCommand) -> Result<JsValue, JsValue> {
        let payload = CommandPayload::for_command(command);
        let entry = serde_wasm_bindgen::to_value(&payload)?;
        if let AdCommand::Break(request) = command {
            self.attach_callbacks(&entry, request.id)?;
        }
        Ok(entry)
    }

    fn attach_callbacks(&self, entry: &JsValue, id: BreakId) -> Result<(), JsValue> {
        let simple: [(&str, fn() -> AdEvent); 4] = [
            ("beforeAd", || AdEvent::BeforeAd),
            ("adDismissed", || AdEvent::AdDismissed),
            ("adViewed", || AdEvent::AdViewed),
            ("afterAd", || AdEvent::AfterAd),
        ];
        for (name, make) in simple {
            let sink = Rc::clone(&self.sink);
            let callback = Closure::<dyn FnMut()>::new(move || sink(id, make()));
            Reflect::set(entry, &JsValue::from_str(name), &callback.into_js_value())?;
        }

        let sink = Rc::clone(&self.sink);
        let before_reward = Closure::<dyn FnMut(JsValue)>::new(move |show_fn: JsValue| {
            let show = ShowAd::new(move || {
                if let Some(show_fn) = show_fn.dyn_ref::<Function>()
                    && let Err(err) = show_fn.call0(&JsValue::NULL)
                {
                    log::error!("showAdFn failed: {}", dom::js_error_message(&err));
                }
            });
            sink(id, AdEvent::BeforeReward(show));
        });
        Reflect::set(
            entry,
            &JsValue::from_str("beforeReward"),
            &before_reward.into_js_value(),
        )?;

        let sink = Rc::clone(&self.sink);
        let done = Closure::<dyn FnMut(JsValue)>::new(move |placement: JsValue| {
            let status = placement
                .dyn_ref::<Object>()
                .and_then(|info| Reflect::get(info, &JsValue::from_str("breakStatus")).ok())
                .and_then(|status| status.as_string());
            sink(id, AdEvent::BreakDone { status });
        });
        Reflect::set(entry, &JsValue::from_str("adBreakDone"), &done.into_js_value())?;
        Ok(())
    }
}

impl AdQueue for AdsByGoogleQueue {
    fn is_ready(&self) -> bool {
        let Some(win) = dom::window() else {
            return false;
        };
        let queue = Reflect::get(&win, &JsValue::from_str(QUEUE_GLOBAL)).unwrap_or_default();
        queue.is_object() && dom::has_element(SCRIPT_SELECTOR)
    }

    fn push(&mut self, command: &AdCommand) -> Result<(), PushError> {
        let to_push_error = |err: JsValue| PushError::new(dom::js_error_message(&err));
        let queue = Self::global_queue().map_err(to_push_error)?;
        let entry = self.entry(command).map_err(to_push_error)?;
        let push = Reflect::get(&queue, &JsValue::from_str("push"))
            .map_err(to_push_error)?
            .dyn_into::<Function>()
            .map_err(|_| PushError::new("adsbygoogle.push is not a function"))?;
        push.call1(&queue, &entry).map_err(to_push_error)?;
        Ok(())
    }
}
