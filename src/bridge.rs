/// JS bridge functions implemented in popup.js

use wasm_bindgen::prelude::*;

#[wasm_bindgen(module = "/popup.js")]
extern "C" {
    #[wasm_bindgen(catch)]
    pub async fn getStorage(area: &str, key: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    pub async fn setStorage(area: &str, key: &str, value: JsValue) -> Result<(), JsValue>;

    pub fn onStorageChanged(area: &str, key: &str, callback: &js_sys::Function);

    #[wasm_bindgen(catch)]
    pub fn connectPort(
        on_message: &js_sys::Function,
        on_disconnect: &js_sys::Function,
    ) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    pub fn postPortMessage(message: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    pub async fn sendToActiveTab(message: JsValue) -> Result<JsValue, JsValue>;
}
