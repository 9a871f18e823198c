/// Room Sync - Chrome Extension popup for shared video rooms
/// Built with Rust + WASM + Yew

pub mod background;
pub mod detection;
pub mod error;
pub mod room_code;
pub mod rooms;
pub mod session;
pub mod store;

#[cfg(target_arch = "wasm32")]
mod bridge;
#[cfg(target_arch = "wasm32")]
pub mod ui;

use wasm_bindgen::prelude::*;

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

// Lets the JS side check a code before sending it anywhere
#[wasm_bindgen]
pub fn is_valid_room_code(code: &str) -> bool {
    room_code::validate_room_code(code).is_ok()
}

// Start the Yew app for the popup
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn start_popup() {
    yew::Renderer::<ui::popup::App>::new().render();
}
