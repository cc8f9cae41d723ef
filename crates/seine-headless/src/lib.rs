//! Headless browser pool for JavaScript-rendered fetches.
//!
//! The pool is a fixed array of long-lived browser slots created once at
//! initialization. Workers are pinned to a slot by index, so one slot only
//! ever serves one worker at a time and page state never interleaves.

mod pool;

pub use pool::{BrowserPool, BrowserPoolConfig, BrowserSlot};
