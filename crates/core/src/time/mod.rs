pub mod window;

pub use window::{resolve_now, trailing_window};
