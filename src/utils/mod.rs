pub mod fallback;
pub mod json;
