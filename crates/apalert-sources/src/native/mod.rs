pub mod source;
pub mod translate;

pub use source::{NativeAgent, NativeCache};
