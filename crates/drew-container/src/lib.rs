pub mod capture;
pub mod converter;
pub mod docker;
pub mod error;
pub mod executor;
mod headless;
mod interactive;
pub mod runtime;
pub mod terminal;

pub use capture::{CaptureBuffer, CaptureSink, CaptureTarget, HostStreams, SharedWriter};
pub use converter::*;
pub use docker::*;
pub use error::*;
pub use executor::*;
pub use runtime::*;
pub use terminal::*;
