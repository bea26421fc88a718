pub mod error;
pub mod extract;
pub mod loader;
pub mod model;
pub mod state;

pub use error::*;
pub use extract::*;
pub use loader::*;
pub use model::*;
pub use state::*;
