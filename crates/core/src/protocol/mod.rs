mod events;
mod types;
mod ws;

pub use events::*;
pub use types::*;
pub use ws::*;
