pub mod config;
pub mod error;
pub mod events;
pub mod rules;
pub mod score;
pub mod stage;
pub mod types;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::*;
pub use rules::*;
pub use score::*;
pub use stage::*;
pub use types::*;
