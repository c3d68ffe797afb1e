pub mod bot;
pub mod intent;
pub mod record;

pub use bot::*;
pub use intent::*;
pub use record::*;
