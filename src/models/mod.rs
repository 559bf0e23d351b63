pub mod activity;
pub mod dashboard;
pub mod message;
pub mod settings;

pub use activity::*;
pub use dashboard::*;
pub use message::*;
pub use settings::*;
