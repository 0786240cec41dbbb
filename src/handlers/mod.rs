pub mod correction;
pub mod models;

pub use correction::*;
pub use models::*;
