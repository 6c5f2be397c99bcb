pub mod market;
pub mod timeframe;
pub mod request;
pub mod errors;

pub use market::*;
pub use timeframe::*;
pub use request::*;
pub use errors::*;
