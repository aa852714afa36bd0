pub mod error;
pub mod ids;
pub mod store;
pub mod value;

pub use error::ScriptPlayError;
pub use ids::*;
pub use store::*;
pub use value::*;
