pub mod definition;
pub mod player;
pub mod predicate;
pub mod registry;
pub mod state;
pub mod template;

pub use definition::*;
pub use player::{PlayerEvent, ScriptPlayer};
pub use predicate::CompiledPredicate;
pub use registry::{FunctionRegistry, HostFunction};
pub use state::PlayerState;
pub use template::{find_tags, render_template};

#[cfg(test)]
mod test_support;


#[cfg(test)]
mod state_tests;
