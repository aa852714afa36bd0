pub mod cli_args;
pub mod demo;
pub mod line_mode;

pub use demo::{demo_player, demo_property_tags, demo_step_tags};
pub use line_mode::run_line_mode_with_io;
