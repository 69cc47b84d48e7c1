//! CLI command implementations

mod info;
mod list;
mod serve;

pub use info::target_info;
pub use list::list_tools;
pub use serve::{serve, ServeOverrides};
