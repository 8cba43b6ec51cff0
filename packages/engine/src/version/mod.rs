mod create_version;
mod switch_version;

pub(crate) use create_version::{create_version_in_conn, seed_root_version};
pub use create_version::{CreateVersionArgs, CreatedVersion};
pub(crate) use switch_version::switch_version_in_backend;

pub(crate) const GLOBAL_VERSION_ID: &str = "global";
pub(crate) const MAIN_VERSION_ID: &str = "main";
