//! CLI command implementations

mod config;
mod connect;
mod probe;
mod profile;
mod select;

pub use config::{config_get, config_init, config_path, config_set, config_show, load_app_config};
pub use connect::connect_command;
pub use probe::probe_command;
pub use profile::{
    profile_add, profile_list, profile_remove, profile_rename, profile_set, profile_show,
    profile_use,
};
pub use select::select_command;
