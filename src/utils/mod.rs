/// TOML configuration (`deepreport.toml`) and its hot-swappable manager.
pub mod toml_config;
