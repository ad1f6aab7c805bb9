pub mod config;
pub mod errors;
pub mod probe;
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub mod tunnel;
