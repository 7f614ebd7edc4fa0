pub mod bluetooth;
pub mod inference;
pub mod logging;
pub mod permissions;
