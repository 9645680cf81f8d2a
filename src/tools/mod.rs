pub mod bridge;
pub mod registry;
pub mod time;
pub mod weather;
