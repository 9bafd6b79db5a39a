pub mod daemon;
pub mod send_upstream;
pub mod setup;
pub mod sync;
