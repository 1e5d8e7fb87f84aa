pub mod clean;
pub mod dispatch;
pub mod exec;
pub mod record;
pub mod run;
pub mod validate;
pub mod verify;

pub use dispatch::dispatch;
