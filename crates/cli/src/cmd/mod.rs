mod gc;
mod hash;
mod install;
mod lifecycle;
mod stage;
mod status;

pub use gc::{cmd_clear, cmd_gc};
pub use hash::cmd_hash;
pub use install::cmd_install;
pub use lifecycle::{cmd_ready, cmd_resolve, cmd_restart, cmd_resume, cmd_rollback};
pub use stage::cmd_stage;
pub use status::cmd_status;
