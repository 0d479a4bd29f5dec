pub mod control;
pub mod queue;
pub mod search;
pub mod system;
