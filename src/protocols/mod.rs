pub mod cost;
pub mod link_state;
pub mod spf;
