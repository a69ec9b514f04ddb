pub mod agent_switch;
pub mod hooks;
pub mod locks;
pub mod pipeline;
pub mod reply;
