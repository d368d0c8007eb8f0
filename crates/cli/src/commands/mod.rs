pub mod autoscalers;
pub mod debug;
pub mod history;
