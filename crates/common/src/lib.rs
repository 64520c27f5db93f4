// huddle-common: wire protocol and shared view types for the Huddle chat backend

pub mod protocol;
pub mod room;
pub mod types;
