pub mod handle;
pub mod machine;

pub use handle::{CallHandle, HangupSignal, UserAction};
pub use machine::CallStateMachine;
