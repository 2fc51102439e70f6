pub mod flow;
pub mod pages;
pub mod server;

pub use flow::{
    manual_recovery_steps, parse_redirect_input, BrowserOpener, FlowDriver, FlowOptions,
    FlowResult, PasteError, SystemBrowser,
};
pub use server::{CallbackListener, CallbackOutcome, CallbackSession, ListenerHandle};
