pub mod factory;
pub mod paper;
pub mod traits;

pub use factory::{build_backend, BackendHandle};
pub use paper::PaperBroker;
pub use traits::{AccountProvider, BackendResult, ExecutionBackend, StaticAccountProvider};
