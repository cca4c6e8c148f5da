pub mod action;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod io;
pub mod model;
pub mod operation;
pub mod prune;
pub mod receiver;
pub mod status;
pub mod store;
pub mod tag;
pub mod txn;
pub mod version;

pub use action::{Action, ActionMessage, ActionResults, MAX_LOG_MESSAGES};
pub use config::Config;
pub use error::{Result, TasklineError};
pub use model::Model;
pub use operation::Operation;
pub use prune::PruneStats;
pub use receiver::Life;
pub use status::{ActionStatus, StatusFilter};
pub use tag::{ActionTag, ReceiverTag};
pub use version::Version;
