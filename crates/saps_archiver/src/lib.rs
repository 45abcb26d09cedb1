//! Permanent-storage archiver for SAPS tasks.
//!
//! Finished tasks have their staged phase directories uploaded to an object
//! store in phase order. The sweep then delivers pending "task archived"
//! notifications.

pub mod archiver;
pub mod error;
pub mod notify;
pub mod object_store;
pub mod storage;
pub mod token;

pub use archiver::{Archiver, SweepReport};
pub use error::{ArchiverError, StorageError};
pub use notify::{LogSink, NotificationSink};
pub use object_store::{MemoryObjectStore, ObjectStore, SwiftCliStore};
pub use storage::{PermanentStorage, StagePhase, StorageSettings};
pub use token::{CommandTokenSource, RefreshingToken, StaticToken, TokenProvider, TokenSource};
