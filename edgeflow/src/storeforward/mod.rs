//! Store-and-forward: durable persistence and background retry of failed
//! pipeline executions.

mod retry;
mod sqlite;
mod store;
mod stored_object;

pub use retry::{RetryPassSummary, RetryPolicy, StoreForward};
pub use sqlite::SqliteStoreClient;
pub use store::{InMemoryStoreClient, StoreClient, StoreReceipt};
pub use stored_object::StoredObject;
