/// Observable stores with transaction-batched change notification.
///
/// A `Store` holds one state value and notifies its listeners after every
/// update. Stores bound to a `TransactionCoordinator` defer that notification
/// while a transaction span is open, so a batch of updates reaches listeners
/// as a single change once the outermost span closes.
pub mod entity;
pub mod store;
pub mod subscription;
pub mod transaction;

pub use entity::EntityState;
pub use store::Store;
pub use subscription::Subscription;
pub use transaction::{
    TransactionCoordinator, TransactionFutureExt, TransactionSpan, Transactional,
};
