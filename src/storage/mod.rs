mod feeds;
mod schema;
mod subscriptions;
mod types;

pub use feeds::start_of_day;
pub use schema::Database;
pub use types::{Feed, Stats, StoreError, Subscriber};
