pub mod api;
pub mod database;
pub mod error;
pub mod filter;
pub mod ids;
pub mod index;
pub mod payload;
pub mod schema;
pub mod value;

pub use api::*;
pub use database::*;
pub use error::{LedgerError, LedgerResult};
pub use filter::*;
pub use ids::*;
pub use index::*;
pub use payload::*;
pub use schema::*;
pub use value::*;
