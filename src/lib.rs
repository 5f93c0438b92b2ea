mod action;
mod as_value;
mod backend;
mod error;
mod executor;
mod expr;
mod pool;
mod query;
mod sql_writer;
mod statement;
mod table;
mod task;
mod util;
mod value;

pub use action::*;
pub use as_value::*;
pub use backend::*;
pub use error::*;
pub use executor::*;
pub use expr::*;
pub use pool::*;
pub use query::*;
pub use sql_writer::*;
pub use statement::*;
pub use table::*;
pub use task::*;
pub use util::*;
pub use value::*;
pub mod stream {
    pub use ::futures::stream::*;
}
pub use ::futures::future;
