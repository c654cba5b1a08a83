//! Shared error type, id generation, and Result combinators used by every
//! Gas City crate.

mod error;
mod ids;
mod result;

pub use error::Error;
pub use ids::SeqIdGen;
pub use result::{GenericResultExt, OptionExt, Result, ResultExt};
