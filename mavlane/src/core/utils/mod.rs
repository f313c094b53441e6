//! Common utils.

pub mod arena;
pub mod closable;
pub(crate) mod net;
mod unique_id;

#[doc(inline)]
pub use arena::{Arena, Cookie};
#[doc(inline)]
pub use closable::{Closable, Closer};

pub(crate) use unique_id::UniqueId;
