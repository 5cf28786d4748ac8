//! Async helpers shared by the mode control entity core.
//!
//! Nothing here knows about display states, sockets, or brightness; it is the
//! small set of future/stream combinators and timer plumbing that the rest of
//! the workspace builds on.

#[cfg(test)]
mod tests;

pub mod codec;
pub mod futures;
pub mod timer;
