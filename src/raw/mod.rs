//! Shared primitives for the pool-backed stack variants.

pub(crate) mod cell;
mod pool;
mod tag;

pub(crate) use pool::Pool;
pub(crate) use tag::Tagged;
