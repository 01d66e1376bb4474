//! CLI command implementations

pub(crate) mod common;
pub(crate) mod make;
pub(crate) mod migrate;
pub(crate) mod rollback;
pub(crate) mod schema;
pub(crate) mod seed;
pub(crate) mod sql;
pub(crate) mod status;
pub(crate) mod unlock;
pub(crate) mod validate;
