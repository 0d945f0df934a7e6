//! Concrete [`ClientWrapper`](crate::client_wrapper::ClientWrapper) backends.

pub mod http_pool;
pub mod openai_compatible;
