//! Reply-chain reconstruction.

mod resolver;

pub use resolver::ThreadResolver;
