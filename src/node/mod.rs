mod builder;
mod node;

pub use builder::*;
pub use node::*;

#[cfg(test)]
mod builder_test;
