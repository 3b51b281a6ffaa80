pub mod proxy;
pub mod writer;
