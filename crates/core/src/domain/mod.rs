pub mod client;
pub mod product;
pub mod quote;
