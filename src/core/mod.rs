pub mod engine;
pub mod scope;
pub mod stemmer;
pub mod types;
