//! Document store layer: MongoDB client wrapper and schemas

pub mod mongo;
pub mod schemas;

pub use mongo::{MongoClient, MongoCollection};
