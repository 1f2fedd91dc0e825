pub mod link;
pub mod packet;
pub mod replica;
pub mod replicator;
pub mod schema;
