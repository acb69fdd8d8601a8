pub mod aliases;
pub mod db;
pub mod jobs;
pub mod schema;
pub mod symbols;
