pub mod config;
pub mod growth;
pub mod sqlite_pragma;
