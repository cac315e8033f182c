pub mod index_commands;
pub mod search_commands;
pub mod worker_commands;
