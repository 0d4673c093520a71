pub mod assignments;
pub mod backup_exchange;
pub mod cards;
pub mod core;
pub mod folders;
pub mod lists;
pub mod turmas;
