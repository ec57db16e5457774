// marksync state managers
// Managers own mutable client state: the synchronized bookmark list and the cached session.

pub mod bookmark_list;
pub mod session_manager;
pub mod sync_controller;
