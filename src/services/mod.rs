// marksync services
// Backend adapters (auth, record store, change feed) and configuration loading.

pub mod auth_service;
pub mod pkce;
pub mod realtime_service;
pub mod record_store;
pub mod settings_engine;
