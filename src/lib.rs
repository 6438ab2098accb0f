// Relaycast Server Library
// Destination orchestration core shared by the HTTP binary and its tests

pub mod api;
pub mod models;
pub mod services;
