pub mod conversation_models;
pub mod conversation_repository;
pub mod message_repository;
