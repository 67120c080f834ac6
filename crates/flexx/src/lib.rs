pub mod chat_service;
pub mod errors;
pub mod image_utils;
pub mod models;
pub mod prompt_template;
pub mod providers;
