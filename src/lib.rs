//! CutMatch backend: a thin gateway in front of the hairstyle generation
//! provider, plus the client-side data and analytics helpers.

pub mod analytics;
pub mod app;
pub mod catalog;
pub mod client_data;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod replicate;
pub mod routes;
pub mod supabase;
