// Services module - outbound lookups used by the enrichment endpoints

pub mod ai;
pub mod tmdb;
