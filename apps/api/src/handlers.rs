pub mod access_requests;
pub mod accesses;
pub mod health;
pub mod metabase;
