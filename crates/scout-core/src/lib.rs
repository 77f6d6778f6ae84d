pub mod errors;
pub mod events;
pub mod ids;
pub mod research;
pub mod workspace;
