pub mod page;
pub mod scores;
