pub mod catalog;
pub mod feedback;
pub mod ratings_store;
pub mod recommendation;
pub mod training;
