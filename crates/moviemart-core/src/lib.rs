pub mod column;
pub mod dataset;
pub mod dimension;
pub mod fact;
pub mod genres;
