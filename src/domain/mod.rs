pub mod coordinate;
pub mod feature;
pub mod messages;
pub mod position;
