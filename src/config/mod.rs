mod persistence;


pub use persistence::*;
