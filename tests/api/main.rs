// Arcvet columnar archive validator.

//! Public API tests, driven through synthetic archives.

mod cli;
mod ric;
mod validate;
