pub mod machine;
pub mod model;
pub mod repository;
pub mod service;
