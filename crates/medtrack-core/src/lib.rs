// Library root: domain records, configuration and the SQLite store shared by
// the adherence engine and the service layer.

pub mod config;
pub mod db;
pub mod model;
