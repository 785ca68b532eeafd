pub mod application;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod forge;
pub mod http;
pub mod install;
pub mod ledger;
pub mod observer;
pub mod package;
pub mod resolver;
pub mod runtime;
pub mod scanner;
