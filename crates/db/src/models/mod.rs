pub mod account;
pub mod credit_transaction;
pub mod task;
