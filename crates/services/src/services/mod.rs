pub mod billing;
pub mod completion;
pub mod ledger;
pub mod task_lifecycle;
