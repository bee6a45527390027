pub mod history;
pub mod maintenance;
pub mod run;
