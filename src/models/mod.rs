pub mod answer_key;
pub mod audit_log;
pub mod exam;
pub mod job;
pub mod participant;
pub mod result;
