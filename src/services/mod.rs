pub mod aggregation_service;
pub mod answer_key_service;
pub mod answer_parser;
pub mod audit_service;
pub mod exam_lock;
pub mod grading_service;
pub mod queue_service;
pub mod ranking_service;
pub mod recompute_service;
