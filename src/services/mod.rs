pub mod allocation;
pub mod audit;
pub mod ptp_stats;
pub mod scheduler;
