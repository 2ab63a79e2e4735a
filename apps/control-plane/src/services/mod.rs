//! Background services: the in-process event bus and the job-queue workers
//! that drain it. Each worker owns one `JobKind` and is spawned once from
//! `main` alongside the HTTP listener.

pub mod alert_engine;
pub mod cert_renewal;
pub mod event_bus;
pub mod fanout_worker;
pub mod sweeper;
pub mod webhook_worker;

pub use alert_engine::spawn_alert_engine;
pub use cert_renewal::spawn_cert_renewal_worker;
pub use fanout_worker::spawn_fanout_worker;
pub use sweeper::spawn_sweeper;
pub use webhook_worker::spawn_webhook_worker;
