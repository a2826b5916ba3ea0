pub mod headless;
pub mod worker_loop;
