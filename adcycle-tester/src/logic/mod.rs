pub mod harness;
pub mod network;
pub mod reports;
pub mod tester;

pub use harness::{Action, RunSummary, SimulationPlan};
pub use network::{ErrorMode, NetworkProfile};
pub use tester::*;
