pub mod capacity;
pub mod eligibility;
pub mod orchestrator;
pub mod pricing;
pub mod validity;

pub use orchestrator::{
    ConfirmedOrder, Identity, Orchestrator, PurchaseOutcome, PurchaseRequest, Settlement,
};
