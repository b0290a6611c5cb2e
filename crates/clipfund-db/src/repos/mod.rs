//! Repository implementations

mod campaign;
mod fetch_log;
mod ledger;
mod submission;

pub use campaign::CampaignRepo;
pub use fetch_log::FetchLogRepo;
pub use ledger::LedgerRepo;
pub use submission::SubmissionRepo;
