pub(crate) mod dispatch;
pub(crate) mod event;
pub(crate) mod runner;
pub(crate) mod tracker;
pub(crate) mod triage;
